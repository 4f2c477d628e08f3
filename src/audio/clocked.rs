//! # Clocked Output
//!
//! A portable `OutputQueue` that "plays" submitted buffers on a dedicated
//! render thread, in submission order, optionally paced by the sample clock.
//! Played audio can be captured through a `PlaybackTap`.
//!
//! ## Render Thread:
//! - Spawned by `ClockedOutput::new` and idle until `start`
//! - Reports `running_changed(true)` when a session starts
//! - For every buffer: waits out its play time (when `realtime`), taps it,
//!   then reports `buffer_consumed(index)`
//! - On `stop`, finishes everything already queued, reports
//!   `running_changed(false)` and goes back to idle
//! - Exits once the `ClockedOutput` is dropped
//!
//! Commands reach the thread over an unbounded channel, so no queue method
//! blocks or spawns anything.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use tracing::{debug, trace};

use crate::audio::format::AudioFormat;
use crate::audio::output::{OutputEvents, OutputQueue};
use crate::error::OutputError;

enum Command {
    Start {
        format: AudioFormat,
        events: Arc<dyn OutputEvents>,
        session: u64,
    },
    Play {
        index: usize,
        data: Vec<u8>,
    },
    Stop,
    Close,
}

/// Shared capture of everything the render thread has played.
#[derive(Debug, Clone, Default)]
pub struct PlaybackTap {
    played: Arc<Mutex<Vec<u8>>>,
}

impl PlaybackTap {
    pub fn new() -> Self {
        Self::default()
    }

    fn append(&self, data: &[u8]) {
        self.played
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(data);
    }

    pub fn len(&self) -> usize {
        self.played.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the captured bytes, leaving the tap empty.
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.played.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Output queue rendering on its own thread.
pub struct ClockedOutput {
    format: Option<AudioFormat>,
    events: Option<Arc<dyn OutputEvents>>,
    commands: flume::Sender<Command>,
    allocated: usize,
    running: bool,
    stopping: bool,

    /// Bumped by `close`; the render thread drops any session it sees go stale
    session: Arc<AtomicU64>,
}

impl ClockedOutput {
    /// Spawn the render thread. `realtime` sleeps for each buffer's duration
    /// before completing it.
    pub fn new(realtime: bool) -> Result<Self, OutputError> {
        Self::build(realtime, None)
    }

    /// Like `new`, capturing every played buffer into `tap`.
    pub fn with_tap(realtime: bool, tap: PlaybackTap) -> Result<Self, OutputError> {
        Self::build(realtime, Some(tap))
    }

    fn build(realtime: bool, tap: Option<PlaybackTap>) -> Result<Self, OutputError> {
        let (tx, rx) = flume::unbounded();
        let session = Arc::new(AtomicU64::new(0));
        let worker = RenderWorker {
            commands: rx,
            realtime,
            tap,
            session: session.clone(),
        };
        thread::Builder::new()
            .name("pcm-render".to_string())
            .spawn(move || worker.run())
            .map_err(|e| OutputError::new(format!("cannot spawn render thread: {}", e)))?;

        Ok(Self {
            format: None,
            events: None,
            commands: tx,
            allocated: 0,
            running: false,
            stopping: false,
            session,
        })
    }

    /// Platform buffers currently allocated.
    pub fn allocated_buffers(&self) -> usize {
        self.allocated
    }

    fn send(&self, command: Command) -> Result<(), OutputError> {
        self.commands
            .send(command)
            .map_err(|_| OutputError::new("render thread has exited"))
    }
}

impl OutputQueue for ClockedOutput {
    fn open(
        &mut self,
        format: &AudioFormat,
        events: Arc<dyn OutputEvents>,
    ) -> Result<(), OutputError> {
        if self.events.is_some() {
            return Err(OutputError::new("output queue is already open"));
        }
        self.format = Some(*format);
        self.events = Some(events);
        Ok(())
    }

    fn allocate_buffer(&mut self, _index: usize, _capacity: usize) -> Result<(), OutputError> {
        if self.events.is_none() {
            return Err(OutputError::new("output queue is not open"));
        }
        self.allocated += 1;
        Ok(())
    }

    fn enqueue_buffer(&mut self, index: usize, data: &[u8]) -> Result<(), OutputError> {
        if !self.running {
            return Err(OutputError::new("output queue is not running"));
        }
        if self.stopping {
            return Err(OutputError::new("output queue is stopping"));
        }
        self.send(Command::Play {
            index,
            data: data.to_vec(),
        })
    }

    fn start(&mut self) -> Result<(), OutputError> {
        if self.running {
            return Err(OutputError::new("output queue is already started"));
        }
        let (format, events) = match (self.format, self.events.clone()) {
            (Some(format), Some(events)) => (format, events),
            _ => return Err(OutputError::new("output queue is not open")),
        };

        self.send(Command::Start {
            format,
            events,
            session: self.session.load(Ordering::Acquire),
        })?;
        self.running = true;
        self.stopping = false;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), OutputError> {
        if self.stopping {
            return Ok(());
        }
        if !self.running {
            return Err(OutputError::new("output queue is not running"));
        }
        self.send(Command::Stop)?;
        self.stopping = true;
        Ok(())
    }

    fn free_buffer(&mut self, _index: usize) {
        self.allocated = self.allocated.saturating_sub(1);
    }

    fn close(&mut self) {
        self.session.fetch_add(1, Ordering::AcqRel);
        if self.running {
            // Wakes a render thread waiting for the next buffer.
            let _ = self.send(Command::Close);
        }
        self.events = None;
        self.format = None;
        self.running = false;
        self.stopping = false;
    }
}

impl Drop for ClockedOutput {
    fn drop(&mut self) {
        // The sender goes with us, which ends the render thread.
        self.session.fetch_add(1, Ordering::AcqRel);
    }
}

struct RenderWorker {
    commands: flume::Receiver<Command>,
    realtime: bool,
    tap: Option<PlaybackTap>,
    session: Arc<AtomicU64>,
}

impl RenderWorker {
    fn run(self) {
        while let Ok(command) = self.commands.recv() {
            match command {
                Command::Start {
                    format,
                    events,
                    session,
                } => self.render(format, events.as_ref(), session),
                // Leftovers of a closed session.
                Command::Play { .. } | Command::Stop | Command::Close => {}
            }
        }
        debug!("Render thread detached");
    }

    /// Play one session until it is stopped (then report idle) or closed.
    fn render(&self, format: AudioFormat, events: &dyn OutputEvents, session: u64) {
        let is_current = || self.session.load(Ordering::Acquire) == session;
        if !is_current() {
            return;
        }
        debug!(sample_rate = format.sample_rate, "Render session started");
        events.running_changed(true);

        // Deadline of the last scheduled buffer, so pacing does not drift.
        let mut clock = Instant::now();

        loop {
            let Ok(command) = self.commands.recv() else {
                return;
            };
            if !is_current() {
                return;
            }

            match command {
                Command::Play { index, data } => {
                    if self.realtime {
                        clock = clock.max(Instant::now()) + format.duration_of(data.len());
                        thread::sleep(clock.saturating_duration_since(Instant::now()));
                        if !is_current() {
                            return;
                        }
                    }
                    if let Some(tap) = &self.tap {
                        tap.append(&data);
                    }
                    trace!(index, bytes = data.len(), "Buffer played");
                    events.buffer_consumed(index);
                }
                Command::Stop => break,
                Command::Close => return,
                Command::Start { .. } => debug!("Ignoring start of a running session"),
            }
        }

        debug!("Render session drained");
        events.running_changed(false);
    }
}
