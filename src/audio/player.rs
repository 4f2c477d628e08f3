//! # Streaming Player
//!
//! Renders an in-order stream of PCM bytes through an `OutputQueue` using a
//! fixed pool of recycled buffers.
//!
//! ## Player Lifecycle:
//! 1. **Wait**: constructed, nothing allocated
//! 2. **Running**: buffers allocated, output started, `write` accepted
//! 3. **Closing**: `stop` called, queued audio still draining
//! 4. **Closed**: output reported idle, buffers freed; terminal
//!
//! The progression is one-way. A closed player cannot be restarted; build a
//! new one to play again.
//!
//! ## Concurrency Model:
//! Two threads touch the player: the caller (`start`/`write`/`stop`) and the
//! output queue's render thread (`CallbackBridge`). One mutex guards one
//! composite `PlayerCore` holding the pool, the state and the output queue, so
//! there is no lock ordering to get wrong. Everything done under the lock is
//! memory-only bookkeeping; listeners are invoked after it is released.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::audio::chunker::Chunker;
use crate::audio::format::AudioFormat;
use crate::audio::output::{OutputEvents, OutputQueue};
use crate::audio::pool::BufferPool;
use crate::error::PlayerError;

/// Default number of output buffers.
///
/// Enough to hold three minutes of 16 kHz audio in flight:
/// 16000 * 2 * 180 / (2048 * 2) = 1406, rounded up to a power of two.
pub const DEFAULT_BUFFER_COUNT: usize = 2048;

/// Default packets (samples, for mono) per output buffer.
pub const DEFAULT_PACKETS_PER_BUFFER: usize = 2048;

/// Largest pool accepted from configuration.
pub const MAX_BUFFER_COUNT: usize = 65536;

/// Largest buffer accepted from configuration: 256 KiB of 16-bit mono.
pub const MAX_PACKETS_PER_BUFFER: usize = 131072;

/// Lifecycle state of a `StreamPlayer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Wait,
    Running,
    Closing,
    Closed,
}

impl PlayerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerState::Wait => "waiting",
            PlayerState::Running => "running",
            PlayerState::Closing => "closing",
            PlayerState::Closed => "closed",
        }
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification delivered to the listener registered with `on_state_change`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    /// The lifecycle moved to a new state
    StateChanged(PlayerState),

    /// The output queue reported it started or stopped running
    EngineRunning(bool),

    /// A failure no caller was waiting on, such as `DrainTimeout` when the
    /// drain watchdog forces teardown
    Error(PlayerError),
}

/// Sizing and drain policy of a player.
#[derive(Debug, Clone)]
pub struct PlayerOptions {
    /// Number of buffers in the pool
    pub buffer_count: usize,

    /// Packets per buffer; capacity = packets * bytes per packet
    pub packets_per_buffer: usize,

    /// Force teardown if the output has not drained this long after `stop`.
    /// `None` waits forever.
    pub drain_timeout: Option<Duration>,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            buffer_count: DEFAULT_BUFFER_COUNT,
            packets_per_buffer: DEFAULT_PACKETS_PER_BUFFER,
            drain_timeout: None,
        }
    }
}

/// Counters kept by the player over its lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PlayerStats {
    /// Bytes submitted to the output queue
    pub bytes_accepted: u64,

    /// Buffers submitted to the output queue
    pub buffers_submitted: u64,

    /// Completions that freed a busy buffer
    pub buffers_consumed: u64,

    /// Completions for buffers that were already free, or arrived after teardown
    pub stale_releases: u64,

    /// `write` calls that failed part-way
    pub rejected_writes: u64,
}

type Listener = Arc<dyn Fn(PlayerEvent) + Send + Sync>;

/// Everything guarded by the player lock.
struct PlayerCore {
    state: PlayerState,
    pool: BufferPool,
    output: Box<dyn OutputQueue>,
    chunker: Option<Chunker>,
    format: Option<AudioFormat>,
    listener: Option<Listener>,

    /// Dropping the sender cancels the drain watchdog
    watchdog: Option<flume::Sender<()>>,

    stats: PlayerStats,
}

impl PlayerCore {
    /// Free the pool, dispose of the output and become `Closed`.
    fn teardown(&mut self) {
        self.pool.free(self.output.as_mut());
        self.output.close();
        self.state = PlayerState::Closed;
        self.chunker = None;
        self.watchdog = None;
    }
}

struct Shared {
    core: Mutex<PlayerCore>,
    options: PlayerOptions,
}

impl Shared {
    /// A panic on one side must not wedge the other, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, PlayerCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drain_expired(&self) {
        let listener = {
            let mut core = self.lock();
            if core.state != PlayerState::Closing {
                return;
            }
            warn!(
                busy = core.pool.busy_count(),
                "Output did not drain in time, forcing teardown"
            );
            core.teardown();
            core.listener.clone()
        };
        notify(
            listener,
            &[
                PlayerEvent::Error(PlayerError::DrainTimeout),
                PlayerEvent::StateChanged(PlayerState::Closed),
            ],
        );
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let core = self.core.get_mut().unwrap_or_else(PoisonError::into_inner);
        if matches!(core.state, PlayerState::Running | PlayerState::Closing) {
            debug!("Player dropped while {}, releasing output", core.state);
            core.teardown();
        }
    }
}

fn notify(listener: Option<Listener>, events: &[PlayerEvent]) {
    if let Some(listener) = listener {
        for event in events {
            listener(event.clone());
        }
    }
}

/// Real-time PCM player over a recycled buffer pool.
///
/// Cloning yields another handle to the same player.
#[derive(Clone)]
pub struct StreamPlayer {
    shared: Arc<Shared>,
}

impl StreamPlayer {
    pub fn new(output: impl OutputQueue + 'static, options: PlayerOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                core: Mutex::new(PlayerCore {
                    state: PlayerState::Wait,
                    pool: BufferPool::new(),
                    output: Box::new(output),
                    chunker: None,
                    format: None,
                    listener: None,
                    watchdog: None,
                    stats: PlayerStats::default(),
                }),
                options,
            }),
        }
    }

    /// Allocate the buffers and start the output.
    ///
    /// ## State Transition:
    /// Wait → Running. On any failure everything acquired so far is released
    /// and the player stays in `Wait`, so `start` may be retried.
    pub fn start(&self, format: AudioFormat) -> Result<(), PlayerError> {
        let listener = {
            let mut core = self.shared.lock();
            self.start_locked(&mut core, format)?;
            core.listener.clone()
        };
        notify(listener, &[PlayerEvent::StateChanged(PlayerState::Running)]);
        Ok(())
    }

    fn start_locked(&self, core: &mut PlayerCore, format: AudioFormat) -> Result<(), PlayerError> {
        if core.state != PlayerState::Wait {
            return Err(PlayerError::InvalidState {
                operation: "start",
                state: core.state,
            });
        }
        format.validate().map_err(PlayerError::Allocation)?;

        let options = &self.shared.options;
        let capacity = format
            .buffer_capacity(options.packets_per_buffer)
            .ok_or_else(|| {
                PlayerError::Allocation(format!(
                    "{} packets per buffer overflows the buffer size",
                    options.packets_per_buffer
                ))
            })?;
        let chunker = Chunker::new(capacity).ok_or_else(|| {
            PlayerError::Allocation("buffers must hold at least one packet".to_string())
        })?;

        let events: Arc<dyn OutputEvents> = Arc::new(self.bridge());
        core.output
            .open(&format, events)
            .map_err(|e| PlayerError::Allocation(e.0))?;

        let PlayerCore { pool, output, .. } = &mut *core;
        if let Err(err) = pool.allocate(options.buffer_count, capacity, output.as_mut()) {
            output.close();
            return Err(err);
        }
        if let Err(err) = output.start() {
            pool.free(output.as_mut());
            output.close();
            return Err(PlayerError::Allocation(err.0));
        }

        core.state = PlayerState::Running;
        core.chunker = Some(chunker);
        core.format = Some(format);
        info!(
            sample_rate = format.sample_rate,
            buffers = options.buffer_count,
            capacity,
            "Player started"
        );
        Ok(())
    }

    /// Queue `bytes` for playback, split across as many buffers as needed.
    ///
    /// Never waits. If the pool runs dry part-way, the spans already queued
    /// stay queued and `NoFreeBuffer { accepted }` reports how many bytes
    /// they covered, so the caller can retry `bytes[accepted..]` later.
    pub fn write(&self, bytes: &[u8]) -> Result<(), PlayerError> {
        let mut core = self.shared.lock();
        if core.state != PlayerState::Running {
            return Err(PlayerError::InvalidState {
                operation: "write",
                state: core.state,
            });
        }
        let chunker = core.chunker.ok_or(PlayerError::InvalidState {
            operation: "write",
            state: core.state,
        })?;

        let PlayerCore {
            pool,
            output,
            stats,
            ..
        } = &mut *core;

        let mut accepted = 0;
        for span in chunker.split(bytes) {
            let result = pool
                .acquire()
                .map_err(|_| PlayerError::NoFreeBuffer { accepted })
                .and_then(|index| pool.write(index, span, output.as_mut()));

            if let Err(err) = result {
                stats.rejected_writes += 1;
                return Err(err);
            }
            accepted += span.len();
            stats.bytes_accepted += span.len() as u64;
            stats.buffers_submitted += 1;
        }
        Ok(())
    }

    /// Ask the output to stop once queued audio has played.
    ///
    /// ## State Transition:
    /// Running → Closing. Does not wait for the drain; the transition to
    /// `Closed` happens when the output reports idle (or the drain watchdog
    /// fires).
    pub fn stop(&self) -> Result<(), PlayerError> {
        let listener = {
            let mut core = self.shared.lock();
            if core.state != PlayerState::Running {
                return Err(PlayerError::InvalidState {
                    operation: "stop",
                    state: core.state,
                });
            }
            core.output
                .stop()
                .map_err(|e| PlayerError::Enqueue(format!("stop rejected: {}", e.0)))?;

            core.state = PlayerState::Closing;
            info!(in_flight = core.pool.busy_count(), "Player stopping, draining output");
            core.listener.clone()
        };
        if let Some(timeout) = self.shared.options.drain_timeout {
            self.arm_watchdog(timeout);
        }
        notify(listener, &[PlayerEvent::StateChanged(PlayerState::Closing)]);
        Ok(())
    }

    /// Spawn the drain watchdog, then hand it its cancel handle under the lock.
    ///
    /// If the output drained in between, the handle is dropped at once and
    /// the watchdog exits without firing.
    fn arm_watchdog(&self, timeout: Duration) {
        let (cancel, cancelled) = flume::bounded::<()>(1);
        let shared = Arc::downgrade(&self.shared);

        let spawned = thread::Builder::new()
            .name("drain-watchdog".to_string())
            .spawn(move || {
                // Disconnected means teardown already happened.
                if let Err(flume::RecvTimeoutError::Timeout) = cancelled.recv_timeout(timeout) {
                    if let Some(shared) = shared.upgrade() {
                        shared.drain_expired();
                    }
                }
            });

        if let Err(err) = spawned {
            warn!("Cannot start drain watchdog: {}", err);
            return;
        }

        let mut core = self.shared.lock();
        if core.state == PlayerState::Closing {
            core.watchdog = Some(cancel);
        }
    }

    /// Register the listener for lifecycle and output notifications,
    /// replacing any previous one. It runs outside the player lock, on
    /// whichever thread caused the event.
    pub fn on_state_change(&self, handler: impl Fn(PlayerEvent) + Send + Sync + 'static) {
        self.shared.lock().listener = Some(Arc::new(handler));
    }

    /// The callback entry points to hand to an output queue.
    pub fn bridge(&self) -> CallbackBridge {
        CallbackBridge {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn state(&self) -> PlayerState {
        self.shared.lock().state
    }

    pub fn format(&self) -> Option<AudioFormat> {
        self.shared.lock().format
    }

    pub fn buffer_count(&self) -> usize {
        self.shared.lock().pool.len()
    }

    pub fn free_buffers(&self) -> usize {
        self.shared.lock().pool.free_count()
    }

    pub fn busy_buffers(&self) -> usize {
        self.shared.lock().pool.busy_count()
    }

    /// Bytes per buffer, 0 before `start` and after teardown.
    pub fn slot_capacity(&self) -> usize {
        let core = self.shared.lock();
        core.chunker.map(|c| c.capacity()).unwrap_or(0)
    }

    pub fn stats(&self) -> PlayerStats {
        self.shared.lock().stats
    }
}

/// Entry points the output queue calls from its own thread.
///
/// Holds only a weak reference: notifications arriving after the player is
/// gone are dropped.
#[derive(Clone)]
pub struct CallbackBridge {
    shared: Weak<Shared>,
}

impl OutputEvents for CallbackBridge {
    fn buffer_consumed(&self, index: usize) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut core = shared.lock();
        if core.pool.release(index) {
            core.stats.buffers_consumed += 1;
        } else {
            core.stats.stale_releases += 1;
            debug!(index, state = %core.state, "Ignoring completion for a free buffer");
        }
    }

    fn running_changed(&self, is_running: bool) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let (listener, closed) = {
            let mut core = shared.lock();
            let closed = !is_running && core.state == PlayerState::Closing;
            if closed {
                core.teardown();
                info!("Output drained, player closed");
            }
            (core.listener.clone(), closed)
        };

        if closed {
            notify(
                listener,
                &[
                    PlayerEvent::EngineRunning(is_running),
                    PlayerEvent::StateChanged(PlayerState::Closed),
                ],
            );
        } else {
            notify(listener, &[PlayerEvent::EngineRunning(is_running)]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::output::fake::FakeOutput;
    use std::time::Instant;

    fn small_options() -> PlayerOptions {
        // 3 buffers of 2 packets = 4 bytes each
        PlayerOptions {
            buffer_count: 3,
            packets_per_buffer: 2,
            drain_timeout: None,
        }
    }

    fn player_with(options: PlayerOptions) -> (StreamPlayer, FakeOutput) {
        let output = FakeOutput::new();
        (StreamPlayer::new(output.clone(), options), output)
    }

    fn record_events(player: &StreamPlayer) -> Arc<Mutex<Vec<PlayerEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        player.on_state_change(move |event| sink.lock().unwrap().push(event));
        events
    }

    fn player_in(state: PlayerState) -> StreamPlayer {
        let (player, _output) = player_with(small_options());
        if state == PlayerState::Wait {
            return player;
        }
        player.start(AudioFormat::new(16000)).unwrap();
        if state == PlayerState::Running {
            return player;
        }
        player.stop().unwrap();
        if state == PlayerState::Closing {
            return player;
        }
        player.bridge().running_changed(false);
        assert_eq!(player.state(), PlayerState::Closed);
        player
    }

    fn wait_for(player: &StreamPlayer, state: PlayerState) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while player.state() != state {
            assert!(Instant::now() < deadline, "player never reached {}", state);
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_start_is_only_legal_from_wait() {
        for state in [PlayerState::Running, PlayerState::Closing, PlayerState::Closed] {
            let player = player_in(state);
            assert_eq!(
                player.start(AudioFormat::new(16000)),
                Err(PlayerError::InvalidState {
                    operation: "start",
                    state
                })
            );
        }
        assert!(player_in(PlayerState::Wait).start(AudioFormat::new(16000)).is_ok());
    }

    #[test]
    fn test_write_and_stop_are_only_legal_while_running() {
        for state in [PlayerState::Wait, PlayerState::Closing, PlayerState::Closed] {
            let player = player_in(state);
            assert_eq!(
                player.write(b"ab"),
                Err(PlayerError::InvalidState {
                    operation: "write",
                    state
                })
            );
            assert_eq!(
                player.stop(),
                Err(PlayerError::InvalidState {
                    operation: "stop",
                    state
                })
            );
        }
        let running = player_in(PlayerState::Running);
        assert!(running.write(b"ab").is_ok());
        assert!(running.stop().is_ok());
    }

    #[test]
    fn test_second_start_keeps_original_buffers() {
        let (player, output) = player_with(small_options());
        player.start(AudioFormat::new(16000)).unwrap();

        let err = player.start(AudioFormat::new(8000)).unwrap_err();
        assert!(matches!(err, PlayerError::InvalidState { .. }));
        assert_eq!(player.buffer_count(), 3);
        assert_eq!(output.log().allocated, vec![0, 1, 2]);
        assert_eq!(player.format(), Some(AudioFormat::new(16000)));
    }

    #[test]
    fn test_write_splits_across_buffers_in_order() {
        let (player, output) = player_with(small_options());
        player.start(AudioFormat::new(16000)).unwrap();
        assert_eq!(player.slot_capacity(), 4);

        player.write(b"0123456789").unwrap();

        let log = output.log();
        let spans: Vec<(usize, &[u8])> =
            log.enqueued.iter().map(|(i, d)| (*i, d.as_slice())).collect();
        assert_eq!(
            spans,
            vec![(0, &b"0123"[..]), (1, &b"4567"[..]), (2, &b"89"[..])]
        );
    }

    #[test]
    fn test_empty_write_submits_nothing() {
        let (player, output) = player_with(small_options());
        player.start(AudioFormat::new(16000)).unwrap();
        player.write(&[]).unwrap();
        assert!(output.log().enqueued.is_empty());
        assert_eq!(player.free_buffers(), 3);
    }

    #[test]
    fn test_exhausted_pool_reports_accepted_bytes_and_recovers() {
        let (player, output) = player_with(small_options());
        player.start(AudioFormat::new(16000)).unwrap();

        let data = b"aaaabbbbccccdd";
        let err = player.write(data).unwrap_err();
        assert_eq!(err, PlayerError::NoFreeBuffer { accepted: 12 });
        assert!(err.is_recoverable());
        assert_eq!(player.state(), PlayerState::Running);

        player.bridge().buffer_consumed(0);
        player.write(&data[12..]).unwrap();

        let last = output.log().enqueued.last().cloned().unwrap();
        assert_eq!(last, (0, b"dd".to_vec()));
        assert_eq!(player.stats().rejected_writes, 1);
        assert_eq!(player.stats().bytes_accepted, data.len() as u64);
    }

    #[test]
    fn test_released_slot_is_reused_first() {
        let (player, output) = player_with(small_options());
        player.start(AudioFormat::new(16000)).unwrap();

        for payload in [b"aaaa", b"bbbb", b"cccc"] {
            player.write(payload).unwrap();
        }
        assert_eq!(player.free_buffers(), 0);
        assert!(matches!(
            player.write(b"dddd"),
            Err(PlayerError::NoFreeBuffer { accepted: 0 })
        ));

        player.bridge().buffer_consumed(0);
        assert_eq!(player.free_buffers(), 1);
        player.write(b"eeee").unwrap();

        let indexes: Vec<usize> = output.log().enqueued.iter().map(|(i, _)| *i).collect();
        assert_eq!(indexes, vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_duplicate_completion_is_harmless() {
        let (player, _output) = player_with(small_options());
        player.start(AudioFormat::new(16000)).unwrap();
        player.write(b"aaaabbbb").unwrap();

        let bridge = player.bridge();
        bridge.buffer_consumed(1);
        let free_once = player.free_buffers();
        bridge.buffer_consumed(1);

        assert_eq!(player.free_buffers(), free_once);
        assert_eq!(player.busy_buffers(), 1);
        assert_eq!(player.stats().buffers_consumed, 1);
        assert_eq!(player.stats().stale_releases, 1);
    }

    #[test]
    fn test_enqueue_failure_is_surfaced_and_rolled_back() {
        let (player, output) = player_with(small_options());
        player.start(AudioFormat::new(16000)).unwrap();
        output.log().fail_enqueue = true;

        assert!(matches!(player.write(b"abcd"), Err(PlayerError::Enqueue(_))));
        assert_eq!(player.free_buffers(), 3);
        assert_eq!(player.state(), PlayerState::Running);
    }

    #[test]
    fn test_failed_start_stays_waiting_and_can_retry() {
        let (player, output) = player_with(small_options());
        output.log().fail_start = true;

        assert!(matches!(
            player.start(AudioFormat::new(16000)),
            Err(PlayerError::Allocation(_))
        ));
        assert_eq!(player.state(), PlayerState::Wait);
        assert_eq!(player.buffer_count(), 0);
        assert_eq!(output.live_buffers(), 0);
        assert!(output.log().closed);

        output.log().fail_start = false;
        player.start(AudioFormat::new(16000)).unwrap();
        assert_eq!(player.state(), PlayerState::Running);
    }

    #[test]
    fn test_failed_allocation_stays_waiting() {
        let (player, output) = player_with(small_options());
        output.log().fail_allocate_at = Some(2);

        assert!(matches!(
            player.start(AudioFormat::new(16000)),
            Err(PlayerError::Allocation(_))
        ));
        assert_eq!(player.state(), PlayerState::Wait);
        assert_eq!(output.live_buffers(), 0);
        assert!(!output.log().started);
    }

    #[test]
    fn test_zero_sample_rate_is_rejected() {
        let (player, output) = player_with(small_options());
        assert!(matches!(
            player.start(AudioFormat::new(0)),
            Err(PlayerError::Allocation(_))
        ));
        assert!(!output.log().opened);
    }

    #[test]
    fn test_overflowing_buffer_size_stays_waiting() {
        let options = PlayerOptions {
            packets_per_buffer: usize::MAX / 2 + 1,
            ..small_options()
        };
        let (player, output) = player_with(options);

        assert!(matches!(
            player.start(AudioFormat::new(16000)),
            Err(PlayerError::Allocation(_))
        ));
        assert_eq!(player.state(), PlayerState::Wait);
        assert!(!output.log().opened);
        assert_eq!(output.live_buffers(), 0);
    }

    #[test]
    fn test_idle_notification_closes_only_after_stop() {
        let (player, output) = player_with(small_options());
        player.start(AudioFormat::new(16000)).unwrap();
        player.write(b"abcdef").unwrap();

        // Idle while running is observed but does not close.
        player.bridge().running_changed(false);
        assert_eq!(player.state(), PlayerState::Running);

        player.stop().unwrap();
        assert_eq!(player.state(), PlayerState::Closing);
        assert!(output.log().stopped);
        assert_eq!(player.buffer_count(), 3);

        player.bridge().running_changed(false);
        assert_eq!(player.state(), PlayerState::Closed);
        assert_eq!(player.buffer_count(), 0);
        assert_eq!(output.live_buffers(), 0);
        assert!(output.log().closed);
        assert!(matches!(
            player.write(b"x"),
            Err(PlayerError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_late_completions_after_teardown_are_ignored() {
        let player = player_in(PlayerState::Running);
        player.write(b"abcd").unwrap();
        player.stop().unwrap();

        let bridge = player.bridge();
        bridge.running_changed(false);
        bridge.buffer_consumed(0);
        bridge.running_changed(false);

        assert_eq!(player.state(), PlayerState::Closed);
        assert_eq!(player.stats().stale_releases, 1);
    }

    #[test]
    fn test_listener_sees_every_transition() {
        let (player, _output) = player_with(small_options());
        let events = record_events(&player);

        player.start(AudioFormat::new(16000)).unwrap();
        player.bridge().running_changed(true);
        player.stop().unwrap();
        player.bridge().running_changed(false);

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                PlayerEvent::StateChanged(PlayerState::Running),
                PlayerEvent::EngineRunning(true),
                PlayerEvent::StateChanged(PlayerState::Closing),
                PlayerEvent::EngineRunning(false),
                PlayerEvent::StateChanged(PlayerState::Closed),
            ]
        );
    }

    #[test]
    fn test_listener_may_query_the_player() {
        let (player, _output) = player_with(small_options());
        let observed = Arc::new(Mutex::new(Vec::new()));
        let handle = player.clone();
        let sink = observed.clone();
        player.on_state_change(move |_| sink.lock().unwrap().push(handle.state()));

        player.start(AudioFormat::new(16000)).unwrap();
        assert_eq!(*observed.lock().unwrap(), vec![PlayerState::Running]);
    }

    #[test]
    fn test_drain_watchdog_forces_teardown() {
        let options = PlayerOptions {
            drain_timeout: Some(Duration::from_millis(20)),
            ..small_options()
        };
        let (player, output) = player_with(options);
        let events = record_events(&player);

        player.start(AudioFormat::new(16000)).unwrap();
        player.write(b"abcdefgh").unwrap();
        player.stop().unwrap();

        wait_for(&player, PlayerState::Closed);
        assert_eq!(output.live_buffers(), 0);
        let events = events.lock().unwrap();
        assert!(events.contains(&PlayerEvent::Error(PlayerError::DrainTimeout)));
        assert_eq!(
            events.last(),
            Some(&PlayerEvent::StateChanged(PlayerState::Closed))
        );
    }

    #[test]
    fn test_drain_watchdog_is_cancelled_by_idle() {
        let options = PlayerOptions {
            drain_timeout: Some(Duration::from_millis(30)),
            ..small_options()
        };
        let (player, _output) = player_with(options);
        let events = record_events(&player);

        player.start(AudioFormat::new(16000)).unwrap();
        player.stop().unwrap();
        player.bridge().running_changed(false);
        thread::sleep(Duration::from_millis(100));

        assert_eq!(player.state(), PlayerState::Closed);
        let events = events.lock().unwrap();
        assert!(!events
            .iter()
            .any(|event| matches!(event, PlayerEvent::Error(_))));
    }

    #[test]
    fn test_dropping_player_releases_output() {
        let (player, output) = player_with(small_options());
        player.start(AudioFormat::new(16000)).unwrap();
        let bridge = player.bridge();
        drop(player);

        assert!(output.log().closed);
        assert_eq!(output.live_buffers(), 0);
        // The bridge outlives the player without effect.
        bridge.buffer_consumed(0);
        bridge.running_changed(false);
    }

    #[test]
    fn test_concurrent_completions_keep_pool_consistent() {
        let options = PlayerOptions {
            buffer_count: 8,
            packets_per_buffer: 4,
            drain_timeout: None,
        };
        let (player, _output) = player_with(options);
        player.start(AudioFormat::new(16000)).unwrap();

        let bridge = player.bridge();
        let releaser = thread::spawn(move || {
            for round in 0..2000 {
                bridge.buffer_consumed(round % 8);
            }
        });

        let payload = [7u8; 8];
        let mut written = 0;
        while written < 500 {
            match player.write(&payload) {
                Ok(()) => written += 1,
                Err(err) => assert!(err.is_recoverable(), "unexpected error: {}", err),
            }
            if releaser.is_finished() && player.free_buffers() < 2 {
                let bridge = player.bridge();
                for index in 0..8 {
                    bridge.buffer_consumed(index);
                }
            }
        }
        releaser.join().unwrap();

        let stats = player.stats();
        assert!(player.busy_buffers() <= 8);
        assert!(stats.buffers_consumed <= stats.buffers_submitted);
        assert_eq!(
            stats.buffers_submitted - stats.buffers_consumed,
            player.busy_buffers() as u64
        );
    }
}
