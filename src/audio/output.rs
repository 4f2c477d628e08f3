//! # Output Queue Interface
//!
//! The playback engine never talks to an audio device directly. It drives an
//! `OutputQueue`, a small capability object with the same shape as a platform
//! audio queue: allocate buffers, enqueue them, start, stop, free.
//!
//! ## Callback Contract:
//! The queue reports back through `OutputEvents`, from its own thread:
//! - `buffer_consumed(index)` once the buffer submitted under `index` has played
//! - `running_changed(is_running)` whenever the queue starts or finishes running
//!
//! The engine calls every `OutputQueue` method while holding its lock, so an
//! implementation must:
//! - never invoke `OutputEvents` synchronously from inside one of its methods
//! - never block (no device I/O, no waiting on its own worker) inside a method

use std::sync::Arc;

use crate::audio::format::AudioFormat;
use crate::error::OutputError;

/// Notifications delivered by an output queue, typically from its render thread.
pub trait OutputEvents: Send + Sync {
    /// The buffer submitted under `index` has been played and may be reused.
    fn buffer_consumed(&self, index: usize);

    /// The queue started (`true`) or stopped processing submissions (`false`).
    fn running_changed(&self, is_running: bool);
}

/// Platform audio output queue driven by the player.
pub trait OutputQueue: Send {
    /// Create the queue for `format`, delivering notifications to `events`.
    fn open(&mut self, format: &AudioFormat, events: Arc<dyn OutputEvents>)
        -> Result<(), OutputError>;

    /// Reserve the platform buffer backing slot `index`.
    fn allocate_buffer(&mut self, index: usize, capacity: usize) -> Result<(), OutputError>;

    /// Submit `data` for playback under slot `index`.
    fn enqueue_buffer(&mut self, index: usize, data: &[u8]) -> Result<(), OutputError>;

    fn start(&mut self) -> Result<(), OutputError>;

    /// Stop accepting work once what is already queued has played. Must not
    /// wait for the drain.
    fn stop(&mut self) -> Result<(), OutputError>;

    fn free_buffer(&mut self, index: usize);

    /// Dispose of the queue. No notification may follow.
    fn close(&mut self);
}
