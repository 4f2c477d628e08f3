//! # Error Handling
//!
//! This module defines the error types used by the playback engine and by the
//! session client, and how they convert into each other.
//!
//! ## Error Layers:
//! - **OutputError**: raised by an output queue implementation (the platform side)
//! - **PlayerError**: raised by the playback engine (`StreamPlayer`, `BufferPool`)
//! - **AppError**: everything the client can run into (config, files, network, protocol)
//!
//! ## Why custom errors:
//! The playback engine has a small, fixed failure taxonomy and callers need to
//! tell a transient condition (no free buffer) from a fatal one (allocation or
//! enqueue failure). Matching on enum variants makes that explicit.

use std::fmt;

use crate::audio::player::PlayerState;

/// Error reported by an output queue implementation.
///
/// Carries a human-readable description of what the platform rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputError(pub String);

impl OutputError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl fmt::Display for OutputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "output queue error: {}", self.0)
    }
}

impl std::error::Error for OutputError {}

/// Errors returned by the playback engine.
///
/// ## Error Categories:
/// - **InvalidState**: operation not allowed in the current lifecycle state
/// - **Allocation**: buffers or the output queue could not be set up during `start`
/// - **NoFreeBuffer**: every slot is in flight; recoverable, retry the rest later
/// - **BufferTooLarge**: a span exceeded the slot capacity (an internal invariant violation)
/// - **SlotUnavailable**: a write targeted a busy or unknown slot
/// - **Enqueue**: the output queue rejected a submission
/// - **DrainTimeout**: the output never reported idle after `stop`; delivered
///   to the listener as `PlayerEvent::Error`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerError {
    /// `operation` is not legal while the player is in `state`
    InvalidState {
        operation: &'static str,
        state: PlayerState,
    },

    /// Buffer or output queue allocation failed
    Allocation(String),

    /// No free slot was left; `accepted` bytes of the write were queued before that
    NoFreeBuffer { accepted: usize },

    /// Span of `len` bytes does not fit a slot of `capacity` bytes
    BufferTooLarge { len: usize, capacity: usize },

    /// Slot `index` is busy or does not exist
    SlotUnavailable { index: usize },

    /// The output queue refused the buffer
    Enqueue(String),

    /// Teardown was forced because the drain never completed
    DrainTimeout,
}

impl PlayerError {
    /// Whether the session can carry on after this error.
    ///
    /// Only running out of free buffers is transient: the slots come back as
    /// soon as the output consumes them.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PlayerError::NoFreeBuffer { .. })
    }
}

impl fmt::Display for PlayerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerError::InvalidState { operation, state } => {
                write!(f, "cannot {} while the player is {}", operation, state)
            }
            PlayerError::Allocation(msg) => write!(f, "buffer allocation failed: {}", msg),
            PlayerError::NoFreeBuffer { accepted } => {
                write!(f, "no free output buffer ({} bytes accepted)", accepted)
            }
            PlayerError::BufferTooLarge { len, capacity } => write!(
                f,
                "span of {} bytes exceeds buffer capacity of {} bytes",
                len, capacity
            ),
            PlayerError::SlotUnavailable { index } => {
                write!(f, "buffer slot {} is busy or does not exist", index)
            }
            PlayerError::Enqueue(msg) => write!(f, "enqueueing buffer failed: {}", msg),
            PlayerError::DrainTimeout => {
                write!(f, "output did not drain in time, buffers were released forcibly")
            }
        }
    }
}

impl std::error::Error for PlayerError {}

/// Errors surfaced by the client application.
///
/// ## Usage Example:
/// ```ignore
/// return Err(AppError::Audio("WAV input must be mono".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Configuration file or environment variable problems
    Config(String),

    /// Reading the input or writing the output file failed
    Io(std::io::Error),

    /// Input audio does not match the configured format
    Audio(String),

    /// The service sent something we could not decode, or encoding a frame failed
    Protocol(String),

    /// WebSocket connect/send/receive failure
    Transport(String),

    /// The playback engine refused an operation
    Player(PlayerError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Io(err) => write!(f, "I/O error: {}", err),
            AppError::Audio(msg) => write!(f, "Audio error: {}", msg),
            AppError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            AppError::Transport(msg) => write!(f, "Transport error: {}", msg),
            AppError::Player(err) => write!(f, "Player error: {}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Io(err) => Some(err),
            AppError::Player(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err)
    }
}

/// Malformed JSON is always the peer's (or our framing's) fault.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Protocol(format!("JSON error: {}", err))
    }
}

impl From<base64::DecodeError> for AppError {
    fn from(err: base64::DecodeError) -> Self {
        AppError::Protocol(format!("invalid base64 audio: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        AppError::Transport(err.to_string())
    }
}

impl From<PlayerError> for AppError {
    fn from(err: PlayerError) -> Self {
        AppError::Player(err)
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;
