//! # Audio Playback Module
//!
//! Real-time rendering of the PCM audio the service streams back.
//!
//! ## Key Components:
//! - **Buffer Pool**: fixed set of reusable output buffers with busy/free flags
//! - **Chunker**: splits incoming bytes into buffer-sized spans
//! - **Output Queue**: interface to the platform audio queue, plus a portable implementation
//! - **Stream Player**: lifecycle state machine and completion callback bridge
//! - **PCM files**: reading the input file and saving the received audio
//!
//! ## Audio Format Requirements:
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers
//! - **Sample Rate**: any positive rate, fixed for the player's lifetime

pub mod chunker;     // Capacity-bounded span splitting
pub mod clocked;     // Thread-based output queue paced by the sample clock
pub mod format;      // AudioFormat and size/duration arithmetic
pub mod output;      // OutputQueue / OutputEvents traits
pub mod pcm;         // WAV/raw input and WAV output
pub mod player;      // StreamPlayer and CallbackBridge
pub mod pool;        // BufferPool

pub use clocked::{ClockedOutput, PlaybackTap};
pub use format::AudioFormat;
pub use player::{PlayerEvent, PlayerOptions, PlayerState, StreamPlayer};
