//! # Audio Format
//!
//! The playback engine accepts exactly one sample layout:
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers
//!
//! Only the sample rate varies. Anything else must be converted by the caller.

use std::time::Duration;

/// Bits per sample of every stream the player renders.
pub const BITS_PER_SAMPLE: u16 = 16;

/// Channel count of every stream the player renders.
pub const CHANNELS: u16 = 1;

/// Format of the PCM stream handed to the player, fixed at `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Samples per second (Hz)
    pub sample_rate: u32,
}

impl AudioFormat {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    /// Bytes in one packet (one frame of all channels).
    pub fn bytes_per_packet(&self) -> usize {
        (BITS_PER_SAMPLE as usize / 8) * CHANNELS as usize
    }

    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.bytes_per_packet()
    }

    /// Capacity in bytes of an output buffer holding `packets` packets, or
    /// `None` if that does not fit in `usize`.
    pub fn buffer_capacity(&self, packets: usize) -> Option<usize> {
        packets.checked_mul(self.bytes_per_packet())
    }

    /// How long `bytes` of audio take to play at this rate.
    pub fn duration_of(&self, bytes: usize) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let nanos = bytes as u128 * 1_000_000_000 / self.bytes_per_second() as u128;
        Duration::from_nanos(nanos as u64)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err("sample rate must be greater than 0".to_string());
        }
        Ok(())
    }
}
