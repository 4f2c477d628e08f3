//! # PCM File Handling
//!
//! Reads the audio that is streamed to the service and writes the audio the
//! service sends back.
//!
//! ## Input Formats:
//! - **WAV**: detected by its `RIFF` header; must be 16-bit mono at the configured rate
//! - **Raw**: anything else is taken as 16-bit little-endian mono PCM as-is
//!
//! ## Output Format:
//! A 16-bit mono WAV file at the session sample rate.

use std::fs::File;
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{debug, warn};

use crate::audio::format::{AudioFormat, BITS_PER_SAMPLE, CHANNELS};
use crate::error::{AppError, AppResult};

const WAV_FORMAT_PCM: u16 = 1;

/// Load the audio file at `path` as raw PCM bytes in `format`.
pub fn load_input(path: impl AsRef<Path>, format: &AudioFormat) -> AppResult<Vec<u8>> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;

    if data.starts_with(b"RIFF") {
        debug!(path = %path.display(), "Reading WAV input");
        return decode_wav(&data, format);
    }

    if data.len() % 2 != 0 {
        warn!(
            path = %path.display(),
            "Raw input has an odd length, the last byte is not a whole sample"
        );
    }
    debug!(path = %path.display(), bytes = data.len(), "Reading raw PCM input");
    Ok(data)
}

fn decode_wav(data: &[u8], format: &AudioFormat) -> AppResult<Vec<u8>> {
    let (header, track) = wav::read(&mut Cursor::new(data))
        .map_err(|e| AppError::Audio(format!("invalid WAV file: {}", e)))?;

    if header.channel_count != CHANNELS {
        return Err(AppError::Audio(format!(
            "WAV input must be mono, got {} channels",
            header.channel_count
        )));
    }
    if header.sampling_rate != format.sample_rate {
        return Err(AppError::Audio(format!(
            "Sample rate mismatch: expected {}, got {}",
            format.sample_rate, header.sampling_rate
        )));
    }

    match track {
        wav::BitDepth::Sixteen(samples) => Ok(encode_samples(&samples)),
        _ => Err(AppError::Audio(format!(
            "WAV input must be {}-bit PCM, got {} bits",
            BITS_PER_SAMPLE, header.bits_per_sample
        ))),
    }
}

/// Decode little-endian 16-bit samples. A trailing odd byte is ignored.
pub fn samples_from_pcm(data: &[u8]) -> Vec<i16> {
    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }
    samples
}

/// Encode samples as little-endian 16-bit PCM bytes.
pub fn encode_samples(samples: &[i16]) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        // Writing into a Vec cannot fail.
        let _ = data.write_i16::<LittleEndian>(sample);
    }
    data
}

/// Write `pcm` to `path` as a WAV file in `format`.
pub fn write_wav(path: impl AsRef<Path>, format: &AudioFormat, pcm: &[u8]) -> AppResult<()> {
    let path = path.as_ref();
    if pcm.len() % 2 != 0 {
        warn!("Received audio has an odd length, dropping the last byte");
    }

    let header = wav::Header::new(WAV_FORMAT_PCM, CHANNELS, format.sample_rate, BITS_PER_SAMPLE);
    let track = wav::BitDepth::Sixteen(samples_from_pcm(pcm));

    let mut writer = BufWriter::new(File::create(path)?);
    wav::write(header, &track, &mut writer)?;
    writer.flush()?;
    debug!(path = %path.display(), bytes = pcm.len(), "Wrote WAV output");
    Ok(())
}
