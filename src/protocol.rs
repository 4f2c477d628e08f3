//! # Service Wire Protocol
//!
//! Every WebSocket frame is a JSON object tagged by its `type` field.
//!
//! ## Client → Service:
//! - `audio`: `{"type":"audio","data":{"audio":"<base64 PCM>"}}`, at most
//!   `MAX_AUDIO_PACKET_BYTES` raw bytes per frame
//! - `audio/end`: no more audio will follow
//!
//! ## Service → Client:
//! - `origin` / `translation`: a recognised or translated sentence, partial or final
//! - `origin/end` / `translation/end`: that stream is finished
//! - `audio`: synthesised speech as base64 PCM
//! - `audio/flush`, `audio/end`: audio stream markers

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::audio::chunker::Chunker;
use crate::error::{AppError, AppResult};

/// Largest raw audio payload carried by one `audio` frame.
pub const MAX_AUDIO_PACKET_BYTES: usize = 0x8FFE;

/// Base64-wrapped PCM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioPayload {
    pub audio: String,
}

impl AudioPayload {
    pub fn encode(pcm: &[u8]) -> Self {
        Self {
            audio: STANDARD.encode(pcm),
        }
    }

    pub fn decode(&self) -> AppResult<Vec<u8>> {
        Ok(STANDARD.decode(&self.audio)?)
    }
}

/// A recognised or translated sentence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentencePayload {
    #[serde(default)]
    pub sentence: String,

    /// Partial results are superseded by later ones; final results are not
    #[serde(rename = "is-final", default)]
    pub is_final: bool,
}

/// Frames sent to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "audio")]
    Audio { data: AudioPayload },

    #[serde(rename = "audio/end")]
    AudioEnd,
}

impl ClientFrame {
    pub fn to_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Frames received from the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "origin")]
    Origin { data: SentencePayload },

    #[serde(rename = "origin/end")]
    OriginEnd,

    #[serde(rename = "translation")]
    Translation { data: SentencePayload },

    #[serde(rename = "translation/end")]
    TranslationEnd,

    #[serde(rename = "audio")]
    Audio { data: AudioPayload },

    #[serde(rename = "audio/flush")]
    AudioFlush,

    #[serde(rename = "audio/end")]
    AudioEnd,

    /// Any `type` this client does not know
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    pub fn parse(text: &str) -> AppResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// One encoded `audio` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Raw PCM bytes carried by the frame
    pub audio_bytes: usize,
    pub json: String,
}

/// Split `audio` into `audio` frames of at most `MAX_AUDIO_PACKET_BYTES` each.
pub fn packetize(audio: &[u8]) -> AppResult<Vec<Packet>> {
    let chunker = Chunker::new(MAX_AUDIO_PACKET_BYTES)
        .ok_or_else(|| AppError::Protocol("empty packet size".to_string()))?;

    chunker
        .split(audio)
        .map(|span| {
            let json = ClientFrame::Audio {
                data: AudioPayload::encode(span),
            }
            .to_json()?;
            Ok(Packet {
                audio_bytes: span.len(),
                json,
            })
        })
        .collect()
}
