//! # Session State
//!
//! State shared between the transmitter task, the receive loop and `main` for
//! the lifetime of one translation session.
//!
//! ## What is tracked:
//! - **Transcript**: final sentences of the origin and translation streams,
//!   the latest partial result of each, and whether each stream has ended
//! - **Metrics**: frame and byte counters in both directions, plus audio the
//!   player had no room for
//!
//! Both live behind `Arc<RwLock<T>>`; every accessor copies what it needs out
//! so no lock is held across an `.await`.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::protocol::SentencePayload;

/// The two text streams the service produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextStream {
    Origin,
    Translation,
}

impl TextStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextStream::Origin => "origin",
            TextStream::Translation => "translation",
        }
    }
}

impl fmt::Display for TextStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sentences received on one text stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamTranscript {
    /// Final sentences in arrival order
    pub sentences: Vec<String>,

    /// Latest partial result, cleared when a final one arrives
    pub partial: Option<String>,

    /// The service sent the stream's `/end` marker
    pub finished: bool,
}

impl StreamTranscript {
    fn record(&mut self, payload: &SentencePayload) {
        if payload.is_final {
            self.sentences.push(payload.sentence.clone());
            self.partial = None;
        } else {
            self.partial = Some(payload.sentence.clone());
        }
    }

    /// Final sentences joined with single spaces.
    pub fn text(&self) -> String {
        self.sentences.join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    pub origin: StreamTranscript,
    pub translation: StreamTranscript,
}

impl Transcript {
    fn stream_mut(&mut self, stream: TextStream) -> &mut StreamTranscript {
        match stream {
            TextStream::Origin => &mut self.origin,
            TextStream::Translation => &mut self.translation,
        }
    }
}

/// Traffic counters for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionMetrics {
    pub frames_sent: u64,
    pub audio_bytes_sent: u64,
    pub frames_received: u64,
    pub audio_bytes_received: u64,

    /// Received audio the player never accepted
    pub audio_bytes_dropped: u64,

    /// Frames that were not valid JSON or carried undecodable audio
    pub invalid_frames: u64,

    /// Well-formed frames of a type this client does not handle
    pub unknown_frames: u64,
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub transcript: Arc<RwLock<Transcript>>,
    pub metrics: Arc<RwLock<SessionMetrics>>,
    pub start_time: Instant,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            transcript: Arc::new(RwLock::new(Transcript::default())),
            metrics: Arc::new(RwLock::new(SessionMetrics::default())),
            start_time: Instant::now(),
        }
    }

    fn update_metrics(&self, apply: impl FnOnce(&mut SessionMetrics)) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        apply(&mut metrics);
    }

    pub fn record_sentence(&self, stream: TextStream, payload: &SentencePayload) {
        let mut transcript = self.transcript.write().unwrap_or_else(PoisonError::into_inner);
        transcript.stream_mut(stream).record(payload);
    }

    pub fn finish_stream(&self, stream: TextStream) {
        let mut transcript = self.transcript.write().unwrap_or_else(PoisonError::into_inner);
        transcript.stream_mut(stream).finished = true;
    }

    pub fn record_sent(&self, audio_bytes: usize) {
        self.update_metrics(|m| {
            m.frames_sent += 1;
            m.audio_bytes_sent += audio_bytes as u64;
        });
    }

    pub fn record_received(&self) {
        self.update_metrics(|m| m.frames_received += 1);
    }

    pub fn record_audio(&self, bytes: usize) {
        self.update_metrics(|m| m.audio_bytes_received += bytes as u64);
    }

    pub fn record_dropped_audio(&self, bytes: usize) {
        self.update_metrics(|m| m.audio_bytes_dropped += bytes as u64);
    }

    pub fn record_invalid_frame(&self) {
        self.update_metrics(|m| m.invalid_frames += 1);
    }

    pub fn record_unknown_frame(&self) {
        self.update_metrics(|m| m.unknown_frames += 1);
    }

    /// Get a copy of the transcript so far.
    pub fn transcript(&self) -> Transcript {
        self.transcript
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Get a snapshot of the current counters.
    pub fn metrics(&self) -> SessionMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}
