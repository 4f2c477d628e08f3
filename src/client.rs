//! # Translation Session Client
//!
//! Drives one session against the translation service over a WebSocket.
//!
//! ## Session Flow:
//! 1. **Connect**: sign the request and open the WebSocket (bounded by the connect timeout)
//! 2. **Transmit**: a separate task sends the input as `audio` frames, then `audio/end`
//! 3. **Receive**: sentences go to the transcript, `audio` goes to the player and
//!    to the capture buffer
//! 4. **Finish**: on `audio/end` the player is told to drain and the capture is
//!    saved; the session ends when the service closes the connection
//!
//! Frames that cannot be decoded are logged and skipped, they never end the session.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::audio::format::AudioFormat;
use crate::audio::pcm;
use crate::audio::player::{PlayerState, StreamPlayer};
use crate::config::AppConfig;
use crate::error::{AppError, AppResult, PlayerError};
use crate::protocol::{self, ClientFrame, ServerMessage};
use crate::signature::SignedQuery;
use crate::state::{SessionState, TextStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// How a session ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Close code sent by the service; `None` if the connection just dropped
    pub close_code: Option<u16>,
    pub close_reason: String,

    /// The service sent `audio/end`
    pub audio_finished: bool,

    /// Where the received audio was saved, if anywhere
    pub saved_to: Option<PathBuf>,
}

impl SessionOutcome {
    pub fn is_normal_close(&self) -> bool {
        self.close_code == Some(u16::from(CloseCode::Normal))
    }

    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> i32 {
        if self.is_normal_close() {
            0
        } else {
            1
        }
    }
}

/// One translation session.
pub struct SessionClient {
    config: AppConfig,
    state: SessionState,
    player: Option<StreamPlayer>,

    /// Set once the player hit a fatal error; no more audio is handed to it
    playback_failed: AtomicBool,
}

impl SessionClient {
    pub fn new(config: AppConfig, state: SessionState) -> Self {
        Self {
            config,
            state,
            player: None,
            playback_failed: AtomicBool::new(false),
        }
    }

    /// Render received audio through `player`, which must already be started.
    pub fn with_player(mut self, player: StreamPlayer) -> Self {
        self.player = Some(player);
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    fn format(&self) -> AudioFormat {
        self.config.format()
    }

    async fn connect(&self) -> AppResult<WsStream> {
        let service = &self.config.service;
        let audio = &self.config.audio;
        let url = SignedQuery::new(
            &service.app_id,
            &service.app_secret,
            &audio.from,
            &audio.to,
            audio.sample_rate,
        )
        .to_url(&service.url);

        info!(url = %service.url, from = %audio.from, to = %audio.to, "Connecting to translation service");

        let (ws, response) =
            tokio::time::timeout(self.config.connect_timeout(), tokio_tungstenite::connect_async(url.as_str()))
                .await
                .map_err(|_| {
                    AppError::Transport(format!(
                        "connection not established within {}s",
                        service.connect_timeout_secs
                    ))
                })??;

        debug!(status = %response.status(), "WebSocket handshake complete");
        Ok(ws)
    }

    /// Run a session that streams `audio` and collects what comes back.
    pub async fn run(&self, audio: Vec<u8>) -> AppResult<SessionOutcome> {
        let ws = self.connect().await?;
        let (sink, mut stream) = ws.split();

        let transmitter = spawn_transmitter(sink, audio, self.state.clone());

        let mut outcome = SessionOutcome::default();
        let mut received = Vec::new();

        while let Some(message) = stream.next().await {
            let message = match message {
                Ok(message) => message,
                Err(err) => {
                    error!(error = %err, "WebSocket receive failed");
                    transmitter.abort();
                    self.finish_playback();
                    return Err(err.into());
                }
            };

            match message {
                Message::Text(text) => {
                    self.handle_frame(&text, &mut received, &mut outcome).await;
                }
                Message::Binary(data) => match String::from_utf8(data) {
                    Ok(text) => self.handle_frame(&text, &mut received, &mut outcome).await,
                    Err(_) => {
                        self.state.record_received();
                        self.state.record_invalid_frame();
                        warn!("Received a binary frame that is not UTF-8 text");
                    }
                },
                Message::Close(frame) => {
                    if let Some(frame) = frame {
                        outcome.close_code = Some(u16::from(frame.code));
                        outcome.close_reason = frame.reason.to_string();
                    }
                    info!(
                        code = ?outcome.close_code,
                        reason = %outcome.close_reason,
                        "Connection closed by service"
                    );
                }
                _ => {}
            }
        }

        transmitter.abort();
        match transmitter.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "Audio transmission did not complete"),
            Err(err) if err.is_cancelled() => debug!("Transmitter stopped with the connection"),
            Err(err) => error!(error = %err, "Transmitter task failed"),
        }

        // The connection may end without `audio/end`.
        self.finish_playback();
        if outcome.saved_to.is_none() && !received.is_empty() {
            outcome.saved_to = self.save_audio(&received);
        }

        let metrics = self.state.metrics();
        info!(
            frames_sent = metrics.frames_sent,
            frames_received = metrics.frames_received,
            audio_bytes_received = metrics.audio_bytes_received,
            audio_bytes_dropped = metrics.audio_bytes_dropped,
            elapsed_ms = self.state.elapsed().as_millis() as u64,
            "Session finished"
        );
        Ok(outcome)
    }

    async fn handle_frame(&self, text: &str, received: &mut Vec<u8>, outcome: &mut SessionOutcome) {
        self.state.record_received();

        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(err) => {
                self.state.record_invalid_frame();
                warn!(error = %err, "Received invalid JSON frame");
                return;
            }
        };

        match message {
            ServerMessage::Origin { data } => {
                info!(is_final = data.is_final, sentence = %data.sentence, "Origin");
                self.state.record_sentence(TextStream::Origin, &data);
            }
            ServerMessage::Translation { data } => {
                info!(is_final = data.is_final, sentence = %data.sentence, "Translation");
                self.state.record_sentence(TextStream::Translation, &data);
            }
            ServerMessage::OriginEnd => {
                info!("Origin stream finished");
                self.state.finish_stream(TextStream::Origin);
            }
            ServerMessage::TranslationEnd => {
                info!("Translation stream finished");
                self.state.finish_stream(TextStream::Translation);
            }
            ServerMessage::Audio { data } => match data.decode() {
                Ok(pcm) => {
                    debug!(bytes = pcm.len(), "Audio received");
                    self.state.record_audio(pcm.len());
                    self.play(&pcm).await;
                    received.extend_from_slice(&pcm);
                }
                Err(err) => {
                    self.state.record_invalid_frame();
                    warn!(error = %err, "Dropping undecodable audio frame");
                }
            },
            ServerMessage::AudioFlush => debug!("Audio flush"),
            ServerMessage::AudioEnd => {
                info!(bytes = received.len(), "Audio stream finished");
                outcome.audio_finished = true;
                self.finish_playback();
                if outcome.saved_to.is_none() {
                    outcome.saved_to = self.save_audio(received);
                }
            }
            ServerMessage::Unknown => {
                self.state.record_unknown_frame();
                warn!("Received a frame of unknown type");
            }
        }
    }

    /// Hand `pcm` to the player, waiting for free buffers a bounded number of times.
    ///
    /// Only a full pool is retried. Any other failure of the output ends
    /// playback for the rest of the session.
    async fn play(&self, pcm: &[u8]) {
        let Some(player) = &self.player else {
            return;
        };
        if self.playback_failed.load(Ordering::Acquire) {
            self.drop_audio(pcm.len(), "playback already failed");
            return;
        }

        let retries = self.config.player.write_retries;
        let delay = Duration::from_millis(self.config.player.retry_delay_ms);
        let mut offset = 0;
        let mut attempts = 0;

        let cause = loop {
            match player.write(&pcm[offset..]) {
                Ok(()) => return,
                Err(PlayerError::NoFreeBuffer { accepted }) => {
                    offset += accepted;
                    if accepted > 0 {
                        attempts = 0;
                    }
                    if attempts >= retries {
                        break "no free playback buffer".to_string();
                    }
                    attempts += 1;
                    tokio::time::sleep(delay).await;
                }
                // Audio after the player was told to drain.
                Err(err @ PlayerError::InvalidState { .. }) => break err.to_string(),
                Err(err) => {
                    error!(error = %err, "Playback failed, stopping the player");
                    self.abandon_playback(player);
                    break err.to_string();
                }
            }
        };

        self.drop_audio(pcm.len() - offset, &cause);
    }

    fn drop_audio(&self, dropped: usize, cause: &str) {
        self.state.record_dropped_audio(dropped);
        warn!(dropped, cause, "Dropping received audio");
    }

    fn abandon_playback(&self, player: &StreamPlayer) {
        self.playback_failed.store(true, Ordering::Release);
        if player.state() != PlayerState::Running {
            return;
        }
        if let Err(err) = player.stop() {
            warn!(error = %err, "Could not stop the player");
        }
    }

    fn finish_playback(&self) {
        let Some(player) = &self.player else {
            return;
        };
        if player.state() != PlayerState::Running {
            return;
        }
        match player.stop() {
            Ok(()) => debug!("Player draining"),
            Err(err) => warn!(error = %err, "Could not stop the player"),
        }
    }

    fn save_audio(&self, pcm: &[u8]) -> Option<PathBuf> {
        let path = PathBuf::from(self.config.audio.output.as_deref()?);
        match pcm::write_wav(&path, &self.format(), pcm) {
            Ok(()) => {
                info!(path = %path.display(), bytes = pcm.len(), "Saved received audio");
                Some(path)
            }
            Err(err) => {
                error!(path = %path.display(), error = %err, "Failed to save received audio");
                None
            }
        }
    }
}

fn spawn_transmitter(
    mut sink: WsSink,
    audio: Vec<u8>,
    state: SessionState,
) -> JoinHandle<AppResult<()>> {
    tokio::spawn(async move {
        let packets = protocol::packetize(&audio)?;
        info!(packets = packets.len(), bytes = audio.len(), "Sending audio");

        for packet in packets {
            sink.send(Message::Binary(packet.json.into_bytes())).await?;
            state.record_sent(packet.audio_bytes);
        }

        let end = ClientFrame::AudioEnd.to_json()?;
        sink.send(Message::Binary(end.into_bytes())).await?;
        state.record_sent(0);
        debug!("Sent audio/end");
        Ok(())
    })
}
