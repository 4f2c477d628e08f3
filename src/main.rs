//! # Voice Stream Client - Entry Point
//!
//! Runs one translation session:
//! 1. **Loads configuration** from `config.toml`, `APP_*` variables and `.env`
//! 2. **Reads the input audio** (raw PCM or WAV)
//! 3. **Starts the player** so synthesised speech is heard as it arrives
//! 4. **Streams the audio** and logs what the service sends back
//! 5. **Waits for playback to drain**, then exits with status 0 only if the
//!    service closed the connection normally

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voice_stream_client::audio::pcm;
use voice_stream_client::audio::{ClockedOutput, PlayerEvent, PlayerState, StreamPlayer};
use voice_stream_client::client::SessionClient;
use voice_stream_client::config::AppConfig;
use voice_stream_client::state::SessionState;

#[tokio::main]
async fn main() -> Result<()> {
    // It's fine if there's no .env file
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-stream-client v{}", env!("CARGO_PKG_VERSION"));

    let format = config.format();
    let audio = pcm::load_input(&config.audio.input, &format)?;
    info!(
        input = %config.audio.input,
        bytes = audio.len(),
        duration_ms = format.duration_of(audio.len()).as_millis() as u64,
        "Input audio loaded"
    );

    let player = if config.player.enabled {
        Some(start_player(&config)?)
    } else {
        info!("Playback disabled");
        None
    };

    let state = SessionState::new();
    let mut client = SessionClient::new(config.clone(), state.clone());
    if let Some((player, _)) = &player {
        client = client.with_player(player.clone());
    }

    // Whichever finishes first wins
    let exit_code = tokio::select! {
        result = client.run(audio) => match result {
            Ok(outcome) => outcome.exit_code(),
            Err(e) => {
                error!("Session failed: {}", e);
                1
            }
        },
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, abandoning session");
            // Skip waiting for playback
            report(&state);
            std::process::exit(1);
        }
    };
    drop(client);

    if let Some((player, states)) = player {
        // A session that failed early never told the player to drain
        let draining = match player.state() {
            PlayerState::Running => match player.stop() {
                Ok(()) => true,
                Err(e) => {
                    warn!("Could not stop the player: {}", e);
                    false
                }
            },
            PlayerState::Closing | PlayerState::Closed => true,
            PlayerState::Wait => false,
        };

        if draining {
            tokio::select! {
                _ = wait_for_closed(states) => {
                    info!(stats = ?player.stats(), "Playback finished");
                }
                _ = wait_for_shutdown() => {
                    info!("Shutdown signal received, stopping playback");
                }
            }
        }
    }

    report(&state);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// `RUST_LOG` controls what gets logged; without it everything from this
/// crate at debug level and above is shown.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_stream_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Start a player on the clocked output and publish its state changes.
fn start_player(config: &AppConfig) -> Result<(StreamPlayer, watch::Receiver<PlayerState>)> {
    let output = ClockedOutput::new(config.player.realtime)?;
    let player = StreamPlayer::new(output, config.player_options());

    let (tx, rx) = watch::channel(player.state());
    player.on_state_change(move |event| match event {
        PlayerEvent::StateChanged(state) => {
            // Nobody listening any more is fine
            let _ = tx.send(state);
        }
        PlayerEvent::Error(err) => warn!("Playback error: {}", err),
        PlayerEvent::EngineRunning(running) => info!(running, "Audio output"),
    });

    player.start(config.format())?;
    info!(
        buffers = player.buffer_count(),
        buffer_bytes = player.slot_capacity(),
        realtime = config.player.realtime,
        "Player started"
    );
    Ok((player, rx))
}

async fn wait_for_closed(mut states: watch::Receiver<PlayerState>) {
    while *states.borrow_and_update() != PlayerState::Closed {
        if states.changed().await.is_err() {
            return;
        }
    }
}

fn report(state: &SessionState) {
    let transcript = state.transcript();
    info!(
        origin = %transcript.origin.text(),
        translation = %transcript.translation.text(),
        "Transcript"
    );
}

/// Resolve on Ctrl+C, or SIGTERM where there is one.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
