//! # Configuration Management
//!
//! Loads the client configuration from several layered sources:
//! - Default values (built into the code)
//! - A TOML file: `config.toml` in the working directory, or the file named by `APP_CONFIG`
//! - Environment variables with the `APP_` prefix, `__` between levels
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (`APP_SERVICE__APP_ID`, `APP_PLAYER__BUFFER_COUNT`, ...)
//! 2. Configuration file
//! 3. Default values (defined in the Default impl)

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::format::AudioFormat;
use crate::audio::player::{
    PlayerOptions, DEFAULT_BUFFER_COUNT, DEFAULT_PACKETS_PER_BUFFER, MAX_BUFFER_COUNT,
    MAX_PACKETS_PER_BUFFER,
};
use crate::error::{AppError, AppResult};

const ENV_PREFIX: &str = "APP";
const CONFIG_PATH_VAR: &str = "APP_CONFIG";

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub player: PlayerConfig,
}

/// Where the translation service lives and how to authenticate against it.
///
/// ## Fields:
/// - `url`: WebSocket endpoint, without the signed query
/// - `app_id` / `app_secret`: credentials used to sign the request
/// - `connect_timeout_secs`: limit for the TCP + WebSocket handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub url: String,
    pub app_id: String,
    pub app_secret: String,
    pub connect_timeout_secs: u64,
}

/// What to send and what to ask for.
///
/// ## Fields:
/// - `input`: raw s16le mono PCM or a 16-bit mono WAV file
/// - `output`: where to save the synthesised audio as WAV (optional)
/// - `from` / `to`: source and target language codes
/// - `sample_rate`: rate of the input and of the audio the service returns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub input: String,
    pub output: Option<String>,
    pub from: String,
    pub to: String,
    pub sample_rate: u32,
}

/// Playback engine tuning.
///
/// ## Tuning guidelines:
/// - `buffer_count * packets_per_buffer * 2` bytes is the most audio in flight at once
/// - `drain_timeout_ms = 0` waits for the output forever after `audio/end`
/// - `write_retries` / `retry_delay_ms` bound how long the receive loop waits
///   for a free buffer before dropping audio
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    pub enabled: bool,
    pub buffer_count: usize,
    pub packets_per_buffer: usize,
    pub drain_timeout_ms: u64,
    pub realtime: bool,
    pub write_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                url: "ws://127.0.0.1:9000/v1/speech".to_string(),
                app_id: String::new(),
                app_secret: String::new(),
                connect_timeout_secs: 10,
            },
            audio: AudioConfig {
                input: "input.pcm".to_string(),
                output: None,
                from: "zh-CN".to_string(),
                to: "en-US".to_string(),
                sample_rate: 16000,
            },
            player: PlayerConfig {
                enabled: true,
                buffer_count: DEFAULT_BUFFER_COUNT,
                packets_per_buffer: DEFAULT_PACKETS_PER_BUFFER,
                drain_timeout_ms: 30_000,
                realtime: true,
                write_retries: 50,
                retry_delay_ms: 20,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, the config file and `APP_*` variables.
    pub fn load() -> AppResult<Self> {
        let file = std::env::var(CONFIG_PATH_VAR).ok().map(PathBuf::from);
        Self::load_layered(file, ENV_PREFIX)
    }

    /// Same layering as `load`, with an explicit file and environment prefix.
    ///
    /// An explicitly named file must exist; the default `config.toml` may be missing.
    pub fn load_layered(file: Option<PathBuf>, env_prefix: &str) -> AppResult<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&AppConfig::default())?);

        builder = match file {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name("config").required(false)),
        };

        let settings = builder
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> AppResult<()> {
        if self.service.url.trim().is_empty() {
            return Err(AppError::Config("Service URL cannot be empty".to_string()));
        }

        if self.service.app_id.is_empty() || self.service.app_secret.is_empty() {
            return Err(AppError::Config(
                "Service app_id and app_secret must be set".to_string(),
            ));
        }

        if self.service.connect_timeout_secs == 0 {
            return Err(AppError::Config(
                "Connect timeout must be greater than 0".to_string(),
            ));
        }

        self.format().validate().map_err(AppError::Config)?;

        if self.player.buffer_count == 0 || self.player.packets_per_buffer == 0 {
            return Err(AppError::Config(
                "Player buffer_count and packets_per_buffer must be greater than 0".to_string(),
            ));
        }

        if self.player.buffer_count > MAX_BUFFER_COUNT {
            return Err(AppError::Config(format!(
                "Player buffer_count must be at most {}",
                MAX_BUFFER_COUNT
            )));
        }

        if self.player.packets_per_buffer > MAX_PACKETS_PER_BUFFER {
            return Err(AppError::Config(format!(
                "Player packets_per_buffer must be at most {}",
                MAX_PACKETS_PER_BUFFER
            )));
        }

        Ok(())
    }

    pub fn format(&self) -> AudioFormat {
        AudioFormat::new(self.audio.sample_rate)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.service.connect_timeout_secs)
    }

    pub fn player_options(&self) -> PlayerOptions {
        PlayerOptions {
            buffer_count: self.player.buffer_count,
            packets_per_buffer: self.player.packets_per_buffer,
            drain_timeout: match self.player.drain_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_credentials() -> AppConfig {
        let mut config = AppConfig::default();
        config.service.app_id = "app".to_string();
        config.service.app_secret = "secret".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.player.buffer_count, DEFAULT_BUFFER_COUNT);
        assert!(config.audio.output.is_none());
        // Credentials have no sensible default
        assert!(config.validate().is_err());
        assert!(with_credentials().validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = with_credentials();
        config.audio.sample_rate = 0;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let mut config = with_credentials();
        config.player.packets_per_buffer = 0;
        assert!(config.validate().is_err());

        let mut config = with_credentials();
        config.player.packets_per_buffer = usize::MAX / 2 + 1;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let mut config = with_credentials();
        config.player.packets_per_buffer = MAX_PACKETS_PER_BUFFER;
        config.player.buffer_count = MAX_BUFFER_COUNT + 1;
        assert!(config.validate().is_err());
        config.player.buffer_count = MAX_BUFFER_COUNT;
        assert!(config.validate().is_ok());

        let mut config = with_credentials();
        config.service.url = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = with_credentials();
        config.service.connect_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_player_options() {
        let mut config = with_credentials();
        config.player.buffer_count = 8;
        config.player.packets_per_buffer = 256;
        config.player.drain_timeout_ms = 1500;

        let options = config.player_options();
        assert_eq!(options.buffer_count, 8);
        assert_eq!(options.packets_per_buffer, 256);
        assert_eq!(options.drain_timeout, Some(Duration::from_millis(1500)));

        config.player.drain_timeout_ms = 0;
        assert_eq!(config.player_options().drain_timeout, None);
    }

    #[test]
    fn test_file_and_environment_layers() {
        let path = std::env::temp_dir().join(format!("vsc-config-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            r#"
[service]
url = "ws://translate.example:8080/ws"
app_id = "file-id"
app_secret = "file-secret"

[audio]
output = "out.wav"
sample_rate = 8000
"#,
        )
        .unwrap();

        // A prefix of its own keeps parallel tests from seeing this variable.
        std::env::set_var("VSCTEST_PLAYER__BUFFER_COUNT", "12");
        let config = AppConfig::load_layered(Some(path.clone()), "VSCTEST").unwrap();
        std::env::remove_var("VSCTEST_PLAYER__BUFFER_COUNT");
        std::fs::remove_file(&path).ok();

        assert_eq!(config.service.url, "ws://translate.example:8080/ws");
        assert_eq!(config.service.app_id, "file-id");
        assert_eq!(config.audio.output.as_deref(), Some("out.wav"));
        assert_eq!(config.audio.sample_rate, 8000);
        assert_eq!(config.player.buffer_count, 12);
        // Untouched values keep their defaults
        assert_eq!(config.audio.from, "zh-CN");
        assert_eq!(config.player.packets_per_buffer, DEFAULT_PACKETS_PER_BUFFER);
    }

    #[test]
    fn test_missing_named_file_is_an_error() {
        let path = std::env::temp_dir().join(format!("vsc-missing-{}.toml", uuid::Uuid::new_v4()));
        assert!(matches!(
            AppConfig::load_layered(Some(path), "VSCTEST_NONE"),
            Err(AppError::Config(_))
        ));
    }
}
