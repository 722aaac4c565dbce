//! Configuration management for the input sync agent

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SyncError;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// OBS WebSocket connection
    #[serde(default)]
    pub recorder: RecorderConfig,

    /// Session log placement and session policy
    #[serde(default)]
    pub recording: RecordingConfig,

    /// Capture source configuration
    #[serde(default)]
    pub input: InputConfig,

    /// Log writer tuning
    #[serde(default)]
    pub sink: SinkConfig,

    /// Path to config file (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// WebSocket password, if authentication is enabled in OBS
    #[serde(default)]
    pub password: Option<String>,

    /// Delay between connection attempts
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_secs: u64,

    /// Record-status poll interval, backing up the event stream
    #[serde(default = "default_status_poll_interval")]
    pub status_poll_interval_ms: u64,
}

/// What to do when a start notification arrives while already recording
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveSessionPolicy {
    /// Keep the current session
    #[default]
    Ignore,
    /// Close the current session and open a new one
    Restart,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Directory for session logs. When unset, logs go beside the video.
    #[serde(default)]
    pub save_directory: Option<PathBuf>,

    #[serde(default)]
    pub active_session_policy: ActiveSessionPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_true")]
    pub capture_mouse: bool,

    #[serde(default = "default_true")]
    pub capture_keyboard: bool,

    #[serde(default = "default_true")]
    pub capture_gamepad: bool,

    /// Gamepad polling rate
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate_hz: u32,

    /// Which detected gamepad to poll
    #[serde(default)]
    pub gamepad_index: usize,

    /// Stick deflections at or below this magnitude are not logged
    #[serde(default = "default_noise_gate")]
    pub stick_noise_gate: f64,

    /// Key that stops the current session
    #[serde(default = "default_stop_hotkey")]
    pub stop_hotkey: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Buffered records are flushed at least this often
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,

    /// Flush as soon as this many records are buffered
    #[serde(default = "default_flush_batch_size")]
    pub flush_batch_size: usize,

    /// Write attempts before the session log is given up
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,

    /// How long to wait for each capture source on stop
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,

    /// Hold events this long to write them in timestamp order across sources
    #[serde(default)]
    pub reorder_window_ms: Option<u64>,
}

// Default value functions
fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    4455
}

fn default_reconnect_interval() -> u64 {
    5
}

fn default_status_poll_interval() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

fn default_sampling_rate() -> u32 {
    30
}

fn default_noise_gate() -> f64 {
    crate::input::normalize::STICK_NOISE_GATE
}

fn default_stop_hotkey() -> Option<String> {
    Some("F10".to_string())
}

fn default_flush_interval() -> u64 {
    250
}

fn default_flush_batch_size() -> usize {
    64
}

fn default_write_retries() -> u32 {
    3
}

fn default_drain_timeout() -> u64 {
    500
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            password: None,
            reconnect_interval_secs: default_reconnect_interval(),
            status_poll_interval_ms: default_status_poll_interval(),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            capture_mouse: true,
            capture_keyboard: true,
            capture_gamepad: true,
            sampling_rate_hz: default_sampling_rate(),
            gamepad_index: 0,
            stick_noise_gate: default_noise_gate(),
            stop_hotkey: default_stop_hotkey(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval(),
            flush_batch_size: default_flush_batch_size(),
            write_retries: default_write_retries(),
            drain_timeout_ms: default_drain_timeout(),
            reorder_window_ms: None,
        }
    }
}

impl SinkConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl RecorderConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            // Create default config
            let mut config = Config::default();
            config.config_path = Some(config_path);
            config.save()?;
            Ok(config)
        }
    }

    /// Load and validate a config file at an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = self.config_path()?;

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the config file path
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Self::default_config_path(),
        }
    }

    /// Get default config path
    fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("dev", "input-sync", "agent")
            .context("Failed to determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Reject settings the capture and sink loops cannot run with
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.input.sampling_rate_hz == 0 || self.input.sampling_rate_hz > 1000 {
            return Err(SyncError::Config(format!(
                "input.sampling_rate_hz must be in 1..=1000, got {}",
                self.input.sampling_rate_hz
            )));
        }
        if !(0.0..1.0).contains(&self.input.stick_noise_gate) {
            return Err(SyncError::Config(format!(
                "input.stick_noise_gate must be in [0, 1), got {}",
                self.input.stick_noise_gate
            )));
        }
        if self.recorder.status_poll_interval_ms == 0 {
            return Err(SyncError::Config(
                "recorder.status_poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.recorder.reconnect_interval_secs == 0 {
            return Err(SyncError::Config(
                "recorder.reconnect_interval_secs must be positive".to_string(),
            ));
        }
        if self.sink.flush_interval_ms == 0 {
            return Err(SyncError::Config(
                "sink.flush_interval_ms must be positive".to_string(),
            ));
        }
        if self.sink.flush_batch_size == 0 {
            return Err(SyncError::Config(
                "sink.flush_batch_size must be positive".to_string(),
            ));
        }
        if self.sink.write_retries == 0 {
            return Err(SyncError::Config(
                "sink.write_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.recorder.host, "localhost");
        assert_eq!(config.recorder.port, 4455);
        assert_eq!(config.input.sampling_rate_hz, 30);
        assert_eq!(config.input.stick_noise_gate, 0.1);
        assert_eq!(config.input.stop_hotkey.as_deref(), Some("F10"));
        assert_eq!(config.sink.reorder_window_ms, None);
        assert_eq!(
            config.recording.active_session_policy,
            ActiveSessionPolicy::Ignore
        );
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_toml(
            r#"
            [recording]
            active_session_policy = "restart"
            save_directory = "/tmp/logs"

            [input]
            capture_gamepad = false
            sampling_rate_hz = 60

            [sink]
            reorder_window_ms = 40
            "#,
        )
        .unwrap();

        assert_eq!(
            config.recording.active_session_policy,
            ActiveSessionPolicy::Restart
        );
        assert_eq!(
            config.recording.save_directory,
            Some(PathBuf::from("/tmp/logs"))
        );
        assert!(!config.input.capture_gamepad);
        assert!(config.input.capture_keyboard);
        assert_eq!(config.input.sampling_rate_hz, 60);
        assert_eq!(config.sink.reorder_window_ms, Some(40));
        assert_eq!(config.sink.flush_batch_size, 64);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Config::from_toml("[input]\nsampling_rate_hz = 0").is_err());
        assert!(Config::from_toml("[input]\nstick_noise_gate = 1.5").is_err());
        assert!(Config::from_toml("[sink]\nwrite_retries = 0").is_err());
        assert!(Config::from_toml("[sink]\nflush_interval_ms = 0").is_err());
        assert!(Config::from_toml("[recorder]\nstatus_poll_interval_ms = 0").is_err());
        assert!(Config::from_toml("[recorder]\nreconnect_interval_secs = 0").is_err());
        assert!(Config::from_toml("[recording]\nactive_session_policy = \"queue\"").is_err());
    }

    #[test]
    fn test_serialized_default_loads_back() {
        let contents = toml::to_string_pretty(&Config::default()).unwrap();
        let config = Config::from_toml(&contents).unwrap();
        assert_eq!(config.sink.flush_interval_ms, 250);
        assert_eq!(config.recorder.status_poll_interval_ms, 500);
    }
}
