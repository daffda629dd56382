//! Configuration management for the capture bridge
//!
//! Provides configuration loading, saving, and validation for session
//! timeouts and negotiation policy. A TOML file is the base layer;
//! `CAMERA_BRIDGE__<SECTION>__<KEY>` environment variables override it.

use crate::types::ResolutionPreset;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "CAMERA_BRIDGE";

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub session: SessionConfig,
    pub selection: SelectionConfig,
}

/// Preview session timing and buffering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long start_preview waits for the engine's start completion
    pub start_timeout_ms: u64,
    /// How long stop waits for the engine before disposing anyway
    pub stop_timeout_ms: u64,
    /// Frames buffered between the engine thread and the sink (drop-oldest)
    pub frame_queue_capacity: usize,
    /// How long disposal waits for the frame dispatcher to finish its current callback
    pub dispatcher_join_timeout_ms: u64,
}

/// Media type negotiation policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Admit compressed media types, ranked after every uncompressed one
    pub allow_compressed_fallback: bool,
    /// Preset used when the caller supplies no settings
    pub default_preset: ResolutionPreset,
    /// Drop media types whose pixel format the bridge cannot identify
    pub reject_unknown_formats: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            start_timeout_ms: 5000,
            stop_timeout_ms: 2000,
            frame_queue_capacity: 4,
            dispatcher_join_timeout_ms: 500,
        }
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            allow_compressed_fallback: true,
            default_preset: ResolutionPreset::High,
            reject_unknown_formats: true,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            selection: SelectionConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn dispatcher_join_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatcher_join_timeout_ms)
    }
}

/// Errors produced while loading or saving configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Failed to write config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl BridgeConfig {
    /// Load configuration from a TOML file layered under environment overrides.
    ///
    /// A missing file is not an error; defaults fill every absent key.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let loaded: BridgeConfig = settings.try_deserialize()?;
        loaded.validate().map_err(ConfigError::Invalid)?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(loaded)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let toml_string = toml::to_string_pretty(self)?;
        fs::write(path, toml_string)?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("camera-bridge.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.session.start_timeout_ms == 0 || self.session.start_timeout_ms > 60_000 {
            return Err("Start timeout must be between 1 and 60000 ms".to_string());
        }
        if self.session.stop_timeout_ms == 0 || self.session.stop_timeout_ms > 60_000 {
            return Err("Stop timeout must be between 1 and 60000 ms".to_string());
        }
        if self.session.frame_queue_capacity == 0 || self.session.frame_queue_capacity > 64 {
            return Err("Frame queue capacity must be between 1 and 64".to_string());
        }
        if self.session.dispatcher_join_timeout_ms > 10_000 {
            return Err("Dispatcher join timeout must not exceed 10000 ms".to_string());
        }
        Ok(())
    }
}
