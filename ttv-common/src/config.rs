//! Configuration loading
//!
//! Bootstrap configuration comes from a single TOML file. Every field has a
//! built-in default, so a missing file (or a missing section) is never fatal.
//!
//! # Config file resolution
//!
//! 1. Command-line argument (highest priority)
//! 2. `TTV_CONFIG` environment variable
//! 3. Platform config directory (`~/.config/ttv/config.toml` on Linux)
//! 4. Built-in defaults (no file)

use crate::events::TaskKind;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "TTV_CONFIG";

/// Top-level configuration file
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TomlConfig {
    pub logging: LoggingConfig,
    pub registry: RegistryConfig,
    pub playback: PlaybackConfig,
    pub recording: RecordingConfig,
    pub limiter: LimiterConfig,
    pub events: EventsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` wins when set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Resource registry budget and ageing policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Aggregate size ceiling for all registered resources
    pub max_total_bytes: u64,

    /// Fraction of the budget to evict down to once it is exceeded
    pub eviction_target_ratio: f64,

    /// Entries not accessed for this long are swept
    pub max_idle_secs: u64,

    /// Entries older than this are swept regardless of access
    pub max_age_secs: u64,

    /// Period of the background sweep
    pub sweep_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_total_bytes: 100 * 1024 * 1024,
            eviction_target_ratio: 0.8,
            max_idle_secs: 15 * 60,
            max_age_secs: 30 * 60,
            sweep_interval_secs: 60,
        }
    }
}

impl RegistryConfig {
    pub fn max_idle_age(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Byte count that budget eviction stops at
    pub fn eviction_target_bytes(&self) -> u64 {
        (self.max_total_bytes as f64 * self.eviction_target_ratio).floor() as u64
    }
}

/// Playback defaults applied to new sessions
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub default_volume: f32,
    pub default_playback_rate: f32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_volume: 1.0,
            default_playback_rate: 1.0,
        }
    }
}

/// Microphone capture settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Hard ceiling on active recording time
    pub max_duration_secs: u64,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: 300,
            sample_rate: 44100,
            channels: 1,
        }
    }
}

impl RecordingConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }
}

/// Long-running task admission policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Maximum number of tasks running at once
    pub max_concurrent: usize,

    /// Task kinds a high-priority task may cancel to get a slot
    pub preemptible_kinds: Vec<TaskKind>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            preemptible_kinds: vec![TaskKind::Analysis, TaskKind::Download],
        }
    }
}

/// Event bus sizing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file path
    ///
    /// `None` or a path that does not exist yields built-in defaults with a
    /// warning. A file that exists but does not parse is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            info!("No config file, using built-in defaults");
            return Ok(Self::default());
        };

        if !path.exists() {
            warn!(
                "Config file {} not found, using built-in defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content).map_err(|e| {
            Error::Config(format!("Failed to load {}: {}", path.display(), e))
        })?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Reject settings the audio core cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.registry.max_total_bytes == 0 {
            return Err(Error::Config(
                "registry.max_total_bytes must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.registry.eviction_target_ratio) {
            return Err(Error::Config(format!(
                "registry.eviction_target_ratio must be within [0, 1], got {}",
                self.registry.eviction_target_ratio
            )));
        }
        if self.registry.sweep_interval_secs == 0 {
            return Err(Error::Config(
                "registry.sweep_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.limiter.max_concurrent == 0 {
            return Err(Error::Config(
                "limiter.max_concurrent must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.playback.default_volume) {
            return Err(Error::Config(format!(
                "playback.default_volume must be within [0, 1], got {}",
                self.playback.default_volume
            )));
        }
        if !(0.5..=2.0).contains(&self.playback.default_playback_rate) {
            return Err(Error::Config(format!(
                "playback.default_playback_rate must be within [0.5, 2], got {}",
                self.playback.default_playback_rate
            )));
        }
        if self.recording.sample_rate == 0 || self.recording.channels == 0 {
            return Err(Error::Config(
                "recording.sample_rate and recording.channels must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Resolve which config file (if any) should be loaded
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory, only if the file is there
    default_config_path().filter(|p| p.exists())
}

/// Platform config file location (`<config_dir>/ttv/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("ttv").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TomlConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.registry.max_total_bytes, 104_857_600);
        assert_eq!(config.registry.max_idle_age(), Duration::from_secs(900));
        assert_eq!(config.registry.max_age(), Duration::from_secs(1800));
        assert_eq!(config.limiter.max_concurrent, 3);
        assert_eq!(config.recording.max_duration(), Duration::from_secs(300));
    }

    #[test]
    fn test_eviction_target_bytes() {
        let registry = RegistryConfig {
            max_total_bytes: 1000,
            ..Default::default()
        };
        assert_eq!(registry.eviction_target_bytes(), 800);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = TomlConfig::from_toml_str(
            r#"
            [limiter]
            max_concurrent = 5
            preemptible_kinds = ["download"]
            "#,
        )
        .unwrap();

        assert_eq!(config.limiter.max_concurrent, 5);
        assert_eq!(config.limiter.preemptible_kinds, vec![TaskKind::Download]);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.registry.sweep_interval_secs, 60);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(TomlConfig::from_toml_str("[limiter]\nmax_concurrent = 0\n").is_err());
        assert!(TomlConfig::from_toml_str("[registry]\nmax_total_bytes = 0\n").is_err());
        assert!(TomlConfig::from_toml_str("[playback]\ndefault_playback_rate = 3.0\n").is_err());
    }

    #[test]
    fn test_malformed_toml_is_error() {
        let result = TomlConfig::from_toml_str("[registry\nmax_total_bytes = ");
        assert!(matches!(result, Err(Error::Toml(_))));
    }

    #[test]
    fn test_cli_path_takes_priority() {
        let path = PathBuf::from("/tmp/ttv-cli.toml");
        assert_eq!(resolve_config_path(Some(&path)), Some(path));
    }
}
