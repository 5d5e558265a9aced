//! Configuration loading and management.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use mt_core::ThresholdConfig;
use mt_service::ServiceOptions;
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Classifier thresholds.
    pub thresholds: ThresholdConfig,
    /// Queue sizes for live tracking.
    pub service: ServiceSettings,
}

/// Tunables for the tracking service used by `mt run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub command_capacity: usize,
    pub event_capacity: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        let options = ServiceOptions::default();
        Self {
            command_capacity: options.command_capacity,
            event_capacity: options.event_capacity,
        }
    }
}

impl ServiceSettings {
    pub fn options(&self) -> ServiceOptions {
        ServiceOptions {
            command_capacity: self.command_capacity,
            event_capacity: self.event_capacity,
            ..ServiceOptions::default()
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        // Load from specified config file
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Load from environment variables (MT_THRESHOLDS__GPS_TIMEOUT_MS=...)
        figment = figment.merge(Env::prefixed("MT_").split("__"));

        figment.extract()
    }
}

/// Returns the platform-specific config directory for mt.
///
/// On Linux: `~/.config/mt`
pub fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("mt"))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_dirs_config_path_ends_with_mt() {
        let path = dirs_config_path().unwrap();
        assert_eq!(path.file_name().unwrap(), "mt");
    }

    #[test]
    fn test_default_service_settings_match_service_defaults() {
        let options = ServiceSettings::default().options();
        assert_eq!(options, ServiceOptions::default());
    }

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("mt.toml");
        std::fs::write(
            &path,
            r"
[thresholds]
gps_timeout_ms = 30000
driving_speed_threshold_mps = 12.5

[thresholds.polling]
driving_ms = 1000

[service]
command_capacity = 8
",
        )
        .unwrap();

        let config = Config::load_from(Some(&path)).unwrap();
        assert_eq!(config.thresholds.gps_timeout_ms, 30_000);
        assert!((config.thresholds.driving_speed_threshold_mps - 12.5).abs() < f64::EPSILON);
        assert_eq!(config.thresholds.polling.driving_ms, 1_000);
        // Untouched fields keep their defaults.
        assert_eq!(config.thresholds.polling.indoor_ms, 30_000);
        assert_eq!(config.thresholds.tick_interval_ms, 5_000);
        assert_eq!(config.service.command_capacity, 8);
        assert_eq!(config.service.event_capacity, 64);
    }

    #[test]
    fn test_missing_explicit_file_is_ignored() {
        let temp = TempDir::new().unwrap();
        let config = Config::load_from(Some(&temp.path().join("absent.toml"))).unwrap();
        assert_eq!(config.thresholds.gps_timeout_ms, 60_000);
    }

    #[test]
    fn test_wrong_type_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("mt.toml");
        std::fs::write(&path, "[thresholds]\ngps_timeout_ms = \"soon\"\n").unwrap();
        assert!(Config::load_from(Some(&path)).is_err());
    }
}
