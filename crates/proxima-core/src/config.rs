//! Engine configuration management.
//!
//! Handles loading, saving, and validating the engine configuration:
//! - Plausibility bounds for sighting RSSI values
//! - Ranging cadence, visibility timeout and RSSI smoothing
//! - Region-exit liveness timeout
//! - Distance calibration table and proximity thresholds
//! - Identity of the emulated beacon
//! - Regions to start when a host boots
//!
//! Files are TOML. Any key can be overridden from the environment with
//! `PROXIMA__<SECTION>__<KEY>`, e.g. `PROXIMA__RANGING__TICK_INTERVAL_MS=500`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{Major, Minor, Region, RegionError};

/// Proximity UUID advertised when no other is configured.
pub const DEFAULT_PROXIMITY_UUID: Uuid = Uuid::from_u128(0xb940_7f30_f5f8_466e_aff9_2555_6b57_fe6d);

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "PROXIMA";

// Largest span chrono can represent, in milliseconds.
const MAX_MILLIS: i64 = i64::MAX / 1000;

/// Errors raised while loading, saving, or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file does not exist.
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The file could not be written.
    #[error("failed to write {}: {source}", path.display())]
    WriteError {
        /// Path of the file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Layering or deserialization failed.
    #[error("failed to parse configuration: {0}")]
    ParseError(#[from] ::config::ConfigError),

    /// Serialization to TOML failed.
    #[error("failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single field holds an invalid value.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted field path.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields hold invalid values.
    #[error("{} validation errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Sighting acceptance bounds.
    pub sightings: SightingsConfig,

    /// Ranging cadence and smoothing.
    pub ranging: RangingConfig,

    /// Region monitoring timeouts.
    pub monitoring: MonitoringConfig,

    /// Distance calibration.
    pub distance: DistanceConfig,

    /// Emulated beacon identity.
    pub advertising: AdvertisingConfig,

    /// Regions started at boot.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<RegionConfig>,
}

/// Bounds outside of which a sighting's RSSI is considered implausible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SightingsConfig {
    /// Weakest accepted RSSI in dBm.
    pub min_rssi_dbm: i16,

    /// Strongest accepted RSSI in dBm.
    pub max_rssi_dbm: i16,
}

impl Default for SightingsConfig {
    fn default() -> Self {
        Self {
            min_rssi_dbm: -120,
            max_rssi_dbm: 0,
        }
    }
}

/// Ranging session settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangingConfig {
    /// Tick cadence in milliseconds.
    pub tick_interval_ms: u64,

    /// Number of tick intervals a beacon may go unseen before eviction.
    pub visibility_timeout_ticks: u32,

    /// Weight of the newest RSSI sample in the moving average, in (0, 1].
    pub smoothing_factor: f64,

    /// Leave beacons with unknown proximity out of snapshots.
    pub avoid_unknown_state_beacons: bool,
}

impl Default for RangingConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            visibility_timeout_ticks: 5,
            smoothing_factor: 0.6,
            avoid_unknown_state_beacons: false,
        }
    }
}

impl RangingConfig {
    /// Tick cadence.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Maximum age a beacon may reach and still be visible.
    #[must_use]
    pub fn visibility_timeout(&self) -> chrono::Duration {
        let millis = self
            .tick_interval_ms
            .saturating_mul(u64::from(self.visibility_timeout_ticks));
        chrono::Duration::milliseconds(i64::try_from(millis).unwrap_or(i64::MAX).min(MAX_MILLIS))
    }
}

/// Region monitor settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Seconds without a matching sighting before an inside region is exited.
    pub exit_timeout_secs: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            exit_timeout_secs: 30,
        }
    }
}

impl MonitoringConfig {
    /// Liveness timeout.
    #[must_use]
    pub fn exit_timeout(&self) -> chrono::Duration {
        let secs = i64::try_from(self.exit_timeout_secs).unwrap_or(i64::MAX);
        chrono::Duration::seconds(secs.min(MAX_MILLIS / 1000))
    }
}

/// Calibration table for the path-loss model.
///
/// Beyond one meter the distance is `coefficient * ratio^exponent + intercept`
/// where `ratio = rssi / measured_power`. The defaults are the commonly
/// published values for phone-class receivers; tune per device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistanceConfig {
    /// Multiplier (A).
    pub coefficient: f64,

    /// Exponent (B).
    pub exponent: f64,

    /// Offset (C).
    pub intercept: f64,

    /// Distances below this are `immediate`.
    pub immediate_threshold_m: f64,

    /// Distances below this (and not immediate) are `near`.
    pub near_threshold_m: f64,
}

impl Default for DistanceConfig {
    fn default() -> Self {
        Self {
            coefficient: 0.899_76,
            exponent: 7.709_5,
            intercept: 0.111,
            immediate_threshold_m: 0.5,
            near_threshold_m: 3.0,
        }
    }
}

/// Identity advertised while emulating a beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvertisingConfig {
    /// Proximity UUID to advertise.
    pub proximity_uuid: Uuid,

    /// Measured power at one meter to advertise, in dBm.
    pub measured_power_dbm: i16,
}

impl Default for AdvertisingConfig {
    fn default() -> Self {
        Self {
            proximity_uuid: DEFAULT_PROXIMITY_UUID,
            measured_power_dbm: -59,
        }
    }
}

/// A region declared in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Unique identifier.
    pub identifier: String,

    /// Proximity UUID text.
    pub proximity_uuid: String,

    /// Optional major value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major: Option<Major>,

    /// Optional minor value; requires a major.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minor: Option<Minor>,

    /// Start ranging for this region.
    #[serde(default = "default_true")]
    pub ranging: bool,

    /// Start monitoring for this region.
    #[serde(default = "default_true")]
    pub monitoring: bool,
}

const fn default_true() -> bool {
    true
}

impl RegionConfig {
    /// Build the region this entry describes.
    ///
    /// # Errors
    ///
    /// Returns a [`RegionError`] when the entry is malformed.
    pub fn to_region(&self) -> Result<Region, RegionError> {
        Region::parse(&self.identifier, &self.proximity_uuid, self.major, self.minor)
    }
}

impl EngineConfig {
    /// Load configuration from `path`, layered with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if the file is missing, or a parse or
    /// validation error.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::from_sources(Some(path))
    }

    /// Load configuration from `path` if it exists, otherwise start from the
    /// defaults. Environment overrides apply either way.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation error.
    pub fn load_or_default(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            Self::from_sources(Some(path))
        } else {
            tracing::debug!(path = %path.display(), "config file absent, using defaults");
            Self::from_sources(None)
        }
    }

    /// Defaults layered with environment overrides only.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation error.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_sources(None)
    }

    /// Parse configuration from TOML text without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation error.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from_str(text, ::config::FileFormat::Toml))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn from_sources(path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Toml),
            );
        }
        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `path` as TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check every field, collecting all violations.
    ///
    /// # Errors
    ///
    /// Returns a single [`ConfigError::ValidationError`] or
    /// [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut fail = |field: &str, message: String| {
            errors.push(ConfigError::ValidationError {
                field: field.to_string(),
                message,
            });
        };

        let s = &self.sightings;
        if s.min_rssi_dbm >= s.max_rssi_dbm {
            fail(
                "sightings.min_rssi_dbm",
                format!(
                    "must be below max_rssi_dbm ({} >= {})",
                    s.min_rssi_dbm, s.max_rssi_dbm
                ),
            );
        }

        let r = &self.ranging;
        if r.tick_interval_ms == 0 {
            fail("ranging.tick_interval_ms", "must be positive".into());
        }
        if r.visibility_timeout_ticks == 0 {
            fail("ranging.visibility_timeout_ticks", "must be at least 1".into());
        }
        if !(r.smoothing_factor > 0.0 && r.smoothing_factor <= 1.0) {
            fail(
                "ranging.smoothing_factor",
                format!("must be in (0, 1], got {}", r.smoothing_factor),
            );
        }

        if self.monitoring.exit_timeout_secs == 0 {
            fail("monitoring.exit_timeout_secs", "must be positive".into());
        }

        let d = &self.distance;
        for (field, value) in [
            ("distance.coefficient", d.coefficient),
            ("distance.exponent", d.exponent),
        ] {
            if !(value.is_finite() && value > 0.0) {
                fail(field, format!("must be a positive number, got {value}"));
            }
        }
        if !(d.intercept.is_finite() && d.intercept >= 0.0) {
            fail(
                "distance.intercept",
                format!("must be a non-negative number, got {}", d.intercept),
            );
        }
        // Below the calibration point the curve is ratio^10, which reaches 1.0.
        if d.coefficient.is_finite()
            && d.intercept.is_finite()
            && d.coefficient + d.intercept < 1.0
        {
            fail(
                "distance.coefficient",
                format!(
                    "coefficient + intercept must be at least 1.0, got {}",
                    d.coefficient + d.intercept
                ),
            );
        }
        if !(d.immediate_threshold_m > 0.0 && d.immediate_threshold_m < d.near_threshold_m) {
            fail(
                "distance.immediate_threshold_m",
                format!(
                    "must be positive and below near_threshold_m ({} vs {})",
                    d.immediate_threshold_m, d.near_threshold_m
                ),
            );
        }
        if !d.near_threshold_m.is_finite() {
            fail("distance.near_threshold_m", "must be finite".into());
        }

        let power = self.advertising.measured_power_dbm;
        if !(-127..0).contains(&power) {
            fail(
                "advertising.measured_power_dbm",
                format!("must be in [-127, -1], got {power}"),
            );
        }

        let mut seen = HashSet::new();
        for (index, region) in self.regions.iter().enumerate() {
            let field = format!("regions[{index}]");
            if let Err(e) = region.to_region() {
                fail(&field, e.to_string());
            } else if !seen.insert(region.identifier.as_str()) {
                fail(
                    &field,
                    format!("duplicate region identifier '{}'", region.identifier),
                );
            } else if !(region.ranging || region.monitoring) {
                fail(&field, "enables neither ranging nor monitoring".into());
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }
}

/// Default per-user configuration path, e.g. `~/.config/proxima/config.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "proxima")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.ranging.tick_interval(), Duration::from_secs(1));
        assert_eq!(
            config.ranging.visibility_timeout(),
            chrono::Duration::seconds(5)
        );
        assert_eq!(
            config.monitoring.exit_timeout(),
            chrono::Duration::seconds(30)
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [ranging]
            tick_interval_ms = 500
            avoid_unknown_state_beacons = true

            [[regions]]
            identifier = "lobby"
            proximity_uuid = "b9407f30-f5f8-466e-aff9-25556b57fe6d"
            major = 10
            monitoring = false
            "#,
        )
        .unwrap();

        assert_eq!(config.ranging.tick_interval_ms, 500);
        assert_eq!(config.ranging.visibility_timeout_ticks, 5);
        assert!(config.ranging.avoid_unknown_state_beacons);
        assert_eq!(config.sightings, SightingsConfig::default());
        assert_eq!(config.regions.len(), 1);
        assert!(config.regions[0].ranging);
        assert!(!config.regions[0].monitoring);
        assert_eq!(
            config.regions[0].to_region().unwrap().identifier(),
            "lobby"
        );
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = EngineConfig::default();
        config.sightings.min_rssi_dbm = 0;
        config.ranging.smoothing_factor = 1.5;
        config.distance.immediate_threshold_m = 4.0;

        match config.validate().unwrap_err() {
            ConfigError::MultipleValidationErrors(errors) => assert_eq!(errors.len(), 3),
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }

    #[test]
    fn test_validation_rejects_table_that_dips_at_calibration_point() {
        let mut config = EngineConfig::default();
        config.distance.coefficient = 0.5;
        config.distance.exponent = 1.0;
        config.distance.intercept = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { ref field, .. }) if field == "distance.coefficient"
        ));

        config.distance.intercept = 0.5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_single_error() {
        let mut config = EngineConfig::default();
        config.advertising.measured_power_dbm = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { ref field, .. }) if field == "advertising.measured_power_dbm"
        ));
    }

    #[test]
    fn test_validation_rejects_duplicate_regions() {
        let region = RegionConfig {
            identifier: "lobby".into(),
            proximity_uuid: DEFAULT_PROXIMITY_UUID.to_string(),
            major: None,
            minor: None,
            ranging: true,
            monitoring: true,
        };
        let config = EngineConfig {
            regions: vec![region.clone(), region],
            ..EngineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_validation_rejects_malformed_region() {
        let config = EngineConfig {
            regions: vec![RegionConfig {
                identifier: "lobby".into(),
                proximity_uuid: "nope".into(),
                major: None,
                minor: None,
                ranging: true,
                monitoring: false,
            }],
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = EngineConfig::default();
        config.monitoring.exit_timeout_secs = 45;
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.monitoring.exit_timeout_secs, 45);
        assert_eq!(loaded.advertising, config.advertising);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(
            EngineConfig::load(&path),
            Err(ConfigError::NotFound(_))
        ));
        assert!(EngineConfig::load_or_default(&path).is_ok());
    }
}
