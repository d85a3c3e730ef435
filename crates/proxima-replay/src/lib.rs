//! # proxima-replay
//!
//! Drives a [`proxima_core::BeaconManager`] from a recorded JSON-lines trace
//! and prints every observer event to stdout as one JSON object per line.
//!
//! ## Modules
//!
//! - [`trace`] - Trace line format and parsing
//! - [`replay`] - Trace-clock and wall-clock replay drivers
//! - [`logging`] - Log output setup

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::path::Path;

use anyhow::Context;
use proxima_core::{default_config_path, EngineConfig, ProximaError};

pub mod logging;
pub mod replay;
pub mod trace;

pub use replay::{replay, replay_realtime, ReplaySummary, Replayer};
pub use trace::{read_trace, TraceLine};

/// Load the engine configuration.
///
/// An explicit `path` must exist; otherwise the platform default is used if
/// present. Environment overrides apply either way. Failures carry a
/// [`ProximaError`] so callers can read its error code.
///
/// # Errors
///
/// Fails if the explicit file is missing or any source is invalid.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    let (loaded, source) = match path {
        Some(path) => (EngineConfig::load(path), Some(path.to_path_buf())),
        None => match default_config_path() {
            Some(path) => (EngineConfig::load_or_default(&path), Some(path)),
            None => (EngineConfig::from_env(), None),
        },
    };
    loaded.map_err(ProximaError::from).with_context(|| match source {
        Some(path) => format!("loading config from {}", path.display()),
        None => "loading default config".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_explicit_config_must_exist() {
        let dir = TempDir::new().unwrap();
        let err = load_config(Some(&dir.path().join("missing.toml"))).unwrap_err();
        assert!(err.to_string().contains("missing.toml"));
        let cause = err.downcast_ref::<ProximaError>().unwrap();
        assert!(cause.is_config_error());
        assert_eq!(cause.error_code(), "CONFIG_NOT_FOUND");
    }

    #[test]
    fn test_invalid_config_reports_validation_code() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("proxima.toml");
        std::fs::write(&path, "[distance]\ncoefficient = 0.5\nintercept = 0.0\n").unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        let cause = err.downcast_ref::<ProximaError>().unwrap();
        assert_eq!(cause.error_code(), "CONFIG_VALIDATION_ERROR");
        assert!(cause.to_string().contains("distance.coefficient"));
    }

    #[test]
    fn test_explicit_config_is_loaded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("proxima.toml");
        std::fs::write(&path, "[ranging]\ntick_interval_ms = 250\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.ranging.tick_interval_ms, 250);
    }
}
