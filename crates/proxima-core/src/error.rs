//! Unified error types for the proxima core library.
//!
//! This module provides a unified error type [`ProximaError`] that covers all
//! failure modes of the beacon-presence engine. Individual modules keep their
//! own specific error types ([`RegionError`](crate::types::RegionError),
//! [`ConfigError`](crate::config::ConfigError),
//! [`AdvertisingError`](crate::advertising::AdvertisingError)) and convert into
//! the unified type at the façade boundary.
//!
//! # Design Principles
//!
//! - **Specific variants**: Each error variant captures exactly one failure mode
//! - **Verbatim propagation**: Failures reported by the radio stack keep their payload
//! - **Context preservation**: Wrapped errors maintain their original context
//!
//! # Example
//!
//! ```rust
//! use proxima_core::error::{ProximaError, Result};
//!
//! fn lookup(identifier: &str, known: &[&str]) -> Result<()> {
//!     if !known.contains(&identifier) {
//!         return Err(ProximaError::RegionNotFound(identifier.to_string()));
//!     }
//!     Ok(())
//! }
//! # assert!(lookup("lobby", &["lobby"]).is_ok());
//! ```

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error payload handed over by the external radio/location stack.
///
/// The core never interprets these values; they are forwarded to the
/// observer exactly as received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalError {
    /// Error domain reported by the platform (e.g. `"kCLErrorDomain"`).
    pub domain: String,

    /// Platform-specific error code.
    pub code: i64,

    /// Human-readable description.
    pub message: String,
}

impl ExternalError {
    /// Create a new external error payload.
    pub fn new(domain: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ExternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.domain, self.code, self.message)
    }
}

impl std::error::Error for ExternalError {}

/// The unified error type for all proxima operations.
#[derive(Debug, Error)]
pub enum ProximaError {
    // =========================================================================
    // REGION ERRORS
    // =========================================================================
    /// A region's identity filter or identifier is malformed.
    #[error("Invalid region '{identifier}': {reason}")]
    InvalidRegion {
        /// Identifier the caller supplied (may be empty).
        identifier: String,
        /// What was wrong with it.
        reason: String,
    },

    /// No ranging session, monitor or discovery session is active for the identifier.
    #[error("No active session for region '{0}'")]
    RegionNotFound(String),

    // =========================================================================
    // COLLABORATOR FAILURES
    // =========================================================================
    /// Ranging failed in the radio stack.
    #[error("Ranging failed for region '{region}': {source}")]
    RangingFailure {
        /// Region identifier.
        region: String,
        /// Payload from the radio stack.
        source: ExternalError,
    },

    /// Monitoring failed in the location stack.
    #[error("Monitoring failed for region '{region}': {source}")]
    MonitoringFailure {
        /// Region identifier.
        region: String,
        /// Payload from the location stack.
        source: ExternalError,
    },

    /// Bluetooth discovery failed.
    #[error("Discovery failed for region '{region}': {source}")]
    DiscoveryFailure {
        /// Region identifier.
        region: String,
        /// Payload from the radio stack.
        source: ExternalError,
    },

    /// The beacon-emission collaborator refused to advertise.
    #[error("Advertising failed: {0}")]
    AdvertisingFailure(String),

    // =========================================================================
    // RUNTIME ERRORS
    // =========================================================================
    /// The dispatch loop has shut down and accepts no more commands.
    #[error("Beacon engine dispatch loop has stopped")]
    EngineStopped,

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // I/O ERRORS
    // =========================================================================
    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for proxima operations.
pub type Result<T> = std::result::Result<T, ProximaError>;

impl ProximaError {
    /// Returns `true` if this error concerns region registration or lookup.
    #[inline]
    #[must_use]
    pub const fn is_region_error(&self) -> bool {
        matches!(self, Self::InvalidRegion { .. } | Self::RegionNotFound(_))
    }

    /// Returns `true` if this error was reported by an external collaborator.
    #[inline]
    #[must_use]
    pub const fn is_collaborator_failure(&self) -> bool {
        matches!(
            self,
            Self::RangingFailure { .. }
                | Self::MonitoringFailure { .. }
                | Self::DiscoveryFailure { .. }
                | Self::AdvertisingFailure(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is likely transient.
    ///
    /// Collaborator failures may clear up on their own (radio toggled, app
    /// foregrounded); the core never retries them itself.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RangingFailure { .. }
                | Self::MonitoringFailure { .. }
                | Self::DiscoveryFailure { .. }
        )
    }

    /// Returns a machine-readable error code.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRegion { .. } => "INVALID_REGION",
            Self::RegionNotFound(_) => "REGION_NOT_FOUND",
            Self::RangingFailure { .. } => "RANGING_FAILURE",
            Self::MonitoringFailure { .. } => "MONITORING_FAILURE",
            Self::DiscoveryFailure { .. } => "DISCOVERY_FAILURE",
            Self::AdvertisingFailure(_) => "ADVERTISING_FAILURE",
            Self::EngineStopped => "ENGINE_STOPPED",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::types::RegionError> for ProximaError {
    fn from(err: crate::types::RegionError) -> Self {
        let identifier = err.identifier().to_string();
        Self::InvalidRegion {
            identifier,
            reason: err.to_string(),
        }
    }
}

impl From<crate::config::ConfigError> for ProximaError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::WriteError { path, source } => Self::IoError(std::io::Error::new(
                source.kind(),
                format!("Failed to write {}: {}", path.display(), source),
            )),
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::advertising::AdvertisingError> for ProximaError {
    fn from(err: crate::advertising::AdvertisingError) -> Self {
        Self::AdvertisingFailure(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================
