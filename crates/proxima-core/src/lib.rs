//! # proxima-core
//!
//! Beacon-presence engine for BLE proximity beacons.
//!
//! This crate turns noisy, asynchronously arriving advertisement sightings
//! into:
//! - a stable set of currently visible beacons per region, with smoothed
//!   distance and proximity estimates (ranging)
//! - debounced enter/exit/state events per region (monitoring)
//!
//! and passes beacon-emulation requests through to the platform.
//!
//! ## Architecture
//!
//! - [`types`] - Beacon identities, region filters and sightings
//! - [`sighting`] - Sighting validation and RSSI smoothing
//! - [`distance`] - RSSI to distance and proximity classification
//! - [`ranging`] - Per-region visible-beacon aggregation
//! - [`monitor`] - Per-region enter/exit state machine
//! - [`advertising`] - Beacon emulation collaborator
//! - [`manager`] - The façade routing events by region identifier
//! - [`events`] - Inbound radio events and outbound observer events
//! - [`runtime`] - Tokio task driving a manager
//! - [`config`] - Engine configuration loading and validation
//! - [`error`] - Unified error types for the crate

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod advertising;
pub mod config;
pub mod distance;
pub mod error;
pub mod events;
pub mod manager;
pub mod monitor;
pub mod ranging;
pub mod runtime;
pub mod sighting;
pub mod types;

// Re-export primary types for convenience
pub use advertising::{AdvertisedBeacon, Advertiser, AdvertisingError, RecordingAdvertiser};
pub use config::{
    default_config_path, AdvertisingConfig, ConfigError, ConfigResult, DistanceConfig,
    EngineConfig, MonitoringConfig, RangingConfig, RegionConfig, SightingsConfig,
};
pub use distance::{DistanceEstimator, UNKNOWN_DISTANCE};
pub use error::{ExternalError, ProximaError, Result};
pub use events::{BeaconEvent, EventReceiver, RadioEvent};
pub use manager::BeaconManager;
pub use monitor::{MonitorEvent, MonitorInput, RegionMonitor};
pub use ranging::{BeaconState, RangingSession};
pub use runtime::{EngineCommand, EngineHandle, DEFAULT_INBOUND_CAPACITY};
pub use sighting::{Rejection, RssiSmoother, SightingNormalizer};
pub use types::{
    BeaconFilter, BeaconIdentity, Direction, Major, Minor, Proximity, RawAdvertisement, Region,
    RegionError, RegionState, Sighting,
};
