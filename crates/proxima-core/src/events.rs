//! Inbound radio events and outbound observer events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::advertising::AdvertisingError;
use crate::error::{ExternalError, ProximaError};
use crate::ranging::BeaconState;
use crate::types::{Direction, RawAdvertisement, Region, RegionState};

/// Everything the radio/location stack pushes into the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RadioEvent {
    /// One advertisement was received.
    AdvertisementSighted(RawAdvertisement),

    /// The platform reported a boundary crossing.
    RegionBoundaryCrossed {
        /// Region identifier.
        region_id: String,
        /// Enter or exit.
        direction: Direction,
        /// When the platform delivered it.
        at: DateTime<Utc>,
    },

    /// Monitoring failed for a region.
    MonitoringFailure {
        /// Region identifier.
        region_id: String,
        /// Platform payload.
        error: ExternalError,
    },

    /// Ranging failed for a region.
    RangingFailure {
        /// Region identifier.
        region_id: String,
        /// Platform payload.
        error: ExternalError,
    },

    /// Bluetooth discovery failed.
    DiscoveryFailure {
        /// Platform payload.
        error: ExternalError,
    },
}

/// Everything the engine reports to its observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BeaconEvent {
    /// Periodic ranging snapshot, ordered nearest first.
    DidRangeBeacons {
        /// Ranged region.
        region: Region,
        /// Visible beacons.
        beacons: Vec<BeaconState>,
    },

    /// The host entered a monitored region.
    DidEnterRegion {
        /// Entered region.
        region: Region,
    },

    /// The host left a monitored region.
    DidExitRegion {
        /// Exited region.
        region: Region,
    },

    /// Answer to a state request.
    DidDetermineState {
        /// Current state.
        state: RegionState,
        /// Queried region.
        region: Region,
    },

    /// Ranging failed in the radio stack.
    RangingFailed {
        /// Affected region.
        region: Region,
        /// Platform payload.
        error: ExternalError,
    },

    /// Monitoring failed in the location stack.
    MonitoringFailed {
        /// Affected region.
        region: Region,
        /// Platform payload.
        error: ExternalError,
    },

    /// Outcome of a start-advertising request.
    DidStartAdvertising {
        /// `None` on success.
        error: Option<AdvertisingError>,
    },

    /// Periodic discovery snapshot, ordered nearest first.
    DidDiscoverBeacons {
        /// Discovery region.
        region: Region,
        /// Discovered beacons.
        beacons: Vec<BeaconState>,
    },

    /// Discovery failed in the radio stack.
    DidFailDiscovery {
        /// Discovery region.
        region: Region,
        /// Platform payload.
        error: ExternalError,
    },
}

impl BeaconEvent {
    /// Region the event concerns, if any.
    #[must_use]
    pub fn region(&self) -> Option<&Region> {
        match self {
            Self::DidRangeBeacons { region, .. }
            | Self::DidEnterRegion { region }
            | Self::DidExitRegion { region }
            | Self::DidDetermineState { region, .. }
            | Self::RangingFailed { region, .. }
            | Self::MonitoringFailed { region, .. }
            | Self::DidDiscoverBeacons { region, .. }
            | Self::DidFailDiscovery { region, .. } => Some(region),
            Self::DidStartAdvertising { .. } => None,
        }
    }

    /// Short event name, as used in the serialized `event` tag.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::DidRangeBeacons { .. } => "did_range_beacons",
            Self::DidEnterRegion { .. } => "did_enter_region",
            Self::DidExitRegion { .. } => "did_exit_region",
            Self::DidDetermineState { .. } => "did_determine_state",
            Self::RangingFailed { .. } => "ranging_failed",
            Self::MonitoringFailed { .. } => "monitoring_failed",
            Self::DidStartAdvertising { .. } => "did_start_advertising",
            Self::DidDiscoverBeacons { .. } => "did_discover_beacons",
            Self::DidFailDiscovery { .. } => "did_fail_discovery",
        }
    }

    /// The failure this event reports, as a [`ProximaError`].
    ///
    /// `None` for every event that is not a collaborator failure, including a
    /// successful [`BeaconEvent::DidStartAdvertising`].
    #[must_use]
    pub fn failure(&self) -> Option<ProximaError> {
        match self {
            Self::RangingFailed { region, error } => Some(ProximaError::RangingFailure {
                region: region.identifier().to_string(),
                source: error.clone(),
            }),
            Self::MonitoringFailed { region, error } => Some(ProximaError::MonitoringFailure {
                region: region.identifier().to_string(),
                source: error.clone(),
            }),
            Self::DidFailDiscovery { region, error } => Some(ProximaError::DiscoveryFailure {
                region: region.identifier().to_string(),
                source: error.clone(),
            }),
            Self::DidStartAdvertising { error } => error.clone().map(ProximaError::from),
            _ => None,
        }
    }

    /// Serialize as a single JSON line.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be represented in JSON.
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Receiving end of the observer channel.
pub type EventReceiver = mpsc::UnboundedReceiver<BeaconEvent>;

/// Sending end of the observer channel.
pub type EventSender = mpsc::UnboundedSender<BeaconEvent>;
