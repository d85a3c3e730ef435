//! Beacon emulation.
//!
//! Encoding and emitting the advertisement payload belongs to the platform;
//! the engine only hands an [`Advertiser`] the identity to broadcast and
//! reports the outcome to the observer.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{BeaconFilter, BeaconIdentity, Region, RegionError};

/// Failures reported by the emission collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum AdvertisingError {
    /// The radio cannot act as a peripheral.
    #[error("beacon advertising is not supported on this device")]
    Unsupported,

    /// The radio is switched off.
    #[error("Bluetooth is powered off")]
    PoweredOff,

    /// The platform refused for another reason.
    #[error("advertising rejected: {0}")]
    Rejected(String),
}

/// What to broadcast while emulating a beacon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisedBeacon {
    /// Region identifier the emulated beacon is registered under.
    pub identifier: String,

    /// Identity to advertise.
    pub identity: BeaconIdentity,

    /// Calibrated power at one meter to advertise, in dBm.
    pub measured_power: i16,
}

impl AdvertisedBeacon {
    /// The single-beacon region this advertisement represents.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError::EmptyIdentifier`] for a blank identifier.
    pub fn region(&self) -> Result<Region, RegionError> {
        Region::new(
            self.identifier.clone(),
            BeaconFilter::UuidMajorMinor {
                proximity_uuid: self.identity.proximity_uuid,
                major: self.identity.major,
                minor: self.identity.minor,
            },
        )
    }
}

/// Radio-emission collaborator.
pub trait Advertiser: Send + Sync {
    /// Begin broadcasting `beacon`, replacing any current broadcast.
    ///
    /// # Errors
    ///
    /// Returns the platform's reason for refusing.
    fn start(&self, beacon: &AdvertisedBeacon) -> Result<(), AdvertisingError>;

    /// Stop broadcasting. A no-op when idle.
    fn stop(&self);
}

/// In-memory advertiser that records what it was asked to broadcast.
///
/// Used when no radio is attached, e.g. when replaying recorded traces.
#[derive(Debug, Default)]
pub struct RecordingAdvertiser {
    current: Mutex<Option<AdvertisedBeacon>>,
    failure: Mutex<Option<AdvertisingError>>,
}

impl RecordingAdvertiser {
    /// Create an idle advertiser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `start` fail with `error`, or succeed again with `None`.
    pub fn fail_with(&self, error: Option<AdvertisingError>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = error;
    }

    /// What is being broadcast right now.
    #[must_use]
    pub fn current(&self) -> Option<AdvertisedBeacon> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Advertiser for RecordingAdvertiser {
    fn start(&self, beacon: &AdvertisedBeacon) -> Result<(), AdvertisingError> {
        if let Some(error) = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(error);
        }
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(beacon.clone());
        Ok(())
    }

    fn stop(&self) {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn beacon() -> AdvertisedBeacon {
        AdvertisedBeacon {
            identifier: "desk".into(),
            identity: BeaconIdentity::new(Uuid::nil(), 3, 4),
            measured_power: -59,
        }
    }

    #[test]
    fn test_region_matches_only_advertised_beacon() {
        let region = beacon().region().unwrap();
        assert_eq!(region.identifier(), "desk");
        assert!(region.matches(&BeaconIdentity::new(Uuid::nil(), 3, 4)));
        assert!(!region.matches(&BeaconIdentity::new(Uuid::nil(), 3, 5)));
    }

    #[test]
    fn test_recording_advertiser_tracks_broadcast() {
        let advertiser = RecordingAdvertiser::new();
        advertiser.start(&beacon()).unwrap();
        assert_eq!(advertiser.current(), Some(beacon()));
        advertiser.stop();
        assert_eq!(advertiser.current(), None);
    }

    #[test]
    fn test_recording_advertiser_failure() {
        let advertiser = RecordingAdvertiser::new();
        advertiser.fail_with(Some(AdvertisingError::PoweredOff));
        assert_eq!(
            advertiser.start(&beacon()),
            Err(AdvertisingError::PoweredOff)
        );
        assert_eq!(advertiser.current(), None);

        advertiser.fail_with(None);
        assert!(advertiser.start(&beacon()).is_ok());
    }
}
