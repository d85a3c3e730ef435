//! Per-region ranging sessions.
//!
//! A [`RangingSession`] keeps the set of currently visible beacons for one
//! region, with a smoothed RSSI, distance and proximity class for each, and
//! produces an ordered snapshot on every tick.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::distance::{DistanceEstimator, UNKNOWN_DISTANCE};
use crate::sighting::RssiSmoother;
use crate::types::{BeaconIdentity, Proximity, Region, Sighting};

/// Smoothed view of one visible beacon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeaconState {
    /// Which beacon this is.
    pub identity: BeaconIdentity,

    /// Exponentially smoothed RSSI in dBm; zero until a usable sample arrives.
    pub rssi: f64,

    /// Calibrated power from the most recent sighting.
    pub measured_power: i16,

    /// Estimated distance in meters, or [`UNKNOWN_DISTANCE`].
    pub distance: f64,

    /// Proximity class derived from `distance`.
    pub proximity: Proximity,

    /// Timestamp of the most recent sighting.
    pub last_seen: DateTime<Utc>,
}

impl BeaconState {
    fn smoothed_rssi(&self) -> Option<f64> {
        (self.rssi != 0.0).then_some(self.rssi)
    }
}

/// Snapshot order: proximity class, then distance, then identity.
fn snapshot_order(a: &BeaconState, b: &BeaconState) -> Ordering {
    a.proximity
        .cmp(&b.proximity)
        .then_with(|| a.distance.total_cmp(&b.distance))
        .then_with(|| a.identity.cmp(&b.identity))
}

/// Visible-beacon aggregator for one region.
#[derive(Debug, Clone)]
pub struct RangingSession {
    region: Region,
    beacons: BTreeMap<BeaconIdentity, BeaconState>,
    smoother: RssiSmoother,
    estimator: DistanceEstimator,
    visibility_timeout: chrono::Duration,
    avoid_unknown: bool,
    stopped: bool,
}

impl RangingSession {
    /// Create an empty session for `region`.
    #[must_use]
    pub fn new(region: Region, config: &EngineConfig) -> Self {
        Self {
            region,
            beacons: BTreeMap::new(),
            smoother: RssiSmoother::new(config.ranging.smoothing_factor),
            estimator: DistanceEstimator::new(config.distance),
            visibility_timeout: config.ranging.visibility_timeout(),
            avoid_unknown: config.ranging.avoid_unknown_state_beacons,
            stopped: false,
        }
    }

    /// Region this session ranges.
    #[must_use]
    pub const fn region(&self) -> &Region {
        &self.region
    }

    /// Fold a sighting into the session.
    ///
    /// Returns `false` (and changes nothing) when the sighting does not match
    /// the region or the session has been stopped.
    pub fn ingest(&mut self, sighting: &Sighting) -> bool {
        if self.stopped || !self.region.matches(&sighting.identity) {
            return false;
        }

        let previous = self.beacons.get(&sighting.identity);
        let rssi = self
            .smoother
            .apply(previous.and_then(BeaconState::smoothed_rssi), sighting.rssi);
        let (distance, proximity) = rssi.map_or((UNKNOWN_DISTANCE, Proximity::Unknown), |rssi| {
            self.estimator
                .evaluate(rssi, f64::from(sighting.measured_power))
        });
        let last_seen = previous.map_or(sighting.timestamp, |state| {
            state.last_seen.max(sighting.timestamp)
        });

        self.beacons.insert(
            sighting.identity,
            BeaconState {
                identity: sighting.identity,
                rssi: rssi.unwrap_or(0.0),
                measured_power: sighting.measured_power,
                distance,
                proximity,
                last_seen,
            },
        );
        true
    }

    /// Evict stale beacons and return the snapshot of what remains.
    ///
    /// A beacon whose age equals the visibility timeout is still visible; it
    /// is evicted once its age exceeds it.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<BeaconState> {
        let timeout = self.visibility_timeout;
        let region = self.region.identifier();
        self.beacons.retain(|identity, state| {
            let keep = now.signed_duration_since(state.last_seen) <= timeout;
            if !keep {
                tracing::debug!(region, beacon = %identity, "beacon left visibility");
            }
            keep
        });
        self.snapshot()
    }

    /// Ordered list of visible beacons, without evicting.
    #[must_use]
    pub fn snapshot(&self) -> Vec<BeaconState> {
        let mut beacons: Vec<BeaconState> = self
            .beacons
            .values()
            .filter(|state| !(self.avoid_unknown && state.proximity == Proximity::Unknown))
            .cloned()
            .collect();
        beacons.sort_by(snapshot_order);
        beacons
    }

    /// Look up one tracked beacon.
    #[must_use]
    pub fn beacon(&self, identity: &BeaconIdentity) -> Option<&BeaconState> {
        self.beacons.get(identity)
    }

    /// Number of tracked beacons, including ones hidden from snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.beacons.len()
    }

    /// Whether no beacon is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.beacons.is_empty()
    }

    /// Mark the session stopped; later ingests are ignored.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Whether [`stop`](Self::stop) was called.
    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        self.stopped
    }
}
