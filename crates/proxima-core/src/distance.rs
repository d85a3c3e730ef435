//! RSSI to distance estimation.
//!
//! Uses the log-distance path-loss curve commonly fitted for proximity
//! beacons. With `ratio = rssi / measured_power`:
//!
//! - `ratio < 1.0` (stronger than the one-meter calibration): `ratio^10`
//! - otherwise: `A * ratio^B + C`, with `A`, `B`, `C` from [`DistanceConfig`]
//!
//! An RSSI of exactly zero means "no signal" and yields [`UNKNOWN_DISTANCE`].

use crate::config::DistanceConfig;
use crate::types::Proximity;

/// Sentinel distance reported when no estimate is possible.
pub const UNKNOWN_DISTANCE: f64 = -1.0;

/// Maps filtered RSSI values to distances and proximity classes.
///
/// Stateless apart from its calibration table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceEstimator {
    table: DistanceConfig,
}

impl Default for DistanceEstimator {
    fn default() -> Self {
        Self::new(DistanceConfig::default())
    }
}

impl DistanceEstimator {
    /// Create an estimator with the given calibration table.
    #[must_use]
    pub const fn new(table: DistanceConfig) -> Self {
        Self { table }
    }

    /// Estimate the distance in meters for a filtered RSSI.
    ///
    /// Returns [`UNKNOWN_DISTANCE`] when `rssi` is zero or the inputs cannot
    /// produce a finite distance. `measured_power` must be non-zero; sightings
    /// with a zero calibration are rejected before they get here.
    #[must_use]
    pub fn estimate(&self, rssi: f64, measured_power: f64) -> f64 {
        if rssi == 0.0 || measured_power == 0.0 {
            return UNKNOWN_DISTANCE;
        }

        let ratio = rssi / measured_power;
        let distance = if ratio < 1.0 {
            ratio.powi(10)
        } else {
            self.table
                .coefficient
                .mul_add(ratio.powf(self.table.exponent), self.table.intercept)
        };

        if distance.is_finite() && distance >= 0.0 {
            distance
        } else {
            UNKNOWN_DISTANCE
        }
    }

    /// Bucket a distance into a proximity class.
    #[must_use]
    pub fn classify(&self, distance: f64) -> Proximity {
        if distance.is_nan() || distance < 0.0 {
            Proximity::Unknown
        } else if distance < self.table.immediate_threshold_m {
            Proximity::Immediate
        } else if distance < self.table.near_threshold_m {
            Proximity::Near
        } else {
            Proximity::Far
        }
    }

    /// Estimate and classify in one step.
    #[must_use]
    pub fn evaluate(&self, rssi: f64, measured_power: f64) -> (f64, Proximity) {
        let distance = self.estimate(rssi, measured_power);
        (distance, self.classify(distance))
    }
}
