//! Sighting normalization and RSSI smoothing.
//!
//! Raw advertisements are validated once, on arrival, by
//! [`SightingNormalizer`]. Smoothing is stateful per beacon and lives with
//! whichever session tracks that beacon; [`RssiSmoother`] is the shared
//! filter definition those sessions apply.

use thiserror::Error;
use uuid::Uuid;

use crate::config::SightingsConfig;
use crate::types::{BeaconIdentity, RawAdvertisement, Sighting};

/// Why an advertisement was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// The proximity UUID did not parse.
    #[error("malformed proximity UUID '{0}'")]
    MalformedUuid(String),

    /// RSSI outside the plausible range.
    #[error("RSSI {rssi} dBm outside [{min}, {max}]")]
    RssiOutOfBounds {
        /// Reported RSSI.
        rssi: i16,
        /// Lower bound.
        min: i16,
        /// Upper bound.
        max: i16,
    },

    /// Calibrated power is zero or positive, which the distance model cannot use.
    #[error("measured power {0} dBm is not a negative calibration value")]
    InvalidMeasuredPower(i16),
}

/// Turns raw advertisements into validated [`Sighting`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SightingNormalizer {
    bounds: SightingsConfig,
}

impl SightingNormalizer {
    /// Create a normalizer with the given RSSI bounds.
    #[must_use]
    pub const fn new(bounds: SightingsConfig) -> Self {
        Self { bounds }
    }

    /// Validate one advertisement.
    ///
    /// # Errors
    ///
    /// Returns the [`Rejection`] reason; callers drop the advertisement.
    pub fn normalize(&self, raw: &RawAdvertisement) -> Result<Sighting, Rejection> {
        let proximity_uuid = Uuid::parse_str(raw.proximity_uuid.trim())
            .map_err(|_| Rejection::MalformedUuid(raw.proximity_uuid.clone()))?;

        let SightingsConfig {
            min_rssi_dbm: min,
            max_rssi_dbm: max,
        } = self.bounds;
        if !(min..=max).contains(&raw.rssi) {
            return Err(Rejection::RssiOutOfBounds {
                rssi: raw.rssi,
                min,
                max,
            });
        }

        if raw.measured_power >= 0 {
            return Err(Rejection::InvalidMeasuredPower(raw.measured_power));
        }

        Ok(Sighting {
            identity: BeaconIdentity::new(proximity_uuid, raw.major, raw.minor),
            rssi: raw.rssi,
            measured_power: raw.measured_power,
            timestamp: raw.timestamp,
        })
    }
}

/// Exponential moving average over RSSI samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RssiSmoother {
    factor: f64,
}

impl RssiSmoother {
    /// `factor` is the weight of the newest sample, clamped into (0, 1].
    #[must_use]
    pub fn new(factor: f64) -> Self {
        let factor = if factor.is_finite() {
            factor.clamp(f64::EPSILON, 1.0)
        } else {
            1.0
        };
        Self { factor }
    }

    /// Fold `sample` into `previous`.
    ///
    /// A zero sample carries no signal and leaves the average untouched; the
    /// first usable sample seeds it.
    #[must_use]
    pub fn apply(&self, previous: Option<f64>, sample: i16) -> Option<f64> {
        if sample == 0 {
            return previous;
        }
        let sample = f64::from(sample);
        Some(previous.map_or(sample, |prev| {
            self.factor.mul_add(sample - prev, prev)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn raw(uuid: &str, rssi: i16) -> RawAdvertisement {
        RawAdvertisement {
            proximity_uuid: uuid.to_string(),
            major: 1,
            minor: 2,
            rssi,
            measured_power: -59,
            timestamp: Utc.with_ymd_and_hms(2025, 1, 15, 3, 30, 0).unwrap(),
        }
    }

    const UUID: &str = "b9407f30-f5f8-466e-aff9-25556b57fe6d";

    #[test]
    fn test_accepts_plausible_advertisement() {
        let sighting = SightingNormalizer::default()
            .normalize(&raw(UUID, -70))
            .unwrap();
        assert_eq!(sighting.identity.major, 1);
        assert_eq!(sighting.identity.minor, 2);
        assert_eq!(sighting.rssi, -70);
    }

    #[test]
    fn test_rejects_malformed_uuid() {
        assert!(matches!(
            SightingNormalizer::default().normalize(&raw("zz-top", -70)),
            Err(Rejection::MalformedUuid(_))
        ));
    }

    #[test]
    fn test_rejects_positive_rssi() {
        assert_eq!(
            SightingNormalizer::default().normalize(&raw(UUID, 10)),
            Err(Rejection::RssiOutOfBounds {
                rssi: 10,
                min: -120,
                max: 0
            })
        );
    }

    #[test]
    fn test_rejects_rssi_below_floor() {
        assert!(SightingNormalizer::default()
            .normalize(&raw(UUID, -121))
            .is_err());
        assert!(SightingNormalizer::default()
            .normalize(&raw(UUID, -120))
            .is_ok());
    }

    #[test]
    fn test_bounds_are_configurable() {
        let normalizer = SightingNormalizer::new(SightingsConfig {
            min_rssi_dbm: -90,
            max_rssi_dbm: -20,
        });
        assert!(normalizer.normalize(&raw(UUID, -95)).is_err());
        assert!(normalizer.normalize(&raw(UUID, -10)).is_err());
        assert!(normalizer.normalize(&raw(UUID, -50)).is_ok());
    }

    #[test]
    fn test_rejects_zero_measured_power() {
        let mut advertisement = raw(UUID, -70);
        advertisement.measured_power = 0;
        assert_eq!(
            SightingNormalizer::default().normalize(&advertisement),
            Err(Rejection::InvalidMeasuredPower(0))
        );
    }

    #[test]
    fn test_smoother_seeds_then_weights_recent_samples() {
        let smoother = RssiSmoother::new(0.6);
        let first = smoother.apply(None, -80).unwrap();
        assert!((first + 80.0).abs() < 1e-9);

        let second = smoother.apply(Some(first), -60).unwrap();
        assert!((second + 68.0).abs() < 1e-9);
    }

    #[test]
    fn test_smoother_ignores_zero_samples() {
        let smoother = RssiSmoother::new(0.6);
        assert_eq!(smoother.apply(None, 0), None);
        assert_eq!(smoother.apply(Some(-70.0), 0), Some(-70.0));
    }

    #[test]
    fn test_smoother_damps_single_outlier() {
        let smoother = RssiSmoother::new(0.6);
        let mut value = None;
        for _ in 0..10 {
            value = smoother.apply(value, -70);
        }
        let spiked = smoother.apply(value, -40).unwrap();
        assert!(spiked < -40.0 && spiked > -70.0);
    }
}
