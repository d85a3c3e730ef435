//! Shared beacon and region types.
//!
//! A beacon is addressed by the proximity-beacon triple (proximity UUID,
//! major, minor). Regions select beacons with a [`BeaconFilter`] that matches
//! on the UUID alone, on UUID + major, or on the full triple.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Major value of a proximity beacon.
pub type Major = u16;

/// Minor value of a proximity beacon.
pub type Minor = u16;

/// Full identity of one physical beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BeaconIdentity {
    /// Proximity UUID shared by a fleet of beacons.
    pub proximity_uuid: Uuid,

    /// Major group value.
    pub major: Major,

    /// Minor value within the major group.
    pub minor: Minor,
}

impl BeaconIdentity {
    /// Create a new beacon identity.
    #[must_use]
    pub const fn new(proximity_uuid: Uuid, major: Major, minor: Minor) -> Self {
        Self {
            proximity_uuid,
            major,
            minor,
        }
    }
}

impl fmt::Display for BeaconIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.proximity_uuid, self.major, self.minor)
    }
}

/// Identity filter of a region.
///
/// Each variant names exactly the fields it constrains, so there is no
/// "present but wildcard" ambiguity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "match", rename_all = "snake_case")]
pub enum BeaconFilter {
    /// Every beacon with this proximity UUID.
    Uuid {
        /// Proximity UUID.
        proximity_uuid: Uuid,
    },

    /// Every beacon with this proximity UUID and major.
    UuidMajor {
        /// Proximity UUID.
        proximity_uuid: Uuid,
        /// Major value.
        major: Major,
    },

    /// Exactly one beacon.
    UuidMajorMinor {
        /// Proximity UUID.
        proximity_uuid: Uuid,
        /// Major value.
        major: Major,
        /// Minor value.
        minor: Minor,
    },
}

impl BeaconFilter {
    /// Build a filter from optional major/minor values.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError::MinorWithoutMajor`] when a minor is given without
    /// a major, which no filter variant can express.
    pub fn from_parts(
        proximity_uuid: Uuid,
        major: Option<Major>,
        minor: Option<Minor>,
    ) -> Result<Self, RegionError> {
        match (major, minor) {
            (None, None) => Ok(Self::Uuid { proximity_uuid }),
            (Some(major), None) => Ok(Self::UuidMajor {
                proximity_uuid,
                major,
            }),
            (Some(major), Some(minor)) => Ok(Self::UuidMajorMinor {
                proximity_uuid,
                major,
                minor,
            }),
            (None, Some(minor)) => Err(RegionError::MinorWithoutMajor {
                identifier: String::new(),
                minor,
            }),
        }
    }

    /// Whether a beacon with `identity` belongs to this filter.
    #[must_use]
    pub fn matches(&self, identity: &BeaconIdentity) -> bool {
        match *self {
            Self::Uuid { proximity_uuid } => identity.proximity_uuid == proximity_uuid,
            Self::UuidMajor {
                proximity_uuid,
                major,
            } => identity.proximity_uuid == proximity_uuid && identity.major == major,
            Self::UuidMajorMinor {
                proximity_uuid,
                major,
                minor,
            } => {
                identity.proximity_uuid == proximity_uuid
                    && identity.major == major
                    && identity.minor == minor
            }
        }
    }

    /// The proximity UUID every matching beacon shares.
    #[must_use]
    pub const fn proximity_uuid(&self) -> Uuid {
        match *self {
            Self::Uuid { proximity_uuid }
            | Self::UuidMajor { proximity_uuid, .. }
            | Self::UuidMajorMinor { proximity_uuid, .. } => proximity_uuid,
        }
    }
}

/// Reasons a region cannot be created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegionError {
    /// The identifier is empty or whitespace.
    #[error("region identifier cannot be empty")]
    EmptyIdentifier,

    /// The proximity UUID did not parse.
    #[error("invalid proximity UUID '{value}' for region '{identifier}'")]
    InvalidUuid {
        /// Region identifier.
        identifier: String,
        /// Text that failed to parse.
        value: String,
    },

    /// A minor was supplied without a major.
    #[error("region '{identifier}' specifies minor {minor} without a major")]
    MinorWithoutMajor {
        /// Region identifier.
        identifier: String,
        /// The orphaned minor value.
        minor: Minor,
    },
}

impl RegionError {
    /// Identifier of the offending region, empty if it was missing.
    #[must_use]
    pub fn identifier(&self) -> &str {
        match self {
            Self::EmptyIdentifier => "",
            Self::InvalidUuid { identifier, .. } | Self::MinorWithoutMajor { identifier, .. } => {
                identifier
            }
        }
    }

    fn with_identifier(self, name: &str) -> Self {
        match self {
            Self::MinorWithoutMajor { minor, .. } => Self::MinorWithoutMajor {
                identifier: name.to_string(),
                minor,
            },
            other => other,
        }
    }
}

/// A named filter over beacon identities.
///
/// The identifier is the lookup key for every ranging session, monitor and
/// discovery session started for the region. Regions are immutable once
/// created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RegionFields")]
pub struct Region {
    identifier: String,
    filter: BeaconFilter,
}

/// Wire shape of a [`Region`], checked before it becomes one.
#[derive(Deserialize)]
struct RegionFields {
    identifier: String,
    filter: BeaconFilter,
}

impl TryFrom<RegionFields> for Region {
    type Error = RegionError;

    fn try_from(fields: RegionFields) -> Result<Self, Self::Error> {
        Self::new(fields.identifier, fields.filter)
    }
}

impl Region {
    /// Create a region from an already-built filter.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError::EmptyIdentifier`] for a blank identifier.
    pub fn new(identifier: impl Into<String>, filter: BeaconFilter) -> Result<Self, RegionError> {
        let identifier = identifier.into();
        if identifier.trim().is_empty() {
            return Err(RegionError::EmptyIdentifier);
        }
        Ok(Self { identifier, filter })
    }

    /// Create a region from textual parts, as delivered by configuration files
    /// or host bindings.
    ///
    /// # Errors
    ///
    /// Fails when the identifier is blank, the UUID does not parse, or a minor
    /// is supplied without a major.
    pub fn parse(
        identifier: &str,
        proximity_uuid: &str,
        major: Option<Major>,
        minor: Option<Minor>,
    ) -> Result<Self, RegionError> {
        if identifier.trim().is_empty() {
            return Err(RegionError::EmptyIdentifier);
        }
        let uuid = Uuid::parse_str(proximity_uuid.trim()).map_err(|_| RegionError::InvalidUuid {
            identifier: identifier.to_string(),
            value: proximity_uuid.to_string(),
        })?;
        let filter = BeaconFilter::from_parts(uuid, major, minor)
            .map_err(|e| e.with_identifier(identifier))?;
        Self::new(identifier, filter)
    }

    /// Unique lookup key.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Identity filter.
    #[must_use]
    pub const fn filter(&self) -> &BeaconFilter {
        &self.filter
    }

    /// Whether a beacon with `identity` belongs to this region.
    #[must_use]
    pub fn matches(&self, identity: &BeaconIdentity) -> bool {
        self.filter.matches(identity)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identifier)
    }
}

/// Coarse distance bucket.
///
/// Declaration order is the snapshot sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Proximity {
    /// Within roughly half a meter.
    Immediate,
    /// Within a few meters.
    Near,
    /// Further away.
    Far,
    /// No usable signal.
    Unknown,
}

/// Whether the host is inside a monitored region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionState {
    /// Not determined yet.
    #[default]
    Unknown,
    /// Inside the region.
    Inside,
    /// Outside the region.
    Outside,
}

/// Direction of a platform boundary-crossing primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// The platform reports entering the region.
    Enter,
    /// The platform reports leaving the region.
    Exit,
}

/// One advertisement exactly as the radio stack reported it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAdvertisement {
    /// Proximity UUID text; may be malformed.
    pub proximity_uuid: String,

    /// Major value.
    pub major: Major,

    /// Minor value.
    pub minor: Minor,

    /// Received signal strength in dBm.
    pub rssi: i16,

    /// Calibrated signal strength at one meter, in dBm.
    pub measured_power: i16,

    /// When the advertisement was received.
    pub timestamp: DateTime<Utc>,
}

/// A validated advertisement sighting.
///
/// Created once per accepted advertisement and consumed immediately by the
/// matching sessions; only the smoothed state derived from it persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sighting {
    /// Beacon that was seen.
    pub identity: BeaconIdentity,

    /// Raw signal strength in dBm.
    pub rssi: i16,

    /// Calibrated signal strength at one meter, in dBm. Never zero.
    pub measured_power: i16,

    /// When the advertisement was received.
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "b9407f30-f5f8-466e-aff9-25556b57fe6d";

    fn uuid() -> Uuid {
        Uuid::parse_str(UUID).unwrap()
    }

    #[test]
    fn test_uuid_only_filter_matches_any_major_minor() {
        let filter = BeaconFilter::Uuid {
            proximity_uuid: uuid(),
        };
        assert!(filter.matches(&BeaconIdentity::new(uuid(), 1, 2)));
        assert!(filter.matches(&BeaconIdentity::new(uuid(), 9, 9)));
        assert!(!filter.matches(&BeaconIdentity::new(Uuid::nil(), 1, 2)));
    }

    #[test]
    fn test_major_filter_ignores_minor() {
        let filter = BeaconFilter::from_parts(uuid(), Some(7), None).unwrap();
        assert!(filter.matches(&BeaconIdentity::new(uuid(), 7, 1)));
        assert!(filter.matches(&BeaconIdentity::new(uuid(), 7, 2)));
        assert!(!filter.matches(&BeaconIdentity::new(uuid(), 8, 1)));
    }

    #[test]
    fn test_full_filter_matches_exactly_one_beacon() {
        let filter = BeaconFilter::from_parts(uuid(), Some(7), Some(3)).unwrap();
        assert!(filter.matches(&BeaconIdentity::new(uuid(), 7, 3)));
        assert!(!filter.matches(&BeaconIdentity::new(uuid(), 7, 4)));
    }

    #[test]
    fn test_region_parse_accepts_valid_parts() {
        let region = Region::parse("lobby", UUID, Some(1), None).unwrap();
        assert_eq!(region.identifier(), "lobby");
        assert_eq!(region.filter().proximity_uuid(), uuid());
    }

    #[test]
    fn test_region_parse_rejects_bad_uuid() {
        let err = Region::parse("lobby", "not-a-uuid", None, None).unwrap_err();
        assert!(matches!(err, RegionError::InvalidUuid { .. }));
        assert_eq!(err.identifier(), "lobby");
    }

    #[test]
    fn test_region_parse_rejects_minor_without_major() {
        let err = Region::parse("lobby", UUID, None, Some(4)).unwrap_err();
        assert_eq!(
            err,
            RegionError::MinorWithoutMajor {
                identifier: "lobby".into(),
                minor: 4
            }
        );
    }

    #[test]
    fn test_region_rejects_blank_identifier() {
        assert_eq!(
            Region::parse("   ", UUID, None, None).unwrap_err(),
            RegionError::EmptyIdentifier
        );
    }

    #[test]
    fn test_proximity_ordering() {
        let mut classes = vec![
            Proximity::Unknown,
            Proximity::Far,
            Proximity::Immediate,
            Proximity::Near,
        ];
        classes.sort();
        assert_eq!(
            classes,
            vec![
                Proximity::Immediate,
                Proximity::Near,
                Proximity::Far,
                Proximity::Unknown
            ]
        );
    }

    #[test]
    fn test_identity_display() {
        let identity = BeaconIdentity::new(uuid(), 1, 2);
        assert_eq!(identity.to_string(), format!("{UUID}:1:2"));
    }

    #[test]
    fn test_deserialized_region_is_validated() {
        let region = Region::parse("lobby", UUID, Some(1), None).unwrap();
        let mut value = serde_json::to_value(&region).unwrap();
        let back: Region = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(back, region);

        value["identifier"] = serde_json::Value::from("   ");
        let err = serde_json::from_value::<Region>(value).unwrap_err();
        assert!(err.to_string().contains(&RegionError::EmptyIdentifier.to_string()));
    }
}
