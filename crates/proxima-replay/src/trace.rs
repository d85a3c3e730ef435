//! Trace file format.
//!
//! A trace is JSON lines. Every line carries an `at` timestamp plus either an
//! inbound radio event (tagged by `kind`) or a façade operation (tagged by
//! `op`):
//!
//! ```text
//! {"at":"2025-01-15T03:30:00Z","op":"start_ranging","region":{"identifier":"lobby","proximity_uuid":"b9407f30-f5f8-466e-aff9-25556b57fe6d"}}
//! {"at":"2025-01-15T03:30:01Z","kind":"advertisement_sighted","proximity_uuid":"b9407f30-f5f8-466e-aff9-25556b57fe6d","major":1,"minor":2,"rssi":-64,"measured_power":-59,"timestamp":"2025-01-15T03:30:01Z"}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use std::io::BufRead;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use proxima_core::{AdvertisingError, Major, Minor, RadioEvent, Region, RegionError};
use serde::Deserialize;

/// Region as written in a trace.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TraceRegion {
    /// Unique identifier.
    pub identifier: String,
    /// Proximity UUID text.
    pub proximity_uuid: String,
    /// Optional major value.
    #[serde(default)]
    pub major: Option<Major>,
    /// Optional minor value.
    #[serde(default)]
    pub minor: Option<Minor>,
}

impl TraceRegion {
    /// Build the region.
    ///
    /// # Errors
    ///
    /// Returns a [`RegionError`] when the region is malformed.
    pub fn to_region(&self) -> Result<Region, RegionError> {
        Region::parse(&self.identifier, &self.proximity_uuid, self.major, self.minor)
    }
}

/// Façade operations a trace can issue.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Start (or replace) ranging.
    StartRanging {
        /// Region to range.
        region: TraceRegion,
    },
    /// Stop ranging.
    StopRanging {
        /// Region identifier.
        identifier: String,
    },
    /// Start (or replace) monitoring.
    StartMonitoring {
        /// Region to monitor.
        region: TraceRegion,
    },
    /// Stop monitoring.
    StopMonitoring {
        /// Region identifier.
        identifier: String,
    },
    /// Ask for a region's state.
    RequestState {
        /// Region identifier.
        identifier: String,
    },
    /// Start (or replace) discovery.
    StartDiscovery {
        /// Region to discover.
        region: TraceRegion,
    },
    /// Stop discovery.
    StopDiscovery,
    /// Emulate a beacon.
    StartAdvertising {
        /// Major value.
        major: Major,
        /// Minor value.
        minor: Minor,
        /// Region identifier for the emulated beacon.
        identifier: String,
    },
    /// Stop emulating.
    StopAdvertising,
    /// Make the simulated radio refuse (or accept again) advertising requests.
    AdvertiserFailure {
        /// Failure to report; `null` to accept again.
        #[serde(default)]
        error: Option<AdvertisingError>,
    },
}

/// What a trace line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// Deliver an inbound radio event.
    Radio(RadioEvent),
    /// Call the façade.
    Op(Operation),
}

/// One parsed trace line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceLine {
    /// Line number in the file, starting at 1.
    pub line: usize,
    /// When the entry happens.
    pub at: DateTime<Utc>,
    /// What happens.
    pub entry: Entry,
}

/// Parse one non-empty line.
///
/// # Errors
///
/// Fails when the line is not JSON, lacks `at`, or matches neither an
/// operation nor a radio event.
pub fn parse_line(line: usize, text: &str) -> anyhow::Result<TraceLine> {
    let value: serde_json::Value =
        serde_json::from_str(text).with_context(|| format!("line {line}: invalid JSON"))?;
    let at = value
        .get("at")
        .cloned()
        .with_context(|| format!("line {line}: missing 'at'"))?;
    let at: DateTime<Utc> = serde_json::from_value(at)
        .with_context(|| format!("line {line}: 'at' is not an RFC 3339 timestamp"))?;

    let entry = if value.get("op").is_some() {
        Entry::Op(
            serde_json::from_value(value)
                .with_context(|| format!("line {line}: invalid operation"))?,
        )
    } else if value.get("kind").is_some() {
        Entry::Radio(
            serde_json::from_value(value)
                .with_context(|| format!("line {line}: invalid radio event"))?,
        )
    } else {
        bail!("line {line}: expected an 'op' or 'kind' field");
    };

    Ok(TraceLine { line, at, entry })
}

/// Read a whole trace, rejecting timestamps that go backwards.
///
/// # Errors
///
/// Fails on the first unreadable or malformed line.
pub fn read_trace<R: BufRead>(reader: R) -> anyhow::Result<Vec<TraceLine>> {
    let mut lines = Vec::new();
    let mut last: Option<DateTime<Utc>> = None;
    for (index, text) in reader.lines().enumerate() {
        let number = index + 1;
        let text = text.with_context(|| format!("line {number}: read failed"))?;
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let parsed = parse_line(number, trimmed)?;
        if let Some(previous) = last {
            if parsed.at < previous {
                bail!("line {number}: 'at' goes backwards ({} < {previous})", parsed.at);
            }
        }
        last = Some(parsed.at);
        lines.push(parsed);
    }
    Ok(lines)
}
