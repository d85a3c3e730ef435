//! Per-region monitoring state machine.
//!
//! ```text
//!   unknown --enter------------------> inside
//!   unknown --exit-------------------> outside
//!   inside  --exit | liveness timeout-> outside
//!   outside --enter | sighting-------> inside
//! ```
//!
//! Transitions fire only on an actual state change, so repeated primitives
//! never produce duplicate enter or exit events. A state query reports the
//! current state without changing it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::types::{Region, RegionState, Sighting};

/// Inputs a monitor reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorInput {
    /// Platform boundary primitive: entered.
    Enter,
    /// Platform boundary primitive: exited.
    Exit,
    /// A sighting matching the region arrived.
    SightingObserved,
    /// No matching sighting for longer than the exit timeout.
    LivenessTimeout,
    /// Explicit state request.
    StateQuery,
}

/// Outputs of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorEvent {
    /// Transitioned to inside.
    DidEnter,
    /// Transitioned to outside.
    DidExit,
    /// Answer to a state query.
    DidDetermineState(RegionState),
}

/// Enter/exit tracker for one region.
#[derive(Debug, Clone)]
pub struct RegionMonitor {
    region: Region,
    state: RegionState,
    last_activity: Option<DateTime<Utc>>,
    exit_timeout: chrono::Duration,
    stopped: bool,
}

impl RegionMonitor {
    /// Create a monitor in the `unknown` state.
    #[must_use]
    pub fn new(region: Region, config: &EngineConfig) -> Self {
        Self {
            region,
            state: RegionState::Unknown,
            last_activity: None,
            exit_timeout: config.monitoring.exit_timeout(),
            stopped: false,
        }
    }

    /// Region this monitor watches.
    #[must_use]
    pub const fn region(&self) -> &Region {
        &self.region
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> RegionState {
        self.state
    }

    /// Most recent evidence of presence, if any.
    #[must_use]
    pub const fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_activity
    }

    /// Apply one input at time `now`.
    pub fn handle(&mut self, input: MonitorInput, now: DateTime<Utc>) -> Option<MonitorEvent> {
        if self.stopped {
            return None;
        }

        let next = match (self.state, input) {
            (_, MonitorInput::StateQuery) => {
                return Some(MonitorEvent::DidDetermineState(self.state));
            }
            (RegionState::Unknown | RegionState::Outside, MonitorInput::Enter)
            | (RegionState::Outside, MonitorInput::SightingObserved) => RegionState::Inside,
            (RegionState::Unknown, MonitorInput::Exit)
            | (RegionState::Inside, MonitorInput::Exit | MonitorInput::LivenessTimeout) => {
                RegionState::Outside
            }
            (state, _) => state,
        };

        if matches!(input, MonitorInput::Enter | MonitorInput::SightingObserved) {
            self.touch(now);
        }

        if next == self.state {
            return None;
        }

        tracing::info!(
            region = self.region.identifier(),
            from = ?self.state,
            to = ?next,
            cause = ?input,
            "region state changed"
        );
        self.state = next;
        match next {
            RegionState::Inside => Some(MonitorEvent::DidEnter),
            RegionState::Outside => Some(MonitorEvent::DidExit),
            RegionState::Unknown => None,
        }
    }

    /// Feed a sighting; non-matching sightings are ignored.
    pub fn observe(&mut self, sighting: &Sighting) -> Option<MonitorEvent> {
        if !self.region.matches(&sighting.identity) {
            return None;
        }
        self.handle(MonitorInput::SightingObserved, sighting.timestamp)
    }

    /// Exit an inside region whose last evidence is older than the timeout.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<MonitorEvent> {
        if self.state != RegionState::Inside {
            return None;
        }
        let stale = self
            .last_activity
            .map_or(true, |seen| now.signed_duration_since(seen) > self.exit_timeout);
        if stale {
            self.handle(MonitorInput::LivenessTimeout, now)
        } else {
            None
        }
    }

    /// Mark the monitor stopped; later inputs are ignored.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Whether [`stop`](Self::stop) was called.
    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.last_activity = Some(self.last_activity.map_or(at, |seen| seen.max(at)));
    }
}
