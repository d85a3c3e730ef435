//! The beacon manager façade.
//!
//! [`BeaconManager`] owns every ranging session and region monitor, keyed by
//! region identifier, routes inbound radio events to them, and delivers the
//! resulting [`BeaconEvent`]s to a single registered observer.
//!
//! # Concurrency
//!
//! The routing tables are behind `RwLock`s: sightings and ticks take read
//! locks and may run concurrently, start/stop take write locks. Each session
//! and monitor sits behind its own `Mutex`, so all mutation of one region's
//! state is serialized. Replacing or stopping a session marks the old one
//! stopped under its lock, so a tick that already cloned it skips it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::advertising::{AdvertisedBeacon, Advertiser, AdvertisingError};
use crate::config::EngineConfig;
use crate::error::{ExternalError, ProximaError, Result};
use crate::events::{BeaconEvent, EventReceiver, EventSender, RadioEvent};
use crate::monitor::{MonitorEvent, MonitorInput, RegionMonitor};
use crate::ranging::RangingSession;
use crate::sighting::SightingNormalizer;
use crate::types::{
    BeaconIdentity, Direction, Major, Minor, RawAdvertisement, Region, RegionState,
};

type Table<T> = RwLock<BTreeMap<String, Arc<Mutex<T>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Façade over ranging, monitoring, discovery and advertising.
pub struct BeaconManager {
    config: EngineConfig,
    normalizer: SightingNormalizer,
    ranging: Table<RangingSession>,
    monitors: Table<RegionMonitor>,
    discovery: Mutex<Option<RangingSession>>,
    observer: Mutex<Option<EventSender>>,
    advertiser: Arc<dyn Advertiser>,
    virtual_region: Mutex<Option<Region>>,
}

impl std::fmt::Debug for BeaconManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeaconManager")
            .field("ranged", &self.ranged_regions().len())
            .field("monitored", &self.monitored_regions().len())
            .finish_non_exhaustive()
    }
}

impl BeaconManager {
    /// Create a manager with no sessions and no observer.
    pub fn new(config: EngineConfig, advertiser: Arc<dyn Advertiser>) -> Self {
        Self {
            normalizer: SightingNormalizer::new(config.sightings),
            config,
            ranging: RwLock::default(),
            monitors: RwLock::default(),
            discovery: Mutex::new(None),
            observer: Mutex::new(None),
            advertiser,
            virtual_region: Mutex::new(None),
        }
    }

    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    // =========================================================================
    // OBSERVER
    // =========================================================================

    /// Register the observer, replacing any previous one.
    ///
    /// The previous observer's channel is closed.
    pub fn subscribe(&self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        if lock(&self.observer).replace(tx).is_some() {
            debug!("replaced existing observer");
        }
        rx
    }

    /// Drop the observer; later events are discarded.
    pub fn unsubscribe(&self) {
        lock(&self.observer).take();
    }

    fn emit(&self, event: BeaconEvent) {
        let mut observer = lock(&self.observer);
        let Some(tx) = observer.as_ref() else {
            trace!(event = event.name(), "no observer registered, dropping event");
            return;
        };
        if tx.send(event).is_err() {
            debug!("observer hung up, unregistering");
            observer.take();
        }
    }

    fn emit_all(&self, events: Vec<BeaconEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    // =========================================================================
    // RANGING
    // =========================================================================

    /// Start ranging `region`, replacing any session with the same identifier.
    pub fn start_ranging(&self, region: Region) {
        let identifier = region.identifier().to_string();
        let session = Arc::new(Mutex::new(RangingSession::new(region, &self.config)));
        let previous = self
            .ranging
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identifier.clone(), session);
        match previous {
            Some(old) => {
                lock(&old).stop();
                info!(region = %identifier, "replaced ranging session");
            }
            None => info!(region = %identifier, "started ranging"),
        }
    }

    /// Stop ranging the region with `identifier`.
    ///
    /// # Errors
    ///
    /// Returns [`ProximaError::RegionNotFound`] if it is not being ranged.
    pub fn stop_ranging(&self, identifier: &str) -> Result<()> {
        let removed = self
            .ranging
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identifier)
            .ok_or_else(|| ProximaError::RegionNotFound(identifier.to_string()))?;
        lock(&removed).stop();
        info!(region = identifier, "stopped ranging");
        Ok(())
    }

    /// Regions currently being ranged, ordered by identifier.
    #[must_use]
    pub fn ranged_regions(&self) -> Vec<Region> {
        Self::regions_of(&self.ranging, |s: &RangingSession| s.region().clone())
    }

    // =========================================================================
    // MONITORING
    // =========================================================================

    /// Start monitoring `region`, replacing any monitor with the same identifier.
    ///
    /// The new monitor starts in the `unknown` state.
    pub fn start_monitoring(&self, region: Region) {
        let identifier = region.identifier().to_string();
        let monitor = Arc::new(Mutex::new(RegionMonitor::new(region, &self.config)));
        let previous = self
            .monitors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identifier.clone(), monitor);
        match previous {
            Some(old) => {
                lock(&old).stop();
                info!(region = %identifier, "replaced region monitor");
            }
            None => info!(region = %identifier, "started monitoring"),
        }
    }

    /// Stop monitoring the region with `identifier`.
    ///
    /// # Errors
    ///
    /// Returns [`ProximaError::RegionNotFound`] if it is not being monitored.
    pub fn stop_monitoring(&self, identifier: &str) -> Result<()> {
        let removed = self
            .monitors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identifier)
            .ok_or_else(|| ProximaError::RegionNotFound(identifier.to_string()))?;
        lock(&removed).stop();
        info!(region = identifier, "stopped monitoring");
        Ok(())
    }

    /// Ask the monitor for `identifier` to report its state.
    ///
    /// The answer arrives as [`BeaconEvent::DidDetermineState`].
    ///
    /// # Errors
    ///
    /// Returns [`ProximaError::RegionNotFound`] if it is not being monitored.
    pub fn request_state(&self, identifier: &str) -> Result<()> {
        let monitor = self
            .monitor(identifier)
            .ok_or_else(|| ProximaError::RegionNotFound(identifier.to_string()))?;
        let mut monitor = lock(&monitor);
        if let Some(event) = monitor.handle(MonitorInput::StateQuery, Utc::now()) {
            let event = Self::monitor_event(monitor.region(), event);
            drop(monitor);
            self.emit(event);
        }
        Ok(())
    }

    /// Current state of the monitor for `identifier`.
    #[must_use]
    pub fn monitor_state(&self, identifier: &str) -> Option<RegionState> {
        self.monitor(identifier).map(|m| lock(&m).state())
    }

    /// Regions currently being monitored, ordered by identifier.
    #[must_use]
    pub fn monitored_regions(&self) -> Vec<Region> {
        Self::regions_of(&self.monitors, |m: &RegionMonitor| m.region().clone())
    }

    fn monitor(&self, identifier: &str) -> Option<Arc<Mutex<RegionMonitor>>> {
        self.monitors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identifier)
            .cloned()
    }

    fn monitor_event(region: &Region, event: MonitorEvent) -> BeaconEvent {
        let region = region.clone();
        match event {
            MonitorEvent::DidEnter => BeaconEvent::DidEnterRegion { region },
            MonitorEvent::DidExit => BeaconEvent::DidExitRegion { region },
            MonitorEvent::DidDetermineState(state) => {
                BeaconEvent::DidDetermineState { state, region }
            }
        }
    }

    // =========================================================================
    // DISCOVERY
    // =========================================================================

    /// Start Bluetooth discovery for `region`, replacing any running discovery.
    pub fn start_discovery(&self, region: Region) {
        let identifier = region.identifier().to_string();
        let previous = lock(&self.discovery).replace(RangingSession::new(region, &self.config));
        if previous.is_some() {
            info!(region = %identifier, "replaced discovery session");
        } else {
            info!(region = %identifier, "started discovery");
        }
    }

    /// Stop discovery. A no-op when none is running.
    pub fn stop_discovery(&self) {
        if let Some(session) = lock(&self.discovery).take() {
            info!(region = session.region().identifier(), "stopped discovery");
        }
    }

    /// Region of the running discovery session, if any.
    #[must_use]
    pub fn discovery_region(&self) -> Option<Region> {
        lock(&self.discovery)
            .as_ref()
            .map(|session| session.region().clone())
    }

    // =========================================================================
    // ADVERTISING
    // =========================================================================

    /// Emulate a beacon with the configured proximity UUID and the given
    /// major and minor values.
    ///
    /// The outcome arrives as [`BeaconEvent::DidStartAdvertising`].
    pub fn start_advertising(&self, major: Major, minor: Minor, identifier: &str) {
        let beacon = AdvertisedBeacon {
            identifier: identifier.to_string(),
            identity: BeaconIdentity::new(self.config.advertising.proximity_uuid, major, minor),
            measured_power: self.config.advertising.measured_power_dbm,
        };

        let outcome = beacon
            .region()
            .map_err(|e| AdvertisingError::Rejected(e.to_string()))
            .and_then(|region| self.advertiser.start(&beacon).map(|()| region));

        let error = match outcome {
            Ok(region) => {
                info!(region = identifier, beacon = %beacon.identity, "advertising started");
                lock(&self.virtual_region).replace(region);
                None
            }
            Err(error) => {
                warn!(region = identifier, %error, "advertising failed");
                lock(&self.virtual_region).take();
                Some(error)
            }
        };
        self.emit(BeaconEvent::DidStartAdvertising { error });
    }

    /// Stop emulating a beacon.
    pub fn stop_advertising(&self) {
        self.advertiser.stop();
        if let Some(region) = lock(&self.virtual_region).take() {
            info!(region = region.identifier(), "advertising stopped");
        }
    }

    /// Region describing the beacon currently being emulated.
    #[must_use]
    pub fn virtual_beacon_region(&self) -> Option<Region> {
        lock(&self.virtual_region).clone()
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Dispatch one inbound radio event.
    pub fn handle(&self, event: RadioEvent) {
        match event {
            RadioEvent::AdvertisementSighted(raw) => self.on_advertisement_sighted(&raw),
            RadioEvent::RegionBoundaryCrossed {
                region_id,
                direction,
                at,
            } => self.on_region_boundary_crossed(&region_id, direction, at),
            RadioEvent::MonitoringFailure { region_id, error } => {
                self.on_monitoring_failure(&region_id, error);
            }
            RadioEvent::RangingFailure { region_id, error } => {
                self.on_ranging_failure(&region_id, error);
            }
            RadioEvent::DiscoveryFailure { error } => self.on_discovery_failure(error),
        }
    }

    /// Route a raw advertisement to every matching session and monitor.
    ///
    /// Implausible advertisements are dropped without an event.
    pub fn on_advertisement_sighted(&self, raw: &RawAdvertisement) {
        let sighting = match self.normalizer.normalize(raw) {
            Ok(sighting) => sighting,
            Err(reason) => {
                debug!(%reason, "dropped advertisement");
                return;
            }
        };

        for session in self
            .ranging
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
        {
            lock(session).ingest(&sighting);
        }

        if let Some(session) = lock(&self.discovery).as_mut() {
            session.ingest(&sighting);
        }

        let events: Vec<BeaconEvent> = self
            .monitors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter_map(|monitor| {
                let mut monitor = lock(monitor);
                let event = monitor.observe(&sighting)?;
                Some(Self::monitor_event(monitor.region(), event))
            })
            .collect();
        self.emit_all(events);
    }

    /// Apply a platform boundary-crossing primitive.
    pub fn on_region_boundary_crossed(
        &self,
        identifier: &str,
        direction: Direction,
        at: DateTime<Utc>,
    ) {
        let Some(monitor) = self.monitor(identifier) else {
            warn!(region = identifier, ?direction, "boundary crossing for unmonitored region");
            return;
        };
        let input = match direction {
            Direction::Enter => MonitorInput::Enter,
            Direction::Exit => MonitorInput::Exit,
        };
        let mut monitor = lock(&monitor);
        if let Some(event) = monitor.handle(input, at) {
            let event = Self::monitor_event(monitor.region(), event);
            drop(monitor);
            self.emit(event);
        }
    }

    /// Forward a monitoring failure to the observer.
    pub fn on_monitoring_failure(&self, identifier: &str, error: ExternalError) {
        let Some(monitor) = self.monitor(identifier) else {
            warn!(region = identifier, %error, "monitoring failure for unmonitored region");
            return;
        };
        let region = lock(&monitor).region().clone();
        warn!(region = identifier, %error, "monitoring failed");
        self.emit(BeaconEvent::MonitoringFailed { region, error });
    }

    /// Forward a ranging failure to the observer.
    pub fn on_ranging_failure(&self, identifier: &str, error: ExternalError) {
        let session = self
            .ranging
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identifier)
            .cloned();
        let Some(session) = session else {
            warn!(region = identifier, %error, "ranging failure for unranged region");
            return;
        };
        let region = lock(&session).region().clone();
        warn!(region = identifier, %error, "ranging failed");
        self.emit(BeaconEvent::RangingFailed { region, error });
    }

    /// Forward a discovery failure to the observer.
    pub fn on_discovery_failure(&self, error: ExternalError) {
        let Some(region) = self.discovery_region() else {
            warn!(%error, "discovery failure with no discovery running");
            return;
        };
        warn!(region = region.identifier(), %error, "discovery failed");
        self.emit(BeaconEvent::DidFailDiscovery { region, error });
    }

    // =========================================================================
    // TICK
    // =========================================================================

    /// Advance every session and monitor to `now`.
    ///
    /// Emits one [`BeaconEvent::DidRangeBeacons`] per active ranging session,
    /// a [`BeaconEvent::DidExitRegion`] for each monitor whose liveness timed
    /// out, and a [`BeaconEvent::DidDiscoverBeacons`] if discovery is running.
    pub fn tick(&self, now: DateTime<Utc>) {
        let mut events = Vec::new();

        for session in Self::members(&self.ranging) {
            let mut session = lock(&session);
            if session.is_stopped() {
                continue;
            }
            let beacons = session.tick(now);
            trace!(region = session.region().identifier(), visible = beacons.len(), "ranged");
            events.push(BeaconEvent::DidRangeBeacons {
                region: session.region().clone(),
                beacons,
            });
        }

        for monitor in Self::members(&self.monitors) {
            let mut monitor = lock(&monitor);
            if let Some(event) = monitor.tick(now) {
                events.push(Self::monitor_event(monitor.region(), event));
            }
        }

        if let Some(session) = lock(&self.discovery).as_mut() {
            let beacons = session.tick(now);
            events.push(BeaconEvent::DidDiscoverBeacons {
                region: session.region().clone(),
                beacons,
            });
        }

        self.emit_all(events);
    }

    fn members<T>(table: &Table<T>) -> Vec<Arc<Mutex<T>>> {
        table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn regions_of<T>(table: &Table<T>, region: impl Fn(&T) -> Region) -> Vec<Region> {
        Self::members(table)
            .iter()
            .map(|member| region(&lock(member)))
            .collect()
    }
}
