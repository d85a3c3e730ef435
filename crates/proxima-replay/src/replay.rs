//! Replay of a recorded trace against a [`BeaconManager`].
//!
//! Two drivers share the same trace handling:
//!
//! - [`Replayer`] runs on the trace's own clock. Before each line it issues
//!   every tick due at or before the line's `at`, and after the last line it
//!   ticks through one more visibility window (plus one tick) so that every
//!   beacon still visible is evicted. A liveness exit only shows up there if
//!   the monitoring exit timeout fits in that window. Output is deterministic.
//! - [`replay_realtime`] paces lines by wall-clock time. Radio events and
//!   operations both go through the dispatch loop's queue, so they apply in
//!   trace order, and the loop ticks on its own.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use proxima_core::{
    BeaconEvent, BeaconManager, EngineConfig, EngineHandle, EventReceiver, ProximaError,
    RadioEvent, RecordingAdvertiser, DEFAULT_INBOUND_CAPACITY,
};
use tracing::{debug, info, warn};

use crate::trace::{Entry, Operation, TraceLine};

/// Counters reported when a replay finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Trace lines applied.
    pub lines: usize,
    /// Ticks issued.
    pub ticks: usize,
    /// Events written.
    pub events: usize,
    /// Operations the façade refused.
    pub rejected: usize,
    /// Collaborator failures reported to the observer.
    pub failures: usize,
}

/// Build a manager with a recording advertiser and start every region the
/// configuration lists.
///
/// # Errors
///
/// Fails if a configured region is malformed.
pub fn boot(config: EngineConfig) -> anyhow::Result<(Arc<BeaconManager>, Arc<RecordingAdvertiser>)> {
    let advertiser = Arc::new(RecordingAdvertiser::new());
    let regions = config.regions.clone();
    let manager = Arc::new(BeaconManager::new(config, advertiser.clone()));
    for entry in &regions {
        let region = entry
            .to_region()
            .with_context(|| format!("configured region '{}'", entry.identifier))?;
        if entry.ranging {
            manager.start_ranging(region.clone());
        }
        if entry.monitoring {
            manager.start_monitoring(region);
        }
    }
    Ok((manager, advertiser))
}

/// Apply one façade operation. Returns `false` if the façade refused it.
fn apply_operation(
    manager: &BeaconManager,
    advertiser: &RecordingAdvertiser,
    line: usize,
    op: Operation,
) -> bool {
    let outcome = match op {
        Operation::StartRanging { region } => region
            .to_region()
            .map(|region| manager.start_ranging(region))
            .map_err(ProximaError::from),
        Operation::StopRanging { identifier } => manager.stop_ranging(&identifier),
        Operation::StartMonitoring { region } => region
            .to_region()
            .map(|region| manager.start_monitoring(region))
            .map_err(ProximaError::from),
        Operation::StopMonitoring { identifier } => manager.stop_monitoring(&identifier),
        Operation::RequestState { identifier } => manager.request_state(&identifier),
        Operation::StartDiscovery { region } => region
            .to_region()
            .map(|region| manager.start_discovery(region))
            .map_err(ProximaError::from),
        Operation::StopDiscovery => {
            manager.stop_discovery();
            Ok(())
        }
        Operation::StartAdvertising {
            major,
            minor,
            identifier,
        } => {
            manager.start_advertising(major, minor, &identifier);
            Ok(())
        }
        Operation::StopAdvertising => {
            manager.stop_advertising();
            Ok(())
        }
        Operation::AdvertiserFailure { error } => {
            advertiser.fail_with(error);
            Ok(())
        }
    };

    match outcome {
        Ok(()) => true,
        Err(error) => {
            warn!(line, code = error.error_code(), %error, "operation refused");
            false
        }
    }
}

/// Write one event line. Returns `true` if the event reports a collaborator
/// failure.
fn write_event<W: Write>(out: &mut W, event: &BeaconEvent) -> anyhow::Result<bool> {
    let line = event.to_json_line().context("encoding event")?;
    writeln!(out, "{line}").context("writing event")?;
    Ok(match event.failure() {
        Some(error) if error.is_collaborator_failure() => {
            warn!(
                code = error.error_code(),
                recoverable = error.is_recoverable(),
                %error,
                "collaborator failure"
            );
            true
        }
        _ => false,
    })
}

/// Deterministic replay on the trace clock.
#[derive(Debug)]
pub struct Replayer {
    manager: Arc<BeaconManager>,
    advertiser: Arc<RecordingAdvertiser>,
    events: EventReceiver,
    interval: Duration,
    next_tick: Option<DateTime<Utc>>,
    last_at: Option<DateTime<Utc>>,
    summary: ReplaySummary,
}

impl Replayer {
    /// Boot a manager from `config` and subscribe to it.
    ///
    /// # Errors
    ///
    /// Fails if a configured region is malformed.
    pub fn new(config: EngineConfig) -> anyhow::Result<Self> {
        let interval = Duration::from_std(config.ranging.tick_interval())
            .context("tick interval out of range")?
            .max(Duration::milliseconds(1));
        let (manager, advertiser) = boot(config)?;
        let events = manager.subscribe();
        Ok(Self {
            manager,
            advertiser,
            events,
            interval,
            next_tick: None,
            last_at: None,
            summary: ReplaySummary::default(),
        })
    }

    /// The manager being driven.
    #[must_use]
    pub const fn manager(&self) -> &Arc<BeaconManager> {
        &self.manager
    }

    /// Issue every tick due at or before `now`.
    fn advance_to(&mut self, now: DateTime<Utc>) {
        let mut next = *self.next_tick.get_or_insert(now + self.interval);
        while next <= now {
            self.manager.tick(next);
            self.summary.ticks += 1;
            next += self.interval;
        }
        self.next_tick = Some(next);
    }

    fn flush<W: Write>(&mut self, out: &mut W) -> anyhow::Result<()> {
        while let Ok(event) = self.events.try_recv() {
            if write_event(out, &event)? {
                self.summary.failures += 1;
            }
            self.summary.events += 1;
        }
        Ok(())
    }

    /// Apply one trace line, writing the events it produces.
    ///
    /// # Errors
    ///
    /// Fails only if writing to `out` fails.
    pub fn apply<W: Write>(&mut self, line: TraceLine, out: &mut W) -> anyhow::Result<()> {
        self.advance_to(line.at);
        self.flush(out)?;

        debug!(line = line.line, at = %line.at, "applying trace line");
        match line.entry {
            Entry::Radio(event) => self.manager.handle(event),
            Entry::Op(op) => {
                if !apply_operation(&self.manager, &self.advertiser, line.line, op) {
                    self.summary.rejected += 1;
                }
            }
        }
        self.summary.lines += 1;
        self.last_at = Some(line.at);
        self.flush(out)
    }

    /// Tick through one trailing visibility window and return the totals.
    ///
    /// # Errors
    ///
    /// Fails only if writing to `out` fails.
    pub fn finish<W: Write>(mut self, out: &mut W) -> anyhow::Result<ReplaySummary> {
        if let Some(last) = self.last_at {
            let window = self.manager.config().ranging.visibility_timeout();
            self.advance_to(last + window + self.interval);
            self.flush(out)?;
        }
        out.flush().context("flushing output")?;
        info!(
            lines = self.summary.lines,
            ticks = self.summary.ticks,
            events = self.summary.events,
            rejected = self.summary.rejected,
            failures = self.summary.failures,
            "replay finished"
        );
        Ok(self.summary)
    }
}

/// Replay `lines` on the trace clock, writing events to `out`.
///
/// # Errors
///
/// Fails on a malformed configured region or a write error.
pub fn replay<W: Write>(
    config: EngineConfig,
    lines: Vec<TraceLine>,
    out: &mut W,
) -> anyhow::Result<ReplaySummary> {
    let mut replayer = Replayer::new(config)?;
    for line in lines {
        replayer.apply(line, out)?;
    }
    replayer.finish(out)
}

/// Move a recorded event's timestamps onto the wall clock.
fn rebase(event: RadioEvent, shift: Duration) -> RadioEvent {
    match event {
        RadioEvent::AdvertisementSighted(mut raw) => {
            raw.timestamp += shift;
            RadioEvent::AdvertisementSighted(raw)
        }
        RadioEvent::RegionBoundaryCrossed {
            region_id,
            direction,
            at,
        } => RadioEvent::RegionBoundaryCrossed {
            region_id,
            direction,
            at: at + shift,
        },
        other => other,
    }
}

/// Replay `lines` in wall-clock time through the async dispatch loop.
///
/// Gaps between `at` values are slept through. Radio events and operations
/// are both queued on the engine, so an operation never overtakes a radio
/// event from an earlier line.
///
/// # Errors
///
/// Fails on a malformed configured region, a write error, or if the
/// dispatch loop stopped or panicked.
pub async fn replay_realtime<W: Write + Send + 'static>(
    config: EngineConfig,
    lines: Vec<TraceLine>,
    mut out: W,
) -> anyhow::Result<ReplaySummary> {
    let window = config.ranging.visibility_timeout();
    let (manager, advertiser) = boot(config)?;
    let mut events = manager.subscribe();
    let engine = EngineHandle::spawn(Arc::clone(&manager), DEFAULT_INBOUND_CAPACITY);

    let printer = tokio::spawn(async move {
        let (mut written, mut failures) = (0, 0);
        while let Some(event) = events.recv().await {
            if write_event(&mut out, &event)? {
                failures += 1;
            }
            written += 1;
        }
        out.flush().context("flushing output")?;
        anyhow::Ok((written, failures))
    });

    let mut summary = ReplaySummary::default();
    let start = tokio::time::Instant::now();
    let wall_start = Utc::now();
    let origin = lines.first().map(|line| line.at);
    for line in lines {
        let mut shift = Duration::zero();
        if let Some(origin) = origin {
            let offset = line.at - origin;
            tokio::time::sleep_until(start + offset.to_std().unwrap_or_default()).await;
            shift = wall_start - origin;
        }
        match line.entry {
            Entry::Radio(event) => engine
                .send(rebase(event, shift))
                .await
                .with_context(|| format!("line {}: dispatch loop stopped early", line.line))?,
            Entry::Op(op) => {
                let advertiser = Arc::clone(&advertiser);
                let number = line.line;
                let accepted = engine
                    .call(move |manager| apply_operation(manager, &advertiser, number, op))
                    .await
                    .with_context(|| format!("line {number}: dispatch loop stopped early"))?;
                if !accepted {
                    summary.rejected += 1;
                }
            }
        }
        summary.lines += 1;
    }

    if summary.lines > 0 {
        tokio::time::sleep(window.to_std().unwrap_or_default()).await;
    }
    engine.shutdown().await.context("dispatch loop panicked")?;
    manager.unsubscribe();
    (summary.events, summary.failures) = printer.await.context("event printer panicked")??;
    info!(
        lines = summary.lines,
        events = summary.events,
        failures = summary.failures,
        "realtime replay finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::read_trace;
    use proxima_core::{RegionConfig, RegionState};

    const UUID: &str = "b9407f30-f5f8-466e-aff9-25556b57fe6d";

    fn sighting(at: &str, minor: u16, rssi: i16) -> String {
        format!(
            r#"{{"at":"{at}","kind":"advertisement_sighted","proximity_uuid":"{UUID}","major":1,"minor":{minor},"rssi":{rssi},"measured_power":-59,"timestamp":"{at}"}}"#
        )
    }

    fn events_of(output: &[u8]) -> Vec<serde_json::Value> {
        String::from_utf8_lossy(output)
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn names(events: &[serde_json::Value]) -> Vec<String> {
        events
            .iter()
            .map(|e| e["event"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_boot_starts_configured_regions() {
        let mut config = EngineConfig::default();
        config.regions.push(RegionConfig {
            identifier: "lobby".into(),
            proximity_uuid: UUID.into(),
            major: None,
            minor: None,
            ranging: true,
            monitoring: false,
        });
        let (manager, _) = boot(config).unwrap();
        assert_eq!(manager.ranged_regions().len(), 1);
        assert!(manager.monitored_regions().is_empty());
    }

    #[test]
    fn test_ticks_are_issued_up_to_each_line() {
        let trace = [
            format!(
                r#"{{"at":"2025-01-15T03:30:00Z","op":"start_ranging","region":{{"identifier":"lobby","proximity_uuid":"{UUID}"}}}}"#
            ),
            sighting("2025-01-15T03:30:00Z", 1, -60),
            sighting("2025-01-15T03:30:02.500Z", 2, -80),
        ]
        .join("\n");
        let lines = read_trace(trace.as_bytes()).unwrap();

        let mut out = Vec::new();
        let summary = replay(EngineConfig::default(), lines, &mut out).unwrap();
        let events = events_of(&out);

        assert_eq!(summary.lines, 3);
        assert_eq!(summary.events, events.len());
        assert!(events.iter().all(|e| e["event"] == "did_range_beacons"));
        // Ticks at +1s and +2s only see the first beacon.
        assert_eq!(events[0]["beacons"].as_array().unwrap().len(), 1);
        assert_eq!(events[1]["beacons"].as_array().unwrap().len(), 1);
        assert_eq!(events[2]["beacons"].as_array().unwrap().len(), 2);
        // The trailing window evicts everything.
        assert!(events.last().unwrap()["beacons"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_liveness_exit_shows_up_after_last_line() {
        let mut config = EngineConfig::default();
        config.monitoring.exit_timeout_secs = 3;
        let trace = [
            format!(
                r#"{{"at":"2025-01-15T03:30:00Z","op":"start_monitoring","region":{{"identifier":"lobby","proximity_uuid":"{UUID}"}}}}"#
            ),
            r#"{"at":"2025-01-15T03:30:00Z","kind":"region_boundary_crossed","region_id":"lobby","direction":"enter"}"#.to_string(),
        ]
        .join("\n");
        let lines = read_trace(trace.as_bytes()).unwrap();

        let mut out = Vec::new();
        replay(config, lines, &mut out).unwrap();
        assert_eq!(
            names(&events_of(&out)),
            vec!["did_enter_region", "did_exit_region"]
        );
    }

    #[test]
    fn test_refused_operations_are_counted_not_fatal() {
        let trace = [
            r#"{"at":"2025-01-15T03:30:00Z","op":"stop_ranging","identifier":"nowhere"}"#,
            r#"{"at":"2025-01-15T03:30:00Z","op":"start_ranging","region":{"identifier":"bad","proximity_uuid":"not-a-uuid"}}"#,
            r#"{"at":"2025-01-15T03:30:00Z","op":"request_state","identifier":"nowhere"}"#,
        ]
        .join("\n");
        let lines = read_trace(trace.as_bytes()).unwrap();

        let mut out = Vec::new();
        let summary = replay(EngineConfig::default(), lines, &mut out).unwrap();
        assert_eq!(summary.rejected, 3);
        assert!(out.is_empty());
    }

    #[test]
    fn test_advertising_operations() {
        let trace = [
            r#"{"at":"2025-01-15T03:30:00Z","op":"start_advertising","major":1,"minor":2,"identifier":"desk"}"#,
            r#"{"at":"2025-01-15T03:30:00Z","op":"advertiser_failure","error":"PoweredOff"}"#,
            r#"{"at":"2025-01-15T03:30:00Z","op":"start_advertising","major":1,"minor":2,"identifier":"desk"}"#,
        ]
        .join("\n");
        let lines = read_trace(trace.as_bytes()).unwrap();

        let mut replayer = Replayer::new(EngineConfig::default()).unwrap();
        let mut out = Vec::new();
        for line in lines {
            replayer.apply(line, &mut out).unwrap();
        }
        assert!(replayer.manager().virtual_beacon_region().is_none());

        let events = events_of(&out);
        assert_eq!(events.len(), 2);
        assert!(events[0]["error"].is_null());
        assert_eq!(events[1]["error"], "PoweredOff");
    }

    #[test]
    fn test_state_request_reflects_replayed_primitives() {
        let trace = [
            format!(
                r#"{{"at":"2025-01-15T03:30:00Z","op":"start_monitoring","region":{{"identifier":"lobby","proximity_uuid":"{UUID}"}}}}"#
            ),
            r#"{"at":"2025-01-15T03:30:00Z","kind":"region_boundary_crossed","region_id":"lobby","direction":"exit"}"#.to_string(),
            r#"{"at":"2025-01-15T03:30:00Z","op":"request_state","identifier":"lobby"}"#.to_string(),
        ]
        .join("\n");
        let lines = read_trace(trace.as_bytes()).unwrap();

        let mut replayer = Replayer::new(EngineConfig::default()).unwrap();
        let mut out = Vec::new();
        for line in lines {
            replayer.apply(line, &mut out).unwrap();
        }
        assert_eq!(
            replayer.manager().monitor_state("lobby"),
            Some(RegionState::Outside)
        );
        let events = events_of(&out);
        assert_eq!(names(&events), vec!["did_exit_region", "did_determine_state"]);
        assert_eq!(events[1]["state"], "outside");
    }

    #[test]
    fn test_empty_trace_produces_nothing() {
        let mut out = Vec::new();
        let summary = replay(EngineConfig::default(), Vec::new(), &mut out).unwrap();
        assert_eq!(summary, ReplaySummary::default());
        assert!(out.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_realtime_replay_runs_dispatch_loop() {
        let trace = [
            format!(
                r#"{{"at":"2025-01-15T03:30:00Z","op":"start_monitoring","region":{{"identifier":"lobby","proximity_uuid":"{UUID}"}}}}"#
            ),
            r#"{"at":"2025-01-15T03:30:01Z","kind":"region_boundary_crossed","region_id":"lobby","direction":"enter"}"#.to_string(),
        ]
        .join("\n");
        let lines = read_trace(trace.as_bytes()).unwrap();

        let summary = replay_realtime(EngineConfig::default(), lines, std::io::sink())
            .await
            .unwrap();
        assert_eq!(summary.lines, 2);
        assert_eq!(summary.events, 1);
    }

    /// Cloneable in-memory sink for the realtime driver.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<std::sync::Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_realtime_operations_keep_trace_order() {
        let trace = [
            format!(
                r#"{{"at":"2025-01-15T03:30:00Z","op":"start_monitoring","region":{{"identifier":"lobby","proximity_uuid":"{UUID}"}}}}"#
            ),
            r#"{"at":"2025-01-15T03:30:01Z","kind":"region_boundary_crossed","region_id":"lobby","direction":"enter"}"#.to_string(),
            r#"{"at":"2025-01-15T03:30:01Z","op":"request_state","identifier":"lobby"}"#.to_string(),
        ]
        .join("\n");
        let lines = read_trace(trace.as_bytes()).unwrap();

        let out = SharedBuf::default();
        let summary = replay_realtime(EngineConfig::default(), lines, out.clone())
            .await
            .unwrap();
        assert_eq!(summary.rejected, 0);

        let events = events_of(&out.0.lock().unwrap());
        assert_eq!(names(&events), vec!["did_enter_region", "did_determine_state"]);
        assert_eq!(events[1]["state"], "inside");
    }

    #[test]
    fn test_collaborator_failures_are_counted() {
        let trace = [
            format!(
                r#"{{"at":"2025-01-15T03:30:00Z","op":"start_ranging","region":{{"identifier":"lobby","proximity_uuid":"{UUID}"}}}}"#
            ),
            r#"{"at":"2025-01-15T03:30:00.200Z","kind":"ranging_failure","region_id":"lobby","error":{"domain":"kCLErrorDomain","code":16,"message":"ranging unavailable"}}"#.to_string(),
            r#"{"at":"2025-01-15T03:30:00.400Z","op":"advertiser_failure","error":"PoweredOff"}"#.to_string(),
            r#"{"at":"2025-01-15T03:30:00.600Z","op":"start_advertising","major":1,"minor":2,"identifier":"desk"}"#.to_string(),
        ]
        .join("\n");
        let lines = read_trace(trace.as_bytes()).unwrap();

        let mut replayer = Replayer::new(EngineConfig::default()).unwrap();
        let mut out = Vec::new();
        for line in lines {
            replayer.apply(line, &mut out).unwrap();
        }
        let events = events_of(&out);
        assert_eq!(names(&events), vec!["ranging_failed", "did_start_advertising"]);
        assert_eq!(replayer.summary.failures, 2);
    }
}
