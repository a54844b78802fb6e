//! State owned by the daemon: the SQLite store and the session registry.
//!
//! The registry flushes finished sessions straight into the same `Db`, so the
//! socket handlers and the session threads share one store.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sitescan_core::{
    compare_locations, ActiveSession, ApComparison, LiveView, LocationKey, SampleSource,
    SeriesStore, SessionOutcome, SessionRegistry, SessionReport,
};
use sitescan_daemon_protocol::{LocationInfo, ScanInfo};
use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use crate::config::DaemonConfig;
use crate::db::{Db, ResetSummary};
use crate::source::NmcliSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartResult {
    Started,
    AlreadyRunning,
    UnknownLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreLiveSummary {
    pub records: usize,
    pub locations: usize,
}

pub struct SharedState {
    db: Arc<Db>,
    registry: SessionRegistry,
    config: DaemonConfig,
    started_at: DateTime<Utc>,
    // Serializes start against delete so a session never outlives its location.
    lifecycle: Mutex<()>,
}

impl SharedState {
    pub fn new(db: Db, config: DaemonConfig) -> Self {
        let source: Arc<dyn SampleSource> = Arc::new(NmcliSource::new(&config.source));
        Self::with_source(db, config, source)
    }

    pub fn with_source(db: Db, config: DaemonConfig, source: Arc<dyn SampleSource>) -> Self {
        let db = Arc::new(db);
        let store: Arc<dyn SeriesStore> = db.clone();
        let registry = SessionRegistry::new(config.scan, source, store);
        Self {
            db,
            registry,
            config,
            started_at: Utc::now(),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Logs every session outcome on a background thread.
    pub fn spawn_outcome_logger(&self) {
        let reports = self.registry.subscribe();
        let spawned = thread::Builder::new()
            .name("sitescan-outcomes".to_string())
            .spawn(move || log_outcomes(reports));
        if let Err(err) = spawned {
            tracing::warn!(error = %err, "Failed to spawn outcome logger");
        }
    }

    pub fn add_location(&self, name: &str) -> Result<LocationInfo, String> {
        let location = self.db.add_location(name)?;
        tracing::info!(location = location.id, name = %location.name, "Location added");
        Ok(location)
    }

    pub fn locations_snapshot(&self) -> Result<Vec<LocationInfo>, String> {
        let active = self.registry.active_locations();
        Ok(self
            .db
            .list_locations()?
            .into_iter()
            .map(|location| LocationInfo {
                scanning: active.contains(&location.id),
                ..location
            })
            .collect())
    }

    /// Cancels any running session first so nothing is flushed for a
    /// location that no longer exists.
    pub fn delete_location(&self, location: LocationKey) -> Result<bool, String> {
        let _lifecycle = self.lifecycle();
        let cancelled = self.registry.cancel_scanning(location);
        let removed = self.db.delete_location(location)?;
        tracing::info!(location, cancelled, removed, "Location delete handled");
        Ok(removed)
    }

    pub fn start_scan(&self, location: LocationKey) -> Result<StartResult, String> {
        let _lifecycle = self.lifecycle();
        if self.db.get_location(location)?.is_none() {
            return Ok(StartResult::UnknownLocation);
        }
        let started = self.registry.start_scanning(location)?;
        Ok(if started {
            StartResult::Started
        } else {
            StartResult::AlreadyRunning
        })
    }

    pub fn cancel_scan(&self, location: LocationKey) -> bool {
        self.registry.cancel_scanning(location)
    }

    pub fn active_snapshot(&self) -> Vec<ActiveSession> {
        self.registry.active_sessions()
    }

    pub fn live_view(&self, location: LocationKey) -> LiveView {
        self.registry.live_view(location)
    }

    pub fn compare(&self, locations: &[LocationKey]) -> Result<Vec<ApComparison>, String> {
        let mut stored = BTreeMap::new();
        for location in locations {
            stored.insert(*location, self.db.latest_series(*location)?);
        }
        Ok(compare_locations(&stored)?)
    }

    pub fn list_scans(&self, location: LocationKey) -> Result<Vec<ScanInfo>, String> {
        self.db.list_scans(location)
    }

    /// Writes whatever the running sessions have so far, padded to full length.
    pub fn store_live(&self) -> Result<StoreLiveSummary, String> {
        let records = self.registry.live_records(Utc::now());
        let mut locations = records.iter().map(|record| record.location).collect::<Vec<_>>();
        locations.dedup();
        self.db.insert_series_batch(&records)?;
        tracing::info!(
            records = records.len(),
            locations = locations.len(),
            "Stored live series"
        );
        Ok(StoreLiveSummary {
            records: records.len(),
            locations: locations.len(),
        })
    }

    pub fn reset_stored(&self) -> Result<ResetSummary, String> {
        let summary = self.db.reset_stored(self.config.scan.rounds)?;
        tracing::info!(
            orphans_deleted = summary.orphans_deleted,
            series_zeroed = summary.series_zeroed,
            "Stored series reset"
        );
        Ok(summary)
    }

    fn lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn log_outcomes(reports: Receiver<SessionReport>) {
    for report in reports {
        match report.outcome {
            SessionOutcome::Completed {
                access_points,
                rounds,
            } => {
                tracing::info!(
                    location = report.location,
                    access_points,
                    rounds,
                    "Scan session completed"
                );
            }
            SessionOutcome::Cancelled { rounds_completed } => {
                tracing::info!(
                    location = report.location,
                    rounds_completed,
                    "Scan session cancelled"
                );
            }
            SessionOutcome::FlushFailed { error } => {
                tracing::error!(
                    location = report.location,
                    error = %error,
                    "Scan session flush failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitescan_core::{ApReading, ScanConfig};
    use std::time::{Duration, Instant};

    struct Fixed;

    impl SampleSource for Fixed {
        fn poll(&self) -> Result<Vec<ApReading>, String> {
            Ok(vec![
                ApReading::named("aa:01", -45, "office"),
                ApReading::new("aa:02", -70),
            ])
        }
    }

    fn state(rounds: usize, dwell: Duration) -> (tempfile::TempDir, SharedState) {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let db = Db::new(temp_dir.path().join("survey.db")).expect("db init");
        let config = DaemonConfig {
            scan: ScanConfig::new(rounds, dwell),
            ..DaemonConfig::default()
        };
        (temp_dir, SharedState::with_source(db, config, Arc::new(Fixed)))
    }

    fn wait_until_idle(state: &SharedState, location: LocationKey) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while state.registry.is_active(location) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!state.registry.is_active(location), "session did not finish");
    }

    #[test]
    fn start_requires_known_location() {
        let (_dir, state) = state(3, Duration::ZERO);
        assert_eq!(
            state.start_scan(99).expect("start"),
            StartResult::UnknownLocation
        );
        assert!(state.active_snapshot().is_empty());
    }

    #[test]
    fn finished_sessions_are_comparable() {
        let (_dir, state) = state(3, Duration::ZERO);
        let kitchen = state.add_location("kitchen").expect("add");
        let attic = state.add_location("attic").expect("add");

        for location in [kitchen.id, attic.id] {
            assert_eq!(state.start_scan(location).expect("start"), StartResult::Started);
            wait_until_idle(&state, location);
        }

        let comparison = state.compare(&[kitchen.id, attic.id]).expect("compare");
        assert_eq!(comparison.len(), 2);
        assert_eq!(comparison[0].ap, "aa:01");
        assert_eq!(comparison[0].display_name, "office");
        assert_eq!(comparison[0].overall.samples, 6);
        assert_eq!(comparison[1].display_name, "Unknown");

        let scans = state.list_scans(kitchen.id).expect("scans");
        assert_eq!(scans.len(), 2);
        assert!(scans.iter().all(|scan| scan.series.len() == 3));
    }

    #[test]
    fn delete_cancels_running_session() {
        let (_dir, state) = state(100, Duration::from_secs(30));
        let location = state.add_location("hall").expect("add");
        state.start_scan(location.id).expect("start");
        assert_eq!(
            state.start_scan(location.id).expect("second start"),
            StartResult::AlreadyRunning
        );
        assert!(state.locations_snapshot().expect("list")[0].scanning);

        assert!(state.delete_location(location.id).expect("delete"));
        assert!(state.active_snapshot().is_empty());
        assert!(state.locations_snapshot().expect("list").is_empty());
        assert!(state.db.latest_series(location.id).expect("series").is_empty());
    }

    #[test]
    fn start_waiting_on_delete_sees_location_gone() {
        let (_dir, state) = state(100, Duration::from_secs(30));
        let state = Arc::new(state);
        let location = state.add_location("cellar").expect("add");

        let deleting = state.lifecycle();
        let starter = {
            let state = Arc::clone(&state);
            thread::spawn(move || state.start_scan(location.id))
        };
        thread::sleep(Duration::from_millis(50));
        assert!(state.active_snapshot().is_empty());
        assert!(state.db.delete_location(location.id).expect("delete"));
        drop(deleting);

        let result = starter.join().expect("starter thread").expect("start");
        assert_eq!(result, StartResult::UnknownLocation);
        assert!(state.active_snapshot().is_empty());
    }

    #[test]
    fn store_live_writes_padded_series() {
        let (_dir, state) = state(50, Duration::from_millis(5));
        let location = state.add_location("porch").expect("add");
        state.start_scan(location.id).expect("start");

        let deadline = Instant::now() + Duration::from_secs(5);
        while state.live_view(location.id).rounds_completed < 1 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        let summary = state.store_live().expect("store live");
        state.cancel_scan(location.id);

        assert_eq!(summary.records, 2);
        assert_eq!(summary.locations, 1);
        let stored = state.db.latest_series(location.id).expect("series");
        assert_eq!(stored["aa:01"].series.len(), 50);
    }
}
