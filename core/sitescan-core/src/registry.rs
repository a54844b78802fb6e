//! Registry of running scan sessions, at most one per location.
//!
//! The registry is a cheap-to-clone handle; every clone sees the same set of
//! sessions. Each session runs on its own thread, so a slow sample source
//! only delays its own location.
//!
//! ## Retirement
//!
//! A session leaves the active set exactly once: on cancel, or after its
//! runner finishes (flush included). Removal only touches the map entry if it
//! still belongs to the retiring session, so a new session started right
//! after a cancel is never evicted by the old runner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use tracing::{debug, info, warn};

use crate::config::ScanConfig;
use crate::error::{Result, SurveyError};
use crate::runner::{
    display_name, SampleSource, SeriesStore, SessionHandle, SessionOutcome, SessionRunner,
};
use crate::types::{
    pad_series, ApKey, LocationKey, LocationSeries, Series, SeriesRecord, SessionState,
};

/// Delivered once per session to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub location: LocationKey,
    #[serde(flatten)]
    pub outcome: SessionOutcome,
}

/// Summary of one running session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSession {
    pub location: LocationKey,
    pub started_at: DateTime<Utc>,
    pub rounds_completed: usize,
    pub access_points: usize,
}

/// Live state of one location with display names resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveView {
    pub location: LocationKey,
    pub active: bool,
    pub rounds_completed: usize,
    pub access_points: Vec<LiveAccessPoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveAccessPoint {
    pub ap: ApKey,
    pub display_name: String,
    pub series: Series,
}

#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    config: ScanConfig,
    source: Arc<dyn SampleSource>,
    store: Arc<dyn SeriesStore>,
    sessions: Mutex<HashMap<LocationKey, Arc<SessionHandle>>>,
    subscribers: Mutex<Vec<Sender<SessionReport>>>,
}

impl SessionRegistry {
    pub fn new(
        config: ScanConfig,
        source: Arc<dyn SampleSource>,
        store: Arc<dyn SeriesStore>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                source,
                store,
                sessions: Mutex::new(HashMap::new()),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> ScanConfig {
        self.inner.config
    }

    /// Starts a session for `location` using the registry's source and store.
    ///
    /// Returns `Ok(false)` without doing anything if one is already running.
    pub fn start_scanning(&self, location: LocationKey) -> Result<bool> {
        self.start_scanning_with(
            location,
            Arc::clone(&self.inner.source),
            Arc::clone(&self.inner.store),
        )
    }

    /// Like [`start_scanning`](Self::start_scanning) with explicit collaborators.
    pub fn start_scanning_with(
        &self,
        location: LocationKey,
        source: Arc<dyn SampleSource>,
        store: Arc<dyn SeriesStore>,
    ) -> Result<bool> {
        let mut sessions = self.sessions();
        if sessions.contains_key(&location) {
            debug!(location, "Scan already running; start ignored");
            return Ok(false);
        }

        let handle = Arc::new(SessionHandle::new(location));
        let runner = SessionRunner::new(self.inner.config, source, store, Arc::clone(&handle));
        // Inserted before spawning: the runner's retirement needs this lock,
        // so it cannot run ahead of the insert.
        sessions.insert(location, Arc::clone(&handle));

        let registry = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("sitescan-session-{}", location))
            .spawn(move || {
                let outcome = runner.run();
                registry.retire(location, &handle);
                registry.notify(SessionReport { location, outcome });
            });

        if let Err(source) = spawned {
            sessions.remove(&location);
            return Err(SurveyError::SpawnFailed { location, source });
        }
        Ok(true)
    }

    /// Cancels the session for `location`, if any. Returns whether a session
    /// was actually stopped.
    ///
    /// If the session is already flushing, this waits for the flush so that
    /// once the key leaves the active set nothing more is written for it. Such
    /// a session keeps its own outcome and this returns `false`.
    pub fn cancel_scanning(&self, location: LocationKey) -> bool {
        let handle = self.sessions().get(&location).cloned();
        match handle {
            Some(handle) => {
                let stopped = handle.cancel_and_settle();
                self.retire(location, &handle);
                stopped
            }
            None => false,
        }
    }

    pub fn active_locations(&self) -> BTreeSet<LocationKey> {
        self.sessions().keys().copied().collect()
    }

    pub fn is_active(&self, location: LocationKey) -> bool {
        self.sessions().contains_key(&location)
    }

    pub fn active_sessions(&self) -> Vec<ActiveSession> {
        let mut active = self
            .handles()
            .into_iter()
            .map(|handle| {
                let live = handle.snapshot();
                ActiveSession {
                    location: handle.location,
                    started_at: handle.started_at,
                    rounds_completed: live.state.rounds_completed,
                    access_points: live.state.series.len(),
                }
            })
            .collect::<Vec<_>>();
        active.sort_by_key(|session| session.location);
        active
    }

    /// Latest published state, or an empty state when nothing is running.
    pub fn live_state(&self, location: LocationKey) -> Arc<SessionState> {
        self.sessions()
            .get(&location)
            .cloned()
            .map(|handle| handle.snapshot().state)
            .unwrap_or_default()
    }

    pub fn live_round_count(&self, location: LocationKey) -> usize {
        self.live_state(location).rounds_completed
    }

    pub fn live_series_snapshot(&self, location: LocationKey) -> LocationSeries {
        self.live_state(location).series.clone()
    }

    /// Unpadded live series for `location`; empty and inactive when nothing runs.
    pub fn live_view(&self, location: LocationKey) -> LiveView {
        let handle = self.sessions().get(&location).cloned();
        let Some(handle) = handle else {
            return LiveView {
                location,
                active: false,
                rounds_completed: 0,
                access_points: Vec::new(),
            };
        };
        let live = handle.snapshot();
        LiveView {
            location,
            active: true,
            rounds_completed: live.state.rounds_completed,
            access_points: live
                .state
                .series
                .iter()
                .map(|(ap, series)| LiveAccessPoint {
                    ap: ap.clone(),
                    display_name: display_name(&live.names, ap),
                    series: series.clone(),
                })
                .collect(),
        }
    }

    /// Live series of every running session, padded to full length.
    pub fn live_records(&self, recorded_at: DateTime<Utc>) -> Vec<SeriesRecord> {
        let rounds = self.inner.config.rounds;
        let mut records = Vec::new();
        for handle in self.handles() {
            let live = handle.snapshot();
            for (ap, series) in live.state.series.iter() {
                records.push(SeriesRecord {
                    location: handle.location,
                    ap: ap.clone(),
                    display_name: display_name(&live.names, ap),
                    series: pad_series(series, rounds),
                    recorded_at,
                });
            }
        }
        records.sort_by(|left, right| {
            (left.location, &left.ap).cmp(&(right.location, &right.ap))
        });
        records
    }

    /// Receives a [`SessionReport`] for every session that ends after this call.
    pub fn subscribe(&self) -> Receiver<SessionReport> {
        let (sender, receiver) = mpsc::channel();
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
        receiver
    }

    fn retire(&self, location: LocationKey, handle: &Arc<SessionHandle>) -> bool {
        if handle.retired.swap(true, Ordering::SeqCst) {
            return false;
        }
        let mut sessions = self.sessions();
        if sessions
            .get(&location)
            .is_some_and(|current| Arc::ptr_eq(current, handle))
        {
            sessions.remove(&location);
        }
        info!(location, active = sessions.len(), "Scan session retired");
        true
    }

    fn notify(&self, report: SessionReport) {
        if let SessionOutcome::FlushFailed { error } = &report.outcome {
            warn!(location = report.location, error = %error, "Reporting failed flush");
        }
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|sender| sender.send(report.clone()).is_ok());
    }

    fn handles(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions().values().cloned().collect()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<LocationKey, Arc<SessionHandle>>> {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
