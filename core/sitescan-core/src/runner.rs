//! One location's sampling loop.
//!
//! A runner executes `rounds` rounds: poll the source, dwell, record, publish.
//! It ends `Completed` (series flushed to the store) or `Cancelled` (nothing
//! written). Sampling faults are logged and count as an empty round.
//!
//! ## Publishing
//!
//! Each publish replaces the whole [`SessionState`] behind an `Arc`, so a
//! reader never pairs a round count with a snapshot from another round.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::accumulator::SeriesAccumulator;
use crate::cancel::CancelToken;
use crate::config::ScanConfig;
use crate::error::SurveyError;
use crate::types::{
    pad_series, ApKey, ApReading, LocationKey, SeriesRecord, SessionState, UNKNOWN_NAME,
};

/// Obtains one snapshot of the access points currently observable.
pub trait SampleSource: Send + Sync {
    fn poll(&self) -> Result<Vec<ApReading>, String>;
}

/// Durable home for finished series.
pub trait SeriesStore: Send + Sync {
    fn insert(&self, record: &SeriesRecord) -> Result<(), String>;

    /// Inserts every record, stopping at the first failure. Stores that can
    /// should make this all-or-nothing.
    fn insert_batch(&self, records: &[SeriesRecord]) -> Result<(), String> {
        records.iter().try_for_each(|record| self.insert(record))
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed {
        access_points: usize,
        rounds: usize,
    },
    Cancelled {
        rounds_completed: usize,
    },
    FlushFailed {
        error: String,
    },
}

#[derive(Debug, Clone, Default)]
pub(crate) struct LiveSnapshot {
    pub(crate) state: Arc<SessionState>,
    pub(crate) names: Arc<BTreeMap<ApKey, String>>,
}

/// State shared between a running session and the registry.
#[derive(Debug)]
pub(crate) struct SessionHandle {
    pub(crate) location: LocationKey,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) cancel: CancelToken,
    pub(crate) retired: AtomicBool,
    // Set once the runner commits to flushing instead of cancelling.
    finalized: AtomicBool,
    live: RwLock<LiveSnapshot>,
    // Held across the final cancel check and the flush.
    finalize: Mutex<()>,
}

impl SessionHandle {
    pub(crate) fn new(location: LocationKey) -> Self {
        Self {
            location,
            started_at: Utc::now(),
            cancel: CancelToken::new(),
            retired: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            live: RwLock::new(LiveSnapshot::default()),
            finalize: Mutex::new(()),
        }
    }

    pub(crate) fn snapshot(&self) -> LiveSnapshot {
        self.live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Requests cancellation and waits out a flush already in progress.
    ///
    /// Returns `false` if the runner had already committed to its flush, in
    /// which case the session ends on its own outcome rather than `Cancelled`.
    pub(crate) fn cancel_and_settle(&self) -> bool {
        self.cancel.cancel();
        let _settled = self.finalize.lock().unwrap_or_else(PoisonError::into_inner);
        !self.finalized.load(Ordering::SeqCst)
    }

    fn publish(&self, state: SessionState, names: &BTreeMap<ApKey, String>) {
        let next = LiveSnapshot {
            state: Arc::new(state),
            names: Arc::new(names.clone()),
        };
        *self.live.write().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

pub(crate) struct SessionRunner {
    config: ScanConfig,
    source: Arc<dyn SampleSource>,
    store: Arc<dyn SeriesStore>,
    handle: Arc<SessionHandle>,
}

impl SessionRunner {
    pub(crate) fn new(
        config: ScanConfig,
        source: Arc<dyn SampleSource>,
        store: Arc<dyn SeriesStore>,
        handle: Arc<SessionHandle>,
    ) -> Self {
        Self {
            config,
            source,
            store,
            handle,
        }
    }

    pub(crate) fn run(self) -> SessionOutcome {
        let location = self.handle.location;
        let rounds = self.config.rounds;
        let dwell = self.config.dwell();
        let mut accumulator = SeriesAccumulator::new(rounds);
        let mut names: BTreeMap<ApKey, String> = BTreeMap::new();

        self.handle.publish(SessionState::default(), &names);
        info!(location, rounds, dwell_ms = self.config.dwell_ms, "Scan session started");

        for round in 0..rounds {
            if self.handle.cancel.is_cancelled() {
                return cancelled(location, round);
            }

            let readings = match self.source.poll() {
                Ok(readings) => readings,
                Err(err) => {
                    warn!(location, round, error = %err, "Sampling failed; recording empty round");
                    Vec::new()
                }
            };
            for reading in &readings {
                if let Some(name) = reading.resolved_name() {
                    names.insert(reading.ap.clone(), name.to_string());
                }
            }

            if self.handle.cancel.sleep(dwell) {
                return cancelled(location, round);
            }

            accumulator.record(round, &readings);
            let series = accumulator.snapshot();
            let access_points = series.len();
            self.handle.publish(
                SessionState {
                    rounds_completed: round + 1,
                    series,
                },
                &names,
            );
            debug!(
                location,
                round,
                readings = readings.len(),
                access_points,
                "Round published"
            );
        }

        let _finalizing = self
            .handle
            .finalize
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.handle.cancel.is_cancelled() {
            return cancelled(location, rounds);
        }
        self.handle.finalized.store(true, Ordering::SeqCst);

        let records = finished_records(location, &accumulator, &names, rounds, Utc::now());
        match self.store.insert_batch(&records) {
            Ok(()) => {
                info!(location, access_points = records.len(), "Scan session completed");
                SessionOutcome::Completed {
                    access_points: records.len(),
                    rounds,
                }
            }
            Err(details) => {
                let err = SurveyError::Flush { location, details };
                warn!(location, error = %err, "Scan session flush failed");
                SessionOutcome::FlushFailed {
                    error: err.to_string(),
                }
            }
        }
    }
}

fn cancelled(location: LocationKey, rounds_completed: usize) -> SessionOutcome {
    info!(location, rounds_completed, "Scan session cancelled");
    SessionOutcome::Cancelled { rounds_completed }
}

fn finished_records(
    location: LocationKey,
    accumulator: &SeriesAccumulator,
    names: &BTreeMap<ApKey, String>,
    rounds: usize,
    recorded_at: DateTime<Utc>,
) -> Vec<SeriesRecord> {
    accumulator
        .snapshot()
        .into_iter()
        .map(|(ap, series)| SeriesRecord {
            location,
            display_name: display_name(names, &ap),
            series: pad_series(&series, rounds),
            ap,
            recorded_at,
        })
        .collect()
}

pub(crate) fn display_name(names: &BTreeMap<ApKey, String>, ap: &str) -> String {
    names
        .get(ap)
        .cloned()
        .unwrap_or_else(|| UNKNOWN_NAME.to_string())
}
