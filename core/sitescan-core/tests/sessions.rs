use sitescan_core::{
    ApReading, LocationKey, SampleSource, ScanConfig, SeriesRecord, SeriesStore, SessionOutcome,
    SessionRegistry, SessionReport,
};
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, sleep};
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(10);

struct Scripted {
    rounds: Mutex<VecDeque<Vec<ApReading>>>,
}

impl Scripted {
    fn new(rounds: Vec<Vec<ApReading>>) -> Self {
        Self {
            rounds: Mutex::new(rounds.into()),
        }
    }
}

impl SampleSource for Scripted {
    fn poll(&self) -> Result<Vec<ApReading>, String> {
        Ok(self
            .rounds
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }
}

/// Rotates through three APs so every round has a different mix.
#[derive(Default)]
struct Rotating {
    calls: AtomicUsize,
}

impl SampleSource for Rotating {
    fn poll(&self) -> Result<Vec<ApReading>, String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let mut readings = Vec::new();
        if call % 2 == 0 {
            readings.push(ApReading::new("even", -40));
        }
        if call % 3 == 0 {
            readings.push(ApReading::new("third", -60));
        }
        if call >= 4 {
            readings.push(ApReading::named("late", -70, "late-net"));
        }
        Ok(readings)
    }
}

struct Failing;

impl SampleSource for Failing {
    fn poll(&self) -> Result<Vec<ApReading>, String> {
        Err("wifi scan throttled".to_string())
    }
}

/// Blocks every poll until the test releases it.
struct Blocking {
    release: Mutex<Receiver<()>>,
}

impl SampleSource for Blocking {
    fn poll(&self) -> Result<Vec<ApReading>, String> {
        let _ = self.release.lock().unwrap().recv();
        Ok(vec![ApReading::new("slow", -80)])
    }
}

#[derive(Default)]
struct MemoryStore {
    records: Mutex<Vec<SeriesRecord>>,
}

impl MemoryStore {
    fn for_location(&self, location: LocationKey) -> Vec<SeriesRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|record| record.location == location)
            .cloned()
            .collect()
    }
}

impl SeriesStore for MemoryStore {
    fn insert(&self, record: &SeriesRecord) -> Result<(), String> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

struct FailingStore;

impl SeriesStore for FailingStore {
    fn insert(&self, _record: &SeriesRecord) -> Result<(), String> {
        Err("database is locked".to_string())
    }
}

/// Holds the flush open until the test lets it through.
struct GatedStore {
    gate: Mutex<Receiver<()>>,
    entered: Mutex<Sender<()>>,
    inner: MemoryStore,
}

impl GatedStore {
    /// Returns the store, the sender that opens the gate, and a receiver that
    /// fires once a flush is waiting at the gate.
    fn new() -> (Arc<Self>, Sender<()>, Receiver<()>) {
        let (release, gate) = mpsc::channel();
        let (entered, flushing) = mpsc::channel();
        let store = Arc::new(Self {
            gate: Mutex::new(gate),
            entered: Mutex::new(entered),
            inner: MemoryStore::default(),
        });
        (store, release, flushing)
    }
}

impl SeriesStore for GatedStore {
    fn insert(&self, record: &SeriesRecord) -> Result<(), String> {
        self.inner.insert(record)
    }

    fn insert_batch(&self, records: &[SeriesRecord]) -> Result<(), String> {
        let _ = self.entered.lock().unwrap().send(());
        let _ = self.gate.lock().unwrap().recv();
        records.iter().try_for_each(|record| self.inner.insert(record))
    }
}

fn registry(
    rounds: usize,
    dwell: Duration,
    source: Arc<dyn SampleSource>,
    store: Arc<dyn SeriesStore>,
) -> SessionRegistry {
    SessionRegistry::new(ScanConfig::new(rounds, dwell), source, store)
}

fn wait_for_report(reports: &Receiver<SessionReport>, location: LocationKey) -> SessionReport {
    let deadline = Instant::now() + WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let report = reports
            .recv_timeout(remaining)
            .expect("Timed out waiting for session report");
        if report.location == location {
            return report;
        }
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "Timed out waiting for condition");
        sleep(Duration::from_millis(1));
    }
}

#[test]
fn end_to_end_three_rounds() {
    let source = Arc::new(Scripted::new(vec![
        vec![ApReading::new("A", -40)],
        vec![],
        vec![ApReading::new("A", -50), ApReading::new("B", -60)],
    ]));
    let store = Arc::new(MemoryStore::default());
    let registry = registry(3, Duration::ZERO, source, store.clone());
    let reports = registry.subscribe();

    assert!(registry.start_scanning(1).expect("start"));
    let report = wait_for_report(&reports, 1);
    assert_eq!(
        report.outcome,
        SessionOutcome::Completed {
            access_points: 2,
            rounds: 3
        }
    );

    let records = store.for_location(1);
    let a = records.iter().find(|record| record.ap == "A").expect("A");
    let b = records.iter().find(|record| record.ap == "B").expect("B");
    assert_eq!(a.series, vec![-40, 0, -50]);
    assert_eq!(b.series, vec![0, 0, -60]);
    assert_eq!(a.display_name, "Unknown");
    assert!(!registry.active_locations().contains(&1));
}

#[test]
fn duplicate_start_is_ignored() {
    let store = Arc::new(MemoryStore::default());
    let calls = Arc::new(Rotating::default());
    let registry = registry(5, Duration::from_millis(20), calls.clone(), store.clone());
    let reports = registry.subscribe();

    assert!(registry.start_scanning(9).expect("first start"));
    assert!(!registry.start_scanning(9).expect("second start"));
    assert_eq!(registry.active_locations(), BTreeSet::from([9]));

    wait_for_report(&reports, 9);
    assert_eq!(calls.calls.load(Ordering::SeqCst), 5);
    let records = store.for_location(9);
    assert!(records.iter().all(|record| record.series.len() == 5));
    let aps = records.iter().map(|record| record.ap.as_str()).collect::<BTreeSet<_>>();
    assert_eq!(aps.len(), records.len());
}

#[test]
fn published_series_stay_aligned_with_round_count() {
    let store = Arc::new(MemoryStore::default());
    let registry = registry(
        30,
        Duration::from_millis(2),
        Arc::new(Rotating::default()),
        store,
    );
    let reports = registry.subscribe();
    registry.start_scanning(4).expect("start");

    let mut observed = 0;
    while registry.is_active(4) {
        let state = registry.live_state(4);
        for series in state.series.values() {
            assert_eq!(series.len(), state.rounds_completed);
        }
        observed += 1;
    }
    assert!(observed > 0);
    wait_for_report(&reports, 4);
}

#[test]
fn late_access_point_is_backfilled() {
    let mut rounds = vec![vec![ApReading::new("early", -45)]; 5];
    rounds.push(vec![
        ApReading::new("early", -46),
        ApReading::named("late", -72, "cafe"),
    ]);
    let store = Arc::new(MemoryStore::default());
    let registry = registry(100, Duration::from_millis(2), Arc::new(Scripted::new(rounds)), store);
    registry.start_scanning(5).expect("start");

    wait_until(|| registry.live_round_count(5) >= 6);
    let snapshot = registry.live_series_snapshot(5);
    registry.cancel_scanning(5);

    let late = &snapshot["late"];
    assert_eq!(&late[..6], &[0, 0, 0, 0, 0, -72]);
}

#[test]
fn cancel_mid_session_writes_nothing() {
    let store = Arc::new(MemoryStore::default());
    let registry = registry(
        100,
        Duration::from_millis(2),
        Arc::new(Rotating::default()),
        store.clone(),
    );
    let reports = registry.subscribe();
    registry.start_scanning(6).expect("start");

    wait_until(|| registry.live_round_count(6) >= 10);
    assert!(registry.cancel_scanning(6));
    assert!(!registry.active_locations().contains(&6));
    assert_eq!(registry.live_round_count(6), 0);

    let report = wait_for_report(&reports, 6);
    match report.outcome {
        SessionOutcome::Cancelled { rounds_completed } => {
            assert!((10..100).contains(&rounds_completed))
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(store.for_location(6).is_empty());
    assert!(!registry.cancel_scanning(6));
}

#[test]
fn round_count_is_monotonic_and_reaches_session_length() {
    let (store, release, _flushing) = GatedStore::new();
    let registry = registry(
        20,
        Duration::from_millis(1),
        Arc::new(Rotating::default()),
        store.clone(),
    );
    let reports = registry.subscribe();
    registry.start_scanning(7).expect("start");

    let mut samples = Vec::new();
    loop {
        let count = registry.live_round_count(7);
        samples.push(count);
        if count == 20 {
            break;
        }
        assert!(registry.is_active(7), "session ended before reaching 20 rounds");
    }
    assert!(samples.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(registry.is_active(7), "flush should still be pending");

    release.send(()).expect("release flush");
    let report = wait_for_report(&reports, 7);
    assert!(matches!(report.outcome, SessionOutcome::Completed { rounds: 20, .. }));
    assert!(!registry.is_active(7));
    assert!(!store.inner.for_location(7).is_empty());
}

#[test]
fn sampling_faults_do_not_abort_session() {
    let store = Arc::new(MemoryStore::default());
    let registry = registry(4, Duration::ZERO, Arc::new(Failing), store.clone());
    let reports = registry.subscribe();
    registry.start_scanning(8).expect("start");

    let report = wait_for_report(&reports, 8);
    assert_eq!(
        report.outcome,
        SessionOutcome::Completed {
            access_points: 0,
            rounds: 4
        }
    );
    assert!(store.for_location(8).is_empty());
}

#[test]
fn flush_failure_is_reported_and_isolated() {
    let good = Arc::new(MemoryStore::default());
    let source = Arc::new(Scripted::new(vec![
        vec![ApReading::new("A", -40)],
        vec![ApReading::new("A", -41)],
    ]));
    let registry = registry(2, Duration::ZERO, source.clone(), good.clone());
    let reports = registry.subscribe();

    registry
        .start_scanning_with(10, source, Arc::new(FailingStore))
        .expect("start failing");
    let failed = wait_for_report(&reports, 10);
    match failed.outcome {
        SessionOutcome::FlushFailed { error } => assert!(error.contains("database is locked")),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(!registry.is_active(10));

    let fresh = Arc::new(Scripted::new(vec![vec![ApReading::new("B", -55)]]));
    registry
        .start_scanning_with(11, fresh, good.clone())
        .expect("start good");
    let ok = wait_for_report(&reports, 11);
    assert!(matches!(ok.outcome, SessionOutcome::Completed { .. }));
    assert_eq!(good.for_location(11)[0].series, vec![-55, 0]);
}

#[test]
fn blocked_source_does_not_stall_other_locations() {
    let (release, gate): (Sender<()>, Receiver<()>) = mpsc::channel();
    let blocking = Arc::new(Blocking {
        release: Mutex::new(gate),
    });
    let store = Arc::new(MemoryStore::default());
    let registry = registry(
        3,
        Duration::ZERO,
        Arc::new(Rotating::default()),
        store.clone(),
    );
    let reports = registry.subscribe();

    registry
        .start_scanning_with(20, blocking, store.clone())
        .expect("start blocked");
    registry.start_scanning(21).expect("start free");

    let report = wait_for_report(&reports, 21);
    assert!(matches!(report.outcome, SessionOutcome::Completed { .. }));
    assert!(registry.is_active(20));
    assert_eq!(registry.live_round_count(20), 0);

    registry.cancel_scanning(20);
    drop(release);
    let report = wait_for_report(&reports, 20);
    assert!(matches!(report.outcome, SessionOutcome::Cancelled { .. }));
    assert!(store.for_location(20).is_empty());
}

#[test]
fn restart_after_cancel_runs_a_fresh_session() {
    let store = Arc::new(MemoryStore::default());
    let registry = registry(
        100,
        Duration::from_millis(2),
        Arc::new(Rotating::default()),
        store,
    );
    registry.start_scanning(30).expect("start");
    wait_until(|| registry.live_round_count(30) >= 3);

    registry.cancel_scanning(30);
    assert!(registry.start_scanning(30).expect("restart"));
    assert!(registry.live_round_count(30) < 3);

    sleep(Duration::from_millis(20));
    assert!(registry.is_active(30));
    registry.cancel_scanning(30);
}

#[test]
fn cancel_during_flush_waits_and_keeps_completion() {
    let (store, release, flushing) = GatedStore::new();
    let source = Arc::new(Scripted::new(vec![
        vec![ApReading::new("A", -40)],
        vec![ApReading::new("A", -41)],
        vec![ApReading::new("A", -42)],
    ]));
    let registry = registry(3, Duration::ZERO, source, store.clone());
    let reports = registry.subscribe();
    registry.start_scanning(40).expect("start");

    flushing.recv_timeout(WAIT).expect("flush never started");
    let (done, cancel_returned) = mpsc::channel();
    let canceller = {
        let registry = registry.clone();
        thread::spawn(move || {
            let stopped = registry.cancel_scanning(40);
            let _ = done.send(stopped);
        })
    };

    assert!(
        cancel_returned.recv_timeout(Duration::from_millis(150)).is_err(),
        "cancel returned while the flush was still running"
    );
    assert!(registry.is_active(40));
    assert!(store.inner.for_location(40).is_empty());

    release.send(()).expect("release flush");
    let stopped = cancel_returned.recv_timeout(WAIT).expect("cancel never returned");
    canceller.join().expect("canceller thread");
    assert!(!stopped, "a session that flushed was not stopped by cancel");

    assert!(!registry.is_active(40));
    let records = store.inner.for_location(40);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].series, vec![-40, -41, -42]);

    let report = wait_for_report(&reports, 40);
    assert_eq!(
        report.outcome,
        SessionOutcome::Completed {
            access_points: 1,
            rounds: 3
        }
    );
    assert!(reports.recv_timeout(Duration::from_millis(100)).is_err());
}
