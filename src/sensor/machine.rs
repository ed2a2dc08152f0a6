//! The sensor-event state machine.
//!
//! One cycle reads the stored sensor state, compares it with a poll's
//! status, and decides whether a visit just completed. Cycles for the same
//! sensor key are serialized through the store's lock registry, and every
//! write is staged until all reads and decisions are done, so a cycle that
//! runs out of time writes nothing.
//!
//! The new state is committed before the visit. If the visit insert fails,
//! the previous state is written back so the next poll sees the same
//! transition and retries; a failed state write records no visit at all.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::core::{visit_completed, SensorState, Visit, DEFAULT_SENSOR_ID};
use crate::error::{LitterError, Result};
use crate::sensor::source::{ReadingSource, Readings};
use crate::storage::{SensorStateStore, StoreLocks, VisitStore};
use crate::util::Deadline;

/// Tunables for one sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    /// Key of the sensor state record.
    pub sensor_id: String,
    /// Live weight above which the reading counts as the animal's weight.
    pub presence_threshold: f64,
    /// A visit created this recently suppresses a new one.
    pub duplicate_guard: Duration,
    /// Budget for the whole cycle, lock wait included.
    pub timeout: std::time::Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            sensor_id: DEFAULT_SENSOR_ID.to_string(),
            presence_threshold: 1.0,
            duplicate_guard: Duration::seconds(30),
            timeout: std::time::Duration::from_secs(5),
        }
    }
}

impl SyncOptions {
    /// Options from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            sensor_id: config.sensor.sensor_id.clone(),
            presence_threshold: config.sensor.presence_threshold,
            duplicate_guard: Duration::seconds(i64::from(config.sensor.duplicate_guard_seconds)),
            timeout: config.store_timeout(),
        }
    }
}

/// What a sync cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    /// The stored status (and maybe weight) changed.
    StateUpdated,
    /// A completed visit was recorded.
    VisitCreated,
    /// A completed visit was suppressed by the duplicate guard.
    DuplicateIgnored,
    /// Nothing changed.
    NoOp,
}

impl SyncAction {
    /// Get the action as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StateUpdated => "state_updated",
            Self::VisitCreated => "visit_created",
            Self::DuplicateIgnored => "duplicate_ignored",
            Self::NoOp => "no_op",
        }
    }
}

/// Result of one sync cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSummary {
    /// Sensor key the cycle ran for.
    pub sensor_id: String,
    /// Readings the decision was made on.
    pub fetched: Readings,
    /// Status stored before this cycle.
    pub previous_status: String,
    /// Whether the status change completes a visit.
    pub visit_completed: bool,
    /// Actions taken, in order.
    pub actions: Vec<SyncAction>,
    /// The visit created, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visit: Option<Visit>,
    /// When the cycle ran.
    pub ran_at: DateTime<Utc>,
}

impl SyncSummary {
    /// Whether the cycle wrote the sensor state.
    pub fn state_updated(&self) -> bool {
        self.actions.contains(&SyncAction::StateUpdated)
    }

    /// Whether the cycle changed nothing.
    pub fn is_no_op(&self) -> bool {
        self.actions == [SyncAction::NoOp]
    }
}

/// Lock key serializing cycles for one sensor.
fn sensor_lock_key(sensor_id: &str) -> String {
    format!("sensor:{}", sensor_id)
}

/// Turns polls into visits for one sensor.
#[derive(Debug)]
pub struct SensorEventMachine<S> {
    store: S,
    options: SyncOptions,
}

impl<S: SensorStateStore + VisitStore + StoreLocks> SensorEventMachine<S> {
    /// Create a machine over `store`.
    pub fn new(store: S, options: SyncOptions) -> Self {
        Self { store, options }
    }

    /// Poll `source` and run one cycle now.
    pub fn run(&self, source: &dyn ReadingSource, credential: Option<&str>) -> Result<SyncSummary> {
        self.run_at(source, credential, Utc::now())
    }

    /// Poll `source` and run one cycle at `now`.
    ///
    /// # Errors
    ///
    /// - `MissingConfig` when no credential is configured.
    /// - `Upstream` when every channel failed; nothing is written.
    /// - `Timeout` or `Storage` when the store could not be reached in time;
    ///   nothing is written.
    pub fn run_at(
        &self,
        source: &dyn ReadingSource,
        credential: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SyncSummary> {
        let credential = credential
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| LitterError::missing_config("sensor.credential (LITTERWATCH_SENSOR_TOKEN)"))?;

        let readings = source.poll(credential)?;
        if readings.is_degraded() {
            tracing::debug!(
                failed = readings.failed_channels.len(),
                "poll degraded, continuing with neutral values"
            );
        }
        self.apply(readings, now)
    }

    /// Run one cycle on readings already in hand.
    pub fn apply(&self, readings: Readings, now: DateTime<Utc>) -> Result<SyncSummary> {
        let deadline = Deadline::after(self.options.timeout);
        let sensor_id = self.options.sensor_id.as_str();
        let _guard = self
            .store
            .locks()
            .acquire(&sensor_lock_key(sensor_id), deadline.remaining())?;

        let stored = self.store.load_state(sensor_id)?;
        deadline.check("load sensor state")?;
        let is_new = stored.is_none();
        let state = stored.unwrap_or_else(|| SensorState::new(sensor_id, now));

        let fired = visit_completed(&state.last_status, &readings.status);
        tracing::debug!(
            sensor_id,
            previous = %state.last_status,
            current = %readings.status,
            fired,
            "evaluated status transition"
        );

        let mut actions = Vec::new();
        let mut staged_visit = None;

        if fired {
            let latest = self.store.latest_created_visit()?;
            deadline.check("duplicate guard")?;

            let duplicate = latest
                .as_ref()
                .is_some_and(|v| now.signed_duration_since(v.created_at) < self.options.duplicate_guard);

            if duplicate {
                tracing::debug!(sensor_id, "visit within guard window, ignoring");
                actions.push(SyncAction::DuplicateIgnored);
            } else {
                let weight = if readings.weight > self.options.presence_threshold {
                    readings.weight
                } else {
                    state.last_weight
                };
                let mut visit = Visit::new(now, weight);
                if readings.duration_seconds > 0 {
                    visit = visit.with_duration(readings.duration_seconds);
                }
                staged_visit = Some(visit);
            }
        }

        let staged_state = if is_new || readings.status != state.last_status {
            let mut next = state.clone();
            next.last_status = readings.status.clone();
            if readings.weight > self.options.presence_threshold {
                next.last_weight = readings.weight;
            }
            next.updated_at = now;
            Some(next)
        } else {
            None
        };

        // Nothing has been written yet; bail out cleanly if the budget is gone.
        deadline.check("commit")?;

        if let Some(next) = &staged_state {
            self.store.save_state(next)?;
            tracing::info!(sensor_id, status = %next.last_status, "updated sensor state");
            actions.push(SyncAction::StateUpdated);
        }

        if let Some(visit) = &staged_visit {
            if let Err(e) = self.store.insert_visit(visit) {
                if staged_state.is_some() && !is_new {
                    self.restore_state(&state);
                }
                return Err(e);
            }
            tracing::info!(
                sensor_id,
                visit_id = %visit.id,
                weight = visit.weight_in,
                "recorded visit"
            );
            actions.push(SyncAction::VisitCreated);
        }

        if actions.is_empty() {
            actions.push(SyncAction::NoOp);
        }

        Ok(SyncSummary {
            sensor_id: sensor_id.to_string(),
            fetched: readings,
            previous_status: state.last_status,
            visit_completed: fired,
            actions,
            visit: staged_visit,
            ran_at: now,
        })
    }

    /// Put `previous` back after a failed visit insert.
    fn restore_state(&self, previous: &SensorState) {
        match self.store.save_state(previous) {
            Ok(()) => tracing::warn!(
                sensor_id = %previous.sensor_id,
                status = %previous.last_status,
                "visit insert failed, restored previous sensor state"
            ),
            Err(e) => tracing::error!(
                sensor_id = %previous.sensor_id,
                error = %e,
                "visit insert failed and the previous sensor state could not be restored"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::KeyedLocks;
    use crate::sensor::source::{Channel, StaticReadingSource};
    use crate::storage::{MemoryStore, TimeRange};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn machine() -> (SensorEventMachine<Arc<MemoryStore>>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let machine = SensorEventMachine::new(Arc::clone(&store), SyncOptions::default());
        (machine, store)
    }

    fn seed_state(store: &MemoryStore, status: &str, weight: f64, now: DateTime<Utc>) {
        let mut state = SensorState::new(DEFAULT_SENSOR_ID, now - Duration::minutes(5));
        state.last_status = status.to_string();
        state.last_weight = weight;
        store.save_state(&state).unwrap();
    }

    fn readings(weight: f64, status: &str, duration: u32) -> Readings {
        StaticReadingSource::new(weight, status, "Normal", duration)
            .poll("token")
            .unwrap()
    }

    #[test]
    fn test_exit_after_inside_creates_visit() {
        let (machine, store) = machine();
        let now = Utc::now();
        seed_state(&store, "Cat Inside", 4.8, now);

        let summary = machine.apply(readings(0.2, "Cat Exited", 75), now).unwrap();

        assert!(summary.visit_completed);
        assert_eq!(
            summary.actions,
            vec![SyncAction::StateUpdated, SyncAction::VisitCreated]
        );
        let visit = summary.visit.unwrap();
        assert_eq!(visit.entry_time, now);
        assert!((visit.weight_in - 4.8).abs() < f64::EPSILON);
        assert_eq!(visit.duration_seconds, Some(75));
        assert_eq!(store.visit_count(), 1);

        let state = store.load_state(DEFAULT_SENSOR_ID).unwrap().unwrap();
        assert_eq!(state.last_status, "Cat Exited");
        // Live weight was below the presence threshold.
        assert!((state.last_weight - 4.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_live_weight_used_when_present() {
        let (machine, store) = machine();
        let now = Utc::now();
        seed_state(&store, "Cat Entered", 4.0, now);

        let summary = machine.apply(readings(4.6, "", 0), now).unwrap();
        let visit = summary.visit.unwrap();
        assert!((visit.weight_in - 4.6).abs() < f64::EPSILON);
        assert_eq!(visit.duration_seconds, None);

        let state = store.load_state(DEFAULT_SENSOR_ID).unwrap().unwrap();
        assert!((state.last_weight - 4.6).abs() < f64::EPSILON);
    }

    #[test]
    fn test_entering_updates_state_only() {
        let (machine, store) = machine();
        let now = Utc::now();
        seed_state(&store, "Cat Exited", 4.0, now);

        let summary = machine.apply(readings(4.7, "Cat Inside", 0), now).unwrap();
        assert!(!summary.visit_completed);
        assert_eq!(summary.actions, vec![SyncAction::StateUpdated]);
        assert_eq!(store.visit_count(), 0);

        let state = store.load_state(DEFAULT_SENSOR_ID).unwrap().unwrap();
        assert_eq!(state.last_status, "Cat Inside");
        assert!((state.last_weight - 4.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unchanged_status_is_no_op() {
        let (machine, store) = machine();
        let now = Utc::now();
        seed_state(&store, "Cat Inside", 4.0, now);

        let summary = machine.apply(readings(4.9, "Cat Inside", 0), now).unwrap();
        assert!(summary.is_no_op());
        assert!(!summary.state_updated());
        let state = store.load_state(DEFAULT_SENSOR_ID).unwrap().unwrap();
        assert!((state.last_weight - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_first_poll_creates_state() {
        let (machine, store) = machine();
        let now = Utc::now();

        let summary = machine.apply(readings(0.0, "", 0), now).unwrap();
        assert!(!summary.visit_completed);
        assert_eq!(summary.actions, vec![SyncAction::StateUpdated]);
        assert!(store.load_state(DEFAULT_SENSOR_ID).unwrap().is_some());
    }

    #[test]
    fn test_duplicate_within_guard_window() {
        let (machine, store) = machine();
        let now = Utc::now();

        seed_state(&store, "Cat Inside", 4.8, now);
        machine.apply(readings(0.0, "Cat Exited", 60), now).unwrap();

        // A stale poll replays the same transition 10 seconds later.
        seed_state(&store, "Cat Inside", 4.8, now);
        let summary = machine
            .apply(readings(0.0, "Cat Exited", 60), now + Duration::seconds(10))
            .unwrap();

        assert!(summary.visit_completed);
        assert!(summary.actions.contains(&SyncAction::DuplicateIgnored));
        assert!(summary.visit.is_none());
        assert_eq!(store.visit_count(), 1);
    }

    #[test]
    fn test_visit_after_guard_window() {
        let (machine, store) = machine();
        let now = Utc::now();

        seed_state(&store, "Cat Inside", 4.8, now);
        machine.apply(readings(0.0, "Cat Exited", 60), now).unwrap();

        seed_state(&store, "Cat Inside", 4.8, now);
        machine
            .apply(readings(0.0, "Cat Exited", 60), now + Duration::seconds(31))
            .unwrap();
        assert_eq!(store.visit_count(), 2);
    }

    #[test]
    fn test_concurrent_polls_create_one_visit() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        seed_state(&store, "Cat Inside", 4.8, now);
        let machine = Arc::new(SensorEventMachine::new(
            Arc::clone(&store),
            SyncOptions::default(),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let machine = Arc::clone(&machine);
                thread::spawn(move || machine.apply(readings(0.0, "Cat Exited", 30), now).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.find_visits(&TimeRange::all()).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_credential() {
        let (machine, store) = machine();
        let source = StaticReadingSource::new(4.0, "Cat Inside", "", 0);

        for credential in [None, Some(""), Some("   ")] {
            let err = machine.run(&source, credential).unwrap_err();
            assert!(matches!(err, LitterError::MissingConfig { .. }));
            assert!(!err.is_retryable());
        }
        assert!(store.load_state(DEFAULT_SENSOR_ID).unwrap().is_none());
    }

    #[test]
    fn test_unreachable_source_changes_nothing() {
        let (machine, store) = machine();
        let now = Utc::now();
        seed_state(&store, "Cat Inside", 4.8, now);
        let before = store.load_state(DEFAULT_SENSOR_ID).unwrap();

        let err = machine
            .run_at(&StaticReadingSource::unreachable(), Some("token"), now)
            .unwrap_err();
        assert!(matches!(err, LitterError::Upstream { .. }));
        assert_eq!(store.load_state(DEFAULT_SENSOR_ID).unwrap(), before);
        assert_eq!(store.visit_count(), 0);
    }

    #[test]
    fn test_partial_failure_still_syncs() {
        let (machine, store) = machine();
        let now = Utc::now();
        seed_state(&store, "Cat Inside", 4.8, now);

        let source = StaticReadingSource::new(4.5, "Cat Exited", "Normal", 40)
            .with_failed(Channel::Weight)
            .with_failed(Channel::Usage);
        let summary = machine.run_at(&source, Some("token"), now).unwrap();

        assert_eq!(summary.fetched.failed_channels.len(), 2);
        let visit = summary.visit.unwrap();
        // Weight channel failed, so the stored weight is used.
        assert!((visit.weight_in - 4.8).abs() < f64::EPSILON);
        assert_eq!(store.visit_count(), 1);
    }

    #[test]
    fn test_held_lock_times_out_without_writes() {
        let store = Arc::new(MemoryStore::new());
        let options = SyncOptions {
            timeout: std::time::Duration::from_millis(20),
            ..SyncOptions::default()
        };
        let machine = SensorEventMachine::new(Arc::clone(&store), options);
        let now = Utc::now();
        seed_state(&store, "Cat Inside", 4.8, now);

        let _held = store
            .locks()
            .acquire(
                &sensor_lock_key(DEFAULT_SENSOR_ID),
                std::time::Duration::from_millis(10),
            )
            .unwrap();
        let err = machine.apply(readings(0.0, "Cat Exited", 0), now).unwrap_err();

        assert!(matches!(err, LitterError::Timeout { .. }));
        assert!(err.is_retryable());
        assert_eq!(store.visit_count(), 0);
        assert_eq!(
            store.load_state(DEFAULT_SENSOR_ID).unwrap().unwrap().last_status,
            "Cat Inside"
        );
    }

    /// Memory store with injectable write failures and a slow duplicate-guard read.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        failing_state_saves: AtomicUsize,
        failing_visit_inserts: AtomicUsize,
        guard_read_delay: std::time::Duration,
    }

    /// Consume one pending failure, if any.
    fn take_failure(pending: &AtomicUsize) -> bool {
        pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    impl StoreLocks for FlakyStore {
        fn locks(&self) -> &KeyedLocks {
            self.inner.locks()
        }
    }

    impl SensorStateStore for FlakyStore {
        fn load_state(&self, sensor_id: &str) -> Result<Option<SensorState>> {
            self.inner.load_state(sensor_id)
        }
        fn save_state(&self, state: &SensorState) -> Result<()> {
            if take_failure(&self.failing_state_saves) {
                return Err(LitterError::storage(
                    "state",
                    std::io::Error::other("disk full"),
                ));
            }
            self.inner.save_state(state)
        }
    }

    impl VisitStore for FlakyStore {
        fn insert_visit(&self, visit: &Visit) -> Result<()> {
            if take_failure(&self.failing_visit_inserts) {
                return Err(LitterError::storage(
                    "visits.jsonl",
                    std::io::Error::other("disk full"),
                ));
            }
            self.inner.insert_visit(visit)
        }
        fn find_visits(&self, range: &TimeRange) -> Result<Vec<Visit>> {
            self.inner.find_visits(range)
        }
        fn latest_created_visit(&self) -> Result<Option<Visit>> {
            thread::sleep(self.guard_read_delay);
            self.inner.latest_created_visit()
        }
        fn oldest_visit(&self) -> Result<Option<Visit>> {
            self.inner.oldest_visit()
        }
        fn clear_visits(&self) -> Result<usize> {
            self.inner.clear_visits()
        }
    }

    #[test]
    fn test_separate_machines_over_one_store_create_one_visit() {
        let store = Arc::new(FlakyStore {
            guard_read_delay: std::time::Duration::from_millis(50),
            ..FlakyStore::default()
        });
        let now = Utc::now();
        seed_state(&store.inner, "Cat Inside", 4.8, now);

        // Each thread builds its own machine, like two overlapping runs.
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    SensorEventMachine::new(store, SyncOptions::default())
                        .apply(readings(0.0, "Cat Exited", 30), now)
                        .unwrap()
                })
            })
            .collect();
        let created = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|summary| summary.visit.is_some())
            .count();

        assert_eq!(created, 1);
        assert_eq!(store.inner.visit_count(), 1);
    }

    #[test]
    fn test_failed_state_write_records_no_visit() {
        let store = Arc::new(FlakyStore::default());
        let machine = SensorEventMachine::new(Arc::clone(&store), SyncOptions::default());
        let now = Utc::now();
        seed_state(&store.inner, "Cat Inside", 4.8, now);
        store.failing_state_saves.store(1, Ordering::SeqCst);

        let err = machine.apply(readings(0.0, "Cat Exited", 60), now).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.inner.visit_count(), 0);

        // The next scheduled poll, well past the duplicate guard.
        let retry = machine
            .apply(readings(0.0, "Cat Exited", 60), now + Duration::seconds(60))
            .unwrap();
        assert_eq!(
            retry.actions,
            vec![SyncAction::StateUpdated, SyncAction::VisitCreated]
        );

        let again = machine
            .apply(readings(0.0, "Cat Exited", 60), now + Duration::seconds(120))
            .unwrap();
        assert!(again.is_no_op());
        assert_eq!(store.inner.visit_count(), 1);
    }

    #[test]
    fn test_failed_visit_insert_restores_state() {
        let store = Arc::new(FlakyStore::default());
        let machine = SensorEventMachine::new(Arc::clone(&store), SyncOptions::default());
        let now = Utc::now();
        seed_state(&store.inner, "Cat Inside", 4.8, now);
        store.failing_visit_inserts.store(1, Ordering::SeqCst);

        assert!(machine.apply(readings(0.0, "Cat Exited", 60), now).is_err());
        let state = store.inner.load_state(DEFAULT_SENSOR_ID).unwrap().unwrap();
        assert_eq!(state.last_status, "Cat Inside");
        assert_eq!(store.inner.visit_count(), 0);

        let retry = machine
            .apply(readings(0.0, "Cat Exited", 60), now + Duration::seconds(60))
            .unwrap();
        assert!(retry.visit.is_some());
        assert_eq!(store.inner.visit_count(), 1);
    }

    #[test]
    fn test_options_from_config() {
        let mut config = Config::default();
        config.sensor.sensor_id = "box-9".to_string();
        config.sensor.duplicate_guard_seconds = 90;
        config.store.timeout_ms = 1_500;

        let options = SyncOptions::from_config(&config);
        assert_eq!(options.sensor_id, "box-9");
        assert_eq!(options.duplicate_guard, Duration::seconds(90));
        assert_eq!(options.timeout, std::time::Duration::from_millis(1_500));
    }
}
