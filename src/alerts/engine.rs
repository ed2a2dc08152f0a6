//! The alert rule engine.
//!
//! An alert check resolves the animal's profile, evaluates every rule
//! against the visit history, and persists the candidates that are not
//! duplicates of a recent alert. Evaluation finishes before anything is
//! written, and the surviving alerts go to the store in one batch: a check
//! that fails or runs out of time persists nothing.

use chrono::{DateTime, Duration, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::alerts::baseline::{baseline_weight, local_midnight};
use crate::alerts::rules::{self, RuleInput};
use crate::alerts::thresholds::Thresholds;
use crate::config::{Config, ThresholdOverrides};
use crate::core::{Alert, AlertCandidate, AlertType, AnimalProfile, MonitoringMode};
use crate::error::{LitterError, Result};
use crate::storage::{AlertStore, ProfileStore, StoreLocks, VisitStore};
use crate::util::Deadline;

/// Engine tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    /// An alert of the same type within this window suppresses a new one.
    pub dedup_window: Duration,
    /// Per-mode threshold overrides.
    pub overrides: ThresholdOverrides,
    /// Budget for the whole check.
    pub timeout: std::time::Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            dedup_window: Duration::hours(24),
            overrides: ThresholdOverrides::default(),
            timeout: std::time::Duration::from_secs(5),
        }
    }
}

impl EngineOptions {
    /// Options from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            dedup_window: Duration::hours(i64::from(config.alerts.dedup_hours)),
            overrides: config.alerts.thresholds.clone(),
            timeout: config.store_timeout(),
        }
    }
}

/// A rule that failed during evaluation. Its siblings still ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleError {
    pub alert_type: AlertType,
    pub message: String,
}

/// Result of one alert check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCheckSummary {
    /// Animal the check ran for.
    pub animal_id: String,
    /// Mode the thresholds came from.
    pub monitoring_mode: MonitoringMode,
    /// Alerts persisted by this check.
    pub created: Vec<Alert>,
    /// Number of alerts persisted.
    pub count: usize,
    /// Types suppressed because a recent alert of that type exists.
    pub skipped_duplicates: Vec<AlertType>,
    /// Rules that failed.
    pub rule_errors: Vec<RuleError>,
    /// Weight rules were skipped for lack of history.
    pub insufficient_history: bool,
    /// One-line outcome.
    pub message: String,
    /// When the check ran.
    pub checked_at: DateTime<Utc>,
}

/// Candidates from one evaluation, before dedup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    pub candidates: Vec<AlertCandidate>,
    pub rule_errors: Vec<RuleError>,
    pub insufficient_history: bool,
}

impl Evaluation {
    fn record(&mut self, alert_type: AlertType, outcome: Result<Option<AlertCandidate>>) {
        match outcome {
            Ok(Some(candidate)) => {
                tracing::debug!(%alert_type, "rule fired");
                self.candidates.push(candidate);
            }
            Ok(None) => {}
            Err(e) => self.fail(alert_type, &e),
        }
    }

    fn fail(&mut self, alert_type: AlertType, err: &LitterError) {
        tracing::warn!(%alert_type, error = %err, "rule failed, continuing with the rest");
        self.rule_errors.push(RuleError {
            alert_type,
            message: err.to_string(),
        });
    }
}

/// Lock key serializing dedup-then-insert for one animal and alert type.
fn alert_lock_key(animal_id: &str, alert_type: AlertType) -> String {
    format!("alert:{}:{}", animal_id, alert_type)
}

/// Evaluates alert rules for one animal.
#[derive(Debug)]
pub struct AlertEngine<S> {
    store: S,
    options: EngineOptions,
}

impl<S: VisitStore + AlertStore + ProfileStore + StoreLocks> AlertEngine<S> {
    /// Create an engine over `store`.
    pub fn new(store: S, options: EngineOptions) -> Self {
        Self { store, options }
    }

    /// Run a check now, with "today" in the local timezone.
    pub fn run(&self, animal_id: Option<&str>) -> Result<AlertCheckSummary> {
        self.run_at(animal_id, Utc::now(), &Local)
    }

    /// Run a check at `now`, with "today" starting at midnight in `tz`.
    ///
    /// `animal_id = None` checks the first profile, creating the default
    /// profile if none exists.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown animal id.
    /// - `Timeout` when the check overran its budget before persisting.
    /// - `Storage` when the alert store could not be written; no alert from
    ///   this check is stored.
    pub fn run_at<Tz: TimeZone>(
        &self,
        animal_id: Option<&str>,
        now: DateTime<Utc>,
        tz: &Tz,
    ) -> Result<AlertCheckSummary> {
        let deadline = Deadline::after(self.options.timeout);
        let profile = self.store.resolve_profile(animal_id)?;
        deadline.check("load profile")?;

        let evaluation = self.evaluate(&profile, now, tz, &deadline)?;

        // Every rule has run; persist or write nothing.
        deadline.check("persist alerts")?;
        let (created, skipped_duplicates) =
            self.persist(&profile.id, evaluation.candidates, now, &deadline)?;

        let count = created.len();
        tracing::info!(
            animal_id = %profile.id,
            created = count,
            duplicates = skipped_duplicates.len(),
            errors = evaluation.rule_errors.len(),
            "alert check complete"
        );

        Ok(AlertCheckSummary {
            animal_id: profile.id.clone(),
            monitoring_mode: profile.monitoring_mode,
            created,
            count,
            skipped_duplicates,
            rule_errors: evaluation.rule_errors,
            insufficient_history: evaluation.insufficient_history,
            message: format!(
                "Generated {} new alert{}",
                count,
                if count == 1 { "" } else { "s" }
            ),
            checked_at: now,
        })
    }

    /// Evaluate every rule for `profile` without writing anything.
    pub fn evaluate<Tz: TimeZone>(
        &self,
        profile: &AnimalProfile,
        now: DateTime<Utc>,
        tz: &Tz,
        deadline: &Deadline,
    ) -> Result<Evaluation> {
        let input = RuleInput {
            now,
            today_start: local_midnight(now, tz),
            thresholds: Thresholds::resolve(profile.monitoring_mode, &self.options.overrides),
            animal_name: profile.display_name(),
        };
        let mut evaluation = Evaluation::default();

        deadline.check("weight baseline")?;
        match baseline_weight(&self.store, now) {
            Ok(Some(baseline)) => {
                deadline.check("weight_urgent")?;
                evaluation.record(
                    AlertType::WeightUrgent,
                    rules::weight_urgent(&self.store, &input, baseline),
                );
                deadline.check("weight_trend")?;
                evaluation.record(
                    AlertType::WeightTrend,
                    rules::weight_trend(&self.store, &input, baseline),
                );
                deadline.check("weight_gain")?;
                evaluation.record(
                    AlertType::WeightGain,
                    rules::weight_gain(&self.store, &input, baseline),
                );
            }
            Ok(None) => evaluation.insufficient_history = true,
            Err(e) => {
                for alert_type in [AlertType::WeightUrgent, AlertType::WeightTrend, AlertType::WeightGain] {
                    evaluation.fail(alert_type, &e);
                }
            }
        }

        // An empty log means a fresh install, not an inactive animal.
        deadline.check("visit history")?;
        match self.store.latest_created_visit() {
            Ok(None) => {
                tracing::debug!("no visits recorded, skipping frequency rules");
                evaluation.insufficient_history = true;
            }
            Ok(Some(_)) => {
                deadline.check("frequency_critical")?;
                evaluation.record(
                    AlertType::FrequencyCritical,
                    rules::frequency_critical(&self.store, &input),
                );
                deadline.check("frequency_high")?;
                evaluation.record(
                    AlertType::FrequencyHigh,
                    rules::frequency_high(&self.store, &input),
                );
                deadline.check("frequency_low")?;
                evaluation.record(
                    AlertType::FrequencyLow,
                    rules::frequency_low(&self.store, &input),
                );
            }
            Err(e) => {
                for alert_type in [
                    AlertType::FrequencyCritical,
                    AlertType::FrequencyHigh,
                    AlertType::FrequencyLow,
                ] {
                    evaluation.fail(alert_type, &e);
                }
            }
        }

        Ok(evaluation)
    }

    /// Insert the candidates that have no recent alert of the same type.
    ///
    /// Holds every `(animal, type)` lock involved, in key order, across all
    /// dedup lookups and the single batch insert. Returns the alerts
    /// written and the types skipped as duplicates.
    fn persist(
        &self,
        animal_id: &str,
        candidates: Vec<AlertCandidate>,
        now: DateTime<Utc>,
        deadline: &Deadline,
    ) -> Result<(Vec<Alert>, Vec<AlertType>)> {
        let mut keys: Vec<String> = candidates
            .iter()
            .map(|c| alert_lock_key(animal_id, c.alert_type))
            .collect();
        keys.sort();
        keys.dedup();
        let _guards = keys
            .iter()
            .map(|key| self.store.locks().acquire(key, deadline.remaining()))
            .collect::<Result<Vec<_>>>()?;

        let since = now - self.options.dedup_window;
        let mut fresh = Vec::new();
        let mut skipped = Vec::new();
        for candidate in candidates {
            if let Some(existing) =
                self.store
                    .find_recent_alert(Some(animal_id), candidate.alert_type, since)?
            {
                tracing::debug!(
                    alert_type = %candidate.alert_type,
                    existing = %existing.id,
                    "duplicate alert suppressed"
                );
                skipped.push(candidate.alert_type);
                continue;
            }
            fresh.push(candidate.into_alert(Some(animal_id.to_string()), now));
        }

        deadline.check("insert alerts")?;
        if !fresh.is_empty() {
            self.store.insert_alerts(&fresh)?;
        }
        for alert in &fresh {
            tracing::info!(
                alert_id = %alert.id,
                alert_type = %alert.alert_type,
                severity = %alert.severity,
                "raised alert"
            );
        }
        Ok((fresh, skipped))
    }
}
