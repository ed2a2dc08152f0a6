//! Storage traits for litterwatch.
//!
//! Four narrow traits cover the persistent store contract: a keyed
//! single-record store for sensor state, an append-only visit log, an alert
//! store, and a profile store. Backends implement all four, plus
//! [`StoreLocks`] for the exclusive sections cycles run under.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::core::{Alert, AlertType, AnimalProfile, SensorState, Severity, Visit};
use crate::error::Result;
use crate::lock::KeyedLocks;

/// Inclusive time range filter. Open ends are unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// Range `[start, end]`.
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Range `[start, ∞)`.
    pub fn since(start: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    /// Unbounded range.
    pub fn all() -> Self {
        Self::default()
    }

    /// Whether `ts` falls inside the range.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.is_none_or(|s| ts >= s) && self.end.is_none_or(|e| ts <= e)
    }
}

/// Lock registry shared by everyone using the same store.
///
/// Cycles take their single-flight locks here rather than from a registry
/// of their own, so two engines or machines over one store (or, for the
/// file store, two processes over one data directory) exclude each other.
pub trait StoreLocks: Send + Sync {
    fn locks(&self) -> &KeyedLocks;
}

/// Singleton sensor state, addressed by sensor key.
pub trait SensorStateStore: Send + Sync {
    /// Load the state for a sensor. `Ok(None)` before the first poll.
    fn load_state(&self, sensor_id: &str) -> Result<Option<SensorState>>;

    /// Create or replace the state for `state.sensor_id`.
    fn save_state(&self, state: &SensorState) -> Result<()>;
}

/// Append-only visit log.
pub trait VisitStore: Send + Sync {
    /// Append a visit.
    fn insert_visit(&self, visit: &Visit) -> Result<()>;

    /// Visits whose `entry_time` falls in `range`, oldest first.
    fn find_visits(&self, range: &TimeRange) -> Result<Vec<Visit>>;

    /// The visit with the latest `created_at`.
    fn latest_created_visit(&self) -> Result<Option<Visit>>;

    /// The visit with the earliest `entry_time`.
    fn oldest_visit(&self) -> Result<Option<Visit>>;

    /// Number of visits whose `entry_time` falls in `range`.
    fn count_visits(&self, range: &TimeRange) -> Result<usize> {
        Ok(self.find_visits(range)?.len())
    }

    /// Up to `limit` visits, newest `entry_time` first.
    fn recent_visits(&self, limit: usize) -> Result<Vec<Visit>> {
        let mut visits = self.find_visits(&TimeRange::all())?;
        visits.reverse();
        visits.truncate(limit);
        Ok(visits)
    }

    /// Delete every visit. Seed and debug tooling only.
    fn clear_visits(&self) -> Result<usize>;
}

/// Filter for alert listings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertQuery {
    /// Only alerts for this animal.
    pub animal_id: Option<String>,
    /// Only unread, undismissed alerts.
    pub active_only: bool,
    /// Maximum number of results.
    pub limit: Option<usize>,
}

/// Counts for the alert dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AlertCounts {
    pub total: usize,
    pub active: usize,
    pub critical: usize,
    pub warning: usize,
    pub info: usize,
}

/// Alert storage.
pub trait AlertStore: Send + Sync {
    /// Persist a batch of new alerts in one write: all of them or none.
    fn insert_alerts(&self, alerts: &[Alert]) -> Result<()>;

    /// Persist a new alert.
    fn insert_alert(&self, alert: &Alert) -> Result<()> {
        self.insert_alerts(std::slice::from_ref(alert))
    }

    /// Most recent alert of `alert_type` for `animal_id` created at or after `since`.
    fn find_recent_alert(
        &self,
        animal_id: Option<&str>,
        alert_type: AlertType,
        since: DateTime<Utc>,
    ) -> Result<Option<Alert>>;

    /// Every stored alert, in insertion order.
    fn all_alerts(&self) -> Result<Vec<Alert>>;

    /// Look up one alert.
    fn get_alert(&self, id: &str) -> Result<Option<Alert>>;

    /// Set the read/dismissed flags. `Ok(None)` if the id is unknown.
    fn set_alert_flags(
        &self,
        id: &str,
        is_read: Option<bool>,
        is_dismissed: Option<bool>,
    ) -> Result<Option<Alert>>;

    /// Alerts matching `query`.
    ///
    /// Active listings sort by severity (critical first) then newest; other
    /// listings sort newest first.
    fn list_alerts(&self, query: &AlertQuery) -> Result<Vec<Alert>> {
        let mut alerts: Vec<Alert> = self
            .all_alerts()?
            .into_iter()
            .filter(|a| {
                query
                    .animal_id
                    .as_deref()
                    .is_none_or(|id| a.animal_id.as_deref() == Some(id))
            })
            .filter(|a| !query.active_only || a.is_active())
            .collect();

        if query.active_only {
            alerts.sort_by(|a, b| {
                b.severity
                    .cmp(&a.severity)
                    .then_with(|| b.created_at.cmp(&a.created_at))
            });
        } else {
            alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        }

        if let Some(limit) = query.limit {
            alerts.truncate(limit);
        }
        Ok(alerts)
    }

    /// Dashboard counts. Severity counts exclude dismissed alerts.
    fn alert_counts(&self, animal_id: Option<&str>) -> Result<AlertCounts> {
        let mut counts = AlertCounts::default();
        for alert in self.all_alerts()? {
            if animal_id.is_some_and(|id| alert.animal_id.as_deref() != Some(id)) {
                continue;
            }
            counts.total += 1;
            if alert.is_active() {
                counts.active += 1;
            }
            if alert.is_dismissed {
                continue;
            }
            match alert.severity {
                Severity::Critical => counts.critical += 1,
                Severity::Warning => counts.warning += 1,
                Severity::Info => counts.info += 1,
            }
        }
        Ok(counts)
    }
}

/// Animal profile storage.
pub trait ProfileStore: Send + Sync {
    /// Look up a profile by id, or the first profile when `id` is `None`.
    fn get_profile(&self, id: Option<&str>) -> Result<Option<AnimalProfile>>;

    /// Create or replace a profile.
    fn put_profile(&self, profile: &AnimalProfile) -> Result<()>;

    /// All profiles, oldest first.
    fn list_profiles(&self) -> Result<Vec<AnimalProfile>>;

    /// Look up a profile, creating the default profile when `id` is `None`
    /// and none exists.
    ///
    /// # Errors
    ///
    /// `NotFound` when `id` names no profile.
    fn resolve_profile(&self, id: Option<&str>) -> Result<AnimalProfile> {
        if let Some(id) = id {
            return self
                .get_profile(Some(id))?
                .ok_or_else(|| crate::error::LitterError::not_found("profile", id));
        }
        if let Some(profile) = self.get_profile(None)? {
            return Ok(profile);
        }

        let profile = AnimalProfile::default();
        self.put_profile(&profile)?;
        tracing::info!(animal_id = %profile.id, "created default profile");
        Ok(profile)
    }
}

impl<T: StoreLocks + ?Sized> StoreLocks for Arc<T> {
    fn locks(&self) -> &KeyedLocks {
        (**self).locks()
    }
}

impl<T: SensorStateStore + ?Sized> SensorStateStore for Arc<T> {
    fn load_state(&self, sensor_id: &str) -> Result<Option<SensorState>> {
        (**self).load_state(sensor_id)
    }

    fn save_state(&self, state: &SensorState) -> Result<()> {
        (**self).save_state(state)
    }
}

impl<T: VisitStore + ?Sized> VisitStore for Arc<T> {
    fn insert_visit(&self, visit: &Visit) -> Result<()> {
        (**self).insert_visit(visit)
    }

    fn find_visits(&self, range: &TimeRange) -> Result<Vec<Visit>> {
        (**self).find_visits(range)
    }

    fn latest_created_visit(&self) -> Result<Option<Visit>> {
        (**self).latest_created_visit()
    }

    fn oldest_visit(&self) -> Result<Option<Visit>> {
        (**self).oldest_visit()
    }

    fn count_visits(&self, range: &TimeRange) -> Result<usize> {
        (**self).count_visits(range)
    }

    fn clear_visits(&self) -> Result<usize> {
        (**self).clear_visits()
    }
}

impl<T: AlertStore + ?Sized> AlertStore for Arc<T> {
    fn insert_alerts(&self, alerts: &[Alert]) -> Result<()> {
        (**self).insert_alerts(alerts)
    }

    fn find_recent_alert(
        &self,
        animal_id: Option<&str>,
        alert_type: AlertType,
        since: DateTime<Utc>,
    ) -> Result<Option<Alert>> {
        (**self).find_recent_alert(animal_id, alert_type, since)
    }

    fn all_alerts(&self) -> Result<Vec<Alert>> {
        (**self).all_alerts()
    }

    fn get_alert(&self, id: &str) -> Result<Option<Alert>> {
        (**self).get_alert(id)
    }

    fn set_alert_flags(
        &self,
        id: &str,
        is_read: Option<bool>,
        is_dismissed: Option<bool>,
    ) -> Result<Option<Alert>> {
        (**self).set_alert_flags(id, is_read, is_dismissed)
    }
}

impl<T: ProfileStore + ?Sized> ProfileStore for Arc<T> {
    fn get_profile(&self, id: Option<&str>) -> Result<Option<AnimalProfile>> {
        (**self).get_profile(id)
    }

    fn put_profile(&self, profile: &AnimalProfile) -> Result<()> {
        (**self).put_profile(profile)
    }

    fn list_profiles(&self) -> Result<Vec<AnimalProfile>> {
        (**self).list_profiles()
    }
}
