//! In-memory storage.
//!
//! Thread-safe implementation of every store trait, used by tests and by
//! one-shot runs that do not need persistence.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use crate::core::{Alert, AlertType, AnimalProfile, SensorState, Visit};
use crate::error::Result;
use crate::lock::KeyedLocks;
use crate::storage::{
    AlertStore, ProfileStore, SensorStateStore, StoreLocks, TimeRange, VisitStore,
};

/// In-memory store.
///
/// Data is lost when the store is dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    states: RwLock<HashMap<String, SensorState>>,
    visits: RwLock<Vec<Visit>>,
    alerts: RwLock<Vec<Alert>>,
    profiles: RwLock<Vec<AnimalProfile>>,
    locks: KeyedLocks,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored visits.
    pub fn visit_count(&self) -> usize {
        read(&self.visits).len()
    }

    /// Number of stored alerts.
    pub fn alert_count(&self) -> usize {
        read(&self.alerts).len()
    }
}

impl StoreLocks for MemoryStore {
    fn locks(&self) -> &KeyedLocks {
        &self.locks
    }
}

impl SensorStateStore for MemoryStore {
    fn load_state(&self, sensor_id: &str) -> Result<Option<SensorState>> {
        Ok(read(&self.states).get(sensor_id).cloned())
    }

    fn save_state(&self, state: &SensorState) -> Result<()> {
        write(&self.states).insert(state.sensor_id.clone(), state.clone());
        Ok(())
    }
}

impl VisitStore for MemoryStore {
    fn insert_visit(&self, visit: &Visit) -> Result<()> {
        write(&self.visits).push(visit.clone());
        Ok(())
    }

    fn find_visits(&self, range: &TimeRange) -> Result<Vec<Visit>> {
        let mut result: Vec<Visit> = read(&self.visits)
            .iter()
            .filter(|v| range.contains(v.entry_time))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.entry_time.cmp(&b.entry_time));
        Ok(result)
    }

    fn latest_created_visit(&self) -> Result<Option<Visit>> {
        Ok(read(&self.visits)
            .iter()
            .max_by_key(|v| v.created_at)
            .cloned())
    }

    fn oldest_visit(&self) -> Result<Option<Visit>> {
        Ok(read(&self.visits)
            .iter()
            .min_by_key(|v| v.entry_time)
            .cloned())
    }

    fn clear_visits(&self) -> Result<usize> {
        let mut visits = write(&self.visits);
        let removed = visits.len();
        visits.clear();
        Ok(removed)
    }
}

impl AlertStore for MemoryStore {
    fn insert_alerts(&self, alerts: &[Alert]) -> Result<()> {
        write(&self.alerts).extend_from_slice(alerts);
        Ok(())
    }

    fn find_recent_alert(
        &self,
        animal_id: Option<&str>,
        alert_type: AlertType,
        since: DateTime<Utc>,
    ) -> Result<Option<Alert>> {
        Ok(read(&self.alerts)
            .iter()
            .filter(|a| {
                a.alert_type == alert_type
                    && a.animal_id.as_deref() == animal_id
                    && a.created_at >= since
            })
            .max_by_key(|a| a.created_at)
            .cloned())
    }

    fn all_alerts(&self) -> Result<Vec<Alert>> {
        Ok(read(&self.alerts).clone())
    }

    fn get_alert(&self, id: &str) -> Result<Option<Alert>> {
        Ok(read(&self.alerts).iter().find(|a| a.id == id).cloned())
    }

    fn set_alert_flags(
        &self,
        id: &str,
        is_read: Option<bool>,
        is_dismissed: Option<bool>,
    ) -> Result<Option<Alert>> {
        let mut alerts = write(&self.alerts);
        let Some(alert) = alerts.iter_mut().find(|a| a.id == id) else {
            return Ok(None);
        };
        if let Some(flag) = is_read {
            alert.is_read = flag;
        }
        if let Some(flag) = is_dismissed {
            alert.is_dismissed = flag;
        }
        Ok(Some(alert.clone()))
    }
}

impl ProfileStore for MemoryStore {
    fn get_profile(&self, id: Option<&str>) -> Result<Option<AnimalProfile>> {
        let profiles = read(&self.profiles);
        Ok(match id {
            Some(id) => profiles.iter().find(|p| p.id == id).cloned(),
            None => profiles.iter().min_by_key(|p| p.created_at).cloned(),
        })
    }

    fn put_profile(&self, profile: &AnimalProfile) -> Result<()> {
        let mut profiles = write(&self.profiles);
        match profiles.iter_mut().find(|p| p.id == profile.id) {
            Some(existing) => *existing = profile.clone(),
            None => profiles.push(profile.clone()),
        }
        Ok(())
    }

    fn list_profiles(&self) -> Result<Vec<AnimalProfile>> {
        let mut profiles = read(&self.profiles).clone();
        profiles.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::traits::tests::{
        test_alert_store_contract, test_locks_shared, test_profile_default_creation,
        test_profile_store_contract, test_sensor_state_contract, test_visit_store_contract,
    };

    #[test]
    fn test_memory_sensor_state() {
        test_sensor_state_contract(&MemoryStore::new());
    }

    #[test]
    fn test_memory_visits() {
        test_visit_store_contract(&MemoryStore::new());
    }

    #[test]
    fn test_memory_alerts() {
        test_alert_store_contract(&MemoryStore::new());
    }

    #[test]
    fn test_memory_profiles() {
        test_profile_store_contract(&MemoryStore::new());
    }

    #[test]
    fn test_memory_default_profile() {
        test_profile_default_creation(&MemoryStore::new());
    }

    #[test]
    fn test_memory_locks_shared_across_handles() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let other = std::sync::Arc::clone(&store);
        test_locks_shared(&store, &other);
    }

    #[test]
    fn test_counts() {
        let store = MemoryStore::new();
        assert_eq!(store.visit_count(), 0);
        store.insert_visit(&Visit::new(Utc::now(), 4.0)).unwrap();
        assert_eq!(store.visit_count(), 1);
        assert_eq!(store.alert_count(), 0);
    }

    #[test]
    fn test_thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(MemoryStore::new());
        let mut handles = vec![];

        for i in 0..10 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                store.insert_visit(&Visit::new(Utc::now(), i as f64)).unwrap();
                store.find_visits(&TimeRange::all()).unwrap();
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.visit_count(), 10);
    }
}
