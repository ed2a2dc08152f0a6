//! File-based storage for litterwatch.
//!
//! Layout under the data directory:
//!
//! ```text
//! state/<sensor_id>.json   sensor state, one file per sensor key
//! visits.jsonl             append-only visit log
//! alerts.json              alert list
//! profiles.json            animal profiles
//! locks/<key>.lock         OS lock files, one per lock key
//! ```
//!
//! Keys in file names go through [`file_key`]. Whole-file records are
//! replaced atomically via temp file + rename, and every read-modify-write
//! of a shared file runs under the `store:files` lock.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use crate::config::data_dir;
use crate::core::{Alert, AlertType, AnimalProfile, SensorState, Visit};
use crate::error::{LitterError, Result};
use crate::lock::{KeyGuard, KeyedLocks};
use crate::storage::{
    AlertStore, ProfileStore, SensorStateStore, StoreLocks, TimeRange, VisitStore,
};
use crate::util::{atomic_write_json, file_key, read_to_string_limited};

/// Lock key guarding the shared list files.
const FILES_KEY: &str = "store:files";

/// Longest wait for another writer of the list files.
const FILES_WAIT: Duration = Duration::from_secs(5);

/// File-based store.
#[derive(Debug)]
pub struct FileStore {
    /// Directory holding every store file.
    root: PathBuf,
    /// Lock registry backed by `locks/` under the root.
    locks: KeyedLocks,
}

impl FileStore {
    /// Open the store in the default data directory.
    ///
    /// Uses `<home>/data/` unless `store.data_dir` is configured.
    pub fn new() -> Result<Self> {
        let dir = data_dir().ok_or_else(|| {
            LitterError::config("Could not determine data directory (no home directory)")
        })?;
        Self::with_dir(dir)
    }

    /// Open the store in a custom directory, creating it if needed.
    pub fn with_dir(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.exists() {
            fs::create_dir_all(&root).map_err(|e| LitterError::storage(&root, e))?;
        }
        let locks = KeyedLocks::with_dir(root.join("locks"));
        Ok(Self { root, locks })
    }

    /// Directory holding the store files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn state_path(&self, sensor_id: &str) -> PathBuf {
        self.root
            .join("state")
            .join(format!("{}.json", file_key(sensor_id)))
    }

    fn visits_path(&self) -> PathBuf {
        self.root.join("visits.jsonl")
    }

    fn alerts_path(&self) -> PathBuf {
        self.root.join("alerts.json")
    }

    fn profiles_path(&self) -> PathBuf {
        self.root.join("profiles.json")
    }

    fn lock_files(&self) -> Result<KeyGuard> {
        self.locks.acquire(FILES_KEY, FILES_WAIT)
    }

    /// Read the visit log, skipping lines that fail to parse.
    fn read_visits(&self) -> Result<Vec<Visit>> {
        let path = self.visits_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = read_to_string_limited(&path)?;
        let mut visits = Vec::new();
        for (line_num, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Visit>(line) {
                Ok(visit) => visits.push(visit),
                Err(e) => tracing::warn!(
                    line = line_num + 1,
                    error = %e,
                    "skipping unreadable visit record"
                ),
            }
        }
        Ok(visits)
    }
}

/// Read a JSON list file, treating a missing file as empty.
fn read_list<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = read_to_string_limited(path)?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&content)
        .map_err(|e| LitterError::serde(format!("Failed to parse {}: {}", path.display(), e)))
}

impl StoreLocks for FileStore {
    fn locks(&self) -> &KeyedLocks {
        &self.locks
    }
}

impl SensorStateStore for FileStore {
    fn load_state(&self, sensor_id: &str) -> Result<Option<SensorState>> {
        let path = self.state_path(sensor_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = read_to_string_limited(&path)?;
        let state: SensorState = serde_json::from_str(&content)?;
        Ok(Some(state))
    }

    fn save_state(&self, state: &SensorState) -> Result<()> {
        atomic_write_json(&self.state_path(&state.sensor_id), state)
    }
}

impl VisitStore for FileStore {
    fn insert_visit(&self, visit: &Visit) -> Result<()> {
        let _guard = self.lock_files()?;
        let path = self.visits_path();
        let json = serde_json::to_string(visit)
            .map_err(|e| LitterError::serde(format!("Failed to serialize visit: {}", e)))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| LitterError::storage(&path, e))?;
        writeln!(file, "{}", json).map_err(|e| LitterError::storage(&path, e))?;
        file.sync_data().map_err(|e| LitterError::storage(&path, e))?;
        Ok(())
    }

    fn find_visits(&self, range: &TimeRange) -> Result<Vec<Visit>> {
        let mut visits: Vec<Visit> = self
            .read_visits()?
            .into_iter()
            .filter(|v| range.contains(v.entry_time))
            .collect();
        visits.sort_by(|a, b| a.entry_time.cmp(&b.entry_time));
        Ok(visits)
    }

    fn latest_created_visit(&self) -> Result<Option<Visit>> {
        Ok(self.read_visits()?.into_iter().max_by_key(|v| v.created_at))
    }

    fn oldest_visit(&self) -> Result<Option<Visit>> {
        Ok(self.read_visits()?.into_iter().min_by_key(|v| v.entry_time))
    }

    fn clear_visits(&self) -> Result<usize> {
        let _guard = self.lock_files()?;
        let removed = self.read_visits()?.len();
        let path = self.visits_path();
        if path.exists() {
            fs::remove_file(&path).map_err(|e| LitterError::storage(&path, e))?;
        }
        Ok(removed)
    }
}

impl AlertStore for FileStore {
    fn insert_alerts(&self, alerts: &[Alert]) -> Result<()> {
        if alerts.is_empty() {
            return Ok(());
        }
        let _guard = self.lock_files()?;
        let path = self.alerts_path();
        let mut stored: Vec<Alert> = read_list(&path)?;
        stored.extend_from_slice(alerts);
        atomic_write_json(&path, &stored)
    }

    fn find_recent_alert(
        &self,
        animal_id: Option<&str>,
        alert_type: AlertType,
        since: DateTime<Utc>,
    ) -> Result<Option<Alert>> {
        Ok(self
            .all_alerts()?
            .into_iter()
            .filter(|a| {
                a.alert_type == alert_type
                    && a.animal_id.as_deref() == animal_id
                    && a.created_at >= since
            })
            .max_by_key(|a| a.created_at))
    }

    fn all_alerts(&self) -> Result<Vec<Alert>> {
        read_list(&self.alerts_path())
    }

    fn get_alert(&self, id: &str) -> Result<Option<Alert>> {
        Ok(self.all_alerts()?.into_iter().find(|a| a.id == id))
    }

    fn set_alert_flags(
        &self,
        id: &str,
        is_read: Option<bool>,
        is_dismissed: Option<bool>,
    ) -> Result<Option<Alert>> {
        let _guard = self.lock_files()?;
        let path = self.alerts_path();
        let mut alerts: Vec<Alert> = read_list(&path)?;
        let Some(alert) = alerts.iter_mut().find(|a| a.id == id) else {
            return Ok(None);
        };
        if let Some(flag) = is_read {
            alert.is_read = flag;
        }
        if let Some(flag) = is_dismissed {
            alert.is_dismissed = flag;
        }
        let updated = alert.clone();
        atomic_write_json(&path, &alerts)?;
        Ok(Some(updated))
    }
}

impl ProfileStore for FileStore {
    fn get_profile(&self, id: Option<&str>) -> Result<Option<AnimalProfile>> {
        let profiles = self.list_profiles()?;
        Ok(match id {
            Some(id) => profiles.into_iter().find(|p| p.id == id),
            None => profiles.into_iter().next(),
        })
    }

    fn put_profile(&self, profile: &AnimalProfile) -> Result<()> {
        let _guard = self.lock_files()?;
        let path = self.profiles_path();
        let mut profiles: Vec<AnimalProfile> = read_list(&path)?;
        match profiles.iter_mut().find(|p| p.id == profile.id) {
            Some(existing) => *existing = profile.clone(),
            None => profiles.push(profile.clone()),
        }
        atomic_write_json(&path, &profiles)
    }

    fn list_profiles(&self) -> Result<Vec<AnimalProfile>> {
        let mut profiles: Vec<AnimalProfile> = read_list(&self.profiles_path())?;
        profiles.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(profiles)
    }
}
