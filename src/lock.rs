//! Keyed single-flight locks.
//!
//! A sync cycle's read-state, decide, write-state sequence is not atomic in
//! the store, so two overlapping polls for the same sensor could both miss
//! the duplicate guard. [`KeyedLocks`] hands out one exclusive guard per key
//! (sensor id, or animal + alert type) with a bounded wait.
//!
//! Threads of one process meet in an in-memory registry. A registry opened
//! with [`KeyedLocks::with_dir`] also takes an OS file lock per key, so
//! overlapping `litterwatch` processes over one data directory exclude each
//! other too.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{LitterError, Result};
use crate::util::file_key;

/// How often a waiter re-checks a lock file held by another process.
const FILE_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct Inner {
    held: Mutex<HashSet<String>>,
    released: Condvar,
    dir: Option<PathBuf>,
}

/// Registry of exclusive per-key sections.
///
/// Cloning shares the registry.
#[derive(Debug, Clone, Default)]
pub struct KeyedLocks {
    inner: Arc<Inner>,
}

/// Exclusive hold on one key. Released on drop.
#[derive(Debug)]
pub struct KeyGuard {
    inner: Arc<Inner>,
    key: String,
    file: Option<File>,
}

impl KeyedLocks {
    /// Create an in-process registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry that also locks `<dir>/<key>.lock` for each key.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                dir: Some(dir.into()),
                ..Inner::default()
            }),
        }
    }

    /// Acquire `key`, waiting at most `timeout` for a concurrent holder.
    ///
    /// # Errors
    ///
    /// Returns a retryable timeout if the key is still held when the wait
    /// runs out, or a storage error if the lock file cannot be opened.
    pub fn acquire(&self, key: &str, timeout: Duration) -> Result<KeyGuard> {
        let started = Instant::now();
        let mut held = lock_set(&self.inner.held);
        if held.contains(key) {
            tracing::debug!(key, "waiting for in-flight cycle");
            let (guard, result) = self
                .inner
                .released
                .wait_timeout_while(held, timeout, |set| set.contains(key))
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            held = guard;
            if result.timed_out() && held.contains(key) {
                return Err(LitterError::timeout(
                    format!("lock {}", key),
                    timeout.as_millis() as u64,
                ));
            }
        }
        held.insert(key.to_string());
        drop(held);

        // From here on, dropping the guard releases the in-process hold.
        let mut guard = KeyGuard {
            inner: Arc::clone(&self.inner),
            key: key.to_string(),
            file: None,
        };
        if let Some(dir) = &self.inner.dir {
            let remaining = timeout.saturating_sub(started.elapsed());
            guard.file = Some(lock_file(dir, key, remaining)?);
        }
        Ok(guard)
    }

    /// Whether `key` is currently held in this process.
    #[cfg(test)]
    pub fn is_held(&self, key: &str) -> bool {
        lock_set(&self.inner.held).contains(key)
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = file.unlock() {
                tracing::warn!(key = %self.key, error = %e, "failed to unlock lock file");
            }
        }
        lock_set(&self.inner.held).remove(&self.key);
        self.inner.released.notify_all();
    }
}

/// Take the OS lock on `key`'s lock file, polling until `timeout`.
fn lock_file(dir: &Path, key: &str, timeout: Duration) -> Result<File> {
    fs::create_dir_all(dir).map_err(|e| LitterError::storage(dir, e))?;
    let path = dir.join(format!("{}.lock", file_key(key)));
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .map_err(|e| LitterError::storage(&path, e))?;

    let started = Instant::now();
    loop {
        match file.try_lock() {
            Ok(()) => return Ok(file),
            Err(TryLockError::WouldBlock) => {
                if started.elapsed() >= timeout {
                    return Err(LitterError::timeout(
                        format!("lock {}", key),
                        timeout.as_millis() as u64,
                    ));
                }
                tracing::debug!(key, "lock held by another process, waiting");
                thread::sleep(FILE_POLL_INTERVAL);
            }
            Err(TryLockError::Error(e)) => return Err(LitterError::storage(&path, e)),
        }
    }
}

/// A panic inside a held section must not wedge every later cycle.
fn lock_set(mutex: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[test]
    fn test_acquire_and_release() {
        let locks = KeyedLocks::new();
        {
            let _guard = locks.acquire("sensor-1", Duration::from_millis(10)).unwrap();
            assert!(locks.is_held("sensor-1"));
        }
        assert!(!locks.is_held("sensor-1"));
    }

    #[test]
    fn test_distinct_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.acquire("a", Duration::from_millis(10)).unwrap();
        let _b = locks.acquire("b", Duration::from_millis(10)).unwrap();
        assert!(locks.is_held("a"));
        assert!(locks.is_held("b"));
    }

    #[test]
    fn test_same_key_times_out() {
        let locks = KeyedLocks::new();
        let _held = locks.acquire("a", Duration::from_millis(10)).unwrap();
        let err = locks.acquire("a", Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, LitterError::Timeout { .. }));
    }

    #[test]
    fn test_waiter_proceeds_after_release() {
        let locks = KeyedLocks::new();
        let guard = locks.acquire("a", Duration::from_millis(10)).unwrap();

        let waiter = {
            let locks = locks.clone();
            thread::spawn(move || locks.acquire("a", Duration::from_secs(5)).is_ok())
        };

        thread::sleep(Duration::from_millis(20));
        drop(guard);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_sections_are_exclusive() {
        let locks = KeyedLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];

        for _ in 0..8 {
            let locks = locks.clone();
            let inside = Arc::clone(&inside);
            let overlaps = Arc::clone(&overlaps);
            handles.push(thread::spawn(move || {
                let _guard = locks.acquire("shared", Duration::from_secs(5)).unwrap();
                if inside.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                thread::sleep(Duration::from_millis(2));
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_separate_registries_share_lock_files() {
        let dir = TempDir::new().unwrap();
        // Two registries over one directory, as two processes would have.
        let first = KeyedLocks::with_dir(dir.path());
        let second = KeyedLocks::with_dir(dir.path());

        let held = first.acquire("sensor:default", Duration::from_millis(10)).unwrap();
        let err = second
            .acquire("sensor:default", Duration::from_millis(30))
            .unwrap_err();
        assert!(matches!(err, LitterError::Timeout { .. }));
        // A failed file lock gives back the in-process hold.
        assert!(!second.is_held("sensor:default"));

        assert!(second.acquire("sensor:other", Duration::from_millis(10)).is_ok());

        drop(held);
        assert!(second.acquire("sensor:default", Duration::from_millis(10)).is_ok());
        assert!(dir.path().join("sensor_3adefault.lock").exists());
    }

    #[test]
    fn test_file_lock_waiter_proceeds_after_release() {
        let dir = TempDir::new().unwrap();
        let first = KeyedLocks::with_dir(dir.path());
        let second = KeyedLocks::with_dir(dir.path());
        let guard = first.acquire("a", Duration::from_millis(10)).unwrap();

        let waiter = thread::spawn(move || second.acquire("a", Duration::from_secs(5)).is_ok());

        thread::sleep(Duration::from_millis(30));
        drop(guard);
        assert!(waiter.join().unwrap());
    }
}
