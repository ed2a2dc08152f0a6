//! Utility functions for litterwatch.
//!
//! File helpers shared by the file store and config, plus the cycle
//! deadline used to bound every read-decide-write sequence.

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::{LitterError, Result};

/// Maximum file size that can be read into memory (10 MB).
///
/// The visit log grows by one short line per visit; a decade of visits
/// stays far below this.
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Read a file into a string with size limit protection.
///
/// # Errors
///
/// Returns a storage error if the file cannot be read or exceeds
/// `MAX_FILE_SIZE`.
pub fn read_to_string_limited(path: &Path) -> Result<String> {
    read_to_string_with_limit(path, MAX_FILE_SIZE)
}

/// Read a file into a string with a custom size limit.
pub fn read_to_string_with_limit(path: &Path, max_size: u64) -> Result<String> {
    let metadata = fs::metadata(path).map_err(|e| LitterError::storage(path, e))?;

    let size = metadata.len();
    if size > max_size {
        return Err(LitterError::storage(
            path,
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("file is too large ({} bytes, max {} bytes)", size, max_size),
            ),
        ));
    }

    fs::read_to_string(path).map_err(|e| LitterError::storage(path, e))
}

/// Serialize `value` as pretty JSON and write it atomically.
///
/// Writes to a dot-prefixed temp file in the same directory, syncs it, then
/// renames over the target so readers never see a half-written file.
pub fn atomic_write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    atomic_write(path, json.as_bytes())
}

/// Write bytes atomically via temp file + rename.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| LitterError::invalid_input(format!("{} has no parent", path.display())))?;
    if !parent.as_os_str().is_empty() && !parent.exists() {
        fs::create_dir_all(parent).map_err(|e| LitterError::storage(parent, e))?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = parent.join(format!(".{}.tmp", file_name));

    {
        let mut file =
            fs::File::create(&temp_path).map_err(|e| LitterError::storage(&temp_path, e))?;
        file.write_all(bytes)
            .map_err(|e| LitterError::storage(&temp_path, e))?;
        file.sync_all()
            .map_err(|e| LitterError::storage(&temp_path, e))?;
    }

    fs::rename(&temp_path, path).map_err(|e| LitterError::storage(path, e))?;
    Ok(())
}

/// Encode a store key as a file name stem.
///
/// ASCII letters, digits and `-` pass through; every other byte becomes
/// `_xx` (lowercase hex). `_` itself is escaped, so distinct keys never
/// share a file.
pub fn file_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("_{:02x}", byte));
        }
    }
    out
}

/// Time budget for one cycle.
///
/// Cycles call [`Deadline::check`] at each stage boundary and once more
/// right before committing writes. Anything past the deadline aborts with a
/// retryable timeout and leaves the store untouched.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    /// Start a deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    /// Time left before the deadline, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.started.elapsed())
    }

    /// Whether the budget is spent.
    pub fn is_expired(&self) -> bool {
        self.started.elapsed() >= self.budget
    }

    /// Fail with a timeout naming `stage` if the budget is spent.
    pub fn check(&self, stage: &str) -> Result<()> {
        if self.is_expired() {
            let elapsed = self.started.elapsed().as_millis() as u64;
            tracing::warn!(stage, elapsed_ms = elapsed, "cycle deadline exceeded");
            return Err(LitterError::timeout(stage, elapsed));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_to_string_limited_success() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("test.txt");
        fs::write(&path, "Hello, world!").unwrap();

        let content = read_to_string_limited(&path).unwrap();
        assert_eq!(content, "Hello, world!");
    }

    #[test]
    fn test_read_to_string_limited_nonexistent() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nonexistent.txt");

        let result = read_to_string_limited(&path);
        assert!(matches!(result, Err(LitterError::Storage { .. })));
    }

    #[test]
    fn test_read_to_string_with_limit_exceeds() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("large.txt");
        fs::write(&path, [b'x'; 1000]).unwrap();

        let err = read_to_string_with_limit(&path, 500).unwrap_err().to_string();
        assert!(err.contains("too large"));
        assert!(err.contains("1000 bytes"));
    }

    #[test]
    fn test_atomic_write_creates_parent_and_cleans_temp() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("state.json");

        atomic_write_json(&path, &serde_json::json!({"a": 1})).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["a"], 1);
        assert!(!temp.path().join("nested").join(".state.json.tmp").exists());
    }

    #[test]
    fn test_atomic_write_replaces_existing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("value.json");

        atomic_write_json(&path, &1).unwrap();
        atomic_write_json(&path, &2).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "2");
    }

    #[test]
    fn test_file_key_is_injective() {
        assert_eq!(file_key("default"), "default");
        assert_eq!(file_key("box-1"), "box-1");

        let keys = ["box/1", "box.1", "box_1", "box_2f1", "box 1"];
        let encoded: std::collections::HashSet<String> = keys.iter().map(|k| file_key(k)).collect();
        assert_eq!(encoded.len(), keys.len());
        assert!(encoded.iter().all(|k| !k.contains('/') && !k.contains('.')));
    }

    #[test]
    fn test_deadline_fresh_is_not_expired() {
        let deadline = Deadline::after(Duration::from_secs(60));
        assert!(!deadline.is_expired());
        assert!(deadline.check("read").is_ok());
        assert!(deadline.remaining() > Duration::from_secs(50));
    }

    #[test]
    fn test_deadline_zero_budget_expires() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
        let err = deadline.check("commit").unwrap_err();
        assert!(matches!(err, LitterError::Timeout { ref stage, .. } if stage == "commit"));
        assert!(err.is_retryable());
    }
}
