//! Unified error types for litterwatch.
//!
//! Errors fall into four groups: the upstream reading source or store is
//! unreachable, configuration is missing, the data is insufficient, or a
//! reading is malformed. Only the first two ever surface as `Err`; the last
//! two are absorbed into neutral values and "no alerts yet" outcomes.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for litterwatch operations.
#[derive(Error, Debug)]
pub enum LitterError {
    /// I/O errors from store file operations.
    #[error("storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// JSON or TOML parsing/serialization errors.
    #[error("serialization error: {message}")]
    Serde { message: String },

    /// Configuration loading errors.
    #[error("config error: {message}")]
    Config { message: String },

    /// A required setting (such as the sensor credential) is absent.
    #[error("missing configuration: {setting}")]
    MissingConfig { setting: String },

    /// The reading source or persistent store could not be reached.
    #[error("upstream unavailable: {message}")]
    Upstream { message: String },

    /// A cycle exceeded its deadline before committing.
    #[error("timed out during {stage} after {elapsed_ms}ms")]
    Timeout { stage: String, elapsed_ms: u64 },

    /// A record addressed by id does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    /// Caller supplied an unusable value.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
}

/// A specialized Result type for litterwatch operations.
pub type Result<T> = std::result::Result<T, LitterError>;

impl LitterError {
    /// Create a storage error from an I/O error.
    pub fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Create a serialization error.
    pub fn serde(message: impl Into<String>) -> Self {
        Self::Serde {
            message: message.into(),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a missing configuration error.
    pub fn missing_config(setting: impl Into<String>) -> Self {
        Self::MissingConfig {
            setting: setting.into(),
        }
    }

    /// Create an upstream-unavailable error.
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(stage: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::Timeout {
            stage: stage.into(),
            elapsed_ms,
        }
    }

    /// Create a not found error.
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Whether the next scheduled trigger may succeed where this one failed.
    ///
    /// Missing configuration is not retryable: it needs a human.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. } | Self::Upstream { .. } | Self::Timeout { .. }
        )
    }
}

impl From<io::Error> for LitterError {
    fn from(err: io::Error) -> Self {
        Self::Storage {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for LitterError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serde {
            message: err.to_string(),
        }
    }
}

/// Trait for fail-open error handling.
///
/// Used where a failed read should degrade to a neutral value instead of
/// aborting the surrounding cycle.
pub trait FailOpen<T> {
    /// Handle an error by logging a warning and returning the provided fallback.
    fn fail_open_with(self, context: &str, fallback: T) -> T;
}

impl<T> FailOpen<T> for Result<T> {
    fn fail_open_with(self, context: &str, fallback: T) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("{}: {} (fail-open: using fallback)", context, err);
                fallback
            }
        }
    }
}

/// Exit codes for the litterwatch CLI.
pub mod exit_codes {
    /// The cycle completed (including "nothing to do").
    pub const OK: i32 = 0;

    /// The cycle failed but may succeed on the next trigger.
    pub const RETRYABLE: i32 = 1;

    /// The cycle failed and needs operator attention (e.g. missing credential).
    pub const FATAL: i32 = 2;

    /// The process panicked.
    pub const CRASH: i32 = 3;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display() {
        let err = LitterError::storage(
            "/tmp/visits.jsonl",
            io::Error::new(io::ErrorKind::NotFound, "file not found"),
        );
        assert!(err.to_string().contains("storage error"));
        assert!(err.to_string().contains("/tmp/visits.jsonl"));
    }

    #[test]
    fn test_missing_config_display() {
        let err = LitterError::missing_config("sensor.credential");
        assert_eq!(err.to_string(), "missing configuration: sensor.credential");
    }

    #[test]
    fn test_upstream_display() {
        let err = LitterError::upstream("snapshot not found");
        assert_eq!(err.to_string(), "upstream unavailable: snapshot not found");
    }

    #[test]
    fn test_timeout_display() {
        let err = LitterError::timeout("commit", 5000);
        assert_eq!(err.to_string(), "timed out during commit after 5000ms");
    }

    #[test]
    fn test_not_found_display() {
        let err = LitterError::not_found("alert", "abc");
        assert_eq!(err.to_string(), "alert not found: abc");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(LitterError::upstream("x").is_retryable());
        assert!(LitterError::timeout("x", 1).is_retryable());
        assert!(LitterError::from(io::Error::other("disk")).is_retryable());
        assert!(!LitterError::missing_config("x").is_retryable());
        assert!(!LitterError::config("x").is_retryable());
        assert!(!LitterError::invalid_input("x").is_retryable());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: LitterError = json_err.into();
        assert!(matches!(err, LitterError::Serde { .. }));
    }

    #[test]
    fn test_fail_open_with() {
        let result: Result<f64> = Err(LitterError::upstream("test"));
        assert_eq!(result.fail_open_with("weight", 0.0), 0.0);
    }

    #[test]
    fn test_fail_open_success() {
        let result: Result<i32> = Ok(100);
        assert_eq!(result.fail_open_with("test context", 0), 100);
    }
}
