//! litterwatch - litter box visit tracking and health alerts
//!
//! A slow-polled litter box sensor reports weight and status text. The
//! sensor state machine turns that feed into deduplicated visit records;
//! the alert engine evaluates the visit history against per-mode thresholds
//! and raises deduplicated health alerts.

pub mod alerts;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod lock;
pub mod sensor;
pub mod storage;
pub mod util;

pub use alerts::{AlertCheckSummary, AlertEngine, EngineOptions, RuleError, Thresholds};
pub use config::Config;
pub use core::{
    Alert, AlertType, AnimalProfile, MonitoringMode, SensorState, Severity, Visit,
};
pub use error::{LitterError, Result};
pub use lock::KeyedLocks;
pub use sensor::{
    ReadingSource, Readings, SensorEventMachine, SnapshotReadingSource, StaticReadingSource,
    SyncAction, SyncOptions, SyncSummary,
};
pub use storage::{
    AlertStore, FileStore, MemoryStore, ProfileStore, SensorStateStore, StoreLocks, TimeRange,
    VisitStore,
};

// CLI commands
pub use cli::{
    AlertsCommand, CheckCommand, ProfileCommand, StateCommand, SyncCommand, VisitsCommand,
};
