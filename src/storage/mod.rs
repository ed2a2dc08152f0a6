//! Persistent storage for litterwatch.
//!
//! Sensor state, visits, alerts and profiles, with file-based and
//! in-memory backends.

pub mod file;
pub mod memory;
pub mod traits;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use traits::{
    AlertCounts, AlertQuery, AlertStore, ProfileStore, SensorStateStore, StoreLocks, TimeRange,
    VisitStore,
};
