//! Sensor polling: reading sources and the visit state machine.

pub mod machine;
pub mod source;

pub use machine::{SensorEventMachine, SyncAction, SyncOptions, SyncSummary};
pub use source::{
    parse_duration, parse_weight, Channel, ReadingSource, Readings, SnapshotReadingSource,
    StaticReadingSource,
};
