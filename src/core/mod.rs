//! Core types for litterwatch.
//!
//! This module contains the domain records (sensor state, visits, animal
//! profiles, alerts) and the pure status-matching predicates.

pub mod alert;
pub mod profile;
pub mod state;
pub mod status;
pub mod visit;

pub use alert::{Alert, AlertCandidate, AlertType, Severity, TriggerData};
pub use profile::{AnimalProfile, MonitoringMode, DEFAULT_ANIMAL_NAME};
pub use state::{SensorState, DEFAULT_SENSOR_ID};
pub use status::{classify, is_empty, is_exit, is_occupied, visit_completed, Occupancy};
pub use visit::Visit;
