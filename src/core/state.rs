//! Persisted sensor state.
//!
//! One record per sensor key holds the last raw status text and the last
//! weight seen above the presence threshold. The state machine compares
//! each poll against this record and is the only writer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::status::{classify, Occupancy};

/// Key used when a deployment has a single sensor.
pub const DEFAULT_SENSOR_ID: &str = "default";

/// Last observed state of one sensor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorState {
    /// Sensor key this record belongs to.
    pub sensor_id: String,
    /// Raw status text from the previous poll.
    #[serde(default)]
    pub last_status: String,
    /// Last weight seen above the presence threshold.
    #[serde(default)]
    pub last_weight: f64,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl SensorState {
    /// Create an empty state for a sensor.
    pub fn new(sensor_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            last_status: String::new(),
            last_weight: 0.0,
            updated_at: now,
        }
    }

    /// Occupancy implied by the stored status.
    pub fn occupancy(&self) -> Occupancy {
        classify(&self.last_status)
    }
}
