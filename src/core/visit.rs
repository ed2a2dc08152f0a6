//! Visit records.
//!
//! A visit is one completed occupancy episode. Visits are append-only:
//! the state machine creates them and nothing in the crate updates them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One completed occupancy episode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Visit {
    /// Unique visit identifier.
    pub id: String,
    /// Animal the visit is attributed to (single-animal deployments leave this unset).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animal_id: Option<String>,
    /// When the visit was observed.
    pub entry_time: DateTime<Utc>,
    /// Weight attributed to the animal during the visit.
    pub weight_in: f64,
    /// Weight on exit, if measured separately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_out: Option<f64>,
    /// Mass left behind, if measured.
    #[serde(default)]
    pub waste_weight: f64,
    /// Duration reported by the sensor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u32>,
    /// When the record was written (drives duplicate suppression).
    pub created_at: DateTime<Utc>,
}

impl Visit {
    /// Create a visit observed at `entry_time` and written at the same instant.
    pub fn new(entry_time: DateTime<Utc>, weight_in: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            animal_id: None,
            entry_time,
            weight_in: non_negative(weight_in),
            weight_out: None,
            waste_weight: 0.0,
            duration_seconds: None,
            created_at: entry_time,
        }
    }

    /// Set the write timestamp.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Attribute the visit to an animal.
    pub fn for_animal(mut self, animal_id: impl Into<String>) -> Self {
        self.animal_id = Some(animal_id.into());
        self
    }

    /// Set the exit weight.
    pub fn with_weight_out(mut self, weight: f64) -> Self {
        self.weight_out = Some(non_negative(weight));
        self
    }

    /// Set the waste mass.
    pub fn with_waste_weight(mut self, weight: f64) -> Self {
        self.waste_weight = non_negative(weight);
        self
    }

    /// Set the sensor-reported duration.
    pub fn with_duration(mut self, seconds: u32) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }

    /// Exit weight, defaulting to the entry weight.
    pub fn weight_out(&self) -> f64 {
        self.weight_out.unwrap_or(self.weight_in)
    }
}

/// Clamp a mass reading to a finite, non-negative value.
pub fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}
