//! State command: show the stored sensor state.

use serde::{Deserialize, Serialize};

use crate::core::SensorState;
use crate::storage::SensorStateStore;

/// Options for the state command.
#[derive(Debug, Clone, Default)]
pub struct StateOptions {
    /// Output as JSON.
    pub json: bool,
    /// Suppress output.
    pub quiet: bool,
}

/// Output format for the state command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateOutput {
    /// Whether the command was successful.
    pub success: bool,
    /// Sensor key looked up.
    pub sensor_id: String,
    /// Stored state; absent before the first poll.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<SensorState>,
    /// Occupancy implied by the stored status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occupancy: Option<String>,
    /// Error message if command failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The state command implementation.
pub struct StateCommand<S: SensorStateStore> {
    store: S,
}

impl<S: SensorStateStore> StateCommand<S> {
    /// Create a new state command.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Look up the state for `sensor_id`.
    pub fn run(&self, sensor_id: &str) -> StateOutput {
        match self.store.load_state(sensor_id) {
            Ok(state) => StateOutput {
                success: true,
                sensor_id: sensor_id.to_string(),
                occupancy: state.as_ref().map(|s| s.occupancy().to_string()),
                state,
                error: None,
            },
            Err(e) => StateOutput {
                success: false,
                sensor_id: sensor_id.to_string(),
                state: None,
                occupancy: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Format output based on options.
    pub fn format_output(&self, output: &StateOutput, options: &StateOptions) -> String {
        if options.quiet {
            return String::new();
        }
        if options.json {
            return serde_json::to_string_pretty(output).unwrap_or_else(|_| "{}".to_string());
        }

        if !output.success {
            return format!(
                "State failed: {}\n",
                output.error.as_deref().unwrap_or("unknown error")
            );
        }
        match &output.state {
            None => format!("Sensor {}: no polls recorded yet.\n", output.sensor_id),
            Some(state) => format!(
                "Sensor {}: {}\n  status:      {:?}\n  last weight: {:.2} kg\n  updated:     {}\n",
                state.sensor_id,
                output.occupancy.as_deref().unwrap_or("empty"),
                state.last_status,
                state.last_weight,
                state.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
        }
    }
}
