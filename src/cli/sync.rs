//! Sync and simulate commands.
//!
//! Both run one cycle of the sensor state machine. `sync` polls the
//! configured reading source; `simulate` feeds readings given on the
//! command line through the same path.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::sensor::{ReadingSource, Readings, SensorEventMachine, SyncSummary};
use crate::storage::{SensorStateStore, StoreLocks, VisitStore};

/// Options for the sync command.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Output as JSON.
    pub json: bool,
    /// Suppress output.
    pub quiet: bool,
}

/// Output format for the sync command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOutput {
    /// Whether the cycle completed.
    pub success: bool,
    /// Source the readings came from.
    pub source: String,
    /// What the cycle did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<SyncSummary>,
    /// Whether a failed cycle is worth retrying.
    pub retryable: bool,
    /// Error message if the cycle failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncOutput {
    /// Create a successful output.
    pub fn success(source: impl Into<String>, summary: SyncSummary) -> Self {
        Self {
            success: true,
            source: source.into(),
            summary: Some(summary),
            retryable: false,
            error: None,
        }
    }

    /// Create a failed output.
    pub fn failure(source: impl Into<String>, error: impl Into<String>, retryable: bool) -> Self {
        Self {
            success: false,
            source: source.into(),
            summary: None,
            retryable,
            error: Some(error.into()),
        }
    }
}

/// The sync command implementation.
pub struct SyncCommand<S: SensorStateStore + VisitStore + StoreLocks> {
    machine: SensorEventMachine<S>,
}

impl<S: SensorStateStore + VisitStore + StoreLocks> SyncCommand<S> {
    /// Create a new sync command.
    pub fn new(machine: SensorEventMachine<S>) -> Self {
        Self { machine }
    }

    /// Run one cycle against `source`.
    pub fn run(&self, source: &dyn ReadingSource, credential: Option<&str>) -> SyncOutput {
        match self.machine.run(source, credential) {
            Ok(summary) => SyncOutput::success(source.name(), summary),
            Err(e) => SyncOutput::failure(source.name(), e.to_string(), e.is_retryable()),
        }
    }

    /// Run one cycle on readings given directly, without polling.
    pub fn simulate(&self, readings: Readings) -> SyncOutput {
        match self.machine.apply(readings, Utc::now()) {
            Ok(summary) => SyncOutput::success("simulated", summary),
            Err(e) => SyncOutput::failure("simulated", e.to_string(), e.is_retryable()),
        }
    }

    /// Format output based on options.
    pub fn format_output(&self, output: &SyncOutput, options: &SyncOptions) -> String {
        if options.quiet {
            return String::new();
        }

        if options.json {
            serde_json::to_string_pretty(output).unwrap_or_else(|_| "{}".to_string())
        } else {
            self.format_human_readable(output)
        }
    }

    fn format_human_readable(&self, output: &SyncOutput) -> String {
        if !output.success {
            let hint = if output.retryable { " (will retry next cycle)" } else { "" };
            return format!(
                "Sync failed: {}{}\n",
                output.error.as_deref().unwrap_or("unknown error"),
                hint
            );
        }

        let Some(summary) = &output.summary else {
            return "Sync completed.\n".to_string();
        };

        let mut text = format!(
            "Sensor {} via {}: weight {:.2} kg, status {:?}\n",
            summary.sensor_id, output.source, summary.fetched.weight, summary.fetched.status
        );
        if !summary.fetched.failed_channels.is_empty() {
            let failed: Vec<&str> = summary
                .fetched
                .failed_channels
                .iter()
                .map(|c| c.as_str())
                .collect();
            text.push_str(&format!("  Degraded channels: {}\n", failed.join(", ")));
        }

        if summary.is_no_op() {
            text.push_str("  No change.\n");
            return text;
        }
        for action in &summary.actions {
            text.push_str(&format!("  {}\n", action.as_str()));
        }
        if let Some(visit) = &summary.visit {
            text.push_str(&format!(
                "  Visit {} at {} ({:.2} kg)\n",
                visit.id,
                visit.entry_time.format("%Y-%m-%d %H:%M:%S"),
                visit.weight_in
            ));
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{StaticReadingSource, SyncAction, SyncOptions as MachineOptions};
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    fn command(store: &Arc<MemoryStore>) -> SyncCommand<Arc<MemoryStore>> {
        SyncCommand::new(SensorEventMachine::new(
            Arc::clone(store),
            MachineOptions::default(),
        ))
    }

    #[test]
    fn test_sync_enter_then_exit() {
        let store = Arc::new(MemoryStore::new());
        let cmd = command(&store);

        let enter = cmd.run(&StaticReadingSource::new(4.5, "Cat Inside", "", 0), Some("token"));
        assert!(enter.success);
        assert_eq!(store.visit_count(), 0);

        let exit = cmd.run(&StaticReadingSource::new(0.0, "Cat Exited", "", 95), Some("token"));
        assert!(exit.success);
        let summary = exit.summary.unwrap();
        assert!(summary.actions.contains(&SyncAction::VisitCreated));
        assert_eq!(store.visit_count(), 1);
    }

    #[test]
    fn test_sync_missing_credential_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        let output = command(&store).run(&StaticReadingSource::new(4.5, "Cat Inside", "", 0), None);
        assert!(!output.success);
        assert!(!output.retryable);
        assert!(output.error.unwrap().contains("credential"));
    }

    #[test]
    fn test_sync_unreachable_is_retryable() {
        let store = Arc::new(MemoryStore::new());
        let output = command(&store).run(&StaticReadingSource::unreachable(), Some("token"));
        assert!(!output.success);
        assert!(output.retryable);
    }

    #[test]
    fn test_simulate_needs_no_credential() {
        let store = Arc::new(MemoryStore::new());
        let cmd = command(&store);

        let enter = cmd.simulate(Readings::from_raw(Some("4.8"), Some("Cat Inside"), Some(""), Some("0")));
        assert!(enter.success);
        assert_eq!(enter.source, "simulated");

        let exit = cmd.simulate(Readings::from_raw(Some("0"), Some("Cat Exited"), Some(""), Some("120")));
        let visit = exit.summary.unwrap().visit.unwrap();
        assert_eq!(visit.weight_in, 4.8);
        assert_eq!(visit.duration_seconds, Some(120));
    }

    #[test]
    fn test_sync_format_output() {
        let store = Arc::new(MemoryStore::new());
        let cmd = command(&store);
        let output = cmd.run(&StaticReadingSource::new(4.5, "Cat Inside", "", 0), Some("token"));

        let quiet = SyncOptions {
            quiet: true,
            ..Default::default()
        };
        assert!(cmd.format_output(&output, &quiet).is_empty());

        let json = SyncOptions {
            json: true,
            ..Default::default()
        };
        let parsed: serde_json::Value =
            serde_json::from_str(&cmd.format_output(&output, &json)).unwrap();
        assert_eq!(parsed["success"], true);
        assert_eq!(parsed["summary"]["sensor_id"], "default");

        let human = cmd.format_output(&output, &SyncOptions::default());
        assert!(human.contains("Cat Inside"));
    }
}
