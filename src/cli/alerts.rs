//! Alerts command: list, acknowledge, and count alerts.

use serde::{Deserialize, Serialize};

use crate::core::Alert;
use crate::error::{LitterError, Result};
use crate::storage::{AlertCounts, AlertQuery, AlertStore};

/// Default page size for `alerts list`.
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Action to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertsAction {
    /// Newest alerts first.
    List { limit: usize },
    /// Unread, undismissed alerts, critical first.
    Active,
    /// Mark an alert read.
    Read { id: String },
    /// Dismiss an alert.
    Dismiss { id: String },
    /// Counts by state and severity.
    Stats,
}

impl AlertsAction {
    fn name(&self) -> &'static str {
        match self {
            Self::List { .. } => "list",
            Self::Active => "active",
            Self::Read { .. } => "read",
            Self::Dismiss { .. } => "dismiss",
            Self::Stats => "stats",
        }
    }
}

/// Options for the alerts command.
#[derive(Debug, Clone, Default)]
pub struct AlertsOptions {
    /// Output as JSON.
    pub json: bool,
    /// Suppress output.
    pub quiet: bool,
    /// Restrict to one animal.
    pub animal_id: Option<String>,
}

/// Output format for the alerts command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertsOutput {
    /// Whether the command was successful.
    pub success: bool,
    /// Action that ran.
    pub action: String,
    /// Alerts listed or updated.
    pub alerts: Vec<Alert>,
    /// Number of alerts in `alerts`.
    pub count: usize,
    /// Counts, for `stats`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<AlertCounts>,
    /// Error message if command failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AlertsOutput {
    /// Create a successful output listing `alerts`.
    pub fn success(action: &str, alerts: Vec<Alert>) -> Self {
        Self {
            success: true,
            action: action.to_string(),
            count: alerts.len(),
            alerts,
            ..Default::default()
        }
    }

    /// Create a successful stats output.
    pub fn stats(counts: AlertCounts) -> Self {
        Self {
            success: true,
            action: "stats".to_string(),
            stats: Some(counts),
            ..Default::default()
        }
    }

    /// Create a failed output.
    pub fn failure(action: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            action: action.to_string(),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// The alerts command implementation.
pub struct AlertsCommand<S: AlertStore> {
    store: S,
}

impl<S: AlertStore> AlertsCommand<S> {
    /// Create a new alerts command.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Run `action`.
    pub fn run(&self, action: &AlertsAction, options: &AlertsOptions) -> AlertsOutput {
        let name = action.name();
        let result = match action {
            AlertsAction::List { limit } => self
                .list(options, false, Some(*limit))
                .map(|alerts| AlertsOutput::success(name, alerts)),
            AlertsAction::Active => self
                .list(options, true, None)
                .map(|alerts| AlertsOutput::success(name, alerts)),
            AlertsAction::Read { id } => self
                .update(id, Some(true), None)
                .map(|alert| AlertsOutput::success(name, vec![alert])),
            AlertsAction::Dismiss { id } => self
                .update(id, None, Some(true))
                .map(|alert| AlertsOutput::success(name, vec![alert])),
            AlertsAction::Stats => self
                .store
                .alert_counts(options.animal_id.as_deref())
                .map(AlertsOutput::stats),
        };

        result.unwrap_or_else(|e| AlertsOutput::failure(name, e.to_string()))
    }

    fn list(&self, options: &AlertsOptions, active_only: bool, limit: Option<usize>) -> Result<Vec<Alert>> {
        self.store.list_alerts(&AlertQuery {
            animal_id: options.animal_id.clone(),
            active_only,
            limit,
        })
    }

    fn update(&self, id: &str, is_read: Option<bool>, is_dismissed: Option<bool>) -> Result<Alert> {
        let alert = self
            .store
            .set_alert_flags(id, is_read, is_dismissed)?
            .ok_or_else(|| LitterError::not_found("alert", id))?;
        tracing::info!(alert_id = id, ?is_read, ?is_dismissed, "updated alert");
        Ok(alert)
    }

    /// Format output based on options.
    pub fn format_output(&self, output: &AlertsOutput, options: &AlertsOptions) -> String {
        if options.quiet {
            return String::new();
        }

        if options.json {
            serde_json::to_string_pretty(output).unwrap_or_else(|_| "{}".to_string())
        } else {
            format_human_readable(output)
        }
    }
}

fn format_human_readable(output: &AlertsOutput) -> String {
    if !output.success {
        return format!(
            "Alerts {} failed: {}\n",
            output.action,
            output.error.as_deref().unwrap_or("unknown error")
        );
    }

    if let Some(stats) = &output.stats {
        return format!(
            "Alerts: {} total, {} active\n  critical: {}\n  warning:  {}\n  info:     {}\n",
            stats.total, stats.active, stats.critical, stats.warning, stats.info
        );
    }

    match output.action.as_str() {
        "read" | "dismiss" => {
            let verb = if output.action == "read" { "Marked read" } else { "Dismissed" };
            output
                .alerts
                .first()
                .map(|a| format!("{}: {}\n", verb, a.id))
                .unwrap_or_default()
        }
        _ => {
            if output.alerts.is_empty() {
                return "No alerts found.\n".to_string();
            }
            let mut lines = vec![format!("Alerts ({} found):", output.count)];
            for alert in &output.alerts {
                let mut flags = Vec::new();
                if alert.is_read {
                    flags.push("read");
                }
                if alert.is_dismissed {
                    flags.push("dismissed");
                }
                let flags = if flags.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", flags.join(", "))
                };
                lines.push(format!(
                    "  {}  {:<8}  {}{}",
                    alert.created_at.format("%Y-%m-%d %H:%M"),
                    alert.severity,
                    alert.message,
                    flags
                ));
                lines.push(format!("      id: {}", alert.id));
            }
            lines.push(String::new());
            lines.join("\n")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AlertCandidate, AlertType, Severity};
    use crate::storage::MemoryStore;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    fn seed(store: &MemoryStore) -> Vec<Alert> {
        let now = Utc::now();
        let alerts = vec![
            AlertCandidate::new(AlertType::FrequencyHigh, "more visits than usual")
                .into_alert(None, now - Duration::hours(3)),
            AlertCandidate::new(AlertType::WeightUrgent, "rapid weight loss")
                .into_alert(None, now - Duration::hours(2)),
            AlertCandidate::new(AlertType::WeightGain, "weight gain")
                .into_alert(None, now - Duration::hours(1)),
        ];
        for alert in &alerts {
            store.insert_alert(alert).unwrap();
        }
        alerts
    }

    #[test]
    fn test_list_newest_first_with_limit() {
        let store = Arc::new(MemoryStore::new());
        let alerts = seed(&store);
        let cmd = AlertsCommand::new(Arc::clone(&store));

        let output = cmd.run(&AlertsAction::List { limit: 2 }, &AlertsOptions::default());
        assert!(output.success);
        assert_eq!(output.count, 2);
        assert_eq!(output.alerts[0].id, alerts[2].id);
        assert_eq!(output.alerts[1].id, alerts[1].id);
    }

    #[test]
    fn test_active_sorted_by_severity() {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        let cmd = AlertsCommand::new(Arc::clone(&store));

        let output = cmd.run(&AlertsAction::Active, &AlertsOptions::default());
        assert_eq!(output.count, 3);
        assert_eq!(output.alerts[0].severity, Severity::Critical);
    }

    #[test]
    fn test_read_and_dismiss_leave_active_list() {
        let store = Arc::new(MemoryStore::new());
        let alerts = seed(&store);
        let cmd = AlertsCommand::new(Arc::clone(&store));
        let options = AlertsOptions::default();

        let read = cmd.run(&AlertsAction::Read { id: alerts[0].id.clone() }, &options);
        assert!(read.success);
        assert!(read.alerts[0].is_read);

        let dismissed = cmd.run(&AlertsAction::Dismiss { id: alerts[1].id.clone() }, &options);
        assert!(dismissed.alerts[0].is_dismissed);

        let active = cmd.run(&AlertsAction::Active, &options);
        assert_eq!(active.count, 1);
        assert_eq!(active.alerts[0].id, alerts[2].id);

        let stats = cmd.run(&AlertsAction::Stats, &options).stats.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 1);
        // The dismissed critical alert is no longer counted.
        assert_eq!(stats.critical, 0);
    }

    #[test]
    fn test_unknown_alert_fails() {
        let store = Arc::new(MemoryStore::new());
        let cmd = AlertsCommand::new(store);
        let output = cmd.run(
            &AlertsAction::Dismiss { id: "missing".to_string() },
            &AlertsOptions::default(),
        );
        assert!(!output.success);
        assert_eq!(output.action, "dismiss");
    }

    #[test]
    fn test_format_output_modes() {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        let cmd = AlertsCommand::new(Arc::clone(&store));
        let output = cmd.run(&AlertsAction::Stats, &AlertsOptions::default());

        let human = cmd.format_output(&output, &AlertsOptions::default());
        assert!(human.contains("3 total"));

        let quiet = AlertsOptions {
            quiet: true,
            ..Default::default()
        };
        assert!(cmd.format_output(&output, &quiet).is_empty());
    }
}
