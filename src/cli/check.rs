//! Check command: run one alert check for an animal.

use serde::{Deserialize, Serialize};

use crate::alerts::{AlertCheckSummary, AlertEngine};
use crate::storage::{AlertStore, ProfileStore, StoreLocks, VisitStore};

/// Options for the check command.
#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    /// Output as JSON.
    pub json: bool,
    /// Suppress output.
    pub quiet: bool,
    /// Animal to check. Defaults to the first profile.
    pub animal_id: Option<String>,
}

/// Output format for the check command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOutput {
    /// Whether the check completed.
    pub success: bool,
    /// What the check found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<AlertCheckSummary>,
    /// Whether a failed check is worth retrying.
    pub retryable: bool,
    /// Error message if the check failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckOutput {
    /// Create a successful output.
    pub fn success(summary: AlertCheckSummary) -> Self {
        Self {
            success: true,
            summary: Some(summary),
            retryable: false,
            error: None,
        }
    }

    /// Create a failed output.
    pub fn failure(error: impl Into<String>, retryable: bool) -> Self {
        Self {
            success: false,
            summary: None,
            retryable,
            error: Some(error.into()),
        }
    }
}

/// The check command implementation.
pub struct CheckCommand<S: VisitStore + AlertStore + ProfileStore + StoreLocks> {
    engine: AlertEngine<S>,
}

impl<S: VisitStore + AlertStore + ProfileStore + StoreLocks> CheckCommand<S> {
    /// Create a new check command.
    pub fn new(engine: AlertEngine<S>) -> Self {
        Self { engine }
    }

    /// Run the check.
    pub fn run(&self, options: &CheckOptions) -> CheckOutput {
        match self.engine.run(options.animal_id.as_deref()) {
            Ok(summary) => CheckOutput::success(summary),
            Err(e) => CheckOutput::failure(e.to_string(), e.is_retryable()),
        }
    }

    /// Format output based on options.
    pub fn format_output(&self, output: &CheckOutput, options: &CheckOptions) -> String {
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

fn format_human_readable(output: &CheckOutput) -> String {
    if !output.success {
        return format!(
            "Check failed: {}\n",
            output.error.as_deref().unwrap_or("unknown error")
        );
    }
    let Some(summary) = &output.summary else {
        return "Check completed.\n".to_string();
    };

    let mut text = format!(
        "{} ({} mode)\n",
        summary.message, summary.monitoring_mode
    );
    for alert in &summary.created {
        text.push_str(&format!(
            "  [{}] {}: {}\n",
            alert.severity, alert.alert_type, alert.message
        ));
    }
    if !summary.skipped_duplicates.is_empty() {
        let skipped: Vec<&str> = summary
            .skipped_duplicates
            .iter()
            .map(|t| t.as_str())
            .collect();
        text.push_str(&format!("  Already alerted: {}\n", skipped.join(", ")));
    }
    for err in &summary.rule_errors {
        text.push_str(&format!("  Rule {} failed: {}\n", err.alert_type, err.message));
    }
    if summary.insufficient_history {
        text.push_str("  Not enough history for every rule yet.\n");
    }
    text
}
