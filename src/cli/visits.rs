//! Visits command: list recorded visits and manage synthetic history.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::alert::round2;
use crate::core::Visit;
use crate::error::Result;
use crate::storage::VisitStore;

/// Days of history `visits seed` generates by default.
pub const DEFAULT_SEED_DAYS: u32 = 50;

/// Action to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisitsAction {
    /// Most recent visits first.
    List { limit: usize },
    /// Replace every visit with one synthetic visit per day.
    Seed { days: u32, seed: Option<u64> },
    /// Delete every visit.
    Clear,
}

impl VisitsAction {
    fn name(&self) -> &'static str {
        match self {
            Self::List { .. } => "list",
            Self::Seed { .. } => "seed",
            Self::Clear => "clear",
        }
    }
}

/// Options for the visits command.
#[derive(Debug, Clone, Default)]
pub struct VisitsOptions {
    /// Output as JSON.
    pub json: bool,
    /// Suppress output.
    pub quiet: bool,
}

/// Output format for the visits command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisitsOutput {
    /// Whether the command was successful.
    pub success: bool,
    /// Action that ran.
    pub action: String,
    /// Visits listed or generated.
    pub visits: Vec<Visit>,
    /// Visits listed or generated.
    pub count: usize,
    /// Visits deleted by `seed` or `clear`.
    pub removed: usize,
    /// Error message if command failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VisitsOutput {
    /// Create a successful output.
    pub fn success(action: &str, visits: Vec<Visit>, removed: usize) -> Self {
        Self {
            success: true,
            action: action.to_string(),
            count: visits.len(),
            visits,
            removed,
            error: None,
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

/// One visit per day for the `days` days before `now`, weights between 4.0
/// and 5.0 kg at a random time of day.
pub fn synthetic_history(now: DateTime<Utc>, days: u32, seed: u64) -> Vec<Visit> {
    let mut rng = fastrand::Rng::with_seed(seed);
    let first_day = now.date_naive() - Duration::days(i64::from(days));

    (0..days)
        .filter_map(|i| {
            let day = first_day + Duration::days(i64::from(i));
            let time = NaiveTime::from_hms_opt(rng.u32(0..24), rng.u32(0..60), 0)?;
            let entry = day.and_time(time).and_utc();
            let weight = round2(4.0 + rng.f64());
            Some(Visit::new(entry, weight).with_weight_out(weight))
        })
        .collect()
}

/// The visits command implementation.
pub struct VisitsCommand<S: VisitStore> {
    store: S,
}

impl<S: VisitStore> VisitsCommand<S> {
    /// Create a new visits command.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Run `action` now.
    pub fn run(&self, action: &VisitsAction) -> VisitsOutput {
        self.run_at(action, Utc::now())
    }

    /// Run `action` as of `now`.
    pub fn run_at(&self, action: &VisitsAction, now: DateTime<Utc>) -> VisitsOutput {
        let name = action.name();
        let result = match action {
            VisitsAction::List { limit } => self
                .store
                .recent_visits(*limit)
                .map(|visits| VisitsOutput::success(name, visits, 0)),
            VisitsAction::Seed { days, seed } => {
                let seed = seed.unwrap_or_else(|| now.timestamp().unsigned_abs());
                self.seed(now, *days, seed)
                    .map(|(visits, removed)| VisitsOutput::success(name, visits, removed))
            }
            VisitsAction::Clear => self
                .clear()
                .map(|removed| VisitsOutput::success(name, Vec::new(), removed)),
        };

        result.unwrap_or_else(|e| VisitsOutput::failure(name, e.to_string()))
    }

    fn seed(&self, now: DateTime<Utc>, days: u32, seed: u64) -> Result<(Vec<Visit>, usize)> {
        let removed = self.store.clear_visits()?;
        let visits = synthetic_history(now, days, seed);
        for visit in &visits {
            self.store.insert_visit(visit)?;
        }
        tracing::info!(removed, created = visits.len(), seed, "seeded visit history");
        Ok((visits, removed))
    }

    fn clear(&self) -> Result<usize> {
        let removed = self.store.clear_visits()?;
        tracing::info!(removed, "cleared visit history");
        Ok(removed)
    }

    /// Format output based on options.
    pub fn format_output(&self, output: &VisitsOutput, options: &VisitsOptions) -> String {
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

fn format_human_readable(output: &VisitsOutput) -> String {
    if !output.success {
        return format!(
            "Visits {} failed: {}\n",
            output.action,
            output.error.as_deref().unwrap_or("unknown error")
        );
    }

    match output.action.as_str() {
        "seed" => format!(
            "Removed {} visits, seeded {} visits.\n",
            output.removed, output.count
        ),
        "clear" => format!("Removed {} visits.\n", output.removed),
        _ => {
            if output.visits.is_empty() {
                return "No visits recorded.\n".to_string();
            }
            let mut lines = vec![format!("Visits ({} shown):", output.count)];
            lines.push(format!(
                "  {:<19}  {:>8}  {:>8}  {}",
                "ENTRY", "IN (kg)", "OUT (kg)", "DURATION"
            ));
            for visit in &output.visits {
                let duration = visit
                    .duration_seconds
                    .map(|s| format!("{}s", s))
                    .unwrap_or_else(|| "-".to_string());
                lines.push(format!(
                    "  {:<19}  {:>8.2}  {:>8.2}  {}",
                    visit.entry_time.format("%Y-%m-%d %H:%M:%S"),
                    visit.weight_in,
                    visit.weight_out(),
                    duration
                ));
            }
            lines.push(String::new());
            lines.join("\n")
        }
    }
}
