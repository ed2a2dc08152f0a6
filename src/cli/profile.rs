//! Profile command: show or edit the monitored animal.

use serde::{Deserialize, Serialize};

use crate::core::{AnimalProfile, MonitoringMode};
use crate::error::{LitterError, Result};
use crate::storage::ProfileStore;

/// Action to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileAction {
    /// Show the profile, creating the default one if none exists.
    Show,
    /// Update the name and/or monitoring mode.
    Set {
        name: Option<String>,
        mode: Option<MonitoringMode>,
    },
}

/// Options for the profile command.
#[derive(Debug, Clone, Default)]
pub struct ProfileOptions {
    /// Output as JSON.
    pub json: bool,
    /// Suppress output.
    pub quiet: bool,
    /// Profile to act on. Defaults to the first profile.
    pub animal_id: Option<String>,
}

/// Output format for the profile command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileOutput {
    /// Whether the command was successful.
    pub success: bool,
    /// The profile after the action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<AnimalProfile>,
    /// Whether `set` changed anything.
    pub updated: bool,
    /// Error message if command failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProfileOutput {
    /// Create a successful output.
    pub fn success(profile: AnimalProfile, updated: bool) -> Self {
        Self {
            success: true,
            profile: Some(profile),
            updated,
            error: None,
        }
    }

    /// Create a failed output.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            profile: None,
            updated: false,
            error: Some(error.into()),
        }
    }
}

/// The profile command implementation.
pub struct ProfileCommand<S: ProfileStore> {
    store: S,
}

impl<S: ProfileStore> ProfileCommand<S> {
    /// Create a new profile command.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Run `action`.
    pub fn run(&self, action: &ProfileAction, options: &ProfileOptions) -> ProfileOutput {
        let id = options.animal_id.as_deref();
        let result = match action {
            ProfileAction::Show => self.store.resolve_profile(id).map(|p| (p, false)),
            ProfileAction::Set { name, mode } => self.set(id, name.as_deref(), *mode),
        };

        match result {
            Ok((profile, updated)) => ProfileOutput::success(profile, updated),
            Err(e) => ProfileOutput::failure(e.to_string()),
        }
    }

    fn set(
        &self,
        id: Option<&str>,
        name: Option<&str>,
        mode: Option<MonitoringMode>,
    ) -> Result<(AnimalProfile, bool)> {
        let name = name.map(str::trim);
        if name.is_some_and(str::is_empty) {
            return Err(LitterError::invalid_input("profile name cannot be empty"));
        }

        let mut profile = self.store.resolve_profile(id)?;
        let mut updated = false;
        if let Some(name) = name.filter(|n| *n != profile.name) {
            profile.name = name.to_string();
            updated = true;
        }
        if let Some(mode) = mode.filter(|m| *m != profile.monitoring_mode) {
            profile.monitoring_mode = mode;
            updated = true;
        }

        if updated {
            profile.touch();
            self.store.put_profile(&profile)?;
            tracing::info!(
                animal_id = %profile.id,
                mode = %profile.monitoring_mode,
                "updated profile"
            );
        }
        Ok((profile, updated))
    }

    /// Format output based on options.
    pub fn format_output(&self, output: &ProfileOutput, options: &ProfileOptions) -> String {
        if options.quiet {
            return String::new();
        }

        if options.json {
            return serde_json::to_string_pretty(output).unwrap_or_else(|_| "{}".to_string());
        }

        match (&output.profile, output.success) {
            (Some(profile), true) => format!(
                "{}\n  id:   {}\n  mode: {}\n  since {}\n",
                profile.display_name(),
                profile.id,
                profile.monitoring_mode,
                profile.created_at.format("%Y-%m-%d")
            ),
            _ => format!(
                "Profile failed: {}\n",
                output.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}
