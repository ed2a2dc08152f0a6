//! Animal profile settings read by the alert engine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::LitterError;

/// Name given to the profile created on first use.
pub const DEFAULT_ANIMAL_NAME: &str = "My Cat";

/// Named threshold profile governing alert sensitivity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum MonitoringMode {
    /// Tightest thresholds, for animals with a known condition.
    Strict,
    /// Default thresholds.
    #[default]
    Standard,
    /// Loose thresholds; young animals gain weight and visit often.
    Kitten,
}

impl MonitoringMode {
    /// All modes, in table order.
    pub const ALL: [MonitoringMode; 3] = [Self::Strict, Self::Standard, Self::Kitten];

    /// Get the mode name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Standard => "standard",
            Self::Kitten => "kitten",
        }
    }
}

impl fmt::Display for MonitoringMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MonitoringMode {
    type Err = LitterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "standard" => Ok(Self::Standard),
            "kitten" => Ok(Self::Kitten),
            other => Err(LitterError::invalid_input(format!(
                "unknown monitoring mode '{}' (expected strict, standard or kitten)",
                other
            ))),
        }
    }
}

/// Accept any string for the mode, falling back to standard.
///
/// Profiles edited by hand may carry an empty or misspelled mode; that must
/// not make the whole profile unreadable.
fn lenient_mode<'de, D>(deserializer: D) -> Result<MonitoringMode, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(match raw {
        None => MonitoringMode::default(),
        Some(s) => s.parse().unwrap_or_else(|_| {
            tracing::warn!(mode = %s, "unknown monitoring mode in profile, using standard");
            MonitoringMode::default()
        }),
    })
}

/// The monitored animal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnimalProfile {
    /// Profile identifier.
    pub id: String,
    /// Display name used in alert messages.
    pub name: String,
    /// Threshold profile for alert rules.
    #[serde(default, deserialize_with = "lenient_mode")]
    pub monitoring_mode: MonitoringMode,
    /// When the profile was created.
    pub created_at: DateTime<Utc>,
    /// When the profile was last changed.
    pub updated_at: DateTime<Utc>,
}

impl AnimalProfile {
    /// Create a profile with standard monitoring.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            monitoring_mode: MonitoringMode::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the monitoring mode.
    pub fn with_mode(mut self, mode: MonitoringMode) -> Self {
        self.monitoring_mode = mode;
        self
    }

    /// Name to use in messages; blank names read as "Your cat".
    pub fn display_name(&self) -> &str {
        let trimmed = self.name.trim();
        if trimmed.is_empty() {
            "Your cat"
        } else {
            trimmed
        }
    }

    /// Update the `updated_at` timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Default for AnimalProfile {
    fn default() -> Self {
        Self::new(DEFAULT_ANIMAL_NAME)
    }
}
