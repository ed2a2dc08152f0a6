//! Alert records produced by the rule engine.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LitterError;

/// Diagnostic inputs recorded with an alert. Written for audit, never re-parsed.
pub type TriggerData = BTreeMap<String, serde_json::Value>;

/// Kind of health alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Sharp weight drop within 48 hours.
    WeightUrgent,
    /// Gradual loss against the baseline.
    WeightTrend,
    /// Gradual gain against the baseline.
    WeightGain,
    /// Many visits within one hour.
    FrequencyCritical,
    /// Today's visits well above the weekly average.
    FrequencyHigh,
    /// No visits for a long stretch.
    FrequencyLow,
}

impl AlertType {
    /// All alert types, weight rules first.
    pub const ALL: [AlertType; 6] = [
        Self::WeightUrgent,
        Self::WeightTrend,
        Self::WeightGain,
        Self::FrequencyCritical,
        Self::FrequencyHigh,
        Self::FrequencyLow,
    ];

    /// Get the alert type as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WeightUrgent => "weight_urgent",
            Self::WeightTrend => "weight_trend",
            Self::WeightGain => "weight_gain",
            Self::FrequencyCritical => "frequency_critical",
            Self::FrequencyHigh => "frequency_high",
            Self::FrequencyLow => "frequency_low",
        }
    }

    /// Severity this type is always raised with.
    pub fn severity(&self) -> Severity {
        match self {
            Self::WeightUrgent | Self::FrequencyCritical => Severity::Critical,
            Self::WeightTrend | Self::FrequencyHigh | Self::FrequencyLow => Severity::Warning,
            Self::WeightGain => Severity::Info,
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertType {
    type Err = LitterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| LitterError::invalid_input(format!("unknown alert type '{}'", s)))
    }
}

/// Alert severity. Ordered so that `Critical` is the greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// Get the severity as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An alert a rule wants to raise, before deduplication.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertCandidate {
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub trigger_data: TriggerData,
}

impl AlertCandidate {
    /// Create a candidate with the type's standard severity.
    pub fn new(alert_type: AlertType, message: impl Into<String>) -> Self {
        Self {
            alert_type,
            severity: alert_type.severity(),
            message: message.into(),
            trigger_data: TriggerData::new(),
        }
    }

    /// Record one diagnostic value.
    pub fn with_data(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.trigger_data.insert(key.to_string(), value.into());
        self
    }

    /// Turn the candidate into a stored alert.
    pub fn into_alert(self, animal_id: Option<String>, now: DateTime<Utc>) -> Alert {
        Alert {
            id: Uuid::new_v4().to_string(),
            animal_id,
            alert_type: self.alert_type,
            severity: self.severity,
            message: self.message,
            trigger_data: self.trigger_data,
            is_read: false,
            is_dismissed: false,
            created_at: now,
        }
    }
}

/// A persisted alert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    /// Unique alert identifier.
    pub id: String,
    /// Animal the alert concerns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animal_id: Option<String>,
    /// Rule that raised the alert.
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    /// Severity at creation.
    pub severity: Severity,
    /// Human-readable explanation.
    pub message: String,
    /// Inputs the rule used.
    #[serde(default)]
    pub trigger_data: TriggerData,
    /// Caretaker has seen the alert.
    #[serde(default)]
    pub is_read: bool,
    /// Caretaker has dismissed the alert.
    #[serde(default)]
    pub is_dismissed: bool,
    /// When the alert was raised.
    pub created_at: DateTime<Utc>,
}

impl Alert {
    /// Unread and not dismissed.
    pub fn is_active(&self) -> bool {
        !self.is_read && !self.is_dismissed
    }
}

/// Round to two decimals for trigger data.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Round to one decimal for percentages.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_mapping() {
        assert_eq!(AlertType::WeightUrgent.severity(), Severity::Critical);
        assert_eq!(AlertType::FrequencyCritical.severity(), Severity::Critical);
        assert_eq!(AlertType::WeightTrend.severity(), Severity::Warning);
        assert_eq!(AlertType::FrequencyHigh.severity(), Severity::Warning);
        assert_eq!(AlertType::FrequencyLow.severity(), Severity::Warning);
        assert_eq!(AlertType::WeightGain.severity(), Severity::Info);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn test_type_parse() {
        for t in AlertType::ALL {
            assert_eq!(t.as_str().parse::<AlertType>().unwrap(), t);
        }
        assert!("weight_loss".parse::<AlertType>().is_err());
    }

    #[test]
    fn test_candidate_into_alert() {
        let now = Utc::now();
        let alert = AlertCandidate::new(AlertType::FrequencyLow, "quiet day")
            .with_data("hours", 24)
            .into_alert(Some("cat-1".to_string()), now);
        assert_eq!(alert.alert_type, AlertType::FrequencyLow);
        assert_eq!(alert.severity, Severity::Warning);
        assert_eq!(alert.trigger_data["hours"], serde_json::json!(24));
        assert!(alert.is_active());
        assert_eq!(alert.created_at, now);
    }

    #[test]
    fn test_alert_json_uses_type_key() {
        let alert = AlertCandidate::new(AlertType::WeightGain, "m").into_alert(None, Utc::now());
        let value = serde_json::to_value(&alert).unwrap();
        assert_eq!(value["type"], "weight_gain");
        assert_eq!(value["severity"], "info");
    }

    #[test]
    fn test_rounding() {
        assert_eq!(round2(4.456), 4.46);
        assert_eq!(round1(-20.04), -20.0);
    }
}
