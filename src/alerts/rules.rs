//! Weight and frequency rules.
//!
//! Each rule reads the windows it needs from the visit store and returns at
//! most one candidate. Rules never write; deduplication and persistence
//! happen in the engine.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::alerts::baseline::{mean_weight, recent_range, urgent_range};
use crate::alerts::thresholds::Thresholds;
use crate::core::alert::{round1, round2};
use crate::core::{AlertCandidate, AlertType};
use crate::error::Result;
use crate::storage::{TimeRange, VisitStore};

/// Inputs shared by every rule in one evaluation.
#[derive(Debug, Clone)]
pub struct RuleInput<'a> {
    /// Evaluation instant.
    pub now: DateTime<Utc>,
    /// Start of the caretaker's current calendar day.
    pub today_start: DateTime<Utc>,
    /// Thresholds for the animal's monitoring mode.
    pub thresholds: Thresholds,
    /// Name used in messages.
    pub animal_name: &'a str,
}

fn percent(change: f64) -> f64 {
    round1(change * 100.0)
}

/// Sharp drop between the first and last visit of the last 48 hours.
pub fn weight_urgent<V: VisitStore + ?Sized>(
    visits: &V,
    input: &RuleInput<'_>,
    baseline: f64,
) -> Result<Option<AlertCandidate>> {
    let window = visits.find_visits(&urgent_range(input.now))?;
    let (Some(earliest), Some(latest)) = (window.first(), window.last()) else {
        return Ok(None);
    };
    if window.len() < 2 {
        return Ok(None);
    }

    let change = (latest.weight_in - earliest.weight_in) / baseline;
    tracing::debug!(change, threshold = input.thresholds.urgent_loss, "weight_urgent");
    if change >= -input.thresholds.urgent_loss {
        return Ok(None);
    }

    let message = format!(
        "Sudden weight drop: {} lost {:.1}% in the last 48 hours. Rapid loss can mean dehydration; watch closely and call the vet if it continues.",
        input.animal_name,
        change.abs() * 100.0
    );
    Ok(Some(
        AlertCandidate::new(AlertType::WeightUrgent, message)
            .with_data("baseline_weight", round2(baseline))
            .with_data("current_weight", round2(latest.weight_in))
            .with_data("change_percent", percent(change))
            .with_data("timeframe", "48 hours"),
    ))
}

/// Average weight over the last 7 days, or `None` without visits.
fn recent_average<V: VisitStore + ?Sized>(visits: &V, now: DateTime<Utc>) -> Result<Option<f64>> {
    Ok(mean_weight(&visits.find_visits(&recent_range(now))?))
}

/// Gradual loss: the weekly average is well below the baseline.
pub fn weight_trend<V: VisitStore + ?Sized>(
    visits: &V,
    input: &RuleInput<'_>,
    baseline: f64,
) -> Result<Option<AlertCandidate>> {
    let Some(recent) = recent_average(visits, input.now)? else {
        return Ok(None);
    };
    let change = (recent - baseline) / baseline;
    tracing::debug!(change, threshold = input.thresholds.trend_loss, "weight_trend");
    if change >= -input.thresholds.trend_loss {
        return Ok(None);
    }

    let message = format!(
        "{} is down {:.1}% against their usual weight this week. A steady decline like this is worth a vet check.",
        input.animal_name,
        change.abs() * 100.0
    );
    Ok(Some(
        AlertCandidate::new(AlertType::WeightTrend, message)
            .with_data("baseline_weight", round2(baseline))
            .with_data("current_average", round2(recent))
            .with_data("change_percent", percent(change))
            .with_data("timeframe", "7 days"),
    ))
}

/// Gradual gain: the weekly average is well above the baseline.
pub fn weight_gain<V: VisitStore + ?Sized>(
    visits: &V,
    input: &RuleInput<'_>,
    baseline: f64,
) -> Result<Option<AlertCandidate>> {
    let Some(recent) = recent_average(visits, input.now)? else {
        return Ok(None);
    };
    let change = (recent - baseline) / baseline;
    tracing::debug!(change, threshold = input.thresholds.gain, "weight_gain");
    if change <= input.thresholds.gain {
        return Ok(None);
    }

    let message = format!(
        "{} is trending upward in weight (+{:.1}%). Consider reviewing daily portions.",
        input.animal_name,
        change * 100.0
    );
    Ok(Some(
        AlertCandidate::new(AlertType::WeightGain, message)
            .with_data("baseline_weight", round2(baseline))
            .with_data("current_average", round2(recent))
            .with_data("change_percent", percent(change))
            .with_data("timeframe", "7 days"),
    ))
}

/// Many visits within the last hour.
pub fn frequency_critical<V: VisitStore + ?Sized>(
    visits: &V,
    input: &RuleInput<'_>,
) -> Result<Option<AlertCandidate>> {
    let window = TimeRange::between(input.now - Duration::hours(1), input.now);
    let count = visits.count_visits(&window)?;
    let threshold = input.thresholds.frequency_critical;
    tracing::debug!(count, threshold, "frequency_critical");
    if count < threshold {
        return Ok(None);
    }

    let message = format!(
        "Emergency: {} has visited the box {} times in the last hour. Repeated short visits can signal a urinary blockage; contact a vet now.",
        input.animal_name, count
    );
    Ok(Some(
        AlertCandidate::new(AlertType::FrequencyCritical, message)
            .with_data("visit_count", count)
            .with_data("threshold", threshold)
            .with_data("timeframe", "1 hour"),
    ))
}

/// Today's count well above the 7-day daily average.
pub fn frequency_high<V: VisitStore + ?Sized>(
    visits: &V,
    input: &RuleInput<'_>,
) -> Result<Option<AlertCandidate>> {
    let week = visits.count_visits(&recent_range(input.now))?;
    if week == 0 {
        return Ok(None);
    }
    let average = week as f64 / 7.0;
    let today = visits.count_visits(&TimeRange::between(input.today_start, input.now))?;
    let limit = average * (1.0 + input.thresholds.frequency_high);
    tracing::debug!(today, average, limit, "frequency_high");
    if today as f64 <= limit {
        return Ok(None);
    }

    let increase = ((today as f64 - average) / average * 100.0).round();
    let message = format!(
        "{} is visiting the box more than usual today ({} visits against a {:.1} daily average). Watch for straining or extra thirst.",
        input.animal_name, today, average
    );
    Ok(Some(
        AlertCandidate::new(AlertType::FrequencyHigh, message)
            .with_data("today_count", today)
            .with_data("average_count", round1(average))
            .with_data("increase_percent", increase),
    ))
}

/// No visits for the mode's low-activity window.
pub fn frequency_low<V: VisitStore + ?Sized>(
    visits: &V,
    input: &RuleInput<'_>,
) -> Result<Option<AlertCandidate>> {
    let hours = input.thresholds.frequency_low_hours;
    let window = TimeRange::between(input.now - Duration::hours(i64::from(hours)), input.now);
    let count = visits.count_visits(&window)?;
    tracing::debug!(count, hours, "frequency_low");
    if count > 0 {
        return Ok(None);
    }

    let last_visit = visits
        .recent_visits(1)?
        .first()
        .map(|v| Value::String(v.entry_time.to_rfc3339()))
        .unwrap_or(Value::Null);
    let message = format!(
        "No litter box activity for {} hours. Check that {} is drinking and not using another spot.",
        hours, input.animal_name
    );
    Ok(Some(
        AlertCandidate::new(AlertType::FrequencyLow, message)
            .with_data("hours_since_last_visit", hours)
            .with_data("last_visit_time", last_visit),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MonitoringMode, Severity, Visit};
    use crate::storage::MemoryStore;

    fn input(now: DateTime<Utc>, mode: MonitoringMode) -> RuleInput<'static> {
        RuleInput {
            now,
            today_start: now - Duration::hours(12),
            thresholds: Thresholds::for_mode(mode),
            animal_name: "Miso",
        }
    }

    fn store_with(visits: &[(Duration, f64)], now: DateTime<Utc>) -> MemoryStore {
        let store = MemoryStore::new();
        for (ago, weight) in visits {
            store.insert_visit(&Visit::new(now - *ago, *weight)).unwrap();
        }
        store
    }

    #[test]
    fn test_weight_urgent_fires_on_drop() {
        let now = Utc::now();
        let store = store_with(
            &[(Duration::hours(40), 5.0), (Duration::hours(1), 4.0)],
            now,
        );

        let alert = weight_urgent(&store, &input(now, MonitoringMode::Standard), 5.0)
            .unwrap()
            .unwrap();
        assert_eq!(alert.alert_type, AlertType::WeightUrgent);
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.trigger_data["change_percent"], -20.0);
        assert_eq!(alert.trigger_data["current_weight"], 4.0);
        assert_eq!(alert.trigger_data["timeframe"], "48 hours");
        assert!(alert.message.contains("Miso"));
    }

    #[test]
    fn test_weight_urgent_needs_two_visits() {
        let now = Utc::now();
        let store = store_with(&[(Duration::hours(1), 3.0)], now);
        assert!(weight_urgent(&store, &input(now, MonitoringMode::Strict), 5.0)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_weight_urgent_respects_mode() {
        let now = Utc::now();
        // A 3.5% drop is past the strict and standard limits, inside kitten's.
        let store = store_with(
            &[(Duration::hours(30), 5.0), (Duration::hours(2), 4.825)],
            now,
        );
        for (mode, fires) in [
            (MonitoringMode::Strict, true),
            (MonitoringMode::Standard, true),
            (MonitoringMode::Kitten, false),
        ] {
            let result = weight_urgent(&store, &input(now, mode), 5.0).unwrap();
            assert_eq!(result.is_some(), fires, "mode {}", mode);
        }
    }

    #[test]
    fn test_weight_trend_and_gain() {
        let now = Utc::now();
        let store = store_with(
            &[(Duration::days(3), 4.5), (Duration::days(1), 4.5)],
            now,
        );
        let rules = input(now, MonitoringMode::Standard);

        // 4.5 against 5.0 is a 10% loss.
        let trend = weight_trend(&store, &rules, 5.0).unwrap().unwrap();
        assert_eq!(trend.severity, Severity::Warning);
        assert_eq!(trend.trigger_data["current_average"], 4.5);
        assert!(weight_gain(&store, &rules, 5.0).unwrap().is_none());

        // 4.5 against 4.0 is a 12.5% gain.
        let gain = weight_gain(&store, &rules, 4.0).unwrap().unwrap();
        assert_eq!(gain.severity, Severity::Info);
        assert_eq!(gain.trigger_data["change_percent"], 12.5);
        assert!(weight_trend(&store, &rules, 4.0).unwrap().is_none());
    }

    #[test]
    fn test_weight_trend_without_recent_visits() {
        let now = Utc::now();
        let store = store_with(&[(Duration::days(9), 5.0)], now);
        let rules = input(now, MonitoringMode::Standard);
        assert!(weight_trend(&store, &rules, 5.0).unwrap().is_none());
        assert!(weight_gain(&store, &rules, 5.0).unwrap().is_none());
    }

    #[test]
    fn test_frequency_critical_threshold_is_inclusive() {
        let now = Utc::now();
        let store = store_with(
            &[
                (Duration::minutes(50), 4.0),
                (Duration::minutes(30), 4.0),
                (Duration::minutes(10), 4.0),
            ],
            now,
        );

        let alert = frequency_critical(&store, &input(now, MonitoringMode::Standard))
            .unwrap()
            .unwrap();
        assert_eq!(alert.trigger_data["visit_count"], 3);
        assert_eq!(alert.trigger_data["threshold"], 3);
        assert!(frequency_critical(&store, &input(now, MonitoringMode::Kitten))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_frequency_high() {
        let now = Utc::now();
        // 7 visits over the week: daily average 1.0; today has 2 of them.
        let mut history: Vec<(Duration, f64)> =
            (2..7).map(|d| (Duration::days(d), 4.0)).collect();
        history.push((Duration::hours(2), 4.0));
        history.push((Duration::hours(1), 4.0));
        let store = store_with(&history, now);

        // Standard: 2 > 1.0 * 1.5 fires.
        let alert = frequency_high(&store, &input(now, MonitoringMode::Standard))
            .unwrap()
            .unwrap();
        assert_eq!(alert.trigger_data["today_count"], 2);
        assert_eq!(alert.trigger_data["average_count"], 1.0);
        assert_eq!(alert.trigger_data["increase_percent"], 100.0);

        // Kitten: 2 > 1.0 * 2.0 does not.
        assert!(frequency_high(&store, &input(now, MonitoringMode::Kitten))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_frequency_high_skips_empty_week() {
        let now = Utc::now();
        let store = store_with(&[(Duration::days(10), 4.0)], now);
        assert!(frequency_high(&store, &input(now, MonitoringMode::Strict))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_frequency_low_by_mode() {
        let now = Utc::now();
        let store = store_with(&[(Duration::hours(30), 4.0)], now);

        let alert = frequency_low(&store, &input(now, MonitoringMode::Standard))
            .unwrap()
            .unwrap();
        assert_eq!(alert.trigger_data["hours_since_last_visit"], 24);
        assert!(alert.trigger_data["last_visit_time"].is_string());

        assert!(frequency_low(&store, &input(now, MonitoringMode::Kitten))
            .unwrap()
            .is_none());
    }
}
