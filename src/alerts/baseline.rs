//! History windows and the statistics the rules are built on.

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Timelike, Utc};

use crate::core::Visit;
use crate::error::Result;
use crate::storage::{TimeRange, VisitStore};

/// History required before weight rules run.
pub const MIN_HISTORY_DAYS: i64 = 7;

/// Baseline window: days 8 to 14 before now.
pub fn baseline_range(now: DateTime<Utc>) -> TimeRange {
    TimeRange::between(now - Duration::days(14), now - Duration::days(7))
}

/// Recent window for the weight trend: the last 7 days.
pub fn recent_range(now: DateTime<Utc>) -> TimeRange {
    TimeRange::between(now - Duration::days(7), now)
}

/// Window for the urgent-loss check: the last 48 hours.
pub fn urgent_range(now: DateTime<Utc>) -> TimeRange {
    TimeRange::between(now - Duration::hours(48), now)
}

/// Mean `weight_in`, or `None` for no visits.
pub fn mean_weight(visits: &[Visit]) -> Option<f64> {
    if visits.is_empty() {
        return None;
    }
    let total: f64 = visits.iter().map(|v| v.weight_in).sum();
    Some(total / visits.len() as f64)
}

/// Whether the oldest visit is more than [`MIN_HISTORY_DAYS`] old.
pub fn has_min_history<V: VisitStore + ?Sized>(visits: &V, now: DateTime<Utc>) -> Result<bool> {
    let cutoff = now - Duration::days(MIN_HISTORY_DAYS);
    Ok(visits
        .oldest_visit()?
        .is_some_and(|oldest| oldest.entry_time <= cutoff))
}

/// Baseline weight for the weight rules.
///
/// `None` when history is shorter than a week, the baseline window is empty,
/// or the baseline is not a usable divisor.
pub fn baseline_weight<V: VisitStore + ?Sized>(visits: &V, now: DateTime<Utc>) -> Result<Option<f64>> {
    if !has_min_history(visits, now)? {
        tracing::debug!("less than {} days of history, skipping weight rules", MIN_HISTORY_DAYS);
        return Ok(None);
    }

    let window = visits.find_visits(&baseline_range(now))?;
    match mean_weight(&window) {
        Some(baseline) if baseline > 0.0 && baseline.is_finite() => Ok(Some(baseline)),
        Some(_) => {
            tracing::debug!("baseline weight is zero, skipping weight rules");
            Ok(None)
        }
        None => {
            tracing::debug!("no visits in baseline window, skipping weight rules");
            Ok(None)
        }
    }
}

/// Start of the calendar day containing `now` in `tz`.
///
/// Days that start inside a DST gap fall back to `now` minus the local
/// time of day.
pub fn local_midnight<Tz: TimeZone>(now: DateTime<Utc>, tz: &Tz) -> DateTime<Utc> {
    let local = now.with_timezone(tz);
    let midnight = local.date_naive().and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&midnight).earliest() {
        Some(start) => start.with_timezone(&Utc),
        None => now - Duration::seconds(i64::from(local.num_seconds_from_midnight())),
    }
}
