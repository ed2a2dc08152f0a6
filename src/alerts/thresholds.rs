//! Per-mode alert thresholds.

use serde::{Deserialize, Serialize};

use crate::config::{ThresholdOverride, ThresholdOverrides};
use crate::core::MonitoringMode;

/// Thresholds for one monitoring mode.
///
/// Fractions are ratios: `urgent_loss = 0.03` fires on a drop of more than
/// 3% of the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Drop within 48 hours that raises `weight_urgent`.
    pub urgent_loss: f64,
    /// Weekly average below baseline that raises `weight_trend`.
    pub trend_loss: f64,
    /// Weekly average above baseline that raises `weight_gain`.
    pub gain: f64,
    /// Visits within one hour that raise `frequency_critical`.
    pub frequency_critical: usize,
    /// Today's count above the daily average by this fraction raises `frequency_high`.
    pub frequency_high: f64,
    /// Hours without a visit that raise `frequency_low`.
    pub frequency_low_hours: u32,
}

const STRICT: Thresholds = Thresholds {
    urgent_loss: 0.02,
    trend_loss: 0.04,
    gain: 0.04,
    frequency_critical: 2,
    frequency_high: 0.3,
    frequency_low_hours: 24,
};

const STANDARD: Thresholds = Thresholds {
    urgent_loss: 0.03,
    trend_loss: 0.05,
    gain: 0.05,
    frequency_critical: 3,
    frequency_high: 0.5,
    frequency_low_hours: 24,
};

const KITTEN: Thresholds = Thresholds {
    urgent_loss: 0.04,
    trend_loss: 0.07,
    gain: 0.07,
    frequency_critical: 5,
    frequency_high: 1.0,
    frequency_low_hours: 36,
};

fn valid_fraction(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

impl Thresholds {
    /// Built-in thresholds for `mode`.
    pub const fn for_mode(mode: MonitoringMode) -> Self {
        match mode {
            MonitoringMode::Strict => STRICT,
            MonitoringMode::Standard => STANDARD,
            MonitoringMode::Kitten => KITTEN,
        }
    }

    /// Built-in thresholds for `mode` with configured overrides applied.
    pub fn resolve(mode: MonitoringMode, overrides: &ThresholdOverrides) -> Self {
        Self::for_mode(mode).with_overrides(mode, overrides.for_mode(mode))
    }

    /// Apply the values `o` sets. Out-of-range values are ignored with a warning.
    fn with_overrides(mut self, mode: MonitoringMode, o: &ThresholdOverride) -> Self {
        let apply_fraction = |name: &str, value: Option<f64>, slot: &mut f64| {
            if let Some(v) = value {
                if valid_fraction(v) {
                    *slot = v;
                } else {
                    tracing::warn!(%mode, threshold = name, value = v, "ignoring invalid threshold override");
                }
            }
        };
        apply_fraction("urgent_loss", o.urgent_loss, &mut self.urgent_loss);
        apply_fraction("trend_loss", o.trend_loss, &mut self.trend_loss);
        apply_fraction("gain", o.gain, &mut self.gain);
        apply_fraction("frequency_high", o.frequency_high, &mut self.frequency_high);

        match o.frequency_critical {
            Some(0) => tracing::warn!(%mode, "ignoring frequency_critical override of 0"),
            Some(n) => self.frequency_critical = n,
            None => {}
        }
        match o.frequency_low_hours {
            Some(0) => tracing::warn!(%mode, "ignoring frequency_low_hours override of 0"),
            Some(h) => self.frequency_low_hours = h,
            None => {}
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table() {
        let strict = Thresholds::for_mode(MonitoringMode::Strict);
        assert_eq!(strict.urgent_loss, 0.02);
        assert_eq!(strict.frequency_critical, 2);
        assert_eq!(strict.frequency_high, 0.3);

        let standard = Thresholds::for_mode(MonitoringMode::Standard);
        assert_eq!(standard.trend_loss, 0.05);
        assert_eq!(standard.gain, 0.05);
        assert_eq!(standard.frequency_critical, 3);
        assert_eq!(standard.frequency_low_hours, 24);

        let kitten = Thresholds::for_mode(MonitoringMode::Kitten);
        assert_eq!(kitten.urgent_loss, 0.04);
        assert_eq!(kitten.frequency_critical, 5);
        assert_eq!(kitten.frequency_high, 1.0);
        assert_eq!(kitten.frequency_low_hours, 36);
    }

    #[test]
    fn test_stricter_modes_fire_earlier() {
        let [strict, standard, kitten] = MonitoringMode::ALL.map(Thresholds::for_mode);
        assert!(strict.urgent_loss < standard.urgent_loss);
        assert!(standard.urgent_loss < kitten.urgent_loss);
        assert!(strict.frequency_critical < standard.frequency_critical);
        assert!(standard.frequency_critical < kitten.frequency_critical);
    }

    #[test]
    fn test_overrides_apply_to_their_mode_only() {
        let mut overrides = ThresholdOverrides::default();
        overrides.kitten.frequency_low_hours = Some(48);
        overrides.kitten.gain = Some(0.1);

        let kitten = Thresholds::resolve(MonitoringMode::Kitten, &overrides);
        assert_eq!(kitten.frequency_low_hours, 48);
        assert_eq!(kitten.gain, 0.1);
        assert_eq!(kitten.urgent_loss, 0.04);

        let standard = Thresholds::resolve(MonitoringMode::Standard, &overrides);
        assert_eq!(standard, Thresholds::for_mode(MonitoringMode::Standard));
    }

    #[test]
    fn test_invalid_overrides_ignored() {
        let mut overrides = ThresholdOverrides::default();
        overrides.standard.urgent_loss = Some(-0.1);
        overrides.standard.trend_loss = Some(f64::NAN);
        overrides.standard.frequency_critical = Some(0);
        overrides.standard.frequency_low_hours = Some(0);

        let resolved = Thresholds::resolve(MonitoringMode::Standard, &overrides);
        assert_eq!(resolved, Thresholds::for_mode(MonitoringMode::Standard));
    }
}
