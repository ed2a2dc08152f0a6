//! Configuration loading for litterwatch.
//!
//! Configuration follows a precedence chain:
//! 1. Environment variables (highest priority)
//! 2. User config (`~/.litterwatch/config.toml`)
//! 3. Defaults (lowest priority)
//!
//! All configuration is optional except the sensor credential, which only
//! the `sync` cycle requires.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::{MonitoringMode, DEFAULT_SENSOR_ID};
use crate::error::{FailOpen, LitterError, Result};

/// Main configuration struct for litterwatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Sensor polling configuration.
    pub sensor: SensorConfig,
    /// Alert rule configuration.
    pub alerts: AlertsConfig,
    /// Store configuration.
    pub store: StoreConfig,
}

/// Sensor polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SensorConfig {
    /// Key of the sensor state record.
    pub sensor_id: String,
    /// Access token for the reading source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    /// Pin snapshot written by the sensor bridge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<PathBuf>,
    /// Live weight (kg) above which the box counts as loaded.
    pub presence_threshold: f64,
    /// A visit created this recently suppresses another one.
    pub duplicate_guard_seconds: u32,
}

impl SensorConfig {
    /// Check if a presence threshold is valid (finite and non-negative).
    pub fn is_valid_presence_threshold(value: f64) -> bool {
        value.is_finite() && value >= 0.0
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            sensor_id: DEFAULT_SENSOR_ID.to_string(),
            credential: None,
            snapshot_path: None,
            presence_threshold: 1.0,
            duplicate_guard_seconds: 30,
        }
    }
}

/// Alert rule configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertsConfig {
    /// An alert of the same type within this many hours suppresses a new one.
    pub dedup_hours: u32,
    /// Per-mode threshold overrides.
    pub thresholds: ThresholdOverrides,
}

/// Minimum valid dedup window.
pub const MIN_DEDUP_HOURS: u32 = 1;

impl AlertsConfig {
    /// Check if a dedup window is valid (must be >= 1 hour).
    pub fn is_valid_dedup_hours(value: u32) -> bool {
        value >= MIN_DEDUP_HOURS
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            dedup_hours: 24,
            thresholds: ThresholdOverrides::default(),
        }
    }
}

/// Threshold overrides, one table per monitoring mode.
///
/// ```toml
/// [alerts.thresholds.kitten]
/// frequency_low_hours = 48
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThresholdOverrides {
    pub strict: ThresholdOverride,
    pub standard: ThresholdOverride,
    pub kitten: ThresholdOverride,
}

impl ThresholdOverrides {
    /// Overrides for one mode.
    pub fn for_mode(&self, mode: MonitoringMode) -> &ThresholdOverride {
        match mode {
            MonitoringMode::Strict => &self.strict,
            MonitoringMode::Standard => &self.standard,
            MonitoringMode::Kitten => &self.kitten,
        }
    }

    fn for_mode_mut(&mut self, mode: MonitoringMode) -> &mut ThresholdOverride {
        match mode {
            MonitoringMode::Strict => &mut self.strict,
            MonitoringMode::Standard => &mut self.standard,
            MonitoringMode::Kitten => &mut self.kitten,
        }
    }
}

/// Optional replacements for one mode's thresholds. Fractions are ratios
/// (`0.05` = 5%).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThresholdOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urgent_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gain: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_critical: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_high: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_low_hours: Option<u32>,
}

impl ThresholdOverride {
    /// Take every value `other` sets.
    fn merge(&mut self, other: ThresholdOverride) {
        if other.urgent_loss.is_some() {
            self.urgent_loss = other.urgent_loss;
        }
        if other.trend_loss.is_some() {
            self.trend_loss = other.trend_loss;
        }
        if other.gain.is_some() {
            self.gain = other.gain;
        }
        if other.frequency_critical.is_some() {
            self.frequency_critical = other.frequency_critical;
        }
        if other.frequency_high.is_some() {
            self.frequency_high = other.frequency_high;
        }
        if other.frequency_low_hours.is_some() {
            self.frequency_low_hours = other.frequency_low_hours;
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory for the file store. Defaults to `<home>/data`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Budget for one cycle's store work, in milliseconds.
    pub timeout_ms: u64,
}

/// Minimum valid store timeout.
pub const MIN_TIMEOUT_MS: u64 = 1;

impl StoreConfig {
    /// Check if a timeout is valid (must be >= 1ms).
    pub fn is_valid_timeout_ms(value: u64) -> bool {
        value >= MIN_TIMEOUT_MS
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            timeout_ms: 5_000,
        }
    }
}

impl Config {
    /// Load configuration with full precedence chain.
    ///
    /// Precedence (highest to lowest):
    /// 1. Environment variables
    /// 2. User config (`<home>/config.toml`)
    /// 3. Defaults
    pub fn load() -> Self {
        match litter_home() {
            Some(home) => Self::load_from_home(&home),
            None => {
                let mut config = Config::default();
                config.apply_env_overrides();
                config
            }
        }
    }

    /// Load configuration from a specific home directory.
    pub fn load_from_home(home: &Path) -> Self {
        let mut config = Config::default();

        let config_path = home.join("config.toml");
        if config_path.exists() {
            let context = format!("ignoring {}, using defaults", config_path.display());
            if let Some(user_config) = Self::load_from_file(&config_path)
                .map(Some)
                .fail_open_with(&context, None)
            {
                config = config.merge(user_config);
            }
        }

        config.apply_env_overrides();
        config
    }

    /// Load config from a specific file path.
    fn load_from_file(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path).map_err(|e| LitterError::storage(path, e))?;
        toml::from_str(&content).map_err(|e| LitterError::config(e.to_string()))
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        // LITTERWATCH_SENSOR_TOKEN
        if let Ok(val) = env::var("LITTERWATCH_SENSOR_TOKEN") {
            if val.trim().is_empty() {
                eprintln!("Warning: LITTERWATCH_SENSOR_TOKEN is empty. Ignoring.");
            } else {
                self.sensor.credential = Some(val);
            }
        }

        // LITTERWATCH_SENSOR_ID
        if let Ok(val) = env::var("LITTERWATCH_SENSOR_ID") {
            if val.trim().is_empty() {
                eprintln!(
                    "Warning: LITTERWATCH_SENSOR_ID is empty. Using default '{}'.",
                    self.sensor.sensor_id
                );
            } else {
                self.sensor.sensor_id = val;
            }
        }

        // LITTERWATCH_SNAPSHOT_PATH
        if let Ok(val) = env::var("LITTERWATCH_SNAPSHOT_PATH") {
            if !val.is_empty() {
                self.sensor.snapshot_path = Some(PathBuf::from(val));
            }
        }

        // LITTERWATCH_DATA_DIR
        if let Ok(val) = env::var("LITTERWATCH_DATA_DIR") {
            if !val.is_empty() {
                self.store.data_dir = Some(PathBuf::from(val));
            }
        }

        // LITTERWATCH_STORE_TIMEOUT_MS
        if let Ok(val) = env::var("LITTERWATCH_STORE_TIMEOUT_MS") {
            match val.parse::<u64>() {
                Ok(n) => {
                    if StoreConfig::is_valid_timeout_ms(n) {
                        self.store.timeout_ms = n;
                    } else {
                        eprintln!(
                            "Warning: Invalid LITTERWATCH_STORE_TIMEOUT_MS value '{}'. \
                            Must be >= {}. Using default '{}'.",
                            n, MIN_TIMEOUT_MS, self.store.timeout_ms
                        );
                    }
                }
                Err(_) => eprintln!(
                    "Warning: Invalid LITTERWATCH_STORE_TIMEOUT_MS value '{}'. \
                    Expected a positive integer. Using default '{}'.",
                    val, self.store.timeout_ms
                ),
            }
        }

        // LITTERWATCH_DEDUP_HOURS
        if let Ok(val) = env::var("LITTERWATCH_DEDUP_HOURS") {
            match val.parse::<u32>() {
                Ok(n) => {
                    if AlertsConfig::is_valid_dedup_hours(n) {
                        self.alerts.dedup_hours = n;
                    } else {
                        eprintln!(
                            "Warning: Invalid LITTERWATCH_DEDUP_HOURS value '{}'. \
                            Must be >= {}. Using default '{}'.",
                            n, MIN_DEDUP_HOURS, self.alerts.dedup_hours
                        );
                    }
                }
                Err(_) => eprintln!(
                    "Warning: Invalid LITTERWATCH_DEDUP_HOURS value '{}'. \
                    Expected a positive integer. Using default '{}'.",
                    val, self.alerts.dedup_hours
                ),
            }
        }
    }

    /// Merge another config into this one.
    ///
    /// The `other` config takes precedence. Non-default fields from `other`
    /// are applied field by field.
    ///
    /// # Limitation
    ///
    /// A layer cannot set a value back to its default to undo a lower layer,
    /// because "not set" and "set to default" are indistinguishable here.
    fn merge(mut self, other: Config) -> Self {
        // Sensor
        let default_sensor = SensorConfig::default();
        if other.sensor.sensor_id != default_sensor.sensor_id {
            self.sensor.sensor_id = other.sensor.sensor_id;
        }
        if other.sensor.credential.is_some() {
            self.sensor.credential = other.sensor.credential;
        }
        if other.sensor.snapshot_path.is_some() {
            self.sensor.snapshot_path = other.sensor.snapshot_path;
        }
        if other.sensor.presence_threshold != default_sensor.presence_threshold {
            if SensorConfig::is_valid_presence_threshold(other.sensor.presence_threshold) {
                self.sensor.presence_threshold = other.sensor.presence_threshold;
            } else {
                eprintln!(
                    "Warning: Invalid sensor.presence_threshold '{}'. Using '{}'.",
                    other.sensor.presence_threshold, self.sensor.presence_threshold
                );
            }
        }
        if other.sensor.duplicate_guard_seconds != default_sensor.duplicate_guard_seconds {
            self.sensor.duplicate_guard_seconds = other.sensor.duplicate_guard_seconds;
        }

        // Alerts
        let default_alerts = AlertsConfig::default();
        if other.alerts.dedup_hours != default_alerts.dedup_hours {
            if AlertsConfig::is_valid_dedup_hours(other.alerts.dedup_hours) {
                self.alerts.dedup_hours = other.alerts.dedup_hours;
            } else {
                eprintln!(
                    "Warning: Invalid alerts.dedup_hours '{}'. Using '{}'.",
                    other.alerts.dedup_hours, self.alerts.dedup_hours
                );
            }
        }
        for mode in MonitoringMode::ALL {
            self.alerts
                .thresholds
                .for_mode_mut(mode)
                .merge(other.alerts.thresholds.for_mode(mode).clone());
        }

        // Store
        if other.store.data_dir.is_some() {
            self.store.data_dir = other.store.data_dir;
        }
        if other.store.timeout_ms != StoreConfig::default().timeout_ms {
            if StoreConfig::is_valid_timeout_ms(other.store.timeout_ms) {
                self.store.timeout_ms = other.store.timeout_ms;
            } else {
                eprintln!(
                    "Warning: Invalid store.timeout_ms '{}'. Using '{}'.",
                    other.store.timeout_ms, self.store.timeout_ms
                );
            }
        }

        self
    }

    /// Budget for one cycle's store work.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store.timeout_ms)
    }

    /// Directory for the file store.
    ///
    /// `store.data_dir` if set, otherwise `<home>/data`.
    pub fn data_dir(&self) -> Option<PathBuf> {
        self.store
            .data_dir
            .clone()
            .or_else(|| litter_home().map(|h| h.join("data")))
    }
}

/// Get the litterwatch home directory.
///
/// Checks `LITTERWATCH_HOME` environment variable first, then falls back to
/// `~/.litterwatch`.
///
/// Empty values are ignored. Relative values are canonicalized when they
/// exist and used as-is otherwise.
pub fn litter_home() -> Option<PathBuf> {
    if let Ok(home) = env::var("LITTERWATCH_HOME") {
        if home.is_empty() {
            tracing::warn!("LITTERWATCH_HOME is empty, using default");
        } else {
            let path = PathBuf::from(&home);
            if path.is_absolute() {
                return Some(path);
            }
            if let Ok(canonical) = path.canonicalize() {
                return Some(canonical);
            }
            tracing::warn!("LITTERWATCH_HOME is relative and doesn't exist, using as-is");
            return Some(path);
        }
    }

    if let Some(home) = dirs::home_dir() {
        return Some(home.join(".litterwatch"));
    }

    // Containerized/minimal environments without HOME
    let fallback_path = fallback_litter_home();
    tracing::warn!(
        "HOME not set, using fallback location: {}",
        fallback_path.display()
    );
    Some(fallback_path)
}

/// Get fallback home path when HOME is unavailable.
#[cfg(unix)]
fn fallback_litter_home() -> PathBuf {
    use std::os::unix::fs::MetadataExt;
    let uid = std::fs::metadata("/").map(|m| m.uid()).unwrap_or(0);
    PathBuf::from(format!("/tmp/litterwatch-{}", uid))
}

/// Get fallback home path when HOME is unavailable.
#[cfg(not(unix))]
fn fallback_litter_home() -> PathBuf {
    std::env::temp_dir().join("litterwatch")
}

/// Get the file store directory from the loaded configuration.
pub fn data_dir() -> Option<PathBuf> {
    Config::load().data_dir()
}

/// Get the crash log path.
///
/// Returns `<home>/crash.log`.
pub fn crash_log_path() -> Option<PathBuf> {
    litter_home().map(|h| h.join("crash.log"))
}
