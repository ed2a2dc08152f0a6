//! Reading sources for the litter-box sensor.
//!
//! A poll reads four independent channels (the sensor cloud's virtual pins
//! `v0`..`v3`). Each channel can fail on its own; a failed channel degrades
//! to a neutral value and only a poll where every channel fails counts as
//! "upstream unavailable".

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::visit::non_negative;
use crate::error::{LitterError, Result};
use crate::util::read_to_string_limited;

/// One sensor channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Live weight on the scale, kg.
    #[serde(rename = "v0")]
    Weight,
    /// Free-text occupancy status ("Cat Inside", "Cat Exited", ...).
    #[serde(rename = "v1")]
    Status,
    /// Secondary usage classification ("Normal", "Possible UTI", ...).
    #[serde(rename = "v2")]
    Usage,
    /// Duration of the last visit, seconds.
    #[serde(rename = "v3")]
    Duration,
}

impl Channel {
    /// All channels in pin order.
    pub const ALL: [Channel; 4] = [Self::Weight, Self::Status, Self::Usage, Self::Duration];

    /// The virtual pin this channel is published on.
    pub fn pin(&self) -> &'static str {
        match self {
            Self::Weight => "v0",
            Self::Status => "v1",
            Self::Usage => "v2",
            Self::Duration => "v3",
        }
    }

    /// Get the channel name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weight => "weight",
            Self::Status => "status",
            Self::Usage => "usage",
            Self::Duration => "duration",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.pin())
    }
}

/// One poll's worth of readings, already degraded to neutral values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Readings {
    /// Live weight, kg. `0.0` when missing or unparseable.
    pub weight: f64,
    /// Raw occupancy status. Empty when missing.
    pub status: String,
    /// Raw usage classification. Empty when missing.
    pub usage: String,
    /// Last visit duration, seconds. `0` when missing or unparseable.
    pub duration_seconds: u32,
    /// Channels that failed and were replaced by neutral values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_channels: Vec<Channel>,
}

impl Readings {
    /// Build readings from raw channel values. `None` marks a failed channel.
    pub fn from_raw(
        weight: Option<&str>,
        status: Option<&str>,
        usage: Option<&str>,
        duration: Option<&str>,
    ) -> Self {
        let mut failed_channels = Vec::new();
        for (channel, value) in Channel::ALL.iter().zip([weight, status, usage, duration]) {
            if value.is_none() {
                failed_channels.push(*channel);
            }
        }

        Self {
            weight: weight.map(parse_weight).unwrap_or(0.0),
            status: status.map(|s| s.trim().to_string()).unwrap_or_default(),
            usage: usage.map(|s| s.trim().to_string()).unwrap_or_default(),
            duration_seconds: duration.map(parse_duration).unwrap_or(0),
            failed_channels,
        }
    }

    /// Whether any channel fell back to a neutral value.
    pub fn is_degraded(&self) -> bool {
        !self.failed_channels.is_empty()
    }
}

/// Parse a weight reading: the leading decimal number, clamped to >= 0.
///
/// `"4.52"` and `"4.52kg"` both read as `4.52`; anything else reads as `0`.
pub fn parse_weight(raw: &str) -> f64 {
    let trimmed = raw.trim();
    let end = numeric_prefix_len(trimmed, true);
    non_negative(trimmed[..end].parse::<f64>().unwrap_or(0.0))
}

/// Parse a duration reading: the leading integer, clamped to >= 0.
///
/// `"95"` and `"95.7"` both read as `95`; anything else reads as `0`.
pub fn parse_duration(raw: &str) -> u32 {
    let trimmed = raw.trim();
    let end = numeric_prefix_len(trimmed, false);
    match trimmed[..end].parse::<i64>() {
        Ok(n) if n > 0 => u32::try_from(n).unwrap_or(u32::MAX),
        _ => 0,
    }
}

/// Byte length of the leading `[+-]digits[.digits]` run.
fn numeric_prefix_len(s: &str, allow_fraction: bool) -> usize {
    let bytes = s.as_bytes();
    let mut i = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        i += 1;
    }
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if allow_fraction && i < bytes.len() && bytes[i] == b'.' {
        let mut j = i + 1;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        i = j;
    }
    i
}

/// Supplier of sensor channel values.
///
/// Implementations must be thread-safe; polls for different sensors may run
/// concurrently.
pub trait ReadingSource: Send + Sync {
    /// Read one channel's raw value.
    fn read_channel(&self, credential: &str, channel: Channel) -> Result<String>;

    /// Get the source name for logging.
    fn name(&self) -> &'static str;

    /// Read all four channels.
    ///
    /// Failed channels degrade to neutral values with a warning.
    ///
    /// # Errors
    ///
    /// Returns an upstream error only when every channel failed.
    fn poll(&self, credential: &str) -> Result<Readings> {
        collect_channels(self.name(), |channel| self.read_channel(credential, channel))
    }
}

/// Read every channel through `read`, degrading failures to neutral values.
///
/// # Errors
///
/// Returns an upstream error only when every channel failed.
fn collect_channels<F>(source: &str, mut read: F) -> Result<Readings>
where
    F: FnMut(Channel) -> Result<String>,
{
    let mut raw: [Option<String>; 4] = Default::default();
    let mut last_error = None;

    for (slot, channel) in raw.iter_mut().zip(Channel::ALL) {
        match read(channel) {
            Ok(value) => *slot = Some(value),
            Err(e) => {
                tracing::warn!(
                    source,
                    channel = %channel,
                    error = %e,
                    "channel read failed, using neutral value"
                );
                last_error = Some(e);
            }
        }
    }

    if raw.iter().all(Option::is_none) {
        let detail = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no channels read".to_string());
        return Err(LitterError::upstream(format!(
            "{}: every channel failed ({})",
            source, detail
        )));
    }

    let [weight, status, usage, duration] = &raw;
    Ok(Readings::from_raw(
        weight.as_deref(),
        status.as_deref(),
        usage.as_deref(),
        duration.as_deref(),
    ))
}

/// Fixed channel values. Used for manual override polls and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticReadingSource {
    values: [Option<String>; 4],
}

impl StaticReadingSource {
    /// Source returning the given readings on every poll.
    pub fn new(weight: f64, status: impl Into<String>, usage: impl Into<String>, duration: u32) -> Self {
        Self {
            values: [
                Some(weight.to_string()),
                Some(status.into()),
                Some(usage.into()),
                Some(duration.to_string()),
            ],
        }
    }

    /// Source where every channel fails.
    pub fn unreachable() -> Self {
        Self::default()
    }

    /// Override one channel's raw value.
    pub fn with_raw(mut self, channel: Channel, raw: impl Into<String>) -> Self {
        self.values[channel_index(channel)] = Some(raw.into());
        self
    }

    /// Make one channel fail.
    pub fn with_failed(mut self, channel: Channel) -> Self {
        self.values[channel_index(channel)] = None;
        self
    }
}

fn channel_index(channel: Channel) -> usize {
    match channel {
        Channel::Weight => 0,
        Channel::Status => 1,
        Channel::Usage => 2,
        Channel::Duration => 3,
    }
}

impl ReadingSource for StaticReadingSource {
    fn read_channel(&self, _credential: &str, channel: Channel) -> Result<String> {
        self.values[channel_index(channel)]
            .clone()
            .ok_or_else(|| LitterError::upstream(format!("{} not available", channel)))
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// On-disk pin snapshot written by the sensor bridge.
///
/// ```json
/// {"token": "abc", "v0": 4.6, "v1": "Cat Inside", "v2": "Normal", "v3": 0}
/// ```
///
/// `token` is optional; when present it must match the credential.
#[derive(Debug, Clone, Default, Deserialize)]
struct PinSnapshot {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    v0: Option<serde_json::Value>,
    #[serde(default)]
    v1: Option<serde_json::Value>,
    #[serde(default)]
    v2: Option<serde_json::Value>,
    #[serde(default)]
    v3: Option<serde_json::Value>,
}

impl PinSnapshot {
    fn pin(&self, channel: Channel) -> Option<&serde_json::Value> {
        let value = match channel {
            Channel::Weight => self.v0.as_ref(),
            Channel::Status => self.v1.as_ref(),
            Channel::Usage => self.v2.as_ref(),
            Channel::Duration => self.v3.as_ref(),
        };
        value.filter(|v| !v.is_null())
    }

    /// Raw string value of one pin.
    fn channel_value(&self, channel: Channel) -> Result<String> {
        match self.pin(channel) {
            Some(serde_json::Value::String(s)) => Ok(s.clone()),
            Some(other) => Ok(other.to_string()),
            None => Err(LitterError::upstream(format!(
                "pin {} missing from snapshot",
                channel.pin()
            ))),
        }
    }
}

/// Reads channel values from a JSON pin snapshot file.
///
/// A missing or unreadable snapshot means the sensor cloud is unreachable.
#[derive(Debug, Clone)]
pub struct SnapshotReadingSource {
    path: PathBuf,
}

impl SnapshotReadingSource {
    /// Create a source for the snapshot at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self, credential: &str) -> Result<PinSnapshot> {
        if !self.path.exists() {
            return Err(LitterError::upstream(format!(
                "no pin snapshot at {}",
                self.path.display()
            )));
        }
        let content = read_to_string_limited(&self.path)
            .map_err(|e| LitterError::upstream(e.to_string()))?;
        let snapshot: PinSnapshot = serde_json::from_str(&content).map_err(|e| {
            LitterError::upstream(format!("unreadable pin snapshot {}: {}", self.path.display(), e))
        })?;

        if let Some(token) = &snapshot.token {
            if token != credential {
                return Err(LitterError::upstream(
                    "pin snapshot belongs to a different device token",
                ));
            }
        }
        Ok(snapshot)
    }
}

impl ReadingSource for SnapshotReadingSource {
    fn read_channel(&self, credential: &str, channel: Channel) -> Result<String> {
        self.load(credential)?.channel_value(channel)
    }

    fn name(&self) -> &'static str {
        "snapshot"
    }

    /// Read the snapshot once so all four pins come from the same write.
    fn poll(&self, credential: &str) -> Result<Readings> {
        let snapshot = self.load(credential)?;
        collect_channels(self.name(), |channel| snapshot.channel_value(channel))
    }
}
