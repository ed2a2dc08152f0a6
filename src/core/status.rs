//! Free-text occupancy status matching.
//!
//! The sensor vendor reports occupancy as a human-readable string ("Cat
//! Inside", "Cat Exited", "Normal", ...) whose vocabulary is not fixed.
//! Every decision about occupancy goes through the predicates in this
//! module; nothing else in the crate inspects status text.

use serde::{Deserialize, Serialize};

/// Substrings that mark the box as occupied.
const OCCUPIED_MARKERS: &[&str] = &["inside", "entered"];

/// Substring that marks an explicit exit.
const EXIT_MARKER: &str = "exit";

/// Coarse classification of a status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Occupancy {
    /// An animal is on the scale.
    Occupied,
    /// The sensor explicitly reported an exit.
    Exit,
    /// Anything else, including an empty string.
    Empty,
}

impl Occupancy {
    /// Get the occupancy name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Occupied => "occupied",
            Self::Exit => "exit",
            Self::Empty => "empty",
        }
    }
}

impl std::fmt::Display for Occupancy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status text contains "inside" or "entered" (case-insensitive).
pub fn is_occupied(status: &str) -> bool {
    let lower = status.to_lowercase();
    OCCUPIED_MARKERS.iter().any(|m| lower.contains(m))
}

/// Status text contains "exit" (case-insensitive).
pub fn is_exit(status: &str) -> bool {
    status.to_lowercase().contains(EXIT_MARKER)
}

/// Status text contains neither occupancy marker.
pub fn is_empty(status: &str) -> bool {
    !is_occupied(status)
}

/// Classify a status string.
///
/// Occupancy markers win over the exit marker, so a string containing both
/// classifies as `Occupied`. Use [`visit_completed`] for transition
/// decisions; it applies the predicates independently.
pub fn classify(status: &str) -> Occupancy {
    if is_occupied(status) {
        Occupancy::Occupied
    } else if is_exit(status) {
        Occupancy::Exit
    } else {
        Occupancy::Empty
    }
}

/// Whether moving from `previous` to `current` completes a visit.
///
/// Fires iff the previous status was occupied and the current one is an
/// exit or no longer occupied.
pub fn visit_completed(previous: &str, current: &str) -> bool {
    is_occupied(previous) && (is_exit(current) || is_empty(current))
}
