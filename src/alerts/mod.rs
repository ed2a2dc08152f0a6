//! Health alerts: thresholds, rules, and the engine that runs them.

pub mod baseline;
pub mod engine;
pub mod rules;
pub mod thresholds;

pub use engine::{AlertCheckSummary, AlertEngine, EngineOptions, Evaluation, RuleError};
pub use rules::RuleInput;
pub use thresholds::Thresholds;
