//! CLI commands for litterwatch.
//!
//! - **Cycles**: sync, simulate (both via [`SyncCommand`]), check
//! - **Records**: alerts, visits, profile, state

// Cycles
pub mod check;
pub mod sync;

// Records
pub mod alerts;
pub mod profile;
pub mod state;
pub mod visits;

pub use alerts::{AlertsAction, AlertsCommand};
pub use check::CheckCommand;
pub use profile::{ProfileAction, ProfileCommand};
pub use state::StateCommand;
pub use sync::SyncCommand;
pub use visits::{VisitsAction, VisitsCommand};
