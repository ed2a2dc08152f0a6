//! litterwatch - litter box visit tracking and health alerts
//!
//! CLI entry point with global panic handler.

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use litterwatch::alerts::{AlertEngine, EngineOptions};
use litterwatch::cli::alerts::{AlertsOptions, DEFAULT_LIST_LIMIT};
use litterwatch::cli::check::CheckOptions;
use litterwatch::cli::profile::ProfileOptions;
use litterwatch::cli::state::StateOptions;
use litterwatch::cli::sync::SyncOptions as SyncOutputOptions;
use litterwatch::cli::visits::{VisitsOptions, DEFAULT_SEED_DAYS};
use litterwatch::cli::{
    AlertsAction, AlertsCommand, CheckCommand, ProfileAction, ProfileCommand, StateCommand,
    SyncCommand, VisitsAction, VisitsCommand,
};
use litterwatch::config::{crash_log_path, Config};
use litterwatch::core::MonitoringMode;
use litterwatch::error::{exit_codes, LitterError, Result};
use litterwatch::sensor::{Readings, SensorEventMachine, SnapshotReadingSource, SyncOptions};
use litterwatch::storage::FileStore;

// =============================================================================
// CLI Definition
// =============================================================================

/// litterwatch - litter box visit tracking and health alerts
#[derive(Parser)]
#[command(name = "litterwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Output as JSON
    #[arg(long, short, global = true)]
    json: bool,
    /// Suppress output
    #[arg(long, short, global = true)]
    quiet: bool,
    /// Log decisions at debug level
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the sensor once and record any completed visit
    Sync,

    /// Feed readings through the state machine as if the sensor sent them
    Simulate {
        /// Weight channel, e.g. "4.6"
        #[arg(long, default_value = "0")]
        weight: String,
        /// Status channel, e.g. "Cat Inside" or "Cat Exited"
        #[arg(long)]
        status: String,
        /// Usage channel
        #[arg(long, default_value = "")]
        usage: String,
        /// Duration channel in seconds
        #[arg(long, default_value = "0")]
        duration: String,
    },

    /// Evaluate the alert rules once
    Check {
        /// Animal to check (defaults to the first profile)
        #[arg(long)]
        animal: Option<String>,
    },

    /// List and acknowledge alerts
    Alerts {
        #[command(subcommand)]
        action: AlertsCmd,
        /// Restrict to one animal
        #[arg(long, global = true)]
        animal: Option<String>,
    },

    /// Inspect or reset the visit history
    Visits {
        #[command(subcommand)]
        action: VisitsCmd,
    },

    /// Show or edit the animal profile
    Profile {
        #[command(subcommand)]
        action: ProfileCmd,
        /// Profile to act on (defaults to the first profile)
        #[arg(long, global = true)]
        animal: Option<String>,
    },

    /// Show the stored sensor state
    State {
        /// Sensor key (defaults to sensor.sensor_id)
        #[arg(long)]
        sensor: Option<String>,
    },
}

#[derive(Subcommand)]
enum AlertsCmd {
    /// Newest alerts first
    List {
        /// Maximum number of alerts
        #[arg(long, short, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,
    },
    /// Unread, undismissed alerts, critical first
    Active,
    /// Mark an alert as read
    Read {
        /// Alert ID
        id: String,
    },
    /// Dismiss an alert
    Dismiss {
        /// Alert ID
        id: String,
    },
    /// Counts by state and severity
    Stats,
}

#[derive(Subcommand)]
enum VisitsCmd {
    /// Most recent visits first
    List {
        /// Maximum number of visits
        #[arg(long, short, default_value_t = 20)]
        limit: usize,
    },
    /// Replace the history with one synthetic visit per day
    Seed {
        /// Days of history to generate
        #[arg(long, default_value_t = DEFAULT_SEED_DAYS)]
        days: u32,
        /// Random seed, for reproducible histories
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Delete every visit
    Clear,
}

#[derive(Subcommand)]
enum ProfileCmd {
    /// Show the profile, creating the default one if needed
    Show,
    /// Update the profile
    Set {
        /// Display name
        #[arg(long)]
        name: Option<String>,
        /// Monitoring mode: strict, standard or kitten
        #[arg(long)]
        mode: Option<MonitoringMode>,
    },
}

// =============================================================================
// Main Entry Point
// =============================================================================

fn main() -> ExitCode {
    setup_panic_handler();

    let cli = Cli::parse();
    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("litterwatch: {}", e);
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("litterwatch error: {}", e);
            exit_code_for(&e)
        }
    }
}

/// Initialize logging from `LITTERWATCH_LOG`, defaulting to `warn`.
fn init_tracing(verbose: bool) -> std::result::Result<(), String> {
    let level = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_env("LITTERWATCH_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| format!("failed to initialize tracing subscriber: {e}"))
}

/// Set up the global panic handler.
///
/// On panic, logs to `<home>/crash.log` and exits with code 3.
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|info| {
        eprintln!("litterwatch panic: {}", info);

        if let Some(crash_log) = crash_log_path() {
            if let Some(parent) = crash_log.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Ok(mut file) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&crash_log)
            {
                let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
                let _ = writeln!(file, "[{}] {}", timestamp, info);
            }
        }

        std::process::exit(exit_codes::CRASH);
    }));
}

fn exit_code_for(err: &LitterError) -> ExitCode {
    if err.is_retryable() {
        ExitCode::from(exit_codes::RETRYABLE as u8)
    } else {
        ExitCode::from(exit_codes::FATAL as u8)
    }
}

/// Convert a command outcome to an exit code.
fn outcome_to_exit_code(success: bool, retryable: bool) -> ExitCode {
    match (success, retryable) {
        (true, _) => ExitCode::from(exit_codes::OK as u8),
        (false, true) => ExitCode::from(exit_codes::RETRYABLE as u8),
        (false, false) => ExitCode::from(exit_codes::FATAL as u8),
    }
}

fn print(formatted: &str) {
    if !formatted.is_empty() {
        print!("{}", formatted);
        if !formatted.ends_with('\n') {
            println!();
        }
    }
}

fn open_store(config: &Config) -> Result<Arc<FileStore>> {
    let dir = config.data_dir().ok_or_else(|| {
        LitterError::config("Could not determine data directory (no home directory)")
    })?;
    let store = FileStore::with_dir(dir)?;
    tracing::debug!(root = %store.root().display(), "opened file store");
    Ok(Arc::new(store))
}

/// Run the CLI and return the exit code.
fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::load();
    let store = open_store(&config)?;
    let (json, quiet) = (cli.json, cli.quiet);

    match cli.command {
        Commands::Sync => run_sync(&config, store, json, quiet),
        Commands::Simulate {
            weight,
            status,
            usage,
            duration,
        } => {
            let readings = Readings::from_raw(
                Some(weight.as_str()),
                Some(status.as_str()),
                Some(usage.as_str()),
                Some(duration.as_str()),
            );
            run_simulate(&config, store, readings, json, quiet)
        }
        Commands::Check { animal } => run_check(&config, store, animal, json, quiet),
        Commands::Alerts { action, animal } => {
            let action = match action {
                AlertsCmd::List { limit } => AlertsAction::List { limit },
                AlertsCmd::Active => AlertsAction::Active,
                AlertsCmd::Read { id } => AlertsAction::Read { id },
                AlertsCmd::Dismiss { id } => AlertsAction::Dismiss { id },
                AlertsCmd::Stats => AlertsAction::Stats,
            };
            run_alerts(store, action, animal, json, quiet)
        }
        Commands::Visits { action } => {
            let action = match action {
                VisitsCmd::List { limit } => VisitsAction::List { limit },
                VisitsCmd::Seed { days, seed } => VisitsAction::Seed { days, seed },
                VisitsCmd::Clear => VisitsAction::Clear,
            };
            run_visits(store, action, json, quiet)
        }
        Commands::Profile { action, animal } => {
            let action = match action {
                ProfileCmd::Show => ProfileAction::Show,
                ProfileCmd::Set { name, mode } => ProfileAction::Set { name, mode },
            };
            run_profile(store, action, animal, json, quiet)
        }
        Commands::State { sensor } => {
            let sensor = sensor.unwrap_or_else(|| config.sensor.sensor_id.clone());
            run_state(store, &sensor, json, quiet)
        }
    }
}

// =============================================================================
// Command Implementations
// =============================================================================

fn run_sync(config: &Config, store: Arc<FileStore>, json: bool, quiet: bool) -> Result<ExitCode> {
    let snapshot_path = config
        .sensor
        .snapshot_path
        .clone()
        .ok_or_else(|| LitterError::missing_config("sensor.snapshot_path (LITTERWATCH_SNAPSHOT_PATH)"))?;
    let source = SnapshotReadingSource::new(snapshot_path);

    let cmd = SyncCommand::new(SensorEventMachine::new(store, SyncOptions::from_config(config)));
    let options = SyncOutputOptions { json, quiet };
    let output = cmd.run(&source, config.sensor.credential.as_deref());
    print(&cmd.format_output(&output, &options));

    Ok(outcome_to_exit_code(output.success, output.retryable))
}

fn run_simulate(
    config: &Config,
    store: Arc<FileStore>,
    readings: Readings,
    json: bool,
    quiet: bool,
) -> Result<ExitCode> {
    let cmd = SyncCommand::new(SensorEventMachine::new(store, SyncOptions::from_config(config)));
    let options = SyncOutputOptions { json, quiet };
    let output = cmd.simulate(readings);
    print(&cmd.format_output(&output, &options));

    Ok(outcome_to_exit_code(output.success, output.retryable))
}

fn run_check(
    config: &Config,
    store: Arc<FileStore>,
    animal_id: Option<String>,
    json: bool,
    quiet: bool,
) -> Result<ExitCode> {
    let cmd = CheckCommand::new(AlertEngine::new(store, EngineOptions::from_config(config)));
    let options = CheckOptions {
        json,
        quiet,
        animal_id,
    };
    let output = cmd.run(&options);
    print(&cmd.format_output(&output, &options));

    Ok(outcome_to_exit_code(output.success, output.retryable))
}

fn run_alerts(
    store: Arc<FileStore>,
    action: AlertsAction,
    animal_id: Option<String>,
    json: bool,
    quiet: bool,
) -> Result<ExitCode> {
    let cmd = AlertsCommand::new(store);
    let options = AlertsOptions {
        json,
        quiet,
        animal_id,
    };
    let output = cmd.run(&action, &options);
    print(&cmd.format_output(&output, &options));

    Ok(outcome_to_exit_code(output.success, false))
}

fn run_visits(store: Arc<FileStore>, action: VisitsAction, json: bool, quiet: bool) -> Result<ExitCode> {
    let cmd = VisitsCommand::new(store);
    let options = VisitsOptions { json, quiet };
    let output = cmd.run(&action);
    print(&cmd.format_output(&output, &options));

    Ok(outcome_to_exit_code(output.success, false))
}

fn run_profile(
    store: Arc<FileStore>,
    action: ProfileAction,
    animal_id: Option<String>,
    json: bool,
    quiet: bool,
) -> Result<ExitCode> {
    let cmd = ProfileCommand::new(store);
    let options = ProfileOptions {
        json,
        quiet,
        animal_id,
    };
    let output = cmd.run(&action, &options);
    print(&cmd.format_output(&output, &options));

    Ok(outcome_to_exit_code(output.success, false))
}

fn run_state(store: Arc<FileStore>, sensor_id: &str, json: bool, quiet: bool) -> Result<ExitCode> {
    let cmd = StateCommand::new(store);
    let options = StateOptions { json, quiet };
    let output = cmd.run(sensor_id);
    print(&cmd.format_output(&output, &options));

    Ok(outcome_to_exit_code(output.success, false))
}
