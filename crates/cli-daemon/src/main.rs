//! CLI entry point for the live recording pilot
//!
//! `run` starts the scheduler loop and the HTTP server; `cycle` runs a single
//! reconciliation cycle; `availability` queries one broadcaster.

use clap::{Parser, Subcommand};
use livepilot::{Config, Daemon};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Live Pilot - scheduled recording on remote broadcast encoders
#[derive(Parser, Debug)]
#[command(name = "livepilot")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file; defaults plus environment when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler loop and the HTTP server
    Run,

    /// Run one reconciliation cycle and print its report
    Cycle {
        /// Act on devices even outside production mode
        #[arg(long)]
        force: bool,
    },

    /// Report whether a broadcaster can start recording
    Availability {
        broadcaster_id: u64,
    },
}

fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .compact()
        .with_target(true)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<Config, livepilot::config::ConfigError> {
    match path {
        Some(path) => {
            info!(config = %path.display(), "loading configuration");
            Config::load(path)
        }
        None => {
            let mut config = Config::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => error!(error = %e, "cannot render output"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = match load_config(args.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let daemon = match Daemon::with_config(config) {
        Ok(daemon) => daemon,
        Err(e) => {
            error!(error = %e, "failed to initialize daemon");
            return ExitCode::FAILURE;
        }
    };

    match args.command {
        Command::Run => {
            info!(
                bind = %daemon.config.server.bind,
                production = daemon.config.scheduler.production,
                "starting live pilot"
            );
            if let Err(e) = daemon.run_with_server().await {
                error!(error = %e, "daemon stopped");
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Command::Cycle { force } => {
            let dry_run = !force && daemon.dry_run();
            if dry_run {
                warn!("dry run: no device will be started or stopped (use --force to act)");
            }
            let report = daemon.scheduler().run_cycle_now(dry_run).await;
            print_json(&report);
            if report.errors.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Command::Availability { broadcaster_id } => {
            let response = daemon.engine().is_available_to_record(broadcaster_id).await;
            print_json(&response);
            if response.error.is_none() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
