//! Daemon startup and main loop for the live recording pilot
//!
//! Wires the store, engine and scheduler from configuration, runs a
//! reconciliation cycle on every tick and serves the HTTP trigger surface.

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, ConfigError};
use crate::engine::LiveEngine;
use crate::scheduler::Scheduler;
use crate::server::{run_server, AppState, ServerError};
use crate::store::{Catalog, JsonStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    /// Server error
    #[error("Server error: {0}")]
    Server(#[from] ServerError),
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    scheduler: Arc<Scheduler>,
}

impl Daemon {
    /// Load configuration from `config_path` (plus environment overrides)
    /// and build the daemon over the JSON store it names.
    pub fn new<P: AsRef<Path>>(config_path: P) -> Result<Self, DaemonError> {
        let config = Config::load(config_path)?;
        Self::with_config(config)
    }

    /// Build the daemon from an already loaded configuration.
    pub fn with_config(config: Config) -> Result<Self, DaemonError> {
        let store = Arc::new(JsonStore::new(config.store.state_dir.clone()));
        Self::with_store(config, store, Arc::new(SystemClock))
    }

    /// Build the daemon over any store and clock.
    pub fn with_store(
        config: Config,
        store: Arc<dyn Catalog>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DaemonError> {
        let engine = Arc::new(LiveEngine::from_config(&config, store, clock)?);
        let scheduler = Arc::new(Scheduler::from_config(engine, &config.scheduler));
        Ok(Self { config, scheduler })
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        self.scheduler.clone()
    }

    pub fn engine(&self) -> &Arc<LiveEngine> {
        self.scheduler.engine()
    }

    /// Periodic cycles only act on devices in production.
    pub fn dry_run(&self) -> bool {
        !self.config.scheduler.production
    }

    /// Spawn the HTTP server as a background task.
    pub fn start_server(&self) -> tokio::task::JoinHandle<()> {
        let state = AppState {
            scheduler: self.scheduler.clone(),
            production: self.config.scheduler.production,
        };
        let bind = self.config.server.bind.clone();
        tokio::spawn(async move {
            if let Err(e) = run_server(state, &bind).await {
                error!(error = %e, "http server stopped");
            }
        })
    }

    /// Run a reconciliation cycle on every tick, forever.
    ///
    /// Ticks missed while a cycle runs long are skipped, not queued.
    pub async fn run(&self) -> Result<(), DaemonError> {
        let period = Duration::from_secs(self.config.scheduler.interval_secs.max(1));
        let dry_run = self.dry_run();
        info!(?period, dry_run, "scheduler loop started");

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            self.scheduler.run_cycle_now(dry_run).await;
        }
    }

    /// Run the HTTP server and the scheduler loop until interrupted.
    pub async fn run_with_server(&self) -> Result<(), DaemonError> {
        let _server_handle = self.start_server();

        tokio::select! {
            result = self.run() => result,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                Ok(())
            }
        }
    }
}
