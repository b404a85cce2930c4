//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// HTTP trigger surface configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Address the HTTP server binds to (default 127.0.0.1:7878)
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:7878".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Broadcaster remote-control configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PilotingConfig {
    /// Upper bound for every request sent to a broadcaster (default 10)
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_http_timeout_secs() -> u64 {
    10
}

impl Default for PilotingConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl PilotingConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Reconciliation loop configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Seconds between two reconciliation cycles (default 60)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Trailing window, in minutes, during which an ended event is still stopped (default 5)
    #[serde(default = "default_stop_grace_minutes")]
    pub stop_grace_minutes: u32,
    /// Issue start/stop calls for real. When false every decision is only logged.
    #[serde(default)]
    pub production: bool,
}

fn default_interval_secs() -> u64 {
    60
}

fn default_stop_grace_minutes() -> u32 {
    5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            stop_grace_minutes: default_stop_grace_minutes(),
            production: false,
        }
    }
}

/// Segment handoff configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandoffConfig {
    /// Directory shared with the encoders where finished segments are dropped
    #[serde(default = "default_drop_dir")]
    pub drop_dir: PathBuf,
    /// Root of the permanent media store (one sub-directory per owner)
    #[serde(default = "default_media_root")]
    pub media_root: PathBuf,
    /// Number of polls before a readiness check gives up (default 6)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay between two polls in milliseconds (default 500)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_drop_dir() -> PathBuf {
    PathBuf::from("/data/live")
}

fn default_media_root() -> PathBuf {
    PathBuf::from("/data/media")
}

fn default_max_attempts() -> u32 {
    6
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            drop_dir: default_drop_dir(),
            media_root: default_media_root(),
            max_attempts: default_max_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl HandoffConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Record store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// Directory holding broadcaster and event JSON records
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/livepilot")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub piloting: PilotingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub handoff: HandoffConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Parse a boolean the way operators write them in env files.
fn parse_flag(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - LIVEPILOT_BIND -> server.bind
    /// - LIVEPILOT_HTTP_TIMEOUT_SECS -> piloting.http_timeout_secs
    /// - LIVEPILOT_PRODUCTION -> scheduler.production
    /// - LIVEPILOT_STOP_GRACE_MINUTES -> scheduler.stop_grace_minutes
    /// - LIVEPILOT_DROP_DIR -> handoff.drop_dir
    /// - LIVEPILOT_MEDIA_ROOT -> handoff.media_root
    /// - LIVEPILOT_STATE_DIR -> store.state_dir
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("LIVEPILOT_BIND") {
            if !val.trim().is_empty() {
                self.server.bind = val;
            }
        }

        if let Ok(val) = env::var("LIVEPILOT_HTTP_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.piloting.http_timeout_secs = secs;
            }
        }

        // Invalid value keeps the existing setting
        if let Ok(val) = env::var("LIVEPILOT_PRODUCTION") {
            if let Some(flag) = parse_flag(&val) {
                self.scheduler.production = flag;
            }
        }

        if let Ok(val) = env::var("LIVEPILOT_STOP_GRACE_MINUTES") {
            if let Ok(minutes) = val.parse::<u32>() {
                self.scheduler.stop_grace_minutes = minutes;
            }
        }

        if let Ok(val) = env::var("LIVEPILOT_DROP_DIR") {
            if !val.trim().is_empty() {
                self.handoff.drop_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("LIVEPILOT_MEDIA_ROOT") {
            if !val.trim().is_empty() {
                self.handoff.media_root = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("LIVEPILOT_STATE_DIR") {
            if !val.trim().is_empty() {
                self.store.state_dir = PathBuf::from(val);
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }
}
