//! Remote control of broadcaster recorders.
//!
//! Each vendor protocol implements [`PilotingBackend`] for one broadcaster and
//! is registered in the [`BackendRegistry`] under a normalized name. Backend
//! methods are total: upstream failures are logged and surface as `false` or
//! an empty [`RecordingInfo`], never as errors, so one bad device cannot abort
//! a batch over many broadcasters.

pub mod registry;
pub mod wowza;

pub use registry::{normalize_implementation, BackendFactory, BackendRegistry};
pub use wowza::WowzaBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

#[async_trait]
pub trait PilotingBackend: Send + Sync {
    /// Normalized implementation name this backend is registered under.
    fn implementation(&self) -> &'static str;

    /// Parse and validate the broadcaster's configuration document.
    fn check_config(&self) -> bool;

    /// Connected and not already recording.
    async fn is_available_to_record(&self) -> bool;

    /// Connected and recording.
    async fn is_recording(&self) -> bool;

    /// Start recording into a file named after the event id, or the user's
    /// login when no event is given, and the broadcaster slug.
    async fn start(&self, event_id: Option<u64>, user_login: Option<&str>) -> bool;

    /// Close the current segment and keep recording into a new one.
    async fn split(&self) -> bool;

    async fn stop(&self) -> bool;

    /// State of the current recorder; empty when unknown.
    async fn current_record_info(&self) -> RecordingInfo;
}

/// What a recorder reports about its in-progress or just-finished recording.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingInfo {
    pub output_path: String,
    pub current_file: String,
    /// Trailing numeric segment suffix of `current_file`, or empty.
    pub segment_number: String,
    pub segment_duration: Option<u64>,
}

impl RecordingInfo {
    pub fn is_empty(&self) -> bool {
        self.current_file.is_empty()
    }
}

/// Extract the segment number from names shaped like `<stem>_<digits>.<ext>`.
pub fn segment_number_of(file_name: &str) -> String {
    let Some((stem, _ext)) = file_name.rsplit_once('.') else {
        return String::new();
    };
    match stem.rsplit_once('_') {
        Some((_, digits)) if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
            digits.to_string()
        }
        _ => String::new(),
    }
}

/// Leading `<event id>_` prefix of a recorder file name, if any.
pub fn event_id_of(file_name: &str) -> Option<u64> {
    let (prefix, _) = file_name.split_once('_')?;
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    prefix.parse().ok()
}

/// Why a piloting configuration document was rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PilotingConfError {
    #[error("piloting configuration is not set")]
    Missing,

    #[error("piloting configuration is not a valid JSON object: {0}")]
    Malformed(String),

    #[error("piloting configuration value for '{0}' must be a string")]
    NotFlat(String),

    #[error("piloting configuration is missing required keys: {}", .0.join(", "))]
    MissingKeys(Vec<String>),
}

/// A validated flat key/value piloting configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PilotingConf {
    values: BTreeMap<String, String>,
}

impl PilotingConf {
    /// Parse `document` and require every key in `required` to carry a non-blank value.
    ///
    /// Numbers and booleans are accepted and rendered as strings; nested values are rejected.
    pub fn parse(document: Option<&str>, required: &[&str]) -> Result<Self, PilotingConfError> {
        let document = document
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or(PilotingConfError::Missing)?;

        let parsed: Value = serde_json::from_str(document)
            .map_err(|e| PilotingConfError::Malformed(e.to_string()))?;
        let object = match parsed {
            Value::Object(object) => object,
            other => {
                return Err(PilotingConfError::Malformed(format!(
                    "expected an object, found {}",
                    json_kind(&other)
                )))
            }
        };

        let mut values = BTreeMap::new();
        for (key, value) in object {
            let text = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null | Value::Array(_) | Value::Object(_) => {
                    return Err(PilotingConfError::NotFlat(key))
                }
            };
            values.insert(key, text);
        }

        let missing: Vec<String> = required
            .iter()
            .filter(|key| values.get(**key).map_or(true, |v| v.trim().is_empty()))
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(PilotingConfError::MissingKeys(missing));
        }

        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// HTTP client shared by all backends; every request is bounded by `timeout`.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
}
