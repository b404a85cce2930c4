//! Errors surfaced by recording operations.

use crate::handoff::HandoffError;
use crate::store::StoreError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PilotError {
    /// Broadcaster has no usable piloting implementation or configuration.
    #[error("Implementation error: {0}")]
    Configuration(String),

    /// The device rejected or failed a request.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Requested action does not match the device's recording state.
    #[error("State conflict: {0}")]
    StateConflict(String),

    #[error("Handoff failed: {0}")]
    Handoff(#[from] HandoffError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },
}

impl PilotError {
    /// Machine-readable reason; handoff failures report their own reason.
    pub fn reason(&self) -> &'static str {
        match self {
            PilotError::Configuration(_) => "configuration",
            PilotError::Upstream(_) => "upstream",
            PilotError::StateConflict(_) => "state_conflict",
            PilotError::Handoff(e) => e.reason(),
            PilotError::Store(_) => "store",
            PilotError::NotFound { .. } => "not_found",
        }
    }
}

/// Error body returned to synchronous callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub reason: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl From<&PilotError> for ErrorPayload {
    fn from(error: &PilotError) -> Self {
        let path = match error {
            PilotError::Handoff(e) => e.path().map(|p| p.display().to_string()),
            _ => None,
        };
        Self {
            reason: error.reason().to_string(),
            message: error.to_string(),
            path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_handoff_payload_names_path() {
        let error = PilotError::from(HandoffError::SourceNotFound {
            path: PathBuf::from("/data/live/7_amphi_0.mp4"),
        });
        let payload = ErrorPayload::from(&error);
        assert_eq!(payload.reason, "source_not_found");
        assert_eq!(payload.path.as_deref(), Some("/data/live/7_amphi_0.mp4"));
        assert!(payload.message.contains("/data/live/7_amphi_0.mp4"));
    }

    #[test]
    fn test_payload_skips_missing_path() {
        let payload = ErrorPayload::from(&PilotError::NotFound {
            kind: "broadcaster",
            id: 3,
        });
        assert_eq!(payload.reason, "not_found");
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("path").is_none());
        assert_eq!(json["message"], "broadcaster 3 not found");
    }
}
