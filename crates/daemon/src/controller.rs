//! Recording operations on a broadcaster, independent of any vendor.
//!
//! Every operation resolves the broadcaster's backend through the registry.
//! Start, split and stop check, in order: configuration validity, the
//! device's current recording state, then perform the action.

use crate::error::PilotError;
use crate::handoff::drop_path;
use crate::model::Broadcaster;
use crate::piloting::{BackendRegistry, PilotingBackend, RecordingInfo};
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct RecordingController {
    registry: BackendRegistry,
    /// Directory the recorders write into, as mounted on this host.
    drop_dir: PathBuf,
}

impl RecordingController {
    pub fn new(registry: BackendRegistry, drop_dir: PathBuf) -> Self {
        Self { registry, drop_dir }
    }

    fn backend(&self, broadcaster: &Broadcaster) -> Result<Box<dyn PilotingBackend>, PilotError> {
        self.registry.resolve(broadcaster).ok_or_else(|| {
            PilotError::Configuration(format!(
                "broadcaster {} has no usable piloting implementation",
                broadcaster.name
            ))
        })
    }

    /// Backend with a valid configuration, ready for an action.
    fn configured_backend(
        &self,
        broadcaster: &Broadcaster,
    ) -> Result<Box<dyn PilotingBackend>, PilotError> {
        let backend = self.backend(broadcaster)?;
        if !backend.check_config() {
            return Err(PilotError::Configuration(format!(
                "broadcaster {} has an invalid piloting configuration",
                broadcaster.name
            )));
        }
        Ok(backend)
    }

    pub fn check_config(&self, broadcaster: &Broadcaster) -> bool {
        self.backend(broadcaster)
            .map(|b| b.check_config())
            .unwrap_or(false)
    }

    pub async fn is_available(&self, broadcaster: &Broadcaster) -> bool {
        match self.backend(broadcaster) {
            Ok(backend) => backend.is_available_to_record().await,
            Err(_) => false,
        }
    }

    pub async fn is_recording(&self, broadcaster: &Broadcaster) -> bool {
        match self.backend(broadcaster) {
            Ok(backend) => backend.is_recording().await,
            Err(_) => false,
        }
    }

    /// Recording, and the recorder's current file is in our drop directory.
    ///
    /// Recordings that write elsewhere were started by someone else.
    pub async fn is_recording_launched_here(&self, broadcaster: &Broadcaster) -> bool {
        let Ok(backend) = self.backend(broadcaster) else {
            return false;
        };
        if !backend.is_recording().await {
            return false;
        }

        let info = backend.current_record_info().await;
        let Some(path) = drop_path(&self.drop_dir, &info.current_file) else {
            debug!(broadcaster = %broadcaster.name, "recording without a current file");
            return false;
        };
        let found = tokio::fs::metadata(&path).await.is_ok();
        if !found {
            debug!(
                broadcaster = %broadcaster.name,
                path = %path.display(),
                "current file not in drop directory"
            );
        }
        found
    }

    pub async fn current_recording_info(&self, broadcaster: &Broadcaster) -> RecordingInfo {
        match self.backend(broadcaster) {
            Ok(backend) => backend.current_record_info().await,
            Err(_) => RecordingInfo::default(),
        }
    }

    pub async fn start(
        &self,
        broadcaster: &Broadcaster,
        event_id: Option<u64>,
        user_login: Option<&str>,
    ) -> Result<(), PilotError> {
        let backend = self.configured_backend(broadcaster)?;

        if backend.is_recording().await {
            return Err(PilotError::StateConflict(format!(
                "broadcaster {} is already recording",
                broadcaster.name
            )));
        }

        if !backend.start(event_id, user_login).await {
            return Err(PilotError::Upstream(format!(
                "broadcaster {} refused to start recording",
                broadcaster.name
            )));
        }

        info!(broadcaster = %broadcaster.name, event_id = ?event_id, "recording started");
        Ok(())
    }

    /// Close the current segment and keep recording.
    ///
    /// Returns the recorder state from before the split, which names the
    /// segment that was just closed.
    pub async fn split(&self, broadcaster: &Broadcaster) -> Result<RecordingInfo, PilotError> {
        let backend = self.recording_backend(broadcaster).await?;
        let closed = backend.current_record_info().await;

        if !backend.split().await {
            return Err(PilotError::Upstream(format!(
                "broadcaster {} refused to split recording",
                broadcaster.name
            )));
        }

        info!(broadcaster = %broadcaster.name, file = %closed.current_file, "recording split");
        Ok(closed)
    }

    /// Stop recording. Returns the recorder state from before the stop.
    pub async fn stop(&self, broadcaster: &Broadcaster) -> Result<RecordingInfo, PilotError> {
        let backend = self.recording_backend(broadcaster).await?;
        let closed = backend.current_record_info().await;

        if !backend.stop().await {
            return Err(PilotError::Upstream(format!(
                "broadcaster {} refused to stop recording",
                broadcaster.name
            )));
        }

        info!(broadcaster = %broadcaster.name, file = %closed.current_file, "recording stopped");
        Ok(closed)
    }

    async fn recording_backend(
        &self,
        broadcaster: &Broadcaster,
    ) -> Result<Box<dyn PilotingBackend>, PilotError> {
        let backend = self.configured_backend(broadcaster)?;
        if !backend.is_recording().await {
            return Err(PilotError::StateConflict(format!(
                "broadcaster {} is not recording",
                broadcaster.name
            )));
        }
        Ok(backend)
    }
}
