//! The service surface: recording operations addressed by record id.
//!
//! Callers get structured payloads instead of errors; the same operations
//! are available as `Result`-returning methods for the scheduler.

use crate::clock::Clock;
use crate::config::Config;
use crate::controller::RecordingController;
use crate::error::{ErrorPayload, PilotError};
use crate::handoff::{log_failure, SegmentHandoff};
use crate::model::{Broadcaster, Event, MediaAsset};
use crate::piloting::{http_client, BackendRegistry};
use crate::store::Catalog;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilityResponse {
    pub available: bool,
    pub recording: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Outcome of a split or stop, with the event's assets after the handoff.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets: Option<Vec<MediaAsset>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl SegmentResponse {
    fn from_result(result: Result<Vec<MediaAsset>, PilotError>) -> Self {
        match result {
            Ok(assets) => Self {
                success: true,
                assets: Some(assets),
                error: None,
            },
            Err(e) => Self {
                success: false,
                assets: None,
                error: Some(ErrorPayload::from(&e)),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Close {
    Split,
    Stop,
}

pub struct LiveEngine {
    store: Arc<dyn Catalog>,
    controller: RecordingController,
    handoff: SegmentHandoff,
    clock: Arc<dyn Clock>,
}

impl LiveEngine {
    pub fn new(
        store: Arc<dyn Catalog>,
        controller: RecordingController,
        handoff: SegmentHandoff,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            controller,
            handoff,
            clock,
        }
    }

    /// Wire the bundled backends, the handoff and the HTTP client from `config`.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn Catalog>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, reqwest::Error> {
        let client = http_client(config.piloting.http_timeout())?;
        let registry = BackendRegistry::with_defaults(client, &config.handoff.drop_dir);
        let controller = RecordingController::new(registry, config.handoff.drop_dir.clone());
        Ok(Self::new(
            store,
            controller,
            SegmentHandoff::from_config(&config.handoff),
            clock,
        ))
    }

    pub fn controller(&self) -> &RecordingController {
        &self.controller
    }

    pub fn store(&self) -> &Arc<dyn Catalog> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn broadcaster(&self, id: u64) -> Result<Broadcaster, PilotError> {
        self.store.broadcaster(id)?.ok_or(PilotError::NotFound {
            kind: "broadcaster",
            id,
        })
    }

    pub fn event(&self, id: u64) -> Result<Event, PilotError> {
        self.store
            .event(id)?
            .ok_or(PilotError::NotFound { kind: "event", id })
    }

    /// Load an event and its broadcaster, checking they belong together.
    fn scheduled(&self, event_id: u64, broadcaster_id: u64) -> Result<(Event, Broadcaster), PilotError> {
        let broadcaster = self.broadcaster(broadcaster_id)?;
        let event = self.event(event_id)?;
        if event.broadcaster_id != broadcaster.id {
            return Err(PilotError::StateConflict(format!(
                "event {} is not scheduled on broadcaster {}",
                event.id, broadcaster.name
            )));
        }
        Ok((event, broadcaster))
    }

    pub async fn is_available_to_record(&self, broadcaster_id: u64) -> AvailabilityResponse {
        let broadcaster = match self.broadcaster(broadcaster_id) {
            Ok(b) => b,
            Err(e) => {
                return AvailabilityResponse {
                    available: false,
                    recording: false,
                    error: Some(ErrorPayload::from(&e)),
                }
            }
        };

        if !self.controller.check_config(&broadcaster) {
            let e = PilotError::Configuration(format!(
                "broadcaster {} cannot be piloted",
                broadcaster.name
            ));
            return AvailabilityResponse {
                available: false,
                recording: false,
                error: Some(ErrorPayload::from(&e)),
            };
        }

        AvailabilityResponse {
            available: self.controller.is_available(&broadcaster).await,
            recording: self.controller.is_recording(&broadcaster).await,
            error: None,
        }
    }

    pub async fn start_recording(&self, event_id: u64, broadcaster_id: u64) -> StartResponse {
        let result = match self.scheduled(event_id, broadcaster_id) {
            Ok((event, broadcaster)) => self.start_event(&event, &broadcaster).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => StartResponse {
                success: true,
                message: None,
            },
            Err(e) => StartResponse {
                success: false,
                message: Some(e.to_string()),
            },
        }
    }

    pub async fn split_recording(&self, event_id: u64, broadcaster_id: u64) -> SegmentResponse {
        SegmentResponse::from_result(self.close_by_id(event_id, broadcaster_id, Close::Split).await)
    }

    pub async fn stop_recording(&self, event_id: u64, broadcaster_id: u64) -> SegmentResponse {
        SegmentResponse::from_result(self.close_by_id(event_id, broadcaster_id, Close::Stop).await)
    }

    async fn close_by_id(
        &self,
        event_id: u64,
        broadcaster_id: u64,
        close: Close,
    ) -> Result<Vec<MediaAsset>, PilotError> {
        let (event, broadcaster) = self.scheduled(event_id, broadcaster_id)?;
        self.close_segment(&event, &broadcaster, close).await
    }

    /// Start recording `event` on `broadcaster`, naming files after the event.
    pub async fn start_event(&self, event: &Event, broadcaster: &Broadcaster) -> Result<(), PilotError> {
        let result = self
            .controller
            .start(broadcaster, Some(event.id), Some(event.owner.as_str()))
            .await;
        if let Err(e) = &result {
            warn!(event_id = event.id, broadcaster = %broadcaster.name, error = %e, "start failed");
        }
        result
    }

    pub async fn split_event(
        &self,
        event: &Event,
        broadcaster: &Broadcaster,
    ) -> Result<Vec<MediaAsset>, PilotError> {
        self.close_segment(event, broadcaster, Close::Split).await
    }

    pub async fn stop_event(
        &self,
        event: &Event,
        broadcaster: &Broadcaster,
    ) -> Result<Vec<MediaAsset>, PilotError> {
        self.close_segment(event, broadcaster, Close::Stop).await
    }

    async fn close_segment(
        &self,
        event: &Event,
        broadcaster: &Broadcaster,
        close: Close,
    ) -> Result<Vec<MediaAsset>, PilotError> {
        let closed = match close {
            Close::Split => self.controller.split(broadcaster).await,
            Close::Stop => self.controller.stop(broadcaster).await,
        };
        let closed = closed.map_err(|e| {
            warn!(event_id = event.id, broadcaster = %broadcaster.name, error = %e, "{:?} failed", close);
            e
        })?;

        match self
            .handoff
            .claim(&*self.store, event, &closed, self.clock.now())
            .await
        {
            Ok(assets) => {
                info!(event_id = event.id, assets = assets.len(), "{:?} handed off", close);
                Ok(assets)
            }
            Err(e) => {
                log_failure(event.id, &e);
                Err(e.into())
            }
        }
    }
}
