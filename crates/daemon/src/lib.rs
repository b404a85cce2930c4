//! Live Pilot
//!
//! Schedules and supervises live-stream recordings on remote broadcast
//! encoders, and hands finished segments off into the media store.

pub mod clock;
pub mod controller;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod handoff;
pub mod model;
pub mod piloting;
pub mod retry;
pub mod scheduler;
pub mod server;
pub mod stability;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use livepilot_config as config;
pub use livepilot_config::Config;
pub use clock::{Clock, FixedClock, SystemClock};
pub use controller::RecordingController;
pub use daemon::{Daemon, DaemonError};
pub use engine::{AvailabilityResponse, LiveEngine, SegmentResponse, StartResponse};
pub use error::{ErrorPayload, PilotError};
pub use handoff::{HandoffError, SegmentHandoff};
pub use model::{Broadcaster, Event, MediaAsset};
pub use piloting::{BackendRegistry, PilotingBackend, RecordingInfo, WowzaBackend};
pub use retry::RetryPolicy;
pub use scheduler::{CycleReport, Scheduler, SkipReason};
pub use server::{create_router, run_server, AppState, ServerError};
pub use stability::{compare_sizes, wait_for_stable_size, StabilityResult};
pub use store::{BroadcasterStore, Catalog, EventStore, JsonStore, MemoryStore, StoreError};
