//! In-process fake recorders for controller, engine and scheduler tests.

use crate::clock::FixedClock;
use crate::controller::RecordingController;
use crate::engine::LiveEngine;
use crate::handoff::SegmentHandoff;
use crate::model::Broadcaster;
use crate::piloting::{
    segment_number_of, BackendRegistry, PilotingBackend, PilotingConf, RecordingInfo,
};
use crate::retry::RetryPolicy;
use crate::store::MemoryStore;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) const FAKE: &str = "fake";

#[derive(Debug, Default)]
pub(crate) struct DeviceState {
    pub connected: bool,
    pub recording: bool,
    pub current_file: String,
    pub segment: u32,
    /// When false, start/split/stop are rejected by the device.
    pub accept: bool,
    pub calls: Vec<String>,
}

/// One simulated recorder. Files it "records" are written into `drop_dir`.
#[derive(Debug)]
pub(crate) struct FakeDevice {
    drop_dir: Option<PathBuf>,
    pub state: Mutex<DeviceState>,
}

impl FakeDevice {
    fn new(drop_dir: Option<PathBuf>) -> Self {
        Self {
            drop_dir,
            state: Mutex::new(DeviceState {
                connected: true,
                accept: true,
                ..DeviceState::default()
            }),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn is_recording(&self) -> bool {
        self.state.lock().unwrap().recording
    }

    /// Put the device in a recording state that was started elsewhere.
    pub fn set_recording(&self, current_file: &str, write_file: bool) {
        let mut state = self.state.lock().unwrap();
        state.recording = true;
        state.current_file = current_file.to_string();
        if write_file {
            self.write_segment(current_file);
        }
    }

    pub fn reject_actions(&self) {
        self.state.lock().unwrap().accept = false;
    }

    fn write_segment(&self, name: &str) {
        if let Some(dir) = &self.drop_dir {
            std::fs::create_dir_all(dir).unwrap();
            std::fs::write(dir.join(name), format!("recording {}", name)).unwrap();
        }
    }
}

/// Devices keyed by broadcaster id, created on first use.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeFleet {
    drop_dir: Option<PathBuf>,
    devices: Arc<Mutex<HashMap<u64, Arc<FakeDevice>>>>,
}

impl FakeFleet {
    pub fn new(drop_dir: Option<PathBuf>) -> Self {
        Self {
            drop_dir,
            devices: Arc::default(),
        }
    }

    pub fn device(&self, broadcaster_id: u64) -> Arc<FakeDevice> {
        self.devices
            .lock()
            .unwrap()
            .entry(broadcaster_id)
            .or_insert_with(|| Arc::new(FakeDevice::new(self.drop_dir.clone())))
            .clone()
    }

    pub fn registry(&self) -> BackendRegistry {
        let mut registry = BackendRegistry::new();
        let fleet = self.clone();
        registry.register(
            FAKE,
            Arc::new(move |broadcaster: &Broadcaster| {
                Box::new(FakeBackend {
                    broadcaster: broadcaster.clone(),
                    device: fleet.device(broadcaster.id),
                }) as Box<dyn PilotingBackend>
            }),
        );
        registry
    }
}

/// Broadcaster wired to the fake backend with a valid configuration.
pub(crate) fn fake_broadcaster(id: u64, name: &str) -> Broadcaster {
    Broadcaster::new(id, name).with_piloting("Fake", r#"{"device":"sim"}"#)
}

/// Engine over a memory store and a fake fleet, with `root/live` as drop
/// directory and `root/media` as media root.
pub(crate) fn fake_engine(
    root: &Path,
    now: NaiveDateTime,
) -> (FakeFleet, Arc<MemoryStore>, LiveEngine) {
    let drop_dir = root.join("live");
    let fleet = FakeFleet::new(Some(drop_dir.clone()));
    let store = Arc::new(MemoryStore::new());
    let engine = LiveEngine::new(
        store.clone(),
        RecordingController::new(fleet.registry(), drop_dir.clone()),
        SegmentHandoff::new(
            drop_dir,
            root.join("media"),
            RetryPolicy::new(2, Duration::from_millis(5)),
        ),
        Arc::new(FixedClock::new(now)),
    );
    (fleet, store, engine)
}

struct FakeBackend {
    broadcaster: Broadcaster,
    device: Arc<FakeDevice>,
}

impl FakeBackend {
    fn valid(&self) -> bool {
        PilotingConf::parse(self.broadcaster.piloting_conf.as_deref(), &["device"]).is_ok()
    }

    fn segment_name(&self, prefix: &str, segment: u32) -> String {
        format!("{}{}_2024-03-14-10.00.00.000-CET_{}.mp4", prefix, self.broadcaster.slug, segment)
    }
}

#[async_trait]
impl PilotingBackend for FakeBackend {
    fn implementation(&self) -> &'static str {
        FAKE
    }

    fn check_config(&self) -> bool {
        self.valid()
    }

    async fn is_available_to_record(&self) -> bool {
        let state = self.device.state.lock().unwrap();
        self.valid() && state.connected && !state.recording
    }

    async fn is_recording(&self) -> bool {
        let state = self.device.state.lock().unwrap();
        self.valid() && state.connected && state.recording
    }

    async fn start(&self, event_id: Option<u64>, user_login: Option<&str>) -> bool {
        if !self.valid() {
            return false;
        }
        let prefix = match (event_id, user_login) {
            (Some(id), _) => format!("{}_", id),
            (None, Some(login)) => format!("{}_", login),
            _ => String::new(),
        };
        let mut state = self.device.state.lock().unwrap();
        state.calls.push(format!("start:{}", event_id.unwrap_or_default()));
        if !state.accept {
            return false;
        }
        state.recording = true;
        state.segment = 0;
        state.current_file = self.segment_name(&prefix, 0);
        let file = state.current_file.clone();
        drop(state);
        self.device.write_segment(&file);
        true
    }

    async fn split(&self) -> bool {
        if !self.valid() {
            return false;
        }
        let mut state = self.device.state.lock().unwrap();
        state.calls.push("split".to_string());
        if !state.accept {
            return false;
        }
        let prefix = state
            .current_file
            .split_once('_')
            .map(|(p, _)| format!("{}_", p))
            .unwrap_or_default();
        state.segment += 1;
        state.current_file = self.segment_name(&prefix, state.segment);
        let file = state.current_file.clone();
        drop(state);
        self.device.write_segment(&file);
        true
    }

    async fn stop(&self) -> bool {
        if !self.valid() {
            return false;
        }
        let mut state = self.device.state.lock().unwrap();
        state.calls.push("stop".to_string());
        if !state.accept {
            return false;
        }
        state.recording = false;
        true
    }

    async fn current_record_info(&self) -> RecordingInfo {
        if !self.valid() {
            return RecordingInfo::default();
        }
        let state = self.device.state.lock().unwrap();
        RecordingInfo {
            output_path: "/data/live".to_string(),
            segment_number: segment_number_of(&state.current_file),
            current_file: state.current_file.clone(),
            segment_duration: None,
        }
    }
}
