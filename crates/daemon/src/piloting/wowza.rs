//! Wowza Streaming Engine backend, driven through its REST API (`/v2`).

use super::{segment_number_of, PilotingBackend, PilotingConf, RecordingInfo};
use crate::model::Broadcaster;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Device-side template appended to every base file name so each segment is
/// uniquely named by the recorder itself.
pub const FILE_TEMPLATE_SUFFIX: &str = "_${RecordingStartTime}_${SegmentNumber}";

const MAX_LOGGED_BODY: usize = 200;

/// State of an incoming stream as reported by `incomingstreams/<name>`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomingStream {
    #[serde(default)]
    is_connected: bool,
    #[serde(default)]
    is_recording_set: bool,
}

/// Body returned by recorder creation and recorder actions.
#[derive(Debug, Default, Deserialize)]
struct ActionResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

/// State of a stream recorder as reported by `streamrecorders/<name>`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecorderState {
    #[serde(default)]
    current_file: Option<String>,
    #[serde(default)]
    output_path: Option<String>,
    #[serde(default)]
    segment_duration: Option<u64>,
}

/// REST locations derived from a validated configuration.
struct Endpoints {
    instance: String,
    livestream: String,
}

impl Endpoints {
    fn from_conf(conf: &PilotingConf) -> Option<Self> {
        let server_url = conf.get("server_url")?.trim_end_matches('/');
        let application = conf.get("application")?;
        Some(Self {
            instance: format!(
                "{}/v2/servers/_defaultServer_/vhosts/_defaultVHost_/applications/{}/instances/_definst_",
                server_url, application
            ),
            livestream: conf.get("livestream")?.to_string(),
        })
    }

    fn incoming_stream(&self) -> String {
        format!("{}/incomingstreams/{}", self.instance, self.livestream)
    }

    fn recorder(&self) -> String {
        format!("{}/streamrecorders/{}", self.instance, self.livestream)
    }

    fn recorder_action(&self, action: &str) -> String {
        format!("{}/actions/{}", self.recorder(), action)
    }
}

/// Base file name handed to the recorder: `[<event id>|<login>_]<slug><template>`.
pub fn base_file_name(slug: &str, event_id: Option<u64>, user_login: Option<&str>) -> String {
    let prefix = match (event_id, user_login) {
        (Some(id), _) => format!("{}_", id),
        (None, Some(login)) if !login.is_empty() => format!("{}_", login),
        _ => String::new(),
    };
    format!("{}{}{}", prefix, slug, FILE_TEMPLATE_SUFFIX)
}

/// Best-effort human message from an upstream error response.
async fn upstream_message(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(MAX_LOGGED_BODY).collect());
    format!("{}: {}", status, message)
}

pub struct WowzaBackend {
    broadcaster: Broadcaster,
    client: reqwest::Client,
    /// Recorder output directory sent with every start: the drop directory this host watches.
    output_path: String,
}

impl WowzaBackend {
    pub const IMPLEMENTATION: &'static str = "wowza";
    pub const REQUIRED_KEYS: &'static [&'static str] = &["server_url", "application", "livestream"];

    pub fn new(broadcaster: Broadcaster, client: reqwest::Client, output_path: String) -> Self {
        Self {
            broadcaster,
            client,
            output_path,
        }
    }

    fn endpoints(&self) -> Option<Endpoints> {
        match PilotingConf::parse(self.broadcaster.piloting_conf.as_deref(), Self::REQUIRED_KEYS) {
            Ok(conf) => Endpoints::from_conf(&conf),
            Err(e) => {
                warn!(broadcaster = %self.broadcaster.name, error = %e, "invalid piloting configuration");
                None
            }
        }
    }

    async fn stream_state(&self) -> Option<IncomingStream> {
        let endpoints = self.endpoints()?;
        let response = match self
            .client
            .get(endpoints.incoming_stream())
            .header(ACCEPT, "application/json")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(broadcaster = %self.broadcaster.name, error = %e, "stream state request failed");
                return None;
            }
        };

        if response.status() != StatusCode::OK {
            let message = upstream_message(response).await;
            warn!(broadcaster = %self.broadcaster.name, %message, "stream state rejected");
            return None;
        }

        match response.json::<IncomingStream>().await {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(broadcaster = %self.broadcaster.name, error = %e, "unreadable stream state");
                None
            }
        }
    }

    /// Send a recorder command; success needs `expected` status and `success: true`.
    async fn command(&self, request: reqwest::RequestBuilder, expected: StatusCode, what: &str) -> bool {
        let response = match request
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(broadcaster = %self.broadcaster.name, error = %e, "{} request failed", what);
                return false;
            }
        };

        if response.status() != expected {
            let message = upstream_message(response).await;
            warn!(broadcaster = %self.broadcaster.name, %message, "{} rejected", what);
            return false;
        }

        let body = response.json::<ActionResponse>().await.unwrap_or_default();
        if !body.success {
            warn!(
                broadcaster = %self.broadcaster.name,
                message = body.message.as_deref().unwrap_or(""),
                "{} not acknowledged",
                what
            );
        }
        body.success
    }
}

#[async_trait]
impl PilotingBackend for WowzaBackend {
    fn implementation(&self) -> &'static str {
        Self::IMPLEMENTATION
    }

    fn check_config(&self) -> bool {
        match PilotingConf::parse(self.broadcaster.piloting_conf.as_deref(), Self::REQUIRED_KEYS) {
            Ok(_) => {
                debug!(broadcaster = %self.broadcaster.name, "piloting configuration ok");
                true
            }
            Err(e) => {
                warn!(
                    broadcaster = %self.broadcaster.name,
                    error = %e,
                    "piloting configuration must look like {{\"server_url\":\"...\",\"application\":\"...\",\"livestream\":\"...\"}}"
                );
                false
            }
        }
    }

    async fn is_available_to_record(&self) -> bool {
        self.stream_state()
            .await
            .map_or(false, |s| s.is_connected && !s.is_recording_set)
    }

    async fn is_recording(&self) -> bool {
        self.stream_state()
            .await
            .map_or(false, |s| s.is_connected && s.is_recording_set)
    }

    async fn start(&self, event_id: Option<u64>, user_login: Option<&str>) -> bool {
        let Some(endpoints) = self.endpoints() else {
            return false;
        };
        let base_file = base_file_name(&self.broadcaster.slug, event_id, user_login);
        info!(broadcaster = %self.broadcaster.name, %base_file, "starting recorder");

        let payload = json!({
            "instanceName": "",
            "recorderName": endpoints.livestream,
            "recorderState": "",
            "outputPath": self.output_path,
            "baseFile": base_file,
            "fileTemplate": "",
            "fileFormat": "",
            "fileVersionDelegateName": "",
            "segmentationType": "",
            "segmentSchedule": "",
            "segmentDuration": 0,
            "segmentSize": 0,
            "startOnKeyFrame": true,
            "recordData": false,
            "moveFirstVideoFrameToZero": false,
            "splitOnTcDiscontinuity": false,
            "defaultRecorder": false,
            "backBufferTime": 0,
            "option": ""
        });

        let request = self.client.post(endpoints.recorder()).json(&payload);
        self.command(request, StatusCode::CREATED, "start").await
    }

    async fn split(&self) -> bool {
        let Some(endpoints) = self.endpoints() else {
            return false;
        };
        info!(broadcaster = %self.broadcaster.name, "splitting recording");
        let request = self.client.put(endpoints.recorder_action("splitRecording"));
        self.command(request, StatusCode::OK, "split").await
    }

    async fn stop(&self) -> bool {
        let Some(endpoints) = self.endpoints() else {
            return false;
        };
        info!(broadcaster = %self.broadcaster.name, "stopping recording");
        let request = self.client.put(endpoints.recorder_action("stopRecording"));
        self.command(request, StatusCode::OK, "stop").await
    }

    async fn current_record_info(&self) -> RecordingInfo {
        let Some(endpoints) = self.endpoints() else {
            return RecordingInfo::default();
        };

        let response = match self
            .client
            .get(endpoints.recorder())
            .header(ACCEPT, "application/json")
            .send()
            .await
        {
            Ok(response) if response.status() == StatusCode::OK => response,
            Ok(response) => {
                let message = upstream_message(response).await;
                warn!(broadcaster = %self.broadcaster.name, %message, "recorder state rejected");
                return RecordingInfo::default();
            }
            Err(e) => {
                warn!(broadcaster = %self.broadcaster.name, error = %e, "recorder state request failed");
                return RecordingInfo::default();
            }
        };

        let state = match response.json::<RecorderState>().await {
            Ok(state) => state,
            Err(e) => {
                warn!(broadcaster = %self.broadcaster.name, error = %e, "unreadable recorder state");
                return RecordingInfo::default();
            }
        };

        let current_file = state.current_file.unwrap_or_default();
        RecordingInfo {
            output_path: state.output_path.unwrap_or_default(),
            segment_number: segment_number_of(&current_file),
            current_file,
            segment_duration: state.segment_duration,
        }
    }
}
