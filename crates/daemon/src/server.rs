//! HTTP trigger surface for the engine.
//!
//! Exposes the recording operations and the reconciliation cycle as JSON
//! endpoints so the web application (or an operator with curl) can drive them.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::engine::{AvailabilityResponse, SegmentResponse, StartResponse};
use crate::scheduler::{CycleReport, Scheduler};

/// Errors that can occur when running the HTTP server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid bind address '{0}'")]
    InvalidAddress(String),

    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    /// Cycles triggered without an explicit `dry_run` act on devices only in production.
    pub production: bool,
}

#[derive(Debug, Deserialize)]
pub struct RecordingRequest {
    pub event_id: u64,
    pub broadcaster_id: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct CycleRequest {
    #[serde(default)]
    pub dry_run: Option<bool>,
}

fn status_for(reason: Option<&str>) -> StatusCode {
    match reason {
        Some("not_found") => StatusCode::NOT_FOUND,
        _ => StatusCode::OK,
    }
}

async fn get_availability(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> (StatusCode, Json<AvailabilityResponse>) {
    let response = state.scheduler.engine().is_available_to_record(id).await;
    let status = status_for(response.error.as_ref().map(|e| e.reason.as_str()));
    (status, Json(response))
}

async fn start_recording(
    State(state): State<AppState>,
    Json(request): Json<RecordingRequest>,
) -> Json<StartResponse> {
    Json(
        state
            .scheduler
            .engine()
            .start_recording(request.event_id, request.broadcaster_id)
            .await,
    )
}

async fn split_recording(
    State(state): State<AppState>,
    Json(request): Json<RecordingRequest>,
) -> (StatusCode, Json<SegmentResponse>) {
    let response = state
        .scheduler
        .engine()
        .split_recording(request.event_id, request.broadcaster_id)
        .await;
    let status = status_for(response.error.as_ref().map(|e| e.reason.as_str()));
    (status, Json(response))
}

async fn stop_recording(
    State(state): State<AppState>,
    Json(request): Json<RecordingRequest>,
) -> (StatusCode, Json<SegmentResponse>) {
    let response = state
        .scheduler
        .engine()
        .stop_recording(request.event_id, request.broadcaster_id)
        .await;
    let status = status_for(response.error.as_ref().map(|e| e.reason.as_str()));
    (status, Json(response))
}

async fn run_cycle(
    State(state): State<AppState>,
    body: Option<Json<CycleRequest>>,
) -> Json<CycleReport> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let dry_run = request.dry_run.unwrap_or(!state.production);
    Json(state.scheduler.run_cycle_now(dry_run).await)
}

async fn last_cycle(State(state): State<AppState>) -> Json<Option<CycleReport>> {
    Json(state.scheduler.last_report().await)
}

/// Creates the axum Router with every engine endpoint
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/broadcasters/:id/availability", get(get_availability))
        .route("/recordings/start", post(start_recording))
        .route("/recordings/split", post(split_recording))
        .route("/recordings/stop", post(stop_recording))
        .route("/cycles", post(run_cycle))
        .route("/cycles/last", get(last_cycle))
        .with_state(state)
}

/// Runs the HTTP server on `bind` until it fails.
pub async fn run_server(state: AppState, bind: &str) -> Result<(), ServerError> {
    let addr: SocketAddr = bind
        .parse()
        .map_err(|_| ServerError::InvalidAddress(bind.to_string()))?;

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "http server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Event;
    use crate::store::MemoryStore;
    use crate::testing::{fake_broadcaster, fake_engine, FakeFleet};
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 14)
            .unwrap()
            .and_hms_opt(10, 15, 0)
            .unwrap()
    }

    fn setup(production: bool) -> (TempDir, FakeFleet, Arc<MemoryStore>, Router) {
        let temp_dir = TempDir::new().unwrap();
        let (fleet, store, engine) = fake_engine(temp_dir.path(), now());
        store.put_broadcaster(fake_broadcaster(1, "Amphi A")).unwrap();
        store
            .put_event(
                Event::new(
                    7,
                    "Cours",
                    "alice",
                    now().date(),
                    NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                    NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
                    1,
                )
                .auto_start(),
            )
            .unwrap();

        let state = AppState {
            scheduler: Arc::new(Scheduler::new(Arc::new(engine), 5)),
            production,
        };
        (temp_dir, fleet, store, create_router(state))
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_availability_endpoint() {
        let (_dir, _fleet, _store, app) = setup(false);

        let (status, body) = send(&app, get_req("/broadcasters/1/availability")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"available": true, "recording": false}));

        let (status, body) = send(&app, get_req("/broadcasters/9/availability")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["reason"], "not_found");
    }

    #[tokio::test]
    async fn test_start_split_stop_endpoints() {
        let (_dir, fleet, _store, app) = setup(false);
        let ids = json!({"event_id": 7, "broadcaster_id": 1});

        let (_, body) = send(&app, post_json("/recordings/start", ids.clone())).await;
        assert_eq!(body, json!({"success": true}));

        let (_, body) = send(&app, post_json("/recordings/split", ids.clone())).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["assets"].as_array().unwrap().len(), 1);

        let (_, body) = send(&app, post_json("/recordings/stop", ids.clone())).await;
        assert_eq!(body["assets"].as_array().unwrap().len(), 2);
        assert_eq!(fleet.device(1).calls(), vec!["start:7", "split", "stop"]);

        let (status, body) = send(&app, post_json("/recordings/stop", ids)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["reason"], "state_conflict");
    }

    #[tokio::test]
    async fn test_cycle_defaults_to_dry_run_outside_production() {
        let (_dir, fleet, _store, app) = setup(false);

        let (_, body) = send(
            &app,
            Request::builder()
                .method("POST")
                .uri("/cycles")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(body["dry_run"], true);
        assert_eq!(body["skipped"][0]["reason"], "dry_run");
        assert!(fleet.device(1).calls().is_empty());

        let (_, body) = send(&app, post_json("/cycles", json!({"dry_run": false}))).await;
        assert_eq!(body["started"][0]["event_id"], 7);
        assert_eq!(fleet.device(1).calls(), vec!["start:7"]);
    }

    #[tokio::test]
    async fn test_cycle_acts_in_production() {
        let (_dir, fleet, _store, app) = setup(true);
        let (_, body) = send(&app, post_json("/cycles", json!({}))).await;
        assert_eq!(body["dry_run"], false);
        assert!(fleet.device(1).is_recording());
    }

    #[tokio::test]
    async fn test_last_cycle_is_null_until_a_cycle_runs() {
        let (_dir, _fleet, _store, app) = setup(false);

        let (status, body) = send(&app, get_req("/cycles/last")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::Null);

        send(&app, post_json("/cycles", json!({"dry_run": true}))).await;
        let (_, body) = send(&app, get_req("/cycles/last")).await;
        assert_eq!(body["at"], "2024-03-14T10:15:00");
    }

    #[tokio::test]
    async fn test_invalid_bind_address() {
        let temp_dir = TempDir::new().unwrap();
        let (_, _, engine) = fake_engine(temp_dir.path(), now());
        let state = AppState {
            scheduler: Arc::new(Scheduler::new(Arc::new(engine), 5)),
            production: false,
        };
        let result = run_server(state, "not an address").await;
        assert!(matches!(result, Err(ServerError::InvalidAddress(_))));
    }
}
