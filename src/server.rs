//! HTTP surface for field units, the dashboard and voice assistant.
//!
//! Handlers are thin: each moves the blocking service call onto tokio's
//! blocking pool and bounds it with the configured storage timeout. The worker
//! and the handler share a [`Deadline`]: a write the handler stopped waiting for
//! is rolled back, and a write that already committed is waited for, so the
//! response always matches what was stored.

use crate::knowledge::{self, CropProblem};
use crate::models::farm::PendingCommand;
use crate::services::ingest::{FarmService, IngestError, parse_payload};
use crate::services::voice;
use crate::store::{Deadline, QueueError, StorageError};
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::StatusCode;
use log::{error, warn};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FarmService>,
    pub storage_timeout: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/sensor-data", post(receive_sensor_data))
        .route("/api/commands/:device_id", get(get_commands))
        .route("/api/control-pump", post(control_pump))
        .route("/api/activate-sound", post(activate_sound))
        .route("/api/current-status", get(current_status))
        .route("/api/crop-problems", get(crop_problems))
        .route("/api/voice-command", post(voice_command))
        .route("/health", get(health))
        .with_state(state)
}

/// Why a blocking call produced no result.
#[derive(Debug)]
enum Offload {
    TimedOut(Duration),
    Aborted(String),
}

async fn offload<T, F>(state: &AppState, f: F) -> Result<T, Offload>
where
    F: FnOnce(&FarmService, &Deadline) -> T + Send + 'static,
    T: Send + 'static,
{
    let deadline = Deadline::after(state.storage_timeout);
    let worker = deadline.clone();
    let service = Arc::clone(&state.service);
    let mut task = tokio::task::spawn_blocking(move || f(&service, &worker));
    let joined = match tokio::time::timeout(state.storage_timeout, &mut task).await {
        Ok(joined) => joined,
        Err(_) if deadline.abandon() => return Err(Offload::TimedOut(state.storage_timeout)),
        // committed before the bound hit: report what actually happened
        Err(_) => task.await,
    };
    joined.map_err(|join| Offload::Aborted(join.to_string()))
}

impl From<Offload> for StorageError {
    fn from(value: Offload) -> Self {
        match value {
            Offload::TimedOut(d) => StorageError::Timeout(d),
            Offload::Aborted(e) => StorageError::Query(e),
        }
    }
}

impl From<Offload> for QueueError {
    fn from(value: Offload) -> Self {
        match value {
            Offload::TimedOut(d) => QueueError::Timeout(d),
            Offload::Aborted(e) => QueueError::Query(e),
        }
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "status": "error", "message": message.into() }))).into_response()
}

fn rejected(what: &str, rejection: JsonRejection) -> Response {
    warn!("Rejected {} request: {}", what, rejection.body_text());
    error_response(rejection.status(), rejection.body_text())
}

/// POST /api/sensor-data
async fn receive_sensor_data(State(state): State<AppState>, body: Bytes) -> Response {
    let payload = match parse_payload(&body) {
        Ok(p) => p,
        Err(e) => {
            warn!("Rejected sensor data: {}", e);
            return error_response(StatusCode::BAD_REQUEST, e.to_string());
        }
    };
    let result = offload(&state, move |svc, deadline| svc.ingest(payload, deadline))
        .await
        .unwrap_or_else(|e| Err(IngestError::StorageFailure(e.into())));
    match result {
        Ok(_) => Json(json!({ "status": "success", "message": "Data received" })).into_response(),
        Err(e @ IngestError::Malformed(_)) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e @ IngestError::StorageFailure(_)) => {
            error!("Storing sensor data failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// GET /api/commands/:device_id
async fn get_commands(State(state): State<AppState>, Path(device_id): Path<String>) -> Json<Vec<PendingCommand>> {
    let id = device_id.clone();
    let drained = offload(&state, move |svc, deadline| svc.poll_commands(&id, deadline))
        .await
        .unwrap_or_else(|e| Err(e.into()));
    match drained {
        Ok(cmds) => Json(cmds),
        Err(e) => {
            state.service.record_drain_failure(&device_id, &e);
            Json(Vec::new())
        }
    }
}

#[derive(Debug, Deserialize)]
struct PumpRequest {
    device_id: Option<String>,
    #[serde(default)]
    pump_state: bool,
}

/// POST /api/control-pump
async fn control_pump(State(state): State<AppState>, req: Result<Json<PumpRequest>, JsonRejection>) -> Response {
    let Json(req) = match req {
        Ok(req) => req,
        Err(rejection) => return rejected("pump control", rejection),
    };
    let on = req.pump_state;
    let result = offload(&state, move |svc, deadline| svc.set_pump(req.device_id.as_deref(), on, deadline))
        .await
        .unwrap_or_else(|e| Err(e.into()));
    match result {
        Ok(_) => Json(json!({ "status": "success", "pump_state": on })).into_response(),
        Err(e) => {
            error!("Manual pump command failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SoundRequest {
    device_id: Option<String>,
}

/// POST /api/activate-sound. The body is optional.
async fn activate_sound(State(state): State<AppState>, req: Option<Json<SoundRequest>>) -> Response {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    let result = offload(&state, move |svc, deadline| svc.activate_sound(req.device_id.as_deref(), deadline))
        .await
        .unwrap_or_else(|e| Err(e.into()));
    match result {
        Ok(_) => Json(json!({ "status": "success", "sound_activated": true })).into_response(),
        Err(e) => {
            error!("Sound alert command failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// GET /api/current-status: the most recent reading across all devices.
async fn current_status(State(state): State<AppState>) -> Response {
    let result = offload(&state, |svc, _| svc.current_status(None))
        .await
        .unwrap_or_else(|e| Err(e.into()));
    match result {
        Ok(Some(status)) => Json(status).into_response(),
        Ok(None) => Json(json!({ "error": "No data available" })).into_response(),
        Err(e) => {
            error!("Fetching current status failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "Database error" }))).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProblemQuery {
    #[serde(rename = "type", default)]
    problem_type: String,
}

/// GET /api/crop-problems?type=<substring>
async fn crop_problems(Query(q): Query<ProblemQuery>) -> Json<Vec<&'static CropProblem>> {
    Json(knowledge::lookup(&q.problem_type))
}

#[derive(Debug, Deserialize)]
struct VoiceRequest {
    #[serde(default)]
    command: String,
}

/// POST /api/voice-command
async fn voice_command(State(state): State<AppState>, req: Result<Json<VoiceRequest>, JsonRejection>) -> Response {
    let Json(req) = match req {
        Ok(req) => req,
        Err(rejection) => return rejected("voice", rejection),
    };
    match offload(&state, move |svc, deadline| voice::respond(svc, &req.command, deadline)).await {
        Ok(reply) => Json(json!({ "response": reply })).into_response(),
        Err(e) => {
            error!("Voice command failed: {:?}", e);
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "response": "The farm is not responding right now" })))
                .into_response()
        }
    }
}

async fn health() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::farm::{CommandType, Reading};
    use crate::store::{CommandQueue, MemoryStore, TelemetryStore};
    use axum::body::Body;
    use http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    const READING: &str = r#"{"device_id":"farm_unit_001","soil_moisture":20,"water_level":50,
        "soil_temperature":22.5,"air_temperature":31,"air_humidity":70,"light_intensity":650,
        "co2_level":415,"soil_npk":45,"pump_status":0}"#;

    fn open() -> Deadline {
        Deadline::none()
    }

    fn app_with(
        telemetry: Arc<dyn TelemetryStore>,
        commands: Arc<dyn CommandQueue>,
        storage_timeout: Duration,
    ) -> (Arc<FarmService>, Router) {
        let service = Arc::new(FarmService::new(telemetry, commands, "farm_unit_001"));
        let state = AppState {
            service: Arc::clone(&service),
            storage_timeout,
        };
        (service, router(state))
    }

    fn app() -> (Arc<MemoryStore>, Router) {
        let store = Arc::new(MemoryStore::new());
        let (_, app) = app_with(store.clone(), store.clone(), Duration::from_secs(2));
        (store, app)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if body.is_some() {
            req = req.header("content-type", "application/json");
        }
        let req = req.body(Body::from(body.unwrap_or_default().to_string())).unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    /// Sleeps before every write, then hands it to the wrapped store.
    struct Sluggish {
        inner: Arc<MemoryStore>,
        delay: Duration,
    }

    impl TelemetryStore for Sluggish {
        fn append(&self, reading: &Reading, deadline: &Deadline) -> Result<(), StorageError> {
            std::thread::sleep(self.delay);
            self.inner.append(reading, deadline)
        }
        fn latest(&self, device_id: Option<&str>) -> Result<Option<Reading>, StorageError> {
            self.inner.latest(device_id)
        }
    }

    impl CommandQueue for Sluggish {
        fn enqueue(&self, device_id: &str, t: CommandType, value: &str, deadline: &Deadline) -> Result<(), QueueError> {
            std::thread::sleep(self.delay);
            self.inner.enqueue(device_id, t, value, deadline)
        }
        fn drain(&self, device_id: &str, deadline: &Deadline) -> Result<Vec<PendingCommand>, QueueError> {
            std::thread::sleep(self.delay);
            self.inner.drain(device_id, deadline)
        }
    }

    fn sluggish_app() -> (Arc<MemoryStore>, Arc<FarmService>, Router) {
        let store = Arc::new(MemoryStore::new());
        let slow = Arc::new(Sluggish {
            inner: store.clone(),
            delay: Duration::from_millis(100),
        });
        let (service, app) = app_with(slow.clone(), slow, Duration::from_millis(20));
        (store, service, app)
    }

    /// Long enough for a worker the handler gave up on to finish.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    #[tokio::test]
    async fn sensor_data_is_stored_and_triggers_pump() {
        let (store, app) = app();
        let (status, body) = send(&app, "POST", "/api/sensor-data", Some(READING)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"status": "success", "message": "Data received"}));

        let stored: Reading = store.latest(Some("farm_unit_001")).unwrap().unwrap();
        assert_eq!(stored.soil_temperature, 22.5);
        assert!(!stored.pump_status);

        let (_, cmds) = send(&app, "GET", "/api/commands/farm_unit_001", None).await;
        assert_eq!(cmds, serde_json::json!([{"command_type": "pump_control", "command_value": "True"}]));
        let (_, again) = send(&app, "GET", "/api/commands/farm_unit_001", None).await;
        assert_eq!(again, serde_json::json!([]));
    }

    #[tokio::test]
    async fn malformed_sensor_data_is_400() {
        let (store, app) = app();
        let (status, body) = send(&app, "POST", "/api/sensor-data", Some(r#"{"device_id":"x"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
        assert!(body["message"].as_str().unwrap().contains("missing field"));

        let (status, _) = send(&app, "POST", "/api/sensor-data", Some("{")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let blank = READING.replace("farm_unit_001", " ");
        let (status, body) = send(&app, "POST", "/api/sensor-data", Some(&blank)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().contains("device_id"));

        assert!(store.latest(None).unwrap().is_none());
        assert!(store.drain(" ", &open()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn current_status_without_data() {
        let (_, app) = app();
        let (status, body) = send(&app, "GET", "/api/current-status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"error": "No data available"}));
    }

    #[tokio::test]
    async fn current_status_with_data() {
        let (_, app) = app();
        send(&app, "POST", "/api/sensor-data", Some(READING)).await;
        let (_, body) = send(&app, "GET", "/api/current-status", None).await;
        assert_eq!(body["sensor_data"]["soil_moisture"], 20.0);
        // moisture -30, npk -10
        assert_eq!(body["overall_health"], 60);
        let problems = body["detected_problems"].as_array().unwrap();
        assert_eq!(problems.len(), 2);
        assert_eq!(problems[0]["type"], "Water Stress");
        assert_eq!(problems[1]["type"], "Phosphorus Deficiency");
    }

    #[tokio::test]
    async fn manual_pump_and_sound() {
        let (store, app) = app();
        let (status, body) = send(&app, "POST", "/api/control-pump", Some(r#"{"pump_state": true}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"status": "success", "pump_state": true}));

        let (_, body) = send(&app, "POST", "/api/activate-sound", Some(r#"{"device_id": "unit-9"}"#)).await;
        assert_eq!(body, serde_json::json!({"status": "success", "sound_activated": true}));
        let (status, _) = send(&app, "POST", "/api/activate-sound", None).await;
        assert_eq!(status, StatusCode::OK);

        assert_eq!(store.drain("farm_unit_001", &open()).unwrap().len(), 2);
        let unit9 = store.drain("unit-9", &open()).unwrap();
        assert_eq!(unit9[0].command_type, CommandType::SoundAlert);
    }

    #[tokio::test]
    async fn bad_json_bodies_get_the_error_shape() {
        let (store, app) = app();
        let cases = [
            ("/api/control-pump", Some("not json")),
            ("/api/control-pump", Some(r#"{"pump_state": "yes"}"#)),
            ("/api/control-pump", None),
            ("/api/voice-command", Some("{")),
            ("/api/voice-command", Some(r#"{"command": 5}"#)),
        ];
        for (uri, body) in cases {
            let (status, value) = send(&app, "POST", uri, body).await;
            assert!(status.is_client_error(), "{} {:?}: {}", uri, body, status);
            assert_eq!(value["status"], "error", "{} {:?}", uri, body);
            assert!(!value["message"].as_str().unwrap().is_empty());
        }
        assert!(store.drain("farm_unit_001", &open()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn crop_problem_lookup() {
        let (_, app) = app();
        let (_, all) = send(&app, "GET", "/api/crop-problems", None).await;
        assert_eq!(all.as_array().unwrap().len(), 7);
        let (_, some) = send(&app, "GET", "/api/crop-problems?type=Aphid", None).await;
        assert_eq!(some[0]["problem_type"], "Aphid Infestation");
        assert_eq!(some[0]["id"], 6);
    }

    #[tokio::test]
    async fn voice_routes_to_pump() {
        let (store, app) = app();
        let (_, body) = send(&app, "POST", "/api/voice-command", Some(r#"{"command": "Pump ON"}"#)).await;
        assert_eq!(body["response"], "Turning water pump ON");
        assert_eq!(store.drain("farm_unit_001", &open()).unwrap()[0].command_value, "True");
    }

    #[tokio::test]
    async fn timed_out_poll_leaves_commands_for_the_next_one() {
        let (store, service, app) = sluggish_app();
        store.enqueue("d", CommandType::PumpControl, "True", &open()).unwrap();

        let (status, body) = send(&app, "GET", "/api/commands/d", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
        assert_eq!(service.drain_failures(), 1);

        settle().await;
        let history = store.command_history("d");
        assert_eq!(history.len(), 1);
        assert!(!history[0].executed);
        assert_eq!(service.drain_failures(), 1);

        assert_eq!(
            store.drain("d", &open()).unwrap(),
            vec![PendingCommand {
                command_type: CommandType::PumpControl,
                command_value: "True".into(),
            }]
        );
    }

    #[tokio::test]
    async fn timed_out_ingest_stores_nothing() {
        let (store, _, app) = sluggish_app();
        let (status, body) = send(&app, "POST", "/api/sensor-data", Some(READING)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "error");
        assert!(body["message"].as_str().unwrap().contains("timed out"));

        settle().await;
        assert!(store.latest(None).unwrap().is_none());
        assert!(store.command_history("farm_unit_001").is_empty());
    }

    #[tokio::test]
    async fn timed_out_manual_command_is_not_queued() {
        let (store, _, app) = sluggish_app();
        let (status, body) = send(&app, "POST", "/api/control-pump", Some(r#"{"pump_state": false}"#)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["message"].as_str().unwrap().contains("timed out"));

        settle().await;
        assert!(store.command_history("farm_unit_001").is_empty());
    }

    #[tokio::test]
    async fn committed_write_is_waited_for() {
        struct ClaimThenStall(Arc<MemoryStore>);
        impl CommandQueue for ClaimThenStall {
            fn enqueue(&self, id: &str, t: CommandType, value: &str, deadline: &Deadline) -> Result<(), QueueError> {
                self.0.enqueue(id, t, value, deadline)?;
                std::thread::sleep(Duration::from_millis(100));
                Ok(())
            }
            fn drain(&self, id: &str, deadline: &Deadline) -> Result<Vec<PendingCommand>, QueueError> {
                self.0.drain(id, deadline)
            }
        }

        let store = Arc::new(MemoryStore::new());
        let (_, app) = app_with(store.clone(), Arc::new(ClaimThenStall(store.clone())), Duration::from_millis(20));
        let (status, body) = send(&app, "POST", "/api/control-pump", Some(r#"{"pump_state": true}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(store.drain("farm_unit_001", &open()).unwrap().len(), 1);
    }
}
