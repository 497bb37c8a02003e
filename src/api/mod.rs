//! Control API
//!
//! HTTP surface for stats, detection queries, simulation control and the
//! real-time WebSocket stream. Control-plane errors map to 4xx responses
//! with a `{"error": kind}` body; data-plane problems never surface
//! here.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;

use crate::core::Mode;
use crate::detector::Detector;
use crate::simulation::SimulationError;

/// Maximum rows a detection query may request
const MAX_DETECTION_LIMIT: u32 = 1000;

/// Build the full API router
pub fn router(detector: Arc<Detector>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/live/stats", get(live_stats))
        .route("/sim/stats", get(sim_stats))
        .route("/sim/start", post(sim_start))
        .route("/sim/stop", post(sim_stop))
        .route("/sim/clear", post(sim_clear))
        .route("/detections", get(detections))
        .route("/sim/emergencies", get(emergencies))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(detector)
}

fn error_response(error: SimulationError) -> Response {
    let status = match error {
        SimulationError::InvalidTarget | SimulationError::InvalidPattern => {
            StatusCode::BAD_REQUEST
        }
        SimulationError::AlreadyActive | SimulationError::NotActive => StatusCode::CONFLICT,
    };
    (status, Json(serde_json::json!({ "error": error.kind() }))).into_response()
}

async fn health(State(detector): State<Arc<Detector>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "models": detector.models().status(),
        "subscribers": detector.bus().subscriber_count(),
        "writer": detector.writer_metrics(),
    }))
}

async fn live_stats(State(detector): State<Arc<Detector>>) -> Json<serde_json::Value> {
    Json(serde_json::to_value(detector.live_stats()).unwrap_or_default())
}

async fn sim_stats(State(detector): State<Arc<Detector>>) -> Json<serde_json::Value> {
    Json(serde_json::to_value(detector.sim_stats()).unwrap_or_default())
}

#[derive(Debug, Deserialize)]
struct SimStartQuery {
    virtual_source: String,
    pattern: String,
    #[serde(default = "default_duration")]
    duration_s: u64,
    #[serde(default = "default_batch")]
    batch_size: u32,
}

fn default_duration() -> u64 {
    60
}

fn default_batch() -> u32 {
    10
}

async fn sim_start(
    State(detector): State<Arc<Detector>>,
    Query(query): Query<SimStartQuery>,
) -> Response {
    match detector.start_simulation(
        &query.virtual_source,
        &query.pattern,
        query.duration_s,
        query.batch_size,
    ) {
        Ok(spec) => Json(serde_json::json!({ "status": "started", "run": spec })).into_response(),
        Err(error) => error_response(error),
    }
}

async fn sim_stop(State(detector): State<Arc<Detector>>) -> Response {
    match detector.stop_simulation() {
        Ok(final_stats) => {
            Json(serde_json::json!({ "status": "stopped", "final_stats": final_stats }))
                .into_response()
        }
        Err(error) => error_response(error),
    }
}

async fn sim_clear(State(detector): State<Arc<Detector>>) -> Response {
    match detector.clear_simulation() {
        Ok(()) => Json(serde_json::json!({ "status": "cleared" })).into_response(),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Deserialize)]
struct DetectionsQuery {
    mode: String,
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_limit() -> u32 {
    100
}

async fn detections(
    State(detector): State<Arc<Detector>>,
    Query(query): Query<DetectionsQuery>,
) -> Response {
    let Ok(mode) = query.mode.parse::<Mode>() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "InvalidMode" })),
        )
            .into_response();
    };

    let limit = query.limit.min(MAX_DETECTION_LIMIT);
    Json(detector.list_detections(mode, limit)).into_response()
}

#[derive(Debug, Deserialize)]
struct EmergenciesQuery {
    #[serde(default = "default_emergencies")]
    limit: usize,
}

fn default_emergencies() -> usize {
    10
}

async fn emergencies(
    State(detector): State<Arc<Detector>>,
    Query(query): Query<EmergenciesQuery>,
) -> Json<serde_json::Value> {
    let top = detector.history().top_emergencies(query.limit);
    Json(serde_json::to_value(top).unwrap_or_default())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(detector): State<Arc<Detector>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, detector))
}

/// One WebSocket session: forwards bus detections as framed JSON and
/// answers pings. The session's queue is released when the client goes
/// away.
async fn handle_socket(mut socket: WebSocket, detector: Arc<Detector>) {
    let mut subscription = detector.bus().subscribe();
    debug!("websocket subscriber connected");

    loop {
        tokio::select! {
            detection = subscription.recv() => {
                let frame = serde_json::json!({
                    "type": "detection",
                    "data": &*detection,
                });
                let Ok(text) = serde_json::to_string(&frame) else {
                    continue;
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    debug!(dropped = subscription.dropped(), "websocket subscriber disconnected");
    subscription.unsubscribe();
}
