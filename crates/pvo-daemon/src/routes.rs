//! Axum router and all HTTP handlers for pvo-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Tests drive the bare router.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use pvo_flash::{FlashRequest, RestartRequest, OPERATION_NAME, RESTART_OPERATION};
use pvo_guard::BlockReason;
use pvo_host::{EntityState, HostEvent};
use pvo_ops::{OperationResult, OperationRunner, REASON_BUSY};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::{
    api_types::{
        AckResponse, EntityAccepted, FlashResponse, HealthResponse, OperationStatusResponse,
        RestartResponse,
    },
    state::{uptime_secs, AppState},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/operation", get(operation_status))
        .route("/v1/operation/ack", post(operation_ack))
        .route("/v1/entities", post(entity_update))
        .route("/v1/flash", post(flash))
        .route("/v1/restart", post(restart))
        .route("/v1/stream", get(stream))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
            daemon_uptime_secs: uptime_secs(),
            config_hash: st.config_hash.clone(),
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/operation, POST /v1/operation/ack
// ---------------------------------------------------------------------------

pub(crate) async fn operation_status(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(OperationStatusResponse {
            snapshot: st.ops.snapshot(),
            lock_holder: st.ops.lock().current_operation(),
        }),
    )
}

/// Return a finished operation to idle. Refused with 409 while one runs.
pub(crate) async fn operation_ack(State(st): State<Arc<AppState>>) -> Response {
    if st.ops.acknowledge() {
        info!("operation/ack");
        return (
            StatusCode::OK,
            Json(AckResponse {
                acknowledged: true,
                error: None,
            }),
        )
            .into_response();
    }
    (
        StatusCode::CONFLICT,
        Json(AckResponse {
            acknowledged: false,
            error: Some("operation still running".to_string()),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// POST /v1/entities
// ---------------------------------------------------------------------------

/// Telemetry ingestion: insert or replace one entity on the host bus.
pub(crate) async fn entity_update(
    State(st): State<Arc<AppState>>,
    Json(entity): Json<EntityState>,
) -> impl IntoResponse {
    let entity_id = entity.entity_id.clone();
    st.host.set_entity(entity);
    (StatusCode::OK, Json(EntityAccepted { entity_id }))
}

// ---------------------------------------------------------------------------
// POST /v1/flash
// ---------------------------------------------------------------------------

/// Run the flash pipeline under the operation lock.
///
/// The run is spawned so a client that disconnects mid-upload does not
/// cancel it; the lock stays held until the device session is closed.
///
/// 200 on success, 409 when another operation holds the lock, 403 when the
/// preflight guard blocks, 502 for artifact or device failures.
pub(crate) async fn flash(
    State(st): State<Arc<AppState>>,
    Json(req): Json<FlashRequest>,
) -> Response {
    info!(device = %req.device_id, "flash requested");
    let pipeline = st.pipeline.clone();
    let handle = st.runner.spawn(OPERATION_NAME, move |progress| async move {
        pipeline.run(&req, Some(&progress)).await
    });
    let out: FlashResponse = OperationRunner::join(handle).await;

    (operation_status_code(&out), Json(out)).into_response()
}

// ---------------------------------------------------------------------------
// POST /v1/restart
// ---------------------------------------------------------------------------

/// Restart a device under the same lock as flashing. A reboot that is not
/// observed within the wait bound is still 200, with `status: "warn"`.
pub(crate) async fn restart(
    State(st): State<Arc<AppState>>,
    Json(req): Json<RestartRequest>,
) -> Response {
    info!(device = %req.device_id, "restart requested");
    let restart = st.restart.clone();
    let handle = st.runner.spawn(RESTART_OPERATION, move |progress| async move {
        restart.run(&req, Some(&progress)).await
    });
    let out: RestartResponse = OperationRunner::join(handle).await;

    (operation_status_code(&out), Json(out)).into_response()
}

fn operation_status_code<T>(out: &OperationResult<T>) -> StatusCode {
    if out.success {
        return StatusCode::OK;
    }
    match out.reason.as_deref() {
        Some(REASON_BUSY) => StatusCode::CONFLICT,
        Some(code) if BlockReason::from_code(code).is_some() => StatusCode::FORBIDDEN,
        _ => StatusCode::BAD_GATEWAY,
    }
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.host.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<HostEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(ev) => {
                let data = serde_json::to_string(&ev).ok()?;
                Some(Ok(Event::default().event(ev.topic).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
