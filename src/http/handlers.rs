use super::state::AppState;
use crate::config::CallSettings;
use crate::error::CallError;
use crate::session::CallSnapshot;
use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use std::convert::Infallible;
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct SignalAccepted {
    pub status: String,
}

fn error_response(err: CallError) -> Response {
    let status = match err {
        CallError::Capture(_) => StatusCode::SERVICE_UNAVAILABLE,
        CallError::InvalidSettings(_) => StatusCode::BAD_REQUEST,
        CallError::EngineStopped => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

fn snapshot_response(result: Result<CallSnapshot, CallError>) -> Response {
    match result {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /call/start
/// Acquire the microphone and begin listening
pub async fn start_call(State(state): State<AppState>) -> impl IntoResponse {
    info!("Call start requested");
    let result = state.engine.start_session().await;
    if let Err(e) = &result {
        error!("Failed to start call: {}", e);
    }
    snapshot_response(result)
}

/// POST /call/stop
/// End the call and release every resource (idempotent)
pub async fn stop_call(State(state): State<AppState>) -> impl IntoResponse {
    info!("Call stop requested");
    snapshot_response(state.engine.stop_session().await)
}

/// POST /call/commit
/// Finalize the current utterance without waiting for silence
pub async fn commit_utterance(State(state): State<AppState>) -> impl IntoResponse {
    snapshot_response(state.engine.commit_utterance().await)
}

/// POST /call/signal
/// Deliver an inbound agent message such as `{"call": true}`
pub async fn deliver_signal(State(state): State<AppState>, body: String) -> impl IntoResponse {
    match state.engine.deliver_remote(body).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(SignalAccepted {
                status: "accepted".to_string(),
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /call/status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.snapshot())
}

/// GET /call/settings
pub async fn get_settings(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.settings())
}

/// PUT /call/settings
/// Validate, apply to the running engine and persist
pub async fn put_settings(
    State(state): State<AppState>,
    Json(settings): Json<CallSettings>,
) -> impl IntoResponse {
    if let Err(e) = state.engine.update_settings(settings) {
        warn!("Rejected call settings: {}", e);
        return error_response(e);
    }

    if let Err(e) = state.settings_store.save(&settings) {
        error!("Failed to persist call settings: {:#}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: format!("Settings applied but not saved: {}", e),
            }),
        )
            .into_response();
    }

    (StatusCode::OK, Json(settings)).into_response()
}

/// GET /call/events
/// Server-sent stream of call snapshots, starting with the current one
pub async fn call_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.engine.subscribe();
    let initial = rx.borrow_and_update().clone();

    let updates = stream::unfold(rx, |mut rx| async move {
        rx.changed().await.ok()?;
        let snapshot = rx.borrow_and_update().clone();
        Some((snapshot, rx))
    });

    let events = stream::once(async move { initial })
        .chain(updates)
        .map(|snapshot| Ok(snapshot_event(&snapshot)));

    Sse::new(events).keep_alive(KeepAlive::default())
}

fn snapshot_event(snapshot: &CallSnapshot) -> Event {
    match Event::default().event("snapshot").json_data(snapshot) {
        Ok(event) => event,
        Err(e) => {
            warn!("Failed to encode snapshot event: {}", e);
            Event::default().comment("snapshot unavailable")
        }
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
