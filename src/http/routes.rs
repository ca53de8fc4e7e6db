use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Call control
        .route("/call/start", post(handlers::start_call))
        .route("/call/stop", post(handlers::stop_call))
        .route("/call/commit", post(handlers::commit_utterance))
        .route("/call/signal", post(handlers::deliver_signal))
        // Readouts
        .route("/call/status", get(handlers::get_status))
        .route(
            "/call/settings",
            get(handlers::get_settings).put(handlers::put_settings),
        )
        .route("/call/events", get(handlers::call_events))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
