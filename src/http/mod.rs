//! HTTP API server for call control
//!
//! This module provides a REST API for driving the call engine:
//! - POST /call/start - Acquire the microphone and begin listening
//! - POST /call/stop - End the call
//! - POST /call/commit - Finalize the current utterance
//! - POST /call/signal - Deliver an inbound agent message
//! - GET /call/status - Current call snapshot
//! - GET/PUT /call/settings - Read or change the VAD calibration
//! - GET /call/events - Server-sent snapshot stream
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
