//! Voice call session management
//!
//! This module provides the `CallSession` state machine and the `CallEngine`
//! driver that owns it:
//! - Microphone acquisition and release
//! - Loudness sampling on a fixed-rate ticker
//! - Silence gating and utterance finalization
//! - Transmission of utterances and playback of replies
//! - Caller-facing snapshots of the call state

mod config;
mod engine;
mod session;
mod silence;
mod state;

pub use config::EngineConfig;
pub use engine::CallEngine;
pub use session::{CallSession, SessionDeps, SessionEvent};
pub use silence::SilenceGate;
pub use state::{CallSnapshot, CallStatus};
