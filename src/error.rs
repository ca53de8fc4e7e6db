use thiserror::Error;

/// Failure to acquire the microphone for a new call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("no audio input device available")]
    NoInputDevice,

    #[error("input device '{0}' not found")]
    DeviceNotFound(String),

    #[error("microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("failed to open input stream: {0}")]
    Stream(String),
}

/// Errors the call engine reports back to its caller
///
/// Only capture failures end up here at runtime; playback, transmission and
/// decode failures are absorbed by the session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("microphone unavailable: {0}")]
    Capture(#[from] CaptureError),

    #[error("invalid call settings: {0}")]
    InvalidSettings(String),

    #[error("call engine is not running")]
    EngineStopped,
}
