pub mod audio;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod recording;
pub mod session;

pub use audio::{
    AudioBackendConfig, AudioFrame, CaptureBackend, ClipPlayer, MicrophoneBackend, SpeakerPlayer,
};
pub use config::{CallSettings, Config, SettingsStore};
pub use error::{CallError, CaptureError};
pub use gateway::{RemoteResponse, TransmissionGateway, WebhookGateway};
pub use http::{create_router, AppState};
pub use recording::{RecordingController, Utterance};
pub use session::{CallEngine, CallSession, CallSnapshot, CallStatus, EngineConfig, SessionDeps};
