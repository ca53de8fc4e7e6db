pub mod analyser;
pub mod backend;
pub mod decode;
pub mod meter;
pub mod microphone;
pub mod playback;
pub mod resample;

pub use analyser::SpectrumAnalyser;
pub use backend::{
    Analyser, AudioBackendConfig, AudioFrame, Capture, CaptureBackend, InputStream, Recorder,
    RecorderEvent, RecorderSink,
};
pub use decode::{decode_clip, DecodedClip, FormatHint};
pub use meter::{normalized_volume, VolumeSampler};
pub use microphone::{list_input_devices, MicrophoneBackend};
pub use playback::{ClipPlayer, ClipSource, SpeakerPlayer};
pub use resample::resample_mono;
