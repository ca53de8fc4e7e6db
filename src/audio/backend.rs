use anyhow::Result;

use crate::config::AudioConfig;
use crate::error::CaptureError;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since recording started
    pub timestamp_ms: u64,
}

/// Configuration for audio capture backends
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Preferred input device name (default device if None)
    pub input_device: Option<String>,
    /// Analyser FFT size; the analyser exposes `fft_size / 2` bins
    pub fft_size: usize,
    /// Analyser temporal smoothing (0.0 = none, towards 1.0 = heavy)
    pub smoothing: f32,
    /// Decibel floor mapped to byte 0
    pub min_decibels: f32,
    /// Decibel ceiling mapped to byte 255
    pub max_decibels: f32,
    /// Recorder timeslice in milliseconds
    pub chunk_ms: u64,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            fft_size: 256,
            smoothing: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
            chunk_ms: 100,
        }
    }
}

impl From<&AudioConfig> for AudioBackendConfig {
    fn from(cfg: &AudioConfig) -> Self {
        Self {
            input_device: cfg.input_device.clone(),
            fft_size: cfg.fft_size,
            smoothing: cfg.smoothing,
            min_decibels: cfg.min_decibels,
            max_decibels: cfg.max_decibels,
            chunk_ms: cfg.chunk_ms,
        }
    }
}

/// Notifications a recorder delivers after `start()` / `stop()`
#[derive(Debug, Clone)]
pub enum RecorderEvent {
    /// An encoded chunk is available
    Data(AudioFrame),
    /// Recording ended; no further chunks follow
    Stopped,
}

/// Callback through which a recorder reports chunks and completion.
///
/// May be invoked from an audio thread.
pub type RecorderSink = Box<dyn Fn(RecorderEvent) + Send + Sync>;

/// Resources handed out by a successful microphone acquisition
pub struct Capture {
    pub stream: Box<dyn InputStream>,
    pub analyser: Box<dyn Analyser>,
}

/// Microphone acquisition
///
/// Implementations:
/// - cpal: default or named input device (see `microphone.rs`)
/// - test fakes driving the state machine deterministically
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Request microphone access and build the analysis graph.
    ///
    /// On failure nothing stays allocated.
    async fn acquire(&self) -> Result<Capture, CaptureError>;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// A live microphone stream
pub trait InputStream: Send {
    /// Mute or unmute every track. Muted tracks keep running but deliver silence.
    fn set_tracks_enabled(&mut self, enabled: bool);

    fn tracks_enabled(&self) -> bool;

    /// Stop every track and give the device back. Safe to call repeatedly.
    fn stop_tracks(&mut self);

    /// False once the tracks were stopped
    fn is_live(&self) -> bool;

    /// Build an encoder bound to this stream
    fn recorder(&self, sink: RecorderSink) -> Result<Box<dyn Recorder>, CaptureError>;
}

/// Frequency-magnitude view over the live stream
pub trait Analyser: Send {
    /// Number of magnitude bins one snapshot holds
    fn frequency_bin_count(&self) -> usize;

    /// Fill `out` with the current byte-scaled magnitudes (0-255 per bin)
    fn byte_frequency_data(&mut self, out: &mut [u8]);

    /// Release the analysis graph. Safe to call repeatedly.
    fn close(&mut self);
}

/// Encoder that turns the stream into chunks between `start()` and `stop()`
pub trait Recorder: Send {
    fn is_recording(&self) -> bool;

    /// Begin encoding. Fails if already recording.
    fn start(&mut self) -> Result<()>;

    /// End encoding. Remaining chunks and a final `Stopped` arrive through the sink.
    /// No-op when not recording.
    fn stop(&mut self);
}
