// Microphone capture backend using cpal
//
// A cpal stream is not Send on every platform, so each capture owns a
// dedicated thread that opens the device, reports the outcome and then parks
// until the tracks are stopped. The audio callback downmixes to mono, keeps
// the analyser window topped up and, while a recorder tap is installed, feeds
// the recorder's PCM chunks. Muted tracks keep running and deliver silence.

use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, StreamConfig};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use super::analyser::SpectrumAnalyser;
use super::backend::{
    Analyser, AudioBackendConfig, AudioFrame, Capture, CaptureBackend, InputStream, Recorder,
    RecorderEvent, RecorderSink,
};
use crate::error::CaptureError;

/// List input device names so the CLI can offer a selector
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host.input_devices().context("no input devices available")?;
    let mut names = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            names.push(name);
        }
    }
    Ok(names)
}

/// cpal-backed microphone
pub struct MicrophoneBackend {
    config: AudioBackendConfig,
}

impl MicrophoneBackend {
    pub fn new(config: AudioBackendConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl CaptureBackend for MicrophoneBackend {
    async fn acquire(&self) -> Result<Capture, CaptureError> {
        let spectrum = SpectrumAnalyser::new(
            self.config.fft_size,
            self.config.smoothing,
            self.config.min_decibels,
            self.config.max_decibels,
        );
        let shared = Arc::new(MicShared::new(spectrum.fft_size()));

        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let device_name = self.config.input_device.clone();
        let thread_shared = Arc::clone(&shared);

        thread::Builder::new()
            .name("callwire-mic".to_string())
            .spawn(move || run_input_thread(device_name, thread_shared, ready_tx, stop_rx))
            .map_err(|e| CaptureError::Stream(format!("failed to spawn capture thread: {e}")))?;

        let sample_rate = match ready_rx.await {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(CaptureError::Stream("capture thread exited".to_string())),
        };

        info!("Microphone acquired ({}Hz, mono analysis)", sample_rate);

        let bins = spectrum.bin_count();
        Ok(Capture {
            stream: Box::new(MicStream {
                shared: Arc::clone(&shared),
                stop_tx: Some(stop_tx),
                sample_rate,
                chunk_ms: self.config.chunk_ms,
            }),
            analyser: Box::new(MicAnalyser {
                shared,
                spectrum: Some(spectrum),
                window: Vec::new(),
                bins,
            }),
        })
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

fn run_input_thread(
    device_name: Option<String>,
    shared: Arc<MicShared>,
    ready: oneshot::Sender<Result<u32, CaptureError>>,
    stop_rx: std_mpsc::Receiver<()>,
) {
    let stream = match open_input_stream(device_name.as_deref(), &shared) {
        Ok((stream, sample_rate)) => {
            if ready.send(Ok(sample_rate)).is_err() {
                // Acquisition was abandoned; dropping the stream releases the device
                return;
            }
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    // Parks until stop_tracks() or the stream handle is dropped
    let _ = stop_rx.recv();
    drop(stream);
    debug!("Microphone stream closed");
}

fn open_input_stream(
    device_name: Option<&str>,
    shared: &Arc<MicShared>,
) -> Result<(cpal::Stream, u32), CaptureError> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .input_devices()
            .map_err(|e| classify_device_error(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| CaptureError::DeviceNotFound(name.to_string()))?,
        None => host
            .default_input_device()
            .ok_or(CaptureError::NoInputDevice)?,
    };

    let supported = device
        .default_input_config()
        .map_err(|e| classify_device_error(e.to_string()))?;

    debug!(
        device = %device.name().unwrap_or_default(),
        sample_rate = supported.sample_rate().0,
        channels = supported.channels(),
        "opening input stream"
    );

    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let sample_rate = config.sample_rate.0;

    let stream = match sample_format {
        SampleFormat::F32 => build_input::<f32>(&device, &config, shared),
        SampleFormat::I16 => build_input::<i16>(&device, &config, shared),
        SampleFormat::U16 => build_input::<u16>(&device, &config, shared),
        other => Err(CaptureError::Stream(format!(
            "unsupported sample format {other:?}"
        ))),
    }?;

    stream
        .play()
        .map_err(|e| classify_device_error(e.to_string()))?;

    Ok((stream, sample_rate))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    shared: &Arc<MicShared>,
) -> Result<cpal::Stream, CaptureError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let shared = Arc::clone(shared);
    let channels = usize::from(config.channels).max(1);
    let mut mono: Vec<f32> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                mono.clear();
                for frame in data.chunks(channels) {
                    let sum: f32 = frame.iter().map(|&s| s.to_sample::<f32>()).sum();
                    mono.push(sum / frame.len() as f32);
                }
                shared.push(&mut mono);
            },
            |err| error!("Microphone stream error: {}", err),
            None,
        )
        .map_err(|e| classify_device_error(e.to_string()))
}

/// Host APIs report a denied microphone permission as a generic backend error
fn classify_device_error(message: String) -> CaptureError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
    {
        CaptureError::PermissionDenied(message)
    } else {
        CaptureError::Stream(message)
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}

/// State shared between the audio callback and the session-side handles
struct MicShared {
    enabled: AtomicBool,
    window: Mutex<VecDeque<f32>>,
    window_len: usize,
    tap: Mutex<Option<RecorderTap>>,
}

impl MicShared {
    fn new(window_len: usize) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            window: Mutex::new(VecDeque::with_capacity(window_len * 2)),
            window_len,
            tap: Mutex::new(None),
        }
    }

    /// Called from the audio thread with one callback's worth of mono samples
    fn push(&self, mono: &mut [f32]) {
        if !self.enabled.load(Ordering::SeqCst) {
            mono.iter_mut().for_each(|s| *s = 0.0);
        }

        if let Ok(mut window) = self.window.lock() {
            window.extend(mono.iter().copied());
            let excess = window.len().saturating_sub(self.window_len);
            window.drain(..excess);
        }

        if let Ok(mut tap) = self.tap.lock() {
            if let Some(tap) = tap.as_mut() {
                tap.push(mono);
            }
        }
    }

    fn snapshot(&self, out: &mut Vec<f32>) {
        out.clear();
        if let Ok(window) = self.window.lock() {
            out.extend(window.iter().copied());
        }
    }

    fn take_tap(&self) -> Option<RecorderTap> {
        match self.tap.lock() {
            Ok(mut tap) => tap.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

/// Recorder-side accumulation of PCM between timeslices
struct RecorderTap {
    sink: Arc<RecorderSink>,
    pending: Vec<i16>,
    chunk_samples: usize,
    sample_rate: u32,
    emitted_samples: u64,
}

impl RecorderTap {
    fn push(&mut self, mono: &[f32]) {
        self.pending.extend(mono.iter().map(|&s| to_i16(s)));
        if self.pending.len() >= self.chunk_samples {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let samples = std::mem::take(&mut self.pending);
        let timestamp_ms = self.emitted_samples * 1000 / u64::from(self.sample_rate.max(1));
        self.emitted_samples += samples.len() as u64;

        (*self.sink)(RecorderEvent::Data(AudioFrame {
            samples,
            sample_rate: self.sample_rate,
            channels: 1,
            timestamp_ms,
        }));
    }
}

struct MicStream {
    shared: Arc<MicShared>,
    stop_tx: Option<std_mpsc::Sender<()>>,
    sample_rate: u32,
    chunk_ms: u64,
}

impl InputStream for MicStream {
    fn set_tracks_enabled(&mut self, enabled: bool) {
        self.shared.enabled.store(enabled, Ordering::SeqCst);
    }

    fn tracks_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::SeqCst)
    }

    fn stop_tracks(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
            debug!("Microphone tracks stopped");
        }
    }

    fn is_live(&self) -> bool {
        self.stop_tx.is_some()
    }

    fn recorder(&self, sink: RecorderSink) -> Result<Box<dyn Recorder>, CaptureError> {
        if !self.is_live() {
            return Err(CaptureError::Stream("stream already stopped".to_string()));
        }

        let chunk_samples = (u64::from(self.sample_rate) * self.chunk_ms / 1000).max(1) as usize;

        Ok(Box::new(MicRecorder {
            shared: Arc::clone(&self.shared),
            sink: Arc::new(sink),
            sample_rate: self.sample_rate,
            chunk_samples,
            recording: false,
        }))
    }
}

impl Drop for MicStream {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

struct MicRecorder {
    shared: Arc<MicShared>,
    sink: Arc<RecorderSink>,
    sample_rate: u32,
    chunk_samples: usize,
    recording: bool,
}

impl Recorder for MicRecorder {
    fn is_recording(&self) -> bool {
        self.recording
    }

    fn start(&mut self) -> Result<()> {
        if self.recording {
            bail!("Recorder already active");
        }

        let mut tap = self
            .shared
            .tap
            .lock()
            .map_err(|_| anyhow!("Recorder tap lock poisoned"))?;
        *tap = Some(RecorderTap {
            sink: Arc::clone(&self.sink),
            pending: Vec::with_capacity(self.chunk_samples),
            chunk_samples: self.chunk_samples,
            sample_rate: self.sample_rate,
            emitted_samples: 0,
        });
        self.recording = true;

        Ok(())
    }

    fn stop(&mut self) {
        if !self.recording {
            return;
        }
        self.recording = false;

        if let Some(mut tap) = self.shared.take_tap() {
            tap.flush();
        }
        (*self.sink)(RecorderEvent::Stopped);
    }
}

impl Drop for MicRecorder {
    fn drop(&mut self) {
        if self.recording {
            self.shared.take_tap();
        }
    }
}

struct MicAnalyser {
    shared: Arc<MicShared>,
    spectrum: Option<SpectrumAnalyser>,
    window: Vec<f32>,
    bins: usize,
}

impl Analyser for MicAnalyser {
    fn frequency_bin_count(&self) -> usize {
        self.bins
    }

    fn byte_frequency_data(&mut self, out: &mut [u8]) {
        match self.spectrum.as_mut() {
            Some(spectrum) => {
                self.shared.snapshot(&mut self.window);
                spectrum.analyse(&self.window, out);
            }
            None => out.iter_mut().for_each(|b| *b = 0),
        }
    }

    fn close(&mut self) {
        if self.spectrum.take().is_some() {
            debug!("Analyser closed");
        }
    }
}
