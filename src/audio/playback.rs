// Reply clip playback
//
// Resolves a clip source (http(s) URL, data URL, file URL or plain path),
// decodes it with symphonia, resamples it to the device rate and plays it on
// a cpal output stream. Playback blocks a worker thread; dropping the `play`
// future stops the stream.

use anyhow::{anyhow, bail, Context, Result};
use base64::Engine as _;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use super::decode::{decode_clip, DecodedClip, FormatHint};
use super::resample::resample_mono;

/// Plays one reply clip to completion
///
/// Implementations:
/// - `SpeakerPlayer`: cpal output device
/// - test fakes with scripted outcomes
#[async_trait::async_trait]
pub trait ClipPlayer: Send + Sync {
    /// Resolves when the clip finished. Errors cover fetch, decode and device failures.
    async fn play(&self, source: &str) -> Result<()>;
}

/// Where a clip's bytes come from
#[derive(Debug, Clone, PartialEq)]
pub enum ClipSource {
    Http(String),
    Data {
        mime_type: Option<String>,
        payload: Vec<u8>,
    },
    File(PathBuf),
}

impl ClipSource {
    pub fn parse(source: &str) -> Result<Self> {
        let source = source.trim();
        if source.is_empty() {
            bail!("Empty clip source");
        }

        if source.starts_with("http://") || source.starts_with("https://") {
            return Ok(ClipSource::Http(source.to_string()));
        }

        if let Some(rest) = source.strip_prefix("data:") {
            let (meta, data) = rest
                .split_once(',')
                .ok_or_else(|| anyhow!("Malformed data URL"))?;
            let mime = meta
                .strip_suffix(";base64")
                .ok_or_else(|| anyhow!("Only base64 data URLs are supported"))?;
            let payload = base64::engine::general_purpose::STANDARD
                .decode(data.trim())
                .context("Invalid base64 in data URL")?;
            let mime_type = (!mime.is_empty()).then(|| mime.to_string());
            return Ok(ClipSource::Data { mime_type, payload });
        }

        if let Some(path) = source.strip_prefix("file://") {
            return Ok(ClipSource::File(PathBuf::from(path)));
        }

        Ok(ClipSource::File(PathBuf::from(source)))
    }

    fn extension_hint(&self) -> Option<String> {
        let path = match self {
            ClipSource::Http(url) => {
                let path = url.split(['?', '#']).next().unwrap_or(url);
                Path::new(path)
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(str::to_string)
            }
            ClipSource::File(path) => path
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_string),
            ClipSource::Data { .. } => None,
        };
        path.map(|ext| ext.to_lowercase())
    }
}

/// Plays clips on the default (or a named) output device
pub struct SpeakerPlayer {
    http: reqwest::Client,
    output_device: Option<String>,
}

impl SpeakerPlayer {
    pub fn new(output_device: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            output_device,
        }
    }

    async fn load(&self, source: &ClipSource) -> Result<(Vec<u8>, FormatHint)> {
        let mut hint = FormatHint {
            mime_type: None,
            extension: source.extension_hint(),
        };

        let bytes = match source {
            ClipSource::Http(url) => {
                let response = self
                    .http
                    .get(url)
                    .send()
                    .await
                    .with_context(|| format!("Failed to fetch clip {url}"))?
                    .error_for_status()
                    .with_context(|| format!("Clip request failed for {url}"))?;

                hint.mime_type = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());

                response.bytes().await.context("Failed to read clip body")?.to_vec()
            }
            ClipSource::Data { mime_type, payload } => {
                hint.mime_type = mime_type.clone();
                payload.clone()
            }
            ClipSource::File(path) => tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read clip file: {:?}", path))?,
        };

        Ok((bytes, hint))
    }
}

#[async_trait::async_trait]
impl ClipPlayer for SpeakerPlayer {
    async fn play(&self, source: &str) -> Result<()> {
        let source = ClipSource::parse(source)?;
        let (bytes, hint) = self.load(&source).await?;

        let clip = tokio::task::spawn_blocking(move || decode_clip(bytes, &hint))
            .await
            .context("Clip decoder task failed")??;

        info!(
            "Playing reply clip ({:.1}s at {}Hz)",
            clip.duration_secs(),
            clip.sample_rate
        );

        let stop = Arc::new(AtomicBool::new(false));
        let _guard = StopOnDrop(Arc::clone(&stop));
        let device = self.output_device.clone();

        tokio::task::spawn_blocking(move || play_blocking(clip, device.as_deref(), &stop))
            .await
            .context("Playback task failed")?
    }
}

/// Raises the stop flag when the owning future is dropped (e.g. aborted)
struct StopOnDrop(Arc<AtomicBool>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

fn play_blocking(clip: DecodedClip, device_name: Option<&str>, stop: &AtomicBool) -> Result<()> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .output_devices()
            .context("No output devices available")?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| anyhow!("Output device not found: {name}"))?,
        None => host
            .default_output_device()
            .ok_or_else(|| anyhow!("No output device available"))?,
    };

    let supported = device
        .default_output_config()
        .context("Failed to query output config")?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();

    let samples = Arc::new(resample_mono(
        &clip.samples,
        clip.sample_rate,
        config.sample_rate.0,
    )?);
    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let cursor = OutputCursor {
        samples: Arc::clone(&samples),
        position: Arc::clone(&position),
        finished: Arc::clone(&finished),
        channels: usize::from(config.channels).max(1),
    };

    let stream = match sample_format {
        SampleFormat::F32 => build_output::<f32>(&device, &config, cursor),
        SampleFormat::I16 => build_output::<i16>(&device, &config, cursor),
        SampleFormat::U16 => build_output::<u16>(&device, &config, cursor),
        other => bail!("Unsupported output sample format {other:?}"),
    }?;
    stream.play().context("Failed to start output stream")?;

    let duration_ms = samples.len() as u64 * 1000 / u64::from(config.sample_rate.0.max(1));
    let timeout = Duration::from_millis(duration_ms + 500);
    let started = Instant::now();

    while !finished.load(Ordering::SeqCst) && !stop.load(Ordering::SeqCst) {
        if started.elapsed() > timeout {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    drop(stream);

    if stop.load(Ordering::SeqCst) {
        debug!(
            "Playback stopped after {} of {} samples",
            position.load(Ordering::SeqCst),
            samples.len()
        );
    } else {
        debug!(samples = samples.len(), "playback complete");
    }

    Ok(())
}

struct OutputCursor {
    samples: Arc<Vec<f32>>,
    position: Arc<AtomicUsize>,
    finished: Arc<AtomicBool>,
    channels: usize,
}

fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    cursor: OutputCursor,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut pos = cursor.position.load(Ordering::Relaxed);
                for frame in data.chunks_mut(cursor.channels) {
                    let value = match cursor.samples.get(pos) {
                        Some(&sample) => {
                            pos += 1;
                            sample
                        }
                        None => {
                            cursor.finished.store(true, Ordering::SeqCst);
                            0.0
                        }
                    };
                    let value = <T as Sample>::from_sample(value);
                    frame.iter_mut().for_each(|out| *out = value);
                }
                cursor.position.store(pos, Ordering::Relaxed);
            },
            |err| error!("Playback stream error: {}", err),
            None,
        )
        .context("Failed to build output stream")?;

    Ok(stream)
}
