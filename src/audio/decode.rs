use anyhow::{anyhow, bail, Context, Result};
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// A reply clip decoded to mono f32 PCM
#[derive(Debug, Clone)]
pub struct DecodedClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedClip {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.sample_rate.max(1))
    }
}

/// Format hint derived from a MIME type or a file extension
#[derive(Debug, Clone, Default)]
pub struct FormatHint {
    pub mime_type: Option<String>,
    pub extension: Option<String>,
}

impl FormatHint {
    fn to_hint(&self) -> Hint {
        let mut hint = Hint::new();
        if let Some(mime) = &self.mime_type {
            hint.mime_type(mime);
        }
        if let Some(ext) = &self.extension {
            hint.with_extension(ext);
        }
        hint
    }
}

/// Decode an encoded clip (mp3, wav, ogg, flac, aac) and downmix it to mono
pub fn decode_clip(bytes: Vec<u8>, format_hint: &FormatHint) -> Result<DecodedClip> {
    if bytes.is_empty() {
        bail!("Clip is empty");
    }

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &format_hint.to_hint(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .context("Unrecognized clip format")?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| anyhow!("Clip has no audio track"))?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("Unsupported clip codec")?;

    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            // Chained streams are not followed; treat as end of clip
            Err(SymphoniaError::ResetRequired) => break,
            Err(SymphoniaError::IoError(_)) => break,
            Err(e) => return Err(e).context("Failed to read clip packet"),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate.get_or_insert(spec.rate);
                let channels = spec.channels.count().max(1);

                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);

                for frame in buffer.samples().chunks(channels) {
                    samples.push(frame.iter().sum::<f32>() / frame.len() as f32);
                }
            }
            Err(SymphoniaError::IoError(_)) | Err(SymphoniaError::DecodeError(_)) => {
                warn!("Skipping undecodable clip packet");
                continue;
            }
            Err(e) => return Err(e).context("Failed to decode clip"),
        }
    }

    let sample_rate = sample_rate.ok_or_else(|| anyhow!("Clip has no sample rate"))?;
    if samples.is_empty() {
        bail!("Clip decoded to no audio");
    }

    let clip = DecodedClip {
        samples,
        sample_rate,
    };
    debug!(
        "Clip decoded: {:.2}s at {}Hz",
        clip.duration_secs(),
        clip.sample_rate
    );

    Ok(clip)
}
