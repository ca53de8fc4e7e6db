use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;
use tracing::{debug, warn};

use crate::audio::AudioFrame;

/// One finalized span of speech, encoded as a 16-bit PCM WAV blob
#[derive(Debug, Clone)]
pub struct Utterance {
    /// Complete WAV file bytes
    pub wav: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Number of samples (all channels)
    pub sample_count: usize,
    /// Number of recorder chunks that went into the blob
    pub chunk_count: usize,
}

impl Utterance {
    /// Assemble recorder chunks in arrival order.
    ///
    /// The first chunk fixes the format; chunks in another format are dropped.
    /// Returns `None` if there is nothing to send.
    pub fn assemble(chunks: &[AudioFrame]) -> Result<Option<Self>> {
        let Some(first) = chunks.iter().find(|c| !c.samples.is_empty()) else {
            return Ok(None);
        };

        let spec = WavSpec {
            channels: first.channels,
            sample_rate: first.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        let mut sample_count = 0;
        let mut chunk_count = 0;
        {
            let mut writer =
                WavWriter::new(&mut cursor, spec).context("Failed to create WAV writer")?;

            for chunk in chunks {
                if chunk.sample_rate != spec.sample_rate || chunk.channels != spec.channels {
                    warn!(
                        "Dropping chunk at {}ms: {}Hz/{}ch does not match {}Hz/{}ch",
                        chunk.timestamp_ms,
                        chunk.sample_rate,
                        chunk.channels,
                        spec.sample_rate,
                        spec.channels
                    );
                    continue;
                }

                for &sample in &chunk.samples {
                    writer
                        .write_sample(sample)
                        .context("Failed to write sample")?;
                }
                sample_count += chunk.samples.len();
                chunk_count += 1;
            }

            writer.finalize().context("Failed to finalize WAV")?;
        }

        let utterance = Self {
            wav: cursor.into_inner(),
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            sample_count,
            chunk_count,
        };

        debug!(
            "Utterance assembled: {} chunks, {}ms, {} bytes",
            utterance.chunk_count,
            utterance.duration_ms(),
            utterance.wav.len()
        );

        Ok(Some(utterance))
    }

    pub fn duration_ms(&self) -> u64 {
        let frames = self.sample_count as u64 / u64::from(self.channels.max(1));
        frames * 1000 / u64::from(self.sample_rate.max(1))
    }
}
