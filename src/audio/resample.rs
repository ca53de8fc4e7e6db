use anyhow::{bail, Context, Result};
use rubato::{FftFixedIn, Resampler};

const CHUNK_SIZE: usize = 1024;
const SUB_CHUNKS: usize = 2;

/// Resample mono audio with rubato's FFT resampler.
///
/// The tail is flushed with zero-padded chunks and the resampler delay is
/// trimmed, so the output holds `ceil(len * to / from)` samples aligned with
/// the input.
pub fn resample_mono(input: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if input.is_empty() || from_rate == to_rate {
        return Ok(input.to_vec());
    }
    if from_rate == 0 || to_rate == 0 {
        bail!("Cannot resample {from_rate}Hz to {to_rate}Hz");
    }

    let mut resampler = FftFixedIn::<f64>::new(
        from_rate as usize,
        to_rate as usize,
        CHUNK_SIZE,
        SUB_CHUNKS,
        1,
    )
    .context("Resampler init failed")?;

    let delay = resampler.output_delay();
    let expected = (input.len() as u64 * u64::from(to_rate)).div_ceil(u64::from(from_rate)) as usize;
    let samples: Vec<f64> = input.iter().map(|&s| f64::from(s)).collect();

    let mut output = Vec::with_capacity(expected + delay);
    let mut pos = 0;
    while output.len() < expected + delay {
        let needed = resampler.input_frames_next();
        let mut chunk = vec![0.0f64; needed];
        let end = (pos + needed).min(samples.len());
        if pos < end {
            chunk[..end - pos].copy_from_slice(&samples[pos..end]);
        }
        pos += needed;

        let result = resampler
            .process(&[chunk], None)
            .context("Resample failed")?;
        output.extend_from_slice(&result[0]);
    }

    Ok(output
        .into_iter()
        .skip(delay)
        .take(expected)
        .map(|s| s as f32)
        .collect())
}
