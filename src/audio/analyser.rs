// Frequency-magnitude analyser
//
// Produces byte-scaled magnitude snapshots compatible with the Web Audio
// AnalyserNode: Blackman window, magnitudes scaled by 1/N, exponential
// smoothing across snapshots, then decibels mapped linearly from
// [min_decibels, max_decibels] onto 0..=255.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

pub struct SpectrumAnalyser {
    fft_size: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    scratch: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    smoothing: f32,
    min_decibels: f32,
    max_decibels: f32,
}

impl SpectrumAnalyser {
    /// `fft_size` is rounded up to a power of two (minimum 32)
    pub fn new(fft_size: usize, smoothing: f32, min_decibels: f32, max_decibels: f32) -> Self {
        let fft_size = fft_size.max(32).next_power_of_two();

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);

        let (min_decibels, max_decibels) = if max_decibels > min_decibels {
            (min_decibels, max_decibels)
        } else {
            (-100.0, -30.0)
        };

        Self {
            fft_size,
            fft,
            window: blackman_window(fft_size),
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
            smoothed: vec![0.0; fft_size / 2],
            smoothing: smoothing.clamp(0.0, 0.99),
            min_decibels,
            max_decibels,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Analyse the most recent `fft_size` samples (oldest first).
    ///
    /// Shorter input is zero padded at the front. Writes at most `bin_count()` bytes.
    pub fn analyse(&mut self, samples: &[f32], out: &mut [u8]) {
        let n = self.fft_size;
        let tail = &samples[samples.len().saturating_sub(n)..];
        let offset = n - tail.len();

        for (i, slot) in self.scratch.iter_mut().enumerate() {
            let sample = if i < offset { 0.0 } else { tail[i - offset] };
            *slot = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft.process(&mut self.scratch);

        let scale = 1.0 / n as f32;
        for (k, value) in self.smoothed.iter_mut().enumerate() {
            let magnitude = self.scratch[k].norm() * scale;
            let next = self.smoothing * *value + (1.0 - self.smoothing) * magnitude;
            *value = if next.is_finite() { next } else { 0.0 };
        }

        let range = self.max_decibels - self.min_decibels;
        for (slot, &magnitude) in out.iter_mut().zip(&self.smoothed) {
            *slot = magnitude_to_byte(magnitude, self.min_decibels, range);
        }
    }
}

fn magnitude_to_byte(magnitude: f32, min_decibels: f32, range: f32) -> u8 {
    if magnitude <= 0.0 {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = 255.0 * (db - min_decibels) / range;
    scaled.clamp(0.0, 255.0) as u8
}

fn blackman_window(size: usize) -> Vec<f32> {
    let n = size as f32;
    (0..size)
        .map(|i| {
            let x = i as f32 / n;
            0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
        })
        .collect()
}
