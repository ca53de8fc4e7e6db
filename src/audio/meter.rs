use super::backend::Analyser;
use crate::session::CallStatus;

/// Reduce one analyser snapshot to a loudness reading.
///
/// Mean bin magnitude rescaled so that a mean of 128 reads as 100. There is no
/// upper clamp: a saturated spectrum reads as 199.
pub fn normalized_volume(bins: &[u8]) -> u32 {
    if bins.is_empty() {
        return 0;
    }
    let sum: u64 = bins.iter().map(|&b| u64::from(b)).sum();
    let mean = sum as f64 / bins.len() as f64;
    ((mean / 128.0) * 100.0).round() as u32
}

/// Reads one loudness sample per polling tick
#[derive(Debug, Default)]
pub struct VolumeSampler {
    buffer: Vec<u8>,
}

impl VolumeSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns 0 without touching the analyser unless the call is listening or recording
    pub fn sample(&mut self, status: CallStatus, analyser: &mut dyn Analyser) -> u32 {
        if !status.samples_audio() {
            return 0;
        }

        let bins = analyser.frequency_bin_count();
        self.buffer.resize(bins, 0);
        analyser.byte_frequency_data(&mut self.buffer);
        normalized_volume(&self.buffer)
    }
}
