use std::time::Duration;
use tokio::time::Instant;

/// Tracks a run of sub-threshold samples while recording.
///
/// The first quiet sample arms a one-shot deadline `timeout` in the future;
/// the deadline stays fixed once armed. Progress is recomputed on every quiet
/// sample against the timeout in effect at that moment.
#[derive(Debug, Default)]
pub struct SilenceGate {
    started_at: Option<Instant>,
    deadline: Option<Instant>,
    progress: f64,
}

impl SilenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a quiet sample, arming the gate if needed. Returns the new progress.
    pub fn observe_silence(&mut self, now: Instant, timeout: Duration) -> f64 {
        let started_at = *self.started_at.get_or_insert(now);
        if self.deadline.is_none() {
            self.deadline = Some(started_at + timeout);
        }

        let elapsed = now.saturating_duration_since(started_at);
        self.progress = if timeout.is_zero() {
            1.0
        } else {
            (elapsed.as_secs_f64() / timeout.as_secs_f64()).min(1.0)
        };
        self.progress
    }

    /// Forget the current run: cancels the deadline and zeroes progress
    pub fn reset(&mut self) {
        self.started_at = None;
        self.deadline = None;
        self.progress = 0.0;
    }

    /// Disarm the one-shot deadline once it fired, keeping progress for readout
    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// Remaining silence budget for readouts: `timeout * (1 - progress)`
    pub fn remaining(&self, timeout: Duration) -> Duration {
        let fraction = (1.0 - self.progress).clamp(0.0, 1.0);
        Duration::from_millis((timeout.as_millis() as f64 * fraction).round() as u64)
    }
}
