use anyhow::{bail, Result};
use tracing::debug;

use super::utterance::Utterance;
use crate::audio::{AudioFrame, Recorder};

/// Owns the session's single recorder and the chunks it produced.
///
/// Chunks arrive through the recorder sink and are handed in with `push`;
/// `finish` turns them into one utterance once the recorder reports it stopped.
pub struct RecordingController {
    recorder: Box<dyn Recorder>,
    chunks: Vec<AudioFrame>,
}

impl RecordingController {
    pub fn new(recorder: Box<dyn Recorder>) -> Self {
        Self {
            recorder,
            chunks: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.recorder.is_recording()
    }

    /// Clear the buffer and begin encoding. Fails if a recording is running.
    pub fn start(&mut self) -> Result<()> {
        if self.is_active() {
            bail!("Recording already in progress");
        }
        self.chunks.clear();
        self.recorder.start()?;
        debug!("Recorder started");
        Ok(())
    }

    /// Ask the recorder to stop. No-op when nothing is recording.
    pub fn stop(&mut self) {
        if !self.is_active() {
            return;
        }
        self.recorder.stop();
        debug!("Recorder stopped ({} chunks buffered)", self.chunks.len());
    }

    pub fn push(&mut self, frame: AudioFrame) {
        if frame.samples.is_empty() {
            return;
        }
        self.chunks.push(frame);
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Assemble and drain the buffered chunks
    pub fn finish(&mut self) -> Result<Option<Utterance>> {
        let chunks = std::mem::take(&mut self.chunks);
        Utterance::assemble(&chunks)
    }

    /// Drop buffered chunks without assembling them
    pub fn discard(&mut self) {
        self.chunks.clear();
    }
}
