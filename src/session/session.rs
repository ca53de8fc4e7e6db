use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::silence::SilenceGate;
use super::state::{CallSnapshot, CallStatus};
use crate::audio::{
    Analyser, Capture, CaptureBackend, ClipPlayer, InputStream, RecorderEvent, RecorderSink,
    VolumeSampler,
};
use crate::config::CallSettings;
use crate::error::CallError;
use crate::gateway::{RemoteResponse, ReplyShape, TransmissionGateway};
use crate::recording::RecordingController;

/// Collaborators a call session drives
#[derive(Clone)]
pub struct SessionDeps {
    pub capture: Arc<dyn CaptureBackend>,
    pub gateway: Arc<dyn TransmissionGateway>,
    pub player: Arc<dyn ClipPlayer>,
}

/// Asynchronous completions routed back into the session.
///
/// Each carries the id of the call that produced it; events for a call that
/// is no longer current are dropped.
#[derive(Debug)]
pub enum SessionEvent {
    Recorder {
        call_id: Uuid,
        event: RecorderEvent,
    },
    Reply {
        call_id: Uuid,
        reply: Result<String, String>,
    },
    PlaybackFinished {
        call_id: Uuid,
        clip: u64,
        end_after: bool,
        outcome: Result<(), String>,
    },
}

/// OS-level resources held while a call is active
struct SessionResources {
    stream: Box<dyn InputStream>,
    analyser: Box<dyn Analyser>,
    recording: RecordingController,
}

struct PlaybackTask {
    clip: u64,
    handle: JoinHandle<()>,
}

/// The voice call state machine.
///
/// All transitions go through `&mut self` methods; asynchronous work
/// (transmission, playback, recorder callbacks) reports back through the
/// event channel handed to `new`.
pub struct CallSession {
    deps: SessionDeps,
    settings: watch::Receiver<CallSettings>,
    events: mpsc::UnboundedSender<SessionEvent>,

    status: CallStatus,
    active: bool,
    call_id: Option<Uuid>,
    started_at: Option<DateTime<Utc>>,

    volume: u32,
    sampler: VolumeSampler,
    gate: SilenceGate,

    resources: Option<SessionResources>,
    pending_utterance: bool,
    transmission: Option<JoinHandle<()>>,
    playback: Option<PlaybackTask>,
    clip_seq: u64,

    utterances_sent: u64,
    last_error: Option<String>,
}

impl CallSession {
    pub fn new(
        deps: SessionDeps,
        settings: watch::Receiver<CallSettings>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            deps,
            settings,
            events,
            status: CallStatus::Idle,
            active: false,
            call_id: None,
            started_at: None,
            volume: 0,
            sampler: VolumeSampler::new(),
            gate: SilenceGate::new(),
            resources: None,
            pending_utterance: false,
            transmission: None,
            playback: None,
            clip_seq: 0,
            utterances_sent: 0,
            last_error: None,
        }
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn call_id(&self) -> Option<Uuid> {
        self.call_id
    }

    pub fn volume(&self) -> u32 {
        self.volume
    }

    pub fn silence_progress(&self) -> f64 {
        self.gate.progress()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Microphone track state, `None` when no capture is held
    pub fn tracks_enabled(&self) -> Option<bool> {
        self.resources.as_ref().map(|r| r.stream.tracks_enabled())
    }

    pub fn is_recorder_active(&self) -> bool {
        self.resources
            .as_ref()
            .map(|r| r.recording.is_active())
            .unwrap_or(false)
    }

    pub fn is_playing_clip(&self) -> bool {
        self.playback.is_some()
    }

    /// When the armed silence timer fires, if one is pending
    pub fn silence_deadline(&self) -> Option<Instant> {
        if self.active && self.status == CallStatus::Recording {
            self.gate.deadline()
        } else {
            None
        }
    }

    pub fn snapshot(&self) -> CallSnapshot {
        let settings = *self.settings.borrow();
        CallSnapshot {
            status: self.status,
            volume: self.volume,
            threshold_percent: settings.threshold_percent,
            silence_progress: self.gate.progress(),
            silence_remaining_ms: self.gate.remaining(settings.silence_timeout()).as_millis() as u64,
            call_id: self.call_id,
            last_error: self.last_error.clone(),
            utterances_sent: self.utterances_sent,
            started_at: self.started_at,
        }
    }

    /// Idle -> Listening: acquire the microphone, build the recorder, begin polling.
    ///
    /// Starting an active call is a no-op. On failure nothing stays allocated
    /// and the error is kept for the readout.
    pub async fn start(&mut self) -> Result<(), CallError> {
        if self.active {
            warn!("Call already active");
            return Ok(());
        }

        self.last_error = None;
        info!("Starting call using {}", self.deps.capture.name());

        let Capture {
            mut stream,
            mut analyser,
        } = match self.deps.capture.acquire().await {
            Ok(capture) => capture,
            Err(e) => return Err(self.fail_start(CallError::Capture(e))),
        };

        let call_id = Uuid::new_v4();
        let recorder = match stream.recorder(recorder_sink(self.events.clone(), call_id)) {
            Ok(recorder) => recorder,
            Err(e) => {
                stream.stop_tracks();
                analyser.close();
                return Err(self.fail_start(CallError::Capture(e)));
            }
        };

        stream.set_tracks_enabled(true);
        self.resources = Some(SessionResources {
            stream,
            analyser,
            recording: RecordingController::new(recorder),
        });

        self.active = true;
        self.call_id = Some(call_id);
        self.started_at = Some(Utc::now());
        self.utterances_sent = 0;
        self.pending_utterance = false;
        self.volume = 0;
        self.gate.reset();
        self.status = CallStatus::Listening;

        info!("Call {} started", call_id);
        Ok(())
    }

    fn fail_start(&mut self, err: CallError) -> CallError {
        error!("Failed to start call: {}", err);
        self.last_error = Some(err.to_string());
        self.cleanup();
        err
    }

    /// One polling tick: take a loudness sample and apply the VAD rules
    pub fn on_tick(&mut self, now: Instant) {
        if !self.active {
            return;
        }
        let Some(resources) = self.resources.as_mut() else {
            return;
        };

        let settings = *self.settings.borrow();
        self.volume = self.sampler.sample(self.status, resources.analyser.as_mut());

        if !self.status.samples_audio() {
            return;
        }

        if self.volume > settings.threshold_percent {
            self.gate.reset();
            if self.status == CallStatus::Listening {
                self.begin_recording();
            }
        } else if self.status == CallStatus::Recording {
            self.gate.observe_silence(now, settings.silence_timeout());
        }
    }

    /// The one-shot silence timer fired
    pub fn on_silence_timeout(&mut self, now: Instant) {
        if !self.active || self.status != CallStatus::Recording {
            return;
        }
        match self.gate.deadline() {
            Some(deadline) if now >= deadline => {}
            _ => return,
        }

        self.gate.disarm();
        self.finalize_utterance("silence");
    }

    /// Fire a due silence timer, then take a sample
    pub fn advance(&mut self, now: Instant) {
        self.on_silence_timeout(now);
        self.on_tick(now);
    }

    /// Manual stop: Recording -> Processing
    pub fn commit(&mut self) {
        if self.active && self.status == CallStatus::Recording {
            self.finalize_utterance("manual");
        } else {
            debug!("Nothing to commit while {}", self.status);
        }
    }

    fn begin_recording(&mut self) {
        let Some(resources) = self.resources.as_mut() else {
            return;
        };

        match resources.recording.start() {
            Ok(()) => {
                self.status = CallStatus::Recording;
                self.gate.reset();
                debug!("Speech detected at volume {}", self.volume);
            }
            Err(e) => warn!("Failed to start recorder: {}", e),
        }
    }

    /// Recording -> Processing. The status flips before any resource is touched.
    fn finalize_utterance(&mut self, reason: &str) {
        self.status = CallStatus::Processing;

        let mut already_stopped = false;
        if let Some(resources) = self.resources.as_mut() {
            resources.stream.set_tracks_enabled(false);
            already_stopped = !resources.recording.is_active();
            self.pending_utterance = true;
            resources.recording.stop();
        }

        self.gate.reset();
        self.volume = 0;
        info!("Utterance finalized ({})", reason);

        if already_stopped {
            self.complete_utterance();
        }
    }

    /// Recorder reported it stopped: hand the utterance to the gateway
    fn complete_utterance(&mut self) {
        let was_pending = std::mem::replace(&mut self.pending_utterance, false);
        let (Some(call_id), Some(resources)) = (self.call_id, self.resources.as_mut()) else {
            return;
        };

        if !was_pending || !self.active || self.status != CallStatus::Processing {
            resources.recording.discard();
            return;
        }

        let utterance = match resources.recording.finish() {
            Ok(Some(utterance)) => utterance,
            Ok(None) => {
                debug!("Utterance was empty");
                self.resume_listening();
                return;
            }
            Err(e) => {
                warn!("Failed to assemble utterance: {:#}", e);
                self.resume_listening();
                return;
            }
        };

        self.utterances_sent += 1;
        info!(
            "Sending utterance {} ({}ms)",
            self.utterances_sent,
            utterance.duration_ms()
        );

        let gateway = Arc::clone(&self.deps.gateway);
        let events = self.events.clone();
        self.transmission = Some(tokio::spawn(async move {
            let reply = gateway
                .transmit(utterance)
                .await
                .map_err(|e| format!("{:#}", e));
            let _ = events.send(SessionEvent::Reply { call_id, reply });
        }));
    }

    /// Back to Listening with the microphone unmuted
    fn resume_listening(&mut self) {
        if !self.active {
            return;
        }
        if let Some(resources) = self.resources.as_mut() {
            resources.stream.set_tracks_enabled(true);
        }
        self.gate.reset();
        self.status = CallStatus::Listening;
        debug!("Listening");
    }

    /// Route one asynchronous completion into the state machine
    pub async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Recorder { call_id, event } => {
                if !self.is_current(call_id) {
                    return;
                }
                match event {
                    RecorderEvent::Data(frame) => {
                        let Some(resources) = self.resources.as_mut() else {
                            return;
                        };
                        if resources.recording.is_active() || self.pending_utterance {
                            resources.recording.push(frame);
                        }
                    }
                    RecorderEvent::Stopped => self.complete_utterance(),
                }
            }
            SessionEvent::Reply { call_id, reply } => {
                if !self.is_current(call_id) {
                    debug!("Dropping reply for ended call {}", call_id);
                    return;
                }
                self.transmission = None;

                let response = match reply {
                    Ok(content) => RemoteResponse::decode(&content),
                    Err(e) => {
                        warn!("Transmission failed: {}", e);
                        RemoteResponse::acknowledgment(ReplyShape::Unparseable)
                    }
                };
                self.apply_remote(response).await;
            }
            SessionEvent::PlaybackFinished {
                call_id,
                clip,
                end_after,
                outcome,
            } => {
                let current_clip = self.playback.as_ref().map(|p| p.clip);
                if !self.is_current(call_id) || current_clip != Some(clip) {
                    debug!("Ignoring completion of superseded clip {}", clip);
                    return;
                }
                self.playback = None;

                match outcome {
                    Ok(()) if end_after => {
                        info!("Agent ended the call");
                        self.cleanup();
                    }
                    Ok(()) => self.resume_listening(),
                    Err(e) => {
                        warn!("Playback failed: {}", e);
                        self.resume_listening();
                    }
                }
            }
        }
    }

    /// Apply an inbound remote instruction
    pub async fn apply_remote(&mut self, response: RemoteResponse) {
        match response.call {
            Some(false) => {
                info!("Remote side hung up");
                self.cleanup();
                return;
            }
            Some(true) if self.status == CallStatus::Idle => {
                if let Err(e) = self.start().await {
                    warn!("Remote call start failed: {}", e);
                    return;
                }
            }
            Some(true) => debug!("Call already active; ignoring call start"),
            None => {}
        }

        if !self.active {
            debug!("No active call; ignoring remote response");
            return;
        }

        if response.is_acknowledgment() {
            debug!("Agent acknowledged ({:?} reply)", response.shape);
        }

        let end_after = response.ends_after_playback();
        match response.audio {
            Some(source) => self.play(source, end_after),
            None if self.status == CallStatus::Processing => self.resume_listening(),
            None => {}
        }
    }

    /// Enter Playing and start the clip with the microphone muted
    fn play(&mut self, source: String, end_after: bool) {
        let Some(call_id) = self.call_id else {
            return;
        };

        if self.status == CallStatus::Recording {
            if let Some(resources) = self.resources.as_mut() {
                resources.recording.stop();
                resources.recording.discard();
            }
            info!("Abandoning utterance for incoming clip");
        }

        self.abort_playback();
        self.clip_seq += 1;
        let clip = self.clip_seq;

        self.status = CallStatus::Playing;
        if let Some(resources) = self.resources.as_mut() {
            resources.stream.set_tracks_enabled(false);
        }
        self.gate.reset();
        self.volume = 0;

        // Data URLs can be megabytes long
        let label: String = source.chars().take(64).collect();
        info!("Playing clip {} {} (end after: {})", clip, label, end_after);

        let player = Arc::clone(&self.deps.player);
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            let outcome = player.play(&source).await.map_err(|e| format!("{:#}", e));
            let _ = events.send(SessionEvent::PlaybackFinished {
                call_id,
                clip,
                end_after,
                outcome,
            });
        });

        self.playback = Some(PlaybackTask { clip, handle });
    }

    fn abort_playback(&mut self) {
        if let Some(task) = self.playback.take() {
            task.handle.abort();
            debug!("Clip {} aborted", task.clip);
        }
    }

    fn is_current(&self, call_id: Uuid) -> bool {
        self.active && self.call_id == Some(call_id)
    }

    /// Tear everything down and return to Idle. Safe from any state, any number of times.
    ///
    /// Order: mark inactive, drop the silence timer, stop playback and any
    /// in-flight transmission, stop the recorder, stop the tracks, close the
    /// analyser.
    pub fn cleanup(&mut self) {
        let ended = self.call_id.filter(|_| self.active);
        self.active = false;
        self.gate.reset();
        self.abort_playback();
        if let Some(handle) = self.transmission.take() {
            handle.abort();
        }
        self.pending_utterance = false;

        if let Some(mut resources) = self.resources.take() {
            resources.recording.stop();
            resources.recording.discard();
            resources.stream.stop_tracks();
            resources.analyser.close();
        }

        self.status = CallStatus::Idle;
        self.volume = 0;
        self.call_id = None;
        self.started_at = None;

        if let Some(call_id) = ended {
            info!("Call {} ended", call_id);
        }
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn recorder_sink(events: mpsc::UnboundedSender<SessionEvent>, call_id: Uuid) -> RecorderSink {
    Box::new(move |event| {
        let _ = events.send(SessionEvent::Recorder { call_id, event });
    })
}
