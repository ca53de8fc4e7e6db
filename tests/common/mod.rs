// Shared fakes for driving the call engine deterministically
//
// The capture fake reports every resource operation through a `Probe` so tests
// can assert on what the session did to the microphone, analyser and recorder.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use callwire::audio::{
    Analyser, AudioFrame, Capture, CaptureBackend, ClipPlayer, InputStream, Recorder,
    RecorderEvent, RecorderSink,
};
use callwire::gateway::TransmissionGateway;
use callwire::recording::Utterance;
use callwire::session::{CallSession, SessionDeps, SessionEvent};
use callwire::{CallSettings, CaptureError};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch, Notify};

/// Analyser byte level that reads as volume 60
pub const LOUD: u8 = 77;
/// Analyser byte level that reads as volume 10
pub const QUIET: u8 = 13;

/// Observable state of the fake microphone
#[derive(Default)]
pub struct Probe {
    pub acquisitions: AtomicUsize,
    pub tracks_enabled: AtomicBool,
    pub tracks_stopped: AtomicUsize,
    pub analyser_reads: AtomicUsize,
    pub analyser_closed: AtomicBool,
    pub recorders_built: AtomicUsize,
    pub recorder_starts: AtomicUsize,
    pub recorder_stops: AtomicUsize,
    pub recorder_active: AtomicBool,
    level: AtomicU8,
    failure: Mutex<Option<CaptureError>>,
    ops: Mutex<Vec<&'static str>>,
}

impl Probe {
    pub fn set_level(&self, level: u8) {
        self.level.store(level, Ordering::SeqCst);
    }

    pub fn fail_with(&self, err: CaptureError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    pub fn clear_failure(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn tracks_enabled(&self) -> bool {
        self.tracks_enabled.load(Ordering::SeqCst)
    }

    pub fn tracks_stopped(&self) -> usize {
        self.tracks_stopped.load(Ordering::SeqCst)
    }

    pub fn recorder_active(&self) -> bool {
        self.recorder_active.load(Ordering::SeqCst)
    }

    pub fn recorder_stops(&self) -> usize {
        self.recorder_stops.load(Ordering::SeqCst)
    }

    pub fn analyser_closed(&self) -> bool {
        self.analyser_closed.load(Ordering::SeqCst)
    }

    /// Resource operations in the order the session performed them
    pub fn ops(&self) -> Vec<&'static str> {
        self.ops.lock().unwrap().clone()
    }

    pub fn clear_ops(&self) {
        self.ops.lock().unwrap().clear();
    }

    fn log(&self, op: &'static str) {
        self.ops.lock().unwrap().push(op);
    }
}

pub struct FakeCapture {
    pub probe: Arc<Probe>,
}

#[async_trait::async_trait]
impl CaptureBackend for FakeCapture {
    async fn acquire(&self) -> Result<Capture, CaptureError> {
        self.probe.acquisitions.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.probe.failure.lock().unwrap().clone() {
            return Err(err);
        }

        self.probe.tracks_enabled.store(true, Ordering::SeqCst);
        Ok(Capture {
            stream: Box::new(FakeStream {
                probe: Arc::clone(&self.probe),
                live: true,
            }),
            analyser: Box::new(FakeAnalyser {
                probe: Arc::clone(&self.probe),
                closed: false,
            }),
        })
    }

    fn name(&self) -> &str {
        "fake microphone"
    }
}

struct FakeStream {
    probe: Arc<Probe>,
    live: bool,
}

impl InputStream for FakeStream {
    fn set_tracks_enabled(&mut self, enabled: bool) {
        self.probe.tracks_enabled.store(enabled, Ordering::SeqCst);
        self.probe
            .log(if enabled { "tracks_enabled" } else { "tracks_disabled" });
    }

    fn tracks_enabled(&self) -> bool {
        self.probe.tracks_enabled()
    }

    fn stop_tracks(&mut self) {
        if self.live {
            self.live = false;
            self.probe.tracks_stopped.fetch_add(1, Ordering::SeqCst);
            self.probe.log("tracks_stop");
        }
    }

    fn is_live(&self) -> bool {
        self.live
    }

    fn recorder(&self, sink: RecorderSink) -> Result<Box<dyn Recorder>, CaptureError> {
        self.probe.recorders_built.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeRecorder {
            probe: Arc::clone(&self.probe),
            sink,
            recording: false,
        }))
    }
}

struct FakeAnalyser {
    probe: Arc<Probe>,
    closed: bool,
}

impl Analyser for FakeAnalyser {
    fn frequency_bin_count(&self) -> usize {
        128
    }

    fn byte_frequency_data(&mut self, out: &mut [u8]) {
        self.probe.analyser_reads.fetch_add(1, Ordering::SeqCst);
        // Muted tracks deliver silence
        let level = if self.closed || !self.probe.tracks_enabled() {
            0
        } else {
            self.probe.level.load(Ordering::SeqCst)
        };
        out.iter_mut().for_each(|b| *b = level);
    }

    fn close(&mut self) {
        self.closed = true;
        self.probe.analyser_closed.store(true, Ordering::SeqCst);
        self.probe.log("analyser_close");
    }
}

/// Emits one 100ms chunk and the stop notification when stopped
struct FakeRecorder {
    probe: Arc<Probe>,
    sink: RecorderSink,
    recording: bool,
}

impl Recorder for FakeRecorder {
    fn is_recording(&self) -> bool {
        self.recording
    }

    fn start(&mut self) -> Result<()> {
        if self.recording {
            return Err(anyhow!("already recording"));
        }
        self.recording = true;
        self.probe.recorder_starts.fetch_add(1, Ordering::SeqCst);
        self.probe.recorder_active.store(true, Ordering::SeqCst);
        self.probe.log("recorder_start");
        Ok(())
    }

    fn stop(&mut self) {
        if !self.recording {
            return;
        }
        self.recording = false;
        self.probe.recorder_stops.fetch_add(1, Ordering::SeqCst);
        self.probe.recorder_active.store(false, Ordering::SeqCst);
        self.probe.log("recorder_stop");

        (self.sink)(RecorderEvent::Data(AudioFrame {
            samples: vec![500; 1600],
            sample_rate: 16000,
            channels: 1,
            timestamp_ms: 0,
        }));
        (self.sink)(RecorderEvent::Stopped);
    }
}

/// Gateway that answers every utterance with a scripted reply
pub struct FakeGateway {
    pub calls: AtomicUsize,
    pub last_bytes: AtomicUsize,
    reply: Mutex<Result<String, String>>,
}

impl FakeGateway {
    pub fn new(reply: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            last_bytes: AtomicUsize::new(0),
            reply: Mutex::new(Ok(reply.to_string())),
        }
    }

    pub fn set_reply(&self, reply: &str) {
        *self.reply.lock().unwrap() = Ok(reply.to_string());
    }

    pub fn set_failure(&self, message: &str) {
        *self.reply.lock().unwrap() = Err(message.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TransmissionGateway for FakeGateway {
    async fn transmit(&self, utterance: Utterance) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_bytes.store(utterance.wav.len(), Ordering::SeqCst);
        self.reply.lock().unwrap().clone().map_err(|e| anyhow!(e))
    }
}

/// Player that records every clip; optionally holds each clip until released
pub struct FakePlayer {
    pub played: Mutex<Vec<String>>,
    outcome: Mutex<Result<(), String>>,
    hold: Option<Arc<Notify>>,
}

impl FakePlayer {
    pub fn instant() -> Self {
        Self {
            played: Mutex::new(Vec::new()),
            outcome: Mutex::new(Ok(())),
            hold: None,
        }
    }

    pub fn held(release: Arc<Notify>) -> Self {
        Self {
            hold: Some(release),
            ..Self::instant()
        }
    }

    pub fn set_failure(&self, message: &str) {
        *self.outcome.lock().unwrap() = Err(message.to_string());
    }

    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ClipPlayer for FakePlayer {
    async fn play(&self, source: &str) -> Result<()> {
        self.played.lock().unwrap().push(source.to_string());
        if let Some(release) = &self.hold {
            release.notified().await;
        }
        self.outcome.lock().unwrap().clone().map_err(|e| anyhow!(e))
    }
}

pub fn default_settings() -> CallSettings {
    CallSettings {
        threshold_percent: 45,
        silence_timeout_ms: 1500,
    }
}

/// A call session wired to fakes, with direct access to its event inbox
pub struct Harness {
    pub session: CallSession,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    pub settings: watch::Sender<CallSettings>,
    pub probe: Arc<Probe>,
    pub gateway: Arc<FakeGateway>,
    pub player: Arc<FakePlayer>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_player(FakePlayer::instant())
    }

    pub fn with_player(player: FakePlayer) -> Self {
        let probe = Arc::new(Probe::default());
        let gateway = Arc::new(FakeGateway::new("{}"));
        let player = Arc::new(player);

        let deps = SessionDeps {
            capture: Arc::new(FakeCapture {
                probe: Arc::clone(&probe),
            }),
            gateway: gateway.clone(),
            player: player.clone(),
        };

        let (settings, settings_rx) = watch::channel(default_settings());
        let (event_tx, events) = mpsc::unbounded_channel();

        Self {
            session: CallSession::new(deps, settings_rx, event_tx),
            events,
            settings,
            probe,
            gateway,
            player,
        }
    }

    /// Handle every event already queued
    pub async fn pump(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.session.handle_event(event).await;
        }
    }

    /// Let spawned transmission and playback tasks run, handling what they report
    pub async fn settle(&mut self) {
        for _ in 0..10 {
            tokio::task::yield_now().await;
            self.pump().await;
        }
    }
}

pub fn fake_deps(probe: Arc<Probe>, gateway: Arc<FakeGateway>, player: Arc<FakePlayer>) -> SessionDeps {
    SessionDeps {
        capture: Arc::new(FakeCapture { probe }),
        gateway,
        player,
    }
}
