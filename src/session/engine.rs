use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::config::EngineConfig;
use super::session::{CallSession, SessionDeps};
use super::state::CallSnapshot;
use crate::config::CallSettings;
use crate::error::CallError;
use crate::gateway::RemoteResponse;

enum Command {
    Start(oneshot::Sender<Result<(), CallError>>),
    Stop(oneshot::Sender<()>),
    Commit(oneshot::Sender<()>),
    Remote(String),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to the task that owns the call session.
///
/// Cheap to clone; every clone talks to the same driver.
#[derive(Clone)]
pub struct CallEngine {
    commands: mpsc::Sender<Command>,
    settings: Arc<watch::Sender<CallSettings>>,
    snapshots: watch::Receiver<CallSnapshot>,
}

impl CallEngine {
    /// Spawn the driver task. Must be called inside a tokio runtime.
    pub fn spawn(config: EngineConfig, deps: SessionDeps) -> (Self, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (settings_tx, settings_rx) = watch::channel(config.settings);

        let session = CallSession::new(deps, settings_rx, event_tx);
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());

        let driver = Driver {
            session,
            commands: command_rx,
            events: event_rx,
            snapshots: snapshot_tx,
            tick_interval: config.tick_interval,
        };
        let handle = tokio::spawn(driver.run());

        info!(
            "Call engine running (tick {}ms)",
            config.tick_interval.as_millis()
        );

        (
            Self {
                commands: command_tx,
                settings: Arc::new(settings_tx),
                snapshots: snapshot_rx,
            },
            handle,
        )
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, CallError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| CallError::EngineStopped)?;
        rx.await.map_err(|_| CallError::EngineStopped)
    }

    /// Begin a call. Capture failures are returned and leave the engine idle.
    pub async fn start_session(&self) -> Result<CallSnapshot, CallError> {
        self.request(Command::Start).await??;
        Ok(self.snapshot())
    }

    /// End the call, if any
    pub async fn stop_session(&self) -> Result<CallSnapshot, CallError> {
        self.request(Command::Stop).await?;
        Ok(self.snapshot())
    }

    /// Finalize the current utterance without waiting for silence
    pub async fn commit_utterance(&self) -> Result<CallSnapshot, CallError> {
        self.request(Command::Commit).await?;
        Ok(self.snapshot())
    }

    /// Queue an inbound remote message (raw reply content)
    pub async fn deliver_remote(&self, body: impl Into<String>) -> Result<(), CallError> {
        self.commands
            .send(Command::Remote(body.into()))
            .await
            .map_err(|_| CallError::EngineStopped)
    }

    /// Validate and apply new calibration; the next tick uses it
    pub fn update_settings(&self, settings: CallSettings) -> Result<(), CallError> {
        settings.validate()?;
        self.settings.send_replace(settings);
        info!(
            "Call settings updated: threshold {}%, silence {}ms",
            settings.threshold_percent, settings.silence_timeout_ms
        );
        Ok(())
    }

    pub fn settings(&self) -> CallSettings {
        *self.settings.borrow()
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receive a new snapshot whenever the readout changes
    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshots.clone()
    }

    /// End any call and stop the driver
    pub async fn shutdown(&self) -> Result<(), CallError> {
        self.request(Command::Shutdown).await
    }
}

struct Driver {
    session: CallSession,
    commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedReceiver<super::session::SessionEvent>,
    snapshots: watch::Sender<CallSnapshot>,
    tick_interval: Duration,
}

impl Driver {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let polling = self.session.is_active();
            let deadline = self.session.silence_deadline();

            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Start(reply)) => {
                        let result = self.session.start().await;
                        self.publish();
                        let _ = reply.send(result);
                    }
                    Some(Command::Stop(reply)) => {
                        self.session.cleanup();
                        self.publish();
                        let _ = reply.send(());
                    }
                    Some(Command::Commit(reply)) => {
                        self.session.commit();
                        self.publish();
                        let _ = reply.send(());
                    }
                    Some(Command::Remote(body)) => {
                        self.session.apply_remote(RemoteResponse::decode(&body)).await;
                    }
                    Some(Command::Shutdown(reply)) => {
                        self.session.cleanup();
                        self.publish();
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        self.session.cleanup();
                        self.publish();
                        break;
                    }
                },

                Some(event) = self.events.recv() => {
                    self.session.handle_event(event).await;
                }

                _ = silence_timer(deadline) => {
                    self.session.on_silence_timeout(Instant::now());
                }

                now = ticker.tick(), if polling => {
                    self.session.on_tick(now);
                }
            }

            self.publish();
        }

        debug!("Call engine stopped");
    }

    fn publish(&self) {
        let next = self.session.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

async fn silence_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => futures::future::pending::<()>().await,
    }
}
