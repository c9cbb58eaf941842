//! Session lifecycle manager.
//!
//! A single actor task owns [`SessionState`] and the session handle. Every
//! mutation (start, connect result, retry timer, state signal, probe failure,
//! restart) is a message on its control channel, so connect and restart
//! sequences are serialized without locks. Readers get whole snapshots
//! through a `watch` channel.
//!
//! Each connection attempt and each restart bumps a generation counter.
//! Timers, connect results and sink signals carry the generation they were
//! issued under; anything from an older generation is ignored.

mod health;

use super::{
    Connectivity, EventSink, MediaSource, Phase, PhaseTransition, RetryPolicy, SessionEngine,
    SessionHandle, SessionState, SinkSignal,
};
use crate::config::Config;
use crate::errors::{BridgeError, BridgeResult};
use crate::events::InboundEvent;
use crate::utils::metrics::{CONNECT_FAILURES_TOTAL, SESSION_RESTARTS_TOTAL};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the inbound message queue between the session and the pipeline.
pub const INBOUND_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub session_name: String,
    /// Root of persisted credentials; the session's own directory is
    /// `<credentials_dir>/<session_name>`.
    pub credentials_dir: PathBuf,
    pub retry: RetryPolicy,
    pub health_interval: Duration,
    pub probe_timeout: Duration,
    /// Delay before an automatic restart re-enters `Starting`.
    pub restart_cooldown: Duration,
    pub close_timeout: Duration,
    pub purge_on_conflict: bool,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        let s = &config.session;
        Self {
            session_name: s.name.clone(),
            credentials_dir: config.credentials_path(),
            retry: RetryPolicy::from_config(s),
            health_interval: Duration::from_secs(s.health_check_interval_secs),
            probe_timeout: Duration::from_secs(s.probe_timeout_secs),
            restart_cooldown: Duration::from_secs(s.restart_cooldown_secs),
            close_timeout: Duration::from_secs(s.close_timeout_secs),
            purge_on_conflict: s.purge_credentials_on_conflict,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyStarting,
    AlreadyConnected,
    /// A restart is underway and will start the session itself.
    Restarting,
    /// Retry ceiling was exceeded; only a manual restart recovers.
    Failed,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartOutcome {
    Restarting,
    AlreadyInProgress,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Manual,
    Probe,
    State,
}

impl Trigger {
    fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Probe => "probe",
            Self::State => "state",
        }
    }
}

enum Control {
    Start(oneshot::Sender<StartOutcome>),
    Restart {
        purge: bool,
        reply: oneshot::Sender<RestartOutcome>,
    },
    ConnectFinished {
        generation: u64,
        result: anyhow::Result<Arc<dyn SessionHandle>>,
    },
    RetryDue {
        generation: u64,
    },
    RestartDue {
        generation: u64,
    },
    ProbeFailed {
        generation: u64,
        reason: String,
    },
    Shutdown(oneshot::Sender<()>),
}

type SharedHandle = Arc<RwLock<Option<Arc<dyn SessionHandle>>>>;

/// Owner of the session lifecycle. Cheap to clone; all clones talk to the
/// same actor.
#[derive(Clone)]
pub struct SessionManager {
    control: mpsc::UnboundedSender<Control>,
    state: watch::Receiver<SessionState>,
    transitions: broadcast::Sender<PhaseTransition>,
    handle: SharedHandle,
}

impl SessionManager {
    /// Spawn the lifecycle actor. Returns the manager and the queue of
    /// inbound messages the session produces.
    ///
    /// The session is not started until [`start`](Self::start) is called.
    pub fn spawn(
        engine: Arc<dyn SessionEngine>,
        settings: SessionSettings,
    ) -> (Self, mpsc::Receiver<InboundEvent>) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (message_tx, message_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
        let (state_tx, state_rx) = watch::channel(SessionState::default());
        let (transitions, _) = broadcast::channel(64);
        let handle: SharedHandle = Arc::new(RwLock::new(None));

        let actor = Actor {
            engine,
            settings,
            control: control_tx.downgrade(),
            signals: signal_tx,
            messages: message_tx,
            state_tx,
            transitions: transitions.clone(),
            handle: handle.clone(),
            state: SessionState::default(),
            generation: 0,
            health: None,
            pending: None,
        };
        tokio::spawn(actor.run(control_rx, signal_rx));

        (
            Self {
                control: control_tx,
                state: state_rx,
                transitions,
                handle,
            },
            message_rx,
        )
    }

    /// Begin a connection attempt unless one is already running.
    pub async fn start(&self) -> StartOutcome {
        let (reply, rx) = oneshot::channel();
        if self.control.send(Control::Start(reply)).is_err() {
            return StartOutcome::Stopped;
        }
        rx.await.unwrap_or(StartOutcome::Stopped)
    }

    /// Manual restart: tear down, reset the retry count and start again
    /// without a cool-down.
    pub async fn force_restart(&self, purge_credentials: bool) -> RestartOutcome {
        let (reply, rx) = oneshot::channel();
        let msg = Control::Restart {
            purge: purge_credentials,
            reply,
        };
        if self.control.send(msg).is_err() {
            return RestartOutcome::Stopped;
        }
        rx.await.unwrap_or(RestartOutcome::Stopped)
    }

    /// Stop the actor and close the session handle.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.control.send(Control::Shutdown(reply)).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn currently_connected(&self) -> bool {
        self.state.borrow().connected()
    }

    /// QR artifact captured during the current attempt, if any.
    pub fn latest_qr_artifact(&self) -> Option<String> {
        self.state.borrow().last_qr.clone()
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn subscribe_transitions(&self) -> broadcast::Receiver<PhaseTransition> {
        self.transitions.subscribe()
    }

    fn connected_handle(&self) -> BridgeResult<Arc<dyn SessionHandle>> {
        if !self.currently_connected() {
            return Err(BridgeError::NotConnected);
        }
        self.handle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(BridgeError::NotConnected)
    }

    pub async fn send_text(&self, to: &str, body: &str) -> BridgeResult<()> {
        let handle = self.connected_handle()?;
        handle
            .send_text(to, body)
            .await
            .map_err(|e| BridgeError::Session(format!("{:#}", e)))
    }

    pub async fn send_image(
        &self,
        to: &str,
        source: &MediaSource,
        filename: &str,
        caption: Option<&str>,
    ) -> BridgeResult<()> {
        let handle = self.connected_handle()?;
        handle
            .send_image(to, source, filename, caption)
            .await
            .map_err(|e| BridgeError::Session(format!("{:#}", e)))
    }

    pub async fn send_file(
        &self,
        to: &str,
        source: &MediaSource,
        filename: &str,
        caption: Option<&str>,
    ) -> BridgeResult<()> {
        let handle = self.connected_handle()?;
        handle
            .send_file(to, source, filename, caption)
            .await
            .map_err(|e| BridgeError::Session(format!("{:#}", e)))
    }

    pub async fn decrypt_media(&self, event: &InboundEvent) -> BridgeResult<Option<Vec<u8>>> {
        let handle = self.connected_handle()?;
        handle
            .decrypt_media(event)
            .await
            .map_err(|e| BridgeError::MediaProcessing(format!("decryption failed: {:#}", e)))
    }
}

struct Actor {
    engine: Arc<dyn SessionEngine>,
    settings: SessionSettings,
    control: mpsc::WeakUnboundedSender<Control>,
    signals: mpsc::UnboundedSender<(u64, SinkSignal)>,
    messages: mpsc::Sender<InboundEvent>,
    state_tx: watch::Sender<SessionState>,
    transitions: broadcast::Sender<PhaseTransition>,
    handle: SharedHandle,
    state: SessionState,
    generation: u64,
    health: Option<JoinHandle<()>>,
    /// Connect attempt, retry timer or restart sequence in flight.
    pending: Option<JoinHandle<()>>,
}

impl Actor {
    async fn run(
        mut self,
        mut control_rx: mpsc::UnboundedReceiver<Control>,
        mut signal_rx: mpsc::UnboundedReceiver<(u64, SinkSignal)>,
    ) {
        loop {
            tokio::select! {
                msg = control_rx.recv() => match msg {
                    Some(Control::Shutdown(reply)) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(msg) => self.on_control(msg),
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                Some((generation, signal)) = signal_rx.recv() => {
                    self.on_signal(generation, signal);
                }
            }
        }
        debug!("session manager stopped");
    }

    fn on_control(&mut self, msg: Control) {
        match msg {
            Control::Start(reply) => {
                let outcome = self.on_start();
                let _ = reply.send(outcome);
            }
            Control::Restart { purge, reply } => {
                let outcome = self.on_manual_restart(purge);
                let _ = reply.send(outcome);
            }
            Control::ConnectFinished { generation, result } => {
                self.on_connect_finished(generation, result);
            }
            Control::RetryDue { generation } | Control::RestartDue { generation } => {
                let waiting = matches!(self.state.phase, Phase::Starting | Phase::Restarting);
                if generation == self.generation && waiting {
                    self.begin_attempt();
                }
            }
            Control::ProbeFailed { generation, reason } => {
                if generation == self.generation && self.state.phase == Phase::Connected {
                    warn!("health probe failed: {}; forcing restart", reason);
                    self.restart(Trigger::Probe, false);
                }
            }
            Control::Shutdown(_) => {}
        }
    }

    fn on_start(&mut self) -> StartOutcome {
        match self.state.phase {
            Phase::Idle => {
                self.begin_attempt();
                StartOutcome::Started
            }
            Phase::Starting => {
                debug!("start already in progress");
                StartOutcome::AlreadyStarting
            }
            Phase::Connected => StartOutcome::AlreadyConnected,
            Phase::Disconnected | Phase::Restarting => StartOutcome::Restarting,
            Phase::Failed => {
                warn!(
                    "session failed after {} retries; a manual restart is required",
                    self.state.retry_count
                );
                StartOutcome::Failed
            }
        }
    }

    fn on_manual_restart(&mut self, purge: bool) -> RestartOutcome {
        match self.state.phase {
            Phase::Starting | Phase::Restarting | Phase::Disconnected => {
                info!("restart requested while {}; ignoring", self.state.phase);
                RestartOutcome::AlreadyInProgress
            }
            Phase::Idle | Phase::Connected | Phase::Failed => {
                self.state.retry_count = 0;
                self.restart(Trigger::Manual, purge);
                RestartOutcome::Restarting
            }
        }
    }

    fn begin_attempt(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        self.state.last_qr = None;
        self.transition(Phase::Starting);
        info!(
            "starting session '{}' (retry {}/{})",
            self.settings.session_name, self.state.retry_count, self.settings.retry.max_retries
        );

        let sink = EventSink::new(generation, self.signals.clone(), self.messages.clone());
        let engine = self.engine.clone();
        let name = self.settings.session_name.clone();
        let control = self.control.clone();
        self.pending = Some(tokio::spawn(async move {
            let result = engine.connect(&name, sink).await;
            if let Some(tx) = control.upgrade() {
                let _ = tx.send(Control::ConnectFinished { generation, result });
            }
        }));
    }

    fn on_connect_finished(
        &mut self,
        generation: u64,
        result: anyhow::Result<Arc<dyn SessionHandle>>,
    ) {
        if generation != self.generation || self.state.phase != Phase::Starting {
            if let Ok(handle) = result {
                debug!("closing session from stale attempt {}", generation);
                tokio::spawn(close_handle(handle, self.settings.close_timeout));
            }
            return;
        }
        self.pending = None;

        match result {
            Ok(handle) => {
                *self.handle.write().unwrap_or_else(PoisonError::into_inner) = Some(handle.clone());
                self.state.retry_count = 0;
                self.state.last_qr = None;
                self.state.health_check_active = true;
                self.health = Some(health::spawn_probe(
                    handle,
                    generation,
                    self.settings.health_interval,
                    self.settings.probe_timeout,
                    self.control.clone(),
                ));
                self.transition(Phase::Connected);
                info!("session '{}' connected", self.settings.session_name);
            }
            Err(e) => {
                metrics::counter!(CONNECT_FAILURES_TOTAL).increment(1);
                if !self.settings.retry.allows(self.state.retry_count) {
                    error!(
                        "session connect failed after {} retries, giving up: {:#}",
                        self.state.retry_count, e
                    );
                    self.transition(Phase::Failed);
                    return;
                }
                self.state.retry_count += 1;
                let delay = self.settings.retry.delay_for(self.state.retry_count);
                warn!(
                    "session connect failed (retry {}/{} in {:?}): {:#}",
                    self.state.retry_count, self.settings.retry.max_retries, delay, e
                );
                self.publish();
                self.schedule(delay, Control::RetryDue { generation });
            }
        }
    }

    fn on_signal(&mut self, generation: u64, signal: SinkSignal) {
        if generation != self.generation {
            debug!("ignoring signal from stale attempt {}", generation);
            return;
        }
        match signal {
            SinkSignal::Qr(artifact) => {
                // Pairing codes rotate during an attempt; only the newest scans.
                if self.state.phase == Phase::Starting {
                    if self.state.last_qr.is_some() {
                        debug!("QR artifact refreshed ({} bytes)", artifact.len());
                    } else {
                        info!("QR artifact captured ({} bytes)", artifact.len());
                    }
                    self.state.last_qr = Some(artifact);
                    self.publish();
                } else {
                    debug!("ignoring QR artifact while {}", self.state.phase);
                }
            }
            SinkSignal::State(label) => {
                info!("session state: {}", label);
                if let Connectivity::Terminal { conflict } = Connectivity::classify(&label)
                    && self.state.phase == Phase::Connected
                {
                    warn!("session reported {}; forcing restart", label);
                    let purge = conflict && self.settings.purge_on_conflict;
                    self.restart(Trigger::State, purge);
                }
            }
        }
    }

    /// Tear the session down and schedule the next attempt.
    fn restart(&mut self, trigger: Trigger, purge: bool) {
        metrics::counter!(SESSION_RESTARTS_TOTAL, "trigger" => trigger.as_str()).increment(1);
        self.disarm_health();
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
        if self.state.phase == Phase::Connected {
            self.transition(Phase::Disconnected);
        }
        let handle = self
            .handle
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        self.generation += 1;
        let generation = self.generation;
        self.transition(Phase::Restarting);

        let cooldown = if trigger == Trigger::Manual {
            Duration::ZERO
        } else {
            self.settings.restart_cooldown
        };
        let purge_dir = purge.then(|| {
            self.settings
                .credentials_dir
                .join(&self.settings.session_name)
        });
        let close_timeout = self.settings.close_timeout;
        let control = self.control.clone();
        info!(
            "restarting session in {:?} (trigger: {})",
            cooldown,
            trigger.as_str()
        );
        self.pending = Some(tokio::spawn(async move {
            if let Some(handle) = handle {
                close_handle(handle, close_timeout).await;
            }
            if let Some(dir) = purge_dir {
                purge_credentials(&dir).await;
            }
            tokio::time::sleep(cooldown).await;
            if let Some(tx) = control.upgrade() {
                let _ = tx.send(Control::RestartDue { generation });
            }
        }));
    }

    fn schedule(&mut self, delay: Duration, msg: Control) {
        let control = self.control.clone();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = control.upgrade() {
                let _ = tx.send(msg);
            }
        }));
    }

    fn disarm_health(&mut self) {
        if let Some(probe) = self.health.take() {
            probe.abort();
        }
        self.state.health_check_active = false;
    }

    async fn shutdown(&mut self) {
        self.disarm_health();
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
        self.generation += 1;
        self.transition(Phase::Idle);
        let handle = self
            .handle
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            close_handle(handle, self.settings.close_timeout).await;
        }
    }

    /// Move to `to` and publish the full snapshot before announcing the change.
    fn transition(&mut self, to: Phase) {
        let from = self.state.phase;
        self.state.phase = to;
        self.publish();
        if from != to {
            info!("session phase {} -> {}", from, to);
            let _ = self.transitions.send(PhaseTransition { from, to });
        }
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
    }
}

async fn close_handle(handle: Arc<dyn SessionHandle>, timeout: Duration) {
    match tokio::time::timeout(timeout, handle.close()).await {
        Ok(Ok(())) => debug!("session handle closed"),
        Ok(Err(e)) => warn!("failed to close session handle: {:#}", e),
        Err(_) => warn!("closing session handle timed out after {:?}", timeout),
    }
}

async fn purge_credentials(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => warn!("purged session credentials at {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("no session credentials at {}", dir.display());
        }
        Err(e) => warn!("failed to purge credentials at {}: {}", dir.display(), e),
    }
}
