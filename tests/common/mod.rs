// Shared test helpers; not all items are used by every test binary.
#![allow(unused)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use wabridge::events::InboundEvent;
use wabridge::session::{
    EventSink, MediaSource, Phase, RetryPolicy, SessionEngine, SessionHandle, SessionManager,
    SessionSettings,
};

/// What the next `connect` call does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Connect,
    Fail,
    /// Publish a QR artifact and never finish.
    AwaitScan,
}

#[derive(Default)]
pub struct ScriptedHandle {
    pub label: Mutex<String>,
    pub sent: Mutex<Vec<String>>,
    pub media: Mutex<HashMap<String, Vec<u8>>>,
    pub closed: AtomicBool,
}

impl ScriptedHandle {
    pub fn set_label(&self, label: &str) {
        *self.label.lock().unwrap() = label.to_string();
    }

    pub fn add_media(&self, message_id: &str, bytes: &[u8]) {
        self.media
            .lock()
            .unwrap()
            .insert(message_id.to_string(), bytes.to_vec());
    }

    fn ensure_open(&self) -> anyhow::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            anyhow::bail!("session closed");
        }
        Ok(())
    }
}

#[async_trait]
impl SessionHandle for ScriptedHandle {
    async fn send_text(&self, to: &str, body: &str) -> anyhow::Result<()> {
        self.ensure_open()?;
        self.sent.lock().unwrap().push(format!("text {} {}", to, body));
        Ok(())
    }

    async fn send_image(
        &self,
        to: &str,
        _source: &MediaSource,
        filename: &str,
        _caption: Option<&str>,
    ) -> anyhow::Result<()> {
        self.ensure_open()?;
        self.sent
            .lock()
            .unwrap()
            .push(format!("image {} {}", to, filename));
        Ok(())
    }

    async fn send_file(
        &self,
        to: &str,
        _source: &MediaSource,
        filename: &str,
        _caption: Option<&str>,
    ) -> anyhow::Result<()> {
        self.ensure_open()?;
        self.sent
            .lock()
            .unwrap()
            .push(format!("file {} {}", to, filename));
        Ok(())
    }

    async fn decrypt_media(&self, event: &InboundEvent) -> anyhow::Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.media.lock().unwrap().get(&event.message_id).cloned())
    }

    async fn connection_state(&self) -> anyhow::Result<String> {
        self.ensure_open()?;
        let label = self.label.lock().unwrap().clone();
        Ok(if label.is_empty() {
            "CONNECTED".to_string()
        } else {
            label
        })
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Engine that follows a script of [`Step`]s; once the script runs out every
/// attempt connects. Each successful attempt gets a fresh handle.
#[derive(Default)]
pub struct ScriptedEngine {
    script: Mutex<VecDeque<Step>>,
    pub connect_delay: Duration,
    pub connects: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub handles: Mutex<Vec<Arc<ScriptedHandle>>>,
    pub sinks: Mutex<Vec<EventSink>>,
}

impl ScriptedEngine {
    pub fn new(steps: &[Step]) -> Self {
        Self {
            script: Mutex::new(steps.iter().copied().collect()),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn latest_handle(&self) -> Arc<ScriptedHandle> {
        self.handles.lock().unwrap().last().cloned().unwrap()
    }

    pub fn latest_sink(&self) -> EventSink {
        self.sinks.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl SessionEngine for ScriptedEngine {
    async fn connect(
        &self,
        _session_name: &str,
        sink: EventSink,
    ) -> anyhow::Result<Arc<dyn SessionHandle>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.sinks.lock().unwrap().push(sink.clone());

        tokio::time::sleep(self.connect_delay).await;
        let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Connect);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match step {
            Step::Connect => {
                let handle = Arc::new(ScriptedHandle::default());
                self.handles.lock().unwrap().push(handle.clone());
                Ok(handle)
            }
            Step::Fail => anyhow::bail!("browser failed to launch"),
            Step::AwaitScan => {
                sink.qr_captured("data:image/png;base64,SCANME".into());
                std::future::pending().await
            }
        }
    }
}

pub fn settings(credentials_dir: &Path) -> SessionSettings {
    SessionSettings {
        session_name: "it".into(),
        credentials_dir: credentials_dir.to_path_buf(),
        retry: RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        },
        health_interval: Duration::from_secs(30),
        probe_timeout: Duration::from_secs(10),
        restart_cooldown: Duration::from_secs(10),
        close_timeout: Duration::from_secs(5),
        purge_on_conflict: true,
    }
}

pub fn spawn_manager(
    engine: Arc<ScriptedEngine>,
    credentials_dir: &Path,
) -> (SessionManager, mpsc::Receiver<InboundEvent>) {
    SessionManager::spawn(engine, settings(credentials_dir))
}

/// Wait (on virtual or real time) until the manager reaches `phase`.
pub async fn wait_for_phase(manager: &SessionManager, phase: Phase) {
    let mut rx = manager.subscribe();
    tokio::time::timeout(
        Duration::from_secs(600),
        rx.wait_for(|state| state.phase == phase),
    )
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", phase))
    .unwrap();
}
