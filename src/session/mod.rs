//! Session lifecycle: the engine seam and the manager that keeps it connected.
//!
//! The chat-session engine is an external collaborator. It is reached through
//! two traits: [`SessionEngine`] establishes a session and [`SessionHandle`]
//! operates on an established one. Asynchronous callbacks from the engine
//! (QR capture, state changes, inbound messages) are delivered through an
//! [`EventSink`] handed to `connect`, which feeds them into the manager's
//! serialized control loop and the inbound message queue.

pub mod manager;
pub mod retry;
pub mod state;

pub use manager::{RestartOutcome, SessionManager, SessionSettings, StartOutcome};
pub use retry::RetryPolicy;
pub use state::{Phase, PhaseTransition, SessionState};

use crate::events::InboundEvent;
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Where an outbound attachment comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// Publicly reachable URL the engine downloads itself.
    Url(String),
    /// File staged on local disk.
    Path(PathBuf),
}

/// Establishes sessions. `connect` resolves once the session is logged in;
/// an error is a startup failure.
#[async_trait]
pub trait SessionEngine: Send + Sync {
    async fn connect(&self, session_name: &str, sink: EventSink)
    -> Result<Arc<dyn SessionHandle>>;
}

/// Operations on an established session.
///
/// Implementations must fail (not hang) once the session is closed.
#[async_trait]
pub trait SessionHandle: Send + Sync {
    async fn send_text(&self, to: &str, body: &str) -> Result<()>;

    async fn send_image(
        &self,
        to: &str,
        source: &MediaSource,
        filename: &str,
        caption: Option<&str>,
    ) -> Result<()>;

    async fn send_file(
        &self,
        to: &str,
        source: &MediaSource,
        filename: &str,
        caption: Option<&str>,
    ) -> Result<()>;

    /// Decrypted media bytes for `event`, or `None` when the session has none.
    async fn decrypt_media(&self, event: &InboundEvent) -> Result<Option<Vec<u8>>>;

    /// Raw connectivity label as the engine reports it (e.g. `CONNECTED`).
    async fn connection_state(&self) -> Result<String>;

    async fn close(&self) -> Result<()>;
}

/// How a connectivity label affects the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Connected,
    /// The session is gone. `conflict` marks a duplicate-instance takeover.
    Terminal { conflict: bool },
    /// Opening, pairing, syncing and anything else in between.
    Transient,
}

const TERMINAL_LABELS: &[&str] = &[
    "CONFLICT",
    "UNPAIRED",
    "UNLAUNCHED",
    "DISCONNECTED",
    "TIMEOUT",
];

impl Connectivity {
    /// Classify an engine state label. Matching is by substring, so variants
    /// such as `UNPAIRED_IDLE` count as terminal.
    pub fn classify(label: &str) -> Self {
        let label = label.trim().to_ascii_uppercase();
        if TERMINAL_LABELS.iter().any(|t| label.contains(t)) {
            return Self::Terminal {
                conflict: label.contains("CONFLICT"),
            };
        }
        if label.contains("CONNECTED") {
            Self::Connected
        } else {
            Self::Transient
        }
    }
}

pub(crate) enum SinkSignal {
    Qr(String),
    State(String),
}

/// Callback side of a session attempt.
///
/// Every sink is stamped with the attempt's generation, so signals from a
/// torn-down session cannot disturb a newer one.
#[derive(Clone)]
pub struct EventSink {
    generation: u64,
    signals: mpsc::UnboundedSender<(u64, SinkSignal)>,
    messages: mpsc::Sender<InboundEvent>,
}

impl EventSink {
    pub(crate) fn new(
        generation: u64,
        signals: mpsc::UnboundedSender<(u64, SinkSignal)>,
        messages: mpsc::Sender<InboundEvent>,
    ) -> Self {
        Self {
            generation,
            signals,
            messages,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn qr_captured(&self, artifact: String) {
        let _ = self
            .signals
            .send((self.generation, SinkSignal::Qr(artifact)));
    }

    pub fn state_changed(&self, label: String) {
        let _ = self
            .signals
            .send((self.generation, SinkSignal::State(label)));
    }

    /// Queue an inbound message for the pipeline. Waits when the queue is full.
    pub async fn message(&self, event: InboundEvent) {
        if self.messages.send(event).await.is_err() {
            warn!("inbound message dropped: pipeline queue closed");
        }
    }
}
