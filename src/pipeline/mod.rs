//! Inbound message ingestion: filter, classify, persist media, then audit
//! and forward one normalized record per accepted event.

pub mod audit;
pub mod forwarder;
pub mod media;
mod record;

pub use audit::AuditLog;
pub use forwarder::{ForwardingFailure, WebhookForwarder};
pub use media::{MediaStore, StoredMedia, extension_for_mime};
pub use record::NormalizedRecord;

use crate::errors::BridgeResult;
use crate::events::{ChatKind, ContentKind, InboundEvent, sanitize_sender};
use crate::session::SessionManager;
use crate::utils::metrics::INBOUND_EVENTS_TOTAL;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Source of decrypted media bytes for an inbound event.
#[async_trait]
pub trait MediaDecryptor: Send + Sync {
    async fn decrypt_media(&self, event: &InboundEvent) -> BridgeResult<Option<Vec<u8>>>;
}

#[async_trait]
impl MediaDecryptor for SessionManager {
    async fn decrypt_media(&self, event: &InboundEvent) -> BridgeResult<Option<Vec<u8>>> {
        SessionManager::decrypt_media(self, event).await
    }
}

/// Why an event produced no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NonDirectChat(ChatKind),
    UnsupportedKind(ContentKind),
    MissingMimeType,
    NoMediaPayload,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonDirectChat(kind) => write!(f, "{:?} chat", kind),
            Self::UnsupportedKind(kind) => write!(f, "unsupported kind {}", kind),
            Self::MissingMimeType => f.write_str("media without mimetype"),
            Self::NoMediaPayload => f.write_str("decryption yielded no payload"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Audited (and handed to the forwarder); carries the stamped record.
    Recorded(NormalizedRecord),
    Dropped(DropReason),
}

impl ProcessOutcome {
    pub fn record(&self) -> Option<&NormalizedRecord> {
        match self {
            Self::Recorded(record) => Some(record),
            Self::Dropped(_) => None,
        }
    }
}

pub struct Pipeline {
    decryptor: Arc<dyn MediaDecryptor>,
    media: Arc<MediaStore>,
    audit: Arc<AuditLog>,
    forwarder: Arc<WebhookForwarder>,
}

impl Pipeline {
    pub fn new(
        decryptor: Arc<dyn MediaDecryptor>,
        media: Arc<MediaStore>,
        audit: Arc<AuditLog>,
        forwarder: Arc<WebhookForwarder>,
    ) -> Self {
        Self {
            decryptor,
            media,
            audit,
            forwarder,
        }
    }

    /// Consume inbound events one at a time until the queue closes. Audit
    /// order therefore matches arrival order.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<InboundEvent>) {
        info!("inbound pipeline started");
        while let Some(event) = events.recv().await {
            self.process(event).await;
        }
        info!("inbound pipeline stopped");
    }

    /// Turn one event into at most one record. Never fails: processing errors
    /// become error records.
    pub async fn process(&self, event: InboundEvent) -> ProcessOutcome {
        let from = sanitize_sender(&event.sender_id);
        let record = match self.classify(&from, &event).await {
            Ok(record) => record,
            Err(reason) => {
                debug!("dropping message {} from {}: {}", event.message_id, from, reason);
                metrics::counter!(INBOUND_EVENTS_TOTAL, "outcome" => "dropped").increment(1);
                return ProcessOutcome::Dropped(reason);
            }
        };

        let outcome = if record.is_error() { "error" } else { "forwarded" };
        metrics::counter!(INBOUND_EVENTS_TOTAL, "outcome" => outcome).increment(1);

        let stamped = self.audit.append(record);
        self.forwarder.forward(stamped.clone());
        ProcessOutcome::Recorded(stamped)
    }

    async fn classify(
        &self,
        from: &str,
        event: &InboundEvent,
    ) -> Result<NormalizedRecord, DropReason> {
        if event.chat_kind != ChatKind::Direct {
            return Err(DropReason::NonDirectChat(event.chat_kind));
        }
        let kind = event.content_kind;
        if kind.is_unsupported() {
            return Err(DropReason::UnsupportedKind(kind));
        }
        if kind == ContentKind::Text {
            return Ok(NormalizedRecord::text(
                from,
                event.body.as_deref().unwrap_or_default(),
            ));
        }
        if !kind.is_media() {
            return Err(DropReason::UnsupportedKind(kind));
        }

        let Some(mime) = event.mime_type.as_deref() else {
            return Err(DropReason::MissingMimeType);
        };
        let bytes = match self.decryptor.decrypt_media(event).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Err(DropReason::NoMediaPayload),
            Err(e) => {
                warn!("media decryption failed for {}: {}", event.message_id, e);
                return Ok(NormalizedRecord::failed(from, kind, e.to_string()));
            }
        };

        let extension = extension_for_mime(mime);
        match self.media.persist(from, extension, &bytes).await {
            Ok(stored) => Ok(NormalizedRecord::media(from, kind, mime, &stored)),
            Err(e) => {
                warn!("failed to persist media {}: {:#}", event.message_id, e);
                Ok(NormalizedRecord::failed(
                    from,
                    kind,
                    format!("media persistence failed: {:#}", e),
                ))
            }
        }
    }
}
