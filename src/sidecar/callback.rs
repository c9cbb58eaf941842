//! Receiver for sidecar callbacks (QR codes, state labels, inbound messages).

use crate::events::{ChatKind, ContentKind, InboundEvent};
use crate::session::EventSink;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::{Arc, PoisonError, RwLock};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

pub const CALLBACK_PATH: &str = "/internal/session/events";

/// Max callback payload size: 1 MB.
const CALLBACK_MAX_BODY: usize = 1_048_576;

/// Holds the sink of the current connection attempt.
#[derive(Default)]
pub struct CallbackRegistry {
    sink: RwLock<Option<EventSink>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, sink: EventSink) {
        debug!("callback sink registered for attempt {}", sink.generation());
        *self.sink.write().unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    pub(crate) fn current(&self) -> Option<EventSink> {
        self.sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum SidecarEvent {
    Qr { data: String },
    State { state: String },
    Message { message: SidecarMessage },
}

#[derive(Debug, Deserialize)]
struct SidecarMessage {
    id: String,
    from: String,
    #[serde(default, rename = "chatId")]
    chat_id: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    mimetype: Option<String>,
}

impl SidecarMessage {
    fn into_event(self) -> InboundEvent {
        let chat_id = self.chat_id.as_deref().unwrap_or(&self.from);
        let chat_kind = ChatKind::from_chat_id(chat_id);
        let content_kind = ContentKind::from_label(&self.kind);
        // Media messages carry a thumbnail in `body`; only text keeps it.
        let body = if content_kind == ContentKind::Text {
            self.body
        } else {
            None
        };
        InboundEvent {
            media_ref: content_kind.is_media().then(|| self.id.clone()),
            message_id: self.id,
            sender_id: self.from,
            chat_kind,
            content_kind,
            body,
            mime_type: self.mimetype.filter(|m| !m.trim().is_empty()),
        }
    }
}

#[derive(Clone)]
struct CallbackState {
    registry: Arc<CallbackRegistry>,
    secret: Arc<str>,
}

/// Router for the sidecar callback endpoint. When `secret` is non-empty every
/// callback must carry a valid `X-Signature-256` HMAC of its body.
pub fn callback_router(registry: Arc<CallbackRegistry>, secret: &str) -> Router {
    let state = CallbackState {
        registry,
        secret: Arc::from(secret),
    };
    Router::new()
        .route(CALLBACK_PATH, post(callback_handler))
        .with_state(state)
}

/// Validate an HMAC-SHA256 signature (raw hex or `sha256=` prefixed) against a payload.
pub(crate) fn validate_signature(secret: &str, signature: &str, body: &[u8]) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());
    let sig = signature.strip_prefix("sha256=").unwrap_or(signature);
    expected.as_bytes().ct_eq(sig.as_bytes()).into()
}

async fn callback_handler(
    State(state): State<CallbackState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if body.len() > CALLBACK_MAX_BODY {
        warn!("sidecar callback too large ({} bytes)", body.len());
        return StatusCode::PAYLOAD_TOO_LARGE;
    }

    if !state.secret.is_empty() {
        let Some(signature) = headers
            .get("X-Signature-256")
            .and_then(|v| v.to_str().ok())
        else {
            warn!("sidecar callback: missing signature header");
            return StatusCode::FORBIDDEN;
        };
        if !validate_signature(&state.secret, signature, &body) {
            warn!("sidecar callback: invalid signature");
            return StatusCode::FORBIDDEN;
        }
    }

    let event: SidecarEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!("sidecar callback: malformed payload: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };

    let Some(sink) = state.registry.current() else {
        debug!("sidecar callback before any session attempt; ignoring");
        return StatusCode::SERVICE_UNAVAILABLE;
    };

    match event {
        SidecarEvent::Qr { data } => sink.qr_captured(data),
        SidecarEvent::State { state } => sink.state_changed(state),
        SidecarEvent::Message { message } => sink.message(message.into_event()).await,
    }
    StatusCode::NO_CONTENT
}
