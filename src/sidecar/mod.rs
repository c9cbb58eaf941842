//! Session engine backed by an HTTP sidecar process.
//!
//! The sidecar hosts the actual chat session (browser or protocol client).
//! We drive it over a small JSON API and receive its callbacks on
//! `/internal/session/events`, see [`callback`].

pub mod callback;

pub use callback::{CALLBACK_PATH, CallbackRegistry, callback_router};

use crate::config::Config;
use crate::events::InboundEvent;
use crate::session::{EventSink, MediaSource, SessionEngine, SessionHandle};
use crate::utils::http::{http_client, limited_body};
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use base64::Engine as _;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

pub struct SidecarEngine {
    client: Client,
    base_url: Url,
    callback_url: String,
    connect_timeout: Duration,
    max_media_bytes: usize,
    registry: Arc<CallbackRegistry>,
}

impl SidecarEngine {
    pub fn new(
        sidecar_url: &str,
        callback_url: String,
        connect_timeout: Duration,
        request_timeout: Duration,
        max_media_bytes: usize,
        registry: Arc<CallbackRegistry>,
    ) -> Result<Self> {
        let base_url = Url::parse(sidecar_url)
            .with_context(|| format!("invalid sidecar URL: {}", sidecar_url))?;
        if base_url.cannot_be_a_base() {
            bail!("sidecar URL cannot be a base: {}", sidecar_url);
        }
        Ok(Self {
            client: http_client(request_timeout),
            base_url,
            callback_url,
            connect_timeout,
            max_media_bytes,
            registry,
        })
    }

    pub fn from_config(config: &Config, registry: Arc<CallbackRegistry>) -> Result<Self> {
        Self::new(
            &config.engine.sidecar_url,
            format!("{}{}", config.public_base_url(), CALLBACK_PATH),
            Duration::from_secs(config.engine.connect_timeout_secs),
            Duration::from_secs(config.engine.request_timeout_secs),
            config.media.max_bytes,
            registry,
        )
    }
}

/// `<base>/sessions/<session>/<op>`, with the session name percent-encoded.
fn session_url(base: &Url, session: &str, op: &str) -> Url {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push("sessions").push(session).push(op);
    }
    url
}

async fn ensure_success(response: Response, what: &str) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown".to_string());
    Err(anyhow!("sidecar {} failed ({}): {}", what, status, body))
}

#[async_trait]
impl SessionEngine for SidecarEngine {
    async fn connect(&self, session_name: &str, sink: EventSink) -> Result<Arc<dyn SessionHandle>> {
        // Register first: the sidecar reports QR codes while `start` is pending.
        self.registry.register(sink);

        let url = session_url(&self.base_url, session_name, "start");
        info!("requesting sidecar session '{}'", session_name);
        let response = self
            .client
            .post(url)
            .timeout(self.connect_timeout)
            .json(&serde_json::json!({ "callbackUrl": self.callback_url }))
            .send()
            .await
            .context("sidecar start request failed")?;
        ensure_success(response, "start").await?;

        Ok(Arc::new(SidecarHandle {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            session: session_name.to_string(),
            max_media_bytes: self.max_media_bytes,
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct SidecarHandle {
    client: Client,
    base_url: Url,
    session: String,
    max_media_bytes: usize,
    closed: AtomicBool,
}

#[derive(Deserialize)]
struct StateResponse {
    state: String,
}

impl SidecarHandle {
    fn url(&self, op: &str) -> Url {
        session_url(&self.base_url, &self.session, op)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            bail!("session '{}' is closed", self.session);
        }
        Ok(())
    }

    async fn post_json(&self, op: &str, body: &serde_json::Value) -> Result<Response> {
        self.ensure_open()?;
        let response = self
            .client
            .post(self.url(op))
            .json(body)
            .send()
            .await
            .with_context(|| format!("sidecar {} request failed", op))?;
        ensure_success(response, op).await
    }

    async fn send_media(
        &self,
        op: &str,
        to: &str,
        source: &MediaSource,
        filename: &str,
        caption: Option<&str>,
    ) -> Result<()> {
        let mut body = serde_json::json!({
            "to": to,
            "filename": filename,
            "caption": caption.unwrap_or_default(),
        });
        match source {
            MediaSource::Url(url) => body["url"] = serde_json::Value::String(url.clone()),
            MediaSource::Path(path) => {
                let bytes = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("failed to read staged file {}", path.display()))?;
                body["base64"] = serde_json::Value::String(
                    base64::engine::general_purpose::STANDARD.encode(bytes),
                );
            }
        }
        self.post_json(op, &body).await?;
        debug!("sidecar {} to {} ({})", op, to, filename);
        Ok(())
    }
}

#[async_trait]
impl SessionHandle for SidecarHandle {
    async fn send_text(&self, to: &str, body: &str) -> Result<()> {
        self.post_json("send-text", &serde_json::json!({ "to": to, "body": body }))
            .await?;
        Ok(())
    }

    async fn send_image(
        &self,
        to: &str,
        source: &MediaSource,
        filename: &str,
        caption: Option<&str>,
    ) -> Result<()> {
        self.send_media("send-image", to, source, filename, caption)
            .await
    }

    async fn send_file(
        &self,
        to: &str,
        source: &MediaSource,
        filename: &str,
        caption: Option<&str>,
    ) -> Result<()> {
        self.send_media("send-file", to, source, filename, caption)
            .await
    }

    async fn decrypt_media(&self, event: &InboundEvent) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        let message_id = event.media_ref.as_deref().unwrap_or(&event.message_id);
        let response = self
            .client
            .post(self.url("decrypt"))
            .json(&serde_json::json!({ "messageId": message_id }))
            .send()
            .await
            .context("sidecar decrypt request failed")?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success(response, "decrypt").await?;
        let bytes = limited_body(response, self.max_media_bytes).await?;
        Ok((!bytes.is_empty()).then_some(bytes))
    }

    async fn connection_state(&self) -> Result<String> {
        self.ensure_open()?;
        let response = self
            .client
            .get(self.url("state"))
            .send()
            .await
            .context("sidecar state request failed")?;
        let response = ensure_success(response, "state").await?;
        let state: StateResponse = response
            .json()
            .await
            .context("sidecar returned malformed state")?;
        Ok(state.state)
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let response = self
            .client
            .post(self.url("close"))
            .send()
            .await
            .context("sidecar close request failed")?;
        ensure_success(response, "close").await?;
        Ok(())
    }
}
