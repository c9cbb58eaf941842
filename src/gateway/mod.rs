//! HTTP API server for the bridge.
//!
//! Public routes report status and branding; everything that touches the
//! session or the audit log sits behind bearer-token auth. The sidecar
//! callback router is merged in unchanged, it carries its own signature check.

pub mod auth;

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::multipart::Field;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tower_http::services::ServeDir;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::dispatch::{DeliveryResult, Dispatcher, FileRef, OutboundRequest, StagedUpload};
use crate::errors::BridgeError;
use crate::pipeline::AuditLog;
use crate::session::{RestartOutcome, SessionManager};
use crate::utils::{ensure_dir, safe_filename};
use auth::{AuthConfig, auth_middleware};

/// Multipart framing allowance on top of the configured upload limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;
/// Hint sent with transient failures such as a send while disconnected.
const RETRY_AFTER_SECS: u64 = 5;

/// Public branding served by `GET /config`. Never includes the access key.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Branding {
    pub company_name: String,
    pub client_id: String,
    pub terms_url: String,
}

impl Branding {
    pub fn from_config(config: &Config) -> Self {
        Self {
            company_name: config.gateway.company_name.clone(),
            client_id: config.gateway.client_id.clone(),
            terms_url: config.gateway.terms_url.clone(),
        }
    }
}

/// Shared state for the API handlers.
#[derive(Clone)]
pub struct AppState {
    pub session: SessionManager,
    pub dispatcher: Arc<Dispatcher>,
    pub audit: Arc<AuditLog>,
    pub branding: Arc<Branding>,
    /// Where multipart uploads are written before dispatch.
    pub staging_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub metrics: Option<PrometheusHandle>,
}

/// Everything the router serves besides [`AppState`].
pub struct RouterParts {
    pub auth: AuthConfig,
    pub uploads_dir: PathBuf,
    /// Extra routes merged as-is (the sidecar callback endpoint).
    pub extra: Router,
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!("request failed: {}", self);
        } else {
            debug!("request rejected: {}", self);
        }
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        if self.is_retryable() {
            let retry_after = [(header::RETRY_AFTER, RETRY_AFTER_SECS.to_string())];
            (status, retry_after, body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

pub fn build_router(state: AppState, parts: RouterParts) -> Router {
    let upload_limit = state.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD);

    let protected = Router::new()
        .route("/send", post(send_handler))
        .route(
            "/send-file",
            post(send_file_handler).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/qr-data", get(qr_handler))
        .route("/restart", post(restart_handler))
        .route("/messages", get(messages_handler))
        .route_layer(middleware::from_fn_with_state(parts.auth, auth_middleware));

    let public = Router::new()
        .route("/status", get(status_handler))
        .route("/config", get(config_handler))
        .route("/api/health", get(health_handler))
        .route("/metrics", get(metrics_handler));

    protected
        .merge(public)
        .with_state(state)
        .nest_service("/uploads", ServeDir::new(parts.uploads_dir))
        .merge(parts.extra)
}

/// Request body for `POST /send`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendRequest {
    pub number: String,
    pub message: Option<String>,
    pub file_url: Option<String>,
    pub filename: Option<String>,
    pub caption: Option<String>,
}

impl SendRequest {
    fn into_outbound(self) -> OutboundRequest {
        OutboundRequest {
            recipient: self.number,
            text: self.message,
            file_url: self.file_url.map(|url| FileRef {
                url,
                filename: self.filename,
                caption: self.caption,
            }),
            upload: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct SendResponse {
    success: bool,
    message: String,
    #[serde(flatten)]
    delivery: DeliveryResult,
}

impl From<DeliveryResult> for SendResponse {
    fn from(delivery: DeliveryResult) -> Self {
        Self {
            success: true,
            message: format!("message sent to {}", delivery.recipient),
            delivery,
        }
    }
}

/// POST /send: text or file-by-URL.
async fn send_handler(
    State(state): State<AppState>,
    body: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<SendResponse>, BridgeError> {
    let Json(body) = body.map_err(|e| BridgeError::InvalidRequest(e.body_text()))?;
    let delivery = state.dispatcher.dispatch(body.into_outbound()).await?;
    Ok(Json(delivery.into()))
}

/// POST /send-file: multipart `number`, optional `caption`, and `file`.
async fn send_file_handler(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut number = String::new();
    let mut caption = None;
    let mut staged: Option<StagedUpload> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                discard(staged.as_ref()).await;
                return BridgeError::InvalidRequest(format!("malformed multipart body: {}", e))
                    .into_response();
            }
        };
        let name = field.name().unwrap_or_default().to_string();
        let outcome = match name.as_str() {
            "number" => field.text().await.map(|t| number = t),
            "caption" => field.text().await.map(|t| caption = Some(t)),
            "file" if staged.is_none() => match stage_field(&state, field).await {
                Ok(upload) => {
                    staged = Some(upload);
                    Ok(())
                }
                Err(resp) => return resp,
            },
            _ => Ok(()),
        };
        if let Err(e) = outcome {
            discard(staged.as_ref()).await;
            return BridgeError::InvalidRequest(format!("unreadable field '{}': {}", name, e))
                .into_response();
        }
    }

    let Some(mut upload) = staged else {
        return BridgeError::InvalidRequest("missing file field".into()).into_response();
    };
    upload.caption = caption.filter(|c| !c.is_empty());

    match state
        .dispatcher
        .dispatch(OutboundRequest::upload(&number, upload))
        .await
    {
        Ok(delivery) => Json(SendResponse::from(delivery)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Stream one file field to the staging dir, enforcing the upload limit.
async fn stage_field(state: &AppState, mut field: Field<'_>) -> Result<StagedUpload, Response> {
    let filename = field
        .file_name()
        .map(safe_filename)
        .filter(|f| !f.trim().is_empty())
        .ok_or_else(|| {
            BridgeError::InvalidRequest("file field has no filename".into()).into_response()
        })?;

    let path = state
        .staging_dir
        .join(format!("{}-{}", Uuid::new_v4(), filename));
    let mut file = open_staged(&state.staging_dir, &path)
        .await
        .map_err(|e| BridgeError::Internal(e).into_response())?;

    let mut written = 0usize;
    loop {
        let chunk: Bytes = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                remove_quietly(&path).await;
                return Err(
                    BridgeError::InvalidRequest(format!("upload interrupted: {}", e))
                        .into_response(),
                );
            }
        };
        written += chunk.len();
        if written > state.max_upload_bytes {
            remove_quietly(&path).await;
            return Err((
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(serde_json::json!({
                    "error": format!("file exceeds {} bytes", state.max_upload_bytes)
                })),
            )
                .into_response());
        }
        if let Err(e) = file.write_all(&chunk).await {
            remove_quietly(&path).await;
            return Err(BridgeError::Internal(
                anyhow::Error::new(e).context("failed to stage upload"),
            )
            .into_response());
        }
    }
    if let Err(e) = file.flush().await {
        remove_quietly(&path).await;
        return Err(
            BridgeError::Internal(anyhow::Error::new(e).context("failed to stage upload"))
                .into_response(),
        );
    }

    if written == 0 {
        remove_quietly(&path).await;
        return Err(BridgeError::InvalidRequest("file is empty".into()).into_response());
    }

    debug!("staged upload {} ({} bytes)", filename, written);
    Ok(StagedUpload {
        path,
        filename,
        caption: None,
    })
}

async fn open_staged(dir: &FsPath, path: &FsPath) -> Result<tokio::fs::File> {
    ensure_dir(dir)?;
    tokio::fs::File::create(path)
        .await
        .with_context(|| format!("failed to create {}", path.display()))
}

async fn discard(upload: Option<&StagedUpload>) {
    if let Some(upload) = upload {
        remove_quietly(&upload.path).await;
    }
}

async fn remove_quietly(path: &FsPath) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!("could not remove {}: {}", path.display(), e);
    }
}

/// GET /status
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.session.snapshot();
    Json(serde_json::json!({
        "connected": snapshot.connected(),
        "phase": snapshot.phase,
    }))
}

/// GET /qr-data
async fn qr_handler(State(state): State<AppState>) -> Response {
    match state.session.latest_qr_artifact() {
        Some(data) => Json(serde_json::json!({ "status": true, "data": data })).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "status": false, "message": "QR not generated yet" })),
        )
            .into_response(),
    }
}

async fn config_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.branding.as_ref().clone())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RestartRequest {
    purge_credentials: bool,
}

/// POST /restart. The body is optional.
async fn restart_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let request: RestartRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RestartRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => {
                return BridgeError::InvalidRequest(format!("invalid restart body: {}", e))
                    .into_response();
            }
        }
    };

    match state.session.force_restart(request.purge_credentials).await {
        RestartOutcome::Restarting => {
            info!(
                "manual restart accepted (purge_credentials={})",
                request.purge_credentials
            );
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({ "restarting": true })),
            )
                .into_response()
        }
        RestartOutcome::AlreadyInProgress => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "error": "restart already in progress" })),
        )
            .into_response(),
        RestartOutcome::Stopped => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": "session manager stopped" })),
        )
            .into_response(),
    }
}

/// GET /messages: the audit log, oldest first.
async fn messages_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.audit.list())
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Bind and serve the API. Returns once the listener is bound.
pub async fn start(
    host: &str,
    port: u16,
    state: AppState,
    parts: RouterParts,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = build_router(state, parts);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("HTTP API listening on {}", addr);

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP API server error: {}", e);
        }
    }))
}

#[cfg(test)]
mod tests;
