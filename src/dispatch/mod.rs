//! Outbound dispatcher: validate a caller's send request and route it to the
//! matching session capability.

use crate::errors::{BridgeError, BridgeResult};
use crate::events::recipient_chat_id;
use crate::session::{MediaSource, SessionManager};
use crate::utils::metrics::OUTBOUND_SENDS_TOTAL;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Send capabilities the dispatcher needs from the session.
#[async_trait]
pub trait OutboundSession: Send + Sync {
    fn currently_connected(&self) -> bool;

    async fn send_text(&self, to: &str, body: &str) -> BridgeResult<()>;

    async fn send_image(
        &self,
        to: &str,
        source: &MediaSource,
        filename: &str,
        caption: Option<&str>,
    ) -> BridgeResult<()>;

    async fn send_file(
        &self,
        to: &str,
        source: &MediaSource,
        filename: &str,
        caption: Option<&str>,
    ) -> BridgeResult<()>;
}

#[async_trait]
impl OutboundSession for SessionManager {
    fn currently_connected(&self) -> bool {
        SessionManager::currently_connected(self)
    }

    async fn send_text(&self, to: &str, body: &str) -> BridgeResult<()> {
        SessionManager::send_text(self, to, body).await
    }

    async fn send_image(
        &self,
        to: &str,
        source: &MediaSource,
        filename: &str,
        caption: Option<&str>,
    ) -> BridgeResult<()> {
        SessionManager::send_image(self, to, source, filename, caption).await
    }

    async fn send_file(
        &self,
        to: &str,
        source: &MediaSource,
        filename: &str,
        caption: Option<&str>,
    ) -> BridgeResult<()> {
        SessionManager::send_file(self, to, source, filename, caption).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaCategory {
    Image,
    Document,
    Audio,
    Video,
}

/// Which session capability a category is sent with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SendCapability {
    Image,
    File,
}

const CATEGORY_TABLE: &[(&str, MediaCategory)] = &[
    ("jpg", MediaCategory::Image),
    ("jpeg", MediaCategory::Image),
    ("png", MediaCategory::Image),
    ("gif", MediaCategory::Image),
    ("webp", MediaCategory::Image),
    ("pdf", MediaCategory::Document),
    ("doc", MediaCategory::Document),
    ("docx", MediaCategory::Document),
    ("xls", MediaCategory::Document),
    ("xlsx", MediaCategory::Document),
    ("ppt", MediaCategory::Document),
    ("pptx", MediaCategory::Document),
    ("txt", MediaCategory::Document),
    ("csv", MediaCategory::Document),
    ("zip", MediaCategory::Document),
    ("mp3", MediaCategory::Audio),
    ("ogg", MediaCategory::Audio),
    ("opus", MediaCategory::Audio),
    ("wav", MediaCategory::Audio),
    ("m4a", MediaCategory::Audio),
    ("aac", MediaCategory::Audio),
    ("mp4", MediaCategory::Video),
    ("3gp", MediaCategory::Video),
    ("mov", MediaCategory::Video),
];

impl MediaCategory {
    /// Category for a file name's extension (case-insensitive).
    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = Path::new(filename).extension()?.to_str()?.to_ascii_lowercase();
        CATEGORY_TABLE
            .iter()
            .find(|(e, _)| *e == ext)
            .map(|(_, category)| *category)
    }

    pub fn capability(self) -> SendCapability {
        match self {
            Self::Image => SendCapability::Image,
            Self::Document | Self::Audio | Self::Video => SendCapability::File,
        }
    }
}

/// A file the session downloads from a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub url: String,
    /// Name shown to the recipient; derived from the URL path when absent.
    pub filename: Option<String>,
    pub caption: Option<String>,
}

/// A file uploaded by the caller and staged on local disk. Removed after dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedUpload {
    pub path: PathBuf,
    pub filename: String,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundRequest {
    pub recipient: String,
    pub text: Option<String>,
    pub file_url: Option<FileRef>,
    pub upload: Option<StagedUpload>,
}

impl OutboundRequest {
    pub fn text(recipient: &str, body: &str) -> Self {
        Self {
            recipient: recipient.to_string(),
            text: Some(body.to_string()),
            ..Self::default()
        }
    }

    pub fn file_url(recipient: &str, file: FileRef) -> Self {
        Self {
            recipient: recipient.to_string(),
            file_url: Some(file),
            ..Self::default()
        }
    }

    pub fn upload(recipient: &str, upload: StagedUpload) -> Self {
        Self {
            recipient: recipient.to_string(),
            upload: Some(upload),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryKind {
    Text,
    Image,
    File,
}

impl DeliveryKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryResult {
    /// Session chat id the message went to.
    pub recipient: String,
    pub kind: DeliveryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// Fully validated request, ready to hit the session.
enum Plan {
    Text(String),
    Media {
        source: MediaSource,
        filename: String,
        caption: Option<String>,
        capability: SendCapability,
    },
}

pub struct Dispatcher {
    session: Arc<dyn OutboundSession>,
}

impl Dispatcher {
    pub fn new(session: Arc<dyn OutboundSession>) -> Self {
        Self { session }
    }

    /// Validate and send. A staged upload is removed afterwards whatever the
    /// outcome; removal failures are only logged.
    pub async fn dispatch(&self, request: OutboundRequest) -> BridgeResult<DeliveryResult> {
        let staged = request.upload.as_ref().map(|u| u.path.clone());
        let result = self.dispatch_inner(request).await;
        if let Some(path) = staged {
            remove_staged(&path).await;
        }
        result
    }

    async fn dispatch_inner(&self, request: OutboundRequest) -> BridgeResult<DeliveryResult> {
        let (to, plan) = plan(request)?;
        if !self.session.currently_connected() {
            return Err(BridgeError::NotConnected);
        }

        let result = match plan {
            Plan::Text(body) => {
                self.session.send_text(&to, &body).await?;
                DeliveryResult {
                    recipient: to,
                    kind: DeliveryKind::Text,
                    filename: None,
                }
            }
            Plan::Media {
                source,
                filename,
                caption,
                capability,
            } => {
                let kind = match capability {
                    SendCapability::Image => {
                        self.session
                            .send_image(&to, &source, &filename, caption.as_deref())
                            .await?;
                        DeliveryKind::Image
                    }
                    SendCapability::File => {
                        self.session
                            .send_file(&to, &source, &filename, caption.as_deref())
                            .await?;
                        DeliveryKind::File
                    }
                };
                DeliveryResult {
                    recipient: to,
                    kind,
                    filename: Some(filename),
                }
            }
        };

        metrics::counter!(OUTBOUND_SENDS_TOTAL, "kind" => result.kind.as_str()).increment(1);
        info!("sent {} to {}", result.kind.as_str(), result.recipient);
        Ok(result)
    }
}

fn plan(request: OutboundRequest) -> BridgeResult<(String, Plan)> {
    let to = recipient_chat_id(&request.recipient)
        .ok_or_else(|| BridgeError::InvalidRequest("recipient is required".into()))?;

    let text = request.text.filter(|t| !t.trim().is_empty());
    let payloads = usize::from(text.is_some())
        + usize::from(request.file_url.is_some())
        + usize::from(request.upload.is_some());
    if payloads != 1 {
        return Err(BridgeError::InvalidRequest(
            "exactly one of message, fileUrl or file is required".into(),
        ));
    }

    if let Some(body) = text {
        return Ok((to, Plan::Text(body)));
    }

    let (source, filename, caption) = if let Some(file) = request.file_url {
        let url = parse_file_url(&file.url)?;
        let filename = match file.filename.filter(|f| !f.trim().is_empty()) {
            Some(name) => name,
            None => filename_from_url(&url)?,
        };
        (MediaSource::Url(file.url), filename, file.caption)
    } else if let Some(upload) = request.upload {
        (MediaSource::Path(upload.path), upload.filename, upload.caption)
    } else {
        return Err(BridgeError::InvalidRequest("missing payload".into()));
    };

    let category = MediaCategory::from_filename(&filename).ok_or_else(|| {
        BridgeError::UnsupportedMediaType(format!("cannot send '{}'", filename))
    })?;
    debug!("routing {} as {:?}", filename, category);

    Ok((
        to,
        Plan::Media {
            source,
            filename,
            caption: caption.filter(|c| !c.is_empty()),
            capability: category.capability(),
        },
    ))
}

/// The session fetches file URLs itself, so only remote http(s) sources are
/// accepted whether or not the caller names the file.
fn parse_file_url(raw: &str) -> BridgeResult<url::Url> {
    let url = url::Url::parse(raw)
        .map_err(|e| BridgeError::InvalidRequest(format!("invalid fileUrl: {}", e)))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(BridgeError::InvalidRequest("fileUrl must be http or https".into()));
    }
    Ok(url)
}

fn filename_from_url(url: &url::Url) -> BridgeResult<String> {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| BridgeError::InvalidRequest("fileUrl has no file name".into()))
}

async fn remove_staged(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("removed staged upload {}", path.display()),
        Err(e) => warn!("failed to remove staged upload {}: {}", path.display(), e),
    }
}
