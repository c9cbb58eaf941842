use super::media::StoredMedia;
use crate::events::ContentKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the webhook consumer receives for one accepted inbound event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    /// Sender id reduced to digits.
    pub from: String,
    #[serde(rename = "type")]
    pub kind: ContentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, rename = "fileUrl", skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    /// Stamped by the audit log on insertion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NormalizedRecord {
    fn base(from: &str, kind: ContentKind) -> Self {
        Self {
            from: from.to_string(),
            kind,
            text: None,
            mimetype: None,
            filename: None,
            file_url: None,
            timestamp: None,
            error: None,
        }
    }

    pub fn text(from: &str, body: &str) -> Self {
        Self {
            text: Some(body.to_string()),
            ..Self::base(from, ContentKind::Text)
        }
    }

    pub fn media(from: &str, kind: ContentKind, mimetype: &str, stored: &StoredMedia) -> Self {
        Self {
            mimetype: Some(mimetype.to_string()),
            filename: Some(stored.filename.clone()),
            file_url: Some(stored.url.clone()),
            ..Self::base(from, kind)
        }
    }

    /// Record of an event whose processing failed. Carries no text or file.
    pub fn failed(from: &str, kind: ContentKind, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::base(from, kind)
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
