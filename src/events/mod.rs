//! Inbound events as reported by the underlying session.

use serde::{Deserialize, Serialize};

/// Suffix the session uses for direct (one-to-one) chat ids.
pub const DIRECT_SUFFIX: &str = "@c.us";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Direct,
    Group,
    Broadcast,
}

impl ChatKind {
    /// Classify a chat by its id suffix, the one signal every session event carries.
    pub fn from_chat_id(chat_id: &str) -> Self {
        let domain = chat_id.rsplit_once('@').map_or("", |(_, d)| d);
        match domain {
            "g.us" => Self::Group,
            "broadcast" => Self::Broadcast,
            _ if chat_id.starts_with("status@") => Self::Broadcast,
            _ => Self::Direct,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Sticker,
    Location,
    Vcard,
    Other,
}

impl ContentKind {
    /// Map the session's message type label onto a content kind.
    ///
    /// Push-to-talk voice notes (`ptt`) are audio; `chat` is the session's
    /// label for plain text.
    pub fn from_label(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "chat" | "text" => Self::Text,
            "image" => Self::Image,
            "video" => Self::Video,
            "audio" | "ptt" => Self::Audio,
            "document" => Self::Document,
            "sticker" => Self::Sticker,
            "location" => Self::Location,
            "vcard" | "multi_vcard" => Self::Vcard,
            _ => Self::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Sticker => "sticker",
            Self::Location => "location",
            Self::Vcard => "vcard",
            Self::Other => "other",
        }
    }

    /// Kinds whose payload is an encrypted media blob.
    pub fn is_media(self) -> bool {
        matches!(
            self,
            Self::Image | Self::Video | Self::Audio | Self::Document
        )
    }

    /// Kinds that are never forwarded.
    pub fn is_unsupported(self) -> bool {
        matches!(self, Self::Sticker | Self::Location | Self::Vcard)
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One incoming message, as handed over by the session. Read-only for consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Session-assigned message id, used to request decryption.
    pub message_id: String,
    pub sender_id: String,
    pub chat_kind: ChatKind,
    pub content_kind: ContentKind,
    pub body: Option<String>,
    /// Opaque handle to the encrypted media, present for media kinds.
    pub media_ref: Option<String>,
    pub mime_type: Option<String>,
}

impl InboundEvent {
    pub fn text(message_id: &str, sender_id: &str, body: &str) -> Self {
        Self {
            message_id: message_id.to_string(),
            sender_id: sender_id.to_string(),
            chat_kind: ChatKind::Direct,
            content_kind: ContentKind::Text,
            body: Some(body.to_string()),
            media_ref: None,
            mime_type: None,
        }
    }

    pub fn media(
        message_id: &str,
        sender_id: &str,
        content_kind: ContentKind,
        mime_type: Option<&str>,
    ) -> Self {
        Self {
            message_id: message_id.to_string(),
            sender_id: sender_id.to_string(),
            chat_kind: ChatKind::Direct,
            content_kind,
            body: None,
            media_ref: Some(message_id.to_string()),
            mime_type: mime_type.map(ToString::to_string),
        }
    }

    #[must_use]
    pub fn in_chat(mut self, chat_kind: ChatKind) -> Self {
        self.chat_kind = chat_kind;
        self
    }
}

/// Reduce a session id such as `5215512345678:12@c.us` to its digits (`5215512345678`).
///
/// The device suffix after `:` and the domain after `@` are dropped before
/// filtering so they cannot leak digits into the result.
pub fn sanitize_sender(sender_id: &str) -> String {
    let user = sender_id.split('@').next().unwrap_or(sender_id);
    let user = user.split(':').next().unwrap_or(user);
    user.chars().filter(char::is_ascii_digit).collect()
}

/// Turn a caller-supplied recipient into a session chat id.
///
/// Ids that already carry a domain are passed through; bare numbers get the
/// direct-chat suffix. Returns `None` when nothing usable remains.
pub fn recipient_chat_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.contains('@') {
        return Some(trimmed.to_string());
    }
    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        None
    } else {
        Some(format!("{}{}", digits, DIRECT_SUFFIX))
    }
}
