use axum::http::StatusCode;
use thiserror::Error;

/// Typed error hierarchy for wabridge.
///
/// Use at module boundaries (session operations, outbound dispatch, config validation).
/// Internal/leaf functions can keep using `anyhow::Result`; the `Internal` variant
/// allows seamless conversion via the `?` operator.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session not connected, waiting for reconnection")]
    NotConnected,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Media processing failed: {0}")]
    MediaProcessing(String),

    #[error("Webhook forwarding failed: {0}")]
    Forwarding(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Convenience alias for results using `BridgeError`.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    /// Whether this error is transient and the operation may succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotConnected | Self::Connection(_) | Self::Session(_) | Self::Forwarding(_) => {
                true
            }
            Self::Config(_)
            | Self::InvalidRequest(_)
            | Self::UnsupportedMediaType(_)
            | Self::MediaProcessing(_)
            | Self::Internal(_) => false,
        }
    }

    /// HTTP status reported to API callers for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
            Self::Connection(_) | Self::Session(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_)
            | Self::MediaProcessing(_)
            | Self::Forwarding(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
