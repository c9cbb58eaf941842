use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

use crate::errors::BridgeError;

/// Generates a `Debug` impl that redacts secret fields.
///
/// Field specifiers:
/// - `field_name`: printed normally via `&self.field_name`
/// - `redact(field_name)`: `String` field, shows `[empty]` or `[REDACTED]`
macro_rules! redact_debug {
    // Internal: emit a single .field() call
    (@field $builder:ident, $self:ident, redact($field:ident)) => {
        $builder.field(
            stringify!($field),
            &if $self.$field.is_empty() {
                "[empty]"
            } else {
                "[REDACTED]"
            },
        );
    };
    (@field $builder:ident, $self:ident, $field:ident) => {
        $builder.field(stringify!($field), &$self.$field);
    };

    // Internal: recursive TT muncher
    (@fields $builder:ident, $self:ident,) => {};
    (@fields $builder:ident, $self:ident, redact($field:ident), $($rest:tt)*) => {
        redact_debug!(@field $builder, $self, redact($field));
        redact_debug!(@fields $builder, $self, $($rest)*);
    };
    (@fields $builder:ident, $self:ident, $field:ident, $($rest:tt)*) => {
        redact_debug!(@field $builder, $self, $field);
        redact_debug!(@fields $builder, $self, $($rest)*);
    };

    // Entry point
    ($struct_name:ident, $($fields:tt)*) => {
        impl std::fmt::Debug for $struct_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let mut builder = f.debug_struct(stringify!($struct_name));
                redact_debug!(@fields builder, self, $($fields)*);
                builder.finish()
            }
        }
    };
}

// Submodules are declared after the macro so they can use `redact_debug!`
mod gateway;
mod media;
mod session;

pub use gateway::*;
pub use media::*;
pub use session::*;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

impl Config {
    /// Base URL under which persisted media is published (`<base>/uploads/<file>`).
    pub fn public_base_url(&self) -> String {
        if self.gateway.public_base_url.is_empty() {
            format!("http://{}:{}", self.gateway.host, self.gateway.port)
        } else {
            self.gateway.public_base_url.trim_end_matches('/').to_string()
        }
    }

    /// Directory holding the underlying session's persisted credentials.
    pub fn credentials_path(&self) -> PathBuf {
        resolve_dir(&self.session.credentials_dir, "tokens")
    }

    /// Directory holding persisted inbound media.
    pub fn uploads_path(&self) -> PathBuf {
        resolve_dir(&self.media.uploads_dir, "uploads")
    }

    /// Scratch directory for outbound uploads awaiting dispatch. Kept apart
    /// from the uploads dir so staged files are never served publicly.
    pub fn staging_path(&self) -> PathBuf {
        self.uploads_path()
            .parent()
            .map_or_else(|| PathBuf::from("staging"), |p| p.join("staging"))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), BridgeError> {
        self.validate_gateway()?;
        self.validate_session()?;
        self.validate_endpoints()?;
        if self.audit.capacity == 0 {
            return Err(BridgeError::Config("audit.capacity must be > 0".into()));
        }
        Ok(())
    }

    fn validate_gateway(&self) -> Result<(), BridgeError> {
        if self.gateway.access_key.trim().is_empty() {
            return Err(BridgeError::Config(
                "gateway.accessKey is required (or set WABRIDGE_ACCESS_KEY)".into(),
            ));
        }
        if self.gateway.port == 0 {
            return Err(BridgeError::Config("gateway.port must be > 0".into()));
        }
        if self.gateway.port < 1024 {
            warn!(
                "gateway.port {} is a privileged port (< 1024), may require elevated permissions",
                self.gateway.port
            );
        }
        if self.gateway.max_upload_bytes == 0 {
            return Err(BridgeError::Config("gateway.maxUploadBytes must be > 0".into()));
        }
        Ok(())
    }

    fn validate_session(&self) -> Result<(), BridgeError> {
        let s = &self.session;

        if s.name.trim().is_empty() {
            return Err(BridgeError::Config("session.name must not be empty".into()));
        }
        if s.max_retries == 0 {
            return Err(BridgeError::Config("session.maxRetries must be > 0".into()));
        }
        if s.max_retries > 30 {
            return Err(BridgeError::Config(
                "session.maxRetries is unreasonably large (> 30)".into(),
            ));
        }
        if s.retry_base_delay_secs == 0 {
            return Err(BridgeError::Config("session.retryBaseDelaySecs must be > 0".into()));
        }
        if s.retry_max_delay_secs < s.retry_base_delay_secs {
            return Err(BridgeError::Config(
                "session.retryMaxDelaySecs must be >= retryBaseDelaySecs".into(),
            ));
        }
        if s.health_check_interval_secs == 0 {
            return Err(BridgeError::Config("session.healthCheckIntervalSecs must be > 0".into()));
        }
        if s.probe_timeout_secs == 0 {
            return Err(BridgeError::Config("session.probeTimeoutSecs must be > 0".into()));
        }
        if s.probe_timeout_secs >= s.health_check_interval_secs {
            warn!(
                "session.probeTimeoutSecs ({}) >= healthCheckIntervalSecs ({}), probes may overlap their interval",
                s.probe_timeout_secs, s.health_check_interval_secs
            );
        }
        Ok(())
    }

    fn validate_endpoints(&self) -> Result<(), BridgeError> {
        if !self.gateway.public_base_url.is_empty() {
            check_http_url("gateway.publicBaseUrl", &self.gateway.public_base_url)?;
        }
        check_http_url("engine.sidecarUrl", &self.engine.sidecar_url)?;
        if self.webhook.url.is_empty() {
            warn!("webhook.url is empty, inbound messages will only be kept in the audit log");
        } else {
            check_http_url("webhook.url", &self.webhook.url)?;
        }
        if self.webhook.timeout_secs == 0 {
            return Err(BridgeError::Config("webhook.timeoutSecs must be > 0".into()));
        }
        if self.engine.request_timeout_secs == 0 || self.engine.connect_timeout_secs == 0 {
            return Err(BridgeError::Config("engine timeouts must be > 0".into()));
        }
        Ok(())
    }
}

fn check_http_url(field: &str, value: &str) -> Result<(), BridgeError> {
    match url::Url::parse(value) {
        Ok(u) if matches!(u.scheme(), "http" | "https") && u.host_str().is_some() => Ok(()),
        Ok(u) => Err(BridgeError::Config(format!(
            "{} must be an http(s) URL, got scheme '{}'",
            field,
            u.scheme()
        ))),
        Err(e) => Err(BridgeError::Config(format!(
            "{} is not a valid URL: {}",
            field, e
        ))),
    }
}

fn resolve_dir(configured: &str, default_leaf: &str) -> PathBuf {
    if configured.is_empty() {
        crate::utils::get_wabridge_home()
            .map_or_else(|_| PathBuf::from(".wabridge"), |home| home)
            .join(default_leaf)
    } else if let Some(rest) = configured.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        home.join(rest)
    } else {
        PathBuf::from(configured)
    }
}

#[cfg(test)]
mod tests;
