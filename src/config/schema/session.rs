use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

fn default_session_name() -> String {
    "default_session".to_string()
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_base_delay() -> u64 {
    5
}

fn default_retry_max_delay() -> u64 {
    300
}

fn default_health_check_interval() -> u64 {
    30
}

fn default_probe_timeout() -> u64 {
    10
}

fn default_restart_cooldown() -> u64 {
    10
}

fn default_close_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_name")]
    pub name: String,
    /// Directory with the session's persisted credentials. Empty means `~/.wabridge/tokens`.
    #[serde(default, rename = "credentialsDir")]
    pub credentials_dir: String,
    #[serde(default = "default_max_retries", rename = "maxRetries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay", rename = "retryBaseDelaySecs")]
    pub retry_base_delay_secs: u64,
    #[serde(default = "default_retry_max_delay", rename = "retryMaxDelaySecs")]
    pub retry_max_delay_secs: u64,
    #[serde(
        default = "default_health_check_interval",
        rename = "healthCheckIntervalSecs"
    )]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_probe_timeout", rename = "probeTimeoutSecs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_restart_cooldown", rename = "restartCooldownSecs")]
    pub restart_cooldown_secs: u64,
    #[serde(default = "default_close_timeout", rename = "closeTimeoutSecs")]
    pub close_timeout_secs: u64,
    /// Wipe persisted credentials when the session reports a duplicate-instance conflict.
    #[serde(default, rename = "purgeCredentialsOnConflict")]
    pub purge_credentials_on_conflict: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: default_session_name(),
            credentials_dir: String::new(),
            max_retries: default_max_retries(),
            retry_base_delay_secs: default_retry_base_delay(),
            retry_max_delay_secs: default_retry_max_delay(),
            health_check_interval_secs: default_health_check_interval(),
            probe_timeout_secs: default_probe_timeout(),
            restart_cooldown_secs: default_restart_cooldown(),
            close_timeout_secs: default_close_timeout(),
            purge_credentials_on_conflict: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Session sidecar
// ---------------------------------------------------------------------------

fn default_sidecar_url() -> String {
    "http://127.0.0.1:3100".to_string()
}

fn default_connect_timeout() -> u64 {
    180
}

fn default_request_timeout() -> u64 {
    30
}

#[derive(Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_sidecar_url", rename = "sidecarUrl")]
    pub sidecar_url: String,
    /// HMAC secret the sidecar signs event callbacks with. Empty accepts unsigned callbacks.
    #[serde(default, rename = "callbackSecret")]
    pub callback_secret: String,
    /// Upper bound for a login attempt, including time spent waiting for a QR scan.
    #[serde(default = "default_connect_timeout", rename = "connectTimeoutSecs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout", rename = "requestTimeoutSecs")]
    pub request_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sidecar_url: default_sidecar_url(),
            callback_secret: String::new(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

redact_debug!(
    EngineConfig,
    sidecar_url,
    redact(callback_secret),
    connect_timeout_secs,
    request_timeout_secs,
);
