use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_company_name() -> String {
    "Unknown Company".to_string()
}

fn default_client_id() -> String {
    "0000".to_string()
}

fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer token required by every endpoint except status/config/health.
    #[serde(default, rename = "accessKey")]
    pub access_key: String,
    /// Public base URL for media links. Empty means `http://{host}:{port}`.
    #[serde(default, rename = "publicBaseUrl")]
    pub public_base_url: String,
    #[serde(default = "default_company_name", rename = "companyName")]
    pub company_name: String,
    #[serde(default = "default_client_id", rename = "clientId")]
    pub client_id: String,
    #[serde(default, rename = "termsUrl")]
    pub terms_url: String,
    #[serde(default = "default_max_upload_bytes", rename = "maxUploadBytes")]
    pub max_upload_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            access_key: String::new(),
            public_base_url: String::new(),
            company_name: default_company_name(),
            client_id: default_client_id(),
            terms_url: String::new(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

redact_debug!(
    GatewayConfig,
    host,
    port,
    redact(access_key),
    public_base_url,
    company_name,
    client_id,
    terms_url,
    max_upload_bytes,
);

// ---------------------------------------------------------------------------
// Webhook
// ---------------------------------------------------------------------------

fn default_webhook_timeout() -> u64 {
    10
}

/// Downstream consumer receiving one POST per normalized inbound record.
#[derive(Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Empty disables forwarding; records are still kept in the audit log.
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_webhook_timeout", rename = "timeoutSecs")]
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: default_webhook_timeout(),
        }
    }
}

// Webhook URLs frequently embed tokens in the query string
redact_debug!(WebhookConfig, redact(url), timeout_secs,);
