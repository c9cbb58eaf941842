use serde::{Deserialize, Serialize};

fn default_max_media_bytes() -> usize {
    50 * 1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Where decrypted inbound media is written. Empty means `~/.wabridge/uploads`.
    #[serde(default, rename = "uploadsDir")]
    pub uploads_dir: String,
    #[serde(default = "default_max_media_bytes", rename = "maxBytes")]
    pub max_bytes: usize,
    /// Delete persisted media older than this many hours. 0 keeps files forever.
    #[serde(default, rename = "retentionHours")]
    pub retention_hours: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            uploads_dir: String::new(),
            max_bytes: default_max_media_bytes(),
            retention_hours: 0,
        }
    }
}

fn default_audit_capacity() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_capacity")]
    pub capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            capacity: default_audit_capacity(),
        }
    }
}
