use crate::utils::{ensure_dir, safe_filename};
use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Map a MIME type to a file extension by its subtype.
///
/// Parameters (`; codecs=opus`) are ignored. Unrecognized subtypes map to `bin`.
pub fn extension_for_mime(mime: &str) -> &'static str {
    let essence = mime.split(';').next().unwrap_or(mime).trim().to_lowercase();
    let subtype = essence.split_once('/').map_or("", |(_, s)| s);
    match subtype {
        "jpeg" | "jpg" | "pjpeg" => "jpg",
        "png" => "png",
        "gif" => "gif",
        "webp" => "webp",
        "svg+xml" => "svg",
        "ogg" | "opus" => "ogg",
        "mpeg" | "mp3" => "mp3",
        "mp4" if essence.starts_with("audio/") => "m4a",
        "mp4" => "mp4",
        "aac" => "aac",
        "wav" | "x-wav" => "wav",
        "amr" => "amr",
        "webm" => "webm",
        "3gpp" => "3gp",
        "quicktime" => "mov",
        "pdf" => "pdf",
        "msword" => "doc",
        "vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "vnd.ms-excel" => "xls",
        "vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "vnd.ms-powerpoint" => "ppt",
        "vnd.openxmlformats-officedocument.presentationml.presentation" => "pptx",
        "plain" => "txt",
        "csv" => "csv",
        "zip" => "zip",
        _ => "bin",
    }
}

/// A persisted media file and where it can be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMedia {
    pub filename: String,
    pub path: PathBuf,
    pub url: String,
}

/// Writes decrypted inbound media under the uploads directory.
///
/// Files are named `<sender>-<millis>.<ext>`. The millisecond stamp is
/// strictly increasing per store, so bursts from one sender never collide.
pub struct MediaStore {
    dir: PathBuf,
    public_base: String,
    max_bytes: usize,
    last_stamp: AtomicI64,
}

impl MediaStore {
    pub fn new(dir: impl AsRef<Path>, public_base_url: &str, max_bytes: usize) -> Result<Self> {
        let dir = ensure_dir(dir)?;
        Ok(Self {
            dir,
            public_base: public_base_url.trim_end_matches('/').to_string(),
            max_bytes,
            last_stamp: AtomicI64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Public retrieval URL for a stored file: `<base>/uploads/<filename>`.
    pub fn public_url(&self, filename: &str) -> String {
        format!("{}/uploads/{}", self.public_base, filename)
    }

    fn next_stamp(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let prev = self
            .last_stamp
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(prev + 1)
    }

    pub fn file_name(&self, sender: &str, extension: &str) -> String {
        let sender = if sender.is_empty() { "unknown" } else { sender };
        format!(
            "{}-{}.{}",
            safe_filename(sender),
            self.next_stamp(),
            safe_filename(extension)
        )
    }

    pub async fn persist(
        &self,
        sender: &str,
        extension: &str,
        bytes: &[u8],
    ) -> Result<StoredMedia> {
        if bytes.is_empty() {
            bail!("empty media payload");
        }
        if bytes.len() > self.max_bytes {
            bail!(
                "media too large: {} bytes (max {})",
                bytes.len(),
                self.max_bytes
            );
        }

        let filename = self.file_name(sender, extension);
        let path = self.dir.join(&filename);
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to create media file: {}", path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("failed to write media file: {}", path.display()))?;
        file.flush().await?;

        debug!("persisted {} bytes to {}", bytes.len(), path.display());
        Ok(StoredMedia {
            url: self.public_url(&filename),
            filename,
            path,
        })
    }

    /// Delete stored files last modified more than `max_age` ago. Returns how
    /// many were removed.
    pub async fn sweep(&self, max_age: Duration) -> Result<usize> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("failed to read {}", self.dir.display()))?;

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let Ok(modified) = meta.modified() else {
                continue;
            };
            if modified < cutoff {
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("failed to remove {}: {}", entry.path().display(), e),
                }
            }
        }
        if removed > 0 {
            info!("retention sweep removed {} media file(s)", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests;
