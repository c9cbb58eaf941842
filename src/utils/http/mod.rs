//! Outbound HTTP plumbing shared by the sidecar engine and the webhook forwarder.

use anyhow::{Result, bail};
use reqwest::{Client, Response};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = concat!("wabridge/", env!("CARGO_PKG_VERSION"));

/// Client used for every call the bridge makes. `timeout` bounds the whole
/// request; establishing the connection is capped separately.
pub fn http_client(timeout: Duration) -> Client {
    match Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .timeout(timeout)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!("http client builder failed ({}), using defaults", e);
            Client::new()
        }
    }
}

/// Read a media payload, failing once it grows past `cap` bytes.
///
/// A declared length over the cap fails before any byte is read. Partial
/// media is useless, so the body is never truncated.
pub async fn limited_body(mut resp: Response, cap: usize) -> Result<Vec<u8>> {
    let declared = resp.content_length();
    if declared.is_some_and(|len| len > cap as u64) {
        bail!(
            "media payload declares {} bytes, cap is {}",
            declared.unwrap_or_default(),
            cap
        );
    }

    let mut body = Vec::with_capacity(declared.map_or(0, |len| len as usize));
    while let Some(piece) = resp.chunk().await? {
        if body.len().saturating_add(piece.len()) > cap {
            bail!("media payload exceeded cap of {} bytes", cap);
        }
        body.extend_from_slice(&piece);
    }
    Ok(body)
}
