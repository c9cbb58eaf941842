//! Prometheus recorder and the bridge's metric names.

use anyhow::{Context, Result};
use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Inbound events by outcome (labels: outcome = forwarded | dropped | error).
pub const INBOUND_EVENTS_TOTAL: &str = "wabridge_inbound_events_total";
/// Webhook deliveries that failed or timed out.
pub const WEBHOOK_FAILURES_TOTAL: &str = "wabridge_webhook_failures_total";
/// Forced session restarts (labels: trigger = manual | probe | state).
pub const SESSION_RESTARTS_TOTAL: &str = "wabridge_session_restarts_total";
/// Failed session connection attempts.
pub const CONNECT_FAILURES_TOTAL: &str = "wabridge_connect_failures_total";
/// Successful outbound sends (labels: kind = text | image | file).
pub const OUTBOUND_SENDS_TOTAL: &str = "wabridge_outbound_sends_total";

/// Install the global Prometheus recorder and describe every counter.
///
/// Returns the handle used to render `/metrics`. Must be called once, before
/// anything is recorded.
pub fn install_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install metrics recorder")?;
    describe_counter!(INBOUND_EVENTS_TOTAL, "Inbound session events by outcome");
    describe_counter!(WEBHOOK_FAILURES_TOTAL, "Failed webhook deliveries");
    describe_counter!(SESSION_RESTARTS_TOTAL, "Forced session restarts by trigger");
    describe_counter!(CONNECT_FAILURES_TOTAL, "Failed session connection attempts");
    describe_counter!(OUTBOUND_SENDS_TOTAL, "Outbound sends by kind");
    info!("prometheus metrics recorder installed");
    Ok(handle)
}
