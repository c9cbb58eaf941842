use super::{Control, SessionHandle};
use crate::session::Connectivity;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Probe the session every `interval` until a probe fails, then report it
/// once and stop. The first probe runs one full interval after arming.
///
/// A slow probe delays the next tick instead of stacking probes.
pub(super) fn spawn_probe(
    handle: Arc<dyn SessionHandle>,
    generation: u64,
    interval: Duration,
    probe_timeout: Duration,
    control: mpsc::WeakUnboundedSender<Control>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let reason = match tokio::time::timeout(probe_timeout, handle.connection_state()).await
            {
                Ok(Ok(label)) if Connectivity::classify(&label) == Connectivity::Connected => {
                    debug!("health probe ok ({})", label);
                    continue;
                }
                Ok(Ok(label)) => format!("session reported {}", label),
                Ok(Err(e)) => format!("probe error: {:#}", e),
                Err(_) => format!("probe timed out after {:?}", probe_timeout),
            };
            if let Some(tx) = control.upgrade() {
                let _ = tx.send(Control::ProbeFailed { generation, reason });
            }
            break;
        }
    })
}
