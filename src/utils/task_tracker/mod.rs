//! Named handles for the bridge's long-lived loops (pipeline consumer,
//! retention sweep) so shutdown can stop them in one place.

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Default)]
pub struct TaskTracker {
    running: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` as `name`. A previous task under the same name is
    /// aborted; two retention sweeps must never run side by side.
    pub async fn track(&self, name: &str, handle: JoinHandle<()>) {
        let mut running = self.running.lock().await;
        if let Some(pos) = running.iter().position(|(n, _)| n == name) {
            let (_, stale) = running.swap_remove(pos);
            warn!("task '{}' replaced, aborting the previous one", name);
            stale.abort();
        }
        running.push((name.to_string(), handle));
    }

    pub async fn spawn<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        debug!("spawning background task '{}'", name);
        self.track(name, tokio::spawn(future)).await;
    }

    pub async fn len(&self) -> usize {
        self.running.lock().await.len()
    }

    /// Abort everything tracked. Returns the names of tasks that had already
    /// exited on their own, which for these loops means something went wrong.
    pub async fn cancel_all(&self) -> Vec<String> {
        let drained = std::mem::take(&mut *self.running.lock().await);
        let total = drained.len();
        let mut exited_early = Vec::new();
        for (name, handle) in drained {
            if handle.is_finished() {
                warn!("task '{}' had already exited before shutdown", name);
                exited_early.push(name);
            } else {
                handle.abort();
                debug!("aborted task '{}'", name);
            }
        }
        if total > 0 {
            info!("stopped {} background task(s)", total);
        }
        exited_early
    }
}
