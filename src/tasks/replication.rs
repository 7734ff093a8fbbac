//! Replication Flush Task
//!
//! Background task that periodically drains an async replicator's queue and
//! ships the batch to peers.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::replication::CacheReplicator;

/// Handle to a running flush task.
#[derive(Debug)]
pub struct FlushWorker {
    handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

impl FlushWorker {
    /// Signals the task and waits for an in-progress flush to finish.
    pub async fn stop(self) {
        self.shutdown.notify_one();
        let _ = self.handle.await;
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Spawns the flush loop for `replicator`.
///
/// The task holds only a weak reference and exits once the replicator is gone
/// or [`FlushWorker::stop`] is called.
pub fn spawn_replication_task(replicator: Weak<CacheReplicator>, interval: Duration) -> FlushWorker {
    let shutdown = Arc::new(Notify::new());
    let signal = shutdown.clone();

    let handle = tokio::spawn(async move {
        info!(
            "Starting replication flush task with interval of {} ms",
            interval.as_millis()
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = signal.notified() => break,
            }

            let Some(replicator) = replicator.upgrade() else {
                break;
            };
            let flushed = replicator.flush().await;
            if flushed > 0 {
                debug!("Replication flush: sent {} events", flushed);
            }
        }
        debug!("Replication flush task stopped");
    });

    FlushWorker { handle, shutdown }
}
