//! TTL Cleanup Task
//!
//! Background task that periodically sweeps expired elements out of the
//! local tier. Expiry is local to each node and never replicated.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::replication::ReplicatedCache;

/// Spawns a background task that periodically expires cache elements.
///
/// The sweep goes through the guarded store, so a store that is still
/// initializing or unreachable costs at most one operation budget per run.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
///
/// # Example
/// ```ignore
/// let cleanup_handle = spawn_cleanup_task(cache.clone(), 1);
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_cleanup_task(cache: Arc<ReplicatedCache>, cleanup_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs);

    tokio::spawn(async move {
        info!(
            "Starting TTL cleanup task with interval of {} seconds",
            cleanup_interval_secs
        );

        loop {
            tokio::time::sleep(interval).await;

            match cache.expire_elements().await {
                Ok(removed) if removed > 0 => {
                    info!("TTL cleanup: removed {} expired entries", removed)
                }
                Ok(_) => debug!("TTL cleanup: no expired entries found"),
                Err(e) => warn!(cache = %cache.name(), error = %e, "TTL cleanup skipped"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Element, LocalStore, LocalStoreFactory};
    use crate::config::NonstopConfig;
    use crate::nonstop::NonstopStore;

    async fn cache() -> (Arc<ReplicatedCache>, Arc<LocalStore>) {
        let local = Arc::new(LocalStore::new("c", 100, 0));
        let store = NonstopStore::new(
            "c",
            NonstopConfig::default(),
            Arc::new(LocalStoreFactory::new(local.clone())),
        )
        .await
        .unwrap();
        (Arc::new(ReplicatedCache::new(Arc::new(store))), local)
    }

    #[tokio::test]
    async fn test_cleanup_task_removes_expired_entries() {
        let (cache, local) = cache().await;
        cache
            .put_quiet(Element::new("expire_soon", "value").with_time_to_live(1))
            .await
            .unwrap();

        let handle = spawn_cleanup_task(cache.clone(), 1);

        // Wait for entry to expire and cleanup to run
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert!(local.is_empty(), "Expired entry should have been swept");
        assert_eq!(local.stats().expirations, 1);

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_preserves_valid_entries() {
        let (cache, local) = cache().await;
        cache
            .put_quiet(Element::new("long_lived", "value").with_time_to_live(3600))
            .await
            .unwrap();

        let handle = spawn_cleanup_task(cache.clone(), 1);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(local.len(), 1);
        assert!(cache.get(&"long_lived".into()).await.unwrap().is_some());

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_can_be_aborted() {
        let (cache, _) = cache().await;
        let handle = spawn_cleanup_task(cache, 1);

        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
