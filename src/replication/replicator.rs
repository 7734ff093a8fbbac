//! Cache Replicator
//!
//! Turns local mutation notifications into replication events and delivers
//! them to the peers of the cache, either immediately (sync mode) or in
//! batches flushed by a background worker (async mode).

use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::Element;
use crate::config::{ReplicationConfig, ReplicationMode};
use crate::error::{CacheError, Result};
use crate::replication::{
    fanout, CacheEventListener, FanoutSummary, PeerRegistry, ReplicationEvent,
};
use crate::tasks::{spawn_replication_task, FlushWorker};

/// Delivery counters of one replicator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplicationStats {
    pub events_queued: u64,
    pub events_sent: u64,
    pub send_failures: u64,
    pub dropped_non_serializable: u64,
    pub pending: usize,
}

// == Cache Replicator ==
pub struct CacheReplicator {
    config: ReplicationConfig,
    node_id: String,
    registry: Arc<dyn PeerRegistry>,
    alive: AtomicBool,
    /// Async mode only; swapped out whole by each flush
    queue: Mutex<Vec<ReplicationEvent>>,
    /// Serializes flushes so batches leave in production order
    flushing: tokio::sync::Mutex<()>,
    worker: Mutex<Option<FlushWorker>>,
    events_queued: AtomicU64,
    events_sent: AtomicU64,
    send_failures: AtomicU64,
    dropped: AtomicU64,
}

impl CacheReplicator {
    // == Constructor ==
    /// Creates a replicator; in async mode this starts its flush worker, so it
    /// must be called within a tokio runtime.
    pub fn new(
        config: ReplicationConfig,
        node_id: impl Into<String>,
        registry: Arc<dyn PeerRegistry>,
    ) -> Arc<Self> {
        let replicator = Arc::new(Self {
            node_id: node_id.into(),
            registry,
            alive: AtomicBool::new(true),
            queue: Mutex::new(Vec::new()),
            flushing: tokio::sync::Mutex::new(()),
            worker: Mutex::new(None),
            events_queued: AtomicU64::new(0),
            events_sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            config,
        });

        if replicator.config.mode == ReplicationMode::Async {
            let worker =
                spawn_replication_task(Arc::downgrade(&replicator), replicator.config.async_interval());
            *replicator
                .worker
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(worker);
        }
        replicator
    }

    /// A replicator with the same configuration and registry but its own queue.
    pub fn independent_copy(&self) -> Arc<Self> {
        Self::new(self.config.clone(), self.node_id.clone(), self.registry.clone())
    }

    pub fn mode(&self) -> ReplicationMode {
        self.config.mode
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Events waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn stats(&self) -> ReplicationStats {
        ReplicationStats {
            events_queued: self.events_queued.load(Ordering::Relaxed),
            events_sent: self.events_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            dropped_non_serializable: self.dropped.load(Ordering::Relaxed),
            pending: self.pending(),
        }
    }

    // == Capture ==
    async fn replicate_copy(&self, cache_name: &str, element: &Element) -> Result<()> {
        match ReplicationEvent::put(cache_name, element, &self.node_id) {
            Ok(event) => self.dispatch(event).await,
            Err(e) => self.drop_event(cache_name, e),
        }
    }

    async fn replicate_invalidation(&self, cache_name: &str, element: &Element) -> Result<()> {
        match ReplicationEvent::remove(cache_name, &element.key, &self.node_id) {
            Ok(event) => self.dispatch(event).await,
            Err(e) => self.drop_event(cache_name, e),
        }
    }

    fn drop_event(&self, cache_name: &str, reason: CacheError) -> Result<()> {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        warn!(cache = %cache_name, reason = %reason, "skipping replication of non-serializable payload");
        Ok(())
    }

    async fn dispatch(&self, event: ReplicationEvent) -> Result<()> {
        match self.config.mode {
            ReplicationMode::Sync => self.send_now(event).await,
            ReplicationMode::Async => {
                let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
                // dispose flips alive under this lock before its final flush
                if !self.is_alive() {
                    debug!(cache = %event.cache_name, "replicator disposed, event not queued");
                    return Ok(());
                }
                queue.push(event);
                self.events_queued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    /// Sync mode: the first peer failure is reported to the caller.
    async fn send_now(&self, event: ReplicationEvent) -> Result<()> {
        let peers = self.registry.list_peers(&event.cache_name);
        let summary = fanout(&peers, vec![event], self.config.send_timeout()).await;
        self.account(&summary);

        let first_failure = summary.failures().next().cloned();
        match first_failure {
            Some(failure) => Err(CacheError::ReplicationSend {
                peer: failure.peer,
                reason: failure.error.unwrap_or_default(),
            }),
            None => Ok(()),
        }
    }

    fn account(&self, summary: &FanoutSummary) {
        for outcome in &summary.results {
            if outcome.succeeded() {
                self.events_sent
                    .fetch_add(outcome.events as u64, Ordering::Relaxed);
            } else {
                self.send_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    // == Flush ==
    /// Drains the queue and sends the batch, one message per peer per cache.
    ///
    /// Peer failures are logged; returns the number of events drained.
    pub async fn flush(&self) -> usize {
        let _serial = self.flushing.lock().await;
        let batch = mem::take(&mut *self.queue.lock().unwrap_or_else(PoisonError::into_inner));
        if batch.is_empty() {
            return 0;
        }
        let drained = batch.len();

        let mut by_cache: Vec<(String, Vec<ReplicationEvent>)> = Vec::new();
        for event in batch {
            match by_cache.iter_mut().find(|(name, _)| *name == event.cache_name) {
                Some((_, events)) => events.push(event),
                None => by_cache.push((event.cache_name.clone(), vec![event])),
            }
        }

        for (cache_name, events) in by_cache {
            let peers = self.registry.list_peers(&cache_name);
            let summary = fanout(&peers, events, self.config.send_timeout()).await;
            self.account(&summary);
            for failure in summary.failures() {
                warn!(
                    cache = %cache_name,
                    peer = %failure.peer,
                    events = failure.events,
                    error = failure.error.as_deref().unwrap_or(""),
                    "replication batch not delivered"
                );
            }
            debug!(cache = %cache_name, peers = summary.total_peers(), "replication batch flushed");
        }
        drained
    }
}

#[async_trait]
impl CacheEventListener for CacheReplicator {
    async fn notify_element_put(&self, cache_name: &str, element: &Element) -> Result<()> {
        if !self.is_alive() || !self.config.replicate_puts {
            return Ok(());
        }
        if self.config.replicate_puts_via_copy {
            self.replicate_copy(cache_name, element).await
        } else {
            self.replicate_invalidation(cache_name, element).await
        }
    }

    async fn notify_element_updated(&self, cache_name: &str, element: &Element) -> Result<()> {
        if !self.is_alive() || !self.config.replicate_updates {
            return Ok(());
        }
        if self.config.replicate_updates_via_copy {
            self.replicate_copy(cache_name, element).await
        } else {
            self.replicate_invalidation(cache_name, element).await
        }
    }

    async fn notify_element_removed(&self, cache_name: &str, element: &Element) -> Result<()> {
        if !self.is_alive() || !self.config.replicate_removals {
            return Ok(());
        }
        self.replicate_invalidation(cache_name, element).await
    }

    async fn notify_remove_all(&self, cache_name: &str) -> Result<()> {
        if !self.is_alive() || !self.config.replicate_removals {
            return Ok(());
        }
        self.dispatch(ReplicationEvent::remove_all(cache_name, &self.node_id))
            .await
    }

    fn rejects_cas(&self) -> bool {
        true
    }

    /// Stops the worker and makes one last delivery attempt for queued events.
    async fn dispose(&self) {
        {
            let _queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            self.alive.store(false, Ordering::Release);
        }
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            worker.stop().await;
        }
        if self.config.mode == ReplicationMode::Async {
            let flushed = self.flush().await;
            debug!(node = %self.node_id, flushed, "replicator disposed");
        }
    }
}

impl std::fmt::Debug for CacheReplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheReplicator")
            .field("node_id", &self.node_id)
            .field("mode", &self.config.mode)
            .field("alive", &self.is_alive())
            .field("pending", &self.pending())
            .finish()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheKey, CacheValue};
    use crate::replication::test_support::RecordingPeer;
    use crate::replication::{EventAction, PeerHandle, StaticPeerRegistry};
    use std::time::Duration;

    fn config(mode: ReplicationMode) -> ReplicationConfig {
        ReplicationConfig {
            mode,
            ..ReplicationConfig::default()
        }
    }

    fn registry(peers: Vec<Arc<RecordingPeer>>) -> Arc<StaticPeerRegistry> {
        let registry = Arc::new(StaticPeerRegistry::new());
        for peer in peers {
            registry.register("c", peer);
        }
        registry
    }

    fn keys_of(batch: &[ReplicationEvent]) -> Vec<Option<CacheKey>> {
        batch.iter().map(|e| e.key.clone()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_batches_reach_every_peer_in_order() {
        let good = Arc::new(RecordingPeer::new("a-good"));
        let bad = Arc::new(RecordingPeer::failing("b-bad"));
        let replicator = CacheReplicator::new(
            config(ReplicationMode::Async),
            "node-1",
            registry(vec![good.clone(), bad.clone()]),
        );

        for key in ["k1", "k2", "k3"] {
            replicator
                .notify_element_put("c", &Element::new(key, "v"))
                .await
                .unwrap();
        }
        assert_eq!(replicator.pending(), 3);
        assert!(good.batches().is_empty());

        tokio::time::sleep(Duration::from_millis(1_050)).await;

        for peer in [&good, &bad] {
            let batches = peer.batches();
            assert_eq!(batches.len(), 1, "{} got one message", peer.id());
            assert_eq!(
                keys_of(&batches[0]),
                vec![Some("k1".into()), Some("k2".into()), Some("k3".into())]
            );
        }
        let stats = replicator.stats();
        assert_eq!(stats.events_sent, 3);
        assert_eq!(stats.send_failures, 1);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_sync_surfaces_failure_after_sending_to_all() {
        let good = Arc::new(RecordingPeer::new("a-good"));
        let bad = Arc::new(RecordingPeer::failing("b-bad"));
        let replicator = CacheReplicator::new(
            config(ReplicationMode::Sync),
            "node-1",
            registry(vec![good.clone(), bad.clone()]),
        );

        let result = replicator
            .notify_element_put("c", &Element::new("k", "v"))
            .await;
        assert!(matches!(result, Err(CacheError::ReplicationSend { peer, .. }) if peer == "b-bad"));
        assert_eq!(good.batches().len(), 1);
        assert_eq!(bad.batches().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_peer_bounded_by_send_timeout() {
        let fast = Arc::new(RecordingPeer::new("fast"));
        let stuck = Arc::new(RecordingPeer::slow("stuck", Duration::from_secs(3_600)));
        let mut config = config(ReplicationMode::Sync);
        config.send_timeout_millis = 100;
        let replicator =
            CacheReplicator::new(config, "node-1", registry(vec![fast.clone(), stuck]));

        let started = tokio::time::Instant::now();
        let result = replicator
            .notify_element_put("c", &Element::new("k", "v"))
            .await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(fast.batches().len(), 1);
    }

    #[tokio::test]
    async fn test_non_serializable_element_produces_no_events() {
        let peer = Arc::new(RecordingPeer::new("p"));
        let replicator = CacheReplicator::new(
            config(ReplicationMode::Sync),
            "node-1",
            registry(vec![peer.clone()]),
        );
        let element = Element::new(
            CacheKey::LocalOnly(crate::cache::LocalToken(9)),
            CacheValue::LocalOnly(Arc::new("socket")),
        );

        replicator.notify_element_put("c", &element).await.unwrap();
        replicator.notify_element_removed("c", &element).await.unwrap();

        assert!(peer.batches().is_empty());
        assert_eq!(replicator.stats().dropped_non_serializable, 2);
    }

    #[tokio::test]
    async fn test_invalidation_mode_sends_removes() {
        let peer = Arc::new(RecordingPeer::new("p"));
        let mut config = config(ReplicationMode::Sync);
        config.replicate_puts_via_copy = false;
        config.replicate_updates_via_copy = false;
        let replicator = CacheReplicator::new(config, "node-1", registry(vec![peer.clone()]));

        let element = Element::new("k", CacheValue::LocalOnly(Arc::new(1u8)));
        replicator.notify_element_put("c", &element).await.unwrap();
        replicator.notify_element_updated("c", &element).await.unwrap();

        let batches = peer.batches();
        assert_eq!(batches.len(), 2);
        assert!(batches
            .iter()
            .all(|b| b[0].action == EventAction::Remove && b[0].element.is_none()));
    }

    #[tokio::test]
    async fn test_flags_gate_capture() {
        let peer = Arc::new(RecordingPeer::new("p"));
        let mut config = config(ReplicationMode::Sync);
        config.replicate_puts = false;
        config.replicate_updates = false;
        config.replicate_removals = false;
        let replicator = CacheReplicator::new(config, "node-1", registry(vec![peer.clone()]));

        let element = Element::new("k", "v");
        replicator.notify_element_put("c", &element).await.unwrap();
        replicator.notify_element_updated("c", &element).await.unwrap();
        replicator.notify_element_removed("c", &element).await.unwrap();
        replicator.notify_remove_all("c").await.unwrap();
        assert!(peer.batches().is_empty());
    }

    #[tokio::test]
    async fn test_expiry_and_eviction_are_not_propagated() {
        let peer = Arc::new(RecordingPeer::new("p"));
        let replicator = CacheReplicator::new(
            config(ReplicationMode::Sync),
            "node-1",
            registry(vec![peer.clone()]),
        );
        let element = Element::new("k", "v");
        replicator.notify_element_expired("c", &element).await.unwrap();
        replicator.notify_element_evicted("c", &element).await.unwrap();
        assert!(peer.batches().is_empty());
    }

    #[tokio::test]
    async fn test_remove_all_ignores_payload_checks() {
        let peer = Arc::new(RecordingPeer::new("p"));
        let replicator = CacheReplicator::new(
            config(ReplicationMode::Sync),
            "node-1",
            registry(vec![peer.clone()]),
        );
        replicator.notify_remove_all("c").await.unwrap();
        let batches = peer.batches();
        assert_eq!(batches[0][0].action, EventAction::RemoveAll);
        assert_eq!(batches[0][0].origin, "node-1");
    }

    #[tokio::test]
    async fn test_dispose_flushes_queue_and_stops_capture() {
        let peer = Arc::new(RecordingPeer::new("p"));
        let mut config = config(ReplicationMode::Async);
        config.async_interval_millis = 60_000;
        let replicator = CacheReplicator::new(config, "node-1", registry(vec![peer.clone()]));

        replicator
            .notify_element_put("c", &Element::new("k", "v"))
            .await
            .unwrap();
        replicator.dispose().await;

        assert_eq!(peer.batches().len(), 1);
        assert!(!replicator.is_alive());

        replicator
            .notify_element_put("c", &Element::new("late", "v"))
            .await
            .unwrap();
        assert_eq!(replicator.pending(), 0);
    }

    #[tokio::test]
    async fn test_event_past_alive_check_is_not_queued_after_dispose() {
        let peer = Arc::new(RecordingPeer::new("p"));
        let mut config = config(ReplicationMode::Async);
        config.async_interval_millis = 60_000;
        let replicator = CacheReplicator::new(config, "node-1", registry(vec![peer.clone()]));
        replicator.dispose().await;

        // A notification that checked is_alive() before dispose reaches dispatch afterwards.
        let event = ReplicationEvent::put("c", &Element::new("k", "v"), "node-1").unwrap();
        replicator.dispatch(event).await.unwrap();

        assert_eq!(replicator.pending(), 0);
        assert_eq!(replicator.stats().events_queued, 0);
        assert!(peer.batches().is_empty());
    }

    #[tokio::test]
    async fn test_flush_groups_batches_per_cache() {
        let peer_c = Arc::new(RecordingPeer::new("pc"));
        let peer_d = Arc::new(RecordingPeer::new("pd"));
        let registry = Arc::new(StaticPeerRegistry::new());
        registry.register("c", peer_c.clone());
        registry.register("d", peer_d.clone());
        let mut config = config(ReplicationMode::Async);
        config.async_interval_millis = 60_000;
        let replicator = CacheReplicator::new(config, "node-1", registry);

        replicator.notify_element_put("c", &Element::new("1", "v")).await.unwrap();
        replicator.notify_element_put("d", &Element::new("2", "v")).await.unwrap();
        replicator.notify_element_put("c", &Element::new("3", "v")).await.unwrap();

        assert_eq!(replicator.flush().await, 3);
        assert_eq!(
            keys_of(&peer_c.batches()[0]),
            vec![Some("1".into()), Some("3".into())]
        );
        assert_eq!(keys_of(&peer_d.batches()[0]), vec![Some("2".into())]);
        assert_eq!(replicator.flush().await, 0);
        replicator.dispose().await;
    }

    #[tokio::test]
    async fn test_independent_copy_has_its_own_queue() {
        let mut config = config(ReplicationMode::Async);
        config.async_interval_millis = 60_000;
        let original = CacheReplicator::new(config, "node-1", registry(Vec::new()));
        original
            .notify_element_put("c", &Element::new("k", "v"))
            .await
            .unwrap();

        let copy = original.independent_copy();
        assert_eq!(copy.pending(), 0);
        assert_eq!(copy.mode(), ReplicationMode::Async);
        assert_eq!(copy.node_id(), "node-1");
        assert!(copy.rejects_cas());

        original.dispose().await;
        copy.dispose().await;
    }
}
