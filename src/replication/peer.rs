//! Peers and Listeners
//!
//! Contracts for the remote side of replication (a peer hosting a replica of
//! one cache, and the registry that lists them) and for the listeners a cache
//! notifies about its local mutations.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::cache::{CacheKey, Element};
use crate::error::Result;
use crate::replication::ReplicationEvent;

// == Peer Handle ==
/// A remote replica of one cache.
#[async_trait]
pub trait PeerHandle: Send + Sync {
    /// Stable identity used in logs and failure reports.
    fn id(&self) -> &str;

    /// Delivers events in the given order.
    async fn send(&self, events: &[ReplicationEvent]) -> Result<()>;

    async fn get_keys(&self) -> Result<Vec<CacheKey>>;

    async fn get_element(&self, key: &CacheKey) -> Result<Option<Element>>;

    /// Elements for the keys the peer still holds; missing keys are skipped.
    async fn get_elements(&self, keys: &[CacheKey]) -> Result<Vec<Element>>;
}

/// Lists the peers hosting a replica of a cache.
pub trait PeerRegistry: Send + Sync {
    fn list_peers(&self, cache_name: &str) -> Vec<Arc<dyn PeerHandle>>;
}

// == Static Registry ==
/// Peer list fixed by configuration, keyed by cache name.
#[derive(Default)]
pub struct StaticPeerRegistry {
    peers: RwLock<HashMap<String, Vec<Arc<dyn PeerHandle>>>>,
}

impl StaticPeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, cache_name: &str, peer: Arc<dyn PeerHandle>) {
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(cache_name.to_string())
            .or_default()
            .push(peer);
    }

    /// Removes a peer by id; returns true if it was registered.
    pub fn unregister(&self, cache_name: &str, peer_id: &str) -> bool {
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        match peers.get_mut(cache_name) {
            Some(list) => {
                let before = list.len();
                list.retain(|p| p.id() != peer_id);
                list.len() != before
            }
            None => false,
        }
    }
}

impl PeerRegistry for StaticPeerRegistry {
    fn list_peers(&self, cache_name: &str) -> Vec<Arc<dyn PeerHandle>> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(cache_name)
            .cloned()
            .unwrap_or_default()
    }
}

// == Cache Event Listener ==
/// Receives local mutation notifications of a cache.
#[async_trait]
pub trait CacheEventListener: Send + Sync {
    async fn notify_element_put(&self, cache_name: &str, element: &Element) -> Result<()>;

    async fn notify_element_updated(&self, cache_name: &str, element: &Element) -> Result<()>;

    async fn notify_element_removed(&self, cache_name: &str, element: &Element) -> Result<()>;

    async fn notify_remove_all(&self, cache_name: &str) -> Result<()>;

    async fn notify_element_expired(&self, _cache_name: &str, _element: &Element) -> Result<()> {
        Ok(())
    }

    async fn notify_element_evicted(&self, _cache_name: &str, _element: &Element) -> Result<()> {
        Ok(())
    }

    /// Listeners that cannot express compare-and-swap make the cache refuse it.
    fn rejects_cas(&self) -> bool {
        false
    }

    async fn dispose(&self);
}
