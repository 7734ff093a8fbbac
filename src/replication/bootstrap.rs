//! Bootstrap Transfer
//!
//! A node joining the cluster copies a peer's contents before it starts
//! serving. The key set is fetched once, then elements are pulled in chunks
//! sized to stay under a byte budget estimated from a sample of elements.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::CacheKey;
use crate::config::BootstrapConfig;
use crate::error::Result;
use crate::replication::{PeerHandle, PeerRegistry, ReplicatedCache};

/// What one bootstrap run transferred.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapSummary {
    pub peer: Option<String>,
    pub keys: usize,
    pub chunks: usize,
    /// Elements the peer returned
    pub received: usize,
    /// Elements present in the local tier after their put
    pub loaded: usize,
}

/// Keys per chunk for a byte budget and an average element size.
///
/// An unknown (zero) average puts every key in one chunk.
pub fn keys_per_chunk(maximum_chunk_size_bytes: usize, average_element_size: usize) -> usize {
    if average_element_size == 0 {
        return usize::MAX;
    }
    (maximum_chunk_size_bytes / average_element_size).max(1)
}

#[derive(Debug, Clone)]
pub struct Bootstrapper {
    config: BootstrapConfig,
}

impl Bootstrapper {
    pub fn new(config: BootstrapConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Loads `cache` from the first peer the registry lists for it.
    pub async fn load_from_registry(
        &self,
        cache: &ReplicatedCache,
        registry: &dyn PeerRegistry,
    ) -> Result<BootstrapSummary> {
        match registry.list_peers(cache.name()).into_iter().next() {
            Some(peer) => self.load(cache, peer).await,
            None => {
                info!(cache = %cache.name(), "no peers to bootstrap from");
                Ok(BootstrapSummary::default())
            }
        }
    }

    /// Copies every element `peer` holds into `cache` without re-announcing
    /// them.
    pub async fn load(
        &self,
        cache: &ReplicatedCache,
        peer: Arc<dyn PeerHandle>,
    ) -> Result<BootstrapSummary> {
        let keys = peer.get_keys().await?;
        let mut summary = BootstrapSummary {
            peer: Some(peer.id().to_string()),
            keys: keys.len(),
            ..BootstrapSummary::default()
        };
        if keys.is_empty() {
            info!(cache = %cache.name(), peer = %peer.id(), "peer holds no keys");
            return Ok(summary);
        }

        let average = self.sample_average_size(peer.as_ref(), &keys).await?;
        let per_chunk = keys_per_chunk(self.config.maximum_chunk_size_bytes, average);
        debug!(
            cache = %cache.name(),
            average_size = average,
            per_chunk,
            "bootstrap chunking"
        );

        for chunk in keys.chunks(per_chunk) {
            let elements = peer.get_elements(chunk).await?;
            for element in elements {
                let key = element.key.clone();
                summary.received += 1;
                cache.put_quiet(element).await?;
                // a timed-out put falls back without storing
                if cache.store().contains_key_in_memory(&key) {
                    summary.loaded += 1;
                }
            }
            summary.chunks += 1;
            debug!(
                cache = %cache.name(),
                chunk = summary.chunks,
                loaded = summary.loaded,
                "bootstrap chunk applied"
            );
        }

        info!(
            cache = %cache.name(),
            peer = %peer.id(),
            keys = summary.keys,
            received = summary.received,
            loaded = summary.loaded,
            chunks = summary.chunks,
            "bootstrap complete"
        );
        Ok(summary)
    }

    async fn sample_average_size(&self, peer: &dyn PeerHandle, keys: &[CacheKey]) -> Result<usize> {
        let mut total = 0;
        let mut sampled = 0;
        for key in keys.iter().take(self.config.sample_size) {
            if let Some(size) = peer
                .get_element(key)
                .await?
                .and_then(|e| e.serialized_size())
            {
                total += size;
                sampled += 1;
            }
        }
        Ok(if sampled == 0 { 0 } else { total / sampled })
    }

    /// Runs [`Bootstrapper::load_from_registry`] in the background.
    pub fn spawn(
        self,
        cache: Arc<ReplicatedCache>,
        registry: Arc<dyn PeerRegistry>,
    ) -> JoinHandle<Result<BootstrapSummary>> {
        tokio::spawn(async move {
            let outcome = self.load_from_registry(&cache, registry.as_ref()).await;
            if let Err(e) = &outcome {
                warn!(cache = %cache.name(), error = %e, "bootstrap failed");
            }
            outcome
        })
    }
}
