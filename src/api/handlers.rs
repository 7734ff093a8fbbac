//! API Handlers
//!
//! HTTP request handlers for the client endpoints and for the peer endpoints
//! other nodes call to replicate and bootstrap.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use tracing::info;

use crate::cache::{CacheKey, Element, LocalStore, LocalStoreFactory};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    AnnouncementResponse, ApplyEventsResponse, DeleteResponse, GetResponse, HealthResponse, SetRequest, SetResponse,
    StatsResponse, StoreStatsBody,
};
use crate::nonstop::NonstopStore;
use crate::replication::payload::{create_compressed_payload_list, MAXIMUM_PEERS_PER_SEND};
use crate::replication::{
    CacheReplicator, HttpPeer, PeerHandle, PeerRegistry, ReplicatedCache, ReplicationEvent,
    StaticPeerRegistry,
};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub node_id: String,
    /// Replicated, guarded cache
    pub cache: Arc<ReplicatedCache>,
    /// Local tier under the guard, for statistics
    pub local: Arc<LocalStore>,
    pub replicator: Option<Arc<CacheReplicator>>,
    pub registry: Arc<StaticPeerRegistry>,
}

impl AppState {
    /// Creates state for a node without replication.
    pub fn new(node_id: impl Into<String>, cache: Arc<ReplicatedCache>, local: Arc<LocalStore>) -> Self {
        Self {
            node_id: node_id.into(),
            cache,
            local,
            replicator: None,
            registry: Arc::new(StaticPeerRegistry::new()),
        }
    }

    /// Registers `replicator` as a listener of the cache.
    pub fn with_replicator(
        mut self,
        replicator: Arc<CacheReplicator>,
        registry: Arc<StaticPeerRegistry>,
    ) -> Self {
        self.cache.register_listener(replicator.clone());
        self.replicator = Some(replicator);
        self.registry = registry;
        self
    }

    /// Builds the full node stack from configuration: local tier, guard,
    /// HTTP peers and replicator.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let local = Arc::new(LocalStore::new(
            config.cache_name.clone(),
            config.max_entries,
            config.default_ttl,
        ));
        let store = NonstopStore::new(
            config.cache_name.clone(),
            config.nonstop.clone(),
            Arc::new(LocalStoreFactory::new(local.clone())),
        )
        .await?;
        let cache = Arc::new(ReplicatedCache::new(Arc::new(store)));

        let registry = Arc::new(StaticPeerRegistry::new());
        for url in &config.peers {
            let peer = HttpPeer::new(url, &config.cache_name, config.replication.send_timeout())?;
            registry.register(&config.cache_name, Arc::new(peer));
        }
        info!(cache = %config.cache_name, peers = config.peers.len(), "peer registry built");

        let replicator =
            CacheReplicator::new(config.replication.clone(), config.node_id.clone(), registry.clone());
        Ok(Self::new(config.node_id.clone(), cache, local).with_replicator(replicator, registry))
    }

    fn check_cache(&self, cache: &str) -> Result<()> {
        if cache != self.cache.name() {
            return Err(CacheError::NotFound(format!("cache '{}'", cache)));
        }
        Ok(())
    }
}

// == Client Endpoints ==
/// Handler for PUT /set
///
/// Stores a value in the cache with optional TTL and replicates it.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    // Validate request
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let key = req.key.clone();
    state.cache.put(req.into_element()).await?;

    Ok(Json(SetResponse::new(key)))
}

/// Handler for GET /get/:key
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    let element = state
        .cache
        .get(&CacheKey::from(key.as_str()))
        .await?
        .ok_or_else(|| CacheError::NotFound(key.clone()))?;

    Ok(Json(GetResponse::from_element(key, &element)))
}

/// Handler for DELETE /del/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    state
        .cache
        .remove(&CacheKey::from(key.as_str()))
        .await?
        .ok_or_else(|| CacheError::NotFound(key.clone()))?;

    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for GET /stats
///
/// Local tier counters, guard state and replication delivery counters.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        node_id: state.node_id.clone(),
        store: StoreStatsBody::from(&state.local.stats()),
        guard: state.cache.store().internal_context(),
        replication: state.replicator.as_ref().map(|r| r.stats()),
    })
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::new(
        state.node_id.clone(),
        state.cache.store().is_initialized(),
    ))
}

// == Peer Endpoints ==
/// Handler for POST /peer/:cache/events
///
/// Applies a batch another node replicated to this one.
pub async fn receive_events_handler(
    State(state): State<AppState>,
    Path(cache): Path<String>,
    Json(events): Json<Vec<ReplicationEvent>>,
) -> Result<Json<ApplyEventsResponse>> {
    state.check_cache(&cache)?;
    let applied = state.cache.apply_events(&events).await?;

    Ok(Json(ApplyEventsResponse {
        received: events.len(),
        applied,
    }))
}

/// Handler for GET /peer/:cache/keys
///
/// Keys that can leave this node; local-only keys are not listed.
pub async fn peer_keys_handler(
    State(state): State<AppState>,
    Path(cache): Path<String>,
) -> Result<Json<Vec<CacheKey>>> {
    state.check_cache(&cache)?;
    let keys = state.cache.keys().await?;

    Ok(Json(keys.into_iter().filter(CacheKey::is_serializable).collect()))
}

/// Handler for POST /peer/:cache/elements
pub async fn peer_elements_handler(
    State(state): State<AppState>,
    Path(cache): Path<String>,
    Json(keys): Json<Vec<CacheKey>>,
) -> Result<Json<Vec<Element>>> {
    state.check_cache(&cache)?;
    let elements = state.cache.get_elements(&keys).await?;

    Ok(Json(elements.into_iter().filter(Element::is_serializable).collect()))
}

/// Handler for GET /peer/:cache/announcement
///
/// The peer URLs this node replicates the cache to, packed into MTU-sized
/// compressed payloads.
pub async fn peer_announcement_handler(
    State(state): State<AppState>,
    Path(cache): Path<String>,
) -> Result<Json<AnnouncementResponse>> {
    state.check_cache(&cache)?;
    let urls: Vec<String> = state
        .registry
        .list_peers(&cache)
        .iter()
        .map(|peer| peer.id().to_string())
        .collect();
    let payloads = create_compressed_payload_list(&urls, MAXIMUM_PEERS_PER_SEND)?;

    Ok(Json(AnnouncementResponse {
        node_id: state.node_id.clone(),
        peers: urls.len(),
        payloads,
    }))
}
