//! Response DTOs for the cache node API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;
use serde_json::Value;

use crate::cache::{CacheValue, Element, StoreStats};
use crate::nonstop::GuardContext;
use crate::replication::ReplicationStats;

/// Response body for the GET operation (GET /get/:key)
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    /// The requested key
    pub key: String,
    /// The stored value
    pub value: Value,
    pub version: u64,
    /// Milliseconds until expiry; absent for elements that never expire
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_remaining_ms: Option<u64>,
}

impl GetResponse {
    pub fn from_element(key: impl Into<String>, element: &Element) -> Self {
        let value = match &element.value {
            CacheValue::Json(v) => v.clone(),
            CacheValue::Bytes(bytes) => Value::from(bytes.clone()),
            CacheValue::LocalOnly(_) => Value::Null,
        };
        Self {
            key: key.into(),
            value,
            version: element.version,
            ttl_remaining_ms: element.ttl_remaining_ms(),
        }
    }
}

/// Response body for the SET operation (PUT /set)
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    /// Success message
    pub message: String,
    /// The key that was set
    pub key: String,
}

impl SetResponse {
    /// Creates a new SetResponse
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' set successfully", key),
            key,
        }
    }
}

/// Response body for the DELETE operation (DELETE /del/:key)
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    /// Success message
    pub message: String,
    /// The key that was deleted
    pub key: String,
}

impl DeleteResponse {
    /// Creates a new DeleteResponse
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' deleted successfully", key),
            key,
        }
    }
}

/// Local tier counters in the stats response.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatsBody {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// Current number of entries in the local tier
    pub total_entries: usize,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
}

impl From<&StoreStats> for StoreStatsBody {
    fn from(stats: &StoreStats) -> Self {
        Self {
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
            expirations: stats.expirations,
            total_entries: stats.total_entries,
            hit_rate: stats.hit_rate(),
        }
    }
}

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub node_id: String,
    pub store: StoreStatsBody,
    /// Guard state and outcome counters
    pub guard: GuardContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication: Option<ReplicationStats>,
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// "healthy" once the store is up, "starting" before
    pub status: String,
    pub node_id: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    pub fn new(node_id: impl Into<String>, store_ready: bool) -> Self {
        Self {
            status: if store_ready { "healthy" } else { "starting" }.to_string(),
            node_id: node_id.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Response body for a batch of events received from a peer
#[derive(Debug, Clone, Serialize)]
pub struct ApplyEventsResponse {
    pub received: usize,
    pub applied: usize,
}

/// Response body for GET /peer/:cache/announcement
///
/// Each payload is a gzip-compressed, `|`-delimited list of peer URLs.
#[derive(Debug, Clone, Serialize)]
pub struct AnnouncementResponse {
    pub node_id: String,
    pub peers: usize,
    pub payloads: Vec<Vec<u8>>,
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    /// Creates a new ErrorResponse
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
