//! Configuration Module
//!
//! Handles loading and managing node, nonstop and replication configuration
//! from environment variables.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

// == Timeout Behavior Kind ==
/// Fallback strategy used when a guarded call cannot complete within budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeoutBehaviorKind {
    /// Raise an "operation timed out" error
    #[default]
    Exception,
    /// Serve reads and writes from the local tiers of the last known store
    LocalReads,
    /// Serve reads locally, reject every write
    LocalReadsAndExceptionOnWrites,
    /// Return neutral values, no side effects
    Noop,
}

impl FromStr for TimeoutBehaviorKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "exception" => Ok(Self::Exception),
            "localreads" => Ok(Self::LocalReads),
            "localreadsandexceptiononwrite" | "localreadsandexceptiononwrites" => {
                Ok(Self::LocalReadsAndExceptionOnWrites)
            }
            "noop" => Ok(Self::Noop),
            _ => Err(CacheError::InvalidConfiguration(format!(
                "unknown timeout behavior '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for TimeoutBehaviorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Exception => "exception",
            Self::LocalReads => "localReads",
            Self::LocalReadsAndExceptionOnWrites => "localReadsAndExceptionOnWrite",
            Self::Noop => "noop",
        };
        f.write_str(name)
    }
}

// == Nonstop Config ==
/// Bounded-latency settings for one guarded cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonstopConfig {
    /// Bring the store up asynchronously and bound every call
    pub enabled: bool,
    /// Fall back at once instead of waiting while the store is not ready
    pub immediate_timeout: bool,
    /// Per-operation budget in milliseconds
    pub timeout_millis: u64,
    /// Factor applied to the budget of bulk operations
    pub bulk_ops_timeout_multiplier: u32,
    /// Fallback strategy
    pub timeout_behavior: TimeoutBehaviorKind,
    /// How long the background initializer keeps retrying across rejoins
    pub async_init_deadline_millis: u64,
    /// Pause between initialization attempts interrupted by a rejoin
    pub rejoin_retry_interval_millis: u64,
}

impl NonstopConfig {
    /// Budget for a regular guarded operation.
    pub fn operation_budget(&self) -> Duration {
        Duration::from_millis(self.timeout_millis)
    }

    /// Budget for a bulk operation.
    pub fn bulk_budget(&self) -> Duration {
        Duration::from_millis(
            self.timeout_millis
                .saturating_mul(u64::from(self.bulk_ops_timeout_multiplier)),
        )
    }

    pub fn async_init_deadline(&self) -> Duration {
        Duration::from_millis(self.async_init_deadline_millis)
    }

    pub fn rejoin_retry_interval(&self) -> Duration {
        Duration::from_millis(self.rejoin_retry_interval_millis)
    }

    /// Rejects budgets that would make every call time out.
    pub fn validate(&self) -> Result<()> {
        if self.timeout_millis == 0 {
            return Err(CacheError::InvalidConfiguration(
                "nonstop timeout_millis must be greater than zero".to_string(),
            ));
        }
        if self.bulk_ops_timeout_multiplier == 0 {
            return Err(CacheError::InvalidConfiguration(
                "nonstop bulk_ops_timeout_multiplier must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_or("NONSTOP_ENABLED", defaults.enabled),
            immediate_timeout: env_or("NONSTOP_IMMEDIATE_TIMEOUT", defaults.immediate_timeout),
            timeout_millis: env_or("NONSTOP_TIMEOUT_MILLIS", defaults.timeout_millis),
            bulk_ops_timeout_multiplier: env_or(
                "NONSTOP_BULK_OPS_TIMEOUT_MULTIPLIER",
                defaults.bulk_ops_timeout_multiplier,
            ),
            timeout_behavior: env_or("NONSTOP_TIMEOUT_BEHAVIOR", defaults.timeout_behavior),
            async_init_deadline_millis: env_or(
                "NONSTOP_ASYNC_INIT_DEADLINE_MILLIS",
                defaults.async_init_deadline_millis,
            ),
            rejoin_retry_interval_millis: env_or(
                "NONSTOP_REJOIN_RETRY_INTERVAL_MILLIS",
                defaults.rejoin_retry_interval_millis,
            ),
        }
    }
}

impl Default for NonstopConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            immediate_timeout: false,
            timeout_millis: 30_000,
            bulk_ops_timeout_multiplier: 10,
            timeout_behavior: TimeoutBehaviorKind::Exception,
            async_init_deadline_millis: 5 * 60 * 1000,
            rejoin_retry_interval_millis: 10_000,
        }
    }
}

// == Replication Config ==
/// How events reach peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicationMode {
    /// Send each event to every peer from the mutating caller
    Sync,
    /// Queue events and flush them in batches from a background task
    #[default]
    Async,
}

impl FromStr for ReplicationMode {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sync" | "synchronous" => Ok(Self::Sync),
            "async" | "asynchronous" => Ok(Self::Async),
            _ => Err(CacheError::InvalidConfiguration(format!(
                "unknown replication mode '{}'",
                s
            ))),
        }
    }
}

/// Which mutations are propagated and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationConfig {
    pub mode: ReplicationMode,
    pub replicate_puts: bool,
    /// Copy new elements to peers; when false peers invalidate the key instead
    pub replicate_puts_via_copy: bool,
    pub replicate_updates: bool,
    /// Copy updated elements to peers; when false peers invalidate the key instead
    pub replicate_updates_via_copy: bool,
    pub replicate_removals: bool,
    /// Flush interval of the asynchronous replicator
    pub async_interval_millis: u64,
    /// Upper bound for one send to one peer
    pub send_timeout_millis: u64,
}

impl ReplicationConfig {
    pub fn async_interval(&self) -> Duration {
        Duration::from_millis(self.async_interval_millis)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_millis)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mode == ReplicationMode::Async && self.async_interval_millis == 0 {
            return Err(CacheError::InvalidConfiguration(
                "replication async_interval_millis must be greater than zero".to_string(),
            ));
        }
        if self.send_timeout_millis == 0 {
            return Err(CacheError::InvalidConfiguration(
                "replication send_timeout_millis must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            mode: env_or("REPLICATION_MODE", defaults.mode),
            replicate_puts: env_or("REPLICATE_PUTS", defaults.replicate_puts),
            replicate_puts_via_copy: env_or(
                "REPLICATE_PUTS_VIA_COPY",
                defaults.replicate_puts_via_copy,
            ),
            replicate_updates: env_or("REPLICATE_UPDATES", defaults.replicate_updates),
            replicate_updates_via_copy: env_or(
                "REPLICATE_UPDATES_VIA_COPY",
                defaults.replicate_updates_via_copy,
            ),
            replicate_removals: env_or("REPLICATE_REMOVALS", defaults.replicate_removals),
            async_interval_millis: env_or(
                "REPLICATION_ASYNC_INTERVAL_MILLIS",
                defaults.async_interval_millis,
            ),
            send_timeout_millis: env_or(
                "REPLICATION_SEND_TIMEOUT_MILLIS",
                defaults.send_timeout_millis,
            ),
        }
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            mode: ReplicationMode::Async,
            replicate_puts: true,
            replicate_puts_via_copy: true,
            replicate_updates: true,
            replicate_updates_via_copy: true,
            replicate_removals: true,
            async_interval_millis: 1000,
            send_timeout_millis: 10_000,
        }
    }
}

// == Bootstrap Config ==
/// Full-state transfer settings for a joining node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    pub enabled: bool,
    /// Load in a background task instead of before serving requests
    pub asynchronous: bool,
    /// Byte budget of one fetched chunk
    pub maximum_chunk_size_bytes: usize,
    /// Number of elements sampled to estimate the average element size
    pub sample_size: usize,
}

impl BootstrapConfig {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_or("BOOTSTRAP_ENABLED", defaults.enabled),
            asynchronous: env_or("BOOTSTRAP_ASYNCHRONOUS", defaults.asynchronous),
            maximum_chunk_size_bytes: env_or(
                "BOOTSTRAP_MAXIMUM_CHUNK_SIZE_BYTES",
                defaults.maximum_chunk_size_bytes,
            ),
            sample_size: env_or("BOOTSTRAP_SAMPLE_SIZE", defaults.sample_size),
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            asynchronous: true,
            maximum_chunk_size_bytes: 5_000_000,
            sample_size: 10,
        }
    }
}

// == Node Config ==
/// Node configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identifier stamped on every replication event this node produces
    pub node_id: String,
    /// Name of the replicated cache served by this node
    pub cache_name: String,
    /// Maximum number of entries the local store can hold
    pub max_entries: usize,
    /// Default TTL in seconds for entries without explicit TTL
    pub default_ttl: u64,
    /// HTTP server port
    pub server_port: u16,
    /// Background expiry sweep interval in seconds
    pub cleanup_interval: u64,
    /// Base URLs of peer nodes hosting the same cache
    pub peers: Vec<String>,
    pub nonstop: NonstopConfig,
    pub replication: ReplicationConfig,
    pub bootstrap: BootstrapConfig,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `NODE_ID` - Node identifier (default: "node-1")
    /// - `CACHE_NAME` - Replicated cache name (default: "default")
    /// - `MAX_ENTRIES` - Maximum cache entries (default: 10000)
    /// - `DEFAULT_TTL` - Default TTL in seconds (default: 300)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CLEANUP_INTERVAL` - Expiry sweep frequency in seconds (default: 1)
    /// - `PEERS` - Comma-separated peer base URLs (default: none)
    /// - `NONSTOP_*`, `REPLICATION_*`/`REPLICATE_*`, `BOOTSTRAP_*` - see the
    ///   respective sections
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            node_id: env::var("NODE_ID").unwrap_or(defaults.node_id),
            cache_name: env::var("CACHE_NAME").unwrap_or(defaults.cache_name),
            max_entries: env_or("MAX_ENTRIES", defaults.max_entries),
            default_ttl: env_or("DEFAULT_TTL", defaults.default_ttl),
            server_port: env_or("SERVER_PORT", defaults.server_port),
            cleanup_interval: env_or("CLEANUP_INTERVAL", defaults.cleanup_interval),
            peers: env::var("PEERS")
                .map(|v| parse_peer_list(&v))
                .unwrap_or_default(),
            nonstop: NonstopConfig::from_env(),
            replication: ReplicationConfig::from_env(),
            bootstrap: BootstrapConfig::from_env(),
        }
    }

    /// Checks cross-field constraints before the node starts.
    pub fn validate(&self) -> Result<()> {
        if self.cache_name.is_empty() {
            return Err(CacheError::InvalidConfiguration(
                "cache_name cannot be empty".to_string(),
            ));
        }
        if self.max_entries == 0 {
            return Err(CacheError::InvalidConfiguration(
                "max_entries must be greater than zero".to_string(),
            ));
        }
        self.nonstop.validate()?;
        self.replication.validate()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: "node-1".to_string(),
            cache_name: "default".to_string(),
            max_entries: 10_000,
            default_ttl: 300,
            server_port: 3000,
            cleanup_interval: 1,
            peers: Vec::new(),
            nonstop: NonstopConfig::default(),
            replication: ReplicationConfig::default(),
            bootstrap: BootstrapConfig::default(),
        }
    }
}

// == Helpers ==
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_peer_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.trim_end_matches('/').to_string())
        .collect()
}
