//! Cache Element Module
//!
//! Defines keys, values and the element record stored and replicated by the
//! cache. Keys and values either travel across process boundaries (`Str`,
//! `Int`, `Json`, `Bytes`) or are pinned to this process (`LocalOnly`); serde
//! refuses to encode the latter, which keeps them out of replication.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// == Cache Key ==
/// Identity of an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CacheKey {
    Str(String),
    Int(i64),
    /// A process-local handle; never leaves this node
    #[serde(skip)]
    LocalOnly(LocalToken),
}

/// Opaque identity of a process-local key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalToken(pub u64);

impl CacheKey {
    /// Returns true if the key can be sent to a peer.
    pub fn is_serializable(&self) -> bool {
        !matches!(self, CacheKey::LocalOnly(_))
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        CacheKey::Str(s.to_string())
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        CacheKey::Str(s)
    }
}

impl From<i64> for CacheKey {
    fn from(n: i64) -> Self {
        CacheKey::Int(n)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Str(s) => f.write_str(s),
            CacheKey::Int(n) => write!(f, "{}", n),
            CacheKey::LocalOnly(token) => write!(f, "<local:{}>", token.0),
        }
    }
}

// == Cache Value ==
/// Payload of an element.
#[derive(Clone, Serialize, Deserialize)]
pub enum CacheValue {
    Json(serde_json::Value),
    Bytes(Vec<u8>),
    /// An in-process object with no wire form
    #[serde(skip)]
    LocalOnly(Arc<dyn Any + Send + Sync>),
}

impl CacheValue {
    pub fn is_serializable(&self) -> bool {
        !matches!(self, CacheValue::LocalOnly(_))
    }

    /// Placeholder payload used for key-only notifications.
    pub fn null() -> Self {
        CacheValue::Json(serde_json::Value::Null)
    }
}

impl fmt::Debug for CacheValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheValue::Json(v) => f.debug_tuple("Json").field(v).finish(),
            CacheValue::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            CacheValue::LocalOnly(_) => f.write_str("LocalOnly(..)"),
        }
    }
}

impl PartialEq for CacheValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CacheValue::Json(a), CacheValue::Json(b)) => a == b,
            (CacheValue::Bytes(a), CacheValue::Bytes(b)) => a == b,
            (CacheValue::LocalOnly(a), CacheValue::LocalOnly(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<serde_json::Value> for CacheValue {
    fn from(v: serde_json::Value) -> Self {
        CacheValue::Json(v)
    }
}

impl From<&str> for CacheValue {
    fn from(s: &str) -> Self {
        CacheValue::Json(serde_json::Value::String(s.to_string()))
    }
}

// == Element ==
/// A key/value pair with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub key: CacheKey,
    pub value: CacheValue,
    pub version: u64,
    /// Creation timestamp (Unix milliseconds)
    pub creation_time: u64,
    /// Last write timestamp (Unix milliseconds); drives last-writer-wins
    pub last_update_time: u64,
    /// Last read timestamp (Unix milliseconds)
    pub last_access_time: u64,
    /// Time-to-live override in seconds, measured from the last update
    pub time_to_live: Option<u64>,
    /// Time-to-idle override in seconds, measured from the last access
    pub time_to_idle: Option<u64>,
    pub hit_count: u64,
}

impl Element {
    // == Constructor ==
    /// Creates an element stamped with the current time.
    pub fn new(key: impl Into<CacheKey>, value: impl Into<CacheValue>) -> Self {
        let now = current_timestamp_ms();
        Self {
            key: key.into(),
            value: value.into(),
            version: 1,
            creation_time: now,
            last_update_time: now,
            last_access_time: now,
            time_to_live: None,
            time_to_idle: None,
            hit_count: 0,
        }
    }

    /// Key-only element used to announce removal of a key whose value is unknown.
    pub fn tombstone(key: CacheKey) -> Self {
        Self::new(key, CacheValue::null())
    }

    pub fn with_time_to_live(mut self, seconds: u64) -> Self {
        self.time_to_live = Some(seconds);
        self
    }

    pub fn with_time_to_idle(mut self, seconds: u64) -> Self {
        self.time_to_idle = Some(seconds);
        self
    }

    /// Both key and value can be replicated by copy.
    pub fn is_serializable(&self) -> bool {
        self.key.is_serializable() && self.value.is_serializable()
    }

    /// The key can be replicated, so peers can at least invalidate it.
    pub fn is_key_serializable(&self) -> bool {
        self.key.is_serializable()
    }

    /// Records a read.
    pub fn touch(&mut self) {
        self.last_access_time = current_timestamp_ms();
        self.hit_count += 1;
    }

    /// Takes over the identity of the element this one replaces.
    pub fn supersede(&mut self, previous: &Element) {
        self.version = previous.version + 1;
        self.creation_time = previous.creation_time;
    }

    // == Expiry ==
    /// Unix millisecond timestamp at which the element expires, if any.
    pub fn expires_at(&self) -> Option<u64> {
        let ttl = self
            .time_to_live
            .map(|s| self.last_update_time.saturating_add(s.saturating_mul(1000)));
        let tti = self
            .time_to_idle
            .map(|s| self.last_access_time.saturating_add(s.saturating_mul(1000)));
        match (ttl, tti) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Expired once the current time reaches the expiry timestamp.
    pub fn is_expired(&self) -> bool {
        self.expires_at()
            .map(|at| current_timestamp_ms() >= at)
            .unwrap_or(false)
    }

    /// Returns remaining lifetime in milliseconds, or None if the element never expires.
    pub fn ttl_remaining_ms(&self) -> Option<u64> {
        self.expires_at()
            .map(|at| at.saturating_sub(current_timestamp_ms()))
    }

    /// Encoded size of the element on the wire; None for local-only payloads.
    pub fn serialized_size(&self) -> Option<usize> {
        serde_json::to_vec(self).ok().map(|bytes| bytes.len())
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
