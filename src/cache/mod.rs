//! Cache Module
//!
//! Local storage building blocks: the element model, the store handle
//! contract, and an in-memory store with TTL expiration and LRU eviction.

mod element;
mod lru;
mod stats;
mod store;
mod write_behind;


// Re-export public types
pub use element::{current_timestamp_ms, CacheKey, CacheValue, Element, LocalToken};
pub use lru::LruTracker;
pub use stats::StoreStats;
pub use store::{Fault, LocalStore, LocalStoreFactory, StoreFactory, StoreHandle};
pub use write_behind::{QueuedWriteBehind, WriteBehind, WriteOperation};

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;

/// Maximum allowed value size in bytes
pub const MAX_VALUE_SIZE: usize = 1024 * 1024; // 1 MB

/// Longest TTL a client may request, in seconds (ten years)
pub const MAX_TTL_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;
