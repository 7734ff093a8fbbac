//! Replication Module
//!
//! Propagates local cache mutations to the peers holding replicas of the same
//! cache, applies what peers send back, and copies a peer's contents when a
//! node joins.
//!
//! # Components
//! - `event`: the replicated mutation record
//! - `peer`: peer, registry and listener contracts
//! - `fanout`: parallel per-peer delivery with a send timeout
//! - `replicator`: capture rules and sync/async delivery
//! - `replicated`: cache facade that notifies listeners and applies incoming batches
//! - `bootstrap`: chunked transfer from a peer on join
//! - `payload`: MTU-bounded compressed announcement payloads
//! - `http_peer`: peer transport over HTTP

mod bootstrap;
mod event;
mod fanout;
mod http_peer;
pub mod payload;
mod peer;
mod replicated;
mod replicator;

#[cfg(test)]
pub(crate) mod test_support;

pub use bootstrap::{keys_per_chunk, BootstrapSummary, Bootstrapper};
pub use event::{EventAction, ReplicationEvent};
pub use fanout::{fanout, FanoutSummary, SendOutcome};
pub use http_peer::HttpPeer;
pub use peer::{CacheEventListener, PeerHandle, PeerRegistry, StaticPeerRegistry};
pub use replicated::ReplicatedCache;
pub use replicator::{CacheReplicator, ReplicationStats};
