//! Cluster Cache - an embeddable clustered cache layer
//!
//! Wraps a possibly unavailable clustered store in a nonstop guard that
//! bounds every call, and replicates local mutations to peer nodes.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod nonstop;
pub mod replication;
pub mod tasks;

pub use api::AppState;
pub use config::Config;
pub use error::{CacheError, Result};
pub use nonstop::NonstopStore;
pub use replication::{CacheReplicator, ReplicatedCache};
pub use tasks::spawn_cleanup_task;
