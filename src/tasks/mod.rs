//! Background Tasks Module
//!
//! Contains background tasks that run periodically during node operation.
//!
//! # Tasks
//! - TTL Cleanup: expires elements in the local tier at configured intervals
//! - Replication Flush: ships queued replication events to peers in async mode

mod cleanup;
mod replication;

pub use cleanup::spawn_cleanup_task;
pub use replication::{spawn_replication_task, FlushWorker};
