//! Peer Fanout
//!
//! Sends one ordered batch of events to every peer of a cache in parallel.
//! Each peer gets its own send timeout, so a slow or partitioned peer never
//! holds back delivery to the others.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::replication::{PeerHandle, ReplicationEvent};

/// Result of sending a batch to one peer.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub peer: String,
    pub events: usize,
    pub error: Option<String>,
    pub latency: Duration,
}

impl SendOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of a fanout across all peers of a cache.
#[derive(Debug, Clone, Default)]
pub struct FanoutSummary {
    /// Sorted by peer id
    pub results: Vec<SendOutcome>,
}

impl FanoutSummary {
    pub fn total_peers(&self) -> usize {
        self.results.len()
    }

    pub fn failures(&self) -> impl Iterator<Item = &SendOutcome> {
        self.results.iter().filter(|r| !r.succeeded())
    }

    pub fn failed_peers(&self) -> usize {
        self.failures().count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed_peers() == 0
    }
}

/// Sends `events` to every peer and waits for all sends to settle.
pub async fn fanout(
    peers: &[Arc<dyn PeerHandle>],
    events: Vec<ReplicationEvent>,
    send_timeout: Duration,
) -> FanoutSummary {
    if peers.is_empty() || events.is_empty() {
        return FanoutSummary::default();
    }

    let events = Arc::new(events);
    let mut sends = JoinSet::new();
    for peer in peers {
        let peer = peer.clone();
        let events = events.clone();
        sends.spawn(async move {
            let start = Instant::now();
            let error = match tokio::time::timeout(send_timeout, peer.send(events.as_slice())).await
            {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some(format!("send timed out after {} ms", send_timeout.as_millis())),
            };
            SendOutcome {
                peer: peer.id().to_string(),
                events: events.len(),
                error,
                latency: start.elapsed(),
            }
        });
    }

    let mut results = Vec::with_capacity(peers.len());
    while let Some(joined) = sends.join_next().await {
        match joined {
            Ok(outcome) => results.push(outcome),
            Err(e) => tracing::warn!(error = %e, "peer send task failed"),
        }
    }
    results.sort_by(|a, b| a.peer.cmp(&b.peer));

    FanoutSummary { results }
}
