//! Guard Statistics
//!
//! Outcome counters for guarded calls and the bounded-time scope every
//! guarded call runs inside.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// How a guarded call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Budget elapsed or the store raised a timeout
    Timeout,
    /// The store raised a rejoin signal
    RejoinTimeout,
    /// The store reported itself uninitialized and the fallback took over
    InitFailureFallback,
    /// Store not ready and the guard was told not to wait
    ImmediateFallback,
}

// == Guard Stats ==
#[derive(Debug, Default)]
pub struct GuardStats {
    successes: AtomicU64,
    timeouts: AtomicU64,
    rejoin_timeouts: AtomicU64,
    init_failure_fallbacks: AtomicU64,
    immediate_fallbacks: AtomicU64,
    in_flight: AtomicU64,
}

/// Point-in-time copy of [`GuardStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GuardStatsSnapshot {
    pub successes: u64,
    pub timeouts: u64,
    pub rejoin_timeouts: u64,
    pub init_failure_fallbacks: u64,
    pub immediate_fallbacks: u64,
    pub in_flight: u64,
}

impl GuardStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Success => &self.successes,
            Outcome::Timeout => &self.timeouts,
            Outcome::RejoinTimeout => &self.rejoin_timeouts,
            Outcome::InitFailureFallback => &self.init_failure_fallbacks,
            Outcome::ImmediateFallback => &self.immediate_fallbacks,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GuardStatsSnapshot {
        GuardStatsSnapshot {
            successes: self.successes.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            rejoin_timeouts: self.rejoin_timeouts.load(Ordering::Relaxed),
            init_failure_fallbacks: self.init_failure_fallbacks.load(Ordering::Relaxed),
            immediate_fallbacks: self.immediate_fallbacks.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }
}

// == Bounded Scope ==
/// Time budget of one guarded call. Counts as in flight until dropped.
pub struct BoundedScope<'a> {
    stats: &'a GuardStats,
    deadline: Option<Instant>,
}

impl<'a> BoundedScope<'a> {
    /// Opens a scope; `None` means no deadline.
    pub fn enter(stats: &'a GuardStats, budget: Option<Duration>) -> Self {
        stats.in_flight.fetch_add(1, Ordering::Relaxed);
        Self {
            stats,
            deadline: budget.map(|budget| Instant::now() + budget),
        }
    }

    /// Budget left, or `None` for an unbounded scope.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

impl Drop for BoundedScope<'_> {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
