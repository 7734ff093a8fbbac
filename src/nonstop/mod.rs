//! Nonstop Module
//!
//! Bounded-latency guard around a clustered store: asynchronous store
//! initialization, per-operation time budgets, and pluggable fallback
//! behaviors for calls the store cannot answer in time.

mod behavior;
mod guard;
mod operation;
mod state;
mod stats;
mod write_behind;

pub use behavior::{
    ExceptionOnTimeout, LocalReadsAndExceptionOnWrites, LocalReadsOnTimeout, NoopOnTimeout,
    TimeoutBehavior, TimeoutBehaviorSelection,
};
pub use guard::{GuardContext, NonstopStore};
pub use operation::{Dispatch, OperationKind};
pub use state::{GuardState, InitState};
pub use stats::{BoundedScope, GuardStats, GuardStatsSnapshot, Outcome};
pub use write_behind::NonstopWriteBehind;
