//! Guard State
//!
//! Holds the store a guard protects. The store slot moves from pending to
//! ready or failed exactly once; callers waiting for it are woken through a
//! watch channel that carries the slot itself.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};

use crate::cache::StoreHandle;
use crate::nonstop::NonstopWriteBehind;

/// Initialization state of a guarded store.
#[derive(Clone)]
pub enum InitState {
    Pending,
    Ready(Arc<dyn StoreHandle>),
    /// Terminal; carries the reason initialization gave up
    Failed(String),
}

impl InitState {
    pub fn is_pending(&self) -> bool {
        matches!(self, InitState::Pending)
    }
}

impl fmt::Debug for InitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitState::Pending => f.write_str("Pending"),
            InitState::Ready(_) => f.write_str("Ready"),
            InitState::Failed(reason) => f.debug_tuple("Failed").field(reason).finish(),
        }
    }
}

// == Guard State ==
pub struct GuardState {
    init: watch::Sender<InitState>,
    /// Placeholder handed out by `create_write_behind`, bound once the store is ready
    pub(crate) write_behind: Mutex<Option<Arc<NonstopWriteBehind>>>,
}

impl GuardState {
    pub fn new() -> Self {
        let (init, _) = watch::channel(InitState::Pending);
        Self {
            init,
            write_behind: Mutex::new(None),
        }
    }

    /// Snapshot of the current state.
    pub fn current(&self) -> InitState {
        (*self.init.borrow()).clone()
    }

    pub fn delegate(&self) -> Option<Arc<dyn StoreHandle>> {
        match &*self.init.borrow() {
            InitState::Ready(delegate) => Some(delegate.clone()),
            _ => None,
        }
    }

    pub fn initialization_error(&self) -> Option<String> {
        match &*self.init.borrow() {
            InitState::Failed(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    /// Sets the store if the slot is still pending; returns whether this call won.
    pub fn install(&self, delegate: Arc<dyn StoreHandle>) -> bool {
        self.settle(InitState::Ready(delegate))
    }

    /// Records a terminal failure if the slot is still pending.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.settle(InitState::Failed(reason.into()))
    }

    fn settle(&self, next: InitState) -> bool {
        let mut next = Some(next);
        self.init.send_if_modified(|state| {
            if !state.is_pending() {
                return false;
            }
            match next.take() {
                Some(value) => {
                    *state = value;
                    true
                }
                None => false,
            }
        })
    }

    // == Wait For Init ==
    /// Waits until the slot leaves the pending state.
    ///
    /// Returns `None` if `budget` elapses first. A `None` budget waits without limit.
    pub async fn wait_settled(&self, budget: Option<Duration>) -> Option<InitState> {
        let mut rx = self.init.subscribe();
        let settled = async move {
            match rx.wait_for(|state| !state.is_pending()).await {
                Ok(state) => Some((*state).clone()),
                Err(_) => None,
            }
        };
        match budget {
            Some(budget) => tokio::time::timeout(budget, settled).await.ok().flatten(),
            None => settled.await,
        }
    }
}

impl Default for GuardState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GuardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardState")
            .field("init", &*self.init.borrow())
            .finish()
    }
}
