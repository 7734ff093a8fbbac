//! Write-Behind Module
//!
//! A write-behind queue collects writes and deletes destined for a system of
//! record so they can be applied outside the caller's path.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::cache::{CacheKey, Element};
use crate::error::Result;

/// One queued write-behind operation.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOperation {
    Write(Element),
    Delete(CacheKey),
}

#[async_trait]
pub trait WriteBehind: Send + Sync {
    async fn write(&self, element: Element) -> Result<()>;

    async fn delete(&self, key: CacheKey) -> Result<()>;

    /// Operations accepted but not yet handed to the system of record.
    fn pending(&self) -> usize;

    async fn stop(&self);
}

// == Queued Write-Behind ==
/// In-memory write-behind that buffers operations until drained.
#[derive(Debug, Default)]
pub struct QueuedWriteBehind {
    queue: Mutex<VecDeque<WriteOperation>>,
}

impl QueuedWriteBehind {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes every queued operation in arrival order.
    pub fn drain(&self) -> Vec<WriteOperation> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue.drain(..).collect()
    }

    fn push(&self, op: WriteOperation) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(op);
    }
}

#[async_trait]
impl WriteBehind for QueuedWriteBehind {
    async fn write(&self, element: Element) -> Result<()> {
        self.push(WriteOperation::Write(element));
        Ok(())
    }

    async fn delete(&self, key: CacheKey) -> Result<()> {
        self.push(WriteOperation::Delete(key));
        Ok(())
    }

    fn pending(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn stop(&self) {
        let dropped = self.drain().len();
        if dropped > 0 {
            tracing::debug!(dropped, "write-behind stopped with pending operations");
        }
    }
}
