//! Nonstop Write-Behind
//!
//! Placeholder write-behind handed out before the guarded store is ready.
//! Operations are buffered and replayed, in order, into the real write-behind
//! once it is bound.

use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::cache::{CacheKey, Element, WriteBehind, WriteOperation};
use crate::error::Result;

#[derive(Default)]
pub struct NonstopWriteBehind {
    target: OnceLock<Arc<dyn WriteBehind>>,
    buffer: Mutex<VecDeque<WriteOperation>>,
}

impl NonstopWriteBehind {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_bound(&self) -> bool {
        self.target.get().is_some()
    }

    /// Binds the real write-behind and replays buffered operations into it.
    ///
    /// The target is published only after the whole buffer is replayed, so
    /// later writes queue behind the replay. A failed replay keeps the
    /// operations that were not applied and leaves the placeholder unbound.
    pub async fn bind(&self, target: Arc<dyn WriteBehind>) -> Result<()> {
        let mut buffer = self.buffer.lock().await;
        if self.target.get().is_some() {
            return Ok(());
        }
        while let Some(op) = buffer.front().cloned() {
            apply(target.as_ref(), op).await?;
            buffer.pop_front();
        }
        // set cannot fail: binds are serialized by the buffer lock
        let _ = self.target.set(target);
        Ok(())
    }

    async fn submit(&self, op: WriteOperation) -> Result<()> {
        if let Some(target) = self.target.get() {
            return apply(target.as_ref(), op).await;
        }
        let mut buffer = self.buffer.lock().await;
        // bind may have completed while we waited for the buffer
        match self.target.get() {
            Some(target) => apply(target.as_ref(), op).await,
            None => {
                buffer.push_back(op);
                Ok(())
            }
        }
    }
}

async fn apply(target: &dyn WriteBehind, op: WriteOperation) -> Result<()> {
    match op {
        WriteOperation::Write(element) => target.write(element).await,
        WriteOperation::Delete(key) => target.delete(key).await,
    }
}

#[async_trait]
impl WriteBehind for NonstopWriteBehind {
    async fn write(&self, element: Element) -> Result<()> {
        self.submit(WriteOperation::Write(element)).await
    }

    async fn delete(&self, key: CacheKey) -> Result<()> {
        self.submit(WriteOperation::Delete(key)).await
    }

    fn pending(&self) -> usize {
        let buffered = self.buffer.try_lock().map(|b| b.len()).unwrap_or(0);
        buffered + self.target.get().map(|t| t.pending()).unwrap_or(0)
    }

    async fn stop(&self) {
        self.buffer.lock().await.clear();
        if let Some(target) = self.target.get() {
            target.stop().await;
        }
    }
}

impl std::fmt::Debug for NonstopWriteBehind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonstopWriteBehind")
            .field("bound", &self.is_bound())
            .finish()
    }
}
