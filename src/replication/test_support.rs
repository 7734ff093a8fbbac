//! In-memory peers shared by the replication tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::{CacheKey, Element};
use crate::error::{CacheError, Result};
use crate::replication::{PeerHandle, ReplicationEvent};

/// Records every batch it receives and serves a fixed data set.
pub struct RecordingPeer {
    id: String,
    batches: Mutex<Vec<Vec<ReplicationEvent>>>,
    failing: AtomicBool,
    delay: Duration,
    elements: Mutex<BTreeMap<CacheKey, Element>>,
    get_elements_calls: AtomicUsize,
}

impl RecordingPeer {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            batches: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            delay: Duration::ZERO,
            elements: Mutex::new(BTreeMap::new()),
            get_elements_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(id: &str) -> Self {
        let peer = Self::new(id);
        peer.failing.store(true, Ordering::SeqCst);
        peer
    }

    pub fn slow(id: &str, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(id)
        }
    }

    pub fn holding(id: &str, elements: Vec<Element>) -> Self {
        let peer = Self::new(id);
        {
            let mut held = peer.elements.lock().unwrap();
            for element in elements {
                held.insert(element.key.clone(), element);
            }
        }
        peer
    }

    pub fn batches(&self) -> Vec<Vec<ReplicationEvent>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn get_elements_calls(&self) -> usize {
        self.get_elements_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerHandle for RecordingPeer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, events: &[ReplicationEvent]) -> Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.batches.lock().unwrap().push(events.to_vec());
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::ReplicationSend {
                peer: self.id.clone(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }

    async fn get_keys(&self) -> Result<Vec<CacheKey>> {
        Ok(self.elements.lock().unwrap().keys().cloned().collect())
    }

    async fn get_element(&self, key: &CacheKey) -> Result<Option<Element>> {
        Ok(self.elements.lock().unwrap().get(key).cloned())
    }

    async fn get_elements(&self, keys: &[CacheKey]) -> Result<Vec<Element>> {
        self.get_elements_calls.fetch_add(1, Ordering::SeqCst);
        let held = self.elements.lock().unwrap();
        Ok(keys.iter().filter_map(|k| held.get(k).cloned()).collect())
    }
}
