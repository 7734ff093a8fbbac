//! Store Module
//!
//! Defines the store handle contract a guard protects, the factory that brings
//! a handle up, and `LocalStore`, an in-memory handle with LRU eviction and
//! TTL/TTI expiry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::cache::{
    CacheKey, Element, LruTracker, QueuedWriteBehind, StoreStats, WriteBehind,
};
use crate::error::{InitError, StoreError, StoreResult};

// == Store Handle ==
/// A possibly clustered key/value store.
///
/// Async methods are remote-capable and may raise [`StoreError`] signals.
/// Sync methods only consult local tiers and never block.
#[async_trait]
pub trait StoreHandle: Send + Sync + 'static {
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<Element>>;

    /// Read without updating access statistics.
    async fn get_quiet(&self, key: &CacheKey) -> StoreResult<Option<Element>>;

    async fn get_all(&self, keys: &[CacheKey])
        -> StoreResult<HashMap<CacheKey, Option<Element>>>;

    async fn get_all_quiet(
        &self,
        keys: &[CacheKey],
    ) -> StoreResult<HashMap<CacheKey, Option<Element>>>;

    /// Stores an element; returns true if the key was not present before.
    async fn put(&self, element: Element) -> StoreResult<bool>;

    async fn put_all(&self, elements: Vec<Element>) -> StoreResult<()>;

    async fn remove(&self, key: &CacheKey) -> StoreResult<Option<Element>>;

    async fn remove_keys(&self, keys: &[CacheKey]) -> StoreResult<()>;

    async fn remove_all(&self) -> StoreResult<()>;

    /// Stores the element unless the key is present; returns the present element.
    async fn put_if_absent(&self, element: Element) -> StoreResult<Option<Element>>;

    /// Removes the key only if its current value equals the given element's value.
    async fn remove_element(&self, element: &Element) -> StoreResult<Option<Element>>;

    /// Replaces the key only if its current value equals `old`'s value.
    async fn replace_element(&self, old: &Element, element: Element) -> StoreResult<bool>;

    async fn contains_key(&self, key: &CacheKey) -> StoreResult<bool>;

    async fn keys(&self) -> StoreResult<Vec<CacheKey>>;

    async fn size(&self) -> StoreResult<usize>;

    /// Size of the cache across the whole cluster.
    async fn clustered_size(&self) -> StoreResult<usize>;

    async fn set_node_coherent(&self, coherent: bool) -> StoreResult<()>;

    async fn is_node_coherent(&self) -> StoreResult<bool>;

    async fn is_cluster_coherent(&self) -> StoreResult<bool>;

    async fn wait_until_cluster_coherent(&self) -> StoreResult<()>;

    async fn flush(&self) -> StoreResult<()>;

    /// Drops expired elements; returns how many were dropped.
    async fn expire_elements(&self) -> StoreResult<usize>;

    // == Local tiers ==
    fn unsafe_get(&self, key: &CacheKey) -> Option<Element>;

    fn local_keys(&self) -> Vec<CacheKey>;

    fn contains_key_in_memory(&self, key: &CacheKey) -> bool;

    fn contains_key_off_heap(&self, key: &CacheKey) -> bool;

    fn in_memory_size(&self) -> usize;

    fn in_memory_size_in_bytes(&self) -> u64;

    fn off_heap_size(&self) -> usize;

    fn off_heap_size_in_bytes(&self) -> u64;

    // == Lifecycle ==
    fn create_write_behind(&self) -> Arc<dyn WriteBehind>;

    fn dispose(&self);
}

/// Brings up a store handle.
#[async_trait]
pub trait StoreFactory: Send + Sync + 'static {
    async fn create(&self) -> std::result::Result<Arc<dyn StoreHandle>, InitError>;
}

// == Fault Injection ==
/// Degraded condition applied to every remote-capable call of a [`LocalStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Delay each call before it runs
    Latency(Duration),
    /// Fail each call with the given signal
    Signal(StoreError),
}

// == Local Store ==
#[derive(Debug)]
struct StoreInner {
    elements: HashMap<CacheKey, Element>,
    lru: LruTracker,
    stats: StoreStats,
    max_entries: usize,
    default_ttl: Option<u64>,
}

impl StoreInner {
    /// Returns the live element for a key, dropping it first if it has expired.
    fn live(&mut self, key: &CacheKey, record: bool) -> Option<Element> {
        let expired = match self.elements.get(key) {
            Some(element) => element.is_expired(),
            None => {
                if record {
                    self.stats.record_miss();
                }
                return None;
            }
        };

        if expired {
            self.elements.remove(key);
            self.lru.remove(key);
            self.stats.record_expirations(1);
            if record {
                self.stats.record_miss();
            }
            self.refresh_count();
            return None;
        }

        let element = self.elements.get_mut(key)?;
        if record {
            element.touch();
            self.stats.record_hit();
            self.lru.touch(key);
        }
        Some(element.clone())
    }

    fn insert(&mut self, mut element: Element) -> bool {
        if element.time_to_live.is_none() {
            element.time_to_live = self.default_ttl;
        }

        let previous = self.elements.get(&element.key).cloned();
        if let Some(previous) = &previous {
            element.supersede(previous);
        } else if self.elements.len() >= self.max_entries {
            if let Some(evicted) = self.lru.evict_oldest() {
                self.elements.remove(&evicted);
                self.stats.record_eviction();
                debug!(key = %evicted, "evicted least recently used element");
            }
        }

        let key = element.key.clone();
        self.elements.insert(key.clone(), element);
        self.lru.touch(&key);
        self.stats.record_put();
        self.refresh_count();
        previous.is_none()
    }

    fn take(&mut self, key: &CacheKey) -> Option<Element> {
        let removed = self.elements.remove(key);
        if removed.is_some() {
            self.lru.remove(key);
            self.stats.record_removal();
            self.refresh_count();
        }
        removed.filter(|e| !e.is_expired())
    }

    fn clear(&mut self) {
        self.elements.clear();
        self.lru.clear();
        self.refresh_count();
    }

    fn cleanup_expired(&mut self) -> usize {
        let expired: Vec<CacheKey> = self
            .elements
            .iter()
            .filter(|(_, element)| element.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.elements.remove(key);
            self.lru.remove(key);
        }
        self.stats.record_expirations(expired.len());
        self.refresh_count();
        expired.len()
    }

    fn refresh_count(&mut self) {
        self.stats.set_total_entries(self.elements.len());
    }
}

/// In-memory store handle with LRU eviction and TTL/TTI expiry.
#[derive(Debug)]
pub struct LocalStore {
    name: String,
    inner: Mutex<StoreInner>,
    node_coherent: AtomicBool,
    disposed: AtomicBool,
    fault: Mutex<Option<Fault>>,
}

impl LocalStore {
    // == Constructor ==
    /// Creates a store holding at most `max_entries` elements.
    ///
    /// # Arguments
    /// * `name` - Cache name, used in logs and signals
    /// * `max_entries` - Capacity before LRU eviction kicks in
    /// * `default_ttl` - TTL in seconds applied to elements without their own (0 = none)
    pub fn new(name: impl Into<String>, max_entries: usize, default_ttl: u64) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(StoreInner {
                elements: HashMap::new(),
                lru: LruTracker::new(),
                stats: StoreStats::new(),
                max_entries: max_entries.max(1),
                default_ttl: (default_ttl > 0).then_some(default_ttl),
            }),
            node_coherent: AtomicBool::new(true),
            disposed: AtomicBool::new(false),
            fault: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Applies (or clears) a degraded condition to subsequent remote-capable calls.
    pub fn set_fault(&self, fault: Option<Fault>) {
        *self.fault.lock().unwrap_or_else(PoisonError::into_inner) = fault;
    }

    /// Returns current store statistics.
    pub fn stats(&self) -> StoreStats {
        self.lock().stats.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs the configured fault and rejects calls on a disposed store.
    async fn enter(&self) -> StoreResult<()> {
        let fault = self
            .fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match fault {
            Some(Fault::Latency(delay)) => tokio::time::sleep(delay).await,
            Some(Fault::Signal(signal)) => return Err(signal),
            None => {}
        }
        if self.disposed.load(Ordering::Acquire) {
            return Err(StoreError::Uninitialized(format!(
                "store '{}' has been disposed",
                self.name
            )));
        }
        Ok(())
    }

    fn read_many(&self, keys: &[CacheKey], record: bool) -> HashMap<CacheKey, Option<Element>> {
        let mut inner = self.lock();
        keys.iter()
            .map(|key| (key.clone(), inner.live(key, record)))
            .collect()
    }
}

#[async_trait]
impl StoreHandle for LocalStore {
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<Element>> {
        self.enter().await?;
        Ok(self.lock().live(key, true))
    }

    async fn get_quiet(&self, key: &CacheKey) -> StoreResult<Option<Element>> {
        self.enter().await?;
        Ok(self.lock().live(key, false))
    }

    async fn get_all(
        &self,
        keys: &[CacheKey],
    ) -> StoreResult<HashMap<CacheKey, Option<Element>>> {
        self.enter().await?;
        Ok(self.read_many(keys, true))
    }

    async fn get_all_quiet(
        &self,
        keys: &[CacheKey],
    ) -> StoreResult<HashMap<CacheKey, Option<Element>>> {
        self.enter().await?;
        Ok(self.read_many(keys, false))
    }

    async fn put(&self, element: Element) -> StoreResult<bool> {
        self.enter().await?;
        Ok(self.lock().insert(element))
    }

    async fn put_all(&self, elements: Vec<Element>) -> StoreResult<()> {
        self.enter().await?;
        let mut inner = self.lock();
        for element in elements {
            inner.insert(element);
        }
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> StoreResult<Option<Element>> {
        self.enter().await?;
        Ok(self.lock().take(key))
    }

    async fn remove_keys(&self, keys: &[CacheKey]) -> StoreResult<()> {
        self.enter().await?;
        let mut inner = self.lock();
        for key in keys {
            inner.take(key);
        }
        Ok(())
    }

    async fn remove_all(&self) -> StoreResult<()> {
        self.enter().await?;
        self.lock().clear();
        Ok(())
    }

    async fn put_if_absent(&self, element: Element) -> StoreResult<Option<Element>> {
        self.enter().await?;
        let mut inner = self.lock();
        match inner.live(&element.key, false) {
            Some(existing) => Ok(Some(existing)),
            None => {
                inner.insert(element);
                Ok(None)
            }
        }
    }

    async fn remove_element(&self, element: &Element) -> StoreResult<Option<Element>> {
        self.enter().await?;
        let mut inner = self.lock();
        match inner.live(&element.key, false) {
            Some(current) if current.value == element.value => Ok(inner.take(&element.key)),
            _ => Ok(None),
        }
    }

    async fn replace_element(&self, old: &Element, element: Element) -> StoreResult<bool> {
        self.enter().await?;
        let mut inner = self.lock();
        match inner.live(&old.key, false) {
            Some(current) if current.value == old.value && old.key == element.key => {
                inner.insert(element);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn contains_key(&self, key: &CacheKey) -> StoreResult<bool> {
        self.enter().await?;
        Ok(self.lock().live(key, false).is_some())
    }

    async fn keys(&self) -> StoreResult<Vec<CacheKey>> {
        self.enter().await?;
        Ok(self.local_keys())
    }

    async fn size(&self) -> StoreResult<usize> {
        self.enter().await?;
        Ok(self.len())
    }

    async fn clustered_size(&self) -> StoreResult<usize> {
        self.enter().await?;
        Ok(self.len())
    }

    async fn set_node_coherent(&self, coherent: bool) -> StoreResult<()> {
        self.enter().await?;
        self.node_coherent.store(coherent, Ordering::Release);
        Ok(())
    }

    async fn is_node_coherent(&self) -> StoreResult<bool> {
        self.enter().await?;
        Ok(self.node_coherent.load(Ordering::Acquire))
    }

    async fn is_cluster_coherent(&self) -> StoreResult<bool> {
        self.enter().await?;
        Ok(self.node_coherent.load(Ordering::Acquire))
    }

    async fn wait_until_cluster_coherent(&self) -> StoreResult<()> {
        self.enter().await
    }

    async fn flush(&self) -> StoreResult<()> {
        self.enter().await
    }

    async fn expire_elements(&self) -> StoreResult<usize> {
        self.enter().await?;
        Ok(self.lock().cleanup_expired())
    }

    fn unsafe_get(&self, key: &CacheKey) -> Option<Element> {
        self.lock()
            .elements
            .get(key)
            .filter(|e| !e.is_expired())
            .cloned()
    }

    fn local_keys(&self) -> Vec<CacheKey> {
        self.lock().elements.keys().cloned().collect()
    }

    fn contains_key_in_memory(&self, key: &CacheKey) -> bool {
        self.lock().elements.contains_key(key)
    }

    fn contains_key_off_heap(&self, _key: &CacheKey) -> bool {
        false
    }

    fn in_memory_size(&self) -> usize {
        self.len()
    }

    fn in_memory_size_in_bytes(&self) -> u64 {
        self.lock()
            .elements
            .values()
            .filter_map(Element::serialized_size)
            .map(|size| size as u64)
            .sum()
    }

    fn off_heap_size(&self) -> usize {
        0
    }

    fn off_heap_size_in_bytes(&self) -> u64 {
        0
    }

    fn create_write_behind(&self) -> Arc<dyn WriteBehind> {
        Arc::new(QueuedWriteBehind::new())
    }

    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.lock().clear();
            debug!(cache = %self.name, "local store disposed");
        }
    }
}

// == Local Store Factory ==
/// Hands out one pre-built [`LocalStore`] as the guard's store.
#[derive(Debug, Clone)]
pub struct LocalStoreFactory {
    store: Arc<LocalStore>,
}

impl LocalStoreFactory {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<LocalStore> {
        self.store.clone()
    }
}

#[async_trait]
impl StoreFactory for LocalStoreFactory {
    async fn create(&self) -> std::result::Result<Arc<dyn StoreHandle>, InitError> {
        Ok(self.store.clone())
    }
}
