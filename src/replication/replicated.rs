//! Replicated Cache
//!
//! Front door of a replicated cache: every local mutation goes to the guarded
//! store and is then announced to the registered listeners. Changes that
//! arrive from peers are applied quietly so they never bounce back.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use crate::cache::{CacheKey, Element};
use crate::error::{CacheError, Result};
use crate::nonstop::NonstopStore;
use crate::replication::{CacheEventListener, EventAction, ReplicationEvent};

pub struct ReplicatedCache {
    store: Arc<NonstopStore>,
    listeners: RwLock<Vec<Arc<dyn CacheEventListener>>>,
}

impl ReplicatedCache {
    pub fn new(store: Arc<NonstopStore>) -> Self {
        Self {
            store,
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        self.store.cache_name()
    }

    /// The guarded store underneath.
    pub fn store(&self) -> &Arc<NonstopStore> {
        &self.store
    }

    pub fn register_listener(&self, listener: Arc<dyn CacheEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn listeners(&self) -> Vec<Arc<dyn CacheEventListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // == Notification ==
    /// Every listener is notified; the first error is returned afterwards.
    async fn announce(&self, change: Change<'_>) -> Result<()> {
        let mut first_error = None;
        for listener in self.listeners() {
            let name = self.name();
            let outcome = match change {
                Change::Put(element) => listener.notify_element_put(name, element).await,
                Change::Updated(element) => listener.notify_element_updated(name, element).await,
                Change::Removed(element) => listener.notify_element_removed(name, element).await,
                Change::RemoveAll => listener.notify_remove_all(name).await,
            };
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn check_cas(&self, operation: &'static str) -> Result<()> {
        if self.listeners().iter().any(|l| l.rejects_cas()) {
            return Err(CacheError::UnsupportedCas { operation });
        }
        Ok(())
    }

    // == Reads ==
    pub async fn get(&self, key: &CacheKey) -> Result<Option<Element>> {
        self.store.get(key).await
    }

    pub async fn get_quiet(&self, key: &CacheKey) -> Result<Option<Element>> {
        self.store.get_quiet(key).await
    }

    pub async fn keys(&self) -> Result<Vec<CacheKey>> {
        self.store.keys().await
    }

    pub async fn size(&self) -> Result<usize> {
        self.store.size().await
    }

    /// Elements still present for `keys`, for peers pulling a bootstrap chunk.
    pub async fn get_elements(&self, keys: &[CacheKey]) -> Result<Vec<Element>> {
        let found = self.store.get_all_quiet(keys).await?;
        Ok(keys
            .iter()
            .filter_map(|k| found.get(k).cloned().flatten())
            .collect())
    }

    // == Writes ==
    /// Stores the element and announces it as a put or an update.
    pub async fn put(&self, element: Element) -> Result<()> {
        let announced = element.clone();
        let is_new = self.store.put(element).await?;
        if is_new {
            self.announce(Change::Put(&announced)).await
        } else {
            self.announce(Change::Updated(&announced)).await
        }
    }

    /// Stores an element that came from a peer; listeners are not told.
    pub async fn put_quiet(&self, element: Element) -> Result<bool> {
        self.store.put(element).await
    }

    /// Removes the key; listeners hear about it even if nothing was stored.
    pub async fn remove(&self, key: &CacheKey) -> Result<Option<Element>> {
        let removed = self.store.remove(key).await?;
        let announced = removed
            .clone()
            .unwrap_or_else(|| Element::tombstone(key.clone()));
        self.announce(Change::Removed(&announced)).await?;
        Ok(removed)
    }

    pub async fn remove_all(&self) -> Result<()> {
        self.store.remove_all().await?;
        self.announce(Change::RemoveAll).await
    }

    pub async fn expire_elements(&self) -> Result<usize> {
        self.store.expire_elements().await
    }

    // == Compare-and-swap ==
    pub async fn put_if_absent(&self, element: Element) -> Result<Option<Element>> {
        self.check_cas("putIfAbsent")?;
        let announced = element.clone();
        let existing = self.store.put_if_absent(element).await?;
        if existing.is_none() {
            self.announce(Change::Put(&announced)).await?;
        }
        Ok(existing)
    }

    pub async fn remove_element(&self, element: &Element) -> Result<Option<Element>> {
        self.check_cas("removeElement")?;
        let removed = self.store.remove_element(element).await?;
        if let Some(removed) = &removed {
            self.announce(Change::Removed(removed)).await?;
        }
        Ok(removed)
    }

    pub async fn replace_element(&self, old: &Element, element: Element) -> Result<bool> {
        self.check_cas("replaceElement")?;
        let announced = element.clone();
        let replaced = self.store.replace_element(old, element).await?;
        if replaced {
            self.announce(Change::Updated(&announced)).await?;
        }
        Ok(replaced)
    }

    // == Incoming Replication ==
    /// Applies a batch received from a peer, in order; returns how many
    /// events changed local state.
    ///
    /// A PUT never overwrites a local element updated more recently.
    pub async fn apply_events(&self, events: &[ReplicationEvent]) -> Result<usize> {
        let mut applied = 0;
        for event in events {
            if event.cache_name != self.name() || !event.is_well_formed() {
                debug!(cache = %self.name(), target = %event.cache_name, "ignoring replication event");
                continue;
            }
            match (event.action, &event.key, &event.element) {
                (EventAction::Put, _, Some(incoming)) => {
                    let current = self.store.get_quiet(&incoming.key).await?;
                    let stale = current
                        .map(|c| c.last_update_time > incoming.last_update_time)
                        .unwrap_or(false);
                    if stale {
                        debug!(cache = %self.name(), key = %incoming.key, "skipping older replicated put");
                        continue;
                    }
                    self.store.put(incoming.clone()).await?;
                }
                (EventAction::Remove, Some(key), _) => {
                    self.store.remove(key).await?;
                }
                (EventAction::RemoveAll, _, _) => {
                    self.store.remove_all().await?;
                }
                _ => continue,
            }
            applied += 1;
        }
        Ok(applied)
    }

    /// Disposes listeners first so queued events still see a live store.
    pub async fn dispose(&self) {
        let listeners = std::mem::take(
            &mut *self
                .listeners
                .write()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for listener in listeners {
            listener.dispose().await;
        }
        self.store.dispose().await;
        info!(cache = %self.name(), "replicated cache disposed");
    }
}

#[derive(Clone, Copy)]
enum Change<'a> {
    Put(&'a Element),
    Updated(&'a Element),
    Removed(&'a Element),
    RemoveAll,
}
