//! Timeout Behaviors
//!
//! Fallback strategies invoked when a guarded call cannot complete within its
//! budget. Every strategy exposes the guarded surface; the provided methods of
//! [`TimeoutBehavior`] return neutral values (empty collections, `None`, zero,
//! `false`) after asking [`TimeoutBehavior::admit`] whether the operation may
//! proceed at all.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use crate::cache::{CacheKey, Element, StoreHandle};
use crate::config::TimeoutBehaviorKind;
use crate::error::{CacheError, Result};
use crate::nonstop::OperationKind;

// == Timeout Behavior Trait ==
#[async_trait]
pub trait TimeoutBehavior: Send + Sync {
    fn kind(&self) -> TimeoutBehaviorKind;

    /// Decides whether `op` yields a value or an error under this strategy.
    fn admit(&self, _op: OperationKind) -> Result<()> {
        Ok(())
    }

    async fn get(&self, _key: &CacheKey) -> Result<Option<Element>> {
        self.admit(OperationKind::Get)?;
        Ok(None)
    }

    async fn get_quiet(&self, _key: &CacheKey) -> Result<Option<Element>> {
        self.admit(OperationKind::GetQuiet)?;
        Ok(None)
    }

    async fn get_all(&self, _keys: &[CacheKey]) -> Result<HashMap<CacheKey, Option<Element>>> {
        self.admit(OperationKind::GetAll)?;
        Ok(HashMap::new())
    }

    async fn get_all_quiet(
        &self,
        _keys: &[CacheKey],
    ) -> Result<HashMap<CacheKey, Option<Element>>> {
        self.admit(OperationKind::GetAllQuiet)?;
        Ok(HashMap::new())
    }

    async fn put(&self, _element: Element) -> Result<bool> {
        self.admit(OperationKind::Put)?;
        Ok(false)
    }

    async fn put_all(&self, _elements: Vec<Element>) -> Result<()> {
        self.admit(OperationKind::PutAll)
    }

    async fn remove(&self, _key: &CacheKey) -> Result<Option<Element>> {
        self.admit(OperationKind::Remove)?;
        Ok(None)
    }

    async fn remove_keys(&self, _keys: &[CacheKey]) -> Result<()> {
        self.admit(OperationKind::RemoveKeys)
    }

    async fn remove_all(&self) -> Result<()> {
        self.admit(OperationKind::RemoveAll)
    }

    async fn put_if_absent(&self, _element: Element) -> Result<Option<Element>> {
        self.admit(OperationKind::PutIfAbsent)?;
        Ok(None)
    }

    async fn remove_element(&self, _element: &Element) -> Result<Option<Element>> {
        self.admit(OperationKind::RemoveElement)?;
        Ok(None)
    }

    async fn replace_element(&self, _old: &Element, _element: Element) -> Result<bool> {
        self.admit(OperationKind::ReplaceElement)?;
        Ok(false)
    }

    async fn contains_key(&self, _key: &CacheKey) -> Result<bool> {
        self.admit(OperationKind::ContainsKey)?;
        Ok(false)
    }

    async fn keys(&self) -> Result<Vec<CacheKey>> {
        self.admit(OperationKind::Keys)?;
        Ok(Vec::new())
    }

    async fn size(&self) -> Result<usize> {
        self.admit(OperationKind::Size)?;
        Ok(0)
    }

    async fn clustered_size(&self) -> Result<usize> {
        self.admit(OperationKind::ClusteredSize)?;
        Ok(0)
    }

    async fn set_node_coherent(&self, _coherent: bool) -> Result<()> {
        self.admit(OperationKind::SetNodeCoherent)
    }

    async fn is_node_coherent(&self) -> Result<bool> {
        self.admit(OperationKind::IsNodeCoherent)?;
        Ok(false)
    }

    async fn is_cluster_coherent(&self) -> Result<bool> {
        self.admit(OperationKind::IsClusterCoherent)?;
        Ok(false)
    }

    async fn wait_until_cluster_coherent(&self) -> Result<()> {
        self.admit(OperationKind::WaitUntilClusterCoherent)
    }

    async fn flush(&self) -> Result<()> {
        self.admit(OperationKind::Flush)
    }

    async fn expire_elements(&self) -> Result<usize> {
        self.admit(OperationKind::ExpireElements)?;
        Ok(0)
    }

    // == Local tiers ==
    fn unsafe_get(&self, _key: &CacheKey) -> Option<Element> {
        None
    }

    fn local_keys(&self) -> Vec<CacheKey> {
        Vec::new()
    }

    fn contains_key_in_memory(&self, _key: &CacheKey) -> bool {
        false
    }

    fn contains_key_off_heap(&self, _key: &CacheKey) -> bool {
        false
    }

    fn in_memory_size(&self) -> usize {
        0
    }

    fn in_memory_size_in_bytes(&self) -> u64 {
        0
    }

    fn off_heap_size(&self) -> usize {
        0
    }

    fn off_heap_size_in_bytes(&self) -> u64 {
        0
    }
}

// == NOOP ==
/// Neutral values, no side effects.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopOnTimeout;

#[async_trait]
impl TimeoutBehavior for NoopOnTimeout {
    fn kind(&self) -> TimeoutBehaviorKind {
        TimeoutBehaviorKind::Noop
    }
}

// == EXCEPTION ==
/// Every operation fails with [`CacheError::OperationTimedOut`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ExceptionOnTimeout;

#[async_trait]
impl TimeoutBehavior for ExceptionOnTimeout {
    fn kind(&self) -> TimeoutBehaviorKind {
        TimeoutBehaviorKind::Exception
    }

    fn admit(&self, op: OperationKind) -> Result<()> {
        Err(CacheError::OperationTimedOut {
            operation: op.name(),
        })
    }
}

// == LOCAL_READS ==
/// Reads come from the local tiers of the last bound store. Writes are neutral
/// and never reach the store.
#[derive(Clone)]
pub struct LocalReadsOnTimeout {
    delegate: Arc<dyn StoreHandle>,
}

impl LocalReadsOnTimeout {
    pub fn new(delegate: Arc<dyn StoreHandle>) -> Self {
        Self { delegate }
    }

    fn local_map(&self, keys: &[CacheKey]) -> HashMap<CacheKey, Option<Element>> {
        keys.iter()
            .map(|key| (key.clone(), self.delegate.unsafe_get(key)))
            .collect()
    }
}

#[async_trait]
impl TimeoutBehavior for LocalReadsOnTimeout {
    fn kind(&self) -> TimeoutBehaviorKind {
        TimeoutBehaviorKind::LocalReads
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Element>> {
        Ok(self.delegate.unsafe_get(key))
    }

    async fn get_quiet(&self, key: &CacheKey) -> Result<Option<Element>> {
        Ok(self.delegate.unsafe_get(key))
    }

    async fn get_all(&self, keys: &[CacheKey]) -> Result<HashMap<CacheKey, Option<Element>>> {
        Ok(self.local_map(keys))
    }

    async fn get_all_quiet(
        &self,
        keys: &[CacheKey],
    ) -> Result<HashMap<CacheKey, Option<Element>>> {
        Ok(self.local_map(keys))
    }

    async fn contains_key(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.contains_key_in_memory(key))
    }

    async fn keys(&self) -> Result<Vec<CacheKey>> {
        Ok(self.delegate.local_keys())
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.delegate.local_keys().len())
    }

    async fn clustered_size(&self) -> Result<usize> {
        Ok(self.delegate.local_keys().len())
    }

    fn unsafe_get(&self, key: &CacheKey) -> Option<Element> {
        self.delegate.unsafe_get(key)
    }

    fn local_keys(&self) -> Vec<CacheKey> {
        self.delegate.local_keys()
    }

    fn contains_key_in_memory(&self, key: &CacheKey) -> bool {
        self.delegate.contains_key_in_memory(key)
    }

    fn in_memory_size(&self) -> usize {
        self.delegate.in_memory_size()
    }

    fn in_memory_size_in_bytes(&self) -> u64 {
        self.delegate.in_memory_size_in_bytes()
    }
}

// == LOCAL_READS_AND_EXCEPTION_ON_WRITES ==
/// Reads as [`LocalReadsOnTimeout`] (neutral without a store); writes fail with
/// [`CacheError::WriteRejected`].
#[derive(Clone, Default)]
pub struct LocalReadsAndExceptionOnWrites {
    reads: Option<LocalReadsOnTimeout>,
}

impl LocalReadsAndExceptionOnWrites {
    pub fn new(delegate: Option<Arc<dyn StoreHandle>>) -> Self {
        Self {
            reads: delegate.map(LocalReadsOnTimeout::new),
        }
    }
}

#[async_trait]
impl TimeoutBehavior for LocalReadsAndExceptionOnWrites {
    fn kind(&self) -> TimeoutBehaviorKind {
        TimeoutBehaviorKind::LocalReadsAndExceptionOnWrites
    }

    fn admit(&self, op: OperationKind) -> Result<()> {
        if op.is_write() {
            return Err(CacheError::WriteRejected {
                operation: op.name(),
            });
        }
        Ok(())
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Element>> {
        Ok(self.unsafe_get(key))
    }

    async fn get_quiet(&self, key: &CacheKey) -> Result<Option<Element>> {
        Ok(self.unsafe_get(key))
    }

    async fn get_all(&self, keys: &[CacheKey]) -> Result<HashMap<CacheKey, Option<Element>>> {
        match &self.reads {
            Some(reads) => reads.get_all(keys).await,
            None => Ok(HashMap::new()),
        }
    }

    async fn get_all_quiet(
        &self,
        keys: &[CacheKey],
    ) -> Result<HashMap<CacheKey, Option<Element>>> {
        match &self.reads {
            Some(reads) => reads.get_all_quiet(keys).await,
            None => Ok(HashMap::new()),
        }
    }

    async fn contains_key(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.contains_key_in_memory(key))
    }

    async fn keys(&self) -> Result<Vec<CacheKey>> {
        Ok(self.local_keys())
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.local_keys().len())
    }

    async fn clustered_size(&self) -> Result<usize> {
        Ok(self.local_keys().len())
    }

    fn unsafe_get(&self, key: &CacheKey) -> Option<Element> {
        self.reads.as_ref().and_then(|reads| reads.unsafe_get(key))
    }

    fn local_keys(&self) -> Vec<CacheKey> {
        self.reads
            .as_ref()
            .map(|reads| reads.local_keys())
            .unwrap_or_default()
    }

    fn contains_key_in_memory(&self, key: &CacheKey) -> bool {
        self.reads
            .as_ref()
            .is_some_and(|reads| reads.contains_key_in_memory(key))
    }
}

// == Selection ==
/// The configured strategy of one guard, lazily bound to the guard's store.
///
/// The store is bound at most once. After [`release`](Self::release) the
/// selection behaves as if no store had ever been bound.
pub struct TimeoutBehaviorSelection {
    kind: TimeoutBehaviorKind,
    delegate: OnceLock<Arc<dyn StoreHandle>>,
    released: AtomicBool,
}

impl TimeoutBehaviorSelection {
    pub fn new(kind: TimeoutBehaviorKind) -> Self {
        Self {
            kind,
            delegate: OnceLock::new(),
            released: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> TimeoutBehaviorKind {
        self.kind
    }

    /// Binds the store local reads are served from; later binds are ignored.
    pub fn bind(&self, delegate: Arc<dyn StoreHandle>) {
        let _ = self.delegate.set(delegate);
    }

    /// Forgets the bound store.
    pub fn release(&self) {
        self.released.store(true, Ordering::Release);
    }

    fn delegate(&self) -> Option<Arc<dyn StoreHandle>> {
        if self.released.load(Ordering::Acquire) {
            return None;
        }
        self.delegate.get().cloned()
    }

    /// Resolves the strategy to run a fallback with.
    pub fn resolve(&self) -> Box<dyn TimeoutBehavior> {
        match self.kind {
            TimeoutBehaviorKind::Exception => Box::new(ExceptionOnTimeout),
            TimeoutBehaviorKind::Noop => Box::new(NoopOnTimeout),
            TimeoutBehaviorKind::LocalReads => match self.delegate() {
                Some(delegate) => Box::new(LocalReadsOnTimeout::new(delegate)),
                None => Box::new(NoopOnTimeout),
            },
            TimeoutBehaviorKind::LocalReadsAndExceptionOnWrites => {
                Box::new(LocalReadsAndExceptionOnWrites::new(self.delegate()))
            }
        }
    }
}

impl std::fmt::Debug for TimeoutBehaviorSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutBehaviorSelection")
            .field("kind", &self.kind)
            .field("bound", &self.delegate().is_some())
            .finish()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LocalStore;
    use std::time::Duration;

    async fn seeded_store() -> Arc<LocalStore> {
        let store = Arc::new(LocalStore::new("behaviors", 100, 0));
        store.put(Element::new("k", "v")).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_noop_returns_neutral_values() {
        let noop = NoopOnTimeout;
        assert!(noop.get(&"k".into()).await.unwrap().is_none());
        assert!(!noop.put(Element::new("k", "v")).await.unwrap());
        assert!(noop.keys().await.unwrap().is_empty());
        assert_eq!(noop.size().await.unwrap(), 0);
        assert!(!noop.contains_key(&"k".into()).await.unwrap());
        assert!(noop.get_all(&["k".into()]).await.unwrap().is_empty());
        assert!(noop.remove_all().await.is_ok());
        assert_eq!(noop.in_memory_size(), 0);
    }

    #[tokio::test]
    async fn test_exception_raises_for_every_guarded_operation() {
        let exception = ExceptionOnTimeout;
        for op in OperationKind::ALL {
            let err = exception.admit(op).unwrap_err();
            assert!(
                matches!(err, CacheError::OperationTimedOut { operation } if operation == op.name())
            );
        }
        assert!(matches!(
            exception.get(&"k".into()).await,
            Err(CacheError::OperationTimedOut { operation: "get" })
        ));
        assert!(matches!(
            exception.remove_all().await,
            Err(CacheError::OperationTimedOut { operation: "remove_all" })
        ));
    }

    #[tokio::test]
    async fn test_local_reads_serves_from_local_tiers() {
        let store = seeded_store().await;
        store.set_fault(Some(crate::cache::Fault::Latency(Duration::from_secs(60))));
        let behavior = LocalReadsOnTimeout::new(store.clone());

        let element = behavior.get(&"k".into()).await.unwrap().unwrap();
        assert_eq!(element.value, "v".into());
        assert!(behavior.contains_key(&"k".into()).await.unwrap());
        assert_eq!(behavior.keys().await.unwrap(), vec![CacheKey::from("k")]);
        assert_eq!(behavior.size().await.unwrap(), 1);

        let all = behavior.get_all(&["k".into(), "x".into()]).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[&CacheKey::from("x")].is_none());
    }

    #[tokio::test]
    async fn test_local_reads_writes_leave_store_untouched() {
        let store = seeded_store().await;
        let puts_before = store.stats().puts;
        let behavior = LocalReadsOnTimeout::new(store.clone());

        assert!(!behavior.put(Element::new("n", "1")).await.unwrap());
        assert!(behavior.remove(&"k".into()).await.unwrap().is_none());
        assert!(behavior
            .put_if_absent(Element::new("p", "1"))
            .await
            .unwrap()
            .is_none());
        assert!(!behavior
            .replace_element(&Element::new("k", "v"), Element::new("k", "w"))
            .await
            .unwrap());
        behavior.remove_all().await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.unsafe_get(&"n".into()).is_none());
        assert!(store.unsafe_get(&"p".into()).is_none());
        let kept = store.unsafe_get(&"k".into()).unwrap();
        assert_eq!(kept.value, "v".into());
        assert_eq!(kept.version, 1);
        assert_eq!(store.stats().puts, puts_before);
    }

    #[tokio::test]
    async fn test_local_reads_and_exception_rejects_writes() {
        let store = seeded_store().await;
        let behavior = LocalReadsAndExceptionOnWrites::new(Some(store.clone()));

        assert!(behavior.get(&"k".into()).await.unwrap().is_some());
        assert!(matches!(
            behavior.put(Element::new("k", "x")).await,
            Err(CacheError::WriteRejected { operation: "put" })
        ));
        assert!(matches!(
            behavior.remove(&"k".into()).await,
            Err(CacheError::WriteRejected { operation: "remove" })
        ));
        assert_eq!(store.unsafe_get(&"k".into()).unwrap().value, "v".into());
    }

    #[tokio::test]
    async fn test_local_reads_and_exception_without_store_is_neutral_for_reads() {
        let behavior = LocalReadsAndExceptionOnWrites::new(None);
        assert!(behavior.get(&"k".into()).await.unwrap().is_none());
        assert!(behavior.keys().await.unwrap().is_empty());
        assert!(behavior.remove_all().await.is_err());
    }

    #[tokio::test]
    async fn test_selection_falls_back_to_noop_without_store() {
        let selection = TimeoutBehaviorSelection::new(TimeoutBehaviorKind::LocalReads);
        assert_eq!(selection.resolve().kind(), TimeoutBehaviorKind::Noop);

        let store = seeded_store().await;
        selection.bind(store);
        let behavior = selection.resolve();
        assert_eq!(behavior.kind(), TimeoutBehaviorKind::LocalReads);
        assert!(behavior.get(&"k".into()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_released_selection_behaves_as_never_bound() {
        let selection = TimeoutBehaviorSelection::new(TimeoutBehaviorKind::LocalReads);
        selection.bind(seeded_store().await);
        selection.release();

        let behavior = selection.resolve();
        assert_eq!(behavior.kind(), TimeoutBehaviorKind::Noop);
        assert!(behavior.get(&"k".into()).await.unwrap().is_none());
    }

    #[test]
    fn test_selection_honors_fixed_kinds() {
        let exception = TimeoutBehaviorSelection::new(TimeoutBehaviorKind::Exception);
        assert_eq!(exception.resolve().kind(), TimeoutBehaviorKind::Exception);
        let noop = TimeoutBehaviorSelection::new(TimeoutBehaviorKind::Noop);
        assert_eq!(noop.resolve().kind(), TimeoutBehaviorKind::Noop);
    }
}
