//! Nonstop Store
//!
//! `NonstopStore` wraps a possibly unavailable clustered store so that every
//! call returns within a bounded time. With nonstop enabled, the store is
//! brought up by a background initializer and calls that cannot be served in
//! time are routed to the configured [`TimeoutBehavior`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheKey, Element, StoreFactory, StoreHandle, WriteBehind};
use crate::config::{NonstopConfig, TimeoutBehaviorKind};
use crate::error::{CacheError, InitError, Result, StoreError, StoreResult};
use crate::nonstop::{
    BoundedScope, Dispatch, GuardState, GuardStats, GuardStatsSnapshot, InitState,
    NonstopWriteBehind, NoopOnTimeout, OperationKind, Outcome, TimeoutBehavior,
    TimeoutBehaviorSelection,
};

/// Why a guarded call could not reach the store.
enum Unready {
    Timeout,
    Immediate,
    Failed(String),
}

/// Diagnostic view of a guard.
#[derive(Debug, Clone, Serialize)]
pub struct GuardContext {
    pub cache_name: String,
    pub nonstop_enabled: bool,
    pub initialized: bool,
    pub initialization_error: Option<String>,
    pub timeout_behavior: TimeoutBehaviorKind,
    pub stats: GuardStatsSnapshot,
}

// == Nonstop Store ==
pub struct NonstopStore {
    cache_name: String,
    config: NonstopConfig,
    state: Arc<GuardState>,
    behavior: Arc<TimeoutBehaviorSelection>,
    stats: GuardStats,
    initializer: Mutex<Option<JoinHandle<()>>>,
}

impl NonstopStore {
    // == Constructor ==
    /// Creates the guard for one cache.
    ///
    /// With nonstop enabled this returns at once and the store comes up in the
    /// background. Otherwise the store is created before returning, retrying
    /// on rejoin signals without limit.
    pub async fn new(
        cache_name: impl Into<String>,
        config: NonstopConfig,
        factory: Arc<dyn StoreFactory>,
    ) -> Result<Self> {
        config.validate()?;
        let store = Self {
            cache_name: cache_name.into(),
            behavior: Arc::new(TimeoutBehaviorSelection::new(config.timeout_behavior)),
            state: Arc::new(GuardState::new()),
            stats: GuardStats::new(),
            initializer: Mutex::new(None),
            config,
        };

        if store.config.enabled {
            let initializer = Initializer {
                cache_name: store.cache_name.clone(),
                factory,
                state: store.state.clone(),
                behavior: store.behavior.clone(),
                deadline: store.config.async_init_deadline(),
                retry_interval: store.config.rejoin_retry_interval(),
            };
            let handle = tokio::spawn(initializer.run());
            *store
                .initializer
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        } else {
            let delegate = loop {
                match factory.create().await {
                    Ok(delegate) => break delegate,
                    Err(InitError::Rejoin) => {
                        info!(cache = %store.cache_name, "rejoin during store creation, retrying");
                        tokio::time::sleep(store.config.rejoin_retry_interval()).await;
                    }
                    Err(e) => {
                        error!(cache = %store.cache_name, error = %e, "store creation failed");
                        return Err(CacheError::initialization(&store.cache_name, e.to_string()));
                    }
                }
            };
            install(&store.state, &store.behavior, &store.cache_name, delegate).await;
        }

        Ok(store)
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn config(&self) -> &NonstopConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.state.delegate().is_some()
    }

    pub fn stats(&self) -> GuardStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn internal_context(&self) -> GuardContext {
        GuardContext {
            cache_name: self.cache_name.clone(),
            nonstop_enabled: self.config.enabled,
            initialized: self.is_initialized(),
            initialization_error: self.state.initialization_error(),
            timeout_behavior: self.behavior.kind(),
            stats: self.stats.snapshot(),
        }
    }

    // == Dispatch ==
    /// Runs `call` against the store within the operation's budget, or
    /// `fallback` against the selected behavior when the store cannot answer.
    async fn guard<T, C, CF, F, FF>(&self, op: OperationKind, call: C, fallback: F) -> Result<T>
    where
        C: FnOnce(Arc<dyn StoreHandle>) -> CF,
        CF: Future<Output = StoreResult<T>> + Send + 'static,
        T: Send + 'static,
        F: FnOnce(Box<dyn TimeoutBehavior>) -> FF,
        FF: Future<Output = Result<T>>,
    {
        if !self.config.enabled {
            let delegate = self.state.delegate().ok_or_else(|| {
                CacheError::initialization(&self.cache_name, "store is not initialized")
            })?;
            return call(delegate).await.map_err(CacheError::from);
        }

        let budget = match op.dispatch() {
            Dispatch::Bulk => self.config.bulk_budget(),
            Dispatch::Guarded | Dispatch::LocalOnly => self.config.operation_budget(),
        };
        let scope = BoundedScope::enter(&self.stats, Some(budget));

        let delegate = match self.await_delegate(&scope).await {
            Ok(delegate) => delegate,
            Err(Unready::Timeout) => return self.fall_back(op, Outcome::Timeout, fallback).await,
            Err(Unready::Immediate) => {
                return self
                    .fall_back(op, Outcome::ImmediateFallback, fallback)
                    .await
            }
            Err(Unready::Failed(reason)) => {
                return Err(CacheError::initialization(&self.cache_name, reason))
            }
        };

        let remaining = scope.remaining().unwrap_or_default();
        match tokio::time::timeout(remaining, tokio::spawn(call(delegate))).await {
            Ok(Ok(Ok(value))) => {
                self.stats.record(Outcome::Success);
                Ok(value)
            }
            Ok(Ok(Err(StoreError::Timeout))) | Err(_) => {
                self.fall_back(op, Outcome::Timeout, fallback).await
            }
            Ok(Ok(Err(StoreError::RejoinInProgress))) => {
                self.fall_back(op, Outcome::RejoinTimeout, fallback).await
            }
            Ok(Ok(Err(StoreError::Uninitialized(reason)))) => {
                if self.behavior.kind() == TimeoutBehaviorKind::Exception {
                    return Err(CacheError::initialization(&self.cache_name, reason));
                }
                warn!(
                    cache = %self.cache_name,
                    operation = op.name(),
                    reason = %reason,
                    "store not initialized, using fallback"
                );
                self.fall_back(op, Outcome::InitFailureFallback, fallback).await
            }
            Ok(Ok(Err(other))) => Err(other.into()),
            Ok(Err(join_error)) => Err(CacheError::Internal(format!(
                "{} task failed: {}",
                op.name(),
                join_error
            ))),
        }
    }

    async fn await_delegate(
        &self,
        scope: &BoundedScope<'_>,
    ) -> std::result::Result<Arc<dyn StoreHandle>, Unready> {
        match self.state.current() {
            InitState::Ready(delegate) => return Ok(delegate),
            InitState::Failed(reason) => return Err(Unready::Failed(reason)),
            InitState::Pending if self.config.immediate_timeout => return Err(Unready::Immediate),
            InitState::Pending => {}
        }

        match self.state.wait_settled(scope.remaining()).await {
            Some(InitState::Ready(delegate)) => Ok(delegate),
            Some(InitState::Failed(reason)) => Err(Unready::Failed(reason)),
            _ => Err(Unready::Timeout),
        }
    }

    async fn fall_back<T, F, FF>(&self, op: OperationKind, outcome: Outcome, fallback: F) -> Result<T>
    where
        F: FnOnce(Box<dyn TimeoutBehavior>) -> FF,
        FF: Future<Output = Result<T>>,
    {
        self.stats.record(outcome);
        let behavior = self.behavior.resolve();
        debug!(
            cache = %self.cache_name,
            operation = op.name(),
            ?outcome,
            behavior = %behavior.kind(),
            "guarded call fell back"
        );
        fallback(behavior).await
    }

    // == Guarded Operations ==
    pub async fn get(&self, key: &CacheKey) -> Result<Option<Element>> {
        let owned = key.clone();
        self.guard(
            OperationKind::Get,
            move |store| async move { store.get(&owned).await },
            |behavior| async move { behavior.get(key).await },
        )
        .await
    }

    pub async fn get_quiet(&self, key: &CacheKey) -> Result<Option<Element>> {
        let owned = key.clone();
        self.guard(
            OperationKind::GetQuiet,
            move |store| async move { store.get_quiet(&owned).await },
            |behavior| async move { behavior.get_quiet(key).await },
        )
        .await
    }

    pub async fn get_all(&self, keys: &[CacheKey]) -> Result<HashMap<CacheKey, Option<Element>>> {
        let owned = keys.to_vec();
        self.guard(
            OperationKind::GetAll,
            move |store| async move { store.get_all(&owned).await },
            |behavior| async move { behavior.get_all(keys).await },
        )
        .await
    }

    pub async fn get_all_quiet(
        &self,
        keys: &[CacheKey],
    ) -> Result<HashMap<CacheKey, Option<Element>>> {
        let owned = keys.to_vec();
        self.guard(
            OperationKind::GetAllQuiet,
            move |store| async move { store.get_all_quiet(&owned).await },
            |behavior| async move { behavior.get_all_quiet(keys).await },
        )
        .await
    }

    /// Stores an element; returns true if the key was not present before.
    pub async fn put(&self, element: Element) -> Result<bool> {
        let copy = element.clone();
        self.guard(
            OperationKind::Put,
            move |store| async move { store.put(element).await },
            |behavior| async move { behavior.put(copy).await },
        )
        .await
    }

    pub async fn put_all(&self, elements: Vec<Element>) -> Result<()> {
        let copy = elements.clone();
        self.guard(
            OperationKind::PutAll,
            move |store| async move { store.put_all(elements).await },
            |behavior| async move { behavior.put_all(copy).await },
        )
        .await
    }

    pub async fn remove(&self, key: &CacheKey) -> Result<Option<Element>> {
        let owned = key.clone();
        self.guard(
            OperationKind::Remove,
            move |store| async move { store.remove(&owned).await },
            |behavior| async move { behavior.remove(key).await },
        )
        .await
    }

    pub async fn remove_keys(&self, keys: &[CacheKey]) -> Result<()> {
        let owned = keys.to_vec();
        self.guard(
            OperationKind::RemoveKeys,
            move |store| async move { store.remove_keys(&owned).await },
            |behavior| async move { behavior.remove_keys(keys).await },
        )
        .await
    }

    pub async fn remove_all(&self) -> Result<()> {
        self.guard(
            OperationKind::RemoveAll,
            |store| async move { store.remove_all().await },
            |behavior| async move { behavior.remove_all().await },
        )
        .await
    }

    pub async fn put_if_absent(&self, element: Element) -> Result<Option<Element>> {
        let copy = element.clone();
        self.guard(
            OperationKind::PutIfAbsent,
            move |store| async move { store.put_if_absent(element).await },
            |behavior| async move { behavior.put_if_absent(copy).await },
        )
        .await
    }

    pub async fn remove_element(&self, element: &Element) -> Result<Option<Element>> {
        let owned = element.clone();
        self.guard(
            OperationKind::RemoveElement,
            move |store| async move { store.remove_element(&owned).await },
            |behavior| async move { behavior.remove_element(element).await },
        )
        .await
    }

    pub async fn replace_element(&self, old: &Element, element: Element) -> Result<bool> {
        let owned_old = old.clone();
        let copy = element.clone();
        self.guard(
            OperationKind::ReplaceElement,
            move |store| async move { store.replace_element(&owned_old, element).await },
            |behavior| async move { behavior.replace_element(old, copy).await },
        )
        .await
    }

    pub async fn contains_key(&self, key: &CacheKey) -> Result<bool> {
        let owned = key.clone();
        self.guard(
            OperationKind::ContainsKey,
            move |store| async move { store.contains_key(&owned).await },
            |behavior| async move { behavior.contains_key(key).await },
        )
        .await
    }

    pub async fn keys(&self) -> Result<Vec<CacheKey>> {
        self.guard(
            OperationKind::Keys,
            |store| async move { store.keys().await },
            |behavior| async move { behavior.keys().await },
        )
        .await
    }

    pub async fn size(&self) -> Result<usize> {
        self.guard(
            OperationKind::Size,
            |store| async move { store.size().await },
            |behavior| async move { behavior.size().await },
        )
        .await
    }

    pub async fn clustered_size(&self) -> Result<usize> {
        self.guard(
            OperationKind::ClusteredSize,
            |store| async move { store.clustered_size().await },
            |behavior| async move { behavior.clustered_size().await },
        )
        .await
    }

    pub async fn set_node_coherent(&self, coherent: bool) -> Result<()> {
        self.guard(
            OperationKind::SetNodeCoherent,
            move |store| async move { store.set_node_coherent(coherent).await },
            move |behavior| async move { behavior.set_node_coherent(coherent).await },
        )
        .await
    }

    pub async fn is_node_coherent(&self) -> Result<bool> {
        self.guard(
            OperationKind::IsNodeCoherent,
            |store| async move { store.is_node_coherent().await },
            |behavior| async move { behavior.is_node_coherent().await },
        )
        .await
    }

    pub async fn is_cluster_coherent(&self) -> Result<bool> {
        self.guard(
            OperationKind::IsClusterCoherent,
            |store| async move { store.is_cluster_coherent().await },
            |behavior| async move { behavior.is_cluster_coherent().await },
        )
        .await
    }

    pub async fn flush(&self) -> Result<()> {
        self.guard(
            OperationKind::Flush,
            |store| async move { store.flush().await },
            |behavior| async move { behavior.flush().await },
        )
        .await
    }

    /// Drops expired elements from the store; returns how many were dropped.
    pub async fn expire_elements(&self) -> Result<usize> {
        self.guard(
            OperationKind::ExpireElements,
            |store| async move { store.expire_elements().await },
            |behavior| async move { behavior.expire_elements().await },
        )
        .await
    }

    // == Cluster Coherence ==
    /// Waits, without a time limit, until the cluster reports coherence.
    ///
    /// Rejoin signals are retried after the rejoin retry interval.
    pub async fn wait_until_cluster_coherent(&self) -> Result<()> {
        loop {
            let delegate = match self.state.wait_settled(None).await {
                Some(InitState::Ready(delegate)) => delegate,
                Some(InitState::Failed(reason)) => {
                    return Err(CacheError::initialization(&self.cache_name, reason))
                }
                _ => {
                    return Err(CacheError::Internal(
                        "store initialization was abandoned".to_string(),
                    ))
                }
            };

            match delegate.wait_until_cluster_coherent().await {
                Ok(()) => return Ok(()),
                Err(StoreError::RejoinInProgress) => {
                    debug!(cache = %self.cache_name, "rejoin while waiting for coherence, retrying");
                    tokio::time::sleep(self.config.rejoin_retry_interval()).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    // == Local-Only Operations ==
    pub fn unsafe_get(&self, key: &CacheKey) -> Option<Element> {
        match self.state.delegate() {
            Some(delegate) => delegate.unsafe_get(key),
            None => NoopOnTimeout.unsafe_get(key),
        }
    }

    pub fn local_keys(&self) -> Vec<CacheKey> {
        match self.state.delegate() {
            Some(delegate) => delegate.local_keys(),
            None => NoopOnTimeout.local_keys(),
        }
    }

    pub fn contains_key_in_memory(&self, key: &CacheKey) -> bool {
        match self.state.delegate() {
            Some(delegate) => delegate.contains_key_in_memory(key),
            None => NoopOnTimeout.contains_key_in_memory(key),
        }
    }

    pub fn contains_key_off_heap(&self, key: &CacheKey) -> bool {
        match self.state.delegate() {
            Some(delegate) => delegate.contains_key_off_heap(key),
            None => NoopOnTimeout.contains_key_off_heap(key),
        }
    }

    pub fn in_memory_size(&self) -> usize {
        match self.state.delegate() {
            Some(delegate) => delegate.in_memory_size(),
            None => NoopOnTimeout.in_memory_size(),
        }
    }

    pub fn in_memory_size_in_bytes(&self) -> u64 {
        match self.state.delegate() {
            Some(delegate) => delegate.in_memory_size_in_bytes(),
            None => NoopOnTimeout.in_memory_size_in_bytes(),
        }
    }

    pub fn off_heap_size(&self) -> usize {
        match self.state.delegate() {
            Some(delegate) => delegate.off_heap_size(),
            None => NoopOnTimeout.off_heap_size(),
        }
    }

    pub fn off_heap_size_in_bytes(&self) -> u64 {
        match self.state.delegate() {
            Some(delegate) => delegate.off_heap_size_in_bytes(),
            None => NoopOnTimeout.off_heap_size_in_bytes(),
        }
    }

    // == Lifecycle ==
    /// Hands out the cache's write-behind.
    ///
    /// Before the store is ready this is a placeholder that buffers operations
    /// until it can be bound. A cache has at most one write-behind.
    pub async fn create_write_behind(&self) -> Result<Arc<dyn WriteBehind>> {
        let mut slot = self.state.write_behind.lock().await;
        if slot.is_some() {
            return Err(CacheError::InvalidConfiguration(format!(
                "write-behind already created for cache '{}'",
                self.cache_name
            )));
        }

        let placeholder = Arc::new(NonstopWriteBehind::new());
        if let Some(delegate) = self.state.delegate() {
            placeholder.bind(delegate.create_write_behind()).await?;
        }
        *slot = Some(placeholder.clone());
        Ok(placeholder)
    }

    /// Stops initialization, the write-behind and the store.
    pub async fn dispose(&self) {
        let initializer = self
            .initializer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = initializer {
            handle.abort();
        }

        let write_behind = self.state.write_behind.lock().await.take();
        if let Some(write_behind) = write_behind {
            write_behind.stop().await;
        }

        self.behavior.release();
        if let Some(delegate) = self.state.delegate() {
            delegate.dispose();
        }
        info!(cache = %self.cache_name, "nonstop store disposed");
    }
}

impl std::fmt::Debug for NonstopStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonstopStore")
            .field("cache_name", &self.cache_name)
            .field("state", &self.state)
            .field("behavior", &self.behavior)
            .finish()
    }
}

/// Publishes a freshly created store to the guard.
async fn install(
    state: &GuardState,
    behavior: &TimeoutBehaviorSelection,
    cache_name: &str,
    delegate: Arc<dyn StoreHandle>,
) {
    if !state.install(delegate.clone()) {
        return;
    }
    behavior.bind(delegate.clone());

    let slot = state.write_behind.lock().await;
    if let Some(placeholder) = slot.as_ref() {
        if !placeholder.is_bound() {
            if let Err(e) = placeholder.bind(delegate.create_write_behind()).await {
                warn!(cache = %cache_name, error = %e, "failed to bind write-behind");
            }
        }
    }
    info!(cache = %cache_name, "clustered store ready");
}

// == Async Initializer ==
struct Initializer {
    cache_name: String,
    factory: Arc<dyn StoreFactory>,
    state: Arc<GuardState>,
    behavior: Arc<TimeoutBehaviorSelection>,
    deadline: Duration,
    retry_interval: Duration,
}

impl Initializer {
    async fn run(self) {
        let started = Instant::now();
        loop {
            match self.factory.create().await {
                Ok(delegate) => {
                    install(&self.state, &self.behavior, &self.cache_name, delegate).await;
                    return;
                }
                Err(InitError::Rejoin) => {
                    if started.elapsed() >= self.deadline {
                        let reason = format!(
                            "rejoin did not complete within {} ms",
                            self.deadline.as_millis()
                        );
                        error!(cache = %self.cache_name, %reason, "giving up on store initialization");
                        self.state.fail(reason);
                        return;
                    }
                    info!(cache = %self.cache_name, "rejoin during store creation, retrying");
                    tokio::time::sleep(self.retry_interval).await;
                }
                Err(e) => {
                    error!(cache = %self.cache_name, error = %e, "store initialization failed");
                    self.state.fail(e.to_string());
                    return;
                }
            }
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Fault, LocalStore, LocalStoreFactory};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedFactory {
        store: Arc<LocalStore>,
        delay: Duration,
        rejoins: AtomicUsize,
        fatal: Option<String>,
        calls: AtomicUsize,
    }

    impl ScriptedFactory {
        fn new(store: Arc<LocalStore>) -> Self {
            Self {
                store,
                delay: Duration::ZERO,
                rejoins: AtomicUsize::new(0),
                fatal: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn delayed(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn rejoining(self, times: usize) -> Self {
            self.rejoins.store(times, Ordering::SeqCst);
            self
        }

        fn failing(mut self, reason: &str) -> Self {
            self.fatal = Some(reason.to_string());
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StoreFactory for ScriptedFactory {
        async fn create(&self) -> std::result::Result<Arc<dyn StoreHandle>, InitError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if let Some(reason) = &self.fatal {
                return Err(InitError::Fatal(reason.clone()));
            }
            let remaining = self.rejoins.load(Ordering::SeqCst);
            if remaining > 0 {
                self.rejoins.store(remaining - 1, Ordering::SeqCst);
                return Err(InitError::Rejoin);
            }
            Ok(self.store.clone())
        }
    }

    fn config(timeout_millis: u64, behavior: TimeoutBehaviorKind) -> NonstopConfig {
        NonstopConfig {
            enabled: true,
            timeout_millis,
            timeout_behavior: behavior,
            rejoin_retry_interval_millis: 10,
            ..NonstopConfig::default()
        }
    }

    async fn seeded() -> Arc<LocalStore> {
        let store = Arc::new(LocalStore::new("guarded", 100, 0));
        store.put(Element::new("k", "v")).await.unwrap();
        store
    }

    async fn ready_guard(
        timeout_millis: u64,
        behavior: TimeoutBehaviorKind,
    ) -> (NonstopStore, Arc<LocalStore>) {
        let store = seeded().await;
        let factory = Arc::new(LocalStoreFactory::new(store.clone()));
        let guard = NonstopStore::new("guarded", config(timeout_millis, behavior), factory)
            .await
            .unwrap();
        guard.wait_until_cluster_coherent().await.unwrap();
        (guard, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_initialization_returns_neutral_then_real_value() {
        let factory = Arc::new(
            ScriptedFactory::new(seeded().await).delayed(Duration::from_millis(500)),
        );
        let guard = NonstopStore::new("c", config(50, TimeoutBehaviorKind::Noop), factory)
            .await
            .unwrap();

        let started = Instant::now();
        assert!(guard.get(&"k".into()).await.unwrap().is_none());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(550)).await;
        let element = guard.get(&"k".into()).await.unwrap().unwrap();
        assert_eq!(element.value, "v".into());
        assert_eq!(guard.stats().timeouts, 1);
        assert_eq!(guard.stats().successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exception_behavior_raises_on_slow_store() {
        let (guard, store) = ready_guard(50, TimeoutBehaviorKind::Exception).await;
        store.set_fault(Some(Fault::Latency(Duration::from_secs(1))));

        let started = Instant::now();
        let result = guard.get(&"k".into()).await;
        assert!(matches!(result, Err(CacheError::OperationTimedOut { operation: "get" })));
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_operations_get_the_larger_budget() {
        let (guard, store) = ready_guard(50, TimeoutBehaviorKind::Noop).await;
        store.set_fault(Some(Fault::Latency(Duration::from_millis(200))));

        assert!(guard.get(&"k".into()).await.unwrap().is_none());
        assert_eq!(guard.size().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_initialization() {
        let factory = Arc::new(
            ScriptedFactory::new(seeded().await).delayed(Duration::from_millis(100)),
        );
        let guard = Arc::new(
            NonstopStore::new("c", config(1_000, TimeoutBehaviorKind::Exception), factory.clone())
                .await
                .unwrap(),
        );

        let mut callers = Vec::new();
        for _ in 0..16 {
            let guard = guard.clone();
            callers.push(tokio::spawn(async move { guard.get(&"k".into()).await }));
        }
        for caller in callers {
            let element = caller.await.unwrap().unwrap().unwrap();
            assert_eq!(element.value, "v".into());
        }
        assert_eq!(factory.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initializer_retries_rejoins() {
        let factory = Arc::new(ScriptedFactory::new(seeded().await).rejoining(2));
        let guard = NonstopStore::new("c", config(1_000, TimeoutBehaviorKind::Exception), factory.clone())
            .await
            .unwrap();

        assert!(guard.get(&"k".into()).await.unwrap().is_some());
        assert_eq!(factory.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initializer_gives_up_after_deadline() {
        let factory = Arc::new(ScriptedFactory::new(seeded().await).rejoining(usize::MAX));
        let mut config = config(1_000, TimeoutBehaviorKind::Noop);
        config.async_init_deadline_millis = 50;
        let guard = NonstopStore::new("c", config, factory).await.unwrap();

        let result = guard.get(&"k".into()).await;
        assert!(matches!(result, Err(CacheError::InitializationFailure { .. })));
        assert!(guard.internal_context().initialization_error.is_some());

        // terminal: later calls fail the same way without waiting
        assert!(matches!(
            guard.put(Element::new("x", "y")).await,
            Err(CacheError::InitializationFailure { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_factory_error_is_terminal() {
        let factory = Arc::new(ScriptedFactory::new(seeded().await).failing("no toolkit"));
        let guard = NonstopStore::new("c", config(1_000, TimeoutBehaviorKind::LocalReads), factory.clone())
            .await
            .unwrap();

        let err = guard.get(&"k".into()).await.unwrap_err();
        assert!(err.to_string().contains("no toolkit"));
        assert_eq!(factory.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_timeout_does_not_wait() {
        let factory = Arc::new(
            ScriptedFactory::new(seeded().await).delayed(Duration::from_secs(10)),
        );
        let mut config = config(1_000, TimeoutBehaviorKind::Noop);
        config.immediate_timeout = true;
        let guard = NonstopStore::new("c", config, factory).await.unwrap();

        let started = Instant::now();
        assert!(guard.get(&"k".into()).await.unwrap().is_none());
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(guard.stats().immediate_fallbacks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_signal_falls_back_with_distinct_outcome() {
        let (guard, store) = ready_guard(1_000, TimeoutBehaviorKind::LocalReads).await;
        store.set_fault(Some(Fault::Signal(StoreError::RejoinInProgress)));

        let element = guard.get(&"k".into()).await.unwrap().unwrap();
        assert_eq!(element.value, "v".into());
        assert_eq!(guard.stats().rejoin_timeouts, 1);
        assert_eq!(guard.stats().timeouts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uninitialized_signal_follows_behavior() {
        let (exception, store) = ready_guard(1_000, TimeoutBehaviorKind::Exception).await;
        store.set_fault(Some(Fault::Signal(StoreError::Uninitialized("evicted".into()))));
        assert!(matches!(
            exception.get(&"k".into()).await,
            Err(CacheError::InitializationFailure { .. })
        ));

        let (noop, store) = ready_guard(1_000, TimeoutBehaviorKind::Noop).await;
        store.set_fault(Some(Fault::Signal(StoreError::Uninitialized("evicted".into()))));
        assert!(noop.get(&"k".into()).await.unwrap().is_none());
        assert_eq!(noop.stats().init_failure_fallbacks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_store_failures_propagate() {
        let (guard, store) = ready_guard(1_000, TimeoutBehaviorKind::Noop).await;
        store.set_fault(Some(Fault::Signal(StoreError::Failed("disk".into()))));
        assert!(matches!(
            guard.get(&"k".into()).await,
            Err(CacheError::Store(StoreError::Failed(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_write_still_lands_after_fallback() {
        let (guard, store) = ready_guard(50, TimeoutBehaviorKind::Noop).await;
        store.set_fault(Some(Fault::Latency(Duration::from_millis(200))));

        assert!(!guard.put(Element::new("late", "1")).await.unwrap());
        assert!(store.unsafe_get(&"late".into()).is_none());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(store.unsafe_get(&"late".into()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_reads_timed_out_write_lands_once() {
        let (guard, store) = ready_guard(50, TimeoutBehaviorKind::LocalReads).await;
        store.set_fault(Some(Fault::Latency(Duration::from_millis(200))));
        let puts_before = store.stats().puts;

        assert!(!guard.put(Element::new("late", "1")).await.unwrap());
        tokio::time::sleep(Duration::from_millis(500)).await;

        let landed = store.unsafe_get(&"late".into()).unwrap();
        assert_eq!(landed.version, 1);
        assert_eq!(store.stats().puts, puts_before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_only_operations_bypass_initialization() {
        let factory = Arc::new(
            ScriptedFactory::new(seeded().await).delayed(Duration::from_secs(10)),
        );
        let guard = NonstopStore::new("c", config(1_000, TimeoutBehaviorKind::Exception), factory)
            .await
            .unwrap();

        let started = Instant::now();
        assert!(guard.unsafe_get(&"k".into()).is_none());
        assert!(guard.local_keys().is_empty());
        assert_eq!(guard.in_memory_size(), 0);
        assert_eq!(started.elapsed(), Duration::ZERO);

        let (ready, _) = ready_guard(1_000, TimeoutBehaviorKind::Exception).await;
        assert!(ready.unsafe_get(&"k".into()).is_some());
        assert!(ready.contains_key_in_memory(&"k".into()));
        assert!(!ready.contains_key_off_heap(&"k".into()));
        assert_eq!(ready.in_memory_size(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_behind_placeholder_binds_once_ready() {
        let factory = Arc::new(
            ScriptedFactory::new(seeded().await).delayed(Duration::from_millis(100)),
        );
        let guard = NonstopStore::new("c", config(1_000, TimeoutBehaviorKind::Noop), factory)
            .await
            .unwrap();

        let write_behind = guard.create_write_behind().await.unwrap();
        write_behind.write(Element::new("a", "1")).await.unwrap();
        assert_eq!(write_behind.pending(), 1);

        assert!(matches!(
            guard.create_write_behind().await,
            Err(CacheError::InvalidConfiguration(_))
        ));

        guard.wait_until_cluster_coherent().await.unwrap();
        write_behind.delete(CacheKey::from("a")).await.unwrap();
        assert_eq!(write_behind.pending(), 2);
    }

    #[tokio::test]
    async fn test_write_behind_on_ready_store_is_bound_immediately() {
        let (guard, _) = ready_guard(1_000, TimeoutBehaviorKind::Noop).await;
        let write_behind = guard.create_write_behind().await.unwrap();
        write_behind.write(Element::new("a", "1")).await.unwrap();
        assert_eq!(write_behind.pending(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_nonstop_initializes_before_returning() {
        let factory = Arc::new(ScriptedFactory::new(seeded().await).rejoining(1));
        let config = NonstopConfig {
            rejoin_retry_interval_millis: 10,
            ..NonstopConfig::default()
        };
        let guard = NonstopStore::new("c", config, factory.clone()).await.unwrap();

        assert!(guard.is_initialized());
        assert_eq!(factory.calls(), 2);
        assert!(guard.get(&"k".into()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_disabled_nonstop_surfaces_factory_failure() {
        let factory = Arc::new(ScriptedFactory::new(seeded().await).failing("bad config"));
        let result = NonstopStore::new("c", NonstopConfig::default(), factory).await;
        assert!(matches!(result, Err(CacheError::InitializationFailure { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_cluster_coherent_retries_rejoins() {
        let (guard, store) = ready_guard(1_000, TimeoutBehaviorKind::Exception).await;
        store.set_fault(Some(Fault::Signal(StoreError::RejoinInProgress)));

        let healer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            healer.set_fault(None);
        });

        guard.wait_until_cluster_coherent().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disposed_store_reads_as_never_bound() {
        let (guard, _) = ready_guard(1_000, TimeoutBehaviorKind::LocalReads).await;
        guard.dispose().await;

        assert!(guard.get(&"k".into()).await.unwrap().is_none());
        assert_eq!(guard.stats().init_failure_fallbacks, 1);
    }

    #[tokio::test]
    async fn test_internal_context_reports_state() {
        let (guard, _) = ready_guard(1_000, TimeoutBehaviorKind::LocalReads).await;
        let context = guard.internal_context();
        assert_eq!(context.cache_name, "guarded");
        assert!(context.initialized);
        assert!(context.nonstop_enabled);
        assert_eq!(context.timeout_behavior, TimeoutBehaviorKind::LocalReads);
    }
}
