//! Resource Manager
//!
//! Async loading over the cache: one registered loader per resource kind,
//! single-flight coalescing of concurrent loads, dependency-ordered
//! preloading, load timeouts, bounded error-cleanup timers, and hot reload
//! of watched paths.
//!
//! # Single-Flight
//!
//! Concurrent `load` calls for the same id must invoke the loader once. A
//! `tokio::sync::Mutex` serialises only the *decision* to create the
//! in-flight future and its insertion into the pending map — never the load
//! itself. The lookup is double-checked under the mutex to cover the race
//! where a second caller queued behind the first's `await`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::errors::{CathodeError, Result};
use crate::resources::cache::{CacheConfig, ResourceCache};
use crate::resources::deps::DependencyTracker;
use crate::resources::entry::{Resource, ResourceEntry, ResourceHandle, ResourceState};
use crate::resources::profiler::{LeakReport, MemoryProfiler, MemorySnapshot, ProfilerConfig};

/// Default delay before a failed entry is swept from the cache.
pub const DEFAULT_ERROR_CLEANUP: Duration = Duration::from_secs(5);
/// Cap on concurrently scheduled cleanup timers; oldest evicted first.
pub const CLEANUP_TIMER_CAP: usize = 100;

/// Per-call load options.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Bypass the cache and invoke the loader again.
    pub force_reload: bool,
    /// Load declared dependencies first, in topological order.
    pub load_dependencies: bool,
    /// Reject the load after this long.
    pub timeout: Option<Duration>,
}

/// One registered loader. `load` returns an owned future so it can be
/// shared across every waiter of a single flight.
pub trait ResourceLoader: Send + Sync {
    /// Optional pre-filter; defaults to accepting every id.
    fn can_load(&self, _id: &str) -> bool {
        true
    }

    fn load(&self, id: &str, options: &LoadOptions) -> BoxFuture<'static, Result<Resource>>;

    /// Optional teardown when an entry leaves the cache.
    fn unload(&self, _id: &str) {}
}

type SharedLoad = Shared<BoxFuture<'static, ()>>;

/// Load/reload counters.
#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    reloads: AtomicU64,
    loader_invocations: AtomicU64,
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerStats {
    pub hits: u64,
    pub misses: u64,
    pub reloads: u64,
    pub loader_invocations: u64,
}

/// The resource manager. Constructed as an `Arc` because load futures must
/// outlive the call that spawned them.
pub struct ResourceManager {
    cache: Mutex<ResourceCache>,
    deps: Mutex<DependencyTracker>,
    loaders: RwLock<FxHashMap<String, Arc<dyn ResourceLoader>>>,
    /// Kind last requested per id, used when preloading dependencies.
    kinds: Mutex<FxHashMap<String, String>>,
    /// In-flight loads keyed by id; the token identifies the creator so a
    /// replacement flight (hot reload) is never removed by a stale waiter.
    pending: AsyncMutex<FxHashMap<String, (u64, SharedLoad)>>,
    next_token: AtomicU64,
    cleanup_timers: Mutex<Vec<(String, JoinHandle<()>)>>,
    watchers: Mutex<FxHashMap<String, JoinHandle<()>>>,
    counters: Counters,
    error_cleanup_delay: Duration,
}

impl ResourceManager {
    #[must_use]
    pub fn new(config: CacheConfig) -> Arc<Self> {
        Self::with_error_cleanup_delay(config, DEFAULT_ERROR_CLEANUP)
    }

    /// Constructs with a custom failed-entry cleanup delay.
    #[must_use]
    pub fn with_error_cleanup_delay(config: CacheConfig, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            cache: Mutex::new(ResourceCache::new(config)),
            deps: Mutex::new(DependencyTracker::new()),
            loaders: RwLock::new(FxHashMap::default()),
            kinds: Mutex::new(FxHashMap::default()),
            pending: AsyncMutex::new(FxHashMap::default()),
            next_token: AtomicU64::new(0),
            cleanup_timers: Mutex::new(Vec::new()),
            watchers: Mutex::new(FxHashMap::default()),
            counters: Counters::default(),
            error_cleanup_delay: delay,
        })
    }

    // ========================================================================
    // Loader registry
    // ========================================================================

    /// Registers the loader for `kind`, replacing any previous one.
    pub fn register_loader(&self, kind: &str, loader: Arc<dyn ResourceLoader>) {
        if self.loaders.write().insert(kind.to_string(), loader).is_some() {
            log::warn!("loader for '{kind}' replaced");
        }
    }

    /// Removes the loader for `kind`. Cached entries are untouched.
    pub fn unregister_loader(&self, kind: &str) -> bool {
        self.loaders.write().remove(kind).is_some()
    }

    #[must_use]
    pub fn has_loader(&self, kind: &str) -> bool {
        self.loaders.read().contains_key(kind)
    }

    // ========================================================================
    // Dependencies
    // ========================================================================

    /// Declares `a → b` before either is loaded. `kind_of_b` teaches the
    /// manager which loader serves `b` during dependency preloading.
    pub fn add_dependency(&self, a: &str, b: &str, kind_of_b: Option<&str>) {
        self.deps.lock().add_dependency(a, b);
        if let Some(kind) = kind_of_b {
            self.kinds.lock().insert(b.to_string(), kind.to_string());
        }
    }

    /// Runs `f` against the dependency graph.
    pub fn with_dependencies<R>(&self, f: impl FnOnce(&DependencyTracker) -> R) -> R {
        f(&self.deps.lock())
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Loads `id` through the loader registered for `kind`.
    ///
    /// Boxed so dependency preloading can recurse.
    pub fn load(
        self: &Arc<Self>,
        id: &str,
        kind: &str,
        options: LoadOptions,
    ) -> BoxFuture<'static, Result<ResourceHandle>> {
        let manager = Arc::clone(self);
        let id = id.to_string();
        let kind = kind.to_string();
        Box::pin(async move { manager.load_inner(&id, &kind, options).await })
    }

    async fn load_inner(self: Arc<Self>, id: &str, kind: &str, options: LoadOptions) -> Result<ResourceHandle> {
        self.kinds.lock().insert(id.to_string(), kind.to_string());

        // 1. Cache check. Kind enforcement happens here and only here.
        if let Some(entry) = self.cache.lock().peek(id) {
            if entry.kind() != kind {
                return Err(CathodeError::TypeMismatch {
                    id: id.to_string(),
                    cached: entry.kind().to_string(),
                    requested: kind.to_string(),
                });
            }
            match entry.state() {
                // 2. Hot hit.
                ResourceState::Loaded if !options.force_reload => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    entry.touch();
                    return Ok(ResourceHandle::new(entry));
                }
                // 4. Sticky error until a force reload.
                ResourceState::Error if !options.force_reload => {
                    return Err(CathodeError::LoaderFailure {
                        id: id.to_string(),
                        reason: entry.error().unwrap_or_else(|| "unknown".into()),
                    });
                }
                _ => {}
            }
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        // 3/5. Join the in-flight load or create one under the single-flight
        // mutex. Only future creation is serialised.
        let (token, shared, created) = {
            let mut pending = self.pending.lock().await;
            let in_flight = pending.get(id).map(|(token, shared)| (*token, shared.clone()));
            match in_flight {
                // Join the existing flight.
                Some((token, shared)) if !options.force_reload => (token, shared, false),
                // A reload replaces the flight; old waiters resolve against
                // the new value when it lands.
                Some(_) => {
                    let (token, shared) = self.create_flight(&mut pending, id, kind, &options);
                    (token, shared, true)
                }
                None => {
                    // Double-checked: the load may have completed while this
                    // task queued on the mutex.
                    if !options.force_reload {
                        if let Some(entry) = self.cache.lock().peek(id) {
                            if entry.state() == ResourceState::Loaded {
                                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                                entry.touch();
                                return Ok(ResourceHandle::new(entry));
                            }
                        }
                    }
                    let (token, shared) = self.create_flight(&mut pending, id, kind, &options);
                    (token, shared, true)
                }
            }
        };

        shared.await;

        // The creator retires its own flight; a stale waiter must not drop a
        // replacement flight registered meanwhile.
        if created {
            let mut pending = self.pending.lock().await;
            if pending.get(id).is_some_and(|(t, _)| *t == token) {
                pending.remove(id);
            }
        }

        // Resolve against whatever the flight recorded.
        let entry = self
            .cache
            .lock()
            .peek(id)
            .ok_or_else(|| CathodeError::NotLoaded(id.to_string()))?;
        match entry.state() {
            ResourceState::Loaded => {
                entry.touch();
                Ok(ResourceHandle::new(entry))
            }
            ResourceState::Error => Err(CathodeError::LoaderFailure {
                id: id.to_string(),
                reason: entry.error().unwrap_or_else(|| "unknown".into()),
            }),
            ResourceState::Evicted => Err(CathodeError::ResourceEvicted(id.to_string())),
            _ => Err(CathodeError::NotLoaded(id.to_string())),
        }
    }

    /// Registers the entry in `Loading` state and the shared load future.
    /// Caller holds the pending-map mutex.
    fn create_flight(
        self: &Arc<Self>,
        pending: &mut FxHashMap<String, (u64, SharedLoad)>,
        id: &str,
        kind: &str,
        options: &LoadOptions,
    ) -> (u64, SharedLoad) {
        {
            let mut cache = self.cache.lock();
            match cache.peek(id) {
                Some(existing) if existing.kind() == kind => {
                    cache.uncommit_size(id);
                    existing.mark_loading();
                }
                _ => {
                    let fresh = ResourceEntry::new(id, kind);
                    fresh.mark_loading();
                    cache.insert(fresh);
                }
            }
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let fut: BoxFuture<'static, ()> = Box::pin(Self::execute_load(
            Arc::clone(self),
            id.to_string(),
            kind.to_string(),
            options.clone(),
        ));
        let shared = fut.shared();
        pending.insert(id.to_string(), (token, shared.clone()));
        (token, shared)
    }

    /// The flight body: dependency preloading, the loader call under an
    /// optional timeout, and entry/bookkeeping updates. Runs outside every
    /// lock; results land in the entry so all waiters observe them.
    async fn execute_load(manager: Arc<Self>, id: String, kind: String, options: LoadOptions) {
        let result = Self::run_loader(&manager, &id, &kind, &options).await;
        match result {
            Ok(resource) => {
                let size = resource.size;
                {
                    let mut cache = manager.cache.lock();
                    if let Some(entry) = cache.peek(&id) {
                        entry.mark_loaded(Arc::clone(&resource.data), size);
                    }
                    cache.commit_size(&id, size);
                }
                {
                    let mut deps = manager.deps.lock();
                    for dep in &resource.dependencies {
                        deps.add_dependency(&id, dep);
                    }
                }
                manager.cancel_cleanup(&id);
            }
            Err(e) => {
                log::warn!("load of '{id}' failed: {e}");
                if let Some(entry) = manager.cache.lock().peek(&id) {
                    entry.mark_error(&e.to_string());
                }
                manager.schedule_cleanup(&id);
            }
        }
    }

    async fn run_loader(
        manager: &Arc<Self>,
        id: &str,
        kind: &str,
        options: &LoadOptions,
    ) -> Result<Resource> {
        let loader = manager
            .loaders
            .read()
            .get(kind)
            .cloned()
            .ok_or_else(|| CathodeError::NoLoader(kind.to_string()))?;
        if !loader.can_load(id) {
            return Err(CathodeError::LoaderFailure {
                id: id.to_string(),
                reason: format!("loader for '{kind}' rejected the id"),
            });
        }

        if options.load_dependencies {
            let order = manager.deps.lock().load_order(&[id])?;
            for dep in order.iter().filter(|d| d.as_str() != id) {
                let dep_kind = manager
                    .kinds
                    .lock()
                    .get(dep)
                    .cloned()
                    .unwrap_or_else(|| kind.to_string());
                // The order is already dependency-first, so each dependency
                // loads plainly.
                let dep_options = LoadOptions {
                    force_reload: false,
                    load_dependencies: false,
                    timeout: options.timeout,
                };
                manager.load(dep, &dep_kind, dep_options).await?;
            }
        }

        manager.counters.loader_invocations.fetch_add(1, Ordering::Relaxed);
        let fut = loader.load(id, options);
        match options.timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| CathodeError::LoadTimeout {
                    id: id.to_string(),
                    timeout_ms: limit.as_millis() as u64,
                })?,
            None => fut.await,
        }
    }

    // ========================================================================
    // Error-cleanup timers
    // ========================================================================

    fn schedule_cleanup(self: &Arc<Self>, id: &str) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::debug!("no runtime for cleanup timer of '{id}'");
            return;
        };
        let weak = Arc::downgrade(self);
        let delay = self.error_cleanup_delay;
        let timer_id = id.to_string();
        let join = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(manager) = weak.upgrade() {
                let removed_kind = {
                    let mut cache = manager.cache.lock();
                    match cache.peek(&timer_id) {
                        Some(entry)
                            if entry.state() == ResourceState::Error && !entry.is_pinned() =>
                        {
                            let kind = entry.kind().to_string();
                            cache.remove(&timer_id);
                            log::debug!("cleaned up failed entry '{timer_id}'");
                            Some(kind)
                        }
                        _ => None,
                    }
                };
                if let Some(kind) = removed_kind {
                    if let Some(loader) = manager.loaders.read().get(&kind).cloned() {
                        loader.unload(&timer_id);
                    }
                }
            }
        });

        let mut timers = self.cleanup_timers.lock();
        timers.push((id.to_string(), join));
        while timers.len() > CLEANUP_TIMER_CAP {
            let (old_id, old_join) = timers.remove(0);
            old_join.abort();
            log::debug!("cleanup timer table full; dropped timer for '{old_id}'");
        }
    }

    fn cancel_cleanup(&self, id: &str) {
        let mut timers = self.cleanup_timers.lock();
        timers.retain(|(timer_id, join)| {
            if timer_id == id {
                join.abort();
                false
            } else {
                true
            }
        });
    }

    // ========================================================================
    // Hot reload
    // ========================================================================

    /// Watches `path` and force-reloads `id` when its mtime moves. The
    /// watcher task is constructed lazily on first registration; reload
    /// failures are logged, never propagated.
    pub fn register_resource_path(self: &Arc<Self>, id: &str, path: PathBuf, kind: &str, debounce: Duration) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!("no runtime available; hot reload for '{id}' disabled");
            return;
        };
        let weak = Arc::downgrade(self);
        let watch_id = id.to_string();
        let watch_kind = kind.to_string();
        let join = runtime.spawn(async move {
            let mut last_mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
            loop {
                tokio::time::sleep(debounce).await;
                let Some(manager) = weak.upgrade() else {
                    return;
                };
                let mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
                if mtime.is_some() && mtime != last_mtime {
                    last_mtime = mtime;
                    manager.counters.reloads.fetch_add(1, Ordering::Relaxed);
                    let options = LoadOptions {
                        force_reload: true,
                        ..LoadOptions::default()
                    };
                    if let Err(e) = manager.load(&watch_id, &watch_kind, options).await {
                        log::warn!("hot reload of '{watch_id}' failed: {e}");
                    }
                }
            }
        });

        if let Some(old) = self.watchers.lock().insert(id.to_string(), join) {
            old.abort();
        }
    }

    /// Stops watching `id`.
    pub fn unregister_resource_path(&self, id: &str) -> bool {
        if let Some(join) = self.watchers.lock().remove(id) {
            join.abort();
            true
        } else {
            false
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    #[must_use]
    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            reloads: self.counters.reloads.load(Ordering::Relaxed),
            loader_invocations: self.counters.loader_invocations.load(Ordering::Relaxed),
        }
    }

    /// Runs `f` against the cache (diagnostics and tests).
    pub fn with_cache<R>(&self, f: impl FnOnce(&mut ResourceCache) -> R) -> R {
        f(&mut self.cache.lock())
    }

    /// Sweeps TTL-expired entries. Intended to run once per frame.
    pub fn evict_expired(&self) -> usize {
        self.cache.lock().evict_expired()
    }

    /// Takes a memory snapshot through the profiler.
    #[must_use]
    pub fn snapshot(&self, profiler: &mut MemoryProfiler) -> MemorySnapshot {
        let cache = self.cache.lock();
        profiler.take_snapshot(cache.entries())
    }

    /// Runs leak detection against the current entry set.
    #[must_use]
    pub fn detect_leaks(&self, config: &ProfilerConfig) -> LeakReport {
        let cache = self.cache.lock();
        MemoryProfiler::detect_leaks(cache.entries(), config)
    }
}
