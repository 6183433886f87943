//! Resource management tests
//!
//! Tests for:
//! - Dependency-ordered loading (topological, loader call order)
//! - LRU eviction under the byte budget with pinning
//! - Single-flight coalescing of concurrent loads
//! - Force reload, loader round-trips, type mismatches
//! - Load timeouts and the bounded error-cleanup timer
//! - Leak detection through the profiler

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cathode::errors::{CathodeError, Result};
use cathode::resources::cache::{CacheConfig, EvictionPolicy};
use cathode::resources::entry::{Resource, ResourceState};
use cathode::resources::manager::{LoadOptions, ResourceLoader, ResourceManager};
use cathode::resources::profiler::{LeakSuspect, MemoryProfiler, ProfilerConfig};
use futures::future::BoxFuture;

// ============================================================================
// Test loader
// ============================================================================

struct TestLoader {
    calls: Arc<Mutex<Vec<String>>>,
    invocations: Arc<AtomicU64>,
    delay: Option<Duration>,
    fail: bool,
    size: u64,
}

impl TestLoader {
    fn new(size: u64) -> (Arc<Self>, Arc<Mutex<Vec<String>>>, Arc<AtomicU64>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let invocations = Arc::new(AtomicU64::new(0));
        let loader = Arc::new(Self {
            calls: Arc::clone(&calls),
            invocations: Arc::clone(&invocations),
            delay: None,
            fail: false,
            size,
        });
        (loader, calls, invocations)
    }

    fn slow(size: u64, delay: Duration) -> (Arc<Self>, Arc<AtomicU64>) {
        let invocations = Arc::new(AtomicU64::new(0));
        (
            Arc::new(Self {
                calls: Arc::default(),
                invocations: Arc::clone(&invocations),
                delay: Some(delay),
                fail: false,
                size,
            }),
            invocations,
        )
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: Arc::default(),
            invocations: Arc::default(),
            delay: None,
            fail: true,
            size: 0,
        })
    }
}

impl ResourceLoader for TestLoader {
    fn load(&self, id: &str, _options: &LoadOptions) -> BoxFuture<'static, Result<Resource>> {
        let id = id.to_string();
        let calls = Arc::clone(&self.calls);
        let invocations = Arc::clone(&self.invocations);
        let delay = self.delay;
        let fail = self.fail;
        let size = self.size;
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            invocations.fetch_add(1, Ordering::SeqCst);
            calls.lock().unwrap().push(id.clone());
            if fail {
                return Err(CathodeError::LoaderFailure {
                    id,
                    reason: "synthetic failure".into(),
                });
            }
            Ok(Resource {
                id: id.clone(),
                kind: "blob".into(),
                data: Arc::new(format!("payload:{id}")),
                size,
                dependencies: Vec::new(),
            })
        })
    }
}

fn lru_config(max_size: u64) -> CacheConfig {
    CacheConfig {
        max_size,
        max_count: None,
        ttl: None,
        policy: EvictionPolicy::Lru,
    }
}

// ============================================================================
// Dependency-ordered loading
// ============================================================================

#[tokio::test]
async fn dependencies_load_in_topological_order() {
    let manager = ResourceManager::new(lru_config(1 << 20));
    let (loader, calls, invocations) = TestLoader::new(16);
    manager.register_loader("blob", loader);

    // c depends on b, b depends on a
    manager.add_dependency("c", "b", Some("blob"));
    manager.add_dependency("b", "a", Some("blob"));

    let options = LoadOptions {
        load_dependencies: true,
        ..LoadOptions::default()
    };
    let handle = manager.load("c", "blob", options).await.unwrap();
    assert_eq!(handle.id(), "c");

    assert_eq!(*calls.lock().unwrap(), vec!["a", "b", "c"]);
    assert_eq!(invocations.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn circular_dependency_fails_the_load() {
    let manager = ResourceManager::new(lru_config(1 << 20));
    let (loader, _, _) = TestLoader::new(16);
    manager.register_loader("blob", loader);

    manager.add_dependency("a", "b", Some("blob"));
    manager.add_dependency("b", "a", Some("blob"));

    let options = LoadOptions {
        load_dependencies: true,
        ..LoadOptions::default()
    };
    let result = manager.load("a", "blob", options).await;
    assert!(result.is_err());
    assert!(manager.with_dependencies(|d| d.has_circular_dependency("a")));
}

#[test]
fn load_order_is_a_topological_sort() {
    let manager = ResourceManager::new(lru_config(1 << 20));
    manager.add_dependency("app", "ui", None);
    manager.add_dependency("app", "world", None);
    manager.add_dependency("ui", "atlas", None);
    manager.add_dependency("world", "atlas", None);

    let order = manager
        .with_dependencies(|d| d.load_order(&["app"]))
        .unwrap();
    let position = |id: &str| order.iter().position(|x| x == id).unwrap();
    // For every edge a → b, b comes first
    assert!(position("atlas") < position("ui"));
    assert!(position("atlas") < position("world"));
    assert!(position("ui") < position("app"));
    assert!(position("world") < position("app"));
}

// ============================================================================
// Eviction under budget
// ============================================================================

#[tokio::test]
async fn lru_evicts_least_recently_touched() {
    let manager = ResourceManager::new(lru_config(3 * 1024));
    let (loader, _, _) = TestLoader::new(1024);
    manager.register_loader("blob", loader);

    for id in ["r1", "r2", "r3"] {
        let handle = manager.load(id, "blob", LoadOptions::default()).await.unwrap();
        handle.release();
    }

    // Touch r1 so r2 becomes the least recently used
    let r1 = manager.load("r1", "blob", LoadOptions::default()).await.unwrap();
    r1.release();

    let r4 = manager.load("r4", "blob", LoadOptions::default()).await.unwrap();
    r4.release();

    manager.with_cache(|cache| {
        assert!(cache.peek("r2").is_none(), "r2 was the LRU victim");
        assert!(cache.peek("r1").is_some());
        assert!(cache.peek("r3").is_some());
        assert!(cache.peek("r4").is_some());
        assert!(cache.current_size() <= 3 * 1024);
    });
}

#[tokio::test]
async fn pinned_entries_never_evict_and_stale_handles_fail_typed() {
    let manager = ResourceManager::new(lru_config(1024));
    let (loader, _, _) = TestLoader::new(1024);
    manager.register_loader("blob", loader);

    let pinned = manager.load("keep", "blob", LoadOptions::default()).await.unwrap();
    assert!(pinned.ref_count() > 0);

    // Loading a second 1 KiB entry pushes the cache over budget; the pinned
    // entry must survive (conscious overshoot), the unpinned old one goes
    // when a third arrives.
    let second = manager.load("other", "blob", LoadOptions::default()).await.unwrap();
    second.release();
    let _third = manager.load("third", "blob", LoadOptions::default()).await.unwrap();

    manager.with_cache(|cache| {
        assert!(cache.peek("keep").is_some(), "pinned survives");
        assert!(cache.peek("other").is_none(), "unpinned evicted");
    });

    // A handle to the evicted entry fails typed, never yields stale data
    assert!(second.get::<String>().is_err());
    assert!(pinned.get::<String>().is_ok());
}

// ============================================================================
// Single-flight
// ============================================================================

#[tokio::test]
async fn concurrent_loads_invoke_the_loader_once() {
    let manager = ResourceManager::new(lru_config(1 << 20));
    let (loader, invocations) = TestLoader::slow(64, Duration::from_millis(30));
    manager.register_loader("blob", loader);

    let mut joins = Vec::new();
    for _ in 0..8 {
        let manager = Arc::clone(&manager);
        joins.push(tokio::spawn(async move {
            manager.load("shared", "blob", LoadOptions::default()).await
        }));
    }

    let mut payloads = Vec::new();
    for join in joins {
        let handle = join.await.unwrap().unwrap();
        payloads.push(handle.get::<String>().unwrap());
    }

    assert_eq!(invocations.load(Ordering::SeqCst), 1, "one flight for all waiters");
    for payload in &payloads {
        assert!(Arc::ptr_eq(payload, &payloads[0]), "every waiter sees the same data");
    }
}

#[tokio::test]
async fn force_reload_invokes_the_loader_again() {
    let manager = ResourceManager::new(lru_config(1 << 20));
    let (loader, _, invocations) = TestLoader::new(32);
    manager.register_loader("blob", loader);

    let first = manager.load("asset", "blob", LoadOptions::default()).await.unwrap();
    let second = manager.load("asset", "blob", LoadOptions::default()).await.unwrap();
    assert_eq!(invocations.load(Ordering::SeqCst), 1, "second load is a cache hit");

    let reloaded = manager
        .load(
            "asset",
            "blob",
            LoadOptions {
                force_reload: true,
                ..LoadOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(invocations.load(Ordering::SeqCst), 2);
    assert_eq!(reloaded.id(), "asset", "id preserved across reloads");
    assert!(reloaded.get::<String>().is_ok());
    drop((first, second));
}

// ============================================================================
// Registry round-trips and type safety
// ============================================================================

#[test]
fn register_unregister_loader_round_trip() {
    let manager = ResourceManager::new(lru_config(1 << 20));
    let (loader, _, _) = TestLoader::new(8);

    assert!(!manager.has_loader("blob"));
    manager.register_loader("blob", loader);
    assert!(manager.has_loader("blob"));
    assert!(manager.unregister_loader("blob"));
    assert!(!manager.has_loader("blob"));
    assert!(!manager.unregister_loader("blob"));
    manager.with_cache(|cache| assert!(cache.is_empty()));
}

#[tokio::test]
async fn kind_mismatch_is_rejected_at_the_cache() {
    let manager = ResourceManager::new(lru_config(1 << 20));
    let (loader, _, _) = TestLoader::new(8);
    manager.register_loader("blob", Arc::clone(&loader) as Arc<dyn ResourceLoader>);
    manager.register_loader("texture", loader);

    let _handle = manager.load("asset", "blob", LoadOptions::default()).await.unwrap();
    let err = manager
        .load("asset", "texture", LoadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CathodeError::TypeMismatch { .. }));
}

#[tokio::test]
async fn missing_loader_is_typed() {
    let manager = ResourceManager::new(lru_config(1 << 20));
    let err = manager
        .load("asset", "unknown", LoadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CathodeError::LoaderFailure { .. } | CathodeError::NoLoader(_)));
}

// ============================================================================
// Timeouts and error cleanup
// ============================================================================

#[tokio::test]
async fn slow_loader_times_out_and_sticks_in_error() {
    let manager = ResourceManager::new(lru_config(1 << 20));
    let (loader, _) = TestLoader::slow(8, Duration::from_millis(200));
    manager.register_loader("blob", loader);

    let err = manager
        .load(
            "slow",
            "blob",
            LoadOptions {
                timeout: Some(Duration::from_millis(10)),
                ..LoadOptions::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CathodeError::LoadTimeout { .. } | CathodeError::LoaderFailure { .. }));

    // Without force_reload the stored error is returned, not a new flight
    let again = manager.load("slow", "blob", LoadOptions::default()).await;
    assert!(again.is_err());
    manager.with_cache(|cache| {
        assert_eq!(cache.peek("slow").unwrap().state(), ResourceState::Error);
    });
}

#[tokio::test]
async fn failed_entries_are_swept_after_the_cleanup_delay() {
    let manager = ResourceManager::with_error_cleanup_delay(
        lru_config(1 << 20),
        Duration::from_millis(20),
    );
    manager.register_loader("blob", TestLoader::failing());

    let _ = manager.load("broken", "blob", LoadOptions::default()).await;
    manager.with_cache(|cache| assert!(cache.peek("broken").is_some()));

    tokio::time::sleep(Duration::from_millis(100)).await;
    manager.with_cache(|cache| {
        assert!(cache.peek("broken").is_none(), "cleanup timer swept the entry");
    });
}

// ============================================================================
// Profiler
// ============================================================================

#[tokio::test]
async fn snapshot_aggregates_and_leak_report() {
    let manager = ResourceManager::new(lru_config(1 << 20));
    let (loader, _, _) = TestLoader::new(100);
    manager.register_loader("blob", loader);

    let held = manager.load("held", "blob", LoadOptions::default()).await.unwrap();
    let dropped = manager.load("dropped", "blob", LoadOptions::default()).await.unwrap();
    dropped.release();

    let mut profiler = MemoryProfiler::new(ProfilerConfig::default());
    let snapshot = manager.snapshot(&mut profiler);
    assert_eq!(snapshot.total_entries, 2);
    assert_eq!(snapshot.total_size, 200);
    assert_eq!(snapshot.by_kind["blob"].count, 2);
    assert_eq!(snapshot.by_state["loaded"], 2);
    assert_eq!(snapshot.top_consumers.len(), 2);

    // With a zero age threshold, the released entry reads as a stale leak
    let report = manager.detect_leaks(&ProfilerConfig {
        leak_age_threshold: Duration::from_millis(0),
        leak_ref_count_threshold: 100,
        ..ProfilerConfig::default()
    });
    assert!(report
        .suspects
        .iter()
        .any(|s| matches!(s, LeakSuspect::StaleUnreferenced { id, .. } if id == "dropped")));

    drop(held);
}

#[tokio::test]
async fn manager_counters_track_hits_and_misses() {
    let manager = ResourceManager::new(lru_config(1 << 20));
    let (loader, _, _) = TestLoader::new(8);
    manager.register_loader("blob", loader);

    let a = manager.load("a", "blob", LoadOptions::default()).await.unwrap();
    let a2 = manager.load("a", "blob", LoadOptions::default()).await.unwrap();
    let stats = manager.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.loader_invocations, 1);
    drop((a, a2));
}
