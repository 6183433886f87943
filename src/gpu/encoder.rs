//! Per-Frame Hot-Path Cache
//!
//! Backends drive every draw through [`FrameCache`]: handle resolution goes
//! through a within-frame memo (hit/miss counted), and bind calls are
//! filtered against the currently bound object per slot so redundant state
//! changes never reach the API. This is *not* a cross-frame cache —
//! [`FrameCache::clear`] must run at the start of every frame and resets
//! both the memo and the statistics.

use std::any::Any;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::errors::Result;
use crate::gpu::draw::MAX_BIND_SLOT;

const MAX_VERTEX_SLOTS: usize = 8;

/// Hit/miss counters for the resolution memo.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameCacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl FrameCacheStats {
    /// Hit rate in `[0, 1]`; 1.0 when nothing was resolved.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            1.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

type CachedObject = Arc<dyn Any + Send + Sync>;

/// The within-frame redundancy filter.
pub struct FrameCache {
    resolved: FxHashMap<u64, CachedObject>,
    stats: FrameCacheStats,

    bound_pipeline: Option<u64>,
    bound_groups: [Option<u64>; (MAX_BIND_SLOT + 1) as usize],
    bound_vbuffers: [Option<u64>; MAX_VERTEX_SLOTS],
    bound_ibuffer: Option<u64>,
    bound_indirect: Option<u64>,
}

impl Default for FrameCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            resolved: FxHashMap::default(),
            stats: FrameCacheStats::default(),
            bound_pipeline: None,
            bound_groups: [None; (MAX_BIND_SLOT + 1) as usize],
            bound_vbuffers: [None; MAX_VERTEX_SLOTS],
            bound_ibuffer: None,
            bound_indirect: None,
        }
    }

    /// Resets the memo, the binding state, and the statistics. Call at the
    /// start of every frame.
    pub fn clear(&mut self) {
        self.resolved.clear();
        self.stats = FrameCacheStats::default();
        self.reset_bindings();
    }

    /// Forgets which objects are bound without dropping the memo — call at
    /// render-pass boundaries, where binding state does not carry over.
    pub fn reset_bindings(&mut self) {
        self.bound_pipeline = None;
        self.bound_groups = [None; (MAX_BIND_SLOT + 1) as usize];
        self.bound_vbuffers = [None; MAX_VERTEX_SLOTS];
        self.bound_ibuffer = None;
        self.bound_indirect = None;
    }

    #[must_use]
    pub fn stats(&self) -> FrameCacheStats {
        self.stats
    }

    /// Memoised resolution of handle id → concrete object. The resolver
    /// runs only on miss.
    pub fn resolve<T: Send + Sync + 'static>(
        &mut self,
        id: u64,
        resolver: impl FnOnce() -> Result<Arc<T>>,
    ) -> Result<Arc<T>> {
        if let Some(cached) = self.resolved.get(&id) {
            if let Ok(typed) = Arc::clone(cached).downcast::<T>() {
                self.stats.hits += 1;
                return Ok(typed);
            }
        }
        self.stats.misses += 1;
        let object = resolver()?;
        self.resolved.insert(id, Arc::clone(&object) as CachedObject);
        Ok(object)
    }

    // ---- Redundant-bind filters: true = the backend must emit the bind ----

    pub fn bind_pipeline(&mut self, id: u64) -> bool {
        if self.bound_pipeline == Some(id) {
            return false;
        }
        self.bound_pipeline = Some(id);
        true
    }

    pub fn bind_group(&mut self, slot: u32, id: u64) -> bool {
        let slot = slot as usize;
        if self.bound_groups[slot] == Some(id) {
            return false;
        }
        self.bound_groups[slot] = Some(id);
        true
    }

    pub fn bind_vertex_buffer(&mut self, slot: usize, id: u64) -> bool {
        if slot >= MAX_VERTEX_SLOTS {
            return true;
        }
        if self.bound_vbuffers[slot] == Some(id) {
            return false;
        }
        self.bound_vbuffers[slot] = Some(id);
        true
    }

    pub fn bind_index_buffer(&mut self, id: u64) -> bool {
        if self.bound_ibuffer == Some(id) {
            return false;
        }
        self.bound_ibuffer = Some(id);
        true
    }

    pub fn bind_indirect_buffer(&mut self, id: u64) -> bool {
        if self.bound_indirect == Some(id) {
            return false;
        }
        self.bound_indirect = Some(id);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_memoises_within_frame() {
        let mut cache = FrameCache::new();
        let mut calls = 0;

        for _ in 0..10 {
            let v = cache
                .resolve(42, || {
                    calls += 1;
                    Ok(Arc::new(7u32))
                })
                .unwrap();
            assert_eq!(*v, 7);
        }
        assert_eq!(calls, 1);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 9);
        assert!(stats.hit_rate() >= 0.9);
    }

    #[test]
    fn clear_resets_memo_and_stats() {
        let mut cache = FrameCache::new();
        let _ = cache.resolve(1, || Ok(Arc::new(0u32)));
        cache.clear();
        assert_eq!(cache.stats(), FrameCacheStats::default());
        let mut called = false;
        let _ = cache.resolve(1, || {
            called = true;
            Ok(Arc::new(0u32))
        });
        assert!(called, "memo must not survive a frame boundary");
    }

    #[test]
    fn redundant_binds_filtered() {
        let mut cache = FrameCache::new();
        assert!(cache.bind_pipeline(5));
        assert!(!cache.bind_pipeline(5));
        assert!(cache.bind_pipeline(6));

        assert!(cache.bind_group(0, 10));
        assert!(!cache.bind_group(0, 10));
        assert!(cache.bind_group(1, 10), "slots track independently");

        assert!(cache.bind_vertex_buffer(0, 3));
        assert!(!cache.bind_vertex_buffer(0, 3));
        assert!(cache.bind_index_buffer(4));
        assert!(!cache.bind_index_buffer(4));
    }

    #[test]
    fn pass_boundary_resets_bindings_not_memo() {
        let mut cache = FrameCache::new();
        let _ = cache.resolve(1, || Ok(Arc::new(0u32)));
        assert!(cache.bind_pipeline(9));
        cache.reset_bindings();
        assert!(cache.bind_pipeline(9), "new pass rebinds");
        let stats_before = cache.stats();
        let _ = cache.resolve(1, || Ok(Arc::new(0u32)));
        assert_eq!(cache.stats().hits, stats_before.hits + 1, "memo survived");
    }
}
