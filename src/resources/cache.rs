//! Budgeted Resource Cache
//!
//! Bounded by total bytes, optionally by entry count and TTL. Insertion
//! evicts one non-pinned victim at a time until the incoming entry fits;
//! the loop is capped at a single pass over the current entry count so a
//! fully pinned cache cannot spin — it logs a warning and consciously
//! overshoots the budget instead.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::resources::entry::ResourceEntry;

/// Victim-selection policy, chosen at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EvictionPolicy {
    /// Oldest `last_accessed` first.
    Lru,
    /// Smallest `access_count` first.
    Lfu,
    /// Oldest `loaded_at` first.
    Fifo,
    /// Largest `size` first.
    Size,
}

/// Cache limits.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CacheConfig {
    /// Total byte budget.
    pub max_size: u64,
    /// Optional entry-count budget.
    pub max_count: Option<usize>,
    /// Optional idle-time bound, swept by [`ResourceCache::evict_expired`].
    pub ttl: Option<Duration>,
    pub policy: EvictionPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 256 * 1024 * 1024,
            max_count: None,
            ttl: None,
            policy: EvictionPolicy::Lru,
        }
    }
}

/// Hit/miss/eviction counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// The entry table plus budget enforcement.
pub struct ResourceCache {
    config: CacheConfig,
    entries: FxHashMap<String, Arc<ResourceEntry>>,
    current_size: u64,
    stats: CacheStats,
}

impl ResourceCache {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: FxHashMap::default(),
            current_size: 0,
            stats: CacheStats::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Looks up an entry, counting a hit or miss.
    pub fn get(&mut self, id: &str) -> Option<Arc<ResourceEntry>> {
        match self.entries.get(id) {
            Some(entry) => {
                self.stats.hits += 1;
                Some(Arc::clone(entry))
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Lookup without counter side effects (internal bookkeeping paths).
    #[must_use]
    pub fn peek(&self, id: &str) -> Option<Arc<ResourceEntry>> {
        self.entries.get(id).cloned()
    }

    /// Iterates live entries, for the profiler.
    pub fn entries(&self) -> impl Iterator<Item = &Arc<ResourceEntry>> {
        self.entries.values()
    }

    /// Inserts a fresh entry (typically in `Loading` state, size 0).
    pub fn insert(&mut self, entry: Arc<ResourceEntry>) {
        if let Some(old) = self.entries.insert(entry.id().to_string(), entry) {
            self.current_size -= old.mark_evicted();
        }
    }

    /// Charges `size` bytes for `id` and enforces every budget. Call after a
    /// load completes and the real size is known.
    pub fn commit_size(&mut self, id: &str, size: u64) {
        if let Some(entry) = self.entries.get(id) {
            debug_assert_eq!(entry.size(), size, "entry sized before commit");
        }
        self.current_size += size;
        self.enforce_size(id);
        self.enforce_count(id);
    }

    /// Releases the byte charge of `id` ahead of a reload; the entry stays
    /// resident.
    pub fn uncommit_size(&mut self, id: &str) {
        if let Some(entry) = self.entries.get(id) {
            self.current_size -= entry.take_size();
        }
    }

    /// Removes `id` outright (error-cleanup path). The entry is marked
    /// evicted so stale handles fail typed.
    pub fn remove(&mut self, id: &str) -> bool {
        if let Some(entry) = self.entries.remove(id) {
            self.current_size -= entry.mark_evicted();
            true
        } else {
            false
        }
    }

    /// Sweeps non-pinned entries idle longer than the configured TTL.
    /// Returns the number of entries evicted.
    pub fn evict_expired(&mut self) -> usize {
        let Some(ttl) = self.config.ttl else {
            return 0;
        };
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|e| !e.is_pinned() && now.duration_since(e.last_accessed()) > ttl)
            .map(|e| e.id().to_string())
            .collect();
        let count = expired.len();
        for id in expired {
            self.evict(&id);
        }
        count
    }

    // ========================================================================
    // Budget enforcement
    // ========================================================================

    /// One eviction per iteration, bounded by the entry count at loop start.
    fn enforce_size(&mut self, incoming: &str) {
        let mut passes = self.entries.len();
        while self.current_size > self.config.max_size && passes > 0 {
            passes -= 1;
            match self.pick_victim(incoming) {
                Some(victim) => self.evict(&victim),
                None => break,
            }
        }
        if self.current_size > self.config.max_size {
            log::warn!(
                "cache over budget ({} > {} B) with every entry pinned; keeping '{incoming}'",
                self.current_size,
                self.config.max_size
            );
        }
    }

    fn enforce_count(&mut self, incoming: &str) {
        let Some(max_count) = self.config.max_count else {
            return;
        };
        let mut passes = self.entries.len();
        while self.entries.len() > max_count && passes > 0 {
            passes -= 1;
            match self.pick_victim(incoming) {
                Some(victim) => self.evict(&victim),
                None => break,
            }
        }
        if self.entries.len() > max_count {
            log::warn!(
                "cache over count budget ({} > {max_count}) with every entry pinned",
                self.entries.len()
            );
        }
    }

    /// Applies the configured policy across non-pinned entries, never
    /// choosing the entry being inserted.
    fn pick_victim(&self, incoming: &str) -> Option<String> {
        let candidates = self
            .entries
            .values()
            .filter(|e| !e.is_pinned() && e.id() != incoming);
        let victim = match self.config.policy {
            EvictionPolicy::Lru => candidates.min_by_key(|e| e.last_accessed()),
            EvictionPolicy::Lfu => candidates.min_by_key(|e| e.access_count()),
            EvictionPolicy::Fifo => {
                candidates.min_by_key(|e| e.loaded_at().unwrap_or_else(Instant::now))
            }
            EvictionPolicy::Size => candidates.max_by_key(|e| e.size()),
        };
        victim.map(|e| e.id().to_string())
    }

    fn evict(&mut self, id: &str) {
        if let Some(entry) = self.entries.remove(id) {
            let released = entry.mark_evicted();
            self.current_size -= released;
            self.stats.evictions += 1;
            log::debug!("evicted '{id}' ({released} B)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::entry::{ResourceHandle, ResourceState};
    use std::sync::Arc as StdArc;

    fn loaded(cache: &mut ResourceCache, id: &str, size: u64) -> StdArc<ResourceEntry> {
        let entry = ResourceEntry::new(id, "blob");
        entry.mark_loading();
        cache.insert(StdArc::clone(&entry));
        entry.mark_loaded(StdArc::new(vec![0u8; size as usize]), size);
        cache.commit_size(id, size);
        entry
    }

    #[test]
    fn size_budget_evicts_lru_victim() {
        let mut cache = ResourceCache::new(CacheConfig {
            max_size: 3,
            max_count: None,
            ttl: None,
            policy: EvictionPolicy::Lru,
        });
        let r1 = loaded(&mut cache, "r1", 1);
        let _r2 = loaded(&mut cache, "r2", 1);
        let _r3 = loaded(&mut cache, "r3", 1);

        r1.touch(); // r1 becomes most recently used
        loaded(&mut cache, "r4", 1);

        assert!(cache.peek("r2").is_none(), "least recently used goes first");
        assert!(cache.peek("r1").is_some());
        assert!(cache.current_size() <= 3);
    }

    #[test]
    fn pinned_entries_survive_with_warning() {
        let mut cache = ResourceCache::new(CacheConfig {
            max_size: 1,
            max_count: None,
            ttl: None,
            policy: EvictionPolicy::Lru,
        });
        let a = loaded(&mut cache, "a", 1);
        let _pin = ResourceHandle::new(a);
        loaded(&mut cache, "b", 1);
        // Both entries pinned-or-incoming: budget is consciously overshot
        assert_eq!(cache.len(), 2);
        assert!(cache.current_size() > 1);
    }

    #[test]
    fn size_policy_picks_largest() {
        let mut cache = ResourceCache::new(CacheConfig {
            max_size: 10,
            max_count: None,
            ttl: None,
            policy: EvictionPolicy::Size,
        });
        loaded(&mut cache, "small", 2);
        loaded(&mut cache, "big", 6);
        loaded(&mut cache, "new", 4);
        assert!(cache.peek("big").is_none());
        assert!(cache.peek("small").is_some());
    }

    #[test]
    fn count_budget_enforced() {
        let mut cache = ResourceCache::new(CacheConfig {
            max_size: 100,
            max_count: Some(2),
            ttl: None,
            policy: EvictionPolicy::Fifo,
        });
        loaded(&mut cache, "a", 1);
        loaded(&mut cache, "b", 1);
        loaded(&mut cache, "c", 1);
        assert_eq!(cache.len(), 2);
        assert!(cache.peek("a").is_none(), "FIFO evicts the oldest load");
    }

    #[test]
    fn eviction_marks_state() {
        let mut cache = ResourceCache::new(CacheConfig {
            max_size: 1,
            max_count: None,
            ttl: None,
            policy: EvictionPolicy::Lru,
        });
        let a = loaded(&mut cache, "a", 1);
        loaded(&mut cache, "b", 1);
        assert_eq!(a.state(), ResourceState::Evicted);
    }

    #[test]
    fn ttl_sweep_spares_pinned() {
        let mut cache = ResourceCache::new(CacheConfig {
            max_size: 100,
            max_count: None,
            ttl: Some(Duration::from_millis(1)),
            policy: EvictionPolicy::Lru,
        });
        let a = loaded(&mut cache, "a", 1);
        let _b = loaded(&mut cache, "b", 1);
        let _pin = ResourceHandle::new(a);
        std::thread::sleep(Duration::from_millis(5));
        let evicted = cache.evict_expired();
        assert_eq!(evicted, 1);
        assert!(cache.peek("a").is_some());
        assert!(cache.peek("b").is_none());
    }
}
