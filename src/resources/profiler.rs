//! Resource Memory Profiler
//!
//! Point-in-time snapshots of the cache (totals, per-kind aggregates,
//! per-state counts, top consumers) plus leak heuristics: stale
//! unreferenced entries, loads stuck in flight, and refcount outliers.
//! Snapshot and event histories are bounded rings.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::resources::entry::{ResourceEntry, ResourceState};

/// How many top-size consumers a snapshot records.
const TOP_CONSUMERS: usize = 10;

/// Profiler limits and leak thresholds.
#[derive(Debug, Clone)]
pub struct ProfilerConfig {
    pub enabled: bool,
    pub max_snapshots: usize,
    pub max_events: usize,
    pub snapshot_interval: Duration,
    /// Unreferenced entries older than this are flagged.
    pub leak_age_threshold: Duration,
    /// Entries with a refcount above this are flagged.
    pub leak_ref_count_threshold: u32,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_snapshots: 60,
            max_events: 256,
            snapshot_interval: Duration::from_secs(1),
            leak_age_threshold: Duration::from_secs(60),
            leak_ref_count_threshold: 32,
        }
    }
}

/// Aggregate for one resource kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KindAggregate {
    pub count: usize,
    pub total_size: u64,
    pub average_size: f64,
}

/// One top consumer.
#[derive(Debug, Clone)]
pub struct Consumer {
    pub id: String,
    pub kind: String,
    pub size: u64,
}

/// Point-in-time view of the cache.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshot {
    pub total_entries: usize,
    pub total_size: u64,
    pub by_kind: FxHashMap<String, KindAggregate>,
    pub by_state: FxHashMap<&'static str, usize>,
    /// Largest entries, descending, at most ten.
    pub top_consumers: Vec<Consumer>,
}

/// One suspected leak.
#[derive(Debug, Clone)]
pub enum LeakSuspect {
    /// Loaded, unreferenced, and untouched past the age threshold.
    StaleUnreferenced { id: String, age: Duration },
    /// Still `Loading` past the age threshold.
    StuckLoading { id: String, age: Duration },
    /// Refcount above the configured threshold.
    RefCountOutlier { id: String, ref_count: u32 },
}

/// Leak-detection output.
#[derive(Debug, Clone, Default)]
pub struct LeakReport {
    pub suspects: Vec<LeakSuspect>,
}

impl LeakReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.suspects.is_empty()
    }
}

/// Snapshot recorder.
pub struct MemoryProfiler {
    config: ProfilerConfig,
    snapshots: Vec<MemorySnapshot>,
    events: Vec<String>,
    last_snapshot: Option<Instant>,
}

impl MemoryProfiler {
    #[must_use]
    pub fn new(config: ProfilerConfig) -> Self {
        Self {
            config,
            snapshots: Vec::new(),
            events: Vec::new(),
            last_snapshot: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// Whether the snapshot interval has elapsed.
    #[must_use]
    pub fn due(&self) -> bool {
        self.config.enabled
            && self
                .last_snapshot
                .is_none_or(|t| t.elapsed() >= self.config.snapshot_interval)
    }

    /// Computes and records a snapshot over the given entries.
    pub fn take_snapshot<'a>(
        &mut self,
        entries: impl Iterator<Item = &'a Arc<ResourceEntry>>,
    ) -> MemorySnapshot {
        let mut snapshot = MemorySnapshot::default();
        let mut consumers: Vec<Consumer> = Vec::new();

        for entry in entries {
            let size = entry.size();
            snapshot.total_entries += 1;
            snapshot.total_size += size;

            let agg = snapshot.by_kind.entry(entry.kind().to_string()).or_default();
            agg.count += 1;
            agg.total_size += size;

            *snapshot.by_state.entry(state_name(entry.state())).or_default() += 1;

            consumers.push(Consumer {
                id: entry.id().to_string(),
                kind: entry.kind().to_string(),
                size,
            });
        }

        for agg in snapshot.by_kind.values_mut() {
            agg.average_size = agg.total_size as f64 / agg.count as f64;
        }

        consumers.sort_by(|a, b| b.size.cmp(&a.size));
        consumers.truncate(TOP_CONSUMERS);
        snapshot.top_consumers = consumers;

        if self.config.enabled {
            self.snapshots.push(snapshot.clone());
            while self.snapshots.len() > self.config.max_snapshots {
                self.snapshots.remove(0);
            }
            self.last_snapshot = Some(Instant::now());
        }
        snapshot
    }

    /// Records a profiler event line (load, eviction, reload …).
    pub fn record_event(&mut self, event: impl Into<String>) {
        if !self.config.enabled {
            return;
        }
        self.events.push(event.into());
        while self.events.len() > self.config.max_events {
            self.events.remove(0);
        }
    }

    #[must_use]
    pub fn snapshots(&self) -> &[MemorySnapshot] {
        &self.snapshots
    }

    #[must_use]
    pub fn events(&self) -> &[String] {
        &self.events
    }

    /// Flags suspected leaks across the given entries.
    #[must_use]
    pub fn detect_leaks<'a>(
        entries: impl Iterator<Item = &'a Arc<ResourceEntry>>,
        config: &ProfilerConfig,
    ) -> LeakReport {
        let now = Instant::now();
        let mut report = LeakReport::default();
        for entry in entries {
            let age = now.duration_since(entry.last_accessed());
            match entry.state() {
                ResourceState::Loaded
                    if entry.ref_count() == 0 && age > config.leak_age_threshold =>
                {
                    report.suspects.push(LeakSuspect::StaleUnreferenced {
                        id: entry.id().to_string(),
                        age,
                    });
                }
                ResourceState::Loading if age > config.leak_age_threshold => {
                    report.suspects.push(LeakSuspect::StuckLoading {
                        id: entry.id().to_string(),
                        age,
                    });
                }
                _ => {}
            }
            if entry.ref_count() > config.leak_ref_count_threshold {
                report.suspects.push(LeakSuspect::RefCountOutlier {
                    id: entry.id().to_string(),
                    ref_count: entry.ref_count(),
                });
            }
        }
        report
    }
}

fn state_name(state: ResourceState) -> &'static str {
    match state {
        ResourceState::Unloaded => "unloaded",
        ResourceState::Loading => "loading",
        ResourceState::Loaded => "loaded",
        ResourceState::Error => "error",
        ResourceState::Evicted => "evicted",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, kind: &str, size: u64) -> Arc<ResourceEntry> {
        let e = ResourceEntry::new(id, kind);
        e.mark_loading();
        e.mark_loaded(Arc::new(vec![0u8; size as usize]), size);
        e
    }

    #[test]
    fn snapshot_aggregates_by_kind() {
        let entries = vec![
            entry("t1", "texture", 100),
            entry("t2", "texture", 300),
            entry("m1", "model", 50),
        ];
        let mut profiler = MemoryProfiler::new(ProfilerConfig::default());
        let snap = profiler.take_snapshot(entries.iter());

        assert_eq!(snap.total_entries, 3);
        assert_eq!(snap.total_size, 450);
        let tex = &snap.by_kind["texture"];
        assert_eq!(tex.count, 2);
        assert_eq!(tex.total_size, 400);
        assert!((tex.average_size - 200.0).abs() < f64::EPSILON);
        assert_eq!(snap.top_consumers[0].id, "t2");
        assert_eq!(snap.by_state["loaded"], 3);
    }

    #[test]
    fn snapshot_ring_is_bounded() {
        let mut profiler = MemoryProfiler::new(ProfilerConfig {
            max_snapshots: 2,
            ..ProfilerConfig::default()
        });
        for _ in 0..5 {
            let _ = profiler.take_snapshot(std::iter::empty());
        }
        assert_eq!(profiler.snapshots().len(), 2);
    }

    #[test]
    fn leak_detection_flags_refcount_outlier() {
        let config = ProfilerConfig {
            leak_ref_count_threshold: 1,
            ..ProfilerConfig::default()
        };
        let e = entry("t1", "texture", 8);
        let _h1 = crate::resources::entry::ResourceHandle::new(Arc::clone(&e));
        let _h2 = crate::resources::entry::ResourceHandle::new(Arc::clone(&e));
        let entries = vec![e];
        let report = MemoryProfiler::detect_leaks(entries.iter(), &config);
        assert!(matches!(
            report.suspects.as_slice(),
            [LeakSuspect::RefCountOutlier { ref_count: 2, .. }]
        ));
    }

    #[test]
    fn leak_detection_flags_stuck_loading() {
        let config = ProfilerConfig {
            leak_age_threshold: Duration::from_millis(1),
            ..ProfilerConfig::default()
        };
        let e = ResourceEntry::new("slow", "model");
        e.mark_loading();
        std::thread::sleep(Duration::from_millis(5));
        let entries = vec![e];
        let report = MemoryProfiler::detect_leaks(entries.iter(), &config);
        assert!(matches!(
            report.suspects.as_slice(),
            [LeakSuspect::StuckLoading { .. }]
        ));
    }
}
