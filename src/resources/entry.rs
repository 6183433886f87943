//! Resource Entries and Handles
//!
//! An entry is the cache's record of one resource: state machine, payload,
//! sizing, and usage counters. Handles are reference-counted tickets onto an
//! entry — holding one pins the entry against eviction; accessing one after
//! the entry was evicted fails with a typed error instead of yielding stale
//! data.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::errors::{CathodeError, Result};

/// Type-erased payload shared between the cache and handles.
pub type ResourceData = Arc<dyn Any + Send + Sync>;

/// What a loader produced.
#[derive(Clone)]
pub struct Resource {
    pub id: String,
    pub kind: String,
    pub data: ResourceData,
    /// Bytes charged against the cache budget.
    pub size: u64,
    /// Resource ids this resource needs loaded first.
    pub dependencies: Vec<String>,
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("size", &self.size)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// Entry lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Unloaded,
    Loading,
    Loaded,
    Error,
    Evicted,
}

#[derive(Debug)]
pub(crate) struct EntryInner {
    pub state: ResourceState,
    pub data: Option<ResourceData>,
    pub error: Option<String>,
    pub size: u64,
    pub loaded_at: Option<Instant>,
    pub last_accessed: Instant,
    pub access_count: u64,
}

/// One cached resource record. Shared between the cache and any number of
/// handles via `Arc`.
#[derive(Debug)]
pub struct ResourceEntry {
    id: String,
    kind: String,
    inner: Mutex<EntryInner>,
    ref_count: AtomicU32,
}

impl ResourceEntry {
    #[must_use]
    pub fn new(id: &str, kind: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            kind: kind.to_string(),
            inner: Mutex::new(EntryInner {
                state: ResourceState::Unloaded,
                data: None,
                error: None,
                size: 0,
                loaded_at: None,
                last_accessed: Instant::now(),
                access_count: 0,
            }),
            ref_count: AtomicU32::new(0),
        })
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn state(&self) -> ResourceState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.inner.lock().size
    }

    #[must_use]
    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Relaxed)
    }

    /// Pinned entries are never eviction victims.
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.ref_count() > 0
    }

    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.inner.lock().error.clone()
    }

    #[must_use]
    pub fn loaded_at(&self) -> Option<Instant> {
        self.inner.lock().loaded_at
    }

    #[must_use]
    pub fn last_accessed(&self) -> Instant {
        self.inner.lock().last_accessed
    }

    #[must_use]
    pub fn access_count(&self) -> u64 {
        self.inner.lock().access_count
    }

    /// Refreshes the usage counters.
    pub fn touch(&self) {
        let mut inner = self.inner.lock();
        inner.last_accessed = Instant::now();
        inner.access_count += 1;
    }

    pub(crate) fn mark_loading(&self) {
        let mut inner = self.inner.lock();
        inner.state = ResourceState::Loading;
        inner.error = None;
    }

    pub(crate) fn mark_loaded(&self, data: ResourceData, size: u64) {
        let mut inner = self.inner.lock();
        inner.state = ResourceState::Loaded;
        inner.data = Some(data);
        inner.size = size;
        inner.error = None;
        let now = Instant::now();
        inner.loaded_at = Some(now);
        inner.last_accessed = now;
    }

    pub(crate) fn mark_error(&self, message: &str) {
        let mut inner = self.inner.lock();
        inner.state = ResourceState::Error;
        inner.data = None;
        inner.error = Some(message.to_string());
    }

    /// Zeroes the size charge without touching state, ahead of a reload.
    pub(crate) fn take_size(&self) -> u64 {
        std::mem::take(&mut self.inner.lock().size)
    }

    /// Drops the payload and flips to `Evicted`; existing handles now fail
    /// typed. Returns the bytes released.
    pub(crate) fn mark_evicted(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.state = ResourceState::Evicted;
        inner.data = None;
        std::mem::take(&mut inner.size)
    }

    fn acquire(self: &Arc<Self>) {
        self.ref_count.fetch_add(1, Ordering::Relaxed);
    }

    fn release(&self) {
        self.ref_count.fetch_sub(1, Ordering::Release);
    }

    fn data(&self) -> Result<ResourceData> {
        let inner = self.inner.lock();
        match inner.state {
            ResourceState::Loaded => inner
                .data
                .clone()
                .ok_or_else(|| CathodeError::NotLoaded(self.id.clone())),
            ResourceState::Evicted => Err(CathodeError::ResourceEvicted(self.id.clone())),
            ResourceState::Error => Err(CathodeError::LoaderFailure {
                id: self.id.clone(),
                reason: inner.error.clone().unwrap_or_else(|| "unknown".into()),
            }),
            ResourceState::Unloaded | ResourceState::Loading => {
                Err(CathodeError::NotLoaded(self.id.clone()))
            }
        }
    }
}

/// A reference-counted ticket onto a cached resource.
///
/// Creation pins the entry; [`release`](Self::release) (or drop) unpins it.
/// Release is idempotent per handle.
pub struct ResourceHandle {
    entry: Arc<ResourceEntry>,
    released: AtomicBool,
}

impl ResourceHandle {
    #[must_use]
    pub fn new(entry: Arc<ResourceEntry>) -> Self {
        entry.acquire();
        Self {
            entry,
            released: AtomicBool::new(false),
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        self.entry.id()
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> &str {
        self.entry.kind()
    }

    #[must_use]
    pub fn state(&self) -> ResourceState {
        self.entry.state()
    }

    /// Entry refcount, counting this handle while unreleased.
    #[must_use]
    pub fn ref_count(&self) -> u32 {
        self.entry.ref_count()
    }

    /// Typed payload access. Touches the usage counters on success.
    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        if self.released.load(Ordering::Acquire) {
            return Err(CathodeError::NotLoaded(self.entry.id().to_string()));
        }
        let data = self.entry.data()?;
        self.entry.touch();
        data.downcast::<T>().map_err(|_| CathodeError::TypeMismatch {
            id: self.entry.id().to_string(),
            cached: self.entry.kind().to_string(),
            requested: std::any::type_name::<T>().to_string(),
        })
    }

    /// Unpins the entry. Further `get` calls fail with `NotLoaded`.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.entry.release();
        }
    }
}

impl Drop for ResourceHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded_entry() -> Arc<ResourceEntry> {
        let entry = ResourceEntry::new("tex:brick", "texture");
        entry.mark_loading();
        entry.mark_loaded(Arc::new(vec![1u8, 2, 3]), 3);
        entry
    }

    #[test]
    fn handle_pins_and_releases() {
        let entry = loaded_entry();
        assert_eq!(entry.ref_count(), 0);

        let h1 = ResourceHandle::new(Arc::clone(&entry));
        let h2 = ResourceHandle::new(Arc::clone(&entry));
        assert_eq!(entry.ref_count(), 2);
        assert!(entry.is_pinned());

        h1.release();
        h1.release(); // idempotent
        assert_eq!(entry.ref_count(), 1);

        drop(h2);
        assert_eq!(entry.ref_count(), 0);
    }

    #[test]
    fn evicted_entry_yields_typed_error() {
        let entry = loaded_entry();
        let handle = ResourceHandle::new(Arc::clone(&entry));
        assert!(handle.get::<Vec<u8>>().is_ok());

        entry.mark_evicted();
        assert!(matches!(
            handle.get::<Vec<u8>>(),
            Err(CathodeError::ResourceEvicted(_))
        ));
    }

    #[test]
    fn released_handle_refuses_access() {
        let entry = loaded_entry();
        let handle = ResourceHandle::new(entry);
        handle.release();
        assert!(matches!(
            handle.get::<Vec<u8>>(),
            Err(CathodeError::NotLoaded(_))
        ));
    }

    #[test]
    fn loading_entry_is_not_loaded() {
        let entry = ResourceEntry::new("model:ship", "model");
        entry.mark_loading();
        let handle = ResourceHandle::new(entry);
        assert!(matches!(
            handle.get::<Vec<u8>>(),
            Err(CathodeError::NotLoaded(_))
        ));
    }
}
