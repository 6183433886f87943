//! VRAM Accounting and Buffer Pooling
//!
//! Every allocation is charged to a category with a configurable budget;
//! exceeding a budget is a hard failure, not a warning. Dynamic vertex and
//! index buffers are recycled through a bucketed pool — [`bucket_size`] is
//! the single definition of the bucket formula, used by both the acquire
//! and release paths, so the two can never disagree about how many bytes a
//! pooled buffer actually holds.

use rustc_hash::FxHashMap;

use crate::errors::{CathodeError, Result};

/// Smallest pool bucket, bytes.
pub const MIN_BUCKET: u64 = 256;
/// Largest pool bucket, bytes.
pub const MAX_BUCKET: u64 = 64 * 1024 * 1024;

/// The bucket a buffer of `size` bytes is padded to:
/// `clamp(next_power_of_two(size), MIN_BUCKET, MAX_BUCKET)`.
#[must_use]
pub fn bucket_size(size: u64) -> u64 {
    size.max(1).next_power_of_two().clamp(MIN_BUCKET, MAX_BUCKET)
}

/// Accounting category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VramCategory {
    Vertex,
    Index,
    Uniform,
    Storage,
    Texture,
}

impl VramCategory {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            VramCategory::Vertex => "vertex",
            VramCategory::Index => "index",
            VramCategory::Uniform => "uniform",
            VramCategory::Storage => "storage",
            VramCategory::Texture => "texture",
        }
    }

    const ALL: [VramCategory; 5] = [
        VramCategory::Vertex,
        VramCategory::Index,
        VramCategory::Uniform,
        VramCategory::Storage,
        VramCategory::Texture,
    ];
}

/// Per-category byte budgets.
#[derive(Debug, Clone)]
pub struct VramBudgets {
    pub vertex: u64,
    pub index: u64,
    pub uniform: u64,
    pub storage: u64,
    pub texture: u64,
}

impl Default for VramBudgets {
    fn default() -> Self {
        Self {
            vertex: 256 * 1024 * 1024,
            index: 64 * 1024 * 1024,
            uniform: 16 * 1024 * 1024,
            storage: 128 * 1024 * 1024,
            texture: 512 * 1024 * 1024,
        }
    }
}

impl VramBudgets {
    fn budget(&self, category: VramCategory) -> u64 {
        match category {
            VramCategory::Vertex => self.vertex,
            VramCategory::Index => self.index,
            VramCategory::Uniform => self.uniform,
            VramCategory::Storage => self.storage,
            VramCategory::Texture => self.texture,
        }
    }
}

/// Tracks used bytes per category against the budgets.
#[derive(Debug)]
pub struct VramAccounting {
    budgets: VramBudgets,
    used: FxHashMap<VramCategory, u64>,
}

impl VramAccounting {
    #[must_use]
    pub fn new(budgets: VramBudgets) -> Self {
        Self {
            budgets,
            used: FxHashMap::default(),
        }
    }

    /// Charges `size` bytes to `category`, failing when the budget would be
    /// exceeded. Nothing is charged on failure.
    pub fn charge(&mut self, category: VramCategory, size: u64) -> Result<()> {
        let used = self.used.entry(category).or_insert(0);
        let budget = self.budgets.budget(category);
        if *used + size > budget {
            return Err(CathodeError::VramBudgetExceeded {
                category: category.name(),
                requested: size,
                available: budget.saturating_sub(*used),
            });
        }
        *used += size;
        Ok(())
    }

    /// Releases `size` bytes from `category`.
    pub fn release(&mut self, category: VramCategory, size: u64) {
        let used = self.used.entry(category).or_insert(0);
        debug_assert!(*used >= size, "releasing more than charged");
        *used = used.saturating_sub(size);
    }

    #[must_use]
    pub fn used(&self, category: VramCategory) -> u64 {
        self.used.get(&category).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total_used(&self) -> u64 {
        VramCategory::ALL.iter().map(|c| self.used(*c)).sum()
    }
}

/// Bucketed free-list of recycled pooled buffers.
///
/// The pool stores whatever handle type the owning backend uses. Both
/// `acquire` and `release` round through [`bucket_size`], so a buffer
/// released after being acquired for a smaller request still lands in the
/// bucket its real capacity belongs to.
#[derive(Debug)]
pub struct BucketPool<H> {
    free: FxHashMap<u64, Vec<H>>,
    pooled_out: usize,
}

impl<H> Default for BucketPool<H> {
    fn default() -> Self {
        Self {
            free: FxHashMap::default(),
            pooled_out: 0,
        }
    }
}

impl<H> BucketPool<H> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pops a recycled buffer whose bucket covers `size`, if any.
    pub fn acquire(&mut self, size: u64) -> Option<(H, u64)> {
        let bucket = bucket_size(size);
        let handle = self.free.get_mut(&bucket)?.pop()?;
        self.pooled_out += 1;
        Some((handle, bucket))
    }

    /// Returns a buffer originally created for `requested_size` bytes. The
    /// full bucket size is what the pool (and the accounting) keeps.
    pub fn release(&mut self, handle: H, requested_size: u64) -> u64 {
        let bucket = bucket_size(requested_size);
        self.free.entry(bucket).or_default().push(handle);
        self.pooled_out = self.pooled_out.saturating_sub(1);
        bucket
    }

    /// Drains every free list (device loss, shutdown).
    pub fn drain(&mut self) -> Vec<H> {
        self.free.drain().flat_map(|(_, v)| v).collect()
    }

    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_formula_pins() {
        assert_eq!(bucket_size(1), MIN_BUCKET);
        assert_eq!(bucket_size(256), 256);
        assert_eq!(bucket_size(257), 512);
        assert_eq!(bucket_size(1000), 1024);
        assert_eq!(bucket_size(1024), 1024);
        assert_eq!(bucket_size(u64::MAX / 2), MAX_BUCKET);
    }

    #[test]
    fn acquire_and_release_agree_on_buckets() {
        let mut pool: BucketPool<u32> = BucketPool::new();
        // Released for a 300-byte request → 512 bucket
        assert_eq!(pool.release(7, 300), 512);
        // A 400-byte request rounds to the same bucket and reuses it
        let (handle, bucket) = pool.acquire(400).unwrap();
        assert_eq!((handle, bucket), (7, 512));
        // Nothing left
        assert!(pool.acquire(400).is_none());
    }

    #[test]
    fn budget_exceeded_is_typed_and_uncharged() {
        let mut vram = VramAccounting::new(VramBudgets {
            uniform: 1024,
            ..VramBudgets::default()
        });
        vram.charge(VramCategory::Uniform, 1000).unwrap();
        let err = vram.charge(VramCategory::Uniform, 100).unwrap_err();
        match err {
            CathodeError::VramBudgetExceeded {
                category,
                requested,
                available,
            } => {
                assert_eq!(category, "uniform");
                assert_eq!(requested, 100);
                assert_eq!(available, 24);
            }
            other => unreachable!("{other}"),
        }
        // Failed charge did not change the used total
        assert_eq!(vram.used(VramCategory::Uniform), 1000);
    }

    #[test]
    fn release_restores_headroom() {
        let mut vram = VramAccounting::new(VramBudgets {
            vertex: 2048,
            ..VramBudgets::default()
        });
        vram.charge(VramCategory::Vertex, 2048).unwrap();
        vram.release(VramCategory::Vertex, 1024);
        assert!(vram.charge(VramCategory::Vertex, 1024).is_ok());
    }
}
