//! Contiguous Matrix Pools
//!
//! One pool holds `N × 16` floats in a single allocation; the transform
//! system keeps two of them (local and world) and addresses rows through
//! [`MatrixIndex`] handles. Row views are zero-copy mutable spans into the
//! backing block, and freed rows are reset to identity before reuse so a
//! recycled index never leaks the previous owner's transform.

use crate::errors::{CathodeError, Result};
use crate::math::kernel::{identity_to, MAT4_SIZE};

/// Hard cap on pool growth.
pub const MAX_MATRICES: usize = 65_536;

/// Index of one 16-float row in a [`MatrixStorage`] pool.
pub type MatrixIndex = usize;

/// A growable pool of 4×4 matrices in one contiguous block.
pub struct MatrixStorage {
    data: Vec<f32>,
    free: Vec<MatrixIndex>,
    /// Rows handed out and not yet freed.
    live: usize,
    /// Rows the block currently has room for.
    capacity: usize,
}

impl MatrixStorage {
    /// Creates a pool with room for `initial_capacity` matrices.
    #[must_use]
    pub fn new(initial_capacity: usize) -> Self {
        let capacity = initial_capacity.clamp(1, MAX_MATRICES);
        let mut data = vec![0.0; capacity * MAT4_SIZE];
        for row in data.chunks_exact_mut(MAT4_SIZE) {
            identity_to(row.try_into().expect("chunk is MAT4_SIZE"));
        }
        Self {
            data,
            free: (0..capacity).rev().collect(),
            live: 0,
            capacity,
        }
    }

    /// Number of rows currently handed out.
    #[inline]
    #[must_use]
    pub fn live(&self) -> usize {
        self.live
    }

    /// Current row capacity of the backing block.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Allocates a row, growing the block by doubling when the free list is
    /// empty. Fails with [`CathodeError::StorageExhausted`] at the hard cap.
    pub fn allocate(&mut self) -> Result<MatrixIndex> {
        if self.free.is_empty() {
            self.grow()?;
        }
        let index = self.free.pop().expect("grow refilled the free list");
        self.live += 1;
        Ok(index)
    }

    /// Returns a row to the pool, resetting it to identity.
    pub fn free(&mut self, index: MatrixIndex) {
        debug_assert!(index < self.capacity, "freed index out of range");
        identity_to(self.matrix_mut(index));
        self.free.push(index);
        self.live = self.live.saturating_sub(1);
    }

    /// Zero-copy view of one row.
    #[inline]
    #[must_use]
    pub fn matrix(&self, index: MatrixIndex) -> &[f32; 16] {
        let start = index * MAT4_SIZE;
        (&self.data[start..start + MAT4_SIZE])
            .try_into()
            .expect("row is MAT4_SIZE")
    }

    /// Zero-copy mutable view of one row.
    #[inline]
    pub fn matrix_mut(&mut self, index: MatrixIndex) -> &mut [f32; 16] {
        let start = index * MAT4_SIZE;
        (&mut self.data[start..start + MAT4_SIZE])
            .try_into()
            .expect("row is MAT4_SIZE")
    }

    /// Disjoint borrow of two rows: `a` read-only, `b` mutable.
    ///
    /// Lets `world[b] = world[a] × local` run without copying either side.
    /// Panics if `a == b`.
    pub fn pair_mut(&mut self, a: MatrixIndex, b: MatrixIndex) -> (&[f32; 16], &mut [f32; 16]) {
        assert_ne!(a, b, "pair_mut requires distinct rows");
        let (a_start, b_start) = (a * MAT4_SIZE, b * MAT4_SIZE);
        if a_start < b_start {
            let (head, tail) = self.data.split_at_mut(b_start);
            (
                (&head[a_start..a_start + MAT4_SIZE]).try_into().expect("row"),
                (&mut tail[..MAT4_SIZE]).try_into().expect("row"),
            )
        } else {
            let (head, tail) = self.data.split_at_mut(a_start);
            (
                (&tail[..MAT4_SIZE]).try_into().expect("row"),
                (&mut head[b_start..b_start + MAT4_SIZE]).try_into().expect("row"),
            )
        }
    }

    fn grow(&mut self) -> Result<()> {
        if self.capacity >= MAX_MATRICES {
            return Err(CathodeError::StorageExhausted(MAX_MATRICES));
        }
        let new_capacity = (self.capacity * 2).min(MAX_MATRICES);
        self.data.resize(new_capacity * MAT4_SIZE, 0.0);
        for index in self.capacity..new_capacity {
            identity_to(self.matrix_mut(index));
        }
        // New rows pushed high-to-low so allocation order stays LIFO.
        for index in (self.capacity..new_capacity).rev() {
            self.free.push(index);
        }
        log::debug!("matrix pool grown: {} -> {new_capacity} rows", self.capacity);
        self.capacity = new_capacity;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::kernel::compose_trs_to;
    use glam::Vec3;

    #[test]
    fn allocate_free_recycles_as_identity() {
        let mut pool = MatrixStorage::new(4);
        let i = pool.allocate().unwrap();
        compose_trs_to(pool.matrix_mut(i), Vec3::splat(9.0), Vec3::ZERO, Vec3::ONE);
        pool.free(i);
        let j = pool.allocate().unwrap();
        assert_eq!(i, j, "free list is LIFO");
        assert_eq!(pool.matrix(j)[12], 0.0, "recycled row is identity");
    }

    #[test]
    fn grows_by_doubling() {
        let mut pool = MatrixStorage::new(2);
        let _a = pool.allocate().unwrap();
        let _b = pool.allocate().unwrap();
        let _c = pool.allocate().unwrap();
        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.live(), 3);
    }

    #[test]
    fn pair_mut_borrows_disjoint_rows() {
        let mut pool = MatrixStorage::new(4);
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        compose_trs_to(pool.matrix_mut(a), Vec3::new(5.0, 0.0, 0.0), Vec3::ZERO, Vec3::ONE);
        let (pa, pb) = pool.pair_mut(a, b);
        pb.copy_from_slice(pa);
        assert_eq!(pool.matrix(b)[12], 5.0);
    }
}
