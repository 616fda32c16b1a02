// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Counts-array storage variants.
//!
//! [`rustcommon-histogram`'s original `Counter` trait][crate] restricted which integer types
//! could back a histogram cell and gave them saturating arithmetic. This crate keeps the same
//! shape of trait but wraps on overflow instead of saturating, per this implementation's
//! `hasOverflowed` contract: a wrapped cell is detectable after the fact by comparing the sum
//! of all cells against the incrementally maintained `total_count`, rather than silently
//! clamping and losing the signal that an overflow happened at all.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// A type usable as a non-atomic histogram cell.
pub trait Counter: Copy + Default + 'static {
    /// The widest value this counter type can represent, as a `u64`.
    const MAX: u64;

    fn from_u64(value: u64) -> Self;
    fn to_u64(self) -> u64;
    fn wrapping_add(self, delta: u64) -> Self;
}

macro_rules! impl_counter {
    ($t:ty) => {
        impl Counter for $t {
            const MAX: u64 = <$t>::MAX as u64;

            #[inline]
            fn from_u64(value: u64) -> Self {
                value as $t
            }

            #[inline]
            fn to_u64(self) -> u64 {
                self as u64
            }

            #[inline]
            fn wrapping_add(self, delta: u64) -> Self {
                self.wrapping_add(delta as $t)
            }
        }
    };
}

impl_counter!(u16);
impl_counter!(u32);
impl_counter!(u64);

/// A plain (non-atomic) counts array backing the single-threaded [`crate::Histogram`].
#[derive(Clone)]
pub(crate) struct FixedCounts<T: Counter> {
    cells: Vec<T>,
}

impl<T: Counter> FixedCounts<T> {
    pub(crate) fn new(len: usize) -> Self {
        FixedCounts {
            cells: vec![T::default(); len],
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.cells.len()
    }

    pub(crate) fn get(&self, index: usize) -> u64 {
        self.cells[index].to_u64()
    }

    /// Adds `delta` to the cell, wrapping on overflow. Returns `true` if the addition wrapped.
    pub(crate) fn add(&mut self, index: usize, delta: u64) -> bool {
        let before = self.cells[index];
        let after = before.wrapping_add(delta);
        self.cells[index] = after;
        after.to_u64() < before.to_u64() && delta > 0
    }

    pub(crate) fn set(&mut self, index: usize, value: u64) {
        self.cells[index] = T::from_u64(value);
    }

    pub(crate) fn clear(&mut self) {
        for cell in self.cells.iter_mut() {
            *cell = T::default();
        }
    }

    pub(crate) fn grow_to(&mut self, new_len: usize) {
        self.cells.resize(new_len, T::default());
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.cells.iter().map(|c| c.to_u64())
    }
}

/// A counts array of atomic 64-bit cells plus a normalizing index offset, so the whole array
/// can be logically rotated (for `shiftValuesLeft`/`Right`'s O(1) bulk move) by mutating only
/// the offset instead of every cell.
pub(crate) struct AtomicCounts {
    cells: Box<[AtomicU64]>,
    normalizing_offset: AtomicI64,
}

impl AtomicCounts {
    pub(crate) fn new(len: usize) -> Self {
        let mut cells = Vec::with_capacity(len);
        cells.resize_with(len, || AtomicU64::new(0));
        AtomicCounts {
            cells: cells.into_boxed_slice(),
            normalizing_offset: AtomicI64::new(0),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.cells.len()
    }

    pub(crate) fn offset(&self) -> i64 {
        self.normalizing_offset.load(Ordering::Acquire)
    }

    pub(crate) fn set_offset(&self, offset: i64) {
        self.normalizing_offset.store(offset, Ordering::Release);
    }

    fn physical_index(&self, logical_index: usize) -> usize {
        let len = self.cells.len() as i64;
        let offset = self.offset();
        (((logical_index as i64 - offset) % len + len) % len) as usize
    }

    pub(crate) fn get(&self, logical_index: usize) -> u64 {
        self.cells[self.physical_index(logical_index)].load(Ordering::Relaxed)
    }

    pub(crate) fn add(&self, logical_index: usize, delta: u64) -> u64 {
        self.cells[self.physical_index(logical_index)].fetch_add(delta, Ordering::Relaxed)
    }

    pub(crate) fn set(&self, logical_index: usize, value: u64) {
        self.cells[self.physical_index(logical_index)].store(value, Ordering::Relaxed);
    }

    pub(crate) fn clear(&self) {
        for cell in self.cells.iter() {
            cell.store(0, Ordering::Relaxed);
        }
        self.normalizing_offset.store(0, Ordering::Relaxed);
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }
}

impl Clone for AtomicCounts {
    fn clone(&self) -> Self {
        let copy = AtomicCounts::new(self.len());
        copy.set_offset(self.offset());
        for i in 0..self.len() {
            copy.set(i, self.get(i));
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_counts_wraps_on_overflow() {
        let mut c = FixedCounts::<u16>::new(1);
        assert!(!c.add(0, u16::MAX as u64));
        assert_eq!(c.get(0), u16::MAX as u64);
        assert!(c.add(0, 1));
        assert_eq!(c.get(0), 0);
    }

    #[test]
    fn atomic_counts_rotate_via_offset() {
        let counts = AtomicCounts::new(4);
        counts.set(0, 10);
        counts.set(1, 20);
        counts.set(2, 30);
        counts.set(3, 40);
        counts.set_offset(1);
        // logical index 0 now reads what was physically stored as index 1
        assert_eq!(counts.get(0), 20);
        assert_eq!(counts.get(3), 10);
    }

    #[test]
    fn atomic_counts_add_is_cumulative() {
        let counts = AtomicCounts::new(2);
        counts.add(0, 5);
        counts.add(0, 7);
        assert_eq!(counts.get(0), 12);
    }
}
