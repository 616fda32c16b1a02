// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! A histogram safe to record into from many threads concurrently, without readers ever
//! blocking a writer for longer than an uncontended RwLock read.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::RwLock;

use crate::counts::AtomicCounts;
use crate::geometry::Geometry;
use crate::histogram::Histogram;
use crate::{CreationError, RecordError, ShiftError};

/// A concurrently-recordable histogram.
///
/// Every recording is a read-locked geometry lookup followed by a single atomic fetch-add, so
/// writers only ever contend with each other's cache lines, never with each other's locks.
/// Structural changes (`resize`, `shift_values_left`/`right`) take the write lock and are the
/// only operations that can make a concurrent `record` call wait.
pub struct ConcurrentHistogram {
    geometry: RwLock<Geometry>,
    counts: RwLock<AtomicCounts>,
    auto_resize: bool,
    total_count: AtomicU64,
    max_value: AtomicU64,
    min_non_zero_value: AtomicU64,
    start_timestamp: AtomicI64,
    end_timestamp: AtomicI64,
    has_overflowed: AtomicBool,
}

impl ConcurrentHistogram {
    pub fn new(
        lowest_discernible_value: u64,
        highest_trackable_value: u64,
        significant_figures: u8,
        auto_resize: bool,
    ) -> Result<Self, CreationError> {
        let geometry = Geometry::new(lowest_discernible_value, highest_trackable_value, significant_figures)?;
        let len = geometry.counts_array_length();
        Ok(ConcurrentHistogram {
            geometry: RwLock::new(geometry),
            counts: RwLock::new(AtomicCounts::new(len)),
            auto_resize,
            total_count: AtomicU64::new(0),
            max_value: AtomicU64::new(0),
            min_non_zero_value: AtomicU64::new(u64::MAX),
            start_timestamp: AtomicI64::new(0),
            end_timestamp: AtomicI64::new(0),
            has_overflowed: AtomicBool::new(false),
        })
    }

    pub fn record(&self, value: u64) -> Result<(), RecordError> {
        self.record_n(value, 1)
    }

    pub fn record_n(&self, value: u64, count: u64) -> Result<(), RecordError> {
        let index = self.index_for(value)?;
        {
            let counts = self.counts.read().unwrap();
            counts.add(index, count);
        }
        self.total_count.fetch_add(count, Ordering::Relaxed);
        self.update_max(value);
        self.update_min_non_zero(value);
        Ok(())
    }

    pub fn record_with_expected_interval(&self, value: u64, expected_interval: u64) -> Result<(), RecordError> {
        self.record(value)?;
        if expected_interval == 0 || value < expected_interval {
            return Ok(());
        }
        let mut backfill_value = value - expected_interval;
        while backfill_value >= expected_interval {
            self.record(backfill_value)?;
            backfill_value -= expected_interval;
        }
        Ok(())
    }

    fn index_for(&self, value: u64) -> Result<usize, RecordError> {
        let index = self.geometry.read().unwrap().counts_array_index(value);
        if index < self.counts.read().unwrap().len() {
            return Ok(index);
        }
        if !self.auto_resize {
            return Err(RecordError::OutOfRange);
        }
        self.resize(value);
        Ok(self.geometry.read().unwrap().counts_array_index(value))
    }

    fn resize(&self, value_to_cover: u64) {
        let mut geometry_guard = self.geometry.write().unwrap();
        let new_geometry = geometry_guard.resized_to(value_to_cover);
        let new_len = new_geometry.counts_array_length();
        let mut counts_guard = self.counts.write().unwrap();
        if new_len > counts_guard.len() {
            let grown = AtomicCounts::new(new_len);
            for i in 0..counts_guard.len() {
                grown.set(i, counts_guard.get(i));
            }
            *counts_guard = grown;
        }
        *geometry_guard = new_geometry;
        log::debug!("resized concurrent histogram to cover {value_to_cover}");
    }

    fn update_max(&self, value: u64) {
        let mut current = self.max_value.load(Ordering::Relaxed);
        while value > current {
            match self
                .max_value
                .compare_exchange_weak(current, value, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    fn update_min_non_zero(&self, value: u64) {
        if value == 0 {
            return;
        }
        let mut current = self.min_non_zero_value.load(Ordering::Relaxed);
        while value < current {
            match self
                .min_non_zero_value
                .compare_exchange_weak(current, value, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn total_count(&self) -> u64 {
        self.total_count.load(Ordering::Relaxed)
    }

    pub fn has_overflowed(&self) -> bool {
        self.has_overflowed.load(Ordering::Relaxed)
    }

    pub(crate) fn set_start_timestamp(&self, value: i64) {
        self.start_timestamp.store(value, Ordering::Relaxed);
    }

    pub(crate) fn set_end_timestamp(&self, value: i64) {
        self.end_timestamp.store(value, Ordering::Relaxed);
    }

    /// Clears all counts and trackers, keeping the current geometry and allocation.
    pub fn reset(&self) {
        self.counts.read().unwrap().clear();
        self.total_count.store(0, Ordering::Relaxed);
        self.max_value.store(0, Ordering::Relaxed);
        self.min_non_zero_value.store(u64::MAX, Ordering::Relaxed);
        self.has_overflowed.store(false, Ordering::Relaxed);
        self.start_timestamp.store(0, Ordering::Relaxed);
        self.end_timestamp.store(0, Ordering::Relaxed);
    }

    /// Materializes a plain, point-in-time copy of this histogram's state. Used by
    /// [`crate::Recorder::get_interval_histogram`] to hand back a stable snapshot that callers
    /// can query without touching any atomics.
    pub(crate) fn to_histogram(&self, recorder_tag: Option<u64>) -> Histogram<u64> {
        let geometry = *self.geometry.read().unwrap();
        let counts_guard = self.counts.read().unwrap();
        let len = counts_guard.len();
        let mut snapshot = Histogram::<u64>::from_geometry(geometry, self.auto_resize);
        for i in 0..len {
            let value = counts_guard.get(i);
            if value != 0 {
                snapshot.counts.set(i, value);
            }
        }
        drop(counts_guard);
        snapshot.total_count = self.total_count.load(Ordering::Relaxed);
        snapshot.max_value = self.max_value.load(Ordering::Relaxed);
        snapshot.min_non_zero_value = self.min_non_zero_value.load(Ordering::Relaxed);
        snapshot.start_timestamp = self.start_timestamp.load(Ordering::Relaxed);
        snapshot.end_timestamp = self.end_timestamp.load(Ordering::Relaxed);
        snapshot.has_overflowed = self.has_overflowed.load(Ordering::Relaxed);
        snapshot.recorder_tag = recorder_tag;
        snapshot
    }

    pub fn shift_values_left(&self, shift_amount: u32) -> Result<(), ShiftError> {
        if shift_amount == 0 {
            return Ok(());
        }
        let geometry = *self.geometry.read().unwrap();
        let mut counts_guard = self.counts.write().unwrap();
        let len = counts_guard.len();
        let half = geometry.sub_bucket_half_count;
        let guard_cells = (shift_amount as usize) * half;

        if guard_cells < len {
            for index in (len - guard_cells)..len {
                if counts_guard.get(index) != 0 {
                    return Err(ShiftError::Overflow);
                }
            }
        } else if self.total_count() > 0 {
            return Err(ShiftError::Overflow);
        }

        let rebuilt = AtomicCounts::new(len);
        for index in 0..len {
            let count = counts_guard.get(index);
            if count == 0 {
                continue;
            }
            let value = geometry.lowest_equivalent_value(geometry.value_from_index(index));
            let shifted = value << shift_amount;
            let new_index = geometry.counts_array_index(shifted);
            if new_index >= len {
                return Err(ShiftError::Overflow);
            }
            rebuilt.add(new_index, count);
        }
        *counts_guard = rebuilt;
        drop(counts_guard);
        self.rescale_trackers(|v| v << shift_amount);
        log::debug!("shifted concurrent histogram left by {shift_amount}");
        Ok(())
    }

    pub fn shift_values_right(&self, shift_amount: u32, underflow_protection: bool) -> Result<(), ShiftError> {
        if shift_amount == 0 {
            return Ok(());
        }
        let geometry = *self.geometry.read().unwrap();
        let mut counts_guard = self.counts.write().unwrap();
        let len = counts_guard.len();
        let half = geometry.sub_bucket_half_count;

        if underflow_protection {
            let guard_cells = (shift_amount as usize) * half;
            let end = (half + guard_cells).min(len);
            for index in half..end {
                if counts_guard.get(index) != 0 {
                    return Err(ShiftError::Underflow);
                }
            }
        }

        let rebuilt = AtomicCounts::new(len);
        for index in 0..len {
            let count = counts_guard.get(index);
            if count == 0 {
                continue;
            }
            let value = geometry.lowest_equivalent_value(geometry.value_from_index(index));
            let shifted = value >> shift_amount;
            let new_index = geometry.counts_array_index(shifted).min(len - 1);
            rebuilt.add(new_index, count);
        }
        *counts_guard = rebuilt;
        drop(counts_guard);
        self.rescale_trackers(|v| (v >> shift_amount).max(1));
        log::debug!("shifted concurrent histogram right by {shift_amount}");
        Ok(())
    }

    fn rescale_trackers(&self, f: impl Fn(u64) -> u64) {
        let max = self.max_value.load(Ordering::Relaxed);
        self.max_value.store(f(max), Ordering::Relaxed);
        let min = self.min_non_zero_value.load(Ordering::Relaxed);
        if min != u64::MAX {
            self.min_non_zero_value.store(f(min), Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn records_from_many_threads() {
        let histogram = Arc::new(ConcurrentHistogram::new(1, 1_000_000, 3, false).unwrap());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let histogram = histogram.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    histogram.record(100).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(histogram.total_count(), 8000);
    }

    #[test]
    fn to_histogram_reflects_recorded_values() {
        let histogram = ConcurrentHistogram::new(1, 1_000_000, 3, false).unwrap();
        histogram.record(42).unwrap();
        histogram.record(1000).unwrap();
        let snapshot = histogram.to_histogram(None);
        assert_eq!(snapshot.total_count(), 2);
        assert_eq!(snapshot.min(), 42);
    }

    #[test]
    fn reset_clears_state() {
        let histogram = ConcurrentHistogram::new(1, 1_000_000, 3, false).unwrap();
        histogram.record(5).unwrap();
        histogram.reset();
        assert_eq!(histogram.total_count(), 0);
    }
}
