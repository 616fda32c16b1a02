// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The single-threaded integer histogram.

use crate::counts::{Counter, FixedCounts};
use crate::geometry::Geometry;
use crate::iterators::{AllValuesIter, LinearIter, LogarithmicIter, PercentileIter, RecordedIter};
use crate::{CombineError, CreationError, RecordError, ShiftError};

/// Builds a [`Histogram`] with non-default construction options.
///
/// ```
/// use range_histogram::Histogram;
///
/// let h: Histogram<u64> = Histogram::builder()
///     .lowest_discernible_value(1)
///     .highest_trackable_value(3_600_000_000)
///     .significant_figures(3)
///     .auto_resize(true)
///     .build()
///     .unwrap();
/// assert_eq!(h.total_count(), 0);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Builder {
    lowest_discernible_value: u64,
    highest_trackable_value: u64,
    significant_figures: u8,
    auto_resize: bool,
}

impl Default for Builder {
    fn default() -> Self {
        Builder {
            lowest_discernible_value: 1,
            highest_trackable_value: 2,
            significant_figures: 3,
            auto_resize: false,
        }
    }
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lowest_discernible_value(mut self, value: u64) -> Self {
        self.lowest_discernible_value = value;
        self
    }

    pub fn highest_trackable_value(mut self, value: u64) -> Self {
        self.highest_trackable_value = value;
        self
    }

    pub fn significant_figures(mut self, value: u8) -> Self {
        self.significant_figures = value;
        self
    }

    pub fn auto_resize(mut self, value: bool) -> Self {
        self.auto_resize = value;
        self
    }

    pub fn build<T: Counter>(self) -> Result<Histogram<T>, CreationError> {
        let geometry = Geometry::new(
            self.lowest_discernible_value,
            self.highest_trackable_value,
            self.significant_figures,
        )?;
        Ok(Histogram::from_geometry(geometry, self.auto_resize))
    }
}

/// A histogram of non-negative integer values, bucketed so that relative error stays bounded
/// by the number of significant decimal figures requested at construction.
///
/// `T` selects the width of each counts-array cell (`u16`, `u32`, or `u64`); narrower cells use
/// less memory but wrap around on overflow, detectable afterward via [`Histogram::has_overflowed`].
pub struct Histogram<T: Counter = u64> {
    pub(crate) geometry: Geometry,
    pub(crate) counts: FixedCounts<T>,
    pub(crate) auto_resize: bool,
    pub(crate) total_count: u64,
    pub(crate) max_value: u64,
    pub(crate) min_non_zero_value: u64,
    pub(crate) start_timestamp: i64,
    pub(crate) end_timestamp: i64,
    pub(crate) has_overflowed: bool,
    pub(crate) recorder_tag: Option<u64>,
}

impl<T: Counter> Histogram<T> {
    /// Constructs a histogram able to discern values down to `lowest_discernible_value` and up
    /// to `highest_trackable_value`, to `significant_figures` decimal digits of precision.
    pub fn new(
        lowest_discernible_value: u64,
        highest_trackable_value: u64,
        significant_figures: u8,
    ) -> Result<Self, CreationError> {
        let geometry = Geometry::new(lowest_discernible_value, highest_trackable_value, significant_figures)?;
        Ok(Self::from_geometry(geometry, false))
    }

    pub fn builder() -> Builder {
        Builder::new()
    }

    pub(crate) fn from_geometry(geometry: Geometry, auto_resize: bool) -> Self {
        let len = geometry.counts_array_length();
        Histogram {
            geometry,
            counts: FixedCounts::new(len),
            auto_resize,
            total_count: 0,
            max_value: 0,
            min_non_zero_value: u64::MAX,
            start_timestamp: 0,
            end_timestamp: 0,
            has_overflowed: false,
            recorder_tag: None,
        }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub(crate) fn recorder_tag(&self) -> Option<u64> {
        self.recorder_tag
    }

    pub fn start_timestamp(&self) -> i64 {
        self.start_timestamp
    }

    pub fn end_timestamp(&self) -> i64 {
        self.end_timestamp
    }

    pub fn set_start_timestamp(&mut self, value: i64) {
        self.start_timestamp = value;
    }

    pub fn set_end_timestamp(&mut self, value: i64) {
        self.end_timestamp = value;
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn is_empty(&self) -> bool {
        self.total_count == 0
    }

    pub fn has_overflowed(&self) -> bool {
        self.has_overflowed
    }

    /// Recomputes `total_count` by summing every cell, accepting that a cell which has already
    /// wrapped cannot be un-wrapped -- the recovered total is only as accurate as the cells are.
    pub fn reestablish_total_count(&mut self) {
        self.total_count = self.counts.iter().sum();
    }

    pub(crate) fn counts_len(&self) -> usize {
        self.counts.len()
    }

    pub(crate) fn raw_count(&self, index: usize) -> u64 {
        self.counts.get(index)
    }

    /// Records a single occurrence of `value`.
    pub fn record(&mut self, value: u64) -> Result<(), RecordError> {
        self.record_n(value, 1)
    }

    /// Records `count` occurrences of `value`.
    pub fn record_n(&mut self, value: u64, count: u64) -> Result<(), RecordError> {
        let index = self.index_for(value)?;
        if self.counts.add(index, count) {
            self.has_overflowed = true;
            log::warn!("histogram cell at index {index} overflowed its counter width");
        }
        self.total_count = self.total_count.wrapping_add(count);
        if value > self.max_value {
            self.max_value = value;
        }
        if value != 0 && value < self.min_non_zero_value {
            self.min_non_zero_value = value;
        }
        Ok(())
    }

    /// Records `value`, and backfills synthetic recordings at `value - interval`,
    /// `value - 2*interval`, ... down to (but not below) `interval`, correcting for
    /// coordinated omission in a polling measurement loop.
    pub fn record_with_expected_interval(&mut self, value: u64, expected_interval: u64) -> Result<(), RecordError> {
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

    fn index_for(&mut self, value: u64) -> Result<usize, RecordError> {
        let index = self.geometry.counts_array_index(value);
        if index < self.counts.len() {
            return Ok(index);
        }
        if !self.auto_resize {
            return Err(RecordError::OutOfRange);
        }
        self.resize(value);
        Ok(self.geometry.counts_array_index(value))
    }

    fn resize(&mut self, value_to_cover: u64) {
        let new_geometry = self.geometry.resized_to(value_to_cover);
        let new_len = new_geometry.counts_array_length();
        self.counts.grow_to(new_len);
        self.geometry = new_geometry;
        log::debug!("resized histogram to cover {value_to_cover}, new length {new_len}");
    }

    /// The largest recorded value's highest equivalent value, or 0 if empty.
    pub fn max(&self) -> u64 {
        if self.total_count == 0 {
            0
        } else {
            self.geometry.highest_equivalent_value(self.max_value)
        }
    }

    /// The smallest recorded value, or 0 if the histogram is empty or has any count in cell 0.
    pub fn min(&self) -> u64 {
        if self.total_count == 0 {
            return 0;
        }
        if self.counts.get(0) > 0 {
            0
        } else {
            self.min_non_zero_value
        }
    }

    pub fn mean(&self) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }
        let mut total_value = 0f64;
        for index in 0..self.counts.len() {
            let count = self.counts.get(index);
            if count == 0 {
                continue;
            }
            let value = self.geometry.median_equivalent_value(self.geometry.value_from_index(index));
            total_value += value as f64 * count as f64;
        }
        total_value / self.total_count as f64
    }

    pub fn std_deviation(&self) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }
        let mean = self.mean();
        let mut geometric_deviation_total = 0f64;
        for index in 0..self.counts.len() {
            let count = self.counts.get(index);
            if count == 0 {
                continue;
            }
            let value = self.geometry.median_equivalent_value(self.geometry.value_from_index(index)) as f64;
            let deviation = value - mean;
            geometric_deviation_total += deviation * deviation * count as f64;
        }
        (geometric_deviation_total / self.total_count as f64).sqrt()
    }

    pub fn count_at_value(&self, value: u64) -> u64 {
        let index = self.geometry.counts_array_index(value);
        if index < self.counts.len() {
            self.counts.get(index)
        } else {
            0
        }
    }

    pub fn count_between_values(&self, low: u64, high: u64) -> u64 {
        if self.counts.len() == 0 {
            return 0;
        }
        let last = self.counts.len() - 1;
        let lo = self.geometry.counts_array_index(low).min(last);
        let hi = self.geometry.counts_array_index(high).min(last);
        (lo..=hi).map(|i| self.counts.get(i)).sum()
    }

    /// Percentage of recorded values at or below `value`.
    pub fn percentile_at_or_below_value(&self, value: u64) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }
        let last = self.counts.len() - 1;
        let index = self.geometry.counts_array_index(value).min(last);
        let covered: u64 = (0..=index).map(|i| self.counts.get(i)).sum();
        100.0 * covered as f64 / self.total_count as f64
    }

    /// The value at or below which `percentile` percent of recorded values fall.
    pub fn value_at_percentile(&self, percentile: f64) -> u64 {
        if self.total_count == 0 {
            return 0;
        }
        if percentile <= 0.0 {
            for index in 0..self.counts.len() {
                if self.counts.get(index) > 0 {
                    return self.geometry.lowest_equivalent_value(self.geometry.value_from_index(index));
                }
            }
            return 0;
        }
        let percentile = percentile.clamp(0.0, 100.0);
        let count_at_percentile = (((percentile / 100.0) * self.total_count as f64).ceil() as u64).max(1);

        let mut running_total = 0u64;
        for index in 0..self.counts.len() {
            running_total += self.counts.get(index);
            if running_total >= count_at_percentile {
                return self.geometry.highest_equivalent_value(self.geometry.value_from_index(index));
            }
        }
        self.max()
    }

    pub fn recorded_values(&self) -> RecordedIter<'_, T> {
        RecordedIter::new(self)
    }

    pub fn all_values(&self) -> AllValuesIter<'_, T> {
        AllValuesIter::new(self)
    }

    pub fn percentiles(&self, ticks_per_half_distance: u32) -> PercentileIter<'_, T> {
        PercentileIter::new(self, ticks_per_half_distance)
    }

    pub fn linear_buckets(&self, value_units_per_bucket: u64) -> LinearIter<'_, T> {
        LinearIter::new(self, value_units_per_bucket)
    }

    pub fn logarithmic_buckets(&self, value_units_first_bucket: u64, log_base: f64) -> LogarithmicIter<'_, T> {
        LogarithmicIter::new(self, value_units_first_bucket, log_base)
    }

    /// Adds every count from `other` into `self`. When the two histograms share the same
    /// geometry this is a direct cell-by-cell addition; otherwise each of `other`'s non-zero
    /// cells is re-recorded at its representative value, which can introduce a small amount of
    /// additional quantization error bounded by the coarser of the two geometries' precision.
    pub fn add(&mut self, other: &Histogram<T>) -> Result<(), CombineError> {
        if self.geometry == other.geometry {
            for index in 0..self.counts.len() {
                let delta = other.counts.get(index);
                if delta > 0 && self.counts.add(index, delta) {
                    self.has_overflowed = true;
                }
            }
            self.total_count = self.total_count.wrapping_add(other.total_count);
            if other.max_value > self.max_value {
                self.max_value = other.max_value;
            }
            if other.total_count > 0 && other.min_non_zero_value < self.min_non_zero_value {
                self.min_non_zero_value = other.min_non_zero_value;
            }
            return Ok(());
        }

        for index in 0..other.counts.len() {
            let count = other.counts.get(index);
            if count == 0 {
                continue;
            }
            let value = other.geometry.value_from_index(index);
            self.record_n(value, count).map_err(|_| CombineError::Underflow)?;
        }
        Ok(())
    }

    /// Removes every count in `other` from `self`. Fails, leaving `self` untouched, if any cell
    /// would be driven below zero.
    pub fn subtract(&mut self, other: &Histogram<T>) -> Result<(), CombineError> {
        if self.geometry == other.geometry {
            for index in 0..self.counts.len() {
                let delta = other.counts.get(index);
                if delta > self.counts.get(index) {
                    return Err(CombineError::Underflow);
                }
            }
            for index in 0..self.counts.len() {
                let delta = other.counts.get(index);
                if delta > 0 {
                    let remaining = self.counts.get(index) - delta;
                    self.counts.set(index, remaining);
                }
            }
            self.total_count = self.total_count.saturating_sub(other.total_count);
            self.reestablish_min_max();
            return Ok(());
        }

        for index in 0..other.counts.len() {
            let count = other.counts.get(index);
            if count == 0 {
                continue;
            }
            let value = other.geometry.value_from_index(index);
            let self_index = self.geometry.counts_array_index(value);
            if self_index >= self.counts.len() || self.counts.get(self_index) < count {
                return Err(CombineError::Underflow);
            }
        }
        for index in 0..other.counts.len() {
            let count = other.counts.get(index);
            if count == 0 {
                continue;
            }
            let value = other.geometry.value_from_index(index);
            let self_index = self.geometry.counts_array_index(value);
            let remaining = self.counts.get(self_index) - count;
            self.counts.set(self_index, remaining);
        }
        self.total_count = self.total_count.saturating_sub(other.total_count);
        self.reestablish_min_max();
        Ok(())
    }

    fn reestablish_min_max(&mut self) {
        self.max_value = 0;
        self.min_non_zero_value = u64::MAX;
        for index in 0..self.counts.len() {
            if self.counts.get(index) == 0 {
                continue;
            }
            let value = self.geometry.value_from_index(index);
            if value > self.max_value {
                self.max_value = value;
            }
            if value != 0 && value < self.min_non_zero_value {
                self.min_non_zero_value = value;
            }
        }
    }

    /// Multiplies every recorded value by `2^shift_amount`. Fails if any non-zero cell would be
    /// pushed past the end of the counts array.
    pub fn shift_values_left(&mut self, shift_amount: u32) -> Result<(), ShiftError> {
        if shift_amount == 0 {
            return Ok(());
        }
        let len = self.counts.len();
        let guard_cells = (shift_amount as usize) * self.geometry.sub_bucket_half_count;
        if guard_cells < len {
            for index in (len - guard_cells)..len {
                if self.counts.get(index) != 0 {
                    return Err(ShiftError::Overflow);
                }
            }
        } else if self.total_count > 0 {
            return Err(ShiftError::Overflow);
        }

        let mut rebuilt = FixedCounts::<T>::new(len);
        for index in 0..len {
            let count = self.counts.get(index);
            if count == 0 {
                continue;
            }
            let value = self.geometry.lowest_equivalent_value(self.geometry.value_from_index(index));
            let shifted = value << shift_amount;
            let new_index = self.geometry.counts_array_index(shifted);
            if new_index >= len {
                return Err(ShiftError::Overflow);
            }
            rebuilt.add(new_index, count);
        }
        self.counts = rebuilt;
        self.max_value <<= shift_amount;
        if self.min_non_zero_value != u64::MAX {
            self.min_non_zero_value <<= shift_amount;
        }
        log::debug!("shifted histogram values left by {shift_amount}");
        Ok(())
    }

    /// Divides every recorded value by `2^shift_amount`. With `underflow_protection`, fails
    /// instead of merging values that would become indistinguishable after the shift.
    pub fn shift_values_right(&mut self, shift_amount: u32, underflow_protection: bool) -> Result<(), ShiftError> {
        if shift_amount == 0 {
            return Ok(());
        }
        let len = self.counts.len();
        let half = self.geometry.sub_bucket_half_count;
        if underflow_protection {
            let guard_cells = (shift_amount as usize) * half;
            let end = (half + guard_cells).min(len);
            for index in half..end {
                if self.counts.get(index) != 0 {
                    return Err(ShiftError::Underflow);
                }
            }
        }

        let mut rebuilt = FixedCounts::<T>::new(len);
        for index in 0..len {
            let count = self.counts.get(index);
            if count == 0 {
                continue;
            }
            let value = self.geometry.lowest_equivalent_value(self.geometry.value_from_index(index));
            let shifted = value >> shift_amount;
            let new_index = self.geometry.counts_array_index(shifted).min(len - 1);
            rebuilt.add(new_index, count);
        }
        self.counts = rebuilt;
        self.max_value >>= shift_amount;
        if self.min_non_zero_value != u64::MAX {
            self.min_non_zero_value = (self.min_non_zero_value >> shift_amount).max(1);
        }
        log::debug!("shifted histogram values right by {shift_amount}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_reports_basic_stats() {
        let mut h: Histogram<u64> = Histogram::new(1, 3_600_000_000, 3).unwrap();
        h.record(100).unwrap();
        h.record(200).unwrap();
        h.record(300).unwrap();
        assert_eq!(h.total_count(), 3);
        assert_eq!(h.min(), 100);
        assert!(h.max() >= 300);
        assert!((h.mean() - 200.0).abs() < 5.0);
    }

    #[test]
    fn out_of_range_without_auto_resize_errors() {
        let mut h: Histogram<u64> = Histogram::new(1, 1000, 3).unwrap();
        assert_eq!(h.record(1_000_000), Err(RecordError::OutOfRange));
    }

    #[test]
    fn auto_resize_grows_to_cover_value() {
        let mut h: Histogram<u64> = Histogram::builder()
            .lowest_discernible_value(1)
            .highest_trackable_value(1000)
            .significant_figures(3)
            .auto_resize(true)
            .build()
            .unwrap();
        h.record(1_000_000).unwrap();
        assert_eq!(h.total_count(), 1);
        assert!(h.max() >= 1_000_000);
    }

    #[test]
    fn narrow_counter_reports_overflow() {
        let mut h: Histogram<u16> = Histogram::new(1, 1000, 3).unwrap();
        for _ in 0..70_000 {
            h.record(5).unwrap();
        }
        assert!(h.has_overflowed());
        h.reestablish_total_count();
    }

    #[test]
    fn value_at_percentile_matches_manual_count() {
        let mut h: Histogram<u64> = Histogram::new(1, 100_000, 3).unwrap();
        for v in 1..=1000u64 {
            h.record(v).unwrap();
        }
        let p50 = h.value_at_percentile(50.0);
        assert!(p50 >= 490 && p50 <= 520, "p50={p50}");
        let p100 = h.value_at_percentile(100.0);
        assert!(p100 >= 1000);
    }

    #[test]
    fn value_at_percentile_zero_is_lowest_equivalent_value() {
        let mut h: Histogram<u64> = Histogram::new(1, 100_000, 3).unwrap();
        h.record(500).unwrap();
        h.record(1000).unwrap();
        let expected = h.geometry.lowest_equivalent_value(500);
        assert_eq!(h.value_at_percentile(0.0), expected);
    }

    #[test]
    fn add_same_geometry_is_exact() {
        let mut a: Histogram<u64> = Histogram::new(1, 100_000, 3).unwrap();
        let mut b: Histogram<u64> = Histogram::new(1, 100_000, 3).unwrap();
        a.record(10).unwrap();
        b.record(20).unwrap();
        b.record(30).unwrap();
        a.add(&b).unwrap();
        assert_eq!(a.total_count(), 3);
        assert_eq!(a.count_at_value(20), 1);
    }

    #[test]
    fn subtract_more_than_present_fails() {
        let mut a: Histogram<u64> = Histogram::new(1, 100_000, 3).unwrap();
        let mut b: Histogram<u64> = Histogram::new(1, 100_000, 3).unwrap();
        a.record(10).unwrap();
        b.record(10).unwrap();
        b.record(10).unwrap();
        assert_eq!(a.subtract(&b), Err(CombineError::Underflow));
        assert_eq!(a.total_count(), 1);
    }

    #[test]
    fn shift_left_then_right_round_trips() {
        let mut h: Histogram<u64> = Histogram::new(1, 1 << 40, 3).unwrap();
        for v in [100u64, 5000, 200_000] {
            h.record(v).unwrap();
        }
        let before_total = h.total_count();
        let before_max = h.max();
        h.shift_values_left(4).unwrap();
        h.shift_values_right(4, false).unwrap();
        assert_eq!(h.total_count(), before_total);
        assert_eq!(h.max(), before_max);
    }

    #[test]
    fn shift_left_overflow_is_refused() {
        let mut h: Histogram<u64> = Histogram::new(1, 1000, 3).unwrap();
        h.record(900).unwrap();
        assert_eq!(h.shift_values_left(10), Err(ShiftError::Overflow));
    }

    #[test]
    fn record_with_expected_interval_backfills() {
        let mut h: Histogram<u64> = Histogram::new(1, 100_000, 3).unwrap();
        h.record_with_expected_interval(1000, 100).unwrap();
        assert_eq!(h.total_count(), 10);
    }
}
