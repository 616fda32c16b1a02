// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Lazy iterators over a histogram's recorded distribution.
//!
//! Every iterator here borrows the histogram and walks its counts array once, left to right,
//! yielding an [`IterationValue`] each time it decides a step boundary has been crossed. None
//! of them allocate.

use crate::counts::Counter;
use crate::histogram::Histogram;

/// One step of an iteration over a histogram's distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationValue {
    /// The highest value covered by this step (inclusive).
    pub value_iterated_to: u64,
    /// The lowest value covered by this step (the prior step's `value_iterated_to + 1`).
    pub value_iterated_from: u64,
    /// The raw count stored at `value_iterated_to`'s counts-array cell.
    pub count_at_value_iterated_to: u64,
    /// The count newly covered since the previous step.
    pub count_added_in_this_step: u64,
    /// Cumulative count of all values at or below `value_iterated_to`.
    pub total_count_to_this_value: u64,
    /// Cumulative sum of (representative value * count) at or below `value_iterated_to`.
    pub total_value_to_this_value: u64,
    /// The percentile level this step represents (meaningful for [`PercentileIter`]; for the
    /// other iterators it is simply the percentile reached by `total_count_to_this_value`).
    pub percentile_level_iterated_to: f64,
}

/// Iterates only over counts-array cells with a non-zero count.
pub struct RecordedIter<'h, T: Counter> {
    histogram: &'h Histogram<T>,
    index: usize,
    total_count_to_index: u64,
    total_value_to_index: u64,
    previous_value_iterated_to: u64,
}

impl<'h, T: Counter> RecordedIter<'h, T> {
    pub(crate) fn new(histogram: &'h Histogram<T>) -> Self {
        RecordedIter {
            histogram,
            index: 0,
            total_count_to_index: 0,
            total_value_to_index: 0,
            previous_value_iterated_to: 0,
        }
    }
}

impl<'h, T: Counter> Iterator for RecordedIter<'h, T> {
    type Item = IterationValue;

    fn next(&mut self) -> Option<IterationValue> {
        let geometry = self.histogram.geometry();
        while self.index < self.histogram.counts_len() {
            let count = self.histogram.raw_count(self.index);
            if count == 0 {
                self.index += 1;
                continue;
            }
            let value_at_index = geometry.value_from_index(self.index);
            let value_iterated_to = geometry.highest_equivalent_value(value_at_index);
            let value_iterated_from = self.previous_value_iterated_to;
            self.total_count_to_index += count;
            self.total_value_to_index += count * geometry.median_equivalent_value(value_at_index);
            let result = IterationValue {
                value_iterated_to,
                value_iterated_from,
                count_at_value_iterated_to: count,
                count_added_in_this_step: count,
                total_count_to_this_value: self.total_count_to_index,
                total_value_to_this_value: self.total_value_to_index,
                percentile_level_iterated_to: 100.0 * self.total_count_to_index as f64
                    / self.histogram.total_count().max(1) as f64,
            };
            self.previous_value_iterated_to = value_iterated_to + 1;
            self.index += 1;
            return Some(result);
        }
        None
    }
}

/// Iterates over every counts-array cell, including zero-count ones.
pub struct AllValuesIter<'h, T: Counter> {
    histogram: &'h Histogram<T>,
    index: usize,
    total_count_to_index: u64,
    total_value_to_index: u64,
    previous_value_iterated_to: u64,
}

impl<'h, T: Counter> AllValuesIter<'h, T> {
    pub(crate) fn new(histogram: &'h Histogram<T>) -> Self {
        AllValuesIter {
            histogram,
            index: 0,
            total_count_to_index: 0,
            total_value_to_index: 0,
            previous_value_iterated_to: 0,
        }
    }
}

impl<'h, T: Counter> Iterator for AllValuesIter<'h, T> {
    type Item = IterationValue;

    fn next(&mut self) -> Option<IterationValue> {
        if self.index >= self.histogram.counts_len() {
            return None;
        }
        let geometry = self.histogram.geometry();
        let count = self.histogram.raw_count(self.index);
        let value_at_index = geometry.value_from_index(self.index);
        let value_iterated_to = geometry.highest_equivalent_value(value_at_index);
        let value_iterated_from = self.previous_value_iterated_to;
        self.total_count_to_index += count;
        self.total_value_to_index += count * geometry.median_equivalent_value(value_at_index);
        let result = IterationValue {
            value_iterated_to,
            value_iterated_from,
            count_at_value_iterated_to: count,
            count_added_in_this_step: count,
            total_count_to_this_value: self.total_count_to_index,
            total_value_to_this_value: self.total_value_to_index,
            percentile_level_iterated_to: 100.0 * self.total_count_to_index as f64
                / self.histogram.total_count().max(1) as f64,
        };
        self.previous_value_iterated_to = value_iterated_to + 1;
        self.index += 1;
        Some(result)
    }
}

/// Iterates over percentile levels with doubling density as the percentile approaches 100,
/// so the tail (where bounded relative error matters most) gets proportionally more points.
pub struct PercentileIter<'h, T: Counter> {
    histogram: &'h Histogram<T>,
    index: usize,
    total_count_to_index: u64,
    total_value_to_index: u64,
    previous_value_iterated_to: u64,
    ticks_per_half_distance: u32,
    percentile_to_iterate_to: f64,
    done: bool,
}

impl<'h, T: Counter> PercentileIter<'h, T> {
    pub(crate) fn new(histogram: &'h Histogram<T>, ticks_per_half_distance: u32) -> Self {
        PercentileIter {
            histogram,
            index: 0,
            total_count_to_index: 0,
            total_value_to_index: 0,
            previous_value_iterated_to: 0,
            ticks_per_half_distance: ticks_per_half_distance.max(1),
            percentile_to_iterate_to: 0.0,
            done: histogram.total_count() == 0,
        }
    }
}

impl<'h, T: Counter> Iterator for PercentileIter<'h, T> {
    type Item = IterationValue;

    fn next(&mut self) -> Option<IterationValue> {
        if self.done {
            return None;
        }
        let geometry = self.histogram.geometry();
        let total = self.histogram.total_count();
        loop {
            if self.index >= self.histogram.counts_len() {
                self.done = true;
                return None;
            }
            let count = self.histogram.raw_count(self.index);
            self.total_count_to_index += count;
            let value_at_index = geometry.value_from_index(self.index);
            self.total_value_to_index += count * geometry.median_equivalent_value(value_at_index);
            let current_percentile = 100.0 * self.total_count_to_index as f64 / total as f64;

            if current_percentile < self.percentile_to_iterate_to && self.total_count_to_index < total {
                self.index += 1;
                continue;
            }

            let value_iterated_to = geometry.highest_equivalent_value(value_at_index);
            let value_iterated_from = self.previous_value_iterated_to;
            let result = IterationValue {
                value_iterated_to,
                value_iterated_from,
                count_at_value_iterated_to: count,
                count_added_in_this_step: count,
                total_count_to_this_value: self.total_count_to_index,
                total_value_to_this_value: self.total_value_to_index,
                percentile_level_iterated_to: self.percentile_to_iterate_to,
            };
            self.previous_value_iterated_to = value_iterated_to + 1;

            if self.total_count_to_index >= total {
                self.done = true;
            } else {
                let remaining = 100.0 - self.percentile_to_iterate_to;
                let doublings = ((100.0 / remaining).ln() / 2f64.ln()) as i32 + 1;
                let percentile_reporting_ticks = self.ticks_per_half_distance as f64 * 2f64.powi(doublings);
                self.percentile_to_iterate_to += 100.0 / percentile_reporting_ticks;
            }
            self.index += 1;
            return Some(result);
        }
    }
}

/// Iterates over fixed-width linear buckets from 0 up to the highest recorded value.
pub struct LinearIter<'h, T: Counter> {
    histogram: &'h Histogram<T>,
    index: usize,
    total_count_to_index: u64,
    total_value_to_index: u64,
    previous_value_iterated_to: u64,
    value_units_per_bucket: u64,
    current_step_highest_value_reporting_level: u64,
    done: bool,
}

impl<'h, T: Counter> LinearIter<'h, T> {
    pub(crate) fn new(histogram: &'h Histogram<T>, value_units_per_bucket: u64) -> Self {
        let width = value_units_per_bucket.max(1);
        LinearIter {
            histogram,
            index: 0,
            total_count_to_index: 0,
            total_value_to_index: 0,
            previous_value_iterated_to: 0,
            value_units_per_bucket: width,
            current_step_highest_value_reporting_level: width - 1,
            done: false,
        }
    }
}

impl<'h, T: Counter> Iterator for LinearIter<'h, T> {
    type Item = IterationValue;

    fn next(&mut self) -> Option<IterationValue> {
        if self.done {
            return None;
        }
        let geometry = self.histogram.geometry();
        let len = self.histogram.counts_len();
        let mut count_in_step = 0u64;
        loop {
            if self.index < len {
                let value_at_index = geometry.value_from_index(self.index);
                if geometry.lowest_equivalent_value(value_at_index) <= self.current_step_highest_value_reporting_level
                {
                    let count = self.histogram.raw_count(self.index);
                    count_in_step += count;
                    self.total_count_to_index += count;
                    self.total_value_to_index += count * geometry.median_equivalent_value(value_at_index);
                    self.index += 1;
                    continue;
                }
            }
            let value_iterated_to = self.current_step_highest_value_reporting_level;
            let value_iterated_from = self.previous_value_iterated_to;
            let result = IterationValue {
                value_iterated_to,
                value_iterated_from,
                count_at_value_iterated_to: count_in_step,
                count_added_in_this_step: count_in_step,
                total_count_to_this_value: self.total_count_to_index,
                total_value_to_this_value: self.total_value_to_index,
                percentile_level_iterated_to: 100.0 * self.total_count_to_index as f64
                    / self.histogram.total_count().max(1) as f64,
            };
            self.previous_value_iterated_to = value_iterated_to + 1;
            self.current_step_highest_value_reporting_level += self.value_units_per_bucket;
            if self.index >= len {
                self.done = true;
            }
            return Some(result);
        }
    }
}

/// Iterates over geometrically growing buckets: the first bucket spans
/// `[0, value_units_first_bucket)`, and each subsequent bucket's width is `log_base` times the
/// previous one's.
pub struct LogarithmicIter<'h, T: Counter> {
    histogram: &'h Histogram<T>,
    index: usize,
    total_count_to_index: u64,
    total_value_to_index: u64,
    previous_value_iterated_to: u64,
    log_base: f64,
    current_step_highest_value_reporting_level: u64,
    done: bool,
}

impl<'h, T: Counter> LogarithmicIter<'h, T> {
    pub(crate) fn new(histogram: &'h Histogram<T>, value_units_first_bucket: u64, log_base: f64) -> Self {
        let first = value_units_first_bucket.max(1);
        LogarithmicIter {
            histogram,
            index: 0,
            total_count_to_index: 0,
            total_value_to_index: 0,
            previous_value_iterated_to: 0,
            log_base: if log_base > 1.0 { log_base } else { 2.0 },
            current_step_highest_value_reporting_level: first - 1,
            done: false,
        }
    }

    fn advance_boundary(&mut self) {
        let base = self.current_step_highest_value_reporting_level + 1;
        let next_base = ((base as f64) * self.log_base).ceil() as u64;
        let next_base = next_base.max(base + 1);
        self.current_step_highest_value_reporting_level = next_base - 1;
    }
}

impl<'h, T: Counter> Iterator for LogarithmicIter<'h, T> {
    type Item = IterationValue;

    fn next(&mut self) -> Option<IterationValue> {
        if self.done {
            return None;
        }
        let geometry = self.histogram.geometry();
        let len = self.histogram.counts_len();
        let mut count_in_step = 0u64;
        loop {
            if self.index < len {
                let value_at_index = geometry.value_from_index(self.index);
                if geometry.lowest_equivalent_value(value_at_index) <= self.current_step_highest_value_reporting_level
                {
                    let count = self.histogram.raw_count(self.index);
                    count_in_step += count;
                    self.total_count_to_index += count;
                    self.total_value_to_index += count * geometry.median_equivalent_value(value_at_index);
                    self.index += 1;
                    continue;
                }
            }
            let value_iterated_to = self.current_step_highest_value_reporting_level;
            let value_iterated_from = self.previous_value_iterated_to;
            let result = IterationValue {
                value_iterated_to,
                value_iterated_from,
                count_at_value_iterated_to: count_in_step,
                count_added_in_this_step: count_in_step,
                total_count_to_this_value: self.total_count_to_index,
                total_value_to_this_value: self.total_value_to_index,
                percentile_level_iterated_to: 100.0 * self.total_count_to_index as f64
                    / self.histogram.total_count().max(1) as f64,
            };
            self.previous_value_iterated_to = value_iterated_to + 1;
            self.advance_boundary();
            if self.index >= len {
                self.done = true;
            }
            return Some(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Histogram;

    fn sample() -> Histogram<u64> {
        let mut h = Histogram::new(1, 100_000, 3).unwrap();
        for v in [10u64, 20, 20, 30, 1000] {
            h.record(v).unwrap();
        }
        h
    }

    #[test]
    fn recorded_iter_only_visits_nonzero_cells() {
        let h = sample();
        let steps: Vec<_> = h.recorded_values().collect();
        assert_eq!(steps.len(), 4);
        let total: u64 = steps.iter().map(|s| s.count_added_in_this_step).sum();
        assert_eq!(total, 5);
        assert!(steps.windows(2).all(|w| w[0].value_iterated_to < w[1].value_iterated_to));
    }

    #[test]
    fn all_values_iter_covers_every_cell() {
        let h = sample();
        let count = h.all_values().count();
        assert_eq!(count, h.counts_len());
    }

    #[test]
    fn percentile_iter_reaches_100() {
        let h = sample();
        let steps: Vec<_> = h.percentiles(5).collect();
        assert!(!steps.is_empty());
        assert_eq!(steps.last().unwrap().total_count_to_this_value, h.total_count());
    }

    #[test]
    fn linear_iter_covers_full_range() {
        let h = sample();
        let steps: Vec<_> = h.linear_buckets(100).collect();
        let total: u64 = steps.iter().map(|s| s.count_added_in_this_step).sum();
        assert_eq!(total, h.total_count());
    }

    #[test]
    fn logarithmic_iter_covers_full_range() {
        let h = sample();
        let steps: Vec<_> = h.logarithmic_buckets(10, 2.0).collect();
        let total: u64 = steps.iter().map(|s| s.count_added_in_this_step).sum();
        assert_eq!(total, h.total_count());
    }
}
