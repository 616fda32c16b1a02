// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! An auto-ranging floating point histogram, built on top of the integer [`Histogram`] by
//! scaling values into a fixed-width integer range and sliding that range as needed.

use crate::geometry::sub_bucket_half_count_for;
use crate::histogram::Histogram;
use crate::{CreationError, RecordError};

/// The largest magnitude this crate will ever auto-range to: the largest power of two not
/// greater than `f64::MAX / 4` (`2^1021`), leaving headroom for `current_lowest_value_in_auto_range
/// * internal_highest_to_lowest_ratio` to stay finite for any ratio this crate can construct.
pub const HIGHEST_ALLOWED_EVER: f64 = f64::from_bits(2044u64 << 52);

/// A histogram of non-negative floating point values.
///
/// Internally, values are scaled into a `u64` integer histogram covering
/// `internal_highest_to_lowest_ratio` orders of magnitude; as out-of-range values are recorded,
/// the scaling window slides left or right (by powers of two, via [`Histogram::shift_values_left`]
/// /[`Histogram::shift_values_right`]) to keep covering them, down to [`HIGHEST_ALLOWED_EVER`].
pub struct DoubleHistogram {
    integer_values: Histogram<u64>,
    significant_figures: u8,
    /// The external dynamic-range bound this was constructed (or decoded) with. Kept around
    /// purely for round-tripping through the wire format; the internal geometry is derived from
    /// it but does not need it again after construction.
    highest_to_lowest_value_ratio: u64,
    internal_highest_to_lowest_ratio: u64,
    /// `subBucketHalfCount` for `significant_figures`: the inner histogram's lowest trackable
    /// integer, and the denominator of the integer<->double conversion ratio.
    lowest_tracking_int: u64,
    current_lowest_value_in_auto_range: f64,
    auto_resize: bool,
}

fn ulp(x: f64) -> f64 {
    if x == 0.0 {
        return f64::MIN_POSITIVE;
    }
    let bits = x.abs().to_bits();
    let next = f64::from_bits(bits + 1);
    next - x.abs()
}

/// `2^(ceil(log2(ratio)) + 1)`: the smallest power of two strictly greater than `ratio`.
fn internal_ratio_for(highest_to_lowest_value_ratio: u64) -> Result<u64, CreationError> {
    let rounded_up = highest_to_lowest_value_ratio
        .checked_next_power_of_two()
        .ok_or(CreationError::RatioTooLarge)?;
    rounded_up.checked_mul(2).ok_or(CreationError::RatioTooLarge)
}

impl DoubleHistogram {
    /// `highest_to_lowest_value_ratio` bounds the dynamic range this histogram can represent
    /// without auto-ranging; it must be at least 2.
    pub fn new(highest_to_lowest_value_ratio: u64, significant_figures: u8) -> Result<Self, CreationError> {
        if highest_to_lowest_value_ratio < 2 {
            return Err(CreationError::RatioTooSmall);
        }
        let internal_highest_to_lowest_ratio = internal_ratio_for(highest_to_lowest_value_ratio)?;
        let lowest_tracking_int = sub_bucket_half_count_for(significant_figures) as u64;
        let highest_trackable_int = lowest_tracking_int
            .checked_mul(internal_highest_to_lowest_ratio)
            .ok_or(CreationError::RatioTooLarge)?;

        let integer_values =
            Histogram::<u64>::new(lowest_tracking_int, highest_trackable_int, significant_figures)?;

        Ok(DoubleHistogram {
            integer_values,
            significant_figures,
            highest_to_lowest_value_ratio,
            internal_highest_to_lowest_ratio,
            lowest_tracking_int,
            current_lowest_value_in_auto_range: 1.0,
            auto_resize: true,
        })
    }

    /// Rebuilds a [`DoubleHistogram`] around an already-decoded integer histogram and a
    /// previously observed auto-range scale, for the wire decoder.
    pub(crate) fn from_parts(
        integer_values: Histogram<u64>,
        significant_figures: u8,
        highest_to_lowest_value_ratio: u64,
        current_lowest_value_in_auto_range: f64,
    ) -> Result<Self, CreationError> {
        if highest_to_lowest_value_ratio < 2 {
            return Err(CreationError::RatioTooSmall);
        }
        let internal_highest_to_lowest_ratio = internal_ratio_for(highest_to_lowest_value_ratio)?;
        let lowest_tracking_int = sub_bucket_half_count_for(significant_figures) as u64;
        Ok(DoubleHistogram {
            integer_values,
            significant_figures,
            highest_to_lowest_value_ratio,
            internal_highest_to_lowest_ratio,
            lowest_tracking_int,
            current_lowest_value_in_auto_range,
            auto_resize: true,
        })
    }

    pub fn record(&mut self, value: f64) -> Result<(), RecordError> {
        self.record_n(value, 1)
    }

    pub fn record_n(&mut self, value: f64, count: u64) -> Result<(), RecordError> {
        if value < 0.0 {
            return Err(RecordError::InvalidValue);
        }
        if value > 0.0 {
            self.auto_adjust_range_for(value)?;
        }
        let scaled = self.to_integer_value(value);
        self.integer_values.record_n(scaled, count)
    }

    /// `value * subBucketHalfCount / currentLowest`: the inverse of [`Self::to_double_value`].
    fn to_integer_value(&self, value: f64) -> u64 {
        (value * self.lowest_tracking_int as f64 / self.current_lowest_value_in_auto_range).round() as u64
    }

    /// `integerValue * currentLowest / subBucketHalfCount`, i.e. `integerValue *
    /// integerToDoubleValueConversionRatio`.
    fn to_double_value(&self, integer_value: u64) -> f64 {
        integer_value as f64 * self.current_lowest_value_in_auto_range / self.lowest_tracking_int as f64
    }

    /// Slides the internal scaling window left or right, by whole powers of two, until `value`
    /// falls within the representable range, bailing out at [`HIGHEST_ALLOWED_EVER`].
    fn auto_adjust_range_for(&mut self, value: f64) -> Result<(), RecordError> {
        if !self.auto_resize {
            return Ok(());
        }
        let highest_representable =
            self.current_lowest_value_in_auto_range * self.internal_highest_to_lowest_ratio as f64;

        if value >= self.current_lowest_value_in_auto_range && value < highest_representable {
            return Ok(());
        }

        if value >= highest_representable {
            while value >= self.current_lowest_value_in_auto_range * self.internal_highest_to_lowest_ratio as f64 {
                if self.current_lowest_value_in_auto_range * 2.0 > HIGHEST_ALLOWED_EVER {
                    return Err(RecordError::OutOfRange);
                }
                self.integer_values
                    .shift_values_right(1, false)
                    .map_err(|_| RecordError::OutOfRange)?;
                self.current_lowest_value_in_auto_range *= 2.0;
            }
        } else {
            while value < self.current_lowest_value_in_auto_range {
                let candidate = self.current_lowest_value_in_auto_range / 2.0;
                if candidate <= 0.0 || ulp(candidate) >= candidate {
                    return Err(RecordError::OutOfRange);
                }
                self.integer_values
                    .shift_values_left(1)
                    .map_err(|_| RecordError::OutOfRange)?;
                self.current_lowest_value_in_auto_range = candidate;
            }
        }
        Ok(())
    }

    pub fn total_count(&self) -> u64 {
        self.integer_values.total_count()
    }

    pub fn min(&self) -> f64 {
        self.to_double_value(self.integer_values.min())
    }

    pub fn max(&self) -> f64 {
        self.to_double_value(self.integer_values.max())
    }

    pub fn mean(&self) -> f64 {
        self.integer_values.mean() * self.current_lowest_value_in_auto_range / self.lowest_tracking_int as f64
    }

    pub fn std_deviation(&self) -> f64 {
        self.integer_values.std_deviation() * self.current_lowest_value_in_auto_range / self.lowest_tracking_int as f64
    }

    pub fn value_at_percentile(&self, percentile: f64) -> f64 {
        self.to_double_value(self.integer_values.value_at_percentile(percentile))
    }

    pub fn significant_figures(&self) -> u8 {
        self.significant_figures
    }

    pub fn highest_to_lowest_value_ratio(&self) -> u64 {
        self.highest_to_lowest_value_ratio
    }

    pub(crate) fn integer_histogram(&self) -> &Histogram<u64> {
        &self.integer_values
    }

    pub(crate) fn current_lowest_value_in_auto_range(&self) -> f64 {
        self.current_lowest_value_in_auto_range
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_values_across_a_wide_dynamic_range() {
        let mut h = DoubleHistogram::new(1_000_000, 3).unwrap();
        h.record(0.001).unwrap();
        h.record(1.0).unwrap();
        h.record(1000.0).unwrap();
        assert_eq!(h.total_count(), 3);
        assert!(h.min() <= 0.002);
        assert!(h.max() >= 900.0);
    }

    #[test]
    fn ratio_too_small_is_rejected() {
        assert_eq!(DoubleHistogram::new(1, 3).unwrap_err(), CreationError::RatioTooSmall);
    }

    #[test]
    fn mean_is_plausible_for_uniform_samples() {
        let mut h = DoubleHistogram::new(1_000, 3).unwrap();
        for v in 1..=100 {
            h.record(v as f64).unwrap();
        }
        assert!((h.mean() - 50.5).abs() < 3.0);
    }

    #[test]
    fn internal_ratio_is_a_power_of_two_strictly_above_external_ratio() {
        for ratio in [2u64, 3, 1_000_000_000, 1 << 40] {
            let internal = internal_ratio_for(ratio).unwrap();
            assert!(internal > ratio);
            assert_eq!(internal & (internal - 1), 0, "{internal} is not a power of two");
        }
    }

    #[test]
    fn highest_allowed_ever_is_a_power_of_two_below_max_over_four() {
        assert!(HIGHEST_ALLOWED_EVER <= f64::MAX / 4.0);
        let bits = HIGHEST_ALLOWED_EVER.to_bits();
        let mantissa = bits & ((1u64 << 52) - 1);
        assert_eq!(mantissa, 0, "HIGHEST_ALLOWED_EVER must be an exact power of two");
    }
}
