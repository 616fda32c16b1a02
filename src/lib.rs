// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! HDR (High Dynamic Range) histograms: bucketed value storage that bounds relative error to a
//! configurable number of significant decimal figures, regardless of how large the recorded
//! values get.
//!
//! - [`Histogram`] is the single-threaded integer histogram.
//! - [`ConcurrentHistogram`] can be recorded into from many threads at once.
//! - [`Recorder`] wraps a pair of concurrent histograms so a reader can take consistent
//!   snapshots without ever blocking a writer for more than an uncontended lock acquisition.
//! - [`DoubleHistogram`] auto-ranges over floating point values by scaling into an internal
//!   integer histogram and sliding that scale as needed.
//! - [`serialization`] encodes and decodes histograms to a compact, portable wire format.

mod concurrent;
mod counts;
mod double_histogram;
mod error;
mod geometry;
mod histogram;
mod iterators;
mod phaser;
mod recorder;
pub mod serialization;

pub use concurrent::ConcurrentHistogram;
pub use counts::Counter;
pub use double_histogram::{DoubleHistogram, HIGHEST_ALLOWED_EVER};
pub use error::{CombineError, CreationError, DecodeError, RecordError, RecorderError, ShiftError};
pub use geometry::Geometry;
pub use histogram::{Builder, Histogram};
pub use iterators::{AllValuesIter, IterationValue, LinearIter, LogarithmicIter, PercentileIter, RecordedIter};
pub use phaser::{Phaser, WriterToken};
pub use recorder::Recorder;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build() {
        let mut h: Histogram<u16> = Histogram::new(1, 255, 3).unwrap();
        h.record(100).unwrap();
        assert_eq!(h.total_count(), 1);
    }
}
