// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use thiserror::Error;

/// Errors that can occur while constructing a histogram or recorder.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationError {
    #[error("significant figures must be in the range 0..=5")]
    /// The requested precision is outside of the supported range.
    InvalidSignificantFigures,
    #[error("highest trackable value must be at least twice the lowest discernible value")]
    /// `highest_trackable_value` was smaller than `2 * lowest_discernible_value`.
    HighestTrackableValueTooSmall,
    #[error("lowest discernible value must be at least 1")]
    /// `lowest_discernible_value` was zero.
    LowestDiscernibleValueTooSmall,
    #[error("the requested precision cannot be represented at this lowest discernible value")]
    /// The combination of `lowest_discernible_value` and `significant_figures` does not leave
    /// enough bits to address a value of `u64::MAX`.
    CannotRepresentSigFigBeyondLow,
    #[error("highest to lowest value ratio must be at least 2")]
    /// A [`crate::DoubleHistogram`] was constructed with too small a dynamic range.
    RatioTooSmall,
    #[error("highest to lowest value ratio is too large to represent at this precision")]
    /// `ratio * 10^significant_figures` would not fit in the internal geometry.
    RatioTooLarge,
}

/// Errors that can occur while recording a value into a histogram.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordError {
    #[error("value is negative and cannot be recorded")]
    /// A negative value was passed to a recording call.
    InvalidValue,
    #[error("value is outside of the histogram's trackable range")]
    /// The value mapped to an index beyond the counts array and auto-resize is disabled.
    OutOfRange,
}

/// Errors that can occur while shifting the values stored in a histogram.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftError {
    #[error("shifting left by this amount would discard non-zero counts")]
    /// Values in the top of the counts array would be pushed past the end of the array.
    Overflow,
    #[error("shifting right by this amount would lose precision on recorded values")]
    /// Underflow protection refused a right shift that would merge distinguishable values.
    Underflow,
}

/// Errors that can occur when combining two histograms.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineError {
    #[error("subtracting would produce a negative count")]
    /// `subtract` would drive a cell below zero.
    Underflow,
}

/// Errors that can occur while decoding a histogram from its wire format.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer too short to contain a valid header")]
    /// Fewer bytes were supplied than the format's fixed header requires.
    TruncatedHeader,
    #[error("buffer too short to contain the encoded counts")]
    /// The header declared more payload than the buffer actually holds.
    TruncatedPayload,
    #[error("unrecognized cookie: {0:#x}")]
    /// The leading 4 bytes did not match any known cookie value.
    UnknownCookie(u32),
    #[error("word size encoded in cookie does not match the requested counter width")]
    /// The cookie's word-size nibble disagreed with the counter type being decoded into.
    WordSizeMismatch,
    #[error("decompression failed: {0}")]
    /// The deflate stream could not be inflated.
    Inflate(String),
    #[error(transparent)]
    /// The decoded geometry was not constructible.
    InvalidGeometry(#[from] CreationError),
}

/// Errors returned by [`crate::Recorder::get_interval_histogram`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderError {
    #[error("the recycled histogram was not obtained from this recorder")]
    /// The histogram passed in for recycling was not produced by a prior snapshot of this
    /// same recorder; a fresh buffer was allocated in its place.
    RecycleMismatch,
}
