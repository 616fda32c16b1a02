// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Wire encoding and decoding.
//!
//! The plain format is a cookie followed by a fixed-width, big-endian body (payload length,
//! normalizing index offset, significant digits, lowest/highest trackable values, and an
//! integer-to-double conversion ratio) and then one counts-array cell per logical index, each
//! `wordSizeInBytes` wide. The compressed variant's on-wire header is just `{cookie,
//! deflatedByteLength}`; everything from the payload length field onward -- the rest of the
//! plain body, plus the cells -- is deflated as a single blob with [`flate2`].
//!
//! A legacy 32-byte "V0" header (cookie, payload length, significant digits, lowest/highest,
//! with no normalizing offset or conversion ratio) is also accepted when decoding, though this
//! crate never produces one.
//!
//! [`DoubleHistogram`] values get their own cookie family and wrap an embedded integer encoding.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::counts::Counter;
use crate::double_histogram::DoubleHistogram;
use crate::geometry::Geometry;
use crate::histogram::Histogram;
use crate::DecodeError;

const ENCODING_COOKIE_BASE: u32 = 0x1c84_9301;
const COMPRESSED_ENCODING_COOKIE_BASE: u32 = 0x1c84_9302;
const ENCODING_COOKIE_V0: u32 = 0x1c84_9308;
const COMPRESSED_ENCODING_COOKIE_V0: u32 = 0x1c84_9309;

/// Bits `4..8` of the V1 cookie's low byte, carrying `wordSizeInBytes`.
const WORD_SIZE_MASK: u32 = 0x0000_00f0;

/// `cookie(4) + relevantPayloadLength(4) + normalizingIndexOffset(4) + significantDigits(4)
/// + lowestDiscernible(8) + highestTrackable(8) + conversionRatio(8)`.
const HEADER_LEN_V1: usize = 40;
const BODY_LEN_V1: usize = HEADER_LEN_V1 - 4;

/// `cookie(4) + relevantPayloadLength(4) + reserved(4) + significantDigits(4)
/// + lowestDiscernible(8) + highestTrackable(8)`. The reserved field stands in for the
/// normalizing index offset this legacy format predates; it is always zero.
const HEADER_LEN_V0: usize = 32;
const BODY_LEN_V0: usize = HEADER_LEN_V0 - 4;

const DOUBLE_COOKIE_PLAIN: u32 = 0x0c72_124c;
const DOUBLE_COOKIE_COMPRESSED: u32 = 0x0c72_124d;
const DOUBLE_COOKIE_PLAIN_V0: u32 = 0x0c72_144c;
const DOUBLE_COOKIE_COMPRESSED_V0: u32 = 0x0c72_144d;

fn word_size_bytes<T: Counter>() -> u32 {
    match T::MAX {
        n if n == u16::MAX as u64 => 2,
        n if n == u32::MAX as u64 => 4,
        _ => 8,
    }
}

fn cookie_for<T: Counter>(compressed: bool) -> u32 {
    let base = if compressed { COMPRESSED_ENCODING_COOKIE_BASE } else { ENCODING_COOKIE_BASE };
    base | (word_size_bytes::<T>() << 4)
}

fn write_cell(buf: &mut Vec<u8>, value: u64, word_size: usize) {
    let bytes = value.to_be_bytes();
    buf.extend_from_slice(&bytes[8 - word_size..]);
}

fn read_cell(bytes: &[u8], word_size: usize) -> u64 {
    let mut padded = [0u8; 8];
    padded[8 - word_size..].copy_from_slice(bytes);
    u64::from_be_bytes(padded)
}

/// Everything that goes on the wire after the cookie, for a plain integer histogram: payload
/// length, normalizing offset, significant digits, lowest/highest, conversion ratio, then cells.
fn build_body<T: Counter>(histogram: &Histogram<T>) -> Vec<u8> {
    let geometry = histogram.geometry();
    let word_size = word_size_bytes::<T>() as usize;
    let relevant_payload_length = (histogram.counts_len() * word_size) as u32;

    let mut buf = Vec::with_capacity(BODY_LEN_V1 + relevant_payload_length as usize);
    buf.extend_from_slice(&relevant_payload_length.to_be_bytes());
    buf.extend_from_slice(&0u32.to_be_bytes()); // this crate's Histogram<T> never rotates its counts array
    buf.extend_from_slice(&(geometry.significant_figures() as u32).to_be_bytes());
    buf.extend_from_slice(&geometry.lowest_discernible_value().to_be_bytes());
    buf.extend_from_slice(&geometry.highest_trackable_value().to_be_bytes());
    buf.extend_from_slice(&1.0f64.to_be_bytes()); // an integer histogram converts 1:1
    for index in 0..histogram.counts_len() {
        write_cell(&mut buf, histogram.raw_count(index), word_size);
    }
    buf
}

/// Encodes `histogram` into the uncompressed wire format.
pub fn encode<T: Counter>(histogram: &Histogram<T>) -> Vec<u8> {
    let cookie = cookie_for::<T>(false);
    let body = build_body(histogram);
    let mut buf = Vec::with_capacity(4 + body.len());
    buf.extend_from_slice(&cookie.to_be_bytes());
    buf.extend_from_slice(&body);
    buf
}

/// Encodes `histogram` into the deflate-compressed wire format: `{cookie, deflatedByteLength}`
/// followed by the deflated plain body (everything the plain format writes after its cookie).
pub fn encode_compressed<T: Counter>(histogram: &Histogram<T>) -> std::io::Result<Vec<u8>> {
    let cookie = cookie_for::<T>(true);
    let body = build_body(histogram);

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&body)?;
    let compressed = encoder.finish()?;

    let mut buf = Vec::with_capacity(8 + compressed.len());
    buf.extend_from_slice(&cookie.to_be_bytes());
    buf.extend_from_slice(&(compressed.len() as u32).to_be_bytes());
    buf.extend_from_slice(&compressed);
    Ok(buf)
}

struct BodyHeader {
    relevant_payload_length: u32,
    significant_figures: u8,
    lowest_discernible_value: u64,
    highest_trackable_value: u64,
    cells_offset: usize,
}

fn parse_body_v1(body: &[u8]) -> Result<BodyHeader, DecodeError> {
    if body.len() < BODY_LEN_V1 {
        return Err(DecodeError::TruncatedHeader);
    }
    let relevant_payload_length = u32::from_be_bytes(body[0..4].try_into().unwrap());
    // body[4..8] is the normalizing index offset; this crate's non-atomic Histogram<T> never
    // rotates its counts array, so a decoded offset is accepted but never applied.
    let significant_figures = u32::from_be_bytes(body[8..12].try_into().unwrap()) as u8;
    let lowest_discernible_value = u64::from_be_bytes(body[12..20].try_into().unwrap());
    let highest_trackable_value = u64::from_be_bytes(body[20..28].try_into().unwrap());
    // body[28..36] is the conversion ratio; unused when decoding into an integer Histogram<T>.
    Ok(BodyHeader {
        relevant_payload_length,
        significant_figures,
        lowest_discernible_value,
        highest_trackable_value,
        cells_offset: BODY_LEN_V1,
    })
}

fn parse_body_v0(body: &[u8]) -> Result<BodyHeader, DecodeError> {
    if body.len() < BODY_LEN_V0 {
        return Err(DecodeError::TruncatedHeader);
    }
    let relevant_payload_length = u32::from_be_bytes(body[0..4].try_into().unwrap());
    // body[4..8] reserved.
    let significant_figures = u32::from_be_bytes(body[8..12].try_into().unwrap()) as u8;
    let lowest_discernible_value = u64::from_be_bytes(body[12..20].try_into().unwrap());
    let highest_trackable_value = u64::from_be_bytes(body[20..28].try_into().unwrap());
    Ok(BodyHeader {
        relevant_payload_length,
        significant_figures,
        lowest_discernible_value,
        highest_trackable_value,
        cells_offset: BODY_LEN_V0,
    })
}

enum CookieKind {
    V1 { compressed: bool, word_size: u32 },
    V0 { compressed: bool },
}

fn classify_cookie(cookie: u32) -> Result<CookieKind, DecodeError> {
    match cookie {
        ENCODING_COOKIE_V0 => Ok(CookieKind::V0 { compressed: false }),
        COMPRESSED_ENCODING_COOKIE_V0 => Ok(CookieKind::V0 { compressed: true }),
        other => {
            let word_size = (other & WORD_SIZE_MASK) >> 4;
            let masked = other & !WORD_SIZE_MASK;
            if masked == ENCODING_COOKIE_BASE {
                Ok(CookieKind::V1 { compressed: false, word_size })
            } else if masked == COMPRESSED_ENCODING_COOKIE_BASE {
                Ok(CookieKind::V1 { compressed: true, word_size })
            } else {
                Err(DecodeError::UnknownCookie(other))
            }
        }
    }
}

/// Decodes a histogram from any accepted wire variant (V1 plain/compressed, or legacy V0
/// plain/compressed), validating that `T`'s width agrees with the cookie's word size.
pub fn decode<T: Counter>(bytes: &[u8]) -> Result<Histogram<T>, DecodeError> {
    if bytes.len() < 4 {
        return Err(DecodeError::TruncatedHeader);
    }
    let cookie = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
    let kind = classify_cookie(cookie)?;

    let (compressed, is_v0, word_size) = match kind {
        CookieKind::V1 { compressed, word_size } => (compressed, false, word_size),
        // Legacy V0 predates per-width cookies; it was only ever used with 64-bit counters.
        CookieKind::V0 { compressed } => (compressed, true, 8),
    };
    if word_size != word_size_bytes::<T>() {
        return Err(DecodeError::WordSizeMismatch);
    }

    let body: Vec<u8> = if compressed {
        if bytes.len() < 8 {
            return Err(DecodeError::TruncatedHeader);
        }
        let mut decoder = ZlibDecoder::new(&bytes[8..]);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).map_err(|e| DecodeError::Inflate(e.to_string()))?;
        out
    } else {
        bytes[4..].to_vec()
    };

    let header = if is_v0 { parse_body_v0(&body)? } else { parse_body_v1(&body)? };
    let geometry = Geometry::new(
        header.lowest_discernible_value,
        header.highest_trackable_value,
        header.significant_figures,
    )?;
    let mut histogram = Histogram::<T>::from_geometry(geometry, false);

    let word_size = word_size as usize;
    let relevant_cells = (header.relevant_payload_length as usize / word_size).min(histogram.counts_len());
    if body.len() < header.cells_offset + relevant_cells * word_size {
        return Err(DecodeError::TruncatedPayload);
    }
    for index in 0..relevant_cells {
        let start = header.cells_offset + index * word_size;
        let value = read_cell(&body[start..start + word_size], word_size);
        if value != 0 {
            histogram.counts.set(index, value);
        }
    }
    histogram.reestablish_total_count();
    establish_internal_tracking_values(&mut histogram);

    Ok(histogram)
}

/// Rebuilds `max_value`/`min_non_zero_value` from the counts array, for histograms whose cells
/// were populated directly (decode, or a recovered snapshot) rather than through `record`.
fn establish_internal_tracking_values<T: Counter>(histogram: &mut Histogram<T>) {
    let geometry = *histogram.geometry();
    let mut max_value = 0u64;
    let mut min_non_zero_value = u64::MAX;
    for index in 0..histogram.counts_len() {
        if histogram.raw_count(index) == 0 {
            continue;
        }
        let value = geometry.value_from_index(index);
        if value > max_value {
            max_value = value;
        }
        if value != 0 && value < min_non_zero_value {
            min_non_zero_value = value;
        }
    }
    histogram.max_value = max_value;
    histogram.min_non_zero_value = min_non_zero_value;
}

/// Encodes `histogram` as `{double cookie, significantDigits, highestToLowestValueRatio,
/// embedded integer histogram, currentLowestValueInAutoRange}`.
///
/// The trailing scale factor is an extension beyond the documented layout: without it a decoded
/// [`DoubleHistogram`] would have no way to recover which auto-range window its embedded integer
/// values were scaled into, silently corrupting every decoded value.
pub fn encode_double(histogram: &DoubleHistogram, compressed: bool) -> std::io::Result<Vec<u8>> {
    let cookie = if compressed { DOUBLE_COOKIE_COMPRESSED } else { DOUBLE_COOKIE_PLAIN };
    let mut buf = Vec::new();
    buf.extend_from_slice(&cookie.to_be_bytes());
    buf.extend_from_slice(&(histogram.significant_figures() as u32).to_be_bytes());
    buf.extend_from_slice(&histogram.highest_to_lowest_value_ratio().to_be_bytes());

    let embedded = if compressed {
        encode_compressed(histogram.integer_histogram())?
    } else {
        encode(histogram.integer_histogram())
    };
    buf.extend_from_slice(&embedded);
    buf.extend_from_slice(&histogram.current_lowest_value_in_auto_range().to_be_bytes());
    Ok(buf)
}

/// Decodes a [`DoubleHistogram`] produced by [`encode_double`], or a legacy V0 double buffer
/// wrapping a V0 integer encoding.
pub fn decode_double(bytes: &[u8]) -> Result<DoubleHistogram, DecodeError> {
    if bytes.len() < 16 {
        return Err(DecodeError::TruncatedHeader);
    }
    let cookie = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
    match cookie {
        DOUBLE_COOKIE_PLAIN | DOUBLE_COOKIE_COMPRESSED | DOUBLE_COOKIE_PLAIN_V0 | DOUBLE_COOKIE_COMPRESSED_V0 => {}
        other => return Err(DecodeError::UnknownCookie(other)),
    }
    let significant_figures = u32::from_be_bytes(bytes[4..8].try_into().unwrap()) as u8;
    let highest_to_lowest_value_ratio = u64::from_be_bytes(bytes[8..16].try_into().unwrap());

    let rest = &bytes[16..];
    if rest.len() < 8 {
        return Err(DecodeError::TruncatedPayload);
    }
    let scale_offset = rest.len() - 8;
    let embedded = &rest[..scale_offset];
    let current_lowest_value_in_auto_range = f64::from_be_bytes(rest[scale_offset..].try_into().unwrap());

    let integer_values: Histogram<u64> = decode(embedded)?;
    DoubleHistogram::from_parts(
        integer_values,
        significant_figures,
        highest_to_lowest_value_ratio,
        current_lowest_value_in_auto_range,
    )
    .map_err(DecodeError::InvalidGeometry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_round_trip_preserves_distribution() {
        let mut h: Histogram<u64> = Histogram::new(1, 100_000, 3).unwrap();
        for v in [1u64, 100, 1000, 99_999] {
            h.record(v).unwrap();
        }
        let bytes = encode(&h);
        let decoded: Histogram<u64> = decode(&bytes).unwrap();
        assert_eq!(decoded.total_count(), h.total_count());
        assert_eq!(decoded.min(), h.min());
        assert_eq!(decoded.max(), h.max());
    }

    #[test]
    fn compressed_round_trip_preserves_distribution() {
        let mut h: Histogram<u64> = Histogram::new(1, 100_000, 3).unwrap();
        for v in 1..=500u64 {
            h.record(v * 17).unwrap();
        }
        let bytes = encode_compressed(&h).unwrap();
        let decoded: Histogram<u64> = decode(&bytes).unwrap();
        assert_eq!(decoded.total_count(), h.total_count());
    }

    #[test]
    fn narrow_counter_round_trip_uses_its_own_cell_width() {
        let mut h: Histogram<u16> = Histogram::new(1, 1000, 3).unwrap();
        h.record(5).unwrap();
        h.record(500).unwrap();
        let bytes = encode(&h);
        // cookie low byte: variant nibble 1 (plain), word-size nibble 2.
        assert_eq!(bytes[3], 0x21);
        let decoded: Histogram<u16> = decode(&bytes).unwrap();
        assert_eq!(decoded.total_count(), 2);
    }

    #[test]
    fn legacy_v0_header_is_accepted() {
        let mut h: Histogram<u64> = Histogram::new(1, 100_000, 3).unwrap();
        h.record(42).unwrap();
        h.record(4200).unwrap();

        let geometry = h.geometry();
        let word_size = 8usize;
        let relevant_payload_length = (h.counts_len() * word_size) as u32;

        let mut buf = Vec::new();
        buf.extend_from_slice(&ENCODING_COOKIE_V0.to_be_bytes());
        buf.extend_from_slice(&relevant_payload_length.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&(geometry.significant_figures() as u32).to_be_bytes());
        buf.extend_from_slice(&geometry.lowest_discernible_value().to_be_bytes());
        buf.extend_from_slice(&geometry.highest_trackable_value().to_be_bytes());
        for index in 0..h.counts_len() {
            buf.extend_from_slice(&h.raw_count(index).to_be_bytes());
        }
        assert_eq!(buf.len(), HEADER_LEN_V0 + relevant_payload_length as usize);

        let decoded: Histogram<u64> = decode(&buf).unwrap();
        assert_eq!(decoded.total_count(), 2);
        assert_eq!(decoded.max(), h.max());
    }

    #[test]
    fn unknown_cookie_is_rejected() {
        let bytes = vec![0u8; HEADER_LEN_V1];
        assert!(matches!(decode::<u64>(&bytes), Err(DecodeError::UnknownCookie(0))));
    }

    #[test]
    fn word_size_mismatch_is_rejected() {
        let mut h: Histogram<u32> = Histogram::new(1, 1000, 3).unwrap();
        h.record(5).unwrap();
        let bytes = encode(&h);
        assert!(matches!(decode::<u64>(&bytes), Err(DecodeError::WordSizeMismatch)));
    }

    #[test]
    fn double_plain_round_trip_preserves_values() {
        let mut h = DoubleHistogram::new(1_000_000, 3).unwrap();
        h.record(0.5).unwrap();
        h.record(100.0).unwrap();
        h.record(1.0).unwrap();

        let bytes = encode_double(&h, false).unwrap();
        let decoded = decode_double(&bytes).unwrap();
        assert_eq!(decoded.total_count(), h.total_count());
        assert!((decoded.mean() - h.mean()).abs() < 1e-6);
    }

    #[test]
    fn double_compressed_round_trip_preserves_values() {
        let mut h = DoubleHistogram::new(1_000_000, 3).unwrap();
        for v in 1..=200 {
            h.record(v as f64 * 0.25).unwrap();
        }

        let bytes = encode_double(&h, true).unwrap();
        let decoded = decode_double(&bytes).unwrap();
        assert_eq!(decoded.total_count(), h.total_count());
    }
}
