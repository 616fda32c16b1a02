// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Double-buffered recording: a `Recorder` lets one set of threads record values while another
//! thread takes a consistent point-in-time snapshot, with neither side blocking the other for
//! more than the duration of the swap itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::concurrent::ConcurrentHistogram;
use crate::phaser::Phaser;
use crate::{CreationError, Histogram, RecordError, RecorderError};

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

fn next_instance_id() -> u64 {
    NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed)
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A recording endpoint that hands out point-in-time snapshots via [`Recorder::get_interval_histogram`].
///
/// Internally this holds two [`ConcurrentHistogram`]s, `active` and `inactive`. Writers always
/// record into whichever is currently active; taking a snapshot resets `inactive`, swaps it
/// into the active slot, and returns the histogram that was active until the swap (now holding
/// a complete and immutable record of everything recorded during that interval).
pub struct Recorder {
    instance_id: u64,
    active: RwLock<ConcurrentHistogram>,
    inactive: Mutex<ConcurrentHistogram>,
    phaser: Phaser,
    snapshot_mutex: Mutex<()>,
}

impl Recorder {
    pub fn new(
        lowest_discernible_value: u64,
        highest_trackable_value: u64,
        significant_figures: u8,
    ) -> Result<Self, CreationError> {
        Self::with_auto_resize(lowest_discernible_value, highest_trackable_value, significant_figures, false)
    }

    pub fn with_auto_resize(
        lowest_discernible_value: u64,
        highest_trackable_value: u64,
        significant_figures: u8,
        auto_resize: bool,
    ) -> Result<Self, CreationError> {
        let active = ConcurrentHistogram::new(
            lowest_discernible_value,
            highest_trackable_value,
            significant_figures,
            auto_resize,
        )?;
        let inactive = ConcurrentHistogram::new(
            lowest_discernible_value,
            highest_trackable_value,
            significant_figures,
            auto_resize,
        )?;
        Ok(Recorder {
            instance_id: next_instance_id(),
            active: RwLock::new(active),
            inactive: Mutex::new(inactive),
            phaser: Phaser::new(),
            snapshot_mutex: Mutex::new(()),
        })
    }

    pub fn record_value(&self, value: u64) -> Result<(), RecordError> {
        self.record_value_with_count(value, 1)
    }

    pub fn record_value_with_count(&self, value: u64, count: u64) -> Result<(), RecordError> {
        let token = self.phaser.writer_enter();
        let result = self.active.read().unwrap().record_n(value, count);
        self.phaser.writer_exit(token);
        result
    }

    pub fn record_value_with_expected_interval(
        &self,
        value: u64,
        expected_interval: u64,
    ) -> Result<(), RecordError> {
        let token = self.phaser.writer_enter();
        let result = self
            .active
            .read()
            .unwrap()
            .record_with_expected_interval(value, expected_interval);
        self.phaser.writer_exit(token);
        result
    }

    /// Takes a snapshot of everything recorded since the previous snapshot (or since
    /// construction), resetting the active buffer for the next interval.
    ///
    /// `recycled` lets a caller hand back a histogram obtained from a prior call to this same
    /// recorder so its instance tag can be validated; this implementation never needs to reuse
    /// the recycled buffer's storage (the recorder's own spare buffer is always reused
    /// internally), so a validated `recycled` value is simply dropped. An invalid one fails the
    /// call without taking a snapshot.
    pub fn get_interval_histogram(
        &self,
        recycled: Option<Histogram<u64>>,
    ) -> Result<Histogram<u64>, RecorderError> {
        if let Some(ref histogram) = recycled {
            if histogram.recorder_tag() != Some(self.instance_id) {
                return Err(RecorderError::RecycleMismatch);
            }
        }

        let _snapshot_guard = self.snapshot_mutex.lock().unwrap();
        let mut inactive_guard = self.inactive.lock().unwrap();
        inactive_guard.reset();

        let _reader_guard = self.phaser.reader_lock();
        let now = now_millis();
        {
            let mut active_guard = self.active.write().unwrap();
            std::mem::swap(&mut *active_guard, &mut *inactive_guard);
            active_guard.set_start_timestamp(now);
        }
        inactive_guard.set_end_timestamp(now);
        self.phaser.flip_phase(Duration::from_micros(500));

        Ok(inactive_guard.to_histogram(Some(self.instance_id)))
    }

    /// Equivalent to taking and discarding two consecutive snapshots, which clears both the
    /// active and inactive buffers.
    pub fn reset(&self) {
        let _ = self.get_interval_histogram(None);
        let _ = self.get_interval_histogram(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn snapshot_reflects_interval_and_resets() {
        let recorder = Recorder::new(1, 1_000_000, 3).unwrap();
        recorder.record_value(10).unwrap();
        recorder.record_value(20).unwrap();
        let snapshot = recorder.get_interval_histogram(None).unwrap();
        assert_eq!(snapshot.total_count(), 2);

        recorder.record_value(30).unwrap();
        let next = recorder.get_interval_histogram(None).unwrap();
        assert_eq!(next.total_count(), 1);
        assert_eq!(next.min(), 30);
    }

    #[test]
    fn recycle_mismatch_is_rejected() {
        let a = Recorder::new(1, 1_000_000, 3).unwrap();
        let b = Recorder::new(1, 1_000_000, 3).unwrap();
        let snap_from_b = b.get_interval_histogram(None).unwrap();
        assert!(matches!(
            a.get_interval_histogram(Some(snap_from_b)),
            Err(RecorderError::RecycleMismatch)
        ));
    }

    #[test]
    fn concurrent_writers_are_all_captured_across_snapshots() {
        let recorder = Arc::new(Recorder::new(1, 1_000_000, 3).unwrap());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let recorder = recorder.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..500 {
                    recorder.record_value(7).unwrap();
                }
            }));
        }
        let mut total = 0u64;
        for _ in 0..20 {
            let snap = recorder.get_interval_histogram(None).unwrap();
            total += snap.total_count();
        }
        for h in handles {
            h.join().unwrap();
        }
        total += recorder.get_interval_histogram(None).unwrap().total_count();
        assert_eq!(total, 2000);
    }
}
