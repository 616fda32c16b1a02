// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! A lock-free writer / single-reader epoch barrier.
//!
//! Writers never block: entering and leaving a critical section is a single atomic
//! fetch-and-increment each. A reader can still detect the point at which every writer that
//! was in-flight when it asked has drained, by flipping which of two regions new writers are
//! tallied into and waiting for the region being retired to empty out.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Token returned by [`Phaser::writer_enter`] and passed back to [`Phaser::writer_exit`].
pub type WriterToken = i64;

pub struct Phaser {
    /// Continuously incremented by writers. Its sign says which of the two regions
    /// ("even"/non-negative or "odd"/negative) is currently accepting entries.
    start_epoch: AtomicI64,
    even_end_epoch: AtomicI64,
    odd_end_epoch: AtomicI64,
    /// The last `start_epoch` value each region reached the last time it was active, so a
    /// region's entry count keeps accumulating across activations instead of resetting (which
    /// would desynchronize it from its end-epoch counter, which never resets either).
    even_progress: AtomicI64,
    odd_progress: AtomicI64,
    reader_lock: Mutex<()>,
}

impl Default for Phaser {
    fn default() -> Self {
        Self::new()
    }
}

impl Phaser {
    pub fn new() -> Self {
        Phaser {
            start_epoch: AtomicI64::new(0),
            even_end_epoch: AtomicI64::new(0),
            odd_end_epoch: AtomicI64::new(0),
            even_progress: AtomicI64::new(0),
            odd_progress: AtomicI64::new(i64::MIN),
            reader_lock: Mutex::new(()),
        }
    }

    /// Enters a writer critical section. Never blocks, never allocates.
    pub fn writer_enter(&self) -> WriterToken {
        self.start_epoch.fetch_add(1, Ordering::SeqCst)
    }

    /// Exits the critical section identified by `token`.
    pub fn writer_exit(&self, token: WriterToken) {
        let counter = if token >= 0 {
            &self.even_end_epoch
        } else {
            &self.odd_end_epoch
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Serializes readers. A reader must hold this guard across its call to [`Phaser::flip_phase`].
    pub fn reader_lock(&self) -> MutexGuard<'_, ()> {
        self.reader_lock.lock().unwrap()
    }

    /// Waits for every writer critical section that began before this call to exit, then
    /// toggles which region new writers are tallied into. Must be called while holding the
    /// guard from [`Phaser::reader_lock`].
    pub fn flip_phase(&self, yield_interval: Duration) {
        let closing_is_even = self.start_epoch.load(Ordering::SeqCst) >= 0;

        let resuming_value = if closing_is_even {
            self.odd_progress.load(Ordering::SeqCst)
        } else {
            self.even_progress.load(Ordering::SeqCst)
        };
        let closing_final_value = self.start_epoch.swap(resuming_value, Ordering::SeqCst);
        if closing_is_even {
            self.even_progress.store(closing_final_value, Ordering::SeqCst);
        } else {
            self.odd_progress.store(closing_final_value, Ordering::SeqCst);
        }

        let entries_in_closing_region = if closing_is_even {
            closing_final_value
        } else {
            (closing_final_value as i128 - i64::MIN as i128) as i64
        };
        let end_counter = if closing_is_even {
            &self.even_end_epoch
        } else {
            &self.odd_end_epoch
        };

        while end_counter.load(Ordering::SeqCst) < entries_in_closing_region {
            std::thread::yield_now();
            if !yield_interval.is_zero() {
                std::thread::sleep(yield_interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn drains_writers_that_entered_before_flip() {
        let phaser = Arc::new(Phaser::new());
        let observed = Arc::new(AtomicI64::new(0));

        let token = phaser.writer_enter();
        let handle = {
            let phaser = phaser.clone();
            let observed = observed.clone();
            thread::spawn(move || {
                // simulate a slow writer that is already in-flight when the flip happens
                thread::sleep(Duration::from_millis(20));
                observed.fetch_add(1, Ordering::SeqCst);
                phaser.writer_exit(token);
            })
        };

        let _guard = phaser.reader_lock();
        phaser.flip_phase(Duration::from_micros(100));
        // flip_phase must not have returned before the in-flight writer recorded its effect
        assert_eq!(observed.load(Ordering::SeqCst), 1);
        handle.join().unwrap();
    }

    #[test]
    fn repeated_flips_stay_consistent() {
        let phaser = Phaser::new();
        for _ in 0..1000 {
            let token = phaser.writer_enter();
            phaser.writer_exit(token);
            let _guard = phaser.reader_lock();
            phaser.flip_phase(Duration::from_nanos(0));
        }
    }

    #[test]
    fn many_concurrent_writers_all_drain() {
        let phaser = Arc::new(Phaser::new());
        let in_flight = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let phaser = phaser.clone();
            let in_flight = in_flight.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..2000 {
                    let token = phaser.writer_enter();
                    in_flight.fetch_add(1, Ordering::SeqCst);
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    phaser.writer_exit(token);
                }
            }));
        }
        for _ in 0..20 {
            let _guard = phaser.reader_lock();
            phaser.flip_phase(Duration::from_micros(50));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    }
}
