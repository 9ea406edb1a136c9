// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Per-second event buckets and the "events this second" rate figure.
//!
//! This is not a moving average. The rate is overwritten with the bucket of
//! the current second on every refresh, and a refresh evicts exactly one old
//! key (`now - RATE_WINDOW_SECS`). Buckets for seconds in which no refresh
//! happened ten seconds later stay behind until the map fills, at which point
//! new seconds are simply not counted. Both quirks match the kprobe program.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use rustc_hash::FxHashMap;

use crate::clock::Clock;

pub const RATE_WINDOW_SECS: u64 = 10;
pub const RECENT_EVENTS_MAX: usize = 100;

/// Bounded map of unix second -> event count.
///
/// Supports only what the kernel hash map is used for: increment-or-create
/// (failing when full), lookup, and delete-if-present.
#[derive(Debug)]
pub struct EventBuckets {
    slots: Mutex<FxHashMap<u64, u64>>,
    capacity: usize,
}

impl Default for EventBuckets {
    fn default() -> Self {
        Self::with_capacity(RECENT_EVENTS_MAX)
    }
}

impl EventBuckets {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(FxHashMap::default()),
            capacity,
        }
    }

    /// Add one event to `sec`, creating the bucket with a count of 1 if it
    /// does not exist. Returns false if the bucket was absent and the map is
    /// full; the event is then not counted.
    pub fn increment(&self, sec: u64) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = slots.get_mut(&sec) {
            *count += 1;
            return true;
        }
        if slots.len() >= self.capacity {
            return false;
        }
        slots.insert(sec, 1);
        true
    }

    pub fn get(&self, sec: u64) -> Option<u64> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(&sec).copied()
    }

    /// Remove `sec` if present. Absent keys are not an error.
    pub fn evict(&self, sec: u64) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.remove(&sec).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sliding-window rate estimator.
pub struct RateEstimator {
    buckets: EventBuckets,
    rate: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RateEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateEstimator")
            .field("buckets", &self.buckets)
            .field("rate", &self.rate())
            .finish()
    }
}

impl RateEstimator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_buckets(clock, EventBuckets::default())
    }

    pub fn with_buckets(clock: Arc<dyn Clock>, buckets: EventBuckets) -> Self {
        Self {
            buckets,
            rate: AtomicU64::new(0),
            clock,
        }
    }

    /// Count one event in the bucket of the current second.
    pub fn increment_event_bucket(&self) -> bool {
        self.buckets.increment(self.clock.now_sec())
    }

    /// Publish the current second's bucket as the rate, then drop the bucket
    /// that just fell out of the window.
    pub fn update_event_rate(&self) {
        let now = self.clock.now_sec();
        let count = self.buckets.get(now).unwrap_or(0);
        self.rate.store(count, Ordering::Relaxed);

        self.buckets.evict(now.wrapping_sub(RATE_WINDOW_SECS));
    }

    pub fn rate(&self) -> u64 {
        self.rate.load(Ordering::Relaxed)
    }

    pub fn buckets(&self) -> &EventBuckets {
        &self.buckets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn estimator_at(sec: u64) -> (Arc<ManualClock>, RateEstimator) {
        let clock = Arc::new(ManualClock::at_sec(sec));
        let est = RateEstimator::new(clock.clone());
        (clock, est)
    }

    fn exec_event(est: &RateEstimator) {
        est.increment_event_bucket();
        est.update_event_rate();
    }

    #[test]
    fn two_events_in_same_second_give_rate_two() {
        let (_clock, est) = estimator_at(1_000);
        exec_event(&est);
        assert_eq!(est.rate(), 1);
        exec_event(&est);
        assert_eq!(est.rate(), 2);
    }

    #[test]
    fn rate_restarts_after_quiet_gap() {
        let (clock, est) = estimator_at(1_000);
        exec_event(&est);
        clock.advance_secs(11);
        exec_event(&est);
        assert_eq!(est.rate(), 1);
    }

    #[test]
    fn refresh_evicts_exactly_ten_seconds_back() {
        let (clock, est) = estimator_at(500);
        est.increment_event_bucket();
        clock.advance_secs(10);
        est.update_event_rate();
        assert_eq!(est.buckets().get(500), None);
        // nothing counted yet in second 510
        assert_eq!(est.rate(), 0);
    }

    #[test]
    fn refresh_only_evicts_one_key() {
        let (clock, est) = estimator_at(500);
        est.increment_event_bucket();
        clock.advance_secs(11);
        exec_event(&est);
        // 511 - 10 = 501, so 500 survives
        assert_eq!(est.buckets().get(500), Some(1));
        assert_eq!(est.buckets().len(), 2);
    }

    #[test]
    fn eviction_of_missing_key_is_noop() {
        let (_clock, est) = estimator_at(3);
        // 3 - 10 wraps; nothing there
        est.update_event_rate();
        assert_eq!(est.rate(), 0);
        assert!(est.buckets().is_empty());
        assert!(!est.buckets().evict(42));
    }

    #[test]
    fn full_map_drops_new_seconds_but_keeps_counting_existing() {
        let buckets = EventBuckets::with_capacity(2);
        assert!(buckets.increment(1));
        assert!(buckets.increment(2));
        assert!(!buckets.increment(3));
        assert!(buckets.increment(2));
        assert_eq!(buckets.get(2), Some(2));
        assert_eq!(buckets.get(3), None);
        assert!(buckets.evict(1));
        assert!(buckets.increment(3));
    }

    #[test]
    fn bucket_increments_from_many_threads() {
        let (_clock, est) = estimator_at(77);
        let est = Arc::new(est);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let est = Arc::clone(&est);
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        est.increment_event_bucket();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        est.update_event_rate();
        assert_eq!(est.rate(), 4_000);
    }
}
