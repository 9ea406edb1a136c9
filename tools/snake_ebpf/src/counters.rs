// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Per-class event counters.
//!
//! Mirrors the single-slot counter maps of `bpf/main.bpf.c`. Every counter is
//! a lock-free `AtomicU64` that only ever grows; writers may fire from any
//! number of threads at once.

use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

/// Context-switch counter jumps by this much whenever it sits on a multiple of it.
pub const CTX_SWITCH_STRIDE: u64 = 100;

/// The five kernel event classes that are traced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum EventClass {
    Exec = 0,
    FileOpen = 1,
    NetConnect = 2,
    Fork = 3,
    ContextSwitch = 4,
}

impl EventClass {
    pub const ALL: [EventClass; 5] = [
        EventClass::Exec,
        EventClass::FileOpen,
        EventClass::NetConnect,
        EventClass::Fork,
        EventClass::ContextSwitch,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Whether a firing of this class lands in the per-second event buckets.
    pub const fn feeds_rate(self) -> bool {
        !matches!(self, EventClass::ContextSwitch)
    }

    pub const fn name(self) -> &'static str {
        match self {
            EventClass::Exec => "exec",
            EventClass::FileOpen => "file-open",
            EventClass::NetConnect => "net-connect",
            EventClass::Fork => "fork",
            EventClass::ContextSwitch => "context-switch",
        }
    }
}

impl fmt::Display for EventClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Monotonic event counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    #[inline]
    pub fn increment(&self) {
        self.add(1);
    }

    #[inline]
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn load(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Context-switch update rule.
    ///
    /// A value sitting on a multiple of [`CTX_SWITCH_STRIDE`] (zero included)
    /// advances by the full stride, anything else by one. The read and the add
    /// are two separate operations, same as the kprobe handler, so concurrent
    /// firings may both see the same multiple and both add the stride.
    #[inline]
    pub fn throttled_increment(&self) {
        let step = if self.load() % CTX_SWITCH_STRIDE == 0 {
            CTX_SWITCH_STRIDE
        } else {
            1
        };
        self.add(step);
    }
}

/// One counter per [`EventClass`].
#[derive(Debug, Default)]
pub struct CounterSet {
    counters: [Counter; 5],
}

impl CounterSet {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self, class: EventClass) -> &Counter {
        &self.counters[class.index()]
    }

    /// Apply the update rule of `class` to its counter.
    #[inline]
    pub fn record(&self, class: EventClass) {
        let counter = self.get(class);
        match class {
            EventClass::ContextSwitch => counter.throttled_increment(),
            _ => counter.increment(),
        }
    }

    pub fn load(&self, class: EventClass) -> u64 {
        self.get(class).load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn fire_cs(counter: &Counter, n: usize) -> u64 {
        for _ in 0..n {
            counter.throttled_increment();
        }
        counter.load()
    }

    #[test]
    fn plain_counters_increment_by_one() {
        let set = CounterSet::new();
        for _ in 0..7 {
            set.record(EventClass::Exec);
        }
        set.record(EventClass::Fork);
        assert_eq!(set.load(EventClass::Exec), 7);
        assert_eq!(set.load(EventClass::Fork), 1);
        assert_eq!(set.load(EventClass::FileOpen), 0);
    }

    #[test]
    fn context_switch_from_zero_always_strides() {
        // Zero is a multiple of the stride, so every firing lands on the next one.
        for (n, expected) in [
            (1, 100),
            (99, 9_900),
            (100, 10_000),
            (101, 10_100),
            (199, 19_900),
            (200, 20_000),
        ] {
            let c = Counter::new();
            assert_eq!(fire_cs(&c, n), expected, "after {} firings", n);
        }
    }

    #[test]
    fn context_switch_off_stride_counts_up_to_next_multiple() {
        let c = Counter::new();
        c.add(1);
        // 1 -> 100 takes 99 single steps, then the stride kicks in.
        assert_eq!(fire_cs(&c, 98), 99);
        assert_eq!(fire_cs(&c, 1), 100);
        assert_eq!(fire_cs(&c, 1), 200);
        assert_eq!(fire_cs(&c, 1), 300);
    }

    #[test]
    fn context_switch_via_set_uses_throttle() {
        let set = CounterSet::new();
        set.record(EventClass::ContextSwitch);
        set.record(EventClass::ContextSwitch);
        assert_eq!(set.load(EventClass::ContextSwitch), 200);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let set = Arc::new(CounterSet::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let set = Arc::clone(&set);
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        set.record(EventClass::FileOpen);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(set.load(EventClass::FileOpen), 80_000);
    }

    #[test]
    fn only_context_switch_bypasses_rate() {
        let feeding: Vec<_> = EventClass::ALL
            .iter()
            .filter(|c| c.feeds_rate())
            .collect();
        assert_eq!(feeding.len(), 4);
        assert!(!EventClass::ContextSwitch.feeds_rate());
    }
}
