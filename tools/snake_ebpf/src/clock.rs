// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

pub const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Nanosecond time source for the in-process tracer.
pub trait Clock: Send + Sync {
    fn now_ns(&self) -> u64;

    fn now_sec(&self) -> u64 {
        self.now_ns() / NSEC_PER_SEC
    }
}

/// Unix wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct WallClock;

impl Clock for WallClock {
    fn now_ns(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }
}

/// Hand-driven clock.
#[derive(Debug, Default)]
pub struct ManualClock {
    ns: AtomicU64,
}

impl ManualClock {
    pub fn at_sec(sec: u64) -> Self {
        Self {
            ns: AtomicU64::new(sec * NSEC_PER_SEC),
        }
    }

    pub fn set_ns(&self, ns: u64) {
        self.ns.store(ns, Ordering::Relaxed);
    }

    pub fn advance_secs(&self, secs: u64) {
        self.ns.fetch_add(secs * NSEC_PER_SEC, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.ns.load(Ordering::Relaxed)
    }
}
