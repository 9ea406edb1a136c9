// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! In-process tracer.
//!
//! Runs the same per-firing logic as the kprobe handlers against userspace
//! atomics. `--simulate` drives it from a synthetic workload thread so the
//! control loop can run without root or a BPF-capable kernel.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::anyhow;
use anyhow::Context;
use anyhow::Result;
use log::{debug, info};
use rand::Rng;
use rustc_hash::FxHashSet;

use crate::clock::Clock;
use crate::counters::CounterSet;
use crate::counters::EventClass;
use crate::probe::ProbeBinder;
use crate::probe::ProbeSpec;
use crate::rate::RateEstimator;
use crate::telemetry::Slot;
use crate::telemetry::TelemetrySource;

/// Counters, rate estimator and the per-class attach state.
#[derive(Debug)]
pub struct ProbeDispatch {
    counters: CounterSet,
    rate: RateEstimator,
    attached: [AtomicBool; 5],
}

impl ProbeDispatch {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: CounterSet::new(),
            rate: RateEstimator::new(clock),
            attached: Default::default(),
        }
    }

    pub fn set_attached(&self, class: EventClass, attached: bool) {
        self.attached[class.index()].store(attached, Ordering::Relaxed);
    }

    pub fn is_attached(&self, class: EventClass) -> bool {
        self.attached[class.index()].load(Ordering::Relaxed)
    }

    /// One probe firing. A class that never attached ignores its firings.
    pub fn fire(&self, class: EventClass) {
        if !self.is_attached(class) {
            return;
        }

        self.counters.record(class);
        if class.feeds_rate() {
            self.rate.increment_event_bucket();
        }
        // Only the exec path refreshes the published rate.
        if class == EventClass::Exec {
            self.rate.update_event_rate();
        }
    }

    pub fn counters(&self) -> &CounterSet {
        &self.counters
    }

    pub fn rate(&self) -> &RateEstimator {
        &self.rate
    }
}

impl TelemetrySource for ProbeDispatch {
    fn read(&self, slot: Slot) -> Result<u64> {
        Ok(match slot.class() {
            Some(class) => self.counters.load(class),
            None => self.rate.rate(),
        })
    }
}

/// Symbol table standing in for kallsyms when binding against [`ProbeDispatch`].
#[derive(Debug)]
pub struct SimulatedKernel {
    dispatch: Arc<ProbeDispatch>,
    symbols: FxHashSet<String>,
}

/// Entry points of a recent x86_64 kernel, one per traced class.
pub const DEFAULT_SIM_SYMBOLS: &[&str] = &[
    "__x64_sys_execve",
    "do_sys_openat2",
    "tcp_v4_connect",
    "tcp_v6_connect",
    "kernel_clone",
    "__x64_sys_clone",
    "__schedule",
];

impl SimulatedKernel {
    pub fn new<I, S>(dispatch: Arc<ProbeDispatch>, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            dispatch,
            symbols: symbols.into_iter().map(Into::into).collect(),
        }
    }
}

/// Detaches its class when dropped.
#[derive(Debug)]
pub struct SimLink {
    dispatch: Arc<ProbeDispatch>,
    class: EventClass,
}

impl Drop for SimLink {
    fn drop(&mut self) {
        self.dispatch.set_attached(self.class, false);
    }
}

impl ProbeBinder for SimulatedKernel {
    type Link = SimLink;

    fn bind(&mut self, spec: &ProbeSpec, symbol: &str) -> Result<SimLink> {
        if !self.symbols.contains(symbol) {
            return Err(anyhow!("symbol {} not found in kernel", symbol));
        }
        self.dispatch.set_attached(spec.class, true);
        Ok(SimLink {
            dispatch: Arc::clone(&self.dispatch),
            class: spec.class,
        })
    }
}

/// Mean firings per second for each class of the synthetic workload.
#[derive(Debug, Clone, Copy)]
pub struct WorkloadProfile {
    pub per_sec: [u32; 5],
}

impl WorkloadProfile {
    /// `base` exec-equivalents per second, skewed towards what a busy desktop
    /// looks like: many opens and switches, few connects.
    pub fn desktop(base: u32) -> Self {
        Self {
            per_sec: [
                base,
                base.saturating_mul(8),
                base / 2,
                base,
                base.saturating_mul(20),
            ],
        }
    }
}

const STEPS_PER_SEC: u32 = 100;
const WORKLOAD_STEP: Duration = Duration::from_millis(1000 / STEPS_PER_SEC as u64);

/// Firings for one step of a class averaging `per_sec` events per second.
///
/// Each step gets the whole part of `per_sec / STEPS_PER_SEC`, plus one more
/// with probability equal to the remainder's share of a step.
fn step_firings<R: Rng>(rng: &mut R, per_sec: u32) -> u32 {
    let whole = per_sec / STEPS_PER_SEC;
    let frac = per_sec % STEPS_PER_SEC;
    whole + u32::from(frac > 0 && rng.gen_range(0..STEPS_PER_SEC) < frac)
}

/// Background thread firing synthetic events into a [`ProbeDispatch`].
pub struct Workload {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Workload {
    pub fn spawn(dispatch: Arc<ProbeDispatch>, profile: WorkloadProfile) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = Arc::clone(&shutdown);

        let thread = thread::Builder::new()
            .name("sim-workload".to_string())
            .spawn(move || {
                info!("simulated workload: {:?} events/s", profile.per_sec);
                let mut rng = rand::thread_rng();

                while !thread_shutdown.load(Ordering::Relaxed) {
                    for class in EventClass::ALL {
                        let n = step_firings(&mut rng, profile.per_sec[class.index()]);
                        for _ in 0..n {
                            dispatch.fire(class);
                        }
                    }
                    thread::sleep(WORKLOAD_STEP);
                }
                debug!("simulated workload stopped");
            })
            .context("failed to spawn workload thread")?;

        Ok(Self {
            shutdown,
            thread: Some(thread),
        })
    }
}

impl Drop for Workload {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}
