// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Per-cycle sampling of the six kernel-exposed values.

use std::time::Instant;

use anyhow::Result;
use log::debug;
use serde::Serialize;

use crate::counters::EventClass;

/// One kernel-exposed u64. Each lives in its own single-entry array map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Exec,
    FileOps,
    Network,
    Process,
    ContextSwitch,
    EventRate,
}

impl Slot {
    pub const ALL: [Slot; 6] = [
        Slot::Exec,
        Slot::FileOps,
        Slot::Network,
        Slot::Process,
        Slot::ContextSwitch,
        Slot::EventRate,
    ];

    /// Position in [`Slot::ALL`].
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn map_name(self) -> &'static str {
        match self {
            Slot::Exec => "execve_counter",
            Slot::FileOps => "file_ops_counter",
            Slot::Network => "network_counter",
            Slot::Process => "process_counter",
            Slot::ContextSwitch => "context_switch_counter",
            Slot::EventRate => "event_rate",
        }
    }

    /// The counter behind this slot; `None` for the rate figure.
    pub const fn class(self) -> Option<EventClass> {
        match self {
            Slot::Exec => Some(EventClass::Exec),
            Slot::FileOps => Some(EventClass::FileOpen),
            Slot::Network => Some(EventClass::NetConnect),
            Slot::Process => Some(EventClass::Fork),
            Slot::ContextSwitch => Some(EventClass::ContextSwitch),
            Slot::EventRate => None,
        }
    }
}

/// Anything the six values can be read from.
pub trait TelemetrySource {
    fn read(&self, slot: Slot) -> Result<u64>;
}

impl<T: TelemetrySource + ?Sized> TelemetrySource for &T {
    fn read(&self, slot: Slot) -> Result<u64> {
        (**self).read(slot)
    }
}

/// Snapshot taken at the top of a control cycle.
///
/// Fields are read one after another without any lock against the writers,
/// so two fields may straddle an in-flight kernel update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SampledMetrics {
    pub exec_count: u64,
    pub file_ops_count: u64,
    pub network_count: u64,
    pub process_count: u64,
    pub context_switch_count: u64,
    pub event_rate: u64,
    #[serde(skip)]
    pub sampled_at: Instant,
}

impl SampledMetrics {
    pub fn zeroed(sampled_at: Instant) -> Self {
        Self {
            exec_count: 0,
            file_ops_count: 0,
            network_count: 0,
            process_count: 0,
            context_switch_count: 0,
            event_rate: 0,
            sampled_at,
        }
    }

    fn set(&mut self, slot: Slot, value: u64) {
        match slot {
            Slot::Exec => self.exec_count = value,
            Slot::FileOps => self.file_ops_count = value,
            Slot::Network => self.network_count = value,
            Slot::Process => self.process_count = value,
            Slot::ContextSwitch => self.context_switch_count = value,
            Slot::EventRate => self.event_rate = value,
        }
    }
}

/// Read every slot of `source` into a fresh snapshot.
///
/// A slot that cannot be read is zero for this snapshot only; nothing is
/// carried over from earlier cycles.
pub fn sample<S: TelemetrySource + ?Sized>(source: &S, now: Instant) -> SampledMetrics {
    let mut metrics = SampledMetrics::zeroed(now);
    for slot in Slot::ALL {
        match source.read(slot) {
            Ok(v) => metrics.set(slot, v),
            Err(e) => debug!("{}: read failed, using 0: {:#}", slot.map_name(), e),
        }
    }
    metrics
}
