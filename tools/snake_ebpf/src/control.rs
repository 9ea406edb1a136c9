// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Telemetry -> gameplay parameters.
//!
//! Two pure functions do the work: the tick interval shrinks with score and
//! system activity, the food spawn interval shrinks with file activity. Every
//! activity factor is capped on its own and the result is clamped, so no
//! combination of counter values can push either interval out of bounds.

use std::time::Duration;
use std::time::Instant;

use anyhow::bail;
use anyhow::Result;
use log::debug;
use serde::Serialize;

use crate::telemetry::SampledMetrics;

pub const DEFAULT_BASE_INTERVAL: Duration = Duration::from_millis(350);
pub const TICK_FLOOR: Duration = Duration::from_millis(100);

pub const EXEC_STEP: Duration = Duration::from_micros(500);
pub const EXEC_CAP: Duration = Duration::from_millis(30);
pub const PROCESS_DIVISOR: u64 = 3;
pub const PROCESS_CAP: Duration = Duration::from_millis(25);
pub const RATE_CAP: Duration = Duration::from_millis(30);
pub const CONTEXT_SWITCH_DIVISOR: u64 = 1500;
pub const CONTEXT_SWITCH_CAP: Duration = Duration::from_millis(15);

pub const SPAWN_CEILING: Duration = Duration::from_secs(15);
pub const SPAWN_FLOOR: Duration = Duration::from_secs(5);
pub const FILE_OPS_DIVISOR: u64 = 50;
pub const FILE_OPS_STEP: Duration = Duration::from_millis(100);
pub const FILE_OPS_BONUS_CAP: Duration = Duration::from_secs(3);

fn millis(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Each factor's contribution to the tick interval reduction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reduction {
    pub score: Duration,
    pub exec: Duration,
    pub process: Duration,
    pub rate: Duration,
    pub context_switch: Duration,
}

impl Reduction {
    pub fn compute(m: &SampledMetrics, score: u64) -> Self {
        let exec = EXEC_STEP
            .checked_mul(u32::try_from(m.exec_count).unwrap_or(u32::MAX))
            .unwrap_or(EXEC_CAP)
            .min(EXEC_CAP);

        Self {
            score: millis(score),
            exec,
            process: millis(m.process_count / PROCESS_DIVISOR).min(PROCESS_CAP),
            rate: millis(m.event_rate).min(RATE_CAP),
            context_switch: millis(m.context_switch_count / CONTEXT_SWITCH_DIVISOR)
                .min(CONTEXT_SWITCH_CAP),
        }
    }

    pub fn total(&self) -> Duration {
        [self.exec, self.process, self.rate, self.context_switch]
            .into_iter()
            .fold(self.score, Duration::saturating_add)
    }
}

/// Tick interval for the given snapshot and score, within `[100ms, base]`.
pub fn tick_interval(base: Duration, m: &SampledMetrics, score: u64) -> Duration {
    let floor = TICK_FLOOR.min(base);
    base.saturating_sub(Reduction::compute(m, score).total())
        .max(floor)
}

/// Minimum time between timed food spawns, within `[5s, 15s]`.
pub fn spawn_interval(file_ops: u64) -> Duration {
    let bonus = FILE_OPS_STEP
        .checked_mul(u32::try_from(file_ops / FILE_OPS_DIVISOR).unwrap_or(u32::MAX))
        .unwrap_or(FILE_OPS_BONUS_CAP)
        .min(FILE_OPS_BONUS_CAP);
    SPAWN_CEILING
        .saturating_sub(bonus)
        .clamp(SPAWN_FLOOR, SPAWN_CEILING)
}

/// Whether food should be spawned now. Never true without file activity.
pub fn spawn_due(m: &SampledMetrics, since_last_spawn: Duration) -> bool {
    m.file_ops_count > 0 && since_last_spawn > spawn_interval(m.file_ops_count)
}

/// What one cycle decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    #[serde(serialize_with = "ser_ms")]
    pub tick_interval: Duration,
    /// The ticker has to be rescheduled with `tick_interval`.
    pub retuned: bool,
    /// `None` while there is no file activity.
    #[serde(serialize_with = "ser_opt_ms")]
    pub spawn_interval: Option<Duration>,
    pub spawn_now: bool,
}

fn ser_ms<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_micros() as f64 / 1000.0)
}

fn ser_opt_ms<S: serde::Serializer>(
    d: &Option<Duration>,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    match d {
        Some(d) => ser_ms(d, s),
        None => s.serialize_none(),
    }
}

/// Per-session control state. Only the methods here mutate it.
#[derive(Debug, Clone)]
pub struct ControlState {
    base_interval: Duration,
    current_interval: Duration,
    last_food_spawn: Instant,
}

impl ControlState {
    pub fn new(base_interval: Duration, now: Instant) -> Result<Self> {
        if base_interval < TICK_FLOOR {
            bail!(
                "base interval {:?} is below the {:?} floor",
                base_interval,
                TICK_FLOOR
            );
        }
        Ok(Self {
            base_interval,
            current_interval: base_interval,
            last_food_spawn: now,
        })
    }

    pub fn base_interval(&self) -> Duration {
        self.base_interval
    }

    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    pub fn last_food_spawn(&self) -> Instant {
        self.last_food_spawn
    }

    /// Spawn check for this cycle. Records the spawn time when it fires.
    pub fn check_spawn(&mut self, m: &SampledMetrics, now: Instant) -> (Option<Duration>, bool) {
        if m.file_ops_count == 0 {
            return (None, false);
        }
        let interval = spawn_interval(m.file_ops_count);
        let due = spawn_due(m, now.saturating_duration_since(self.last_food_spawn));
        if due {
            self.last_food_spawn = now;
        }
        (Some(interval), due)
    }

    /// Recompute the tick interval. Returns the new interval only if it
    /// differs from the one currently scheduled.
    pub fn retune(&mut self, m: &SampledMetrics, score: u64) -> Option<Duration> {
        let next = tick_interval(self.base_interval, m, score);
        if next == self.current_interval {
            return None;
        }
        debug!(
            "tick interval {:?} -> {:?} ({:?})",
            self.current_interval,
            next,
            Reduction::compute(m, score)
        );
        self.current_interval = next;
        Some(next)
    }
}
