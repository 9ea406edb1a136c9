// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::io::Write;

use anyhow::Result;
use chrono::Local;
use serde::Serialize;

use crate::control::Decision;
use crate::control::Reduction;
use crate::telemetry::SampledMetrics;

/// Everything one control cycle saw and decided. Display/debug only; nothing
/// here is fed back into the control function.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub score: u64,
    #[serde(flatten)]
    pub metrics: SampledMetrics,
    #[serde(flatten)]
    pub decision: Decision,
    #[serde(skip)]
    pub reduction: Reduction,
}

fn ms(d: std::time::Duration) -> f64 {
    d.as_micros() as f64 / 1000.0
}

impl CycleReport {
    pub fn format<W: Write>(&self, w: &mut W) -> Result<()> {
        let m = &self.metrics;
        let d = &self.decision;
        let r = &self.reduction;

        let now = Local::now();
        writeln!(w, "┌─ {} #{} {} ─", crate::TOOL_NAME, self.cycle, now.format("%H:%M:%S"))?;
        writeln!(w, "│ exec {:>8}  open {:>8}  conn {:>6}  fork {:>6}  cs {:>10}  rate {:>5}/s",
                 m.exec_count, m.file_ops_count, m.network_count, m.process_count,
                 m.context_switch_count, m.event_rate)?;
        writeln!(w, "│ tick {:>5.0}ms{}  -score {:.0} -exec {:.1} -proc {:.0} -rate {:.0} -cs {:.0}",
                 ms(d.tick_interval), if d.retuned { "*" } else { " " },
                 ms(r.score), ms(r.exec), ms(r.process), ms(r.rate), ms(r.context_switch))?;
        let spawn = match d.spawn_interval {
            Some(iv) => format!("{:>5.1}s{}", iv.as_secs_f64(), if d.spawn_now { " SPAWN" } else { "" }),
            None => "  off".to_string(),
        };
        writeln!(w, "│ score {:>4}  spawn {}", self.score, spawn)?;
        writeln!(w, "└─")?;
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
