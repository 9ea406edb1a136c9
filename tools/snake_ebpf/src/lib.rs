// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Kernel-activity driven game loop.
//!
//! Kprobes count exec, file open, connect, fork and context-switch events in
//! BPF maps. Every cycle the control loop samples those maps and turns them
//! into the game's tick interval and food spawn interval.

pub mod bpf;
pub mod clock;
pub mod control;
pub mod counters;
pub mod game;
pub mod input;
pub mod probe;
pub mod rate;
pub mod session;
pub mod stats;
pub mod telemetry;
pub mod tracer;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use crossbeam::channel::bounded;
use crossbeam::channel::Receiver;
use log::info;

use crate::bpf::BpfTracer;
use crate::clock::WallClock;
use crate::control::DEFAULT_BASE_INTERVAL;
use crate::control::TICK_FLOOR;
use crate::game::HeadlessGame;
use crate::game::DEFAULT_FOOD_GAP;
use crate::input::InputToken;
use crate::probe::attach_all;
use crate::probe::PROBES;
use crate::session::ReportOutput;
use crate::session::Session;
use crate::telemetry::TelemetrySource;
use crate::tracer::ProbeDispatch;
use crate::tracer::SimulatedKernel;
use crate::tracer::Workload;
use crate::tracer::WorkloadProfile;
use crate::tracer::DEFAULT_SIM_SYMBOLS;

pub const TOOL_NAME: &str = "snake_ebpf";

#[derive(Debug, Parser)]
#[command(
    name = "snake_ebpf",
    version,
    about = "Game loop paced by live kernel activity traced with kprobes."
)]
pub struct Opts {
    /// Base tick interval in milliseconds. Also the period of the first cycle.
    #[clap(
        long,
        default_value_t = DEFAULT_BASE_INTERVAL.as_millis() as u64,
        value_parser = clap::value_parser!(u64).range((TICK_FLOOR.as_millis() as u64)..)
    )]
    pub base_interval_ms: u64,

    /// Compiled BPF object to load instead of the default search paths.
    #[clap(long, env = "SNAKE_EBPF_OBJECT")]
    pub bpf_object: Option<PathBuf>,

    /// Run against an in-process tracer fed by a synthetic workload instead
    /// of attaching to the kernel.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    pub simulate: bool,

    /// Mean synthetic exec events per second in simulate mode. Other classes
    /// scale from it.
    #[clap(long, default_value = "20")]
    pub sim_rate: u32,

    /// Distance ahead of the runner at which food is placed.
    #[clap(long, default_value_t = DEFAULT_FOOD_GAP)]
    pub food_gap: u64,

    /// Print the cycle report every cycle.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    pub stats: bool,

    /// Print every cycle report as one JSON line.
    #[clap(long, action = clap::ArgAction::SetTrue, conflicts_with = "stats")]
    pub json: bool,

    /// Stop after this many cycles. 0 runs until the game ends.
    #[clap(long, default_value = "0")]
    pub max_cycles: u64,

    /// Enable verbose output. Specify multiple times to increase verbosity.
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Opts {
    fn report_output(&self) -> ReportOutput {
        if self.json {
            ReportOutput::Json
        } else if self.stats {
            ReportOutput::Stats
        } else {
            ReportOutput::Quiet
        }
    }
}

fn play<S: TelemetrySource>(
    opts: &Opts,
    source: S,
    shutdown: &Receiver<()>,
    inputs: Receiver<InputToken>,
) -> Result<u64> {
    let output = opts.report_output();
    let game = HeadlessGame::new(opts.food_gap, output == ReportOutput::Quiet);
    let mut session = Session::new(
        source,
        game,
        Duration::from_millis(opts.base_interval_ms),
        output,
        opts.max_cycles,
    )?;
    session.run(shutdown, inputs)
}

pub fn run(opts: Opts) -> Result<()> {
    let (shutdown_tx, shutdown) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .context("Error setting Ctrl-C handler")?;

    let inputs = input::spawn_feed(std::io::stdin())?;

    let score = if opts.simulate {
        info!("simulate mode, no kprobes are attached");
        let dispatch = Arc::new(ProbeDispatch::new(Arc::new(WallClock)));
        let mut kernel = SimulatedKernel::new(
            Arc::clone(&dispatch),
            DEFAULT_SIM_SYMBOLS.iter().copied(),
        );
        let report = attach_all(&mut kernel, &PROBES)?;
        info!("simulated bindings:\n{}", report);
        let _workload = Workload::spawn(
            Arc::clone(&dispatch),
            WorkloadProfile::desktop(opts.sim_rate),
        )?;
        play(&opts, &*dispatch, &shutdown, inputs)?
    } else {
        bpf::init_libbpf_logging();
        let tracer = BpfTracer::load(opts.bpf_object.as_deref(), opts.verbose > 1)?;
        info!("{} kprobes attached", tracer.nr_links());
        play(&opts, tracer.telemetry(), &shutdown, inputs)?
    };

    println!();
    println!("Game Over!");
    println!("Final score: {}", score);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = Opts::try_parse_from(["snake_ebpf"]).unwrap();
        assert_eq!(
            Duration::from_millis(opts.base_interval_ms),
            DEFAULT_BASE_INTERVAL
        );
        assert_eq!(opts.food_gap, DEFAULT_FOOD_GAP);
        assert_eq!(opts.max_cycles, 0);
        assert_eq!(opts.report_output(), ReportOutput::Quiet);
    }

    #[test]
    fn base_interval_below_floor_is_rejected() {
        assert!(Opts::try_parse_from(["snake_ebpf", "--base-interval-ms", "99"]).is_err());
        assert!(Opts::try_parse_from(["snake_ebpf", "--base-interval-ms", "100"]).is_ok());
    }

    #[test]
    fn verbosity_and_output() {
        let opts = Opts::try_parse_from(["snake_ebpf", "-vv", "--json", "--simulate"]).unwrap();
        assert_eq!(opts.verbose, 2);
        assert!(opts.simulate);
        assert_eq!(opts.report_output(), ReportOutput::Json);
        assert!(Opts::try_parse_from(["snake_ebpf", "--json", "--stats"]).is_err());
    }
}
