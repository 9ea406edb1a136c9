// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! The control loop: one ticker, one input inbox, one shutdown channel.

use std::io::Write;
use std::time::Duration;
use std::time::Instant;

use anyhow::Result;
use crossbeam::channel::never;
use crossbeam::channel::tick;
use crossbeam::channel::select;
use crossbeam::channel::Receiver;
use log::{debug, info};

use crate::control::ControlState;
use crate::control::Decision;
use crate::control::Reduction;
use crate::game::GameLoop;
use crate::input::InputToken;
use crate::stats::CycleReport;
use crate::telemetry;
use crate::telemetry::TelemetrySource;

/// Where cycle reports go besides the game's own display hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutput {
    Quiet,
    Stats,
    Json,
}

pub struct Session<S, G> {
    source: S,
    game: G,
    control: ControlState,
    output: ReportOutput,
    max_cycles: u64,
    cycles: u64,
}

impl<S: TelemetrySource, G: GameLoop> Session<S, G> {
    pub fn new(
        source: S,
        game: G,
        base_interval: Duration,
        output: ReportOutput,
        max_cycles: u64,
    ) -> Result<Self> {
        Ok(Self {
            source,
            game,
            control: ControlState::new(base_interval, Instant::now())?,
            output,
            max_cycles,
            cycles: 0,
        })
    }

    pub fn game(&self) -> &G {
        &self.game
    }

    pub fn control(&self) -> &ControlState {
        &self.control
    }

    /// One control cycle: sample, maybe spawn, advance the game, and retune
    /// the tick if the game changed. Spawn and retune see the same snapshot.
    pub fn cycle(&mut self, now: Instant) -> CycleReport {
        self.cycles += 1;
        let metrics = telemetry::sample(&self.source, now);

        let (spawn_interval, spawn_now) = self.control.check_spawn(&metrics, now);
        if spawn_now {
            debug!("spawning food (file ops {})", metrics.file_ops_count);
            self.game.spawn_food();
        }

        let changed = self.game.advance();
        let score = self.game.score();
        let retuned = changed && self.control.retune(&metrics, score).is_some();

        CycleReport {
            cycle: self.cycles,
            score,
            metrics,
            decision: Decision {
                tick_interval: self.control.current_interval(),
                retuned,
                spawn_interval,
                spawn_now,
            },
            reduction: Reduction::compute(&metrics, score),
        }
    }

    fn emit(&self, report: &CycleReport) -> Result<()> {
        match self.output {
            ReportOutput::Quiet => {}
            ReportOutput::Stats => report.format(&mut std::io::stdout().lock())?,
            ReportOutput::Json => {
                let mut out = std::io::stdout().lock();
                writeln!(out, "{}", report.to_json()?)?;
            }
        }
        Ok(())
    }

    fn done(&self) -> bool {
        self.game.is_over() || (self.max_cycles > 0 && self.cycles >= self.max_cycles)
    }

    /// Drive cycles until the game ends, the cycle budget runs out, or
    /// `shutdown` fires (or disconnects). Returns the final score.
    pub fn run(&mut self, shutdown: &Receiver<()>, inputs: Receiver<InputToken>) -> Result<u64> {
        let mut inputs = inputs;
        let mut ticker = tick(self.control.current_interval());
        info!(
            "control loop started, base tick {:?}",
            self.control.base_interval()
        );

        while !self.done() {
            select! {
                recv(shutdown) -> _ => {
                    info!("shutdown requested");
                    break;
                }
                recv(ticker) -> _ => {
                    let report = self.cycle(Instant::now());
                    if report.decision.retuned {
                        ticker = tick(report.decision.tick_interval);
                    }
                    self.game.present(&report);
                    self.emit(&report)?;
                }
                recv(inputs) -> token => match token {
                    Ok(token) => {
                        self.game.handle_input(token);
                    }
                    Err(_) => {
                        debug!("input feed disconnected");
                        inputs = never();
                    }
                },
            }
        }

        info!("control loop stopped after {} cycles", self.cycles);
        Ok(self.game.score())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::HeadlessGame;
    use crate::telemetry::tests::StaticSource;
    use crate::telemetry::Slot;
    use crossbeam::channel::bounded;

    /// Records what the loop asked of it.
    #[derive(Default)]
    struct ScriptedGame {
        spawns: u32,
        advances: u32,
        score: u64,
        changes: bool,
        over_after: Option<u32>,
    }

    impl GameLoop for ScriptedGame {
        fn spawn_food(&mut self) {
            self.spawns += 1;
        }

        fn advance(&mut self) -> bool {
            self.advances += 1;
            self.changes
        }

        fn score(&self) -> u64 {
            self.score
        }

        fn handle_input(&mut self, token: InputToken) -> bool {
            if token == InputToken::Quit {
                self.over_after = Some(0);
            }
            true
        }

        fn is_over(&self) -> bool {
            self.over_after.is_some_and(|n| self.advances >= n)
        }
    }

    const BASE: Duration = Duration::from_millis(350);

    #[test]
    fn cycle_retunes_from_reference_snapshot() {
        // exec, file ops, network, process, context switch, rate
        let src = StaticSource::new([10, 0, 0, 3, 1500, 2]);
        let game = ScriptedGame {
            score: 5,
            changes: true,
            ..Default::default()
        };
        let mut s = Session::new(&src, game, BASE, ReportOutput::Quiet, 0).unwrap();
        let r = s.cycle(Instant::now());
        assert!(r.decision.retuned);
        assert_eq!(r.decision.tick_interval, Duration::from_millis(336));
        assert_eq!(r.decision.spawn_interval, None);
        assert_eq!(src.reads.get(), 6);
    }

    #[test]
    fn unchanged_game_keeps_the_ticker() {
        let src = StaticSource::new([10, 0, 0, 3, 1500, 2]);
        let game = ScriptedGame::default();
        let mut s = Session::new(&src, game, BASE, ReportOutput::Quiet, 0).unwrap();
        let r = s.cycle(Instant::now());
        assert!(!r.decision.retuned);
        assert_eq!(r.decision.tick_interval, BASE);
    }

    #[test]
    fn spawn_needs_file_activity() {
        let src = StaticSource::new([0, 500, 0, 0, 0, 0]);
        let mut s = Session::new(&src, ScriptedGame::default(), BASE, ReportOutput::Quiet, 0)
            .unwrap();
        let start = s.control().last_food_spawn();

        let r = s.cycle(start + Duration::from_secs(5));
        assert!(!r.decision.spawn_now);
        assert_eq!(r.decision.spawn_interval, Some(Duration::from_secs(14)));

        let r = s.cycle(start + Duration::from_secs(15));
        assert!(r.decision.spawn_now);
        assert_eq!(s.game().spawns, 1);

        let quiet = StaticSource::new([0, 0, 0, 0, 0, 0]);
        let mut s = Session::new(&quiet, ScriptedGame::default(), BASE, ReportOutput::Quiet, 0)
            .unwrap();
        let r = s.cycle(start + Duration::from_secs(3600));
        assert!(!r.decision.spawn_now);
        assert_eq!(s.game().spawns, 0);
    }

    #[test]
    fn unreadable_slot_reads_as_zero_in_report() {
        let mut src = StaticSource::new([10, 0, 0, 3, 1500, 2]);
        src.failing = vec![Slot::EventRate];
        let game = ScriptedGame {
            changes: true,
            ..Default::default()
        };
        let mut s = Session::new(&src, game, BASE, ReportOutput::Quiet, 0).unwrap();
        let r = s.cycle(Instant::now());
        assert_eq!(r.metrics.event_rate, 0);
        // 350 - (5 + 1 + 0 + 1)
        assert_eq!(r.decision.tick_interval, Duration::from_millis(343));
    }

    #[test]
    fn run_returns_immediately_on_shutdown() {
        let src = StaticSource::new([0; 6]);
        let mut s = Session::new(&src, ScriptedGame::default(), BASE, ReportOutput::Quiet, 0)
            .unwrap();
        let (tx, rx) = bounded(1);
        tx.send(()).unwrap();
        let started = Instant::now();
        s.run(&rx, never()).unwrap();
        assert!(started.elapsed() < BASE);
        assert_eq!(s.game().advances, 0);
    }

    #[test]
    fn run_stops_after_cycle_budget() {
        let src = StaticSource::new([0; 6]);
        let game = HeadlessGame::new(1, false);
        let mut s = Session::new(&src, game, Duration::from_millis(100), ReportOutput::Quiet, 2)
            .unwrap();
        let (_tx, rx) = bounded::<()>(1);
        let score = s.run(&rx, never()).unwrap();
        assert_eq!(score, 2);
        // base already sits on the floor
        assert_eq!(s.control().current_interval(), Duration::from_millis(100));
    }

    #[test]
    fn quit_token_ends_the_loop() {
        let src = StaticSource::new([0; 6]);
        let mut s = Session::new(&src, ScriptedGame::default(), BASE, ReportOutput::Quiet, 0)
            .unwrap();
        let (_tx, shutdown) = bounded::<()>(1);
        let (itx, irx) = bounded(1);
        itx.send(InputToken::Quit).unwrap();
        s.run(&shutdown, irx).unwrap();
        assert!(s.game().is_over());
        assert_eq!(s.game().advances, 0);
    }
}
