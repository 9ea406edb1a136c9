// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! The game side of the loop.
//!
//! The control loop only needs a score back and somewhere to deliver tick and
//! spawn decisions. [`HeadlessGame`] is the minimal collaborator used by the
//! binary: a runner moving along a lane and collecting food placed ahead of
//! it. Rendering and snake mechanics live elsewhere.

use std::io;
use std::io::Write;

use log::debug;

use crate::input::InputToken;
use crate::stats::CycleReport;

pub trait GameLoop {
    /// Place a new piece of food.
    fn spawn_food(&mut self);

    /// Advance one tick. Returns whether anything visible changed.
    fn advance(&mut self) -> bool;

    fn score(&self) -> u64;

    /// Apply one input token. Returns whether anything visible changed.
    fn handle_input(&mut self, token: InputToken) -> bool;

    fn is_over(&self) -> bool;

    /// Display hook, called once per cycle.
    fn present(&mut self, _report: &CycleReport) {}
}

pub const DEFAULT_FOOD_GAP: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Heading {
    Forward,
    Back,
}

/// Runner on an unbounded lane.
///
/// `d`/right runs forward, `a`/left turns back, which stops the runner.
/// `w`/`s` are accepted and ignored, `q` ends the game.
#[derive(Debug)]
pub struct HeadlessGame {
    position: u64,
    food: Option<u64>,
    food_gap: u64,
    heading: Heading,
    score: u64,
    over: bool,
    status_line: bool,
}

impl HeadlessGame {
    pub fn new(food_gap: u64, status_line: bool) -> Self {
        let mut game = Self {
            position: 0,
            food: None,
            food_gap: food_gap.max(1),
            heading: Heading::Forward,
            score: 0,
            over: false,
            status_line,
        };
        game.spawn_food();
        game
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn food(&self) -> Option<u64> {
        self.food
    }

    fn write_status<W: Write>(&self, w: &mut W, report: &CycleReport) -> io::Result<()> {
        let gap = self.food.map(|f| f.saturating_sub(self.position)).unwrap_or(0);
        write!(
            w,
            "\rscore {:>4}  pos {:>6}  food +{:<3} tick {:>4}ms  rate {:>5}/s ",
            self.score,
            self.position,
            gap,
            report.decision.tick_interval.as_millis(),
            report.metrics.event_rate,
        )?;
        w.flush()
    }
}

impl GameLoop for HeadlessGame {
    fn spawn_food(&mut self) {
        self.food = Some(self.position + self.food_gap);
    }

    fn advance(&mut self) -> bool {
        if self.over || self.heading == Heading::Back {
            return false;
        }
        self.position += 1;
        if self.food == Some(self.position) {
            self.score += 1;
            self.spawn_food();
        }
        true
    }

    fn score(&self) -> u64 {
        self.score
    }

    fn handle_input(&mut self, token: InputToken) -> bool {
        let heading = match token {
            InputToken::Quit => {
                self.over = true;
                return true;
            }
            InputToken::Right => Heading::Forward,
            InputToken::Left => Heading::Back,
            _ => return false,
        };
        let changed = heading != self.heading;
        self.heading = heading;
        changed
    }

    fn is_over(&self) -> bool {
        self.over
    }

    fn present(&mut self, report: &CycleReport) {
        if !self.status_line {
            return;
        }
        if let Err(e) = self.write_status(&mut io::stdout().lock(), report) {
            debug!("status line not written: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runner_collects_food_and_scores() {
        let mut g = HeadlessGame::new(3, false);
        assert_eq!(g.food(), Some(3));
        assert!(g.advance());
        assert!(g.advance());
        assert_eq!(g.score(), 0);
        assert!(g.advance());
        assert_eq!(g.score(), 1);
        assert_eq!(g.food(), Some(6));
    }

    #[test]
    fn timed_spawn_moves_food_ahead() {
        let mut g = HeadlessGame::new(5, false);
        g.advance();
        g.spawn_food();
        assert_eq!(g.food(), Some(6));
    }

    #[test]
    fn turning_back_pauses() {
        let mut g = HeadlessGame::new(2, false);
        assert!(g.handle_input(InputToken::Left));
        assert!(!g.advance());
        assert_eq!(g.position(), 0);
        assert!(!g.handle_input(InputToken::Up));
        assert!(g.handle_input(InputToken::Right));
        assert!(g.advance());
    }

    #[test]
    fn quit_ends_the_game() {
        let mut g = HeadlessGame::new(2, false);
        g.handle_input(InputToken::Quit);
        assert!(g.is_over());
        assert!(!g.advance());
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    fn report() -> CycleReport {
        use crate::control::{Decision, Reduction};
        use crate::telemetry::SampledMetrics;
        use std::time::{Duration, Instant};

        let mut metrics = SampledMetrics::zeroed(Instant::now());
        metrics.event_rate = 12;
        CycleReport {
            cycle: 1,
            score: 0,
            metrics,
            decision: Decision {
                tick_interval: Duration::from_millis(336),
                retuned: true,
                spawn_interval: None,
                spawn_now: false,
            },
            reduction: Reduction::compute(&metrics, 0),
        }
    }

    #[test]
    fn status_line_shows_tick_and_rate() {
        let g = HeadlessGame::new(4, true);
        let mut out = Vec::new();
        g.write_status(&mut out, &report()).unwrap();
        let line = String::from_utf8(out).unwrap();
        assert!(line.starts_with('\r'));
        assert!(line.contains("food +4"));
        assert!(line.contains("336ms"));
        assert!(line.contains("12/s"));
    }

    #[test]
    fn status_write_errors_are_reported() {
        let g = HeadlessGame::new(4, true);
        let err = g.write_status(&mut BrokenPipe, &report()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
