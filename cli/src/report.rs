//! The summary printed at the end of a soak run.
use std::io::Write;
use std::time::Duration;

use pacer::{SessionStats, TICK_INTERVAL};
use termcolor::{Color, ColorSpec, StandardStream, WriteColor};

use super::host::{Finish, Outcome};
use super::terminal::get_colour_choice;

/// The number of timer interrupts which should have been delivered in
/// `elapsed`.
pub fn interrupts_expected(elapsed: Duration) -> u64 {
    let ns = elapsed.as_nanos() * 91 / 5_000_000_000;
    u64::try_from(ns).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone)]
pub struct Report {
    pub outcome: Outcome,
    pub stats: SessionStats,
    pub final_budget: u32,
    pub opcodes_run: u64,
    pub status_line: String,
}

impl Report {
    /// Allows one interrupt either way, for where the run started and
    /// stopped relative to an interrupt.
    pub fn timer_kept_up(&self) -> bool {
        let expected = interrupts_expected(self.outcome.elapsed);
        self.stats.interrupts.abs_diff(expected) <= 1
    }

    fn line(
        &self,
        out: &mut StandardStream,
        label: &str,
        value: &str,
        good: Option<bool>,
    ) -> Result<(), std::io::Error> {
        out.set_color(ColorSpec::new().set_bold(true))?;
        write!(out, "{label:>24}: ")?;
        let mut colour = ColorSpec::new();
        if let Some(good) = good {
            colour
                .set_fg(Some(if good { Color::Green } else { Color::Red }))
                .set_bold(!good);
        }
        out.set_color(&colour)?;
        writeln!(out, "{value}")?;
        out.reset()
    }

    pub fn print(&self) -> Result<(), std::io::Error> {
        let mut out = StandardStream::stdout(get_colour_choice());
        let elapsed = self.outcome.elapsed;
        let finish = match self.outcome.finish {
            Finish::Halted => "machine halted",
            Finish::Stopped => "stopped",
            Finish::Deadline => "run time elapsed",
        };
        self.line(&mut out, "finished", finish, None)?;
        self.line(&mut out, "elapsed", &format!("{elapsed:.3?}"), None)?;
        self.line(
            &mut out,
            "timer interrupts",
            &format!(
                "{} delivered, {} expected at {:?} each",
                self.stats.interrupts,
                interrupts_expected(elapsed),
                TICK_INTERVAL
            ),
            Some(self.timer_kept_up()),
        )?;
        self.line(&mut out, "quanta", &self.stats.quanta.to_string(), None)?;
        self.line(
            &mut out,
            "continuations",
            &format!(
                "{} immediate, {} deferred",
                self.stats.immediate_continuations, self.stats.deferred_continuations
            ),
            None,
        )?;
        self.line(
            &mut out,
            "frames presented",
            &self.stats.frames_presented.to_string(),
            None,
        )?;
        self.line(
            &mut out,
            "final opcode budget",
            &self.final_budget.to_string(),
            None,
        )?;
        self.line(&mut out, "opcodes run", &self.opcodes_run.to_string(), None)?;
        self.line(&mut out, "status", self.status_line.trim(), None)?;
        out.flush()
    }
}

#[test]
fn expected_interrupts_over_ten_seconds() {
    assert_eq!(interrupts_expected(Duration::from_secs(10)), 182);
    assert_eq!(interrupts_expected(Duration::from_millis(54)), 0);
}

#[test]
fn one_interrupt_either_way_is_on_time() {
    let mut report = Report {
        outcome: Outcome {
            finish: Finish::Deadline,
            elapsed: Duration::from_secs(10),
        },
        stats: SessionStats {
            interrupts: 181,
            ..SessionStats::default()
        },
        final_budget: 1000,
        opcodes_run: 0,
        status_line: String::new(),
    };
    assert!(report.timer_kept_up());
    report.stats.interrupts = 170;
    assert!(!report.timer_kept_up());
}
