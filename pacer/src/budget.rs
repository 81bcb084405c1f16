//! Adaptive sizing of the opcode budget for one quantum.
//!
//! We want each quantum to take a few milliseconds of real time: long
//! enough that the per-quantum overhead is small, short enough that
//! the host stays responsive.  We can't know in advance how fast the
//! host is, so the budget is adjusted after every quantum by a small
//! multiplicative step.  The step down happens at a lower "cost" of
//! mis-estimation than the step up, so an overloaded host is relieved
//! quickly.
use std::time::Duration;

use conv::*;
use tracing::{event, Level};

use super::machine::ExecutionResult;

/// A quantum finishing sooner than this (having used its whole budget)
/// grows the budget.
pub const SPEED_UP_BELOW: Duration = Duration::from_millis(5);

/// A quantum taking longer than this shrinks the budget.
pub const SLOW_DOWN_ABOVE: Duration = Duration::from_millis(10);

pub const DEFAULT_INITIAL_OPCODES: u32 = 1000;

const GROWTH: f64 = 20.0 / 19.0;
const SHRINKAGE: f64 = 19.0 / 20.0;
const MIN_OPCODES: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    SpedUp,
    SlowedDown,
    Unchanged,
}

/// The number of opcodes the virtual machine may run in the next
/// quantum.
///
/// The budget is kept as a real number so that small budgets can
/// still grow (an integer budget of 1 multiplied by 20/19 would stay
/// at 1 forever); the virtual machine is given the integer part.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpcodeBudget {
    opcodes: f64,
}

impl OpcodeBudget {
    pub fn new(initial: u32) -> OpcodeBudget {
        OpcodeBudget {
            opcodes: f64::from(initial).max(MIN_OPCODES),
        }
    }

    /// The exact (fractional) budget.
    pub fn value(&self) -> f64 {
        self.opcodes
    }

    /// The budget to hand to the virtual machine.  Always at least 1.
    pub fn opcodes(&self) -> u32 {
        self.opcodes
            .approx_as_by::<u32, RoundToZero>()
            .unwrap_or(u32::MAX)
            .max(1)
    }

    /// Adjusts the budget given how long the last quantum took and how
    /// it ended.
    pub fn adjust(&mut self, duration: Duration, result: ExecutionResult) -> Adjustment {
        let adjustment = match result {
            ExecutionResult::Halted => Adjustment::Unchanged,
            ExecutionResult::BudgetExhausted if duration < SPEED_UP_BELOW => {
                self.opcodes = (self.opcodes * GROWTH).min(f64::from(u32::MAX));
                Adjustment::SpedUp
            }
            _ if duration > SLOW_DOWN_ABOVE => {
                self.opcodes = (self.opcodes * SHRINKAGE).max(MIN_OPCODES);
                Adjustment::SlowedDown
            }
            _ => Adjustment::Unchanged,
        };
        if adjustment != Adjustment::Unchanged {
            event!(
                Level::TRACE,
                "quantum of {duration:?} ended with {result:?}: budget {adjustment:?} to {:.1} opcodes",
                self.opcodes
            );
        }
        adjustment
    }
}

impl Default for OpcodeBudget {
    fn default() -> Self {
        OpcodeBudget::new(DEFAULT_INITIAL_OPCODES)
    }
}

#[cfg(test)]
fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn fast_then_slow_quanta() {
    let mut budget = OpcodeBudget::new(1000);
    let ms = Duration::from_millis;
    assert_eq!(
        budget.adjust(ms(4), ExecutionResult::BudgetExhausted),
        Adjustment::SpedUp
    );
    assert_close(budget.value(), 1000.0 * 20.0 / 19.0);
    assert_eq!(
        budget.adjust(ms(4), ExecutionResult::BudgetExhausted),
        Adjustment::SpedUp
    );
    assert_close(budget.value(), 1000.0 * 20.0 / 19.0 * 20.0 / 19.0);
    assert_eq!(
        budget.adjust(ms(12), ExecutionResult::BudgetExhausted),
        Adjustment::SlowedDown
    );
    assert_close(budget.value(), 1000.0 * 20.0 / 19.0 * 20.0 / 19.0 * 19.0 / 20.0);
    assert_eq!(budget.opcodes(), 1052);
}

#[test]
fn early_stop_does_not_speed_up() {
    let mut budget = OpcodeBudget::new(1000);
    let short = Duration::from_millis(1);
    assert_eq!(
        budget.adjust(short, ExecutionResult::VoluntaryYield),
        Adjustment::Unchanged
    );
    assert_eq!(
        budget.adjust(short, ExecutionResult::Blocked),
        Adjustment::Unchanged
    );
    assert_eq!(budget.opcodes(), 1000);
}

#[test]
fn slow_quantum_shrinks_whatever_the_result() {
    let mut budget = OpcodeBudget::new(1000);
    let long = Duration::from_millis(11);
    assert_eq!(
        budget.adjust(long, ExecutionResult::VoluntaryYield),
        Adjustment::SlowedDown
    );
    assert_eq!(budget.opcodes(), 950);
}

#[test]
fn the_dead_band_leaves_the_budget_alone() {
    let mut budget = OpcodeBudget::new(1000);
    for ms in [5, 7, 10] {
        assert_eq!(
            budget.adjust(Duration::from_millis(ms), ExecutionResult::BudgetExhausted),
            Adjustment::Unchanged
        );
    }
    assert_eq!(budget.opcodes(), 1000);
}

#[test]
fn tiny_budget_can_still_grow() {
    let mut budget = OpcodeBudget::new(0);
    assert_eq!(budget.opcodes(), 1);
    for _ in 0..20 {
        budget.adjust(Duration::ZERO, ExecutionResult::BudgetExhausted);
    }
    assert!(budget.opcodes() > 1);
}

#[cfg(test)]
mod proptests {
    use std::time::Duration;

    use test_strategy::{proptest, Arbitrary};

    use super::{ExecutionResult, OpcodeBudget};

    #[derive(Debug, Arbitrary)]
    enum Outcome {
        Halted,
        BudgetExhausted,
        Blocked,
        VoluntaryYield,
    }

    impl From<&Outcome> for ExecutionResult {
        fn from(outcome: &Outcome) -> ExecutionResult {
            match outcome {
                Outcome::Halted => ExecutionResult::Halted,
                Outcome::BudgetExhausted => ExecutionResult::BudgetExhausted,
                Outcome::Blocked => ExecutionResult::Blocked,
                Outcome::VoluntaryYield => ExecutionResult::VoluntaryYield,
            }
        }
    }

    #[derive(Debug, Arbitrary)]
    struct Quantum {
        #[strategy(0..100_000u64)]
        micros: u64,
        outcome: Outcome,
    }

    #[proptest]
    fn budget_stays_positive(
        #[strategy(0..100_000u32)] initial: u32,
        #[strategy(proptest::collection::vec(proptest::arbitrary::any::<Quantum>(), 0..2000))]
        quanta: Vec<Quantum>,
    ) {
        let mut budget = OpcodeBudget::new(initial);
        for q in quanta.iter() {
            budget.adjust(Duration::from_micros(q.micros), (&q.outcome).into());
            assert!(budget.value() >= 1.0);
            assert!(budget.opcodes() >= 1);
        }
    }
}
