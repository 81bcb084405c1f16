//! The fixed-rate virtual timer.
//!
//! The virtual machine expects its timer to interrupt 18.2 times per
//! second of wall-clock time.  When the host is late in calling us,
//! the interrupts which should have happened in the meantime are
//! delivered in a burst; none are dropped and none are skipped.
//!
//! An interval is 10/182 = 5/91 seconds, which is not a whole number
//! of nanoseconds.  Rather than adding a rounded interval to the last
//! fire time (and so accumulating the rounding error) we compute the
//! n'th fire time from the origin, rounding up to the nanosecond so
//! that no interrupt fires before it is due.
use std::time::Duration;

/// The nominal interval between virtual timer interrupts, rounded to
/// the nanosecond.  The accumulator itself does not use this value,
/// see [`TimerAccumulator::fire_time`].
pub const TICK_INTERVAL: Duration = Duration::from_nanos(54_945_055);

const INTERVAL_NUMERATOR_NS: u128 = 5_000_000_000;
const INTERVAL_DENOMINATOR: u128 = 91;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerAccumulator {
    origin: Duration,
    fired: u64,
}

impl TimerAccumulator {
    pub fn new(origin: Duration) -> TimerAccumulator {
        TimerAccumulator { origin, fired: 0 }
    }

    /// Re-anchors the timer so that the next interrupt is due one
    /// interval after `origin`.
    pub fn reset(&mut self, origin: Duration) {
        self.origin = origin;
        self.fired = 0;
    }

    /// The time at which interrupt number `n` falls due (interrupt
    /// zero being the origin itself).  This is the first whole
    /// nanosecond at or after `n` exact intervals.
    pub fn fire_time(&self, n: u64) -> Duration {
        let offset_ns = (u128::from(n) * INTERVAL_NUMERATOR_NS + INTERVAL_DENOMINATOR - 1)
            / INTERVAL_DENOMINATOR;
        self.origin + Duration::from_nanos(u64::try_from(offset_ns).unwrap_or(u64::MAX))
    }

    /// The time of the most recent interrupt (the origin, if none has
    /// fired yet).
    pub fn last_fire(&self) -> Duration {
        self.fire_time(self.fired)
    }

    pub fn next_fire(&self) -> Duration {
        self.fire_time(self.fired + 1)
    }

    /// Total number of interrupts fired since the last reset.
    pub fn fired(&self) -> u64 {
        self.fired
    }

    /// Advances by one interval if an interrupt is due at `now`.
    /// Returns whether an interrupt fired.
    pub fn try_advance(&mut self, now: Duration) -> bool {
        if now >= self.next_fire() {
            self.fired += 1;
            true
        } else {
            false
        }
    }

    /// Fires every interrupt which is due at `now`, one interval at a
    /// time, calling `on_fire` for each.  Returns the number fired.
    pub fn catch_up<F: FnMut()>(&mut self, now: Duration, mut on_fire: F) -> u64 {
        let mut count = 0;
        while self.try_advance(now) {
            on_fire();
            count += 1;
        }
        count
    }

    /// How long after `now` the next interrupt is due.  Zero if it is
    /// already overdue.
    pub fn time_to_next(&self, now: Duration) -> Duration {
        self.next_fire().saturating_sub(now)
    }
}

#[cfg(test)]
fn expected_interrupts(elapsed: Duration) -> u64 {
    // floor(elapsed / interval)
    let ns = elapsed.as_nanos();
    u64::try_from(ns * INTERVAL_DENOMINATOR / INTERVAL_NUMERATOR_NS)
        .expect("test durations should be small")
}

#[test]
fn ten_seconds_is_exactly_182_interrupts() {
    let mut timer = TimerAccumulator::new(Duration::ZERO);
    assert_eq!(timer.catch_up(Duration::from_secs(10), || ()), 182);
    assert_eq!(timer.last_fire(), Duration::from_secs(10));
    assert_eq!(timer.catch_up(Duration::from_secs(10), || ()), 0);
}

#[test]
fn nothing_fires_before_the_first_interval() {
    let mut timer = TimerAccumulator::new(Duration::from_millis(1000));
    assert_eq!(timer.catch_up(Duration::from_millis(1054), || ()), 0);
    assert_eq!(timer.catch_up(Duration::from_millis(1055), || ()), 1);
    assert_eq!(timer.last_fire(), Duration::from_nanos(1_054_945_055));
}

#[test]
fn interrupt_is_not_early_by_a_nanosecond() {
    // One interval is 54_945_054.945... ns.
    let mut timer = TimerAccumulator::new(Duration::ZERO);
    assert_eq!(timer.catch_up(Duration::from_nanos(54_945_054), || ()), 0);
    assert_eq!(timer.catch_up(Duration::from_nanos(54_945_055), || ()), 1);
    // Two intervals are 109_890_109.89... ns.
    assert_eq!(timer.catch_up(Duration::from_nanos(109_890_109), || ()), 0);
    assert_eq!(timer.catch_up(Duration::from_nanos(109_890_110), || ()), 1);
    assert_eq!(expected_interrupts(Duration::from_nanos(109_890_109)), 1);
    assert_eq!(expected_interrupts(Duration::from_nanos(109_890_110)), 2);
}

#[test]
fn backlog_is_delivered_one_interval_at_a_time() {
    let mut timer = TimerAccumulator::new(Duration::ZERO);
    let mut seen: Vec<Duration> = Vec::new();
    let now = Duration::from_millis(300);
    let mut last = timer.last_fire();
    let count = timer.catch_up(now, || ());
    assert_eq!(count, 5);
    for n in 1..=count {
        let t = timer.fire_time(n);
        assert!(t > last);
        let step = t - last;
        assert!(step == Duration::from_nanos(54_945_054) || step == TICK_INTERVAL);
        seen.push(t);
        last = t;
    }
    assert_eq!(seen.last().copied(), Some(timer.last_fire()));
}

#[test]
fn time_to_next_saturates_when_overdue() {
    let timer = TimerAccumulator::new(Duration::ZERO);
    assert_eq!(
        timer.time_to_next(Duration::from_millis(30)),
        Duration::from_nanos(24_945_055)
    );
    assert_eq!(timer.time_to_next(Duration::from_millis(60)), Duration::ZERO);
}

#[cfg(test)]
mod proptests {
    use std::time::Duration;

    use test_strategy::proptest;

    use super::{expected_interrupts, TimerAccumulator};

    #[proptest]
    fn interrupt_count_matches_elapsed_time(
        #[strategy(0..5_000_000_000u64)] origin_ns: u64,
        #[strategy(proptest::collection::vec(0..200_000_000u64, 0..64))] gaps_ns: Vec<u64>,
    ) {
        let origin = Duration::from_nanos(origin_ns);
        let mut timer = TimerAccumulator::new(origin);
        let mut now = origin;
        let mut delivered: u64 = 0;
        for gap in gaps_ns {
            now += Duration::from_nanos(gap);
            let before = timer.last_fire();
            delivered += timer.catch_up(now, || ());
            assert!(timer.last_fire() >= before);
            assert!(timer.last_fire() <= now);
        }
        assert_eq!(delivered, timer.fired());
        assert_eq!(delivered, expected_interrupts(now - origin));
    }
}
