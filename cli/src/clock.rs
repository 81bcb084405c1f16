//! Host clocks for the soak runner.
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use pacer::{HostClock, ManualClock};
use tracing::{event, Level};

const DAY_NS: u128 = 86_400 * 1_000_000_000;

/// WallClock reads real time from [`Instant`].  Copies share the same
/// epoch.
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    origin: Instant,
}

impl WallClock {
    pub fn new() -> WallClock {
        WallClock {
            origin: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Time since midnight UTC.
fn time_of_day_utc() -> Duration {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(since_epoch) => {
            let ns = since_epoch.as_nanos() % DAY_NS;
            Duration::from_nanos(u64::try_from(ns).unwrap_or(0))
        }
        Err(_) => {
            event!(
                Level::WARN,
                "system time is before the Unix epoch, starting the day at midnight"
            );
            Duration::ZERO
        }
    }
}

impl HostClock for WallClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn time_of_day(&self) -> Duration {
        time_of_day_utc()
    }
}

/// SoakClock is either real time, or simulated time which only moves
/// when the event loop (or the synthetic machine) moves it.  Clones
/// share the same time.
#[derive(Debug, Clone)]
pub enum SoakClock {
    Real(WallClock),
    Simulated(ManualClock),
}

impl SoakClock {
    pub fn real() -> SoakClock {
        SoakClock::Real(WallClock::new())
    }

    pub fn simulated() -> SoakClock {
        SoakClock::Simulated(ManualClock::new(Duration::ZERO).with_midnight_offset(time_of_day_utc()))
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self, SoakClock::Simulated(_))
    }

    /// Lets `interval` pass.  Real time has to be waited out;
    /// simulated time just moves on.
    pub fn pass(&self, interval: Duration) {
        match self {
            SoakClock::Real(_) => spin_sleep::sleep(interval),
            SoakClock::Simulated(clock) => clock.advance(interval),
        }
    }

    /// Waits until `when`, if it is still in the future.
    pub fn wait_until(&self, when: Duration) {
        let now = self.now();
        if when > now {
            self.pass(when - now);
        }
    }
}

impl HostClock for SoakClock {
    fn now(&self) -> Duration {
        match self {
            SoakClock::Real(clock) => clock.now(),
            SoakClock::Simulated(clock) => clock.now(),
        }
    }

    fn time_of_day(&self) -> Duration {
        match self {
            SoakClock::Real(clock) => clock.time_of_day(),
            SoakClock::Simulated(clock) => clock.time_of_day(),
        }
    }
}

#[test]
fn simulated_clock_moves_only_when_told() {
    let clock = SoakClock::simulated();
    let view = clock.clone();
    assert_eq!(view.now(), Duration::ZERO);
    clock.wait_until(Duration::from_millis(40));
    assert_eq!(view.now(), Duration::from_millis(40));
    clock.wait_until(Duration::from_millis(10));
    assert_eq!(view.now(), Duration::from_millis(40));
}

#[test]
fn time_of_day_is_within_a_day() {
    assert!(WallClock::new().time_of_day() < Duration::from_secs(86_400));
}
