//! Wall-clock time as seen by the pacing core.
//!
//! The scheduler never reads any clock other than the one it is
//! given.  In the browser that is `performance.now()`, natively it is
//! an [`std::time::Instant`], and in tests (and in the simulated mode
//! of the soak runner) it is a [`ManualClock`] which only moves when
//! it is told to.
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use tracing::{event, Level};

/// HostClock is the host's idea of real (wall-clock) time.
pub trait HostClock {
    /// Retrieves the current time, measured from an arbitrary epoch
    /// which is fixed for the lifetime of the clock.
    fn now(&self) -> Duration;

    /// Retrieves the time elapsed since local midnight.  This seeds
    /// the time-of-day counter of the virtual machine.
    fn time_of_day(&self) -> Duration;
}

/// MonotonicClock wraps a [`HostClock`] and refuses to let time run
/// backwards.
///
/// Browsers and operating systems occasionally report a time earlier
/// than one they reported before.  When that happens we keep
/// reporting the latest time we have already handed out until the
/// host clock catches up again.  That keeps the virtual timer
/// interrupts in order and stops them from being delivered twice.
#[derive(Debug)]
pub struct MonotonicClock<C> {
    inner: C,
    latest: Option<Duration>,
}

impl<C: HostClock> MonotonicClock<C> {
    pub fn new(inner: C) -> MonotonicClock<C> {
        MonotonicClock {
            inner,
            latest: None,
        }
    }

    pub fn read(&mut self) -> Duration {
        let reading = self.inner.now();
        match self.latest {
            Some(latest) if reading < latest => {
                event!(
                    Level::WARN,
                    "host clock went backward by {:?}, holding time at {:?}",
                    latest - reading,
                    latest
                );
                latest
            }
            _ => {
                self.latest = Some(reading);
                reading
            }
        }
    }

    pub fn time_of_day(&self) -> Duration {
        self.inner.time_of_day()
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

/// ManualClock provides a host clock which is advanced explicitly.
///
/// Clones share the same underlying time, so a test (or a simulated
/// virtual machine) can hold one copy and advance it while the
/// scheduler reads another.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use pacer::{HostClock, ManualClock};
/// let clk = ManualClock::new(Duration::from_millis(100));
/// let view = clk.clone();
/// clk.advance(Duration::from_millis(5));
/// assert_eq!(view.now(), Duration::from_millis(105));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
    midnight_offset: Duration,
}

impl ManualClock {
    pub fn new(start: Duration) -> ManualClock {
        ManualClock {
            now: Rc::new(Cell::new(start)),
            midnight_offset: Duration::ZERO,
        }
    }

    /// Makes [`HostClock::time_of_day`] report `offset` plus the
    /// current time.
    #[must_use]
    pub fn with_midnight_offset(mut self, offset: Duration) -> ManualClock {
        self.midnight_offset = offset;
        self
    }

    pub fn advance(&self, interval: Duration) {
        self.now.set(self.now.get() + interval);
    }

    pub fn set(&self, when: Duration) {
        self.now.set(when);
    }
}

impl HostClock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn time_of_day(&self) -> Duration {
        self.midnight_offset + self.now.get()
    }
}

#[test]
fn backward_reading_is_clamped() {
    let clk = ManualClock::new(Duration::from_millis(500));
    let mut mono = MonotonicClock::new(clk.clone());
    assert_eq!(mono.read(), Duration::from_millis(500));
    clk.set(Duration::from_millis(450));
    assert_eq!(mono.read(), Duration::from_millis(500));
    clk.set(Duration::from_millis(520));
    assert_eq!(mono.read(), Duration::from_millis(520));
}

#[test]
fn stalled_clock_is_not_an_error() {
    let clk = ManualClock::new(Duration::from_millis(7));
    let mut mono = MonotonicClock::new(clk);
    assert_eq!(mono.read(), mono.read());
}
