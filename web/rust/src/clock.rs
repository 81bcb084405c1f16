//! The browser's clocks, and conversions between the millisecond
//! floating-point times the browser uses and [`Duration`].
use std::time::Duration;

use pacer::HostClock;
use web_sys::Performance;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Converts a browser timestamp (in milliseconds) to a [`Duration`].
/// Negative or non-finite times become zero.
pub(crate) fn duration_from_millis(millis: f64) -> Duration {
    Duration::try_from_secs_f64(millis / 1000.0).unwrap_or(Duration::ZERO)
}

/// The number of milliseconds to pass to `setTimeout` so that the
/// callback runs no earlier than `interval` from now.
pub(crate) fn timeout_millis(interval: Duration) -> i32 {
    let millis = interval.as_nanos().div_ceil(1_000_000);
    i32::try_from(millis).unwrap_or(i32::MAX)
}

/// `interval` as a whole number of milliseconds.
pub(crate) fn whole_millis(interval: Duration) -> f64 {
    u32::try_from(interval.as_millis())
        .map(f64::from)
        .unwrap_or(MILLIS_PER_DAY)
}

/// Reads `performance.now()`, and the time of day from `Date.now()`.
pub(crate) struct BrowserClock {
    performance: Performance,
}

impl BrowserClock {
    pub(crate) fn new(performance: Performance) -> BrowserClock {
        BrowserClock { performance }
    }
}

impl HostClock for BrowserClock {
    fn now(&self) -> Duration {
        duration_from_millis(self.performance.now())
    }

    fn time_of_day(&self) -> Duration {
        duration_from_millis(js_sys::Date::now() % MILLIS_PER_DAY)
    }
}

#[test]
fn timeouts_round_up() {
    assert_eq!(timeout_millis(Duration::from_millis(20)), 20);
    assert_eq!(timeout_millis(Duration::from_micros(19_999)), 20);
    assert_eq!(timeout_millis(Duration::from_micros(1_001)), 2);
    assert_eq!(timeout_millis(Duration::ZERO), 0);
}

#[test]
fn bad_browser_times_become_zero() {
    assert_eq!(duration_from_millis(-3.0), Duration::ZERO);
    assert_eq!(duration_from_millis(f64::NAN), Duration::ZERO);
    assert_eq!(duration_from_millis(1500.0), Duration::from_millis(1500));
}

#[test]
fn whole_millis_truncates() {
    assert_eq!(whole_millis(Duration::from_micros(3_600_250_900)), 3_600_250.0);
}
