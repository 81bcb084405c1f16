//! A native stand-in for the browser's event loop.
//!
//! The browser gives the scheduler two ways to be called back: a
//! message or timeout (for continuations) and an animation frame
//! callback (for drawing).  Here both are entries in a queue ordered
//! by due time.  Frame callbacks fall due on the boundaries of a
//! fixed refresh interval, as a display's vertical blank would.
use std::time::Duration;

use pacer::{
    Continuation, ContinuationToken, FrameToken, HostClock, Next, Schedule, TickScheduler,
    VirtualMachine,
};
use tracing::{event, Level};

use super::clock::SoakClock;
use super::pq::DueQueue;

/// In simulated time a continuation taken "immediately" would
/// otherwise take no time at all.
pub const SIMULATED_DISPATCH_LATENCY: Duration = Duration::from_micros(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Channel {
    Continuation,
    Frame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finish {
    Halted,
    Stopped,
    /// The run lasted as long as it was asked to.
    Deadline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub finish: Finish,
    pub elapsed: Duration,
}

pub struct EventLoop {
    clock: SoakClock,
    refresh: Duration,
    queue: DueQueue<Channel>,
    continuation: Option<ContinuationToken>,
    frame: Option<FrameToken>,
    finished: Option<Finish>,
}

impl EventLoop {
    pub fn new(clock: SoakClock, refresh: Duration) -> EventLoop {
        EventLoop {
            clock,
            refresh,
            queue: DueQueue::new(),
            continuation: None,
            frame: None,
            finished: None,
        }
    }

    fn next_refresh(&self, now: Duration) -> Duration {
        let refresh_ns = self.refresh.as_nanos().max(1);
        let frames = now.as_nanos() / refresh_ns + 1;
        Duration::from_nanos(u64::try_from(frames * refresh_ns).unwrap_or(u64::MAX))
    }

    fn arm(&mut self, schedule: Option<Schedule>) {
        let Some(schedule) = schedule else {
            return;
        };
        let now = self.clock.now();
        match schedule.next {
            Next::Continue(continuation) => {
                let delay = match continuation {
                    Continuation::Immediate(_) if self.clock.is_simulated() => {
                        SIMULATED_DISPATCH_LATENCY
                    }
                    Continuation::Immediate(_) => Duration::ZERO,
                    Continuation::Deferred { after, .. } => after,
                };
                self.continuation = Some(continuation.token());
                self.queue.schedule(Channel::Continuation, now + delay);
            }
            Next::Halted => self.finished = Some(Finish::Halted),
            Next::Stopped => self.finished = Some(Finish::Stopped),
        }
        if let Some(frame) = schedule.frame {
            self.frame = Some(frame);
            self.queue.schedule(Channel::Frame, self.next_refresh(now));
        }
    }

    /// Runs `scheduler` until it halts or stops, or until `duration`
    /// has passed.
    pub fn run<M: VirtualMachine, C: HostClock>(
        &mut self,
        scheduler: &mut TickScheduler<M, C>,
        duration: Duration,
    ) -> Outcome {
        let started = self.clock.now();
        let deadline = started + duration;
        let schedule = scheduler.start();
        self.arm(schedule);
        while self.finished.is_none() {
            if self.queue.is_empty() {
                event!(Level::WARN, "nothing left to run");
                self.finished = Some(Finish::Stopped);
                break;
            }
            if self.queue.next_due().is_some_and(|due| due > deadline) {
                event!(Level::INFO, "run time of {duration:?} is up");
                self.clock.wait_until(deadline);
                scheduler.stop();
                self.finished = Some(Finish::Deadline);
                break;
            }
            let Some((channel, due)) = self.queue.pop() else {
                break;
            };
            self.clock.wait_until(due);
            match channel {
                Channel::Continuation => {
                    if let Some(token) = self.continuation.take() {
                        let schedule = scheduler.resume(token);
                        self.arm(schedule);
                    }
                }
                Channel::Frame => {
                    if let Some(token) = self.frame.take() {
                        scheduler.present(token, &[]);
                    }
                }
            }
        }
        let finish = self.finished.unwrap_or(Finish::Stopped);
        event!(
            Level::DEBUG,
            "event loop finished: {finish:?}, {} callbacks outstanding",
            self.queue.len()
        );
        Outcome {
            finish,
            elapsed: self.clock.now().saturating_sub(started),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pacer::{Config, Mute, RenderSink, TickScheduler};

    use super::*;
    use crate::synthetic::{SyntheticMachine, Workload};

    struct Blank;

    impl RenderSink for Blank {
        fn render(&mut self, _display_memory: &[u8], _video_mode: u8, _now: Duration) {}
        fn set_charset(&mut self, _width: u32, _height: u32, _glyphs: &[u8]) {}
        fn set_palette(&mut self, _colours: &[u32]) {}
        fn show_error(&mut self, _message: &str) {}
    }

    fn scheduler(
        clock: &SoakClock,
        halt_after: Option<u64>,
    ) -> TickScheduler<SyntheticMachine, SoakClock> {
        let workload = Workload {
            opcode_cost: Duration::from_nanos(100),
            work_per_interrupt: 20_000,
            halt_after,
            preliminary_programs: 0,
        };
        let keymap: HashMap<&'static str, u8> = HashMap::new();
        TickScheduler::new(
            SyntheticMachine::new(workload, clock.clone()),
            Box::new(Blank),
            Box::new(Mute),
            clock.clone(),
            Box::new(keymap),
            &Config::default(),
        )
    }

    #[test]
    fn simulated_run_keeps_time() {
        let clock = SoakClock::simulated();
        let mut scheduler = scheduler(&clock, None);
        let mut event_loop = EventLoop::new(clock, Duration::from_nanos(16_666_667));
        let outcome = event_loop.run(&mut scheduler, Duration::from_secs(5));
        assert_eq!(outcome.finish, Finish::Deadline);
        assert!(outcome.elapsed >= Duration::from_secs(5));
        assert!(outcome.elapsed < Duration::from_millis(5100));
        let stats = scheduler.session().stats();
        assert!((90..=91).contains(&stats.interrupts), "{stats:?}");
        assert!(stats.deferred_continuations >= 85, "{stats:?}");
        // The machine only asks for a frame while it is busy, which
        // is after each interrupt.
        assert!(stats.frames_presented >= 85, "{stats:?}");
    }

    #[test]
    fn run_ends_when_the_machine_halts() {
        let clock = SoakClock::simulated();
        let mut scheduler = scheduler(&clock, Some(10));
        let mut event_loop = EventLoop::new(clock, Duration::from_millis(20));
        let outcome = event_loop.run(&mut scheduler, Duration::from_secs(60));
        assert_eq!(outcome.finish, Finish::Halted);
        assert!(outcome.elapsed < Duration::from_secs(1));
        assert_eq!(scheduler.session().stats().interrupts, 10);
    }
}
