//! The real-time tick scheduler.
//!
//! The host runtime is cooperative and single-threaded, and we must
//! never block it.  So the emulation runs in short quanta.  After
//! each quantum the scheduler tells the host when to call it again
//! (straight away, or after a delay when the virtual machine is idle
//! until its next timer interrupt) and whether a frame should be
//! drawn.  The host calls back with the token it was given; any other
//! token is stale and is ignored, so there is never more than one
//! continuation live at a time.
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use tracing::{event, span, Level};

use super::budget::OpcodeBudget;
use super::clock::{HostClock, MonotonicClock};
use super::config::Config;
use super::error::EmulationHalt;
use super::input::{
    GamepadSnapshot, HostInputEvent, InputBridge, InputKinds, InputResponse, KeyMap, SurfaceId,
};
use super::machine::{ExecutionResult, OutputEvent, VirtualMachine};
use super::present::{FramePresenter, FrameToken};
use super::sinks::{AudioSink, RenderSink};
use super::startup::Launched;
use super::timer::TimerAccumulator;

/// A virtual machine which yields with less than this long to wait
/// for its timer is resumed immediately.
pub const MIN_DEFERRAL: Duration = Duration::from_millis(1);

/// Identifies the continuation the host should invoke next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContinuationToken(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Call back as soon as possible, after letting the host process
    /// any other pending events.
    Immediate(ContinuationToken),
    /// Call back once `after` has elapsed.
    Deferred {
        token: ContinuationToken,
        after: Duration,
    },
}

impl Continuation {
    pub fn token(&self) -> ContinuationToken {
        match self {
            Continuation::Immediate(token) | Continuation::Deferred { token, .. } => *token,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Continue(Continuation),
    /// The virtual machine halted.  Nothing more will run.
    Halted,
    /// The session was stopped.  Nothing more will run.
    Stopped,
}

/// What the host must do after a quantum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub next: Next,
    /// When set, the host must register a frame callback and pass
    /// this token to [`TickScheduler::present`].
    pub frame: Option<FrameToken>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Loaded but not yet started.
    Ready,
    Running,
    Halted,
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub quanta: u64,
    pub interrupts: u64,
    pub frames_presented: u64,
    pub immediate_continuations: u64,
    pub deferred_continuations: u64,
}

/// Requests a running session to stop.  Clones share the request;
/// the scheduler notices it when the current quantum ends, or at the
/// next resume.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Rc<Cell<bool>>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.set(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.get()
    }
}

/// The state of a live emulation.
#[derive(Debug)]
pub struct Session {
    budget: OpcodeBudget,
    cached_wall_clock: Duration,
    timer: TimerAccumulator,
    presenter: FramePresenter,
    mouse_sensitivity: f64,
    pending: Option<ContinuationToken>,
    tokens_issued: u64,
    state: SessionState,
    host_focused: bool,
    stats: SessionStats,
    launched: Vec<Launched>,
}

impl Session {
    fn new(config: &Config, now: Duration) -> Session {
        Session {
            budget: OpcodeBudget::new(config.initial_opcodes),
            cached_wall_clock: now,
            timer: TimerAccumulator::new(now),
            presenter: FramePresenter::new(),
            mouse_sensitivity: config.effective_mouse_sensitivity(),
            pending: None,
            tokens_issued: 0,
            state: SessionState::Ready,
            host_focused: true,
            stats: SessionStats::default(),
            launched: Vec::new(),
        }
    }

    pub fn budget(&self) -> &OpcodeBudget {
        &self.budget
    }

    /// The wall-clock time read at the start of the latest quantum.
    pub fn cached_wall_clock(&self) -> Duration {
        self.cached_wall_clock
    }

    pub fn last_timer_fire(&self) -> Duration {
        self.timer.last_fire()
    }

    pub fn timer(&self) -> &TimerAccumulator {
        &self.timer
    }

    pub fn frame_queued(&self) -> bool {
        self.presenter.is_queued()
    }

    pub fn mouse_sensitivity(&self) -> f64 {
        self.mouse_sensitivity
    }

    pub fn pending(&self) -> Option<ContinuationToken> {
        self.pending
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn host_focused(&self) -> bool {
        self.host_focused
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// The programs loaded at startup, the last being the one which
    /// is running now.
    pub fn launched(&self) -> &[Launched] {
        &self.launched
    }

    fn issue(&mut self) -> ContinuationToken {
        self.tokens_issued += 1;
        let token = ContinuationToken(self.tokens_issued);
        self.pending = Some(token);
        token
    }
}

pub struct TickScheduler<M: VirtualMachine, C: HostClock> {
    session: Session,
    machine: M,
    clock: MonotonicClock<C>,
    input: InputBridge,
    render: Box<dyn RenderSink>,
    audio: Box<dyn AudioSink>,
    stop: StopHandle,
}

impl<M: VirtualMachine, C: HostClock> TickScheduler<M, C> {
    pub fn new(
        machine: M,
        render: Box<dyn RenderSink>,
        audio: Box<dyn AudioSink>,
        clock: C,
        keymap: Box<dyn KeyMap>,
        config: &Config,
    ) -> TickScheduler<M, C> {
        let mut clock = MonotonicClock::new(clock);
        let now = clock.read();
        TickScheduler {
            session: Session::new(config, now),
            machine,
            clock,
            input: InputBridge::new(keymap),
            render,
            audio,
            stop: StopHandle::default(),
        }
    }

    pub(crate) fn set_launched(&mut self, launched: Vec<Launched>) {
        self.session.launched = launched;
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn machine(&self) -> &M {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut M {
        &mut self.machine
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Runs the first quantum.  The virtual timer starts counting
    /// from now.
    pub fn start(&mut self) -> Option<Schedule> {
        if self.session.state != SessionState::Ready {
            event!(
                Level::WARN,
                "start() called on a session which is {:?}",
                self.session.state
            );
            return None;
        }
        if self.stop.is_stopped() {
            return Some(self.finish_stopped());
        }
        let now = self.clock.read();
        self.session.timer.reset(now);
        self.session.cached_wall_clock = now;
        self.session.state = SessionState::Running;
        event!(Level::INFO, "emulation started");
        Some(self.run_quantum_unless_stopped())
    }

    /// The host's continuation callback.  Runs one quantum if `token`
    /// is the pending continuation; otherwise does nothing and
    /// returns `None`.
    pub fn resume(&mut self, token: ContinuationToken) -> Option<Schedule> {
        match self.session.state {
            SessionState::Running => (),
            SessionState::Ready => {
                event!(Level::WARN, "resume({token:?}) before start()");
                return None;
            }
            SessionState::Halted | SessionState::Stopped => {
                event!(
                    Level::DEBUG,
                    "ignoring resume({token:?}), emulation is {:?}",
                    self.session.state
                );
                return None;
            }
        }
        if self.session.pending != Some(token) {
            event!(
                Level::WARN,
                "ignoring stale continuation {token:?}; pending is {:?}",
                self.session.pending
            );
            return None;
        }
        self.session.pending = None;
        if self.stop.is_stopped() {
            return Some(self.finish_stopped());
        }
        Some(self.run_quantum_unless_stopped())
    }

    /// Stops the session.  No further quanta will run.
    pub fn stop(&mut self) {
        self.stop.stop();
        if matches!(
            self.session.state,
            SessionState::Ready | SessionState::Running
        ) {
            self.finish_stopped();
        }
    }

    fn finish_stopped(&mut self) -> Schedule {
        event!(Level::INFO, "emulation stopped on request");
        self.session.state = SessionState::Stopped;
        self.session.pending = None;
        Schedule {
            next: Next::Stopped,
            frame: None,
        }
    }

    /// A stop requested while the machine was executing cancels the
    /// continuation the quantum asked for.
    fn run_quantum_unless_stopped(&mut self) -> Schedule {
        let schedule = self.run_quantum();
        match schedule.next {
            Next::Continue(_) if self.stop.is_stopped() => self.finish_stopped(),
            _ => schedule,
        }
    }

    fn run_quantum(&mut self) -> Schedule {
        let span = span!(Level::TRACE, "quantum", n = self.session.stats.quanta);
        let _enter = span.enter();

        let now = self.clock.read();
        self.session.cached_wall_clock = now;
        self.machine.observe_wall_clock(now);

        let machine = &mut self.machine;
        let fired = self
            .session
            .timer
            .catch_up(now, || machine.signal_timer_interrupt());
        if fired > 1 {
            event!(
                Level::DEBUG,
                "delivered a backlog of {fired} timer interrupts"
            );
        }
        self.session.stats.interrupts += fired;

        let result = self.machine.execute(self.session.budget.opcodes());
        let end = self.clock.read();
        let duration = end.saturating_sub(now);
        self.session.stats.quanta += 1;
        self.forward_output();

        if result == ExecutionResult::Halted {
            return self.halt();
        }

        self.session.budget.adjust(duration, result);
        let frame = self.session.presenter.request();

        let wait = self.session.timer.time_to_next(end);
        let continuation = if result == ExecutionResult::VoluntaryYield && wait > MIN_DEFERRAL {
            self.session.stats.deferred_continuations += 1;
            Continuation::Deferred {
                token: self.session.issue(),
                after: wait,
            }
        } else {
            self.session.stats.immediate_continuations += 1;
            Continuation::Immediate(self.session.issue())
        };
        Schedule {
            next: Next::Continue(continuation),
            frame,
        }
    }

    fn halt(&mut self) -> Schedule {
        event!(
            Level::ERROR,
            "virtual machine halted after {} quanta",
            self.session.stats.quanta
        );
        self.session.state = SessionState::Halted;
        self.session.pending = None;
        self.render.show_error(EmulationHalt::MESSAGE);
        Schedule {
            next: Next::Halted,
            frame: None,
        }
    }

    fn forward_output(&mut self) {
        for output in self.machine.drain_output() {
            match output {
                OutputEvent::SpeakerOn { frequency } if self.session.host_focused => {
                    self.audio.speaker_on(frequency);
                }
                OutputEvent::SpeakerOn { .. } => {
                    event!(Level::TRACE, "host is not focused, keeping the speaker off");
                    self.audio.speaker_off();
                }
                OutputEvent::SpeakerOff => self.audio.speaker_off(),
                OutputEvent::Charset {
                    width,
                    height,
                    glyphs,
                } => self.render.set_charset(width, height, &glyphs),
                OutputEvent::Palette { colours } => self.render.set_palette(&colours),
            }
        }
    }

    /// The host's frame callback.  Polls `gamepads`, then draws the
    /// virtual machine's screen.  Returns whether anything was drawn.
    pub fn present(&mut self, token: FrameToken, gamepads: &[GamepadSnapshot]) -> bool {
        if self.session.state != SessionState::Running {
            event!(
                Level::DEBUG,
                "discarding frame {token:?}, emulation is {:?}",
                self.session.state
            );
            self.session.presenter.discard(token);
            return false;
        }
        if self.session.presenter.is_outstanding(token) {
            self.input.poll_gamepads(gamepads, &mut self.machine);
        }
        let now = self.session.cached_wall_clock;
        let drawn = self
            .session
            .presenter
            .present(token, &mut self.machine, &mut *self.render, now);
        if drawn {
            self.session.stats.frames_presented += 1;
        }
        drawn
    }

    pub fn handle_input(&mut self, event: &HostInputEvent) -> InputResponse {
        match self.session.state {
            SessionState::Halted | SessionState::Stopped => InputResponse::NotRouted,
            SessionState::Ready | SessionState::Running => {
                self.input
                    .handle(event, self.session.mouse_sensitivity, &mut self.machine)
            }
        }
    }

    pub fn route_surface(&mut self, surface: SurfaceId, kinds: InputKinds) {
        self.input.route(surface, kinds);
    }

    pub fn unroute_surface(&mut self, surface: SurfaceId) {
        self.input.unroute(surface);
    }

    /// Tells the scheduler whether the host surface holds input
    /// focus.  The speaker only sounds while it does.
    pub fn set_host_focus(&mut self, focused: bool) {
        self.session.host_focused = focused;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::devices::KeyEdge;
    use crate::input::HostInput;
    use crate::testing::{FakeMachine, RecordingAudio, RecordingRender};

    const SCREEN: SurfaceId = SurfaceId(7);

    struct Rig {
        clock: ManualClock,
        render: RecordingRender,
        audio: RecordingAudio,
        scheduler: TickScheduler<FakeMachine, ManualClock>,
    }

    fn rig(config: Config) -> Rig {
        let clock = ManualClock::new(Duration::ZERO);
        let render = RecordingRender::default();
        let audio = RecordingAudio::default();
        let keymap: HashMap<&'static str, u8> = [("a", 0x1e)].into_iter().collect();
        let mut scheduler = TickScheduler::new(
            FakeMachine::with_clock(clock.clone()),
            Box::new(render.clone()),
            Box::new(audio.clone()),
            clock.clone(),
            Box::new(keymap),
            &config,
        );
        scheduler.route_surface(SCREEN, InputKinds::ALL);
        Rig {
            clock,
            render,
            audio,
            scheduler,
        }
    }

    fn continuation(schedule: Option<Schedule>) -> Continuation {
        match schedule {
            Some(Schedule {
                next: Next::Continue(c),
                ..
            }) => c,
            other => panic!("expected a continuation, got {other:?}"),
        }
    }

    #[test]
    fn late_resume_delivers_the_backlog() {
        let mut rig = rig(Config::default());
        let first = continuation(rig.scheduler.start());
        assert_eq!(rig.scheduler.machine().interrupts, 0);
        rig.clock.set(Duration::from_millis(200));
        continuation(rig.scheduler.resume(first.token()));
        assert_eq!(rig.scheduler.machine().interrupts, 3);
        assert_eq!(rig.scheduler.session().stats().interrupts, 3);
        assert_eq!(
            rig.scheduler.session().last_timer_fire(),
            rig.scheduler.session().timer().fire_time(3)
        );
    }

    #[test]
    fn budget_follows_quantum_cost() {
        let mut rig = rig(Config::default());
        let ms = Duration::from_millis;
        let vm = rig.scheduler.machine_mut();
        vm.script(ms(4), ExecutionResult::BudgetExhausted);
        vm.script(ms(4), ExecutionResult::BudgetExhausted);
        vm.script(ms(12), ExecutionResult::BudgetExhausted);
        vm.script(ms(7), ExecutionResult::BudgetExhausted);
        let mut c = continuation(rig.scheduler.start());
        for _ in 0..3 {
            c = continuation(rig.scheduler.resume(c.token()));
        }
        assert_eq!(rig.scheduler.machine().budgets, vec![1000, 1052, 1108, 1052]);
    }

    #[test]
    fn frames_are_coalesced() {
        let mut rig = rig(Config::default());
        let first = rig.scheduler.start().expect("session is ready");
        let frame = first.frame.expect("no frame was outstanding");
        assert!(rig.scheduler.session().frame_queued());
        let mut c = continuation(Some(first));
        for _ in 0..5 {
            let schedule = rig.scheduler.resume(c.token()).expect("token is pending");
            assert_eq!(schedule.frame, None);
            c = continuation(Some(schedule));
        }
        assert!(rig.scheduler.present(frame, &[]));
        assert!(!rig.scheduler.session().frame_queued());
        assert!(!rig.scheduler.present(frame, &[]));
        assert_eq!(rig.render.log().frames.len(), 1);
        assert_eq!(rig.scheduler.machine().frames_marked, 1);

        let next = rig.scheduler.resume(c.token()).expect("token is pending");
        assert!(next.frame.is_some());
    }

    #[test]
    fn idle_machine_is_resumed_at_its_next_interrupt() {
        let mut rig = rig(Config::default());
        let first = continuation(rig.scheduler.start());
        assert!(matches!(first, Continuation::Immediate(_)));
        rig.clock.set(Duration::from_millis(30));
        rig.scheduler
            .machine_mut()
            .script(Duration::from_nanos(4_945_055), ExecutionResult::VoluntaryYield);
        let second = continuation(rig.scheduler.resume(first.token()));
        match second {
            Continuation::Deferred { after, .. } => assert_eq!(after, Duration::from_millis(20)),
            other => panic!("expected a deferred continuation, got {other:?}"),
        }
        assert_eq!(rig.scheduler.session().stats().deferred_continuations, 1);
    }

    #[test]
    fn yield_close_to_the_interrupt_continues_immediately() {
        let mut rig = rig(Config::default());
        let first = continuation(rig.scheduler.start());
        rig.clock.set(Duration::from_millis(54));
        rig.scheduler
            .machine_mut()
            .script(Duration::from_micros(100), ExecutionResult::VoluntaryYield);
        let second = continuation(rig.scheduler.resume(first.token()));
        assert!(matches!(second, Continuation::Immediate(_)));
    }

    #[test]
    fn blocked_machine_continues_immediately() {
        let mut rig = rig(Config::default());
        rig.scheduler
            .machine_mut()
            .script(Duration::from_millis(1), ExecutionResult::Blocked);
        let first = continuation(rig.scheduler.start());
        assert!(matches!(first, Continuation::Immediate(_)));
        assert_eq!(rig.scheduler.session().budget().opcodes(), 1000);
    }

    #[test]
    fn halt_ends_the_session() {
        let mut rig = rig(Config::default());
        rig.scheduler
            .machine_mut()
            .script(Duration::ZERO, ExecutionResult::BudgetExhausted);
        rig.scheduler
            .machine_mut()
            .script(Duration::ZERO, ExecutionResult::Halted);
        let first = rig.scheduler.start().expect("session is ready");
        let frame = first.frame.expect("no frame was outstanding");
        let c = continuation(Some(first));
        let halted = rig.scheduler.resume(c.token()).expect("token is pending");
        assert_eq!(
            halted,
            Schedule {
                next: Next::Halted,
                frame: None
            }
        );
        assert_eq!(rig.scheduler.session().state(), SessionState::Halted);
        assert_eq!(rig.render.log().errors, vec!["Emulation stopped.".to_string()]);
        assert_eq!(rig.scheduler.resume(c.token()), None);
        assert!(!rig.scheduler.present(frame, &[]));
        assert!(rig.render.log().frames.is_empty());
        assert_eq!(rig.scheduler.machine().budgets.len(), 2);
    }

    #[test]
    fn stop_request_is_seen_at_the_next_resume() {
        let mut rig = rig(Config::default());
        let stop = rig.scheduler.stop_handle();
        let first = continuation(rig.scheduler.start());
        stop.stop();
        assert_eq!(
            rig.scheduler.resume(first.token()).map(|s| s.next),
            Some(Next::Stopped)
        );
        assert_eq!(rig.scheduler.session().pending(), None);
        assert_eq!(rig.scheduler.resume(first.token()), None);
        assert_eq!(rig.scheduler.machine().budgets.len(), 1);
    }

    #[test]
    fn stop_during_a_quantum_cancels_its_continuation() {
        let mut rig = rig(Config::default());
        rig.scheduler.machine_mut().stop_during_execute = Some(rig.scheduler.stop_handle());
        let schedule = rig.scheduler.start().expect("the session was ready");
        assert_eq!(schedule.next, Next::Stopped);
        assert_eq!(schedule.frame, None);
        assert_eq!(rig.scheduler.session().state(), SessionState::Stopped);
        assert_eq!(rig.scheduler.session().pending(), None);
        assert_eq!(rig.scheduler.machine().budgets.len(), 1);
    }

    #[test]
    fn stopping_directly_clears_the_pending_continuation() {
        let mut rig = rig(Config::default());
        let first = continuation(rig.scheduler.start());
        rig.scheduler.stop();
        assert_eq!(rig.scheduler.session().state(), SessionState::Stopped);
        assert_eq!(rig.scheduler.resume(first.token()), None);
        assert_eq!(rig.scheduler.start(), None);
    }

    #[test]
    fn stale_tokens_are_ignored() {
        let mut rig = rig(Config::default());
        let first = continuation(rig.scheduler.start());
        let second = continuation(rig.scheduler.resume(first.token()));
        assert_eq!(rig.scheduler.resume(first.token()), None);
        assert_eq!(rig.scheduler.session().pending(), Some(second.token()));
        assert_eq!(rig.scheduler.machine().budgets.len(), 2);
        assert_eq!(rig.scheduler.start(), None);
    }

    #[test]
    fn resume_before_start_runs_nothing() {
        let mut rig = rig(Config::default());
        assert_eq!(rig.scheduler.resume(ContinuationToken(1)), None);
        assert_eq!(rig.scheduler.session().state(), SessionState::Ready);
        assert!(rig.scheduler.machine().budgets.is_empty());
    }

    #[test]
    fn speaker_only_sounds_while_focused() {
        let mut rig = rig(Config::default());
        rig.scheduler
            .machine_mut()
            .output
            .push(OutputEvent::SpeakerOn { frequency: 440.0 });
        let first = continuation(rig.scheduler.start());
        rig.scheduler.set_host_focus(false);
        rig.scheduler
            .machine_mut()
            .output
            .push(OutputEvent::SpeakerOn { frequency: 220.0 });
        continuation(rig.scheduler.resume(first.token()));
        assert_eq!(rig.audio.calls(), vec![Some(440.0), None]);
    }

    #[test]
    fn charset_and_palette_reach_the_render_sink() {
        let mut rig = rig(Config::default());
        let vm = rig.scheduler.machine_mut();
        vm.output.push(OutputEvent::Charset {
            width: 8,
            height: 14,
            glyphs: vec![0xff; 14],
        });
        vm.output.push(OutputEvent::Palette {
            colours: vec![0x000000, 0x0000aa],
        });
        rig.scheduler.start();
        let log = rig.render.log();
        assert_eq!(log.charsets, vec![(8, 14, vec![0xff; 14])]);
        assert_eq!(log.palettes, vec![vec![0x000000, 0x0000aa]]);
    }

    #[test]
    fn input_reaches_the_machine_until_it_halts() {
        let mut rig = rig(Config {
            mouse_sensitivity: -2.0,
            ..Config::default()
        });
        assert_eq!(rig.scheduler.session().mouse_sensitivity(), 4.0);
        let key = HostInputEvent {
            surface: SCREEN,
            input: HostInput::KeyDown {
                key: "a".to_string(),
                key_code: 65,
            },
        };
        assert_eq!(rig.scheduler.handle_input(&key), InputResponse::Consumed);
        assert_eq!(
            rig.scheduler.machine_mut().devices.next_key_edge(),
            Some(KeyEdge::Down {
                chr: u32::from(b'a'),
                code: 0x1e
            })
        );
        rig.scheduler
            .machine_mut()
            .script(Duration::ZERO, ExecutionResult::Halted);
        rig.scheduler.start();
        assert_eq!(rig.scheduler.handle_input(&key), InputResponse::NotRouted);
    }

    #[test]
    fn unrouted_surface_stops_delivering_input() {
        let mut rig = rig(Config::default());
        rig.scheduler.unroute_surface(SCREEN);
        let key = HostInputEvent {
            surface: SCREEN,
            input: HostInput::KeyDown {
                key: "a".to_string(),
                key_code: 65,
            },
        };
        assert_eq!(rig.scheduler.handle_input(&key), InputResponse::NotRouted);
        assert_eq!(rig.scheduler.machine_mut().devices.next_key_edge(), None);
    }
}
