//! Test doubles for the virtual machine and the sinks.
use std::borrow::Cow;
use std::cell::{Ref, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use super::clock::ManualClock;
use super::devices::VirtualDeviceState;
use super::error::{AllocationFailure, LoadError};
use super::machine::{
    Axis, DeviceInput, ExecutionResult, HostFeature, Modifier, OutputEvent, ProgramHandle,
    ScratchPtr, VirtualMachine,
};
use super::scheduler::StopHandle;
use super::sinks::{AudioSink, RenderSink};

/// A virtual machine which follows a script.  Each call to `execute`
/// takes the next (cost, result) pair, advancing the shared clock by
/// the cost.  Once the script runs out every quantum is free and
/// exhausts its budget.
#[derive(Debug, Default)]
pub struct FakeMachine {
    pub clock: ManualClock,
    pub devices: VirtualDeviceState,
    pub script: VecDeque<(Duration, ExecutionResult)>,
    pub budgets: Vec<u32>,
    pub interrupts: u64,
    pub observed: Vec<Duration>,
    pub frames_marked: u64,
    pub init_calls: u32,
    pub timer_offset: Option<Duration>,
    pub allocations: Vec<(ScratchPtr, usize)>,
    pub frees: Vec<ScratchPtr>,
    pub loaded: Vec<(ProgramHandle, Vec<u8>)>,
    pub fail_loads: bool,
    pub fail_allocations: bool,
    /// Requested from inside the next call to `execute`.
    pub stop_during_execute: Option<StopHandle>,
    /// Handed out by the next call to `drain_output`.
    pub output: Vec<OutputEvent>,
    pub display: Vec<u8>,
    memory: HashMap<ScratchPtr, Vec<u8>>,
}

impl FakeMachine {
    pub fn new() -> FakeMachine {
        FakeMachine::default()
    }

    pub fn with_clock(clock: ManualClock) -> FakeMachine {
        FakeMachine {
            clock,
            ..FakeMachine::default()
        }
    }

    pub fn script(&mut self, cost: Duration, result: ExecutionResult) {
        self.script.push_back((cost, result));
    }

    pub fn script_halts(&mut self, count: usize) {
        for _ in 0..count {
            self.script(Duration::ZERO, ExecutionResult::Halted);
        }
    }

    /// The contents of a scratch buffer.  These are kept after the
    /// buffer is freed.
    pub fn staged(&self, ptr: ScratchPtr) -> Option<&[u8]> {
        self.memory.get(&ptr).map(Vec::as_slice)
    }
}

impl DeviceInput for FakeMachine {
    fn set_key_down(&mut self, chr: u32, code: u8) {
        self.devices.set_key_down(chr, code);
    }
    fn set_key_up(&mut self, code: u8) {
        self.devices.set_key_up(code);
    }
    fn set_modifier(&mut self, modifier: Modifier, down: bool) {
        self.devices.set_modifier(modifier, down);
    }
    fn set_mouse_axis(&mut self, axis: Axis, delta: i32) {
        self.devices.set_mouse_axis(axis, delta);
    }
    fn set_mouse_button(&mut self, button: u8, down: bool) {
        self.devices.set_mouse_button(button, down);
    }
    fn set_joy_axis(&mut self, axis: Axis, value: i8) {
        self.devices.set_joy_axis(axis, value);
    }
    fn set_joy_button(&mut self, button: u8, down: bool) {
        self.devices.set_joy_button(button, down);
    }
    fn set_host_feature(&mut self, feature: HostFeature, present: bool) {
        self.devices.set_host_feature(feature, present);
    }
}

impl VirtualMachine for FakeMachine {
    fn init(&mut self) {
        self.init_calls += 1;
    }

    fn set_timer_offset(&mut self, since_midnight: Duration) {
        self.timer_offset = Some(since_midnight);
    }

    fn observe_wall_clock(&mut self, now: Duration) {
        self.observed.push(now);
    }

    fn execute(&mut self, budget: u32) -> ExecutionResult {
        self.budgets.push(budget);
        let (cost, result) = self
            .script
            .pop_front()
            .unwrap_or((Duration::ZERO, ExecutionResult::BudgetExhausted));
        self.clock.advance(cost);
        if let Some(stop) = self.stop_during_execute.take() {
            stop.stop();
        }
        result
    }

    fn signal_timer_interrupt(&mut self) {
        self.interrupts += 1;
    }

    fn mark_frame(&mut self) {
        self.frames_marked += 1;
    }

    fn allocate(&mut self, len: usize) -> Result<ScratchPtr, AllocationFailure> {
        if self.fail_allocations {
            return Err(AllocationFailure { requested: len });
        }
        let offset = u32::try_from(self.allocations.len()).expect("few allocations in tests");
        let ptr = ScratchPtr(0x1000 + offset * 0x100);
        self.memory.insert(ptr, vec![0xaa; len]);
        self.allocations.push((ptr, len));
        Ok(ptr)
    }

    fn write(&mut self, ptr: ScratchPtr, bytes: &[u8]) {
        let buffer = self.memory.get_mut(&ptr).expect("write to unallocated memory");
        buffer[..bytes.len()].copy_from_slice(bytes);
    }

    fn free(&mut self, ptr: ScratchPtr) {
        assert!(!self.frees.contains(&ptr), "{ptr:?} freed twice");
        self.frees.push(ptr);
    }

    fn load_program(
        &mut self,
        program: ProgramHandle,
        argument: ScratchPtr,
    ) -> Result<(), LoadError> {
        if self.fail_loads {
            return Err(LoadError {
                reason: "refused by test".to_string(),
            });
        }
        let staged = self.staged(argument).expect("argument was staged").to_vec();
        self.loaded.push((program, staged));
        Ok(())
    }

    fn display_memory(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(&self.display)
    }

    fn video_mode(&self) -> u8 {
        3
    }

    fn drain_output(&mut self) -> Vec<OutputEvent> {
        std::mem::take(&mut self.output)
    }
}

#[derive(Debug, Default)]
pub struct RenderLog {
    pub frames: Vec<(Vec<u8>, u8, Duration)>,
    pub charsets: Vec<(u32, u32, Vec<u8>)>,
    pub palettes: Vec<Vec<u32>>,
    pub errors: Vec<String>,
}

/// A render sink which records what it was asked to do.  Clones share
/// the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingRender(Rc<RefCell<RenderLog>>);

impl RecordingRender {
    pub fn log(&self) -> Ref<'_, RenderLog> {
        self.0.borrow()
    }
}

impl RenderSink for RecordingRender {
    fn render(&mut self, display_memory: &[u8], video_mode: u8, now: Duration) {
        self.0
            .borrow_mut()
            .frames
            .push((display_memory.to_vec(), video_mode, now));
    }

    fn set_charset(&mut self, width: u32, height: u32, glyphs: &[u8]) {
        self.0
            .borrow_mut()
            .charsets
            .push((width, height, glyphs.to_vec()));
    }

    fn set_palette(&mut self, colours: &[u32]) {
        self.0.borrow_mut().palettes.push(colours.to_vec());
    }

    fn show_error(&mut self, message: &str) {
        self.0.borrow_mut().errors.push(message.to_string());
    }
}

/// Records speaker calls: `Some(frequency)` for on, `None` for off.
#[derive(Debug, Clone, Default)]
pub struct RecordingAudio(Rc<RefCell<Vec<Option<f64>>>>);

impl RecordingAudio {
    pub fn calls(&self) -> Vec<Option<f64>> {
        self.0.borrow().clone()
    }
}

impl AudioSink for RecordingAudio {
    fn speaker_on(&mut self, frequency: f64) {
        self.0.borrow_mut().push(Some(frequency));
    }

    fn speaker_off(&mut self) {
        self.0.borrow_mut().push(None);
    }
}
