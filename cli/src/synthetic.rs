//! A stand-in virtual machine for soak-testing the scheduler.
//!
//! It doesn't decode any instructions.  Each opcode simply costs a
//! fixed amount of host time.  After every timer interrupt it has a
//! fixed amount of work to do, and once that is done it yields until
//! the next interrupt, much as an idle DOS program sits in its timer
//! wait loop.
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::time::Duration;

use pacer::{
    AllocationFailure, Axis, DeviceInput, ExecutionResult, HostFeature, KeyEdge, LoadError,
    Modifier, OutputEvent, ProgramHandle, ScratchPtr, VirtualDeviceState, VirtualMachine,
};
use tracing::{event, Level};

use super::clock::SoakClock;

pub const COLUMNS: usize = 80;
pub const ROWS: usize = 25;
const TEXT_MODE: u8 = 3;
const NORMAL_ATTRIBUTE: u8 = 0x07;
const STATUS_ATTRIBUTE: u8 = 0x70;

/// Programs which run before the main one exit after this many
/// opcodes.
pub const PRELIMINARY_OPCODES: u64 = 50_000;

/// The speaker beeps for one interrupt in every this many.
const BEEP_EVERY: u64 = 91;
const BEEP_FREQUENCY: f64 = 880.0;

#[derive(Debug, Clone)]
pub struct Workload {
    /// Host time taken by each opcode.
    pub opcode_cost: Duration,
    /// Opcodes of work which each timer interrupt creates.
    pub work_per_interrupt: u64,
    /// Halt once this many interrupts have been seen.
    pub halt_after: Option<u64>,
    /// How many programs are loaded before the main one.
    pub preliminary_programs: usize,
}

/// An 80x25 character-and-attribute text screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextScreen {
    cells: Vec<u8>,
}

impl TextScreen {
    fn new() -> TextScreen {
        let mut cells = Vec::with_capacity(COLUMNS * ROWS * 2);
        for _ in 0..COLUMNS * ROWS {
            cells.extend_from_slice(&[b' ', NORMAL_ATTRIBUTE]);
        }
        TextScreen { cells }
    }

    /// Writes `text` on `row`, padding it with spaces to the full
    /// width and dropping anything beyond it.
    fn put_line(&mut self, row: usize, text: &str, attribute: u8) {
        let start = row * COLUMNS * 2;
        let mut bytes = text.bytes().chain(std::iter::repeat(b' '));
        for cell in self.cells[start..start + COLUMNS * 2].chunks_exact_mut(2) {
            cell[0] = bytes.next().unwrap_or(b' ');
            cell[1] = attribute;
        }
    }

    /// The text of `row`, without trailing spaces.
    pub fn line(&self, row: usize) -> String {
        let start = row * COLUMNS * 2;
        let text: String = self.cells[start..start + COLUMNS * 2]
            .chunks_exact(2)
            .map(|cell| char::from(cell[0]))
            .collect();
        text.trim_end().to_string()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.cells
    }
}

pub struct SyntheticMachine {
    workload: Workload,
    clock: SoakClock,
    devices: VirtualDeviceState,
    screen: TextScreen,
    scratch: BTreeMap<u32, Vec<u8>>,
    next_scratch: u32,
    loads: usize,
    preliminary_remaining: u64,
    work_remaining: u64,
    interrupts: u64,
    frames: u64,
    keys: u64,
    opcodes_run: u64,
    last_budget: u32,
    wall_clock: Duration,
    halted: bool,
    output: Vec<OutputEvent>,
}

impl SyntheticMachine {
    pub fn new(workload: Workload, clock: SoakClock) -> SyntheticMachine {
        SyntheticMachine {
            work_remaining: workload.work_per_interrupt,
            workload,
            clock,
            devices: VirtualDeviceState::new(),
            screen: TextScreen::new(),
            scratch: BTreeMap::new(),
            next_scratch: 0x1000,
            loads: 0,
            preliminary_remaining: 0,
            interrupts: 0,
            frames: 0,
            keys: 0,
            opcodes_run: 0,
            last_budget: 0,
            wall_clock: Duration::ZERO,
            halted: false,
            output: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn screen(&self) -> &TextScreen {
        &self.screen
    }

    pub fn status_line(&self) -> String {
        self.screen.line(ROWS - 1)
    }

    pub fn opcodes_run(&self) -> u64 {
        self.opcodes_run
    }

    fn running_preliminary(&self) -> bool {
        self.loads > 0 && self.loads <= self.workload.preliminary_programs
    }

    fn spend(&mut self, opcodes: u64) {
        self.opcodes_run += opcodes;
        let cost = self
            .workload
            .opcode_cost
            .saturating_mul(u32::try_from(opcodes).unwrap_or(u32::MAX));
        self.clock.pass(cost);
    }

    fn take_input(&mut self) {
        while let Some(edge) = self.devices.next_key_edge() {
            if let KeyEdge::Down { .. } = edge {
                self.keys += 1;
            }
        }
        let (dx, dy) = self.devices.take_mouse_delta();
        let has_mouse = self.devices.has_feature(HostFeature::MouseConnected.id());
        if has_mouse && (dx != 0 || dy != 0) {
            event!(Level::TRACE, "mouse moved by ({dx}, {dy})");
        }
    }

    fn update_status(&mut self) {
        let status = format!(
            " t={:>10.3}s  irq={:<7} budget={:<7} frames={:<6} keys={}",
            self.wall_clock.as_secs_f64(),
            self.interrupts,
            self.last_budget,
            self.frames,
            self.keys
        );
        self.screen.put_line(ROWS - 1, &status, STATUS_ATTRIBUTE);
    }
}

impl DeviceInput for SyntheticMachine {
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

impl VirtualMachine for SyntheticMachine {
    fn init(&mut self) {
        self.screen = TextScreen::new();
        self.screen
            .put_line(0, "Synthetic machine ready", NORMAL_ATTRIBUTE);
    }

    fn set_timer_offset(&mut self, since_midnight: Duration) {
        event!(
            Level::DEBUG,
            "time of day is {:.0}s after midnight",
            since_midnight.as_secs_f64()
        );
    }

    fn observe_wall_clock(&mut self, now: Duration) {
        self.wall_clock = now;
    }

    fn execute(&mut self, budget: u32) -> ExecutionResult {
        self.last_budget = budget;
        let budget = u64::from(budget);
        if self.running_preliminary() {
            let opcodes = budget.min(self.preliminary_remaining);
            self.spend(opcodes);
            self.preliminary_remaining -= opcodes;
            return if self.preliminary_remaining == 0 {
                ExecutionResult::Halted
            } else {
                ExecutionResult::BudgetExhausted
            };
        }
        if self.halted {
            return ExecutionResult::Halted;
        }
        if let Some(limit) = self.workload.halt_after {
            if self.interrupts >= limit {
                self.halted = true;
                self.screen
                    .put_line(ROWS - 2, "Halted.", NORMAL_ATTRIBUTE);
                return ExecutionResult::Halted;
            }
        }
        self.take_input();
        let opcodes = budget.min(self.work_remaining);
        self.spend(opcodes);
        self.work_remaining -= opcodes;
        self.update_status();
        if self.work_remaining == 0 {
            ExecutionResult::VoluntaryYield
        } else {
            ExecutionResult::BudgetExhausted
        }
    }

    fn signal_timer_interrupt(&mut self) {
        self.interrupts += 1;
        self.work_remaining = self.workload.work_per_interrupt;
        match self.interrupts % BEEP_EVERY {
            0 => self.output.push(OutputEvent::SpeakerOn {
                frequency: BEEP_FREQUENCY,
            }),
            1 if self.interrupts > 1 => self.output.push(OutputEvent::SpeakerOff),
            _ => (),
        }
    }

    fn mark_frame(&mut self) {
        self.frames += 1;
    }

    fn allocate(&mut self, len: usize) -> Result<ScratchPtr, AllocationFailure> {
        let size = u32::try_from(len).map_err(|_| AllocationFailure { requested: len })?;
        let ptr = self.next_scratch;
        self.next_scratch = self
            .next_scratch
            .checked_add(size.max(1))
            .ok_or(AllocationFailure { requested: len })?;
        self.scratch.insert(ptr, vec![0; len]);
        Ok(ScratchPtr(ptr))
    }

    fn write(&mut self, ptr: ScratchPtr, bytes: &[u8]) {
        match self.scratch.get_mut(&ptr.0) {
            Some(buffer) => {
                let n = bytes.len().min(buffer.len());
                buffer[..n].copy_from_slice(&bytes[..n]);
            }
            None => event!(Level::ERROR, "write to unallocated {ptr:?}"),
        }
    }

    fn free(&mut self, ptr: ScratchPtr) {
        if self.scratch.remove(&ptr.0).is_none() {
            event!(Level::ERROR, "free of unallocated {ptr:?}");
        }
    }

    fn load_program(
        &mut self,
        program: ProgramHandle,
        argument: ScratchPtr,
    ) -> Result<(), LoadError> {
        let staged = self.scratch.get(&argument.0).ok_or_else(|| LoadError {
            reason: format!("argument buffer {argument:?} is not allocated"),
        })?;
        let arg: String = staged
            .iter()
            .take_while(|b| **b != 0)
            .map(|b| char::from(*b))
            .collect();
        self.loads += 1;
        if self.running_preliminary() {
            self.preliminary_remaining = PRELIMINARY_OPCODES;
        }
        let row = self.loads.min(ROWS - 3);
        self.screen.put_line(
            row,
            &format!("C:\\> program #{} {arg}", program.0),
            NORMAL_ATTRIBUTE,
        );
        Ok(())
    }

    fn display_memory(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.screen.as_bytes())
    }

    fn video_mode(&self) -> u8 {
        TEXT_MODE
    }

    fn drain_output(&mut self) -> Vec<OutputEvent> {
        std::mem::take(&mut self.output)
    }
}
