//! The interface between the pacing core and the virtual machine it
//! drives.
//!
//! The virtual machine itself (instruction decoding and execution,
//! video memory layout, the devices it emulates) lives outside this
//! crate.  All we need from it is the ability to run for a bounded
//! number of opcodes, to be told that its timer has fired, and to
//! receive input device changes.
use std::borrow::Cow;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use serde::Deserialize;

use super::error::{AllocationFailure, LoadError};

/// The outcome of running the virtual machine for one quantum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionResult {
    /// The virtual machine has stopped and will not run again.
    Halted,
    /// The whole opcode budget was used.
    BudgetExhausted,
    /// The virtual machine stopped early for some reason other than
    /// waiting for its timer (for example, waiting for a key).
    Blocked,
    /// The virtual machine stopped early because it is idle until
    /// its next timer interrupt.
    VoluntaryYield,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownStatusCode(pub i32);

impl Display for UnknownStatusCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "unknown execution status code {}", self.0)
    }
}

impl Error for UnknownStatusCode {}

impl TryFrom<i32> for ExecutionResult {
    type Error = UnknownStatusCode;
    fn try_from(code: i32) -> Result<ExecutionResult, UnknownStatusCode> {
        match code {
            0 => Ok(ExecutionResult::Halted),
            1 => Ok(ExecutionResult::BudgetExhausted),
            2 => Ok(ExecutionResult::Blocked),
            3 => Ok(ExecutionResult::VoluntaryYield),
            other => Err(UnknownStatusCode(other)),
        }
    }
}

/// Identifies an open file in the virtual file system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramHandle(pub i32);

/// Address of a buffer in virtual machine memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScratchPtr(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    Shift,
    Ctrl,
    Alt,
}

impl Modifier {
    /// The bit this modifier occupies in the virtual keyboard's
    /// modifier mask.
    #[must_use]
    pub const fn bit(self) -> u8 {
        match self {
            Modifier::Shift => 0x01,
            Modifier::Ctrl => 0x04,
            Modifier::Alt => 0x08,
        }
    }
}

/// Host capabilities which the virtual machine can ask about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostFeature {
    JoystickConnected,
    MouseConnected,
}

impl HostFeature {
    pub const ALL: [HostFeature; 2] = [HostFeature::JoystickConnected, HostFeature::MouseConnected];

    /// The number the virtual machine uses for this feature.
    #[must_use]
    pub const fn id(self) -> u32 {
        match self {
            HostFeature::JoystickConnected => 1,
            HostFeature::MouseConnected => 2,
        }
    }

    pub fn from_id(id: u32) -> Option<HostFeature> {
        HostFeature::ALL.into_iter().find(|feature| feature.id() == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
}

impl Axis {
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
        }
    }
}

/// The input devices of the virtual machine.
pub trait DeviceInput {
    /// A key went down.  `chr` is the character it produces (zero if
    /// none) and `code` is the device's scan code (zero if unknown).
    fn set_key_down(&mut self, chr: u32, code: u8);
    fn set_key_up(&mut self, code: u8);
    fn set_modifier(&mut self, modifier: Modifier, down: bool);
    /// Relative mouse motion along one axis.
    fn set_mouse_axis(&mut self, axis: Axis, delta: i32);
    fn set_mouse_button(&mut self, button: u8, down: bool);
    fn set_joy_axis(&mut self, axis: Axis, value: i8);
    fn set_joy_button(&mut self, button: u8, down: bool);
    /// Tells the virtual machine whether the host offers `feature`.
    /// Features it hasn't been told about are absent.
    fn set_host_feature(&mut self, feature: HostFeature, present: bool);
}

/// Side effects which the virtual machine produces while it runs and
/// which the scheduler forwards to the host once the quantum is over.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OutputEvent {
    SpeakerOn { frequency: f64 },
    SpeakerOff,
    Charset { width: u32, height: u32, glyphs: Vec<u8> },
    Palette { colours: Vec<u32> },
}

pub trait VirtualMachine: DeviceInput {
    fn init(&mut self);

    /// Seeds the time-of-day counter.
    fn set_timer_offset(&mut self, since_midnight: Duration);

    /// Tells the virtual machine what the time was at the start of
    /// the current tick.  Reading the host clock directly from inside
    /// the virtual machine would make its idea of time disagree with
    /// the scheduler's.
    fn observe_wall_clock(&mut self, _now: Duration) {}

    /// Runs for at most `budget` opcodes.
    fn execute(&mut self, budget: u32) -> ExecutionResult;

    fn signal_timer_interrupt(&mut self);

    /// Called once the host has presented a frame.
    fn mark_frame(&mut self);

    fn allocate(&mut self, len: usize) -> Result<ScratchPtr, AllocationFailure>;
    fn write(&mut self, ptr: ScratchPtr, bytes: &[u8]);
    fn free(&mut self, ptr: ScratchPtr);

    /// Loads the program in `program`, passing it the zero-terminated
    /// argument string at `argument`.
    fn load_program(&mut self, program: ProgramHandle, argument: ScratchPtr)
        -> Result<(), LoadError>;

    fn display_memory(&self) -> Cow<'_, [u8]>;
    fn video_mode(&self) -> u8;

    fn drain_output(&mut self) -> Vec<OutputEvent> {
        Vec::new()
    }
}

#[test]
fn status_codes() {
    assert_eq!(ExecutionResult::try_from(0), Ok(ExecutionResult::Halted));
    assert_eq!(
        ExecutionResult::try_from(1),
        Ok(ExecutionResult::BudgetExhausted)
    );
    assert_eq!(ExecutionResult::try_from(2), Ok(ExecutionResult::Blocked));
    assert_eq!(
        ExecutionResult::try_from(3),
        Ok(ExecutionResult::VoluntaryYield)
    );
    assert_eq!(ExecutionResult::try_from(4), Err(UnknownStatusCode(4)));
}

#[test]
fn output_events_deserialize_from_tagged_objects() {
    let events: Vec<OutputEvent> = serde_json::from_str(
        r#"[{"kind": "speakerOn", "frequency": 440.0}, {"kind": "speakerOff"},
            {"kind": "palette", "colours": [0, 170]}]"#,
    )
    .expect("test data should be valid");
    assert_eq!(
        events,
        vec![
            OutputEvent::SpeakerOn { frequency: 440.0 },
            OutputEvent::SpeakerOff,
            OutputEvent::Palette {
                colours: vec![0, 170]
            },
        ]
    );
}
