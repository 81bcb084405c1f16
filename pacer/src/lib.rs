//! This crate paces a cycle-stepped virtual machine against wall-clock
//! time, inside a host which runs everything on one thread and which
//! must never be blocked.
//!
//! The host drives a [`TickScheduler`]: it calls
//! [`TickScheduler::start`] once and then [`TickScheduler::resume`]
//! whenever the continuation it was last given falls due, drawing
//! frames when asked to with [`TickScheduler::present`].
#![crate_name = "pacer"]

mod budget;
mod clock;
mod config;
mod devices;
mod error;
mod input;
mod load;
mod machine;
mod present;
mod scheduler;
mod sinks;
mod startup;
mod timer;
mod vfs;

#[cfg(test)]
mod testing;

pub use budget::{
    Adjustment, OpcodeBudget, DEFAULT_INITIAL_OPCODES, SLOW_DOWN_ABOVE, SPEED_UP_BELOW,
};
pub use clock::{HostClock, ManualClock, MonotonicClock};
pub use config::{Command, Config, DefaultProgram, DEFAULT_MOUSE_SENSITIVITY};
pub use devices::{KeyEdge, VirtualDeviceState};
pub use error::{AllocationFailure, EmulationHalt, LoadError, StartupFailure};
pub use input::{
    GamepadSnapshot, HostInput, HostInputEvent, InputBridge, InputKinds, InputResponse, KeyMap,
    SurfaceId, NON_PRINTING_CODES,
};
pub use load::{load, stage_argument};
pub use machine::{
    Axis, DeviceInput, ExecutionResult, HostFeature, Modifier, OutputEvent, ProgramHandle,
    ScratchPtr, UnknownStatusCode, VirtualMachine,
};
pub use present::{FramePresenter, FrameToken};
pub use scheduler::{
    Continuation, ContinuationToken, Next, Schedule, Session, SessionState, SessionStats,
    StopHandle, TickScheduler, MIN_DEFERRAL,
};
pub use sinks::{AudioSink, Mute, RenderSink};
pub use startup::{run_startup, start_session, Launched, PRELUDE_QUANTUM};
pub use timer::{TimerAccumulator, TICK_INTERVAL};
pub use vfs::{FileSystem, MemoryFileSystem};
