//! Failures which can end a session.
use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// The virtual machine refused to load a program image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadError {
    pub reason: String,
}

impl Display for LoadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "program load failed: {}", self.reason)
    }
}

impl Error for LoadError {}

/// The virtual machine could not provide scratch memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationFailure {
    pub requested: usize,
}

impl Display for AllocationFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(
            f,
            "failed to allocate {} bytes of virtual machine memory",
            self.requested
        )
    }
}

impl Error for AllocationFailure {}

/// Describes why a session could not be started.  Every variant is
/// fatal; nothing is retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupFailure {
    /// A configured startup command named a program which is not in
    /// the file system.  `position` counts from 1.
    ProgramNotFound { program: String, position: usize },

    /// No commands were configured and none of the default programs
    /// could be found.
    NoDefaultProgram { tried: Vec<String> },

    Allocation(AllocationFailure),
    Load(LoadError),
}

impl Display for StartupFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            StartupFailure::ProgramNotFound { program, position } => {
                write!(
                    f,
                    "could not find executable {program} (command #{position})"
                )
            }
            StartupFailure::NoDefaultProgram { tried } => {
                write!(f, "could not find any of: {}", tried.join(", "))
            }
            StartupFailure::Allocation(e) => e.fmt(f),
            StartupFailure::Load(e) => e.fmt(f),
        }
    }
}

impl Error for StartupFailure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StartupFailure::Allocation(e) => Some(e),
            StartupFailure::Load(e) => Some(e),
            _ => None,
        }
    }
}

impl From<AllocationFailure> for StartupFailure {
    fn from(e: AllocationFailure) -> StartupFailure {
        StartupFailure::Allocation(e)
    }
}

impl From<LoadError> for StartupFailure {
    fn from(e: LoadError) -> StartupFailure {
        StartupFailure::Load(e)
    }
}

/// The virtual machine reported that it has stopped for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmulationHalt;

impl EmulationHalt {
    pub const MESSAGE: &'static str = "Emulation stopped.";
}

impl Display for EmulationHalt {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str(EmulationHalt::MESSAGE)
    }
}

impl Error for EmulationHalt {}

#[test]
fn startup_failure_names_the_command() {
    let e = StartupFailure::ProgramNotFound {
        program: "GAME.EXE".to_string(),
        position: 2,
    };
    assert_eq!(
        e.to_string(),
        "could not find executable GAME.EXE (command #2)"
    );
}
