//! Getting a program running in a fresh virtual machine.
use tracing::{event, Level};

use super::clock::HostClock;
use super::config::Config;
use super::error::StartupFailure;
use super::input::KeyMap;
use super::load::load;
use super::machine::{ExecutionResult, HostFeature, VirtualMachine};
use super::scheduler::TickScheduler;
use super::sinks::{AudioSink, RenderSink};
use super::vfs::FileSystem;

/// The opcode budget used to run preliminary commands to completion.
/// These don't run against the clock, so the budget only bounds how
/// long each call into the virtual machine takes.
pub const PRELUDE_QUANTUM: u32 = 10_000;

/// A program which was loaded during startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launched {
    pub program: String,
    pub argument: String,
}

fn open_and_load<M, F>(
    vm: &mut M,
    fs: &mut F,
    name: &str,
    argument: &str,
) -> Option<Result<(), StartupFailure>>
where
    M: VirtualMachine + ?Sized,
    F: FileSystem + ?Sized,
{
    let handle = fs.open(&name.to_lowercase())?;
    event!(Level::INFO, "executing {name} {argument}");
    let result = load(vm, handle, argument);
    fs.close(handle);
    Some(result)
}

fn run_to_completion<M: VirtualMachine + ?Sized>(vm: &mut M, program: &str) {
    let mut calls: u64 = 0;
    loop {
        calls += 1;
        let result = vm.execute(PRELUDE_QUANTUM);
        let discarded = vm.drain_output().len();
        if discarded > 0 {
            event!(
                Level::TRACE,
                "discarding {discarded} output events from {program}"
            );
        }
        if result == ExecutionResult::Halted {
            break;
        }
    }
    event!(Level::DEBUG, "{program} finished after {calls} calls");
}

fn default_argument<F: FileSystem + ?Sized>(
    fs: &F,
    config: &Config,
    extension: Option<&str>,
) -> String {
    if let Some(arg) = config.explicit_argument() {
        return arg.to_string();
    }
    let Some(extension) = extension else {
        return String::new();
    };
    let extension = extension.to_lowercase();
    fs.list(&|name| name.to_lowercase().ends_with(&extension))
        .into_iter()
        .next()
        .unwrap_or_default()
}

/// Loads the configured programs into `vm`.
///
/// Every configured command except the last is run until it halts.
/// The last is left loaded, ready for the scheduler.  When no
/// commands are configured the first default program which exists
/// is loaded instead.
pub fn run_startup<M, F>(
    vm: &mut M,
    fs: &mut F,
    config: &Config,
) -> Result<Vec<Launched>, StartupFailure>
where
    M: VirtualMachine + ?Sized,
    F: FileSystem + ?Sized,
{
    if config.commands.is_empty() {
        for candidate in config.default_programs.iter() {
            let argument = default_argument(fs, config, candidate.extension.as_deref());
            if let Some(result) = open_and_load(vm, fs, &candidate.name, &argument) {
                result?;
                return Ok(vec![Launched {
                    program: candidate.name.clone(),
                    argument,
                }]);
            }
        }
        return Err(StartupFailure::NoDefaultProgram {
            tried: config
                .default_programs
                .iter()
                .map(|p| p.name.clone())
                .collect(),
        });
    }

    let mut launched = Vec::with_capacity(config.commands.len());
    let last = config.commands.len() - 1;
    for (index, command) in config.commands.iter().enumerate() {
        let program = command.program();
        match open_and_load(vm, fs, program, command.argument()) {
            None => {
                return Err(StartupFailure::ProgramNotFound {
                    program: program.to_string(),
                    position: index + 1,
                })
            }
            Some(result) => result?,
        }
        launched.push(Launched {
            program: program.to_string(),
            argument: command.argument().to_string(),
        });
        if index < last {
            run_to_completion(vm, program);
        }
    }
    Ok(launched)
}

/// Prepares `machine` and loads its program, returning a scheduler
/// which is ready to [`start`](TickScheduler::start).
pub fn start_session<M, C, F>(
    mut machine: M,
    render: Box<dyn RenderSink>,
    audio: Box<dyn AudioSink>,
    fs: &mut F,
    clock: C,
    keymap: Box<dyn KeyMap>,
    config: &Config,
) -> Result<TickScheduler<M, C>, StartupFailure>
where
    M: VirtualMachine,
    C: HostClock,
    F: FileSystem + ?Sized,
{
    machine.init();
    // A browser can always deliver joystick and mouse input.
    for feature in HostFeature::ALL {
        event!(Level::DEBUG, "announcing host feature {feature:?}");
        machine.set_host_feature(feature, true);
    }
    machine.set_timer_offset(clock.time_of_day());
    let launched = run_startup(&mut machine, fs, config)?;
    let mut scheduler = TickScheduler::new(machine, render, audio, clock, keymap, config);
    scheduler.set_launched(launched);
    Ok(scheduler)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{Command, DefaultProgram};
    use crate::sinks::Mute;
    use crate::testing::{FakeMachine, RecordingRender};
    use crate::vfs::MemoryFileSystem;

    fn commands(list: &[(&str, &str)]) -> Config {
        Config {
            commands: list
                .iter()
                .map(|(p, a)| {
                    if a.is_empty() {
                        Command::Program(p.to_string())
                    } else {
                        Command::WithArgument(p.to_string(), a.to_string())
                    }
                })
                .collect(),
            ..Config::default()
        }
    }

    #[test]
    fn missing_command_reports_its_position() {
        let mut vm = FakeMachine::new();
        vm.script_halts(1);
        let mut fs = MemoryFileSystem::new().with_file("SETUP.EXE", vec![0]);
        let config = commands(&[("SETUP.EXE", ""), ("GAME.EXE", "")]);
        assert_eq!(
            run_startup(&mut vm, &mut fs, &config),
            Err(StartupFailure::ProgramNotFound {
                program: "GAME.EXE".to_string(),
                position: 2
            })
        );
    }

    #[test]
    fn earlier_commands_run_until_halted() {
        let mut vm = FakeMachine::new();
        vm.script(Duration::ZERO, ExecutionResult::BudgetExhausted);
        vm.script(Duration::ZERO, ExecutionResult::Blocked);
        vm.script(Duration::ZERO, ExecutionResult::Halted);
        let mut fs = MemoryFileSystem::new()
            .with_file("setup.exe", vec![0])
            .with_file("game.exe", vec![1]);
        let config = commands(&[("SETUP.EXE", "/q"), ("Game.Exe", "TOWN.ZZT")]);
        let launched = run_startup(&mut vm, &mut fs, &config).expect("startup should succeed");
        assert_eq!(launched.len(), 2);
        assert_eq!(launched[1].argument, "TOWN.ZZT");
        assert_eq!(vm.budgets, vec![PRELUDE_QUANTUM; 3]);
        assert_eq!(vm.loaded.len(), 2);
        assert_eq!(vm.loaded[0].1, b"/q\0".to_vec());
        assert_eq!(fs.open_count(), 0);
    }

    #[test]
    fn handle_is_closed_when_load_fails() {
        let mut vm = FakeMachine::new();
        vm.fail_loads = true;
        let mut fs = MemoryFileSystem::new().with_file("game.exe", vec![1]);
        let config = commands(&[("GAME.EXE", "")]);
        assert!(matches!(
            run_startup(&mut vm, &mut fs, &config),
            Err(StartupFailure::Load(_))
        ));
        assert_eq!(fs.open_count(), 0);
    }

    #[test]
    fn default_program_picks_up_a_world_file() {
        let mut vm = FakeMachine::new();
        let mut fs = MemoryFileSystem::new()
            .with_file("ZZT.EXE", vec![0])
            .with_file("README.TXT", vec![])
            .with_file("TOWN.ZZT", vec![]);
        let launched =
            run_startup(&mut vm, &mut fs, &Config::default()).expect("zzt.exe is present");
        assert_eq!(
            launched,
            vec![Launched {
                program: "zzt.exe".to_string(),
                argument: "TOWN.ZZT".to_string()
            }]
        );
        assert_eq!(vm.loaded[0].1, b"TOWN.ZZT\0".to_vec());
        assert!(vm.budgets.is_empty());
    }

    #[test]
    fn explicit_argument_wins_over_world_files() {
        let mut vm = FakeMachine::new();
        let mut fs = MemoryFileSystem::new()
            .with_file("ZZT.EXE", vec![0])
            .with_file("TOWN.ZZT", vec![]);
        let config = Config {
            arg: Some("CAVES.ZZT".to_string()),
            ..Config::default()
        };
        let launched = run_startup(&mut vm, &mut fs, &config).expect("zzt.exe is present");
        assert_eq!(launched[0].argument, "CAVES.ZZT");
    }

    #[test]
    fn second_default_program_gets_no_argument() {
        let mut vm = FakeMachine::new();
        let mut fs = MemoryFileSystem::new()
            .with_file("SUPERZ.EXE", vec![0])
            .with_file("MONSTER.SZT", vec![]);
        let launched =
            run_startup(&mut vm, &mut fs, &Config::default()).expect("superz.exe is present");
        assert_eq!(launched[0].program, "superz.exe");
        assert_eq!(launched[0].argument, "");
    }

    #[test]
    fn no_default_program_is_fatal() {
        let mut vm = FakeMachine::new();
        let mut fs = MemoryFileSystem::new().with_file("GAME.EXE", vec![0]);
        let config = Config {
            default_programs: vec![DefaultProgram {
                name: "zzt.exe".to_string(),
                extension: None,
            }],
            ..Config::default()
        };
        assert_eq!(
            run_startup(&mut vm, &mut fs, &config),
            Err(StartupFailure::NoDefaultProgram {
                tried: vec!["zzt.exe".to_string()]
            })
        );
        assert!(vm.allocations.is_empty());
    }

    #[test]
    fn session_seeds_the_time_of_day() {
        let clock = ManualClock::new(Duration::from_millis(250))
            .with_midnight_offset(Duration::from_secs(3600));
        let vm = FakeMachine::with_clock(clock.clone());
        let mut fs = MemoryFileSystem::new().with_file("ZZT.EXE", vec![0]);
        let keymap: HashMap<&'static str, u8> = HashMap::new();
        let scheduler = start_session(
            vm,
            Box::new(RecordingRender::default()),
            Box::new(Mute),
            &mut fs,
            clock,
            Box::new(keymap),
            &Config::default(),
        )
        .expect("zzt.exe is present");
        assert_eq!(scheduler.machine().init_calls, 1);
        assert!(scheduler.machine().devices.has_feature(1));
        assert!(scheduler.machine().devices.has_feature(2));
        assert_eq!(
            scheduler.machine().timer_offset,
            Some(Duration::from_millis(3_600_250))
        );
        assert_eq!(scheduler.session().launched().len(), 1);
    }
}
