use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{event, Level};
use tracing_subscriber::prelude::*;

use pacer::{start_session, Command, Config, MemoryFileSystem, Mute};

mod clock;
mod host;
mod pq;
mod report;
mod synthetic;
mod terminal;

use clock::SoakClock;
use host::EventLoop;
use report::Report;
use synthetic::{SyntheticMachine, Workload};
use terminal::TerminalScreen;

/// Soak-test the real-time pacing core against a synthetic machine
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Program images to place in the virtual file system.  When none
    /// are given, placeholder ZZT.EXE and TOWN.ZZT images are used.
    files: Vec<PathBuf>,

    /// A program to run at startup, optionally followed by a space
    /// and its argument.  Every command but the last runs until it
    /// exits.
    #[arg(long = "command")]
    commands: Vec<String>,

    /// Argument for the default program.
    #[arg(long)]
    arg: Option<String>,

    /// How long to run for, in seconds.
    #[arg(long, default_value_t = 10.0)]
    seconds: f64,

    /// Host time taken by each opcode of the synthetic machine.
    #[arg(long, default_value_t = 100)]
    opcode_cost_ns: u64,

    /// Opcodes of work the synthetic machine does after each timer
    /// interrupt before it yields.
    #[arg(long, default_value_t = 20_000)]
    work_per_interrupt: u64,

    /// Make the synthetic machine halt after this many timer
    /// interrupts.
    #[arg(long)]
    halt_after: Option<u64>,

    #[arg(long, default_value_t = 1000)]
    initial_opcodes: u32,

    /// Display refresh rate, in Hz.
    #[arg(long, default_value_t = 60.0)]
    refresh_hz: f64,

    /// Run in simulated time instead of real time.
    #[arg(long)]
    simulated: bool,

    /// Print the synthetic machine's screen at the end of the run.
    #[arg(long)]
    show_screen: bool,
}

fn parse_command(text: &str) -> Command {
    match text.trim().split_once(' ') {
        Some((program, argument)) => {
            Command::WithArgument(program.to_string(), argument.trim().to_string())
        }
        None => Command::Program(text.trim().to_string()),
    }
}

fn mount(files: &[PathBuf]) -> Result<MemoryFileSystem, Box<dyn std::error::Error>> {
    let mut fs = MemoryFileSystem::new();
    if files.is_empty() {
        event!(
            Level::INFO,
            "no program images given, mounting placeholder images"
        );
        fs.insert("ZZT.EXE", Vec::new());
        fs.insert("TOWN.ZZT", Vec::new());
        return Ok(fs);
    }
    for path in files {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| format!("{} does not name a file", path.display()))?;
        let data = std::fs::read(path)?;
        event!(Level::DEBUG, "mounting {name} ({} bytes)", data.len());
        fs.insert(name, data);
    }
    Ok(fs)
}

fn run_soak() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // See
    // https://docs.rs/tracing-subscriber/0.3/tracing_subscriber/filter/struct.EnvFilter.html
    // for how to select which trace messages get printed.
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    let filter_layer = match tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
    {
        Err(e) => {
            return Err(Box::new(e));
        }
        Ok(layer) => layer,
    };
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    let duration = Duration::try_from_secs_f64(cli.seconds)?;
    let refresh = Duration::try_from_secs_f64(1.0 / cli.refresh_hz)?;
    let config = Config {
        commands: cli.commands.iter().map(|c| parse_command(c)).collect(),
        arg: cli.arg.clone(),
        initial_opcodes: cli.initial_opcodes,
        ..Config::default()
    };
    let clock = if cli.simulated {
        event!(Level::INFO, "running in simulated time");
        SoakClock::simulated()
    } else {
        SoakClock::real()
    };
    let workload = Workload {
        opcode_cost: Duration::from_nanos(cli.opcode_cost_ns),
        work_per_interrupt: cli.work_per_interrupt,
        halt_after: cli.halt_after,
        preliminary_programs: config.commands.len().saturating_sub(1),
    };

    let mut fs = mount(&cli.files)?;
    let machine = SyntheticMachine::new(workload, clock.clone());
    let screen = TerminalScreen::new();
    let mut scheduler = start_session(
        machine,
        Box::new(screen.clone()),
        Box::new(Mute),
        &mut fs,
        clock.clone(),
        Box::new(HashMap::<&'static str, u8>::new()),
        &config,
    )?;
    for launched in scheduler.session().launched() {
        event!(
            Level::INFO,
            "started {} {}",
            launched.program,
            launched.argument
        );
    }

    let outcome = EventLoop::new(clock, refresh).run(&mut scheduler, duration);

    let report = Report {
        outcome,
        stats: *scheduler.session().stats(),
        final_budget: scheduler.session().budget().opcodes(),
        opcodes_run: scheduler.machine().opcodes_run(),
        status_line: scheduler.machine().status_line(),
    };
    if cli.show_screen {
        event!(Level::DEBUG, "the screen was drawn {} times", screen.frames());
        screen.print()?;
    }
    report.print()?;
    Ok(())
}

fn main() {
    match run_soak() {
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
        Ok(()) => {
            std::process::exit(0);
        }
    }
}

#[test]
fn command_argument_follows_the_first_space() {
    assert_eq!(
        parse_command("GAME.EXE  TOWN.ZZT"),
        Command::WithArgument("GAME.EXE".to_string(), "TOWN.ZZT".to_string())
    );
    assert_eq!(
        parse_command("SETUP.EXE"),
        Command::Program("SETUP.EXE".to_string())
    );
}
