//! Browser bindings for the pacing core.
//!
//! The page creates the virtual machine, the renderer, the audio
//! output and the virtual file system in JavaScript, and passes them
//! to [`create_emulator`].  From then on the emulator runs itself from
//! browser callbacks until it halts or [`Emulator::stop`] is called.
#![deny(unreachable_pub)]
#![deny(unsafe_code)]
#![deny(unused_crate_dependencies)]

mod clock;
mod host;
mod input;
mod keymap;
mod native;
mod sinks;
mod surface;
mod utils;

use std::rc::Rc;

use pacer::{start_session, Config, SessionState};
use serde::Serialize;
use tracing::{event, Level};
use wasm_bindgen::prelude::*;
use web_sys::{Document, HtmlCanvasElement, Window};

use clock::BrowserClock;
use host::Host;
use native::JsMachine;
use sinks::{JsAudio, JsFileSystem, JsRender};

pub use native::NativeMachine;
pub use sinks::{AudioTarget, RenderTarget, VirtualFs};

#[wasm_bindgen(start)]
pub fn start() -> Result<(), JsValue> {
    utils::set_panic_hook();
    Ok(())
}

fn try_log_level_from_str(log_level: &str) -> Result<Level, String> {
    match log_level {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        invalid => Err(format!("invalid log level '{invalid}'")),
    }
}

#[wasm_bindgen]
pub fn init(log_level: &str) -> Result<(), JsValue> {
    tracing_wasm::set_as_global_default_with_config(
        tracing_wasm::WASMLayerConfigBuilder::new()
            .set_max_level(try_log_level_from_str(log_level)?)
            .build(),
    );
    event!(
        Level::INFO,
        "init: tracing initialised (max level is {log_level})"
    );
    Ok(())
}

fn window() -> Result<Window, JsValue> {
    web_sys::window().ok_or_else(|| JsValue::from_str("no global window exists"))
}

fn document(window: &Window) -> Result<Document, JsValue> {
    window
        .document()
        .ok_or_else(|| JsValue::from_str("the window has no document"))
}

fn config_from_options(options: JsValue) -> Result<Config, JsValue> {
    if options.is_undefined() || options.is_null() {
        return Ok(Config::default());
    }
    serde_wasm_bindgen::from_value(options)
        .map_err(|e| JsValue::from_str(&format!("invalid emulator options: {e}")))
}

/// Loads the configured programs into `machine` and starts running
/// it.  Fails if a program cannot be found or loaded.
#[wasm_bindgen]
pub fn create_emulator(
    canvas: HtmlCanvasElement,
    machine: NativeMachine,
    render: RenderTarget,
    audio: Option<AudioTarget>,
    vfs: VirtualFs,
    options: JsValue,
) -> Result<Emulator, JsValue> {
    let config = config_from_options(options)?;
    let window = window()?;
    let document = document(&window)?;
    let performance = window
        .performance()
        .ok_or_else(|| JsValue::from_str("window.performance is unavailable"))?;

    let mut fs = JsFileSystem::new(vfs);
    let scheduler = start_session(
        JsMachine::new(machine),
        Box::new(JsRender::new(render, canvas.clone())),
        Box::new(JsAudio::new(audio)),
        &mut fs,
        BrowserClock::new(performance),
        Box::new(keymap::scancode_keymap()),
        &config,
    )
    .map_err(|e| {
        event!(Level::ERROR, "emulator startup failed: {e}");
        JsValue::from_str(&e.to_string())
    })?;

    let host = Host::new(window, document, canvas, scheduler);
    host.start()?;
    Ok(Emulator { host })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsView {
    state: &'static str,
    quanta: u64,
    interrupts: u64,
    frames_presented: u64,
    immediate_continuations: u64,
    deferred_continuations: u64,
    opcode_budget: u32,
}

fn state_name(state: SessionState) -> &'static str {
    match state {
        SessionState::Ready => "ready",
        SessionState::Running => "running",
        SessionState::Halted => "halted",
        SessionState::Stopped => "stopped",
    }
}

/// A running emulator.
#[wasm_bindgen]
pub struct Emulator {
    host: Rc<Host>,
}

#[wasm_bindgen]
impl Emulator {
    /// Stops the emulation.  It cannot be restarted.
    pub fn stop(&self) {
        self.host.stop();
    }

    /// Counters describing the session so far.
    pub fn stats(&self) -> Result<JsValue, JsValue> {
        let scheduler = self
            .host
            .scheduler()
            .try_borrow()
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        let session = scheduler.session();
        let stats = session.stats();
        let view = StatsView {
            state: state_name(session.state()),
            quanta: stats.quanta,
            interrupts: stats.interrupts,
            frames_presented: stats.frames_presented,
            immediate_continuations: stats.immediate_continuations,
            deferred_continuations: stats.deferred_continuations,
            opcode_budget: session.budget().opcodes(),
        };
        serde_wasm_bindgen::to_value(&view).map_err(|e| JsValue::from_str(&e.to_string()))
    }
}

#[test]
fn log_levels_parse() {
    assert_eq!(try_log_level_from_str("warn"), Ok(Level::WARN));
    assert!(try_log_level_from_str("loud").is_err());
}
