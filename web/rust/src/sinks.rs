//! Bindings to the JavaScript renderer, audio output and virtual file
//! system.
use std::time::Duration;

use js_sys::{Array, Function};
use pacer::{AudioSink, FileSystem, ProgramHandle, RenderSink};
use tracing::{event, Level};
use wasm_bindgen::prelude::*;
use web_sys::HtmlCanvasElement;

use crate::surface::draw_error_message;

#[wasm_bindgen]
extern "C" {
    /// Draws the virtual machine's screen onto a canvas.
    pub type RenderTarget;

    #[wasm_bindgen(method)]
    fn render(this: &RenderTarget, heap: &[u8], video_mode: u8, time_ms: f64);
    #[wasm_bindgen(method, js_name = setCharset)]
    fn set_charset(this: &RenderTarget, width: u32, height: u32, glyphs: &[u8]);
    #[wasm_bindgen(method, js_name = setPalette)]
    fn set_palette(this: &RenderTarget, colours: &[u32]);

    /// Plays the PC speaker.
    pub type AudioTarget;

    #[wasm_bindgen(method)]
    fn on(this: &AudioTarget, frequency: f64);
    #[wasm_bindgen(method)]
    fn off(this: &AudioTarget);

    /// The virtual file system.
    pub type VirtualFs;

    /// Returns a negative handle if the file does not exist.
    #[wasm_bindgen(method, js_name = open)]
    fn open_file(this: &VirtualFs, name: &str, mode: i32) -> i32;
    #[wasm_bindgen(method, js_name = close)]
    fn close_file(this: &VirtualFs, handle: i32);
    #[wasm_bindgen(method, js_name = list)]
    fn list_files(this: &VirtualFs, filter: &Function) -> Array;
}

const READ_ONLY: i32 = 0;

pub(crate) struct JsRender {
    target: RenderTarget,
    canvas: HtmlCanvasElement,
}

impl JsRender {
    pub(crate) fn new(target: RenderTarget, canvas: HtmlCanvasElement) -> JsRender {
        JsRender { target, canvas }
    }
}

impl RenderSink for JsRender {
    fn render(&mut self, display_memory: &[u8], video_mode: u8, now: Duration) {
        self.target
            .render(display_memory, video_mode, now.as_secs_f64() * 1000.0);
    }

    fn set_charset(&mut self, width: u32, height: u32, glyphs: &[u8]) {
        self.target.set_charset(width, height, glyphs);
    }

    fn set_palette(&mut self, colours: &[u32]) {
        self.target.set_palette(colours);
    }

    fn show_error(&mut self, message: &str) {
        if let Err(e) = draw_error_message(&self.canvas, message) {
            event!(Level::ERROR, "failed to show '{message}': {e:?}");
        }
    }
}

/// Speaker output.  The page may not provide any, in which case we
/// stay silent.
pub(crate) struct JsAudio {
    target: Option<AudioTarget>,
}

impl JsAudio {
    pub(crate) fn new(target: Option<AudioTarget>) -> JsAudio {
        JsAudio { target }
    }
}

impl AudioSink for JsAudio {
    fn speaker_on(&mut self, frequency: f64) {
        if let Some(target) = self.target.as_ref() {
            target.on(frequency);
        }
    }

    fn speaker_off(&mut self) {
        if let Some(target) = self.target.as_ref() {
            target.off();
        }
    }
}

pub(crate) struct JsFileSystem {
    vfs: VirtualFs,
    everything: Function,
}

impl JsFileSystem {
    pub(crate) fn new(vfs: VirtualFs) -> JsFileSystem {
        JsFileSystem {
            vfs,
            everything: Function::new_with_args("name", "return true;"),
        }
    }
}

impl FileSystem for JsFileSystem {
    fn open(&mut self, name: &str) -> Option<ProgramHandle> {
        match self.vfs.open_file(name, READ_ONLY) {
            handle if handle < 0 => None,
            handle => Some(ProgramHandle(handle)),
        }
    }

    fn close(&mut self, handle: ProgramHandle) {
        self.vfs.close_file(handle.0);
    }

    fn list(&self, predicate: &dyn Fn(&str) -> bool) -> Vec<String> {
        self.vfs
            .list_files(&self.everything)
            .iter()
            .filter_map(|name| name.as_string())
            .filter(|name| predicate(name))
            .collect()
    }
}
