//! Bindings to the virtual machine, which is compiled separately and
//! handed to us as a JavaScript object.
use std::borrow::Cow;
use std::time::Duration;

use pacer::{
    AllocationFailure, Axis, DeviceInput, ExecutionResult, HostFeature, LoadError, Modifier,
    OutputEvent, ProgramHandle, ScratchPtr, VirtualMachine,
};
use tracing::{event, Level};
use wasm_bindgen::prelude::*;

use crate::clock::whole_millis;

#[wasm_bindgen]
extern "C" {
    /// The JavaScript object wrapping the virtual machine.
    pub type NativeMachine;

    #[wasm_bindgen(method)]
    fn init(this: &NativeMachine);
    #[wasm_bindgen(method, js_name = setTimerOffset)]
    fn set_timer_offset(this: &NativeMachine, millis_since_midnight: f64);
    #[wasm_bindgen(method, js_name = setTimeMs)]
    fn set_time_ms(this: &NativeMachine, millis: f64);
    #[wasm_bindgen(method)]
    fn execute(this: &NativeMachine, opcodes: u32) -> i32;
    #[wasm_bindgen(method, js_name = markTimer)]
    fn mark_timer(this: &NativeMachine);
    #[wasm_bindgen(method, js_name = markFrame)]
    fn mark_frame(this: &NativeMachine);
    #[wasm_bindgen(method)]
    fn key(this: &NativeMachine, chr: u32, code: u8);
    #[wasm_bindgen(method, js_name = keyUp)]
    fn key_up(this: &NativeMachine, code: u8);
    #[wasm_bindgen(method, js_name = kmodSet)]
    fn kmod_set(this: &NativeMachine, bit: u8);
    #[wasm_bindgen(method, js_name = kmodClear)]
    fn kmod_clear(this: &NativeMachine, bit: u8);
    #[wasm_bindgen(method, js_name = mouseAxis)]
    fn mouse_axis(this: &NativeMachine, axis: u8, delta: i32);
    #[wasm_bindgen(method, js_name = mouseSet)]
    fn mouse_set(this: &NativeMachine, button: u8);
    #[wasm_bindgen(method, js_name = mouseClear)]
    fn mouse_clear(this: &NativeMachine, button: u8);
    #[wasm_bindgen(method, js_name = joyAxis)]
    fn joy_axis(this: &NativeMachine, axis: u8, value: i8);
    #[wasm_bindgen(method, js_name = joySet)]
    fn joy_set(this: &NativeMachine, button: u8);
    #[wasm_bindgen(method, js_name = joyClear)]
    fn joy_clear(this: &NativeMachine, button: u8);
    #[wasm_bindgen(method, js_name = setHostFeature)]
    fn set_host_feature(this: &NativeMachine, id: u32, present: bool);
    /// Returns the address of the allocated memory, or zero.
    #[wasm_bindgen(method)]
    fn malloc(this: &NativeMachine, len: u32) -> u32;
    #[wasm_bindgen(method)]
    fn free(this: &NativeMachine, ptr: u32);
    #[wasm_bindgen(method, js_name = writeBytes)]
    fn write_bytes(this: &NativeMachine, ptr: u32, bytes: &[u8]);
    /// Returns zero on success.
    #[wasm_bindgen(method, js_name = loadBinary)]
    fn load_binary(this: &NativeMachine, handle: i32, arg_ptr: u32) -> i32;
    #[wasm_bindgen(method, js_name = textMemory)]
    fn text_memory(this: &NativeMachine) -> Vec<u8>;
    #[wasm_bindgen(method, js_name = videoMode)]
    fn video_mode(this: &NativeMachine) -> u8;
    #[wasm_bindgen(method, js_name = drainOutput)]
    fn drain_output(this: &NativeMachine) -> JsValue;
}

/// Adapts a [`NativeMachine`] to [`VirtualMachine`].
pub(crate) struct JsMachine {
    native: NativeMachine,
}

impl JsMachine {
    pub(crate) fn new(native: NativeMachine) -> JsMachine {
        JsMachine { native }
    }
}

fn axis_number(axis: Axis) -> u8 {
    match axis {
        Axis::X => 0,
        Axis::Y => 1,
    }
}

impl DeviceInput for JsMachine {
    fn set_key_down(&mut self, chr: u32, code: u8) {
        self.native.key(chr, code);
    }

    fn set_key_up(&mut self, code: u8) {
        self.native.key_up(code);
    }

    fn set_modifier(&mut self, modifier: Modifier, down: bool) {
        if down {
            self.native.kmod_set(modifier.bit());
        } else {
            self.native.kmod_clear(modifier.bit());
        }
    }

    fn set_mouse_axis(&mut self, axis: Axis, delta: i32) {
        self.native.mouse_axis(axis_number(axis), delta);
    }

    fn set_mouse_button(&mut self, button: u8, down: bool) {
        if down {
            self.native.mouse_set(button);
        } else {
            self.native.mouse_clear(button);
        }
    }

    fn set_joy_axis(&mut self, axis: Axis, value: i8) {
        self.native.joy_axis(axis_number(axis), value);
    }

    fn set_joy_button(&mut self, button: u8, down: bool) {
        if down {
            self.native.joy_set(button);
        } else {
            self.native.joy_clear(button);
        }
    }

    fn set_host_feature(&mut self, feature: HostFeature, present: bool) {
        self.native.set_host_feature(feature.id(), present);
    }
}

impl VirtualMachine for JsMachine {
    fn init(&mut self) {
        self.native.init();
    }

    fn set_timer_offset(&mut self, since_midnight: Duration) {
        self.native.set_timer_offset(whole_millis(since_midnight));
    }

    fn observe_wall_clock(&mut self, now: Duration) {
        self.native.set_time_ms(now.as_secs_f64() * 1000.0);
    }

    fn execute(&mut self, budget: u32) -> ExecutionResult {
        let code = self.native.execute(budget);
        match ExecutionResult::try_from(code) {
            Ok(result) => result,
            Err(e) => {
                event!(Level::ERROR, "{e}; treating the machine as halted");
                ExecutionResult::Halted
            }
        }
    }

    fn signal_timer_interrupt(&mut self) {
        self.native.mark_timer();
    }

    fn mark_frame(&mut self) {
        self.native.mark_frame();
    }

    fn allocate(&mut self, len: usize) -> Result<ScratchPtr, AllocationFailure> {
        let failure = AllocationFailure { requested: len };
        let size = u32::try_from(len).map_err(|_| failure.clone())?;
        match self.native.malloc(size) {
            0 => Err(failure),
            ptr => Ok(ScratchPtr(ptr)),
        }
    }

    fn write(&mut self, ptr: ScratchPtr, bytes: &[u8]) {
        self.native.write_bytes(ptr.0, bytes);
    }

    fn free(&mut self, ptr: ScratchPtr) {
        self.native.free(ptr.0);
    }

    fn load_program(
        &mut self,
        program: ProgramHandle,
        argument: ScratchPtr,
    ) -> Result<(), LoadError> {
        match self.native.load_binary(program.0, argument.0) {
            0 => Ok(()),
            status => Err(LoadError {
                reason: format!("loadBinary returned status {status}"),
            }),
        }
    }

    fn display_memory(&self) -> Cow<'_, [u8]> {
        Cow::Owned(self.native.text_memory())
    }

    fn video_mode(&self) -> u8 {
        self.native.video_mode()
    }

    fn drain_output(&mut self) -> Vec<OutputEvent> {
        let value = self.native.drain_output();
        if value.is_undefined() || value.is_null() {
            return Vec::new();
        }
        match serde_wasm_bindgen::from_value(value) {
            Ok(events) => events,
            Err(e) => {
                event!(Level::ERROR, "drainOutput returned something unexpected: {e}");
                Vec::new()
            }
        }
    }
}
