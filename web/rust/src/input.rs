//! Conversion of DOM events and gamepad state into the emulation's
//! host input types.
use conv::*;
use pacer::{GamepadSnapshot, HostInput, HostInputEvent, SurfaceId};
use tracing::{event, Level};
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{
    Event, Gamepad, GamepadButton, HtmlCanvasElement, KeyboardEvent, MouseEvent, Navigator,
};

/// The emulator's canvas.
pub(crate) const CANVAS: SurfaceId = SurfaceId(1);
/// Anything else on the page.
const ELSEWHERE: SurfaceId = SurfaceId(0);

fn surface_of(event: &Event, canvas: &HtmlCanvasElement) -> SurfaceId {
    match event.target() {
        Some(target) if AsRef::<JsValue>::as_ref(&target) == AsRef::<JsValue>::as_ref(canvas) => {
            CANVAS
        }
        _ => ELSEWHERE,
    }
}

pub(crate) fn key_down(event: &KeyboardEvent, canvas: &HtmlCanvasElement) -> HostInputEvent {
    HostInputEvent {
        surface: surface_of(event, canvas),
        input: HostInput::KeyDown {
            key: event.key(),
            key_code: event.key_code(),
        },
    }
}

pub(crate) fn key_up(event: &KeyboardEvent, canvas: &HtmlCanvasElement) -> HostInputEvent {
    HostInputEvent {
        surface: surface_of(event, canvas),
        input: HostInput::KeyUp {
            key: event.key(),
            key_code: event.key_code(),
        },
    }
}

pub(crate) fn mouse_move(event: &MouseEvent, canvas: &HtmlCanvasElement) -> HostInputEvent {
    HostInputEvent {
        surface: surface_of(event, canvas),
        input: HostInput::MouseMove {
            dx: f64::from(event.movement_x()),
            dy: f64::from(event.movement_y()),
        },
    }
}

fn mouse_button(event: &MouseEvent) -> Option<u8> {
    match u8::value_from(event.button()) {
        Ok(button) => Some(button),
        Err(e) => {
            event!(Level::TRACE, "ignoring mouse button {}: {e}", event.button());
            None
        }
    }
}

pub(crate) fn mouse_down(event: &MouseEvent, canvas: &HtmlCanvasElement) -> Option<HostInputEvent> {
    mouse_button(event).map(|button| HostInputEvent {
        surface: surface_of(event, canvas),
        input: HostInput::MouseDown { button },
    })
}

pub(crate) fn mouse_up(event: &MouseEvent, canvas: &HtmlCanvasElement) -> Option<HostInputEvent> {
    mouse_button(event).map(|button| HostInputEvent {
        surface: surface_of(event, canvas),
        input: HostInput::MouseUp { button },
    })
}

fn snapshot(pad: &Gamepad) -> GamepadSnapshot {
    GamepadSnapshot {
        axes: pad.axes().iter().filter_map(|axis| axis.as_f64()).collect(),
        buttons: pad
            .buttons()
            .iter()
            .filter_map(|button| button.dyn_into::<GamepadButton>().ok())
            .map(|button| button.pressed())
            .collect(),
    }
}

/// Polls the connected gamepads.  Empty slots in the browser's list
/// are skipped.
pub(crate) fn poll_gamepads(navigator: &Navigator) -> Vec<GamepadSnapshot> {
    match navigator.get_gamepads() {
        Ok(pads) => pads
            .iter()
            .filter_map(|pad| pad.dyn_into::<Gamepad>().ok())
            .map(|pad| snapshot(&pad))
            .collect(),
        Err(e) => {
            event!(Level::ERROR, "failed to poll gamepads: {e:?}");
            Vec::new()
        }
    }
}
