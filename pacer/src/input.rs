//! Translation of host input events into virtual device changes.
//!
//! The host tells us about keys, mouse motion and buttons as they
//! happen.  Gamepads, on the other hand, are polled once per
//! presented frame because hosts generally don't deliver events for
//! them.
use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;

use conv::*;
use tracing::{event, Level};

use super::machine::{Axis, DeviceInput, Modifier};

/// Device codes in this range belong to keys which don't produce a
/// character (cursor and editing keys on the numeric keypad).
pub const NON_PRINTING_CODES: RangeInclusive<u8> = 0x46..=0x53;

/// Maps a host key name (such as "Enter" or "a") to the virtual
/// keyboard's device code.  Zero means the key has no device code.
pub trait KeyMap {
    fn device_code(&self, key: &str) -> u8;
}

impl KeyMap for HashMap<&'static str, u8> {
    fn device_code(&self, key: &str) -> u8 {
        self.get(key).copied().unwrap_or(0)
    }
}

/// Identifies an input surface (for example, an HTML element) of the
/// host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u32);

/// Which kinds of input a surface delivers to the emulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputKinds {
    pub keyboard: bool,
    pub pointer: bool,
}

impl InputKinds {
    pub const ALL: InputKinds = InputKinds {
        keyboard: true,
        pointer: true,
    };
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostInput {
    KeyDown { key: String, key_code: u32 },
    KeyUp { key: String, key_code: u32 },
    /// Relative pointer motion, in host pixels.
    MouseMove { dx: f64, dy: f64 },
    MouseDown { button: u8 },
    MouseUp { button: u8 },
}

impl HostInput {
    fn is_keyboard(&self) -> bool {
        matches!(self, HostInput::KeyDown { .. } | HostInput::KeyUp { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostInputEvent {
    pub surface: SurfaceId,
    pub input: HostInput,
}

/// What the bridge did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputResponse {
    /// The event targeted a surface which isn't routed to the
    /// emulation.
    NotRouted,
    /// The event was routed, but meant nothing to the virtual machine.
    Unhandled,
    Consumed,
    /// Consumed; the host should also capture the pointer.
    CapturePointer,
}

impl InputResponse {
    /// Whether the host should suppress its own handling of the event.
    pub fn suppress_default(self) -> bool {
        matches!(self, InputResponse::Consumed | InputResponse::CapturePointer)
    }
}

/// The state of one connected gamepad at the time it was polled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GamepadSnapshot {
    /// Axis positions, each nominally in [-1, 1].
    pub axes: Vec<f64>,
    pub buttons: Vec<bool>,
}

impl GamepadSnapshot {
    fn usable(&self) -> bool {
        self.axes.len() >= 2 && !self.buttons.is_empty()
    }
}

fn modifier_for_key(key: &str) -> Option<Modifier> {
    match key {
        "Shift" => Some(Modifier::Shift),
        "Control" => Some(Modifier::Ctrl),
        "Alt" | "AltGraph" => Some(Modifier::Alt),
        _ => None,
    }
}

/// The character a key produces: the key itself when its name is a
/// single character, otherwise a control code if the host reported
/// one.
fn character_code(key: &str, key_code: u32) -> u32 {
    let mut chars = key.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) => u32::from(ch),
        _ if key_code < 32 => key_code,
        _ => 0,
    }
}

fn scale_mouse_delta(delta: f64, sensitivity: f64) -> i32 {
    let scaled = (delta * sensitivity).clamp(f64::from(i32::MIN), f64::from(i32::MAX));
    scaled.approx_as_by::<i32, RoundToZero>().unwrap_or(0)
}

/// Scales a pad axis to the joystick range.  Halves round up, so
/// -0.5 becomes -63 and 0.5 becomes 64.
fn joystick_axis_value(position: f64) -> i8 {
    (position.clamp(-1.0, 1.0) * 127.0 + 0.5)
        .floor()
        .approx_as_by::<i8, RoundToZero>()
        .unwrap_or(0)
}

pub struct InputBridge {
    routes: BTreeMap<SurfaceId, InputKinds>,
    keymap: Box<dyn KeyMap>,
}

impl InputBridge {
    pub fn new(keymap: Box<dyn KeyMap>) -> InputBridge {
        InputBridge {
            routes: BTreeMap::new(),
            keymap,
        }
    }

    /// Routes input of the given kinds arriving at `surface` to the
    /// emulation.  Input arriving at any other surface is ignored.
    pub fn route(&mut self, surface: SurfaceId, kinds: InputKinds) {
        event!(
            Level::DEBUG,
            "routing {kinds:?} input from surface {surface:?} to the emulation"
        );
        self.routes.insert(surface, kinds);
    }

    pub fn unroute(&mut self, surface: SurfaceId) {
        self.routes.remove(&surface);
    }

    fn is_routed(&self, event: &HostInputEvent) -> bool {
        match self.routes.get(&event.surface) {
            Some(kinds) if event.input.is_keyboard() => kinds.keyboard,
            Some(kinds) => kinds.pointer,
            None => false,
        }
    }

    pub fn handle<D: DeviceInput + ?Sized>(
        &self,
        event: &HostInputEvent,
        mouse_sensitivity: f64,
        devices: &mut D,
    ) -> InputResponse {
        if !self.is_routed(event) {
            return InputResponse::NotRouted;
        }
        match &event.input {
            HostInput::KeyDown { key, key_code } => self.key_down(key, *key_code, devices),
            HostInput::KeyUp { key, .. } => self.key_up(key, devices),
            HostInput::MouseMove { dx, dy } => {
                devices.set_mouse_axis(Axis::X, scale_mouse_delta(*dx, mouse_sensitivity));
                devices.set_mouse_axis(Axis::Y, scale_mouse_delta(*dy, mouse_sensitivity));
                InputResponse::Consumed
            }
            HostInput::MouseDown { button } => {
                devices.set_mouse_button(*button, true);
                InputResponse::CapturePointer
            }
            HostInput::MouseUp { button } => {
                devices.set_mouse_button(*button, false);
                InputResponse::Consumed
            }
        }
    }

    fn key_down<D: DeviceInput + ?Sized>(
        &self,
        key: &str,
        key_code: u32,
        devices: &mut D,
    ) -> InputResponse {
        if let Some(modifier) = modifier_for_key(key) {
            devices.set_modifier(modifier, true);
            return InputResponse::Consumed;
        }
        let code = self.keymap.device_code(key);
        let chr = if NON_PRINTING_CODES.contains(&code) {
            0
        } else {
            character_code(key, key_code)
        };
        if chr == 0 && code == 0 {
            event!(Level::TRACE, "key '{key}' has no mapping");
            return InputResponse::Unhandled;
        }
        devices.set_key_down(chr, code);
        InputResponse::Consumed
    }

    fn key_up<D: DeviceInput + ?Sized>(&self, key: &str, devices: &mut D) -> InputResponse {
        if let Some(modifier) = modifier_for_key(key) {
            devices.set_modifier(modifier, false);
            return InputResponse::Consumed;
        }
        match self.keymap.device_code(key) {
            0 => InputResponse::Unhandled,
            code => {
                devices.set_key_up(code);
                InputResponse::Consumed
            }
        }
    }

    /// Forwards the state of the connected gamepads.  All usable pads
    /// drive the same virtual joystick; its button is down if any
    /// button on any pad is down.
    pub fn poll_gamepads<D: DeviceInput + ?Sized>(
        &self,
        pads: &[GamepadSnapshot],
        devices: &mut D,
    ) {
        let mut any_usable = false;
        let mut pressed = false;
        for pad in pads.iter().filter(|pad| pad.usable()) {
            any_usable = true;
            devices.set_joy_axis(Axis::X, joystick_axis_value(pad.axes[0]));
            devices.set_joy_axis(Axis::Y, joystick_axis_value(pad.axes[1]));
            pressed |= pad.buttons.iter().any(|b| *b);
        }
        if any_usable {
            devices.set_joy_button(0, pressed);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::devices::{KeyEdge, VirtualDeviceState};

    const CANVAS: SurfaceId = SurfaceId(1);
    const ELSEWHERE: SurfaceId = SurfaceId(2);

    fn bridge() -> InputBridge {
        let keymap: HashMap<&'static str, u8> = [
            ("a", 0x1e),
            ("Enter", 0x1c),
            ("ArrowUp", 0x48),
            ("F1", 0x3b),
        ]
        .into_iter()
        .collect();
        let mut bridge = InputBridge::new(Box::new(keymap));
        bridge.route(CANVAS, InputKinds::ALL);
        bridge
    }

    fn on(surface: SurfaceId, input: HostInput) -> HostInputEvent {
        HostInputEvent { surface, input }
    }

    fn key_down(key: &str, key_code: u32) -> HostInput {
        HostInput::KeyDown {
            key: key.to_string(),
            key_code,
        }
    }

    fn key_up(key: &str) -> HostInput {
        HostInput::KeyUp {
            key: key.to_string(),
            key_code: 0,
        }
    }

    #[test]
    fn printable_key_sends_character_and_code() {
        let mut devices = VirtualDeviceState::new();
        let response = bridge().handle(&on(CANVAS, key_down("a", 65)), 4.0, &mut devices);
        assert_eq!(response, InputResponse::Consumed);
        assert_eq!(
            devices.next_key_edge(),
            Some(KeyEdge::Down {
                chr: u32::from(b'a'),
                code: 0x1e
            })
        );
    }

    #[test]
    fn control_key_uses_legacy_key_code() {
        let mut devices = VirtualDeviceState::new();
        bridge().handle(&on(CANVAS, key_down("Enter", 13)), 4.0, &mut devices);
        assert_eq!(
            devices.next_key_edge(),
            Some(KeyEdge::Down { chr: 13, code: 0x1c })
        );
    }

    #[test]
    fn keypad_navigation_keys_send_no_character() {
        let mut devices = VirtualDeviceState::new();
        bridge().handle(&on(CANVAS, key_down("ArrowUp", 38)), 4.0, &mut devices);
        assert_eq!(
            devices.next_key_edge(),
            Some(KeyEdge::Down { chr: 0, code: 0x48 })
        );
    }

    #[test]
    fn unmapped_named_key_is_not_consumed() {
        let mut devices = VirtualDeviceState::new();
        let response = bridge().handle(&on(CANVAS, key_down("Meta", 91)), 4.0, &mut devices);
        assert_eq!(response, InputResponse::Unhandled);
        assert_eq!(devices.next_key_edge(), None);
    }

    #[test]
    fn unmapped_character_is_still_sent() {
        let mut devices = VirtualDeviceState::new();
        bridge().handle(&on(CANVAS, key_down("é", 0)), 4.0, &mut devices);
        assert_eq!(
            devices.next_key_edge(),
            Some(KeyEdge::Down { chr: 0xe9, code: 0 })
        );
    }

    #[test]
    fn modifiers_set_and_clear_bits() {
        let bridge = bridge();
        let mut devices = VirtualDeviceState::new();
        assert_eq!(
            bridge.handle(&on(CANVAS, key_down("Shift", 16)), 4.0, &mut devices),
            InputResponse::Consumed
        );
        bridge.handle(&on(CANVAS, key_down("AltGraph", 18)), 4.0, &mut devices);
        assert_eq!(devices.modifiers(), 0x09);
        assert_eq!(
            bridge.handle(&on(CANVAS, key_up("Shift")), 4.0, &mut devices),
            InputResponse::Consumed
        );
        assert_eq!(devices.modifiers(), 0x08);
        assert!(devices.modifier_down(Modifier::Alt));
        assert_eq!(devices.next_key_edge(), None);
    }

    #[test]
    fn key_up_sends_device_code() {
        let mut devices = VirtualDeviceState::new();
        bridge().handle(&on(CANVAS, key_up("F1")), 4.0, &mut devices);
        assert_eq!(devices.next_key_edge(), Some(KeyEdge::Up { code: 0x3b }));
    }

    #[test]
    fn events_for_other_surfaces_are_ignored() {
        let bridge = bridge();
        let mut devices = VirtualDeviceState::new();
        for input in [
            key_down("a", 65),
            key_down("Shift", 16),
            HostInput::MouseMove { dx: 3.0, dy: 1.0 },
            HostInput::MouseDown { button: 0 },
        ] {
            assert_eq!(
                bridge.handle(&on(ELSEWHERE, input), 4.0, &mut devices),
                InputResponse::NotRouted
            );
        }
        assert_eq!(devices, VirtualDeviceState::new());
    }

    #[test]
    fn keyboard_only_surface_does_not_take_pointer_input() {
        let mut bridge = bridge();
        bridge.route(
            ELSEWHERE,
            InputKinds {
                keyboard: true,
                pointer: false,
            },
        );
        let mut devices = VirtualDeviceState::new();
        assert_eq!(
            bridge.handle(
                &on(ELSEWHERE, HostInput::MouseDown { button: 0 }),
                4.0,
                &mut devices
            ),
            InputResponse::NotRouted
        );
        assert_eq!(
            bridge.handle(&on(ELSEWHERE, key_down("a", 65)), 4.0, &mut devices),
            InputResponse::Consumed
        );
    }

    #[test]
    fn mouse_motion_is_scaled_by_sensitivity() {
        let mut devices = VirtualDeviceState::new();
        bridge().handle(
            &on(CANVAS, HostInput::MouseMove { dx: 3.0, dy: -1.6 }),
            4.0,
            &mut devices,
        );
        assert_eq!(devices.take_mouse_delta(), (12, -6));
    }

    #[test]
    fn mouse_down_asks_for_pointer_capture() {
        let bridge = bridge();
        let mut devices = VirtualDeviceState::new();
        assert_eq!(
            bridge.handle(&on(CANVAS, HostInput::MouseDown { button: 1 }), 4.0, &mut devices),
            InputResponse::CapturePointer
        );
        assert_eq!(devices.mouse_buttons(), 0b10);
        bridge.handle(&on(CANVAS, HostInput::MouseUp { button: 1 }), 4.0, &mut devices);
        assert_eq!(devices.mouse_buttons(), 0);
    }

    #[test]
    fn any_pressed_pad_presses_the_joystick_button() {
        let mut devices = VirtualDeviceState::new();
        let pressed = GamepadSnapshot {
            axes: vec![1.0, -1.0],
            buttons: vec![false, true],
        };
        let idle = GamepadSnapshot {
            axes: vec![0.0, 0.25],
            buttons: vec![false, false, false],
        };
        bridge().poll_gamepads(&[pressed, idle], &mut devices);
        assert_eq!(devices.joy_buttons(), 0b1);
        assert_eq!(devices.joy_axis(Axis::X), 0);
        assert_eq!(devices.joy_axis(Axis::Y), 32);
    }

    #[test]
    fn axes_are_rounded_and_clamped() {
        let mut devices = VirtualDeviceState::new();
        let pad = GamepadSnapshot {
            axes: vec![1.7, -0.3],
            buttons: vec![false],
        };
        bridge().poll_gamepads(&[pad], &mut devices);
        assert_eq!(devices.joy_axis(Axis::X), 127);
        assert_eq!(devices.joy_axis(Axis::Y), -38);
        assert_eq!(devices.joy_buttons(), 0);
    }

    #[test]
    fn half_way_axis_positions_round_up() {
        assert_eq!(joystick_axis_value(-0.5), -63);
        assert_eq!(joystick_axis_value(0.5), 64);
        assert_eq!(joystick_axis_value(-1.0), -127);
        assert_eq!(joystick_axis_value(1.0), 127);
    }

    #[test]
    fn pads_without_enough_controls_are_skipped() {
        let mut devices = VirtualDeviceState::new();
        devices.set_joy_button(0, true);
        let pad = GamepadSnapshot {
            axes: vec![0.2],
            buttons: vec![false],
        };
        bridge().poll_gamepads(&[pad], &mut devices);
        assert_eq!(devices.joy_buttons(), 0b1);
        assert_eq!(devices.joy_axis(Axis::X), 0);
    }
}
