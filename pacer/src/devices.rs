//! A reference model of the virtual machine's input devices.
//!
//! Real virtual machines keep this state themselves.  This model is
//! for virtual machines which don't (such as the synthetic one in the
//! soak runner) and for checking what the input bridge did.
use std::collections::VecDeque;

use super::machine::{Axis, DeviceInput, HostFeature, Modifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEdge {
    Down { chr: u32, code: u8 },
    Up { code: u8 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VirtualDeviceState {
    modifiers: u8,
    key_edges: VecDeque<KeyEdge>,
    mouse_delta: [i32; 2],
    mouse_buttons: u8,
    joy_axes: [i8; 2],
    joy_buttons: u8,
    features: u8,
}

fn update_mask(mask: &mut u8, index: u8, down: bool) {
    if let Some(bit) = 1_u8.checked_shl(u32::from(index)) {
        if down {
            *mask |= bit;
        } else {
            *mask &= !bit;
        }
    }
}

impl VirtualDeviceState {
    pub fn new() -> VirtualDeviceState {
        VirtualDeviceState::default()
    }

    pub fn modifiers(&self) -> u8 {
        self.modifiers
    }

    pub fn modifier_down(&self, modifier: Modifier) -> bool {
        self.modifiers & modifier.bit() != 0
    }

    /// Removes the oldest key edge which has not been consumed yet.
    pub fn next_key_edge(&mut self) -> Option<KeyEdge> {
        self.key_edges.pop_front()
    }

    /// Returns the mouse motion accumulated since the last call, and
    /// resets it.
    pub fn take_mouse_delta(&mut self) -> (i32, i32) {
        let [x, y] = std::mem::take(&mut self.mouse_delta);
        (x, y)
    }

    pub fn mouse_buttons(&self) -> u8 {
        self.mouse_buttons
    }

    pub fn joy_axis(&self, axis: Axis) -> i8 {
        self.joy_axes[axis.index()]
    }

    pub fn joy_buttons(&self) -> u8 {
        self.joy_buttons
    }

    /// Answers the virtual machine's query for the feature numbered
    /// `id`.  Unknown features are absent.
    pub fn has_feature(&self, id: u32) -> bool {
        match HostFeature::from_id(id) {
            Some(feature) => self.features & feature_bit(feature) != 0,
            None => false,
        }
    }
}

fn feature_bit(feature: HostFeature) -> u8 {
    match feature {
        HostFeature::JoystickConnected => 0x01,
        HostFeature::MouseConnected => 0x02,
    }
}

impl DeviceInput for VirtualDeviceState {
    fn set_key_down(&mut self, chr: u32, code: u8) {
        self.key_edges.push_back(KeyEdge::Down { chr, code });
    }

    fn set_key_up(&mut self, code: u8) {
        self.key_edges.push_back(KeyEdge::Up { code });
    }

    fn set_modifier(&mut self, modifier: Modifier, down: bool) {
        if down {
            self.modifiers |= modifier.bit();
        } else {
            self.modifiers &= !modifier.bit();
        }
    }

    fn set_mouse_axis(&mut self, axis: Axis, delta: i32) {
        let slot = &mut self.mouse_delta[axis.index()];
        *slot = slot.saturating_add(delta);
    }

    fn set_mouse_button(&mut self, button: u8, down: bool) {
        update_mask(&mut self.mouse_buttons, button, down);
    }

    fn set_joy_axis(&mut self, axis: Axis, value: i8) {
        self.joy_axes[axis.index()] = value;
    }

    fn set_joy_button(&mut self, button: u8, down: bool) {
        update_mask(&mut self.joy_buttons, button, down);
    }

    fn set_host_feature(&mut self, feature: HostFeature, present: bool) {
        if present {
            self.features |= feature_bit(feature);
        } else {
            self.features &= !feature_bit(feature);
        }
    }
}

#[test]
fn feature_queries_use_the_machine_numbering() {
    let mut state = VirtualDeviceState::new();
    assert!(!state.has_feature(1));
    state.set_host_feature(HostFeature::JoystickConnected, true);
    state.set_host_feature(HostFeature::MouseConnected, true);
    assert!(state.has_feature(1));
    assert!(state.has_feature(2));
    assert!(!state.has_feature(0));
    assert!(!state.has_feature(3));
    state.set_host_feature(HostFeature::MouseConnected, false);
    assert!(!state.has_feature(2));
}

#[test]
fn key_edges_are_kept_in_order() {
    let mut state = VirtualDeviceState::new();
    state.set_key_down(u32::from(b'a'), 0x1e);
    state.set_key_up(0x1e);
    assert_eq!(
        state.next_key_edge(),
        Some(KeyEdge::Down {
            chr: u32::from(b'a'),
            code: 0x1e
        })
    );
    assert_eq!(state.next_key_edge(), Some(KeyEdge::Up { code: 0x1e }));
    assert_eq!(state.next_key_edge(), None);
}

#[test]
fn mouse_motion_accumulates_until_taken() {
    let mut state = VirtualDeviceState::new();
    state.set_mouse_axis(Axis::X, 8);
    state.set_mouse_axis(Axis::X, -3);
    state.set_mouse_axis(Axis::Y, 4);
    assert_eq!(state.take_mouse_delta(), (5, 4));
    assert_eq!(state.take_mouse_delta(), (0, 0));
}

#[test]
fn out_of_range_buttons_are_ignored() {
    let mut state = VirtualDeviceState::new();
    state.set_mouse_button(2, true);
    state.set_mouse_button(9, true);
    assert_eq!(state.mouse_buttons(), 0b100);
    state.set_mouse_button(2, false);
    assert_eq!(state.mouse_buttons(), 0);
}
