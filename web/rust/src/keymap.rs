//! Maps the browser's `KeyboardEvent.key` names to PC keyboard scan
//! codes (set 1).
use std::collections::HashMap;

/// Keys whose name doesn't change with Shift.
const NAMED: &[(&str, u8)] = &[
    ("Escape", 0x01),
    ("Backspace", 0x0e),
    ("Tab", 0x0f),
    ("Enter", 0x1c),
    (" ", 0x39),
    ("CapsLock", 0x3a),
    ("F1", 0x3b),
    ("F2", 0x3c),
    ("F3", 0x3d),
    ("F4", 0x3e),
    ("F5", 0x3f),
    ("F6", 0x40),
    ("F7", 0x41),
    ("F8", 0x42),
    ("F9", 0x43),
    ("F10", 0x44),
    ("NumLock", 0x45),
    ("ScrollLock", 0x46),
    ("Home", 0x47),
    ("ArrowUp", 0x48),
    ("PageUp", 0x49),
    ("ArrowLeft", 0x4b),
    ("ArrowRight", 0x4d),
    ("End", 0x4f),
    ("ArrowDown", 0x50),
    ("PageDown", 0x51),
    ("Insert", 0x52),
    ("Delete", 0x53),
    ("F11", 0x57),
    ("F12", 0x58),
];

/// Keys which produce a character; each entry gives the unshifted and
/// shifted character.
const PRINTING: &[(u8, &str, &str)] = &[
    (0x02, "1", "!"),
    (0x03, "2", "@"),
    (0x04, "3", "#"),
    (0x05, "4", "$"),
    (0x06, "5", "%"),
    (0x07, "6", "^"),
    (0x08, "7", "&"),
    (0x09, "8", "*"),
    (0x0a, "9", "("),
    (0x0b, "0", ")"),
    (0x0c, "-", "_"),
    (0x0d, "=", "+"),
    (0x10, "q", "Q"),
    (0x11, "w", "W"),
    (0x12, "e", "E"),
    (0x13, "r", "R"),
    (0x14, "t", "T"),
    (0x15, "y", "Y"),
    (0x16, "u", "U"),
    (0x17, "i", "I"),
    (0x18, "o", "O"),
    (0x19, "p", "P"),
    (0x1a, "[", "{"),
    (0x1b, "]", "}"),
    (0x1e, "a", "A"),
    (0x1f, "s", "S"),
    (0x20, "d", "D"),
    (0x21, "f", "F"),
    (0x22, "g", "G"),
    (0x23, "h", "H"),
    (0x24, "j", "J"),
    (0x25, "k", "K"),
    (0x26, "l", "L"),
    (0x27, ";", ":"),
    (0x28, "'", "\""),
    (0x29, "`", "~"),
    (0x2b, "\\", "|"),
    (0x2c, "z", "Z"),
    (0x2d, "x", "X"),
    (0x2e, "c", "C"),
    (0x2f, "v", "V"),
    (0x30, "b", "B"),
    (0x31, "n", "N"),
    (0x32, "m", "M"),
    (0x33, ",", "<"),
    (0x34, ".", ">"),
    (0x35, "/", "?"),
];

pub(crate) fn scancode_keymap() -> HashMap<&'static str, u8> {
    let mut map: HashMap<&'static str, u8> = NAMED.iter().copied().collect();
    for (code, plain, shifted) in PRINTING.iter().copied() {
        map.insert(plain, code);
        map.insert(shifted, code);
    }
    map
}

#[cfg(test)]
mod tests {
    use pacer::{KeyMap, NON_PRINTING_CODES};

    use super::*;

    #[test]
    fn letters_map_regardless_of_shift() {
        let map = scancode_keymap();
        assert_eq!(map.device_code("a"), 0x1e);
        assert_eq!(map.device_code("A"), 0x1e);
        assert_eq!(map.device_code("?"), 0x35);
    }

    #[test]
    fn keypad_keys_are_non_printing() {
        let map = scancode_keymap();
        for key in [
            "Home",
            "End",
            "PageUp",
            "PageDown",
            "Insert",
            "Delete",
            "ArrowUp",
            "ArrowDown",
            "ArrowLeft",
            "ArrowRight",
        ] {
            assert!(
                NON_PRINTING_CODES.contains(&map.device_code(key)),
                "{key} should be a non-printing key"
            );
        }
        assert!(!NON_PRINTING_CODES.contains(&map.device_code("Enter")));
    }

    #[test]
    fn unknown_keys_have_no_code() {
        let map = scancode_keymap();
        assert_eq!(map.device_code("Meta"), 0);
        assert_eq!(map.device_code("Shift"), 0);
    }

    #[test]
    fn no_key_is_listed_twice() {
        let plain = NAMED.len() + 2 * PRINTING.len();
        assert_eq!(scancode_keymap().len(), plain);
    }
}
