//! Modifier key definitions and parsing

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ShortcutParseError;

// Hardware key codes for the eight recognized modifier keys.
pub const KEY_SHIFT_LEFT: u16 = 56;
pub const KEY_SHIFT_RIGHT: u16 = 60;
pub const KEY_CTRL_LEFT: u16 = 59;
pub const KEY_CTRL_RIGHT: u16 = 62;
pub const KEY_OPT_LEFT: u16 = 58;
pub const KEY_OPT_RIGHT: u16 = 61;
pub const KEY_CMD_LEFT: u16 = 55;
pub const KEY_CMD_RIGHT: u16 = 54;

bitflags! {
    /// Modifier keys held as part of a chord.
    ///
    /// Flags are side-specific; a chord matches a shortcut definition
    /// only when the two bitsets are exactly equal.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u32 {
        const SHIFT_LEFT  = 1 << 0;
        const SHIFT_RIGHT = 1 << 1;
        const CTRL_LEFT   = 1 << 2;
        const CTRL_RIGHT  = 1 << 3;
        const OPT_LEFT    = 1 << 4;
        const OPT_RIGHT   = 1 << 5;
        const CMD_LEFT    = 1 << 6;
        const CMD_RIGHT   = 1 << 7;
    }
}

impl Modifiers {
    /// Map a hardware key code to its modifier flag.
    ///
    /// Returns `None` for anything that is not one of the eight
    /// recognized modifier keys.
    pub fn from_key_code(key: u16) -> Option<Modifiers> {
        match key {
            KEY_SHIFT_LEFT => Some(Modifiers::SHIFT_LEFT),
            KEY_SHIFT_RIGHT => Some(Modifiers::SHIFT_RIGHT),
            KEY_CTRL_LEFT => Some(Modifiers::CTRL_LEFT),
            KEY_CTRL_RIGHT => Some(Modifiers::CTRL_RIGHT),
            KEY_OPT_LEFT => Some(Modifiers::OPT_LEFT),
            KEY_OPT_RIGHT => Some(Modifiers::OPT_RIGHT),
            KEY_CMD_LEFT => Some(Modifiers::CMD_LEFT),
            KEY_CMD_RIGHT => Some(Modifiers::CMD_RIGHT),
            _ => None,
        }
    }

    /// Parse a single modifier name (case-insensitive).
    ///
    /// Plain names ("cmd", "shift") alias the left-side key, which is
    /// what default bindings use; recorded bindings store the
    /// side-specific names emitted by `Display`.
    pub(crate) fn parse_single(s: &str) -> Option<Modifiers> {
        match s.to_lowercase().as_str() {
            "shift" | "shiftleft" | "shift_left" | "lshift" => Some(Modifiers::SHIFT_LEFT),
            "shiftright" | "shift_right" | "rshift" => Some(Modifiers::SHIFT_RIGHT),
            "ctrl" | "control" | "ctrlleft" | "ctrl_left" | "lctrl" => Some(Modifiers::CTRL_LEFT),
            "ctrlright" | "ctrl_right" | "rctrl" | "controlright" => Some(Modifiers::CTRL_RIGHT),
            "opt" | "option" | "alt" | "optleft" | "opt_left" | "lalt" => Some(Modifiers::OPT_LEFT),
            "optright" | "opt_right" | "ralt" | "altgr" => Some(Modifiers::OPT_RIGHT),
            "cmd" | "command" | "meta" | "super" | "win" | "cmdleft" | "cmd_left" | "lcmd" => {
                Some(Modifiers::CMD_LEFT)
            }
            "cmdright" | "cmd_right" | "rcmd" => Some(Modifiers::CMD_RIGHT),
            _ => None,
        }
    }
}

// Stored in settings as the "CtrlLeft+Shift" string form rather than
// raw bits, so the JSON stays hand-editable.
impl Serialize for Modifiers {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Modifiers {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Modifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Modifiers, &str); 8] = [
            (Modifiers::CTRL_LEFT, "CtrlLeft"),
            (Modifiers::CTRL_RIGHT, "CtrlRight"),
            (Modifiers::OPT_LEFT, "OptLeft"),
            (Modifiers::OPT_RIGHT, "OptRight"),
            (Modifiers::SHIFT_LEFT, "ShiftLeft"),
            (Modifiers::SHIFT_RIGHT, "ShiftRight"),
            (Modifiers::CMD_LEFT, "CmdLeft"),
            (Modifiers::CMD_RIGHT, "CmdRight"),
        ];

        let mut parts = Vec::new();
        for (flag, name) in NAMES {
            if self.contains(flag) {
                parts.push(name);
            }
        }
        write!(f, "{}", parts.join("+"))
    }
}

impl FromStr for Modifiers {
    type Err = ShortcutParseError;

    /// Parse modifiers from a string like "CmdLeft+Shift" or "Ctrl+Alt".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Modifiers::empty());
        }

        let mut modifiers = Modifiers::empty();
        for part in s.split('+') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match Modifiers::parse_single(part) {
                Some(m) => modifiers |= m,
                None => return Err(ShortcutParseError::UnknownModifier(part.to_string())),
            }
        }
        Ok(modifiers)
    }
}
