//! Virtual key identifiers
//!
//! A `KeyCode` names a physical key independently of any platform scan code.
//! The input backends (`source`) and the key injector (`keysim`) each map it
//! onto their own key representation.

use std::fmt;
use std::str::FromStr;

/// A key that can be monitored as the push-to-talk hotkey and re-injected
/// toward the downstream application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyCode {
    /// Letter key, always stored uppercase
    Letter(char),
    /// Top-row digit key
    Digit(char),
    /// Function key, F1 through F12
    Function(u8),
    Space,
    Tab,
    CapsLock,
    Escape,
    Return,
    Backquote,
    /// Either Control key
    Control,
    /// Either Shift key
    Shift,
    /// Either Alt/Option key
    Alt,
}

/// Errors produced while parsing a key name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HotkeyError {
    #[error("hotkey name is empty")]
    Empty,

    #[error("unknown key name '{0}' (try a letter, digit, F1-F12, Space, Tab, CapsLock, Ctrl, Shift or Alt)")]
    UnknownKey(String),
}

impl FromStr for KeyCode {
    type Err = HotkeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        if name.is_empty() {
            return Err(HotkeyError::Empty);
        }

        let lower = name.to_ascii_lowercase();
        let mut chars = lower.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            if c.is_ascii_alphabetic() {
                return Ok(KeyCode::Letter(c.to_ascii_uppercase()));
            }
            if c.is_ascii_digit() {
                return Ok(KeyCode::Digit(c));
            }
            if c == '`' {
                return Ok(KeyCode::Backquote);
            }
        }

        // "D0".."D9" are the names Windows settings files use for digit keys
        if let Some(rest) = lower.strip_prefix('d') {
            if rest.len() == 1 && rest.chars().all(|c| c.is_ascii_digit()) {
                return Ok(KeyCode::Digit(rest.chars().next().unwrap_or('0')));
            }
        }

        if let Some(rest) = lower.strip_prefix('f') {
            if let Ok(n) = rest.parse::<u8>() {
                if (1..=12).contains(&n) {
                    return Ok(KeyCode::Function(n));
                }
            }
        }

        match lower.as_str() {
            "space" | "spacebar" => Ok(KeyCode::Space),
            "tab" => Ok(KeyCode::Tab),
            "capslock" | "caps" | "capital" => Ok(KeyCode::CapsLock),
            "escape" | "esc" => Ok(KeyCode::Escape),
            "return" | "enter" => Ok(KeyCode::Return),
            "backquote" | "grave" | "oem3" | "oemtilde" => Ok(KeyCode::Backquote),
            "ctrl" | "control" | "leftctrl" | "rightctrl" | "lctrl" | "rctrl" => {
                Ok(KeyCode::Control)
            }
            "shift" | "leftshift" | "rightshift" | "lshift" | "rshift" => Ok(KeyCode::Shift),
            "alt" | "option" | "leftalt" | "rightalt" | "lalt" | "ralt" => Ok(KeyCode::Alt),
            _ => Err(HotkeyError::UnknownKey(name.to_string())),
        }
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyCode::Letter(c) | KeyCode::Digit(c) => write!(f, "{}", c),
            KeyCode::Function(n) => write!(f, "F{}", n),
            KeyCode::Space => write!(f, "Space"),
            KeyCode::Tab => write!(f, "Tab"),
            KeyCode::CapsLock => write!(f, "CapsLock"),
            KeyCode::Escape => write!(f, "Escape"),
            KeyCode::Return => write!(f, "Return"),
            KeyCode::Backquote => write!(f, "Backquote"),
            KeyCode::Control => write!(f, "Ctrl"),
            KeyCode::Shift => write!(f, "Shift"),
            KeyCode::Alt => write!(f, "Alt"),
        }
    }
}
