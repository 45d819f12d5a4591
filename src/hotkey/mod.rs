//! Push-to-talk key binding.
//!
//! A binding is written as modifier names and one key joined with `+`,
//! e.g. `"Ctrl+Space"`, `"Alt+Shift+R"` or `"F9"`.  The surrounding UI
//! reports key events as [`KeyPress`] values; [`KeyCombo::matches`] decides
//! whether a key-down starts push-to-talk and [`KeyCombo::involves`] whether
//! a key-up ends it (releasing any part of the combination ends a hold).
//!
//! # Usage
//!
//! ```
//! use voice_relay::hotkey::{KeyCombo, KeyPress};
//!
//! let combo = KeyCombo::parse("Ctrl+Space").expect("valid binding");
//! let press = KeyPress::new("space").with_ctrl();
//! assert!(combo.matches(&press));
//! assert!(combo.involves("Control"));
//! ```

use std::fmt;

use thiserror::Error;

// ---------------------------------------------------------------------------
// HotkeyError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HotkeyError {
    #[error("key binding is empty")]
    Empty,

    #[error("unknown key {0:?}")]
    UnknownKey(String),

    #[error("key binding {0:?} has no non-modifier key")]
    MissingKey(String),

    #[error("key binding {0:?} names more than one key")]
    MultipleKeys(String),
}

// ---------------------------------------------------------------------------
// Modifiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Modifier {
    Ctrl,
    Alt,
    Shift,
    Meta,
}

impl Modifier {
    fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "ctrl" | "control" => Some(Modifier::Ctrl),
            "alt" | "option" => Some(Modifier::Alt),
            "shift" => Some(Modifier::Shift),
            "meta" | "cmd" | "command" | "super" | "win" => Some(Modifier::Meta),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// normalize_key
// ---------------------------------------------------------------------------

/// Canonical name for a key, accepting the common aliases.
///
/// Letters and digits normalize to their uppercase character; everything
/// else to a fixed name.  Returns `None` for unrecognised names.
///
/// ```
/// use voice_relay::hotkey::normalize_key;
///
/// assert_eq!(normalize_key("esc").as_deref(), Some("Escape"));
/// assert_eq!(normalize_key("a").as_deref(), Some("A"));
/// assert_eq!(normalize_key("xyz"), None);
/// ```
pub fn normalize_key(name: &str) -> Option<String> {
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_ascii_alphanumeric() {
            return Some(c.to_ascii_uppercase().to_string());
        }
        if c == ' ' {
            return Some("Space".into());
        }
    }

    let lower = name.trim().to_ascii_lowercase();
    if let Some(n) = lower.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
        if (1..=12).contains(&n) {
            return Some(format!("F{n}"));
        }
    }

    let canonical = match lower.as_str() {
        // Navigation / control
        "escape" | "esc" => "Escape",
        "space" | "spacebar" => "Space",
        "return" | "enter" => "Enter",
        "tab" => "Tab",
        "backspace" => "Backspace",
        "delete" | "del" => "Delete",
        "insert" | "ins" => "Insert",
        "home" => "Home",
        "end" => "End",
        "pageup" => "PageUp",
        "pagedown" => "PageDown",
        "uparrow" | "up" | "arrowup" => "ArrowUp",
        "downarrow" | "down" | "arrowdown" => "ArrowDown",
        "leftarrow" | "left" | "arrowleft" => "ArrowLeft",
        "rightarrow" | "right" | "arrowright" => "ArrowRight",

        // Lock / special
        "capslock" => "CapsLock",
        "numlock" => "NumLock",
        "scrolllock" => "ScrollLock",
        "printscreen" => "PrintScreen",
        "pause" => "Pause",

        // Modifiers, when reported as keys on their own
        "ctrl" | "control" => "Control",
        "alt" | "option" => "Alt",
        "shift" => "Shift",
        "meta" | "cmd" | "command" | "super" | "win" => "Meta",

        _ => return None,
    };
    Some(canonical.into())
}

// ---------------------------------------------------------------------------
// KeyPress
// ---------------------------------------------------------------------------

/// A key event as reported by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyPress {
    pub key: String,
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub meta: bool,
    /// Auto-repeat from a held key.
    pub repeat: bool,
}

impl KeyPress {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn with_ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn with_alt(mut self) -> Self {
        self.alt = true;
        self
    }

    pub fn with_shift(mut self) -> Self {
        self.shift = true;
        self
    }

    pub fn with_meta(mut self) -> Self {
        self.meta = true;
        self
    }

    pub fn repeated(mut self) -> Self {
        self.repeat = true;
        self
    }
}

// ---------------------------------------------------------------------------
// KeyCombo
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCombo {
    key: String,
    ctrl: bool,
    alt: bool,
    shift: bool,
    meta: bool,
}

impl KeyCombo {
    pub fn parse(binding: &str) -> Result<Self, HotkeyError> {
        let binding = binding.trim();
        if binding.is_empty() {
            return Err(HotkeyError::Empty);
        }

        let mut combo = KeyCombo {
            key: String::new(),
            ctrl: false,
            alt: false,
            shift: false,
            meta: false,
        };
        let mut key = None;

        for part in binding.split('+').map(str::trim) {
            match Modifier::parse(part) {
                Some(Modifier::Ctrl) => combo.ctrl = true,
                Some(Modifier::Alt) => combo.alt = true,
                Some(Modifier::Shift) => combo.shift = true,
                Some(Modifier::Meta) => combo.meta = true,
                None => {
                    if key.is_some() {
                        return Err(HotkeyError::MultipleKeys(binding.to_string()));
                    }
                    let normalized =
                        normalize_key(part).ok_or_else(|| HotkeyError::UnknownKey(part.to_string()))?;
                    key = Some(normalized);
                }
            }
        }

        combo.key = key.ok_or_else(|| HotkeyError::MissingKey(binding.to_string()))?;
        Ok(combo)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Key-down of exactly this combination.
    pub fn matches(&self, press: &KeyPress) -> bool {
        normalize_key(&press.key).is_some_and(|k| k == self.key)
            && press.ctrl == self.ctrl
            && press.alt == self.alt
            && press.shift == self.shift
            && press.meta == self.meta
    }

    /// Whether `key` is the combination's key or one of its modifiers.
    pub fn involves(&self, key: &str) -> bool {
        let Some(k) = normalize_key(key) else {
            return false;
        };
        k == self.key
            || (self.ctrl && k == "Control")
            || (self.alt && k == "Alt")
            || (self.shift && k == "Shift")
            || (self.meta && k == "Meta")
    }
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.ctrl {
            parts.push("Ctrl");
        }
        if self.alt {
            parts.push("Alt");
        }
        if self.shift {
            parts.push("Shift");
        }
        if self.meta {
            parts.push("Meta");
        }
        parts.push(self.key.as_str());
        f.write_str(&parts.join("+"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
