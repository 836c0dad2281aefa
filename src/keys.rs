//! Key catalog: physical key identities and the slots they address.
//!
//! Every key has three representations:
//! - a storage code (`KeyA`, `Backspace`) used in persisted keysets,
//! - a display glyph (`A`, `⌫`),
//! - an input character typed when entering chords (`a`/`A`, `<`).

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Number of configured layers. Layer ids are `0..LAYER_COUNT`.
pub const LAYER_COUNT: u8 = 10;

/// Storage code of the reserved key that records the previously active tab.
pub const HISTORY_KEY: &str = "Backspace";

/// Input characters of the default auto-assignment order.
const ORDERED_INPUT_CHARS: &str = "ASDFGZXCVB";

static MODIFIER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^((Shift|Control|Alt|Meta)(Left|Right)|CapsLock)$").expect("valid modifier regex")
});

static DIGIT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Digit(\d)$").expect("valid digit regex"));

/// Storage code of a physical key, e.g. `KeyA`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyCode(String);

impl KeyCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn history() -> Self {
        Self(HISTORY_KEY.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_history(&self) -> bool {
        self.0 == HISTORY_KEY
    }

    /// Display glyph from the catalog, falling back to the raw code.
    pub fn glyph(&self) -> &str {
        lookup_by_code(&self.0)
            .map(|key| key.glyph.as_str())
            .unwrap_or(&self.0)
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.glyph())
    }
}

impl From<&str> for KeyCode {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

/// A physical key as defined in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Key {
    pub code: KeyCode,
    pub glyph: String,
    pub input_char: char,
}

impl Key {
    fn new(code: impl Into<String>, glyph: impl Into<String>, input_char: Option<char>) -> Self {
        let glyph = glyph.into();
        let input_char = input_char
            .or_else(|| glyph.chars().next())
            .unwrap_or_default();
        Self {
            code: KeyCode::new(code),
            glyph,
            input_char,
        }
    }
}

static KEYS: LazyLock<Vec<Key>> = LazyLock::new(|| {
    let mut keys = vec![
        Key::new("LeftBracket", "[", None),
        Key::new("RightBracket", "]", None),
        Key::new("Backslash", "\\", None),
        Key::new(HISTORY_KEY, "⌫", Some('<')),
        Key::new("Semicolon", ";", None),
        Key::new("Quote", "'", None),
        Key::new("Comma", ",", None),
        Key::new("Period", ".", None),
        Key::new("Slash", "/", None),
    ];
    keys.extend(('A'..='Z').map(|ch| Key::new(format!("Key{ch}"), ch.to_string(), None)));
    keys.extend("1234567890".chars().map(|d| Key::new(format!("Digit{d}"), d.to_string(), None)));
    keys
});

static KEYS_BY_CODE: LazyLock<HashMap<&'static str, &'static Key>> =
    LazyLock::new(|| KEYS.iter().map(|key| (key.code.as_str(), key)).collect());

static KEYS_BY_INPUT_CHAR: LazyLock<HashMap<char, &'static Key>> =
    LazyLock::new(|| KEYS.iter().map(|key| (key.input_char, key)).collect());

pub fn lookup_by_code(code: &str) -> Option<&'static Key> {
    KEYS_BY_CODE.get(code).copied()
}

/// Letters match regardless of case.
pub fn lookup_by_input_char(ch: char) -> Option<&'static Key> {
    KEYS_BY_INPUT_CHAR
        .get(&ch.to_ascii_uppercase())
        .copied()
}

/// Modifier keys are ignored while capturing chords.
pub fn is_modifier(code: &str) -> bool {
    MODIFIER_REGEX.is_match(code)
}

/// Value of a `Digit<n>` code, used for layer-number shorthand keys.
pub fn parse_digit(code: &str) -> Option<u8> {
    DIGIT_REGEX
        .captures(code)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

pub fn default_key_order() -> Vec<KeyCode> {
    ORDERED_INPUT_CHARS
        .chars()
        .filter_map(lookup_by_input_char)
        .map(|key| key.code.clone())
        .collect()
}

/// Identifier of one layer (keyset). Always within `0..LAYER_COUNT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct LayerId(u8);

impl LayerId {
    /// The global layer is overlaid with whichever layer is active.
    pub const GLOBAL: LayerId = LayerId(0);
    /// Active layer of a fresh install.
    pub const FIRST_USER: LayerId = LayerId(1);

    pub fn new(id: u8) -> Option<Self> {
        (id < LAYER_COUNT).then_some(Self(id))
    }

    pub fn from_digit(ch: char) -> Option<Self> {
        ch.to_digit(10).and_then(|d| Self::new(d as u8))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn is_global(self) -> bool {
        self == Self::GLOBAL
    }

    pub fn all() -> impl Iterator<Item = LayerId> {
        (0..LAYER_COUNT).map(LayerId)
    }

    /// Layers visible while `self` is active, global first.
    pub fn view(self) -> Vec<LayerId> {
        if self.is_global() {
            vec![Self::GLOBAL]
        } else {
            vec![Self::GLOBAL, self]
        }
    }
}

impl TryFrom<u8> for LayerId {
    type Error = String;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Self::new(id).ok_or_else(|| format!("layer id {id} out of range 0..{LAYER_COUNT}"))
    }
}

impl From<LayerId> for u8 {
    fn from(id: LayerId) -> Self {
        id.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reference to one slot: a key within a layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRef {
    pub layer_id: LayerId,
    pub key: KeyCode,
}

impl KeyRef {
    pub fn new(layer_id: LayerId, key: impl Into<KeyCode>) -> Self {
        Self {
            layer_id,
            key: key.into(),
        }
    }

    /// Slot in the global layer holding the previously active tab.
    pub fn history() -> Self {
        Self::new(LayerId::GLOBAL, KeyCode::history())
    }
}

impl fmt::Display for KeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in layer {}", self.key, self.layer_id)
    }
}

/// Key ref as parsed from chords or received from callers; either part may be
/// missing and is defaulted by command dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialKeyRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_id: Option<LayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<KeyCode>,
}

impl PartialKeyRef {
    pub fn key(key: impl Into<KeyCode>) -> Self {
        Self {
            layer_id: None,
            key: Some(key.into()),
        }
    }

    pub fn in_layer(layer_id: LayerId, key: impl Into<KeyCode>) -> Self {
        Self {
            layer_id: Some(layer_id),
            key: Some(key.into()),
        }
    }
}

impl From<KeyRef> for PartialKeyRef {
    fn from(key_ref: KeyRef) -> Self {
        Self::in_layer(key_ref.layer_id, key_ref.key)
    }
}
