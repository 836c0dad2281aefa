//! Built-in chords and the commands they expand to.

pub mod trie;

pub use trie::{ComboArg, ComboError, ComboMatch, ComboTrie, KEY_REF, LAYER_NUM};

use crate::commands::{
    Command, FocusTabArgs, KeyRefArgs, LayerArgs, NeighborArgs, NoArgs, PinOptions, PinTabArgs,
    PinUpdates, ToggleArgs, UpdatePinArgs,
};
use std::fmt;

use crate::error::{KeypinError, Result};
use crate::keys::{self, KeyCode};
use crate::pins::{FocusOptions, PinScope};

/// What a chord does once matched. Arguments come from the chord itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComboAction {
    Focus(FocusOptions),
    SetActiveLayer,
    CloseTab,
    CloseLayerTabs,
    CloseActiveLayerTabs,
    CloseUnpinnedTabs,
    MovePin { swap: bool },
    RemovePin,
    ClearLayer,
    ClearActiveLayer,
    PinTab(PinScope),
    ToggleTabPinned,
    FocusNeighbor(i32),
}

impl ComboAction {
    /// Actions that move the user to another tab dismiss the chord prompt.
    pub fn closes_popup(self) -> bool {
        matches!(
            self,
            ComboAction::Focus(_)
                | ComboAction::PinTab(_)
                | ComboAction::ToggleTabPinned
                | ComboAction::FocusNeighbor(_)
        )
    }

    pub fn into_command(self, args: Vec<ComboArg>) -> Result<Command> {
        use ComboArg::{KeyRef, Layer};

        let command = match (self, args.as_slice()) {
            (ComboAction::Focus(options), [KeyRef(key_ref)]) => Command::FocusTab(FocusTabArgs {
                key_ref: key_ref.clone(),
                options,
            }),
            (ComboAction::SetActiveLayer, [Layer(layer_id)]) => {
                Command::SetActiveLayerId(LayerArgs::layer(*layer_id))
            }
            (ComboAction::CloseTab, [KeyRef(key_ref)]) => Command::CloseTab(KeyRefArgs {
                key_ref: key_ref.clone(),
            }),
            (ComboAction::CloseLayerTabs, [Layer(layer_id)]) => {
                Command::CloseTabs(LayerArgs::layer(*layer_id))
            }
            (ComboAction::CloseActiveLayerTabs, []) => Command::CloseTabs(LayerArgs::default()),
            (ComboAction::CloseUnpinnedTabs, []) => Command::CloseUnpinnedTabs(NoArgs {}),
            (ComboAction::MovePin { swap }, [KeyRef(src), KeyRef(dst)]) => {
                Command::UpdatePin(UpdatePinArgs {
                    key_ref: src.clone(),
                    updates: PinUpdates {
                        layer_id: dst.layer_id,
                        key: dst.key.clone(),
                        ..PinUpdates::default()
                    },
                    swap,
                })
            }
            (ComboAction::RemovePin, [KeyRef(key_ref)]) => Command::RemovePin(KeyRefArgs {
                key_ref: key_ref.clone(),
            }),
            (ComboAction::ClearLayer, [Layer(layer_id)]) => {
                Command::ClearLayer(LayerArgs::layer(*layer_id))
            }
            (ComboAction::ClearActiveLayer, []) => Command::ClearLayer(LayerArgs::default()),
            (ComboAction::PinTab(scope), [KeyRef(key_ref)]) => Command::PinTab(PinTabArgs {
                key_ref: key_ref.clone(),
                options: PinOptions {
                    pin_scope: Some(scope),
                },
            }),
            (ComboAction::ToggleTabPinned, []) => Command::ToggleTabPinned(ToggleArgs::default()),
            (ComboAction::FocusNeighbor(offset), []) => {
                Command::FocusNeighborTab(NeighborArgs { offset })
            }
            (action, args) => {
                return Err(KeypinError::InvalidArgs(format!(
                    "{:?} does not take {} argument(s)",
                    action,
                    args.len()
                )))
            }
        };
        Ok(command)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComboDescriptor {
    pub sequence: &'static str,
    pub action: ComboAction,
}

const fn combo(sequence: &'static str, action: ComboAction) -> ComboDescriptor {
    ComboDescriptor { sequence, action }
}

const fn focus(summon: bool, recreate: bool, reset: bool) -> ComboAction {
    ComboAction::Focus(FocusOptions {
        summon,
        recreate,
        reset,
    })
}

/// `@` takes a key with an optional layer digit in front, `#` takes a layer.
pub const DEFAULT_COMBOS: &[ComboDescriptor] = &[
    combo("g@", focus(false, false, false)),
    combo("G@", focus(true, false, false)),
    combo("f@", focus(false, true, false)),
    combo("r@", focus(false, false, true)),
    combo("k#", ComboAction::SetActiveLayer),
    combo("x@", ComboAction::CloseTab),
    combo("X#", ComboAction::CloseLayerTabs),
    combo("XX", ComboAction::CloseActiveLayerTabs),
    combo("XU", ComboAction::CloseUnpinnedTabs),
    combo("m@@", ComboAction::MovePin { swap: false }),
    combo("s@@", ComboAction::MovePin { swap: true }),
    combo("d@", ComboAction::RemovePin),
    combo("D#", ComboAction::ClearLayer),
    combo("DD", ComboAction::ClearActiveLayer),
    combo("p@", ComboAction::PinTab(PinScope::Origin)),
    combo("P@", ComboAction::PinTab(PinScope::Page)),
    combo("t", ComboAction::ToggleTabPinned),
    combo("n", ComboAction::FocusNeighbor(1)),
    combo("N", ComboAction::FocusNeighbor(-1)),
];

pub fn default_trie() -> ComboTrie<ComboAction> {
    let mut trie = ComboTrie::new();
    for descriptor in DEFAULT_COMBOS {
        if let Err(e) = trie.add_combo(descriptor.sequence, descriptor.action) {
            tracing::error!("Skipping combo {:?}: {}", descriptor.sequence, e);
        }
    }
    trie
}

/// One unit of chord input: a typed character or a physical key press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChordKey {
    Char(char),
    Code(KeyCode),
}

impl ChordKey {
    pub fn is_modifier(&self) -> bool {
        matches!(self, ChordKey::Code(code) if keys::is_modifier(code.as_str()))
    }
}

impl fmt::Display for ChordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChordKey::Char(ch) => write!(f, "'{}'", ch),
            ChordKey::Code(code) => write!(f, "{}", code.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChordStep<A> {
    /// Modifier press; nothing was typed.
    Ignored,
    /// Valid prefix so far.
    Pending,
    /// The chord completed; the buffer has been reset.
    Complete { input: String, matched: ComboMatch<A> },
}

/// Accumulates chord input and matches it against a trie after every key.
///
/// Key presses are translated through the key catalog. Modifiers are
/// skipped, except that a Shift press upper-cases the next key. The buffer
/// is cleared on error and on completion.
#[derive(Debug, Clone, Default)]
pub struct ChordInput {
    typed: String,
    shifted: bool,
}

impl ChordInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.typed
    }

    pub fn is_empty(&self) -> bool {
        self.typed.is_empty()
    }

    pub fn reset(&mut self) {
        self.typed.clear();
        self.shifted = false;
    }

    pub fn feed<A: Clone>(
        &mut self,
        trie: &ComboTrie<A>,
        key: &ChordKey,
    ) -> std::result::Result<ChordStep<A>, ComboError> {
        match key {
            ChordKey::Char(ch) => self.push_char(trie, *ch),
            ChordKey::Code(code) => self.press(trie, code),
        }
    }

    pub fn press<A: Clone>(
        &mut self,
        trie: &ComboTrie<A>,
        code: &KeyCode,
    ) -> std::result::Result<ChordStep<A>, ComboError> {
        if keys::is_modifier(code.as_str()) {
            if code.as_str().starts_with("Shift") {
                self.shifted = true;
            }
            return Ok(ChordStep::Ignored);
        }
        let Some(key) = keys::lookup_by_code(code.as_str()) else {
            self.reset();
            return Err(ComboError::UnknownKeyCode {
                code: code.as_str().to_string(),
            });
        };
        let ch = if std::mem::take(&mut self.shifted) {
            key.input_char.to_ascii_uppercase()
        } else {
            key.input_char.to_ascii_lowercase()
        };
        self.push_char(trie, ch)
    }

    pub fn push_char<A: Clone>(
        &mut self,
        trie: &ComboTrie<A>,
        ch: char,
    ) -> std::result::Result<ChordStep<A>, ComboError> {
        self.typed.push(ch);
        match trie.match_input(&self.typed) {
            Ok(None) => Ok(ChordStep::Pending),
            Ok(Some(matched)) => {
                let input = std::mem::take(&mut self.typed);
                self.reset();
                Ok(ChordStep::Complete { input, matched })
            }
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }
}
