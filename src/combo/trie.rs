//! Incremental chord matcher.
//!
//! Combos are registered as sequences of literal input characters plus two
//! placeholders: [`KEY_REF`] (an optional layer digit followed by a key) and
//! [`LAYER_NUM`] (a single layer digit). Matching always replays the whole
//! accumulated input from the root, so callers simply append characters and
//! reset their buffer on error or completion.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::keys::{self, LayerId, PartialKeyRef};

/// Placeholder for a key ref argument: `<key>` or `<digit><key>`.
pub const KEY_REF: char = '@';
/// Placeholder for a standalone layer number argument.
pub const LAYER_NUM: char = '#';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComboError {
    #[error("Unexpected character '{ch}' at position {position} in \"{input}\".")]
    UnexpectedChar {
        ch: char,
        position: usize,
        input: String,
    },

    #[error("Multiple layer IDs at position {position} in \"{input}\".")]
    MultipleLayerIds { position: usize, input: String },

    #[error("Combo sequence is empty.")]
    EmptySequence,

    #[error("Key {code} cannot be typed in a combo.")]
    UnknownKeyCode { code: String },

    #[error("Input continues after a complete combo at {key}.")]
    TrailingInput { key: String },
}

/// An argument collected while walking a placeholder edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComboArg {
    KeyRef(PartialKeyRef),
    Layer(LayerId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComboMatch<A> {
    pub action: A,
    pub args: Vec<ComboArg>,
}

#[derive(Debug)]
struct Node<A> {
    children: BTreeMap<char, Node<A>>,
    key_ref: Option<Box<Node<A>>>,
    layer_num: Option<Box<Node<A>>>,
    action: Option<A>,
}

impl<A> Default for Node<A> {
    fn default() -> Self {
        Self {
            children: BTreeMap::new(),
            key_ref: None,
            layer_num: None,
            action: None,
        }
    }
}

#[derive(Debug)]
pub struct ComboTrie<A> {
    root: Node<A>,
    len: usize,
}

impl<A> Default for ComboTrie<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> ComboTrie<A> {
    pub fn new() -> Self {
        Self {
            root: Node::default(),
            len: 0,
        }
    }

    /// Number of registered combos.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Registers `sequence` and associates `action` with its final node.
    /// Re-registering a sequence replaces its action.
    pub fn add_combo(&mut self, sequence: &str, action: A) -> Result<(), ComboError> {
        if sequence.is_empty() {
            return Err(ComboError::EmptySequence);
        }

        let mut node = &mut self.root;
        for ch in sequence.chars() {
            node = match ch {
                KEY_REF => &mut **node.key_ref.get_or_insert_with(Box::default),
                LAYER_NUM => &mut **node.layer_num.get_or_insert_with(Box::default),
                literal => node.children.entry(literal).or_default(),
            };
        }

        if node.action.replace(action).is_none() {
            self.len += 1;
        }
        Ok(())
    }
}

impl<A: Clone> ComboTrie<A> {
    /// Matches the accumulated input against all registered combos.
    ///
    /// Returns `Ok(Some(..))` for a completed combo, `Ok(None)` when the input
    /// is a valid but incomplete prefix, and an error when no combo can match.
    pub fn match_input(&self, input: &str) -> Result<Option<ComboMatch<A>>, ComboError> {
        let mut node = &self.root;
        let mut pending_layer: Option<LayerId> = None;
        let mut args = Vec::new();

        for (position, ch) in input.chars().enumerate() {
            if let Some(next) = node.key_ref.as_deref() {
                if let Some(layer_id) = LayerId::from_digit(ch) {
                    if pending_layer.is_some() {
                        return Err(ComboError::MultipleLayerIds {
                            position,
                            input: input.to_string(),
                        });
                    }
                    pending_layer = Some(layer_id);
                    continue;
                }
                if let Some(key) = keys::lookup_by_input_char(ch) {
                    args.push(ComboArg::KeyRef(PartialKeyRef {
                        layer_id: pending_layer.take(),
                        key: Some(key.code.clone()),
                    }));
                    node = next;
                    continue;
                }
            } else if let Some(next) = node.layer_num.as_deref() {
                if let Some(layer_id) = LayerId::from_digit(ch) {
                    args.push(ComboArg::Layer(layer_id));
                    node = next;
                    continue;
                }
            }

            // A layer digit must be followed by its key.
            if pending_layer.is_none() {
                if let Some(next) = node.children.get(&ch) {
                    node = next;
                    continue;
                }
            }

            return Err(ComboError::UnexpectedChar {
                ch,
                position,
                input: input.to_string(),
            });
        }

        if pending_layer.is_some() {
            return Ok(None);
        }

        Ok(node.action.clone().map(|action| ComboMatch { action, args }))
    }

    pub fn is_valid_prefix(&self, input: &str) -> bool {
        self.match_input(input).is_ok()
    }
}
