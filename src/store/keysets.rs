//! Per-layer pin maps and overlay views across several layers.

use std::collections::{BTreeMap, HashSet};

use crate::host::TabId;
use crate::keys::{KeyCode, KeyRef, LayerId};
use crate::pins::{Pin, PinEntry};

use super::StoreError;

pub type Layer = BTreeMap<KeyCode, Pin>;

/// All layers. Every [`LayerId`] always has a (possibly empty) map.
#[derive(Debug, Clone, PartialEq)]
pub struct Keysets {
    layers: BTreeMap<LayerId, Layer>,
    dirty: bool,
}

impl Default for Keysets {
    fn default() -> Self {
        Self::from_layers(BTreeMap::new())
    }
}

impl Keysets {
    /// Fills in any missing layer.
    pub fn from_layers(mut layers: BTreeMap<LayerId, Layer>) -> Self {
        for layer_id in LayerId::all() {
            layers.entry(layer_id).or_default();
        }
        Self {
            layers,
            dirty: false,
        }
    }

    pub fn layers(&self) -> &BTreeMap<LayerId, Layer> {
        &self.layers
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    fn layer_mut(&mut self, layer_id: LayerId) -> &mut Layer {
        self.dirty = true;
        self.layers.entry(layer_id).or_default()
    }

    pub fn get(&self, key_ref: &KeyRef) -> Option<&Pin> {
        self.layers
            .get(&key_ref.layer_id)
            .and_then(|layer| layer.get(&key_ref.key))
    }

    pub fn contains(&self, key_ref: &KeyRef) -> bool {
        self.get(key_ref).is_some()
    }

    pub fn set(&mut self, key_ref: &KeyRef, pin: Pin) {
        self.layer_mut(key_ref.layer_id)
            .insert(key_ref.key.clone(), pin);
    }

    /// Removes the pin at exactly `key_ref`.
    pub fn remove(&mut self, key_ref: &KeyRef) -> Result<Pin, StoreError> {
        if !self.contains(key_ref) {
            return Err(StoreError::not_found(&key_ref.key, &[key_ref.layer_id]));
        }
        self.layer_mut(key_ref.layer_id)
            .remove(&key_ref.key)
            .ok_or_else(|| StoreError::not_found(&key_ref.key, &[key_ref.layer_id]))
    }

    pub fn keys(&self, layer_id: LayerId) -> Vec<KeyCode> {
        self.layers
            .get(&layer_id)
            .map(|layer| layer.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn entries(&self, layer_id: LayerId) -> Vec<PinEntry> {
        self.layers
            .get(&layer_id)
            .map(|layer| {
                layer
                    .iter()
                    .map(|(key, pin)| PinEntry {
                        key_ref: KeyRef::new(layer_id, key.clone()),
                        pin: pin.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Empties one layer and returns what it held.
    pub fn clear(&mut self, layer_id: LayerId) -> Vec<PinEntry> {
        let removed = self.entries(layer_id);
        if !removed.is_empty() {
            self.layer_mut(layer_id).clear();
        }
        removed
    }

    /// First slot in `layer_ids` whose pin is bound to `tab_id`. The history
    /// slot is not a pin of its own and is skipped.
    pub fn find_bound(&self, tab_id: TabId, layer_ids: &[LayerId]) -> Option<KeyRef> {
        layer_ids.iter().find_map(|&layer_id| {
            self.layers.get(&layer_id)?.iter().find_map(|(key, pin)| {
                (!key.is_history() && pin.tab_id == Some(tab_id))
                    .then(|| KeyRef::new(layer_id, key.clone()))
            })
        })
    }

    /// Overlay across `layer_ids`; earlier layers shadow later ones.
    pub fn view(&mut self, layer_ids: &[LayerId]) -> Result<View<'_>, StoreError> {
        if layer_ids.is_empty() {
            return Err(StoreError::EmptyView);
        }
        Ok(View {
            keysets: self,
            layer_ids: layer_ids.to_vec(),
        })
    }
}

/// Read/write overlay. Operations act on the first layer already holding a
/// key, and new keys land in the last layer.
#[derive(Debug)]
pub struct View<'a> {
    keysets: &'a mut Keysets,
    layer_ids: Vec<LayerId>,
}

impl View<'_> {
    pub fn layer_ids(&self) -> &[LayerId] {
        &self.layer_ids
    }

    pub fn fallback_layer(&self) -> LayerId {
        self.layer_ids[self.layer_ids.len() - 1]
    }

    pub fn find_ref(&self, key: &KeyCode, must_exist: bool) -> Result<KeyRef, StoreError> {
        let found = self
            .layer_ids
            .iter()
            .map(|&layer_id| KeyRef::new(layer_id, key.clone()))
            .find(|key_ref| self.keysets.contains(key_ref));
        match found {
            Some(key_ref) => Ok(key_ref),
            None if must_exist => Err(StoreError::not_found(key, &self.layer_ids)),
            None => Ok(KeyRef::new(self.fallback_layer(), key.clone())),
        }
    }

    pub fn get(&self, key: &KeyCode) -> Option<&Pin> {
        let key_ref = self.find_ref(key, false).ok()?;
        self.keysets.get(&key_ref)
    }

    /// Returns the slot written to.
    pub fn set(&mut self, key: &KeyCode, pin: Pin) -> KeyRef {
        let key_ref = match self.find_ref(key, false) {
            Ok(key_ref) => key_ref,
            Err(_) => KeyRef::new(self.fallback_layer(), key.clone()),
        };
        self.keysets.set(&key_ref, pin);
        key_ref
    }

    /// Returns the layer the pin was removed from.
    pub fn remove(&mut self, key: &KeyCode) -> Result<(LayerId, Pin), StoreError> {
        let key_ref = self.find_ref(key, true)?;
        let pin = self.keysets.remove(&key_ref)?;
        Ok((key_ref.layer_id, pin))
    }

    /// Effective entries, one per key, front layers first.
    pub fn list_entries(&self) -> Vec<PinEntry> {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for &layer_id in &self.layer_ids {
            for entry in self.keysets.entries(layer_id) {
                if seen.insert(entry.key_ref.key.clone()) {
                    entries.push(entry);
                }
            }
        }
        entries
    }
}
