//! Layered keyset store: lazily hydrated state, keysets and options, written
//! back on explicit flush.

pub mod keysets;
pub mod storage;

pub use keysets::{Keysets, Layer, View};
pub use storage::{JsonFileStorage, KeyValueStorage, MemoryStorage};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::keys::{self, KeyCode, LayerId};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No pin for {key} in layer(s) {layers}.")]
    NotFound { key: KeyCode, layers: String },

    #[error("A view needs at least one layer.")]
    EmptyView,

    #[error("Failed to access {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Stored {name} is malformed: {source}")]
    Malformed {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode {name}: {source}")]
    Encode {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn not_found(key: &KeyCode, layer_ids: &[LayerId]) -> Self {
        let layers = layer_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Self::NotFound {
            key: key.clone(),
            layers,
        }
    }
}

/// The active layer selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct State {
    layer_id: LayerId,
    #[serde(skip)]
    dirty: bool,
}

impl Default for State {
    fn default() -> Self {
        Self {
            layer_id: LayerId::FIRST_USER,
            dirty: false,
        }
    }
}

impl State {
    pub fn layer_id(&self) -> LayerId {
        self.layer_id
    }

    pub fn set_layer_id(&mut self, layer_id: LayerId) {
        if self.layer_id != layer_id {
            self.layer_id = layer_id;
            self.dirty = true;
        }
    }
}

/// User preferences: chords bound to registered commands and the key order
/// used when pinning without an explicit key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Options {
    command_combos: BTreeMap<String, String>,
    key_order: Vec<KeyCode>,
    #[serde(skip)]
    dirty: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            command_combos: BTreeMap::new(),
            key_order: keys::default_key_order(),
            dirty: false,
        }
    }
}

impl Options {
    pub fn command_combos(&self) -> &BTreeMap<String, String> {
        &self.command_combos
    }

    pub fn command_combo(&self, command: &str) -> Option<&str> {
        self.command_combos.get(command).map(String::as_str)
    }

    pub fn set_command_combo(&mut self, command: impl Into<String>, combo: impl Into<String>) {
        self.command_combos.insert(command.into(), combo.into());
        self.dirty = true;
    }

    pub fn key_order(&self) -> &[KeyCode] {
        &self.key_order
    }

    pub fn set_key_order(&mut self, key_order: Vec<KeyCode>) {
        self.key_order = key_order;
        self.dirty = true;
    }
}

/// A structure persisted under one storage name.
trait Persisted: Default + Sized {
    const NAME: &'static str;

    fn decode(value: Value) -> Result<Self, serde_json::Error>;
    fn encode(&self) -> Result<Value, serde_json::Error>;
    fn is_dirty(&self) -> bool;
    fn mark_clean(&mut self);
}

impl Persisted for State {
    const NAME: &'static str = "state";

    fn decode(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    fn encode(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

impl Persisted for Options {
    const NAME: &'static str = "options";

    fn decode(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    fn encode(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

impl Persisted for Keysets {
    const NAME: &'static str = "keysets";

    fn decode(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value).map(Keysets::from_layers)
    }

    fn encode(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self.layers())
    }

    fn is_dirty(&self) -> bool {
        Keysets::is_dirty(self)
    }

    fn mark_clean(&mut self) {
        Keysets::mark_clean(self)
    }
}

/// Owner of all persisted pin data. Each structure is read from storage the
/// first time it is needed and cached for the life of the store.
#[derive(Debug)]
pub struct LayeredKeysetStore<S> {
    storage: S,
    state: Option<State>,
    keysets: Option<Keysets>,
    options: Option<Options>,
}

impl<S: KeyValueStorage> LayeredKeysetStore<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            state: None,
            keysets: None,
            options: None,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub async fn state(&mut self) -> Result<&mut State, StoreError> {
        let state = match self.state.take() {
            Some(state) => state,
            None => load(&self.storage).await?,
        };
        Ok(self.state.insert(state))
    }

    pub async fn keysets(&mut self) -> Result<&mut Keysets, StoreError> {
        let keysets = match self.keysets.take() {
            Some(keysets) => keysets,
            None => load(&self.storage).await?,
        };
        Ok(self.keysets.insert(keysets))
    }

    pub async fn options(&mut self) -> Result<&mut Options, StoreError> {
        let options = match self.options.take() {
            Some(options) => options,
            None => load(&self.storage).await?,
        };
        Ok(self.options.insert(options))
    }

    pub async fn active_layer_id(&mut self) -> Result<LayerId, StoreError> {
        Ok(self.state().await?.layer_id())
    }

    /// Loads everything not loaded yet. Safe to call repeatedly.
    pub async fn hydrate(&mut self) -> Result<(), StoreError> {
        self.state().await?;
        self.keysets().await?;
        self.options().await?;
        Ok(())
    }

    /// Writes the structures changed since the last flush.
    pub async fn flush(&mut self) -> Result<(), StoreError> {
        flush_one(&self.storage, self.state.as_mut()).await?;
        flush_one(&self.storage, self.keysets.as_mut()).await?;
        flush_one(&self.storage, self.options.as_mut()).await?;
        Ok(())
    }
}

async fn load<T: Persisted, S: KeyValueStorage>(storage: &S) -> Result<T, StoreError> {
    let Some(value) = storage.get(T::NAME).await? else {
        tracing::debug!("No stored {}, using defaults", T::NAME);
        return Ok(T::default());
    };
    T::decode(value).map_err(|source| StoreError::Malformed {
        name: T::NAME.to_string(),
        source,
    })
}

async fn flush_one<T: Persisted, S: KeyValueStorage>(
    storage: &S,
    item: Option<&mut T>,
) -> Result<(), StoreError> {
    let Some(item) = item.filter(|item| item.is_dirty()) else {
        return Ok(());
    };
    let value = item.encode().map_err(|source| StoreError::Encode {
        name: T::NAME.to_string(),
        source,
    })?;
    storage.set(T::NAME, value).await?;
    item.mark_clean();
    tracing::debug!("Flushed {}", T::NAME);
    Ok(())
}
