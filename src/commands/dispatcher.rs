//! Executes commands against the keyset store and the host, one at a time.
//! Every command is followed by a flush of whatever it changed.

use std::collections::HashSet;
use std::sync::LazyLock;

use futures::future::join_all;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::combo::{self, ChordInput, ChordKey, ChordStep, ComboAction, ComboError, ComboTrie};
use crate::config::{DuplicateScope, PinsConfig};
use crate::error::{ErrorKind, KeypinError, Result};
use crate::host::{Host, HostError, Tab, TabId, TabQuery};
use crate::keys::{self, Key, KeyCode, KeyRef, LayerId, PartialKeyRef};
use crate::pins::{FocusOptions, Pin, PinEntry, PinResolver, PinScope, ResolvedPin};
use crate::store::{Keysets, KeyValueStorage, LayeredKeysetStore, StoreError};

use super::{
    Command, FocusTabArgs, KeyRefArgs, LayerArgs, ListPinsArgs, NeighborArgs, PinTabArgs,
    PinUpdates, Response, SetCommandComboArgs, SetKeyOrderArgs, ToggleArgs, UpdatePinArgs,
};

/// Registered commands that can carry a user chord.
static COMMAND_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^command-\d{2}$").expect("valid command name regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub layer_id: LayerId,
    /// Layers visible with this selection, global first.
    pub view: Vec<LayerId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandCombo {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shortcut: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combo: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedTabs {
    pub tab_ids: Vec<TabId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Toggled {
    pub pinned: bool,
    pub entry: PinEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ComboOutcome {
    /// Valid prefix; keep typing.
    Pending { input: String },
    Executed {
        command: String,
        #[serde(rename = "closePopup")]
        close_popup: bool,
        result: Value,
    },
}

pub struct Dispatcher<S> {
    store: LayeredKeysetStore<S>,
    resolver: PinResolver,
    trie: ComboTrie<ComboAction>,
    chord: ChordInput,
    default_scope: PinScope,
    duplicate_scope: DuplicateScope,
}

impl<S: KeyValueStorage> Dispatcher<S> {
    pub fn new(store: LayeredKeysetStore<S>, host: Host, config: &PinsConfig) -> Self {
        Self {
            store,
            resolver: PinResolver::new(host, config.new_tab_urls.clone()),
            trie: combo::default_trie(),
            chord: ChordInput::new(),
            default_scope: config.default_scope,
            duplicate_scope: config.duplicate_scope,
        }
    }

    pub fn store(&self) -> &LayeredKeysetStore<S> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut LayeredKeysetStore<S> {
        &mut self.store
    }

    pub fn resolver(&self) -> &PinResolver {
        &self.resolver
    }

    /// Parses and handles a raw request.
    pub async fn handle_request(&mut self, request: Value) -> Response {
        match Command::from_request(request) {
            Ok(command) => self.handle(command).await,
            Err(e) => {
                tracing::warn!("Rejected request: {}", e);
                Response::err(&e)
            }
        }
    }

    /// Runs `command`, flushes the store and renders the outcome. The store is
    /// flushed even when the command failed part way.
    pub async fn handle(&mut self, command: Command) -> Response {
        let name = command.name();
        tracing::debug!("Handling {}", name);

        let result = self.execute(command).await;
        let flushed = self.store.flush().await.map_err(KeypinError::from);
        let result = match (result, flushed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(flush_error)) => {
                tracing::error!("Failed to flush after {}: {}", name, flush_error);
                Err(e)
            }
        };

        match result {
            Ok(value) => Response::ok(value),
            Err(e) => {
                match e.kind() {
                    ErrorKind::User => tracing::info!("{} refused: {}", name, e),
                    ErrorKind::Unexpected => tracing::error!("{} failed: {}", name, e),
                }
                Response::err(&e)
            }
        }
    }

    /// Runs `command` without flushing.
    pub async fn execute(&mut self, command: Command) -> Result<Value> {
        match command {
            Command::ExecuteCombo(args) => {
                to_json(self.execute_combo(&args.input, &args.key_codes).await?)
            }
            Command::RunShortcut(args) => to_json(self.run_shortcut(&args.command).await?),
            command => self.run(command).await,
        }
    }

    async fn run(&mut self, command: Command) -> Result<Value> {
        match command {
            Command::GetState(_) => to_json(self.get_state().await?),
            Command::SetActiveLayerId(args) => to_json(self.set_active_layer_id(args).await?),
            Command::ListCommandCombos(_) => to_json(self.list_command_combos().await?),
            Command::SetCommandCombo(args) => to_json(self.set_command_combo(args).await?),
            Command::GetKeyOrder(_) => to_json(self.get_key_order().await?),
            Command::SetKeyOrder(args) => to_json(self.set_key_order(args).await?),
            Command::PinTab(args) => to_json(self.pin_tab(args).await?),
            Command::UpdatePin(args) => to_json(self.update_pin(args).await?),
            Command::ClearLayer(args) => to_json(self.clear_layer(args).await?),
            Command::RemovePin(args) => to_json(self.remove_pin(args).await?),
            Command::FocusTab(args) => to_json(self.focus_tab(args).await?),
            Command::FocusNeighborTab(args) => to_json(self.focus_neighbor_tab(args).await?),
            Command::CloseTab(args) => to_json(self.close_tab(args).await?),
            Command::CloseTabs(args) => to_json(self.close_tabs(args).await?),
            Command::CloseUnpinnedTabs(_) => to_json(self.close_unpinned_tabs().await?),
            Command::ToggleTabPinned(args) => to_json(self.toggle_tab_pinned(args).await?),
            Command::GetPin(args) => to_json(self.get_pin(args).await?),
            Command::ListPins(args) => to_json(self.list_pins(args).await?),
            Command::GetActiveKey(_) => to_json(self.get_active_key().await?),
            Command::ExecuteCombo(_) | Command::RunShortcut(_) => Err(KeypinError::InvalidArgs(
                "a combo cannot run another combo".to_string(),
            )),
        }
    }

    async fn active_layer(&mut self) -> Result<LayerId> {
        Ok(self.store.active_layer_id().await?)
    }

    async fn layer_or_active(&mut self, layer_id: Option<LayerId>) -> Result<LayerId> {
        match layer_id {
            Some(layer_id) => Ok(layer_id),
            None => self.active_layer().await,
        }
    }

    /// An explicit layer, or the view of the active layer.
    async fn lookup_layers(&mut self, layer_id: Option<LayerId>) -> Result<Vec<LayerId>> {
        match layer_id {
            Some(layer_id) => Ok(vec![layer_id]),
            None => Ok(self.active_layer().await?.view()),
        }
    }

    /// Slot holding the pin `partial` refers to.
    async fn existing_ref(&mut self, partial: &PartialKeyRef) -> Result<KeyRef> {
        let key = require_key(partial)?;
        let layers = self.lookup_layers(partial.layer_id).await?;
        let keysets = self.store.keysets().await?;
        let key_ref = keysets.view(&layers)?.find_ref(&key, true)?;
        Ok(key_ref)
    }

    pub async fn get_state(&mut self) -> Result<StateSnapshot> {
        let layer_id = self.active_layer().await?;
        Ok(StateSnapshot {
            layer_id,
            view: layer_id.view(),
        })
    }

    pub async fn set_active_layer_id(&mut self, args: LayerArgs) -> Result<StateSnapshot> {
        let layer_id = args
            .layer_id
            .ok_or_else(|| KeypinError::InvalidArgs("layerId is required".to_string()))?;
        self.store.state().await?.set_layer_id(layer_id);
        tracing::info!("Active layer is now {}", layer_id);
        self.get_state().await
    }

    pub async fn list_command_combos(&mut self) -> Result<Vec<CommandCombo>> {
        let shortcuts = self.resolver.host().shortcuts.commands().await?;
        let options = self.store.options().await?;
        let mut combos: Vec<CommandCombo> = shortcuts
            .into_iter()
            .filter(|shortcut| COMMAND_NAME_REGEX.is_match(&shortcut.name))
            .map(|shortcut| CommandCombo {
                combo: options.command_combo(&shortcut.name).map(str::to_string),
                name: shortcut.name,
                description: shortcut.description,
                shortcut: shortcut.shortcut,
            })
            .collect();
        combos.sort_by(|a, b| {
            a.description
                .cmp(&b.description)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(combos)
    }

    /// Binds a chord to a registered command. The chord must be a valid
    /// prefix of some combo; an empty chord unbinds.
    pub async fn set_command_combo(&mut self, args: SetCommandComboArgs) -> Result<CommandCombo> {
        let shortcuts = self.resolver.host().shortcuts.commands().await?;
        let shortcut = shortcuts
            .into_iter()
            .filter(|shortcut| COMMAND_NAME_REGEX.is_match(&shortcut.name))
            .find(|shortcut| shortcut.name == args.command)
            .ok_or_else(|| KeypinError::UnknownCommand(args.command.clone()))?;
        if !args.combo.is_empty() {
            self.trie.match_input(&args.combo)?;
        }

        self.store
            .options()
            .await?
            .set_command_combo(args.command.clone(), args.combo.clone());
        tracing::info!("Bound {:?} to {}", args.combo, args.command);

        Ok(CommandCombo {
            name: shortcut.name,
            description: shortcut.description,
            shortcut: shortcut.shortcut,
            combo: (!args.combo.is_empty()).then_some(args.combo),
        })
    }

    pub async fn get_key_order(&mut self) -> Result<Vec<Key>> {
        let options = self.store.options().await?;
        Ok(options
            .key_order()
            .iter()
            .filter_map(|code| keys::lookup_by_code(code.as_str()))
            .cloned()
            .collect())
    }

    /// Replaces the auto-assignment order, given as typed input characters.
    pub async fn set_key_order(&mut self, args: SetKeyOrderArgs) -> Result<Vec<Key>> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        for ch in args.input_chars.chars().filter(|ch| !ch.is_whitespace()) {
            let key = keys::lookup_by_input_char(ch)
                .ok_or_else(|| KeypinError::InvalidKeyOrder(format!("'{}' is not a key", ch)))?;
            if key.code.is_history() || keys::parse_digit(key.code.as_str()).is_some() {
                return Err(KeypinError::InvalidKeyOrder(format!(
                    "{} cannot be assigned automatically",
                    key.glyph
                )));
            }
            if !seen.insert(key.code.clone()) {
                return Err(KeypinError::InvalidKeyOrder(format!(
                    "{} appears twice",
                    key.glyph
                )));
            }
            order.push(key.code.clone());
        }
        if order.is_empty() {
            return Err(KeypinError::InvalidKeyOrder("no keys given".to_string()));
        }

        self.store.options().await?.set_key_order(order);
        self.get_key_order().await
    }

    /// Pins the active tab. Without a key the first free key of the key
    /// order in the target layer is used.
    pub async fn pin_tab(&mut self, args: PinTabArgs) -> Result<PinEntry> {
        let tab = self
            .resolver
            .active_tab()
            .await?
            .ok_or(KeypinError::NoActiveTab)?;
        let layer_id = self.layer_or_active(args.key_ref.layer_id).await?;
        let key_order = self.store.options().await?.key_order().to_vec();
        let scope = args.options.pin_scope.unwrap_or(self.default_scope);
        let duplicate_layers = self.duplicate_scope.layers(layer_id);

        let keysets = self.store.keysets().await?;
        let key = match args.key_ref.key {
            Some(key) => {
                validate_pin_key(&key)?;
                key
            }
            None => first_free_key(keysets, layer_id, key_order)?,
        };
        let key_ref = KeyRef::new(layer_id, key);

        if let Some(existing) = keysets.find_bound(tab.id, &duplicate_layers) {
            if existing != key_ref {
                return Err(KeypinError::DuplicatePin(existing));
            }
        }

        let pin = Pin::from_tab(&tab, scope);
        keysets.set(&key_ref, pin.clone());
        tracing::info!("Pinned tab {} to {}", tab.id, key_ref);
        Ok(PinEntry { key_ref, pin })
    }

    /// Edits a pin in place or moves it to another slot. Moving onto an
    /// occupied slot overwrites it, or exchanges both pins with `swap`.
    pub async fn update_pin(&mut self, args: UpdatePinArgs) -> Result<PinEntry> {
        let src = self.existing_ref(&args.key_ref).await?;
        let PinUpdates {
            layer_id,
            key,
            title,
            url_pattern,
        } = args.updates;
        // A destination key without a layer lands where the current view
        // already holds it, else in the active layer.
        let dst = match (layer_id, key) {
            (Some(layer_id), key) => {
                KeyRef::new(layer_id, key.unwrap_or_else(|| src.key.clone()))
            }
            (None, Some(key)) => {
                let layers = self.lookup_layers(None).await?;
                self.store
                    .keysets()
                    .await?
                    .view(&layers)?
                    .find_ref(&key, false)?
            }
            (None, None) => src.clone(),
        };
        if dst != src {
            validate_pin_key(&dst.key)?;
        }

        let keysets = self.store.keysets().await?;
        let mut pin = keysets
            .get(&src)
            .cloned()
            .ok_or_else(|| StoreError::not_found(&src.key, &[src.layer_id]))?;
        if let Some(title) = title {
            pin.title = title;
        }
        if let Some(url_pattern) = url_pattern {
            pin.url_pattern = url_pattern;
        }

        if dst != src {
            let displaced = keysets.get(&dst).cloned();
            keysets.remove(&src)?;
            if let Some(displaced) = displaced.filter(|_| args.swap) {
                keysets.set(&src, displaced);
                tracing::info!("Swapped {} and {}", src, dst);
            } else {
                tracing::info!("Moved {} to {}", src, dst);
            }
        }
        keysets.set(&dst, pin.clone());
        Ok(PinEntry { key_ref: dst, pin })
    }

    pub async fn clear_layer(&mut self, args: LayerArgs) -> Result<Vec<PinEntry>> {
        let layer_id = self.layer_or_active(args.layer_id).await?;
        let removed = self.store.keysets().await?.clear(layer_id);
        tracing::info!("Cleared {} pin(s) from layer {}", removed.len(), layer_id);
        Ok(removed)
    }

    pub async fn remove_pin(&mut self, args: KeyRefArgs) -> Result<PinEntry> {
        let key = require_key(&args.key_ref)?;
        let layers = self.lookup_layers(args.key_ref.layer_id).await?;
        let keysets = self.store.keysets().await?;
        let (layer_id, pin) = keysets.view(&layers)?.remove(&key)?;
        let key_ref = KeyRef::new(layer_id, key);
        tracing::info!("Removed {}", key_ref);
        Ok(PinEntry { key_ref, pin })
    }

    pub async fn focus_tab(&mut self, args: FocusTabArgs) -> Result<Tab> {
        let key_ref = self.existing_ref(&args.key_ref).await?;
        let keysets = self.store.keysets().await?;
        self.resolver
            .focus_tab(keysets, &key_ref, args.options)
            .await
    }

    /// Focuses the pin `offset` places away from the active tab's pin, in key
    /// order, wrapping around. Without a pinned active tab it starts from the
    /// first (or last) pin.
    pub async fn focus_neighbor_tab(&mut self, args: NeighborArgs) -> Result<Tab> {
        let layers = self.lookup_layers(None).await?;
        let key_order = self.store.options().await?.key_order().to_vec();
        let current = self.resolver.active_tab().await?;

        let keysets = self.store.keysets().await?;
        let mut entries: Vec<PinEntry> = keysets
            .view(&layers)?
            .list_entries()
            .into_iter()
            .filter(|entry| !entry.key_ref.key.is_history())
            .collect();
        if entries.is_empty() {
            return Err(KeypinError::NoPins);
        }
        entries.sort_by_cached_key(|entry| {
            let rank = key_order
                .iter()
                .position(|key| *key == entry.key_ref.key)
                .unwrap_or(usize::MAX);
            (rank, entry.key_ref.key.clone())
        });

        let len = entries.len() as i64;
        let position = current
            .as_ref()
            .and_then(|tab| entries.iter().position(|entry| entry.pin.is_bound_to(tab)));
        let next = match position {
            Some(position) => (position as i64 + i64::from(args.offset)).rem_euclid(len),
            None if args.offset < 0 => len - 1,
            None => 0,
        };
        let key_ref = entries[next as usize].key_ref.clone();

        self.resolver
            .focus_tab(keysets, &key_ref, FocusOptions::default())
            .await
    }

    pub async fn close_tab(&mut self, args: KeyRefArgs) -> Result<ClosedTabs> {
        let key_ref = self.existing_ref(&args.key_ref).await?;
        let keysets = self.store.keysets().await?;
        let pin = keysets
            .get(&key_ref)
            .cloned()
            .ok_or_else(|| StoreError::not_found(&key_ref.key, &[key_ref.layer_id]))?;
        let Some(tab) = self.resolver.find_tab(keysets, &pin, &key_ref).await? else {
            return Ok(ClosedTabs::default());
        };

        let tab_ids = close_all(self.resolver.host(), vec![tab.id]).await;
        if tab_ids.contains(&tab.id) {
            detach(keysets, &key_ref);
        }
        Ok(ClosedTabs { tab_ids })
    }

    /// Closes the tabs of every pin in one layer.
    pub async fn close_tabs(&mut self, args: LayerArgs) -> Result<ClosedTabs> {
        let layer_id = self.layer_or_active(args.layer_id).await?;
        let keysets = self.store.keysets().await?;
        let entries: Vec<PinEntry> = keysets
            .entries(layer_id)
            .into_iter()
            .filter(|entry| !entry.key_ref.key.is_history())
            .collect();
        let resolved = self.resolver.resolve_all(keysets, entries).await?;

        let targets: Vec<(KeyRef, TabId)> = resolved
            .into_iter()
            .filter_map(|r| r.tab.map(|tab| (r.key_ref, tab.id)))
            .collect();
        let mut unique = Vec::new();
        for (_, tab_id) in &targets {
            if !unique.contains(tab_id) {
                unique.push(*tab_id);
            }
        }

        let tab_ids = close_all(self.resolver.host(), unique).await;
        for (key_ref, tab_id) in &targets {
            if tab_ids.contains(tab_id) {
                detach(keysets, key_ref);
            }
        }
        tracing::info!("Closed {} tab(s) of layer {}", tab_ids.len(), layer_id);
        Ok(ClosedTabs { tab_ids })
    }

    /// Closes every tab of the last focused window that no pin of the current
    /// view resolves to. The history slot counts as a pin.
    pub async fn close_unpinned_tabs(&mut self) -> Result<ClosedTabs> {
        let layers = self.lookup_layers(None).await?;
        let host = self.resolver.host().clone();
        let Some(window) = host.windows.get_last_focused().await? else {
            return Ok(ClosedTabs::default());
        };
        let tabs = host.tabs.query(&TabQuery::in_window(window.id)).await?;

        let keysets = self.store.keysets().await?;
        let entries = keysets.view(&layers)?.list_entries();
        let resolved = self.resolver.resolve_all(keysets, entries).await?;
        let pinned: HashSet<TabId> = resolved
            .iter()
            .filter_map(|r| r.tab.as_ref().map(|tab| tab.id))
            .collect();

        let unpinned = tabs
            .iter()
            .map(|tab| tab.id)
            .filter(|tab_id| !pinned.contains(tab_id))
            .collect();
        let tab_ids = close_all(&host, unpinned).await;
        tracing::info!("Closed {} unpinned tab(s)", tab_ids.len());
        Ok(ClosedTabs { tab_ids })
    }

    /// Unpins the active tab if a pin in the layer (or view) is bound to it,
    /// otherwise pins it.
    pub async fn toggle_tab_pinned(&mut self, args: ToggleArgs) -> Result<Toggled> {
        let tab = self
            .resolver
            .active_tab()
            .await?
            .ok_or(KeypinError::NoActiveTab)?;
        let layers = self.lookup_layers(args.key_ref.layer_id).await?;

        let keysets = self.store.keysets().await?;
        if let Some(key_ref) = keysets.find_bound(tab.id, &layers) {
            let pin = keysets.remove(&key_ref)?;
            tracing::info!("Unpinned tab {} from {}", tab.id, key_ref);
            return Ok(Toggled {
                pinned: false,
                entry: PinEntry { key_ref, pin },
            });
        }

        let entry = self
            .pin_tab(PinTabArgs {
                key_ref: args.key_ref,
                options: args.options,
            })
            .await?;
        Ok(Toggled {
            pinned: true,
            entry,
        })
    }

    pub async fn get_pin(&mut self, args: KeyRefArgs) -> Result<ResolvedPin> {
        let key_ref = self.existing_ref(&args.key_ref).await?;
        let keysets = self.store.keysets().await?;
        let pin = keysets
            .get(&key_ref)
            .cloned()
            .ok_or_else(|| StoreError::not_found(&key_ref.key, &[key_ref.layer_id]))?;
        let tab = self.resolver.find_tab(keysets, &pin, &key_ref).await?;
        let pin = keysets.get(&key_ref).cloned().unwrap_or(pin);
        Ok(ResolvedPin { key_ref, pin, tab })
    }

    /// Pins of the current view, or every pin of the given layers.
    pub async fn list_pins(&mut self, args: ListPinsArgs) -> Result<Vec<ResolvedPin>> {
        let entries: Vec<PinEntry> = match args.layer_ids {
            Some(layer_ids) => {
                let keysets = self.store.keysets().await?;
                layer_ids
                    .iter()
                    .flat_map(|&layer_id| keysets.entries(layer_id))
                    .collect()
            }
            None => {
                let layers = self.lookup_layers(None).await?;
                self.store.keysets().await?.view(&layers)?.list_entries()
            }
        };
        let keysets = self.store.keysets().await?;
        self.resolver.resolve_all(keysets, entries).await
    }

    /// Slot in the current view whose pin resolves to the active tab.
    pub async fn get_active_key(&mut self) -> Result<Option<KeyRef>> {
        let Some(tab) = self.resolver.active_tab().await? else {
            return Ok(None);
        };
        let layers = self.lookup_layers(None).await?;
        let keysets = self.store.keysets().await?;
        let entries: Vec<PinEntry> = keysets
            .view(&layers)?
            .list_entries()
            .into_iter()
            .filter(|entry| !entry.key_ref.key.is_history())
            .collect();
        let resolved = self.resolver.resolve_all(keysets, entries).await?;
        Ok(resolved
            .into_iter()
            .find(|r| r.tab.as_ref().is_some_and(|t| t.id == tab.id))
            .map(|r| r.key_ref))
    }

    /// Feeds typed characters, then key presses, into the chord and runs the
    /// command they complete.
    ///
    /// A request with only key codes continues the chord left pending by the
    /// previous request. Anything else starts a new chord.
    pub async fn execute_combo(
        &mut self,
        input: &str,
        key_codes: &[KeyCode],
    ) -> Result<ComboOutcome> {
        if !input.is_empty() || key_codes.is_empty() {
            self.chord.reset();
        }
        let keys: Vec<ChordKey> = input
            .chars()
            .map(ChordKey::Char)
            .chain(key_codes.iter().cloned().map(ChordKey::Code))
            .collect();

        let mut keys = keys.iter();
        let (typed, matched) = loop {
            let Some(key) = keys.next() else {
                return Ok(ComboOutcome::Pending {
                    input: self.chord.as_str().to_string(),
                });
            };
            if let ChordStep::Complete { input, matched } = self.chord.feed(&self.trie, key)? {
                break (input, matched);
            }
        };
        if let Some(extra) = keys.find(|key| !key.is_modifier()) {
            return Err(ComboError::TrailingInput {
                key: extra.to_string(),
            }
            .into());
        }

        let action = matched.action;
        let command = action.into_command(matched.args)?;
        let name = command.name();
        tracing::debug!("Combo {:?} runs {}", typed, name);

        let result = self.run(command).await?;
        Ok(ComboOutcome::Executed {
            command: name.to_string(),
            close_popup: action.closes_popup(),
            result,
        })
    }

    /// Runs the chord bound to a registered command.
    pub async fn run_shortcut(&mut self, command: &str) -> Result<ComboOutcome> {
        let combo = self
            .store
            .options()
            .await?
            .command_combo(command)
            .filter(|combo| !combo.is_empty())
            .map(str::to_string)
            .ok_or_else(|| KeypinError::NoComboConfigured(command.to_string()))?;
        self.execute_combo(&combo, &[]).await
    }
}

fn to_json<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

fn require_key(partial: &PartialKeyRef) -> Result<KeyCode> {
    partial
        .key
        .clone()
        .ok_or_else(|| KeypinError::InvalidArgs("key is required".to_string()))
}

/// Keys a pin may be stored under explicitly.
fn validate_pin_key(key: &KeyCode) -> Result<()> {
    if key.is_history() {
        return Err(KeypinError::ReservedKey(key.clone()));
    }
    if keys::lookup_by_code(key.as_str()).is_none() {
        return Err(KeypinError::UnknownKey(key.as_str().to_string()));
    }
    Ok(())
}

fn first_free_key(keysets: &Keysets, layer_id: LayerId, key_order: Vec<KeyCode>) -> Result<KeyCode> {
    key_order
        .into_iter()
        .filter(|key| !key.is_history())
        .find(|key| !keysets.contains(&KeyRef::new(layer_id, key.clone())))
        .ok_or(KeypinError::NoFreeKey(layer_id))
}

fn detach(keysets: &mut Keysets, key_ref: &KeyRef) {
    if let Some(mut pin) = keysets.get(key_ref).cloned() {
        if pin.detach() {
            keysets.set(key_ref, pin);
        }
    }
}

/// Closes tabs concurrently. Returns the ids actually closed; failures are
/// logged and skipped.
async fn close_all(host: &Host, tab_ids: Vec<TabId>) -> Vec<TabId> {
    let removals = tab_ids.into_iter().map(|tab_id| async move {
        (tab_id, host.tabs.remove(tab_id).await)
    });
    join_all(removals)
        .await
        .into_iter()
        .filter_map(|(tab_id, result)| match result {
            Ok(()) => Some(tab_id),
            Err(HostError::TabNotFound(_)) => None,
            Err(e) => {
                tracing::warn!("Failed to close tab {}: {}", tab_id, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;
    use std::sync::Arc;

    use crate::error::ErrorPayload;
    use crate::host::memory::MemoryBrowser;
    use crate::host::{Shortcut, TabDirectory, WindowId};
    use crate::pins::UrlPattern;
    use crate::store::MemoryStorage;

    fn layer(id: u8) -> LayerId {
        LayerId::new(id).unwrap()
    }

    struct Fixture {
        browser: Arc<MemoryBrowser>,
        storage: Arc<MemoryStorage>,
        dispatcher: Dispatcher<Arc<MemoryStorage>>,
        window: WindowId,
    }

    fn fixture() -> Fixture {
        fixture_with(&PinsConfig::default())
    }

    fn fixture_with(config: &PinsConfig) -> Fixture {
        let browser = Arc::new(MemoryBrowser::new());
        let window = browser.open_window();
        let storage = Arc::new(MemoryStorage::new());
        let dispatcher = Dispatcher::new(
            LayeredKeysetStore::new(storage.clone()),
            Host::from_browser(browser.clone()),
            config,
        );
        Fixture {
            browser,
            storage,
            dispatcher,
            window,
        }
    }

    impl Fixture {
        fn open(&self, url: &str) -> Tab {
            self.browser.open_tab(self.window, url, url).unwrap()
        }

        async fn put(&mut self, key_ref: KeyRef, tab: &Tab) {
            let keysets = self.dispatcher.store_mut().keysets().await.unwrap();
            keysets.set(&key_ref, Pin::from_tab(tab, PinScope::Page));
        }

        async fn stored(&mut self, key_ref: &KeyRef) -> Option<Pin> {
            let keysets = self.dispatcher.store_mut().keysets().await.unwrap();
            keysets.get(key_ref).cloned()
        }

        async fn call(&mut self, request: Value) -> Response {
            self.dispatcher.handle_request(request).await
        }

        async fn ok(&mut self, request: Value) -> Value {
            let response = self.call(request.clone()).await;
            assert!(response.success, "{request} failed: {:?}", response.error);
            response.result.unwrap()
        }

        async fn err(&mut self, request: Value) -> ErrorPayload {
            let response = self.call(request.clone()).await;
            assert!(!response.success, "{request} unexpectedly succeeded");
            response.error.unwrap()
        }
    }

    #[tokio::test]
    async fn test_focus_from_other_layer_records_history() {
        let mut f = fixture();
        let previous = f.open("https://prev.test/");
        let target = f.open("https://target.test/");
        f.put(KeyRef::new(LayerId::GLOBAL, "KeyA"), &target).await;
        f.ok(json!({"command": "setActiveLayerId", "args": {"layerId": 3}})).await;

        let tab = f.ok(json!({"command": "focusTab", "args": {"key": "KeyA"}})).await;
        assert_eq!(tab["id"], json!(target.id));

        let keysets = f.storage.value("keysets").unwrap();
        assert_eq!(keysets["0"]["Backspace"]["tabId"], json!(previous.id));
        assert_eq!(f.storage.value("state").unwrap(), json!({"layerId": 3}));
    }

    #[tokio::test]
    async fn test_pin_tab_assigns_keys_in_order() {
        let mut f = fixture();
        let first = f.open("https://one.test/");
        let second = f.open("https://two.test/");

        let entry = f.ok(json!({"command": "pinTab"})).await;
        assert_eq!(entry["keyRef"], json!({"layerId": 1, "key": "KeyA"}));
        assert_eq!(entry["pin"]["tabId"], json!(first.id));
        assert_eq!(entry["pin"]["urlPattern"], json!("https://one.test/*"));

        f.browser.focus(second.id);
        let entry = f.ok(json!({"command": "pinTab"})).await;
        assert_eq!(entry["keyRef"], json!({"layerId": 1, "key": "KeyS"}));
    }

    #[tokio::test]
    async fn test_pin_tab_rejects_duplicates_and_reserved_keys() {
        let mut f = fixture();
        f.open("https://one.test/");
        f.ok(json!({"command": "pinTab", "args": {"key": "KeyS"}})).await;

        let error = f.err(json!({"command": "pinTab", "args": {"key": "KeyD"}})).await;
        assert_eq!(error.name, "UserError");
        assert_eq!(error.message, "Tab is already pinned to S in layer 1.");

        // Same slot again just refreshes the pin.
        f.ok(json!({"command": "pinTab", "args": {"key": "KeyS"}})).await;

        let error = f.err(json!({"command": "pinTab", "args": {"key": "Backspace"}})).await;
        assert_eq!(error.message, "Key ⌫ is reserved.");
        let error = f.err(json!({"command": "pinTab", "args": {"key": "KeyQQ"}})).await;
        assert_eq!(error.message, "Unknown key: KeyQQ");
    }

    #[tokio::test]
    async fn test_pin_tab_without_free_key() {
        let mut f = fixture();
        let first = f.open("https://one.test/");
        let second = f.open("https://two.test/");
        for key in keys::default_key_order() {
            f.put(KeyRef::new(layer(1), key), &first).await;
        }

        f.browser.focus(second.id);
        let error = f.err(json!({"command": "pinTab"})).await;
        assert_eq!(error.message, "No free key slot in layer 1.");
    }

    #[tokio::test]
    async fn test_pin_tab_without_active_tab() {
        let mut f = fixture();
        let error = f.err(json!({"command": "pinTab"})).await;
        assert_eq!(error.message, "No active tab.");
    }

    #[tokio::test]
    async fn test_update_pin_swap_and_move() {
        let mut f = fixture();
        let one = f.open("https://one.test/");
        let two = f.open("https://two.test/");
        let a = KeyRef::new(layer(1), "KeyA");
        let b = KeyRef::new(layer(1), "KeyB");
        let c = KeyRef::new(layer(1), "KeyC");
        f.put(a.clone(), &one).await;
        f.put(b.clone(), &two).await;

        f.ok(json!({
            "command": "updatePin",
            "args": {"layerId": 1, "key": "KeyA", "updates": {"key": "KeyB"}, "swap": true},
        }))
        .await;
        assert_eq!(f.stored(&a).await.unwrap().tab_id, Some(two.id));
        assert_eq!(f.stored(&b).await.unwrap().tab_id, Some(one.id));

        let entry = f
            .ok(json!({
                "command": "updatePin",
                "args": {"key": "KeyA", "updates": {"key": "KeyC", "title": "Two"}},
            }))
            .await;
        assert_eq!(entry["keyRef"], json!({"layerId": 1, "key": "KeyC"}));
        assert!(f.stored(&a).await.is_none());
        let moved = f.stored(&c).await.unwrap();
        assert_eq!(moved.tab_id, Some(two.id));
        assert_eq!(moved.title, "Two");
    }

    #[rstest]
    #[case::layer_allows_other_layer(DuplicateScope::Layer, 0, true)]
    #[case::layer_rejects_same_layer(DuplicateScope::Layer, 1, false)]
    #[case::layer_ignores_unviewed(DuplicateScope::Layer, 5, true)]
    #[case::view_rejects_global(DuplicateScope::View, 0, false)]
    #[case::view_rejects_same_layer(DuplicateScope::View, 1, false)]
    #[case::view_ignores_unviewed(DuplicateScope::View, 5, true)]
    #[case::global_rejects_global(DuplicateScope::All, 0, false)]
    #[case::global_rejects_unviewed(DuplicateScope::All, 5, false)]
    #[tokio::test]
    async fn test_pin_tab_duplicate_scope(
        #[case] duplicate_scope: DuplicateScope,
        #[case] pinned_in: u8,
        #[case] allowed: bool,
    ) {
        let mut f = fixture_with(&PinsConfig {
            duplicate_scope,
            ..PinsConfig::default()
        });
        let tab = f.open("https://one.test/");
        let existing = KeyRef::new(layer(pinned_in), "KeyS");
        f.put(existing.clone(), &tab).await;

        let response = f.call(json!({"command": "pinTab"})).await;
        let fresh = KeyRef::new(layer(1), "KeyA");
        if allowed {
            assert!(response.success, "{:?}", response.error);
            assert_eq!(f.stored(&fresh).await.unwrap().tab_id, Some(tab.id));
        } else {
            let error = response.error.unwrap();
            assert_eq!(error.message, format!("Tab is already pinned to {}.", existing));
            assert!(f.stored(&fresh).await.is_none());
        }
        assert_eq!(f.stored(&existing).await.unwrap().tab_id, Some(tab.id));
    }

    #[tokio::test]
    async fn test_update_pin_swaps_across_view() {
        let mut f = fixture();
        let one = f.open("https://one.test/");
        let two = f.open("https://two.test/");
        let global_a = KeyRef::new(LayerId::GLOBAL, "KeyA");
        let layer_b = KeyRef::new(layer(1), "KeyB");
        f.put(global_a.clone(), &one).await;
        f.put(layer_b.clone(), &two).await;

        let entry = f
            .ok(json!({
                "command": "updatePin",
                "args": {"key": "KeyA", "updates": {"key": "KeyB"}, "swap": true},
            }))
            .await;
        assert_eq!(entry["keyRef"], json!({"layerId": 1, "key": "KeyB"}));
        assert_eq!(f.stored(&global_a).await.unwrap().tab_id, Some(two.id));
        assert_eq!(f.stored(&layer_b).await.unwrap().tab_id, Some(one.id));
        assert!(f.stored(&KeyRef::new(LayerId::GLOBAL, "KeyB")).await.is_none());
    }

    #[tokio::test]
    async fn test_update_pin_to_unbound_key_lands_in_active_layer() {
        let mut f = fixture();
        let one = f.open("https://one.test/");
        let global_a = KeyRef::new(LayerId::GLOBAL, "KeyA");
        f.put(global_a.clone(), &one).await;

        f.ok(json!({"command": "updatePin", "args": {"key": "KeyA", "updates": {"key": "KeyC"}}}))
            .await;
        assert!(f.stored(&global_a).await.is_none());
        assert!(f.stored(&KeyRef::new(LayerId::GLOBAL, "KeyC")).await.is_none());
        assert_eq!(f.stored(&KeyRef::new(layer(1), "KeyC")).await.unwrap().tab_id, Some(one.id));
    }

    #[tokio::test]
    async fn test_update_pin_overwrites_without_swap() {
        let mut f = fixture();
        let one = f.open("https://one.test/");
        let two = f.open("https://two.test/");
        f.put(KeyRef::new(layer(1), "KeyA"), &one).await;
        f.put(KeyRef::new(layer(1), "KeyB"), &two).await;

        f.ok(json!({"command": "updatePin", "args": {"key": "KeyA", "updates": {"key": "KeyB"}}}))
            .await;
        let b = f.stored(&KeyRef::new(layer(1), "KeyB")).await.unwrap();
        assert_eq!(b.tab_id, Some(one.id));
        assert!(f.stored(&KeyRef::new(layer(1), "KeyA")).await.is_none());
    }

    #[tokio::test]
    async fn test_update_pin_into_history_is_reserved() {
        let mut f = fixture();
        let one = f.open("https://one.test/");
        f.put(KeyRef::new(layer(1), "KeyA"), &one).await;
        let error = f
            .err(json!({
                "command": "updatePin",
                "args": {"key": "KeyA", "updates": {"layerId": 0, "key": "Backspace"}},
            }))
            .await;
        assert_eq!(error.message, "Key ⌫ is reserved.");
    }

    #[tokio::test]
    async fn test_close_unpinned_keeps_history_tab() {
        let mut f = fixture();
        let first = f.open("https://first.test/");
        let pinned = f.open("https://pinned.test/");
        let loose = f.open("https://loose.test/");
        let other = f.open("https://other.test/");
        f.put(KeyRef::new(layer(1), "KeyA"), &pinned).await;

        // `first` becomes the history tab.
        f.ok(json!({"command": "focusTab", "args": {"key": "KeyA"}})).await;
        let closed = f.ok(json!({"command": "closeUnpinnedTabs"})).await;
        let mut tab_ids: Vec<TabId> = serde_json::from_value(closed["tabIds"].clone()).unwrap();
        tab_ids.sort();
        assert_eq!(tab_ids, vec![loose.id, other.id]);

        let remaining: Vec<TabId> = f.browser.all_tabs().iter().map(|t| t.id).collect();
        assert_eq!(remaining, vec![first.id, pinned.id]);
    }

    #[tokio::test]
    async fn test_close_tabs_detaches_pins() {
        let mut f = fixture();
        let keep = f.open("https://keep.test/");
        let one = f.open("https://one.test/");
        let two = f.open("https://two.test/");
        f.put(KeyRef::new(layer(1), "KeyA"), &one).await;
        f.put(KeyRef::new(layer(1), "KeyS"), &two).await;
        f.put(KeyRef::new(layer(2), "KeyA"), &keep).await;

        let closed = f.ok(json!({"command": "closeTabs"})).await;
        assert_eq!(closed["tabIds"].as_array().unwrap().len(), 2);
        assert_eq!(f.browser.all_tabs().len(), 1);
        assert!(f.stored(&KeyRef::new(layer(1), "KeyA")).await.unwrap().is_dangling());
        assert!(f.stored(&KeyRef::new(layer(1), "KeyS")).await.unwrap().is_dangling());
    }

    #[tokio::test]
    async fn test_close_tab() {
        let mut f = fixture();
        f.open("https://keep.test/");
        let one = f.open("https://one.test/");
        f.put(KeyRef::new(layer(1), "KeyA"), &one).await;

        let closed = f.ok(json!({"command": "closeTab", "args": {"key": "KeyA"}})).await;
        assert_eq!(closed, json!({"tabIds": [one.id]}));
        assert!(TabDirectory::get(f.browser.as_ref(), one.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_execute_combo() {
        let mut f = fixture();
        f.open("https://first.test/");
        let target = f.open("https://target.test/");
        f.put(KeyRef::new(layer(1), "KeyA"), &target).await;

        let pending = f.ok(json!({"command": "executeCombo", "args": {"input": "g"}})).await;
        assert_eq!(pending, json!({"status": "pending", "input": "g"}));

        let executed = f.ok(json!({"command": "executeCombo", "args": {"input": "ga"}})).await;
        assert_eq!(executed["status"], json!("executed"));
        assert_eq!(executed["command"], json!("focusTab"));
        assert_eq!(executed["closePopup"], json!(true));
        assert_eq!(executed["result"]["id"], json!(target.id));

        let error = f.err(json!({"command": "executeCombo", "args": {"input": "zz"}})).await;
        assert_eq!(error.name, "UserError");
    }

    #[tokio::test]
    async fn test_execute_combo_key_codes_skip_modifiers() {
        let mut f = fixture();
        f.open("https://first.test/");
        let target = f.open("https://target.test/");
        f.put(KeyRef::new(layer(2), "KeyA"), &target).await;

        let executed = f
            .ok(json!({
                "command": "executeCombo",
                "args": {"keyCodes": ["ControlLeft", "KeyG", "AltLeft", "Digit2", "MetaRight", "KeyA"]},
            }))
            .await;
        assert_eq!(executed["command"], json!("focusTab"));
        assert_eq!(executed["result"]["id"], json!(target.id));
    }

    #[tokio::test]
    async fn test_execute_combo_key_codes_across_requests() {
        let mut f = fixture();
        f.open("https://first.test/");
        let target = f.open("https://target.test/");
        f.put(KeyRef::new(layer(1), "KeyS"), &target).await;

        let pending = f
            .ok(json!({"command": "executeCombo", "args": {"keyCodes": ["ShiftLeft", "KeyG"]}}))
            .await;
        assert_eq!(pending, json!({"status": "pending", "input": "G"}));
        let ignored = f
            .ok(json!({"command": "executeCombo", "args": {"keyCodes": ["ShiftRight"]}}))
            .await;
        assert_eq!(ignored, json!({"status": "pending", "input": "G"}));

        let executed = f
            .ok(json!({"command": "executeCombo", "args": {"keyCodes": ["KeyS"]}}))
            .await;
        assert_eq!(executed["command"], json!("focusTab"));
        assert_eq!(executed["result"]["id"], json!(target.id));

        // Completed chords start over.
        let pending = f
            .ok(json!({"command": "executeCombo", "args": {"keyCodes": ["KeyG"]}}))
            .await;
        assert_eq!(pending, json!({"status": "pending", "input": "g"}));
    }

    #[tokio::test]
    async fn test_execute_combo_rejects_bad_key_codes() {
        let mut f = fixture();
        f.open("https://first.test/");

        let error = f
            .err(json!({"command": "executeCombo", "args": {"keyCodes": ["KeyG", "F13"]}}))
            .await;
        assert_eq!(error.name, "UserError");
        assert_eq!(error.message, "Key F13 cannot be typed in a combo.");

        let error = f
            .err(json!({"command": "executeCombo", "args": {"keyCodes": ["KeyT", "ShiftLeft", "KeyA"]}}))
            .await;
        assert_eq!(error.message, "Input continues after a complete combo at KeyA.");

        let pending = f
            .ok(json!({"command": "executeCombo", "args": {"keyCodes": ["KeyX"]}}))
            .await;
        assert_eq!(pending, json!({"status": "pending", "input": "x"}));
    }

    #[tokio::test]
    async fn test_set_active_layer_flushes_state() {
        let mut f = fixture();
        let state = f.ok(json!({"command": "setActiveLayerId", "args": {"layerId": 4}})).await;
        assert_eq!(state, json!({"layerId": 4, "view": [0, 4]}));
        assert_eq!(f.storage.value("state").unwrap(), json!({"layerId": 4}));

        let state = f.ok(json!({"command": "getState"})).await;
        assert_eq!(state["layerId"], json!(4));
    }

    #[tokio::test]
    async fn test_remove_pin_then_not_found() {
        let mut f = fixture();
        let one = f.open("https://one.test/");
        f.put(KeyRef::new(layer(1), "KeyA"), &one).await;

        let entry = f.ok(json!({"command": "removePin", "args": {"key": "KeyA"}})).await;
        assert_eq!(entry["keyRef"], json!({"layerId": 1, "key": "KeyA"}));

        let error = f.err(json!({"command": "removePin", "args": {"key": "KeyA"}})).await;
        assert_eq!(error.name, "UserError");
        assert_eq!(error.message, "No pin for A in layer(s) 0, 1.");
    }

    #[tokio::test]
    async fn test_clear_layer_returns_removed() {
        let mut f = fixture();
        let one = f.open("https://one.test/");
        f.put(KeyRef::new(layer(1), "KeyA"), &one).await;
        f.put(KeyRef::new(layer(1), "KeyS"), &one).await;

        let removed = f.ok(json!({"command": "clearLayer", "args": {"layerId": 1}})).await;
        assert_eq!(removed.as_array().unwrap().len(), 2);
        let removed = f.ok(json!({"command": "clearLayer"})).await;
        assert_eq!(removed, json!([]));
    }

    #[tokio::test]
    async fn test_list_pins_view_and_layers() {
        let mut f = fixture();
        let one = f.open("https://one.test/");
        let two = f.open("https://two.test/");
        f.put(KeyRef::new(LayerId::GLOBAL, "KeyA"), &one).await;
        f.put(KeyRef::new(layer(1), "KeyA"), &two).await;

        let view = f.ok(json!({"command": "listPins"})).await;
        let view = view.as_array().unwrap();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0]["keyRef"]["layerId"], json!(0));
        assert_eq!(view[0]["tab"]["id"], json!(one.id));

        let all = f.ok(json!({"command": "listPins", "args": {"layerIds": [0, 1]}})).await;
        assert_eq!(all.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_toggle_tab_pinned() {
        let mut f = fixture();
        f.open("https://one.test/");

        let toggled = f.ok(json!({"command": "toggleTabPinned"})).await;
        assert_eq!(toggled["pinned"], json!(true));
        assert_eq!(toggled["entry"]["keyRef"], json!({"layerId": 1, "key": "KeyA"}));

        let toggled = f.ok(json!({"command": "toggleTabPinned"})).await;
        assert_eq!(toggled["pinned"], json!(false));
        assert!(f.stored(&KeyRef::new(layer(1), "KeyA")).await.is_none());
    }

    #[tokio::test]
    async fn test_focus_neighbor_wraps() {
        let mut f = fixture();
        let a = f.open("https://a.test/");
        let s = f.open("https://s.test/");
        let d = f.open("https://d.test/");
        f.put(KeyRef::new(layer(1), "KeyD"), &d).await;
        f.put(KeyRef::new(layer(1), "KeyA"), &a).await;
        f.put(KeyRef::new(layer(1), "KeyS"), &s).await;

        let tab = f.ok(json!({"command": "focusNeighborTab"})).await;
        assert_eq!(tab["id"], json!(s.id));
        let tab = f.ok(json!({"command": "focusNeighborTab", "args": {"offset": -1}})).await;
        assert_eq!(tab["id"], json!(a.id));
        let tab = f.ok(json!({"command": "focusNeighborTab", "args": {"offset": -1}})).await;
        assert_eq!(tab["id"], json!(d.id));
    }

    #[tokio::test]
    async fn test_focus_neighbor_without_pins() {
        let mut f = fixture();
        f.open("https://a.test/");
        let error = f.err(json!({"command": "focusNeighborTab"})).await;
        assert_eq!(error.message, "No pins to cycle through.");
    }

    #[tokio::test]
    async fn test_get_active_key() {
        let mut f = fixture();
        let one = f.open("https://one.test/");
        let two = f.open("https://two.test/");
        f.put(KeyRef::new(layer(1), "KeyA"), &one).await;

        let key = f.ok(json!({"command": "getActiveKey"})).await;
        assert_eq!(key, json!({"layerId": 1, "key": "KeyA"}));

        f.browser.focus(two.id);
        let key = f.ok(json!({"command": "getActiveKey"})).await;
        assert_eq!(key, Value::Null);
    }

    #[tokio::test]
    async fn test_key_order_validation() {
        let mut f = fixture();
        let order = f.ok(json!({"command": "setKeyOrder", "args": {"inputChars": "s d f"}})).await;
        let codes: Vec<&str> = order
            .as_array()
            .unwrap()
            .iter()
            .map(|key| key["code"].as_str().unwrap())
            .collect();
        assert_eq!(codes, vec!["KeyS", "KeyD", "KeyF"]);

        let order = f.ok(json!({"command": "getKeyOrder"})).await;
        assert_eq!(order.as_array().unwrap().len(), 3);

        for input in ["ss", "1", "<", "", "a~"] {
            let error = f
                .err(json!({"command": "setKeyOrder", "args": {"inputChars": input}}))
                .await;
            assert!(error.message.starts_with("Invalid key order"), "{input}");
        }
    }

    #[tokio::test]
    async fn test_command_combos_and_shortcuts() {
        let mut f = fixture();
        let target = f.open("https://target.test/");
        f.put(KeyRef::new(layer(1), "KeyA"), &target).await;
        f.browser.set_shortcuts(vec![
            Shortcut {
                name: "command-01".to_string(),
                description: "Second".to_string(),
                shortcut: Some("Alt+1".to_string()),
            },
            Shortcut {
                name: "command-02".to_string(),
                description: "First".to_string(),
                shortcut: None,
            },
            Shortcut {
                name: "_execute_action".to_string(),
                description: "Open popup".to_string(),
                shortcut: None,
            },
        ]);

        f.ok(json!({"command": "setCommandCombo", "args": {"command": "command-01", "combo": "ga"}}))
            .await;
        let combos = f.ok(json!({"command": "listCommandCombos"})).await;
        assert_eq!(
            combos,
            json!([
                {"name": "command-02", "description": "First"},
                {"name": "command-01", "description": "Second", "shortcut": "Alt+1", "combo": "ga"},
            ])
        );

        let outcome = f.ok(json!({"command": "runShortcut", "args": {"command": "command-01"}})).await;
        assert_eq!(outcome["command"], json!("focusTab"));

        let error = f.err(json!({"command": "runShortcut", "args": {"command": "command-02"}})).await;
        assert_eq!(error.message, "No combo configured for command-02.");

        let error = f
            .err(json!({"command": "setCommandCombo", "args": {"command": "_execute_action", "combo": "t"}}))
            .await;
        assert_eq!(error.message, "Unknown command: _execute_action");

        let error = f
            .err(json!({"command": "setCommandCombo", "args": {"command": "command-02", "combo": "zz"}}))
            .await;
        assert_eq!(error.name, "UserError");
    }

    #[tokio::test]
    async fn test_get_pin_repairs_dangling_pin() {
        let mut f = fixture();
        let live = f.open("https://docs.test/guide");
        let key_ref = KeyRef::new(layer(1), "KeyA");
        let pin = Pin {
            tab_id: Some(999),
            window_id: None,
            index: None,
            title: "Docs".to_string(),
            url: "https://docs.test/".to_string(),
            url_pattern: UrlPattern::new("https://docs.test/*"),
            fav_icon_url: None,
        };
        f.dispatcher.store_mut().keysets().await.unwrap().set(&key_ref, pin);

        let resolved = f.ok(json!({"command": "getPin", "args": {"key": "KeyA"}})).await;
        assert_eq!(resolved["tab"]["id"], json!(live.id));
        assert_eq!(resolved["pin"]["tabId"], json!(live.id));
        assert_eq!(resolved["pin"]["title"], json!("Docs"));
    }

    #[tokio::test]
    async fn test_malformed_request() {
        let mut f = fixture();
        let error = f.err(json!({"args": {}})).await;
        assert_eq!(error.message, "Invalid arguments: request has no command");
        let error = f.err(json!({"command": "focusTab"})).await;
        assert_eq!(error.message, "Invalid arguments: key is required");
    }
}
