//! Maps stored pins to live tabs, repairing the stored record on the way.

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::host::{
    CreateTab, CreateWindow, Host, HostError, MoveTab, Tab, TabPatch, TabQuery, WindowPatch,
};
use crate::keys::KeyRef;
use crate::store::{Keysets, StoreError};

use super::{FocusOptions, Pin, PinEntry, PinScope};

/// A stored pin and the tab it currently resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPin {
    pub key_ref: KeyRef,
    pub pin: Pin,
    pub tab: Option<Tab>,
}

#[derive(Debug, Clone)]
pub struct PinResolver {
    host: Host,
    new_tab_urls: Vec<String>,
}

impl PinResolver {
    pub fn new(host: Host, new_tab_urls: Vec<String>) -> Self {
        Self { host, new_tab_urls }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Active tab of the last focused window.
    pub async fn active_tab(&self) -> Result<Option<Tab>> {
        let tabs = self
            .host
            .tabs
            .query(&TabQuery::active_in_last_focused())
            .await?;
        Ok(tabs.into_iter().next())
    }

    fn is_new_tab(&self, url: &str) -> bool {
        self.new_tab_urls.iter().any(|candidate| candidate == url)
    }

    /// Resolves `pin`, stored at `key_ref`, to a live tab.
    ///
    /// A live `tab_id` wins without touching the store. Otherwise the first
    /// open tab matching the url pattern is adopted and the stored identity
    /// is updated; with no match the stored pin becomes dangling. Neither
    /// outcome is an error.
    pub async fn find_tab(
        &self,
        keysets: &mut Keysets,
        pin: &Pin,
        key_ref: &KeyRef,
    ) -> Result<Option<Tab>> {
        if let Some(tab_id) = pin.tab_id {
            if let Some(tab) = self.host.tabs.get(tab_id).await? {
                return Ok(Some(tab));
            }
            tracing::debug!("Tab {} of {} is gone", tab_id, key_ref);
        }
        self.search(keysets, pin, key_ref).await
    }

    async fn search(
        &self,
        keysets: &mut Keysets,
        pin: &Pin,
        key_ref: &KeyRef,
    ) -> Result<Option<Tab>> {
        let tabs = self.host.tabs.query(&TabQuery::default()).await?;
        let found = tabs
            .into_iter()
            .find(|tab| pin.url_pattern.matches(&tab.url));

        let mut repaired = pin.clone();
        let changed = match &found {
            Some(tab) => repaired.attach(tab),
            None => repaired.detach(),
        };
        if changed {
            match &found {
                Some(tab) => tracing::debug!("Rebound {} to tab {}", key_ref, tab.id),
                None => tracing::debug!("{} is dangling", key_ref),
            }
            keysets.set(key_ref, repaired);
        }
        Ok(found)
    }

    /// Resolves many entries. Id lookups run concurrently; entries that need
    /// a url search are repaired one after another.
    pub async fn resolve_all(
        &self,
        keysets: &mut Keysets,
        entries: Vec<PinEntry>,
    ) -> Result<Vec<ResolvedPin>> {
        let lookups = entries.iter().map(|entry| async move {
            match entry.pin.tab_id {
                Some(tab_id) => self.host.tabs.get(tab_id).await,
                None => Ok(None),
            }
        });
        let found = join_all(lookups).await;

        let mut resolved = Vec::with_capacity(entries.len());
        for (entry, found) in entries.into_iter().zip(found) {
            let tab = match found? {
                Some(tab) => Some(tab),
                None => self.search(keysets, &entry.pin, &entry.key_ref).await?,
            };
            let pin = keysets.get(&entry.key_ref).cloned().unwrap_or(entry.pin);
            resolved.push(ResolvedPin {
                key_ref: entry.key_ref,
                pin,
                tab,
            });
        }
        Ok(resolved)
    }

    /// Brings the tab pinned at `key_ref` to the front, opening a new one when
    /// needed, and records the previously active tab under the history key.
    pub async fn focus_tab(
        &self,
        keysets: &mut Keysets,
        key_ref: &KeyRef,
        options: FocusOptions,
    ) -> Result<Tab> {
        let pin = keysets
            .get(key_ref)
            .cloned()
            .ok_or_else(|| StoreError::not_found(&key_ref.key, &[key_ref.layer_id]))?;
        let previous = self.active_tab().await?;

        let existing = if options.recreate {
            None
        } else {
            self.find_tab(keysets, &pin, key_ref).await?
        };

        let tab = match existing {
            Some(tab) => {
                let tab = if options.reset {
                    tracing::debug!("Resetting tab {} to {}", tab.id, pin.url);
                    self.host
                        .tabs
                        .update(tab.id, TabPatch::navigate(pin.url.clone()))
                        .await?
                } else {
                    tab
                };
                if options.summon {
                    self.summon(tab, previous.as_ref()).await?
                } else {
                    tab
                }
            }
            None => self.open_replacement(&pin, options, previous.as_ref()).await?,
        };

        let tab = if tab.active {
            tab
        } else {
            self.host.tabs.update(tab.id, TabPatch::activate()).await?
        };
        self.host
            .windows
            .update(tab.window_id, WindowPatch::focus())
            .await?;

        if let Some(mut stored) = keysets.get(key_ref).cloned() {
            if stored.attach(&tab) {
                keysets.set(key_ref, stored);
            }
        }

        if let Some(previous) = previous {
            self.record_history(keysets, previous, &tab).await?;
        }

        tracing::info!("Focused {} in tab {}", key_ref, tab.id);
        Ok(tab)
    }

    /// Moves `tab` right after the current tab unless it is already next to it.
    async fn summon(&self, tab: Tab, current: Option<&Tab>) -> Result<Tab> {
        let Some(current) = current else {
            return Ok(tab);
        };
        let same_window = current.window_id == tab.window_id;
        if current.id == tab.id || (same_window && current.index.abs_diff(tab.index) <= 1) {
            return Ok(tab);
        }
        // Removing a tab ahead of the current one shifts the current one left.
        let index = if same_window && tab.index < current.index {
            current.index
        } else {
            current.index + 1
        };
        let moved = self
            .host
            .tabs
            .move_tab(
                tab.id,
                MoveTab {
                    window_id: current.window_id,
                    index,
                },
            )
            .await?;
        Ok(moved)
    }

    /// Opens the pinned url: next to the current tab when summoning, else in
    /// the pin's window, else in the last focused window, else in a new
    /// window. Each step is only tried after the previous one failed.
    async fn open_replacement(
        &self,
        pin: &Pin,
        options: FocusOptions,
        current: Option<&Tab>,
    ) -> Result<Tab> {
        if options.summon {
            if let Some(current) = current {
                match self
                    .host
                    .tabs
                    .create(CreateTab::next_to(pin.url.clone(), current))
                    .await
                {
                    Ok(tab) => return Ok(tab),
                    Err(e) => tracing::warn!("Failed to open {} next to tab {}: {}", pin.url, current.id, e),
                }
            }
        }

        if let Some(window_id) = pin.window_id {
            match self.host.windows.get(window_id).await {
                Ok(Some(_)) => {
                    match self
                        .host
                        .tabs
                        .create(CreateTab::in_window(pin.url.clone(), window_id))
                        .await
                    {
                        Ok(tab) => return Ok(tab),
                        Err(e) => tracing::warn!("Failed to open {} in window {}: {}", pin.url, window_id, e),
                    }
                }
                Ok(None) => tracing::debug!("Window {} of the pin is gone", window_id),
                Err(e) => tracing::warn!("Failed to look up window {}: {}", window_id, e),
            }
        }

        match self.host.windows.get_last_focused().await {
            Ok(Some(window)) => {
                match self
                    .host
                    .tabs
                    .create(CreateTab::in_window(pin.url.clone(), window.id))
                    .await
                {
                    Ok(tab) => return Ok(tab),
                    Err(e) => tracing::warn!("Failed to open {} in window {}: {}", pin.url, window.id, e),
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to look up the last focused window: {}", e),
        }

        let window = self
            .host
            .windows
            .create(CreateWindow {
                url: Some(pin.url.clone()),
                focused: true,
            })
            .await?;
        let tabs = self.host.tabs.query(&TabQuery::in_window(window.id)).await?;
        tabs.into_iter().next().ok_or_else(|| {
            HostError::Failed(format!("Window {} opened without a tab", window.id)).into()
        })
    }

    async fn record_history(&self, keysets: &mut Keysets, previous: Tab, focused: &Tab) -> Result<()> {
        if previous.id == focused.id {
            return Ok(());
        }
        if self.is_new_tab(&previous.url) {
            tracing::debug!("Closing new tab placeholder {}", previous.id);
            return match self.host.tabs.remove(previous.id).await {
                Ok(()) | Err(HostError::TabNotFound(_)) => Ok(()),
                Err(e) => Err(e.into()),
            };
        }
        keysets.set(&KeyRef::history(), Pin::from_tab(&previous, PinScope::Page));
        Ok(())
    }
}
