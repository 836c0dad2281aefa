//! Host collaborators: the browser's tab and window directories and its
//! shortcut registry.
//!
//! Only the contract is defined here; [`memory::MemoryBrowser`] is an
//! in-process implementation used by the CLI driver and tests.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::{BrowserSnapshot, MemoryBrowser};

pub type TabId = u32;
pub type WindowId = u32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("Tab {0} not found")]
    TabNotFound(TabId),

    #[error("Window {0} not found")]
    WindowNotFound(WindowId),

    #[error("Host call failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    pub id: TabId,
    pub window_id: WindowId,
    pub index: u32,
    #[serde(default)]
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fav_icon_url: Option<String>,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Window {
    pub id: WindowId,
    #[serde(default)]
    pub focused: bool,
}

/// Filter for [`TabDirectory::query`]. Empty query matches every tab.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabQuery {
    pub active: Option<bool>,
    pub window_id: Option<WindowId>,
    pub last_focused_window: bool,
}

impl TabQuery {
    /// The tab the user is currently looking at.
    pub fn active_in_last_focused() -> Self {
        Self {
            active: Some(true),
            window_id: None,
            last_focused_window: true,
        }
    }

    pub fn in_window(window_id: WindowId) -> Self {
        Self {
            window_id: Some(window_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, tab: &Tab, last_focused: Option<WindowId>) -> bool {
        if let Some(active) = self.active {
            if tab.active != active {
                return false;
            }
        }
        if let Some(window_id) = self.window_id {
            if tab.window_id != window_id {
                return false;
            }
        }
        if self.last_focused_window && Some(tab.window_id) != last_focused {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTab {
    pub url: String,
    pub window_id: Option<WindowId>,
    pub index: Option<u32>,
    pub active: bool,
}

impl CreateTab {
    pub fn in_window(url: impl Into<String>, window_id: WindowId) -> Self {
        Self {
            url: url.into(),
            window_id: Some(window_id),
            index: None,
            active: true,
        }
    }

    /// Opens right after `neighbor` in its window.
    pub fn next_to(url: impl Into<String>, neighbor: &Tab) -> Self {
        Self {
            url: url.into(),
            window_id: Some(neighbor.window_id),
            index: Some(neighbor.index + 1),
            active: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabPatch {
    pub active: Option<bool>,
    pub url: Option<String>,
}

impl TabPatch {
    pub fn activate() -> Self {
        Self {
            active: Some(true),
            url: None,
        }
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        Self {
            active: None,
            url: Some(url.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveTab {
    pub window_id: WindowId,
    pub index: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateWindow {
    pub url: Option<String>,
    pub focused: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowPatch {
    pub focused: Option<bool>,
}

impl WindowPatch {
    pub fn focus() -> Self {
        Self {
            focused: Some(true),
        }
    }
}

/// A registered extension command and its user-assigned physical shortcut.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shortcut {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortcut: Option<String>,
}

/// Tab operations. A missing tab on `get` is `Ok(None)`, not an error.
#[async_trait]
pub trait TabDirectory: Send + Sync {
    async fn get(&self, tab_id: TabId) -> Result<Option<Tab>, HostError>;

    async fn query(&self, query: &TabQuery) -> Result<Vec<Tab>, HostError>;

    async fn create(&self, spec: CreateTab) -> Result<Tab, HostError>;

    async fn update(&self, tab_id: TabId, patch: TabPatch) -> Result<Tab, HostError>;

    async fn move_tab(&self, tab_id: TabId, target: MoveTab) -> Result<Tab, HostError>;

    async fn remove(&self, tab_id: TabId) -> Result<(), HostError>;
}

#[async_trait]
pub trait WindowDirectory: Send + Sync {
    async fn get(&self, window_id: WindowId) -> Result<Option<Window>, HostError>;

    async fn get_last_focused(&self) -> Result<Option<Window>, HostError>;

    async fn create(&self, spec: CreateWindow) -> Result<Window, HostError>;

    async fn update(&self, window_id: WindowId, patch: WindowPatch) -> Result<Window, HostError>;
}

#[async_trait]
pub trait ShortcutRegistry: Send + Sync {
    async fn commands(&self) -> Result<Vec<Shortcut>, HostError>;
}

/// Bundle of host collaborators handed to the resolver and dispatcher.
#[derive(Clone)]
pub struct Host {
    pub tabs: Arc<dyn TabDirectory>,
    pub windows: Arc<dyn WindowDirectory>,
    pub shortcuts: Arc<dyn ShortcutRegistry>,
}

impl Host {
    /// Uses one browser object for every collaborator.
    pub fn from_browser<B>(browser: Arc<B>) -> Self
    where
        B: TabDirectory + WindowDirectory + ShortcutRegistry + 'static,
    {
        Self {
            tabs: browser.clone(),
            windows: browser.clone(),
            shortcuts: browser,
        }
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host").finish_non_exhaustive()
    }
}
