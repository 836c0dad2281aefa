//! In-memory browser: windows holding ordered tabs, one active tab per
//! window and a last-focused window. State can be loaded from and saved to a
//! JSON snapshot so the CLI can replay commands against a recorded session.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    CreateTab, CreateWindow, HostError, MoveTab, Shortcut, ShortcutRegistry, Tab, TabDirectory,
    TabId, TabPatch, TabQuery, Window, WindowDirectory, WindowId, WindowPatch,
};

const BLANK_TAB_URL: &str = "chrome://newtab/";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrowserSnapshot {
    pub windows: Vec<WindowSnapshot>,
    pub last_focused_window: Option<WindowId>,
    pub shortcuts: Vec<Shortcut>,
    pub next_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSnapshot {
    pub id: WindowId,
    #[serde(default)]
    pub tabs: Vec<TabSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSnapshot {
    pub id: TabId,
    #[serde(default)]
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fav_icon_url: Option<String>,
    #[serde(default)]
    pub active: bool,
}

impl BrowserSnapshot {
    fn alloc_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn window_index(&self, window_id: WindowId) -> Option<usize> {
        self.windows.iter().position(|w| w.id == window_id)
    }

    fn locate(&self, tab_id: TabId) -> Option<(usize, usize)> {
        self.windows.iter().enumerate().find_map(|(wi, window)| {
            window
                .tabs
                .iter()
                .position(|t| t.id == tab_id)
                .map(|ti| (wi, ti))
        })
    }

    fn tab_view(&self, wi: usize, ti: usize) -> Tab {
        let window = &self.windows[wi];
        let tab = &window.tabs[ti];
        Tab {
            id: tab.id,
            window_id: window.id,
            index: ti as u32,
            title: tab.title.clone(),
            url: tab.url.clone(),
            fav_icon_url: tab.fav_icon_url.clone(),
            active: tab.active,
        }
    }

    fn activate(&mut self, wi: usize, ti: usize) {
        for (i, tab) in self.windows[wi].tabs.iter_mut().enumerate() {
            tab.active = i == ti;
        }
    }

    /// Activates the tab nearest to `near` when the window lost its active tab.
    fn ensure_active(&mut self, wi: usize, near: usize) {
        let tabs = &self.windows[wi].tabs;
        if tabs.is_empty() || tabs.iter().any(|t| t.active) {
            return;
        }
        let ti = near.min(tabs.len() - 1);
        self.activate(wi, ti);
    }

    /// Closing a window's last tab closes the window.
    fn prune_empty_windows(&mut self) {
        self.windows.retain(|w| !w.tabs.is_empty());
        let focused_alive = self
            .last_focused_window
            .is_some_and(|id| self.window_index(id).is_some());
        if !focused_alive {
            self.last_focused_window = self.windows.first().map(|w| w.id);
        }
    }

    fn normalize_ids(&mut self) {
        let max_id = self
            .windows
            .iter()
            .flat_map(|w| std::iter::once(w.id).chain(w.tabs.iter().map(|t| t.id)))
            .max()
            .unwrap_or(0);
        self.next_id = self.next_id.max(max_id);
    }
}

/// Browser double backed by a [`BrowserSnapshot`] behind a mutex.
#[derive(Debug, Default)]
pub struct MemoryBrowser {
    state: Mutex<BrowserSnapshot>,
}

impl MemoryBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(mut snapshot: BrowserSnapshot) -> Self {
        snapshot.normalize_ids();
        Self {
            state: Mutex::new(snapshot),
        }
    }

    /// Load a snapshot file; a missing file yields an empty browser.
    pub fn load(path: &Path) -> Result<Self, HostError> {
        if !path.exists() {
            tracing::debug!("No browser snapshot at {}, starting empty", path.display());
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            HostError::Failed(format!("Failed to read snapshot {}: {}", path.display(), e))
        })?;
        let snapshot: BrowserSnapshot = serde_json::from_str(&content).map_err(|e| {
            HostError::Failed(format!("Failed to parse snapshot {}: {}", path.display(), e))
        })?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn save(&self, path: &Path) -> Result<(), HostError> {
        let content = serde_json::to_string_pretty(&self.snapshot())
            .map_err(|e| HostError::Failed(format!("Failed to serialize snapshot: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            HostError::Failed(format!("Failed to write snapshot {}: {}", path.display(), e))
        })
    }

    pub fn snapshot(&self) -> BrowserSnapshot {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, BrowserSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens an empty window; the first window opened becomes focused.
    pub fn open_window(&self) -> WindowId {
        let mut state = self.lock();
        let id = state.alloc_id();
        state.windows.push(WindowSnapshot {
            id,
            tabs: Vec::new(),
        });
        if state.last_focused_window.is_none() {
            state.last_focused_window = Some(id);
        }
        id
    }

    /// Appends a tab to `window_id`. The first tab of a window is active.
    pub fn open_tab(&self, window_id: WindowId, url: &str, title: &str) -> Option<Tab> {
        let mut state = self.lock();
        let wi = state.window_index(window_id)?;
        let id = state.alloc_id();
        state.windows[wi].tabs.push(TabSnapshot {
            id,
            title: title.to_string(),
            url: url.to_string(),
            fav_icon_url: None,
            active: false,
        });
        let ti = state.windows[wi].tabs.len() - 1;
        state.ensure_active(wi, ti);
        Some(state.tab_view(wi, ti))
    }

    /// Makes `tab_id` the active tab and focuses its window.
    pub fn focus(&self, tab_id: TabId) -> bool {
        let mut state = self.lock();
        let Some((wi, ti)) = state.locate(tab_id) else {
            return false;
        };
        state.activate(wi, ti);
        state.last_focused_window = Some(state.windows[wi].id);
        true
    }

    /// Simulates the user closing a tab outside of keypin.
    pub fn close(&self, tab_id: TabId) -> bool {
        let mut state = self.lock();
        let Some((wi, ti)) = state.locate(tab_id) else {
            return false;
        };
        state.windows[wi].tabs.remove(ti);
        state.ensure_active(wi, ti);
        state.prune_empty_windows();
        true
    }

    pub fn set_shortcuts(&self, shortcuts: Vec<Shortcut>) {
        self.lock().shortcuts = shortcuts;
    }

    pub fn all_tabs(&self) -> Vec<Tab> {
        let state = self.lock();
        state
            .windows
            .iter()
            .enumerate()
            .flat_map(|(wi, w)| (0..w.tabs.len()).map(move |ti| (wi, ti)))
            .map(|(wi, ti)| state.tab_view(wi, ti))
            .collect()
    }

    pub fn last_focused_window(&self) -> Option<WindowId> {
        self.lock().last_focused_window
    }
}

#[async_trait]
impl TabDirectory for MemoryBrowser {
    async fn get(&self, tab_id: TabId) -> Result<Option<Tab>, HostError> {
        let state = self.lock();
        Ok(state.locate(tab_id).map(|(wi, ti)| state.tab_view(wi, ti)))
    }

    async fn query(&self, query: &TabQuery) -> Result<Vec<Tab>, HostError> {
        let last_focused = self.lock().last_focused_window;
        Ok(self
            .all_tabs()
            .into_iter()
            .filter(|tab| query.matches(tab, last_focused))
            .collect())
    }

    async fn create(&self, spec: CreateTab) -> Result<Tab, HostError> {
        let mut state = self.lock();
        let window_id = spec
            .window_id
            .or(state.last_focused_window)
            .ok_or_else(|| HostError::Failed("No window to create the tab in".to_string()))?;
        let wi = state
            .window_index(window_id)
            .ok_or(HostError::WindowNotFound(window_id))?;
        let id = state.alloc_id();
        let len = state.windows[wi].tabs.len();
        let ti = spec.index.map_or(len, |i| (i as usize).min(len));
        state.windows[wi].tabs.insert(
            ti,
            TabSnapshot {
                id,
                title: spec.url.clone(),
                url: spec.url,
                fav_icon_url: None,
                active: false,
            },
        );
        if spec.active {
            state.activate(wi, ti);
        } else {
            state.ensure_active(wi, ti);
        }
        Ok(state.tab_view(wi, ti))
    }

    async fn update(&self, tab_id: TabId, patch: TabPatch) -> Result<Tab, HostError> {
        let mut state = self.lock();
        let (wi, ti) = state.locate(tab_id).ok_or(HostError::TabNotFound(tab_id))?;
        if let Some(url) = patch.url {
            let tab = &mut state.windows[wi].tabs[ti];
            tab.title = url.clone();
            tab.url = url;
        }
        if patch.active == Some(true) {
            state.activate(wi, ti);
        }
        Ok(state.tab_view(wi, ti))
    }

    async fn move_tab(&self, tab_id: TabId, target: MoveTab) -> Result<Tab, HostError> {
        let mut state = self.lock();
        let (wi, ti) = state.locate(tab_id).ok_or(HostError::TabNotFound(tab_id))?;
        let target_wi = state
            .window_index(target.window_id)
            .ok_or(HostError::WindowNotFound(target.window_id))?;

        let mut tab = state.windows[wi].tabs.remove(ti);
        let was_active = tab.active;
        tab.active = false;
        state.ensure_active(wi, ti);

        let len = state.windows[target_wi].tabs.len();
        let target_ti = (target.index as usize).min(len);
        state.windows[target_wi].tabs.insert(target_ti, tab);
        if was_active && wi == target_wi {
            state.activate(target_wi, target_ti);
        } else {
            state.ensure_active(target_wi, target_ti);
        }

        state.prune_empty_windows();
        let (wi, ti) = state.locate(tab_id).ok_or(HostError::TabNotFound(tab_id))?;
        Ok(state.tab_view(wi, ti))
    }

    async fn remove(&self, tab_id: TabId) -> Result<(), HostError> {
        if self.close(tab_id) {
            Ok(())
        } else {
            Err(HostError::TabNotFound(tab_id))
        }
    }
}

#[async_trait]
impl WindowDirectory for MemoryBrowser {
    async fn get(&self, window_id: WindowId) -> Result<Option<Window>, HostError> {
        let state = self.lock();
        Ok(state.window_index(window_id).map(|_| Window {
            id: window_id,
            focused: state.last_focused_window == Some(window_id),
        }))
    }

    async fn get_last_focused(&self) -> Result<Option<Window>, HostError> {
        let state = self.lock();
        Ok(state
            .last_focused_window
            .filter(|id| state.window_index(*id).is_some())
            .map(|id| Window { id, focused: true }))
    }

    async fn create(&self, spec: CreateWindow) -> Result<Window, HostError> {
        let mut state = self.lock();
        let id = state.alloc_id();
        let tab_id = state.alloc_id();
        let url = spec.url.unwrap_or_else(|| BLANK_TAB_URL.to_string());
        state.windows.push(WindowSnapshot {
            id,
            tabs: vec![TabSnapshot {
                id: tab_id,
                title: url.clone(),
                url,
                fav_icon_url: None,
                active: true,
            }],
        });
        if spec.focused || state.last_focused_window.is_none() {
            state.last_focused_window = Some(id);
        }
        Ok(Window {
            id,
            focused: state.last_focused_window == Some(id),
        })
    }

    async fn update(&self, window_id: WindowId, patch: WindowPatch) -> Result<Window, HostError> {
        let mut state = self.lock();
        if state.window_index(window_id).is_none() {
            return Err(HostError::WindowNotFound(window_id));
        }
        if patch.focused == Some(true) {
            state.last_focused_window = Some(window_id);
        }
        Ok(Window {
            id: window_id,
            focused: state.last_focused_window == Some(window_id),
        })
    }
}

#[async_trait]
impl ShortcutRegistry for MemoryBrowser {
    async fn commands(&self) -> Result<Vec<Shortcut>, HostError> {
        Ok(self.lock().shortcuts.clone())
    }
}
