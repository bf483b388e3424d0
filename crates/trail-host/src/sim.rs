//! Simulated browser host used by the demo binary and the test suites.
//!
//! Faithful to the corners the rest of the system depends on: opening a
//! foreground tab activates it, closing the active tab activates its most
//! recently opened sibling, and navigation replaces the document so watch
//! channels from the old document close.

use crate::tabs::{HostError, TabDocument, TabEvent, TabHost, TabSnapshot};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{broadcast, watch};
use trail_core::{TabId, WindowId};

const EVENT_CHANNEL_CAPACITY: usize = 256;

struct SimTab {
    window: WindowId,
    url: String,
    active: bool,
    generation: u64,
    opened: u64,
    title: watch::Sender<String>,
    visible: watch::Sender<bool>,
}

struct SimState {
    tabs: HashMap<TabId, SimTab>,
    windows: Vec<WindowId>,
    focused: Option<WindowId>,
    last_focused: Option<WindowId>,
    next_tab: u32,
    next_window: u32,
    next_open: u64,
    reloaded: Vec<TabId>,
}

struct SimInner {
    state: RwLock<SimState>,
    events: broadcast::Sender<TabEvent>,
}

impl SimInner {
    fn read_state(&self) -> RwLockReadGuard<'_, SimState> {
        match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, SimState> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[derive(Clone)]
pub struct SimHost {
    inner: Arc<SimInner>,
}

impl SimHost {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SimInner {
                state: RwLock::new(SimState {
                    tabs: HashMap::new(),
                    windows: Vec::new(),
                    focused: None,
                    last_focused: None,
                    next_tab: 1,
                    next_window: 1,
                    next_open: 0,
                    reloaded: Vec::new(),
                }),
                events,
            }),
        }
    }

    fn emit(&self, event: TabEvent) {
        let _ = self.inner.events.send(event);
    }

    pub fn open_window(&self) -> WindowId {
        let window = {
            let mut state = self.inner.write_state();
            let window = WindowId(state.next_window);
            state.next_window += 1;
            state.windows.push(window);
            state.focused = Some(window);
            state.last_focused = Some(window);
            window
        };
        self.emit(TabEvent::WindowFocusChanged(Some(window)));
        window
    }

    /// Opens a tab in the foreground: it becomes the window's active tab.
    pub fn open_tab(&self, window: WindowId, url: &str, title: &str) -> Result<TabId, HostError> {
        let tab = self.insert_tab(window, url, title, true)?;
        self.emit(TabEvent::Activated(tab));
        Ok(tab)
    }

    pub fn open_background_tab(
        &self,
        window: WindowId,
        url: &str,
        title: &str,
    ) -> Result<TabId, HostError> {
        self.insert_tab(window, url, title, false)
    }

    fn insert_tab(
        &self,
        window: WindowId,
        url: &str,
        title: &str,
        active: bool,
    ) -> Result<TabId, HostError> {
        let mut state = self.inner.write_state();
        if !state.windows.contains(&window) {
            return Err(HostError::WindowGone(window));
        }
        if active {
            deactivate_window(&mut state, window);
        }
        let id = TabId(state.next_tab);
        state.next_tab += 1;
        let opened = state.next_open;
        state.next_open += 1;
        let (title_tx, _) = watch::channel(title.to_string());
        let (visible_tx, _) = watch::channel(active);
        state.tabs.insert(
            id,
            SimTab {
                window,
                url: url.to_string(),
                active,
                generation: 0,
                opened,
                title: title_tx,
                visible: visible_tx,
            },
        );
        Ok(id)
    }

    pub fn activate(&self, tab: TabId) -> Result<(), HostError> {
        {
            let mut state = self.inner.write_state();
            let entry = state.tabs.get(&tab).ok_or(HostError::TabGone(tab))?;
            if entry.active {
                return Ok(());
            }
            let window = entry.window;
            deactivate_window(&mut state, window);
            let entry = state.tabs.get_mut(&tab).ok_or(HostError::TabGone(tab))?;
            entry.active = true;
            entry.visible.send_replace(true);
        }
        self.emit(TabEvent::Activated(tab));
        Ok(())
    }

    pub fn close(&self, tab: TabId) -> Result<(), HostError> {
        let (successor, focus_shift) = {
            let mut state = self.inner.write_state();
            let removed = state.tabs.remove(&tab).ok_or(HostError::TabGone(tab))?;
            let window = removed.window;

            let mut successor = None;
            if removed.active {
                successor = state
                    .tabs
                    .iter()
                    .filter(|(_, t)| t.window == window)
                    .max_by_key(|(_, t)| t.opened)
                    .map(|(id, _)| *id);
                if let Some(id) = successor {
                    if let Some(entry) = state.tabs.get_mut(&id) {
                        entry.active = true;
                        entry.visible.send_replace(true);
                    }
                }
            }

            let mut focus_shift = None;
            let window_empty = !state.tabs.values().any(|t| t.window == window);
            if window_empty {
                state.windows.retain(|w| *w != window);
                if state.focused == Some(window) {
                    let next = state.windows.last().copied();
                    state.focused = next;
                    focus_shift = Some(next);
                }
                if state.last_focused == Some(window) {
                    state.last_focused = state.windows.last().copied();
                }
            }
            (successor, focus_shift)
        };
        self.emit(TabEvent::Removed(tab));
        if let Some(id) = successor {
            self.emit(TabEvent::Activated(id));
        }
        if let Some(next) = focus_shift {
            self.emit(TabEvent::WindowFocusChanged(next));
        }
        Ok(())
    }

    /// Completes a navigation: the tab keeps its id but the document is
    /// replaced, so existing document handles and watches go stale.
    pub fn navigate(&self, tab: TabId, url: &str, title: &str) -> Result<(), HostError> {
        {
            let mut state = self.inner.write_state();
            let entry = state.tabs.get_mut(&tab).ok_or(HostError::TabGone(tab))?;
            entry.url = url.to_string();
            entry.generation += 1;
            let active = entry.active;
            entry.title = watch::channel(title.to_string()).0;
            entry.visible = watch::channel(active).0;
        }
        self.emit(TabEvent::Updated(tab));
        Ok(())
    }

    pub fn focus_window(&self, window: WindowId) -> Result<(), HostError> {
        {
            let mut state = self.inner.write_state();
            if !state.windows.contains(&window) {
                return Err(HostError::WindowGone(window));
            }
            state.focused = Some(window);
            state.last_focused = Some(window);
        }
        self.emit(TabEvent::WindowFocusChanged(Some(window)));
        Ok(())
    }

    pub fn blur_all_windows(&self) {
        self.inner.write_state().focused = None;
        self.emit(TabEvent::WindowFocusChanged(None));
    }

    /// A page script rewriting its own title, bypassing any agent.
    pub fn write_title(&self, tab: TabId, title: &str) -> Result<(), HostError> {
        let state = self.inner.read_state();
        let entry = state.tabs.get(&tab).ok_or(HostError::TabGone(tab))?;
        entry.title.send_replace(title.to_string());
        Ok(())
    }

    pub fn title(&self, tab: TabId) -> Result<String, HostError> {
        let state = self.inner.read_state();
        let entry = state.tabs.get(&tab).ok_or(HostError::TabGone(tab))?;
        let title = entry.title.borrow().clone();
        Ok(title)
    }

    /// Handle onto the tab's current document.
    pub fn document(&self, tab: TabId) -> Result<SimDocument, HostError> {
        let state = self.inner.read_state();
        let entry = state.tabs.get(&tab).ok_or(HostError::TabGone(tab))?;
        Ok(SimDocument {
            inner: self.inner.clone(),
            tab,
            generation: entry.generation,
        })
    }

    pub fn reloaded_tabs(&self) -> Vec<TabId> {
        self.inner.read_state().reloaded.clone()
    }
}

impl Default for SimHost {
    fn default() -> Self {
        Self::new()
    }
}

fn deactivate_window(state: &mut SimState, window: WindowId) {
    for tab in state.tabs.values_mut() {
        if tab.window == window && tab.active {
            tab.active = false;
            tab.visible.send_replace(false);
        }
    }
}

fn snapshot_of(id: TabId, tab: &SimTab) -> TabSnapshot {
    TabSnapshot {
        id,
        window: tab.window,
        url: tab.url.clone(),
        title: tab.title.borrow().clone(),
        active: tab.active,
    }
}

impl TabHost for SimHost {
    fn tab(&self, tab: TabId) -> Result<TabSnapshot, HostError> {
        let state = self.inner.read_state();
        let entry = state.tabs.get(&tab).ok_or(HostError::TabGone(tab))?;
        Ok(snapshot_of(tab, entry))
    }

    fn active_tab(&self, window: WindowId) -> Option<TabSnapshot> {
        let state = self.inner.read_state();
        state
            .tabs
            .iter()
            .find(|(_, t)| t.window == window && t.active)
            .map(|(id, t)| snapshot_of(*id, t))
    }

    fn last_focused_window(&self) -> Option<WindowId> {
        let state = self.inner.read_state();
        state.last_focused.filter(|w| state.windows.contains(w))
    }

    fn all_tabs(&self) -> Vec<TabSnapshot> {
        let state = self.inner.read_state();
        let mut tabs: Vec<(u64, TabSnapshot)> = state
            .tabs
            .iter()
            .map(|(id, t)| (t.opened, snapshot_of(*id, t)))
            .collect();
        tabs.sort_by_key(|(opened, _)| *opened);
        tabs.into_iter().map(|(_, snapshot)| snapshot).collect()
    }

    fn reload(&self, tab: TabId) -> Result<(), HostError> {
        {
            let mut state = self.inner.write_state();
            let entry = state.tabs.get_mut(&tab).ok_or(HostError::TabGone(tab))?;
            entry.generation += 1;
            let title = entry.title.borrow().clone();
            let active = entry.active;
            entry.title = watch::channel(title).0;
            entry.visible = watch::channel(active).0;
            state.reloaded.push(tab);
        }
        self.emit(TabEvent::Updated(tab));
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<TabEvent> {
        self.inner.events.subscribe()
    }
}

pub struct SimDocument {
    inner: Arc<SimInner>,
    tab: TabId,
    generation: u64,
}

impl SimDocument {
    fn with_live_document<T>(&self, read: impl FnOnce(&SimTab) -> T) -> Result<T, HostError> {
        let state = self.inner.read_state();
        let entry = state
            .tabs
            .get(&self.tab)
            .ok_or(HostError::TabGone(self.tab))?;
        if entry.generation != self.generation {
            return Err(HostError::DocumentGone(self.tab));
        }
        Ok(read(entry))
    }
}

fn closed_watch<T>(initial: T) -> watch::Receiver<T> {
    let (tx, rx) = watch::channel(initial);
    drop(tx);
    rx
}

impl TabDocument for SimDocument {
    fn title(&self) -> Result<String, HostError> {
        self.with_live_document(|tab| tab.title.borrow().clone())
    }

    fn set_title(&self, title: &str) -> Result<(), HostError> {
        self.with_live_document(|tab| {
            tab.title.send_replace(title.to_string());
        })
    }

    fn title_changes(&self) -> watch::Receiver<String> {
        self.with_live_document(|tab| tab.title.subscribe())
            .unwrap_or_else(|_| closed_watch(String::new()))
    }

    fn visibility_changes(&self) -> watch::Receiver<bool> {
        self.with_live_document(|tab| tab.visible.subscribe())
            .unwrap_or_else(|_| closed_watch(false))
    }
}
