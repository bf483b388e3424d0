//! The host platform boundary: tab metadata, lifecycle events, and the
//! per-document surface agents render through.

use thiserror::Error;
use tokio::sync::{broadcast, watch};
use trail_core::{TabId, WindowId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("tab {0} does not exist")]
    TabGone(TabId),
    #[error("window {0} does not exist")]
    WindowGone(WindowId),
    #[error("document in tab {0} was replaced")]
    DocumentGone(TabId),
}

/// Tab lifecycle signals the coordinator consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabEvent {
    Activated(TabId),
    Removed(TabId),
    /// Navigation in the tab completed.
    Updated(TabId),
    /// `None` means focus left the browser entirely.
    WindowFocusChanged(Option<WindowId>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabSnapshot {
    pub id: TabId,
    pub window: WindowId,
    pub url: String,
    pub title: String,
    pub active: bool,
}

/// Queries and events over the host's tab/window model.
pub trait TabHost: Send + Sync {
    fn tab(&self, tab: TabId) -> Result<TabSnapshot, HostError>;
    fn active_tab(&self, window: WindowId) -> Option<TabSnapshot>;
    fn last_focused_window(&self) -> Option<WindowId>;
    fn all_tabs(&self) -> Vec<TabSnapshot>;
    fn reload(&self, tab: TabId) -> Result<(), HostError>;
    fn events(&self) -> broadcast::Receiver<TabEvent>;
}

/// One document's title and visibility, bound to a single document
/// lifetime: after the tab navigates, reads and writes through an old
/// handle fail and its watch channels close.
pub trait TabDocument: Send {
    fn title(&self) -> Result<String, HostError>;
    fn set_title(&self, title: &str) -> Result<(), HostError>;
    fn title_changes(&self) -> watch::Receiver<String>;
    fn visibility_changes(&self) -> watch::Receiver<bool>;
}
