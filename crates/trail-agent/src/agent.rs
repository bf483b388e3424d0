//! The per-tab marker state machine and its event loop.
//!
//! An agent trusts the live title over anything it remembers: every marker
//! write rebuilds from what the document currently shows, so page scripts
//! that rewrite the title are tolerated instead of clobbered.

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use trail_core::marker;
use trail_core::protocol::{Envelope, Message, ProtocolVersion};
use trail_core::{DisplayMode, TabId};
use trail_host::{MessageFabric, TabDocument};
use trail_store::state::DISPLAY_MODE_KEY;
use trail_store::SyncedSettings;

/// One-way liveness of an agent's messaging channel. `Dead` is terminal;
/// only a page reload brings a new agent back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    ShuttingDown,
    Dead,
}

pub struct TabAgent {
    tab: TabId,
    doc: Box<dyn TabDocument>,
    fabric: MessageFabric,
    settings: SyncedSettings,
    mode: DisplayMode,
    original_title: String,
    applied: usize,
    lifecycle: Lifecycle,
}

impl TabAgent {
    pub fn new(
        tab: TabId,
        doc: Box<dyn TabDocument>,
        fabric: MessageFabric,
        settings: SyncedSettings,
    ) -> Self {
        let mode = settings.display_mode();
        Self {
            tab,
            doc,
            fabric,
            settings,
            mode,
            original_title: String::new(),
            applied: 0,
            lifecycle: Lifecycle::Active,
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Currently rendered position, 0 when no marker is shown.
    pub fn applied_position(&self) -> usize {
        self.applied
    }

    /// Connects the tab's port and runs the agent as its own task.
    pub async fn spawn(
        tab: TabId,
        doc: Box<dyn TabDocument>,
        fabric: MessageFabric,
        settings: SyncedSettings,
    ) -> AgentHandle {
        let inbox = fabric.connect_tab(tab).await;
        let agent = Self::new(tab, doc, fabric, settings);
        let join = tokio::spawn(agent.run(inbox));
        AgentHandle { tab, join }
    }

    pub async fn run(mut self, mut inbox: mpsc::Receiver<Envelope>) {
        let mut titles = self.doc.title_changes();
        let mut visibility = self.doc.visibility_changes();
        let mut store_changes = self.settings.changes();
        let mut store_watch_alive = true;

        if *visibility.borrow() {
            self.self_heal().await;
        }

        loop {
            if self.lifecycle == Lifecycle::Dead {
                break;
            }
            tokio::select! {
                envelope = inbox.recv() => {
                    match envelope {
                        Some(envelope) => self.handle_envelope(envelope),
                        None => {
                            // Port torn down. Distinguish a replaced port
                            // from a dead runtime before giving up the title.
                            if self.fabric.runtime_id().await.is_none() {
                                self.terminate();
                            }
                            break;
                        }
                    }
                }
                changed = titles.changed() => {
                    match changed {
                        Ok(()) => {
                            let observed = titles.borrow_and_update().clone();
                            self.on_title_changed(&observed);
                        }
                        // Document unloaded; the next document gets its own agent.
                        Err(_) => break,
                    }
                }
                changed = visibility.changed() => {
                    match changed {
                        Ok(()) => {
                            let visible = *visibility.borrow_and_update();
                            if visible {
                                self.self_heal().await;
                            }
                        }
                        Err(_) => break,
                    }
                }
                change = store_changes.recv(), if store_watch_alive => {
                    match change {
                        Ok(change) if change.key == DISPLAY_MODE_KEY => self.refresh_mode(),
                        Ok(_) => {}
                        Err(RecvError::Lagged(_)) => self.refresh_mode(),
                        Err(RecvError::Closed) => store_watch_alive = false,
                    }
                }
            }
        }
        debug!(event = "agent_loop_exited", tab = %self.tab, lifecycle = ?self.lifecycle);
    }

    pub fn handle_envelope(&mut self, envelope: Envelope) {
        if self.lifecycle != Lifecycle::Active {
            return;
        }
        if envelope.version != ProtocolVersion::CURRENT {
            debug!(event = "foreign_version_ignored", tab = %self.tab, version = envelope.version.0);
            return;
        }
        match envelope.msg {
            Message::PositionUpdate(update) => {
                trace!(event = "position_update", tab = %self.tab, position = update.position, seq = update.seq);
                self.apply_position(update.position);
            }
            other => debug!(event = "unexpected_message", tab = %self.tab, message = ?other),
        }
    }

    /// Renders `position` (0 clears), filtered through the display mode.
    /// Receiving the already-applied position is not a short-circuit: the
    /// marker is rebuilt and only the final write is skipped when the title
    /// already reads correctly.
    pub fn apply_position(&mut self, position: usize) {
        if self.lifecycle != Lifecycle::Active {
            return;
        }
        let target = if self.mode.shows(position) { position } else { 0 };
        let current = match self.doc.title() {
            Ok(title) => title,
            Err(err) => {
                debug!(event = "title_read_failed", tab = %self.tab, error = %err);
                return;
            }
        };
        let original = self.recover_original(&current);

        if target == 0 {
            if current != original {
                if let Err(err) = self.doc.set_title(&original) {
                    debug!(event = "title_write_failed", tab = %self.tab, error = %err);
                    return;
                }
            }
            self.original_title = original;
            self.applied = 0;
            return;
        }

        let Some(desired) = marker::apply(&original, target) else {
            return;
        };
        if current != desired {
            if let Err(err) = self.doc.set_title(&desired) {
                debug!(event = "title_write_failed", tab = %self.tab, error = %err);
                return;
            }
        }
        self.original_title = original;
        self.applied = target;
    }

    /// Title observer: while marked, a title that no longer starts with our
    /// prefix means the page rewrote it. Adopt the rewrite as the new
    /// original and re-apply. Correctly marked titles are left untouched.
    pub fn on_title_changed(&mut self, observed: &str) {
        if self.lifecycle != Lifecycle::Active || self.applied == 0 {
            return;
        }
        let intact = marker::prefix(self.applied)
            .map(|p| observed.starts_with(&p))
            .unwrap_or(false);
        if intact {
            return;
        }
        debug!(event = "external_title_change", tab = %self.tab);
        self.apply_position(self.applied);
    }

    /// Asks the coordinator for the authoritative position and converges on
    /// the answer. Skipped once the channel is known dead; a failed query
    /// re-probes the runtime so a torn-down extension is detected here too.
    pub async fn self_heal(&mut self) {
        if self.lifecycle != Lifecycle::Active {
            return;
        }
        if self.fabric.runtime_id().await.is_none() {
            self.terminate();
            return;
        }
        match self.fabric.query_position(self.tab).await {
            Ok(reply) if reply.success => {
                if reply.position != self.applied {
                    debug!(
                        event = "position_reconciled",
                        tab = %self.tab,
                        from = self.applied,
                        to = reply.position
                    );
                }
                self.apply_position(reply.position);
            }
            Ok(_) => debug!(event = "position_query_refused", tab = %self.tab),
            Err(err) => {
                debug!(event = "position_query_failed", tab = %self.tab, error = %err);
                if self.fabric.runtime_id().await.is_none() {
                    self.terminate();
                }
            }
        }
    }

    fn refresh_mode(&mut self) {
        if self.lifecycle != Lifecycle::Active {
            return;
        }
        let mode = self.settings.display_mode();
        if mode == self.mode {
            return;
        }
        debug!(event = "mode_refreshed", tab = %self.tab, mode = %mode);
        self.mode = mode;
        self.apply_position(self.applied);
    }

    /// One-way shutdown: restore the title if we hold a marker, then go
    /// permanently quiet.
    fn terminate(&mut self) {
        if self.lifecycle != Lifecycle::Active {
            return;
        }
        self.lifecycle = Lifecycle::ShuttingDown;
        debug!(event = "agent_shutting_down", tab = %self.tab);
        if self.applied != 0 {
            if let Ok(current) = self.doc.title() {
                let original = self.recover_original(&current);
                if current != original {
                    if let Err(err) = self.doc.set_title(&original) {
                        debug!(event = "title_restore_failed", tab = %self.tab, error = %err);
                    }
                }
            }
            self.applied = 0;
        }
        self.lifecycle = Lifecycle::Dead;
    }

    /// Marker-free title to build on. Strips the applied prefix off the live
    /// title when it is still there; otherwise the page rewrote the title,
    /// and any marker-looking prefix on it is residue, not content.
    fn recover_original(&self, current: &str) -> String {
        if self.applied != 0 {
            if let Some(rest) = marker::prefix(self.applied).and_then(|p| current.strip_prefix(&p).map(str::to_string)) {
                return rest;
            }
        }
        marker::strip(current).to_string()
    }
}

pub struct AgentHandle {
    tab: TabId,
    join: JoinHandle<()>,
}

impl AgentHandle {
    pub fn tab(&self) -> TabId {
        self.tab
    }

    pub async fn join(self) {
        let _ = self.join.await;
    }
}
