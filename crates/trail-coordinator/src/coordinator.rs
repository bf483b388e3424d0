//! The single authoritative keeper of the recency stack.
//!
//! Every mutation runs the same sequence: validate, mutate the stack,
//! persist, broadcast. Broadcasts are fire-and-forget per recipient; a tab
//! with no listening agent is an expected outcome, corrected later by that
//! agent's own reconciliation query.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use trail_core::protocol::{
    Envelope, Message, Origin, PositionReply, PositionUpdate, ProtocolVersion,
};
use trail_core::stack::MruStack;
use trail_core::trackable::is_trackable;
use trail_core::{DisplayMode, TabId, WindowId};
use trail_host::{CoordinatorRequest, MessageFabric, TabEvent, TabHost};
use trail_store::StorePair;

#[derive(Debug, Clone, Default)]
pub struct CoordinatorConfig {
    /// When set, the full stack is re-broadcast on this cadence as a
    /// safety net for agents that missed earlier pushes.
    pub reassert_interval: Option<Duration>,
}

pub struct Coordinator {
    host: Arc<dyn TabHost>,
    fabric: MessageFabric,
    stores: StorePair,
    stack: MruStack,
    mode: DisplayMode,
    seq: u64,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(host: Arc<dyn TabHost>, fabric: MessageFabric, stores: StorePair) -> Self {
        Self::with_config(host, fabric, stores, CoordinatorConfig::default())
    }

    pub fn with_config(
        host: Arc<dyn TabHost>,
        fabric: MessageFabric,
        stores: StorePair,
        config: CoordinatorConfig,
    ) -> Self {
        let mode = stores.synced.display_mode();
        Self {
            host,
            fabric,
            stores,
            stack: MruStack::new(mode.tracked()),
            mode,
            seq: 0,
            config,
        }
    }

    pub fn stack(&self) -> &MruStack {
        &self.stack
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    /// 1-based position of a tab, 0 when it is not in the stack.
    pub fn position(&self, tab: TabId) -> usize {
        self.stack.position(tab)
    }

    /// Startup recovery. Adopts the persisted stack when any cleaned-up
    /// part of it is still valid; otherwise clears every open tab once and
    /// reseeds from the best currently active tab.
    pub async fn recover(&mut self) {
        self.mode = self.stores.synced.display_mode();
        let persisted = self.stores.local.load_stack();
        let mut valid = Vec::new();
        for tab in persisted {
            if valid.len() == self.mode.tracked() {
                break;
            }
            match self.host.tab(tab) {
                Ok(snapshot) if is_trackable(&snapshot.url) => valid.push(tab),
                _ => {}
            }
        }

        if !valid.is_empty() {
            let adopted = valid.len();
            self.stack = MruStack::from_entries(valid, self.mode.tracked());
            self.persist();
            self.broadcast_positions(&[]).await;
            info!(event = "recovery_adopted", entries = adopted, mode = %self.mode);
        } else {
            self.stack = MruStack::new(self.mode.tracked());
            self.clear_all_tabs().await;
            info!(event = "recovery_cleared", mode = %self.mode);
            if let Some(seed) = self.seed_tab() {
                self.on_tab_activated(seed).await;
            }
        }
    }

    pub async fn on_tab_activated(&mut self, tab: TabId) {
        let snapshot = match self.host.tab(tab) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                debug!(event = "activation_lookup_failed", tab = %tab, error = %err);
                return;
            }
        };
        if !is_trackable(&snapshot.url) {
            trace!(event = "activation_ignored", tab = %tab, url = %snapshot.url);
            return;
        }
        let evicted = self.stack.promote(tab);
        self.persist();
        self.broadcast_positions(&evicted).await;
    }

    /// Removal needs no location check: the tab is already gone. Members
    /// left in the stack get fresh positions; nobody gets a clear.
    pub async fn on_tab_removed(&mut self, tab: TabId) {
        if !self.stack.evict(tab) {
            return;
        }
        self.persist();
        self.broadcast_positions(&[]).await;
    }

    /// Navigation counts as an activation only for the tab currently
    /// active in its window; background navigation must not reorder.
    pub async fn on_tab_updated(&mut self, tab: TabId) {
        let Ok(snapshot) = self.host.tab(tab) else {
            return;
        };
        if !snapshot.active {
            return;
        }
        self.on_tab_activated(tab).await;
    }

    /// Focus promotes the window's active tab, then re-broadcasts the full
    /// stack so agents the platform had suspended catch back up.
    pub async fn on_window_focus_changed(&mut self, window: Option<WindowId>) {
        let Some(window) = window else {
            return;
        };
        if let Some(snapshot) = self.host.active_tab(window) {
            self.on_tab_activated(snapshot.id).await;
        }
        self.broadcast_positions(&[]).await;
    }

    pub async fn on_mode_change(&mut self, new_count: usize) {
        let mode = DisplayMode::new(new_count);
        if mode == self.mode {
            return;
        }
        info!(event = "mode_changed", from = %self.mode, to = %mode);
        self.mode = mode;
        let truncated = self.stack.set_capacity(mode.tracked());
        self.persist();
        self.broadcast_positions(&truncated).await;
    }

    async fn handle_event(&mut self, event: TabEvent) {
        match event {
            TabEvent::Activated(tab) => self.on_tab_activated(tab).await,
            TabEvent::Removed(tab) => self.on_tab_removed(tab).await,
            TabEvent::Updated(tab) => self.on_tab_updated(tab).await,
            TabEvent::WindowFocusChanged(window) => self.on_window_focus_changed(window).await,
        }
    }

    async fn handle_request(&mut self, request: CoordinatorRequest) {
        match request {
            CoordinatorRequest::Query { envelope, reply } => {
                if envelope.version != ProtocolVersion::CURRENT {
                    debug!(event = "foreign_version_ignored", version = envelope.version.0);
                    let _ = reply.send(failed_reply());
                    return;
                }
                match envelope.msg {
                    Message::PositionQuery(query) => {
                        let _ = reply.send(PositionReply {
                            success: true,
                            position: self.stack.position(query.tab),
                            stack_snapshot: self.stack.entries().to_vec(),
                        });
                    }
                    other => {
                        debug!(event = "unexpected_query", message = ?other);
                        let _ = reply.send(failed_reply());
                    }
                }
            }
            CoordinatorRequest::Notice { envelope } => {
                if envelope.version != ProtocolVersion::CURRENT {
                    debug!(event = "foreign_version_ignored", version = envelope.version.0);
                    return;
                }
                match envelope.msg {
                    Message::ModeChange(notice) => self.on_mode_change(notice.new_count).await,
                    other => debug!(event = "unexpected_notice", message = ?other),
                }
            }
        }
    }

    async fn broadcast_positions(&mut self, fallen_off: &[TabId]) {
        let snapshot = self.stack.entries().to_vec();
        let seq = self.next_seq();
        for (idx, tab) in snapshot.iter().enumerate() {
            self.push_position(*tab, idx + 1, &snapshot, seq).await;
        }
        for tab in fallen_off {
            self.push_position(*tab, 0, &snapshot, seq).await;
        }
    }

    async fn clear_all_tabs(&mut self) {
        let seq = self.next_seq();
        for snapshot in self.host.all_tabs() {
            self.push_position(snapshot.id, 0, &[], seq).await;
        }
    }

    async fn push_position(&self, tab: TabId, position: usize, snapshot: &[TabId], seq: u64) {
        let envelope = Envelope::new(
            Origin::Coordinator,
            Message::PositionUpdate(PositionUpdate {
                position,
                stack_snapshot: snapshot.to_vec(),
                seq,
            }),
        );
        if let Err(err) = self.fabric.send_to_tab(tab, envelope).await {
            debug!(event = "position_delivery_failed", tab = %tab, position, error = %err);
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn persist(&self) {
        if let Err(err) = self.stores.local.save_stack(self.stack.entries()) {
            warn!(event = "stack_persist_failed", error = %err);
        }
    }

    fn seed_tab(&self) -> Option<TabId> {
        if let Some(window) = self.host.last_focused_window() {
            if let Some(snapshot) = self.host.active_tab(window) {
                if is_trackable(&snapshot.url) {
                    return Some(snapshot.id);
                }
            }
        }
        self.host
            .all_tabs()
            .into_iter()
            .find(|snapshot| snapshot.active && is_trackable(&snapshot.url))
            .map(|snapshot| snapshot.id)
    }

    /// Drives the coordinator until shutdown. Host events and inbox
    /// requests are handled strictly one at a time, so each event's
    /// mutate-persist-broadcast sequence finishes before the next begins.
    pub async fn run(
        mut self,
        mut events: broadcast::Receiver<TabEvent>,
        mut inbox: mpsc::Receiver<CoordinatorRequest>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let reassert_enabled = self.config.reassert_interval.is_some();
        let mut reassert = tokio::time::interval(
            self.config
                .reassert_interval
                .unwrap_or(Duration::from_secs(3600)),
        );
        reassert.tick().await;

        info!(event = "coordinator_started", mode = %self.mode);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = events.recv() => {
                    match event {
                        Ok(event) => self.handle_event(event).await,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(event = "host_events_lagged", skipped);
                            self.broadcast_positions(&[]).await;
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                request = inbox.recv() => {
                    match request {
                        Some(request) => self.handle_request(request).await,
                        None => break,
                    }
                }
                _ = reassert.tick(), if reassert_enabled => {
                    debug!(event = "periodic_reassert");
                    self.broadcast_positions(&[]).await;
                }
            }
        }
        info!(event = "coordinator_stopped");
    }

    /// Registers the inbox, subscribes to host events, runs recovery, and
    /// spawns the event loop. Subscribing before recovery means events
    /// racing the recovery pass queue up instead of getting lost.
    pub async fn spawn(mut self) -> CoordinatorHandle {
        let inbox = self.fabric.register_coordinator().await;
        let events = self.host.events();
        self.recover().await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(events, inbox, shutdown_rx));
        CoordinatorHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}

fn failed_reply() -> PositionReply {
    PositionReply {
        success: false,
        position: 0,
        stack_snapshot: Vec::new(),
    }
}

pub struct CoordinatorHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl CoordinatorHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}
