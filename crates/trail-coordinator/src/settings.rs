//! Thin facade behind the settings form: persists preferences and nudges
//! the coordinator, never touching the stack directly.

use std::sync::Arc;
use tracing::{debug, info};
use trail_core::protocol::{Envelope, Message, ModeChangeNotice, Origin};
use trail_core::trackable::is_reload_eligible;
use trail_core::DisplayMode;
use trail_host::{MessageFabric, TabHost};
use trail_store::{StoreError, StorePair};

pub struct SettingsSurface {
    host: Arc<dyn TabHost>,
    fabric: MessageFabric,
    stores: StorePair,
}

impl SettingsSurface {
    pub fn new(host: Arc<dyn TabHost>, fabric: MessageFabric, stores: StorePair) -> Self {
        Self {
            host,
            fabric,
            stores,
        }
    }

    pub fn display_mode(&self) -> DisplayMode {
        self.stores.synced.display_mode()
    }

    /// Persists the clamped mode, then tells the coordinator. The store
    /// write is the source of truth; the notice is best-effort and a
    /// restarted coordinator picks the mode up from the store anyway.
    pub async fn set_display_mode(&self, count: usize) -> Result<DisplayMode, StoreError> {
        let mode = DisplayMode::new(count);
        self.stores.synced.save_display_mode(mode)?;
        let envelope = Envelope::new(
            Origin::Settings,
            Message::ModeChange(ModeChangeNotice {
                new_count: mode.tracked(),
            }),
        );
        if let Err(err) = self.fabric.notify_coordinator(envelope).await {
            debug!(event = "mode_notice_failed", error = %err);
        }
        Ok(mode)
    }

    pub fn diagnostics_enabled(&self) -> bool {
        self.stores.local.diagnostics_enabled()
    }

    pub fn set_diagnostics(&self, enabled: bool) -> Result<(), StoreError> {
        self.stores.local.set_diagnostics(enabled)
    }

    /// Reloads every open tab whose page is allowed to reload, which gets a
    /// fresh agent into pages opened before the extension was (re)installed.
    /// Returns how many reloads the host accepted.
    pub fn reload_eligible_tabs(&self) -> usize {
        let mut reloaded = 0;
        for snapshot in self.host.all_tabs() {
            if !is_reload_eligible(&snapshot.url) {
                continue;
            }
            match self.host.reload(snapshot.id) {
                Ok(()) => reloaded += 1,
                Err(err) => {
                    debug!(event = "tab_reload_failed", tab = %snapshot.id, error = %err);
                }
            }
        }
        info!(event = "eligible_tabs_reloaded", count = reloaded);
        reloaded
    }
}
