//! Typed accessors over the raw key-value scopes.

use crate::{KvStore, MemoryStore, StoreChange, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use trail_core::{DisplayMode, TabId};

pub const STACK_KEY: &str = "mru_stack";
pub const DIAGNOSTICS_KEY: &str = "diagnostics_enabled";
pub const DISPLAY_MODE_KEY: &str = "display_mode";

/// Bumped when the persisted stack layout changes; stale records are
/// discarded on load so recovery starts from a clean slate.
pub const STACK_RECORD_VERSION: u16 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StackRecord {
    version: u16,
    entries: Vec<TabId>,
}

/// Process-local scope: runtime state that only needs to survive restarts
/// of this installation.
#[derive(Clone)]
pub struct LocalState {
    store: Arc<dyn KvStore>,
}

impl LocalState {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Persisted stack entries, most recent first. Read failures, decode
    /// failures, and record-version mismatches all read as empty.
    pub fn load_stack(&self) -> Vec<TabId> {
        let value = match self.store.get(STACK_KEY) {
            Ok(Some(value)) => value,
            Ok(None) => return Vec::new(),
            Err(err) => {
                warn!(event = "stack_load_failed", error = %err);
                return Vec::new();
            }
        };
        match serde_json::from_value::<StackRecord>(value) {
            Ok(record) if record.version == STACK_RECORD_VERSION => record.entries,
            Ok(record) => {
                debug!(event = "stack_record_version_skipped", found = record.version);
                Vec::new()
            }
            Err(err) => {
                warn!(event = "stack_decode_failed", error = %err);
                Vec::new()
            }
        }
    }

    pub fn save_stack(&self, entries: &[TabId]) -> Result<(), StoreError> {
        let record = StackRecord {
            version: STACK_RECORD_VERSION,
            entries: entries.to_vec(),
        };
        let value = serde_json::to_value(&record)
            .map_err(|err| StoreError::Serialization(err.to_string()))?;
        self.store.set(STACK_KEY, &value)
    }

    pub fn diagnostics_enabled(&self) -> bool {
        match self.store.get(DIAGNOSTICS_KEY) {
            Ok(Some(value)) => value.as_bool().unwrap_or(false),
            Ok(None) => false,
            Err(err) => {
                debug!(event = "diagnostics_read_failed", error = %err);
                false
            }
        }
    }

    pub fn set_diagnostics(&self, enabled: bool) -> Result<(), StoreError> {
        self.store.set(DIAGNOSTICS_KEY, &Value::Bool(enabled))
    }
}

/// Replicated scope: user preferences shared across installations.
#[derive(Clone)]
pub struct SyncedSettings {
    store: Arc<dyn KvStore>,
}

impl SyncedSettings {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Current display mode, defaulting to a single marker when the value
    /// is missing or unreadable.
    pub fn display_mode(&self) -> DisplayMode {
        match self.store.get(DISPLAY_MODE_KEY) {
            Ok(Some(value)) => value
                .as_u64()
                .map(|count| DisplayMode::new(count as usize))
                .unwrap_or_default(),
            Ok(None) => DisplayMode::default(),
            Err(err) => {
                debug!(event = "display_mode_read_failed", error = %err);
                DisplayMode::default()
            }
        }
    }

    pub fn save_display_mode(&self, mode: DisplayMode) -> Result<(), StoreError> {
        self.store
            .set(DISPLAY_MODE_KEY, &Value::from(mode.tracked() as u64))
    }

    pub fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.store.changes()
    }
}

/// Both persistence scopes, bundled for components that need them together.
#[derive(Clone)]
pub struct StorePair {
    pub local: LocalState,
    pub synced: SyncedSettings,
}

impl StorePair {
    pub fn new(local: Arc<dyn KvStore>, synced: Arc<dyn KvStore>) -> Self {
        Self {
            local: LocalState::new(local),
            synced: SyncedSettings::new(synced),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn local_over_memory() -> (Arc<MemoryStore>, LocalState) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), LocalState::new(store))
    }

    #[test]
    fn stack_record_round_trips() {
        let (_, local) = local_over_memory();
        assert!(local.load_stack().is_empty());

        local
            .save_stack(&[TabId(9), TabId(4), TabId(7)])
            .expect("save stack");
        assert_eq!(local.load_stack(), vec![TabId(9), TabId(4), TabId(7)]);
    }

    #[test]
    fn stack_record_with_foreign_version_reads_as_empty() {
        let (store, local) = local_over_memory();
        store
            .set(STACK_KEY, &json!({"version": 99, "entries": [1, 2]}))
            .expect("seed record");
        assert!(local.load_stack().is_empty());
    }

    #[test]
    fn malformed_stack_record_reads_as_empty() {
        let (store, local) = local_over_memory();
        store
            .set(STACK_KEY, &json!("not a record"))
            .expect("seed record");
        assert!(local.load_stack().is_empty());
    }

    #[test]
    fn diagnostics_flag_defaults_to_off() {
        let (store, local) = local_over_memory();
        assert!(!local.diagnostics_enabled());

        local.set_diagnostics(true).expect("enable");
        assert!(local.diagnostics_enabled());

        store
            .set(DIAGNOSTICS_KEY, &json!("garbage"))
            .expect("corrupt flag");
        assert!(!local.diagnostics_enabled());
    }

    #[test]
    fn display_mode_defaults_and_clamps() {
        let store = Arc::new(MemoryStore::new());
        let synced = SyncedSettings::new(store.clone());

        assert_eq!(synced.display_mode(), DisplayMode::SINGLE);

        synced
            .save_display_mode(DisplayMode::new(4))
            .expect("save mode");
        assert_eq!(synced.display_mode(), DisplayMode::new(4));

        store.set(DISPLAY_MODE_KEY, &json!(99)).expect("oversized");
        assert_eq!(synced.display_mode(), DisplayMode::new(4));

        store.set(DISPLAY_MODE_KEY, &json!("words")).expect("corrupt");
        assert_eq!(synced.display_mode(), DisplayMode::SINGLE);
    }

    #[test]
    fn mode_writes_reach_subscribers() {
        let synced = SyncedSettings::new(Arc::new(MemoryStore::new()));
        let mut changes = synced.changes();

        synced
            .save_display_mode(DisplayMode::new(2))
            .expect("save mode");

        let change = changes.try_recv().expect("change event");
        assert_eq!(change.key, DISPLAY_MODE_KEY);
        assert_eq!(change.value, Some(json!(2)));
    }
}
