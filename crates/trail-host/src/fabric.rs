//! In-process messaging between the coordinator context and tab agents.
//!
//! Delivery is fire-and-forget: sends either land in the recipient's inbox
//! or fail fast with a typed outcome. The fabric also carries the runtime
//! generation id agents probe to tell a transient failure from a torn-down
//! runtime.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::debug;
use trail_core::protocol::{Envelope, Message, Origin, PositionQuery, PositionReply};
use trail_core::TabId;
use uuid::Uuid;

const AGENT_PORT_CAPACITY: usize = 32;
const COORDINATOR_INBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("no agent listening in tab {0}")]
    NoReceiver(TabId),
    #[error("agent channel for tab {0} is closed")]
    ChannelClosed(TabId),
    #[error("agent channel for tab {0} is full")]
    ChannelFull(TabId),
    #[error("coordinator is not reachable")]
    CoordinatorUnavailable,
    #[error("messaging runtime is gone")]
    RuntimeGone,
}

/// Inbound traffic for the coordinator: queries carry a reply channel,
/// notices do not.
#[derive(Debug)]
pub enum CoordinatorRequest {
    Query {
        envelope: Envelope,
        reply: oneshot::Sender<PositionReply>,
    },
    Notice {
        envelope: Envelope,
    },
}

#[derive(Clone)]
pub struct MessageFabric {
    inner: Arc<FabricInner>,
}

struct FabricInner {
    runtime_id: RwLock<Option<Uuid>>,
    ports: RwLock<HashMap<TabId, mpsc::Sender<Envelope>>>,
    coordinator: RwLock<Option<mpsc::Sender<CoordinatorRequest>>>,
}

impl MessageFabric {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FabricInner {
                runtime_id: RwLock::new(Some(Uuid::new_v4())),
                ports: RwLock::new(HashMap::new()),
                coordinator: RwLock::new(None),
            }),
        }
    }

    /// The current runtime generation, `None` once the runtime was torn
    /// down. Agents probe this to detect a permanently dead channel.
    pub async fn runtime_id(&self) -> Option<Uuid> {
        *self.inner.runtime_id.read().await
    }

    /// Tears the runtime down: the identity probe starts returning `None`
    /// and every port closes, which agents observe as channel death.
    pub async fn invalidate(&self) {
        *self.inner.runtime_id.write().await = None;
        *self.inner.coordinator.write().await = None;
        self.inner.ports.write().await.clear();
        debug!(event = "fabric_invalidated");
    }

    /// Installs the coordinator inbox, replacing any previous one.
    pub async fn register_coordinator(&self) -> mpsc::Receiver<CoordinatorRequest> {
        let (tx, rx) = mpsc::channel(COORDINATOR_INBOX_CAPACITY);
        *self.inner.coordinator.write().await = Some(tx);
        rx
    }

    /// Opens this tab's port, replacing any previous one.
    pub async fn connect_tab(&self, tab: TabId) -> mpsc::Receiver<Envelope> {
        let (tx, rx) = mpsc::channel(AGENT_PORT_CAPACITY);
        self.inner.ports.write().await.insert(tab, tx);
        rx
    }

    pub async fn disconnect_tab(&self, tab: TabId) {
        self.inner.ports.write().await.remove(&tab);
    }

    pub async fn send_to_tab(&self, tab: TabId, envelope: Envelope) -> Result<(), DeliveryError> {
        if self.runtime_id().await.is_none() {
            return Err(DeliveryError::RuntimeGone);
        }
        let sender = { self.inner.ports.read().await.get(&tab).cloned() };
        let Some(sender) = sender else {
            return Err(DeliveryError::NoReceiver(tab));
        };
        match sender.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => {
                let mut ports = self.inner.ports.write().await;
                if ports
                    .get(&tab)
                    .map(|current| current.same_channel(&sender))
                    .unwrap_or(false)
                {
                    ports.remove(&tab);
                    debug!(event = "stale_port_pruned", tab = %tab);
                }
                Err(DeliveryError::ChannelClosed(tab))
            }
            Err(TrySendError::Full(_)) => Err(DeliveryError::ChannelFull(tab)),
        }
    }

    /// Agent-side authoritative position check, correlated over a oneshot.
    pub async fn query_position(&self, tab: TabId) -> Result<PositionReply, DeliveryError> {
        if self.runtime_id().await.is_none() {
            return Err(DeliveryError::RuntimeGone);
        }
        let sender = { self.inner.coordinator.read().await.clone() };
        let Some(sender) = sender else {
            return Err(DeliveryError::CoordinatorUnavailable);
        };
        let envelope = Envelope::new(
            Origin::Agent(tab),
            Message::PositionQuery(PositionQuery { tab }),
        );
        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .try_send(CoordinatorRequest::Query {
                envelope,
                reply: reply_tx,
            })
            .map_err(|_| DeliveryError::CoordinatorUnavailable)?;
        reply_rx
            .await
            .map_err(|_| DeliveryError::CoordinatorUnavailable)
    }

    /// One-way notice into the coordinator inbox.
    pub async fn notify_coordinator(&self, envelope: Envelope) -> Result<(), DeliveryError> {
        if self.runtime_id().await.is_none() {
            return Err(DeliveryError::RuntimeGone);
        }
        let sender = { self.inner.coordinator.read().await.clone() };
        let Some(sender) = sender else {
            return Err(DeliveryError::CoordinatorUnavailable);
        };
        sender
            .try_send(CoordinatorRequest::Notice { envelope })
            .map_err(|_| DeliveryError::CoordinatorUnavailable)
    }
}

impl Default for MessageFabric {
    fn default() -> Self {
        Self::new()
    }
}
