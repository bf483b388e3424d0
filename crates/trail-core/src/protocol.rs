use crate::TabId;
use chrono::Utc;
use serde::{Deserialize, Serialize};

pub const CURRENT_PROTOCOL_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolVersion(pub u16);

impl ProtocolVersion {
    pub const CURRENT: Self = Self(CURRENT_PROTOCOL_VERSION);
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

/// Which context produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Coordinator,
    Agent(TabId),
    Settings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(default)]
    pub version: ProtocolVersion,
    pub origin: Origin,
    pub sent_at_ms: i64,
    #[serde(flatten)]
    pub msg: Message,
}

impl Envelope {
    pub fn new(origin: Origin, msg: Message) -> Self {
        Self {
            version: ProtocolVersion::CURRENT,
            origin,
            sent_at_ms: Utc::now().timestamp_millis(),
            msg,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Message {
    PositionUpdate(PositionUpdate),
    PositionQuery(PositionQuery),
    PositionReply(PositionReply),
    ModeChange(ModeChangeNotice),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PositionUpdate {
    /// 1-based position in the stack; 0 clears the marker.
    pub position: usize,
    #[serde(default)]
    pub stack_snapshot: Vec<TabId>,
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PositionQuery {
    pub tab: TabId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PositionReply {
    pub success: bool,
    pub position: usize,
    #[serde(default)]
    pub stack_snapshot: Vec<TabId>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModeChangeNotice {
    pub new_count: usize,
}
