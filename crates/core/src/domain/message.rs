use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::conversation::{Channel, ConversationId, Mode};
use crate::domain::tenant::TenantId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    Guest,
    Ai,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guest => "guest",
            Self::Ai => "ai",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "guest" => Some(Self::Guest),
            "ai" => Some(Self::Ai),
            _ => None,
        }
    }
}

/// Informational only; nothing in the engine branches on these values.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub tenant_id: TenantId,
    pub role: MessageRole,
    pub content: String,
    pub metadata: MessageMetadata,
    pub sent_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        conversation_id: ConversationId,
        tenant_id: TenantId,
        role: MessageRole,
        content: impl Into<String>,
        metadata: MessageMetadata,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            conversation_id,
            tenant_id,
            role,
            content: content.into(),
            metadata,
            sent_at: Utc::now(),
        }
    }
}

/// Channel-agnostic form of an inbound guest message, produced by the channel
/// adapters after payload parsing and signature checks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: Channel,
    pub guest_identifier: String,
    #[serde(default)]
    pub guest_name: Option<String>,
    pub content: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}
