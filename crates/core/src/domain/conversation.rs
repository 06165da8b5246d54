use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::tenant::TenantId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    #[serde(rename = "whatsapp")]
    WhatsApp,
    Web,
    Email,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WhatsApp => "whatsapp",
            Self::Web => "web",
            Self::Email => "email",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "whatsapp" => Some(Self::WhatsApp),
            "web" => Some(Self::Web),
            "email" => Some(Self::Email),
            _ => None,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Behavioural policy governing the AI reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Concierge,
    LeadCapture,
    Handoff,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Concierge => "concierge",
            Self::LeadCapture => "lead_capture",
            Self::Handoff => "handoff",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "concierge" => Some(Self::Concierge),
            "lead_capture" => Some(Self::LeadCapture),
            "handoff" => Some(Self::Handoff),
            _ => None,
        }
    }

    /// Applies a classifier signal under the sticky rule: modes only move
    /// forward (`concierge` -> `lead_capture` -> `handoff`), and no signal
    /// leaves the mode untouched.
    pub fn apply_signal(self, signal: Option<Mode>) -> Mode {
        match (self, signal) {
            (_, None) => self,
            (Self::Handoff, _) => Self::Handoff,
            (_, Some(Self::Handoff)) => Self::Handoff,
            (Self::Concierge, Some(Self::LeadCapture)) => Self::LeadCapture,
            (current, Some(_)) => current,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Resolved,
    HandedOff,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Resolved => "resolved",
            Self::HandedOff => "handed_off",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "active" => Some(Self::Active),
            "resolved" => Some(Self::Resolved),
            "handed_off" => Some(Self::HandedOff),
            _ => None,
        }
    }

    pub fn accepts_auto_replies(&self) -> bool {
        matches!(self, Self::Active)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub tenant_id: TenantId,
    pub channel: Channel,
    pub guest_identifier: String,
    pub guest_name: Option<String>,
    pub mode: Mode,
    pub status: ConversationStatus,
    pub is_after_hours: bool,
    pub message_count: u32,
    pub started_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn start(
        tenant_id: TenantId,
        channel: Channel,
        guest_identifier: impl Into<String>,
        is_after_hours: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ConversationId::generate(),
            tenant_id,
            channel,
            guest_identifier: guest_identifier.into(),
            guest_name: None,
            mode: Mode::Concierge,
            status: ConversationStatus::Active,
            is_after_hours,
            message_count: 0,
            started_at: now,
            last_message_at: None,
            ended_at: None,
        }
    }

    pub fn can_transition_to(&self, next: ConversationStatus) -> bool {
        matches!(
            (self.status, next),
            (ConversationStatus::Active, ConversationStatus::Resolved)
                | (ConversationStatus::Active, ConversationStatus::HandedOff)
                | (ConversationStatus::HandedOff, ConversationStatus::Resolved)
                | (ConversationStatus::HandedOff, ConversationStatus::Active)
                | (ConversationStatus::Resolved, ConversationStatus::Active)
        )
    }

    pub fn transition_to(&mut self, next: ConversationStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidConversationTransition { from: self.status, to: next })
    }
}
