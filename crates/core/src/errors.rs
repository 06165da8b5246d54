use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::conversation::ConversationStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid conversation transition from {from:?} to {to:?}")]
    InvalidConversationTransition { from: ConversationStatus, to: ConversationStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// How a failure is treated by callers of the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Malformed or unusable input; degrade, never fail the webhook ack.
    Input,
    /// Unknown tenant or record.
    NotFound,
    /// Embedding/completion provider or persistence unavailable.
    Capability,
    /// Lead extraction could not produce a lead. Never surfaced to guests.
    Extraction,
    /// A record outside the active tenant context was touched. Fatal.
    IsolationViolation,
    /// A state invariant was violated at the persistence layer.
    InvariantViolation,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::NotFound => "not_found",
            Self::Capability => "capability",
            Self::Extraction => "extraction",
            Self::IsolationViolation => "isolation_violation",
            Self::InvariantViolation => "invariant_violation",
        }
    }

    /// Whether the caller's delivery/queue layer may retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Capability | Self::InvariantViolation)
    }

    /// Short text a channel adapter can send to the guest instead of a reply.
    pub fn guest_message(&self) -> &'static str {
        match self {
            Self::Capability | Self::InvariantViolation | Self::Extraction => {
                "Sorry, I'm having trouble answering right now. Our team will get back to you shortly."
            }
            Self::Input => "Sorry, I couldn't read that message. Could you send it again?",
            Self::NotFound | Self::IsolationViolation => {
                "Sorry, we couldn't process your message. Please contact the property directly."
            }
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
