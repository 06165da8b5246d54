//! Conversation & retrieval engine for the guest concierge.
//!
//! The engine turns one inbound guest message into one grounded reply:
//! 1. **Sanitisation** (`guardrails`) - length cap, delimiter stripping, injection redaction
//! 2. **Session resolution** (`session`) - one active conversation per guest and channel
//! 3. **Intent classification** (`conversation`) - keyword signal, sticky mode rule
//! 4. **Retrieval** (`knowledge`) - tenant-scoped cosine search over ingested documents
//! 5. **Context assembly** (`context`) - system policy, mode addendum, grounding, history
//! 6. **Completion** (`llm`, `openai`) - pluggable provider with a bounded timeout
//! 7. **Lead capture** (`leads`) - structured extraction, best effort
//!
//! # Safety Principle
//!
//! The model only phrases answers. Mode, lead value and tenant boundaries are
//! decided by deterministic code, and every repository call carries an
//! explicit tenant scope.

pub mod context;
pub mod conversation;
pub mod guardrails;
pub mod knowledge;
pub mod leads;
pub mod llm;
pub mod notify;
pub mod openai;
pub mod runtime;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use runtime::{
    ConversationEngine, EngineError, EngineReply, EngineSettings, EMPTY_MESSAGE_PLACEHOLDER,
};
