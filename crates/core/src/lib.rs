//! Core domain for the multi-tenant guest concierge: tenants, conversations,
//! messages, knowledge documents and leads, plus the configuration and error
//! taxonomy shared by every other crate.

pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;

pub use domain::conversation::{Channel, Conversation, ConversationId, ConversationStatus, Mode};
pub use domain::knowledge::{DocType, DocumentId, DocumentInput, KnowledgeDocument, ScoredDocument};
pub use domain::lead::{Lead, LeadId, LeadIntent, LeadStatus};
pub use domain::message::{InboundMessage, Message, MessageId, MessageMetadata, MessageRole};
pub use domain::tenant::{KnowledgeConfig, OperatingHours, Tenant, TenantId};
pub use errors::{DomainError, ErrorClass};
