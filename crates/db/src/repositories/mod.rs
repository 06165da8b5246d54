use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use concierge_core::{
    Channel, Conversation, ConversationId, ConversationStatus, KnowledgeDocument, Lead, LeadId,
    LeadStatus, Message, Mode, Tenant, TenantId,
};

use crate::scope::{AdminScope, TenantScope};
use crate::DbPool;

pub mod conversation;
pub mod knowledge;
pub mod lead;
pub mod message;
mod rows;
pub mod tenant;
#[cfg(test)]
mod test_support;

pub use conversation::SqlConversationRepository;
pub use knowledge::SqlKnowledgeRepository;
pub use lead::SqlLeadRepository;
pub use message::SqlMessageRepository;
pub use rows::{blob_to_vec, vec_to_blob};
pub use tenant::SqlTenantRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("tenant isolation violation under scope `{scope}`")]
    TenantIsolation { scope: String },
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("conflict: {0}")]
    Conflict(String),
}

impl RepositoryError {
    pub fn is_isolation_violation(&self) -> bool {
        matches!(self, Self::TenantIsolation { .. })
    }
}

#[async_trait]
pub trait TenantRepository: Send + Sync {
    /// Returns `None` for unknown and soft-deleted tenants.
    async fn find(&self, scope: &TenantScope) -> Result<Option<Tenant>, RepositoryError>;
    async fn create(&self, admin: &AdminScope, tenant: Tenant) -> Result<(), RepositoryError>;
    async fn list(&self, admin: &AdminScope) -> Result<Vec<Tenant>, RepositoryError>;
    async fn soft_delete(
        &self,
        admin: &AdminScope,
        id: &TenantId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_active(
        &self,
        scope: &TenantScope,
        channel: Channel,
        guest_identifier: &str,
    ) -> Result<Option<Conversation>, RepositoryError>;

    /// Inserts `conversation` unless the guest already has an active one, and
    /// returns whichever row is active afterwards.
    async fn insert_if_absent(
        &self,
        scope: &TenantScope,
        conversation: Conversation,
    ) -> Result<Conversation, RepositoryError>;

    async fn find_by_id(
        &self,
        scope: &TenantScope,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError>;

    async fn record_guest_activity(
        &self,
        scope: &TenantScope,
        id: &ConversationId,
        at: DateTime<Utc>,
        guest_name: Option<&str>,
    ) -> Result<Conversation, RepositoryError>;

    /// Sets the guest name only when none is stored yet.
    async fn fill_guest_name(
        &self,
        scope: &TenantScope,
        id: &ConversationId,
        guest_name: &str,
    ) -> Result<(), RepositoryError>;

    /// Applies a classifier signal monotonically and returns the stored mode.
    async fn apply_mode_signal(
        &self,
        scope: &TenantScope,
        id: &ConversationId,
        signal: Mode,
    ) -> Result<Mode, RepositoryError>;

    /// Writes mode and status unconditionally. Used for handoff and staff overrides.
    async fn set_state(
        &self,
        scope: &TenantScope,
        id: &ConversationId,
        mode: Mode,
        status: ConversationStatus,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<Conversation, RepositoryError>;

    async fn list(
        &self,
        scope: &TenantScope,
        status: Option<ConversationStatus>,
        limit: u32,
    ) -> Result<Vec<Conversation>, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn append(&self, scope: &TenantScope, message: Message) -> Result<(), RepositoryError>;

    /// The newest `limit` messages, oldest first.
    async fn recent(
        &self,
        scope: &TenantScope,
        conversation_id: &ConversationId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError>;

    async fn transcript(
        &self,
        scope: &TenantScope,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, RepositoryError>;
}

#[async_trait]
pub trait KnowledgeRepository: Send + Sync {
    /// Replaces the tenant's whole document set atomically; returns the new count.
    async fn replace_all(
        &self,
        scope: &TenantScope,
        documents: Vec<KnowledgeDocument>,
    ) -> Result<usize, RepositoryError>;

    /// All of the tenant's documents in insertion order.
    async fn list(&self, scope: &TenantScope) -> Result<Vec<KnowledgeDocument>, RepositoryError>;
}

#[async_trait]
pub trait LeadRepository: Send + Sync {
    /// Returns `false` when the conversation already has a lead.
    async fn insert_if_absent(&self, scope: &TenantScope, lead: Lead)
        -> Result<bool, RepositoryError>;

    async fn find_by_conversation(
        &self,
        scope: &TenantScope,
        conversation_id: &ConversationId,
    ) -> Result<Option<Lead>, RepositoryError>;

    async fn find_by_id(&self, scope: &TenantScope, id: &LeadId)
        -> Result<Option<Lead>, RepositoryError>;

    async fn list(
        &self,
        scope: &TenantScope,
        status: Option<LeadStatus>,
    ) -> Result<Vec<Lead>, RepositoryError>;

    async fn update(
        &self,
        scope: &TenantScope,
        id: &LeadId,
        status: Option<LeadStatus>,
        notes: Option<String>,
    ) -> Result<Lead, RepositoryError>;
}

/// Every repository behind one handle, shared by the engine and the CLI.
#[derive(Clone)]
pub struct Repositories {
    pub tenants: Arc<dyn TenantRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub knowledge: Arc<dyn KnowledgeRepository>,
    pub leads: Arc<dyn LeadRepository>,
}

impl Repositories {
    pub fn sqlite(pool: DbPool) -> Self {
        Self {
            tenants: Arc::new(SqlTenantRepository::new(pool.clone())),
            conversations: Arc::new(SqlConversationRepository::new(pool.clone())),
            messages: Arc::new(SqlMessageRepository::new(pool.clone())),
            knowledge: Arc::new(SqlKnowledgeRepository::new(pool.clone())),
            leads: Arc::new(SqlLeadRepository::new(pool)),
        }
    }
}
