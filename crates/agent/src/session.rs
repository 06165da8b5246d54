use std::sync::Arc;

use chrono::{DateTime, Utc};

use concierge_core::{Channel, Conversation, Tenant};
use concierge_db::repositories::ConversationRepository;
use concierge_db::{RepositoryError, TenantScope};

#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedSession {
    pub conversation: Conversation,
    /// `true` only for the caller whose insert created the row.
    pub created: bool,
}

/// Maps `(tenant, channel, guest)` to the one active conversation.
pub struct SessionResolver {
    conversations: Arc<dyn ConversationRepository>,
}

impl SessionResolver {
    pub fn new(conversations: Arc<dyn ConversationRepository>) -> Self {
        Self { conversations }
    }

    /// Returns the active conversation unchanged, or creates one.
    ///
    /// Creation is insert-or-fetch against the partial unique index, so racing
    /// callers in separate processes still converge on a single row.
    pub async fn resolve(
        &self,
        scope: &TenantScope,
        tenant: &Tenant,
        channel: Channel,
        guest_identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<ResolvedSession, RepositoryError> {
        scope.admit(&tenant.id.0)?;

        if let Some(conversation) =
            self.conversations.find_active(scope, channel, guest_identifier).await?
        {
            return Ok(ResolvedSession { conversation, created: false });
        }

        let is_after_hours = tenant.is_after_hours_at(now);
        let candidate =
            Conversation::start(tenant.id.clone(), channel, guest_identifier, is_after_hours, now);
        let candidate_id = candidate.id.clone();
        let conversation = self.conversations.insert_if_absent(scope, candidate).await?;
        let created = conversation.id == candidate_id;

        if created {
            tracing::info!(
                event_name = "session.conversation.created",
                tenant_id = %scope.tenant_id(),
                conversation_id = %conversation.id,
                channel = %channel,
                is_after_hours,
                "new conversation started"
            );
        }
        Ok(ResolvedSession { conversation, created })
    }
}
