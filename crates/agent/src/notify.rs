use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use concierge_core::{Channel, ConversationId, TenantId};

/// Everything staff need to pick up a handed-off conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffNotice {
    pub tenant_id: TenantId,
    pub conversation_id: ConversationId,
    pub guest_identifier: String,
    pub guest_name: Option<String>,
    pub channel: Channel,
    pub summary: String,
}

/// Invoked by callers after the engine reports a handoff.
#[async_trait]
pub trait StaffNotifier: Send + Sync {
    async fn notify(&self, notice: &HandoffNotice);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TracingStaffNotifier;

#[async_trait]
impl StaffNotifier for TracingStaffNotifier {
    async fn notify(&self, notice: &HandoffNotice) {
        tracing::warn!(
            event_name = "staff.handoff.requested",
            tenant_id = %notice.tenant_id,
            conversation_id = %notice.conversation_id,
            channel = %notice.channel,
            summary_chars = notice.summary.chars().count(),
            "conversation needs a member of staff"
        );
    }
}
