use chrono::Utc;
use rust_decimal::Decimal;

use concierge_core::{Channel, Conversation, Tenant};

use super::{
    ConversationRepository, SqlConversationRepository, SqlTenantRepository, TenantRepository,
};
use crate::scope::{AdminScope, TenantScope};
use crate::{connect_with_settings, migrations, DbPool};

pub(crate) async fn setup() -> DbPool {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");
    pool
}

pub(crate) async fn seed_tenant(pool: &DbPool, name: &str) -> TenantScope {
    let tenant = Tenant::new(name, Decimal::new(230, 0));
    let scope = TenantScope::new(tenant.id.clone());
    SqlTenantRepository::new(pool.clone())
        .create(&AdminScope::new("test"), tenant)
        .await
        .expect("seed tenant");
    scope
}

pub(crate) async fn seed_conversation(
    pool: &DbPool,
    scope: &TenantScope,
    guest_identifier: &str,
) -> Conversation {
    let conversation = Conversation::start(
        scope.tenant_id().clone(),
        Channel::WhatsApp,
        guest_identifier,
        false,
        Utc::now(),
    );
    SqlConversationRepository::new(pool.clone())
        .insert_if_absent(scope, conversation)
        .await
        .expect("seed conversation")
}
