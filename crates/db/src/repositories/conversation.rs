use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;

use concierge_core::{
    Channel, Conversation, ConversationId, ConversationStatus, Mode, TenantId,
};

use super::rows::{
    ensure_owned, format_timestamp, get, map_write_error, parse_enum, parse_optional_timestamp,
    parse_timestamp, OwnedTable,
};
use super::{ConversationRepository, RepositoryError};
use crate::scope::TenantScope;
use crate::DbPool;

const CONVERSATION_COLUMNS: &str = "id, tenant_id, channel, guest_identifier, guest_name, mode,
                                    status, is_after_hours, message_count, started_at,
                                    last_message_at, ended_at";

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_conversation(row: &SqliteRow) -> Result<Conversation, RepositoryError> {
    let channel: String = get(row, "channel")?;
    let mode: String = get(row, "mode")?;
    let status: String = get(row, "status")?;
    let message_count: i64 = get(row, "message_count")?;
    let started_at: String = get(row, "started_at")?;

    Ok(Conversation {
        id: ConversationId(get(row, "id")?),
        tenant_id: TenantId(get(row, "tenant_id")?),
        channel: parse_enum(&channel, "channel", Channel::parse)?,
        guest_identifier: get(row, "guest_identifier")?,
        guest_name: get(row, "guest_name")?,
        mode: parse_enum(&mode, "mode", Mode::parse)?,
        status: parse_enum(&status, "conversation status", ConversationStatus::parse)?,
        is_after_hours: get(row, "is_after_hours")?,
        message_count: u32::try_from(message_count)
            .map_err(|e| RepositoryError::Decode(format!("message_count: {e}")))?,
        started_at: parse_timestamp(&started_at)?,
        last_message_at: parse_optional_timestamp(get(row, "last_message_at")?)?,
        ended_at: parse_optional_timestamp(get(row, "ended_at")?)?,
    })
}

/// Decodes a row and fails closed if it belongs to another tenant.
fn admitted(scope: &TenantScope, row: &SqliteRow) -> Result<Conversation, RepositoryError> {
    let conversation = row_to_conversation(row)?;
    scope.admit(&conversation.tenant_id.0)?;
    Ok(conversation)
}

impl SqlConversationRepository {
    async fn fetch_owned(
        &self,
        scope: &TenantScope,
        id: &ConversationId,
    ) -> Result<Conversation, RepositoryError> {
        self.find_by_id(scope, id).await?.ok_or_else(|| RepositoryError::NotFound {
            entity: "conversation",
            id: id.0.clone(),
        })
    }
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn find_active(
        &self,
        scope: &TenantScope,
        channel: Channel,
        guest_identifier: &str,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversation
             WHERE tenant_id = ? AND channel = ? AND guest_identifier = ? AND status = 'active'
             ORDER BY started_at DESC
             LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(scope.as_str())
            .bind(channel.as_str())
            .bind(guest_identifier)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(|r| admitted(scope, r)).transpose()
    }

    async fn insert_if_absent(
        &self,
        scope: &TenantScope,
        conversation: Conversation,
    ) -> Result<Conversation, RepositoryError> {
        scope.admit(&conversation.tenant_id.0)?;

        let result = sqlx::query(
            "INSERT INTO conversation (id, tenant_id, channel, guest_identifier, guest_name, mode,
                                       status, is_after_hours, message_count, started_at,
                                       last_message_at, ended_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT DO NOTHING",
        )
        .bind(&conversation.id.0)
        .bind(scope.as_str())
        .bind(conversation.channel.as_str())
        .bind(&conversation.guest_identifier)
        .bind(&conversation.guest_name)
        .bind(conversation.mode.as_str())
        .bind(conversation.status.as_str())
        .bind(conversation.is_after_hours)
        .bind(i64::from(conversation.message_count))
        .bind(format_timestamp(&conversation.started_at))
        .bind(conversation.last_message_at.as_ref().map(format_timestamp))
        .bind(conversation.ended_at.as_ref().map(format_timestamp))
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(scope, e))?;

        if result.rows_affected() == 0 {
            tracing::debug!(
                event_name = "db.conversation.insert_raced",
                tenant_id = %scope.tenant_id(),
                channel = %conversation.channel,
                "active conversation already existed; returning it"
            );
        }

        self.find_active(scope, conversation.channel, &conversation.guest_identifier)
            .await?
            .ok_or_else(|| {
                RepositoryError::Conflict(
                    "conversation insert was ignored but no active conversation exists".to_string(),
                )
            })
    }

    async fn find_by_id(
        &self,
        scope: &TenantScope,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        // Looked up by id alone so that a foreign id trips `admit`.
        let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversation WHERE id = ?");
        let row = sqlx::query(&sql).bind(&id.0).fetch_optional(&self.pool).await?;

        row.as_ref().map(|r| admitted(scope, r)).transpose()
    }

    async fn record_guest_activity(
        &self,
        scope: &TenantScope,
        id: &ConversationId,
        at: DateTime<Utc>,
        guest_name: Option<&str>,
    ) -> Result<Conversation, RepositoryError> {
        ensure_owned(&self.pool, OwnedTable::Conversation, &id.0, scope).await?;
        let guest_name = guest_name.map(str::trim).filter(|name| !name.is_empty());

        sqlx::query(
            "UPDATE conversation
             SET last_message_at = ?,
                 message_count = message_count + 1,
                 guest_name = COALESCE(guest_name, ?)
             WHERE id = ? AND tenant_id = ?",
        )
        .bind(format_timestamp(&at))
        .bind(guest_name)
        .bind(&id.0)
        .bind(scope.as_str())
        .execute(&self.pool)
        .await?;

        self.fetch_owned(scope, id).await
    }

    async fn fill_guest_name(
        &self,
        scope: &TenantScope,
        id: &ConversationId,
        guest_name: &str,
    ) -> Result<(), RepositoryError> {
        ensure_owned(&self.pool, OwnedTable::Conversation, &id.0, scope).await?;
        let guest_name = guest_name.trim();
        if guest_name.is_empty() {
            return Ok(());
        }

        sqlx::query(
            "UPDATE conversation SET guest_name = COALESCE(guest_name, ?)
             WHERE id = ? AND tenant_id = ?",
        )
        .bind(guest_name)
        .bind(&id.0)
        .bind(scope.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn apply_mode_signal(
        &self,
        scope: &TenantScope,
        id: &ConversationId,
        signal: Mode,
    ) -> Result<Mode, RepositoryError> {
        ensure_owned(&self.pool, OwnedTable::Conversation, &id.0, scope).await?;

        let row = sqlx::query(
            "UPDATE conversation
             SET mode = CASE
                 WHEN mode = 'handoff' THEN 'handoff'
                 WHEN ? = 'handoff' THEN 'handoff'
                 WHEN ? = 'lead_capture' AND mode = 'concierge' THEN 'lead_capture'
                 ELSE mode
             END
             WHERE id = ? AND tenant_id = ?
             RETURNING mode",
        )
        .bind(signal.as_str())
        .bind(signal.as_str())
        .bind(&id.0)
        .bind(scope.as_str())
        .fetch_one(&self.pool)
        .await?;

        let mode: String = get(&row, "mode")?;
        parse_enum(&mode, "mode", Mode::parse)
    }

    async fn set_state(
        &self,
        scope: &TenantScope,
        id: &ConversationId,
        mode: Mode,
        status: ConversationStatus,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<Conversation, RepositoryError> {
        ensure_owned(&self.pool, OwnedTable::Conversation, &id.0, scope).await?;

        sqlx::query(
            "UPDATE conversation SET mode = ?, status = ?, ended_at = ?
             WHERE id = ? AND tenant_id = ?",
        )
        .bind(mode.as_str())
        .bind(status.as_str())
        .bind(ended_at.as_ref().map(format_timestamp))
        .bind(&id.0)
        .bind(scope.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(scope, e))?;

        self.fetch_owned(scope, id).await
    }

    async fn list(
        &self,
        scope: &TenantScope,
        status: Option<ConversationStatus>,
        limit: u32,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let status_clause = if status.is_some() { "AND status = ?" } else { "" };
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversation
             WHERE tenant_id = ? {status_clause}
             ORDER BY COALESCE(last_message_at, started_at) DESC
             LIMIT ?"
        );

        let mut query = sqlx::query(&sql).bind(scope.as_str());
        if let Some(status) = status {
            query = query.bind(status.as_str());
        }
        let rows = query.bind(i64::from(limit.max(1))).fetch_all(&self.pool).await?;

        rows.iter().map(|row| admitted(scope, row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use concierge_core::{Channel, Conversation, ConversationStatus, Mode};

    use super::SqlConversationRepository;
    use crate::repositories::test_support::{seed_conversation, seed_tenant, setup};
    use crate::repositories::{ConversationRepository, RepositoryError};

    #[tokio::test]
    async fn insert_if_absent_returns_existing_active_conversation() {
        let pool = setup().await;
        let scope = seed_tenant(&pool, "Hotel X").await;
        let repo = SqlConversationRepository::new(pool.clone());

        let first = seed_conversation(&pool, &scope, "+60111").await;
        let duplicate = Conversation::start(
            scope.tenant_id().clone(),
            Channel::WhatsApp,
            "+60111",
            true,
            Utc::now(),
        );
        let second = repo.insert_if_absent(&scope, duplicate).await.expect("insert");

        assert_eq!(second.id, first.id);
        assert!(!second.is_after_hours, "existing row is returned unchanged");
    }

    #[tokio::test]
    async fn concurrent_inserts_produce_one_active_conversation() {
        let pool = setup().await;
        let scope = seed_tenant(&pool, "Hotel X").await;
        let repo = Arc::new(SqlConversationRepository::new(pool.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = Arc::clone(&repo);
            let scope = scope.clone();
            handles.push(tokio::spawn(async move {
                let candidate = Conversation::start(
                    scope.tenant_id().clone(),
                    Channel::Web,
                    "session-abc",
                    false,
                    Utc::now(),
                );
                repo.insert_if_absent(&scope, candidate).await.expect("insert").id
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.expect("join"));
        }
        ids.dedup();
        assert_eq!(ids.len(), 1, "every caller should see the same conversation");

        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM conversation WHERE guest_identifier = 'session-abc' AND status = 'active'",
        )
        .fetch_one(&pool)
        .await
        .expect("count");
        assert_eq!(active, 1);
    }

    #[tokio::test]
    async fn mode_signal_is_monotonic_in_storage() {
        let pool = setup().await;
        let scope = seed_tenant(&pool, "Hotel X").await;
        let repo = SqlConversationRepository::new(pool.clone());
        let conversation = seed_conversation(&pool, &scope, "+60111").await;

        let mode = repo.apply_mode_signal(&scope, &conversation.id, Mode::LeadCapture).await;
        assert_eq!(mode.expect("signal"), Mode::LeadCapture);

        let mode = repo.apply_mode_signal(&scope, &conversation.id, Mode::Concierge).await;
        assert_eq!(mode.expect("signal"), Mode::LeadCapture);

        let mode = repo.apply_mode_signal(&scope, &conversation.id, Mode::Handoff).await;
        assert_eq!(mode.expect("signal"), Mode::Handoff);

        let mode = repo.apply_mode_signal(&scope, &conversation.id, Mode::LeadCapture).await;
        assert_eq!(mode.expect("signal"), Mode::Handoff);
    }

    #[tokio::test]
    async fn guest_activity_counts_messages_and_fills_name_once() {
        let pool = setup().await;
        let scope = seed_tenant(&pool, "Hotel X").await;
        let repo = SqlConversationRepository::new(pool.clone());
        let conversation = seed_conversation(&pool, &scope, "+60111").await;

        repo.record_guest_activity(&scope, &conversation.id, Utc::now(), Some("Ali"))
            .await
            .expect("first activity");
        let updated = repo
            .record_guest_activity(&scope, &conversation.id, Utc::now(), Some("Someone Else"))
            .await
            .expect("second activity");

        assert_eq!(updated.message_count, 2);
        assert_eq!(updated.guest_name.as_deref(), Some("Ali"));
        assert!(updated.last_message_at.is_some());
    }

    #[tokio::test]
    async fn extracted_name_never_overwrites_a_known_one() {
        let pool = setup().await;
        let scope = seed_tenant(&pool, "Hotel X").await;
        let repo = SqlConversationRepository::new(pool.clone());
        let conversation = seed_conversation(&pool, &scope, "+60111").await;

        repo.fill_guest_name(&scope, &conversation.id, "  ").await.expect("blank name");
        repo.fill_guest_name(&scope, &conversation.id, "Ali").await.expect("first name");
        repo.fill_guest_name(&scope, &conversation.id, "Abu").await.expect("second name");

        let stored = repo.find_by_id(&scope, &conversation.id).await.expect("read");
        assert_eq!(stored.and_then(|c| c.guest_name).as_deref(), Some("Ali"));
    }

    #[tokio::test]
    async fn foreign_conversation_id_is_an_isolation_violation() {
        let pool = setup().await;
        let tenant_a = seed_tenant(&pool, "Hotel A").await;
        let tenant_b = seed_tenant(&pool, "Hotel B").await;
        let repo = SqlConversationRepository::new(pool.clone());
        let owned_by_a = seed_conversation(&pool, &tenant_a, "+60111").await;

        let read = repo.find_by_id(&tenant_b, &owned_by_a.id).await;
        assert!(matches!(read, Err(RepositoryError::TenantIsolation { .. })));

        let write = repo.apply_mode_signal(&tenant_b, &owned_by_a.id, Mode::Handoff).await;
        assert!(matches!(write, Err(RepositoryError::TenantIsolation { .. })));

        let untouched = repo.find_by_id(&tenant_a, &owned_by_a.id).await.expect("read");
        assert_eq!(untouched.map(|c| c.mode), Some(Mode::Concierge));
    }

    #[tokio::test]
    async fn inserting_for_another_tenant_is_rejected() {
        let pool = setup().await;
        let tenant_a = seed_tenant(&pool, "Hotel A").await;
        let tenant_b = seed_tenant(&pool, "Hotel B").await;
        let repo = SqlConversationRepository::new(pool);

        let smuggled = Conversation::start(
            tenant_a.tenant_id().clone(),
            Channel::Email,
            "guest@example.com",
            false,
            Utc::now(),
        );
        let result = repo.insert_if_absent(&tenant_b, smuggled).await;
        assert!(matches!(result, Err(RepositoryError::TenantIsolation { .. })));
    }

    #[tokio::test]
    async fn reactivation_conflicts_with_a_newer_active_conversation() {
        let pool = setup().await;
        let scope = seed_tenant(&pool, "Hotel X").await;
        let repo = SqlConversationRepository::new(pool.clone());

        let old = seed_conversation(&pool, &scope, "+60111").await;
        repo.set_state(&scope, &old.id, Mode::Concierge, ConversationStatus::Resolved, Some(Utc::now()))
            .await
            .expect("resolve");
        let fresh = seed_conversation(&pool, &scope, "+60111").await;
        assert_ne!(fresh.id, old.id, "resolved conversations are not reused");

        let result =
            repo.set_state(&scope, &old.id, Mode::Concierge, ConversationStatus::Active, None).await;
        assert!(matches!(result, Err(RepositoryError::Conflict(_))));
    }

    #[tokio::test]
    async fn list_filters_by_status_within_tenant() {
        let pool = setup().await;
        let tenant_a = seed_tenant(&pool, "Hotel A").await;
        let tenant_b = seed_tenant(&pool, "Hotel B").await;
        let repo = SqlConversationRepository::new(pool.clone());

        let handed = seed_conversation(&pool, &tenant_a, "+60111").await;
        seed_conversation(&pool, &tenant_a, "+60222").await;
        seed_conversation(&pool, &tenant_b, "+60333").await;
        repo.set_state(&tenant_a, &handed.id, Mode::Handoff, ConversationStatus::HandedOff, None)
            .await
            .expect("handoff");

        let all_a = repo.list(&tenant_a, None, 50).await.expect("list");
        assert_eq!(all_a.len(), 2);
        assert!(all_a.iter().all(|c| c.tenant_id == *tenant_a.tenant_id()));

        let handed_off =
            repo.list(&tenant_a, Some(ConversationStatus::HandedOff), 50).await.expect("list");
        assert_eq!(handed_off.len(), 1);
        assert_eq!(handed_off[0].id, handed.id);
    }
}
