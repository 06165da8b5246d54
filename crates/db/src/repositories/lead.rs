use chrono::Utc;
use sqlx::sqlite::SqliteRow;

use concierge_core::{ConversationId, Lead, LeadId, LeadIntent, LeadStatus, TenantId};

use super::rows::{
    ensure_owned, format_timestamp, get, map_write_error, parse_decimal, parse_enum,
    parse_timestamp, OwnedTable,
};
use super::{LeadRepository, RepositoryError};
use crate::scope::TenantScope;
use crate::DbPool;

const LEAD_COLUMNS: &str = "id, conversation_id, tenant_id, guest_name, guest_phone, guest_email,
                            intent, estimated_value, status, notes, captured_at";

pub struct SqlLeadRepository {
    pool: DbPool,
}

impl SqlLeadRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_lead(row: &SqliteRow) -> Result<Lead, RepositoryError> {
    let intent: String = get(row, "intent")?;
    let estimated_value: String = get(row, "estimated_value")?;
    let status: String = get(row, "status")?;
    let captured_at: String = get(row, "captured_at")?;

    Ok(Lead {
        id: LeadId(get(row, "id")?),
        conversation_id: ConversationId(get(row, "conversation_id")?),
        tenant_id: TenantId(get(row, "tenant_id")?),
        guest_name: get(row, "guest_name")?,
        guest_phone: get(row, "guest_phone")?,
        guest_email: get(row, "guest_email")?,
        intent: LeadIntent::parse_lenient(&intent),
        estimated_value: parse_decimal(&estimated_value)?,
        status: parse_enum(&status, "lead status", LeadStatus::parse)?,
        notes: get(row, "notes")?,
        captured_at: parse_timestamp(&captured_at)?,
    })
}

fn admitted(scope: &TenantScope, row: &SqliteRow) -> Result<Lead, RepositoryError> {
    let lead = row_to_lead(row)?;
    scope.admit(&lead.tenant_id.0)?;
    Ok(lead)
}

#[async_trait::async_trait]
impl LeadRepository for SqlLeadRepository {
    async fn insert_if_absent(
        &self,
        scope: &TenantScope,
        lead: Lead,
    ) -> Result<bool, RepositoryError> {
        scope.admit(&lead.tenant_id.0)?;
        ensure_owned(&self.pool, OwnedTable::Conversation, &lead.conversation_id.0, scope)
            .await?;

        let captured_at = format_timestamp(&lead.captured_at);
        let result = sqlx::query(
            "INSERT INTO lead (id, conversation_id, tenant_id, guest_name, guest_phone, guest_email,
                               intent, estimated_value, status, notes, captured_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(conversation_id) DO NOTHING",
        )
        .bind(&lead.id.0)
        .bind(&lead.conversation_id.0)
        .bind(scope.as_str())
        .bind(&lead.guest_name)
        .bind(&lead.guest_phone)
        .bind(&lead.guest_email)
        .bind(lead.intent.as_str())
        .bind(lead.estimated_value.to_string())
        .bind(lead.status.as_str())
        .bind(&lead.notes)
        .bind(&captured_at)
        .bind(&captured_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(scope, e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_by_conversation(
        &self,
        scope: &TenantScope,
        conversation_id: &ConversationId,
    ) -> Result<Option<Lead>, RepositoryError> {
        ensure_owned(&self.pool, OwnedTable::Conversation, &conversation_id.0, scope).await?;

        let sql = format!(
            "SELECT {LEAD_COLUMNS} FROM lead WHERE conversation_id = ? AND tenant_id = ?"
        );
        let row = sqlx::query(&sql)
            .bind(&conversation_id.0)
            .bind(scope.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(|r| admitted(scope, r)).transpose()
    }

    async fn find_by_id(
        &self,
        scope: &TenantScope,
        id: &LeadId,
    ) -> Result<Option<Lead>, RepositoryError> {
        let sql = format!("SELECT {LEAD_COLUMNS} FROM lead WHERE id = ?");
        let row = sqlx::query(&sql).bind(&id.0).fetch_optional(&self.pool).await?;

        row.as_ref().map(|r| admitted(scope, r)).transpose()
    }

    async fn list(
        &self,
        scope: &TenantScope,
        status: Option<LeadStatus>,
    ) -> Result<Vec<Lead>, RepositoryError> {
        let status_clause = if status.is_some() { "AND status = ?" } else { "" };
        let sql = format!(
            "SELECT {LEAD_COLUMNS} FROM lead
             WHERE tenant_id = ? {status_clause}
             ORDER BY captured_at DESC"
        );

        let mut query = sqlx::query(&sql).bind(scope.as_str());
        if let Some(status) = status {
            query = query.bind(status.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.iter().map(|row| admitted(scope, row)).collect()
    }

    async fn update(
        &self,
        scope: &TenantScope,
        id: &LeadId,
        status: Option<LeadStatus>,
        notes: Option<String>,
    ) -> Result<Lead, RepositoryError> {
        ensure_owned(&self.pool, OwnedTable::Lead, &id.0, scope).await?;

        sqlx::query(
            "UPDATE lead
             SET status = COALESCE(?, status),
                 notes = COALESCE(?, notes),
                 updated_at = ?
             WHERE id = ? AND tenant_id = ?",
        )
        .bind(status.map(|s| s.as_str()))
        .bind(&notes)
        .bind(format_timestamp(&Utc::now()))
        .bind(&id.0)
        .bind(scope.as_str())
        .execute(&self.pool)
        .await?;

        self.find_by_id(scope, id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound { entity: "lead", id: id.0.clone() })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use concierge_core::{Conversation, Lead, LeadId, LeadIntent, LeadStatus};

    use super::SqlLeadRepository;
    use crate::repositories::test_support::{seed_conversation, seed_tenant, setup};
    use crate::repositories::{LeadRepository, RepositoryError};
    use crate::scope::TenantScope;

    fn lead(scope: &TenantScope, conversation: &Conversation) -> Lead {
        Lead {
            id: LeadId::generate(),
            conversation_id: conversation.id.clone(),
            tenant_id: scope.tenant_id().clone(),
            guest_name: Some("Ali".to_string()),
            guest_phone: None,
            guest_email: Some("ali@test.com".to_string()),
            intent: LeadIntent::RoomBooking,
            estimated_value: Decimal::new(230, 0),
            status: LeadStatus::New,
            notes: None,
            captured_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn second_lead_for_a_conversation_is_ignored() {
        let pool = setup().await;
        let scope = seed_tenant(&pool, "Hotel X").await;
        let conversation = seed_conversation(&pool, &scope, "+60111").await;
        let repo = SqlLeadRepository::new(pool);

        assert!(repo.insert_if_absent(&scope, lead(&scope, &conversation)).await.expect("first"));
        assert!(!repo.insert_if_absent(&scope, lead(&scope, &conversation)).await.expect("second"));
        assert_eq!(repo.list(&scope, None).await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn concurrent_lead_inserts_create_exactly_one() {
        let pool = setup().await;
        let scope = seed_tenant(&pool, "Hotel X").await;
        let conversation = seed_conversation(&pool, &scope, "+60111").await;
        let repo = Arc::new(SqlLeadRepository::new(pool));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let repo = Arc::clone(&repo);
            let scope = scope.clone();
            let candidate = lead(&scope, &conversation);
            handles.push(tokio::spawn(async move {
                repo.insert_if_absent(&scope, candidate).await.expect("insert")
            }));
        }

        let mut created = 0;
        for handle in handles {
            if handle.await.expect("join") {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn staff_update_changes_status_and_notes_only() {
        let pool = setup().await;
        let scope = seed_tenant(&pool, "Hotel X").await;
        let conversation = seed_conversation(&pool, &scope, "+60111").await;
        let repo = SqlLeadRepository::new(pool);
        let original = lead(&scope, &conversation);
        repo.insert_if_absent(&scope, original.clone()).await.expect("insert");

        let updated = repo
            .update(&scope, &original.id, Some(LeadStatus::Contacted), Some("called back".into()))
            .await
            .expect("update");
        assert_eq!(updated.status, LeadStatus::Contacted);
        assert_eq!(updated.notes.as_deref(), Some("called back"));
        assert_eq!(updated.estimated_value, original.estimated_value);

        let unchanged_notes =
            repo.update(&scope, &original.id, Some(LeadStatus::Won), None).await.expect("update");
        assert_eq!(unchanged_notes.notes.as_deref(), Some("called back"));

        let contacted = repo.list(&scope, Some(LeadStatus::Contacted)).await.expect("list");
        assert!(contacted.is_empty());
    }

    #[tokio::test]
    async fn foreign_lead_is_an_isolation_violation() {
        let pool = setup().await;
        let tenant_a = seed_tenant(&pool, "Hotel A").await;
        let tenant_b = seed_tenant(&pool, "Hotel B").await;
        let conversation = seed_conversation(&pool, &tenant_a, "+60111").await;
        let repo = SqlLeadRepository::new(pool);
        let owned_by_a = lead(&tenant_a, &conversation);
        repo.insert_if_absent(&tenant_a, owned_by_a.clone()).await.expect("insert");

        let read = repo.find_by_id(&tenant_b, &owned_by_a.id).await;
        assert!(matches!(read, Err(RepositoryError::TenantIsolation { .. })));

        let write = repo.update(&tenant_b, &owned_by_a.id, Some(LeadStatus::Lost), None).await;
        assert!(matches!(write, Err(RepositoryError::TenantIsolation { .. })));

        assert!(repo.list(&tenant_b, None).await.expect("list b").is_empty());
    }
}
