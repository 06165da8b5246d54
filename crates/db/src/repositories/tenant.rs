use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;

use concierge_core::{KnowledgeConfig, OperatingHours, Tenant, TenantId};

use super::rows::{
    format_timestamp, get, map_write_error, parse_decimal, parse_optional_timestamp,
    parse_timestamp,
};
use super::{RepositoryError, TenantRepository};
use crate::scope::{AdminScope, TenantScope};
use crate::DbPool;

const TENANT_COLUMNS: &str = "id, name, operating_hours_json, average_daily_rate,
                              knowledge_config_json, created_at, deleted_at";

pub struct SqlTenantRepository {
    pool: DbPool,
}

impl SqlTenantRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_tenant(row: &SqliteRow) -> Result<Tenant, RepositoryError> {
    let id: String = get(row, "id")?;
    let hours_json: Option<String> = get(row, "operating_hours_json")?;
    let adr: String = get(row, "average_daily_rate")?;
    let knowledge_json: String = get(row, "knowledge_config_json")?;
    let created_at: String = get(row, "created_at")?;
    let deleted_at: Option<String> = get(row, "deleted_at")?;

    let operating_hours = hours_json
        .map(|raw| serde_json::from_str::<OperatingHours>(&raw))
        .transpose()
        .map_err(|e| RepositoryError::Decode(format!("operating hours: {e}")))?;
    let knowledge_config = serde_json::from_str::<KnowledgeConfig>(&knowledge_json)
        .map_err(|e| RepositoryError::Decode(format!("knowledge config: {e}")))?;

    Ok(Tenant {
        id: TenantId(id),
        name: get(row, "name")?,
        operating_hours,
        average_daily_rate: parse_decimal(&adr)?,
        knowledge_config,
        created_at: parse_timestamp(&created_at)?,
        deleted_at: parse_optional_timestamp(deleted_at)?,
    })
}

#[async_trait::async_trait]
impl TenantRepository for SqlTenantRepository {
    async fn find(&self, scope: &TenantScope) -> Result<Option<Tenant>, RepositoryError> {
        let sql =
            format!("SELECT {TENANT_COLUMNS} FROM tenant WHERE id = ? AND deleted_at IS NULL");
        let row = sqlx::query(&sql).bind(scope.as_str()).fetch_optional(&self.pool).await?;

        match row {
            Some(ref r) => {
                let tenant = row_to_tenant(r)?;
                scope.admit(&tenant.id.0)?;
                Ok(Some(tenant))
            }
            None => Ok(None),
        }
    }

    async fn create(&self, admin: &AdminScope, tenant: Tenant) -> Result<(), RepositoryError> {
        let scope = admin.scope_for(tenant.id.clone());
        let hours_json = tenant
            .operating_hours
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let knowledge_json = serde_json::to_string(&tenant.knowledge_config)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        sqlx::query(
            "INSERT INTO tenant (id, name, operating_hours_json, average_daily_rate,
                                 knowledge_config_json, created_at, deleted_at)
             VALUES (?, ?, ?, ?, ?, ?, NULL)",
        )
        .bind(&tenant.id.0)
        .bind(&tenant.name)
        .bind(&hours_json)
        .bind(tenant.average_daily_rate.to_string())
        .bind(&knowledge_json)
        .bind(format_timestamp(&tenant.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(&scope, e))?;

        tracing::info!(
            event_name = "db.tenant.created",
            tenant_id = %tenant.id,
            actor = %admin.actor(),
            "tenant created"
        );
        Ok(())
    }

    async fn list(&self, admin: &AdminScope) -> Result<Vec<Tenant>, RepositoryError> {
        let sql = format!(
            "SELECT {TENANT_COLUMNS} FROM tenant WHERE deleted_at IS NULL ORDER BY created_at, name"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        tracing::debug!(
            event_name = "db.tenant.listed",
            actor = %admin.actor(),
            count = rows.len(),
            "tenants listed"
        );
        rows.iter().map(row_to_tenant).collect()
    }

    async fn soft_delete(
        &self,
        admin: &AdminScope,
        id: &TenantId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result =
            sqlx::query("UPDATE tenant SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
                .bind(format_timestamp(&at))
                .bind(&id.0)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound { entity: "tenant", id: id.0.clone() });
        }
        tracing::info!(
            event_name = "db.tenant.soft_deleted",
            tenant_id = %id,
            actor = %admin.actor(),
            "tenant soft-deleted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use concierge_core::{KnowledgeConfig, OperatingHours, Tenant};

    use super::SqlTenantRepository;
    use crate::repositories::test_support::setup;
    use crate::repositories::{RepositoryError, TenantRepository};
    use crate::scope::{AdminScope, TenantScope};

    fn admin() -> AdminScope {
        AdminScope::new("ops@test")
    }

    #[tokio::test]
    async fn create_and_find_round_trip() {
        let repo = SqlTenantRepository::new(setup().await);
        let mut tenant = Tenant::new("Hotel X", Decimal::new(23000, 2));
        tenant.operating_hours = Some(OperatingHours::default());
        tenant.knowledge_config = KnowledgeConfig { relevance_threshold: Some(0.25) };

        repo.create(&admin(), tenant.clone()).await.expect("create");
        let found = repo
            .find(&TenantScope::new(tenant.id.clone()))
            .await
            .expect("find")
            .expect("tenant should exist");

        assert_eq!(found.name, "Hotel X");
        assert_eq!(found.average_daily_rate, Decimal::new(23000, 2));
        assert_eq!(found.operating_hours, Some(OperatingHours::default()));
        assert_eq!(found.knowledge_config.relevance_threshold, Some(0.25));
    }

    #[tokio::test]
    async fn soft_deleted_tenant_is_hidden_but_kept() {
        let pool = setup().await;
        let repo = SqlTenantRepository::new(pool.clone());
        let tenant = Tenant::new("Hotel Y", Decimal::new(180, 0));
        repo.create(&admin(), tenant.clone()).await.expect("create");

        repo.soft_delete(&admin(), &tenant.id, Utc::now()).await.expect("soft delete");

        assert!(repo.find(&TenantScope::new(tenant.id.clone())).await.expect("find").is_none());
        assert!(repo.list(&admin()).await.expect("list").is_empty());

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tenant")
            .fetch_one(&pool)
            .await
            .expect("count");
        assert_eq!(remaining, 1, "soft delete must keep the row");

        let again = repo.soft_delete(&admin(), &tenant.id, Utc::now()).await;
        assert!(matches!(again, Err(RepositoryError::NotFound { .. })));
    }

    #[tokio::test]
    async fn tenant_rows_cannot_be_hard_deleted() {
        let pool = setup().await;
        let repo = SqlTenantRepository::new(pool.clone());
        let tenant = Tenant::new("Hotel Z", Decimal::new(150, 0));
        repo.create(&admin(), tenant.clone()).await.expect("create");

        let result = sqlx::query("DELETE FROM tenant WHERE id = ?")
            .bind(&tenant.id.0)
            .execute(&pool)
            .await;
        assert!(result.is_err(), "hard delete must be rejected by the schema");
    }

    #[tokio::test]
    async fn duplicate_tenant_id_is_a_conflict() {
        let repo = SqlTenantRepository::new(setup().await);
        let tenant = Tenant::new("Hotel X", Decimal::new(230, 0));
        repo.create(&admin(), tenant.clone()).await.expect("create");

        let result = repo.create(&admin(), tenant).await;
        assert!(matches!(result, Err(RepositoryError::Conflict(_))));
    }
}
