use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite};

use super::RepositoryError;
use crate::scope::TenantScope;
use crate::DbPool;

pub(crate) fn get<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get::<T, _>(column).map_err(|e| RepositoryError::Decode(e.to_string()))
}

pub(crate) fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("invalid timestamp `{raw}`: {e}")))
}

pub(crate) fn parse_optional_timestamp(
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    raw.as_deref().map(parse_timestamp).transpose()
}

pub(crate) fn parse_decimal(raw: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(raw)
        .map_err(|e| RepositoryError::Decode(format!("invalid decimal `{raw}`: {e}")))
}

pub(crate) fn parse_enum<T>(
    raw: &str,
    what: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, RepositoryError> {
    parse(raw).ok_or_else(|| RepositoryError::Decode(format!("unknown {what} `{raw}`")))
}

/// Little-endian f32 encoding for embedding BLOBs.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn blob_to_vec(blob: &[u8]) -> Result<Vec<f32>, RepositoryError> {
    if blob.len() % 4 != 0 {
        return Err(RepositoryError::Decode(format!(
            "embedding blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Maps constraint failures raised by the schema to typed repository errors.
pub(crate) fn map_write_error(scope: &TenantScope, error: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db) = &error {
        if db.message().contains("tenant_isolation") {
            tracing::error!(
                event_name = "db.tenant_isolation.violation",
                tenant_id = %scope.tenant_id(),
                "schema trigger rejected a cross-tenant write"
            );
            return RepositoryError::TenantIsolation { scope: scope.as_str().to_string() };
        }
        if db.is_unique_violation() {
            return RepositoryError::Conflict(db.message().to_string());
        }
    }
    RepositoryError::Database(error)
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum OwnedTable {
    Conversation,
    Lead,
}

impl OwnedTable {
    fn name(self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::Lead => "lead",
        }
    }
}

/// Looks a record up by id alone and checks its owner, so that an id from
/// another tenant is reported as an isolation violation, never as missing.
pub(crate) async fn ensure_owned(
    pool: &DbPool,
    table: OwnedTable,
    id: &str,
    scope: &TenantScope,
) -> Result<(), RepositoryError> {
    let sql = format!("SELECT tenant_id FROM {} WHERE id = ?", table.name());
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    match row {
        Some(row) => scope.admit(&get::<String>(&row, "tenant_id")?),
        None => Err(RepositoryError::NotFound { entity: table.name(), id: id.to_string() }),
    }
}
