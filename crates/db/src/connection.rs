use std::time::Duration;

use concierge_core::config::DatabaseConfig;
use sqlx::sqlite::SqlitePoolOptions;

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&config.url, config.max_connections, config.timeout_secs).await
}

pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let url = normalize_url(database_url);
    tracing::debug!(
        event_name = "db.pool.connecting",
        max_connections,
        timeout_secs,
        "opening sqlite pool"
    );

    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(&url)
        .await
}

/// File URLs get `mode=rwc` so a fresh deployment creates its database.
fn normalize_url(database_url: &str) -> String {
    let url = database_url.trim();
    if url == ":memory:" {
        return "sqlite::memory:".to_string();
    }
    if url.starts_with("sqlite://") && !url.contains("memory") && !url.contains('?') {
        return format!("{url}?mode=rwc");
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::normalize_url;

    #[test]
    fn file_urls_are_created_on_first_connect() {
        assert_eq!(normalize_url("sqlite://concierge.db"), "sqlite://concierge.db?mode=rwc");
        assert_eq!(normalize_url("sqlite://concierge.db?mode=ro"), "sqlite://concierge.db?mode=ro");
    }

    #[test]
    fn memory_urls_are_left_alone() {
        assert_eq!(normalize_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(normalize_url(":memory:"), "sqlite::memory:");
    }
}
