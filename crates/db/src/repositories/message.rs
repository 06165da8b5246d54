use sqlx::sqlite::SqliteRow;

use concierge_core::{ConversationId, Message, MessageId, MessageMetadata, MessageRole, TenantId};

use super::rows::{
    ensure_owned, format_timestamp, get, map_write_error, parse_enum, parse_timestamp, OwnedTable,
};
use super::{MessageRepository, RepositoryError};
use crate::scope::TenantScope;
use crate::DbPool;

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_message(row: &SqliteRow) -> Result<Message, RepositoryError> {
    let role: String = get(row, "role")?;
    let metadata_json: String = get(row, "metadata_json")?;
    let sent_at: String = get(row, "sent_at")?;

    let metadata = serde_json::from_str::<MessageMetadata>(&metadata_json)
        .map_err(|e| RepositoryError::Decode(format!("message metadata: {e}")))?;

    Ok(Message {
        id: MessageId(get(row, "id")?),
        conversation_id: ConversationId(get(row, "conversation_id")?),
        tenant_id: TenantId(get(row, "tenant_id")?),
        role: parse_enum(&role, "message role", MessageRole::parse)?,
        content: get(row, "content")?,
        metadata,
        sent_at: parse_timestamp(&sent_at)?,
    })
}

fn admitted(scope: &TenantScope, rows: &[SqliteRow]) -> Result<Vec<Message>, RepositoryError> {
    rows.iter()
        .map(|row| {
            let message = row_to_message(row)?;
            scope.admit(&message.tenant_id.0)?;
            Ok(message)
        })
        .collect()
}

#[async_trait::async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn append(&self, scope: &TenantScope, message: Message) -> Result<(), RepositoryError> {
        scope.admit(&message.tenant_id.0)?;
        ensure_owned(&self.pool, OwnedTable::Conversation, &message.conversation_id.0, scope)
            .await?;

        let metadata_json = serde_json::to_string(&message.metadata)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        sqlx::query(
            "INSERT INTO message (id, conversation_id, tenant_id, role, content, metadata_json, sent_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id.0)
        .bind(&message.conversation_id.0)
        .bind(scope.as_str())
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(&metadata_json)
        .bind(format_timestamp(&message.sent_at))
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(scope, e))?;

        Ok(())
    }

    async fn recent(
        &self,
        scope: &TenantScope,
        conversation_id: &ConversationId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        ensure_owned(&self.pool, OwnedTable::Conversation, &conversation_id.0, scope).await?;

        let rows = sqlx::query(
            "SELECT id, conversation_id, tenant_id, role, content, metadata_json, sent_at
             FROM message
             WHERE conversation_id = ? AND tenant_id = ?
             ORDER BY sent_at DESC, rowid DESC
             LIMIT ?",
        )
        .bind(&conversation_id.0)
        .bind(scope.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut messages = admitted(scope, &rows)?;
        messages.reverse();
        Ok(messages)
    }

    async fn transcript(
        &self,
        scope: &TenantScope,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, RepositoryError> {
        ensure_owned(&self.pool, OwnedTable::Conversation, &conversation_id.0, scope).await?;

        let rows = sqlx::query(
            "SELECT id, conversation_id, tenant_id, role, content, metadata_json, sent_at
             FROM message
             WHERE conversation_id = ? AND tenant_id = ?
             ORDER BY sent_at ASC, rowid ASC",
        )
        .bind(&conversation_id.0)
        .bind(scope.as_str())
        .fetch_all(&self.pool)
        .await?;

        admitted(scope, &rows)
    }
}
