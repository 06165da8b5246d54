use sqlx::sqlite::SqliteRow;

use concierge_core::{DocType, DocumentId, KnowledgeDocument, TenantId};

use super::rows::{
    blob_to_vec, format_timestamp, get, map_write_error, parse_enum, parse_timestamp, vec_to_blob,
};
use super::{KnowledgeRepository, RepositoryError};
use crate::scope::TenantScope;
use crate::DbPool;

pub struct SqlKnowledgeRepository {
    pool: DbPool,
}

impl SqlKnowledgeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_document(row: &SqliteRow) -> Result<KnowledgeDocument, RepositoryError> {
    let doc_type: String = get(row, "doc_type")?;
    let embedding: Vec<u8> = get(row, "embedding")?;
    let embedding_dim: i64 = get(row, "embedding_dim")?;
    let created_at: String = get(row, "created_at")?;

    let embedding = blob_to_vec(&embedding)?;
    if embedding.len() as i64 != embedding_dim {
        return Err(RepositoryError::Decode(format!(
            "embedding has {} values but row declares {embedding_dim}",
            embedding.len()
        )));
    }

    Ok(KnowledgeDocument {
        id: DocumentId(get(row, "id")?),
        tenant_id: TenantId(get(row, "tenant_id")?),
        doc_type: parse_enum(&doc_type, "document type", DocType::parse)?,
        title: get(row, "title")?,
        content: get(row, "content")?,
        embedding,
        created_at: parse_timestamp(&created_at)?,
    })
}

#[async_trait::async_trait]
impl KnowledgeRepository for SqlKnowledgeRepository {
    async fn replace_all(
        &self,
        scope: &TenantScope,
        documents: Vec<KnowledgeDocument>,
    ) -> Result<usize, RepositoryError> {
        for document in &documents {
            scope.admit(&document.tenant_id.0)?;
        }

        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM knowledge_document WHERE tenant_id = ?")
            .bind(scope.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        for document in &documents {
            sqlx::query(
                "INSERT INTO knowledge_document (id, tenant_id, doc_type, title, content,
                                                 embedding, embedding_dim, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&document.id.0)
            .bind(scope.as_str())
            .bind(document.doc_type.as_str())
            .bind(&document.title)
            .bind(&document.content)
            .bind(vec_to_blob(&document.embedding))
            .bind(document.embedding.len() as i64)
            .bind(format_timestamp(&document.created_at))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_write_error(scope, e))?;
        }

        tx.commit().await?;

        tracing::info!(
            event_name = "db.knowledge.replaced",
            tenant_id = %scope.tenant_id(),
            removed,
            inserted = documents.len(),
            "knowledge base replaced"
        );
        Ok(documents.len())
    }

    async fn list(&self, scope: &TenantScope) -> Result<Vec<KnowledgeDocument>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, doc_type, title, content, embedding, embedding_dim, created_at
             FROM knowledge_document
             WHERE tenant_id = ?
             ORDER BY rowid ASC",
        )
        .bind(scope.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let document = row_to_document(row)?;
                scope.admit(&document.tenant_id.0)?;
                Ok(document)
            })
            .collect()
    }
}
