//! Per-tenant knowledge base: bulk ingest and exact cosine-distance search.

use std::sync::Arc;

use thiserror::Error;

use concierge_core::{DocumentInput, KnowledgeDocument, ScoredDocument, Tenant};
use concierge_db::repositories::KnowledgeRepository;
use concierge_db::{RepositoryError, TenantScope};

use crate::llm::{EmbeddingProvider, ProviderError};

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] ProviderError),
    #[error("embedding has {actual} dimensions, deployment expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("document {index} is invalid: {reason}")]
    InvalidDocument { index: usize, reason: String },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Cosine distance `1 - cos(a, b)`, in `[0, 2]`.
///
/// Returns `None` for vectors of different length or with zero magnitude.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    let similarity = (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0);
    Some(1.0 - similarity)
}

/// Keeps documents within `threshold`, closest first, ties in stored order.
pub fn rank_documents(
    query: &[f32],
    documents: Vec<KnowledgeDocument>,
    threshold: f32,
    limit: usize,
) -> Vec<ScoredDocument> {
    let mut scored: Vec<ScoredDocument> = documents
        .into_iter()
        .filter_map(|document| {
            let distance = cosine_distance(query, &document.embedding)?;
            (distance <= threshold).then_some(ScoredDocument { document, distance })
        })
        .collect();
    scored.sort_by(|left, right| left.distance.total_cmp(&right.distance));
    scored.truncate(limit);
    scored
}

pub struct KnowledgeBase {
    repository: Arc<dyn KnowledgeRepository>,
    embedder: Arc<dyn EmbeddingProvider>,
    relevance_threshold: f32,
}

impl KnowledgeBase {
    pub fn new(
        repository: Arc<dyn KnowledgeRepository>,
        embedder: Arc<dyn EmbeddingProvider>,
        relevance_threshold: f32,
    ) -> Self {
        Self { repository, embedder, relevance_threshold }
    }

    pub fn threshold_for(&self, tenant: &Tenant) -> f32 {
        tenant.knowledge_config.relevance_threshold.unwrap_or(self.relevance_threshold)
    }

    /// Replaces the tenant's document set with `inputs`.
    ///
    /// Every document is embedded before the store is touched, so a provider
    /// failure leaves the previous set in place.
    pub async fn replace_documents(
        &self,
        scope: &TenantScope,
        inputs: Vec<DocumentInput>,
    ) -> Result<usize, KnowledgeError> {
        let expected = self.embedder.dimensions();
        let mut documents = Vec::with_capacity(inputs.len());

        for (index, input) in inputs.into_iter().enumerate() {
            if input.title.trim().is_empty() && input.content.trim().is_empty() {
                return Err(KnowledgeError::InvalidDocument {
                    index,
                    reason: "title and content are both empty".to_string(),
                });
            }
            let embedding = self.embedder.embed(&input.embedding_text()).await?;
            if embedding.len() != expected {
                return Err(KnowledgeError::DimensionMismatch { expected, actual: embedding.len() });
            }
            documents.push(KnowledgeDocument::from_input(scope.tenant_id().clone(), input, embedding));
        }

        let count = self.repository.replace_all(scope, documents).await?;
        tracing::info!(
            event_name = "knowledge.ingest.completed",
            tenant_id = %scope.tenant_id(),
            documents = count,
            "knowledge base ingested"
        );
        Ok(count)
    }

    pub async fn search(
        &self,
        scope: &TenantScope,
        tenant: &Tenant,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ScoredDocument>, KnowledgeError> {
        if limit == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let embedding = self.embedder.embed(query).await?;
        let documents = self.repository.list(scope).await?;
        let candidates = documents.len();
        let threshold = self.threshold_for(tenant);
        let results = rank_documents(&embedding, documents, threshold, limit);

        tracing::debug!(
            event_name = "knowledge.search.completed",
            tenant_id = %scope.tenant_id(),
            candidates,
            returned = results.len(),
            threshold,
            "knowledge search finished"
        );
        Ok(results)
    }
}
