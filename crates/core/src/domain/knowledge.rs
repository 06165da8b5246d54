use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::tenant::TenantId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Rates,
    Rooms,
    Facilities,
    Faqs,
    Directions,
    Policies,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rates => "rates",
            Self::Rooms => "rooms",
            Self::Facilities => "facilities",
            Self::Faqs => "faqs",
            Self::Directions => "directions",
            Self::Policies => "policies",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "rates" => Some(Self::Rates),
            "rooms" => Some(Self::Rooms),
            "facilities" => Some(Self::Facilities),
            "faqs" => Some(Self::Faqs),
            "directions" => Some(Self::Directions),
            "policies" => Some(Self::Policies),
            _ => None,
        }
    }

    pub fn label(&self) -> String {
        self.as_str().to_ascii_uppercase()
    }
}

/// One document as submitted to a knowledge-base upload, before embedding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInput {
    pub doc_type: DocType,
    pub title: String,
    pub content: String,
}

impl DocumentInput {
    pub fn embedding_text(&self) -> String {
        format!("{}\n{}", self.title, self.content)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub id: DocumentId,
    pub tenant_id: TenantId,
    pub doc_type: DocType,
    pub title: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeDocument {
    pub fn from_input(tenant_id: TenantId, input: DocumentInput, embedding: Vec<f32>) -> Self {
        Self {
            id: DocumentId::generate(),
            tenant_id,
            doc_type: input.doc_type,
            title: input.title,
            content: input.content,
            embedding,
            created_at: Utc::now(),
        }
    }
}

/// A retrieved document together with its cosine distance to the query.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredDocument {
    pub document: KnowledgeDocument,
    pub distance: f32,
}
