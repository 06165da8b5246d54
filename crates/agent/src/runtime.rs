//! The conversation engine: one call per inbound guest message.
//!
//! `process_guest_message` runs sanitise, resolve, persist, classify,
//! retrieve and assemble, complete, persist, capture lead and hand off, in
//! that order. No database transaction is held across the completion call.
//! Staff overrides live here too so every state change is audited the same
//! way.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use concierge_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use concierge_core::config::AppConfig;
use concierge_core::{
    Channel, Conversation, ConversationId, ConversationStatus, DocumentInput, DomainError,
    ErrorClass, InboundMessage, Lead, LeadId, LeadStatus, Message, MessageMetadata, MessageRole,
    Mode, ScoredDocument, Tenant, TenantId,
};
use concierge_db::{Repositories, RepositoryError, TenantScope};

use crate::context::{ContextAssembler, ContextError, ContextInput};
use crate::conversation::IntentClassifier;
use crate::guardrails::Sanitizer;
use crate::knowledge::{KnowledgeBase, KnowledgeError};
use crate::leads::{ExtractionError, LeadExtractor};
use crate::llm::{CompletionProvider, CompletionRequest, EmbeddingProvider, ProviderError};
use crate::notify::HandoffNotice;
use crate::session::SessionResolver;

const ENGINE_ACTOR: &str = "conversation-engine";
const SUMMARY_GUEST_TURNS: usize = 3;
const SUMMARY_MAX_CHARS: usize = 500;
/// Stands in for a guest message with no usable text (media only, whitespace, stripped markup).
pub const EMPTY_MESSAGE_PLACEHOLDER: &str = "(empty message)";

/// Runtime knobs, built once from [`AppConfig`] and handed to the engine.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineSettings {
    pub top_k: usize,
    pub relevance_threshold: f32,
    pub history_turns: usize,
    pub max_message_chars: usize,
    pub reply_max_tokens: u32,
    pub reply_temperature: f32,
    pub extraction_max_tokens: u32,
    pub completion_timeout: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            relevance_threshold: config.retrieval.relevance_threshold,
            history_turns: config.retrieval.history_turns,
            max_message_chars: config.engine.max_message_chars,
            reply_max_tokens: config.engine.reply_max_tokens,
            reply_temperature: config.engine.reply_temperature,
            extraction_max_tokens: config.engine.extraction_max_tokens,
            completion_timeout: Duration::from_secs(config.llm.timeout_secs),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("tenant `{0}` not found")]
    TenantNotFound(TenantId),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("completion failed: {0}")]
    Completion(#[from] ProviderError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Knowledge(#[from] KnowledgeError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Context(#[from] ContextError),
}

fn repository_class(error: &RepositoryError) -> ErrorClass {
    match error {
        RepositoryError::TenantIsolation { .. } => ErrorClass::IsolationViolation,
        RepositoryError::NotFound { .. } => ErrorClass::NotFound,
        RepositoryError::Decode(_) => ErrorClass::InvariantViolation,
        RepositoryError::Database(_) | RepositoryError::Conflict(_) => ErrorClass::Capability,
    }
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::TenantNotFound(_) | Self::NotFound { .. } => ErrorClass::NotFound,
            Self::Completion(_) => ErrorClass::Capability,
            Self::Extraction(_) => ErrorClass::Extraction,
            Self::Knowledge(KnowledgeError::Repository(error)) | Self::Repository(error) => {
                repository_class(error)
            }
            Self::Knowledge(KnowledgeError::InvalidDocument { .. }) => ErrorClass::Input,
            Self::Knowledge(KnowledgeError::Embedding(_))
            | Self::Knowledge(KnowledgeError::DimensionMismatch { .. }) => ErrorClass::Capability,
            Self::Domain(DomainError::InvalidConversationTransition { .. }) => ErrorClass::Input,
            Self::Domain(DomainError::InvariantViolation(_)) | Self::Context(_) => {
                ErrorClass::InvariantViolation
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }

    /// What a channel adapter should send the guest instead of a reply.
    pub fn guest_message(&self) -> &'static str {
        self.class().guest_message()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EngineReply {
    pub reply: String,
    pub conversation_id: ConversationId,
    pub mode: Mode,
    pub is_after_hours: bool,
    pub lead_created: bool,
    pub response_time_ms: u64,
    pub tokens_used: Option<u32>,
    /// Present when this message moved the conversation to staff.
    pub handoff: Option<HandoffNotice>,
}

pub struct ConversationEngine {
    repositories: Repositories,
    completion: Arc<dyn CompletionProvider>,
    knowledge: KnowledgeBase,
    sessions: SessionResolver,
    classifier: IntentClassifier,
    sanitizer: Sanitizer,
    assembler: ContextAssembler,
    extractor: LeadExtractor,
    audit: Arc<dyn AuditSink>,
    settings: EngineSettings,
}

impl ConversationEngine {
    pub fn new(
        repositories: Repositories,
        completion: Arc<dyn CompletionProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: EngineSettings,
    ) -> Result<Self, EngineError> {
        let knowledge = KnowledgeBase::new(
            repositories.knowledge.clone(),
            embedder,
            settings.relevance_threshold,
        );
        let extractor = LeadExtractor::new(
            completion.clone(),
            settings.extraction_max_tokens,
            settings.completion_timeout,
        );

        Ok(Self {
            sessions: SessionResolver::new(repositories.conversations.clone()),
            classifier: IntentClassifier::new(),
            sanitizer: Sanitizer::new(settings.max_message_chars),
            assembler: ContextAssembler::new(settings.history_turns)?,
            knowledge,
            extractor,
            repositories,
            completion,
            audit: Arc::new(TracingAuditSink),
            settings,
        })
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    async fn load_tenant(&self, scope: &TenantScope) -> Result<Tenant, EngineError> {
        self.repositories
            .tenants
            .find(scope)
            .await?
            .ok_or_else(|| EngineError::TenantNotFound(scope.tenant_id().clone()))
    }

    async fn load_conversation(
        &self,
        scope: &TenantScope,
        id: &ConversationId,
    ) -> Result<Conversation, EngineError> {
        self.repositories.conversations.find_by_id(scope, id).await?.ok_or_else(|| {
            EngineError::NotFound { entity: "conversation", id: id.0.clone() }
        })
    }

    /// Entry point for channel adapters.
    pub async fn handle_inbound(
        &self,
        tenant_id: &TenantId,
        inbound: InboundMessage,
    ) -> Result<EngineReply, EngineError> {
        self.process_guest_message(
            tenant_id,
            inbound.channel,
            &inbound.guest_identifier,
            &inbound.content,
            inbound.guest_name.as_deref(),
        )
        .await
    }

    pub async fn process_guest_message(
        &self,
        tenant_id: &TenantId,
        channel: Channel,
        guest_identifier: &str,
        text: &str,
        guest_name: Option<&str>,
    ) -> Result<EngineReply, EngineError> {
        let scope = TenantScope::new(tenant_id.clone());
        let tenant = self.load_tenant(&scope).await?;

        let sanitized = self.sanitizer.sanitize(text);
        if sanitized.was_modified() {
            tracing::warn!(
                event_name = "engine.guest_message.sanitized",
                tenant_id = %tenant_id,
                truncated = sanitized.truncated,
                delimiters_removed = sanitized.delimiters_removed,
                redactions = sanitized.redactions,
                "guest message was altered before use"
            );
        }
        let content = if sanitized.text.is_empty() {
            tracing::warn!(
                event_name = "engine.guest_message.empty",
                tenant_id = %tenant_id,
                "guest message had no usable text; continuing with a placeholder"
            );
            EMPTY_MESSAGE_PLACEHOLDER.to_string()
        } else {
            sanitized.text
        };

        let now = Utc::now();
        let session =
            self.sessions.resolve(&scope, &tenant, channel, guest_identifier, now).await?;
        if session.created {
            self.audit.emit(
                audit_event(
                    tenant_id,
                    Some(&session.conversation),
                    "conversation.created",
                    AuditCategory::Session,
                    ENGINE_ACTOR,
                    AuditOutcome::Success,
                )
                .with_metadata("channel", channel.as_str().to_string()),
            );
        }
        let conversation = self
            .repositories
            .conversations
            .record_guest_activity(&scope, &session.conversation.id, now, guest_name)
            .await?;

        self.repositories
            .messages
            .append(
                &scope,
                Message::new(
                    conversation.id.clone(),
                    tenant_id.clone(),
                    MessageRole::Guest,
                    content.clone(),
                    MessageMetadata { channel: Some(channel), ..MessageMetadata::default() },
                ),
            )
            .await?;

        let previous_mode = conversation.mode;
        let mode = match self.classifier.classify(&content) {
            Some(signal) => {
                self.repositories
                    .conversations
                    .apply_mode_signal(&scope, &conversation.id, signal)
                    .await?
            }
            None => previous_mode,
        };
        if mode != previous_mode {
            tracing::info!(
                event_name = "engine.mode.changed",
                tenant_id = %tenant_id,
                conversation_id = %conversation.id,
                from = %previous_mode,
                to = %mode,
                "conversation mode changed"
            );
            self.audit.emit(
                audit_event(
                    tenant_id,
                    Some(&conversation),
                    "conversation.mode_changed",
                    AuditCategory::Mode,
                    ENGINE_ACTOR,
                    AuditOutcome::Success,
                )
                .with_metadata("from", previous_mode.to_string())
                .with_metadata("to", mode.to_string()),
            );
        }

        let grounding = self.retrieve(&scope, &tenant, &conversation, &content).await?;
        let history = self
            .repositories
            .messages
            .recent(
                &scope,
                &conversation.id,
                u32::try_from(self.assembler.history_turns()).unwrap_or(u32::MAX),
            )
            .await?;
        let assembled = self.assembler.assemble(ContextInput {
            tenant: &tenant,
            conversation: &conversation,
            mode,
            grounding: &grounding,
            history: &history,
        })?;

        let request = CompletionRequest {
            system_prompt: assembled.system_prompt,
            messages: assembled.messages,
            max_tokens: self.settings.reply_max_tokens,
            temperature: self.settings.reply_temperature,
        };
        let started = Instant::now();
        let completion =
            match tokio::time::timeout(self.settings.completion_timeout, self.completion.complete(request))
                .await
            {
                Ok(Ok(completion)) => completion,
                Ok(Err(error)) => return Err(self.completion_failed(&conversation, error)),
                Err(_) => {
                    let error = ProviderError::Timeout(self.settings.completion_timeout.as_secs());
                    return Err(self.completion_failed(&conversation, error));
                }
            };
        let response_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let tokens_used = completion.usage.map(|usage| usage.total());
        let reply = completion.text.trim().to_string();

        self.repositories
            .messages
            .append(
                &scope,
                Message::new(
                    conversation.id.clone(),
                    tenant_id.clone(),
                    MessageRole::Ai,
                    reply.clone(),
                    MessageMetadata {
                        channel: Some(channel),
                        response_time_ms: Some(response_time_ms),
                        tokens_used,
                        mode: Some(mode),
                        model: completion.model,
                    },
                ),
            )
            .await?;

        tracing::info!(
            event_name = "engine.reply.generated",
            tenant_id = %tenant_id,
            conversation_id = %conversation.id,
            mode = %mode,
            grounded = assembled.grounded,
            response_time_ms,
            reply_chars = reply.chars().count(),
            "reply generated"
        );

        let lead_created = if mode == Mode::LeadCapture {
            self.capture_lead(&scope, &tenant, &conversation).await?
        } else {
            false
        };

        let handoff = if mode == Mode::Handoff {
            Some(self.hand_off(&scope, &conversation, &history).await?)
        } else {
            None
        };

        Ok(EngineReply {
            reply,
            conversation_id: conversation.id,
            mode,
            is_after_hours: conversation.is_after_hours,
            lead_created,
            response_time_ms,
            tokens_used,
            handoff,
        })
    }

    fn completion_failed(&self, conversation: &Conversation, error: ProviderError) -> EngineError {
        tracing::error!(
            event_name = "engine.reply.failed",
            tenant_id = %conversation.tenant_id,
            conversation_id = %conversation.id,
            error = %error,
            "completion provider failed"
        );
        EngineError::Completion(error)
    }

    /// Grounding for the reply. Anything but an isolation violation degrades
    /// to no grounding so the guest still gets an answer.
    async fn retrieve(
        &self,
        scope: &TenantScope,
        tenant: &Tenant,
        conversation: &Conversation,
        query: &str,
    ) -> Result<Vec<ScoredDocument>, EngineError> {
        match self.knowledge.search(scope, tenant, query, self.settings.top_k).await {
            Ok(documents) => Ok(documents),
            Err(KnowledgeError::Repository(error)) if error.is_isolation_violation() => {
                Err(error.into())
            }
            Err(error) => {
                tracing::warn!(
                    event_name = "engine.retrieval.degraded",
                    tenant_id = %tenant.id,
                    conversation_id = %conversation.id,
                    error = %error,
                    "knowledge search failed; replying without grounding"
                );
                Ok(Vec::new())
            }
        }
    }

    /// Best effort. Only an isolation violation escapes.
    async fn capture_lead(
        &self,
        scope: &TenantScope,
        tenant: &Tenant,
        conversation: &Conversation,
    ) -> Result<bool, EngineError> {
        match self.try_capture_lead(scope, tenant, conversation).await {
            Ok(created) => Ok(created),
            Err(EngineError::Repository(error)) if error.is_isolation_violation() => {
                Err(error.into())
            }
            Err(error) => {
                tracing::warn!(
                    event_name = "lead.extraction.failed",
                    tenant_id = %tenant.id,
                    conversation_id = %conversation.id,
                    error = %error,
                    "lead capture failed; reply is unaffected"
                );
                self.audit.emit(
                    audit_event(
                        &tenant.id,
                        Some(conversation),
                        "lead.extraction_failed",
                        AuditCategory::Lead,
                        ENGINE_ACTOR,
                        AuditOutcome::Failed,
                    )
                    .with_metadata("error_class", error.class().to_string()),
                );
                Ok(false)
            }
        }
    }

    async fn try_capture_lead(
        &self,
        scope: &TenantScope,
        tenant: &Tenant,
        conversation: &Conversation,
    ) -> Result<bool, EngineError> {
        let leads = &self.repositories.leads;
        if leads.find_by_conversation(scope, &conversation.id).await?.is_some() {
            return Ok(false);
        }

        let transcript = self.repositories.messages.transcript(scope, &conversation.id).await?;
        let lead = match self.extractor.extract(tenant, conversation, &transcript).await {
            Ok(Some(lead)) => lead,
            Ok(None) => {
                tracing::info!(
                    event_name = "lead.extraction.skipped",
                    tenant_id = %tenant.id,
                    conversation_id = %conversation.id,
                    "no contact details yet"
                );
                self.audit.emit(
                    audit_event(
                        &tenant.id,
                        Some(conversation),
                        "lead.extraction_skipped",
                        AuditCategory::Lead,
                        ENGINE_ACTOR,
                        AuditOutcome::Skipped,
                    ),
                );
                return Ok(false);
            }
            Err(error) => return Err(error.into()),
        };

        let guest_name = lead.guest_name.clone();
        let value = lead.estimated_value;
        let intent = lead.intent;
        let lead_id = lead.id.clone();
        if !leads.insert_if_absent(scope, lead).await? {
            // a concurrent message already captured one
            return Ok(false);
        }
        if let Some(name) = guest_name.as_deref() {
            self.repositories.conversations.fill_guest_name(scope, &conversation.id, name).await?;
        }

        tracing::info!(
            event_name = "lead.created",
            tenant_id = %tenant.id,
            conversation_id = %conversation.id,
            lead_id = %lead_id,
            intent = intent.as_str(),
            "lead captured"
        );
        self.audit.emit(
            audit_event(
                &tenant.id,
                Some(conversation),
                "lead.created",
                AuditCategory::Lead,
                ENGINE_ACTOR,
                AuditOutcome::Success,
            )
            .with_metadata("lead_id", lead_id.0)
            .with_metadata("intent", intent.as_str().to_string())
            .with_metadata("estimated_value", value.to_string()),
        );
        Ok(true)
    }

    async fn hand_off(
        &self,
        scope: &TenantScope,
        conversation: &Conversation,
        history: &[Message],
    ) -> Result<HandoffNotice, EngineError> {
        let handed_off = if conversation.status == ConversationStatus::HandedOff {
            conversation.clone()
        } else {
            let updated = self
                .repositories
                .conversations
                .set_state(scope, &conversation.id, Mode::Handoff, ConversationStatus::HandedOff, None)
                .await?;
            tracing::info!(
                event_name = "engine.conversation.handed_off",
                tenant_id = %conversation.tenant_id,
                conversation_id = %conversation.id,
                "conversation handed off to staff"
            );
            self.audit.emit(
                audit_event(
                    &conversation.tenant_id,
                    Some(conversation),
                    "conversation.handed_off",
                    AuditCategory::Mode,
                    ENGINE_ACTOR,
                    AuditOutcome::Success,
                ),
            );
            updated
        };

        Ok(HandoffNotice {
            tenant_id: handed_off.tenant_id.clone(),
            conversation_id: handed_off.id.clone(),
            guest_identifier: handed_off.guest_identifier.clone(),
            guest_name: handed_off.guest_name.clone(),
            channel: handed_off.channel,
            summary: summarize(history),
        })
    }

    /// Replaces a tenant's knowledge base with `documents`.
    pub async fn ingest(
        &self,
        tenant_id: &TenantId,
        documents: Vec<DocumentInput>,
        actor: &str,
    ) -> Result<usize, EngineError> {
        let scope = TenantScope::new(tenant_id.clone());
        self.load_tenant(&scope).await?;
        let count = self.knowledge.replace_documents(&scope, documents).await?;
        self.audit.emit(
            audit_event(
                tenant_id,
                None,
                "knowledge.replaced",
                AuditCategory::Knowledge,
                actor,
                AuditOutcome::Success,
            )
            .with_metadata("documents", count.to_string()),
        );
        Ok(count)
    }

    /// Closes a conversation; the guest's next message starts a new one.
    pub async fn resolve_conversation(
        &self,
        tenant_id: &TenantId,
        conversation_id: &ConversationId,
        actor: &str,
    ) -> Result<Conversation, EngineError> {
        self.staff_transition(tenant_id, conversation_id, actor, ConversationStatus::Resolved, None)
            .await
    }

    pub async fn force_handoff(
        &self,
        tenant_id: &TenantId,
        conversation_id: &ConversationId,
        actor: &str,
    ) -> Result<Conversation, EngineError> {
        self.staff_transition(
            tenant_id,
            conversation_id,
            actor,
            ConversationStatus::HandedOff,
            Some(Mode::Handoff),
        )
        .await
    }

    /// Puts the AI back in charge. Fails with a conflict when the guest has
    /// since started another active conversation.
    pub async fn reactivate(
        &self,
        tenant_id: &TenantId,
        conversation_id: &ConversationId,
        actor: &str,
    ) -> Result<Conversation, EngineError> {
        self.staff_transition(
            tenant_id,
            conversation_id,
            actor,
            ConversationStatus::Active,
            Some(Mode::Concierge),
        )
        .await
    }

    async fn staff_transition(
        &self,
        tenant_id: &TenantId,
        conversation_id: &ConversationId,
        actor: &str,
        status: ConversationStatus,
        mode: Option<Mode>,
    ) -> Result<Conversation, EngineError> {
        let scope = TenantScope::new(tenant_id.clone());
        self.load_tenant(&scope).await?;
        let mut conversation = self.load_conversation(&scope, conversation_id).await?;
        let from = conversation.status;
        conversation.transition_to(status)?;

        let ended_at = (status == ConversationStatus::Resolved).then(Utc::now);
        let mode = mode.unwrap_or(conversation.mode);
        let updated = self
            .repositories
            .conversations
            .set_state(&scope, conversation_id, mode, status, ended_at)
            .await?;

        tracing::info!(
            event_name = "staff.conversation.updated",
            tenant_id = %tenant_id,
            conversation_id = %conversation_id,
            from = from.as_str(),
            to = status.as_str(),
            "staff changed conversation status"
        );
        self.audit.emit(
            audit_event(
                tenant_id,
                Some(&updated),
                "staff.conversation_status_changed",
                AuditCategory::Staff,
                actor,
                AuditOutcome::Success,
            )
            .with_metadata("from", from.as_str().to_string())
            .with_metadata("to", status.as_str().to_string()),
        );
        Ok(updated)
    }

    pub async fn update_lead(
        &self,
        tenant_id: &TenantId,
        lead_id: &LeadId,
        status: Option<LeadStatus>,
        notes: Option<String>,
        actor: &str,
    ) -> Result<Lead, EngineError> {
        let scope = TenantScope::new(tenant_id.clone());
        self.load_tenant(&scope).await?;
        if self.repositories.leads.find_by_id(&scope, lead_id).await?.is_none() {
            return Err(EngineError::NotFound { entity: "lead", id: lead_id.0.clone() });
        }
        let lead = self.repositories.leads.update(&scope, lead_id, status, notes).await?;

        self.audit.emit(
            audit_event(
                tenant_id,
                None,
                "staff.lead_updated",
                AuditCategory::Staff,
                actor,
                AuditOutcome::Success,
            )
            .with_metadata("lead_id", lead_id.0.clone())
            .with_metadata("status", lead.status.as_str().to_string()),
        );
        Ok(lead)
    }

    pub async fn leads(
        &self,
        tenant_id: &TenantId,
        status: Option<LeadStatus>,
    ) -> Result<Vec<Lead>, EngineError> {
        let scope = TenantScope::new(tenant_id.clone());
        self.load_tenant(&scope).await?;
        Ok(self.repositories.leads.list(&scope, status).await?)
    }

    pub async fn conversations(
        &self,
        tenant_id: &TenantId,
        status: Option<ConversationStatus>,
        limit: u32,
    ) -> Result<Vec<Conversation>, EngineError> {
        let scope = TenantScope::new(tenant_id.clone());
        self.load_tenant(&scope).await?;
        Ok(self.repositories.conversations.list(&scope, status, limit).await?)
    }
}

fn audit_event(
    tenant_id: &TenantId,
    conversation: Option<&Conversation>,
    event_type: &str,
    category: AuditCategory,
    actor: &str,
    outcome: AuditOutcome,
) -> AuditEvent {
    AuditEvent::new(
        tenant_id.clone(),
        conversation.map(|c| c.id.clone()),
        event_type,
        category,
        actor,
        outcome,
    )
}

/// The latest guest turns, oldest first, for the staff notice.
fn summarize(history: &[Message]) -> String {
    let mut guest_turns: Vec<&str> = history
        .iter()
        .rev()
        .filter(|message| message.role == MessageRole::Guest)
        .take(SUMMARY_GUEST_TURNS)
        .map(|message| message.content.as_str())
        .collect();
    guest_turns.reverse();

    let summary = format!("Guest wrote: {}", guest_turns.join(" / "));
    if summary.chars().count() <= SUMMARY_MAX_CHARS {
        return summary;
    }
    let mut truncated: String = summary.chars().take(SUMMARY_MAX_CHARS - 3).collect();
    truncated.push_str("...");
    truncated
}
