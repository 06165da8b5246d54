//! Structured lead extraction from a conversation transcript.
//!
//! One zero-temperature completion asks the model for a fixed JSON object.
//! The reply is parsed permissively, contact details the channel already
//! carries are backfilled, and the estimated value is always
//! `nights (default 1) x average daily rate`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use concierge_core::{Channel, Conversation, Lead, LeadId, LeadIntent, LeadStatus, Message, Tenant};

use crate::llm::{ChatMessage, CompletionProvider, CompletionRequest, ProviderError};

const EXTRACTION_PROMPT: &str = "Extract guest details from this hotel enquiry. \
Return only a JSON object, without markdown, with these keys: \
guest_name (string or null), guest_email (string or null), guest_phone (string or null), \
intent (one of: room_booking, event, fb_inquiry, general), \
estimated_nights (number or null). Use null for anything the guest has not said.";

/// Longest stay a lead is valued for; larger night counts fall back to one.
pub const MAX_ESTIMATED_NIGHTS: u64 = 365;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("extraction completion failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),
    #[error("extraction reply was not a JSON object: {0}")]
    Malformed(String),
}

/// Fields the model was asked for, all optional.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ExtractedFields {
    #[serde(default)]
    pub guest_name: Option<String>,
    #[serde(default)]
    pub guest_email: Option<String>,
    #[serde(default)]
    pub guest_phone: Option<String>,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub estimated_nights: Option<Value>,
}

impl ExtractedFields {
    /// Night count in `1..=MAX_ESTIMATED_NIGHTS`; strings like `"3"` are accepted too.
    pub fn nights(&self) -> Option<Decimal> {
        let nights = match self.estimated_nights.as_ref()? {
            Value::Number(number) => {
                if let Some(whole) = number.as_u64() {
                    Decimal::from(whole)
                } else {
                    Decimal::try_from(number.as_f64()?).ok()?
                }
            }
            Value::String(raw) => raw.trim().parse::<Decimal>().ok()?,
            _ => return None,
        };
        (nights > Decimal::ZERO && nights <= Decimal::from(MAX_ESTIMATED_NIGHTS)).then_some(nights)
    }
}

/// Parses a model reply into [`ExtractedFields`].
///
/// Tolerates a surrounding code fence and prose before or after the object.
pub fn parse_extraction(raw: &str) -> Result<ExtractedFields, ExtractionError> {
    let trimmed = strip_code_fence(raw.trim());
    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    let object = match (start, end) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => return Err(ExtractionError::Malformed("no JSON object found".to_string())),
    };
    serde_json::from_str(object).map_err(|e| ExtractionError::Malformed(e.to_string()))
}

fn strip_code_fence(raw: &str) -> &str {
    let Some(rest) = raw.strip_prefix("```") else {
        return raw;
    };
    // drop the info string (`json`) on the opening fence line
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty() && v != "null")
}

/// `"{role}: {content}"` per message, oldest first.
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|message| format!("{}: {}", message.role.as_str(), message.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Turns extracted fields into a lead, or `None` when no contact is known.
pub fn build_lead(
    fields: ExtractedFields,
    tenant: &Tenant,
    conversation: &Conversation,
) -> Option<Lead> {
    let nights = fields.nights().unwrap_or(Decimal::ONE);
    let estimated_value = nights
        .checked_mul(tenant.average_daily_rate)
        .unwrap_or(tenant.average_daily_rate)
        .round_dp(2);
    let intent = fields.intent.as_deref().map(LeadIntent::parse_lenient).unwrap_or(LeadIntent::General);
    let guest_name = clean(fields.guest_name);
    let mut guest_phone = clean(fields.guest_phone);
    let mut guest_email = clean(fields.guest_email);

    match conversation.channel {
        Channel::WhatsApp if guest_phone.is_none() => {
            guest_phone = Some(conversation.guest_identifier.clone());
        }
        Channel::Email if guest_email.is_none() => {
            guest_email = Some(conversation.guest_identifier.clone());
        }
        _ => {}
    }

    let lead = Lead {
        id: LeadId::generate(),
        conversation_id: conversation.id.clone(),
        tenant_id: conversation.tenant_id.clone(),
        guest_name,
        guest_phone,
        guest_email,
        intent,
        estimated_value,
        status: LeadStatus::New,
        notes: None,
        captured_at: Utc::now(),
    };
    lead.validate().ok().map(|()| lead)
}

pub struct LeadExtractor {
    provider: Arc<dyn CompletionProvider>,
    max_tokens: u32,
    timeout: Duration,
}

impl LeadExtractor {
    pub fn new(provider: Arc<dyn CompletionProvider>, max_tokens: u32, timeout: Duration) -> Self {
        Self { provider, max_tokens, timeout }
    }

    /// `Ok(None)` means the transcript held no usable contact.
    pub async fn extract(
        &self,
        tenant: &Tenant,
        conversation: &Conversation,
        transcript: &[Message],
    ) -> Result<Option<Lead>, ExtractionError> {
        let request = CompletionRequest {
            system_prompt: EXTRACTION_PROMPT.to_string(),
            messages: vec![ChatMessage::user(render_transcript(transcript))],
            max_tokens: self.max_tokens,
            temperature: 0.0,
        };

        let completion = tokio::time::timeout(self.timeout, self.provider.complete(request))
            .await
            .map_err(|_| ExtractionError::Timeout(self.timeout))??;
        let fields = parse_extraction(&completion.text)?;
        Ok(build_lead(fields, tenant, conversation))
    }
}
