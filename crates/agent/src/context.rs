//! Prompt assembly: system policy, mode addendum, retrieved grounding and a
//! bounded window of history.

use tera::{Context, Tera};
use thiserror::Error;

use concierge_core::{Conversation, Message, MessageRole, Mode, ScoredDocument, Tenant};

use crate::llm::ChatMessage;

const SYSTEM_POLICY_TEMPLATE: &str = "system_policy.txt";

pub const NO_KNOWLEDGE_PLACEHOLDER: &str =
    "No property information is available for this question. Do not guess; offer to connect the guest with the reservations team.";

const LEAD_CAPTURE_ADDENDUM: &str = "The guest is interested in booking. Keep helping, and gently collect what the reservations team needs:
- the guest's name, if not known yet
- preferred dates and number of nights
- room preference
- an email address or phone number, unless the channel already provides one
Be warm and never pushy.";

const HANDOFF_ADDENDUM: &str = "The guest needs a member of staff. Do not try to solve the problem yourself.
- Acknowledge the request and reassure the guest.
- Briefly summarise what has been discussed so far.
- Tell the guest that the reservations team will take over with the full conversation history.";

/// Extra policy text for a mode. Concierge mode uses the base policy alone.
pub fn addendum(mode: Mode) -> Option<&'static str> {
    match mode {
        Mode::Concierge => None,
        Mode::LeadCapture => Some(LEAD_CAPTURE_ADDENDUM),
        Mode::Handoff => Some(HANDOFF_ADDENDUM),
    }
}

pub fn render_excerpt(scored: &ScoredDocument) -> String {
    let document = &scored.document;
    format!("[{}] {}:\n{}", document.doc_type.label(), document.title, document.content)
}

pub fn wrap_guest_turn(content: &str) -> String {
    format!("<guest_message>{content}</guest_message>")
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("prompt template error: {0}")]
    Template(#[from] tera::Error),
}

pub struct ContextInput<'a> {
    pub tenant: &'a Tenant,
    pub conversation: &'a Conversation,
    pub mode: Mode,
    pub grounding: &'a [ScoredDocument],
    /// Oldest first, ending with the current guest turn.
    pub history: &'a [Message],
}

#[derive(Clone, Debug, PartialEq)]
pub struct AssembledContext {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub grounded: bool,
}

pub struct ContextAssembler {
    templates: Tera,
    history_turns: usize,
}

impl ContextAssembler {
    pub fn new(history_turns: usize) -> Result<Self, ContextError> {
        let mut templates = Tera::default();
        templates.add_raw_template(
            SYSTEM_POLICY_TEMPLATE,
            include_str!("../../../templates/prompts/system_policy.txt"),
        )?;
        Ok(Self { templates, history_turns: history_turns.max(1) })
    }

    pub fn history_turns(&self) -> usize {
        self.history_turns
    }

    pub fn assemble(&self, input: ContextInput<'_>) -> Result<AssembledContext, ContextError> {
        let grounded = !input.grounding.is_empty();
        let knowledge = if grounded {
            input.grounding.iter().map(render_excerpt).collect::<Vec<_>>().join("\n\n")
        } else {
            NO_KNOWLEDGE_PLACEHOLDER.to_string()
        };

        let mut context = Context::new();
        context.insert("tenant_name", &input.tenant.name);
        context.insert("channel", input.conversation.channel.as_str());
        context.insert("operating_hours", &input.tenant.operating_window());
        context.insert("is_after_hours", &input.conversation.is_after_hours);
        context.insert("knowledge", &knowledge);
        context.insert("addendum", addendum(input.mode).unwrap_or_default());

        let system_prompt = self.templates.render(SYSTEM_POLICY_TEMPLATE, &context)?;

        let skip = input.history.len().saturating_sub(self.history_turns);
        let messages = input.history[skip..]
            .iter()
            .map(|message| match message.role {
                MessageRole::Guest => ChatMessage::user(wrap_guest_turn(&message.content)),
                MessageRole::Ai => ChatMessage::assistant(message.content.clone()),
            })
            .collect();

        Ok(AssembledContext { system_prompt, messages, grounded })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use concierge_core::{
        Channel, Conversation, DocType, DocumentInput, KnowledgeDocument, Message, MessageMetadata,
        MessageRole, Mode, ScoredDocument, Tenant,
    };

    use super::{addendum, ContextAssembler, ContextInput, NO_KNOWLEDGE_PLACEHOLDER};
    use crate::llm::ChatRole;

    fn fixture() -> (Tenant, Conversation) {
        let tenant = Tenant::new("Hotel X", Decimal::new(230, 0));
        let conversation =
            Conversation::start(tenant.id.clone(), Channel::WhatsApp, "+60111", false, Utc::now());
        (tenant, conversation)
    }

    fn turn(conversation: &Conversation, role: MessageRole, content: &str) -> Message {
        Message::new(
            conversation.id.clone(),
            conversation.tenant_id.clone(),
            role,
            content,
            MessageMetadata::default(),
        )
    }

    fn rate_document(tenant: &Tenant) -> ScoredDocument {
        ScoredDocument {
            document: KnowledgeDocument::from_input(
                tenant.id.clone(),
                DocumentInput {
                    doc_type: DocType::Rates,
                    title: "Deluxe King".to_string(),
                    content: "Deluxe King from 230/night including breakfast.".to_string(),
                },
                vec![1.0, 0.0],
            ),
            distance: 0.05,
        }
    }

    #[test]
    fn every_mode_has_a_decided_addendum() {
        assert!(addendum(Mode::Concierge).is_none());
        assert!(addendum(Mode::LeadCapture).is_some_and(|text| text.contains("email")));
        assert!(addendum(Mode::Handoff).is_some_and(|text| text.contains("Do not try to solve")));
    }

    #[test]
    fn grounding_is_rendered_as_labelled_excerpts() {
        let (tenant, conversation) = fixture();
        let assembler = ContextAssembler::new(10).expect("assembler");
        let grounding = vec![rate_document(&tenant)];
        let history = vec![turn(&conversation, MessageRole::Guest, "how much is a room?")];

        let assembled = assembler
            .assemble(ContextInput {
                tenant: &tenant,
                conversation: &conversation,
                mode: Mode::Concierge,
                grounding: &grounding,
                history: &history,
            })
            .expect("assemble");

        assert!(assembled.grounded);
        assert!(assembled.system_prompt.contains("Hotel X"));
        assert!(assembled
            .system_prompt
            .contains("[RATES] Deluxe King:\nDeluxe King from 230/night including breakfast."));
        assert!(!assembled.system_prompt.contains(NO_KNOWLEDGE_PLACEHOLDER));
        assert!(!assembled.system_prompt.contains("interested in booking"));
    }

    #[test]
    fn empty_grounding_uses_placeholder_and_mode_addendum() {
        let (tenant, conversation) = fixture();
        let assembler = ContextAssembler::new(10).expect("assembler");
        let history = vec![turn(&conversation, MessageRole::Guest, "can I book?")];

        let assembled = assembler
            .assemble(ContextInput {
                tenant: &tenant,
                conversation: &conversation,
                mode: Mode::LeadCapture,
                grounding: &[],
                history: &history,
            })
            .expect("assemble");

        assert!(!assembled.grounded);
        assert!(assembled.system_prompt.contains(NO_KNOWLEDGE_PLACEHOLDER));
        assert!(assembled.system_prompt.contains("interested in booking"));
    }

    #[test]
    fn history_is_bounded_and_guest_turns_are_wrapped() {
        let (tenant, conversation) = fixture();
        let assembler = ContextAssembler::new(4).expect("assembler");
        let history: Vec<Message> = (0..7)
            .map(|index| {
                let role = if index % 2 == 0 { MessageRole::Guest } else { MessageRole::Ai };
                turn(&conversation, role, &format!("turn {index}"))
            })
            .collect();

        let assembled = assembler
            .assemble(ContextInput {
                tenant: &tenant,
                conversation: &conversation,
                mode: Mode::Concierge,
                grounding: &[],
                history: &history,
            })
            .expect("assemble");

        assert_eq!(assembled.messages.len(), 4);
        assert_eq!(assembled.messages[0].role, ChatRole::Assistant);
        assert_eq!(assembled.messages[0].content, "turn 3");
        assert_eq!(assembled.messages[3].role, ChatRole::User);
        assert_eq!(assembled.messages[3].content, "<guest_message>turn 6</guest_message>");
    }

    #[test]
    fn assembly_is_deterministic() {
        let (tenant, mut conversation) = fixture();
        conversation.is_after_hours = true;
        let assembler = ContextAssembler::new(10).expect("assembler");
        let grounding = vec![rate_document(&tenant)];
        let history = vec![turn(&conversation, MessageRole::Guest, "hi")];
        let input = || ContextInput {
            tenant: &tenant,
            conversation: &conversation,
            mode: Mode::Handoff,
            grounding: &grounding,
            history: &history,
        };

        let first = assembler.assemble(input()).expect("assemble");
        let second = assembler.assemble(input()).expect("assemble");
        assert_eq!(first, second);
        assert!(first.system_prompt.contains("started outside staffed hours"));
    }
}
