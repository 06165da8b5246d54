//! Staff overrides: conversation status changes and lead pipeline updates.

use concierge_core::{ConversationId, LeadId, LeadStatus, TenantId};

use crate::commands::{build_engine, execute, parse_required, CommandContext, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConversationAction {
    Resolve,
    Handoff,
    Reactivate,
}

impl ConversationAction {
    fn command(self) -> &'static str {
        match self {
            Self::Resolve => "resolve",
            Self::Handoff => "handoff",
            Self::Reactivate => "reactivate",
        }
    }
}

pub fn conversation(
    ctx: &CommandContext,
    action: ConversationAction,
    tenant: &str,
    conversation: &str,
    actor: &str,
) -> CommandResult {
    let command = action.command();
    let tenant_id = TenantId(tenant.trim().to_string());
    let conversation_id = ConversationId(conversation.trim().to_string());

    execute(command, ctx, |config, pool| async move {
        let engine = build_engine(command, ctx, &config, &pool)?;
        let result = match action {
            ConversationAction::Resolve => {
                engine.resolve_conversation(&tenant_id, &conversation_id, actor).await
            }
            ConversationAction::Handoff => {
                engine.force_handoff(&tenant_id, &conversation_id, actor).await
            }
            ConversationAction::Reactivate => {
                engine.reactivate(&tenant_id, &conversation_id, actor).await
            }
        };
        let updated = result.map_err(|error| CommandResult::from_engine_error(command, &error))?;

        Ok::<_, CommandResult>(CommandResult::success_with(
            command,
            format!("conversation is now {} in {} mode", updated.status.as_str(), updated.mode),
            &updated,
        ))
    })
}

#[derive(Clone, Debug)]
pub struct LeadStatusArgs {
    pub tenant: String,
    pub lead: String,
    pub status: Option<String>,
    pub notes: Option<String>,
    pub actor: String,
}

pub fn lead_status(ctx: &CommandContext, args: LeadStatusArgs) -> CommandResult {
    const COMMAND: &str = "lead-status";

    let status = match args.status.as_deref() {
        Some(raw) => match parse_required(COMMAND, "lead status", raw, LeadStatus::parse) {
            Ok(status) => Some(status),
            Err(failure) => return failure,
        },
        None => None,
    };
    if status.is_none() && args.notes.is_none() {
        return CommandResult::input_error(COMMAND, "nothing to update: pass --status and/or --notes");
    }
    let tenant_id = TenantId(args.tenant.trim().to_string());
    let lead_id = LeadId(args.lead.trim().to_string());
    let (notes, actor) = (args.notes, args.actor);

    execute(COMMAND, ctx, |config, pool| async move {
        let engine = build_engine(COMMAND, ctx, &config, &pool)?;
        let lead = engine
            .update_lead(&tenant_id, &lead_id, status, notes, &actor)
            .await
            .map_err(|error| CommandResult::from_engine_error(COMMAND, &error))?;

        Ok::<_, CommandResult>(CommandResult::success_with(
            COMMAND,
            format!("lead is {}", lead.status.as_str()),
            &lead,
        ))
    })
}
