use concierge_core::{ConversationStatus, LeadStatus, TenantId};

use crate::commands::{build_engine, execute, parse_required, CommandContext, CommandResult};

pub fn leads(ctx: &CommandContext, tenant: &str, status: Option<&str>) -> CommandResult {
    const COMMAND: &str = "leads";

    let status = match status {
        Some(raw) => match parse_required(COMMAND, "lead status", raw, LeadStatus::parse) {
            Ok(status) => Some(status),
            Err(failure) => return failure,
        },
        None => None,
    };
    let tenant_id = TenantId(tenant.trim().to_string());

    execute(COMMAND, ctx, |config, pool| async move {
        let engine = build_engine(COMMAND, ctx, &config, &pool)?;
        let leads = engine
            .leads(&tenant_id, status)
            .await
            .map_err(|error| CommandResult::from_engine_error(COMMAND, &error))?;

        Ok::<_, CommandResult>(CommandResult::success_with(
            COMMAND,
            format!("{} lead(s)", leads.len()),
            &leads,
        ))
    })
}

pub fn conversations(
    ctx: &CommandContext,
    tenant: &str,
    status: Option<&str>,
    limit: u32,
) -> CommandResult {
    const COMMAND: &str = "conversations";

    let status = match status {
        Some(raw) => {
            match parse_required(COMMAND, "conversation status", raw, ConversationStatus::parse) {
                Ok(status) => Some(status),
                Err(failure) => return failure,
            }
        }
        None => None,
    };
    let tenant_id = TenantId(tenant.trim().to_string());

    execute(COMMAND, ctx, |config, pool| async move {
        let engine = build_engine(COMMAND, ctx, &config, &pool)?;
        let conversations = engine
            .conversations(&tenant_id, status, limit.max(1))
            .await
            .map_err(|error| CommandResult::from_engine_error(COMMAND, &error))?;

        Ok::<_, CommandResult>(CommandResult::success_with(
            COMMAND,
            format!("{} conversation(s)", conversations.len()),
            &conversations,
        ))
    })
}
