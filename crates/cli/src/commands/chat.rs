use concierge_core::{Channel, InboundMessage, TenantId};

use crate::commands::{build_engine, execute, parse_required, CommandContext, CommandResult};

const COMMAND: &str = "chat";

#[derive(Clone, Debug)]
pub struct ChatArgs {
    pub tenant: String,
    pub channel: String,
    pub guest: String,
    pub name: Option<String>,
    pub message: String,
}

/// Sends one guest message through the engine and prints the reply payload.
/// A handoff is passed to the context's staff notifier.
pub fn run(ctx: &CommandContext, args: ChatArgs) -> CommandResult {
    let channel = match parse_required(COMMAND, "channel", &args.channel, Channel::parse) {
        Ok(channel) => channel,
        Err(failure) => return failure,
    };
    if args.guest.trim().is_empty() {
        return CommandResult::input_error(COMMAND, "guest identifier must not be empty");
    }
    let tenant_id = TenantId(args.tenant.trim().to_string());
    let inbound = InboundMessage {
        channel,
        guest_identifier: args.guest.trim().to_string(),
        guest_name: args.name.filter(|name| !name.trim().is_empty()),
        content: args.message,
        metadata: Default::default(),
    };

    execute(COMMAND, ctx, |config, pool| async move {
        let engine = build_engine(COMMAND, ctx, &config, &pool)?;
        let reply = engine
            .handle_inbound(&tenant_id, inbound)
            .await
            .map_err(|error| CommandResult::from_engine_error(COMMAND, &error))?;

        if let Some(notice) = &reply.handoff {
            ctx.notifier().notify(notice).await;
        }

        Ok::<_, CommandResult>(CommandResult::success_with(COMMAND, reply.reply.clone(), &reply))
    })
}
