pub mod bootstrap;
pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use concierge_core::config::{AppConfig, ConfigOverrides, LoadOptions};

use commands::chat::ChatArgs;
use commands::staff::{ConversationAction, LeadStatusArgs};
use commands::{CommandContext, CommandResult};

#[derive(Debug, Parser)]
#[command(
    name = "concierge",
    about = "Hotel concierge operator CLI",
    long_about = "Onboard tenants, manage their knowledge base, talk to the concierge engine and work handed-off conversations and leads.",
    after_help = "Examples:\n  concierge migrate\n  concierge onboard --file hotel-x.json\n  concierge chat --tenant <id> --channel whatsapp --guest +60111 --message \"how much is a room?\""
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a concierge.toml config file")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override database.url")]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations")]
    Migrate,
    #[command(about = "Check config, provider settings, database connectivity and schema state")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Show effective configuration values with their source; secrets are redacted")]
    Config,
    #[command(about = "Create a tenant from a JSON manifest and ingest its documents")]
    Onboard {
        #[arg(long)]
        file: PathBuf,
    },
    #[command(about = "Replace a tenant's knowledge base with a JSON array of documents")]
    Ingest {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        file: PathBuf,
    },
    #[command(about = "Send one guest message through the engine")]
    Chat {
        #[arg(long)]
        tenant: String,
        #[arg(long, default_value = "web", help = "whatsapp | web | email")]
        channel: String,
        #[arg(long, help = "Phone number, email address or web session id")]
        guest: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        message: String,
    },
    #[command(about = "Mark a conversation resolved")]
    Resolve {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        conversation: String,
        #[arg(long, default_value = "staff")]
        actor: String,
    },
    #[command(about = "Hand a conversation to staff")]
    Handoff {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        conversation: String,
        #[arg(long, default_value = "staff")]
        actor: String,
    },
    #[command(about = "Give a conversation back to the AI concierge")]
    Reactivate {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        conversation: String,
        #[arg(long, default_value = "staff")]
        actor: String,
    },
    #[command(about = "Update a lead's status and/or notes")]
    LeadStatus {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        lead: String,
        #[arg(long, help = "new | contacted | won | lost")]
        status: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long, default_value = "staff")]
        actor: String,
    },
    #[command(about = "List a tenant's leads")]
    Leads {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        status: Option<String>,
    },
    #[command(about = "List a tenant's conversations, newest first")]
    Conversations {
        #[arg(long)]
        tenant: String,
        #[arg(long, help = "active | resolved | handed_off")]
        status: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}

impl Cli {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            config_path: self.config.clone(),
            require_file: self.config.is_some(),
            overrides: ConfigOverrides {
                database_url: self.database_url.clone(),
                ..ConfigOverrides::default()
            },
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let ctx = CommandContext::new(cli.load_options());

    // Commands report config problems themselves; logging falls back to defaults.
    let logging = AppConfig::load(ctx.load.clone()).unwrap_or_default().logging;
    bootstrap::init_logging(&logging);

    let result = dispatch(&ctx, cli.command);
    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

fn dispatch(ctx: &CommandContext, command: Command) -> CommandResult {
    match command {
        Command::Migrate => commands::migrate::run(ctx),
        Command::Doctor { json } => {
            let report = commands::doctor::run(ctx, json);
            CommandResult { exit_code: if report.healthy { 0 } else { 1 }, output: report.rendered }
        }
        Command::Config => commands::config::run(ctx),
        Command::Onboard { file } => commands::onboard::run(ctx, &file),
        Command::Ingest { tenant, file } => commands::ingest::run(ctx, &tenant, &file),
        Command::Chat { tenant, channel, guest, name, message } => {
            commands::chat::run(ctx, ChatArgs { tenant, channel, guest, name, message })
        }
        Command::Resolve { tenant, conversation, actor } => {
            commands::staff::conversation(ctx, ConversationAction::Resolve, &tenant, &conversation, &actor)
        }
        Command::Handoff { tenant, conversation, actor } => {
            commands::staff::conversation(ctx, ConversationAction::Handoff, &tenant, &conversation, &actor)
        }
        Command::Reactivate { tenant, conversation, actor } => commands::staff::conversation(
            ctx,
            ConversationAction::Reactivate,
            &tenant,
            &conversation,
            &actor,
        ),
        Command::LeadStatus { tenant, lead, status, notes, actor } => {
            commands::staff::lead_status(ctx, LeadStatusArgs { tenant, lead, status, notes, actor })
        }
        Command::Leads { tenant, status } => commands::listing::leads(ctx, &tenant, status.as_deref()),
        Command::Conversations { tenant, status, limit } => {
            commands::listing::conversations(ctx, &tenant, status.as_deref(), limit)
        }
    }
}
