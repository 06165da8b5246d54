pub mod chat;
pub mod config;
pub mod doctor;
pub mod ingest;
pub mod listing;
pub mod migrate;
pub mod onboard;
pub mod staff;

use std::fs;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use concierge_agent::llm::{CompletionProvider, EmbeddingProvider};
use concierge_agent::notify::{StaffNotifier, TracingStaffNotifier};
use concierge_agent::openai::OpenAiCompatibleClient;
use concierge_agent::{ConversationEngine, EngineError, EngineSettings};
use concierge_core::config::{AppConfig, LoadOptions};
use concierge_core::ErrorClass;
use concierge_db::{connect, migrations, DbPool, Repositories};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_RUNTIME: u8 = 3;
pub const EXIT_DATABASE: u8 = 4;
pub const EXIT_MIGRATION: u8 = 5;
pub const EXIT_INPUT: u8 = 6;
pub const EXIT_NOT_FOUND: u8 = 7;
pub const EXIT_CAPABILITY: u8 = 8;
pub const EXIT_EXTRACTION: u8 = 9;
pub const EXIT_ISOLATION: u8 = 10;
pub const EXIT_INVARIANT: u8 = 11;

fn exit_code_for(class: ErrorClass) -> u8 {
    match class {
        ErrorClass::Input => EXIT_INPUT,
        ErrorClass::NotFound => EXIT_NOT_FOUND,
        ErrorClass::Capability => EXIT_CAPABILITY,
        ErrorClass::Extraction => EXIT_EXTRACTION,
        ErrorClass::IsolationViolation => EXIT_ISOLATION,
        ErrorClass::InvariantViolation => EXIT_INVARIANT,
    }
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    /// Success payload carrying `data` under the `data` key.
    pub fn success_with(command: &str, message: impl Into<String>, data: &impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self::ok(command, message.into(), Some(value)),
            Err(error) => Self::failure(command, "serialization", error.to_string(), EXIT_RUNTIME),
        }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    pub fn input_error(command: &str, message: impl Into<String>) -> Self {
        Self::failure(command, ErrorClass::Input.as_str(), message, EXIT_INPUT)
    }

    /// Maps an engine failure onto its error class, exit code and the text a
    /// guest would have been shown.
    pub fn from_engine_error(command: &str, error: &EngineError) -> Self {
        let class = error.class();
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(class.as_str().to_string()),
            message: error.to_string(),
            data: Some(serde_json::json!({
                "retryable": error.is_retryable(),
                "guest_message": error.guest_message(),
            })),
        };
        Self { exit_code: exit_code_for(class), output: serialize_payload(payload) }
    }

    fn ok(command: &str, message: String, data: Option<Value>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message,
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Model backends for commands that embed or complete.
#[derive(Clone)]
pub struct Providers {
    pub completion: Arc<dyn CompletionProvider>,
    pub embedder: Arc<dyn EmbeddingProvider>,
}

impl Providers {
    pub fn new(
        completion: Arc<dyn CompletionProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self { completion, embedder }
    }
}

/// What every command runs with: how to load configuration, and optionally
/// pre-built providers and a staff notifier in place of the configured ones.
#[derive(Clone)]
pub struct CommandContext {
    pub load: LoadOptions,
    providers: Option<Providers>,
    notifier: Arc<dyn StaffNotifier>,
}

impl Default for CommandContext {
    fn default() -> Self {
        Self::new(LoadOptions::default())
    }
}

impl CommandContext {
    pub fn new(load: LoadOptions) -> Self {
        Self { load, providers: None, notifier: Arc::new(TracingStaffNotifier) }
    }

    pub fn with_providers(mut self, providers: Providers) -> Self {
        self.providers = Some(providers);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn StaffNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub(crate) fn notifier(&self) -> &dyn StaffNotifier {
        self.notifier.as_ref()
    }

    fn providers_for(&self, config: &AppConfig) -> Result<Providers, String> {
        if let Some(providers) = &self.providers {
            return Ok(providers.clone());
        }
        let client = OpenAiCompatibleClient::from_config(&config.llm, &config.embedding)
            .map_err(|error| error.to_string())?;
        let client = Arc::new(client);
        Ok(Providers::new(client.clone(), client))
    }
}

pub(crate) fn load_config(command: &str, ctx: &CommandContext) -> Result<AppConfig, CommandResult> {
    AppConfig::load(ctx.load.clone()).map_err(|error| {
        CommandResult::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            EXIT_CONFIG,
        )
    })
}

pub(crate) fn build_runtime(command: &str) -> Result<tokio::runtime::Runtime, CommandResult> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            EXIT_RUNTIME,
        )
    })
}

/// Connects and brings the schema up to date.
pub(crate) async fn open_database(
    command: &str,
    config: &AppConfig,
) -> Result<DbPool, CommandResult> {
    let pool = connect(&config.database).await.map_err(|error| {
        CommandResult::failure(command, "db_connectivity", error.to_string(), EXIT_DATABASE)
    })?;
    migrations::run_pending(&pool).await.map_err(|error| {
        CommandResult::failure(command, "migration", error.to_string(), EXIT_MIGRATION)
    })?;
    Ok(pool)
}

pub(crate) fn build_engine(
    command: &str,
    ctx: &CommandContext,
    config: &AppConfig,
    pool: &DbPool,
) -> Result<ConversationEngine, CommandResult> {
    let providers = ctx.providers_for(config).map_err(|message| {
        CommandResult::failure(command, "provider_init", message, EXIT_CAPABILITY)
    })?;
    ConversationEngine::new(
        Repositories::sqlite(pool.clone()),
        providers.completion,
        providers.embedder,
        EngineSettings::from_config(config),
    )
    .map_err(|error| CommandResult::from_engine_error(command, &error))
}

/// Loads config, opens the database and runs `body` on a fresh runtime.
pub(crate) fn execute<F, Fut>(command: &str, ctx: &CommandContext, body: F) -> CommandResult
where
    F: FnOnce(AppConfig, DbPool) -> Fut,
    Fut: Future<Output = Result<CommandResult, CommandResult>>,
{
    let config = match load_config(command, ctx) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match build_runtime(command) {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    runtime.block_on(async {
        let pool = match open_database(command, &config).await {
            Ok(pool) => pool,
            Err(failure) => return failure,
        };
        let result = body(config, pool.clone()).await;
        pool.close().await;
        result.unwrap_or_else(|failure| failure)
    })
}

pub(crate) fn parse_required<T>(
    command: &str,
    field: &str,
    raw: &str,
    parse: impl FnOnce(&str) -> Option<T>,
) -> Result<T, CommandResult> {
    parse(raw)
        .ok_or_else(|| CommandResult::input_error(command, format!("invalid {field} `{raw}`")))
}

pub(crate) fn read_json_file<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read `{}`", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("could not parse `{}`", path.display()))
}
