use std::path::Path;

use concierge_core::{DocumentInput, TenantId};

use crate::commands::{build_engine, execute, read_json_file, CommandContext, CommandResult};

const COMMAND: &str = "ingest";

/// Replaces a tenant's knowledge base with the documents in a JSON array file.
pub fn run(ctx: &CommandContext, tenant: &str, documents_path: &Path) -> CommandResult {
    let documents: Vec<DocumentInput> = match read_json_file(documents_path) {
        Ok(documents) => documents,
        Err(error) => return CommandResult::input_error(COMMAND, format!("{error:#}")),
    };
    let tenant_id = TenantId(tenant.trim().to_string());

    execute(COMMAND, ctx, |config, pool| async move {
        let engine = build_engine(COMMAND, ctx, &config, &pool)?;
        let count = engine
            .ingest(&tenant_id, documents, "cli")
            .await
            .map_err(|error| CommandResult::from_engine_error(COMMAND, &error))?;

        Ok::<_, CommandResult>(CommandResult::success_with(
            COMMAND,
            format!("replaced knowledge base with {count} document(s)"),
            &serde_json::json!({ "tenant_id": tenant_id, "documents": count }),
        ))
    })
}
