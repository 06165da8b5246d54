use concierge_db::{connect, migrations};

use crate::commands::{
    build_runtime, load_config, CommandContext, CommandResult, EXIT_DATABASE, EXIT_MIGRATION,
};

const COMMAND: &str = "migrate";

pub fn run(ctx: &CommandContext) -> CommandResult {
    let config = match load_config(COMMAND, ctx) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match build_runtime(COMMAND) {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), EXIT_DATABASE))?;
        let pending = migrations::pending_versions(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION))?;
        pool.close().await;
        Ok::<Vec<i64>, (&'static str, String, u8)>(pending)
    });

    match result {
        Ok(applied) => {
            tracing::info!(
                event_name = "cli.migrate.completed",
                applied = applied.len(),
                "migrations applied"
            );
            CommandResult::success_with(
                COMMAND,
                format!("applied {} pending migration(s)", applied.len()),
                &serde_json::json!({ "applied_versions": applied }),
            )
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(COMMAND, error_class, message, exit_code)
        }
    }
}
