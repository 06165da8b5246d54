use concierge_core::config::{AppConfig, LlmProvider, LoadOptions};
use concierge_db::{connect, migrations};
use serde::Serialize;

use crate::commands::CommandContext;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub struct DoctorOutput {
    pub healthy: bool,
    pub rendered: String,
}

pub fn run(ctx: &CommandContext, json_output: bool) -> DoctorOutput {
    let report = build_report(&ctx.load);
    let healthy = report.overall_status == CheckStatus::Pass;

    let rendered = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    DoctorOutput { healthy, rendered }
}

fn build_report(load: &LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(load.clone()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_llm_provider(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["llm_provider", "database_connectivity", "schema_migrations"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// Static readiness only; no request is sent to the provider.
fn check_llm_provider(config: &AppConfig) -> DoctorCheck {
    let credentials = match (config.llm.provider, config.llm.api_key.is_some()) {
        (LlmProvider::OpenAi, true) => "api key present",
        (LlmProvider::OpenAi, false) => "api key missing",
        (LlmProvider::Ollama, _) => "no api key required",
    };
    let ready = !(config.llm.provider == LlmProvider::OpenAi && config.llm.api_key.is_none());

    DoctorCheck {
        name: "llm_provider",
        status: if ready { CheckStatus::Pass } else { CheckStatus::Fail },
        details: format!(
            "{:?} at `{}` with model `{}` / embeddings `{}` ({credentials})",
            config.llm.provider,
            config.llm.resolved_base_url(),
            config.llm.model,
            config.embedding.model,
        ),
    }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            }];
        }
    };

    let result = runtime.block_on(async {
        let pool = connect(&config.database)
            .await
            .map_err(|error| format!("failed to connect to database: {error}"))?;
        let pending = migrations::pending_versions(&pool).await;
        pool.close().await;
        Ok::<_, String>(pending)
    });

    match result {
        Ok(pending) => {
            let connectivity = DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Pass,
                details: format!("connected using `{}`", config.database.url),
            };
            let schema = match pending {
                Ok(pending) if pending.is_empty() => DoctorCheck {
                    name: "schema_migrations",
                    status: CheckStatus::Pass,
                    details: "schema is up to date".to_string(),
                },
                Ok(pending) => DoctorCheck {
                    name: "schema_migrations",
                    status: CheckStatus::Fail,
                    details: format!("{} pending migration(s); run `concierge migrate`", pending.len()),
                },
                Err(error) => DoctorCheck {
                    name: "schema_migrations",
                    status: CheckStatus::Fail,
                    details: format!("could not read migration state: {error}"),
                },
            };
            vec![connectivity, schema]
        }
        Err(error) => vec![
            DoctorCheck { name: "database_connectivity", status: CheckStatus::Fail, details: error },
            DoctorCheck {
                name: "schema_migrations",
                status: CheckStatus::Skipped,
                details: "skipped because the database is unreachable".to_string(),
            },
        ],
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
