use std::path::Path;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use concierge_core::{DocumentInput, KnowledgeConfig, OperatingHours, Tenant, TenantId};
use concierge_db::{AdminScope, Repositories};

use crate::commands::{
    build_engine, execute, read_json_file, CommandContext, CommandResult, EXIT_CAPABILITY,
};

const COMMAND: &str = "onboard";
const OPERATOR: &str = "cli";

/// Tenant onboarding file.
#[derive(Debug, Deserialize)]
pub struct TenantManifest {
    pub name: String,
    pub average_daily_rate: Decimal,
    #[serde(default)]
    pub operating_hours: Option<OperatingHours>,
    #[serde(default)]
    pub knowledge_config: KnowledgeConfig,
    #[serde(default)]
    pub documents: Vec<DocumentInput>,
}

impl TenantManifest {
    pub fn into_tenant(self) -> Result<(Tenant, Vec<DocumentInput>), String> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err("tenant name must not be empty".to_string());
        }
        if self.average_daily_rate.is_sign_negative() {
            return Err("average_daily_rate must not be negative".to_string());
        }
        if let Some(hours) = &self.operating_hours {
            if hours.is_after_hours_at(Utc::now()).is_none() {
                return Err(format!(
                    "operating_hours `{}` in `{}` could not be parsed (expected HH:MM and an IANA timezone)",
                    hours.display_window(),
                    hours.timezone
                ));
            }
        }
        if let Some(threshold) = self.knowledge_config.relevance_threshold {
            if !(threshold > 0.0 && threshold <= 2.0) {
                return Err(format!("knowledge_config.relevance_threshold {threshold} is outside (0, 2]"));
            }
        }

        let mut tenant = Tenant::new(name, self.average_daily_rate);
        tenant.operating_hours = self.operating_hours;
        tenant.knowledge_config = self.knowledge_config;
        Ok((tenant, self.documents))
    }
}

#[derive(Debug, Serialize)]
struct Onboarded {
    tenant_id: TenantId,
    name: String,
    documents: usize,
}

pub fn run(ctx: &CommandContext, manifest_path: &Path) -> CommandResult {
    let manifest: TenantManifest = match read_json_file(manifest_path) {
        Ok(manifest) => manifest,
        Err(error) => return CommandResult::input_error(COMMAND, format!("{error:#}")),
    };
    let (tenant, documents) = match manifest.into_tenant() {
        Ok(parts) => parts,
        Err(message) => return CommandResult::input_error(COMMAND, message),
    };

    execute(COMMAND, ctx, |config, pool| async move {
        // Only the knowledge step needs a provider; fail before writing anything.
        let engine = if documents.is_empty() {
            None
        } else {
            Some(build_engine(COMMAND, ctx, &config, &pool)?)
        };

        let admin = AdminScope::new(OPERATOR);
        Repositories::sqlite(pool.clone())
            .tenants
            .create(&admin, tenant.clone())
            .await
            .map_err(|error| {
                CommandResult::failure(COMMAND, "persistence", error.to_string(), EXIT_CAPABILITY)
            })?;
        tracing::info!(
            event_name = "cli.tenant.onboarded",
            tenant_id = %tenant.id,
            actor = admin.actor(),
            "tenant created"
        );

        let count = match engine {
            Some(engine) => engine
                .ingest(&tenant.id, documents, OPERATOR)
                .await
                .map_err(|error| CommandResult::from_engine_error(COMMAND, &error))?,
            None => 0,
        };

        Ok::<_, CommandResult>(CommandResult::success_with(
            COMMAND,
            format!("onboarded `{}` with {count} knowledge document(s)", tenant.name),
            &Onboarded { tenant_id: tenant.id.clone(), name: tenant.name.clone(), documents: count },
        ))
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::TenantManifest;

    fn manifest(json: &str) -> TenantManifest {
        serde_json::from_str(json).expect("manifest")
    }

    #[test]
    fn minimal_manifest_builds_a_tenant_without_hours() {
        let (tenant, documents) =
            manifest(r#"{"name": " Hotel X ", "average_daily_rate": 230}"#).into_tenant().expect("valid");
        assert_eq!(tenant.name, "Hotel X");
        assert_eq!(tenant.average_daily_rate, Decimal::new(230, 0));
        assert!(tenant.operating_hours.is_none());
        assert!(documents.is_empty());
    }

    #[test]
    fn bad_timezone_is_rejected_up_front() {
        let error = manifest(
            r#"{"name": "Hotel X", "average_daily_rate": "230.00",
                "operating_hours": {"start": "09:00", "end": "18:00", "timezone": "Mars/Olympus"}}"#,
        )
        .into_tenant()
        .expect_err("invalid timezone");
        assert!(error.contains("Mars/Olympus"));
    }

    #[test]
    fn blank_names_and_negative_rates_are_rejected() {
        assert!(manifest(r#"{"name": "  ", "average_daily_rate": 1}"#).into_tenant().is_err());
        assert!(manifest(r#"{"name": "X", "average_daily_rate": -5}"#).into_tenant().is_err());
        assert!(manifest(
            r#"{"name": "X", "average_daily_rate": 1, "knowledge_config": {"relevance_threshold": 0}}"#
        )
        .into_tenant()
        .is_err());
    }
}
