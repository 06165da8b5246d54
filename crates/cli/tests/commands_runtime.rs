use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use concierge_agent::testing::{KeywordEmbedder, RecordingStaffNotifier, ScriptedCompletionProvider};
use concierge_cli::commands::chat::{self, ChatArgs};
use concierge_cli::commands::staff::{self, ConversationAction, LeadStatusArgs};
use concierge_cli::commands::{
    config, doctor, ingest, listing, migrate, onboard, CommandContext, CommandResult, Providers,
};
use concierge_core::config::{ConfigOverrides, LoadOptions};
use rust_decimal::Decimal;
use serde_json::Value;
use tempfile::TempDir;

const HOTEL_X_MANIFEST: &str = r#"{
    "name": "Hotel X",
    "average_daily_rate": 230,
    "documents": [
        {"doc_type": "rates", "title": "Deluxe King Room", "content": "Deluxe King room from RM230/night."},
        {"doc_type": "facilities", "title": "Pool", "content": "Rooftop pool open 7am-10pm."}
    ]
}"#;

struct Workspace {
    dir: TempDir,
    provider: ScriptedCompletionProvider,
    notifier: RecordingStaffNotifier,
}

impl Workspace {
    fn new() -> Self {
        Self::with_provider(ScriptedCompletionProvider::default())
    }

    fn with_provider(provider: ScriptedCompletionProvider) -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
            provider,
            notifier: RecordingStaffNotifier::default(),
        }
    }

    fn database_url(&self) -> String {
        format!("sqlite://{}", self.dir.path().join("concierge.db").display())
    }

    fn ctx(&self) -> CommandContext {
        let load = LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(self.database_url()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        };
        CommandContext::new(load)
            .with_providers(Providers::new(
                Arc::new(self.provider.clone()),
                Arc::new(KeywordEmbedder::hotel()),
            ))
            .with_notifier(Arc::new(self.notifier.clone()))
    }

    fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, contents).expect("write file");
        path
    }

    fn onboard_hotel_x(&self) -> String {
        let manifest = self.write("hotel-x.json", HOTEL_X_MANIFEST);
        let payload = ok_payload(onboard::run(&self.ctx(), &manifest));
        assert_eq!(payload["data"]["documents"], 2);
        payload["data"]["tenant_id"].as_str().expect("tenant id").to_string()
    }

    fn chat(&self, tenant: &str, channel: &str, guest: &str, message: &str) -> CommandResult {
        chat::run(
            &self.ctx(),
            ChatArgs {
                tenant: tenant.to_string(),
                channel: channel.to_string(),
                guest: guest.to_string(),
                name: None,
                message: message.to_string(),
            },
        )
    }
}

#[test]
fn migrate_applies_once_then_reports_nothing_pending() {
    with_env(&[], || {
        let workspace = Workspace::new();

        let first = ok_payload(migrate::run(&workspace.ctx()));
        assert_eq!(first["command"], "migrate");
        assert_eq!(first["data"]["applied_versions"].as_array().map(Vec::len), Some(1));

        let second = ok_payload(migrate::run(&workspace.ctx()));
        assert_eq!(second["data"]["applied_versions"].as_array().map(Vec::len), Some(0));
    });
}

#[test]
fn invalid_configuration_is_reported_with_its_exit_code() {
    with_env(&[("CONCIERGE_RETRIEVAL_TOP_K", "0")], || {
        let workspace = Workspace::new();
        let result = migrate::run(&workspace.ctx());
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn doctor_flags_pending_migrations_until_migrate_runs() {
    with_env(&[], || {
        let workspace = Workspace::new();

        let before = doctor::run(&workspace.ctx(), true);
        assert!(!before.healthy);
        let report = parse_payload(&before.rendered);
        let schema = report["checks"]
            .as_array()
            .and_then(|checks| checks.iter().find(|check| check["name"] == "schema_migrations"))
            .expect("schema check");
        assert_eq!(schema["status"], "fail");

        ok_payload(migrate::run(&workspace.ctx()));
        let after = doctor::run(&workspace.ctx(), true);
        assert!(after.healthy, "{}", after.rendered);
    });
}

#[test]
fn config_output_redacts_the_api_key() {
    with_env(&[("CONCIERGE_LLM_API_KEY", "sk-very-secret")], || {
        let workspace = Workspace::new();
        let result = config::run(&workspace.ctx());
        assert!(!result.output.contains("sk-very-secret"));

        let payload = ok_payload(result);
        let entries = payload["data"].as_array().expect("entries");
        let api_key = entries.iter().find(|entry| entry["key"] == "llm.api_key").expect("api key");
        assert_eq!(api_key["value"], "<redacted>");
        assert_eq!(api_key["source"], "env (CONCIERGE_LLM_API_KEY)");
    });
}

#[test]
fn onboarded_knowledge_grounds_a_price_answer() {
    with_env(&[], || {
        let workspace = Workspace::new();
        let tenant = workspace.onboard_hotel_x();
        workspace.provider.push_reply("Our Deluxe King room is RM230 per night.");

        let payload = ok_payload(workspace.chat(&tenant, "whatsapp", "+60111", "how much is a room?"));
        assert!(payload["message"].as_str().unwrap_or_default().contains("230"));
        assert_eq!(payload["data"]["mode"], "concierge");
        assert_eq!(payload["data"]["lead_created"], false);
        assert!(payload["data"]["handoff"].is_null());

        let requests = workspace.provider.requests();
        assert!(requests[0].system_prompt.contains("Deluxe King room from RM230/night."));
    });
}

#[test]
fn escalation_notifies_staff_and_staff_can_take_it_from_there() {
    with_env(&[], || {
        let workspace = Workspace::new();
        let tenant = workspace.onboard_hotel_x();

        let payload =
            ok_payload(workspace.chat(&tenant, "whatsapp", "+60111", "I want to speak to a manager"));
        assert_eq!(payload["data"]["mode"], "handoff");
        assert_eq!(payload["data"]["handoff"]["channel"], "whatsapp");
        let conversation = payload["data"]["conversation_id"].as_str().expect("id").to_string();

        let notices = workspace.notifier.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].conversation_id.0, conversation);

        let handed_off = ok_payload(listing::conversations(&workspace.ctx(), &tenant, Some("handed_off"), 10));
        assert_eq!(handed_off["data"].as_array().map(Vec::len), Some(1));

        let reactivated = ok_payload(staff::conversation(
            &workspace.ctx(),
            ConversationAction::Reactivate,
            &tenant,
            &conversation,
            "staff-1",
        ));
        assert_eq!(reactivated["data"]["status"], "active");
        assert_eq!(reactivated["data"]["mode"], "concierge");

        let resolved = ok_payload(staff::conversation(
            &workspace.ctx(),
            ConversationAction::Resolve,
            &tenant,
            &conversation,
            "staff-1",
        ));
        assert_eq!(resolved["data"]["status"], "resolved");

        let again = staff::conversation(
            &workspace.ctx(),
            ConversationAction::Resolve,
            &tenant,
            &conversation,
            "staff-1",
        );
        assert_eq!(again.exit_code, 6);
        assert_eq!(parse_payload(&again.output)["error_class"], "input");
    });
}

#[test]
fn booking_conversation_produces_a_lead_staff_can_update() {
    with_env(&[], || {
        let workspace = Workspace::with_provider(ScriptedCompletionProvider::new(
            r#"{"guest_name": "Ali", "intent": "room_booking", "estimated_nights": 2}"#,
        ));
        let tenant = workspace.onboard_hotel_x();

        let payload = ok_payload(workspace.chat(&tenant, "whatsapp", "+60222", "I want to book 2 nights"));
        assert_eq!(payload["data"]["mode"], "lead_capture");
        assert_eq!(payload["data"]["lead_created"], true);

        let leads = ok_payload(listing::leads(&workspace.ctx(), &tenant, None));
        let lead = &leads["data"][0];
        assert_eq!(lead["guest_phone"], "+60222");
        let value = lead["estimated_value"].as_str().and_then(|raw| raw.parse::<Decimal>().ok());
        assert_eq!(value, Some(Decimal::new(460, 0)));
        let lead_id = lead["id"].as_str().expect("lead id").to_string();

        let updated = ok_payload(staff::lead_status(
            &workspace.ctx(),
            LeadStatusArgs {
                tenant: tenant.clone(),
                lead: lead_id,
                status: Some("contacted".to_string()),
                notes: Some("called back".to_string()),
                actor: "staff-1".to_string(),
            },
        ));
        assert_eq!(updated["data"]["status"], "contacted");
        assert_eq!(updated["data"]["notes"], "called back");

        let still_new = ok_payload(listing::leads(&workspace.ctx(), &tenant, Some("new")));
        assert_eq!(still_new["data"].as_array().map(Vec::len), Some(0));
    });
}

#[test]
fn unknown_tenant_and_bad_arguments_map_to_error_classes() {
    with_env(&[], || {
        let workspace = Workspace::new();

        let unknown = workspace.chat("no-such-tenant", "web", "s-1", "hello");
        assert_eq!(unknown.exit_code, 7);
        let payload = parse_payload(&unknown.output);
        assert_eq!(payload["error_class"], "not_found");
        assert_eq!(payload["data"]["retryable"], false);

        let channel = workspace.chat("no-such-tenant", "telegram", "s-1", "hello");
        assert_eq!(channel.exit_code, 6);

        let lead = staff::lead_status(
            &workspace.ctx(),
            LeadStatusArgs {
                tenant: "t".to_string(),
                lead: "l".to_string(),
                status: None,
                notes: None,
                actor: "staff".to_string(),
            },
        );
        assert_eq!(lead.exit_code, 6);
    });
}

#[test]
fn ingest_replaces_documents_and_rejects_unreadable_files() {
    with_env(&[], || {
        let workspace = Workspace::new();
        let tenant = workspace.onboard_hotel_x();

        let documents = workspace.write(
            "docs.json",
            r#"[{"doc_type": "directions", "title": "Airport", "content": "Taxi from the airport takes 40 minutes."}]"#,
        );
        let payload = ok_payload(ingest::run(&workspace.ctx(), &tenant, &documents));
        assert_eq!(payload["data"]["documents"], 1);

        workspace.chat(&tenant, "web", "s-1", "how much is a room?");
        let requests = workspace.provider.requests();
        let prompt = &requests[0].system_prompt;
        assert!(!prompt.contains("RM230"), "old documents are gone");

        let missing = ingest::run(&workspace.ctx(), &tenant, Path::new("/definitely/not/here.json"));
        assert_eq!(missing.exit_code, 6);
        assert_eq!(parse_payload(&missing.output)["error_class"], "input");
    });
}

fn ok_payload(result: CommandResult) -> Value {
    assert_eq!(result.exit_code, 0, "command failed: {}", result.output);
    let payload = parse_payload(&result.output);
    assert_eq!(payload["status"], "ok");
    payload
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "CONCIERGE_DATABASE_URL",
        "CONCIERGE_LLM_PROVIDER",
        "CONCIERGE_LLM_API_KEY",
        "CONCIERGE_LLM_BASE_URL",
        "CONCIERGE_RETRIEVAL_TOP_K",
        "CONCIERGE_RETRIEVAL_RELEVANCE_THRESHOLD",
        "CONCIERGE_LOGGING_LEVEL",
        "CONCIERGE_LOG_LEVEL",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
