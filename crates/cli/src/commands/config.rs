use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use concierge_core::config::AppConfig;
use serde::Serialize;
use toml::Value;

use crate::commands::{load_config, CommandContext, CommandResult};

const COMMAND: &str = "config";

#[derive(Debug, Serialize)]
struct ConfigEntry {
    key: &'static str,
    value: String,
    source: String,
}

/// Effective configuration with the layer each value came from.
/// Secrets are never printed.
pub fn run(ctx: &CommandContext) -> CommandResult {
    let config = match load_config(COMMAND, ctx) {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let file_path = detect_config_path(ctx.load.config_path.as_deref());
    let file_doc = file_path.as_deref().and_then(load_config_file_doc);
    let sources = Sources { file_path: file_path.as_deref(), file_doc: file_doc.as_ref() };

    let entries: Vec<ConfigEntry> = effective_values(&config)
        .into_iter()
        .map(|(key, env_keys, value)| ConfigEntry {
            key,
            value,
            source: sources.attribute(key, env_keys),
        })
        .collect();

    CommandResult::success_with(
        COMMAND,
        "effective config (source precedence: override > env > file > default)",
        &entries,
    )
}

type EffectiveValue = (&'static str, &'static [&'static str], String);

fn entry(key: &'static str, env_keys: &'static [&'static str], value: String) -> EffectiveValue {
    (key, env_keys, value)
}

fn effective_values(config: &AppConfig) -> Vec<EffectiveValue> {
    let api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    vec![
        entry("database.url", &["CONCIERGE_DATABASE_URL"], config.database.url.clone()),
        entry(
            "database.max_connections",
            &["CONCIERGE_DATABASE_MAX_CONNECTIONS"],
            config.database.max_connections.to_string(),
        ),
        entry(
            "database.timeout_secs",
            &["CONCIERGE_DATABASE_TIMEOUT_SECS"],
            config.database.timeout_secs.to_string(),
        ),
        entry("llm.provider", &["CONCIERGE_LLM_PROVIDER"], format!("{:?}", config.llm.provider)),
        entry("llm.model", &["CONCIERGE_LLM_MODEL"], config.llm.model.clone()),
        entry("llm.base_url", &["CONCIERGE_LLM_BASE_URL"], config.llm.resolved_base_url()),
        entry("llm.api_key", &["CONCIERGE_LLM_API_KEY"], api_key.to_string()),
        entry("llm.timeout_secs", &["CONCIERGE_LLM_TIMEOUT_SECS"], config.llm.timeout_secs.to_string()),
        entry("embedding.model", &["CONCIERGE_EMBEDDING_MODEL"], config.embedding.model.clone()),
        entry(
            "embedding.dimensions",
            &["CONCIERGE_EMBEDDING_DIMENSIONS"],
            config.embedding.dimensions.to_string(),
        ),
        entry("retrieval.top_k", &["CONCIERGE_RETRIEVAL_TOP_K"], config.retrieval.top_k.to_string()),
        entry(
            "retrieval.relevance_threshold",
            &["CONCIERGE_RETRIEVAL_RELEVANCE_THRESHOLD"],
            config.retrieval.relevance_threshold.to_string(),
        ),
        entry(
            "retrieval.history_turns",
            &["CONCIERGE_RETRIEVAL_HISTORY_TURNS"],
            config.retrieval.history_turns.to_string(),
        ),
        entry(
            "logging.level",
            &["CONCIERGE_LOGGING_LEVEL", "CONCIERGE_LOG_LEVEL"],
            config.logging.level.clone(),
        ),
        entry(
            "logging.format",
            &["CONCIERGE_LOGGING_FORMAT", "CONCIERGE_LOG_FORMAT"],
            format!("{:?}", config.logging.format),
        ),
    ]
}

struct Sources<'a> {
    file_path: Option<&'a Path>,
    file_doc: Option<&'a Value>,
}

impl Sources<'_> {
    fn attribute(&self, key_path: &str, env_keys: &[&str]) -> String {
        if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
            return format!("env ({env_key})");
        }

        if let Some(doc) = self.file_doc {
            if contains_path(doc, key_path) {
                let file_path = self
                    .file_path
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "config file".to_string());
                return format!("file ({file_path})");
            }
        }

        "default".to_string()
    }
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }
    [PathBuf::from("concierge.toml"), PathBuf::from("config/concierge.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: &Path) -> Option<Value> {
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::contains_path;

    #[test]
    fn dotted_paths_walk_nested_tables() {
        let doc: toml::Value = "[retrieval]\ntop_k = 3\n".parse().expect("toml");
        assert!(contains_path(&doc, "retrieval.top_k"));
        assert!(!contains_path(&doc, "retrieval.history_turns"));
        assert!(!contains_path(&doc, "llm.model"));
    }
}
