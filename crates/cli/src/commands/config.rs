use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use leadline_core::config::AppConfig;
use secrecy::ExposeSecret;
use serde_json::{json, Map, Value};
use toml::Value as TomlValue;

use crate::commands::{load_config, CommandResult};

pub fn run() -> CommandResult {
    let config = match load_config("config") {
        Ok(config) => config,
        Err(result) => return result,
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let sources = SourceLookup { doc: config_file_doc.as_ref(), path: config_file_path.as_deref() };

    let mut entries = Map::new();
    for Field { key, value, env_keys } in effective_values(&config) {
        entries.insert(
            key.to_string(),
            json!({ "value": value, "source": sources.field_source(key, env_keys) }),
        );
    }

    CommandResult::report(
        "config",
        0,
        json!({
            "precedence": "env > file > default",
            "config_file": config_file_path.map(|path| path.display().to_string()),
            "values": entries,
        }),
    )
}

struct Field {
    key: &'static str,
    value: Value,
    env_keys: &'static [&'static str],
}

fn field(key: &'static str, value: Value, env_keys: &'static [&'static str]) -> Field {
    Field { key, value, env_keys }
}

fn effective_values(config: &AppConfig) -> Vec<Field> {
    let optional = |value: Option<String>| value.map_or(Value::from("<unset>"), Value::from);

    vec![
        field(
            "crm.api_token",
            Value::from(redact_token(config.crm.api_token.expose_secret())),
            &["LEADLINE_CRM_API_TOKEN", "GHL_PIT_TOKEN"],
        ),
        field(
            "crm.location_id",
            Value::from(config.crm.location_id.clone()),
            &["LEADLINE_CRM_LOCATION_ID", "GHL_LOCATION_ID"],
        ),
        field("crm.mcp_url", Value::from(config.crm.mcp_url.clone()), &["LEADLINE_CRM_MCP_URL"]),
        field(
            "crm.rest_base_url",
            Value::from(config.crm.rest_base_url.clone()),
            &["LEADLINE_CRM_REST_BASE_URL"],
        ),
        field("crm.timeout_secs", Value::from(config.crm.timeout_secs), &["LEADLINE_CRM_TIMEOUT_SECS"]),
        field(
            "crm.default_email_from",
            Value::from(config.crm.default_email_from.clone()),
            &["LEADLINE_CRM_DEFAULT_EMAIL_FROM", "DEFAULT_EMAIL_FROM"],
        ),
        field("llm.provider", Value::from(config.llm.provider.as_str()), &["LEADLINE_LLM_PROVIDER"]),
        field(
            "llm.api_key",
            Value::from(if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" }),
            &["LEADLINE_LLM_API_KEY", "GROQ_API_KEY"],
        ),
        field("llm.base_url", Value::from(config.llm.effective_base_url()), &["LEADLINE_LLM_BASE_URL"]),
        field("llm.model", Value::from(config.llm.model.clone()), &["LEADLINE_LLM_MODEL"]),
        field("llm.temperature", Value::from(config.llm.temperature), &["LEADLINE_LLM_TEMPERATURE"]),
        field("llm.top_p", Value::from(config.llm.top_p), &["LEADLINE_LLM_TOP_P"]),
        field(
            "llm.max_completion_tokens",
            Value::from(config.llm.max_completion_tokens),
            &["LEADLINE_LLM_MAX_COMPLETION_TOKENS"],
        ),
        field("llm.timeout_secs", Value::from(config.llm.timeout_secs), &["LEADLINE_LLM_TIMEOUT_SECS"]),
        field(
            "gateway.history_window",
            Value::from(config.gateway.history_window),
            &["LEADLINE_GATEWAY_HISTORY_WINDOW"],
        ),
        field(
            "gateway.tool_concurrency",
            Value::from(config.gateway.tool_concurrency),
            &["LEADLINE_GATEWAY_TOOL_CONCURRENCY"],
        ),
        field(
            "gateway.system_prompt",
            Value::from(if config.gateway.system_prompt.is_some() { "<custom>" } else { "<built-in>" }),
            &["LEADLINE_GATEWAY_SYSTEM_PROMPT"],
        ),
        field(
            "gateway.catalog_path",
            optional(config.gateway.catalog_path.as_ref().map(|path| path.display().to_string())),
            &["LEADLINE_GATEWAY_CATALOG_PATH"],
        ),
        field(
            "server.bind_address",
            Value::from(config.server.bind_address.clone()),
            &["LEADLINE_SERVER_BIND_ADDRESS"],
        ),
        field("server.port", Value::from(config.server.port), &["LEADLINE_SERVER_PORT", "PORT"]),
        field(
            "server.static_dir",
            optional(config.server.static_dir.as_ref().map(|path| path.display().to_string())),
            &["LEADLINE_SERVER_STATIC_DIR"],
        ),
        field(
            "server.graceful_shutdown_secs",
            Value::from(config.server.graceful_shutdown_secs),
            &["LEADLINE_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        field(
            "logging.level",
            Value::from(config.logging.level.clone()),
            &["LEADLINE_LOGGING_LEVEL", "LEADLINE_LOG_LEVEL"],
        ),
        field(
            "logging.format",
            Value::from(format!("{:?}", config.logging.format).to_ascii_lowercase()),
            &["LEADLINE_LOGGING_FORMAT", "LEADLINE_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("leadline.toml"), PathBuf::from("config/leadline.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<TomlValue> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<TomlValue>().ok()
}

struct SourceLookup<'a> {
    doc: Option<&'a TomlValue>,
    path: Option<&'a Path>,
}

impl SourceLookup<'_> {
    fn field_source(&self, key_path: &str, env_keys: &[&str]) -> String {
        if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
            return format!("env ({env_key})");
        }

        if let Some(doc) = self.doc {
            if contains_path(doc, key_path) {
                let file_path = self
                    .path
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "config file".to_string());
                return format!("file ({file_path})");
            }
        }

        "default".to_string()
    }
}

fn contains_path(root: &TomlValue, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

/// Keeps a short prefix so operators can tell tokens apart without exposing them.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
