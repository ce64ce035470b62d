use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub crm: CrmConfig,
    pub llm: LlmConfig,
    pub gateway: GatewayConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct CrmConfig {
    pub api_token: SecretString,
    pub location_id: String,
    pub mcp_url: String,
    pub rest_base_url: String,
    pub timeout_secs: u64,
    pub default_email_from: String,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_completion_tokens: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub history_window: usize,
    pub tool_concurrency: usize,
    pub system_prompt: Option<String>,
    pub catalog_path: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub static_dir: Option<PathBuf>,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Groq,
    OpenAi,
    Ollama,
}

impl LlmProvider {
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Ollama => "http://localhost:11434/v1",
        }
    }

    pub fn requires_api_key(self) -> bool {
        matches!(self, Self::Groq | Self::OpenAi)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Groq => "groq",
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub crm_api_token: Option<String>,
    pub crm_location_id: Option<String>,
    pub server_port: Option<u16>,
    pub catalog_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            crm: CrmConfig {
                api_token: String::new().into(),
                location_id: String::new(),
                mcp_url: "https://services.leadconnectorhq.com/mcp/".to_string(),
                rest_base_url: "https://services.leadconnectorhq.com".to_string(),
                timeout_secs: 30,
                default_email_from: "noreply@yourcompany.com".to_string(),
            },
            llm: LlmConfig {
                provider: LlmProvider::Groq,
                api_key: None,
                base_url: None,
                model: "meta-llama/llama-4-maverick-17b-128e-instruct".to_string(),
                temperature: 0.6,
                top_p: 1.0,
                max_completion_tokens: 4096,
                timeout_secs: 60,
            },
            gateway: GatewayConfig {
                history_window: 20,
                tool_concurrency: 4,
                system_prompt: None,
                catalog_path: None,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 3000,
                static_dir: Some(PathBuf::from("public")),
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "groq" => Ok(Self::Groq),
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected groq|openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl LlmConfig {
    /// Configured base URL, or the provider's public endpoint.
    pub fn effective_base_url(&self) -> String {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(self.provider.default_base_url())
            .trim_end_matches('/')
            .to_string()
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("leadline.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(crm) = patch.crm {
            if let Some(crm_api_token_value) = crm.api_token {
                self.crm.api_token = secret_value(crm_api_token_value);
            }
            if let Some(location_id) = crm.location_id {
                self.crm.location_id = location_id;
            }
            if let Some(mcp_url) = crm.mcp_url {
                self.crm.mcp_url = mcp_url;
            }
            if let Some(rest_base_url) = crm.rest_base_url {
                self.crm.rest_base_url = rest_base_url;
            }
            if let Some(timeout_secs) = crm.timeout_secs {
                self.crm.timeout_secs = timeout_secs;
            }
            if let Some(default_email_from) = crm.default_email_from {
                self.crm.default_email_from = default_email_from;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(top_p) = llm.top_p {
                self.llm.top_p = top_p;
            }
            if let Some(max_completion_tokens) = llm.max_completion_tokens {
                self.llm.max_completion_tokens = max_completion_tokens;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(gateway) = patch.gateway {
            if let Some(history_window) = gateway.history_window {
                self.gateway.history_window = history_window;
            }
            if let Some(tool_concurrency) = gateway.tool_concurrency {
                self.gateway.tool_concurrency = tool_concurrency;
            }
            if let Some(system_prompt) = gateway.system_prompt {
                self.gateway.system_prompt = Some(system_prompt);
            }
            if let Some(catalog_path) = gateway.catalog_path {
                self.gateway.catalog_path = Some(catalog_path);
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(static_dir) = server.static_dir {
                self.server.static_dir = Some(static_dir);
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("LEADLINE_CRM_API_TOKEN").or_else(|| read_env("GHL_PIT_TOKEN"))
        {
            self.crm.api_token = secret_value(value);
        }
        if let Some(value) =
            read_env("LEADLINE_CRM_LOCATION_ID").or_else(|| read_env("GHL_LOCATION_ID"))
        {
            self.crm.location_id = value;
        }
        if let Some(value) = read_env("LEADLINE_CRM_MCP_URL") {
            self.crm.mcp_url = value;
        }
        if let Some(value) = read_env("LEADLINE_CRM_REST_BASE_URL") {
            self.crm.rest_base_url = value;
        }
        if let Some(value) = read_env("LEADLINE_CRM_TIMEOUT_SECS") {
            self.crm.timeout_secs = parse_u64("LEADLINE_CRM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) =
            read_env("LEADLINE_CRM_DEFAULT_EMAIL_FROM").or_else(|| read_env("DEFAULT_EMAIL_FROM"))
        {
            self.crm.default_email_from = value;
        }

        if let Some(value) = read_env("LEADLINE_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("LEADLINE_LLM_API_KEY").or_else(|| read_env("GROQ_API_KEY"))
        {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("LEADLINE_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("LEADLINE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("LEADLINE_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f32("LEADLINE_LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_LLM_TOP_P") {
            self.llm.top_p = parse_f32("LEADLINE_LLM_TOP_P", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_LLM_MAX_COMPLETION_TOKENS") {
            self.llm.max_completion_tokens =
                parse_u32("LEADLINE_LLM_MAX_COMPLETION_TOKENS", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("LEADLINE_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADLINE_GATEWAY_HISTORY_WINDOW") {
            self.gateway.history_window = parse_usize("LEADLINE_GATEWAY_HISTORY_WINDOW", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_GATEWAY_TOOL_CONCURRENCY") {
            self.gateway.tool_concurrency =
                parse_usize("LEADLINE_GATEWAY_TOOL_CONCURRENCY", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_GATEWAY_SYSTEM_PROMPT") {
            self.gateway.system_prompt = Some(value);
        }
        if let Some(value) = read_env("LEADLINE_GATEWAY_CATALOG_PATH") {
            self.gateway.catalog_path = Some(PathBuf::from(value));
        }

        if let Some(value) = read_env("LEADLINE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("LEADLINE_SERVER_PORT").or_else(|| read_env("PORT")) {
            self.server.port = parse_u16("LEADLINE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_SERVER_STATIC_DIR") {
            self.server.static_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("LEADLINE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("LEADLINE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("LEADLINE_LOGGING_LEVEL").or_else(|| read_env("LEADLINE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("LEADLINE_LOGGING_FORMAT").or_else(|| read_env("LEADLINE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(crm_api_token) = overrides.crm_api_token {
            self.crm.api_token = secret_value(crm_api_token);
        }
        if let Some(crm_location_id) = overrides.crm_location_id {
            self.crm.location_id = crm_location_id;
        }
        if let Some(server_port) = overrides.server_port {
            self.server.port = server_port;
        }
        if let Some(catalog_path) = overrides.catalog_path {
            self.gateway.catalog_path = Some(catalog_path);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_crm(&self.crm)?;
        validate_llm(&self.llm)?;
        validate_gateway(&self.gateway)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("leadline.toml"), PathBuf::from("config/leadline.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn validate_crm(crm: &CrmConfig) -> Result<(), ConfigError> {
    if crm.api_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "crm.api_token is required. Create a private integration token in the CRM settings \
             and set LEADLINE_CRM_API_TOKEN (or GHL_PIT_TOKEN)"
                .to_string(),
        ));
    }

    if crm.location_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "crm.location_id is required. Set LEADLINE_CRM_LOCATION_ID (or GHL_LOCATION_ID) to \
             the sub-account id"
                .to_string(),
        ));
    }

    if !is_http_url(&crm.mcp_url) {
        return Err(ConfigError::Validation(
            "crm.mcp_url must start with http:// or https://".to_string(),
        ));
    }
    if !is_http_url(&crm.rest_base_url) {
        return Err(ConfigError::Validation(
            "crm.rest_base_url must start with http:// or https://".to_string(),
        ));
    }

    if crm.timeout_secs == 0 || crm.timeout_secs > 300 {
        return Err(ConfigError::Validation("crm.timeout_secs must be in range 1..=300".to_string()));
    }

    if !crm.default_email_from.contains('@') {
        return Err(ConfigError::Validation(
            "crm.default_email_from must be an email address".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation("llm.timeout_secs must be in range 1..=300".to_string()));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation("llm.temperature must be in range 0..=2".to_string()));
    }
    if !(0.0..=1.0).contains(&llm.top_p) {
        return Err(ConfigError::Validation("llm.top_p must be in range 0..=1".to_string()));
    }
    if llm.max_completion_tokens == 0 {
        return Err(ConfigError::Validation(
            "llm.max_completion_tokens must be greater than zero".to_string(),
        ));
    }
    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if llm.provider.requires_api_key() {
        let missing = llm
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(format!(
                "llm.api_key is required for the {} provider (set LEADLINE_LLM_API_KEY or \
                 GROQ_API_KEY)",
                llm.provider.as_str()
            )));
        }
    }

    if !is_http_url(&llm.effective_base_url()) {
        return Err(ConfigError::Validation(
            "llm.base_url must start with http:// or https://".to_string(),
        ));
    }

    Ok(())
}

fn validate_gateway(gateway: &GatewayConfig) -> Result<(), ConfigError> {
    if gateway.history_window == 0 {
        return Err(ConfigError::Validation(
            "gateway.history_window must be greater than zero".to_string(),
        ));
    }

    if gateway.tool_concurrency == 0 {
        return Err(ConfigError::Validation(
            "gateway.tool_concurrency must be at least 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse::<u16>().map_err(|_| invalid(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| invalid(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| invalid(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| invalid(key, value))
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.trim().parse::<f32>().map_err(|_| invalid(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    crm: Option<CrmPatch>,
    llm: Option<LlmPatch>,
    gateway: Option<GatewayPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct CrmPatch {
    api_token: Option<String>,
    location_id: Option<String>,
    mcp_url: Option<String>,
    rest_base_url: Option<String>,
    timeout_secs: Option<u64>,
    default_email_from: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    max_completion_tokens: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct GatewayPatch {
    history_window: Option<usize>,
    tool_concurrency: Option<usize>,
    system_prompt: Option<String>,
    catalog_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    static_dir: Option<PathBuf>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
