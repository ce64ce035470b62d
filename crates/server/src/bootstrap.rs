use std::sync::Arc;

use leadline_agent::{AgentRuntime, CrmToolDispatcher, LlmError, OpenAiCompatibleClient, RuntimeSettings, ToolGuardrails};
use leadline_core::catalog::{CatalogError, ToolCatalog};
use leadline_core::config::{AppConfig, ConfigError};
use leadline_core::defaults::{DefaultContext, DefaultPolicy};
use leadline_core::validation::RuleRegistry;
use leadline_crm::{CalendarClient, CrmError, McpClient};
use thiserror::Error;
use tracing::info;

use crate::chat::AppState;

pub struct Application {
    pub config: AppConfig,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("tool catalog could not be loaded: {0}")]
    Catalog(#[from] CatalogError),
    #[error("CRM client could not be built: {0}")]
    Crm(#[source] CrmError),
    #[error("model client could not be built: {0}")]
    Llm(#[source] LlmError),
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    config.validate()?;

    let catalog = Arc::new(ToolCatalog::load(config.gateway.catalog_path.as_deref())?);
    let guardrails = ToolGuardrails::new(
        catalog.clone(),
        Arc::new(RuleRegistry::builtin()),
        DefaultPolicy::builtin(),
        DefaultContext {
            location_id: config.crm.location_id.clone(),
            default_email_from: config.crm.default_email_from.clone(),
        },
    );

    let dispatcher = CrmToolDispatcher::new(
        McpClient::from_config(&config.crm).map_err(BootstrapError::Crm)?,
        CalendarClient::from_config(&config.crm).map_err(BootstrapError::Crm)?,
    );
    let llm = OpenAiCompatibleClient::from_config(&config.llm).map_err(BootstrapError::Llm)?;

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        tools = catalog.len(),
        llm_provider = config.llm.provider.as_str(),
        llm_model = %config.llm.model,
        "agent runtime assembled"
    );

    let runtime = AgentRuntime::new(
        Arc::new(llm),
        Arc::new(dispatcher),
        guardrails,
        RuntimeSettings::from_config(&config),
    );
    Ok(Application { state: AppState::new(runtime), config })
}
