use std::sync::Arc;

use anyhow::Context;
use leadline_agent::{CrmToolDispatcher, GuardrailDecision, ToolExecutor, ToolGuardrails};
use leadline_core::catalog::ToolCatalog;
use leadline_core::config::AppConfig;
use leadline_core::defaults::{DefaultContext, DefaultPolicy};
use leadline_core::validation::{Arguments, RuleRegistry};
use leadline_crm::{CalendarClient, McpClient};
use serde_json::{json, Value};

use crate::commands::{block_on, load_config, CommandResult, EXIT_CONFIG, EXIT_FAILED};

pub fn run(tool: &str, raw_args: &str) -> CommandResult {
    let arguments = match parse_arguments(raw_args) {
        Ok(arguments) => arguments,
        Err(message) => return CommandResult::failure("call", "invalid_arguments", message, EXIT_CONFIG),
    };
    let config = match load_config("call") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let guardrails = match build_guardrails(&config) {
        Ok(guardrails) => guardrails,
        Err(error) => {
            return CommandResult::failure("call", "catalog", format!("{error:#}"), EXIT_CONFIG)
        }
    };

    let invocation = match guardrails.evaluate_arguments("cli", tool, arguments) {
        GuardrailDecision::Allow { invocation, .. } => invocation,
        GuardrailDecision::Reject { arguments, outcome } => {
            return CommandResult::report(
                "call",
                EXIT_FAILED,
                json!({ "tool": tool, "arguments": arguments, "outcome": outcome.diagnostic() }),
            );
        }
    };

    let dispatched = block_on("call", async {
        let dispatcher = build_dispatcher(&config)?;
        Ok::<_, anyhow::Error>(
            dispatcher.dispatch(&invocation.tool_name, &invocation.resolved_arguments).await,
        )
    });
    let outcome = match dispatched {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(error)) => {
            return CommandResult::failure("call", "crm_client", format!("{error:#}"), EXIT_FAILED)
        }
        Err(result) => return result,
    };

    let exit_code = if outcome.is_success() { 0 } else { EXIT_FAILED };
    CommandResult::report(
        "call",
        exit_code,
        json!({
            "tool": invocation.tool_name,
            "arguments": Value::Object(invocation.resolved_arguments),
            "outcome": outcome.diagnostic(),
        }),
    )
}

fn parse_arguments(raw: &str) -> Result<Arguments, String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(arguments)) => Ok(arguments),
        Ok(_) => Err("--args must be a JSON object".to_string()),
        Err(error) => Err(format!("--args is not valid JSON: {error}")),
    }
}

fn build_guardrails(config: &AppConfig) -> anyhow::Result<ToolGuardrails> {
    let catalog = ToolCatalog::load(config.gateway.catalog_path.as_deref())
        .context("could not load the tool catalog")?;
    Ok(ToolGuardrails::new(
        Arc::new(catalog),
        Arc::new(RuleRegistry::builtin()),
        DefaultPolicy::builtin(),
        DefaultContext {
            location_id: config.crm.location_id.clone(),
            default_email_from: config.crm.default_email_from.clone(),
        },
    ))
}

fn build_dispatcher(config: &AppConfig) -> anyhow::Result<CrmToolDispatcher> {
    let mcp = McpClient::from_config(&config.crm).context("could not build the tool-execution client")?;
    let calendar =
        CalendarClient::from_config(&config.crm).context("could not build the calendar client")?;
    Ok(CrmToolDispatcher::new(mcp, calendar))
}

#[cfg(test)]
mod tests {
    use super::parse_arguments;

    #[test]
    fn arguments_must_be_a_json_object() {
        assert!(parse_arguments(r#"{"path_contactId":"c-1"}"#).is_ok());
        assert_eq!(parse_arguments("[1]").err().as_deref(), Some("--args must be a JSON object"));
        assert!(parse_arguments("{nope").is_err());
    }
}
