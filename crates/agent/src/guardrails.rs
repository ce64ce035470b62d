//! Pre-dispatch gate: every proposed call passes through here before any network I/O.
//!
//! The gate parses the model's argument text, rejects tools outside the catalog, fills
//! environment defaults and runs the per-tool validation rule. A rejection is turned into a
//! `ValidationFailure` outcome the model can read and react to.

use std::sync::Arc;

use leadline_core::catalog::ToolCatalog;
use leadline_core::defaults::{DefaultContext, DefaultPolicy};
use leadline_core::outcome::{ToolInvocation, ToolOutcome};
use leadline_core::transcript::ToolCallRequest;
use leadline_core::validation::{Arguments, RuleRegistry};
use serde_json::Value;
use tracing::debug;

#[derive(Clone, Debug, PartialEq)]
pub enum GuardrailDecision {
    Allow { invocation: ToolInvocation, confirmation_message: Option<String> },
    Reject { arguments: Value, outcome: ToolOutcome },
}

impl GuardrailDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}

#[derive(Clone, Debug)]
pub struct ToolGuardrails {
    catalog: Arc<ToolCatalog>,
    rules: Arc<RuleRegistry>,
    defaults: DefaultPolicy,
    context: DefaultContext,
}

impl ToolGuardrails {
    pub fn new(
        catalog: Arc<ToolCatalog>,
        rules: Arc<RuleRegistry>,
        defaults: DefaultPolicy,
        context: DefaultContext,
    ) -> Self {
        Self { catalog, rules, defaults, context }
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn evaluate(&self, call: &ToolCallRequest) -> GuardrailDecision {
        let name = call.function.name.as_str();
        match parse_arguments(&call.function.arguments) {
            Ok(arguments) => self.evaluate_arguments(&call.id, name, arguments),
            Err(reason) => GuardrailDecision::Reject {
                arguments: Value::String(call.function.arguments.clone()),
                outcome: ToolOutcome::ValidationFailure {
                    missing: Vec::new(),
                    errors: vec![reason],
                    message: format!(
                        "I couldn't read the parameters for {name}. Please send them again as a JSON object."
                    ),
                },
            },
        }
    }

    /// Same gate for callers that already hold a parsed argument object.
    pub fn evaluate_arguments(
        &self,
        call_id: &str,
        tool_name: &str,
        arguments: Arguments,
    ) -> GuardrailDecision {
        let raw_arguments = Value::Object(arguments.clone());

        if !self.catalog.contains(tool_name) {
            debug!(event_name = "guardrail.unknown_tool", tool = tool_name, "unknown tool rejected");
            return GuardrailDecision::Reject {
                arguments: raw_arguments,
                outcome: ToolOutcome::ValidationFailure {
                    missing: Vec::new(),
                    errors: vec![format!("Unknown tool: {tool_name}")],
                    message: format!(
                        "I don't have a tool called {tool_name}. Please use one of the available CRM tools."
                    ),
                },
            };
        }

        let resolved_arguments = self.defaults.apply(tool_name, &arguments, &self.context);
        let report = self.rules.validate(tool_name, &resolved_arguments);
        if !report.valid {
            debug!(
                event_name = "guardrail.validation_failed",
                tool = tool_name,
                missing = ?report.missing,
                errors = ?report.errors,
                "proposed call failed validation"
            );
            return GuardrailDecision::Reject {
                arguments: Value::Object(resolved_arguments),
                outcome: ToolOutcome::rejected(&report),
            };
        }

        GuardrailDecision::Allow {
            invocation: ToolInvocation {
                call_id: call_id.to_string(),
                tool_name: tool_name.to_string(),
                raw_arguments,
                resolved_arguments,
            },
            confirmation_message: report.confirmation_message,
        }
    }
}

/// Blank text and `null` mean "no arguments"; anything else must be a JSON object.
fn parse_arguments(raw: &str) -> Result<Arguments, String> {
    if raw.trim().is_empty() {
        return Ok(Arguments::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(arguments)) => Ok(arguments),
        Ok(Value::Null) => Ok(Arguments::new()),
        Ok(other) => Err(format!("arguments must be a JSON object, got {}", json_kind(&other))),
        Err(error) => Err(format!("arguments are not valid JSON: {error}")),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
