//! Per-call outcomes: success, validation failure, or classified execution failure.

use std::fmt;

use serde::Serialize;
use serde_json::{json, Value};

use crate::validation::{Arguments, ValidationReport};

/// One proposed call, from the model's raw arguments to the defaults-resolved map.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolInvocation {
    pub call_id: String,
    pub tool_name: String,
    pub raw_arguments: Value,
    pub resolved_arguments: Arguments,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    AuthenticationFailure,
    PermissionDenied,
    NotFound,
    InvalidRequest,
    Conflict,
    TransportError,
    ProtocolError,
    ProtocolDecodeError,
    RemoteApplicationError,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthenticationFailure => "authentication_failure",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::InvalidRequest => "invalid_request",
            Self::Conflict => "conflict",
            Self::TransportError => "transport_error",
            Self::ProtocolError => "protocol_error",
            Self::ProtocolDecodeError => "protocol_decode_error",
            Self::RemoteApplicationError => "remote_application_error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success {
        value: Value,
    },
    ValidationFailure {
        missing: Vec<String>,
        errors: Vec<String>,
        message: String,
    },
    ExecutionFailure {
        kind: FailureKind,
        user_message: String,
        /// Diagnostics only; never serialized to the model or the HTTP caller.
        #[serde(skip_serializing)]
        technical_detail: String,
    },
}

impl ToolOutcome {
    pub fn success(value: Value) -> Self {
        Self::Success { value }
    }

    pub fn rejected(report: &ValidationReport) -> Self {
        Self::ValidationFailure {
            missing: report.missing.clone(),
            errors: report.errors.clone(),
            message: report.rejection_message(),
        }
    }

    pub fn failed(
        kind: FailureKind,
        user_message: impl Into<String>,
        technical_detail: impl Into<String>,
    ) -> Self {
        Self::ExecutionFailure {
            kind,
            user_message: user_message.into(),
            technical_detail: technical_detail.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::ValidationFailure { .. } => "validation_failure",
            Self::ExecutionFailure { .. } => "execution_failure",
        }
    }

    /// Short user-safe explanation for failures.
    pub fn user_message(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::ValidationFailure { message, .. } => Some(message),
            Self::ExecutionFailure { user_message, .. } => Some(user_message),
        }
    }

    /// Content of the tool-role transcript entry answering this call.
    pub fn model_content(&self) -> String {
        match self {
            Self::Success { value } => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
            Self::ValidationFailure { message, .. } => {
                json!({ "validation_error": true, "message": message }).to_string()
            }
            Self::ExecutionFailure { kind, user_message, .. } => {
                json!({ "error": true, "kind": kind, "message": user_message }).to_string()
            }
        }
    }

    /// Operator view that keeps the technical detail.
    pub fn diagnostic(&self) -> Value {
        match self {
            Self::ExecutionFailure { kind, user_message, technical_detail } => json!({
                "status": "execution_failure",
                "kind": kind,
                "user_message": user_message,
                "technical_detail": technical_detail,
            }),
            other => serde_json::to_value(other).unwrap_or(Value::Null),
        }
    }
}

/// Caller-facing summary of one executed call.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub arguments: Value,
    #[serde(flatten)]
    pub outcome: ToolOutcome,
}
