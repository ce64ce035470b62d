//! Shared reqwest plumbing: client construction and status/body mapping into `CrmError`.

use std::time::Duration;

use reqwest::{Client, Response};
use serde_json::Value;

use crate::CrmError;

pub const JSON_AND_EVENT_STREAM: &str = "application/json, text/event-stream";

pub fn build_client(timeout_secs: u64) -> Result<Client, CrmError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|error| CrmError::Client(error.to_string()))
}

pub fn map_send_error(error: reqwest::Error, timeout_secs: u64) -> CrmError {
    if error.is_timeout() {
        CrmError::Timeout(timeout_secs)
    } else {
        CrmError::Network(error.to_string())
    }
}

/// Reads the body and turns non-2xx statuses into [`CrmError::Http`].
pub async fn read_body(response: Response, timeout_secs: u64) -> Result<String, CrmError> {
    let status = response.status();
    let body = response.text().await.map_err(|error| map_send_error(error, timeout_secs))?;

    if !status.is_success() {
        let message = remote_message(&body);
        return Err(CrmError::Http { status: status.as_u16(), body: truncate(&body, 2000), message });
    }

    Ok(body)
}

pub async fn read_json(response: Response, timeout_secs: u64) -> Result<Value, CrmError> {
    let body = read_body(response, timeout_secs).await?;
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).map_err(|error| CrmError::Decode(error.to_string()))
}

/// Pulls `message` (string or list of strings) or `error` out of a JSON error body.
pub fn remote_message(body: &str) -> Option<String> {
    let value = serde_json::from_str::<Value>(body).ok()?;
    match value.get("message") {
        Some(Value::String(message)) if !message.trim().is_empty() => {
            return Some(message.clone());
        }
        Some(Value::Array(items)) => {
            let joined =
                items.iter().filter_map(Value::as_str).collect::<Vec<_>>().join("; ");
            if !joined.is_empty() {
                return Some(joined);
            }
        }
        _ => {}
    }
    match value.get("error") {
        Some(Value::String(error)) if !error.trim().is_empty() => Some(error.clone()),
        Some(Value::Object(error)) => {
            error.get("message").and_then(Value::as_str).map(str::to_string)
        }
        _ => None,
    }
}

fn truncate(body: &str, max_chars: usize) -> String {
    body.chars().take(max_chars).collect()
}
