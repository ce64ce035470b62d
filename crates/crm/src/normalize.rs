//! Decoding of tool-execution replies into one canonical value or a classified error.
//!
//! A reply may be a JSON-RPC envelope, an event-stream transcript, a typed content list,
//! JSON embedded in text, or any nesting of those. Each layer is peeled by one step below,
//! in a fixed order.

use serde_json::{json, Value};
use thiserror::Error;

pub type CanonicalResult = Result<Value, NormalizeError>;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum NormalizeError {
    /// The call was rejected at the JSON-RPC level before the tool ran.
    #[error("JSON-RPC error {code}: {message}")]
    Protocol { code: i64, message: String },
    #[error("failed to decode tool response: {message}")]
    ProtocolDecode { message: String, raw: String },
    /// The tool ran and its decoded payload reports a business failure.
    #[error("CRM API error: {message}")]
    RemoteApplication { message: String, payload: Value },
}

/// Normalizes a raw response body. A body that is not JSON is either an event stream or
/// a text payload.
pub fn normalize(raw: &str) -> CanonicalResult {
    match serde_json::from_str::<Value>(raw) {
        Ok(body) => normalize_value(body),
        Err(_) => match event_stream_result(raw)? {
            Some(result) => decode_payload(result),
            None => checked(decode_text(raw.to_string())?),
        },
    }
}

pub fn normalize_value(body: Value) -> CanonicalResult {
    if let Some(error) = protocol_error(&body) {
        return Err(error);
    }
    decode_result(unwrap_envelope(body))
}

/// A string result is final unless it carries event-stream frames.
fn decode_result(result: Value) -> CanonicalResult {
    match result {
        Value::String(text) => match event_stream_result(&text)? {
            Some(inner) => decode_payload(inner),
            None => checked(Value::String(text)),
        },
        other => decode_payload(other),
    }
}

/// Only text assembled from content parts is a candidate for embedded JSON.
fn decode_payload(value: Value) -> CanonicalResult {
    match text_content(&value) {
        Some(text) => checked(decode_text(text)?),
        None => checked(value),
    }
}

fn checked(value: Value) -> CanonicalResult {
    match application_error(&value) {
        Some(message) => Err(NormalizeError::RemoteApplication { message, payload: value }),
        None => Ok(value),
    }
}

fn protocol_error(envelope: &Value) -> Option<NormalizeError> {
    let error = envelope.as_object()?.get("error").filter(|error| !error.is_null())?;
    let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string());
    Some(NormalizeError::Protocol { code, message })
}

fn unwrap_envelope(mut envelope: Value) -> Value {
    match envelope.as_object_mut().and_then(|object| object.remove("result")) {
        Some(result) if !result.is_null() => result,
        _ => envelope,
    }
}

/// Returns `Ok(None)` when `text` carries no `data:` lines at all.
fn event_stream_result(text: &str) -> Result<Option<Value>, NormalizeError> {
    let mut frames = text
        .lines()
        .filter_map(|line| line.trim_start().strip_prefix("data:"))
        .map(str::trim)
        .peekable();
    if frames.peek().is_none() {
        return Ok(None);
    }

    let mut error_frame = None;
    for frame in frames {
        // A malformed frame does not spoil the others.
        let Ok(mut parsed) = serde_json::from_str::<Value>(frame) else {
            continue;
        };
        if let Some(result) = parsed.as_object_mut().and_then(|object| object.remove("result")) {
            if !result.is_null() {
                return Ok(Some(result));
            }
        }
        if error_frame.is_none() {
            error_frame = protocol_error(&parsed);
        }
    }

    Err(error_frame.unwrap_or_else(|| NormalizeError::ProtocolDecode {
        message: "event stream carried no frame with a result".to_string(),
        raw: text.to_string(),
    }))
}

fn text_content(value: &Value) -> Option<String> {
    let parts = value.get("content")?.as_array()?;
    let text = parts
        .iter()
        .filter(|part| part.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<String>();
    Some(text)
}

fn decode_text(text: String) -> CanonicalResult {
    let trimmed = text.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|error| NormalizeError::ProtocolDecode {
            message: error.to_string(),
            raw: text.clone(),
        });
    }
    Ok(json!({ "text": text }))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::String(text) => !text.is_empty(),
        _ => true,
    }
}

fn render_error(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}

fn application_error(value: &Value) -> Option<String> {
    let object = value.as_object()?;

    let explicit_failure = object.get("success") == Some(&Value::Bool(false));
    let status = object.get("status").and_then(Value::as_f64);
    let failing_status = status.is_some_and(|status| status >= 400.0);
    let nested_error =
        object.get("data").and_then(|data| data.get("error")).filter(|error| is_truthy(error));

    if !(explicit_failure || failing_status || nested_error.is_some()) {
        return None;
    }

    let message = nested_error
        .or_else(|| object.get("error").filter(|error| is_truthy(error)))
        .map(render_error)
        .unwrap_or_else(|| match status {
            Some(status) => format!("API Error (status {status})"),
            None => "API Error (status unknown)".to_string(),
        });
    Some(message)
}
