//! Chat-completions client used for both the tool-proposal and the synthesis pass.

use std::pin::Pin;
use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use leadline_core::config::LlmConfig;
use leadline_core::transcript::{ChatMessage, ToolCallRequest};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model request failed: {0}")]
    Transport(String),
    #[error("model request timed out")]
    Timeout,
    #[error("model returned HTTP {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("model API error: {0}")]
    Api(String),
    #[error("could not decode model response: {0}")]
    Decode(String),
    #[error("model returned no choices")]
    EmptyResponse,
}

impl From<reqwest::Error> for LlmError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(error.to_string())
        }
    }
}

/// Either plain text or proposed tool calls (occasionally both).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Completion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl Completion {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: Some(content.into()), tool_calls: Vec::new() }
    }

    pub fn with_tool_calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self { content: None, tool_calls }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// `tools` is `None` when tool proposals are disabled for this pass.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Value]>,
    ) -> Result<Completion, LlmError>;

    async fn stream(&self, messages: &[ChatMessage]) -> Result<TextStream, LlmError> {
        let completion = self.complete(messages, None).await?;
        let text = completion.content.unwrap_or_default();
        Ok(Box::pin(futures::stream::once(async move { Ok(text) })))
    }
}

pub struct OpenAiCompatibleClient {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    temperature: f32,
    top_p: f32,
    max_completion_tokens: u32,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| LlmError::Transport(error.to_string()))?;

        Ok(Self {
            http,
            base_url: config.effective_base_url(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            top_p: config.top_p,
            max_completion_tokens: config.max_completion_tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, messages: &[ChatMessage], tools: Option<&[Value]>, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "top_p": self.top_p,
            "max_completion_tokens": self.max_completion_tokens,
            "stream": stream,
        });
        if let Some(tools) = tools.filter(|tools| !tools.is_empty()) {
            body["tools"] = Value::Array(tools.to_vec());
            body["tool_choice"] = json!("auto");
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, LlmError> {
        let mut request = self.http.post(format!("{}/chat/completions", self.base_url)).json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|value| extract_error(&value))
            .unwrap_or_else(|| truncate_for_error(&text, 500));
        Err(LlmError::Status { status: status.as_u16(), detail })
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Value]>,
    ) -> Result<Completion, LlmError> {
        let body = self.request_body(messages, tools, false);
        let response = self.post(&body).await?;
        let value: Value =
            response.json().await.map_err(|error| LlmError::Decode(error.to_string()))?;

        if let Some(detail) = extract_error(&value) {
            return Err(LlmError::Api(detail));
        }

        let completion = parse_completion(&value)?;
        debug!(
            event_name = "llm.completion.received",
            model = %self.model,
            tool_calls = completion.tool_calls.len(),
            has_content = completion.content.is_some(),
            "model completion received"
        );
        Ok(completion)
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<TextStream, LlmError> {
        let body = self.request_body(messages, None, true);
        let response = self.post(&body).await?;

        let mut bytes = response.bytes_stream();
        let stream = try_stream! {
            let mut buffer = Vec::new();
            let mut finished = false;
            'frames: while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(LlmError::from)?;
                buffer.extend_from_slice(&chunk);

                while let Some(frame) = take_frame(&mut buffer) {
                    for line in frame.lines() {
                        match parse_sse_line(line)? {
                            SseLine::Delta(text) => {
                                yield text;
                            }
                            SseLine::Done => {
                                finished = true;
                                break 'frames;
                            }
                            SseLine::Skip => {}
                        }
                    }
                }
            }

            if !finished {
                let rest = String::from_utf8_lossy(&buffer).into_owned();
                for line in rest.lines() {
                    if let SseLine::Delta(text) = parse_sse_line(line)? {
                        yield text;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Removes and decodes the first complete frame. Bytes stay raw until the frame
/// boundary so characters split across network chunks survive.
fn take_frame(buffer: &mut Vec<u8>) -> Option<String> {
    let pos = buffer.windows(2).position(|window| window == b"\n\n")?;
    let frame = String::from_utf8_lossy(&buffer[..pos]).into_owned();
    buffer.drain(..pos + 2);
    Some(frame)
}

#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Delta(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseLine, LlmError> {
    let Some(payload) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return Ok(SseLine::Done);
    }

    let Ok(value) = serde_json::from_str::<Value>(payload) else {
        return Ok(SseLine::Skip);
    };
    if let Some(detail) = extract_error(&value) {
        return Err(LlmError::Api(detail));
    }

    let text = value
        .get("choices")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|choice| choice.pointer("/delta/content").and_then(Value::as_str))
        .collect::<String>();
    if text.is_empty() {
        Ok(SseLine::Skip)
    } else {
        Ok(SseLine::Delta(text))
    }
}

fn parse_completion(value: &Value) -> Result<Completion, LlmError> {
    let message = value
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .ok_or(LlmError::EmptyResponse)?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .filter(|content| !content.is_empty())
        .map(str::to_string);

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| calls.iter().enumerate().filter_map(|(index, call)| parse_tool_call(index, call)).collect())
        .unwrap_or_default();

    Ok(Completion { content, tool_calls })
}

fn parse_tool_call(index: usize, call: &Value) -> Option<ToolCallRequest> {
    let function = call.get("function")?;
    let name = function.get("name").and_then(Value::as_str)?;
    let arguments = match function.get("arguments") {
        Some(Value::String(raw)) => raw.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    let id = call
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("call_{index}"));
    Some(ToolCallRequest::new(id, name, arguments))
}

fn extract_error(value: &Value) -> Option<String> {
    let error = value.get("error")?;
    match error {
        Value::String(message) => Some(message.clone()),
        Value::Object(object) => object
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some(error.to_string())),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn truncate_for_error(text: &str, max_chars: usize) -> String {
    let mut truncated = text.chars().take(max_chars).collect::<String>();
    if text.chars().count() > max_chars {
        truncated.push_str("...");
    }
    truncated
}
