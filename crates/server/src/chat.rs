//! Chat endpoints: one blocking round, one streamed round, and the catalog listing.

use std::convert::Infallible;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use leadline_agent::{AgentRuntime, ChatEvent};
use leadline_core::errors::{ApplicationError, InterfaceError};
use leadline_core::outcome::ToolCallRecord;
use leadline_core::transcript::Transcript;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub runtime: AgentRuntime,
}

impl AppState {
    pub fn new(runtime: AgentRuntime) -> Self {
        Self { runtime }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "conversationHistory")]
    pub conversation_history: Transcript,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub success: bool,
    pub message: String,
    #[serde(rename = "toolCalls")]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(rename = "conversationHistory")]
    pub conversation_history: Transcript,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(rename = "correlationId")]
    pub correlation_id: String,
}

#[derive(Debug, Serialize)]
pub struct ToolsResponse {
    pub tools: Vec<Value>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/chat/stream", post(chat_stream))
        .route("/api/tools", get(list_tools))
        .with_state(state)
}

pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();

    let output = state
        .runtime
        .run_round(&request.message, request.conversation_history)
        .await
        .map_err(|error| api_error(ApplicationError::from(error).into_interface(&correlation_id)))?;

    info!(
        event_name = "http.chat.completed",
        correlation_id = %correlation_id,
        tool_calls = output.tool_calls.len(),
        "chat request served"
    );

    Ok(Json(ChatResponse {
        success: true,
        message: output.reply,
        tool_calls: output.tool_calls,
        conversation_history: output.transcript,
    }))
}

pub async fn chat_stream(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    if request.message.trim().is_empty() {
        let correlation_id = Uuid::new_v4().to_string();
        let error = ApplicationError::InvalidRequest("message must not be empty".to_string());
        return api_error(error.into_interface(correlation_id)).into_response();
    }

    let events = state
        .runtime
        .run_round_streaming(request.message, request.conversation_history)
        .map(|event| Ok::<_, Infallible>(sse_event(&event)));

    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

pub async fn list_tools(State(state): State<AppState>) -> Json<ToolsResponse> {
    Json(ToolsResponse { tools: state.runtime.guardrails().catalog().model_tools() })
}

fn sse_event(event: &ChatEvent) -> Event {
    Event::default().json_data(event).unwrap_or_else(|_| {
        Event::default().data(r#"{"type":"error","error":"event could not be encoded"}"#)
    })
}

fn status_for(error: &InterfaceError) -> StatusCode {
    match error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::BadGateway { .. } => StatusCode::BAD_GATEWAY,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(error: InterfaceError) -> ApiError {
    let status = status_for(&error);
    warn!(
        event_name = "http.chat.failed",
        correlation_id = %error.correlation_id(),
        status = status.as_u16(),
        error = %error,
        "chat request failed"
    );
    (
        status,
        Json(ErrorResponse {
            success: false,
            error: error.user_message().to_string(),
            correlation_id: error.correlation_id().to_string(),
        }),
    )
}
