//! Executes admitted calls against the CRM and maps every failure onto the outcome taxonomy.
//!
//! Calendar tools go to the REST API; everything else goes through the tool-execution
//! endpoint. Raw HTTP bodies and protocol errors never leave this module as user text.

use std::time::Instant;

use async_trait::async_trait;
use leadline_core::outcome::{FailureKind, ToolOutcome};
use leadline_core::validation::Arguments;
use leadline_crm::calendar::{
    self, AppointmentRequest, CalendarListQuery, CalendarOperation, SlotQuery,
};
use leadline_crm::{CalendarClient, CrmError, McpClient, NormalizeError};
use serde_json::Value;
use tracing::{info, warn};

pub const GENERIC_FAILURE_MESSAGE: &str = "I encountered an issue while trying to complete that action. Let me try again or suggest an alternative approach.";
const CONTACT_NOT_FOUND_MESSAGE: &str =
    "I couldn't find that contact. Let me search for them first and try again.";
const EMPTY_MESSAGE_MESSAGE: &str = "The message couldn't be sent. Please make sure you've provided the message content and all required information.";
const UNSUPPORTED_CALL_MESSAGE: &str =
    "I'm having trouble with that request. Let me try a different approach.";
const AUTHENTICATION_MESSAGE: &str =
    "I couldn't authenticate with the CRM. Please check the access token configuration.";
const FORBIDDEN_MESSAGE: &str =
    "Access denied. You may not have permission to perform that action in this location.";
const NOT_FOUND_MESSAGE: &str = "I couldn't find the record you asked about.";
const TIMEOUT_MESSAGE: &str = "The CRM took too long to respond. Please try again in a moment.";
const CONFLICT_MESSAGE: &str =
    "Time slot conflict. The selected time slot may already be booked.";

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Arguments are already defaults-resolved and validated.
    async fn dispatch(&self, tool_name: &str, arguments: &Arguments) -> ToolOutcome;
}

/// Which backend served the call; drives entity-specific messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    Calendar(CalendarOperation),
    Remote,
}

impl Route {
    pub fn for_tool(tool_name: &str) -> Self {
        CalendarOperation::for_tool(tool_name).map_or(Self::Remote, Self::Calendar)
    }

    fn label(self) -> &'static str {
        match self {
            Self::Calendar(operation) => operation.as_str(),
            Self::Remote => "tool_call",
        }
    }
}

#[derive(Clone, Debug)]
pub struct CrmToolDispatcher {
    mcp: McpClient,
    calendar: CalendarClient,
}

impl CrmToolDispatcher {
    pub fn new(mcp: McpClient, calendar: CalendarClient) -> Self {
        Self { mcp, calendar }
    }

    async fn call(&self, route: Route, tool_name: &str, arguments: &Arguments) -> Result<Value, CrmError> {
        match route {
            Route::Remote => self.mcp.call_tool(tool_name, arguments).await,
            Route::Calendar(CalendarOperation::ListCalendars) => {
                let query = CalendarListQuery::from_arguments(arguments, self.calendar.home_location())?;
                self.calendar.list_calendars(&query).await
            }
            Route::Calendar(CalendarOperation::CalendarDetails) => {
                let calendar_id = calendar::calendar_id(arguments)?;
                self.calendar.calendar_details(&calendar_id).await
            }
            Route::Calendar(CalendarOperation::FreeSlots) => {
                let query = SlotQuery::from_arguments(arguments)?;
                self.calendar.free_slots(&query).await
            }
            Route::Calendar(CalendarOperation::CreateAppointment) => {
                let appointment =
                    AppointmentRequest::from_arguments(arguments, self.calendar.home_location())?;
                self.calendar.create_appointment(&appointment).await
            }
        }
    }
}

#[async_trait]
impl ToolExecutor for CrmToolDispatcher {
    async fn dispatch(&self, tool_name: &str, arguments: &Arguments) -> ToolOutcome {
        let route = Route::for_tool(tool_name);
        let started = Instant::now();
        let result = self.call(route, tool_name, arguments).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(value) => {
                info!(
                    event_name = "tool.dispatch.succeeded",
                    tool = tool_name,
                    route = route.label(),
                    elapsed_ms,
                    "tool call succeeded"
                );
                ToolOutcome::success(value)
            }
            Err(error) => {
                let outcome = classify(route, &error);
                warn!(
                    event_name = "tool.dispatch.failed",
                    tool = tool_name,
                    route = route.label(),
                    kind = ?outcome_kind(&outcome),
                    technical_detail = %error,
                    elapsed_ms,
                    "tool call failed"
                );
                outcome
            }
        }
    }
}

fn outcome_kind(outcome: &ToolOutcome) -> Option<FailureKind> {
    match outcome {
        ToolOutcome::ExecutionFailure { kind, .. } => Some(*kind),
        _ => None,
    }
}

/// Maps a CRM failure to an `ExecutionFailure`, keeping the raw detail out of the user message.
pub fn classify(route: Route, error: &CrmError) -> ToolOutcome {
    let detail = error.to_string();
    let (kind, message) = match error {
        CrmError::Http { status, .. } => classify_status(route, *status, error),
        CrmError::Timeout(_) => (FailureKind::TransportError, TIMEOUT_MESSAGE.to_string()),
        CrmError::Network(_) | CrmError::Client(_) => {
            (FailureKind::TransportError, GENERIC_FAILURE_MESSAGE.to_string())
        }
        CrmError::InvalidArguments(reason) => (FailureKind::InvalidRequest, reason.clone()),
        CrmError::Decode(_) => (FailureKind::ProtocolDecodeError, GENERIC_FAILURE_MESSAGE.to_string()),
        CrmError::Normalize(NormalizeError::Protocol { message, .. }) => {
            (FailureKind::ProtocolError, friendly_message(message))
        }
        CrmError::Normalize(NormalizeError::ProtocolDecode { .. }) => {
            (FailureKind::ProtocolDecodeError, GENERIC_FAILURE_MESSAGE.to_string())
        }
        CrmError::Normalize(NormalizeError::RemoteApplication { message, .. }) => {
            (FailureKind::RemoteApplicationError, friendly_message(message))
        }
    };
    ToolOutcome::failed(kind, message, detail)
}

fn classify_status(route: Route, status: u16, error: &CrmError) -> (FailureKind, String) {
    let remote = error.remote_message();
    match (status, route) {
        (401, _) => (FailureKind::AuthenticationFailure, AUTHENTICATION_MESSAGE.to_string()),
        (403, Route::Calendar(operation)) => {
            (FailureKind::PermissionDenied, operation.forbidden_message().to_string())
        }
        (403, Route::Remote) => (FailureKind::PermissionDenied, FORBIDDEN_MESSAGE.to_string()),
        (404, Route::Calendar(operation)) => {
            (FailureKind::NotFound, operation.not_found_message().to_string())
        }
        (404, Route::Remote) => {
            let message = remote
                .map(friendly_message)
                .filter(|message| message != GENERIC_FAILURE_MESSAGE)
                .unwrap_or_else(|| NOT_FOUND_MESSAGE.to_string());
            (FailureKind::NotFound, message)
        }
        (400, Route::Calendar(operation)) => {
            (FailureKind::InvalidRequest, operation.bad_request_message(remote))
        }
        (400, Route::Remote) => (FailureKind::InvalidRequest, remote_bad_request_message(remote)),
        (409, Route::Calendar(operation)) if operation.reports_conflicts() => {
            (FailureKind::Conflict, CONFLICT_MESSAGE.to_string())
        }
        _ => (FailureKind::TransportError, GENERIC_FAILURE_MESSAGE.to_string()),
    }
}

/// Known remote texts get their friendly rewrite; anything else is echoed as the reason.
fn remote_bad_request_message(remote: Option<&str>) -> String {
    match remote.map(str::trim).filter(|message| !message.is_empty()) {
        Some(message) => {
            let friendly = friendly_message(message);
            if friendly == GENERIC_FAILURE_MESSAGE {
                format!("Bad request: {message}")
            } else {
                friendly
            }
        }
        None => GENERIC_FAILURE_MESSAGE.to_string(),
    }
}

/// Rewrites known remote error texts into something a person can act on.
pub fn friendly_message(detail: &str) -> String {
    let message = if detail.contains("Contact with id") && detail.contains("not found") {
        CONTACT_NOT_FOUND_MESSAGE
    } else if detail.contains("There is no message or attachments") {
        EMPTY_MESSAGE_MESSAGE
    } else if detail.contains("tool calling") && detail.contains("not supported") {
        UNSUPPORTED_CALL_MESSAGE
    } else {
        GENERIC_FAILURE_MESSAGE
    };
    message.to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::{StatusCode, Uri};
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use leadline_core::outcome::{FailureKind, ToolOutcome};
    use leadline_core::validation::Arguments;
    use leadline_crm::calendar::CalendarOperation;
    use leadline_crm::{CalendarClient, CrmError, McpClient, NormalizeError};
    use serde_json::{json, Value};

    use super::{
        classify, friendly_message, CrmToolDispatcher, Route, ToolExecutor, CONFLICT_MESSAGE,
        CONTACT_NOT_FOUND_MESSAGE, GENERIC_FAILURE_MESSAGE,
    };

    fn http(status: u16, message: Option<&str>) -> CrmError {
        CrmError::Http {
            status,
            body: r#"{"message":"raw upstream body"}"#.to_string(),
            message: message.map(str::to_string),
        }
    }

    fn failure(outcome: ToolOutcome) -> (FailureKind, String, String) {
        match outcome {
            ToolOutcome::ExecutionFailure { kind, user_message, technical_detail } => {
                (kind, user_message, technical_detail)
            }
            other => panic!("expected execution failure, got {other:?}"),
        }
    }

    #[test]
    fn status_codes_map_to_failure_kinds() {
        let details = Route::Calendar(CalendarOperation::CalendarDetails);
        let booking = Route::Calendar(CalendarOperation::CreateAppointment);

        let cases = [
            (Route::Remote, http(401, None), FailureKind::AuthenticationFailure),
            (details, http(403, None), FailureKind::PermissionDenied),
            (details, http(404, None), FailureKind::NotFound),
            (details, http(400, Some("bad date")), FailureKind::InvalidRequest),
            (booking, http(409, None), FailureKind::Conflict),
            (details, http(409, None), FailureKind::TransportError),
            (Route::Remote, http(502, None), FailureKind::TransportError),
            (Route::Remote, CrmError::Timeout(30), FailureKind::TransportError),
        ];

        for (route, error, expected) in cases {
            let (kind, _, _) = failure(classify(route, &error));
            assert_eq!(kind, expected, "{route:?} / {error}");
        }
    }

    #[test]
    fn calendar_messages_are_entity_specific() {
        let (_, message, detail) =
            failure(classify(Route::Calendar(CalendarOperation::CalendarDetails), &http(404, None)));
        assert_eq!(message, "Calendar not found. Please check the calendar ID.");
        assert!(detail.contains("raw upstream body"));

        let (_, message, _) = failure(classify(
            Route::Calendar(CalendarOperation::FreeSlots),
            &http(400, Some("startDate must be a number")),
        ));
        assert_eq!(message, "Bad request: startDate must be a number");

        let (_, message, _) =
            failure(classify(Route::Calendar(CalendarOperation::CreateAppointment), &http(409, None)));
        assert_eq!(message, CONFLICT_MESSAGE);
    }

    #[test]
    fn remote_bad_requests_echo_the_reason() {
        let (kind, message, detail) =
            failure(classify(Route::Remote, &http(400, Some("email must be an email"))));
        assert_eq!(kind, FailureKind::InvalidRequest);
        assert_eq!(message, "Bad request: email must be an email");
        assert!(detail.contains("raw upstream body"));
        assert!(!message.contains("raw upstream body"));

        let (_, message, _) =
            failure(classify(Route::Remote, &http(400, Some("Contact with id c-9 not found"))));
        assert_eq!(message, CONTACT_NOT_FOUND_MESSAGE);

        let (_, message, _) = failure(classify(Route::Remote, &http(400, None)));
        assert_eq!(message, GENERIC_FAILURE_MESSAGE);
    }

    #[test]
    fn normalize_failures_keep_their_kind() {
        let protocol = CrmError::Normalize(NormalizeError::Protocol {
            code: -32602,
            message: "Contact with id abc not found".to_string(),
        });
        let (kind, message, detail) = failure(classify(Route::Remote, &protocol));
        assert_eq!(kind, FailureKind::ProtocolError);
        assert_eq!(message, CONTACT_NOT_FOUND_MESSAGE);
        assert!(detail.contains("abc"));

        let decode = CrmError::Normalize(NormalizeError::ProtocolDecode {
            message: "expected value".to_string(),
            raw: "{nope".to_string(),
        });
        assert_eq!(failure(classify(Route::Remote, &decode)).0, FailureKind::ProtocolDecodeError);

        let remote = CrmError::Normalize(NormalizeError::RemoteApplication {
            message: "There is no message or attachments".to_string(),
            payload: json!({"success": false}),
        });
        let (kind, message, _) = failure(classify(Route::Remote, &remote));
        assert_eq!(kind, FailureKind::RemoteApplicationError);
        assert!(message.starts_with("The message couldn't be sent."));
    }

    #[test]
    fn unknown_remote_text_falls_back_to_generic_message() {
        assert_eq!(friendly_message("socket hang up"), GENERIC_FAILURE_MESSAGE);
        assert_eq!(
            friendly_message("tool calling is not supported for this model"),
            "I'm having trouble with that request. Let me try a different approach."
        );
    }

    #[test]
    fn argument_errors_surface_their_reason() {
        let error = CrmError::InvalidArguments("Date range cannot exceed 1 month".to_string());
        let (kind, message, _) =
            failure(classify(Route::Calendar(CalendarOperation::FreeSlots), &error));
        assert_eq!(kind, FailureKind::InvalidRequest);
        assert_eq!(message, "Date range cannot exceed 1 month");
    }

    type Hits = Arc<Mutex<Vec<String>>>;

    async fn spawn_crm(hits: Hits) -> String {
        async fn rpc(State(hits): State<Hits>, Json(body): Json<Value>) -> impl IntoResponse {
            hits.lock().expect("lock").push(format!("rpc:{}", body["params"]["name"].as_str().unwrap_or("")));
            let frame = json!({
                "jsonrpc": "2.0",
                "id": body["id"],
                "result": {"content": [{"type": "text", "text": "{\"contacts\":[{\"id\":\"c-1\"}]}"}]}
            });
            ([("content-type", "text/event-stream")], format!("event: message\ndata: {frame}\n\n"))
        }

        async fn calendar(State(hits): State<Hits>, uri: Uri) -> impl IntoResponse {
            hits.lock().expect("lock").push(format!("rest:{}", uri.path()));
            (StatusCode::NOT_FOUND, Json(json!({"message": "Calendar missing"})))
        }

        let router = Router::new()
            .route("/mcp", post(rpc))
            .route("/calendars/{id}", get(calendar))
            .with_state(hits);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}")
    }

    fn args(value: Value) -> Arguments {
        match value {
            Value::Object(map) => map,
            _ => Arguments::new(),
        }
    }

    #[tokio::test]
    async fn dispatch_routes_calendar_tools_to_rest_and_the_rest_to_rpc() {
        let hits: Hits = Arc::default();
        let base = spawn_crm(hits.clone()).await;
        let dispatcher = CrmToolDispatcher::new(
            McpClient::new(format!("{base}/mcp"), "pit-token".to_string().into(), "loc-1", 5)
                .expect("mcp client"),
            CalendarClient::new(base, "pit-token".to_string().into(), "loc-1", 5)
                .expect("calendar client"),
        );

        let outcome = dispatcher
            .dispatch("contacts_get-contacts", &args(json!({"query_query": "ada"})))
            .await;
        assert_eq!(outcome, ToolOutcome::success(json!({"contacts": [{"id": "c-1"}]})));

        let outcome = dispatcher
            .dispatch("calendars_get-calendar-details", &args(json!({"path_calendarId": "cal-9"})))
            .await;
        let (kind, message, _) = failure(outcome);
        assert_eq!(kind, FailureKind::NotFound);
        assert_eq!(message, "Calendar not found. Please check the calendar ID.");

        let outcome = dispatcher
            .dispatch("calendars_get-calendar-details", &args(json!({"path_calendarId": 42})))
            .await;
        assert_eq!(failure(outcome).0, FailureKind::NotFound);

        assert_eq!(
            *hits.lock().expect("lock"),
            vec![
                "rpc:contacts_get-contacts".to_string(),
                "rest:/calendars/cal-9".to_string(),
                "rest:/calendars/42".to_string(),
            ]
        );
    }
}
