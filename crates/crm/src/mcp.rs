//! JSON-RPC client for the CRM tool-execution endpoint (`tools/call`, `tools/list`).

use std::time::Instant;

use leadline_core::config::CrmConfig;
use leadline_core::validation::Arguments;
use reqwest::header::ACCEPT;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::http::{build_client, map_send_error, read_body, JSON_AND_EVENT_STREAM};
use crate::normalize::normalize;
use crate::CrmError;

/// A tool advertised by the remote endpoint's `tools/list`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteTool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// JSON-RPC client for the CRM's tool-execution endpoint.
#[derive(Clone)]
pub struct McpClient {
    http: Client,
    endpoint: String,
    api_token: SecretString,
    location_id: String,
    timeout_secs: u64,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("endpoint", &self.endpoint)
            .field("location_id", &self.location_id)
            .field("timeout_secs", &self.timeout_secs)
            .finish_non_exhaustive()
    }
}

impl McpClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_token: SecretString,
        location_id: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, CrmError> {
        Ok(Self {
            http: build_client(timeout_secs)?,
            endpoint: endpoint.into(),
            api_token,
            location_id: location_id.into(),
            timeout_secs,
        })
    }

    pub fn from_config(config: &CrmConfig) -> Result<Self, CrmError> {
        Self::new(
            config.mcp_url.clone(),
            config.api_token.clone(),
            config.location_id.clone(),
            config.timeout_secs,
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn call_tool(&self, name: &str, arguments: &Arguments) -> Result<Value, CrmError> {
        self.rpc("tools/call", json!({ "name": name, "arguments": arguments })).await
    }

    pub async fn list_tools(&self) -> Result<Vec<RemoteTool>, CrmError> {
        let value = self.rpc("tools/list", json!({})).await?;
        let tools = value.get("tools").cloned().unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(tools).map_err(|error| CrmError::Decode(error.to_string()))
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, CrmError> {
        let request_id = Uuid::new_v4().to_string();
        let payload = build_request(&request_id, method, params);
        let started = Instant::now();

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.api_token.expose_secret())
            .header("locationId", self.location_id.as_str())
            .header(ACCEPT, JSON_AND_EVENT_STREAM)
            .json(&payload)
            .send()
            .await
            .map_err(|error| map_send_error(error, self.timeout_secs))?;

        let body = match read_body(response, self.timeout_secs).await {
            Ok(body) => body,
            Err(error) => {
                warn!(
                    event_name = "crm.rpc.http_failed",
                    correlation_id = %request_id,
                    method,
                    status = ?error.status(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "tool-execution endpoint returned an error status"
                );
                return Err(error);
            }
        };

        debug!(
            event_name = "crm.rpc.completed",
            correlation_id = %request_id,
            method,
            bytes = body.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tool-execution endpoint replied"
        );

        normalize(&body).map_err(CrmError::from)
    }
}

pub fn build_request(id: &str, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use leadline_core::validation::Arguments;
    use serde_json::{json, Value};

    use super::McpClient;
    use crate::normalize::NormalizeError;
    use crate::CrmError;

    #[derive(Clone, Default)]
    struct Seen {
        requests: Arc<Mutex<Vec<(HeaderMap, Value)>>>,
    }

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}/mcp/")
    }

    fn client(endpoint: String) -> McpClient {
        McpClient::new(endpoint, "pit-test".to_string().into(), "loc-1", 5).expect("client")
    }

    async fn record_and_reply(
        State(seen): State<Seen>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> impl IntoResponse {
        let method = body["method"].as_str().unwrap_or_default().to_string();
        let id = body["id"].clone();
        seen.requests.lock().expect("lock").push((headers, body));

        let result = if method == "tools/list" {
            json!({"tools": [{"name": "contacts_get-contact", "description": "Get a contact", "inputSchema": {"type": "object"}}]})
        } else {
            json!({"content": [{"type": "text", "text": "{\"success\":true,\"tags\":[\"vip\"]}"}]})
        };
        let frame = json!({"jsonrpc": "2.0", "id": id, "result": result});
        (
            [("content-type", "text/event-stream")],
            format!("event: message\ndata: {frame}\n\n"),
        )
    }

    #[tokio::test]
    async fn call_tool_sends_json_rpc_envelope_and_normalizes_event_stream() {
        let seen = Seen::default();
        let router = Router::new().route("/mcp/", post(record_and_reply)).with_state(seen.clone());
        let endpoint = spawn(router).await;

        let mut arguments = Arguments::new();
        arguments.insert("path_contactId".to_string(), json!("123"));
        arguments.insert("body_tags".to_string(), json!(["vip"]));

        let value = client(endpoint).call_tool("contacts_add-tags", &arguments).await.expect("call");
        assert_eq!(value, json!({"success": true, "tags": ["vip"]}));

        let requests = seen.requests.lock().expect("lock");
        let (headers, body) = &requests[0];
        assert_eq!(body["jsonrpc"], "2.0");
        assert_eq!(body["method"], "tools/call");
        assert_eq!(body["params"]["name"], "contacts_add-tags");
        assert_eq!(body["params"]["arguments"]["path_contactId"], "123");
        assert!(body["id"].as_str().is_some_and(|id| !id.is_empty()));
        assert_eq!(headers["authorization"], "Bearer pit-test");
        assert_eq!(headers["locationid"], "loc-1");
        assert_eq!(headers["accept"], "application/json, text/event-stream");
    }

    #[tokio::test]
    async fn request_ids_are_unique_per_call() {
        let seen = Seen::default();
        let router = Router::new().route("/mcp/", post(record_and_reply)).with_state(seen.clone());
        let client = client(spawn(router).await);

        client.call_tool("contacts_get-contacts", &Arguments::new()).await.expect("first");
        client.call_tool("contacts_get-contacts", &Arguments::new()).await.expect("second");

        let requests = seen.requests.lock().expect("lock");
        assert_ne!(requests[0].1["id"], requests[1].1["id"]);
    }

    #[tokio::test]
    async fn list_tools_reads_remote_catalog() {
        let seen = Seen::default();
        let router = Router::new().route("/mcp/", post(record_and_reply)).with_state(seen.clone());

        let tools = client(spawn(router).await).list_tools().await.expect("list");

        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "contacts_get-contact");
        assert_eq!(tools[0].input_schema, Some(json!({"type": "object"})));
    }

    #[tokio::test]
    async fn http_errors_carry_status_and_remote_message() {
        let router = Router::new().route(
            "/mcp/",
            post(|| async {
                (StatusCode::UNAUTHORIZED, Json(json!({"message": "Invalid JWT"})))
            }),
        );

        let error = client(spawn(router).await)
            .call_tool("contacts_get-contacts", &Arguments::new())
            .await
            .expect_err("401 must fail");

        assert_eq!(error.status(), Some(401));
        assert_eq!(error.remote_message(), Some("Invalid JWT"));
    }

    #[tokio::test]
    async fn json_rpc_errors_surface_as_protocol_errors() {
        let router = Router::new().route(
            "/mcp/",
            post(|| async {
                Json(json!({"jsonrpc": "2.0", "id": "x", "error": {"code": -32601, "message": "Method not found"}}))
            }),
        );

        let error = client(spawn(router).await)
            .call_tool("contacts_unknown", &Arguments::new())
            .await
            .expect_err("rpc error must fail");

        assert!(matches!(
            error,
            CrmError::Normalize(NormalizeError::Protocol { code: -32601, .. })
        ));
    }
}
