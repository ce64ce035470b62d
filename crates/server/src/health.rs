use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::chat::AppState;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CatalogCheck {
    pub status: &'static str,
    pub tools: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub catalog: CatalogCheck,
    pub checked_at: String,
}

pub fn router(state: AppState) -> Router {
    Router::new().route("/api/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let tools = state.runtime.guardrails().catalog().len();
    let ready = tools > 0;

    let payload = HealthResponse {
        status: if ready { "ok" } else { "degraded" },
        service: "leadline-server",
        catalog: CatalogCheck { status: if ready { "ready" } else { "empty" }, tools },
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

#[cfg(test)]
mod tests {
    use axum::{extract::State, http::StatusCode, Json};

    use crate::chat::tests::state;
    use crate::health::health;

    #[tokio::test]
    async fn health_reports_catalog_size() {
        let (status, Json(payload)) = health(State(state(Vec::new()))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ok");
        assert_eq!(payload.service, "leadline-server");
        assert_eq!(payload.catalog.tools, 21);
        assert!(!payload.checked_at.is_empty());
    }
}
