//! Transport layer implementations.
//!
//! JSON-RPC wire types shared by stdio and HTTP, plus the streamable HTTP
//! transport:
//! - `POST /mcp` with per-session budgets keyed by `Mcp-Session-Id`
//! - admission rejections rendered as 429/503/504 with `Retry-After`
//! - inbound request limiting and a hard per-request timeout

use std::borrow::Cow;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    BoxError, Json, Router,
    error_handling::HandleErrorLayer,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use governor::{
    DefaultDirectRateLimiter, Quota, RateLimiter,
    clock::{Clock, DefaultClock},
};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::protocol::{self, Dispatch};
use crate::config::http;
use crate::error::{AdmissionError, retry_after_secs};
use crate::governance::{CircuitState, Governance};
use crate::orchestrator::{Orchestrator, ToolSession};

/// Header carrying the session id in both directions.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 error.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcResponse {
    /// JSON-RPC version constant.
    const VERSION: &'static str = "2.0";

    #[must_use]
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(Self::VERSION),
            result: Some(result),
            error: None,
            id,
        }
    }

    #[must_use]
    pub fn error(id: Option<serde_json::Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(Self::VERSION),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }

    #[must_use]
    pub fn error_with_data(
        id: Option<serde_json::Value>,
        code: i32,
        message: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        let mut response = Self::error(id, code, message);
        if let Some(error) = response.error.as_mut() {
            error.data = Some(data);
        }
        response
    }
}

/// MCP tool info for tools/list response.
#[derive(Debug, Serialize)]
pub struct McpToolInfo {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// HTTP transport tuning.
#[derive(Debug, Clone, Copy)]
pub struct HttpOptions {
    /// Idle time after which a session and its budget are dropped.
    pub session_idle: Duration,
    /// Live sessions kept at once.
    pub max_sessions: u64,
    /// Sustained inbound requests per second.
    pub inbound_per_second: NonZeroU32,
    /// Inbound burst allowance.
    pub inbound_burst: NonZeroU32,
    /// Hard ceiling on one request.
    pub request_timeout: Duration,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            session_idle: http::SESSION_IDLE,
            max_sessions: http::MAX_SESSIONS,
            inbound_per_second: NonZeroU32::new(http::INBOUND_PER_SECOND).unwrap_or(NonZeroU32::MIN),
            inbound_burst: NonZeroU32::new(http::INBOUND_BURST).unwrap_or(NonZeroU32::MIN),
            request_timeout: http::REQUEST_TIMEOUT,
        }
    }
}

/// Shared state for HTTP handlers.
pub struct HttpState {
    pub orchestrator: Orchestrator,
    pub governance: Governance,
    /// Live sessions, expired after `session_idle`.
    pub sessions: Cache<String, Arc<ToolSession>>,
    /// Inbound request limiter, independent of upstream throttling.
    pub inbound: DefaultDirectRateLimiter,
}

impl HttpState {
    /// Build handler state from an orchestrator and its governance bundle.
    #[must_use]
    pub fn new(orchestrator: Orchestrator, governance: Governance, options: &HttpOptions) -> Self {
        let sessions = Cache::builder()
            .max_capacity(options.max_sessions)
            .time_to_idle(options.session_idle)
            .build();
        let quota = Quota::per_second(options.inbound_per_second).allow_burst(options.inbound_burst);

        Self {
            orchestrator,
            governance,
            sessions,
            inbound: RateLimiter::direct(quota),
        }
    }

    /// Resolve the caller's session, starting a new one if the header is
    /// missing or names an expired session.
    pub async fn session_for(&self, headers: &HeaderMap) -> Arc<ToolSession> {
        let requested = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok());
        if let Some(id) = requested {
            if let Some(session) = self.sessions.get(id).await {
                return session;
            }
            tracing::debug!(session = id, "Unknown or expired session, starting a new one");
        }

        let session = self.orchestrator.start_session();
        self.sessions.insert(session.id().to_string(), Arc::clone(&session)).await;
        tracing::info!(session = %session.id(), "Session started");
        session
    }
}

impl std::fmt::Debug for HttpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpState")
            .field("orchestrator", &self.orchestrator)
            .field("sessions", &self.sessions.entry_count())
            .finish()
    }
}

/// Create the HTTP router for MCP.
pub fn create_router(state: Arc<HttpState>, request_timeout: Duration) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(HandleErrorLayer::new(handle_middleware_error))
        .timeout(request_timeout);

    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/mcp", post(handle_mcp_post))
        .layer(middleware)
        .with_state(state)
}

async fn handle_middleware_error(err: BoxError) -> Response {
    if err.is::<tower::timeout::error::Elapsed>() {
        tracing::warn!("HTTP request timed out");
        return (
            StatusCode::GATEWAY_TIMEOUT,
            Json(serde_json::json!({ "error": "request timed out" })),
        )
            .into_response();
    }

    tracing::error!(error = %err, "Unhandled middleware error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": err.to_string() })),
    )
        .into_response()
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "biomed-mcp",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let concurrency = state.governance.concurrency.stats();
    let degraded: Vec<&str> = concurrency
        .tools
        .iter()
        .filter(|(_, stats)| stats.circuit_state == CircuitState::Open)
        .map(|(name, _)| name.as_str())
        .collect();
    let limiter = &state.governance.rate_limiter;

    Json(serde_json::json!({
        "status": if degraded.is_empty() { "ready" } else { "degraded" },
        "service": "biomed-mcp",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.entry_count(),
        "tools": state.orchestrator.registry().tools().count(),
        "degraded_tools": degraded,
        "governance": {
            "concurrency": concurrency,
            "rate_limiter": {
                "available_tokens": limiter.get_available_tokens().await,
                "capacity": limiter.capacity(),
            },
        },
    }))
}

/// Handle POST requests to /mcp (Streamable HTTP transport)
async fn handle_mcp_post(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Json(req): Json<JsonRpcRequest>,
) -> Response {
    if let Err(not_until) = state.inbound.check() {
        let wait = not_until.wait_time_from(DefaultClock::default().now());
        tracing::warn!(method = %req.method, ?wait, "Inbound request limit reached");
        let error = AdmissionError::RateLimitExceeded {
            scope: "inbound".to_string(),
            retry_after: wait,
            queue_depth: 0,
        };
        return admission_response(req.id, &error);
    }

    tracing::debug!(method = %req.method, "Handling MCP POST request");

    let session = state.session_for(&headers).await;
    let mut response = match protocol::dispatch(&state.orchestrator, &session, req).await {
        Dispatch::Reply(reply) => Json(reply).into_response(),
        Dispatch::Accepted => StatusCode::ACCEPTED.into_response(),
        Dispatch::Rejected { id, error } => admission_response(id, &error),
    };

    if let Ok(value) = HeaderValue::from_str(session.id()) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

/// 429 for saturation, 503 for an open breaker, 504 for a slot timeout.
fn admission_response(id: Option<serde_json::Value>, error: &AdmissionError) -> Response {
    let status = StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
    let body = protocol::admission_error_response(id, error);
    let mut response = (status, Json(body)).into_response();

    if let Some(retry_after) = error.retry_after() {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs(retry_after)));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_with_data_keeps_payload() {
        let response = JsonRpcResponse::error_with_data(
            Some(serde_json::json!(7)),
            -32001,
            "busy",
            serde_json::json!({"error_code": "RATE_LIMIT_EXCEEDED"}),
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["error"]["data"]["error_code"], "RATE_LIMIT_EXCEEDED");
        assert_eq!(json["id"], 7);
        assert!(json.get("result").is_none());
    }

    #[test]
    fn test_admission_response_status_and_retry_after() {
        let error = AdmissionError::CircuitOpen {
            tool: "pubmed_search".into(),
            retry_after: Duration::from_millis(2500),
        };
        let response = admission_response(Some(serde_json::json!(1)), &error);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "3");

        let timeout = AdmissionError::Timeout {
            scope: "global".into(),
            waited: Duration::from_secs(1),
        };
        let response = admission_response(None, &timeout);
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }
}
