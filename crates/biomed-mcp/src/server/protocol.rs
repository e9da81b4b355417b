//! MCP method dispatch shared by every transport.
//!
//! Transports decide how an admission rejection reaches the client
//! (JSON-RPC error over stdio, HTTP status over `/mcp`), so dispatch hands
//! it back as [`Dispatch::Rejected`] instead of rendering it.

use serde_json::{Value, json};

use super::transport::{JsonRpcRequest, JsonRpcResponse, McpToolInfo};
use crate::error::AdmissionError;
use crate::orchestrator::{CallOutcome, Orchestrator, ToolSession};
use crate::tools::ToolRegistry;

/// Protocol version offered when the client does not ask for one.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC error codes.
pub mod codes {
    /// Invalid JSON.
    pub const PARSE_ERROR: i32 = -32700;
    /// Unknown method.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Bad or missing params.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Global or per-tool capacity exhausted.
    pub const RATE_LIMITED: i32 = -32001;
    /// Tool circuit breaker open.
    pub const CIRCUIT_OPEN: i32 = -32002;
    /// Gave up waiting for a slot.
    pub const ADMISSION_TIMEOUT: i32 = -32003;
}

/// What a transport should do with one request.
#[derive(Debug)]
pub enum Dispatch {
    /// Send this response.
    Reply(JsonRpcResponse),
    /// Notification; nothing to send.
    Accepted,
    /// Admission control turned the call away.
    Rejected {
        /// Request id to echo.
        id: Option<Value>,
        /// Why.
        error: AdmissionError,
    },
}

/// Route one request to its handler.
pub async fn dispatch(orchestrator: &Orchestrator, session: &ToolSession, req: JsonRpcRequest) -> Dispatch {
    let is_notification = req.id.is_none();

    match req.method.as_str() {
        "initialize" => Dispatch::Reply(JsonRpcResponse::success(req.id, handle_initialize(&req.params))),
        "notifications/initialized" | "initialized" | "notifications/cancelled" if is_notification => {
            Dispatch::Accepted
        }
        "notifications/initialized" | "initialized" | "notifications/cancelled" | "ping" => {
            Dispatch::Reply(JsonRpcResponse::success(req.id, json!({})))
        }
        "tools/list" => Dispatch::Reply(handle_tools_list(req.id, orchestrator.registry())),
        "tools/call" => handle_tools_call(req.id, &req.params, orchestrator, session).await,
        _ if is_notification => Dispatch::Accepted,
        _ => Dispatch::Reply(JsonRpcResponse::error(
            req.id,
            codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", req.method),
        )),
    }
}

/// Render an admission rejection as a JSON-RPC error carrying its payload.
#[must_use]
pub fn admission_error_response(id: Option<Value>, error: &AdmissionError) -> JsonRpcResponse {
    let code = match error {
        AdmissionError::RateLimitExceeded { .. } => codes::RATE_LIMITED,
        AdmissionError::CircuitOpen { .. } => codes::CIRCUIT_OPEN,
        AdmissionError::Timeout { .. } => codes::ADMISSION_TIMEOUT,
        AdmissionError::CostExceedsCapacity { .. } => codes::INVALID_PARAMS,
    };
    JsonRpcResponse::error_with_data(id, code, error.to_string(), error.to_payload())
}

fn handle_initialize(params: &Value) -> Value {
    let protocol_version = params
        .get("protocolVersion")
        .and_then(|v| v.as_str())
        .unwrap_or(DEFAULT_PROTOCOL_VERSION);

    tracing::info!("MCP initialize: protocol version {}", protocol_version);

    json!({
        "protocolVersion": protocol_version,
        "capabilities": {
            "tools": {
                "listChanged": false
            }
        },
        "serverInfo": {
            "name": "biomed-mcp",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

fn handle_tools_list(id: Option<Value>, registry: &ToolRegistry) -> JsonRpcResponse {
    let tool_list: Vec<McpToolInfo> = registry
        .tools()
        .map(|t| McpToolInfo {
            name: t.name().to_string(),
            description: t.description().to_string(),
            input_schema: t.input_schema(),
        })
        .collect();

    JsonRpcResponse::success(id, json!({ "tools": tool_list }))
}

async fn handle_tools_call(
    id: Option<Value>,
    params: &Value,
    orchestrator: &Orchestrator,
    session: &ToolSession,
) -> Dispatch {
    let Some(tool_name) = params.get("name").and_then(|v| v.as_str()) else {
        return Dispatch::Reply(JsonRpcResponse::error(id, codes::INVALID_PARAMS, "Missing 'name' parameter"));
    };

    if orchestrator.registry().get(tool_name).is_none() {
        return Dispatch::Reply(JsonRpcResponse::error(
            id,
            codes::INVALID_PARAMS,
            format!("Tool not found: {}", tool_name),
        ));
    }

    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    tracing::info!(tool = %tool_name, session = %session.id(), "Executing tool");

    let outcome = match orchestrator.call(session, tool_name, arguments).await {
        Ok(outcome) => outcome,
        Err(error) => return Dispatch::Rejected { id, error },
    };
    let budget = session.budget_summary(orchestrator.budget());

    let result = match outcome {
        CallOutcome::Completed(node) => {
            let meta = json!({
                "cache_hit": node.cache_hit(),
                "latency_ms": node.latency_ms(),
                "budget": budget,
            });
            match node.into_result() {
                Ok(output) => {
                    let text = serde_json::to_string_pretty(&output.data).unwrap_or_else(|_| output.data.to_string());
                    json!({
                        "content": [{ "type": "text", "text": text }],
                        "isError": false,
                        "_meta": meta,
                    })
                }
                Err(message) => {
                    tracing::warn!(tool = %tool_name, error = %message, "Tool execution failed");
                    json!({
                        "content": [{ "type": "text", "text": message }],
                        "isError": true,
                        "_meta": meta,
                    })
                }
            }
        }
        CallOutcome::BudgetDenied { status, message } => json!({
            "content": [{ "type": "text", "text": message }],
            "isError": true,
            "_meta": { "budget_status": status, "budget": budget },
        }),
    };

    Dispatch::Reply(JsonRpcResponse::success(id, result))
}
