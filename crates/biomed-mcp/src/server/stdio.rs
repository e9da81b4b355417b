//! Stdio transport for MCP protocol.
//!
//! Handles JSON-RPC 2.0 over stdin/stdout. The whole process is one session,
//! so one budget covers every call the client makes.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::protocol::{self, Dispatch, codes};
use super::transport::{JsonRpcRequest, JsonRpcResponse};
use crate::orchestrator::Orchestrator;

/// Handle MCP protocol over stdio.
pub async fn run_stdio(orchestrator: Orchestrator) -> anyhow::Result<()> {
    let reader = BufReader::new(tokio::io::stdin());
    let writer = tokio::io::stdout();
    serve(&orchestrator, reader, writer).await
}

/// Serve line-delimited JSON-RPC from `reader` to `writer` until EOF.
pub async fn serve<R, W>(orchestrator: &Orchestrator, mut reader: R, mut writer: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let session = orchestrator.start_session();
    let mut line = String::new();

    tracing::info!(session = %session.id(), "MCP stdio server ready, waiting for requests...");

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;

        if bytes_read == 0 {
            tracing::info!("Stdin closed, shutting down");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
            Ok(req) => req,
            Err(e) => {
                let response = JsonRpcResponse::error(None, codes::PARSE_ERROR, format!("Parse error: {}", e));
                write_response(&mut writer, &response).await?;
                continue;
            }
        };

        tracing::debug!(method = %request.method, "Received request");

        let response = match protocol::dispatch(orchestrator, &session, request).await {
            Dispatch::Reply(response) => response,
            Dispatch::Accepted => continue,
            Dispatch::Rejected { id, error } => {
                tracing::warn!(error_code = error.error_code(), "Call rejected by admission control");
                protocol::admission_error_response(id, &error)
            }
        };

        write_response(&mut writer, &response).await?;
    }

    let state = session.state();
    tracing::info!(
        tool_calls = state.tool_calls_made,
        cache_hits = state.cache_hits,
        errors = state.errors.len(),
        "Session finished"
    );
    Ok(())
}

async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &JsonRpcResponse) -> anyhow::Result<()> {
    let response_json = serde_json::to_string(response)?;
    writer.write_all(response_json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
