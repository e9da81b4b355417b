//! Introspection tools: governance_status.

use serde_json::json;

use super::{McpTool, ToolContext};
use crate::error::ToolResult;
use crate::models::ToolOutput;

/// Snapshot of admission, rate limiting and fan-out capacity.
pub struct GovernanceStatusTool;

#[async_trait::async_trait]
impl McpTool for GovernanceStatusTool {
    fn name(&self) -> &'static str {
        "governance_status"
    }

    fn description(&self) -> &'static str {
        "Report current server load: in-flight calls, queue depth, per-tool circuit \
         breaker states, available upstream rate-limit tokens and budget defaults."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    // No upstream call.
    fn upstream_cost(&self) -> u32 {
        0
    }

    async fn execute(&self, ctx: &ToolContext, _input: serde_json::Value) -> ToolResult<ToolOutput> {
        let governance = &ctx.governance;
        let limiter = &governance.rate_limiter;

        Ok(ToolOutput::fresh(json!({
            "concurrency": governance.concurrency.stats(),
            "rate_limiter": {
                "available_tokens": limiter.get_available_tokens().await,
                "capacity": limiter.capacity(),
                "refill_rate": limiter.refill_rate(),
            },
            "executor": {
                "max_concurrency": governance.executor.max_concurrency(),
                "available_slots": governance.executor.available_slots(),
            },
            "budget_defaults": governance.budget.defaults(),
        })))
    }
}
