//! Fan-out tools: multi_term_search.

use std::time::Duration;

use serde_json::json;

use super::{McpTool, ToolContext};
use crate::error::ToolResult;
use crate::governance::ParallelTask;
use crate::models::{MultiTermSearchInput, NodeResult, ToolOutput};

/// Runs one search per term in parallel under the shared rate limiter.
pub struct MultiTermSearchTool;

#[async_trait::async_trait]
impl McpTool for MultiTermSearchTool {
    fn name(&self) -> &'static str {
        "multi_term_search"
    }

    fn description(&self) -> &'static str {
        "Search several independent terms at once against PubMed or ClinicalTrials.gov. \
         Each term succeeds or fails on its own; results keep the input order."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "terms": {
                    "type": "array",
                    "items": {"type": "string"},
                    "minItems": 1,
                    "maxItems": 20,
                    "description": "Search terms, one upstream query each"
                },
                "source": {
                    "type": "string",
                    "enum": ["pubmed", "clinical_trials"],
                    "default": "pubmed"
                },
                "limit": {
                    "type": "integer",
                    "default": 20,
                    "description": "Maximum hits per term"
                },
                "timeoutMs": {
                    "type": "integer",
                    "description": "Deadline for the whole batch in milliseconds"
                }
            },
            "required": ["terms"]
        })
    }

    // Each term draws its own token in the executor.
    fn upstream_cost(&self) -> u32 {
        0
    }

    async fn execute(&self, ctx: &ToolContext, input: serde_json::Value) -> ToolResult<ToolOutput> {
        let params: MultiTermSearchInput = serde_json::from_value(input)?;
        params.validate()?;

        let adapter = ctx.adapter()?;
        let tool = params.source.tool_name();
        let tasks = params
            .terms
            .iter()
            .map(|term| {
                ParallelTask::tool_call(
                    adapter.clone(),
                    term.clone(),
                    tool,
                    json!({"query": term, "limit": params.limit}),
                    1,
                )
            })
            .collect();

        let results = ctx
            .governance
            .executor
            .execute_parallel(tasks, params.timeout_ms.map(Duration::from_millis))
            .await;

        let succeeded = results.iter().filter(|r| r.success()).count();
        let cache_hit = succeeded > 0 && results.iter().filter(|r| r.success()).all(NodeResult::cache_hit);
        tracing::debug!(tool, terms = results.len(), succeeded, "Fan-out complete");

        Ok(ToolOutput::new(
            json!({
                "source": params.source,
                "succeeded": succeeded,
                "failed": results.len() - succeeded,
                "results": results,
            }),
            cache_hit,
        ))
    }
}
