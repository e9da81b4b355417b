//! ClinicalTrials.gov tools: clinical_trials_search.

use serde_json::json;

use super::{McpTool, ToolContext};
use crate::error::ToolResult;
use crate::models::{ClinicalTrialsSearchInput, ToolOutput};

/// ClinicalTrials.gov study search tool.
pub struct ClinicalTrialsSearchTool;

#[async_trait::async_trait]
impl McpTool for ClinicalTrialsSearchTool {
    fn name(&self) -> &'static str {
        "clinical_trials_search"
    }

    fn description(&self) -> &'static str {
        "Search ClinicalTrials.gov studies by condition, intervention or free text, \
         optionally filtered by overall status."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search terms (e.g., 'glioblastoma temozolomide')"
                },
                "limit": {
                    "type": "integer",
                    "default": 20,
                    "minimum": 1,
                    "maximum": 200
                },
                "status": {
                    "type": "string",
                    "description": "Overall status filter (e.g., 'RECRUITING', 'COMPLETED')"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: serde_json::Value) -> ToolResult<ToolOutput> {
        let params: ClinicalTrialsSearchInput = serde_json::from_value(input)?;
        params.validate()?;

        let (data, cache_hit) =
            ctx.client.search_trials(&params.query, params.limit, params.status.as_deref()).await?;
        Ok(ToolOutput::new(data, cache_hit))
    }
}
