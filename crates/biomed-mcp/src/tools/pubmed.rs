//! PubMed tools: pubmed_search, pubmed_summary.

use serde_json::json;

use super::{McpTool, ToolContext};
use crate::error::ToolResult;
use crate::models::{PubMedSearchInput, PubMedSummaryInput, ToolOutput};

/// PubMed keyword search tool.
pub struct PubMedSearchTool;

#[async_trait::async_trait]
impl McpTool for PubMedSearchTool {
    fn name(&self) -> &'static str {
        "pubmed_search"
    }

    fn description(&self) -> &'static str {
        "Search PubMed with an Entrez query and return matching PMIDs. \
         Supports field tags and MeSH terms (e.g., 'asthma[MeSH] AND children')."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Entrez search query"
                },
                "limit": {
                    "type": "integer",
                    "default": 20,
                    "minimum": 1,
                    "maximum": 200
                },
                "sort": {
                    "type": "string",
                    "enum": ["relevance", "pub_date", "Author", "JournalName"],
                    "description": "Sort order"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: serde_json::Value) -> ToolResult<ToolOutput> {
        let params: PubMedSearchInput = serde_json::from_value(input)?;
        params.validate()?;

        let (data, cache_hit) = ctx.client.pubmed_search(&params.query, params.limit, params.sort.as_deref()).await?;
        Ok(ToolOutput::new(data, cache_hit))
    }
}

/// PubMed document summary tool.
pub struct PubMedSummaryTool;

#[async_trait::async_trait]
impl McpTool for PubMedSummaryTool {
    fn name(&self) -> &'static str {
        "pubmed_summary"
    }

    fn description(&self) -> &'static str {
        "Fetch PubMed document summaries (title, authors, journal, dates) for up to 200 PMIDs."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "pmids": {
                    "type": "array",
                    "items": {"type": "string"},
                    "maxItems": 200,
                    "description": "PubMed IDs (e.g., ['31452104'])"
                }
            },
            "required": ["pmids"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: serde_json::Value) -> ToolResult<ToolOutput> {
        let params: PubMedSummaryInput = serde_json::from_value(input)?;
        params.validate()?;

        let (data, cache_hit) = ctx.client.pubmed_summary(&params.pmids).await?;
        Ok(ToolOutput::new(data, cache_hit))
    }
}
