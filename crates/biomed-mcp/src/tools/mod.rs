//! MCP tool implementations.
//!
//! Each tool module provides tools that:
//! 1. Parse and validate input parameters
//! 2. Call the research API client (or the governance layer)
//! 3. Return the upstream JSON with its cache flag

mod fanout;
mod pubmed;
mod status;
mod trials;

pub use fanout::*;
pub use pubmed::*;
pub use status::*;
pub use trials::*;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::Value;

use crate::client::ResearchClient;
use crate::error::{ToolError, ToolResult};
use crate::governance::{BreakerAdapter, Governance, ToolAdapter};
use crate::models::ToolOutput;

/// Tool execution context.
pub struct ToolContext {
    /// API client.
    pub client: Arc<ResearchClient>,

    /// Shared governance components.
    pub governance: Governance,

    registry: Weak<ToolRegistry>,
}

impl ToolContext {
    /// Adapter over every registered tool for fan-out sub-calls.
    ///
    /// Sub-calls honour and feed each tool's circuit breaker but take no
    /// slots; the calling tool already holds them.
    ///
    /// # Errors
    ///
    /// Returns error if the registry is being torn down.
    pub fn adapter(&self) -> ToolResult<Arc<dyn ToolAdapter>> {
        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| ToolError::unavailable("tool registry is shutting down"))?;
        Ok(Arc::new(BreakerAdapter::new(registry, Arc::clone(&self.governance.concurrency))))
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext").field("client", &self.client).finish_non_exhaustive()
    }
}

/// Trait for MCP tools.
#[async_trait]
pub trait McpTool: Send + Sync {
    /// Tool name (e.g., "pubmed_search").
    fn name(&self) -> &'static str;

    /// Tool description for LLM.
    fn description(&self) -> &'static str;

    /// JSON Schema for input parameters.
    fn input_schema(&self) -> Value;

    /// Rate-limiter tokens one call draws before it runs.
    fn upstream_cost(&self) -> u32 {
        1
    }

    /// Execute the tool with given input.
    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<ToolOutput>;
}

/// Register all tools.
#[must_use]
pub fn register_all_tools() -> Vec<Box<dyn McpTool>> {
    vec![
        // PubMed tools (2)
        Box::new(pubmed::PubMedSearchTool),
        Box::new(pubmed::PubMedSummaryTool),

        // ClinicalTrials.gov tools (1)
        Box::new(trials::ClinicalTrialsSearchTool),

        // Fan-out tools (1)
        Box::new(fanout::MultiTermSearchTool),

        // Introspection tools (1)
        Box::new(status::GovernanceStatusTool),
    ]
}

/// Every tool, addressable by name.
pub struct ToolRegistry {
    ctx: ToolContext,
    tools: Vec<Box<dyn McpTool>>,
    index: HashMap<&'static str, usize>,
}

impl ToolRegistry {
    /// Register every tool against `client` and `governance`.
    #[must_use]
    pub fn new(client: Arc<ResearchClient>, governance: Governance) -> Arc<Self> {
        let tools = register_all_tools();
        let index = tools.iter().enumerate().map(|(i, tool)| (tool.name(), i)).collect();
        Arc::new_cyclic(|registry| Self {
            ctx: ToolContext { client, governance, registry: registry.clone() },
            tools,
            index,
        })
    }

    /// Registered tools, in registration order.
    pub fn tools(&self) -> impl Iterator<Item = &dyn McpTool> {
        self.tools.iter().map(AsRef::as_ref)
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn McpTool> {
        self.index.get(name).map(|&i| self.tools[i].as_ref())
    }

    /// Rate-limiter tokens a top-level call to `name` draws; 0 if unknown.
    #[must_use]
    pub fn upstream_cost(&self, name: &str) -> u32 {
        self.get(name).map_or(0, |tool| tool.upstream_cost())
    }

    /// Shared execution context.
    #[must_use]
    pub const fn context(&self) -> &ToolContext {
        &self.ctx
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry").field("tools", &self.index.keys().collect::<Vec<_>>()).finish()
    }
}

#[async_trait]
impl ToolAdapter for ToolRegistry {
    async fn call_tool(&self, name: &str, args: Value) -> ToolResult<ToolOutput> {
        let tool = self.get(name).ok_or_else(|| ToolError::validation("name", format!("unknown tool '{name}'")))?;
        tool.execute(&self.ctx, args).await
    }
}
