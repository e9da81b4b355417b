//! MCP server implementation.
//!
//! Provides both stdio (for Claude Desktop) and HTTP transports. Both route
//! `tools/call` through the [`Orchestrator`], so every call is budgeted,
//! rate limited and admission controlled the same way.

pub mod protocol;
pub mod stdio;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::client::ResearchClient;
use crate::config::Config;
use crate::governance::Governance;
use crate::orchestrator::Orchestrator;
use crate::tools::ToolRegistry;

pub use transport::HttpOptions;

/// MCP server for PubMed and ClinicalTrials.gov.
pub struct McpServer {
    orchestrator: Orchestrator,
    governance: Governance,
}

impl McpServer {
    /// Build the governance bundle, client and tool registry from `config`.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        config.validate()?;
        let governance = Governance::new(&config.governance)?;
        let client = Arc::new(ResearchClient::new(config)?);
        let registry = ToolRegistry::new(client, governance.clone());
        let orchestrator = Orchestrator::new(registry, &governance);

        Ok(Self { orchestrator, governance })
    }

    /// Session pipeline shared by both transports.
    #[must_use]
    pub const fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Shared governance components.
    #[must_use]
    pub const fn governance(&self) -> &Governance {
        &self.governance
    }

    /// Run the server in stdio mode (for Claude Desktop).
    ///
    /// # Errors
    ///
    /// Returns error on I/O failure.
    pub async fn run_stdio(self) -> anyhow::Result<()> {
        tracing::info!("Starting MCP server in stdio mode");
        tracing::info!("Registered {} tools", self.list_tools().len());

        stdio::run_stdio(self.orchestrator).await
    }

    /// Run the server in HTTP mode.
    ///
    /// # Errors
    ///
    /// Returns error on server failure.
    pub async fn run_http(self, port: u16, options: HttpOptions) -> anyhow::Result<()> {
        tracing::info!("Starting MCP server in HTTP mode on port {}", port);
        tracing::info!("Registered {} tools", self.list_tools().len());

        let state = Arc::new(transport::HttpState::new(self.orchestrator, self.governance, &options));
        let router = transport::create_router(state, options.request_timeout);
        let addr = SocketAddr::from(([0, 0, 0, 0], port));

        tracing::info!("HTTP server listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

        tracing::info!("HTTP server shut down");
        Ok(())
    }

    /// List all available tools.
    #[must_use]
    pub fn list_tools(&self) -> Vec<(&str, &str)> {
        self.orchestrator
            .registry()
            .tools()
            .map(|t| (t.name(), t.description()))
            .collect()
    }
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer").field("tools", &self.list_tools().len()).finish()
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received shutdown signal"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
