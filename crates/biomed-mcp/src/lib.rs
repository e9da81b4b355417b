//! Biomedical MCP Server
//!
//! A Model Context Protocol (MCP) server for PubMed and ClinicalTrials.gov with
//! a resource-governance core that keeps many concurrent agent calls within
//! upstream limits.
//!
//! # Features
//!
//! - **Admission control**: global and per-tool concurrency limits, a priority
//!   wait queue with bounded aging, and fail-fast rejections with retry hints
//! - **Circuit breakers**: per-tool sliding-window failure tracking
//! - **Rate-limited**: a shared token bucket in front of every upstream call
//! - **Budgets**: per-session time, token and request accounting
//! - **Fan-out**: parallel multi-term search with isolated failures
//!
//! # Example
//!
//! ```no_run
//! use biomed_mcp::{config::Config, server::McpServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let server = McpServer::new(&config)?;
//!
//!     server.run_stdio().await
//! }
//! ```

pub mod budget;
pub mod client;
pub mod config;
pub mod error;
pub mod governance;
pub mod models;
pub mod orchestrator;
pub mod server;
pub mod tools;

pub use budget::{BudgetManager, BudgetStatus, BudgetTracker, ResourceType};
pub use client::ResearchClient;
pub use config::{Config, GovernanceConfig};
pub use error::{AdmissionError, ClientError, ToolError};
pub use governance::{CircuitBreaker, ConcurrencyManager, Governance, ParallelExecutor, TokenBucketRateLimiter};
pub use orchestrator::{CallOutcome, Orchestrator, ToolSession};
