//! Biomedical MCP Server - Entry Point
//!
//! Provides both stdio (for Claude Desktop) and HTTP transports.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use biomed_mcp::config::Config;
use biomed_mcp::server::{HttpOptions, McpServer};

#[derive(Parser, Debug)]
#[command(name = "biomed-mcp")]
#[command(about = "MCP server for PubMed and ClinicalTrials.gov with admission control and budgets")]
#[command(version)]
struct Cli {
    /// NCBI API key (optional, raises the PubMed rate limit)
    #[arg(long, env = "NCBI_API_KEY")]
    ncbi_api_key: Option<String>,

    /// Transport mode: stdio or http
    #[arg(long, default_value = "stdio")]
    transport: Transport,

    /// HTTP server port (only used with --transport http)
    #[arg(long, default_value = "8000", env = "PORT")]
    port: u16,

    /// JSON file overriding governance defaults (limits, breaker, budgets)
    #[arg(long, env = "BIOMED_GOVERNANCE_CONFIG")]
    governance_config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum Transport {
    /// Standard input/output (for Claude Desktop)
    #[default]
    Stdio,
    /// Streamable HTTP
    Http,
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // stdout carries the stdio protocol
    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        transport = ?cli.transport,
        "Starting biomedical MCP server"
    );

    let mut config = Config::new(cli.ncbi_api_key);
    if let Some(path) = &cli.governance_config {
        config.load_governance(path)?;
        tracing::info!(path = %path.display(), "Loaded governance config");
    }

    let server = McpServer::new(&config)?;

    match cli.transport {
        Transport::Stdio => {
            tracing::info!("Running in stdio mode");
            server.run_stdio().await?;
        }
        Transport::Http => {
            tracing::info!(port = cli.port, "Running in HTTP mode");
            server.run_http(cli.port, HttpOptions::default()).await?;
        }
    }

    Ok(())
}
