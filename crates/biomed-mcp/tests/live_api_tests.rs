//! Live tests against NCBI E-utilities and ClinicalTrials.gov.
//!
//! Run with: `cargo test --features integration -- --nocapture`

#![cfg(feature = "integration")]

use std::sync::Arc;

use serde_json::json;

use biomed_mcp::client::ResearchClient;
use biomed_mcp::config::Config;
use biomed_mcp::governance::Governance;
use biomed_mcp::orchestrator::{CallOutcome, Orchestrator};
use biomed_mcp::tools::ToolRegistry;

/// "Initial sequencing and analysis of the human genome", Nature 2001.
const HUMAN_GENOME_PMID: &str = "11237011";

fn create_client() -> ResearchClient {
    let config = Config::new(std::env::var("NCBI_API_KEY").ok());
    ResearchClient::new(&config).expect("Failed to create client")
}

#[tokio::test]
async fn test_live_pubmed_search() {
    let (body, _) = create_client().pubmed_search("CRISPR", 5, None).await.unwrap();
    let ids = body["esearchresult"]["idlist"].as_array().unwrap();
    assert!(!ids.is_empty());
    assert!(ids.len() <= 5);
}

#[tokio::test]
async fn test_live_pubmed_summary() {
    let (body, _) = create_client()
        .pubmed_summary(&[HUMAN_GENOME_PMID.to_string()])
        .await
        .unwrap();
    assert!(body["result"][HUMAN_GENOME_PMID]["title"].as_str().is_some());
}

#[tokio::test]
async fn test_live_trials_search() {
    let (body, _) = create_client().search_trials("melanoma", 3, Some("RECRUITING")).await.unwrap();
    assert!(body["studies"].as_array().is_some());
}

#[tokio::test]
async fn test_live_fan_out_respects_upstream_rate() {
    let config = Config::new(std::env::var("NCBI_API_KEY").ok());
    let governance = Governance::new(&config.governance).unwrap();
    let registry = ToolRegistry::new(Arc::new(ResearchClient::new(&config).unwrap()), governance.clone());
    let orchestrator = Orchestrator::new(registry, &governance);
    let session = orchestrator.start_session();

    let terms = json!(["asthma", "copd", "bronchiectasis", "cystic fibrosis", "pneumonia"]);
    let outcome = orchestrator
        .call(&session, "multi_term_search", json!({"terms": terms, "limit": 3}))
        .await
        .unwrap();
    let CallOutcome::Completed(node) = outcome else {
        panic!("expected completed call, got {outcome:?}");
    };
    let data = node.data().unwrap();
    assert_eq!(data["succeeded"], 5, "NCBI rejected a paced request: {data}");
}
