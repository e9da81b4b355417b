//! Data models shared by tools, the executor and the orchestrator.
//!
//! Upstream payloads stay opaque `serde_json::Value`s; nothing here parses
//! PubMed or ClinicalTrials.gov documents.

mod inputs;
mod node;
mod state;

pub use inputs::*;
pub use node::{NodeResult, ToolOutput};
pub use state::SessionState;
