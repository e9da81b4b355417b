//! Input models for MCP tool parameters.

use serde::{Deserialize, Serialize};

use crate::error::{ToolError, ToolResult};

/// Largest `limit` any search tool accepts.
pub const MAX_LIMIT: u32 = 200;

/// Most PMIDs accepted by one summary call.
pub const MAX_PMIDS: usize = 200;

/// Most terms accepted by one fan-out search.
pub const MAX_TERMS: usize = 20;

fn default_limit() -> u32 {
    20
}

fn check_query(query: &str) -> ToolResult<()> {
    if query.trim().is_empty() {
        return Err(ToolError::validation("query", "cannot be empty"));
    }
    Ok(())
}

fn check_limit(limit: u32) -> ToolResult<()> {
    if limit == 0 || limit > MAX_LIMIT {
        return Err(ToolError::validation("limit", format!("must be between 1 and {MAX_LIMIT}")));
    }
    Ok(())
}

/// Input for a PubMed keyword search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubMedSearchInput {
    /// Entrez query (e.g., "BRCA1 AND breast neoplasms[MeSH]").
    pub query: String,

    /// Maximum PMIDs to return.
    #[serde(default = "default_limit")]
    pub limit: u32,

    /// Entrez sort order (e.g., "relevance", "pub_date").
    #[serde(default)]
    pub sort: Option<String>,
}

impl PubMedSearchInput {
    /// Check bounds.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the bad field.
    pub fn validate(&self) -> ToolResult<()> {
        check_query(&self.query)?;
        check_limit(self.limit)
    }
}

/// Input for PubMed document summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubMedSummaryInput {
    /// PubMed IDs.
    pub pmids: Vec<String>,
}

impl PubMedSummaryInput {
    /// Check bounds and that every PMID is numeric.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the bad field.
    pub fn validate(&self) -> ToolResult<()> {
        if self.pmids.is_empty() {
            return Err(ToolError::validation("pmids", "cannot be empty"));
        }
        if self.pmids.len() > MAX_PMIDS {
            return Err(ToolError::validation("pmids", format!("at most {MAX_PMIDS} ids per call")));
        }
        if let Some(bad) = self.pmids.iter().find(|id| id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit())) {
            return Err(ToolError::validation("pmids", format!("'{bad}' is not a PubMed ID")));
        }
        Ok(())
    }
}

/// Input for a ClinicalTrials.gov study search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClinicalTrialsSearchInput {
    /// Free-text query.
    pub query: String,

    /// Maximum studies to return.
    #[serde(default = "default_limit")]
    pub limit: u32,

    /// Overall status filter (e.g., "RECRUITING").
    #[serde(default)]
    pub status: Option<String>,
}

impl ClinicalTrialsSearchInput {
    /// Check bounds.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the bad field.
    pub fn validate(&self) -> ToolResult<()> {
        check_query(&self.query)?;
        check_limit(self.limit)
    }
}

/// Upstream searched by a fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSource {
    /// PubMed esearch.
    #[default]
    Pubmed,
    /// ClinicalTrials.gov studies.
    ClinicalTrials,
}

impl SearchSource {
    /// Tool that serves one term for this source.
    #[must_use]
    pub const fn tool_name(self) -> &'static str {
        match self {
            Self::Pubmed => "pubmed_search",
            Self::ClinicalTrials => "clinical_trials_search",
        }
    }
}

/// Input for a multi-term fan-out search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiTermSearchInput {
    /// Independent search terms.
    pub terms: Vec<String>,

    /// Upstream to search.
    #[serde(default)]
    pub source: SearchSource,

    /// Maximum hits per term.
    #[serde(default = "default_limit")]
    pub limit: u32,

    /// Overall deadline for the batch, in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl MultiTermSearchInput {
    /// Check bounds.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the bad field.
    pub fn validate(&self) -> ToolResult<()> {
        if self.terms.is_empty() {
            return Err(ToolError::validation("terms", "cannot be empty"));
        }
        if self.terms.len() > MAX_TERMS {
            return Err(ToolError::validation("terms", format!("at most {MAX_TERMS} terms per call")));
        }
        if self.terms.iter().any(|t| t.trim().is_empty()) {
            return Err(ToolError::validation("terms", "terms cannot be empty"));
        }
        check_limit(self.limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply() {
        let input: PubMedSearchInput = serde_json::from_value(serde_json::json!({"query": "asthma"})).unwrap();
        assert_eq!(input.limit, 20);
        assert!(input.sort.is_none());
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_limit_bounds() {
        let input = PubMedSearchInput { query: "asthma".into(), limit: 0, sort: None };
        assert!(input.validate().is_err());
        let input = PubMedSearchInput { query: "asthma".into(), limit: MAX_LIMIT + 1, sort: None };
        assert!(input.validate().is_err());
    }

    #[test]
    fn test_pmids_must_be_numeric() {
        let input = PubMedSummaryInput { pmids: vec!["123".into(), "abc".into()] };
        let err = input.validate().unwrap_err();
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_source_parses_snake_case() {
        let input: MultiTermSearchInput = serde_json::from_value(serde_json::json!({
            "terms": ["a", "b"],
            "source": "clinical_trials",
            "timeoutMs": 500
        }))
        .unwrap();
        assert_eq!(input.source, SearchSource::ClinicalTrials);
        assert_eq!(input.source.tool_name(), "clinical_trials_search");
        assert_eq!(input.timeout_ms, Some(500));
    }
}
