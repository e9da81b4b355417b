//! Uniform result envelope for one unit of tool work.

use serde::{Deserialize, Serialize};

/// What a tool hands back on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Opaque upstream payload.
    pub data: serde_json::Value,
    /// Whether the payload came from the response cache.
    pub cache_hit: bool,
}

impl ToolOutput {
    /// Output fetched from upstream.
    #[must_use]
    pub const fn fresh(data: serde_json::Value) -> Self {
        Self { data, cache_hit: false }
    }

    /// Output with an explicit cache flag.
    #[must_use]
    pub const fn new(data: serde_json::Value, cache_hit: bool) -> Self {
        Self { data, cache_hit }
    }
}

impl From<serde_json::Value> for ToolOutput {
    fn from(data: serde_json::Value) -> Self {
        Self::fresh(data)
    }
}

/// Outcome of one tool call or fan-out task. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    node_name: String,
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    cache_hit: bool,
    latency_ms: f64,
}

impl NodeResult {
    /// A successful result.
    #[must_use]
    pub fn succeeded(node_name: impl Into<String>, output: ToolOutput, latency_ms: f64) -> Self {
        Self {
            node_name: node_name.into(),
            success: true,
            data: Some(output.data),
            error_message: None,
            cache_hit: output.cache_hit,
            latency_ms,
        }
    }

    /// A failed result carrying the error text.
    #[must_use]
    pub fn failed(node_name: impl Into<String>, error_message: impl Into<String>, latency_ms: f64) -> Self {
        Self {
            node_name: node_name.into(),
            success: false,
            data: None,
            error_message: Some(error_message.into()),
            cache_hit: false,
            latency_ms,
        }
    }

    /// Node (tool or task) that produced this result.
    #[must_use]
    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Whether the work succeeded.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.success
    }

    /// Payload on success.
    #[must_use]
    pub const fn data(&self) -> Option<&serde_json::Value> {
        self.data.as_ref()
    }

    /// Error text on failure.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Whether the payload came from cache.
    #[must_use]
    pub const fn cache_hit(&self) -> bool {
        self.cache_hit
    }

    /// Wall time spent executing, in milliseconds.
    #[must_use]
    pub const fn latency_ms(&self) -> f64 {
        self.latency_ms
    }

    /// Split back into an output or an error message.
    pub fn into_result(self) -> Result<ToolOutput, String> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(ToolOutput::new(data, self.cache_hit)),
            (true, None) => Ok(ToolOutput::new(serde_json::Value::Null, self.cache_hit)),
            (false, _) => Err(self.error_message.unwrap_or_default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_result_omits_data() {
        let result = NodeResult::failed("pubmed_search", "boom", 12.5);
        assert!(!result.success());
        assert_eq!(result.error_message(), Some("boom"));
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("data").is_none());
        assert_eq!(json["latency_ms"], 12.5);
    }

    #[test]
    fn test_into_result_keeps_cache_flag() {
        let result = NodeResult::succeeded(
            "pubmed_search",
            ToolOutput::new(serde_json::json!({"count": 3}), true),
            1.0,
        );
        let output = result.into_result().unwrap();
        assert!(output.cache_hit);
        assert_eq!(output.data["count"], 3);
    }
}
