//! Session-scoped bag the orchestrator reads and appends to.

use serde::Serialize;

use super::NodeResult;

/// Per-session execution record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionState {
    /// Tool calls that ran (successfully or not).
    pub tool_calls_made: u32,
    /// Calls answered from cache.
    pub cache_hits: u32,
    /// Latency of each call, in call order.
    pub latencies: Vec<f64>,
    /// `node: message` for each failure or rejection.
    pub errors: Vec<String>,
    /// Node names in call order.
    pub node_path: Vec<String>,
}

impl SessionState {
    /// Append one finished call.
    pub fn record(&mut self, result: &NodeResult) {
        self.tool_calls_made += 1;
        if result.cache_hit() {
            self.cache_hits += 1;
        }
        self.latencies.push(result.latency_ms());
        self.node_path.push(result.node_name().to_string());
        if let Some(message) = result.error_message() {
            self.errors.push(format!("{}: {}", result.node_name(), message));
        }
    }

    /// Append a call that never ran (rejected or unaffordable).
    pub fn record_rejection(&mut self, node_name: &str, message: &str) {
        self.errors.push(format!("{node_name}: {message}"));
    }

    /// Mean latency, or `None` before the first call.
    #[must_use]
    pub fn average_latency_ms(&self) -> Option<f64> {
        if self.latencies.is_empty() {
            return None;
        }
        Some(self.latencies.iter().sum::<f64>() / self.latencies.len() as f64)
    }

    /// Share of calls answered from cache.
    #[must_use]
    pub fn cache_hit_rate(&self) -> f64 {
        if self.tool_calls_made == 0 {
            0.0
        } else {
            f64::from(self.cache_hits) / f64::from(self.tool_calls_made)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ToolOutput;

    #[test]
    fn test_record_accumulates() {
        let mut state = SessionState::default();
        state.record(&NodeResult::succeeded(
            "pubmed_search",
            ToolOutput::new(serde_json::json!({}), true),
            10.0,
        ));
        state.record(&NodeResult::failed("clinical_trials_search", "timeout", 30.0));
        state.record_rejection("pubmed_summary", "budget exhausted");

        assert_eq!(state.tool_calls_made, 2);
        assert_eq!(state.cache_hits, 1);
        assert_eq!(state.node_path, vec!["pubmed_search", "clinical_trials_search"]);
        assert_eq!(state.errors.len(), 2);
        assert_eq!(state.average_latency_ms(), Some(20.0));
        assert!((state.cache_hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}
