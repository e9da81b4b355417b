//! Budget policy: tracker creation, status evaluation, adaptive timeouts and
//! per-tool cost estimates.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::tracker::BudgetTracker;
use super::types::{BudgetStatus, CostEstimate, ResourceAmounts, ResourceType};
use crate::config::BudgetDefaults;
use crate::config::defaults::EXECUTOR_MAX_CONCURRENCY;
use crate::models::MAX_LIMIT;

/// Result count assumed when a call does not say.
const DEFAULT_RESULT_LIMIT: u64 = 20;

/// Cost profile of a family of tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToolClass {
    /// Local introspection, no upstream call.
    Status,
    /// Fetch of known records by id.
    Lookup,
    /// Keyword search against an upstream index.
    KeywordSearch,
    /// Embedding lookup plus LLM reranking/synthesis.
    SemanticSearch,
    /// One keyword search per term.
    FanOut,
    /// Anything unrecognised.
    Other,
}

impl ToolClass {
    fn of(tool_name: &str) -> Self {
        match tool_name {
            "governance_status" => Self::Status,
            "pubmed_summary" => Self::Lookup,
            "pubmed_search" | "clinical_trials_search" => Self::KeywordSearch,
            "multi_term_search" => Self::FanOut,
            name if ["semantic", "vector", "rag", "embed"].iter().any(|k| name.contains(k)) => {
                Self::SemanticSearch
            }
            _ => Self::Other,
        }
    }

    /// `(base time ms, time per result ms, base tokens, tokens per result)`.
    const fn profile(self) -> (u64, u64, u64, u64) {
        match self {
            Self::Status => (5, 0, 0, 0),
            Self::Lookup => (600, 10, 100, 50),
            Self::KeywordSearch | Self::FanOut => (800, 5, 200, 20),
            Self::SemanticSearch => (2000, 10, 1500, 50),
            Self::Other => (1000, 5, 300, 20),
        }
    }
}

fn result_count(args: &Value) -> u64 {
    ["limit", "max_results", "maxResults"]
        .iter()
        .find_map(|key| args.get(*key).and_then(Value::as_u64))
        .or_else(|| args.get("pmids").and_then(Value::as_array).map(|ids| ids.len() as u64))
        .unwrap_or(DEFAULT_RESULT_LIMIT)
        .clamp(1, u64::from(MAX_LIMIT))
}

/// Structured view of a tracker.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetSummary {
    /// Tracker identifier.
    pub tracker_id: Uuid,
    /// Current status, WARNING included.
    pub status: BudgetStatus,
    /// Absolute usage.
    pub usage: ResourceAmounts<u64>,
    /// Budget left.
    pub remaining: ResourceAmounts<u64>,
    /// `used / budget`.
    pub percentages: ResourceAmounts<f64>,
}

/// Creates and evaluates [`BudgetTracker`]s.
#[derive(Debug, Clone)]
pub struct BudgetManager {
    defaults: BudgetDefaults,
    fan_out_concurrency: u64,
}

impl BudgetManager {
    /// Manager with the given defaults.
    #[must_use]
    pub const fn new(defaults: BudgetDefaults) -> Self {
        Self { defaults, fan_out_concurrency: EXECUTOR_MAX_CONCURRENCY as u64 }
    }

    /// Terms a fan-out runs at once; its time estimate is one search per wave.
    #[must_use]
    pub fn with_fan_out_concurrency(mut self, max_concurrency: usize) -> Self {
        self.fan_out_concurrency = max_concurrency.max(1) as u64;
        self
    }

    /// Defaults used for omitted budgets.
    #[must_use]
    pub const fn defaults(&self) -> &BudgetDefaults {
        &self.defaults
    }

    /// New tracker; omitted budgets fall back to the defaults.
    #[must_use]
    pub fn create_tracker(
        &self,
        time_budget_ms: Option<u64>,
        token_budget: Option<u64>,
        request_budget: Option<u64>,
    ) -> BudgetTracker {
        let tracker = BudgetTracker::new(
            time_budget_ms.unwrap_or(self.defaults.time_budget_ms),
            token_budget.unwrap_or(self.defaults.token_budget),
            request_budget.unwrap_or(self.defaults.request_budget),
        );
        tracing::debug!(tracker = %tracker.id(), budgets = ?tracker.budgets(), "Created budget tracker");
        tracker
    }

    /// Consume `amount` of `resource`; `false` if it does not fit.
    pub fn enforce_budget(&self, tracker: &mut BudgetTracker, resource: ResourceType, amount: u64) -> bool {
        tracker.consume(resource, amount)
    }

    /// Status plus a human-readable explanation.
    ///
    /// Exceeded statuses win; otherwise WARNING names the most-used resource
    /// at or above the warning threshold.
    #[must_use]
    pub fn check_budget_status(&self, tracker: &BudgetTracker) -> (BudgetStatus, String) {
        let status = tracker.status();
        let percentages = tracker.get_usage_percentages();
        if status.is_exceeded() {
            let resource = ResourceType::ALL
                .into_iter()
                .find(|r| r.exceeded_status() == status)
                .unwrap_or(ResourceType::Time);
            let message = format!(
                "{resource} budget exceeded ({} of {} used)",
                tracker.usage().get(resource),
                tracker.budgets().get(resource)
            );
            return (status, message);
        }

        let hottest = ResourceType::ALL
            .into_iter()
            .map(|r| (r, percentages.get(r)))
            .filter(|(_, pct)| *pct >= self.defaults.warning_threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1));
        match hottest {
            Some((resource, pct)) => {
                let message = format!("{resource} budget at {:.1}% of limit", pct * 100.0);
                tracing::info!(tracker = %tracker.id(), %resource, percent = pct * 100.0, "Budget warning");
                (BudgetStatus::Warning, message)
            }
            None => (BudgetStatus::Active, "within budget".to_string()),
        }
    }

    /// Time left in the session's time budget; zero once spent.
    #[must_use]
    pub fn calculate_timeout(&self, tracker: &BudgetTracker) -> Duration {
        Duration::from_millis(tracker.get_remaining().time)
    }

    /// Status, usage, remaining and percentages in one object.
    #[must_use]
    pub fn get_budget_summary(&self, tracker: &BudgetTracker) -> BudgetSummary {
        let (status, _) = self.check_budget_status(tracker);
        BudgetSummary {
            tracker_id: tracker.id(),
            status,
            usage: tracker.usage(),
            remaining: tracker.get_remaining(),
            percentages: tracker.get_usage_percentages(),
        }
    }

    /// Heuristic cost of calling `tool_name` with `args`.
    ///
    /// Requests are always 1 per call.
    #[must_use]
    pub fn estimate_operation_cost(&self, tool_name: &str, args: &Value) -> CostEstimate {
        let class = ToolClass::of(tool_name);
        let (base_time, time_per, base_tokens, tokens_per) = class.profile();
        let results = result_count(args);
        let single = |n: u64| (base_time + time_per * n, base_tokens + tokens_per * n);

        let (time, tokens) = match class {
            ToolClass::Status => (base_time, base_tokens),
            ToolClass::FanOut => {
                let terms = args.get("terms").and_then(Value::as_array).map_or(1, |t| t.len().max(1) as u64);
                let (t, k) = single(results);
                (t * terms.div_ceil(self.fan_out_concurrency), k * terms)
            }
            _ => single(results),
        };
        CostEstimate::new(time, tokens, 1)
    }

    /// Whether the estimated cost fits every remaining budget. Read-only.
    #[must_use]
    pub fn can_afford_operation(&self, tracker: &BudgetTracker, tool_name: &str, args: &Value) -> bool {
        let cost = self.estimate_operation_cost(tool_name, args);
        let remaining = tracker.get_remaining();
        ResourceType::ALL
            .into_iter()
            .all(|r| !tracker.is_exceeded(r) && cost.get(r) <= remaining.get(r))
    }
}

impl Default for BudgetManager {
    fn default() -> Self {
        Self::new(BudgetDefaults::default())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_create_tracker_defaults() {
        let manager = BudgetManager::default();
        let tracker = manager.create_tracker(None, Some(500), None);
        assert_eq!(tracker.budgets(), ResourceAmounts::new(30_000, 500, 100));
    }

    #[test]
    fn test_warning_names_resource_and_percentage() {
        let manager = BudgetManager::default();
        let mut tracker = manager.create_tracker(Some(1000), Some(100), Some(10));
        assert!(manager.enforce_budget(&mut tracker, ResourceType::Tokens, 85));
        let (status, message) = manager.check_budget_status(&tracker);
        assert_eq!(status, BudgetStatus::Warning);
        assert!(message.contains("tokens"), "{message}");
        assert!(message.contains("85.0%"), "{message}");
        // The tracker itself stays ACTIVE.
        assert_eq!(tracker.status(), BudgetStatus::Active);
    }

    #[test]
    fn test_exceeded_beats_warning() {
        let manager = BudgetManager::default();
        let mut tracker = manager.create_tracker(Some(1000), Some(100), Some(1));
        manager.enforce_budget(&mut tracker, ResourceType::Tokens, 95);
        assert!(manager.enforce_budget(&mut tracker, ResourceType::Requests, 1));
        assert!(!manager.enforce_budget(&mut tracker, ResourceType::Requests, 1));
        let (status, message) = manager.check_budget_status(&tracker);
        assert_eq!(status, BudgetStatus::RequestExceeded);
        assert!(message.contains("requests"));
    }

    #[test]
    fn test_calculate_timeout_reaches_zero() {
        let manager = BudgetManager::default();
        let mut tracker = manager.create_tracker(Some(1000), None, None);
        assert_eq!(manager.calculate_timeout(&tracker), Duration::from_millis(1000));
        tracker.consume(ResourceType::Time, 1000);
        assert_eq!(manager.calculate_timeout(&tracker), Duration::ZERO);
    }

    #[test]
    fn test_semantic_search_costs_more_than_keyword() {
        let manager = BudgetManager::default();
        let args = json!({"query": "x", "limit": 10});
        let keyword = manager.estimate_operation_cost("pubmed_search", &args);
        let semantic = manager.estimate_operation_cost("semantic_literature_search", &args);
        assert!(semantic.tokens > keyword.tokens);
        assert!(semantic.time > keyword.time);
        assert_eq!(keyword.requests, 1);
        assert_eq!(semantic.requests, 1);
    }

    #[test]
    fn test_estimate_scales_with_limit_and_terms() {
        let manager = BudgetManager::default();
        let small = manager.estimate_operation_cost("pubmed_search", &json!({"limit": 5}));
        let large = manager.estimate_operation_cost("pubmed_search", &json!({"limit": 100}));
        assert!(large.tokens > small.tokens);

        let fan = manager.estimate_operation_cost("multi_term_search", &json!({"terms": ["a", "b", "c"], "limit": 5}));
        assert_eq!(fan.tokens, small.tokens * 3);
        assert_eq!(fan.requests, 1);
    }

    #[test]
    fn test_fan_out_time_counts_parallel_waves() {
        let manager = BudgetManager::default().with_fan_out_concurrency(5);
        let args = |n: usize| json!({"terms": vec!["t"; n], "limit": 5});
        let single = manager.estimate_operation_cost("pubmed_search", &json!({"limit": 5}));

        // Up to five terms run side by side.
        assert_eq!(manager.estimate_operation_cost("multi_term_search", &args(5)).time, single.time);
        assert_eq!(manager.estimate_operation_cost("multi_term_search", &args(6)).time, single.time * 2);
        let twenty = manager.estimate_operation_cost("multi_term_search", &args(20));
        assert_eq!(twenty.time, single.time * 4);
        assert_eq!(twenty.tokens, single.tokens * 20);

        let serial = BudgetManager::default().with_fan_out_concurrency(1);
        assert_eq!(serial.estimate_operation_cost("multi_term_search", &args(6)).time, single.time * 6);
    }

    #[test]
    fn test_can_afford_is_read_only() {
        let manager = BudgetManager::default();
        let tracker = manager.create_tracker(Some(10_000), Some(250), Some(5));
        let args = json!({"limit": 20});
        assert!(!manager.can_afford_operation(&tracker, "pubmed_search", &args));
        assert!(manager.can_afford_operation(&tracker, "governance_status", &args));
        assert_eq!(tracker.usage(), ResourceAmounts::default());
    }

    #[test]
    fn test_summary_serializes_uppercase_keys() {
        let manager = BudgetManager::default();
        let mut tracker = manager.create_tracker(None, None, None);
        tracker.consume(ResourceType::Requests, 1);
        let json = serde_json::to_value(manager.get_budget_summary(&tracker)).unwrap();
        assert_eq!(json["status"], "ACTIVE");
        assert_eq!(json["usage"]["REQUESTS"], 1);
        assert_eq!(json["remaining"]["REQUESTS"], 99);
    }
}
