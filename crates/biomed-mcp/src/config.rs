//! Configuration for the biomedical MCP server.
//!
//! Governance settings are a typed structure validated once at startup. They can
//! be overridden from a JSON file; every field falls back to the defaults below.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// API configuration constants.
pub mod api {
    use std::time::Duration;

    /// NCBI E-utilities base URL (PubMed).
    pub const PUBMED_EUTILS: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

    /// ClinicalTrials.gov v2 API base URL.
    pub const CLINICAL_TRIALS_API: &str = "https://clinicaltrials.gov/api/v2";

    /// Request timeout.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Connection timeout.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Cache TTL (5 minutes).
    pub const CACHE_TTL: Duration = Duration::from_secs(300);

    /// Maximum cache size.
    pub const CACHE_MAX_SIZE: u64 = 1000;

    /// Maximum keepalive connections.
    pub const MAX_KEEPALIVE: usize = 10;

    /// Keepalive expiry.
    pub const KEEPALIVE_EXPIRY: Duration = Duration::from_secs(30);

    /// Retries for transient upstream failures.
    pub const MAX_RETRIES: u32 = 2;

    /// Wait assumed when a 429 carries no `Retry-After`.
    pub const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

    /// NCBI allows 3 req/s without an API key.
    pub const NCBI_RATE: f64 = 3.0;

    /// NCBI allows 10 req/s with an API key.
    pub const NCBI_RATE_WITH_KEY: f64 = 10.0;
}

/// Governance defaults.
pub mod defaults {
    /// Global in-flight tool calls.
    pub const MAX_CONCURRENT_TOTAL: usize = 10;

    /// Callers allowed to wait for a global slot.
    pub const MAX_QUEUE_DEPTH: usize = 50;

    /// Longest a queued caller waits for a global slot.
    pub const QUEUE_TIMEOUT_MS: u64 = 30_000;

    /// Retry hint attached to global rejections.
    pub const RETRY_AFTER_MS: u64 = 1_000;

    /// Waiting this long promotes a queued caller by one priority tier.
    pub const PRIORITY_AGING_MS: u64 = 5_000;

    /// Priority for tools without explicit limits (lower is served first).
    pub const TOOL_PRIORITY: u8 = 5;

    /// Concurrent calls per tool without explicit limits.
    pub const TOOL_MAX_CONCURRENT: usize = 4;

    /// Token bucket capacity.
    pub const BUCKET_CAPACITY: f64 = 10.0;

    /// Failure ratio that trips a breaker.
    pub const FAILURE_THRESHOLD: f64 = 0.5;

    /// Samples required before a breaker may trip.
    pub const MIN_REQUESTS: u32 = 5;

    /// Cooldown before an open breaker lets a probe through.
    pub const BREAKER_TIMEOUT_MS: u64 = 30_000;

    /// Outcomes kept in the breaker's rolling window.
    pub const BREAKER_WINDOW: usize = 20;

    /// Session time budget.
    pub const TIME_BUDGET_MS: u64 = 30_000;

    /// Session token budget.
    pub const TOKEN_BUDGET: u64 = 10_000;

    /// Session request budget.
    pub const REQUEST_BUDGET: u64 = 100;

    /// Usage ratio at which a budget reports WARNING.
    pub const WARNING_THRESHOLD: f64 = 0.8;

    /// Simultaneous tasks inside one fan-out batch.
    pub const EXECUTOR_MAX_CONCURRENCY: usize = 5;
}

/// HTTP transport constants.
pub mod http {
    use std::time::Duration;

    /// Sessions idle longer than this are dropped with their budgets.
    pub const SESSION_IDLE: Duration = Duration::from_secs(30 * 60);

    /// Live sessions kept at once.
    pub const MAX_SESSIONS: u64 = 10_000;

    /// Sustained inbound requests per second.
    pub const INBOUND_PER_SECOND: u32 = 50;

    /// Inbound burst allowance.
    pub const INBOUND_BURST: u32 = 100;

    /// Hard ceiling on one HTTP request.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
}

/// Per-tool admission limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolLimits {
    /// Concurrent in-flight calls for this tool.
    pub max_concurrent: usize,
    /// Queue priority; lower numbers are served first.
    pub priority: u8,
    /// Longest a caller waits for this tool's slot.
    pub timeout_ms: Option<u64>,
}

impl ToolLimits {
    /// Create limits for one tool.
    #[must_use]
    pub const fn new(max_concurrent: usize, priority: u8, timeout_ms: Option<u64>) -> Self {
        Self { max_concurrent, priority, timeout_ms }
    }

    /// Slot wait timeout, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self::new(defaults::TOOL_MAX_CONCURRENT, defaults::TOOL_PRIORITY, None)
    }
}

/// Circuit breaker thresholds, shared by every per-tool breaker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failure ratio in `(0, 1]` that opens the breaker.
    pub failure_threshold: f64,
    /// Samples needed before the ratio is evaluated.
    pub min_requests: u32,
    /// Cooldown before `open` becomes `half_open`.
    pub timeout_ms: u64,
    /// Size of the rolling outcome window.
    pub window_size: usize,
}

impl CircuitBreakerConfig {
    /// Cooldown as a `Duration`.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.failure_threshold > 0.0 && self.failure_threshold <= 1.0) {
            return Err(ConfigError::invalid("circuit_breaker.failure_threshold", "must be in (0, 1]"));
        }
        if self.min_requests == 0 {
            return Err(ConfigError::invalid("circuit_breaker.min_requests", "must be at least 1"));
        }
        if self.window_size < self.min_requests as usize {
            return Err(ConfigError::invalid(
                "circuit_breaker.window_size",
                "must be at least min_requests",
            ));
        }
        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: defaults::FAILURE_THRESHOLD,
            min_requests: defaults::MIN_REQUESTS,
            timeout_ms: defaults::BREAKER_TIMEOUT_MS,
            window_size: defaults::BREAKER_WINDOW,
        }
    }
}

/// Token bucket settings for upstream calls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Maximum tokens held.
    pub capacity: f64,
    /// Tokens added per second.
    pub refill_rate: f64,
}

impl RateLimiterConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.capacity.is_finite() && self.capacity >= 1.0) {
            return Err(ConfigError::invalid("rate_limiter.capacity", "must be a finite value >= 1"));
        }
        if !(self.refill_rate.is_finite() && self.refill_rate > 0.0) {
            return Err(ConfigError::invalid("rate_limiter.refill_rate", "must be positive"));
        }
        Ok(())
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self { capacity: defaults::BUCKET_CAPACITY, refill_rate: api::NCBI_RATE }
    }
}

/// Global admission settings plus the per-tool table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Global in-flight limit.
    pub max_concurrent_total: usize,
    /// Waiters allowed in the global queue; `0` disables queueing.
    pub max_queue_depth: usize,
    /// Longest a queued caller waits; `None` waits indefinitely.
    pub queue_timeout_ms: Option<u64>,
    /// Retry hint attached to global rejections.
    pub retry_after_ms: u64,
    /// Promotion interval for queued callers; `None` is strict priority.
    pub priority_aging_ms: Option<u64>,
    /// Limits for tools missing from `tools`.
    pub default_tool: ToolLimits,
    /// Limits per tool name.
    pub tools: HashMap<String, ToolLimits>,
}

impl ConcurrencyConfig {
    /// Limits that apply to `tool_name`.
    #[must_use]
    pub fn limits_for(&self, tool_name: &str) -> ToolLimits {
        self.tools.get(tool_name).copied().unwrap_or(self.default_tool)
    }

    /// Builder-style per-tool override.
    #[must_use]
    pub fn with_tool(mut self, name: impl Into<String>, limits: ToolLimits) -> Self {
        self.tools.insert(name.into(), limits);
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_total == 0 {
            return Err(ConfigError::invalid("concurrency.max_concurrent_total", "must be at least 1"));
        }
        if self.priority_aging_ms == Some(0) {
            return Err(ConfigError::invalid("concurrency.priority_aging_ms", "must be positive"));
        }
        let named = self.tools.iter().map(|(name, limits)| (name.as_str(), limits));
        for (name, limits) in std::iter::once(("default_tool", &self.default_tool)).chain(named) {
            if limits.max_concurrent == 0 {
                return Err(ConfigError::invalid(
                    format!("concurrency.tools.{name}.max_concurrent"),
                    "must be at least 1",
                ));
            }
        }
        Ok(())
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        let tools = HashMap::from([
            ("pubmed_search".to_string(), ToolLimits::new(3, 1, Some(10_000))),
            ("pubmed_summary".to_string(), ToolLimits::new(3, 1, Some(10_000))),
            ("clinical_trials_search".to_string(), ToolLimits::new(2, 2, Some(15_000))),
            ("multi_term_search".to_string(), ToolLimits::new(2, 3, Some(60_000))),
            ("governance_status".to_string(), ToolLimits::new(8, 0, None)),
        ]);
        Self {
            max_concurrent_total: defaults::MAX_CONCURRENT_TOTAL,
            max_queue_depth: defaults::MAX_QUEUE_DEPTH,
            queue_timeout_ms: Some(defaults::QUEUE_TIMEOUT_MS),
            retry_after_ms: defaults::RETRY_AFTER_MS,
            priority_aging_ms: Some(defaults::PRIORITY_AGING_MS),
            default_tool: ToolLimits::default(),
            tools,
        }
    }
}

/// Default per-session budgets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetDefaults {
    /// Time budget in milliseconds.
    pub time_budget_ms: u64,
    /// Token budget.
    pub token_budget: u64,
    /// Request budget.
    pub request_budget: u64,
    /// Usage ratio that reports WARNING.
    pub warning_threshold: f64,
}

impl Default for BudgetDefaults {
    fn default() -> Self {
        Self {
            time_budget_ms: defaults::TIME_BUDGET_MS,
            token_budget: defaults::TOKEN_BUDGET,
            request_budget: defaults::REQUEST_BUDGET,
            warning_threshold: defaults::WARNING_THRESHOLD,
        }
    }
}

/// Everything the governance layer needs, in one validated bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Global and per-tool admission.
    pub concurrency: ConcurrencyConfig,
    /// Upstream token bucket.
    pub rate_limiter: RateLimiterConfig,
    /// Per-tool breaker thresholds.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Session budgets.
    pub budget: BudgetDefaults,
    /// Fan-out concurrency cap.
    pub executor_max_concurrency: usize,
}

impl GovernanceConfig {
    /// Parse a JSON document; missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed or fails validation.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is invalid.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Check every setting.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.concurrency.validate()?;
        self.rate_limiter.validate()?;
        self.circuit_breaker.validate()?;
        if !(self.budget.warning_threshold > 0.0 && self.budget.warning_threshold <= 1.0) {
            return Err(ConfigError::invalid("budget.warning_threshold", "must be in (0, 1]"));
        }
        if self.executor_max_concurrency == 0 {
            return Err(ConfigError::invalid("executor_max_concurrency", "must be at least 1"));
        }
        Ok(())
    }
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            concurrency: ConcurrencyConfig::default(),
            rate_limiter: RateLimiterConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            budget: BudgetDefaults::default(),
            executor_max_concurrency: defaults::EXECUTOR_MAX_CONCURRENCY,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// NCBI API key (optional, raises the PubMed rate limit).
    pub ncbi_api_key: Option<String>,

    /// Base URL for NCBI E-utilities (for testing with mock servers).
    pub pubmed_api_url: String,

    /// Base URL for ClinicalTrials.gov (for testing with mock servers).
    pub clinical_trials_api_url: String,

    /// Request timeout.
    pub request_timeout: Duration,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Cache TTL.
    pub cache_ttl: Duration,

    /// Maximum cache size.
    pub cache_max_size: u64,

    /// Admission, rate limiting and budgets.
    pub governance: GovernanceConfig,
}

impl Config {
    /// Create a new configuration with optional NCBI API key.
    ///
    /// The upstream bucket refills at 3 tokens/s without a key and 10 tokens/s with one.
    #[must_use]
    pub fn new(ncbi_api_key: Option<String>) -> Self {
        let mut governance = GovernanceConfig::default();
        if ncbi_api_key.is_some() {
            governance.rate_limiter.refill_rate = api::NCBI_RATE_WITH_KEY;
        }
        Self {
            ncbi_api_key,
            pubmed_api_url: api::PUBMED_EUTILS.to_string(),
            clinical_trials_api_url: api::CLINICAL_TRIALS_API.to_string(),
            request_timeout: api::REQUEST_TIMEOUT,
            connect_timeout: api::CONNECT_TIMEOUT,
            cache_ttl: api::CACHE_TTL,
            cache_max_size: api::CACHE_MAX_SIZE,
            governance,
        }
    }

    /// Create a test configuration with custom URLs for mock servers.
    #[must_use]
    pub fn for_testing(base_url: &str) -> Self {
        let mut config = Self::new(None);
        config.pubmed_api_url = format!("{}/eutils", base_url);
        config.clinical_trials_api_url = format!("{}/ctgov/v2", base_url);
        config.request_timeout = Duration::from_secs(5);
        config.connect_timeout = Duration::from_secs(2);
        config.cache_ttl = Duration::from_secs(0); // No caching in tests
        config.cache_max_size = 0;
        config.governance.rate_limiter = RateLimiterConfig { capacity: 1000.0, refill_rate: 1000.0 };
        config
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns error if environment variables are invalid.
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("NCBI_API_KEY").ok();
        let mut config = Self::new(api_key);
        if let Ok(path) = std::env::var("BIOMED_GOVERNANCE_CONFIG") {
            config.load_governance(Path::new(&path))?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Replace governance settings with those in a JSON file.
    ///
    /// A file without a `rate_limiter` section keeps the key-dependent refill rate.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is invalid.
    pub fn load_governance(&mut self, path: &Path) -> anyhow::Result<()> {
        let rate_limiter = self.governance.rate_limiter;
        self.governance = GovernanceConfig::from_file(path)?;
        if self.governance.rate_limiter == RateLimiterConfig::default() {
            self.governance.rate_limiter = rate_limiter;
        }
        Ok(())
    }

    /// Check URLs and governance settings.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("pubmed_api_url", &self.pubmed_api_url),
            ("clinical_trials_api_url", &self.clinical_trials_api_url),
        ] {
            url::Url::parse(value).map_err(|e| ConfigError::invalid(field, e.to_string()))?;
        }
        self.governance.validate()
    }

    /// Check if an NCBI API key is configured.
    #[must_use]
    pub const fn has_api_key(&self) -> bool {
        self.ncbi_api_key.is_some()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.ncbi_api_key.is_none());
        assert!(!config.has_api_key());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_api_key_raises_refill_rate() {
        let config = Config::new(Some("test-key".to_string()));
        assert!(config.has_api_key());
        assert!((config.governance.rate_limiter.refill_rate - api::NCBI_RATE_WITH_KEY).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_tool_gets_default_limits() {
        let config = ConcurrencyConfig::default();
        assert_eq!(config.limits_for("no_such_tool"), ToolLimits::default());
        assert_eq!(config.limits_for("pubmed_search").priority, 1);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = GovernanceConfig::from_json(
            r#"{"concurrency": {"max_concurrent_total": 2, "tools": {"x": {"max_concurrent": 1}}}}"#,
        )
        .unwrap();
        assert_eq!(config.concurrency.max_concurrent_total, 2);
        assert_eq!(config.concurrency.max_queue_depth, defaults::MAX_QUEUE_DEPTH);
        assert_eq!(config.concurrency.limits_for("x").priority, defaults::TOOL_PRIORITY);
        assert_eq!(config.executor_max_concurrency, defaults::EXECUTOR_MAX_CONCURRENCY);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        assert!(GovernanceConfig::from_json(r#"{"concurrency": {"max_concurrent_total": 0}}"#).is_err());
        assert!(GovernanceConfig::from_json(r#"{"rate_limiter": {"refill_rate": 0.0}}"#).is_err());
        assert!(
            GovernanceConfig::from_json(r#"{"circuit_breaker": {"failure_threshold": 1.5}}"#).is_err()
        );
        assert!(
            GovernanceConfig::from_json(r#"{"concurrency": {"tools": {"t": {"max_concurrent": 0}}}}"#)
                .is_err()
        );
    }

    #[test]
    fn test_bad_url_rejected() {
        let mut config = Config::default();
        config.pubmed_api_url = "not a url".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "pubmed_api_url"));
    }
}
