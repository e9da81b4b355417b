//! The unit of work the governance layer throttles, and the wrappers that
//! put admission control or circuit breaking in front of it.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use super::concurrency::ConcurrencyManager;
use crate::error::ToolResult;
use crate::models::{NodeResult, ToolOutput};

/// Something that can run a named tool.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// Run `name` with `args`, keeping the typed error.
    async fn call_tool(&self, name: &str, args: Value) -> ToolResult<ToolOutput>;

    /// Run `name` and fold the outcome into a [`NodeResult`].
    async fn execute_tool(&self, name: &str, args: Value) -> NodeResult {
        let start = Instant::now();
        let outcome = self.call_tool(name, args).await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        match outcome {
            Ok(output) => NodeResult::succeeded(name, output, latency_ms),
            Err(e) => NodeResult::failed(name, e.to_user_message(), latency_ms),
        }
    }
}

/// Admission control around another adapter.
///
/// Every call is admitted through the [`ConcurrencyManager`], and its outcome
/// is fed back to the tool's circuit breaker. Caller mistakes are not
/// recorded as failures.
#[derive(Clone)]
pub struct GovernedAdapter {
    inner: Arc<dyn ToolAdapter>,
    concurrency: Arc<ConcurrencyManager>,
}

impl std::fmt::Debug for GovernedAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernedAdapter").finish_non_exhaustive()
    }
}

impl GovernedAdapter {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn ToolAdapter>, concurrency: Arc<ConcurrencyManager>) -> Self {
        Self { inner, concurrency }
    }

    /// The ungoverned adapter underneath.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn ToolAdapter> {
        &self.inner
    }
}

#[async_trait]
impl ToolAdapter for GovernedAdapter {
    async fn call_tool(&self, name: &str, args: Value) -> ToolResult<ToolOutput> {
        let admission = self.concurrency.admit(name).await?;
        let result = self.inner.call_tool(name, args).await;
        match &result {
            Ok(_) => admission.tool().record_success(),
            Err(e) if e.counts_against_breaker() => admission.tool().record_failure(e.error_code()),
            Err(_) => {}
        }
        result
    }
}

/// Circuit breaking without admission, for sub-calls made on behalf of a
/// caller that already holds its global and tool slots.
///
/// An open breaker fails the call before it reaches `inner`; outcomes are
/// recorded exactly as [`GovernedAdapter`] records them.
#[derive(Clone)]
pub struct BreakerAdapter {
    inner: Arc<dyn ToolAdapter>,
    concurrency: Arc<ConcurrencyManager>,
}

impl std::fmt::Debug for BreakerAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerAdapter").finish_non_exhaustive()
    }
}

impl BreakerAdapter {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn ToolAdapter>, concurrency: Arc<ConcurrencyManager>) -> Self {
        Self { inner, concurrency }
    }
}

#[async_trait]
impl ToolAdapter for BreakerAdapter {
    async fn call_tool(&self, name: &str, args: Value) -> ToolResult<ToolOutput> {
        self.concurrency.check_circuit(name)?;
        let result = self.inner.call_tool(name, args).await;
        match &result {
            Ok(_) => self.concurrency.record_tool_success(name),
            Err(e) if e.counts_against_breaker() => self.concurrency.record_tool_failure(name, e.error_code()),
            Err(_) => {}
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::config::{CircuitBreakerConfig, ConcurrencyConfig};
    use crate::error::{ClientError, ToolError};
    use crate::governance::CircuitState;

    struct Scripted {
        calls: AtomicUsize,
        fail_with: fn() -> ToolError,
    }

    #[async_trait]
    impl ToolAdapter for Scripted {
        async fn call_tool(&self, name: &str, _args: Value) -> ToolResult<ToolOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if name == "ok" {
                Ok(ToolOutput::fresh(json!({"tool": name})))
            } else {
                Err((self.fail_with)())
            }
        }
    }

    fn governed(fail_with: fn() -> ToolError) -> (GovernedAdapter, Arc<ConcurrencyManager>) {
        let breaker = CircuitBreakerConfig { failure_threshold: 0.5, min_requests: 2, timeout_ms: 60_000, window_size: 10 };
        let manager = Arc::new(ConcurrencyManager::new(ConcurrencyConfig::default(), breaker));
        let inner = Arc::new(Scripted { calls: AtomicUsize::new(0), fail_with });
        (GovernedAdapter::new(inner, Arc::clone(&manager)), manager)
    }

    #[tokio::test]
    async fn test_success_is_wrapped_in_node_result() {
        let (adapter, manager) = governed(|| ToolError::internal("x"));
        let result = adapter.execute_tool("ok", json!({})).await;
        assert!(result.success());
        assert_eq!(result.node_name(), "ok");
        assert_eq!(manager.global_in_flight(), 0);
    }

    #[tokio::test]
    async fn test_upstream_failures_trip_breaker() {
        let (adapter, manager) = governed(|| ToolError::from(ClientError::server(502, "bad gateway")));
        assert!(!adapter.execute_tool("flaky", json!({})).await.success());
        assert!(!adapter.execute_tool("flaky", json!({})).await.success());
        assert_eq!(manager.circuit_state("flaky"), CircuitState::Open);

        let err = adapter.call_tool("flaky", json!({})).await.unwrap_err();
        assert_eq!(err.error_code(), "CIRCUIT_OPEN");
    }

    #[tokio::test]
    async fn test_caller_mistakes_do_not_trip_breaker() {
        let (adapter, manager) = governed(|| ToolError::validation("query", "cannot be empty"));
        for _ in 0..5 {
            assert!(!adapter.execute_tool("picky", json!({})).await.success());
        }
        assert_eq!(manager.circuit_state("picky"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_breaker_adapter_takes_no_slots_and_stops_at_open_breaker() {
        let breaker = CircuitBreakerConfig { failure_threshold: 0.5, min_requests: 2, timeout_ms: 60_000, window_size: 10 };
        let config = ConcurrencyConfig { max_concurrent_total: 1, max_queue_depth: 0, ..ConcurrencyConfig::default() };
        let manager = Arc::new(ConcurrencyManager::new(config, breaker));
        let inner = Arc::new(Scripted {
            calls: AtomicUsize::new(0),
            fail_with: || ToolError::from(ClientError::server(502, "bad gateway")),
        });
        let adapter = BreakerAdapter::new(inner.clone(), Arc::clone(&manager));

        // A held global slot does not block the sub-call.
        let _parent = manager.acquire_global().await.unwrap();
        assert!(adapter.execute_tool("ok", json!({})).await.success());

        for _ in 0..2 {
            assert!(!adapter.execute_tool("flaky", json!({})).await.success());
        }
        assert_eq!(manager.circuit_state("flaky"), CircuitState::Open);

        let err = adapter.call_tool("flaky", json!({})).await.unwrap_err();
        assert_eq!(err.error_code(), "CIRCUIT_OPEN");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3, "open breaker must not reach the inner adapter");
        assert_eq!(manager.global_in_flight(), 1);
    }
}
