//! Fan-out through `ParallelExecutor` with real adapters.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::time::Instant;

use biomed_mcp::error::{ClientError, ToolResult};
use biomed_mcp::governance::{
    BreakerAdapter, CircuitState, ConcurrencyManager, ParallelExecutor, ParallelTask, TokenBucketRateLimiter, ToolAdapter,
};
use biomed_mcp::models::ToolOutput;

/// Echoes the query back; queries starting with "bad" fail upstream.
#[derive(Default)]
struct EchoAdapter {
    calls: AtomicUsize,
}

#[async_trait]
impl ToolAdapter for EchoAdapter {
    async fn call_tool(&self, _name: &str, args: Value) -> ToolResult<ToolOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let query = args["query"].as_str().unwrap_or_default().to_string();
        tokio::time::sleep(Duration::from_millis(5)).await;
        if query.starts_with("bad") {
            return Err(ClientError::server(502, "bad gateway").into());
        }
        Ok(ToolOutput::new(json!({ "echo": query }), query.ends_with("cached")))
    }
}

fn tasks(adapter: &Arc<dyn ToolAdapter>, terms: &[&str]) -> Vec<ParallelTask> {
    terms
        .iter()
        .map(|term| ParallelTask::tool_call(Arc::clone(adapter), *term, "pubmed_search", json!({ "query": term }), 1))
        .collect()
}

#[tokio::test]
async fn test_results_follow_input_order_with_isolated_failure() {
    let limiter = Arc::new(TokenBucketRateLimiter::new(50.0, 50.0).unwrap());
    let executor = ParallelExecutor::new(limiter, 3);
    let adapter: Arc<dyn ToolAdapter> = Arc::new(EchoAdapter::default());

    let results = executor
        .execute_parallel(tasks(&adapter, &["asthma", "bad term", "copd cached"]), None)
        .await;

    let names: Vec<_> = results.iter().map(|r| r.node_name()).collect();
    assert_eq!(names, ["asthma", "bad term", "copd cached"]);
    assert!(results[0].success());
    assert_eq!(results[0].data().unwrap()["echo"], "asthma");
    assert!(!results[1].success());
    assert!(results[1].error_message().unwrap().contains("502"));
    assert!(results[2].cache_hit());
    assert!(results.iter().all(|r| r.latency_ms() >= 0.0));
}

#[tokio::test(start_paused = true)]
async fn test_batch_is_paced_by_shared_bucket() {
    let limiter = Arc::new(TokenBucketRateLimiter::new(2.0, 4.0).unwrap());
    let executor = ParallelExecutor::new(Arc::clone(&limiter), 8);
    let adapter: Arc<dyn ToolAdapter> = Arc::new(EchoAdapter::default());

    let start = Instant::now();
    let results = executor
        .execute_parallel(tasks(&adapter, &["a", "b", "c", "d", "e", "f"]), None)
        .await;

    assert!(results.iter().all(|r| r.success()));
    // 2 tokens up front, 4 more at 4/s.
    assert!(start.elapsed() >= Duration::from_millis(950), "took {:?}", start.elapsed());
}

#[tokio::test]
async fn test_fan_out_stops_at_open_breaker_without_taking_slots() {
    let limiter = Arc::new(TokenBucketRateLimiter::new(50.0, 50.0).unwrap());
    let executor = ParallelExecutor::new(limiter, 5);
    // One slot, no queue: the parent call already holds it.
    let manager = Arc::new(ConcurrencyManager::with_limits(1, 0));
    let _parent = manager.acquire_global().await.unwrap();

    let echo = Arc::new(EchoAdapter::default());
    let adapter: Arc<dyn ToolAdapter> = Arc::new(BreakerAdapter::new(echo.clone(), Arc::clone(&manager)));

    let results = executor
        .execute_parallel(tasks(&adapter, &["bad 1", "bad 2", "bad 3", "bad 4", "bad 5"]), None)
        .await;
    assert!(results.iter().all(|r| r.error_message().unwrap().contains("502")));
    assert_eq!(
        manager.circuit_state("pubmed_search"),
        CircuitState::Open,
        "five upstream failures meet the default breaker threshold"
    );

    let results = executor.execute_parallel(tasks(&adapter, &["asthma", "copd", "bad 6"]), None).await;
    assert!(results.iter().all(|r| r.error_message().unwrap().contains("degraded")));
    assert_eq!(echo.calls.load(Ordering::SeqCst), 5);
    assert_eq!(manager.global_in_flight(), 1);
    assert_eq!(executor.available_slots(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_batch_aborts_tasks_and_frees_slots() {
    let limiter = Arc::new(TokenBucketRateLimiter::new(50.0, 50.0).unwrap());
    let executor = ParallelExecutor::new(limiter, 2);
    let finished = Arc::new(AtomicUsize::new(0));

    let batch: Vec<_> = ["a", "b"]
        .into_iter()
        .map(|name| {
            let finished = Arc::clone(&finished);
            ParallelTask::new(name, 1, async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(ToolOutput::new(json!({}), false))
            })
        })
        .collect();

    let outer = tokio::time::timeout(Duration::from_millis(20), executor.execute_parallel(batch, None)).await;
    assert!(outer.is_err());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(finished.load(Ordering::SeqCst), 0);
    assert_eq!(executor.available_slots(), 2);
}
