//! Bounded, rate-limited fan-out of independent tasks.
//!
//! Each task takes `token_cost` tokens from the shared bucket, then a slot
//! from the executor's semaphore, then runs. Results come back in input order.
//! A failing or panicking task only fails its own [`NodeResult`]. Tasks live
//! in a [`JoinSet`], so cancelling the batch cancels them too.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use super::adapter::ToolAdapter;
use super::rate_limiter::TokenBucketRateLimiter;
use crate::models::{NodeResult, ToolOutput};

/// One unit of work for [`ParallelExecutor::execute_parallel`].
pub struct ParallelTask {
    name: String,
    token_cost: u32,
    fut: BoxFuture<'static, Result<ToolOutput, String>>,
}

impl std::fmt::Debug for ParallelTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelTask")
            .field("name", &self.name)
            .field("token_cost", &self.token_cost)
            .finish_non_exhaustive()
    }
}

impl ParallelTask {
    /// Wrap an arbitrary future; its error is kept as display text.
    pub fn new<F, E>(name: impl Into<String>, token_cost: u32, fut: F) -> Self
    where
        F: Future<Output = Result<ToolOutput, E>> + Send + 'static,
        E: Display,
    {
        Self {
            name: name.into(),
            token_cost,
            fut: Box::pin(async move { fut.await.map_err(|e| e.to_string()) }),
        }
    }

    /// A call to `tool` through a [`ToolAdapter`].
    pub fn tool_call(
        adapter: Arc<dyn ToolAdapter>,
        name: impl Into<String>,
        tool: impl Into<String>,
        args: Value,
        token_cost: u32,
    ) -> Self {
        let tool = tool.into();
        Self {
            name: name.into(),
            token_cost,
            fut: Box::pin(async move { adapter.execute_tool(&tool, args).await.into_result() }),
        }
    }

    /// Task label used in its [`NodeResult`].
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Runs batches of tasks under a shared token bucket and a concurrency cap.
#[derive(Debug, Clone)]
pub struct ParallelExecutor {
    limiter: Arc<TokenBucketRateLimiter>,
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
}

impl ParallelExecutor {
    /// Create an executor allowing `max_concurrency` tasks in flight.
    #[must_use]
    pub fn new(limiter: Arc<TokenBucketRateLimiter>, max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self { limiter, semaphore: Arc::new(Semaphore::new(max_concurrency)), max_concurrency }
    }

    /// Concurrency cap.
    #[must_use]
    pub const fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Slots not currently held by a running task.
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Shared token bucket.
    #[must_use]
    pub fn limiter(&self) -> &Arc<TokenBucketRateLimiter> {
        &self.limiter
    }

    /// Run every task and return one result per task, in input order.
    ///
    /// With `timeout`, tasks unfinished at the deadline are aborted and
    /// reported as failed; their slots are released before this returns.
    /// Dropping the returned future aborts every task still running.
    pub async fn execute_parallel(&self, tasks: Vec<ParallelTask>, timeout: Option<Duration>) -> Vec<NodeResult> {
        let batch_start = Instant::now();
        let deadline = timeout.map(|t| batch_start + t);
        tracing::debug!(tasks = tasks.len(), max_concurrency = self.max_concurrency, "Executing batch");

        let mut set = JoinSet::new();
        let mut names = Vec::with_capacity(tasks.len());
        let mut positions = HashMap::with_capacity(tasks.len());
        for (idx, task) in tasks.into_iter().enumerate() {
            names.push(task.name.clone());
            let handle = set.spawn(run_task(Arc::clone(&self.limiter), Arc::clone(&self.semaphore), task));
            positions.insert(handle.id(), idx);
        }

        let mut results: Vec<Option<NodeResult>> = names.iter().map(|_| None).collect();
        loop {
            let next = match deadline {
                Some(at) => match tokio::time::timeout_at(at, set.join_next_with_id()).await {
                    Ok(next) => next,
                    Err(_) => {
                        // Waits for the aborts so every permit is back.
                        set.shutdown().await;
                        break;
                    }
                },
                None => set.join_next_with_id().await,
            };
            let Some(joined) = next else { break };

            match joined {
                Ok((id, node)) => {
                    if let Some(&idx) = positions.get(&id) {
                        results[idx] = Some(node);
                    }
                }
                Err(e) => {
                    if let Some(&idx) = positions.get(&e.id()) {
                        tracing::warn!(task = %names[idx], error = %e, "Task panicked");
                        let latency_ms = batch_start.elapsed().as_secs_f64() * 1000.0;
                        results[idx] = Some(NodeResult::failed(names[idx].clone(), format!("task panicked: {e}"), latency_ms));
                    }
                }
            }
        }

        let waited = batch_start.elapsed();
        names
            .into_iter()
            .zip(results)
            .map(|(name, result)| {
                result.unwrap_or_else(|| {
                    tracing::warn!(task = %name, waited_ms = waited.as_millis() as u64, "Task timed out");
                    NodeResult::failed(name, format!("timed out after {waited:?}"), waited.as_secs_f64() * 1000.0)
                })
            })
            .collect()
    }
}

async fn run_task(limiter: Arc<TokenBucketRateLimiter>, semaphore: Arc<Semaphore>, task: ParallelTask) -> NodeResult {
    let ParallelTask { name, token_cost, fut } = task;

    if let Err(e) = limiter.acquire(token_cost).await {
        tracing::warn!(task = %name, error_code = e.error_code(), "Task rejected by rate limiter");
        return NodeResult::failed(name, e.to_string(), 0.0);
    }
    let Ok(_permit) = semaphore.acquire_owned().await else {
        return NodeResult::failed(name, "executor is shut down", 0.0);
    };

    let start = Instant::now();
    let outcome = fut.await;
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    match outcome {
        Ok(output) => NodeResult::succeeded(name, output, latency_ms),
        Err(message) => {
            tracing::warn!(task = %name, latency_ms, error = %message, "Task failed");
            NodeResult::failed(name, message, latency_ms)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::error::ToolError;

    fn executor(max_concurrency: usize) -> ParallelExecutor {
        let limiter = Arc::new(TokenBucketRateLimiter::new(100.0, 100.0).unwrap());
        ParallelExecutor::new(limiter, max_concurrency)
    }

    #[tokio::test]
    async fn test_failure_is_isolated_and_order_kept() {
        let exec = executor(3);
        let tasks = vec![
            ParallelTask::new("a", 1, async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok::<_, ToolError>(ToolOutput::fresh(json!("a")))
            }),
            ParallelTask::new("b", 1, async { Err::<ToolOutput, _>(ToolError::internal("boom")) }),
            ParallelTask::new("c", 1, async { Ok::<_, ToolError>(ToolOutput::new(json!("c"), true)) }),
        ];

        let results = exec.execute_parallel(tasks, None).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].node_name(), "a");
        assert!(results[0].success());
        assert!(!results[1].success());
        assert!(results[1].error_message().unwrap().contains("boom"));
        assert!(results[2].success());
        assert!(results[2].cache_hit());
    }

    #[tokio::test]
    async fn test_panic_becomes_failed_result() {
        let exec = executor(2);
        let tasks = vec![
            ParallelTask::new("ok", 1, async { Ok::<_, ToolError>(ToolOutput::fresh(json!(1))) }),
            ParallelTask::new("panics", 1, async {
                let broken: Option<u32> = None;
                let n = broken.expect("kaboom");
                Ok::<_, ToolError>(ToolOutput::fresh(json!(n)))
            }),
        ];
        let results = exec.execute_parallel(tasks, None).await;
        assert!(results[0].success());
        assert!(!results[1].success());
        assert_eq!(exec.available_slots(), 2);
    }

    #[tokio::test]
    async fn test_concurrency_cap_is_respected() {
        let exec = executor(2);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..6)
            .map(|i| {
                let current = Arc::clone(&current);
                let peak = Arc::clone(&peak);
                ParallelTask::new(format!("t{i}"), 1, async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, ToolError>(ToolOutput::fresh(json!(i)))
                })
            })
            .collect();

        let results = exec.execute_parallel(tasks, None).await;
        assert!(results.iter().all(NodeResult::success));
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_slow_tasks_and_releases_slots() {
        let exec = executor(2);
        let tasks = vec![
            ParallelTask::new("fast", 1, async { Ok::<_, ToolError>(ToolOutput::fresh(json!("fast"))) }),
            ParallelTask::new("slow", 1, async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, ToolError>(ToolOutput::fresh(json!("slow")))
            }),
        ];

        let results = exec.execute_parallel(tasks, Some(Duration::from_millis(100))).await;
        assert!(results[0].success());
        assert!(!results[1].success());
        assert!(results[1].error_message().unwrap().contains("timed out"));
        assert_eq!(exec.available_slots(), 2);
    }

    #[tokio::test]
    async fn test_cost_above_capacity_fails_only_that_task() {
        let limiter = Arc::new(TokenBucketRateLimiter::new(2.0, 10.0).unwrap());
        let exec = ParallelExecutor::new(limiter, 2);
        let tasks = vec![
            ParallelTask::new("cheap", 1, async { Ok::<_, ToolError>(ToolOutput::fresh(json!(1))) }),
            ParallelTask::new("huge", 5, async { Ok::<_, ToolError>(ToolOutput::fresh(json!(2))) }),
        ];
        let results = exec.execute_parallel(tasks, None).await;
        assert!(results[0].success());
        assert!(results[1].error_message().unwrap().contains("capacity"));
    }
}
