//! Budget-aware tool calls for one MCP session.
//!
//! Each call runs: estimate cost, check affordability, draw upstream tokens,
//! admit, execute under the session's remaining time, consume actual usage,
//! append to the session state bag. Running out of budget is reported as
//! [`CallOutcome::BudgetDenied`], never as an error.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

use crate::budget::{BudgetManager, BudgetStatus, BudgetSummary, BudgetTracker, ResourceType};
use crate::error::{AdmissionError, ToolError};
use crate::governance::{Governance, GovernedAdapter, ToolAdapter, TokenBucketRateLimiter};
use crate::models::{NodeResult, SessionState};
use crate::tools::ToolRegistry;

#[derive(Debug)]
struct SessionInner {
    tracker: BudgetTracker,
    state: SessionState,
}

/// One client session: a budget tracker plus its state bag.
#[derive(Debug)]
pub struct ToolSession {
    id: String,
    created_at: DateTime<Utc>,
    inner: Mutex<SessionInner>,
}

impl ToolSession {
    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// When the session started.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Copy of the state bag.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lock().state.clone()
    }

    /// Budget summary for this session.
    #[must_use]
    pub fn budget_summary(&self, manager: &BudgetManager) -> BudgetSummary {
        manager.get_budget_summary(&self.lock().tracker)
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Charges a call's elapsed time if its future is dropped mid-flight.
struct CancelCharge<'a> {
    session: &'a ToolSession,
    budget: &'a BudgetManager,
    name: &'a str,
    start: Instant,
    requests: u64,
    armed: bool,
}

impl CancelCharge<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelCharge<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let elapsed = self.start.elapsed();
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        tracing::warn!(session = %self.session.id, tool = self.name, elapsed_ms, "Call cancelled by caller");

        let mut inner = self.session.lock();
        self.budget.enforce_budget(&mut inner.tracker, ResourceType::Time, elapsed_ms);
        self.budget.enforce_budget(&mut inner.tracker, ResourceType::Requests, self.requests);
        inner.state.record_rejection(self.name, &format!("cancelled after {elapsed:?}"));
    }
}

/// What happened to one requested call.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CallOutcome {
    /// The tool ran; the result may still be a failure.
    Completed(NodeResult),
    /// The session cannot afford the call; nothing ran.
    BudgetDenied {
        /// Budget status at the time of the decision.
        status: BudgetStatus,
        /// Which resource is short.
        message: String,
    },
}

/// Runs tool calls through budgets, rate limiting and admission control.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    registry: Arc<ToolRegistry>,
    adapter: GovernedAdapter,
    limiter: Arc<TokenBucketRateLimiter>,
    budget: Arc<BudgetManager>,
}

impl Orchestrator {
    /// Wire the orchestrator to `registry` through `governance`.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>, governance: &Governance) -> Self {
        let adapter = GovernedAdapter::new(registry.clone(), Arc::clone(&governance.concurrency));
        Self {
            registry,
            adapter,
            limiter: Arc::clone(&governance.rate_limiter),
            budget: Arc::clone(&governance.budget),
        }
    }

    /// Tool registry behind this orchestrator.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Budget policy.
    #[must_use]
    pub const fn budget(&self) -> &Arc<BudgetManager> {
        &self.budget
    }

    /// Start a session with default budgets.
    #[must_use]
    pub fn start_session(&self) -> Arc<ToolSession> {
        self.start_session_with_id(Uuid::new_v4().to_string())
    }

    /// Start a session under a caller-chosen id.
    #[must_use]
    pub fn start_session_with_id(&self, id: impl Into<String>) -> Arc<ToolSession> {
        Arc::new(ToolSession {
            id: id.into(),
            created_at: Utc::now(),
            inner: Mutex::new(SessionInner {
                tracker: self.budget.create_tracker(None, None, None),
                state: SessionState::default(),
            }),
        })
    }

    /// Run `name` with `args` inside `session`.
    ///
    /// # Errors
    ///
    /// Returns the [`AdmissionError`] if the call was rejected by rate
    /// limiting, an open breaker or a slot timeout.
    ///
    /// Dropping the returned future still charges the elapsed time and
    /// records the cancellation in the session.
    pub async fn call(&self, session: &ToolSession, name: &str, args: Value) -> Result<CallOutcome, AdmissionError> {
        if self.registry.get(name).is_none() {
            return Ok(CallOutcome::Completed(NodeResult::failed(name, format!("unknown tool '{name}'"), 0.0)));
        }

        let cost = self.budget.estimate_operation_cost(name, &args);
        let deadline = {
            let mut inner = session.lock();
            if !self.budget.can_afford_operation(&inner.tracker, name, &args) {
                let (status, detail) = self.budget.check_budget_status(&inner.tracker);
                let message = format!(
                    "insufficient budget for {name} (estimated {} ms, {} tokens): {detail}",
                    cost.time, cost.tokens
                );
                tracing::info!(session = %session.id, tool = name, ?status, "Call denied by budget");
                inner.state.record_rejection(name, &message);
                return Ok(CallOutcome::BudgetDenied { status, message });
            }
            self.budget.calculate_timeout(&inner.tracker)
        };

        let start = Instant::now();
        let guard = CancelCharge {
            session,
            budget: &self.budget,
            name,
            start,
            requests: cost.requests,
            armed: true,
        };
        let tokens = self.registry.upstream_cost(name);
        let run = async {
            if tokens > 0 {
                if let Err(e) = self.limiter.acquire(tokens).await {
                    return Err(ToolError::from(e));
                }
            }
            self.adapter.call_tool(name, args).await
        };
        let outcome = tokio::time::timeout(deadline, run).await;
        guard.disarm();
        let elapsed = start.elapsed();
        let latency_ms = elapsed.as_secs_f64() * 1000.0;
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

        let mut inner = session.lock();
        let node = match outcome {
            Err(_) => {
                tracing::warn!(session = %session.id, tool = name, latency_ms, "Call exceeded session time budget");
                NodeResult::failed(name, format!("exceeded remaining session time of {deadline:?}"), latency_ms)
            }
            Ok(Err(ToolError::Admission(e))) => {
                tracing::warn!(session = %session.id, tool = name, error_code = e.error_code(), "Call rejected");
                self.budget.enforce_budget(&mut inner.tracker, ResourceType::Time, elapsed_ms);
                inner.state.record_rejection(name, &e.to_string());
                return Err(e);
            }
            Ok(Err(e)) => NodeResult::failed(name, e.to_user_message(), latency_ms),
            Ok(Ok(output)) => NodeResult::succeeded(name, output, latency_ms),
        };

        self.budget.enforce_budget(&mut inner.tracker, ResourceType::Time, elapsed_ms);
        self.budget.enforce_budget(&mut inner.tracker, ResourceType::Tokens, cost.tokens);
        self.budget.enforce_budget(&mut inner.tracker, ResourceType::Requests, cost.requests);
        inner.state.record(&node);

        let (status, message) = self.budget.check_budget_status(&inner.tracker);
        if status != BudgetStatus::Active {
            tracing::info!(session = %session.id, ?status, %message, "Session budget");
        }
        Ok(CallOutcome::Completed(node))
    }
}
