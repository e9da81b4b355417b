//! Admission control: global slots, per-tool slots and per-tool breakers.
//!
//! # Global gate
//!
//! A counter of in-flight calls capped at `max_concurrent_total`. When full,
//! callers wait in a bounded queue ordered by `(effective priority, arrival)`.
//! A released slot is handed directly to the chosen waiter, so the counter
//! never dips and a late arrival cannot overtake the queue.
//!
//! With `priority_aging_ms` set, every full interval spent waiting promotes a
//! waiter by one tier, which bounds starvation of low-priority tools. Without
//! it the queue is strict priority. Within a tier, order is FIFO.
//!
//! # Per-tool gate
//!
//! A Tokio semaphore per tool (FIFO, cancel-safe) plus a [`CircuitBreaker`].
//! The breaker is checked before any waiting so a failing tool is rejected
//! immediately.
//!
//! Every permit releases on drop, which covers success, error, timeout and
//! cancellation of the waiting future.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, oneshot};
use tokio::time::Instant;

use super::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::config::{CircuitBreakerConfig, ConcurrencyConfig, ToolLimits};
use crate::error::AdmissionError;

const GLOBAL_SCOPE: &str = "global";

// =============================================================================
// Global gate
// =============================================================================

#[derive(Debug)]
struct Waiter {
    seq: u64,
    priority: u8,
    enqueued_at: Instant,
    tx: oneshot::Sender<()>,
}

#[derive(Debug, Default)]
struct GlobalState {
    in_flight: usize,
    waiters: Vec<Waiter>,
    next_seq: u64,
}

#[derive(Debug)]
struct GlobalGate {
    max_concurrent: usize,
    aging: Option<Duration>,
    state: Mutex<GlobalState>,
}

impl GlobalGate {
    fn lock(&self) -> MutexGuard<'_, GlobalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn effective_priority(&self, waiter: &Waiter, now: Instant) -> u8 {
        let Some(aging) = self.aging else {
            return waiter.priority;
        };
        let waited = now.saturating_duration_since(waiter.enqueued_at).as_millis();
        let promoted = (waited / aging.as_millis().max(1)).min(u128::from(u8::MAX)) as u8;
        waiter.priority.saturating_sub(promoted)
    }

    /// Give the slot to the best waiter, or return it to the pool.
    fn release_locked(&self, state: &mut GlobalState) {
        let now = Instant::now();
        while !state.waiters.is_empty() {
            let next = state
                .waiters
                .iter()
                .enumerate()
                .min_by_key(|(_, w)| (self.effective_priority(w, now), w.seq))
                .map(|(idx, _)| idx);
            let Some(idx) = next else { break };
            let waiter = state.waiters.swap_remove(idx);
            if waiter.tx.send(()).is_ok() {
                return;
            }
        }
        state.in_flight = state.in_flight.saturating_sub(1);
    }

    fn release(&self) {
        let mut state = self.lock();
        self.release_locked(&mut state);
    }

    /// Remove a waiter that stopped waiting. Returns `true` if it was still queued.
    fn withdraw(&self, seq: u64) -> bool {
        let mut state = self.lock();
        if let Some(idx) = state.waiters.iter().position(|w| w.seq == seq) {
            state.waiters.swap_remove(idx);
            true
        } else {
            false
        }
    }

    /// Withdraw, or pass on a slot that was granted but never claimed.
    fn abandon(&self, seq: u64) {
        let mut state = self.lock();
        if let Some(idx) = state.waiters.iter().position(|w| w.seq == seq) {
            state.waiters.swap_remove(idx);
        } else {
            self.release_locked(&mut state);
        }
    }
}

/// A queued claim on a global slot; abandons the claim if dropped while armed.
struct QueueTicket {
    gate: Arc<GlobalGate>,
    seq: u64,
    rx: oneshot::Receiver<()>,
    armed: bool,
}

impl Drop for QueueTicket {
    fn drop(&mut self) {
        if self.armed {
            self.gate.abandon(self.seq);
        }
    }
}

/// A held global slot; released exactly once on drop.
#[derive(Debug)]
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct GlobalPermit {
    gate: Arc<GlobalGate>,
}

impl Drop for GlobalPermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}

// =============================================================================
// Per-tool gate
// =============================================================================

#[derive(Debug)]
struct ToolGate {
    limits: ToolLimits,
    semaphore: Arc<Semaphore>,
    breaker: CircuitBreaker,
}

impl ToolGate {
    fn new(name: &str, limits: ToolLimits, breaker: CircuitBreakerConfig) -> Self {
        Self {
            limits,
            semaphore: Arc::new(Semaphore::new(limits.max_concurrent)),
            breaker: CircuitBreaker::new(name, breaker),
        }
    }

    fn in_flight(&self) -> usize {
        self.limits.max_concurrent.saturating_sub(self.semaphore.available_permits())
    }
}

/// A held per-tool slot; released on drop.
#[derive(Debug)]
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct ToolPermit {
    tool: String,
    _permit: OwnedSemaphorePermit,
    gate: Arc<ToolGate>,
}

impl ToolPermit {
    /// Tool this permit belongs to.
    #[must_use]
    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// Feed a success to the tool's breaker.
    pub fn record_success(&self) {
        self.gate.breaker.record_success();
    }

    /// Feed a failure to the tool's breaker.
    pub fn record_failure(&self, error_code: &str) {
        tracing::debug!(tool = %self.tool, error_code, "Recording tool failure");
        self.gate.breaker.record_failure();
    }
}

/// Both slots needed to run one tool call.
#[derive(Debug)]
#[must_use = "the slots are released as soon as the admission is dropped"]
pub struct Admission {
    tool: ToolPermit,
    _global: GlobalPermit,
}

impl Admission {
    /// Per-tool half of the admission.
    #[must_use]
    pub const fn tool(&self) -> &ToolPermit {
        &self.tool
    }
}

// =============================================================================
// Snapshots
// =============================================================================

/// Per-tool view for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ToolStats {
    /// Calls currently holding a slot.
    pub in_flight: usize,
    /// Configured limit.
    pub max_concurrent: usize,
    /// Queue priority.
    pub priority: u8,
    /// Breaker state.
    pub circuit_state: CircuitState,
}

/// Admission view for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ConcurrencyStats {
    /// Calls currently holding a global slot.
    pub global_in_flight: usize,
    /// Global limit.
    pub max_concurrent_total: usize,
    /// Callers waiting for a global slot.
    pub queue_depth: usize,
    /// Queue bound.
    pub max_queue_depth: usize,
    /// Per-tool views, by name.
    pub tools: BTreeMap<String, ToolStats>,
}

// =============================================================================
// ConcurrencyManager
// =============================================================================

/// Admission gate for every tool invocation.
#[derive(Debug)]
pub struct ConcurrencyManager {
    config: ConcurrencyConfig,
    breaker_config: CircuitBreakerConfig,
    global: Arc<GlobalGate>,
    tools: RwLock<HashMap<String, Arc<ToolGate>>>,
}

impl ConcurrencyManager {
    /// Build the gate from validated configuration.
    #[must_use]
    pub fn new(config: ConcurrencyConfig, breaker_config: CircuitBreakerConfig) -> Self {
        let tools = config
            .tools
            .iter()
            .map(|(name, limits)| (name.clone(), Arc::new(ToolGate::new(name, *limits, breaker_config))))
            .collect();
        let global = Arc::new(GlobalGate {
            max_concurrent: config.max_concurrent_total.max(1),
            aging: config.priority_aging_ms.map(Duration::from_millis),
            state: Mutex::new(GlobalState::default()),
        });
        Self { config, breaker_config, global, tools: RwLock::new(tools) }
    }

    /// Shorthand for a gate with only global limits set.
    #[must_use]
    pub fn with_limits(max_concurrent_total: usize, max_queue_depth: usize) -> Self {
        let config = ConcurrencyConfig {
            max_concurrent_total,
            max_queue_depth,
            ..ConcurrencyConfig::default()
        };
        Self::new(config, CircuitBreakerConfig::default())
    }

    /// Acquire a global slot at the default priority.
    ///
    /// # Errors
    ///
    /// See [`Self::acquire_global_with_priority`].
    pub async fn acquire_global(&self) -> Result<GlobalPermit, AdmissionError> {
        self.acquire_global_with_priority(self.config.default_tool.priority).await
    }

    /// Acquire a global slot, queueing by `priority` (lower first) if full.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::RateLimitExceeded`] if the queue is full or disabled
    /// - [`AdmissionError::Timeout`] if `queue_timeout_ms` elapses while queued
    pub async fn acquire_global_with_priority(
        &self,
        priority: u8,
    ) -> Result<GlobalPermit, AdmissionError> {
        let (seq, rx) = {
            let mut state = self.global.lock();
            if state.in_flight < self.global.max_concurrent {
                state.in_flight += 1;
                return Ok(GlobalPermit { gate: Arc::clone(&self.global) });
            }
            let queue_depth = state.waiters.len();
            if queue_depth >= self.config.max_queue_depth {
                tracing::warn!(
                    in_flight = state.in_flight,
                    queue_depth,
                    "Global admission rejected"
                );
                return Err(AdmissionError::RateLimitExceeded {
                    scope: GLOBAL_SCOPE.to_string(),
                    retry_after: Duration::from_millis(self.config.retry_after_ms),
                    queue_depth,
                });
            }
            let (tx, rx) = oneshot::channel();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.waiters.push(Waiter { seq, priority, enqueued_at: Instant::now(), tx });
            tracing::debug!(priority, queue_depth = queue_depth + 1, "Queued for global slot");
            (seq, rx)
        };

        let mut ticket = QueueTicket { gate: Arc::clone(&self.global), seq, rx, armed: true };
        let started = Instant::now();
        let granted = match self.config.queue_timeout_ms.map(Duration::from_millis) {
            Some(limit) => match tokio::time::timeout(limit, &mut ticket.rx).await {
                Ok(res) => res.is_ok(),
                Err(_) => {
                    // A grant races the timeout only under the lock, so
                    // either we are still queued or the slot is ours.
                    if self.global.withdraw(seq) {
                        ticket.armed = false;
                        return Err(AdmissionError::Timeout {
                            scope: GLOBAL_SCOPE.to_string(),
                            waited: started.elapsed(),
                        });
                    }
                    true
                }
            },
            None => (&mut ticket.rx).await.is_ok(),
        };

        if !granted {
            ticket.armed = false;
            self.global.withdraw(seq);
            return Err(AdmissionError::Timeout {
                scope: GLOBAL_SCOPE.to_string(),
                waited: started.elapsed(),
            });
        }
        ticket.armed = false;
        Ok(GlobalPermit { gate: Arc::clone(&self.global) })
    }

    /// Fail fast if `tool_name`'s breaker is open. Takes no slot.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::CircuitOpen`] while the breaker is open.
    pub fn check_circuit(&self, tool_name: &str) -> Result<(), AdmissionError> {
        self.tool_gate(tool_name).breaker.check()
    }

    /// Acquire a slot for `tool_name`, failing fast if its breaker is open.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::CircuitOpen`] if the tool's breaker is open
    /// - [`AdmissionError::Timeout`] if the tool's `timeout_ms` elapses first
    pub async fn acquire_tool(&self, tool_name: &str) -> Result<ToolPermit, AdmissionError> {
        let gate = self.tool_gate(tool_name);
        gate.breaker.check()?;

        let acquire = Arc::clone(&gate.semaphore).acquire_owned();
        let acquired = match gate.limits.timeout() {
            Some(limit) => tokio::time::timeout(limit, acquire).await.map_err(|_| {
                tracing::warn!(tool = tool_name, timeout_ms = limit.as_millis() as u64, "Tool slot timeout");
                AdmissionError::Timeout { scope: tool_name.to_string(), waited: limit }
            })?,
            None => acquire.await,
        };
        // The semaphore is never closed while the manager is alive.
        let permit = acquired.map_err(|_| AdmissionError::RateLimitExceeded {
            scope: tool_name.to_string(),
            retry_after: Duration::from_millis(self.config.retry_after_ms),
            queue_depth: 0,
        })?;

        Ok(ToolPermit { tool: tool_name.to_string(), _permit: permit, gate })
    }

    /// Full admission for one call: breaker check, global slot at the tool's
    /// priority, then the tool's own slot.
    ///
    /// # Errors
    ///
    /// Any [`AdmissionError`]; a global slot taken before a per-tool
    /// rejection is released before returning.
    pub async fn admit(&self, tool_name: &str) -> Result<Admission, AdmissionError> {
        let gate = self.tool_gate(tool_name);
        gate.breaker.check()?;
        let global = self.acquire_global_with_priority(gate.limits.priority).await?;
        let tool = self.acquire_tool(tool_name).await?;
        Ok(Admission { tool, _global: global })
    }

    /// Feed a success to `tool_name`'s breaker.
    pub fn record_tool_success(&self, tool_name: &str) {
        self.tool_gate(tool_name).breaker.record_success();
    }

    /// Feed a failure to `tool_name`'s breaker.
    pub fn record_tool_failure(&self, tool_name: &str, error_code: &str) {
        tracing::debug!(tool = tool_name, error_code, "Recording tool failure");
        self.tool_gate(tool_name).breaker.record_failure();
    }

    /// Breaker state for `tool_name`.
    #[must_use]
    pub fn circuit_state(&self, tool_name: &str) -> CircuitState {
        self.tool_gate(tool_name).breaker.state()
    }

    /// Calls currently holding a global slot.
    #[must_use]
    pub fn global_in_flight(&self) -> usize {
        self.global.lock().in_flight
    }

    /// Callers waiting for a global slot.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.global.lock().waiters.len()
    }

    /// Calls currently holding `tool_name`'s slot.
    #[must_use]
    pub fn tool_in_flight(&self, tool_name: &str) -> usize {
        self.tool_gate(tool_name).in_flight()
    }

    /// Snapshot of every gate.
    #[must_use]
    pub fn stats(&self) -> ConcurrencyStats {
        let (global_in_flight, queue_depth) = {
            let state = self.global.lock();
            (state.in_flight, state.waiters.len())
        };
        let tools = self
            .tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, gate)| {
                (
                    name.clone(),
                    ToolStats {
                        in_flight: gate.in_flight(),
                        max_concurrent: gate.limits.max_concurrent,
                        priority: gate.limits.priority,
                        circuit_state: gate.breaker.state(),
                    },
                )
            })
            .collect();
        ConcurrencyStats {
            global_in_flight,
            max_concurrent_total: self.global.max_concurrent,
            queue_depth,
            max_queue_depth: self.config.max_queue_depth,
            tools,
        }
    }

    fn tool_gate(&self, tool_name: &str) -> Arc<ToolGate> {
        if let Some(gate) = self.tools.read().unwrap_or_else(PoisonError::into_inner).get(tool_name) {
            return Arc::clone(gate);
        }
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        let gate = tools.entry(tool_name.to_string()).or_insert_with(|| {
            Arc::new(ToolGate::new(tool_name, self.config.limits_for(tool_name), self.breaker_config))
        });
        Arc::clone(gate)
    }
}
