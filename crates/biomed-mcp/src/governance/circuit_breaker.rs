//! Failure-rate circuit breaker guarding one downstream tool.
//!
//! ```text
//!            ratio >= threshold (>= min_requests samples)
//!   Closed ─────────────────────────────────────────────► Open
//!     ▲                                                     │ timeout elapsed
//!     │ success                                             ▼
//!     └──────────────────────── HalfOpen ◄──────────────────┘
//!                                  │ failure
//!                                  └──────────────► Open
//! ```
//!
//! Outcomes are kept in a bounded ring buffer. The open→half_open transition is
//! applied lazily whenever the state is observed.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::error::AdmissionError;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected immediately.
    Open,
    /// Calls are allowed; the next outcome decides.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        })
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    /// `true` = failure.
    window: VecDeque<bool>,
    failures: usize,
    opened_at: Option<Instant>,
}

impl Inner {
    fn push(&mut self, failed: bool, capacity: usize) {
        if self.window.len() == capacity {
            if let Some(true) = self.window.pop_front() {
                self.failures -= 1;
            }
        }
        self.window.push_back(failed);
        if failed {
            self.failures += 1;
        }
    }

    fn reset_window(&mut self) {
        self.window.clear();
        self.failures = 0;
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    /// Current state.
    pub state: CircuitState,
    /// Samples in the window.
    pub samples: usize,
    /// Failures in the window.
    pub failures: usize,
}

/// Circuit breaker for a single tool.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let window_size = config.window_size.max(config.min_requests as usize).max(1);
        Self {
            name: name.into(),
            config: CircuitBreakerConfig { window_size, ..config },
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                window: VecDeque::with_capacity(window_size),
                failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Name of the guarded tool.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, promoting `Open` to `HalfOpen` once the cooldown has passed.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.observe(&mut inner, Instant::now());
        inner.state
    }

    /// Current state plus window counts.
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.lock();
        self.observe(&mut inner, Instant::now());
        BreakerSnapshot { state: inner.state, samples: inner.window.len(), failures: inner.failures }
    }

    /// Fail fast if the breaker is open.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::CircuitOpen`] with the remaining cooldown.
    pub fn check(&self) -> Result<(), AdmissionError> {
        let now = Instant::now();
        let mut inner = self.lock();
        self.observe(&mut inner, now);
        if inner.state != CircuitState::Open {
            return Ok(());
        }
        let elapsed = inner.opened_at.map_or(Duration::ZERO, |at| now.saturating_duration_since(at));
        Err(AdmissionError::CircuitOpen {
            tool: self.name.clone(),
            retry_after: self.config.timeout().saturating_sub(elapsed),
        })
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        self.record(false);
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        self.record(true);
    }

    /// Run `fut` under the breaker, recording its outcome.
    ///
    /// The outer `Result` is the breaker's verdict; the inner one is the call's.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::CircuitOpen`] without polling `fut` while open.
    pub async fn call<T, E, Fut>(&self, fut: Fut) -> Result<Result<T, E>, AdmissionError>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        self.check()?;
        let result = fut.await;
        self.record(result.is_err());
        Ok(result)
    }

    /// Force the breaker closed and clear its window.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        inner.reset_window();
    }

    fn record(&self, failed: bool) {
        let now = Instant::now();
        let mut inner = self.lock();
        self.observe(&mut inner, now);

        match inner.state {
            CircuitState::Closed => {
                inner.push(failed, self.config.window_size);
                let samples = inner.window.len();
                if samples >= self.config.min_requests as usize {
                    let ratio = inner.failures as f64 / samples as f64;
                    if ratio >= self.config.failure_threshold {
                        tracing::warn!(
                            tool = %self.name,
                            failures = inner.failures,
                            samples,
                            "Circuit breaker opened"
                        );
                        self.trip(&mut inner, now);
                    }
                }
            }
            CircuitState::HalfOpen => {
                if failed {
                    tracing::warn!(tool = %self.name, "Probe failed, circuit breaker re-opened");
                    self.trip(&mut inner, now);
                } else {
                    tracing::info!(tool = %self.name, "Probe succeeded, circuit breaker closed");
                    inner.state = CircuitState::Closed;
                    inner.opened_at = None;
                    inner.reset_window();
                }
            }
            // Outcomes of calls admitted before the trip do not extend the cooldown.
            CircuitState::Open => {}
        }
    }

    fn trip(&self, inner: &mut Inner, now: Instant) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.reset_window();
    }

    fn observe(&self, inner: &mut Inner, now: Instant) {
        if inner.state == CircuitState::Open {
            if let Some(at) = inner.opened_at {
                if now.saturating_duration_since(at) >= self.config.timeout() {
                    tracing::debug!(tool = %self.name, "Circuit breaker half-open");
                    inner.state = CircuitState::HalfOpen;
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
