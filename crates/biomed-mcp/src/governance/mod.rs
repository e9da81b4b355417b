//! Concurrency and resource governance.
//!
//! - [`ConcurrencyManager`]: global and per-tool admission with circuit breakers
//! - [`TokenBucketRateLimiter`]: upstream request throttling
//! - [`ParallelExecutor`]: bounded fan-out under the shared bucket
//! - [`GovernedAdapter`]: admission control around any [`ToolAdapter`]
//! - [`BreakerAdapter`]: circuit breaking only, for fan-out sub-calls
//!
//! A [`Governance`] bundle is built once at startup and shared by reference.

pub mod adapter;
pub mod circuit_breaker;
pub mod concurrency;
pub mod executor;
pub mod rate_limiter;

use std::sync::Arc;

pub use adapter::{BreakerAdapter, GovernedAdapter, ToolAdapter};
pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
pub use concurrency::{Admission, ConcurrencyManager, ConcurrencyStats, GlobalPermit, ToolPermit, ToolStats};
pub use executor::{ParallelExecutor, ParallelTask};
pub use rate_limiter::TokenBucketRateLimiter;

use crate::budget::BudgetManager;
use crate::config::GovernanceConfig;
use crate::error::ConfigError;

/// Every governance component, wired from one configuration.
#[derive(Debug, Clone)]
pub struct Governance {
    /// Admission gate.
    pub concurrency: Arc<ConcurrencyManager>,
    /// Shared upstream token bucket.
    pub rate_limiter: Arc<TokenBucketRateLimiter>,
    /// Fan-out executor drawing on `rate_limiter`.
    pub executor: ParallelExecutor,
    /// Session budget policy.
    pub budget: Arc<BudgetManager>,
}

impl Governance {
    /// Validate `config` and build every component.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting.
    pub fn new(config: &GovernanceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let rate_limiter = Arc::new(TokenBucketRateLimiter::from_config(&config.rate_limiter)?);
        let executor = ParallelExecutor::new(Arc::clone(&rate_limiter), config.executor_max_concurrency);
        Ok(Self {
            concurrency: Arc::new(ConcurrencyManager::new(config.concurrency.clone(), config.circuit_breaker)),
            rate_limiter,
            executor,
            budget: Arc::new(
                BudgetManager::new(config.budget).with_fan_out_concurrency(config.executor_max_concurrency),
            ),
        })
    }
}
