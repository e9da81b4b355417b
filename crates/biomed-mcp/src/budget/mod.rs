//! Time, token and request budgets for orchestration sessions.
//!
//! Budget exhaustion is reported through booleans and [`BudgetStatus`],
//! never through errors.

pub mod manager;
pub mod tracker;
pub mod types;

pub use manager::{BudgetManager, BudgetSummary};
pub use tracker::BudgetTracker;
pub use types::{BudgetStatus, CostEstimate, ResourceAmounts, ResourceType};
