//! Per-session resource tracker.
//!
//! Pure state, no I/O. A consumption that would overflow a budget is refused
//! whole and marks that resource exceeded for the tracker's lifetime.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::types::{BudgetStatus, ResourceAmounts, ResourceType};

/// Time, token and request counters for one orchestration session.
#[derive(Debug, Clone)]
pub struct BudgetTracker {
    id: Uuid,
    started_at: DateTime<Utc>,
    budgets: ResourceAmounts<u64>,
    used: ResourceAmounts<u64>,
    exceeded: ResourceAmounts<bool>,
    last_exceeded: Option<ResourceType>,
}

impl BudgetTracker {
    /// Create a tracker with fixed budgets.
    #[must_use]
    pub fn new(time_budget_ms: u64, token_budget: u64, request_budget: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            budgets: ResourceAmounts::new(time_budget_ms, token_budget, request_budget),
            used: ResourceAmounts::default(),
            exceeded: ResourceAmounts::default(),
            last_exceeded: None,
        }
    }

    /// Tracker identifier, for logs.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// When the tracker was created.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Configured budgets.
    #[must_use]
    pub const fn budgets(&self) -> ResourceAmounts<u64> {
        self.budgets
    }

    /// Amounts consumed so far.
    #[must_use]
    pub const fn usage(&self) -> ResourceAmounts<u64> {
        self.used
    }

    /// Add `amount` to `resource` if it fits.
    ///
    /// Returns `false`, marks the resource exceeded and leaves the counter
    /// untouched if it would not fit or the resource is already exceeded.
    pub fn consume(&mut self, resource: ResourceType, amount: u64) -> bool {
        if self.exceeded.get(resource) {
            return false;
        }
        let budget = self.budgets.get(resource);
        match self.used.get(resource).checked_add(amount) {
            Some(total) if total <= budget => {
                *self.used.get_mut(resource) = total;
                true
            }
            _ => {
                *self.exceeded.get_mut(resource) = true;
                self.last_exceeded = Some(resource);
                tracing::debug!(
                    tracker = %self.id,
                    %resource,
                    used = self.used.get(resource),
                    amount,
                    budget,
                    "Budget exceeded"
                );
                false
            }
        }
    }

    /// Whether `resource` has been exceeded.
    #[must_use]
    pub const fn is_exceeded(&self, resource: ResourceType) -> bool {
        self.exceeded.get(resource)
    }

    /// Budget left per resource, never negative.
    #[must_use]
    pub fn get_remaining(&self) -> ResourceAmounts<u64> {
        self.budgets.map(|r, budget| budget.saturating_sub(self.used.get(r)))
    }

    /// `used / budget` per resource; a zero budget reads as fully used.
    #[must_use]
    pub fn get_usage_percentages(&self) -> ResourceAmounts<f64> {
        self.budgets.map(|r, budget| {
            if budget == 0 {
                1.0
            } else {
                self.used.get(r) as f64 / budget as f64
            }
        })
    }

    /// `ACTIVE`, or the most recently exceeded resource's status.
    #[must_use]
    pub fn status(&self) -> BudgetStatus {
        self.last_exceeded.map_or(BudgetStatus::Active, ResourceType::exceeded_status)
    }
}
