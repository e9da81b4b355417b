//! Budget type definitions

use serde::{Deserialize, Serialize};

/// A budgeted resource dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    /// Wall-clock time, in milliseconds.
    Time,
    /// LLM/embedding tokens.
    Tokens,
    /// Upstream requests.
    Requests,
}

impl ResourceType {
    /// Every resource, in reporting order.
    pub const ALL: [Self; 3] = [Self::Time, Self::Tokens, Self::Requests];

    /// Status a tracker reports once this resource is exceeded.
    #[must_use]
    pub const fn exceeded_status(self) -> BudgetStatus {
        match self {
            Self::Time => BudgetStatus::TimeExceeded,
            Self::Tokens => BudgetStatus::TokenExceeded,
            Self::Requests => BudgetStatus::RequestExceeded,
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Time => "time",
            Self::Tokens => "tokens",
            Self::Requests => "requests",
        })
    }
}

/// Session budget status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BudgetStatus {
    /// Within budget.
    Active,
    /// Some resource is at or above the warning threshold.
    Warning,
    /// Time budget exhausted.
    TimeExceeded,
    /// Token budget exhausted.
    TokenExceeded,
    /// Request budget exhausted.
    RequestExceeded,
}

impl BudgetStatus {
    /// True for any `*_EXCEEDED` status.
    #[must_use]
    pub const fn is_exceeded(self) -> bool {
        matches!(self, Self::TimeExceeded | Self::TokenExceeded | Self::RequestExceeded)
    }
}

/// One value per resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ResourceAmounts<T> {
    /// Time, in milliseconds.
    pub time: T,
    /// Tokens.
    pub tokens: T,
    /// Requests.
    pub requests: T,
}

impl<T: Copy> ResourceAmounts<T> {
    /// Build from the three values.
    pub const fn new(time: T, tokens: T, requests: T) -> Self {
        Self { time, tokens, requests }
    }

    /// Value for `resource`.
    pub const fn get(&self, resource: ResourceType) -> T {
        match resource {
            ResourceType::Time => self.time,
            ResourceType::Tokens => self.tokens,
            ResourceType::Requests => self.requests,
        }
    }

    /// Mutable slot for `resource`.
    pub fn get_mut(&mut self, resource: ResourceType) -> &mut T {
        match resource {
            ResourceType::Time => &mut self.time,
            ResourceType::Tokens => &mut self.tokens,
            ResourceType::Requests => &mut self.requests,
        }
    }

    /// Apply `f` to each value.
    pub fn map<U: Copy>(self, mut f: impl FnMut(ResourceType, T) -> U) -> ResourceAmounts<U> {
        ResourceAmounts {
            time: f(ResourceType::Time, self.time),
            tokens: f(ResourceType::Tokens, self.tokens),
            requests: f(ResourceType::Requests, self.requests),
        }
    }
}

/// Estimated cost of one tool call.
pub type CostEstimate = ResourceAmounts<u64>;
