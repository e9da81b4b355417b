//! Error types for the biomedical MCP server.
//!
//! One enum per layer: the HTTP client, admission control, configuration and
//! tool execution. Admission errors carry everything a transport needs to
//! render a rejection (code, status, retry hint).
//!
//! Budget exhaustion never appears here; budget checks return booleans/statuses.

use std::time::Duration;

/// Errors from the HTTP client layer.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    /// HTTP transport error (connection, DNS, TLS, etc.)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Middleware error
    #[error("Middleware error: {0}")]
    Middleware(#[from] reqwest_middleware::Error),

    /// Throttled by NCBI or ClinicalTrials.gov (429 response)
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Suggested wait time before retry
        retry_after: Duration,
    },

    /// Unknown record or endpoint (404 response)
    #[error("Resource not found: {resource}")]
    NotFound {
        /// Description of the missing resource
        resource: String,
    },

    /// Invalid request parameters (400 response)
    #[error("Bad request: {message}")]
    BadRequest {
        /// Error message from API
        message: String,
    },

    /// Request timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// JSON parsing error
    #[error("Failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),

    /// Server error (5xx response)
    #[error("Server error ({status}): {message}")]
    Server {
        /// HTTP status code
        status: u16,
        /// Error message
        message: String,
    },

    /// Unexpected HTTP status
    #[error("Unexpected status {status}: {message}")]
    UnexpectedStatus {
        /// HTTP status code
        status: u16,
        /// Response body or message
        message: String,
    },
}

impl ClientError {
    /// Create a rate limited error with retry-after duration.
    #[must_use]
    pub fn rate_limited(seconds: u64) -> Self {
        Self::RateLimited { retry_after: Duration::from_secs(seconds) }
    }

    /// Create a not found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound { resource: resource.into() }
    }

    /// Create a bad request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest { message: message.into() }
    }

    /// Create a server error.
    #[must_use]
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server { status, message: message.into() }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Timeout(_) | Self::Server { .. })
    }

    /// Get the retry-after duration if this is a rate limit error.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Short machine-readable code fed to the tool's circuit breaker.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Http(_) | Self::Middleware(_) => "UPSTREAM_TRANSPORT",
            Self::RateLimited { .. } => "UPSTREAM_RATE_LIMITED",
            Self::NotFound { .. } => "UPSTREAM_NOT_FOUND",
            Self::BadRequest { .. } => "UPSTREAM_BAD_REQUEST",
            Self::Timeout(_) => "UPSTREAM_TIMEOUT",
            Self::Parse(_) => "UPSTREAM_PARSE",
            Self::Server { .. } => "UPSTREAM_SERVER_ERROR",
            Self::UnexpectedStatus { .. } => "UPSTREAM_UNEXPECTED_STATUS",
        }
    }
}

/// Rejections raised by the admission-control layer.
///
/// Rate limiting (429), an open breaker (503) and a slot timeout (504)
/// are separate variants.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AdmissionError {
    /// Global limit reached and the wait queue is full (or disabled).
    #[error("rate limit exceeded for {scope}: retry after {retry_after:?} (queue depth {queue_depth})")]
    RateLimitExceeded {
        /// What was saturated ("global" or a tool name).
        scope: String,
        /// Suggested wait before retrying.
        retry_after: Duration,
        /// Number of callers waiting when the request was rejected.
        queue_depth: usize,
    },

    /// The tool's circuit breaker is open.
    #[error("circuit breaker open for tool '{tool}', retry after {retry_after:?}")]
    CircuitOpen {
        /// Tool whose breaker rejected the call.
        tool: String,
        /// Remaining cooldown before a probe is allowed.
        retry_after: Duration,
    },

    /// Gave up waiting for a global or per-tool slot.
    #[error("timed out after {waited:?} waiting for a {scope} slot")]
    Timeout {
        /// What was being waited on ("global" or a tool name).
        scope: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// Asked the token bucket for more than it can ever hold.
    #[error("requested {requested} tokens but bucket capacity is {capacity}")]
    CostExceedsCapacity {
        /// Tokens requested.
        requested: u32,
        /// Bucket capacity.
        capacity: f64,
    },
}

impl AdmissionError {
    /// Stable error code for the wire payload.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Self::Timeout { .. } => "ADMISSION_TIMEOUT",
            Self::CostExceedsCapacity { .. } => "COST_EXCEEDS_CAPACITY",
        }
    }

    /// Retry hint, if the rejection is transient.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after, .. } | Self::CircuitOpen { retry_after, .. } => {
                Some(*retry_after)
            }
            Self::Timeout { .. } | Self::CostExceedsCapacity { .. } => None,
        }
    }

    /// HTTP status an outer layer should render.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::RateLimitExceeded { .. } => 429,
            Self::CircuitOpen { .. } => 503,
            Self::Timeout { .. } => 504,
            Self::CostExceedsCapacity { .. } => 400,
        }
    }

    /// Structured payload with `error_code`, `retry_after` (whole seconds,
    /// rounded up) and `queue_depth` where applicable.
    #[must_use]
    pub fn to_payload(&self) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "error_code": self.error_code(),
            "message": self.to_string(),
        });
        if let Some(retry_after) = self.retry_after() {
            payload["retry_after"] = serde_json::json!(retry_after_secs(retry_after));
        }
        if let Self::RateLimitExceeded { queue_depth, .. } = self {
            payload["queue_depth"] = serde_json::json!(queue_depth);
        }
        payload
    }
}

/// Round a retry hint up to whole seconds, never below one.
#[must_use]
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

/// Invalid configuration detected at startup.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A numeric setting is out of range.
    #[error("invalid value for '{field}': {message}")]
    Invalid {
        /// Setting name.
        field: String,
        /// What is wrong with it.
        message: String,
    },
}

impl ConfigError {
    /// Create an invalid-setting error.
    #[must_use]
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid { field: field.into(), message: message.into() }
    }
}

/// Errors from MCP tool execution.
#[derive(thiserror::Error, Debug)]
pub enum ToolError {
    /// Error from the API client
    #[error("API error: {0}")]
    Client(#[from] ClientError),

    /// Rejected by admission control
    #[error("Admission rejected: {0}")]
    Admission(#[from] AdmissionError),

    /// Input validation failed
    #[error("Validation error: {message}")]
    Validation {
        /// Field that failed validation
        field: String,
        /// Validation error message
        message: String,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal tool logic error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Resource not available
    #[error("Resource unavailable: {0}")]
    Unavailable(String),
}

impl ToolError {
    /// Create a validation error.
    #[must_use]
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create an unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Code recorded against the tool's circuit breaker.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Client(e) => e.error_code(),
            Self::Admission(e) => e.error_code(),
            Self::Validation { .. } => "VALIDATION",
            Self::Serialization(_) => "SERIALIZATION",
            Self::Internal(_) => "INTERNAL",
            Self::Unavailable(_) => "UNAVAILABLE",
        }
    }

    /// Whether the failure says something about downstream health.
    ///
    /// Caller mistakes (bad input, not found) must not trip a breaker.
    #[must_use]
    pub const fn counts_against_breaker(&self) -> bool {
        match self {
            Self::Client(e) => {
                !matches!(e, ClientError::NotFound { .. } | ClientError::BadRequest { .. })
            }
            Self::Internal(_) | Self::Unavailable(_) => true,
            Self::Admission(_) | Self::Validation { .. } | Self::Serialization(_) => false,
        }
    }

    /// Convert to a user-friendly error message for MCP response.
    #[must_use]
    pub fn to_user_message(&self) -> String {
        match self {
            Self::Client(ClientError::RateLimited { retry_after }) => {
                format!(
                    "The upstream database is throttling requests. Retry in {} seconds.",
                    retry_after_secs(*retry_after)
                )
            }
            Self::Client(ClientError::NotFound { resource }) => {
                format!("Not found: {resource}. Check the PMID or NCT number.")
            }
            Self::Admission(AdmissionError::RateLimitExceeded { retry_after, .. }) => {
                format!(
                    "Server is busy. Please retry in {} seconds.",
                    retry_after_secs(*retry_after)
                )
            }
            Self::Admission(AdmissionError::CircuitOpen { tool, .. }) => {
                format!("Tool '{tool}' is temporarily degraded. Try another source or retry later.")
            }
            Self::Validation { field, message } => {
                format!("Invalid input for '{field}': {message}")
            }
            _ => self.to_string(),
        }
    }
}

/// Result type alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Result type alias for tool operations.
pub type ToolResult<T> = Result<T, ToolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_retryable() {
        assert!(ClientError::rate_limited(60).is_retryable());
        assert!(ClientError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(ClientError::server(500, "Internal error").is_retryable());

        assert!(!ClientError::not_found("PMID 123").is_retryable());
        assert!(!ClientError::bad_request("invalid query").is_retryable());
    }

    #[test]
    fn test_client_error_retry_after() {
        let err = ClientError::rate_limited(60);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));

        let err = ClientError::not_found("trial");
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn test_admission_payload_carries_retry_hint_and_depth() {
        let err = AdmissionError::RateLimitExceeded {
            scope: "global".into(),
            retry_after: Duration::from_millis(1500),
            queue_depth: 3,
        };
        let payload = err.to_payload();
        assert_eq!(payload["error_code"], "RATE_LIMIT_EXCEEDED");
        assert_eq!(payload["retry_after"], 2);
        assert_eq!(payload["queue_depth"], 3);
        assert_eq!(err.http_status(), 429);
    }

    #[test]
    fn test_admission_kinds_are_distinct() {
        let open = AdmissionError::CircuitOpen {
            tool: "pubmed_search".into(),
            retry_after: Duration::from_secs(30),
        };
        let timeout =
            AdmissionError::Timeout { scope: "pubmed_search".into(), waited: Duration::from_secs(1) };
        assert_eq!(open.error_code(), "CIRCUIT_OPEN");
        assert_eq!(open.http_status(), 503);
        assert_eq!(timeout.error_code(), "ADMISSION_TIMEOUT");
        assert_eq!(timeout.http_status(), 504);
        assert!(timeout.to_payload().get("retry_after").is_none());
        assert!(open.to_payload().get("queue_depth").is_none());
    }

    #[test]
    fn test_retry_after_secs_rounds_up() {
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(10)), 1);
        assert_eq!(retry_after_secs(Duration::from_secs(2)), 2);
        assert_eq!(retry_after_secs(Duration::from_millis(2001)), 3);
    }

    #[test]
    fn test_breaker_relevance() {
        assert!(ToolError::from(ClientError::server(502, "bad gateway")).counts_against_breaker());
        assert!(!ToolError::from(ClientError::not_found("x")).counts_against_breaker());
        assert!(!ToolError::validation("query", "empty").counts_against_breaker());
    }

    #[test]
    fn test_tool_error_user_message() {
        let err = ToolError::validation("query", "cannot be empty");
        assert!(err.to_user_message().contains("query"));
        assert!(err.to_user_message().contains("cannot be empty"));

        let busy = ToolError::from(AdmissionError::RateLimitExceeded {
            scope: "global".into(),
            retry_after: Duration::from_secs(1),
            queue_depth: 0,
        });
        assert!(busy.to_user_message().contains("retry in 1 seconds"));
    }
}
