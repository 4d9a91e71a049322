use thiserror::Error;

/// Errors surfaced by the failover layer.
///
/// The structured variants are the primary classification signal for retry
/// policies; the rendered message doubles as the substring-matching
/// fallback for configured retryable-error tokens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailoverError {
    #[error("no available instances")]
    NoAvailableInstances,

    #[error("maximum retries exceeded")]
    MaxRetriesExceeded,

    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error("request timeout")]
    RequestTimeout,

    #[error("service is unavailable")]
    ServiceUnavailable,

    #[error("operation cancelled")]
    Cancelled,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("operation error: {0}")]
    Operation(String),
}

impl FailoverError {
    /// Whether the error kind is transient by construction, independent of
    /// any configured substring list.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FailoverError::RequestTimeout
                | FailoverError::Connection(_)
                | FailoverError::ServiceUnavailable
        )
    }
}

pub type Result<T> = std::result::Result<T, FailoverError>;
