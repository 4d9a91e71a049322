//! Request-scoped cancellation and deadlines.

use crate::error::FailoverError;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Cancellation scope for one orchestrated call.
///
/// Combines an explicit [`CancellationToken`] with an optional deadline.
/// Every suspension point in the failover path (backoff waits, probes, the
/// user operation) observes the context so a cancelled or expired call
/// unwinds promptly instead of sleeping through its budget.
#[derive(Debug, Clone)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that never cancels on its own.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// A context driven by an external cancellation token.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Adds a deadline to this context.
    pub fn deadline_in(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Cancels the context.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Time left until the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// The terminal error for this context, if it is no longer live:
    /// [`FailoverError::Cancelled`] after an explicit cancel,
    /// [`FailoverError::RequestTimeout`] after the deadline.
    pub fn error(&self) -> Option<FailoverError> {
        if self.token.is_cancelled() {
            return Some(FailoverError::Cancelled);
        }
        if matches!(self.deadline, Some(d) if Instant::now() >= d) {
            return Some(FailoverError::RequestTimeout);
        }
        None
    }

    /// Whether the context has been cancelled or has expired.
    pub fn is_done(&self) -> bool {
        self.error().is_some()
    }

    /// Sleeps for `duration`, waking early when the context dies.
    ///
    /// Returns the context error when the sleep was cut short.
    pub async fn sleep(&self, duration: Duration) -> Result<(), FailoverError> {
        if let Some(err) = self.error() {
            return Err(err);
        }

        let capped = match self.remaining() {
            Some(remaining) if remaining < duration => remaining,
            _ => duration,
        };

        tokio::select! {
            _ = self.token.cancelled() => Err(FailoverError::Cancelled),
            _ = tokio::time::sleep(capped) => match self.error() {
                Some(err) => Err(err),
                None => Ok(()),
            },
        }
    }

    /// Runs a future against the context, cutting it short when the context
    /// dies first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, FailoverError>
    where
        F: std::future::Future<Output = T>,
    {
        if let Some(err) = self.error() {
            return Err(err);
        }

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => Err(FailoverError::Cancelled),
                    _ = tokio::time::sleep_until(deadline.into()) => Err(FailoverError::RequestTimeout),
                    value = fut => Ok(value),
                }
            }
            None => {
                tokio::select! {
                    _ = self.token.cancelled() => Err(FailoverError::Cancelled),
                    value = fut => Ok(value),
                }
            }
        }
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fresh_context_is_live() {
        let ctx = CallContext::new();
        assert!(ctx.error().is_none());
        assert!(!ctx.is_done());
    }

    #[tokio::test]
    async fn test_cancel_short_circuits_sleep() {
        let ctx = CallContext::new();
        ctx.cancel();
        assert_eq!(ctx.error(), Some(FailoverError::Cancelled));
        assert_eq!(
            ctx.sleep(Duration::from_secs(10)).await,
            Err(FailoverError::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_deadline_expires() {
        let ctx = CallContext::with_timeout(Duration::from_millis(20));
        assert!(ctx.error().is_none());
        assert_eq!(
            ctx.sleep(Duration::from_secs(5)).await,
            Err(FailoverError::RequestTimeout)
        );
        assert_eq!(ctx.error(), Some(FailoverError::RequestTimeout));
    }

    #[tokio::test]
    async fn test_sleep_completes_before_deadline() {
        let ctx = CallContext::with_timeout(Duration::from_secs(5));
        assert!(ctx.sleep(Duration::from_millis(5)).await.is_ok());
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let ctx = CallContext::with_timeout(Duration::from_millis(10));
        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                42
            })
            .await;
        assert_eq!(result, Err(FailoverError::RequestTimeout));
    }

    #[tokio::test]
    async fn test_run_passes_value_through() {
        let ctx = CallContext::new();
        assert_eq!(ctx.run(async { 7 }).await, Ok(7));
    }

    #[tokio::test]
    async fn test_cancel_propagates_to_clones() {
        let ctx = CallContext::new();
        let clone = ctx.clone();
        ctx.cancel();
        assert!(clone.is_done());
    }
}
