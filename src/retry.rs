//! Resilient retry for transient failures.
//!
//! Shared by the agent's batch delivery and the collector's durable writes.
//! Errors opt in to retrying by implementing [`Classify`] at the boundary where
//! they are produced (database driver, HTTP client), so this module never
//! inspects a concrete driver error type.
//!
//! The default schedule is: attempt, wait 1s, attempt, wait 3s, attempt,
//! wait 5s, attempt. Permanent errors return after the first failing attempt.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Delays between attempts for the default policy.
pub const DEFAULT_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(5),
];

/// Whether an error is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connectivity loss, busy backend, unexpected disconnect.
    Transient,
    /// Everything else.
    Permanent,
}

/// Error kind tag attached by the layer that produced the error.
pub trait Classify {
    fn class(&self) -> ErrorClass;

    fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Outcome of a failed [`retry`] call.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The cancellation token fired while waiting between attempts.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation failed with a non-retriable error.
    #[error("{0}")]
    Permanent(E),

    /// Every attempt failed with a transient error.
    #[error("operation failed after retries: {last}")]
    Exhausted { attempts: usize, last: E },
}

impl<E> RetryError<E> {
    /// The last error reported by the operation, if any.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::Cancelled => None,
            Self::Permanent(e) | Self::Exhausted { last: e, .. } => Some(e),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Fixed delay schedule between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: DEFAULT_RETRY_DELAYS.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with custom delays. The operation is attempted
    /// `delays.len() + 1` times.
    pub fn with_delays(delays: impl Into<Vec<Duration>>) -> Self {
        Self {
            delays: delays.into(),
        }
    }

    /// A policy that attempts exactly once.
    pub fn no_retry() -> Self {
        Self { delays: Vec::new() }
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Maximum number of attempts.
    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }

    /// Run `operation` until it succeeds, fails permanently, runs out of
    /// attempts, or `cancel` fires during a wait.
    pub async fn run<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !err.is_transient() {
                tracing::debug!(attempt, error = %err, "Non-retriable error, giving up");
                return Err(RetryError::Permanent(err));
            }

            let Some(delay) = self.delays.get(attempt - 1).copied() else {
                tracing::error!(attempts = attempt, error = %err, "Retries exhausted");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            };

            tracing::warn!(attempt, delay = ?delay, error = %err, "Retriable error, retrying");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Run `operation` with the default 1s/3s/5s schedule.
pub async fn retry<T, E, F, Fut>(
    cancel: &CancellationToken,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + fmt::Display,
{
    RetryPolicy::default().run(cancel, operation).await
}
