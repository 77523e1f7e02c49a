//! Core agent traits and error types.

use thiserror::Error;

use crate::agent::TransportError;
use crate::model::WireItem;
use crate::retry::RetryError;
use crate::storage::StorageError;

/// Errors that can occur in the agent pipeline.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A single send failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A batch could not be delivered, even after retrying.
    #[error(transparent)]
    Delivery(RetryError<TransportError>),

    /// The local store rejected sampled metrics.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The run was cancelled while waiting.
    #[error("operation cancelled")]
    Cancelled,

    /// A sampler failed to read its source.
    #[error("sampler error: {0}")]
    Sampler(String),
}

impl From<RetryError<TransportError>> for AgentError {
    fn from(err: RetryError<TransportError>) -> Self {
        match err {
            RetryError::Cancelled => Self::Cancelled,
            other => Self::Delivery(other),
        }
    }
}

impl AgentError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A periodic producer of metric samples.
///
/// Each sampler runs in its own task on every poll tick, so a slow sampler
/// never delays another.
#[async_trait::async_trait]
pub trait Sampler: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Read the source once.
    async fn sample(&self) -> Result<Vec<WireItem>, AgentError>;
}
