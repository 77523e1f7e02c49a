//! Agent Layer
//!
//! Samples process, runtime and host statistics and delivers them to the
//! collector.
//!
//! # Architecture
//!
//! - [`Sampler`]: periodic producer of metric samples, one task per sampler per tick
//! - [`Poller`] / [`DeliveryQueue`]: applies samples to the local store and queues them
//! - [`RateLimitedSender`]: worker pool streaming queued items under a shared [`RateLimiter`]
//! - [`BatchReporter`]: full-snapshot delivery in batches with retry
//! - [`Agent`]: ticker-driven main loop tying the above together
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use runmetrics::agent::{Agent, AgentOptions, HostSampler, HttpTransport, RuntimeSampler, Sampler};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(HttpTransport::new("localhost:8080", Duration::from_secs(5), true)?);
//! let samplers: Vec<Arc<dyn Sampler>> =
//!     vec![Arc::new(RuntimeSampler::new()), Arc::new(HostSampler::new())];
//! let agent = Agent::new(AgentOptions::default(), samplers, transport);
//! agent.run(CancellationToken::new()).await;
//! # Ok(())
//! # }
//! ```

mod poller;
mod rate_limit;
mod reporter;
mod runner;
pub mod sampler;
mod sender;
mod traits;
mod transport;

pub use poller::{DEFAULT_QUEUE_CAPACITY, DeliveryQueue, Poller};
pub use rate_limit::{MAX_TOKEN_WAIT, RateLimitConfig, RateLimiter};
pub use reporter::BatchReporter;
pub use runner::{Agent, AgentOptions, DeliveryMode, MIN_INTERVAL};
pub use sampler::{HostSampler, RuntimeSampler};
pub use sender::{RateLimitedSender, SenderStats};
pub use traits::{AgentError, Sampler};
pub use transport::{
    DEFAULT_REQUEST_TIMEOUT, HttpTransport, Transport, TransportError, normalize_server_url,
};
