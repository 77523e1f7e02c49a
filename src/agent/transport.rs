//! Network delivery of wire items to the collector.

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use reqwest::Client;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use thiserror::Error;

use crate::model::WireItem;
use crate::retry::{Classify, ErrorClass};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors produced while delivering metrics.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("compression error: {0}")]
    Compress(#[from] std::io::Error),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The collector answered with a non-success status.
    #[error("server responded with status {0}")]
    Status(u16),
}

impl Classify for TransportError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Request(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                ErrorClass::Transient
            }
            Self::Status(429 | 502 | 503 | 504) => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        }
    }
}

/// Delivery channel to the collector.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send one item.
    async fn send_item(&self, item: &WireItem) -> Result<(), TransportError>;

    /// Send a batch of at most [`MAX_BATCH_SIZE`](crate::model::MAX_BATCH_SIZE) items.
    async fn send_batch(&self, items: &[WireItem]) -> Result<(), TransportError>;
}

/// Prefix `http://` when the address has no scheme and drop trailing slashes
/// after the authority.
pub fn normalize_server_url(address: &str) -> String {
    let address = address.trim();
    match address.split_once("://") {
        Some((scheme, rest)) => format!("{scheme}://{}", rest.trim_end_matches('/')),
        None => format!("http://{}", address.trim_end_matches('/')),
    }
}

/// JSON over HTTP, optionally gzip-compressed.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    compress: bool,
}

impl HttpTransport {
    pub fn new(server: &str, timeout: Duration, compress: bool) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: normalize_server_url(server),
            compress,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json(&self, path: &str, body: Vec<u8>) -> Result<(), TransportError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json");

        let body = if self.compress {
            request = request.header(CONTENT_ENCODING, "gzip");
            gzip(&body)?
        } else {
            body
        };

        let response = request.body(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_item(&self, item: &WireItem) -> Result<(), TransportError> {
        let body = serde_json::to_vec(item)?;
        self.post_json("/update/", body).await
    }

    async fn send_batch(&self, items: &[WireItem]) -> Result<(), TransportError> {
        let body = serde_json::to_vec(items)?;
        self.post_json("/updates/", body).await
    }
}

fn gzip(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}
