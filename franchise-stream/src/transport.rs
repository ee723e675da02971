//! Byte-stream transport
//!
//! Opens the search server's streaming endpoint for a query and hands back
//! the raw body as a stream of byte chunks. Framing is the decoder's job.

use async_trait::async_trait;
use franchise_common::models::FranchiseQuery;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use thiserror::Error;

/// Path of the streaming search endpoint
pub const STREAM_PATH: &str = "/get-franchise-details-stream";

/// Raw body chunks, in arrival order
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error! Status: {0}")]
    Status(u16),

    #[error("Stream read error: {0}")]
    Read(String),
}

/// Capability that opens a chunked byte stream for a query
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn open(&self, query: &FranchiseQuery) -> Result<ChunkStream, TransportError>;
}

/// HTTP transport: `POST {base}/get-franchise-details-stream`
pub struct HttpStreamTransport {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpStreamTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        // No overall timeout: the body stays open for the whole search
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, STREAM_PATH)
    }
}

#[async_trait]
impl StreamTransport for HttpStreamTransport {
    async fn open(&self, query: &FranchiseQuery) -> Result<ChunkStream, TransportError> {
        let url = self.endpoint();
        tracing::debug!(url = %url, franchise = %query.franchise_name, "Opening location stream");

        let response = self
            .http_client
            .post(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(query)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        tracing::debug!(status = status.as_u16(), "Stream response status");
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        Ok(response
            .bytes_stream()
            .map_ok(|bytes| bytes.to_vec())
            .map_err(|e| TransportError::Read(e.to_string()))
            .boxed())
    }
}
