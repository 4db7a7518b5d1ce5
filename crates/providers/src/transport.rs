//! Byte transport between the client and a provider endpoint.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use switchboard_core::TransportError;
use tracing::{debug, warn};

use crate::adapter::WireRequest;

/// Raw response body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, TransportError>> + Send>>;

/// Opens a streaming request. One call to `open` is one HTTP request.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, request: WireRequest) -> Result<ByteStream, TransportError>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            // Idle reads only; a long generation may legitimately stream for minutes
            .read_timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| TransportError::Connect(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Use a preconfigured client (proxies, custom roots).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, request: WireRequest) -> Result<ByteStream, TransportError> {
        let mut builder = self.client.post(&request.url).json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(Duration::from_secs(30))
            } else {
                TransportError::Connect(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if status != 200 {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body = response.text().await.unwrap_or_default();
            warn!(status, body = %body, "Provider returned error");
            return Err(classify_status(status, retry_after, body));
        }

        debug!(url = %request.url, "Stream opened");
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(|e| TransportError::Interrupted(e.to_string())));
        Ok(Box::pin(stream))
    }
}

/// Map a non-200 status to a transport error.
pub fn classify_status(status: u16, retry_after: Option<Duration>, body: String) -> TransportError {
    match status {
        429 => TransportError::RateLimited { retry_after },
        401 | 403 => TransportError::Authentication(if body.is_empty() {
            "Invalid API key or insufficient permissions".into()
        } else {
            body
        }),
        _ => TransportError::Status { status, body },
    }
}

/// `Retry-After` in delta-seconds. HTTP-date values are ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
