use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use reqwest::header::{HeaderMap, CONTENT_RANGE, RANGE};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;

use crate::error_handling::types::TransferError;

/// Where installer payloads come from.
#[async_trait]
pub trait TransferSource: Send + Sync {
    /// Opens `url`, asking for the bytes from `offset` onwards.
    ///
    /// The returned body reports whether the source honoured the offset; if not,
    /// it starts at byte 0.
    async fn open(&self, url: &str, offset: u64) -> Result<Box<dyn TransferBody>, TransferError>;
}

/// An opened payload, read chunk by chunk.
#[async_trait]
pub trait TransferBody: Send {
    /// Size of the whole resource, not just the remaining part.
    fn total_size(&self) -> Option<u64>;

    /// Whether the body starts at the requested offset.
    fn resumed(&self) -> bool;

    /// Next chunk, or `None` at the end of the payload.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransferError>;
}

/// HTTP(S) source backed by `reqwest`, resuming with `Range` requests.
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new(connect_timeout: Duration) -> Result<Self, TransferError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("playhost/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransferError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

fn request_error(err: reqwest::Error) -> TransferError {
    if err.is_timeout() {
        TransferError::Timeout(err.to_string())
    } else {
        TransferError::Network(err.to_string())
    }
}

/// Total length from a `Content-Range: bytes a-b/total` header.
pub(crate) fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_RANGE)?
        .to_str()
        .ok()?
        .rsplit('/')
        .next()?
        .trim()
        .parse()
        .ok()
}

#[async_trait]
impl TransferSource for HttpSource {
    async fn open(&self, url: &str, offset: u64) -> Result<Box<dyn TransferBody>, TransferError> {
        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }
        let response = request.send().await.map_err(request_error)?;
        let status = response.status();
        debug!("GET {} (offset {}) -> {}", url, offset, status);

        match status {
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                return Err(TransferError::NotFound(format!("{} returned {}", url, status)))
            }
            StatusCode::RANGE_NOT_SATISFIABLE if offset > 0 => {
                // Stale partial file; start over.
                return self.open(url, 0).await;
            }
            s if !s.is_success() => {
                return Err(TransferError::Network(format!("{} returned {}", url, status)))
            }
            _ => {}
        }

        let resumed = offset > 0 && status == StatusCode::PARTIAL_CONTENT;
        let total = if resumed {
            content_range_total(response.headers())
                .or_else(|| response.content_length().map(|len| len + offset))
        } else {
            response.content_length()
        };
        Ok(Box::new(HttpBody {
            response,
            total,
            resumed,
        }))
    }
}

struct HttpBody {
    response: Response,
    total: Option<u64>,
    resumed: bool,
}

#[async_trait]
impl TransferBody for HttpBody {
    fn total_size(&self) -> Option<u64> {
        self.total
    }

    fn resumed(&self) -> bool {
        self.resumed
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransferError> {
        self.response.chunk().await.map_err(request_error)
    }
}
