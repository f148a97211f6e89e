use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, COOKIE, RANGE, REFERER};
use reqwest::StatusCode;
use std::ops::Range;
use strata_core::config::UpstreamSettings;
use strata_core::{IngestError, IngestResult};

/// Byte-range access to an upstream content source.
///
/// Implementations perform exactly one request per call; rate limiting and
/// retries are applied by the caller.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Total size of the resource, or `None` when the upstream does not say.
    async fn content_length(&self, url: &str) -> IngestResult<Option<u64>>;

    /// Bytes in `range` (end exclusive). A shorter body means the resource
    /// ended early; an empty body means `range` starts past its end.
    async fn fetch_range(&self, url: &str, range: Range<u64>) -> IngestResult<Bytes>;
}

/// Fetcher over HTTP(S) using `Range` requests.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(settings: &UpstreamSettings) -> IngestResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            REFERER,
            HeaderValue::from_str(&settings.referer)
                .map_err(|e| IngestError::Config(format!("Invalid referer header: {}", e)))?,
        );
        if let Some(cookie) = &settings.cookie {
            let mut value = HeaderValue::from_str(cookie)
                .map_err(|e| IngestError::Config(format!("Invalid cookie header: {}", e)))?;
            value.set_sensitive(true);
            headers.insert(COOKIE, value);
        }

        let mut builder = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .default_headers(headers)
            .timeout(settings.timeout);

        if let Some(proxy) = &settings.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| IngestError::Config(format!("Invalid proxy {}: {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| IngestError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

fn request_error(url: &str, err: reqwest::Error) -> IngestError {
    if let Some(status) = err.status() {
        return IngestError::Upstream {
            status: status.as_u16(),
            message: format!("{}: {}", url, err),
        };
    }
    // Connection resets, DNS failures, timeouts and truncated bodies
    IngestError::TransientNetwork(format!("{}: {}", url, err))
}

fn status_error(url: &str, status: StatusCode) -> IngestError {
    IngestError::Upstream {
        status: status.as_u16(),
        message: format!(
            "{} returned {}",
            url,
            status.canonical_reason().unwrap_or("unexpected status")
        ),
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn content_length(&self, url: &str) -> IngestResult<Option<u64>> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| request_error(url, e))?;

        let status = response.status();
        if status == StatusCode::METHOD_NOT_ALLOWED || status == StatusCode::NOT_IMPLEMENTED {
            tracing::debug!(url, status = status.as_u16(), "Upstream does not support HEAD");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(status_error(url, status));
        }

        let length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        Ok(length)
    }

    async fn fetch_range(&self, url: &str, range: Range<u64>) -> IngestResult<Bytes> {
        if range.is_empty() {
            return Ok(Bytes::new());
        }

        let response = self
            .client
            .get(url)
            .header(RANGE, format!("bytes={}-{}", range.start, range.end - 1))
            .send()
            .await
            .map_err(|e| request_error(url, e))?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => {
                let body = response.bytes().await.map_err(|e| request_error(url, e))?;
                let wanted = (range.end - range.start) as usize;
                Ok(if body.len() > wanted {
                    body.slice(..wanted)
                } else {
                    body
                })
            }
            StatusCode::OK => {
                // Upstream ignored the range header and sent the whole resource
                let body = response.bytes().await.map_err(|e| request_error(url, e))?;
                let len = body.len() as u64;
                let start = range.start.min(len) as usize;
                let end = range.end.min(len) as usize;
                Ok(body.slice(start..end))
            }
            StatusCode::RANGE_NOT_SATISFIABLE => Ok(Bytes::new()),
            status => Err(status_error(url, status)),
        }
    }
}
