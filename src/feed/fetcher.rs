use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

use super::document::{ParseFailure, ParsedFeed};
use super::parser::parse_document;
use crate::util::{UrlPolicy, UrlValidationError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while retrieving and parsing a feed document.
///
/// Every variant is terminal for the current call: nothing is retried, and the
/// caller decides whether to try again later.
#[derive(Debug, Error)]
pub enum FetchError {
    /// URL rejected before any request was made
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Response body exceeded the size limit
    #[error("Response too large (limit {0} bytes)")]
    ResponseTooLarge(usize),
    /// Received fewer bytes than Content-Length announced
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Document was invalid and yielded no entries
    #[error(transparent)]
    Parse(#[from] ParseFailure),
}

/// Knobs for [`FeedFetcher`], usually filled from [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub timeout: Duration,
    pub max_bytes: usize,
    pub url_policy: UrlPolicy,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_bytes: DEFAULT_MAX_FEED_SIZE,
            url_policy: UrlPolicy::default(),
            user_agent: concat!("feedvault/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Retrieves feed documents over HTTP.
///
/// Cheap to clone: the inner `reqwest::Client` is reference counted.
#[derive(Debug, Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    settings: FetchSettings,
}

impl FeedFetcher {
    /// Builds a fetcher with its own HTTP client.
    pub fn new(settings: FetchSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .build()?;
        Ok(Self { client, settings })
    }

    /// Builds a fetcher around an existing client (shared connection pool).
    pub fn with_client(client: reqwest::Client, settings: FetchSettings) -> Self {
        Self { client, settings }
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Fetches `url` and parses it into a [`ParsedFeed`].
    ///
    /// # Errors
    ///
    /// - [`FetchError::InvalidUrl`] - scheme or host rejected by the URL policy
    /// - [`FetchError::Network`] / [`FetchError::Timeout`] - transport failures
    /// - [`FetchError::HttpStatus`] - non-2xx response
    /// - [`FetchError::ResponseTooLarge`] / [`FetchError::IncompleteResponse`] - body problems
    /// - [`FetchError::Parse`] - invalid document with no recoverable entries
    pub async fn fetch_document(&self, url: &str) -> Result<ParsedFeed, FetchError> {
        let bytes = self.fetch_bytes(url).await?;
        let parsed = parse_document(&bytes)?;

        if parsed.is_degraded() {
            tracing::warn!(
                url = %url,
                entries = parsed.document.entries.len(),
                warnings = ?parsed.warnings,
                "Feed is malformed, using recovered entries"
            );
        }

        Ok(parsed)
    }

    /// Fetches the raw body of `url`, enforcing the timeout and size limit.
    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let url = self.settings.url_policy.check(url)?;
        let timeout = self.settings.timeout;

        tokio::time::timeout(timeout, self.request(url))
            .await
            .map_err(|_| FetchError::Timeout(timeout))?
    }

    async fn request(&self, url: url::Url) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url.clone()).send().await?;

        if !response.status().is_success() {
            tracing::debug!(url = %url, status = %response.status(), "Feed request failed");
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        read_limited_bytes(response, self.settings.max_bytes).await
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
