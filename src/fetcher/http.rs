//! HTTP content client
//!
//! Implements [`ContentClient`] and [`ItemDownloader`] against the media API:
//! - Bearer authorization from a [`TokenProvider`]
//! - Status classification into [`FetcherError`]
//! - Optional interval budget for track downloads
//! - Streaming downloads through a `.part` file, fsynced and renamed on completion
//!
//! This client never retries. Wrap it in [`crate::fetcher::retry::Retrying`] for that.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::downloader::config::DEFAULT_PAGE_SIZE;
use crate::downloader::rate_limit::{BudgetLimiter, RateLimitError};
use crate::fetcher::{ContentClient, FetcherError, FetcherResult, ItemDownloader, Page, RawItem};
use crate::identifier::GroupRef;
use crate::metrics::HttpRequestMetrics;
use crate::Item;

/// Supplies the bearer token for API requests
///
/// Refreshing an expired token is the provider's business; the client only
/// reports [`FetcherError::AuthorizationExpired`] when the API rejects one.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current access token
    async fn token(&self) -> FetcherResult<String>;
}

/// Fixed token, e.g. from the command line
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    /// Wrap a token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(***)")
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> FetcherResult<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageResponse {
    total_number_of_items: usize,
    #[serde(default)]
    items: Vec<RawItem>,
}

/// Map an unsuccessful HTTP status onto the fetcher error taxonomy
pub fn classify_status(status: StatusCode, body: &str) -> FetcherError {
    match status {
        StatusCode::UNAUTHORIZED => FetcherError::AuthorizationExpired,
        StatusCode::TOO_MANY_REQUESTS => FetcherError::RateLimitExceeded,
        s if s.is_server_error() => FetcherError::ServerError(s.as_u16()),
        s => FetcherError::ClientError(s.as_u16(), body.chars().take(200).collect()),
    }
}

async fn check_status(response: Response) -> FetcherResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(classify_status(status, &body))
}

/// Sibling path a download is streamed to before the final rename
pub fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// HTTP implementation of both content collaborators
pub struct ApiHttpClient {
    client: Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
    country_code: String,
    page_size: usize,
    download_budget: Option<Arc<BudgetLimiter>>,
}

impl ApiHttpClient {
    /// Create new HTTP client
    ///
    /// # Arguments
    /// * `client` - Shared HTTP client
    /// * `base_url` - API root, without trailing slash (e.g., "<https://api.example.com/v1>")
    /// * `tokens` - Bearer token source
    /// * `country_code` - Catalog region sent with every request
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
        country_code: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
            country_code: country_code.into(),
            page_size: DEFAULT_PAGE_SIZE,
            download_budget: None,
        }
    }

    /// Set the number of entries requested per page
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Charge one budget unit per track download against `limiter`
    pub fn with_download_budget(mut self, limiter: Arc<BudgetLimiter>) -> Self {
        self.download_budget = Some(limiter);
        self
    }

    /// Entries requested per page
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn page_url(&self, group: &GroupRef) -> String {
        format!(
            "{}/{}/{}/items",
            self.base_url,
            group.kind().endpoint_segment(),
            group.id()
        )
    }

    fn stream_url(&self, item: &Item) -> String {
        format!("{}/tracks/{}/stream", self.base_url, item.id)
    }

    async fn send(
        &self,
        cancel: &CancellationToken,
        endpoint: &'static str,
        request: reqwest::RequestBuilder,
    ) -> FetcherResult<Response> {
        let metrics = HttpRequestMetrics::start(endpoint);

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetcherError::Cancelled),
            sent = request.send() => sent,
        };

        match sent {
            Ok(response) => {
                metrics.record_complete(response.status().as_u16());
                check_status(response).await
            }
            Err(e) => {
                metrics.record_network_error();
                Err(FetcherError::NetworkError(e.to_string()))
            }
        }
    }

    async fn open_stream(&self, cancel: &CancellationToken, item: &Item) -> FetcherResult<Response> {
        let token = self.tokens.token().await?;
        let request = self
            .client
            .get(self.stream_url(item))
            .bearer_auth(token)
            .query(&[("countryCode", self.country_code.as_str())]);

        match &self.download_budget {
            Some(limiter) => limiter
                .submit(cancel, 1, || self.send(cancel, "stream", request))
                .await
                .map_err(|e| match e {
                    RateLimitError::Cancelled => FetcherError::Cancelled,
                    other => FetcherError::ApiError(other.to_string()),
                })?,
            None => self.send(cancel, "stream", request).await,
        }
    }
}

#[async_trait]
impl ContentClient for ApiHttpClient {
    async fn fetch_page(
        &self,
        cancel: &CancellationToken,
        group: &GroupRef,
        page_index: usize,
    ) -> FetcherResult<Page> {
        let token = self.tokens.token().await?;
        let offset = page_index * self.page_size;
        let request = self
            .client
            .get(self.page_url(group))
            .bearer_auth(token)
            .query(&[
                ("offset", offset.to_string()),
                ("limit", self.page_size.to_string()),
                ("countryCode", self.country_code.clone()),
            ]);

        debug!(group = %group, offset, limit = self.page_size, "Requesting page");
        let response = self.send(cancel, "page", request).await?;

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetcherError::Cancelled),
            body = response.json::<PageResponse>() => body,
        }
        .map_err(|e| FetcherError::ParseError(format!("Failed to deserialize page: {e}")))?;

        Ok(Page {
            items: body.items,
            declared_total: body.total_number_of_items,
        })
    }
}

#[async_trait]
impl ItemDownloader for ApiHttpClient {
    async fn download_item(
        &self,
        cancel: &CancellationToken,
        item: &Item,
        destination: &Path,
    ) -> FetcherResult<()> {
        let response = self.open_stream(cancel, item).await?;
        let part = part_path(destination);

        if let Err(e) = stream_to_file(cancel, response, &part).await {
            if let Err(cleanup) = tokio::fs::remove_file(&part).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %part.display(), error = %cleanup, "Failed to remove partial download");
                }
            }
            return Err(e);
        }

        tokio::fs::rename(&part, destination).await?;
        debug!(item_id = %item.id, path = %destination.display(), "Track written");
        Ok(())
    }
}

/// Write the response body to `path`, observing `cancel` between chunks
///
/// A chunk that has started writing is always written completely.
async fn stream_to_file(
    cancel: &CancellationToken,
    response: Response,
    path: &Path,
) -> FetcherResult<()> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut body = Box::pin(response.bytes_stream());

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetcherError::Cancelled),
            next = body.next() => next,
        };

        match next {
            Some(Ok(chunk)) => file.write_all(&chunk).await?,
            Some(Err(e)) => return Err(FetcherError::NetworkError(e.to_string())),
            None => break,
        }
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}
