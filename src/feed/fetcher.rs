use std::fmt;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::config::FetchConfig;
use crate::error::{AppError, Result};

use super::retry::RetryPolicy;

const USER_AGENT_STRING: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/69.0.3497.100 Safari/537.36";

/// Where the raw bytes of a feed come from.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetches the document at `url`, sending `cookies` verbatim as the
    /// `Cookie` header when given.
    async fn fetch(&self, url: &str, cookies: Option<&str>) -> Result<Vec<u8>>;
}

/// HTTP feed source with a per-request timeout and retries on network errors.
pub struct FeedFetcher {
    client: Client,
    retry: RetryPolicy,
}

impl FeedFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(USER_AGENT_STRING)
            .build()?;

        Ok(Self {
            client,
            retry: config.retry_policy(),
        })
    }

    async fn fetch_once(
        &self,
        url: &str,
        headers: HeaderMap,
    ) -> std::result::Result<Vec<u8>, AttemptError> {
        let response = self
            .client
            .get(url)
            .headers(headers)
            .send()
            .await
            .map_err(AttemptError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::Status(status));
        }

        let bytes = response.bytes().await.map_err(AttemptError::Transport)?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl FeedSource for FeedFetcher {
    async fn fetch(&self, url: &str, cookies: Option<&str>) -> Result<Vec<u8>> {
        let mut headers = HeaderMap::new();
        if let Some(cookies) = cookies {
            let value = HeaderValue::from_str(cookies)
                .map_err(|e| AppError::Fetch(format!("invalid cookie header: {}", e)))?;
            headers.insert(COOKIE, value);
        }

        let result = self
            .retry
            .run(
                |attempt| {
                    let headers = headers.clone();
                    async move {
                        debug!("GET {} (attempt {})", url, attempt);
                        self.fetch_once(url, headers).await
                    }
                },
                AttemptError::is_transient,
            )
            .await;

        match result {
            Ok(bytes) => Ok(bytes),
            Err(AttemptError::Status(status)) => {
                Err(AppError::Fetch(format!("{} answered HTTP {}", url, status)))
            }
            Err(e) => {
                warn!(
                    "Giving up on {} (up to {} attempts): {}",
                    url,
                    self.retry.max_attempts(),
                    e
                );
                Err(AppError::Fetch(e.to_string()))
            }
        }
    }
}

#[derive(Debug)]
enum AttemptError {
    Transport(reqwest::Error),
    Status(StatusCode),
}

impl AttemptError {
    /// Network-level failures worth another try. HTTP statuses never are.
    fn is_transient(&self) -> bool {
        match self {
            AttemptError::Transport(e) => {
                e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
            }
            AttemptError::Status(_) => false,
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Transport(e) => write!(f, "{}", e),
            AttemptError::Status(status) => write!(f, "HTTP {}", status),
        }
    }
}
