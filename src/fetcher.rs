//! HTTP probing of targets.
//!
//! One request per rule per cycle, no retries. Anything other than a 2xx
//! response is an error; its body is never handed to a predicate.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::registry::{Rule, Target};

/// Maximum characters of an error body kept in [`FetchError::Status`].
const MAX_EXCERPT_CHARS: usize = 256;

/// Errors returned by a [`Fetcher`].
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Connection, TLS, timeout, or body read failure.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The endpoint answered with a non-success status.
    #[error("endpoint returned non-success status {status}: {excerpt}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Whitespace-collapsed, truncated response body.
        excerpt: String,
    },
}

/// Retrieves the raw response body for a rule's request.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform the rule's request against the target.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on transport failure or non-2xx status.
    async fn fetch(&self, target: &Target, rule: &Rule) -> Result<Vec<u8>, FetchError>;
}

/// [`Fetcher`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a fetcher with a per-request timeout and a `watchpost/<version>`
    /// user agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("watchpost/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, target: &Target, rule: &Rule) -> Result<Vec<u8>, FetchError> {
        let mut request = self
            .client
            .request(rule.request.method.clone(), rule.request.url.clone());
        if let Some(auth) = &target.auth {
            request = request.basic_auth(&auth.user, auth.password.as_deref());
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        debug!(
            rule = %rule.id,
            url = %rule.request.url,
            status = status.as_u16(),
            bytes = body.len(),
            "fetched"
        );

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                excerpt: excerpt(&body),
            });
        }
        Ok(body.to_vec())
    }
}

fn excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > MAX_EXCERPT_CHARS {
        let shortened: String = collapsed.chars().take(MAX_EXCERPT_CHARS).collect();
        return format!("{shortened}...[truncated]");
    }
    collapsed
}
