//! HTTP fetching with retry, backoff and politeness delays.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::HarvestConfig;
use crate::error::{HarvesterError, Result};
use crate::types::RawPage;

/// User agent string identifying this harvester.
const USER_AGENT: &str = concat!("leginfo-harvester/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects followed per request.
const MAX_REDIRECTS: usize = 5;

/// Anything that can turn a URL into a raw page.
///
/// Implementations classify failures into the transient/permanent
/// taxonomy themselves; callers never retry.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<RawPage>;
}

/// Retry settings for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based), jitter included.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let jitter_ms = rand::thread_rng().gen_range(0..=base_ms / 2);
        backoff_delay(self.base_delay, retry, Duration::from_millis(jitter_ms))
    }
}

/// Exponential backoff: `base * 2^(retry - 1) + jitter`.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use leginfo_harvester::http::backoff_delay;
///
/// let base = Duration::from_millis(500);
/// assert_eq!(backoff_delay(base, 1, Duration::ZERO), Duration::from_millis(500));
/// assert_eq!(backoff_delay(base, 3, Duration::from_millis(7)), Duration::from_millis(2007));
/// ```
#[must_use]
pub fn backoff_delay(base: Duration, retry: u32, jitter: Duration) -> Duration {
    let exponent = retry.saturating_sub(1).min(16);
    base.saturating_mul(1 << exponent).saturating_add(jitter)
}

/// Randomized pause inserted after each successful bill page fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Politeness {
    pub min: Duration,
    pub max: Duration,
}

impl Politeness {
    /// No delay at all.
    pub const NONE: Self = Self {
        min: Duration::ZERO,
        max: Duration::ZERO,
    };

    /// Uniform sample from `[min, max]`.
    #[must_use]
    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let min_ms = u64::try_from(self.min.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
    }

    /// Sleep for a sampled delay, returning early if `cancel` fires.
    ///
    /// Only the calling task waits; other tasks keep running.
    pub async fn pause(&self, cancel: &CancellationToken) {
        let delay = self.sample();
        if delay.is_zero() {
            return;
        }
        tokio::select! {
            () = cancel.cancelled() => {}
            () = tokio::time::sleep(delay) => {}
        }
    }
}

/// Fetch a bill page, then wait out the politeness delay.
///
/// The delay only follows a successful fetch.
pub async fn fetch_bill_page<S: PageSource + ?Sized>(
    source: &S,
    url: &str,
    politeness: Politeness,
    cancel: &CancellationToken,
) -> Result<RawPage> {
    let page = source.fetch(url).await?;
    politeness.pause(cancel).await;
    Ok(page)
}

/// Create a configured HTTP client.
pub fn create_client(timeout: Duration) -> Result<Client> {
    let client = Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .build()?;
    Ok(client)
}

/// Production [`PageSource`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        Ok(Self {
            client: create_client(timeout)?,
            retry,
            cancel: CancellationToken::new(),
        })
    }

    /// Abandon retry backoff with `Cancelled` once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn from_config(config: &HarvestConfig) -> Result<Self> {
        Self::new(
            config.timeout,
            RetryPolicy {
                max_retries: config.max_retries,
                base_delay: config.retry_base_delay,
            },
        )
    }
}

#[async_trait]
impl PageSource for HttpFetcher {
    /// GET `url`, retrying timeouts, connection errors and 5xx responses.
    ///
    /// Any status other than 200 below 500 fails immediately, as do
    /// malformed URLs.
    async fn fetch(&self, url: &str) -> Result<RawPage> {
        let parsed = Url::parse(url).map_err(|e| HarvesterError::PermanentFetch {
            url: url.to_string(),
            status: None,
            message: format!("malformed URL: {e}"),
        })?;

        let attempts = self.retry.max_retries.saturating_add(1);
        let mut last_error: Option<String> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.retry.delay_for(attempt);
                tracing::debug!(
                    url,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Retrying after delay"
                );
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => {
                        tracing::debug!(url, attempt, "Retry abandoned, run cancelled");
                        return Err(HarvesterError::Cancelled {
                            url: url.to_string(),
                        });
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }

            let response = match self.client.get(parsed.clone()).send().await {
                Ok(response) => response,
                Err(e) if e.is_builder() || e.is_redirect() => {
                    return Err(HarvesterError::PermanentFetch {
                        url: url.to_string(),
                        status: None,
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        url,
                        error = %e,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        "Request error, will retry"
                    );
                    last_error = Some(e.to_string());
                    continue;
                }
            };

            let status = response.status();
            if status.is_server_error() {
                tracing::warn!(
                    url,
                    status = %status,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    "Server error, will retry"
                );
                last_error = Some(format!("Server error: {status}"));
                continue;
            }
            if status != StatusCode::OK {
                return Err(HarvesterError::PermanentFetch {
                    url: url.to_string(),
                    status: Some(status.as_u16()),
                    message: status
                        .canonical_reason()
                        .unwrap_or("unexpected status")
                        .to_string(),
                });
            }

            match response.text().await {
                Ok(body) => {
                    return Ok(RawPage {
                        url: url.to_string(),
                        status: status.as_u16(),
                        body,
                    });
                }
                // Connection dropped while streaming the body
                Err(e) => {
                    tracing::warn!(url, error = %e, attempt = attempt + 1, "Body read failed, will retry");
                    last_error = Some(e.to_string());
                }
            }
        }

        Err(HarvesterError::TransientNetwork {
            url: url.to_string(),
            attempts,
            message: last_error.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}
