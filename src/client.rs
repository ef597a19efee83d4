//! HTTP fetcher with rate limiting and retry.
//!
//! Exchange endpoints throttle aggressively; this client paces requests with
//! a token bucket and honors Retry-After on 429 before falling back to
//! exponential backoff.

use crate::constants;
use crate::fetch::Fetcher;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

// ============================================================================
// HTTP Fetcher
// ============================================================================

pub struct HttpFetcher {
    client: reqwest::Client,
    rate_limiter: RateLimiter,
    last_retry_after: std::sync::Arc<tokio::sync::Mutex<Option<Duration>>>,
}

impl HttpFetcher {
    pub fn new(requests_per_minute: usize) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(constants::HTTP_TIMEOUT_SECS))
                .build()?,
            rate_limiter: RateLimiter::new(requests_per_minute, Duration::from_secs(60)),
            last_retry_after: std::sync::Arc::new(tokio::sync::Mutex::new(None)),
        })
    }

    async fn fetch_with_retry(&self, url: &str, max_retries: usize) -> Result<Vec<u8>> {
        let mut backoff = Duration::from_secs(1);
        let mut last_err = None;

        for attempt in 1..=max_retries {
            self.rate_limiter.wait().await;

            // Stale retry-after from an earlier attempt must not leak in
            *self.last_retry_after.lock().await = None;

            match self.do_fetch(url).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    last_err = Some(e);

                    // A 429 left its requested delay behind; honor it
                    let retry_after = self.last_retry_after.lock().await.take();
                    if let Some(retry_after) = retry_after {
                        log::warn!(
                            "rate limited by remote, waiting {:?} before retry {}/{}",
                            retry_after,
                            attempt,
                            max_retries
                        );
                        tokio::time::sleep(retry_after).await;
                        continue;
                    }

                    // Anything else backs off exponentially
                    if attempt < max_retries {
                        log::warn!(
                            "request failed (attempt {}/{}): {}, retrying in {:?}",
                            attempt,
                            max_retries,
                            last_err.as_ref().unwrap(),
                            backoff
                        );
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }

        anyhow::bail!(
            "fetch failed after {} attempts: {}",
            max_retries,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )
    }

    async fn do_fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", constants::user_agent())
            .send()
            .await?;

        // Record the requested delay for the retry loop before failing
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(&response);
            *self.last_retry_after.lock().await = Some(retry_after);
            anyhow::bail!("Rate limited (429)");
        }

        if !response.status().is_success() {
            anyhow::bail!("request failed: {} for {}", response.status(), url);
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.fetch_with_retry(url, constants::HTTP_MAX_RETRIES).await
    }
}

/// How long a 429 asks us to back off. The header is either an integer
/// second count or an RFC 7231 HTTP date; absent or unparseable means a
/// conservative 5 minutes.
fn parse_retry_after(response: &reqwest::Response) -> Duration {
    let header = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok());

    if let Some(value) = header {
        if let Ok(seconds) = value.parse::<u64>() {
            return Duration::from_secs(seconds);
        }
        if let Ok(http_time) = httpdate::parse_http_date(value) {
            if let Ok(duration) = http_time.duration_since(std::time::SystemTime::now()) {
                return duration;
            }
        }
    }

    Duration::from_secs(300)
}

// Token bucket: the semaphore starts empty and a background task drips one
// permit per interval, so requests are evenly spaced from the first one on
// and bursts never exceed the per-minute budget.
struct RateLimiter {
    semaphore: std::sync::Arc<tokio::sync::Semaphore>,
}

impl RateLimiter {
    fn new(requests_per_period: usize, period: Duration) -> Self {
        let semaphore = std::sync::Arc::new(tokio::sync::Semaphore::new(0));
        let sem_clone = semaphore.clone();

        let refill_interval = period / requests_per_period.max(1) as u32;

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(refill_interval).await;
                // Cap unclaimed permits at one period's worth
                if sem_clone.available_permits() < requests_per_period {
                    sem_clone.add_permits(1);
                }
            }
        });

        Self { semaphore }
    }

    async fn wait(&self) {
        // Tokens are consumed, not released back on drop
        if let Ok(permit) = self.semaphore.acquire().await {
            permit.forget();
        }
    }
}
