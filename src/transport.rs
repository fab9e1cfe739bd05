//! Cookie-carrying HTTP transport with retry on rate limiting.
//!
//! All requests share one cookie jar, so cookies set by any hop of the SSO
//! handshake are replayed on later calls. A `429 Too Many Requests` is retried
//! with exponential backoff; every other status is handed back to the caller.
//!
//! reqwest drops the `Location` fragment when it follows a redirect, so
//! [`Transport::follow_redirects`] walks the chain itself with a second client
//! that never follows redirects.

use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, LOCATION, RETRY_AFTER};
use reqwest::{Client, Request, StatusCode};
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;
use crate::constants::LIKER_USER_AGENT;
use crate::error::LikerError;

/// Longest wait honoured from a `Retry-After` header.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Redirect hops followed before giving up.
pub const MAX_REDIRECTS: usize = 10;

/// A fully read response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

/// HTTP client owning the session's cookie jar.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    /// Shares the jar with `client` but hands 3xx responses back untouched.
    manual_client: Client,
    jar: Arc<Jar>,
    max_attempts: u32,
    base_delay: Duration,
}

impl Transport {
    /// Build a transport from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new(config: &Config) -> Result<Self, LikerError> {
        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .timeout(config.http_timeout)
            .user_agent(LIKER_USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .cookie_provider(Arc::clone(&jar))
            .build()?;
        let manual_client = Client::builder()
            .timeout(config.http_timeout)
            .user_agent(LIKER_USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .cookie_provider(Arc::clone(&jar))
            .build()?;

        Ok(Self {
            client,
            manual_client,
            jar,
            max_attempts: config.retry_max_attempts.max(1),
            base_delay: config.retry_base_delay,
        })
    }

    /// Store a `Set-Cookie` style string as if `url` had sent it.
    pub fn add_cookie(&self, cookie: &str, url: &Url) {
        self.jar.add_cookie_str(cookie, url);
    }

    /// GET `url`.
    ///
    /// # Errors
    ///
    /// Returns [`LikerError::Transport`] on network failure.
    pub async fn get(&self, url: &str) -> Result<RawResponse, LikerError> {
        let request = self.client.get(url).build()?;
        self.execute(&self.client, request).await
    }

    /// GET `url`, following redirects hop by hop, and return the last URL
    /// reached with its fragment intact.
    ///
    /// A `Location` without a fragment inherits the previous hop's fragment.
    /// Cookies set along the way land in the shared jar.
    ///
    /// # Errors
    ///
    /// Returns [`LikerError::Transport`] on network failure, or
    /// [`LikerError::TooManyRedirects`] after [`MAX_REDIRECTS`] hops.
    pub async fn follow_redirects(&self, url: &str) -> Result<Url, LikerError> {
        let mut current =
            Url::parse(url).map_err(|e| LikerError::Parse(format!("invalid URL {url}: {e}")))?;

        for _ in 0..=MAX_REDIRECTS {
            let request = self.manual_client.get(current.clone()).build()?;
            let response = self.execute(&self.manual_client, request).await?;

            let location = if response.status.is_redirection() {
                response.headers.get(LOCATION).and_then(|v| v.to_str().ok())
            } else {
                None
            };
            let Some(location) = location else {
                return Ok(current);
            };

            let mut next = current.join(location).map_err(|e| {
                LikerError::Parse(format!("invalid redirect location {location}: {e}"))
            })?;
            if next.fragment().is_none() {
                next.set_fragment(current.fragment());
            }
            debug!(from = %current, to = %next, "Following redirect");
            current = next;
        }

        Err(LikerError::TooManyRedirects(url.to_string()))
    }

    /// POST a JSON body to `url` with extra headers.
    ///
    /// # Errors
    ///
    /// Returns [`LikerError::Transport`] on network failure.
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
        headers: &[(&str, &str)],
    ) -> Result<RawResponse, LikerError> {
        let mut builder = self.client.post(url).json(body);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.execute(&self.client, builder.build()?).await
    }

    async fn execute(
        &self,
        client: &Client,
        request: Request,
    ) -> Result<RawResponse, LikerError> {
        let mut attempt = 1u32;

        loop {
            // Streaming bodies cannot be replayed; send them once.
            let Some(current) = request.try_clone() else {
                let response = client.execute(request).await?;
                return read_response(response).await;
            };

            debug!(method = %current.method(), url = %current.url(), attempt, "Sending request");
            let response = client.execute(current).await?;

            if response.status() != StatusCode::TOO_MANY_REQUESTS || attempt >= self.max_attempts {
                return read_response(response).await;
            }

            let delay = retry_after(response.headers())
                .unwrap_or_else(|| backoff_delay(self.base_delay, attempt));
            warn!(
                url = %request.url(),
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Rate limited, backing off"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}

async fn read_response(response: reqwest::Response) -> Result<RawResponse, LikerError> {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.text().await?;
    Ok(RawResponse {
        status,
        headers,
        body,
    })
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt - 1)`.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(|secs| Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_backoff_doubles() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 4), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_saturates() {
        let delay = backoff_delay(Duration::from_secs(1), 200);
        assert!(delay >= Duration::from_secs(1));
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(3)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("3600"));
        assert_eq!(retry_after(&headers), Some(MAX_RETRY_AFTER));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after(&headers), None);
    }
}
