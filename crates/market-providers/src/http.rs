use market_core::{FetchError, Source};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::ProviderSettings;

/// Sliding-window rate limiter: at most `max_requests` per `window` duration.
#[derive(Clone)]
struct RateLimiter {
    timestamps: Arc<Mutex<VecDeque<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            timestamps: Arc::new(Mutex::new(VecDeque::new())),
            max_requests: max_requests.max(1),
            window,
        }
    }

    async fn acquire(&self, source: Source) {
        loop {
            let mut ts = self.timestamps.lock().await;
            let now = Instant::now();

            // Remove timestamps outside the window
            while let Some(&front) = ts.front() {
                if now.duration_since(front) >= self.window {
                    ts.pop_front();
                } else {
                    break;
                }
            }

            let oldest = match ts.front() {
                Some(&oldest) if ts.len() >= self.max_requests => oldest,
                _ => {
                    ts.push_back(now);
                    return;
                }
            };

            // Wait until the oldest request falls out of the window
            let sleep_dur = (oldest + self.window).saturating_duration_since(now)
                + Duration::from_millis(50);
            drop(ts);
            tracing::debug!(
                "Rate limiter: waiting {:.1}s for {} slot",
                sleep_dur.as_secs_f64(),
                source
            );
            tokio::time::sleep(sleep_dur).await;
        }
    }
}

/// Shared request plumbing for one provider: credential, base URL, timeout, rate limit.
#[derive(Clone)]
pub(crate) struct ProviderHttp {
    source: Source,
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
    client: Client,
    rate_limiter: RateLimiter,
}

impl ProviderHttp {
    pub(crate) fn new(source: Source, settings: &ProviderSettings, default_base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        let base_url = settings
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url.to_string());

        Self {
            source,
            api_key: settings
                .api_key
                .clone()
                .filter(|k| !k.trim().is_empty()),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: settings.timeout,
            client,
            rate_limiter: RateLimiter::new(settings.rate_limit_per_minute, Duration::from_secs(60)),
        }
    }

    pub(crate) fn source(&self) -> Source {
        self.source
    }

    pub(crate) fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub(crate) fn api_key(&self) -> Result<&str, FetchError> {
        self.api_key
            .as_deref()
            .ok_or(FetchError::ProviderUnavailable(self.source))
    }

    pub(crate) fn error(&self, message: impl Into<String>) -> FetchError {
        FetchError::provider_error(self.source, message)
    }

    /// GET `path` and decode the JSON body.
    ///
    /// The whole call, including any wait for a rate-limit slot, is bounded by
    /// the provider timeout.
    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let url = format!("{}{}", self.base_url, path);

        match tokio::time::timeout(self.timeout, self.send(&url, query)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::ProviderTimeout {
                provider: self.source,
                timeout: self.timeout,
            }),
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        self.rate_limiter.acquire(self.source).await;

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            tracing::warn!("{} rate limited (HTTP 429)", self.source);
            return Err(self.error("rate limited (HTTP 429)"));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.error(format!("HTTP {}: {}", status, truncate(&body, 200))));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| self.error(format!("malformed payload: {}", e.without_url())))
    }

    fn transport_error(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::ProviderTimeout {
                provider: self.source,
                timeout: self.timeout,
            }
        } else {
            // Strip the URL so the API key in the query string never reaches logs
            self.error(e.without_url().to_string())
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééé", 2), "éé...");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_waits_for_window() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();

        limiter.acquire(Source::Polygon).await;
        limiter.acquire(Source::Polygon).await;
        assert!(start.elapsed() < Duration::from_secs(1));

        limiter.acquire(Source::Polygon).await;
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[test]
    fn test_blank_key_treated_as_missing() {
        let settings = ProviderSettings::new(Some("".to_string()), Duration::from_secs(5), 60);
        let http = ProviderHttp::new(Source::Finnhub, &settings, "https://example.test/");
        assert!(!http.is_configured());
        assert_eq!(
            http.api_key(),
            Err(FetchError::ProviderUnavailable(Source::Finnhub))
        );
        assert_eq!(http.base_url, "https://example.test");
    }
}
