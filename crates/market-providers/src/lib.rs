//! HTTP fetchers for the upstream market-data providers.
//!
//! Each client wraps one provider, answers the queries that provider supports
//! through [`market_core::Fetcher`], and reports every failure inside a
//! [`market_core::FetchResult`].

mod http;

pub mod alpha_vantage;
pub mod finnhub;
pub mod polygon;

pub use alpha_vantage::AlphaVantageClient;
pub use finnhub::FinnhubClient;
pub use polygon::PolygonClient;

use std::fmt;
use std::time::Duration;

/// Connection settings for one provider.
#[derive(Clone)]
pub struct ProviderSettings {
    /// Missing or blank key means the provider is skipped
    pub api_key: Option<String>,
    /// Override for tests and proxies; the provider's public endpoint otherwise
    pub base_url: Option<String>,
    pub timeout: Duration,
    pub rate_limit_per_minute: usize,
}

impl ProviderSettings {
    pub fn new(api_key: Option<String>, timeout: Duration, rate_limit_per_minute: usize) -> Self {
        Self {
            api_key,
            base_url: None,
            timeout,
            rate_limit_per_minute,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn has_key(&self) -> bool {
        self.api_key
            .as_deref()
            .map(|k| !k.trim().is_empty())
            .unwrap_or(false)
    }
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_key_is_not_configured() {
        let settings = ProviderSettings::new(Some("  ".to_string()), Duration::from_secs(5), 60);
        assert!(!settings.has_key());
        assert!(ProviderSettings::new(Some("abc".to_string()), Duration::from_secs(5), 60).has_key());
        assert!(!ProviderSettings::new(None, Duration::from_secs(5), 60).has_key());
    }

    #[test]
    fn test_debug_redacts_key() {
        let settings = ProviderSettings::new(Some("secret-key".to_string()), Duration::from_secs(3), 5);
        let printed = format!("{:?}", settings);
        assert!(!printed.contains("secret-key"));
        assert!(printed.contains("<redacted>"));
    }
}
