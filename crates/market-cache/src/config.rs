use anyhow::{anyhow, bail, Context, Result};
use chrono::Duration;
use chrono_tz::Tz;
use market_providers::ProviderSettings;
use std::env;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use crate::batch::BatchConfig;
use crate::schedule::RefreshSchedule;

const DEFAULT_WATCHLIST: &str = "AAPL,MSFT,GOOGL,AMZN,NVDA,TSLA,META,AMD,CRM,ADBE,NFLX,PYPL,SHOP,RBLX,\
DASH,ZM,SNOW,CRWD,NET,ABNB,UPST,COIN,RIOT,MARA,CLSK,MSTR,SQ,PLTR,ASML,INTU,SNPS,MU,QCOM,AVGO,LRCX,\
TSM,INTC,SEMR,SGRY,PSTG,DDOG,OKTA,ZS,CHKP,PANW,NOW,VEEV,TWLO,GTLB,ORCL,IBM";

// Per-call timeouts: Polygon snapshots are fast, the other two are not
const POLYGON_TIMEOUT: StdDuration = StdDuration::from_secs(3);
const FINNHUB_TIMEOUT: StdDuration = StdDuration::from_secs(5);
const ALPHA_VANTAGE_TIMEOUT: StdDuration = StdDuration::from_secs(5);

/// Upper bound for TTLs and retention windows (one year)
const MAX_WINDOW_SECS: i64 = 365 * 86_400;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    // Providers
    pub polygon: ProviderSettings,
    pub finnhub: ProviderSettings,
    pub alpha_vantage: ProviderSettings,

    // Freshness
    pub price_ttl: Duration,
    pub sentiment_ttl: Duration,
    pub news_update_hours: Vec<u32>,
    pub news_timezone: Tz,
    pub news_fetch_limit: usize,
    pub quote_retention: Duration,

    pub batch: BatchConfig,

    // Agent
    pub watchlist: Vec<String>,
    pub sentiment_tickers: Vec<String>,
    pub poll_interval: StdDuration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let watchlist = parse_tickers(DEFAULT_WATCHLIST);
        Self {
            polygon: ProviderSettings::new(None, POLYGON_TIMEOUT, 5),
            finnhub: ProviderSettings::new(None, FINNHUB_TIMEOUT, 60),
            alpha_vantage: ProviderSettings::new(None, ALPHA_VANTAGE_TIMEOUT, 5),
            price_ttl: Duration::seconds(300),
            sentiment_ttl: Duration::seconds(86_400),
            news_update_hours: vec![9, 12, 16, 19],
            news_timezone: chrono_tz::US::Eastern,
            news_fetch_limit: 50,
            quote_retention: Duration::seconds(3_600),
            batch: BatchConfig::default(),
            sentiment_tickers: watchlist.iter().take(5).cloned().collect(),
            watchlist,
            poll_interval: StdDuration::from_secs(60),
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key/value source. Unset keys take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let key = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let watchlist = parse_tickers(&key("WATCHLIST").unwrap_or_else(|| DEFAULT_WATCHLIST.to_string()));
        let sentiment_tickers = match key("SENTIMENT_TICKERS") {
            Some(raw) => parse_tickers(&raw),
            None => watchlist.iter().take(5).cloned().collect(),
        };

        let news_update_hours = parse_hours(
            &key("NEWS_UPDATE_HOURS").unwrap_or_else(|| "9,12,16,19".to_string()),
        )?;

        let tz_name = key("NEWS_TIMEZONE").unwrap_or_else(|| "US/Eastern".to_string());
        let news_timezone: Tz = tz_name
            .trim()
            .parse()
            .map_err(|e| anyhow!("NEWS_TIMEZONE {:?} is not a known timezone: {}", tz_name, e))?;

        let config = Self {
            polygon: ProviderSettings::new(
                key("POLYGON_API_KEY"),
                POLYGON_TIMEOUT,
                parse_var(&key, "POLYGON_RATE_LIMIT", 5)?,
            ),
            finnhub: ProviderSettings::new(
                key("FINNHUB_API_KEY"),
                FINNHUB_TIMEOUT,
                parse_var(&key, "FINNHUB_RATE_LIMIT", 60)?,
            ),
            alpha_vantage: ProviderSettings::new(
                key("ALPHAVANTAGE_API_KEY"),
                ALPHA_VANTAGE_TIMEOUT,
                parse_var(&key, "ALPHAVANTAGE_RATE_LIMIT", 5)?,
            ),

            price_ttl: parse_secs(&key, "PRICE_TTL_SECS", 300)?,
            sentiment_ttl: parse_secs(&key, "SENTIMENT_TTL_SECS", 86_400)?,
            news_update_hours,
            news_timezone,
            news_fetch_limit: parse_var(&key, "NEWS_FETCH_LIMIT", 50)?,
            quote_retention: parse_secs(&key, "QUOTE_RETENTION_SECS", 3_600)?,

            batch: BatchConfig {
                batch_size: parse_var(&key, "BATCH_SIZE", 15)?,
                max_parallel: parse_var(&key, "BATCH_MAX_PARALLEL", 3)?,
                per_item_timeout: StdDuration::from_secs(parse_var(&key, "BATCH_ITEM_TIMEOUT_SECS", 12)?),
                inter_batch_pause: StdDuration::from_millis(parse_var(&key, "BATCH_PAUSE_MS", 500)?),
            },

            watchlist,
            sentiment_tickers,
            poll_interval: StdDuration::from_secs(parse_var(&key, "POLL_INTERVAL_SECS", 60)?),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch.batch_size == 0 {
            bail!("BATCH_SIZE must be at least 1");
        }
        if self.batch.max_parallel == 0 {
            bail!("BATCH_MAX_PARALLEL must be at least 1");
        }
        if self.price_ttl <= Duration::zero() || self.sentiment_ttl <= Duration::zero() {
            bail!("TTLs must be positive");
        }
        let max = Duration::seconds(MAX_WINDOW_SECS);
        if self.price_ttl > max || self.sentiment_ttl > max || self.quote_retention > max {
            bail!("TTLs and retention must not exceed {} seconds", MAX_WINDOW_SECS);
        }
        if self.quote_retention < Duration::zero() {
            bail!("QUOTE_RETENTION_SECS must not be negative");
        }
        if self.news_fetch_limit == 0 {
            bail!("NEWS_FETCH_LIMIT must be at least 1");
        }
        if self.poll_interval.is_zero() {
            bail!("POLL_INTERVAL_SECS must be at least 1");
        }
        Ok(())
    }

    pub fn price_schedule(&self) -> RefreshSchedule {
        RefreshSchedule::Ttl(self.price_ttl)
    }

    pub fn sentiment_schedule(&self) -> RefreshSchedule {
        RefreshSchedule::Ttl(self.sentiment_ttl)
    }

    pub fn news_schedule(&self) -> RefreshSchedule {
        RefreshSchedule::fixed_hours(self.news_update_hours.iter().copied(), self.news_timezone)
    }
}

fn parse_var<T>(key: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match key(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has invalid value {:?}", name, raw)),
        None => Ok(default),
    }
}

/// Seconds within `0..=MAX_WINDOW_SECS`, so later arithmetic cannot overflow.
fn parse_secs(key: &impl Fn(&str) -> Option<String>, name: &str, default: i64) -> Result<Duration> {
    let secs: i64 = parse_var(key, name, default)?;
    if !(0..=MAX_WINDOW_SECS).contains(&secs) {
        bail!("{} must be between 0 and {} seconds, got {}", name, MAX_WINDOW_SECS, secs);
    }
    Ok(Duration::seconds(secs))
}

fn parse_tickers(raw: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for symbol in raw.split(',').map(|s| s.trim().to_uppercase()) {
        if !symbol.is_empty() && !seen.contains(&symbol) {
            seen.push(symbol);
        }
    }
    seen
}

fn parse_hours(raw: &str) -> Result<Vec<u32>> {
    let mut hours = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let hour: u32 = part
            .parse()
            .with_context(|| format!("NEWS_UPDATE_HOURS has invalid hour {:?}", part))?;
        if hour > 23 {
            bail!("NEWS_UPDATE_HOURS hour {} is outside 0-23", hour);
        }
        hours.push(hour);
    }
    if hours.is_empty() {
        bail!("NEWS_UPDATE_HOURS must list at least one hour");
    }
    hours.sort_unstable();
    hours.dedup();
    Ok(hours)
}
