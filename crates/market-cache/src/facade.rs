use chrono::{DateTime, Duration, Utc};
use market_core::{
    normalize_symbol, normalize_symbols, Article, DataClass, FetchError, FetchResult, Fetcher,
    NewsQuery, PriceQuery, QueryKey, Quote, SentimentQuery, SentimentSeries, Source,
};
use market_providers::{AlphaVantageClient, FinnhubClient, PolygonClient};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

use crate::batch::{BatchItem, BatchItemError, BatchRunner};
use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::refresh::{RefreshController, RefreshState, Served};
use crate::sentiment::SentimentSummary;
use crate::signals::{derive_signal, derive_strategy};
use crate::ttl_cache::TtlCache;
use crate::waterfall::Waterfall;

/// Index proxies reported by [`MarketCache::get_market_overview`]
pub const MARKET_INDICES: [(&str, &str); 4] = [
    ("S&P 500", "SPY"),
    ("Dow Jones", "DIA"),
    ("NASDAQ", "QQQ"),
    ("VIX", "VIXY"),
];

const NEWS_CATEGORY: &str = "general";
const NEWS_RETENTION_HOURS: i64 = 48;
const SENTIMENT_RETENTION_TTLS: i32 = 7;

/// The three provider chains the facade reads through.
pub struct ProviderSet {
    pub price: Waterfall<PriceQuery>,
    pub news: Waterfall<NewsQuery>,
    pub sentiment: Waterfall<SentimentQuery>,
}

impl ProviderSet {
    /// Default chains: price Polygon → Finnhub → Alpha Vantage, news Finnhub →
    /// Polygon → Alpha Vantage, sentiment Finnhub → Alpha Vantage.
    pub fn from_config(config: &CacheConfig) -> Self {
        let polygon = Arc::new(PolygonClient::new(&config.polygon));
        let finnhub = Arc::new(FinnhubClient::new(&config.finnhub));
        let alpha_vantage = Arc::new(AlphaVantageClient::new(&config.alpha_vantage));

        let price: Vec<Arc<dyn Fetcher<PriceQuery>>> =
            vec![polygon.clone(), finnhub.clone(), alpha_vantage.clone()];
        let news: Vec<Arc<dyn Fetcher<NewsQuery>>> =
            vec![finnhub.clone(), polygon, alpha_vantage.clone()];
        let sentiment: Vec<Arc<dyn Fetcher<SentimentQuery>>> = vec![finnhub, alpha_vantage];

        Self {
            price: Waterfall::new(price),
            news: Waterfall::new(news),
            sentiment: Waterfall::new(sentiment),
        }
    }

    pub fn statuses(&self) -> Vec<ProviderStatus> {
        let chains = [
            (DataClass::Price, self.price.status()),
            (DataClass::News, self.news.status()),
            (DataClass::Sentiment, self.sentiment.status()),
        ];

        let mut statuses: Vec<ProviderStatus> = Vec::new();
        for (class, providers) in chains {
            for (source, configured) in providers {
                match statuses.iter_mut().find(|s| s.source == source) {
                    Some(status) => status.serves.push(class),
                    None => statuses.push(ProviderStatus {
                        source,
                        configured,
                        serves: vec![class],
                    }),
                }
            }
        }
        statuses
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderStatus {
    pub source: Source,
    pub configured: bool,
    pub serves: Vec<DataClass>,
}

/// One ticker's row inside a cached price snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickerQuote {
    pub symbol: String,
    pub quote: Option<Quote>,
    pub source: Source,
    pub fetched_at: Option<DateTime<Utc>>,
    /// The quote predates this snapshot because its refresh failed
    pub stale: bool,
    pub error: Option<String>,
}

impl TickerQuote {
    fn from_served(symbol: &str, served: Served<Quote>) -> Result<Self, FetchError> {
        let stale = served.is_stale();
        match served.entry {
            Some(entry) => Ok(Self {
                symbol: symbol.to_string(),
                quote: Some(entry.value),
                source: entry.source,
                fetched_at: Some(entry.fetched_at),
                stale,
                error: served.error.map(|e| e.to_string()),
            }),
            None => Err(served.error.unwrap_or_else(|| FetchError::AllProvidersExhausted {
                query: QueryKey::price(symbol).to_string(),
                attempts: Vec::new(),
            })),
        }
    }

    fn failed(symbol: &str, error: String) -> Self {
        Self {
            symbol: symbol.to_string(),
            quote: None,
            source: Source::Fallback,
            fetched_at: None,
            stale: false,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricePoint {
    pub symbol: String,
    pub last: f64,
    pub change_pct: f64,
    pub signal: &'static str,
    pub strategy: &'static str,
    pub source: Source,
    pub stale: bool,
}

impl PricePoint {
    fn from_quote(quote: &Quote, source: Source, stale: bool) -> Self {
        Self {
            symbol: quote.symbol.clone(),
            last: quote.last,
            change_pct: quote.change_pct,
            signal: derive_signal(quote.change_pct),
            strategy: derive_strategy(quote.change_pct),
            source,
            stale,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickerFailure {
    pub symbol: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceSnapshot {
    pub points: Vec<PricePoint>,
    /// Tickers with no usable quote, current or previous
    pub failures: Vec<TickerFailure>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub source: Source,
    pub state: RefreshState,
    pub error: Option<String>,
}

impl PriceSnapshot {
    fn from_served(symbols: &[String], served: Served<Vec<TickerQuote>>) -> Self {
        let error = served.error.map(|e| e.to_string());

        let Some(entry) = served.entry else {
            let reason = error
                .clone()
                .unwrap_or_else(|| "no data available".to_string());
            return Self {
                points: Vec::new(),
                failures: symbols
                    .iter()
                    .map(|symbol| TickerFailure {
                        symbol: symbol.clone(),
                        error: reason.clone(),
                    })
                    .collect(),
                fetched_at: None,
                source: Source::Fallback,
                state: served.state,
                error,
            };
        };

        let mut points = Vec::new();
        let mut failures = Vec::new();
        for row in &entry.value {
            match &row.quote {
                Some(quote) => points.push(PricePoint::from_quote(quote, row.source, row.stale)),
                None => failures.push(TickerFailure {
                    symbol: row.symbol.clone(),
                    error: row.error.clone().unwrap_or_else(|| "no data".to_string()),
                }),
            }
        }

        Self {
            points,
            failures,
            fetched_at: Some(entry.fetched_at),
            source: entry.source,
            state: served.state,
            error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuoteView {
    pub symbol: String,
    pub quote: Option<Quote>,
    pub source: Source,
    pub fetched_at: Option<DateTime<Utc>>,
    pub state: RefreshState,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewsDigest {
    /// Newest first
    pub articles: Vec<Article>,
    pub last_updated: Option<DateTime<Utc>>,
    pub next_scheduled_update: Option<DateTime<Utc>>,
    pub source: Source,
    pub state: RefreshState,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexLevel {
    pub name: &'static str,
    pub symbol: &'static str,
    pub last: Option<f64>,
    pub change_pct: Option<f64>,
    pub source: Source,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyState {
    pub key: String,
    pub state: RefreshState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub checked_at: DateTime<Utc>,
    /// Age of the most recent price snapshot
    pub cache_age_seconds: Option<i64>,
    pub next_news_update_time: Option<DateTime<Utc>>,
    pub providers: Vec<ProviderStatus>,
    pub states: Vec<KeyState>,
}

/// Read-through cache over every market-data class.
///
/// Reads never fail: when no provider can answer and nothing is cached, the
/// result is empty and carries the error.
pub struct MarketCache {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    providers: Arc<ProviderSet>,
    runner: BatchRunner,
    /// Per-ticker quotes, shared by `get_quote` and the snapshot workers
    quotes: RefreshController<QueryKey, Quote>,
    /// One aggregate entry per requested ticker set
    snapshots: RefreshController<QueryKey, Vec<TickerQuote>>,
    news: RefreshController<QueryKey, Vec<Article>>,
    sentiment: RefreshController<QueryKey, SentimentSeries>,
}

impl MarketCache {
    pub fn new(config: CacheConfig) -> Self {
        let providers = ProviderSet::from_config(&config);
        Self::with_parts(config, providers, Arc::new(SystemClock))
    }

    pub fn with_parts(config: CacheConfig, providers: ProviderSet, clock: Arc<dyn Clock>) -> Self {
        for status in providers.statuses() {
            if !status.configured {
                tracing::warn!("{} has no API key; it will be skipped", status.source);
            }
        }

        Self {
            runner: BatchRunner::new(config.batch.clone()),
            quotes: RefreshController::new(TtlCache::new(config.price_schedule()), clock.clone()),
            snapshots: RefreshController::new(TtlCache::new(config.price_schedule()), clock.clone()),
            news: RefreshController::new(TtlCache::new(config.news_schedule()), clock.clone()),
            sentiment: RefreshController::new(
                TtlCache::new(config.sentiment_schedule()),
                clock.clone(),
            ),
            providers: Arc::new(providers),
            clock,
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Quote for one ticker from the per-ticker entry.
    pub async fn get_quote(&self, ticker: &str) -> QuoteView {
        let symbol = normalize_symbol(ticker);
        if symbol.is_empty() {
            return QuoteView {
                symbol,
                quote: None,
                source: Source::Fallback,
                fetched_at: None,
                state: RefreshState::Missing,
                error: Some("empty ticker".to_string()),
            };
        }

        let key = QueryKey::price(&symbol);
        let query = PriceQuery::new(&symbol);
        let providers = Arc::clone(&self.providers);
        let served = self
            .quotes
            .read(&key, move || async move { providers.price.fetch(&query).await })
            .await;

        let error = served.error.map(|e| e.to_string());
        match served.entry {
            Some(entry) => QuoteView {
                symbol,
                quote: Some(entry.value),
                source: entry.source,
                fetched_at: Some(entry.fetched_at),
                state: served.state,
                error,
            },
            None => QuoteView {
                symbol,
                quote: None,
                source: Source::Fallback,
                fetched_at: None,
                state: served.state,
                error,
            },
        }
    }

    /// Latest prices for a ticker set, cached as one aggregate entry.
    ///
    /// When the aggregate is due, every ticker is refreshed through the batch
    /// runner while readers keep getting the previous aggregate.
    pub async fn get_price_snapshot(&self, tickers: &[String]) -> PriceSnapshot {
        let symbols = normalize_symbols(tickers);
        if symbols.is_empty() {
            return PriceSnapshot {
                points: Vec::new(),
                failures: Vec::new(),
                fetched_at: None,
                source: Source::Fallback,
                state: RefreshState::Missing,
                error: Some("no tickers requested".to_string()),
            };
        }

        let key = QueryKey::snapshot(&symbols);
        let served = self
            .snapshots
            .read(&key, || self.snapshot_refresh(symbols.clone()))
            .await;

        PriceSnapshot::from_served(&symbols, served)
    }

    /// Up to `limit` most recent market-wide articles.
    pub async fn get_market_news(&self, limit: usize) -> NewsDigest {
        let key = QueryKey::news(NEWS_CATEGORY);
        let query = NewsQuery {
            category: NEWS_CATEGORY.to_string(),
            limit: self.config.news_fetch_limit,
        };
        let providers = Arc::clone(&self.providers);
        let served = self
            .news
            .read(&key, move || async move { providers.news.fetch(&query).await })
            .await;

        let now = self.clock.now();
        let schedule = self.news.cache().schedule();
        let error = served.error.map(|e| e.to_string());

        match served.entry {
            Some(entry) => {
                let mut articles = entry.value;
                articles.sort_by(|a, b| b.published_at.cmp(&a.published_at));
                articles.truncate(limit);

                NewsDigest {
                    articles,
                    last_updated: Some(entry.fetched_at),
                    next_scheduled_update: schedule.next_update(Some(entry.fetched_at), now),
                    source: entry.source,
                    state: served.state,
                    error,
                }
            }
            None => NewsDigest {
                articles: Vec::new(),
                last_updated: None,
                next_scheduled_update: schedule.next_update(None, now),
                source: Source::Fallback,
                state: served.state,
                error,
            },
        }
    }

    /// Daily and weekly social sentiment for a ticker (24h TTL by default).
    pub async fn get_sentiment(&self, ticker: &str) -> SentimentSummary {
        let symbol = normalize_symbol(ticker);
        if symbol.is_empty() {
            return SentimentSummary::unavailable(
                &symbol,
                RefreshState::Missing,
                Some("empty ticker".to_string()),
            );
        }

        let key = QueryKey::sentiment(&symbol);
        let query = SentimentQuery::new(&symbol);
        let providers = Arc::clone(&self.providers);
        let served = self
            .sentiment
            .read(&key, move || async move { providers.sentiment.fetch(&query).await })
            .await;

        let error = served.error.map(|e| e.to_string());
        match served.entry {
            Some(entry) => {
                let mut summary = SentimentSummary::from_series(
                    &entry.value,
                    entry.source,
                    entry.fetched_at,
                    served.state,
                );
                summary.error = error;
                summary
            }
            None => SentimentSummary::unavailable(&symbol, served.state, error),
        }
    }

    /// Major index proxies through the snapshot path. Indices without data are
    /// reported unavailable, never filled in.
    pub async fn get_market_overview(&self) -> Vec<IndexLevel> {
        let symbols: Vec<String> = MARKET_INDICES.iter().map(|(_, s)| s.to_string()).collect();
        let snapshot = self.get_price_snapshot(&symbols).await;

        MARKET_INDICES
            .iter()
            .map(|&(name, symbol)| match snapshot.points.iter().find(|p| p.symbol == symbol) {
                Some(point) => IndexLevel {
                    name,
                    symbol,
                    last: Some(point.last),
                    change_pct: Some(point.change_pct),
                    source: point.source,
                    available: true,
                },
                None => IndexLevel {
                    name,
                    symbol,
                    last: None,
                    change_pct: None,
                    source: Source::Fallback,
                    available: false,
                },
            })
            .collect()
    }

    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        self.providers.statuses()
    }

    pub fn health(&self) -> HealthStatus {
        let now = self.clock.now();
        let news_fetched_at = self
            .news
            .cache()
            .get_allow_stale(&QueryKey::news(NEWS_CATEGORY))
            .map(|e| e.fetched_at);

        let mut states: Vec<KeyState> = self
            .snapshots
            .states()
            .into_iter()
            .chain(self.news.states())
            .chain(self.sentiment.states())
            .map(|(key, state)| KeyState {
                key: key.to_string(),
                state,
            })
            .collect();
        states.sort_by(|a, b| a.key.cmp(&b.key));

        HealthStatus {
            checked_at: now,
            cache_age_seconds: self
                .snapshots
                .cache()
                .newest_fetched_at()
                .map(|t| (now - t).num_seconds()),
            next_news_update_time: self.news.cache().schedule().next_update(news_fetched_at, now),
            providers: self.provider_status(),
            states,
        }
    }

    /// Drop entries too old to be worth serving. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.quotes.sweep(self.config.quote_retention)
            + self.snapshots.sweep(self.config.quote_retention)
            + self.news.sweep(Duration::hours(NEWS_RETENTION_HOURS))
            + self.sentiment.sweep(
                self.config
                    .sentiment_ttl
                    .checked_mul(SENTIMENT_RETENTION_TTLS)
                    .unwrap_or(Duration::MAX),
            )
    }

    /// Wait until no refresh is in flight.
    pub async fn wait_for_refreshes(&self) {
        // Snapshot refreshes start quote refreshes, so they go first
        self.snapshots.join_all().await;
        self.quotes.join_all().await;
        self.news.join_all().await;
        self.sentiment.join_all().await;
    }

    fn snapshot_refresh(
        &self,
        symbols: Vec<String>,
    ) -> impl Future<Output = FetchResult<Vec<TickerQuote>>> + Send + 'static {
        let runner = self.runner.clone();
        let quotes = self.quotes.clone();
        let snapshots = self.snapshots.clone();
        let providers = Arc::clone(&self.providers);
        let retention = self.config.quote_retention;
        let key = QueryKey::snapshot(&symbols);

        async move {
            let started = tokio::time::Instant::now();
            let worker_quotes = quotes.clone();

            let results = runner
                .run_batch(symbols, move |symbol: String| {
                    let quotes = worker_quotes.clone();
                    let providers = Arc::clone(&providers);
                    async move { load_quote(&quotes, providers, &symbol).await }
                })
                .await;

            let mut rows = Vec::with_capacity(results.len());
            let mut attempts = Vec::new();
            for BatchItem { item, result } in results {
                match result {
                    Ok(row) => rows.push(row),
                    Err(e) => {
                        tracing::warn!("No fresh quote for {}: {}", item, e);
                        rows.push(stale_or_failed(&quotes, &item, &e));
                        attempts.push(match e {
                            BatchItemError::Fetch(fetch) => fetch,
                            other => FetchError::provider_error(
                                Source::Fallback,
                                format!("{}: {}", item, other),
                            ),
                        });
                    }
                }
            }

            quotes.sweep(retention);
            snapshots.sweep(retention);

            let fresh = rows.iter().filter(|r| r.quote.is_some() && !r.stale).count();
            tracing::info!(
                "Refreshed {}: {}/{} tickers fresh in {:.1}s",
                key,
                fresh,
                rows.len(),
                started.elapsed().as_secs_f64()
            );

            if fresh == 0 {
                return FetchResult::fallback(FetchError::AllProvidersExhausted {
                    query: key.to_string(),
                    attempts,
                });
            }
            // The aggregate is only as fresh as its oldest reused quote
            let oldest = rows
                .iter()
                .filter(|r| r.quote.is_some() && !r.stale)
                .filter_map(|r| r.fetched_at)
                .min();
            let result = FetchResult::ok(dominant_source(&rows), rows);
            match oldest {
                Some(at) => result.with_observed_at(at),
                None => result,
            }
        }
    }
}

/// Batch worker: the per-ticker entry, waiting for its refresh when due.
async fn load_quote(
    quotes: &RefreshController<QueryKey, Quote>,
    providers: Arc<ProviderSet>,
    symbol: &str,
) -> Result<TickerQuote, FetchError> {
    let key = QueryKey::price(symbol);
    let query = PriceQuery::new(symbol);
    let served = quotes
        .read_through(&key, move || async move { providers.price.fetch(&query).await })
        .await;
    TickerQuote::from_served(symbol, served)
}

/// Row for a ticker whose worker failed: its last known quote if any.
fn stale_or_failed(
    quotes: &RefreshController<QueryKey, Quote>,
    symbol: &str,
    error: &BatchItemError,
) -> TickerQuote {
    match quotes.cache().get_allow_stale(&QueryKey::price(symbol)) {
        Some(entry) => TickerQuote {
            symbol: symbol.to_string(),
            quote: Some(entry.value),
            source: entry.source,
            fetched_at: Some(entry.fetched_at),
            stale: true,
            error: Some(error.to_string()),
        },
        None => TickerQuote::failed(symbol, error.to_string()),
    }
}

/// Source that answered the most tickers.
fn dominant_source(rows: &[TickerQuote]) -> Source {
    let mut counts: Vec<(Source, usize)> = Vec::new();
    for row in rows.iter().filter(|r| r.quote.is_some() && r.source.is_live()) {
        match counts.iter_mut().find(|(s, _)| *s == row.source) {
            Some((_, n)) => *n += 1,
            None => counts.push((row.source, 1)),
        }
    }
    counts
        .into_iter()
        .max_by_key(|(_, n)| *n)
        .map(|(s, _)| s)
        .unwrap_or(Source::Fallback)
}
