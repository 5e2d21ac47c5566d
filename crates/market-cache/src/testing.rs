//! Scripted fetchers shared by the unit tests.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use market_core::{
    Article, FetchError, FetchResult, Fetcher, Query, Quote, SentimentSample, SentimentSeries,
    Source,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

type Respond<Q> = Box<dyn Fn(&Q, usize) -> Result<<Q as Query>::Output, FetchError> + Send + Sync>;
type Delay<Q> = Box<dyn Fn(&Q) -> Duration + Send + Sync>;

pub(crate) struct FakeFetcher<Q: Query> {
    source: Source,
    configured: bool,
    respond: Respond<Q>,
    delay: Delay<Q>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl<Q: Query + 'static> FakeFetcher<Q> {
    /// `respond` gets the query and the zero-based call number.
    pub(crate) fn new(
        source: Source,
        respond: impl Fn(&Q, usize) -> Result<Q::Output, FetchError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            source,
            configured: true,
            respond: Box::new(respond),
            delay: Box::new(|_| Duration::ZERO),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing(source: Source) -> Self {
        let fetcher = Self::new(source, move |_, _| {
            Err(FetchError::provider_error(source, "upstream down"))
        });
        fetcher.set_failing(true);
        fetcher
    }

    pub(crate) fn unconfigured(source: Source) -> Self {
        let mut fetcher = Self::new(source, move |_, _| {
            Err(FetchError::ProviderUnavailable(source))
        });
        fetcher.configured = false;
        fetcher
    }

    pub(crate) fn with_delay(mut self, delay: impl Fn(&Q) -> Duration + Send + Sync + 'static) -> Self {
        self.delay = Box::new(delay);
        self
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<Q: Query + 'static> Fetcher<Q> for FakeFetcher<Q> {
    fn source(&self) -> Source {
        self.source
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn fetch(&self, query: &Q) -> FetchResult<Q::Output> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = (self.delay)(query);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return FetchResult::failed(FetchError::provider_error(self.source, "upstream down"));
        }
        FetchResult::from_result(self.source, (self.respond)(query, call))
    }
}

pub(crate) fn quote(symbol: &str, last: f64, change_pct: f64) -> Quote {
    Quote {
        symbol: symbol.to_string(),
        last,
        change: last * change_pct / 100.0,
        change_pct,
        ..Default::default()
    }
}

pub(crate) fn article(id: &str, published_at: DateTime<Utc>) -> Article {
    Article {
        id: id.to_string(),
        headline: format!("Headline {}", id),
        summary: None,
        publisher: Some("Wire".to_string()),
        url: format!("https://news.test/{}", id),
        published_at,
        tickers: Vec::new(),
    }
}

/// One sample per day starting 2024-05-01, oldest first.
pub(crate) fn series(symbol: &str, scores: &[f64]) -> SentimentSeries {
    let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap_or_default();
    SentimentSeries {
        symbol: symbol.to_string(),
        samples: scores
            .iter()
            .enumerate()
            .map(|(i, score)| SentimentSample {
                date: start + chrono::Duration::days(i as i64),
                score: *score,
                mentions: 10,
            })
            .collect(),
    }
}
