use async_trait::async_trait;
use chrono::{DateTime, Utc};
use market_core::{
    normalize_symbol, Article, FetchError, FetchResult, Fetcher, NewsQuery, PriceQuery, Quote,
    Source,
};
use serde::Deserialize;

use crate::http::ProviderHttp;
use crate::ProviderSettings;

const BASE_URL: &str = "https://api.polygon.io";

/// Polygon.io aggregator: primary price source, secondary news source.
#[derive(Clone)]
pub struct PolygonClient {
    http: ProviderHttp,
}

impl PolygonClient {
    pub fn new(settings: &ProviderSettings) -> Self {
        Self {
            http: ProviderHttp::new(Source::Polygon, settings, BASE_URL),
        }
    }

    /// Get snapshot for a ticker (near-real-time last trade, today's OHLC, prev day)
    pub async fn get_snapshot(&self, symbol: &str) -> Result<Quote, FetchError> {
        let api_key = self.http.api_key()?;
        let symbol = normalize_symbol(symbol);
        let path = format!("/v2/snapshot/locale/us/markets/stocks/tickers/{}", symbol);

        let response: SnapshotResponse = self
            .http
            .get_json(&path, &[("apiKey", api_key.to_string())])
            .await?;

        let ticker = response
            .ticker
            .ok_or_else(|| self.http.error(format!("no snapshot for {}", symbol)))?;

        let day = ticker.day.unwrap_or_default();
        let prev_day = ticker.prev_day.unwrap_or_default();

        // Outside market hours the day bar can be empty; fall back through the trade and closes
        let last = ticker
            .last_trade
            .and_then(|t| t.p)
            .filter(|p| *p > 0.0)
            .or(day.c.filter(|c| *c > 0.0))
            .or(prev_day.c.filter(|c| *c > 0.0))
            .unwrap_or(0.0);

        Ok(Quote {
            symbol,
            last,
            change: ticker.todays_change.unwrap_or(0.0),
            change_pct: ticker.todays_change_perc.unwrap_or(0.0),
            open: day.o,
            high: day.h,
            low: day.l,
            previous_close: prev_day.c,
        })
    }

    /// Get the most recent market-wide news articles
    pub async fn get_news(&self, limit: usize) -> Result<Vec<Article>, FetchError> {
        let api_key = self.http.api_key()?;

        let response: NewsResponse = self
            .http
            .get_json(
                "/v2/reference/news",
                &[
                    ("apiKey", api_key.to_string()),
                    ("limit", limit.to_string()),
                    ("order", "desc".to_string()),
                    ("sort", "published_utc".to_string()),
                ],
            )
            .await?;

        Ok(response
            .results
            .into_iter()
            .filter_map(|r| {
                let published_at = DateTime::parse_from_rfc3339(&r.published_utc)
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok()?;
                Some(Article {
                    id: r.id,
                    headline: r.title,
                    summary: r.description,
                    publisher: r.publisher.and_then(|p| p.name),
                    url: r.article_url,
                    published_at,
                    tickers: r.tickers,
                })
            })
            .take(limit)
            .collect())
    }
}

#[async_trait]
impl Fetcher<PriceQuery> for PolygonClient {
    fn source(&self) -> Source {
        self.http.source()
    }

    fn is_configured(&self) -> bool {
        self.http.is_configured()
    }

    async fn fetch(&self, query: &PriceQuery) -> FetchResult<Quote> {
        FetchResult::from_result(Source::Polygon, self.get_snapshot(&query.symbol).await)
    }
}

#[async_trait]
impl Fetcher<NewsQuery> for PolygonClient {
    fn source(&self) -> Source {
        self.http.source()
    }

    fn is_configured(&self) -> bool {
        self.http.is_configured()
    }

    async fn fetch(&self, query: &NewsQuery) -> FetchResult<Vec<Article>> {
        FetchResult::from_result(Source::Polygon, self.get_news(query.limit).await)
    }
}

// Snapshot types
#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    ticker: Option<SnapshotTicker>,
}

#[derive(Debug, Deserialize)]
struct SnapshotTicker {
    day: Option<SnapshotDay>,
    #[serde(rename = "lastTrade")]
    last_trade: Option<SnapshotLastTrade>,
    #[serde(rename = "prevDay")]
    prev_day: Option<SnapshotDay>,
    #[serde(rename = "todaysChange")]
    todays_change: Option<f64>,
    #[serde(rename = "todaysChangePerc")]
    todays_change_perc: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct SnapshotDay {
    o: Option<f64>,
    h: Option<f64>,
    l: Option<f64>,
    c: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SnapshotLastTrade {
    p: Option<f64>,
}

// News types
#[derive(Debug, Deserialize)]
struct NewsResponse {
    #[serde(default)]
    results: Vec<NewsResult>,
}

#[derive(Debug, Deserialize)]
struct NewsResult {
    id: String,
    title: String,
    published_utc: String,
    article_url: String,
    description: Option<String>,
    publisher: Option<NewsPublisher>,
    #[serde(default)]
    tickers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NewsPublisher {
    name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_core::FetchErrorKind;
    use mockito::Matcher;
    use std::time::Duration;

    fn client(base_url: &str, api_key: Option<&str>) -> PolygonClient {
        PolygonClient::new(
            &ProviderSettings::new(api_key.map(String::from), Duration::from_secs(3), 100)
                .with_base_url(base_url),
        )
    }

    #[tokio::test]
    async fn test_snapshot_parsed_into_quote() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v2/snapshot/locale/us/markets/stocks/tickers/AAPL")
            .match_query(Matcher::UrlEncoded("apiKey".into(), "test-key".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"status":"OK","ticker":{"ticker":"AAPL","todaysChange":2.1,"todaysChangePerc":1.12,
                    "day":{"o":187.0,"h":190.2,"l":186.5,"c":189.9,"v":1000},
                    "lastTrade":{"p":190.05,"s":100,"t":1},
                    "prevDay":{"o":185.0,"h":188.0,"l":184.0,"c":187.95,"v":900}}}"#,
            )
            .create_async()
            .await;

        let result = Fetcher::<PriceQuery>::fetch(
            &client(&server.url(), Some("test-key")),
            &PriceQuery::new("aapl"),
        )
        .await;

        mock.assert_async().await;
        assert_eq!(result.source, Source::Polygon);
        let quote = result.into_result().unwrap();
        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.last, 190.05);
        assert_eq!(quote.change_pct, 1.12);
        assert_eq!(quote.previous_close, Some(187.95));
    }

    #[tokio::test]
    async fn test_closed_market_uses_previous_close() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v2/snapshot/locale/us/markets/stocks/tickers/MSFT")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"ticker":{"day":{"c":0},"prevDay":{"c":410.5}}}"#)
            .create_async()
            .await;

        let quote = client(&server.url(), Some("k")).get_snapshot("MSFT").await.unwrap();
        assert_eq!(quote.last, 410.5);
        assert_eq!(quote.change_pct, 0.0);
    }

    #[tokio::test]
    async fn test_non_success_status_is_provider_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v2/snapshot/locale/us/markets/stocks/tickers/AAPL")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body(r#"{"status":"NOT_AUTHORIZED"}"#)
            .create_async()
            .await;

        let err = client(&server.url(), Some("k")).get_snapshot("AAPL").await.unwrap_err();
        assert_eq!(err.kind(), FetchErrorKind::ProviderError);
        assert!(err.to_string().contains("403"));
    }

    #[tokio::test]
    async fn test_missing_key_skips_network() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let polygon = client(&server.url(), None);
        assert!(!Fetcher::<PriceQuery>::is_configured(&polygon));
        let err = polygon.get_snapshot("AAPL").await.unwrap_err();

        mock.assert_async().await;
        assert_eq!(err, FetchError::ProviderUnavailable(Source::Polygon));
    }

    #[tokio::test]
    async fn test_news_skips_unparseable_dates() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v2/reference/news")
            .match_query(Matcher::UrlEncoded("limit".into(), "5".into()))
            .with_status(200)
            .with_body(
                r#"{"results":[
                    {"id":"a1","title":"Fed holds rates","published_utc":"2024-06-12T18:00:00Z",
                     "article_url":"https://news.test/a1","publisher":{"name":"Wire"},"tickers":["SPY"]},
                    {"id":"a2","title":"Broken","published_utc":"yesterday","article_url":"https://news.test/a2"}
                ]}"#,
            )
            .create_async()
            .await;

        let articles = client(&server.url(), Some("k")).get_news(5).await.unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].headline, "Fed holds rates");
        assert_eq!(articles[0].publisher.as_deref(), Some("Wire"));
    }
}
