use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use market_core::{
    normalize_symbol, Article, FetchError, FetchResult, Fetcher, NewsQuery, PriceQuery, Quote,
    SentimentObservation, SentimentQuery, SentimentSeries, Source,
};
use serde::Deserialize;

use crate::http::ProviderHttp;
use crate::ProviderSettings;

const BASE_URL: &str = "https://finnhub.io/api/v1";

/// Finnhub: secondary quote source, primary news and social-sentiment source.
#[derive(Clone)]
pub struct FinnhubClient {
    http: ProviderHttp,
}

impl FinnhubClient {
    pub fn new(settings: &ProviderSettings) -> Self {
        Self {
            http: ProviderHttp::new(Source::Finnhub, settings, BASE_URL),
        }
    }

    pub async fn get_quote(&self, symbol: &str) -> Result<Quote, FetchError> {
        let token = self.http.api_key()?;
        let symbol = normalize_symbol(symbol);

        let quote: FinnhubQuote = self
            .http
            .get_json(
                "/quote",
                &[("symbol", symbol.clone()), ("token", token.to_string())],
            )
            .await?;

        // Unknown symbols come back as HTTP 200 with all zeros; the waterfall sanity check rejects them
        Ok(Quote {
            symbol,
            last: quote.c.unwrap_or(0.0),
            change: quote.d.unwrap_or(0.0),
            change_pct: quote.dp.unwrap_or(0.0),
            open: quote.o,
            high: quote.h,
            low: quote.l,
            previous_close: quote.pc,
        })
    }

    /// Market news for a category ("general", "forex", "crypto", "merger")
    pub async fn get_news(&self, category: &str, limit: usize) -> Result<Vec<Article>, FetchError> {
        let token = self.http.api_key()?;

        let items: Vec<FinnhubNewsItem> = self
            .http
            .get_json(
                "/news",
                &[("category", category.to_string()), ("token", token.to_string())],
            )
            .await?;

        let mut articles: Vec<Article> = items
            .into_iter()
            .filter_map(|item| {
                let published_at = DateTime::from_timestamp(item.datetime, 0)?;
                Some(Article {
                    id: item.id.to_string(),
                    headline: item.headline,
                    summary: item.summary.filter(|s| !s.is_empty()),
                    publisher: item.source,
                    url: item.url,
                    published_at,
                    tickers: item
                        .related
                        .map(|r| {
                            r.split(',')
                                .map(normalize_symbol)
                                .filter(|s| !s.is_empty())
                                .collect()
                        })
                        .unwrap_or_default(),
                })
            })
            .collect();

        articles.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        articles.truncate(limit);
        Ok(articles)
    }

    /// Reddit and Twitter sentiment for the last `lookback_days`, collapsed to daily samples
    pub async fn get_social_sentiment(
        &self,
        symbol: &str,
        lookback_days: u32,
    ) -> Result<SentimentSeries, FetchError> {
        let token = self.http.api_key()?;
        let symbol = normalize_symbol(symbol);
        let to = Utc::now();
        let from = to - Duration::days(i64::from(lookback_days.max(1)));

        let response: SocialSentimentResponse = self
            .http
            .get_json(
                "/stock/social-sentiment",
                &[
                    ("symbol", symbol.clone()),
                    ("from", from.format("%Y-%m-%d").to_string()),
                    ("to", to.format("%Y-%m-%d").to_string()),
                    ("token", token.to_string()),
                ],
            )
            .await?;

        let observations = response
            .data
            .into_iter()
            .chain(response.reddit)
            .chain(response.twitter)
            .filter_map(|point| {
                let at = NaiveDateTime::parse_from_str(&point.at_time, "%Y-%m-%d %H:%M:%S")
                    .ok()?
                    .and_utc();
                Some(SentimentObservation {
                    at,
                    score: point.score?,
                    mentions: point.mention.unwrap_or(0),
                })
            });

        Ok(SentimentSeries::from_observations(&symbol, observations))
    }
}

#[async_trait]
impl Fetcher<PriceQuery> for FinnhubClient {
    fn source(&self) -> Source {
        self.http.source()
    }

    fn is_configured(&self) -> bool {
        self.http.is_configured()
    }

    async fn fetch(&self, query: &PriceQuery) -> FetchResult<Quote> {
        FetchResult::from_result(Source::Finnhub, self.get_quote(&query.symbol).await)
    }
}

#[async_trait]
impl Fetcher<NewsQuery> for FinnhubClient {
    fn source(&self) -> Source {
        self.http.source()
    }

    fn is_configured(&self) -> bool {
        self.http.is_configured()
    }

    async fn fetch(&self, query: &NewsQuery) -> FetchResult<Vec<Article>> {
        FetchResult::from_result(
            Source::Finnhub,
            self.get_news(&query.category, query.limit).await,
        )
    }
}

#[async_trait]
impl Fetcher<SentimentQuery> for FinnhubClient {
    fn source(&self) -> Source {
        self.http.source()
    }

    fn is_configured(&self) -> bool {
        self.http.is_configured()
    }

    async fn fetch(&self, query: &SentimentQuery) -> FetchResult<SentimentSeries> {
        FetchResult::from_result(
            Source::Finnhub,
            self.get_social_sentiment(&query.symbol, query.lookback_days)
                .await,
        )
    }
}

#[derive(Debug, Deserialize)]
struct FinnhubQuote {
    c: Option<f64>,
    d: Option<f64>,
    dp: Option<f64>,
    h: Option<f64>,
    l: Option<f64>,
    o: Option<f64>,
    pc: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FinnhubNewsItem {
    id: i64,
    datetime: i64,
    headline: String,
    summary: Option<String>,
    source: Option<String>,
    url: String,
    related: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SocialSentimentResponse {
    #[serde(default)]
    data: Vec<SocialSentimentPoint>,
    #[serde(default)]
    reddit: Vec<SocialSentimentPoint>,
    #[serde(default)]
    twitter: Vec<SocialSentimentPoint>,
}

#[derive(Debug, Deserialize)]
struct SocialSentimentPoint {
    #[serde(rename = "atTime")]
    at_time: String,
    mention: Option<u64>,
    score: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_core::Query;
    use mockito::Matcher;
    use std::time::Duration as StdDuration;

    fn client(base_url: &str) -> FinnhubClient {
        FinnhubClient::new(
            &ProviderSettings::new(Some("fh-key".to_string()), StdDuration::from_secs(5), 60)
                .with_base_url(base_url),
        )
    }

    #[tokio::test]
    async fn test_quote_parsed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/quote")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "NVDA".into()),
                Matcher::UrlEncoded("token".into(), "fh-key".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"c":121.4,"d":3.2,"dp":2.71,"h":122.0,"l":117.9,"o":118.1,"pc":118.2,"t":1718000000}"#)
            .create_async()
            .await;

        let quote = client(&server.url()).get_quote("nvda").await.unwrap();
        assert_eq!(quote.symbol, "NVDA");
        assert_eq!(quote.last, 121.4);
        assert_eq!(quote.change_pct, 2.71);
        assert!(PriceQuery::is_usable(&quote));
    }

    #[tokio::test]
    async fn test_unknown_symbol_fails_sanity_check() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/quote")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"c":0,"d":null,"dp":null,"h":0,"l":0,"o":0,"pc":0,"t":0}"#)
            .create_async()
            .await;

        let result = Fetcher::<PriceQuery>::fetch(&client(&server.url()), &PriceQuery::new("ZZZZ")).await;
        let quote = result.into_result().unwrap();
        assert!(!PriceQuery::is_usable(&quote));
    }

    #[tokio::test]
    async fn test_news_sorted_and_limited() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/news")
            .match_query(Matcher::UrlEncoded("category".into(), "general".into()))
            .with_status(200)
            .with_body(
                r#"[
                    {"category":"top news","datetime":1718000000,"headline":"Older","id":1,"image":"","related":"","source":"Reuters","summary":"","url":"https://n.test/1"},
                    {"category":"top news","datetime":1718003600,"headline":"Newest","id":2,"image":"","related":"AAPL,MSFT","source":"CNBC","summary":"Tech rallies","url":"https://n.test/2"},
                    {"category":"top news","datetime":1717990000,"headline":"Oldest","id":3,"image":"","related":"","source":"MarketWatch","summary":"","url":"https://n.test/3"}
                ]"#,
            )
            .create_async()
            .await;

        let articles = client(&server.url()).get_news("general", 2).await.unwrap();
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].headline, "Newest");
        assert_eq!(articles[0].tickers, vec!["AAPL".to_string(), "MSFT".to_string()]);
        assert_eq!(articles[0].summary.as_deref(), Some("Tech rallies"));
        assert_eq!(articles[1].headline, "Older");
        assert!(articles[1].summary.is_none());
    }

    #[tokio::test]
    async fn test_social_sentiment_collapsed_to_days() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/stock/social-sentiment")
            .match_query(Matcher::UrlEncoded("symbol".into(), "TSLA".into()))
            .with_status(200)
            .with_body(
                r#"{"symbol":"TSLA",
                    "reddit":[{"atTime":"2024-05-01 10:00:00","mention":10,"score":0.5},
                              {"atTime":"2024-05-02 10:00:00","mention":5,"score":-0.1}],
                    "twitter":[{"atTime":"2024-05-01 15:00:00","mention":30,"score":0.1},
                               {"atTime":"not a time","mention":3,"score":0.9}]}"#,
            )
            .create_async()
            .await;

        let series = client(&server.url()).get_social_sentiment("tsla", 7).await.unwrap();
        assert_eq!(series.symbol, "TSLA");
        assert_eq!(series.samples.len(), 2);
        assert_eq!(series.samples[0].mentions, 40);
        // (0.5*10 + 0.1*30) / 40
        assert!((series.samples[0].score - 0.2).abs() < 1e-9);
        assert!((series.samples[1].score + 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_rate_limited_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/quote")
            .match_query(Matcher::Any)
            .with_status(429)
            .create_async()
            .await;

        let err = client(&server.url()).get_quote("AAPL").await.unwrap_err();
        assert_eq!(
            err,
            FetchError::provider_error(Source::Finnhub, "rate limited (HTTP 429)")
        );
    }
}
