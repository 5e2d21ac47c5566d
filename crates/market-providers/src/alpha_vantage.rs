use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime, Utc};
use market_core::{
    normalize_symbol, Article, FetchError, FetchResult, Fetcher, NewsQuery, PriceQuery, Quote,
    SentimentObservation, SentimentQuery, SentimentSeries, Source,
};
use serde_json::Value;

use crate::http::ProviderHttp;
use crate::ProviderSettings;

const BASE_URL: &str = "https://www.alphavantage.co";
const TIME_FORMAT: &str = "%Y%m%dT%H%M%S";

/// Alpha Vantage: last-resort quote and news source, secondary sentiment source.
///
/// The free tier is heavily rate limited and reports throttling as HTTP 200
/// with a "Note" or "Information" body, so every payload is checked for those first.
#[derive(Clone)]
pub struct AlphaVantageClient {
    http: ProviderHttp,
}

impl AlphaVantageClient {
    pub fn new(settings: &ProviderSettings) -> Self {
        Self {
            http: ProviderHttp::new(Source::AlphaVantage, settings, BASE_URL),
        }
    }

    async fn query(&self, params: &[(&str, String)]) -> Result<Value, FetchError> {
        let api_key = self.http.api_key()?;
        let mut query = params.to_vec();
        query.push(("apikey", api_key.to_string()));

        let json: Value = self.http.get_json("/query", &query).await?;

        if let Some(error) = json.get("Error Message") {
            return Err(self.http.error(format!("Alpha Vantage error: {}", error)));
        }

        if let Some(note) = json.get("Note").or_else(|| json.get("Information")) {
            return Err(self.http.error(format!("Alpha Vantage rate limit: {}", note)));
        }

        Ok(json)
    }

    pub async fn get_global_quote(&self, symbol: &str) -> Result<Quote, FetchError> {
        let symbol = normalize_symbol(symbol);
        let json = self
            .query(&[
                ("function", "GLOBAL_QUOTE".to_string()),
                ("symbol", symbol.clone()),
            ])
            .await?;

        let quote = json
            .get("Global Quote")
            .filter(|q| q.as_object().map(|o| !o.is_empty()).unwrap_or(false))
            .ok_or_else(|| self.http.error(format!("no quote data for {}", symbol)))?;

        let field = |name: &str| -> Option<f64> {
            quote
                .get(name)
                .and_then(|v| v.as_str())
                .and_then(|s| s.trim().trim_end_matches('%').parse::<f64>().ok())
        };

        Ok(Quote {
            symbol,
            last: field("05. price").unwrap_or(0.0),
            change: field("09. change").unwrap_or(0.0),
            change_pct: field("10. change percent").unwrap_or(0.0),
            open: field("02. open"),
            high: field("03. high"),
            low: field("04. low"),
            previous_close: field("08. previous close"),
        })
    }

    /// Ticker-specific news sentiment, one observation per article mentioning the ticker
    pub async fn get_news_sentiment(
        &self,
        symbol: &str,
        lookback_days: u32,
    ) -> Result<SentimentSeries, FetchError> {
        let symbol = normalize_symbol(symbol);
        let time_from = Utc::now() - Duration::days(i64::from(lookback_days.max(1)));

        let json = self
            .query(&[
                ("function", "NEWS_SENTIMENT".to_string()),
                ("tickers", symbol.clone()),
                ("time_from", time_from.format("%Y%m%dT%H%M").to_string()),
                ("limit", "200".to_string()),
            ])
            .await?;

        let feed = feed_items(&json);
        let observations = feed.iter().filter_map(|item| {
            let at = parse_time(item.get("time_published")?.as_str()?)?;
            let score = item
                .get("ticker_sentiment")?
                .as_array()?
                .iter()
                .find(|t| t.get("ticker").and_then(|v| v.as_str()) == Some(symbol.as_str()))?
                .get("ticker_sentiment_score")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<f64>().ok())?;
            Some(SentimentObservation {
                at,
                score,
                mentions: 1,
            })
        });

        Ok(SentimentSeries::from_observations(&symbol, observations))
    }

    /// Latest financial-markets headlines from the news-sentiment feed
    pub async fn get_market_news(&self, limit: usize) -> Result<Vec<Article>, FetchError> {
        let json = self
            .query(&[
                ("function", "NEWS_SENTIMENT".to_string()),
                ("topics", "financial_markets".to_string()),
                ("sort", "LATEST".to_string()),
                ("limit", limit.max(1).to_string()),
            ])
            .await?;

        let mut articles: Vec<Article> = feed_items(&json)
            .iter()
            .filter_map(|item| {
                let url = item.get("url")?.as_str()?.to_string();
                Some(Article {
                    id: url.clone(),
                    headline: item.get("title")?.as_str()?.to_string(),
                    summary: item
                        .get("summary")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                    publisher: item.get("source").and_then(|v| v.as_str()).map(String::from),
                    url,
                    published_at: parse_time(item.get("time_published")?.as_str()?)?,
                    tickers: item
                        .get("ticker_sentiment")
                        .and_then(|v| v.as_array())
                        .map(|arr| {
                            arr.iter()
                                .filter_map(|t| t.get("ticker").and_then(|v| v.as_str()))
                                .map(normalize_symbol)
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
}

fn feed_items(json: &Value) -> Vec<Value> {
    json.get("feed")
        .and_then(|f| f.as_array())
        .cloned()
        .unwrap_or_default()
}

fn parse_time(raw: &str) -> Option<chrono::DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, TIME_FORMAT)
        .ok()
        .map(|dt| dt.and_utc())
}

#[async_trait]
impl Fetcher<PriceQuery> for AlphaVantageClient {
    fn source(&self) -> Source {
        self.http.source()
    }

    fn is_configured(&self) -> bool {
        self.http.is_configured()
    }

    async fn fetch(&self, query: &PriceQuery) -> FetchResult<Quote> {
        FetchResult::from_result(
            Source::AlphaVantage,
            self.get_global_quote(&query.symbol).await,
        )
    }
}

#[async_trait]
impl Fetcher<NewsQuery> for AlphaVantageClient {
    fn source(&self) -> Source {
        self.http.source()
    }

    fn is_configured(&self) -> bool {
        self.http.is_configured()
    }

    async fn fetch(&self, query: &NewsQuery) -> FetchResult<Vec<Article>> {
        FetchResult::from_result(Source::AlphaVantage, self.get_market_news(query.limit).await)
    }
}

#[async_trait]
impl Fetcher<SentimentQuery> for AlphaVantageClient {
    fn source(&self) -> Source {
        self.http.source()
    }

    fn is_configured(&self) -> bool {
        self.http.is_configured()
    }

    async fn fetch(&self, query: &SentimentQuery) -> FetchResult<SentimentSeries> {
        FetchResult::from_result(
            Source::AlphaVantage,
            self.get_news_sentiment(&query.symbol, query.lookback_days)
                .await,
        )
    }
}
