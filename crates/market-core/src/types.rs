use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Where a value came from. `Fallback` means no provider produced usable data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Polygon,
    Finnhub,
    AlphaVantage,
    Fallback,
}

impl Source {
    pub fn name(&self) -> &'static str {
        match self {
            Source::Polygon => "polygon",
            Source::Finnhub => "finnhub",
            Source::AlphaVantage => "alpha_vantage",
            Source::Fallback => "fallback",
        }
    }

    /// False only for `Fallback`; fallback values must never be treated as market data.
    pub fn is_live(&self) -> bool {
        !matches!(self, Source::Fallback)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Data class half of a cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataClass {
    /// Single ticker quote
    Price,
    /// Aggregate quote list for a watchlist
    Snapshot,
    News,
    Sentiment,
}

impl DataClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataClass::Price => "PRICE",
            DataClass::Snapshot => "SNAPSHOT",
            DataClass::News => "NEWS",
            DataClass::Sentiment => "SENTIMENT",
        }
    }
}

/// Composite cache key: (data class, identifier).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryKey {
    pub class: DataClass,
    pub id: String,
}

impl QueryKey {
    pub fn new(class: DataClass, id: impl Into<String>) -> Self {
        Self {
            class,
            id: id.into(),
        }
    }

    pub fn price(symbol: &str) -> Self {
        Self::new(DataClass::Price, normalize_symbol(symbol))
    }

    pub fn news(category: &str) -> Self {
        Self::new(DataClass::News, category.trim().to_lowercase())
    }

    pub fn sentiment(symbol: &str) -> Self {
        Self::new(DataClass::Sentiment, normalize_symbol(symbol))
    }

    /// Order-insensitive key for an aggregate over a ticker set.
    pub fn snapshot(symbols: &[String]) -> Self {
        Self::new(DataClass::Snapshot, normalize_symbols(symbols).join(","))
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class.as_str(), self.id)
    }
}

pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// Uppercased, sorted, de-duplicated, blanks dropped.
pub fn normalize_symbols(symbols: &[String]) -> Vec<String> {
    let mut out: Vec<String> = symbols
        .iter()
        .map(|s| normalize_symbol(s))
        .filter(|s| !s.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

/// Latest quote for a ticker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub last: f64,
    pub change: f64,
    pub change_pct: f64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub previous_close: Option<f64>,
}

/// News article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub headline: String,
    pub summary: Option<String>,
    pub publisher: Option<String>,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub tickers: Vec<String>,
}

/// One raw sentiment reading as reported by a provider
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentimentObservation {
    pub at: DateTime<Utc>,
    pub score: f64,
    pub mentions: u64,
}

/// Sentiment aggregated to one calendar day (UTC)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentSample {
    pub date: NaiveDate,
    /// -1.0 (bearish) to 1.0 (bullish)
    pub score: f64,
    pub mentions: u64,
}

/// Daily sentiment history for a ticker, oldest first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SentimentSeries {
    pub symbol: String,
    pub samples: Vec<SentimentSample>,
}

impl SentimentSeries {
    /// Collapse raw observations into one sample per day.
    ///
    /// The daily score is mention-weighted; days where every observation has
    /// zero mentions fall back to the plain mean.
    pub fn from_observations(
        symbol: &str,
        observations: impl IntoIterator<Item = SentimentObservation>,
    ) -> Self {
        // date -> (weighted sum, mentions, plain sum, count)
        let mut days: BTreeMap<NaiveDate, (f64, u64, f64, usize)> = BTreeMap::new();
        for obs in observations {
            if !obs.score.is_finite() {
                continue;
            }
            let day = days.entry(obs.at.date_naive()).or_insert((0.0, 0, 0.0, 0));
            day.0 += obs.score * obs.mentions as f64;
            day.1 += obs.mentions;
            day.2 += obs.score;
            day.3 += 1;
        }

        let samples = days
            .into_iter()
            .map(|(date, (weighted, mentions, plain, count))| SentimentSample {
                date,
                score: if mentions > 0 {
                    weighted / mentions as f64
                } else {
                    plain / count as f64
                },
                mentions,
            })
            .collect();

        Self {
            symbol: normalize_symbol(symbol),
            samples,
        }
    }

    pub fn latest(&self) -> Option<&SentimentSample> {
        self.samples.last()
    }
}
