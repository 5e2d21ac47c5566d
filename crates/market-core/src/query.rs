use std::fmt::Debug;

use crate::{normalize_symbol, Article, QueryKey, Quote, SentimentSeries};

/// A logical request that a [`Fetcher`](crate::Fetcher) can answer.
///
/// `is_usable` is the minimal sanity check the waterfall applies before it
/// accepts a provider's answer.
pub trait Query: Debug + Send + Sync {
    type Output: Clone + Default + Send + Sync + 'static;

    fn key(&self) -> QueryKey;

    fn is_usable(output: &Self::Output) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceQuery {
    pub symbol: String,
}

impl PriceQuery {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: normalize_symbol(symbol),
        }
    }
}

impl Query for PriceQuery {
    type Output = Quote;

    fn key(&self) -> QueryKey {
        QueryKey::price(&self.symbol)
    }

    fn is_usable(quote: &Quote) -> bool {
        quote.last.is_finite() && quote.last > 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsQuery {
    /// Provider news category, "general" for broad market news
    pub category: String,
    pub limit: usize,
}

impl NewsQuery {
    pub fn market(limit: usize) -> Self {
        Self {
            category: "general".to_string(),
            limit,
        }
    }
}

impl Query for NewsQuery {
    type Output = Vec<Article>;

    fn key(&self) -> QueryKey {
        QueryKey::news(&self.category)
    }

    fn is_usable(articles: &Vec<Article>) -> bool {
        !articles.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentimentQuery {
    pub symbol: String,
    /// How many days of history to request
    pub lookback_days: u32,
}

impl SentimentQuery {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: normalize_symbol(symbol),
            lookback_days: 7,
        }
    }
}

impl Query for SentimentQuery {
    type Output = SentimentSeries;

    fn key(&self) -> QueryKey {
        QueryKey::sentiment(&self.symbol)
    }

    fn is_usable(series: &SentimentSeries) -> bool {
        !series.samples.is_empty()
    }
}
