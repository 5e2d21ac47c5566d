use market_core::{FetchError, FetchResult, Fetcher, Query, Source};
use std::sync::Arc;

/// Ordered provider chain for one query type. The first usable answer wins.
pub struct Waterfall<Q: Query> {
    providers: Vec<Arc<dyn Fetcher<Q>>>,
}

impl<Q: Query> Waterfall<Q> {
    pub fn new(providers: Vec<Arc<dyn Fetcher<Q>>>) -> Self {
        Self { providers }
    }

    pub fn sources(&self) -> Vec<Source> {
        self.providers.iter().map(|p| p.source()).collect()
    }

    /// Each provider in order with whether it has a credential.
    pub fn status(&self) -> Vec<(Source, bool)> {
        self.providers
            .iter()
            .map(|p| (p.source(), p.is_configured()))
            .collect()
    }

    pub fn configured_sources(&self) -> Vec<Source> {
        self.providers
            .iter()
            .filter(|p| p.is_configured())
            .map(|p| p.source())
            .collect()
    }

    /// Try each configured provider in order.
    ///
    /// Unconfigured providers are skipped without a call. A provider's answer
    /// is accepted only when it passes [`Query::is_usable`]. When nothing
    /// qualifies the result is tagged `Source::Fallback` and carries every
    /// attempt's error.
    pub async fn fetch(&self, query: &Q) -> FetchResult<Q::Output> {
        let key = query.key();
        let mut attempts = Vec::with_capacity(self.providers.len());

        for provider in &self.providers {
            let source = provider.source();

            if !provider.is_configured() {
                tracing::debug!("{} not configured, skipping for {}", source, key);
                attempts.push(FetchError::ProviderUnavailable(source));
                continue;
            }

            match provider.fetch(query).await.outcome {
                Ok(value) if Q::is_usable(&value) => {
                    if !attempts.is_empty() {
                        tracing::info!(
                            "{} served by {} after {} failed attempt(s)",
                            key,
                            source,
                            attempts.len()
                        );
                    }
                    return FetchResult::ok(source, value);
                }
                Ok(_) => {
                    tracing::warn!("{} returned unusable data for {}", source, key);
                    attempts.push(FetchError::provider_error(source, "response failed sanity check"));
                }
                Err(e) => {
                    tracing::warn!("{} failed for {}: {}", source, key, e);
                    attempts.push(e);
                }
            }
        }

        tracing::warn!("All providers exhausted for {}", key);
        FetchResult::fallback(FetchError::AllProvidersExhausted {
            query: key.to_string(),
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{quote, FakeFetcher};
    use market_core::{FetchErrorKind, PriceQuery, Quote};

    fn price_chain(
        fetchers: Vec<Arc<FakeFetcher<PriceQuery>>>,
    ) -> Waterfall<PriceQuery> {
        Waterfall::new(
            fetchers
                .into_iter()
                .map(|f| f as Arc<dyn Fetcher<PriceQuery>>)
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_falls_through_to_next_provider() {
        let primary = Arc::new(FakeFetcher::failing(Source::Polygon));
        let secondary = Arc::new(FakeFetcher::new(Source::Finnhub, |q: &PriceQuery, _| {
            Ok(quote(&q.symbol, 101.5, 1.2))
        }));
        let chain = price_chain(vec![primary.clone(), secondary.clone()]);

        let result = chain.fetch(&PriceQuery::new("AAPL")).await;

        assert_eq!(result.source, Source::Finnhub);
        assert_eq!(result.value().map(|q| q.last), Some(101.5));
        assert_eq!(primary.calls(), 1);
        assert_eq!(secondary.calls(), 1);
    }

    #[tokio::test]
    async fn test_stops_at_first_success() {
        let primary = Arc::new(FakeFetcher::new(Source::Polygon, |q: &PriceQuery, _| {
            Ok(quote(&q.symbol, 50.0, 0.0))
        }));
        let secondary = Arc::new(FakeFetcher::new(Source::Finnhub, |q: &PriceQuery, _| {
            Ok(quote(&q.symbol, 51.0, 0.0))
        }));
        let chain = price_chain(vec![primary.clone(), secondary.clone()]);

        let result = chain.fetch(&PriceQuery::new("AAPL")).await;

        assert_eq!(result.source, Source::Polygon);
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn test_unconfigured_provider_skipped_without_call() {
        let missing = Arc::new(FakeFetcher::unconfigured(Source::Polygon));
        let backup = Arc::new(FakeFetcher::new(Source::AlphaVantage, |q: &PriceQuery, _| {
            Ok(quote(&q.symbol, 10.0, 0.0))
        }));
        let chain = price_chain(vec![missing.clone(), backup]);

        let result = chain.fetch(&PriceQuery::new("IBM")).await;

        assert_eq!(result.source, Source::AlphaVantage);
        assert_eq!(missing.calls(), 0);
        assert_eq!(chain.configured_sources(), vec![Source::AlphaVantage]);
    }

    #[tokio::test]
    async fn test_unusable_answer_rejected() {
        let zeros = Arc::new(FakeFetcher::new(Source::Finnhub, |_: &PriceQuery, _| {
            Ok(Quote::default())
        }));
        let good = Arc::new(FakeFetcher::new(Source::AlphaVantage, |q: &PriceQuery, _| {
            Ok(quote(&q.symbol, 3.5, -1.0))
        }));
        let chain = price_chain(vec![zeros, good]);

        let result = chain.fetch(&PriceQuery::new("ZZZ")).await;
        assert_eq!(result.source, Source::AlphaVantage);
    }

    #[tokio::test]
    async fn test_exhausted_chain_tagged_fallback() {
        let chain = price_chain(vec![
            Arc::new(FakeFetcher::unconfigured(Source::Polygon)),
            Arc::new(FakeFetcher::failing(Source::Finnhub)),
        ]);

        let result = chain.fetch(&PriceQuery::new("AAPL")).await;

        assert_eq!(result.source, Source::Fallback);
        let err = result.error().cloned().unwrap();
        assert_eq!(err.kind(), FetchErrorKind::AllProvidersExhausted);
        match err {
            FetchError::AllProvidersExhausted { query, attempts } => {
                assert_eq!(query, "PRICE:AAPL");
                assert_eq!(attempts.len(), 2);
                assert_eq!(attempts[0], FetchError::ProviderUnavailable(Source::Polygon));
                assert_eq!(attempts[1].provider(), Source::Finnhub);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(result.value_or_default(), Quote::default());
    }
}
