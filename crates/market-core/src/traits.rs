use async_trait::async_trait;

use crate::{FetchResult, Query, Source};

/// One upstream provider able to answer queries of type `Q`.
///
/// Implementations perform a single bounded network call per `fetch` and never
/// cache. Every failure is reported inside the returned [`FetchResult`].
#[async_trait]
pub trait Fetcher<Q: Query>: Send + Sync {
    fn source(&self) -> Source;

    /// False when the provider has no credential; the waterfall skips it without a call.
    fn is_configured(&self) -> bool;

    async fn fetch(&self, query: &Q) -> FetchResult<Q::Output>;
}
