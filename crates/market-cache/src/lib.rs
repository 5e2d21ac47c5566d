//! Multi-source market-data cache.
//!
//! Reads go through [`MarketCache`]: each data class is cached under its own
//! refresh schedule, refreshed single-flight through an ordered provider
//! waterfall, and served stale when every provider is down.

pub mod batch;
pub mod clock;
pub mod config;
pub mod facade;
pub mod refresh;
pub mod schedule;
pub mod sentiment;
pub mod signals;
pub mod ttl_cache;
pub mod waterfall;

#[cfg(test)]
mod testing;

pub use batch::{BatchConfig, BatchItem, BatchItemError, BatchRunner};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use facade::{
    HealthStatus, IndexLevel, KeyState, MarketCache, NewsDigest, PricePoint, PriceSnapshot,
    ProviderSet, ProviderStatus, QuoteView, TickerFailure, TickerQuote, MARKET_INDICES,
};
pub use refresh::{RefreshController, RefreshOutcome, RefreshState, Served};
pub use schedule::RefreshSchedule;
pub use sentiment::{SentimentSummary, SentimentWindow};
pub use ttl_cache::{CacheEntry, TtlCache};
pub use waterfall::Waterfall;
