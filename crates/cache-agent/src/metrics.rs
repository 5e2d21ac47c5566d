use market_cache::{NewsDigest, PriceSnapshot, RefreshState, SentimentSummary};
use std::time::Instant;

/// Running counters for the refresh loop, logged every `log_interval_cycles`.
pub struct CycleMetrics {
    pub cycles_run: u64,
    pub tickers_served: u64,
    pub ticker_failures: u64,
    /// Reads answered from a value whose refresh was due or had failed
    pub stale_reads: u64,
    /// Reads that had nothing to serve
    pub empty_reads: u64,
    pub last_cycle_duration_ms: u64,
    log_interval_cycles: u64,
}

impl CycleMetrics {
    pub fn new(log_interval_cycles: u64) -> Self {
        Self {
            cycles_run: 0,
            tickers_served: 0,
            ticker_failures: 0,
            stale_reads: 0,
            empty_reads: 0,
            last_cycle_duration_ms: 0,
            log_interval_cycles,
        }
    }

    pub fn record_snapshot(&mut self, snapshot: &PriceSnapshot) {
        self.tickers_served += snapshot.points.len() as u64;
        self.ticker_failures += snapshot.failures.len() as u64;
        self.record_state(snapshot.state, snapshot.fetched_at.is_some());
    }

    pub fn record_news(&mut self, digest: &NewsDigest) {
        self.record_state(digest.state, digest.last_updated.is_some());
    }

    pub fn record_sentiment(&mut self, summary: &SentimentSummary) {
        self.record_state(summary.state, summary.fetched_at.is_some());
    }

    fn record_state(&mut self, state: RefreshState, has_value: bool) {
        if !has_value {
            self.empty_reads += 1;
        } else if state != RefreshState::Fresh {
            self.stale_reads += 1;
        }
    }

    pub fn finish_cycle(&mut self, cycle_start: Instant) {
        self.last_cycle_duration_ms = cycle_start.elapsed().as_millis() as u64;
        self.cycles_run += 1;

        if self.log_interval_cycles > 0 && self.cycles_run % self.log_interval_cycles == 0 {
            self.log_metrics();
        }
    }

    /// Share of ticker lookups that produced a price (0-100%)
    pub fn ticker_success_rate(&self) -> f64 {
        let total = self.tickers_served + self.ticker_failures;
        if total == 0 {
            return 0.0;
        }
        (self.tickers_served as f64 / total as f64) * 100.0
    }

    pub fn log_metrics(&self) {
        tracing::info!(
            cycles = self.cycles_run,
            tickers_served = self.tickers_served,
            ticker_failures = self.ticker_failures,
            ticker_success_rate = format!("{:.1}%", self.ticker_success_rate()),
            stale_reads = self.stale_reads,
            empty_reads = self.empty_reads,
            last_cycle_ms = self.last_cycle_duration_ms,
            "Cache agent metrics summary"
        );
    }
}
