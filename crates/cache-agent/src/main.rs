use std::time::{Duration, Instant};

use anyhow::Result;
use market_cache::{CacheConfig, MarketCache};
use tokio::signal::unix::SignalKind;
use tokio::time;

mod metrics;

use metrics::CycleMetrics;

/// Articles logged per cycle
const NEWS_HEADLINES: usize = 5;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    // Panic hook: log panic info before crashing
    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting market cache agent");

    // 2. Load configuration
    let config = CacheConfig::from_env()?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  Watchlist: {} tickers", config.watchlist.len());
    tracing::info!("  Price TTL: {}s", config.price_ttl.num_seconds());
    tracing::info!(
        "  News hours: {:?} ({})",
        config.news_update_hours,
        config.news_timezone
    );
    tracing::info!(
        "  Batches: {} tickers, {} workers, {}s per ticker",
        config.batch.batch_size,
        config.batch.max_parallel,
        config.batch.per_item_timeout.as_secs()
    );
    tracing::info!("  Poll interval: {}s", config.poll_interval.as_secs());

    // 3. Build the cache and report which providers can be used
    let cache = MarketCache::new(config.clone());
    let providers = cache.provider_status();
    for status in &providers {
        tracing::info!(
            "  Provider {}: {} (serves {:?})",
            status.source,
            if status.configured { "configured" } else { "no API key" },
            status.serves
        );
    }
    if providers.iter().all(|p| !p.configured) {
        tracing::warn!("No provider API keys set; every read will come back empty");
    }

    let log_interval_cycles: u64 = std::env::var("METRICS_LOG_INTERVAL_CYCLES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10);
    let mut cycle_metrics = CycleMetrics::new(log_interval_cycles);

    // Main loop with graceful shutdown (SIGINT + SIGTERM)
    let mut interval = time::interval(config.poll_interval);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    let shutdown = async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_cycle(&cache, &config, &mut cycle_metrics).await;
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received, waiting for in-flight refreshes...");
                if time::timeout(Duration::from_secs(15), cache.wait_for_refreshes()).await.is_err() {
                    tracing::warn!("Refreshes still running after 15s, exiting anyway");
                }
                cycle_metrics.log_metrics();
                break;
            }
        }
    }

    tracing::info!("Market cache agent shut down.");
    Ok(())
}

/// One pass over every data class. Each read decides for itself whether a refresh is due.
async fn run_cycle(cache: &MarketCache, config: &CacheConfig, metrics: &mut CycleMetrics) {
    let cycle_start = Instant::now();

    let snapshot = cache.get_price_snapshot(&config.watchlist).await;
    metrics.record_snapshot(&snapshot);
    tracing::info!(
        "Prices: {} tickers, {} failed, {:?} via {}",
        snapshot.points.len(),
        snapshot.failures.len(),
        snapshot.state,
        snapshot.source
    );
    if let Some(error) = &snapshot.error {
        tracing::warn!("Price snapshot degraded: {}", error);
    }
    for point in snapshot.points.iter().filter(|p| p.signal != "HOLD") {
        tracing::debug!(
            "  {} {:.2} ({:+.2}%) {} / {}",
            point.symbol,
            point.last,
            point.change_pct,
            point.signal,
            point.strategy
        );
    }

    let overview = cache.get_market_overview().await;
    for index in &overview {
        match (index.last, index.change_pct) {
            (Some(last), Some(change)) if index.available => {
                tracing::info!("  {} ({}): {:.2} ({:+.2}%)", index.name, index.symbol, last, change);
            }
            _ => tracing::info!("  {} ({}): unavailable", index.name, index.symbol),
        }
    }

    let news = cache.get_market_news(NEWS_HEADLINES).await;
    metrics.record_news(&news);
    tracing::info!(
        "News: {} articles, {:?}, next update {}",
        news.articles.len(),
        news.state,
        news.next_scheduled_update
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "none".to_string())
    );
    if let Some(error) = &news.error {
        tracing::warn!("News degraded: {}", error);
    }

    for ticker in &config.sentiment_tickers {
        let summary = cache.get_sentiment(ticker).await;
        metrics.record_sentiment(&summary);
        tracing::debug!(
            "Sentiment {}: daily {:.2} ({}), weekly {:.2} ({}), change {:+.1}%",
            summary.symbol,
            summary.daily.score,
            summary.daily.label,
            summary.weekly.score,
            summary.weekly.label,
            summary.weekly_change_pct
        );
    }

    let swept = cache.sweep();
    if swept > 0 {
        tracing::debug!("Swept {} expired entries", swept);
    }

    let health = cache.health();
    match serde_json::to_string(&health) {
        Ok(json) => tracing::info!("Health: {}", json),
        Err(e) => tracing::warn!("Failed to serialize health status: {}", e),
    }

    metrics.finish_cycle(cycle_start);
}
