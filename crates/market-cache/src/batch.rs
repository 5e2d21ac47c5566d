use market_core::FetchError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Items handed to the pool per round
    pub batch_size: usize,
    /// Workers allowed to run at once, across every caller of the runner
    pub max_parallel: usize,
    pub per_item_timeout: Duration,
    /// Pause between rounds, not after the last one
    pub inter_batch_pause: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 15,
            max_parallel: 3,
            per_item_timeout: Duration::from_secs(12),
            inter_batch_pause: Duration::from_millis(500),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BatchItemError {
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("worker aborted: {0}")]
    Aborted(String),
}

/// One input paired with its own outcome.
#[derive(Debug, Clone)]
pub struct BatchItem<I, T> {
    pub item: I,
    pub result: Result<T, BatchItemError>,
}

/// Bounded-parallelism executor for independent fetches.
///
/// The permit pool is created once and shared by every `run_batch` call made
/// through this runner or its clones.
#[derive(Clone)]
pub struct BatchRunner {
    config: BatchConfig,
    permits: Arc<Semaphore>,
}

impl BatchRunner {
    pub fn new(mut config: BatchConfig) -> Self {
        config.batch_size = config.batch_size.max(1);
        config.max_parallel = config.max_parallel.max(1);
        Self {
            permits: Arc::new(Semaphore::new(config.max_parallel)),
            config,
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Run `worker` over `items` in rounds of `batch_size`.
    ///
    /// Each item gets its own timeout and its own result; one slow or failing
    /// item never affects the others. Results come back in input order.
    pub async fn run_batch<I, T, F, Fut>(&self, items: Vec<I>, worker: F) -> Vec<BatchItem<I, T>>
    where
        I: Clone + Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let total = items.len();
        let worker = Arc::new(worker);
        let mut results: Vec<Option<Result<T, BatchItemError>>> =
            std::iter::repeat_with(|| None).take(total).collect();

        let rounds = total.div_ceil(self.config.batch_size);
        for (round, chunk) in items.chunks(self.config.batch_size).enumerate() {
            let offset = round * self.config.batch_size;
            let mut tasks = JoinSet::new();

            for (i, item) in chunk.iter().cloned().enumerate() {
                let worker = Arc::clone(&worker);
                let permits = Arc::clone(&self.permits);
                let timeout = self.config.per_item_timeout;

                tasks.spawn(async move {
                    let result = match permits.acquire_owned().await {
                        Ok(_permit) => match tokio::time::timeout(timeout, worker(item)).await {
                            Ok(Ok(value)) => Ok(value),
                            Ok(Err(e)) => Err(BatchItemError::Fetch(e)),
                            Err(_) => Err(BatchItemError::Timeout(timeout)),
                        },
                        Err(_) => Err(BatchItemError::Aborted("worker pool closed".to_string())),
                    };
                    (offset + i, result)
                });
            }

            let mut failed = 0usize;
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((idx, result)) => {
                        if result.is_err() {
                            failed += 1;
                        }
                        if let Some(slot) = results.get_mut(idx) {
                            *slot = Some(result);
                        }
                    }
                    Err(e) => {
                        failed += 1;
                        tracing::error!("Batch worker task failed: {}", e);
                    }
                }
            }

            tracing::debug!(
                "Batch {}/{} done: {} ok, {} failed",
                round + 1,
                rounds,
                chunk.len().saturating_sub(failed),
                failed
            );

            if round + 1 < rounds && !self.config.inter_batch_pause.is_zero() {
                tokio::time::sleep(self.config.inter_batch_pause).await;
            }
        }

        items
            .into_iter()
            .zip(results)
            .map(|(item, result)| BatchItem {
                item,
                result: result
                    .unwrap_or_else(|| Err(BatchItemError::Aborted("worker panicked".to_string()))),
            })
            .collect()
    }
}
