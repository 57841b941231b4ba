//! Parallel batch processing with bounded concurrency, retry and skip policy.

use crate::backoff::Backoff;
use crate::error::{panic_message, WorkflowError};
use crate::item::{elapsed_ms, BatchResult, ProcessedItem};
use crate::status::ItemStatus;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

type ItemFuture<R> = BoxFuture<'static, Result<R, String>>;
type Operation<T, R> = Arc<dyn Fn(T) -> ItemFuture<R> + Send + Sync>;
type SkipCondition<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
type ItemCallback<T, R> = Arc<dyn Fn(&ProcessedItem<T, R>) + Send + Sync>;
type BatchCallback = Arc<dyn Fn(usize, usize, usize) + Send + Sync>;

/// Sizing and retry settings of a [`BatchProcessor`].
///
/// `max_retries` is the total number of attempts per item, not the number
/// of retries after the first attempt.
///
/// ```
/// use bulkflow::{Backoff, BatchConfig};
/// use std::time::Duration;
///
/// let config = BatchConfig {
///     batch_size: 50,
///     max_workers: 8,
///     ..BatchConfig::default()
/// };
/// assert_eq!(config.max_retries, 3);
/// assert_eq!(config.backoff, Backoff::linear(Duration::from_secs(1)));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub max_workers: usize,
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_workers: 4,
            max_retries: 3,
            backoff: Backoff::default(),
        }
    }
}

impl BatchConfig {
    /// Rejects zero sizes and zero attempts.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.batch_size == 0 {
            return Err(WorkflowError::Configuration(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_workers == 0 {
            return Err(WorkflowError::Configuration(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(WorkflowError::Configuration(
                "max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of chunks `len` items are split into.
    pub fn chunk_count(&self, len: usize) -> usize {
        len.div_ceil(self.batch_size.max(1))
    }
}

/// Applies one async unit operation to many independent items.
///
/// Items are split into chunks of `batch_size`. Chunks run one after the
/// other; within a chunk up to `max_workers` items are in flight. Every chunk
/// gets its own worker pool, so a slow chunk never borrows capacity from the
/// next one.
///
/// # Examples
///
/// ```
/// use bulkflow::BatchProcessor;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let processor = BatchProcessor::builder(|n: u32| async move {
///     if n % 5 == 0 {
///         Err(format!("{} is rejected", n))
///     } else {
///         Ok(n * 2)
///     }
/// })
/// .batch_size(4)
/// .max_workers(2)
/// .max_retries(2)
/// .retry_delay(Duration::from_millis(1))
/// .skip_if(|n: &u32| *n == 7)
/// .build()
/// .expect("valid config");
///
/// let result = processor.process((1..=10).collect()).await;
/// assert_eq!(result.total, 10);
/// assert_eq!(result.failed, 2);
/// assert_eq!(result.skipped, 1);
/// assert_eq!(result.succeeded, 7);
/// # }
/// ```
pub struct BatchProcessor<T, R> {
    operation: Operation<T, R>,
    config: BatchConfig,
    skip_condition: Option<SkipCondition<T>>,
    on_item_complete: Option<ItemCallback<T, R>>,
    on_batch_complete: Option<BatchCallback>,
}

impl<T, R> fmt::Debug for BatchProcessor<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("config", &self.config)
            .field("skip_condition", &self.skip_condition.is_some())
            .field("on_item_complete", &self.on_item_complete.is_some())
            .field("on_batch_complete", &self.on_batch_complete.is_some())
            .finish()
    }
}

impl<T, R> BatchProcessor<T, R>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    /// Starts configuring a processor around `operation`.
    ///
    /// An `Err` from the operation counts as a failed attempt; its `Display`
    /// text is what ends up in [`ProcessedItem::error`]. A panic inside the
    /// operation is treated the same way.
    pub fn builder<F, Fut, E>(operation: F) -> BatchProcessorBuilder<T, R>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let operation: Operation<T, R> = Arc::new(move |item: T| -> ItemFuture<R> {
            let attempt = operation(item);
            Box::pin(async move { attempt.await.map_err(|e| e.to_string()) })
        });
        BatchProcessorBuilder {
            operation,
            config: BatchConfig::default(),
            skip_condition: None,
            on_item_complete: None,
            on_batch_complete: None,
        }
    }

    /// Returns the validated configuration
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Processes every item and returns the aggregated outcome.
    ///
    /// Per-item failures never surface as errors; they are recorded in the
    /// returned [`BatchResult`].
    pub async fn process(&self, items: Vec<T>) -> BatchResult<T, R> {
        self.run(items, self.on_item_complete.clone()).await
    }

    /// Like [`process`](Self::process), reporting `(completed, total)` to
    /// `progress` after each item instead of calling the configured item
    /// callback. The configured callback applies again to later calls.
    pub async fn process_with_progress<P>(&self, items: Vec<T>, progress: P) -> BatchResult<T, R>
    where
        P: Fn(usize, usize) + Send + Sync + 'static,
    {
        let total = items.len();
        let completed = AtomicUsize::new(0);
        let reporter: ItemCallback<T, R> = Arc::new(move |_item: &ProcessedItem<T, R>| {
            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            progress(done, total);
        });
        self.run(items, Some(reporter)).await
    }

    async fn run(
        &self,
        items: Vec<T>,
        on_item_complete: Option<ItemCallback<T, R>>,
    ) -> BatchResult<T, R> {
        let started = Instant::now();
        let total_items = items.len();
        let total_batches = self.config.chunk_count(total_items);
        let mut processed = Vec::with_capacity(total_items);
        let mut errors = Vec::new();

        info!(
            "Processing {} items in {} batches ({} workers, batch size {})",
            total_items, total_batches, self.config.max_workers, self.config.batch_size
        );

        let mut remaining = items.into_iter();
        for batch_num in 1..=total_batches {
            let chunk: Vec<T> = remaining.by_ref().take(self.config.batch_size).collect();
            let chunk_len = chunk.len();
            let chunk_started = Instant::now();

            let (chunk_items, chunk_errors) = self.run_chunk(chunk, &on_item_complete).await;

            let succeeded = chunk_items.iter().filter(|i| i.is_success()).count();
            let failed = chunk_items
                .iter()
                .filter(|i| i.status == ItemStatus::Failed)
                .count();
            info!(
                batch = batch_num,
                "Batch {}/{}: {} succeeded, {} failed ({}ms)",
                batch_num,
                total_batches,
                succeeded,
                failed,
                elapsed_ms(chunk_started)
            );

            processed.extend(chunk_items);
            errors.extend(chunk_errors);

            if let Some(callback) = &self.on_batch_complete {
                let callback = AssertUnwindSafe(|| callback(batch_num, total_batches, chunk_len));
                if let Err(panic) = std::panic::catch_unwind(callback) {
                    warn!("Batch callback error: {}", panic_message(panic.as_ref()));
                }
            }
        }

        BatchResult::from_items(processed, errors, elapsed_ms(started))
    }

    /// Drains one chunk through a fresh worker pool. Results arrive in
    /// completion order.
    async fn run_chunk(
        &self,
        chunk: Vec<T>,
        on_item_complete: &Option<ItemCallback<T, R>>,
    ) -> (Vec<ProcessedItem<T, R>>, Vec<String>) {
        let pool = Arc::new(Semaphore::new(self.config.max_workers));
        let worker = Arc::new(ItemWorker {
            operation: Arc::clone(&self.operation),
            skip_condition: self.skip_condition.clone(),
            on_item_complete: on_item_complete.clone(),
            max_retries: self.config.max_retries,
            backoff: self.config.backoff.clone(),
        });

        let mut tasks = JoinSet::new();
        for item in chunk {
            let pool = Arc::clone(&pool);
            let worker = Arc::clone(&worker);
            tasks.spawn(async move {
                // The pool is never closed, so acquiring only waits for a free slot.
                let _permit = pool.acquire_owned().await;
                worker.process(item).await
            });
        }

        let mut items = Vec::new();
        let mut errors = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(item) => {
                    if let Some(message) = &item.error {
                        errors.push(format!("Item failed: {}", message));
                    }
                    items.push(item);
                }
                Err(e) => {
                    error!("Batch worker task failed: {}", e);
                    errors.push(format!("Worker task failed: {}", e));
                }
            }
        }
        (items, errors)
    }
}

/// Per-chunk worker state shared by all tasks of that chunk.
struct ItemWorker<T, R> {
    operation: Operation<T, R>,
    skip_condition: Option<SkipCondition<T>>,
    on_item_complete: Option<ItemCallback<T, R>>,
    max_retries: u32,
    backoff: Backoff,
}

impl<T, R> ItemWorker<T, R>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    async fn process(&self, item: T) -> ProcessedItem<T, R> {
        let processed = self.attempt(item).await;
        if let Some(callback) = &self.on_item_complete {
            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| callback(&processed)))
            {
                warn!("Item callback error: {}", panic_message(panic.as_ref()));
            }
        }
        processed
    }

    async fn attempt(&self, item: T) -> ProcessedItem<T, R> {
        let started = Instant::now();

        if let Some(skip) = &self.skip_condition {
            match std::panic::catch_unwind(AssertUnwindSafe(|| skip(&item))) {
                Ok(true) => return ProcessedItem::skipped(item),
                Ok(false) => {}
                Err(panic) => {
                    let message = format!("skip condition {}", panic_message(panic.as_ref()));
                    return ProcessedItem::failed(item, message, 0, elapsed_ms(started));
                }
            }
        }

        let mut last_error = String::new();
        for attempt in 1..=self.max_retries {
            let call = AssertUnwindSafe(async { (self.operation)(item.clone()).await });
            match call.catch_unwind().await {
                Ok(Ok(value)) => {
                    return ProcessedItem::success(item, value, attempt, elapsed_ms(started));
                }
                Ok(Err(message)) => last_error = message,
                Err(panic) => last_error = panic_message(panic.as_ref()),
            }

            debug!(
                attempt,
                max_retries = self.max_retries,
                error = %last_error,
                "Item attempt failed"
            );
            if attempt < self.max_retries {
                let delay = self.backoff.delay_for_attempt(attempt);
                if delay > Duration::ZERO {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        ProcessedItem::failed(item, last_error, self.max_retries, elapsed_ms(started))
    }
}

/// Builder for [`BatchProcessor`].
pub struct BatchProcessorBuilder<T, R> {
    operation: Operation<T, R>,
    config: BatchConfig,
    skip_condition: Option<SkipCondition<T>>,
    on_item_complete: Option<ItemCallback<T, R>>,
    on_batch_complete: Option<BatchCallback>,
}

impl<T, R> BatchProcessorBuilder<T, R>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    /// Replaces all sizing and retry settings at once.
    pub fn config(mut self, config: BatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the number of items per chunk
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    /// Sets how many items of a chunk run at once
    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.config.max_workers = max_workers;
        self
    }

    /// Total attempts per item.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Linear backoff: waits `delay * attempt` after each failed attempt.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.backoff = Backoff::linear(delay);
        self
    }

    /// Sets the delay strategy between attempts
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Items matching `condition` are recorded as skipped and never processed.
    pub fn skip_if<F>(mut self, condition: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.skip_condition = Some(Arc::new(condition));
        self
    }

    /// Called on the worker task as soon as an item is finalized.
    pub fn on_item_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ProcessedItem<T, R>) + Send + Sync + 'static,
    {
        self.on_item_complete = Some(Arc::new(callback));
        self
    }

    /// Called once per drained chunk with `(chunk_number, total_chunks, chunk_len)`.
    /// Chunk numbers start at 1.
    pub fn on_batch_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, usize, usize) + Send + Sync + 'static,
    {
        self.on_batch_complete = Some(Arc::new(callback));
        self
    }

    /// Validates the configuration and builds the processor
    pub fn build(self) -> Result<BatchProcessor<T, R>, WorkflowError> {
        self.config.validate()?;
        Ok(BatchProcessor {
            operation: self.operation,
            config: self.config,
            skip_condition: self.skip_condition,
            on_item_complete: self.on_item_complete,
            on_batch_complete: self.on_batch_complete,
        })
    }
}

/// One-shot processing with default retry settings.
pub async fn batch_process<T, R, F, Fut, E>(
    items: Vec<T>,
    operation: F,
    batch_size: usize,
    max_workers: usize,
) -> Result<BatchResult<T, R>, WorkflowError>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let processor = BatchProcessor::builder(operation)
        .batch_size(batch_size)
        .max_workers(max_workers)
        .build()?;
    Ok(processor.process(items).await)
}
