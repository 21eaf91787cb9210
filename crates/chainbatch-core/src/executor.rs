//! Adaptive batch executor.
//!
//! ```text
//! items → DynamicBatches(current batch size) → FailFastPool → worker
//!                                                              ├── handler(batch) ok        → track(len)
//!                                                              ├── transient error          → shrink, handler([item]) × len, track(len)
//!                                                              └── any other error          → latch (fatal)
//! ```
//!
//! The batch size only ever shrinks, and only when the failed batch was a
//! full-size one. The check-and-set is a single compare-and-swap so two
//! workers failing on batches of the same size shrink it once.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;

use crate::batcher::dynamic_batches;
use crate::config::ExecutorConfig;
use crate::error::ExecutorError;
use crate::fail_fast::{panic_message, FailFastPool};
use crate::handler::BatchHandler;
use crate::pool::BoundedWorkerPool;
use crate::progress::{ProgressLogger, ProgressSnapshot, ProgressTracker};

/// Counters describing what the executor has done so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutorStats {
    pub batches_submitted: u64,
    pub batches_succeeded: u64,
    pub transient_failures: u64,
    pub shrinks: u64,
    pub items_retried: u64,
    pub current_batch_size: usize,
}

/// Returned by a clean [`BatchWorkExecutor::shutdown`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub stats: ExecutorStats,
    pub progress: ProgressSnapshot,
}

#[derive(Debug, Default)]
struct Counters {
    batches_submitted: AtomicU64,
    batches_succeeded: AtomicU64,
    transient_failures: AtomicU64,
    shrinks: AtomicU64,
    items_retried: AtomicU64,
}

/// State shared between the submitting task and the workers.
struct Shared {
    config: ExecutorConfig,
    batch_size: AtomicUsize,
    progress: Arc<dyn ProgressTracker>,
    counters: Counters,
}

impl Shared {
    fn new(config: ExecutorConfig, progress: Arc<dyn ProgressTracker>) -> Self {
        Self {
            batch_size: AtomicUsize::new(config.starting_batch_size),
            config,
            progress,
            counters: Counters::default(),
        }
    }

    fn current_batch_size(&self) -> usize {
        self.batch_size.load(Ordering::Acquire)
    }

    /// Shrink the batch size if it still equals `failed_len`. Returns the new size.
    fn shrink_after(&self, failed_len: usize) -> Option<usize> {
        if failed_len <= 1 {
            return None;
        }
        let next = self.config.backoff.next(failed_len);
        self.batch_size
            .compare_exchange(failed_len, next, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.counters.shrinks.fetch_add(1, Ordering::Relaxed);
        Some(next)
    }

    fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            batches_submitted: self.counters.batches_submitted.load(Ordering::Relaxed),
            batches_succeeded: self.counters.batches_succeeded.load(Ordering::Relaxed),
            transient_failures: self.counters.transient_failures.load(Ordering::Relaxed),
            shrinks: self.counters.shrinks.load(Ordering::Relaxed),
            items_retried: self.counters.items_retried.load(Ordering::Relaxed),
            current_batch_size: self.current_batch_size(),
        }
    }
}

/// Runs a handler over batches of items on a bounded, fail-fast worker pool,
/// shrinking the batch size after transient failures.
///
/// Must be created inside a Tokio runtime.
///
/// ```no_run
/// # async fn run() -> Result<(), chainbatch_core::ExecutorError> {
/// use chainbatch_core::{blocking_handler, BatchWorkExecutor, ExecutorConfig, WorkError};
///
/// let executor = BatchWorkExecutor::new(ExecutorConfig::new(100, 5))?;
/// let export = blocking_handler(|blocks: &[u64]| -> Result<(), WorkError> { Ok(()) });
/// executor.execute(0u64..10_000, export, Some(10_000)).await?;
/// let summary = executor.shutdown().await?;
/// assert_eq!(summary.progress.processed, 10_000);
/// # Ok(())
/// # }
/// ```
pub struct BatchWorkExecutor {
    shared: Arc<Shared>,
    pool: FailFastPool,
}

impl BatchWorkExecutor {
    /// Build an executor that reports progress through a [`ProgressLogger`].
    pub fn new(config: ExecutorConfig) -> Result<Self, ExecutorError> {
        Self::with_progress(config, Arc::new(ProgressLogger::default()))
    }

    /// Build an executor reporting to a caller-supplied tracker.
    pub fn with_progress(
        config: ExecutorConfig,
        progress: Arc<dyn ProgressTracker>,
    ) -> Result<Self, ExecutorError> {
        config.validate()?;
        let pool = BoundedWorkerPool::new(config.max_workers, config.queue_bound)?;
        tracing::info!(
            batch_size = config.starting_batch_size,
            max_workers = config.max_workers,
            queue_bound = config.queue_bound,
            backoff = ?config.backoff,
            "batch executor ready"
        );
        Ok(Self {
            shared: Arc::new(Shared::new(config, progress)),
            pool: FailFastPool::new(pool),
        })
    }

    /// Batch `items` and submit every batch to the pool.
    ///
    /// Returns once everything is submitted; completion and fatal errors are
    /// observed through [`shutdown`](Self::shutdown). If a fatal error has
    /// already been latched, submission stops and that error is returned.
    pub async fn execute<I, H>(
        &self,
        items: I,
        handler: H,
        total_items: Option<u64>,
    ) -> Result<(), ExecutorError>
    where
        I: IntoIterator,
        I::Item: Send + Sync + 'static,
        H: BatchHandler<I::Item>,
    {
        self.shared.progress.start(total_items);
        let handler = Arc::new(handler);

        let shared = &self.shared;
        for batch in dynamic_batches(items, || shared.current_batch_size()) {
            tracing::trace!(batch_len = batch.len(), "submitting batch");
            self.pool
                .submit(process_batch(shared.clone(), handler.clone(), batch))
                .await?;
            shared
                .counters
                .batches_submitted
                .fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Wait for all submitted work, finish progress reporting and return the
    /// first fatal error, if any.
    pub async fn shutdown(mut self) -> Result<RunSummary, ExecutorError> {
        let drained = self.pool.shutdown().await;
        self.shared.progress.finish();
        drained?;
        Ok(RunSummary {
            stats: self.shared.stats(),
            progress: self.shared.progress.snapshot(),
        })
    }

    /// Batch size the next batch will be cut with.
    pub fn current_batch_size(&self) -> usize {
        self.shared.current_batch_size()
    }

    /// Batches executing right now.
    pub fn in_flight(&self) -> usize {
        self.pool.running()
    }

    /// Returns `true` once a fatal error has been latched.
    pub fn has_failed(&self) -> bool {
        self.pool.has_failed()
    }

    pub fn stats(&self) -> ExecutorStats {
        self.shared.stats()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.shared.progress.snapshot()
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.shared.config
    }
}

impl std::fmt::Debug for BatchWorkExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchWorkExecutor")
            .field("batch_size", &self.current_batch_size())
            .field("in_flight", &self.in_flight())
            .field("failed", &self.has_failed())
            .finish()
    }
}

/// Work unit run on a pool worker for one batch.
async fn process_batch<T, H>(
    shared: Arc<Shared>,
    handler: Arc<H>,
    batch: Vec<T>,
) -> Result<(), ExecutorError>
where
    T: Send + Sync + 'static,
    H: BatchHandler<T>,
{
    let len = batch.len();
    match handler.handle(&batch).await {
        Ok(()) => {
            shared
                .counters
                .batches_succeeded
                .fetch_add(1, Ordering::Relaxed);
            shared.progress.track(len as u64);
            Ok(())
        }
        Err(err) if shared.config.is_retryable(err.kind) => {
            shared
                .counters
                .transient_failures
                .fetch_add(1, Ordering::Relaxed);
            tracing::warn!(batch_len = len, error = %err, "transient batch failure, retrying items one by one");

            if let Some(next) = shared.shrink_after(len) {
                tracing::warn!(from = len, to = next, "reduced batch size");
            }

            let retried = AssertUnwindSafe(retry_items(&shared, handler.as_ref(), &batch))
                .catch_unwind()
                .await;
            // Count the batch before a per-item failure or panic propagates.
            shared.progress.track(len as u64);
            match retried {
                Ok(result) => result,
                Err(payload) => Err(ExecutorError::TaskPanicked(panic_message(payload.as_ref()))),
            }
        }
        Err(err) => Err(ExecutorError::Handler(err)),
    }
}

/// Replay `batch` one item per call. Stops at the first failing item.
async fn retry_items<T, H>(shared: &Shared, handler: &H, batch: &[T]) -> Result<(), ExecutorError>
where
    T: Send + Sync + 'static,
    H: BatchHandler<T>,
{
    for (position, item) in batch.iter().enumerate() {
        shared
            .counters
            .items_retried
            .fetch_add(1, Ordering::Relaxed);
        handler
            .handle(std::slice::from_ref(item))
            .await
            .map_err(|source| ExecutorError::ItemRetry { position, source })?;
    }
    Ok(())
}
