//! chainbatch-core: bounded, fail-fast, adaptive batch execution.
//!
//! # Overview
//!
//! Drives I/O-bound work (typically RPC calls) over a large or unbounded
//! sequence of items:
//!
//! - [`DynamicBatches`]: cuts batches using a size read before every batch
//! - [`BoundedWorkerPool`]: fixed workers, bounded queue, waiting `submit`
//! - [`FailFastPool`]: latches the first fatal error and rejects new work
//! - [`BatchWorkExecutor`]: shrinks the batch size after transient failures
//!   and replays failed batches one item at a time
//! - [`ProgressLogger`]: concurrent progress counting with periodic log lines
//!
//! Handlers report failures as [`WorkError`]s tagged with a [`FailureKind`];
//! the kinds listed in [`ExecutorConfig::retry_on`] are transient, everything
//! else aborts the run.

pub mod batcher;
pub mod config;
pub mod error;
pub mod executor;
pub mod fail_fast;
pub mod handler;
pub mod pool;
pub mod progress;

pub use batcher::{dynamic_batches, DynamicBatches};
pub use config::{BackoffMode, ExecutorConfig};
pub use error::{ExecutorError, FailureKind, WorkError};
pub use executor::{BatchWorkExecutor, ExecutorStats, RunSummary};
pub use fail_fast::{ErrorLatch, FailFastPool};
pub use handler::{blocking_handler, handler_fn, BatchHandler, BlockingHandler, FnHandler};
pub use pool::BoundedWorkerPool;
pub use progress::{ProgressLogger, ProgressSnapshot, ProgressTracker};
