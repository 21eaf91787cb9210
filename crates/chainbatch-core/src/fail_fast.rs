//! Fail-fast wrapper around [`BoundedWorkerPool`].
//!
//! The first task that returns an error (or panics) latches that error. From
//! then on every `submit` is rejected with it, tasks still waiting in the queue
//! are dropped without running, and `shutdown` returns the error once the
//! in-flight tasks have drained. The latch is never reset.

use std::any::Any;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use futures::FutureExt;

use crate::error::ExecutorError;
use crate::pool::BoundedWorkerPool;

/// Set-once holder for the first fatal error.
#[derive(Debug, Default)]
pub struct ErrorLatch {
    error: OnceLock<ExecutorError>,
}

impl ErrorLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `err` if nothing is latched yet. Returns `true` if it was stored.
    pub fn set(&self, err: ExecutorError) -> bool {
        match self.error.set(err) {
            Ok(()) => true,
            Err(ignored) => {
                tracing::debug!(error = %ignored, "error latch already set; dropping later failure");
                false
            }
        }
    }

    pub fn get(&self) -> Option<&ExecutorError> {
        self.error.get()
    }

    pub fn is_set(&self) -> bool {
        self.error.get().is_some()
    }

    fn check(&self) -> Result<(), ExecutorError> {
        match self.error.get() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// Pool wrapper that stops accepting work after the first fatal failure.
#[derive(Debug)]
pub struct FailFastPool {
    inner: BoundedWorkerPool,
    latch: Arc<ErrorLatch>,
}

impl FailFastPool {
    pub fn new(inner: BoundedWorkerPool) -> Self {
        Self {
            inner,
            latch: Arc::new(ErrorLatch::new()),
        }
    }

    /// Schedule `task`, or return the latched error without scheduling it.
    pub async fn submit<F>(&self, task: F) -> Result<(), ExecutorError>
    where
        F: Future<Output = Result<(), ExecutorError>> + Send + 'static,
    {
        self.latch.check()?;

        let latch = self.latch.clone();
        self.inner
            .submit(async move {
                // Queued before the failure was latched; never start it.
                if latch.is_set() {
                    tracing::debug!("skipping queued task after fatal failure");
                    return;
                }
                let outcome = std::panic::AssertUnwindSafe(task).catch_unwind().await;
                let err = match outcome {
                    Ok(Ok(())) => return,
                    Ok(Err(e)) => e,
                    Err(payload) => ExecutorError::TaskPanicked(panic_message(payload.as_ref())),
                };
                tracing::error!(error = %err, "fatal task failure; rejecting further submissions");
                latch.set(err);
            })
            .await
    }

    /// Drain the pool, then return the latched error if any.
    pub async fn shutdown(&mut self) -> Result<(), ExecutorError> {
        self.inner.shutdown().await;
        self.latch.check()
    }

    /// Returns `true` once a fatal error has been recorded.
    pub fn has_failed(&self) -> bool {
        self.latch.is_set()
    }

    /// Number of tasks currently executing.
    pub fn running(&self) -> usize {
        self.inner.running()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn explode() -> Result<(), ExecutorError> {
        panic!("handler exploded")
    }

    fn pool(workers: usize) -> FailFastPool {
        FailFastPool::new(BoundedWorkerPool::new(workers, 1).unwrap())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn clean_run_shuts_down_ok() {
        let mut p = pool(2);
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let count = count.clone();
            p.submit(async move {
                count.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })
            .await
            .unwrap();
        }
        assert!(p.shutdown().await.is_ok());
        assert_eq!(count.load(Ordering::Relaxed), 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn error_surfaces_from_shutdown() {
        let mut p = pool(1);
        p.submit(async { Err(ExecutorError::Handler(WorkError::execution("reverted"))) })
            .await
            .unwrap();
        let err = p.shutdown().await.unwrap_err();
        assert!(matches!(err, ExecutorError::Handler(ref e) if e.message == "reverted"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn submit_fails_fast_after_error() {
        let mut p = pool(1);
        p.submit(async { Err(ExecutorError::Handler(WorkError::other("first"))) })
            .await
            .unwrap();
        while !p.has_failed() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let ran = Arc::new(AtomicUsize::new(0));
        let flag = ran.clone();
        let res = p
            .submit(async move {
                flag.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(res, Err(ExecutorError::Handler(ref e)) if e.message == "first"));

        // Repeated submits keep failing with the same error.
        assert!(p.submit(async { Ok(()) }).await.is_err());

        assert!(p.shutdown().await.is_err());
        assert_eq!(ran.load(Ordering::SeqCst), 0, "rejected task must not run");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn first_error_wins() {
        let mut p = pool(1);
        p.submit(async { Err(ExecutorError::Handler(WorkError::other("a"))) })
            .await
            .unwrap();
        while !p.has_failed() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let _ = p.submit(async { Err(ExecutorError::Handler(WorkError::other("b"))) }).await;
        let err = p.shutdown().await.unwrap_err();
        assert_eq!(err.work_error().map(|e| e.message.as_str()), Some("a"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panic_is_latched() {
        let mut p = pool(1);
        p.submit(explode()).await.unwrap();
        let err = p.shutdown().await.unwrap_err();
        match err {
            ExecutorError::TaskPanicked(msg) => assert_eq!(msg, "handler exploded"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn queued_tasks_skipped_after_failure() {
        let mut p = pool(1);
        p.submit(async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err(ExecutorError::Handler(WorkError::execution("reverted")))
        })
        .await
        .unwrap();

        // Admitted while the first task is still running.
        let ran = Arc::new(AtomicUsize::new(0));
        let flag = ran.clone();
        p.submit(async move {
            flag.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();

        assert!(p.shutdown().await.is_err());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn in_flight_tasks_drain_after_failure() {
        let mut p = pool(2);
        let finished = Arc::new(AtomicUsize::new(0));
        let slow = finished.clone();
        p.submit(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            slow.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();
        p.submit(async { Err(ExecutorError::Handler(WorkError::other("fatal"))) })
            .await
            .unwrap();
        assert!(p.shutdown().await.is_err());
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
