//! The batch handler abstraction.
//!
//! Handlers are async. Synchronous work goes through [`blocking_handler`] so it
//! runs on the blocking pool instead of stalling a runtime worker.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::WorkError;

/// User-provided work applied to one batch at a time.
///
/// Handlers must tolerate being called again for items of a batch that
/// previously failed: after a transient failure the executor replays the batch
/// one item per call.
#[async_trait]
pub trait BatchHandler<T: Send + Sync + 'static>: Send + Sync + 'static {
    async fn handle(&self, batch: &[T]) -> Result<(), WorkError>;
}

/// Adapter running a synchronous closure on Tokio's blocking thread pool.
///
/// Built with [`blocking_handler`]. Each call copies the batch into the
/// blocking task, so a handler that sleeps or does blocking I/O holds a
/// blocking thread rather than a runtime worker, and every pool worker can
/// have one call in flight regardless of the runtime's thread count.
pub struct BlockingHandler<F> {
    f: Arc<F>,
}

/// Wrap a synchronous `Fn(&[T]) -> Result<(), WorkError>` as a handler.
pub fn blocking_handler<T, F>(f: F) -> BlockingHandler<F>
where
    F: Fn(&[T]) -> Result<(), WorkError> + Send + Sync + 'static,
{
    BlockingHandler { f: Arc::new(f) }
}

#[async_trait]
impl<T, F> BatchHandler<T> for BlockingHandler<F>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&[T]) -> Result<(), WorkError> + Send + Sync + 'static,
{
    async fn handle(&self, batch: &[T]) -> Result<(), WorkError> {
        let f = Arc::clone(&self.f);
        let batch = batch.to_vec();
        match tokio::task::spawn_blocking(move || f(&batch)).await {
            Ok(result) => result,
            // Re-raise on this task so the panic is reported like any other.
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(WorkError::other(format!("blocking handler cancelled: {e}"))),
        }
    }
}

/// Adapter turning an async closure over an owned batch into a handler.
///
/// Built with [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap `f` so it can be passed to
/// [`BatchWorkExecutor::execute`](crate::BatchWorkExecutor::execute).
pub fn handler_fn<F>(f: F) -> FnHandler<F> {
    FnHandler { f }
}

#[async_trait]
impl<T, F, Fut> BatchHandler<T> for FnHandler<F>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), WorkError>> + Send + 'static,
{
    async fn handle(&self, batch: &[T]) -> Result<(), WorkError> {
        (self.f)(batch.to_vec()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    struct Summer(Arc<AtomicUsize>);

    #[async_trait]
    impl BatchHandler<usize> for Summer {
        async fn handle(&self, batch: &[usize]) -> Result<(), WorkError> {
            self.0.fetch_add(batch.iter().sum(), Ordering::Relaxed);
            Ok(())
        }
    }

    #[tokio::test]
    async fn struct_handler() {
        let total = Arc::new(AtomicUsize::new(0));
        let h = Summer(total.clone());
        let batch: &[usize] = &[1, 2, 3];
        h.handle(batch).await.unwrap();
        assert_eq!(total.load(Ordering::Relaxed), 6);
    }

    #[tokio::test]
    async fn blocking_closure_handler() {
        let h = blocking_handler(|batch: &[u8]| {
            if batch.len() > 2 {
                Err(WorkError::timeout("too big"))
            } else {
                Ok(())
            }
        });
        let small: &[u8] = &[1, 2];
        let large: &[u8] = &[1, 2, 3];
        assert!(h.handle(small).await.is_ok());
        assert_eq!(h.handle(large).await.unwrap_err().kind, crate::FailureKind::Timeout);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn blocking_calls_do_not_hold_runtime_threads() {
        let h = Arc::new(blocking_handler(|_: &[u8]| {
            std::thread::sleep(Duration::from_millis(50));
            Ok(())
        }));
        let started = Instant::now();
        let calls: Vec<_> = (0..4)
            .map(|_| {
                let h = h.clone();
                tokio::spawn(async move {
                    let batch: &[u8] = &[1];
                    h.handle(batch).await
                })
            })
            .collect();
        for call in calls {
            call.await.unwrap().unwrap();
        }
        // Four sequential sleeps would take 200ms on the single runtime thread.
        assert!(started.elapsed() < Duration::from_millis(180), "{:?}", started.elapsed());
    }

    #[tokio::test]
    #[should_panic(expected = "bad item")]
    async fn blocking_panic_is_raised_on_caller() {
        let h = blocking_handler(|_: &[u8]| -> Result<(), WorkError> { panic!("bad item") });
        let batch: &[u8] = &[1];
        let _ = h.handle(batch).await;
    }

    #[tokio::test]
    async fn async_fn_handler() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let h = handler_fn(move |batch: Vec<String>| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(batch.len(), Ordering::Relaxed);
                Ok::<(), WorkError>(())
            }
        });
        let batch = vec!["a".to_string(), "b".to_string()];
        h.handle(batch.as_slice()).await.unwrap();
        assert_eq!(seen.load(Ordering::Relaxed), 2);
    }
}
