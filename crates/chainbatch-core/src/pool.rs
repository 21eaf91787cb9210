//! Fixed-size worker pool with a bounded admission queue.
//!
//! `max_workers` Tokio tasks pull jobs from a channel holding at most
//! `queue_bound` pending jobs. When the channel is full, [`BoundedWorkerPool::submit`]
//! waits for a slot instead of buffering, so a fast producer cannot grow memory
//! without limit.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::error::ExecutorError;

type Job = BoxFuture<'static, ()>;

/// Bounded worker pool.
pub struct BoundedWorkerPool {
    tx: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    running: Arc<AtomicUsize>,
    max_workers: usize,
    queue_bound: usize,
}

impl BoundedWorkerPool {
    /// Spawn `max_workers` workers on the current Tokio runtime.
    pub fn new(max_workers: usize, queue_bound: usize) -> Result<Self, ExecutorError> {
        if max_workers == 0 || queue_bound == 0 {
            return Err(ExecutorError::InvalidConfig(format!(
                "pool needs at least one worker and one queue slot (workers={max_workers}, queue={queue_bound})"
            )));
        }
        let handle = Handle::try_current().map_err(|_| ExecutorError::NoRuntime)?;

        let (tx, rx) = mpsc::channel::<Job>(queue_bound);
        let rx = Arc::new(Mutex::new(rx));
        let running = Arc::new(AtomicUsize::new(0));

        let workers = (0..max_workers)
            .map(|id| handle.spawn(worker_loop(id, rx.clone(), running.clone())))
            .collect();

        tracing::debug!(max_workers, queue_bound, "worker pool started");

        Ok(Self {
            tx: Some(tx),
            workers,
            running,
            max_workers,
            queue_bound,
        })
    }

    /// Queue `task`, waiting while the admission queue is full.
    pub async fn submit<F>(&self, task: F) -> Result<(), ExecutorError>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let tx = self.tx.as_ref().ok_or(ExecutorError::PoolClosed)?;
        tx.send(task.boxed())
            .await
            .map_err(|_| ExecutorError::PoolClosed)
    }

    /// Stop admitting work and wait for every queued and running job.
    ///
    /// Calling it again is a no-op.
    pub async fn shutdown(&mut self) {
        // Dropping the sender lets workers drain the queue and exit.
        self.tx.take();
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "worker task terminated abnormally");
            }
        }
        tracing::debug!("worker pool stopped");
    }

    /// Number of jobs currently executing.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn queue_bound(&self) -> usize {
        self.queue_bound
    }

    /// Returns `true` once `shutdown` has been called.
    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }
}

impl std::fmt::Debug for BoundedWorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedWorkerPool")
            .field("max_workers", &self.max_workers)
            .field("queue_bound", &self.queue_bound)
            .field("running", &self.running())
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn worker_loop(id: usize, rx: Arc<Mutex<mpsc::Receiver<Job>>>, running: Arc<AtomicUsize>) {
    loop {
        // Hold the receiver lock only while waiting for the next job.
        let job = { rx.lock().await.recv().await };
        let Some(job) = job else {
            break;
        };

        running.fetch_add(1, Ordering::AcqRel);
        let outcome = std::panic::AssertUnwindSafe(job).catch_unwind().await;
        running.fetch_sub(1, Ordering::AcqRel);

        if outcome.is_err() {
            tracing::error!(worker = id, "job panicked; worker continues");
        }
    }
    tracing::debug!(worker = id, "worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn runs_every_job() {
        let mut pool = BoundedWorkerPool::new(3, 1).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..25 {
            let done = done.clone();
            pool.submit(async move {
                done.fetch_add(1, Ordering::Relaxed);
            })
            .await
            .unwrap();
        }
        pool.shutdown().await;
        assert_eq!(done.load(Ordering::Relaxed), 25);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_never_exceeds_workers() {
        let mut pool = BoundedWorkerPool::new(2, 2).unwrap();
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for _ in 0..12 {
            let (current, peak) = (current.clone(), peak.clone());
            pool.submit(async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        }
        pool.shutdown().await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn submit_waits_when_queue_full() {
        let pool = BoundedWorkerPool::new(1, 1).unwrap();
        let release = Arc::new(tokio::sync::Notify::new());

        // Occupies the only worker until released.
        let gate = release.clone();
        pool.submit(async move { gate.notified().await }).await.unwrap();
        // Wait for the worker to pick it up so the queue is empty again.
        while pool.running() == 0 {
            tokio::task::yield_now().await;
        }
        // Fills the single queue slot.
        pool.submit(async {}).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), pool.submit(async {})).await;
        assert!(blocked.is_err(), "third submit should wait for a free slot");

        release.notify_one();
        tokio::time::timeout(Duration::from_secs(5), pool.submit(async {}))
            .await
            .expect("slot frees once the worker finishes")
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn submit_after_shutdown_is_rejected() {
        let mut pool = BoundedWorkerPool::new(1, 1).unwrap();
        pool.shutdown().await;
        assert!(pool.is_closed());
        let res = pool.submit(async {}).await;
        assert!(matches!(res, Err(ExecutorError::PoolClosed)));
        // Second shutdown is harmless.
        pool.shutdown().await;
    }

    async fn explode() {
        panic!("boom")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_job_does_not_kill_worker() {
        let mut pool = BoundedWorkerPool::new(1, 1).unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        pool.submit(explode()).await.unwrap();
        let flag = ran.clone();
        pool.submit(async move { flag.store(true, Ordering::SeqCst) })
            .await
            .unwrap();
        pool.shutdown().await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn new_outside_runtime_fails() {
        assert!(matches!(
            BoundedWorkerPool::new(1, 1),
            Err(ExecutorError::NoRuntime)
        ));
    }

    #[tokio::test]
    async fn zero_workers_rejected() {
        assert!(matches!(
            BoundedWorkerPool::new(0, 1),
            Err(ExecutorError::InvalidConfig(_))
        ));
    }
}
