//! `chainbatch simulate`: exercise the executor against a fake RPC backend.
//!
//! Every `fail_every`-th multi-item call fails with a transient error, cycling
//! through the transient kinds. A call that touches `fatal_at` fails with an
//! execution error and aborts the run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use chainbatch_core::{BatchHandler, BatchWorkExecutor, ExecutorConfig, FailureKind, WorkError};

const TRANSIENT_CYCLE: [FailureKind; 4] = [
    FailureKind::Timeout,
    FailureKind::ConnectionReset,
    FailureKind::RateLimited,
    FailureKind::MalformedResponse,
];

struct SimulatedRpc {
    fail_every: u64,
    fatal_at: Option<u64>,
    latency: Duration,
    calls: AtomicU64,
}

impl SimulatedRpc {
    fn new(fail_every: u64, fatal_at: Option<u64>, latency: Duration) -> Self {
        Self {
            fail_every,
            fatal_at,
            latency,
            calls: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl BatchHandler<u64> for SimulatedRpc {
    async fn handle(&self, batch: &[u64]) -> Result<(), WorkError> {
        tokio::time::sleep(self.latency).await;

        if let Some(fatal) = self.fatal_at {
            if batch.contains(&fatal) {
                return Err(WorkError::execution(format!("item {fatal} rejected by node")));
            }
        }

        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if self.fail_every > 0 && batch.len() > 1 && call % self.fail_every == 0 {
            let kind = TRANSIENT_CYCLE[(call / self.fail_every) as usize % TRANSIENT_CYCLE.len()];
            return Err(WorkError::new(
                kind,
                format!("injected failure on call {call} ({} items)", batch.len()),
            ));
        }
        Ok(())
    }
}

pub async fn run(
    config: ExecutorConfig,
    items: u64,
    fail_every: u64,
    fatal_at: Option<u64>,
    latency_ms: u64,
) -> Result<()> {
    let handler = SimulatedRpc::new(fail_every, fatal_at, Duration::from_millis(latency_ms));

    let executor = BatchWorkExecutor::new(config)?;
    let submitted = executor.execute(0..items, handler, Some(items)).await;
    if let Err(e) = &submitted {
        tracing::warn!(error = %e, "submission stopped early");
    }

    // Drain before reporting; shutdown carries the first fatal error.
    let summary = executor.shutdown().await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc(fail_every: u64, fatal_at: Option<u64>) -> SimulatedRpc {
        SimulatedRpc::new(fail_every, fatal_at, Duration::ZERO)
    }

    #[tokio::test]
    async fn fatal_item_fails_any_batch_containing_it() {
        let h = rpc(0, Some(7));
        let clean: &[u64] = &[1, 2, 3];
        let poisoned: &[u64] = &[5, 6, 7];
        let single: &[u64] = &[7];

        assert!(h.handle(clean).await.is_ok());
        assert_eq!(h.handle(poisoned).await.unwrap_err().kind, FailureKind::Execution);
        assert_eq!(h.handle(single).await.unwrap_err().kind, FailureKind::Execution);
    }

    #[tokio::test]
    async fn every_kth_call_fails_with_cycling_transient_kind() {
        let h = rpc(2, None);
        let batch: &[u64] = &[0, 1];

        let mut kinds = Vec::new();
        for _ in 0..8 {
            kinds.push(h.handle(batch).await.err().map(|e| e.kind));
        }
        assert_eq!(
            kinds,
            vec![
                None,
                Some(FailureKind::ConnectionReset),
                None,
                Some(FailureKind::RateLimited),
                None,
                Some(FailureKind::MalformedResponse),
                None,
                Some(FailureKind::Timeout),
            ]
        );
    }

    #[tokio::test]
    async fn single_items_never_fail_transiently() {
        let h = rpc(1, None);
        let single: &[u64] = &[42];
        for _ in 0..5 {
            assert!(h.handle(single).await.is_ok());
        }
    }

    #[tokio::test]
    async fn injected_kinds_are_retryable_by_default() {
        let config = ExecutorConfig::default();
        assert!(TRANSIENT_CYCLE.iter().all(|&kind| config.is_retryable(kind)));
        assert!(!config.is_retryable(FailureKind::Execution));
    }
}
