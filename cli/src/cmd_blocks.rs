//! `chainbatch blocks`: export block headers over JSON-RPC.
//!
//! Each batch of block numbers becomes one JSON-RPC batch request of
//! `eth_getBlockByNumber` calls. Transport failures are classified into
//! `FailureKind`s at the reqwest boundary so the executor can shrink and retry.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use chainbatch_core::{BatchHandler, BatchWorkExecutor, ExecutorConfig, FailureKind, WorkError};

// ─── JSON-RPC types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RpcResponse {
    id: Value,
    result: Option<Block>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct Block {
    number: String,
    hash: String,
    #[serde(rename = "parentHash")]
    parent_hash: String,
    timestamp: String,
    #[serde(default)]
    transactions: Vec<Value>,
}

#[derive(Serialize)]
struct BlockRecord {
    number: u64,
    hash: String,
    parent_hash: String,
    timestamp: u64,
    transaction_count: usize,
}

/// Rate-limit codes used by common providers (Infura, Alchemy, QuickNode).
fn classify_rpc_error(err: &RpcError) -> FailureKind {
    match err.code {
        429 | -32005 | -32029 => FailureKind::RateLimited,
        -32603 if err.message.to_lowercase().contains("timeout") => FailureKind::Timeout,
        _ => FailureKind::Execution,
    }
}

fn parse_quantity(hex: &str) -> Result<u64, WorkError> {
    u64::from_str_radix(hex.trim_start_matches("0x"), 16)
        .map_err(|e| WorkError::decode(format!("bad quantity {hex:?}: {e}")))
}

fn to_record(block: Block) -> Result<BlockRecord, WorkError> {
    Ok(BlockRecord {
        number: parse_quantity(&block.number)?,
        timestamp: parse_quantity(&block.timestamp)?,
        transaction_count: block.transactions.len(),
        hash: block.hash,
        parent_hash: block.parent_hash,
    })
}

// ─── Handler ──────────────────────────────────────────────────────────────────

struct BlockExporter {
    http: reqwest::Client,
    url: String,
}

#[async_trait]
impl BatchHandler<u64> for BlockExporter {
    async fn handle(&self, batch: &[u64]) -> Result<(), WorkError> {
        let requests: Vec<Value> = batch
            .iter()
            .map(|n| {
                json!({
                    "jsonrpc": "2.0",
                    "id": n,
                    "method": "eth_getBlockByNumber",
                    "params": [format!("0x{n:x}"), false],
                })
            })
            .collect();

        let responses: Vec<RpcResponse> = self
            .http
            .post(&self.url)
            .json(&requests)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if responses.len() != batch.len() {
            return Err(WorkError::new(
                FailureKind::MalformedResponse,
                format!("expected {} responses, got {}", batch.len(), responses.len()),
            ));
        }

        let mut records = Vec::with_capacity(responses.len());
        for resp in responses {
            if let Some(err) = resp.error {
                return Err(WorkError::new(
                    classify_rpc_error(&err),
                    format!("id {}: {} ({})", resp.id, err.message, err.code),
                ));
            }
            let block = resp.result.ok_or_else(|| {
                WorkError::execution(format!("block {} not found", resp.id))
            })?;
            records.push(to_record(block)?);
        }

        // Write only once the whole batch succeeded so a replayed batch is not
        // emitted twice.
        for record in records {
            println!("{}", serde_json::to_string(&record)?);
        }
        Ok(())
    }
}

pub async fn run(
    config: ExecutorConfig,
    url: &str,
    start: u64,
    end: u64,
    timeout_secs: u64,
) -> Result<()> {
    anyhow::ensure!(start <= end, "--start ({start}) must not exceed --end ({end})");

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("building HTTP client")?;
    let handler = BlockExporter {
        http,
        url: url.to_string(),
    };

    let total = end - start + 1;
    let executor = BatchWorkExecutor::new(config)?;
    if let Err(e) = executor.execute(start..=end, handler, Some(total)).await {
        tracing::warn!(error = %e, "submission stopped early");
    }
    let summary = executor.shutdown().await?;
    eprintln!("{}", serde_json::to_string(&summary)?);
    Ok(())
}
