//! ChainBatch CLI: run batched RPC workloads with adaptive batch sizing.
//!
//! # Commands
//! ```text
//! chainbatch simulate --items <N> [--batch-size <B>] [--workers <W>] [--fail-every <K>] [--fatal-at <I>]
//! chainbatch blocks   --url <RPC_URL> --start <S> --end <E>
//! chainbatch config   [--config <path.yaml|path.json>]
//! chainbatch --version
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use chainbatch_core::{BackoffMode, ExecutorConfig};
use chainbatch_observability::{init_tracing, LogConfig};

mod cmd_blocks;
mod cmd_simulate;

#[derive(Parser)]
#[command(
    name = "chainbatch",
    about = "Bounded, adaptive batch execution for RPC workloads: ChainBatch CLI",
    long_about = "
ChainBatch CLI: push large item ranges through a handler in batches on a
bounded worker pool. Transient RPC failures halve the batch size and replay
the failed batch one item at a time; anything else aborts the run.

ENVIRONMENT VARIABLES:
  CHAINBATCH_BATCH_SIZE    Starting batch size (overrides --config)
  CHAINBATCH_MAX_WORKERS   Worker count (overrides --config)
  CHAINBATCH_QUEUE_BOUND   Pending batches admitted beyond running ones
  RUST_LOG                 Log filter (overrides --log-level)
",
    version
)]
struct Cli {
    /// Log level: trace | debug | info | warn | error
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit JSON structured logs
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Executor settings shared by every command that runs work.
#[derive(Args, Debug, Clone)]
struct ExecutorArgs {
    /// YAML or JSON executor config file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Starting batch size
    #[arg(long)]
    batch_size: Option<usize>,
    /// Number of concurrent workers
    #[arg(long)]
    workers: Option<usize>,
    /// Decrement the batch size by one on failure instead of halving it
    #[arg(long)]
    linear: bool,
}

impl ExecutorArgs {
    /// File, then environment, then flags.
    fn resolve(&self) -> Result<ExecutorConfig> {
        let base = match &self.config {
            Some(path) => ExecutorConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ExecutorConfig::default(),
        };
        let mut config = base.with_env_overrides()?;
        if let Some(n) = self.batch_size {
            config = config.batch_size(n);
        }
        if let Some(n) = self.workers {
            config = config.max_workers(n);
        }
        if self.linear {
            config = config.backoff(BackoffMode::Linear);
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic workload with injected failures
    Simulate {
        /// Number of items to process
        #[arg(long, default_value_t = 10_000)]
        items: u64,
        /// Fail every K-th multi-item call with a transient error (0 = never)
        #[arg(long, default_value_t = 0)]
        fail_every: u64,
        /// Fail fatally when this item is handled
        #[arg(long)]
        fatal_at: Option<u64>,
        /// Simulated latency per call in milliseconds
        #[arg(long, default_value_t = 5)]
        latency_ms: u64,
        #[command(flatten)]
        executor: ExecutorArgs,
    },

    /// Fetch block headers over JSON-RPC, one batch request per batch
    Blocks {
        /// JSON-RPC endpoint URL
        #[arg(long)]
        url: String,
        /// First block (inclusive)
        #[arg(long)]
        start: u64,
        /// Last block (inclusive)
        #[arg(long)]
        end: u64,
        /// HTTP request timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
        #[command(flatten)]
        executor: ExecutorArgs,
    },

    /// Print the effective executor configuration
    Config {
        #[command(flatten)]
        executor: ExecutorArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&LogConfig {
        level: cli.log_level.clone(),
        json: cli.json_logs,
        ..Default::default()
    });

    match cli.command {
        Commands::Simulate {
            items,
            fail_every,
            fatal_at,
            latency_ms,
            executor,
        } => {
            let config = executor.resolve()?;
            cmd_simulate::run(config, items, fail_every, fatal_at, latency_ms).await
        }
        Commands::Blocks {
            url,
            start,
            end,
            timeout_secs,
            executor,
        } => {
            let config = executor.resolve()?;
            cmd_blocks::run(config, &url, start, end, timeout_secs).await
        }
        Commands::Config { executor } => {
            let config = executor.resolve()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
