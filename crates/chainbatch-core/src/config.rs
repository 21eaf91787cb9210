//! Executor configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ExecutorError, FailureKind};

/// How the batch size shrinks after a transient failure on a full batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffMode {
    /// Halve the batch size.
    #[default]
    Exponential,
    /// Decrement the batch size by one.
    Linear,
}

impl BackoffMode {
    /// Returns the next batch size after a failure at `size`. Never below 1.
    pub fn next(&self, size: usize) -> usize {
        let next = match self {
            Self::Exponential => size / 2,
            Self::Linear => size.saturating_sub(1),
        };
        next.max(1)
    }
}

/// Configuration for a [`BatchWorkExecutor`](crate::BatchWorkExecutor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Batch size used until the first transient failure.
    pub starting_batch_size: usize,
    /// Number of workers executing batches concurrently.
    pub max_workers: usize,
    /// Pending batches admitted beyond the running ones before `submit` waits.
    pub queue_bound: usize,
    /// Batch size reduction strategy.
    pub backoff: BackoffMode,
    /// Failure kinds treated as transient (shrink + per-item retry).
    pub retry_on: Vec<FailureKind>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            starting_batch_size: 100,
            max_workers: 5,
            queue_bound: 1,
            backoff: BackoffMode::Exponential,
            retry_on: FailureKind::default_transient(),
        }
    }
}

impl ExecutorConfig {
    pub fn new(starting_batch_size: usize, max_workers: usize) -> Self {
        Self {
            starting_batch_size,
            max_workers,
            ..Default::default()
        }
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.starting_batch_size = n;
        self
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.max_workers = n;
        self
    }

    pub fn queue_bound(mut self, n: usize) -> Self {
        self.queue_bound = n;
        self
    }

    pub fn backoff(mut self, mode: BackoffMode) -> Self {
        self.backoff = mode;
        self
    }

    pub fn retry_on(mut self, kinds: impl IntoIterator<Item = FailureKind>) -> Self {
        self.retry_on = kinds.into_iter().collect();
        self
    }

    /// Returns `true` if a failure of `kind` should be retried item by item.
    pub fn is_retryable(&self, kind: FailureKind) -> bool {
        self.retry_on.contains(&kind)
    }

    /// Reject values the executor cannot run with.
    pub fn validate(&self) -> Result<(), ExecutorError> {
        if self.starting_batch_size == 0 {
            return Err(ExecutorError::InvalidConfig(
                "starting_batch_size must be at least 1".into(),
            ));
        }
        if self.max_workers == 0 {
            return Err(ExecutorError::InvalidConfig(
                "max_workers must be at least 1".into(),
            ));
        }
        if self.queue_bound == 0 {
            return Err(ExecutorError::InvalidConfig(
                "queue_bound must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Load from a `.json`, `.yaml` or `.yml` file. Missing fields take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ExecutorError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ExecutorError::Config(format!("{}: {e}", path.display())))?;

        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .map_err(|e| ExecutorError::Config(format!("{}: {e}", path.display())))?,
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| ExecutorError::Config(format!("{}: {e}", path.display())))?,
            other => {
                return Err(ExecutorError::Config(format!(
                    "unsupported config extension {other:?} (expected json, yaml or yml)"
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Apply `CHAINBATCH_BATCH_SIZE`, `CHAINBATCH_MAX_WORKERS` and
    /// `CHAINBATCH_QUEUE_BOUND` overrides from the environment.
    pub fn with_env_overrides(self) -> Result<Self, ExecutorError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ExecutorError> {
        let parse = |key: &str| -> Result<Option<usize>, ExecutorError> {
            lookup(key)
                .map(|raw| {
                    raw.trim()
                        .parse::<usize>()
                        .map_err(|e| ExecutorError::Config(format!("{key}={raw:?}: {e}")))
                })
                .transpose()
        };

        if let Some(n) = parse("CHAINBATCH_BATCH_SIZE")? {
            self.starting_batch_size = n;
        }
        if let Some(n) = parse("CHAINBATCH_MAX_WORKERS")? {
            self.max_workers = n;
        }
        if let Some(n) = parse("CHAINBATCH_QUEUE_BOUND")? {
            self.queue_bound = n;
        }
        self.validate()?;
        Ok(self)
    }
}
