//! Progress tracking for batch runs.
//!
//! [`ProgressLogger`] counts processed items and logs a line through `tracing`
//! whenever the count crosses a percentage step (known total) or an item step
//! (unknown total). `track` is called concurrently from workers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

/// The start/track/finish contract the executor drives.
pub trait ProgressTracker: Send + Sync {
    /// Begin a run. `total_items` is only used for percentage and ETA.
    ///
    /// Counts are cumulative: a second `start` replaces the total but keeps
    /// the items already tracked.
    fn start(&self, total_items: Option<u64>);

    /// Record `count` more processed items. Must tolerate concurrent callers.
    fn track(&self, count: u64);

    /// End the run.
    fn finish(&self);

    /// Current state of the counters.
    fn snapshot(&self) -> ProgressSnapshot;
}

/// Point-in-time view of a run's progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub processed: u64,
    pub total: Option<u64>,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
    /// `None` when no total is known.
    pub percentage: Option<f64>,
    /// Estimated remaining time; `None` without a total or before any progress.
    #[serde(rename = "eta_ms", serialize_with = "opt_as_millis")]
    pub eta: Option<Duration>,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

fn opt_as_millis<S: serde::Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    match d {
        Some(d) => s.serialize_some(&(d.as_millis() as u64)),
        None => s.serialize_none(),
    }
}

#[derive(Debug, Default)]
struct RunState {
    total: Option<u64>,
    started_at: Option<Instant>,
}

/// `tracing`-backed progress tracker.
#[derive(Debug)]
pub struct ProgressLogger {
    name: String,
    percentage_step: u64,
    item_step: u64,
    processed: AtomicU64,
    run: Mutex<RunState>,
}

impl Default for ProgressLogger {
    fn default() -> Self {
        Self::new("work")
    }
}

impl ProgressLogger {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            percentage_step: 10,
            item_step: 5000,
            processed: AtomicU64::new(0),
            run: Mutex::new(RunState::default()),
        }
    }

    /// Log every `step` percent when the total is known (min 1).
    pub fn percentage_step(mut self, step: u64) -> Self {
        self.percentage_step = step.max(1);
        self
    }

    /// Log every `step` items when the total is unknown (min 1).
    pub fn item_step(mut self, step: u64) -> Self {
        self.item_step = step.max(1);
        self
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Acquire)
    }

    fn run_state(&self) -> (Option<u64>, Option<Instant>) {
        let run = self.run.lock().unwrap_or_else(PoisonError::into_inner);
        (run.total, run.started_at)
    }
}

/// Integer percentage of `done` over `total`; a zero total counts as complete.
fn percent(done: u64, total: u64) -> u64 {
    if total == 0 {
        100
    } else {
        done.saturating_mul(100) / total
    }
}

fn estimate_eta(processed: u64, total: u64, elapsed: Duration) -> Option<Duration> {
    if processed == 0 {
        return None;
    }
    let remaining = total.saturating_sub(processed);
    let per_item = elapsed.as_secs_f64() / processed as f64;
    Some(Duration::from_secs_f64(per_item * remaining as f64))
}

impl ProgressTracker for ProgressLogger {
    fn start(&self, total_items: Option<u64>) {
        {
            let mut run = self.run.lock().unwrap_or_else(PoisonError::into_inner);
            run.total = total_items;
            run.started_at.get_or_insert_with(Instant::now);
        }

        match total_items {
            Some(total) => tracing::info!(job = %self.name, total, "Started {}. Items to process: {}", self.name, total),
            None => tracing::info!(job = %self.name, "Started {}", self.name),
        }
    }

    fn track(&self, count: u64) {
        let after = self.processed.fetch_add(count, Ordering::AcqRel) + count;
        let before = after - count;
        let (total, started_at) = self.run_state();

        match total {
            Some(total) => {
                let (pct_before, pct_after) = (percent(before, total), percent(after, total));
                if pct_before / self.percentage_step != pct_after / self.percentage_step {
                    let elapsed = started_at.map(|t| t.elapsed()).unwrap_or_default();
                    let eta_secs = estimate_eta(after, total, elapsed).map(|d| d.as_secs());
                    let overshoot = if pct_after > 100 { "!!!" } else { "" };
                    tracing::info!(
                        job = %self.name,
                        processed = after,
                        total,
                        percent = pct_after,
                        eta_secs,
                        "{} items processed. Progress is {}%{}",
                        after,
                        pct_after,
                        overshoot
                    );
                }
            }
            None => {
                if before / self.item_step != after / self.item_step {
                    tracing::info!(job = %self.name, processed = after, "{} items processed", after);
                }
            }
        }
    }

    fn finish(&self) {
        let (_, started_at) = self.run_state();
        let elapsed = started_at.map(|t| t.elapsed());
        tracing::info!(
            job = %self.name,
            processed = self.processed(),
            elapsed_ms = elapsed.map(|d| d.as_millis() as u64),
            "Finished {}. Total items processed: {}. Took {:?}",
            self.name,
            self.processed(),
            elapsed.unwrap_or_default()
        );
    }

    fn snapshot(&self) -> ProgressSnapshot {
        let processed = self.processed();
        let (total, started_at) = self.run_state();
        let elapsed = started_at.map(|t| t.elapsed()).unwrap_or_default();
        ProgressSnapshot {
            processed,
            total,
            elapsed,
            percentage: total.map(|t| {
                if t == 0 {
                    100.0
                } else {
                    processed as f64 * 100.0 / t as f64
                }
            }),
            eta: total.and_then(|t| estimate_eta(processed, t, elapsed)),
        }
    }
}
