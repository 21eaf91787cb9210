//! # chainbatch-observability
//!
//! Subscriber setup for ChainBatch binaries. Libraries only emit `tracing`
//! events; installing a subscriber is left to the application.
//!
//! ## Structured logging
//! Text or JSON output, with a global level and per-component overrides.
//! `RUST_LOG` takes precedence when set.

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, LogConfig};
