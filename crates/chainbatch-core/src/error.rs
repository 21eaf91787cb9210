//! Error types: handler failures and executor-level errors.
//!
//! Handlers classify their failures into a closed set of [`FailureKind`]s at
//! the point where the I/O error is first observed. The executor only ever
//! looks at the kind to decide between retry and abort.

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of failure categories a batch handler can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The remote end reset or dropped the connection mid-request.
    ConnectionReset,
    /// The connection could not be established.
    Connection,
    /// The request timed out.
    Timeout,
    /// The response was truncated, interrupted or otherwise malformed.
    MalformedResponse,
    /// The server redirected too many times.
    TooManyRedirects,
    /// The server throttled the request.
    RateLimited,
    /// Non-success HTTP status.
    HttpStatus,
    /// Any other I/O failure.
    Io,
    /// A structured response body could not be decoded.
    Decode,
    /// The remote side executed the request and rejected it.
    Execution,
    /// Anything else.
    Other,
}

impl FailureKind {
    /// Every kind, in declaration order.
    pub const ALL: [FailureKind; 11] = [
        Self::ConnectionReset,
        Self::Connection,
        Self::Timeout,
        Self::MalformedResponse,
        Self::TooManyRedirects,
        Self::RateLimited,
        Self::HttpStatus,
        Self::Io,
        Self::Decode,
        Self::Execution,
        Self::Other,
    ];

    /// Returns `true` for the kinds retried when no explicit set is configured.
    pub fn is_transient_by_default(&self) -> bool {
        !matches!(self, Self::Execution | Self::Other)
    }

    /// The default retryable set.
    pub fn default_transient() -> Vec<FailureKind> {
        Self::ALL
            .into_iter()
            .filter(FailureKind::is_transient_by_default)
            .collect()
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ConnectionReset => "connection reset",
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::MalformedResponse => "malformed response",
            Self::TooManyRedirects => "too many redirects",
            Self::RateLimited => "rate limited",
            Self::HttpStatus => "http status",
            Self::Io => "io",
            Self::Decode => "decode",
            Self::Execution => "execution",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// A classified failure returned by a batch handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} error: {message}")]
pub struct WorkError {
    pub kind: FailureKind,
    pub message: String,
}

impl WorkError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connection_reset(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ConnectionReset, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(FailureKind::RateLimited, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Decode, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Execution, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Other, message)
    }
}

impl From<io::Error> for WorkError {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => FailureKind::ConnectionReset,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::NotConnected
            | io::ErrorKind::AddrNotAvailable => FailureKind::Connection,
            io::ErrorKind::TimedOut => FailureKind::Timeout,
            io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => {
                FailureKind::MalformedResponse
            }
            _ => FailureKind::Io,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<serde_json::Error> for WorkError {
    fn from(err: serde_json::Error) -> Self {
        let kind = match err.classify() {
            serde_json::error::Category::Io => FailureKind::Io,
            serde_json::error::Category::Eof => FailureKind::MalformedResponse,
            _ => FailureKind::Decode,
        };
        Self::new(kind, err.to_string())
    }
}

#[cfg(feature = "reqwest")]
impl From<reqwest::Error> for WorkError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            FailureKind::Timeout
        } else if err.is_redirect() {
            FailureKind::TooManyRedirects
        } else if err.is_connect() {
            FailureKind::Connection
        } else if let Some(status) = err.status() {
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                FailureKind::RateLimited
            } else {
                FailureKind::HttpStatus
            }
        } else if err.is_decode() {
            FailureKind::Decode
        } else if err.is_body() || err.is_request() {
            FailureKind::MalformedResponse
        } else {
            FailureKind::Other
        };
        Self::new(kind, err.to_string())
    }
}

/// Errors surfaced by the pool and the executor.
///
/// `Clone` so a latched failure can be handed back on every rejected submit.
#[derive(Debug, Clone, Error)]
pub enum ExecutorError {
    /// The handler failed with a non-retryable error.
    #[error("batch handler failed: {0}")]
    Handler(WorkError),

    /// An item failed while its batch was being retried one item at a time.
    #[error("item {position} failed during per-item retry: {source}")]
    ItemRetry { position: usize, source: WorkError },

    /// A submitted task panicked.
    #[error("task panicked: {0}")]
    TaskPanicked(String),

    /// The pool no longer accepts work.
    #[error("worker pool is shut down")]
    PoolClosed,

    /// The pool was built outside of a Tokio runtime.
    #[error("no Tokio runtime available to spawn workers")]
    NoRuntime,

    /// Configuration values out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ExecutorError {
    /// The underlying handler error, if this failure came from a handler.
    pub fn work_error(&self) -> Option<&WorkError> {
        match self {
            Self::Handler(e) | Self::ItemRetry { source: e, .. } => Some(e),
            _ => None,
        }
    }
}
