//! Error types for sigmerge
//!
//! Per-commit verification failures are not errors: they are outcomes
//! aggregated into the verdict. Everything here is either fatal for a phase
//! or a signal to the resilience layer.

use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the gate
#[derive(Debug, Error)]
pub enum Error {
    /// Allowed-signers policy could not be parsed
    #[error("allowed signers line {line}: {message}")]
    Policy {
        /// 1-based line number in the policy text
        line: usize,
        /// What was wrong with the line
        message: String,
    },

    /// A ref could not be resolved to a commit
    #[error("cannot resolve ref '{0}'")]
    RefNotFound(String),

    /// Local history does not reach the merge base
    #[error("history is too shallow to enumerate {base}..{head}")]
    ShallowHistory {
        /// Base ref as given by the caller
        base: String,
        /// Head ref as given by the caller
        head: String,
    },

    /// A range object is missing locally or is not a commit
    #[error("invalid commit object {sha}: {message}")]
    InvalidObject {
        /// Object id that failed
        sha: String,
        /// What was wrong
        message: String,
    },

    /// A git invocation failed
    #[error("git {operation} failed: {message}")]
    Git {
        /// Logical operation (e.g. "rev-parse")
        operation: String,
        /// Redacted stderr / failure description
        message: String,
        /// Whether retrying may succeed
        transient: bool,
    },

    /// A single external call exceeded its timeout
    #[error("{operation} timed out after {after:?}")]
    CallTimeout {
        /// Operation that timed out
        operation: String,
        /// Configured per-call timeout
        after: Duration,
    },

    /// Transient failures persisted past the retry budget
    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Operation that was retried
        operation: String,
        /// Attempts made
        attempts: u32,
        /// Last error message
        last: String,
    },

    /// A rate-limit bucket is empty and does not refill
    #[error("rate limit exceeded for '{category}'")]
    RateLimited {
        /// Bucket category
        category: String,
    },

    /// The invocation deadline expired
    #[error("invocation deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Internal invariant violated
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the resilience layer should retry the failed call
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Git {
                transient: true,
                ..
            } | Self::CallTimeout { .. }
        )
    }

    /// Stable machine-readable tag for reports
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Policy { .. } => "policy",
            Self::RefNotFound(_) => "ref_not_found",
            Self::ShallowHistory { .. } => "shallow_history",
            Self::InvalidObject { .. } => "invalid_object",
            Self::Git { .. } => "git",
            Self::CallTimeout { .. } => "call_timeout",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::RateLimited { .. } => "rate_limited",
            Self::DeadlineExceeded(_) => "deadline_exceeded",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Internal(_) => "internal",
        }
    }

    /// Operator-facing hint for errors that have a known fix
    pub const fn remediation(&self) -> Option<&'static str> {
        match self {
            Self::ShallowHistory { .. } => Some(
                "fetch full history before running (e.g. `git fetch --unshallow`, or \
                 `fetch-depth: 0` on actions/checkout)",
            ),
            Self::RefNotFound(_) => {
                Some("make sure both base and head refs are fetched into the local clone")
            }
            Self::Policy { .. } => Some(
                "each allowed signer needs `<principal> [options] <key-type> <base64-key>`",
            ),
            Self::DeadlineExceeded(_) => Some("raise `deadline_secs` or reduce the range size"),
            Self::RateLimited { .. } => Some("raise the bucket capacity in `rate_limits`"),
            _ => None,
        }
    }
}
