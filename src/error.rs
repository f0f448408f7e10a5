//! Error types for eventcheck.
//!
//! All errors are strongly typed using thiserror. Non-matching events are
//! never errors: they are diagnostics recorded by the checker tree. Limit
//! exhaustion, stream faults and cancellation are run outcomes, surfaced
//! through [`crate::report::Outcome`]. The types here cover construction
//! mistakes and the handful of runner/source/report failures.

use thiserror::Error;

/// Errors raised while building matchers, checkers, trees or limits.
///
/// These are caught at test-definition time, never during streaming.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Checker name cannot be empty")]
    EmptyCheckerName,

    #[error("Checker name '{name}' may only use ASCII letters, digits, '-', '_' and '.'")]
    InvalidCheckerName {
        name: String,
    },

    #[error("Node name cannot be empty (node #{index})")]
    EmptyNodeName {
        index: usize,
    },

    #[error("Duplicate node name '{name}'")]
    DuplicateNodeName {
        name: String,
    },

    #[error("Checker tree '{checker}' has no nodes")]
    EmptyTree {
        checker: String,
    },

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        pattern: String,
        reason: String,
    },

    #[error("Invalid run limit: {reason}")]
    InvalidLimit {
        reason: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Errors returned by the stream runner handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunnerError {
    #[error("Wait timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Report is not available until the run reaches a terminal state")]
    NotReady,

    #[error("Run was cancelled")]
    Cancelled,

    #[error("Event stream fault: {message}")]
    StreamFault {
        message: String,
    },

    #[error("Failed to spawn runner worker: {message}")]
    Spawn {
        message: String,
    },
}

impl RunnerError {
    pub(crate) fn timeout(duration: std::time::Duration) -> Self {
        Self::Timeout {
            duration_ms: duration.as_millis().min(u128::from(u64::MAX)) as u64,
        }
    }
}

/// Errors produced by event sources.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("Failed to connect to event source '{endpoint}': {message}")]
    Connect {
        endpoint: String,
        message: String,
    },

    #[error("Event source '{endpoint}' disconnected")]
    Disconnected {
        endpoint: String,
    },

    #[error("Failed to decode event: {message}")]
    Decode {
        message: String,
    },

    #[error("Event source was already subscribed")]
    AlreadySubscribed,
}

/// Errors writing or loading persisted documents.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize '{path}': {message}")]
    Serialize {
        path: String,
        message: String,
    },
}

/// Top-level error type for eventcheck.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),
}

impl CheckError {
    /// Returns true if this is a construction-time error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if the failure came from the event infrastructure
    /// rather than from the expectations themselves.
    #[must_use]
    pub const fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::Source(_) | Self::Runner(RunnerError::StreamFault { .. } | RunnerError::Spawn { .. })
        )
    }

    /// Returns true if the failure stems from an explicit cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Runner(RunnerError::Cancelled))
    }
}

/// Result type alias for eventcheck operations.
pub type CheckResult<T> = Result<T, CheckError>;
