//! Error types for RouterOS facility operations.
//!
//! Errors carry a [`ErrorKind`] so callers can decide whether to retry and
//! how to report a failure. Only transport timeouts are retryable, and only
//! for reads; writes are issued exactly once.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Kinds of errors, used for retry decisions and task reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// A required record or field does not exist
    NotFound,
    /// More than one record matched where exactly one was required
    AmbiguousMatch,
    /// Two desired records (or extracted rows) share an identity
    DuplicateKey,
    /// The operation is not allowed on this facility shape or backend
    UnsupportedOperation,
    /// A value cannot be rendered as a device literal
    EncodingError,
    /// A round trip exceeded the transport timeout
    TransportTimeout,
    /// A live apply stopped part-way through its plan
    PartialApply,
    /// A task definition failed validation
    InvalidTask,
    /// The device rejected a command
    CommandFailed,
    /// The connection itself failed
    Transport,
    /// Local filesystem error
    Io,
    /// Snapshot or output serialization error
    Json,
}

impl ErrorKind {
    /// Whether this kind of error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransportTimeout)
    }

    /// Short user-facing description of this kind.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NotFound => "Not found",
            Self::AmbiguousMatch => "Ambiguous match",
            Self::DuplicateKey => "Duplicate key",
            Self::UnsupportedOperation => "Unsupported operation",
            Self::EncodingError => "Encoding error",
            Self::TransportTimeout => "Transport timeout",
            Self::PartialApply => "Partially applied",
            Self::InvalidTask => "Invalid task",
            Self::CommandFailed => "Command rejected by device",
            Self::Transport => "Connection failed",
            Self::Io => "I/O error",
            Self::Json => "Serialization error",
        }
    }

    /// Actionable advice for resolving this kind of error.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::NotFound => "Check the find criteria, or use notfound-is-ok if absence is expected",
            Self::AmbiguousMatch => "Narrow the find criteria so exactly one record matches",
            Self::DuplicateKey => "Make the key fields unique across the desired records",
            Self::UnsupportedOperation => "Check the facility path and the task mode",
            Self::EncodingError => "Use the { literal = ... } form or remove control characters",
            Self::TransportTimeout => "Check reachability of the device or raise timeout_secs",
            Self::PartialApply => "Re-run the task; reconciliation converges from any state",
            Self::InvalidTask => "Fix the task definition",
            Self::CommandFailed => "Inspect the device response for the rejected parameter",
            Self::Transport => "Check ssh access, credentials and the inventory entry",
            Self::Io => "Check file paths and permissions",
            Self::Json => "Check the snapshot or task file syntax",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Errors that can occur while reading or reconciling a facility.
#[derive(Debug, Error)]
pub enum Error {
    /// A required record or field does not exist
    #[error("not found: {what}")]
    NotFound {
        /// What was looked for
        what: String,
    },

    /// More than one record matched a single-record lookup
    #[error("{count} records match {what}, expected exactly one")]
    AmbiguousMatch {
        /// What was looked for
        what: String,
        /// Number of matching records
        count: usize,
    },

    /// Two desired records share a key tuple
    #[error("duplicate key: {key}")]
    DuplicateKey {
        /// Rendered key tuple
        key: String,
    },

    /// Operation not permitted on this facility or backend
    #[error("unsupported operation {operation}: {reason}")]
    UnsupportedOperation {
        /// Operation that was attempted
        operation: String,
        /// Why it is not allowed
        reason: String,
    },

    /// Value cannot round-trip through the device syntax
    #[error("cannot encode value: {message}")]
    Encoding {
        /// What is wrong with the value
        message: String,
    },

    /// A round trip exceeded the configured timeout
    #[error("timed out after {}s talking to {host}", after.as_secs())]
    TransportTimeout {
        /// Device host
        host: String,
        /// Elapsed time before giving up
        after: Duration,
    },

    /// The connection failed
    #[error("transport error on {host}: {message}")]
    Transport {
        /// Device host
        host: String,
        /// Output of the failed connection attempt
        message: String,
    },

    /// The device rejected a command
    #[error("command failed: {message} (command: {command})")]
    CommandFailed {
        /// The command that was sent
        command: String,
        /// The device's failure output
        message: String,
    },

    /// A task failed validation
    #[error("invalid task: {0}")]
    InvalidTask(String),

    /// A live apply stopped after some operations succeeded
    #[error("applied {applied} operation(s) before failing: {source}")]
    PartialApply {
        /// Number of operations that succeeded
        applied: usize,
        /// Plan index of the last successful operation
        last_applied: Option<usize>,
        /// The failure that stopped the apply
        source: Box<Error>,
    },

    /// An error raised while reconciling a task
    #[error("{path} [{mode}]{}: {source}", record.map(|r| format!(" record #{r}")).unwrap_or_default())]
    InTask {
        /// Facility path of the task
        path: String,
        /// Reconciliation mode of the task
        mode: String,
        /// Index of the desired record being processed, if any
        record: Option<usize>,
        /// The underlying error
        source: Box<Error>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Get the error kind, looking through task context wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::AmbiguousMatch { .. } => ErrorKind::AmbiguousMatch,
            Error::DuplicateKey { .. } => ErrorKind::DuplicateKey,
            Error::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
            Error::Encoding { .. } => ErrorKind::EncodingError,
            Error::TransportTimeout { .. } => ErrorKind::TransportTimeout,
            Error::Transport { .. } => ErrorKind::Transport,
            Error::CommandFailed { .. } => ErrorKind::CommandFailed,
            Error::InvalidTask(_) => ErrorKind::InvalidTask,
            Error::PartialApply { .. } => ErrorKind::PartialApply,
            Error::InTask { source, .. } => source.kind(),
            Error::Io(_) => ErrorKind::Io,
            Error::Json(_) => ErrorKind::Json,
        }
    }

    /// Whether this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Number of writes that reached the device before this error.
    pub fn applied_writes(&self) -> usize {
        match self {
            Error::PartialApply { applied, .. } => *applied,
            Error::InTask { source, .. } => source.applied_writes(),
            _ => 0,
        }
    }

    /// Shorthand for a [`Error::NotFound`].
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound { what: what.into() }
    }

    /// Shorthand for an [`Error::UnsupportedOperation`].
    pub fn unsupported(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::UnsupportedOperation {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for an [`Error::Encoding`].
    pub fn encoding(message: impl Into<String>) -> Self {
        Error::Encoding {
            message: message.into(),
        }
    }

    /// Wrap this error with the task it was raised in.
    pub fn in_task(self, path: impl Into<String>, mode: impl Into<String>, record: Option<usize>) -> Self {
        Error::InTask {
            path: path.into(),
            mode: mode.into(),
            record,
            source: Box::new(self),
        }
    }

    /// Scan a device response for failure markers.
    ///
    /// RouterOS reports most failures in-band on stdout rather than through
    /// the ssh exit status, so every response is checked.
    pub fn from_response(command: &str, response: &str) -> Option<Self> {
        const MARKERS: &[&str] = &[
            "<FAILED>",
            "failure: ",
            "syntax error",
            "input does not match",
            "expected ",
            "bad command",
            "invalid value",
            "no such item",
            "missing value",
            "invalid internal item number",
            "ambiguous value",
        ];

        let lowered = response.to_lowercase();
        if MARKERS.iter().any(|m| lowered.contains(&m.to_lowercase())) {
            return Some(Error::CommandFailed {
                command: command.to_string(),
                message: response.trim().to_string(),
            });
        }
        None
    }
}

/// Result type for RouterOS operations.
pub type Result<T> = std::result::Result<T, Error>;
