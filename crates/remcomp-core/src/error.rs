//! Error types for the remote variable client.
//!
//! Failures are split by where they happen: before the wire (validation and
//! handle lifecycle), inside the kernel (nonzero status codes), in the shape of
//! a successful reply, or in the transport itself. Callers can match on the
//! variant to tell them apart; nothing is retried or swallowed here.

use std::time::Duration;
use thiserror::Error;

/// Main error type for remote variable operations.
#[derive(Debug, Error)]
pub enum RemoteError {
    // Local, pre-network failures
    #[error("{operation} on {target} rejected: {message}")]
    Validation {
        operation: &'static str,
        target: String,
        message: String,
    },

    #[error("{operation} on variable {handle} rejected: handle is {state}")]
    HandleNotLive {
        operation: &'static str,
        handle: i32,
        state: &'static str,
    },

    // Kernel-reported failures
    #[error("kernel returned status {code} for {operation} on {target}")]
    Kernel {
        operation: &'static str,
        target: String,
        code: i32,
    },

    #[error(
        "{operation} on {target}: expected rank {expected_rank}, kernel reported dimensions {dimensions:?} with {elements} elements"
    )]
    ShapeMismatch {
        operation: &'static str,
        target: String,
        expected_rank: usize,
        dimensions: Vec<u32>,
        elements: usize,
    },

    // Transport failures
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: String,
        after: Duration,
    },

    #[error("Protocol error: {message}")]
    Protocol { message: String },
}

/// Result type alias for remote variable operations.
pub type Result<T> = std::result::Result<T, RemoteError>;

impl From<std::io::Error> for RemoteError {
    fn from(err: std::io::Error) -> Self {
        RemoteError::Transport {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        RemoteError::Protocol {
            message: format!("JSON error: {}", err),
        }
    }
}

impl RemoteError {
    pub(crate) fn validation(
        operation: &'static str,
        target: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        RemoteError::Validation {
            operation,
            target: target.into(),
            message: message.into(),
        }
    }

    pub(crate) fn transport(message: impl Into<String>) -> Self {
        RemoteError::Transport {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        RemoteError::Protocol {
            message: message.into(),
        }
    }

    /// True if the failure was detected before anything was sent.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            RemoteError::Validation { .. } | RemoteError::HandleNotLive { .. }
        )
    }

    /// True if the call itself failed and no kernel semantics apply.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RemoteError::Transport { .. } | RemoteError::Timeout { .. }
        )
    }

    /// The verbatim kernel status code, if the kernel reported one.
    pub fn kernel_code(&self) -> Option<i32> {
        match self {
            RemoteError::Kernel { code, .. } => Some(*code),
            _ => None,
        }
    }
}
