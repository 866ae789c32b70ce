//! Error types for grabit core

use grabit_types::{DownloadFailure, DownloadStatus, ErrorKind};
use std::fmt;
use thiserror::Error;

/// Caller command rejected by the download state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
    Cancel,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Cancel => "cancel",
        })
    }
}

/// Errors that can occur in grabit core
#[derive(Debug, Error)]
pub enum GrabitError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Timed out waiting for data")]
    Timeout,

    #[error("Connection closed after {received} of {expected} bytes")]
    Truncated { received: u64, expected: u64 },

    #[error("bad status {0}")]
    BadStatus(u16),

    #[error("invalid content length")]
    InvalidContentLength,

    #[error("resume unsupported")]
    ResumeUnsupported,

    #[error("Server answered range request at {requested} with {received}")]
    UnexpectedRange { requested: u64, received: String },

    #[error("Server sent more than the announced {expected} bytes")]
    Overrun { expected: u64 },

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Cannot {command} a download that is {from}")]
    InvalidTransition {
        command: Command,
        from: DownloadStatus,
    },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GrabitError {
    /// Failure class for errors that can end a transfer
    ///
    /// Returns `None` for errors that are only ever reported to the caller.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            GrabitError::Network(_) | GrabitError::Timeout | GrabitError::Truncated { .. } => {
                Some(ErrorKind::Network)
            }
            GrabitError::BadStatus(_)
            | GrabitError::InvalidContentLength
            | GrabitError::ResumeUnsupported
            | GrabitError::UnexpectedRange { .. }
            | GrabitError::Overrun { .. } => Some(ErrorKind::Protocol),
            GrabitError::Storage(_) => Some(ErrorKind::Storage),
            GrabitError::InvalidTransition { .. }
            | GrabitError::InvalidUrl(_)
            | GrabitError::Config(_) => None,
        }
    }

    /// Check if calling `resume` on a fresh controller may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            GrabitError::Network(_) | GrabitError::Timeout | GrabitError::Truncated { .. } => true,
            GrabitError::BadStatus(status) => *status >= 500,
            _ => false,
        }
    }

    /// Convert a transfer error into the failure carried by `DownloadStatus::Error`
    pub(crate) fn into_failure(self) -> DownloadFailure {
        // Transition, URL and config errors never come out of a session.
        let kind = self.kind().unwrap_or(ErrorKind::Protocol);
        DownloadFailure::new(kind, self.to_string())
    }
}
