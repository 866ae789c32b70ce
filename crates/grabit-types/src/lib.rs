//! Shared types for grabit
//!
//! This crate contains the data structures shared between the core
//! download engine and the CLI.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Download Types
// ============================================================================

/// Point-in-time view of a single download
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadSnapshot {
    pub source: String,
    pub destination: PathBuf,
    pub total_size: Option<u64>,
    pub bytes_transferred: u64,
    pub status: DownloadStatus,
}

impl DownloadSnapshot {
    /// Percentage of the resource written to disk, `0.0` while the size is unknown
    pub fn progress(&self) -> f64 {
        match self.total_size {
            Some(size) if size > 0 => (self.bytes_transferred as f64 / size as f64) * 100.0,
            _ => 0.0,
        }
    }
}

/// Status of a download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "state", content = "failure")]
pub enum DownloadStatus {
    Downloading,
    Paused,
    Complete,
    Cancelled,
    Error(DownloadFailure),
}

impl DownloadStatus {
    /// Terminal statuses never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadStatus::Complete | DownloadStatus::Cancelled | DownloadStatus::Error(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Paused => "paused",
            DownloadStatus::Complete => "complete",
            DownloadStatus::Cancelled => "cancelled",
            DownloadStatus::Error(_) => "error",
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadStatus::Error(failure) => write!(f, "error ({})", failure),
            other => f.write_str(other.name()),
        }
    }
}

/// Why a download ended in the error state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadFailure {
    pub kind: ErrorKind,
    pub reason: String,
}

impl DownloadFailure {
    pub fn new(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for DownloadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.reason)
    }
}

/// Coarse classification of transfer failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Connection failure, timeout, reset or truncated body
    Network,
    /// Bad status code, missing/invalid length, unsupported resume
    Protocol,
    /// Destination file could not be opened or written
    Storage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Network => "network error",
            ErrorKind::Protocol => "protocol error",
            ErrorKind::Storage => "storage error",
        })
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// Events pushed to download subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum DownloadEvent {
    /// Emitted exactly once per state transition
    StatusChanged {
        status: DownloadStatus,
        bytes_transferred: u64,
        total_size: Option<u64>,
    },
    /// Throttled byte-count update while a session is streaming
    Progress {
        bytes_transferred: u64,
        total_size: Option<u64>,
    },
}

// ============================================================================
// Settings Types
// ============================================================================

/// What to do when a ranged request is answered with a full `200` body
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResumePolicy {
    /// Truncate the destination and take the full body from byte 0
    #[default]
    Restart,
    /// End the download with a protocol error and leave the file as is
    Fail,
}

impl fmt::Display for ResumePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResumePolicy::Restart => "restart",
            ResumePolicy::Fail => "fail",
        })
    }
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    /// Longest silence tolerated while waiting for the next body chunk
    pub read_timeout_secs: u64,
    /// Minimum spacing between two progress events
    pub progress_interval_ms: u64,
    /// Buffer size of the event broadcast channel
    pub event_capacity: usize,
    pub resume_policy: ResumePolicy,
    /// Proxy URL applied to all schemes
    pub proxy: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            user_agent: concat!("grabit/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout_secs: 30,
            read_timeout_secs: 60,
            progress_interval_ms: 250,
            event_capacity: 256,
            resume_policy: ResumePolicy::Restart,
            proxy: None,
        }
    }
}

// ============================================================================
// API Types
// ============================================================================

/// Information about a link (from probing)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkInfo {
    pub url: String,
    pub final_url: Option<String>,
    pub filename: String,
    pub size: Option<u64>,
    pub content_type: Option<String>,
    pub resumable: bool,
}
