//! grabit core - resumable single-file downloads
//!
//! A [`DownloadController`] owns one download: it starts a transfer session
//! as soon as it is built, accepts pause/resume/cancel from any thread, and
//! broadcasts [`DownloadEvent`]s to subscribers. Sessions resume with HTTP
//! range requests and keep the destination length equal to the transferred
//! byte count whenever they stop.

pub mod config;
mod engine;
mod error;
mod link;

pub use config::{build_client, default_config_path, load_settings, load_settings_or_default};
pub use engine::*;
pub use error::*;
pub use link::*;

pub use grabit_types::{
    DownloadEvent, DownloadFailure, DownloadSnapshot, DownloadStatus, ErrorKind, LinkInfo,
    ResumePolicy, Settings,
};
