//! Transfer session - streams one HTTP response into the destination file
//!
//! A session covers a single connection. It resumes from the byte count the
//! download already holds, writes every chunk through to the file and stops as
//! soon as the controller signals a pause or cancel.

use crate::error::GrabitError;
use futures::StreamExt;
use grabit_types::{DownloadEvent, ResumePolicy, Settings};
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Client, Response, StatusCode};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const UNKNOWN_SIZE: u64 = u64::MAX;

/// Control signal sent from the controller to a running session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    Run,
    Pause,
    Cancel,
}

/// How a session ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferOutcome {
    /// Every byte of the resource is on disk
    Complete,
    /// Stopped on request; the file holds exactly `bytes_transferred` bytes
    Suspended,
}

/// Byte counters shared between the controller and its sessions
///
/// Only the running session writes these after construction.
#[derive(Debug)]
pub(crate) struct TransferProgress {
    bytes_transferred: AtomicU64,
    total_size: AtomicU64,
}

impl TransferProgress {
    pub fn new(bytes_transferred: u64) -> Self {
        Self {
            bytes_transferred: AtomicU64::new(bytes_transferred),
            total_size: AtomicU64::new(UNKNOWN_SIZE),
        }
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Acquire)
    }

    pub fn total_size(&self) -> Option<u64> {
        match self.total_size.load(Ordering::Acquire) {
            UNKNOWN_SIZE => None,
            size => Some(size),
        }
    }

    fn set_total_size(&self, size: u64) {
        self.total_size.store(size, Ordering::Release);
    }

    fn advance(&self, len: u64) -> u64 {
        self.bytes_transferred.fetch_add(len, Ordering::AcqRel) + len
    }

    /// Start over from byte 0 with a new total
    fn reset(&self, total_size: u64) {
        self.bytes_transferred.store(0, Ordering::Release);
        self.set_total_size(total_size);
    }
}

/// Where the response body lands in the destination file
struct BodyPlan {
    start: u64,
    total: Option<u64>,
}

/// One network connection plus file handle covering a contiguous byte range
pub(crate) struct TransferSession {
    url: String,
    destination: PathBuf,
    client: Client,
    resume_policy: ResumePolicy,
    read_timeout: Duration,
    progress_interval: Duration,
    progress: Arc<TransferProgress>,
    signal: watch::Receiver<Signal>,
    event_tx: broadcast::Sender<DownloadEvent>,
}

impl TransferSession {
    pub fn new(
        url: String,
        destination: PathBuf,
        client: Client,
        settings: &Settings,
        progress: Arc<TransferProgress>,
        signal: watch::Receiver<Signal>,
        event_tx: broadcast::Sender<DownloadEvent>,
    ) -> Self {
        Self {
            url,
            destination,
            client,
            resume_policy: settings.resume_policy,
            read_timeout: Duration::from_secs(settings.read_timeout_secs.max(1)),
            progress_interval: Duration::from_millis(settings.progress_interval_ms),
            progress,
            signal,
            event_tx,
        }
    }

    /// Run the session until completion, suspension or failure
    pub async fn run(mut self) -> Result<TransferOutcome, GrabitError> {
        let offset = self.progress.bytes_transferred();

        if self.stop_requested() {
            debug!("Session for {} stopped before connecting", self.url);
            return Ok(TransferOutcome::Suspended);
        }

        // A pause that raced with the final chunk leaves nothing to fetch
        if offset > 0 && self.progress.total_size() == Some(offset) {
            info!("Nothing left to transfer for {} ({} bytes)", self.url, offset);
            return Ok(TransferOutcome::Complete);
        }

        info!("Starting transfer of {} at byte {}", self.url, offset);

        let mut request = self.client.get(&self.url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }

        let response = tokio::select! {
            biased;
            _ = wait_for_stop(&mut self.signal) => None,
            response = tokio::time::timeout(self.read_timeout, request.send()) => Some(response),
        };
        let Some(response) = response else {
            info!("Session for {} stopped while connecting", self.url);
            return Ok(TransferOutcome::Suspended);
        };
        let response = response.map_err(|_| GrabitError::Timeout)??;

        if self.already_complete(&response, offset) {
            info!("Server reports {} already complete at {} bytes", self.url, offset);
            self.progress.set_total_size(offset);
            return Ok(TransferOutcome::Complete);
        }

        let plan = self.validate(&response, offset)?;
        let mut file = open_destination(&self.destination, plan.start).await?;

        match plan.total {
            Some(total) if plan.start == 0 => self.progress.reset(total),
            Some(total) => self.progress.set_total_size(total),
            None => debug!("Resumed {} without a known total size", self.url),
        }

        let result = self.stream_body(&mut file, response).await;
        let outcome = close_destination(file, result).await?;
        if outcome == TransferOutcome::Complete {
            info!(
                "Transfer of {} complete ({} bytes)",
                self.url,
                self.progress.bytes_transferred()
            );
        }
        Ok(outcome)
    }

    /// `416` with `Content-Range: bytes */<offset>` means the file on disk is whole
    fn already_complete(&self, response: &Response, offset: u64) -> bool {
        offset > 0
            && response.status() == StatusCode::RANGE_NOT_SATISFIABLE
            && response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_unsatisfied_range)
                == Some(offset)
    }

    /// Check the response against the requested offset
    ///
    /// The body starts at byte 0 when the server ignored the range and the
    /// resume policy allows a restart.
    fn validate(&self, response: &Response, offset: u64) -> Result<BodyPlan, GrabitError> {
        let status = response.status();
        if !status.is_success() {
            return Err(GrabitError::BadStatus(status.as_u16()));
        }

        let content_length = header_u64(response, CONTENT_LENGTH.as_str());

        if offset > 0 && status == StatusCode::PARTIAL_CONTENT {
            let content_range = response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok());

            let total = match content_range {
                Some(value) => match parse_content_range(value) {
                    Some((range_start, _)) if range_start != offset => {
                        return Err(GrabitError::UnexpectedRange {
                            requested: offset,
                            received: value.to_string(),
                        });
                    }
                    Some((_, total)) => total,
                    None => {
                        return Err(GrabitError::UnexpectedRange {
                            requested: offset,
                            received: value.to_string(),
                        });
                    }
                },
                None => None,
            };

            let total = total
                .or_else(|| content_length.map(|len| offset + len))
                .or_else(|| self.progress.total_size());

            if matches!(total, Some(total) if total < offset) {
                return Err(GrabitError::InvalidContentLength);
            }

            info!("Server resumed {} at byte {}", self.url, offset);
            return Ok(BodyPlan {
                start: offset,
                total,
            });
        }

        if offset > 0 {
            match self.resume_policy {
                ResumePolicy::Fail => return Err(GrabitError::ResumeUnsupported),
                ResumePolicy::Restart => {
                    warn!(
                        "Server ignored range request for {} (status {}), restarting from byte 0",
                        self.url, status
                    );
                }
            }
        }

        match content_length {
            Some(len) if len > 0 => Ok(BodyPlan {
                start: 0,
                total: Some(len),
            }),
            _ => Err(GrabitError::InvalidContentLength),
        }
    }

    /// Stream and write chunks until the body ends or a stop is requested
    async fn stream_body(
        &mut self,
        file: &mut File,
        response: Response,
    ) -> Result<TransferOutcome, GrabitError> {
        let total = self.progress.total_size();
        let mut stream = response.bytes_stream();
        let mut last_event_emit = Instant::now();

        loop {
            // Check pause/cancel before every read
            if self.stop_requested() {
                info!(
                    "Session for {} suspended at byte {}",
                    self.url,
                    self.progress.bytes_transferred()
                );
                return Ok(TransferOutcome::Suspended);
            }

            let next = tokio::select! {
                biased;
                _ = wait_for_stop(&mut self.signal) => continue,
                next = tokio::time::timeout(self.read_timeout, stream.next()) => next,
            };

            let Some(chunk_result) = next.map_err(|_| GrabitError::Timeout)? else {
                break;
            };
            let chunk = chunk_result?;
            let chunk_len = chunk.len() as u64;
            let written = self.progress.bytes_transferred();

            if let Some(total) = total {
                if written + chunk_len > total {
                    return Err(GrabitError::Overrun { expected: total });
                }
            }

            write_chunk(file, &chunk, written).await?;

            let transferred = self.progress.advance(chunk_len);

            if last_event_emit.elapsed() >= self.progress_interval {
                let _ = self.event_tx.send(DownloadEvent::Progress {
                    bytes_transferred: transferred,
                    total_size: total,
                });
                last_event_emit = Instant::now();
            }
        }

        let transferred = self.progress.bytes_transferred();
        match total {
            Some(expected) if transferred < expected => Err(GrabitError::Truncated {
                received: transferred,
                expected,
            }),
            Some(_) => Ok(TransferOutcome::Complete),
            None => {
                self.progress.set_total_size(transferred);
                Ok(TransferOutcome::Complete)
            }
        }
    }

    /// A dropped controller counts as a cancel
    fn stop_requested(&self) -> bool {
        self.signal.has_changed().is_err() || *self.signal.borrow() != Signal::Run
    }
}

/// Resolves once the controller asks the session to stop or goes away
async fn wait_for_stop(signal: &mut watch::Receiver<Signal>) {
    let _ = signal.wait_for(|s| *s != Signal::Run).await;
}

/// Open the destination positioned at `offset`, dropping anything past it
async fn open_destination(path: &Path, offset: u64) -> Result<File, GrabitError> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .await?;

    let existing = file.metadata().await?.len();
    if existing < offset {
        return Err(GrabitError::Storage(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "{} holds {} bytes but {} were already transferred",
                path.display(),
                existing,
                offset
            ),
        )));
    }
    if existing > offset {
        debug!("Truncating {} from {} to {} bytes", path.display(), existing, offset);
        file.set_len(offset).await?;
    }
    file.seek(SeekFrom::Start(offset)).await?;

    Ok(file)
}

/// Flush and close the file on every exit path
///
/// Close failures only surface when the session otherwise succeeded.
async fn close_destination(
    mut file: File,
    result: Result<TransferOutcome, GrabitError>,
) -> Result<TransferOutcome, GrabitError> {
    match result {
        Ok(TransferOutcome::Complete) => {
            file.flush().await?;
            file.sync_all().await?;
            Ok(TransferOutcome::Complete)
        }
        Ok(outcome) => {
            file.flush().await?;
            Ok(outcome)
        }
        Err(e) => {
            if let Err(close_err) = file.flush().await {
                debug!("Ignoring flush failure after error: {}", close_err);
            }
            Err(e)
        }
    }
}

/// The chunk only counts once it is fully handed to the OS
///
/// On failure the file is cut back to `written` bytes, dropping whatever part
/// of the chunk reached it.
async fn write_chunk(file: &mut File, chunk: &[u8], written: u64) -> Result<(), GrabitError> {
    let result = async {
        file.write_all(chunk).await?;
        file.flush().await
    }
    .await;

    if let Err(e) = result {
        if let Err(truncate_err) = file.set_len(written).await {
            debug!("Failed to roll back partial write: {}", truncate_err);
        }
        return Err(e.into());
    }
    Ok(())
}

fn header_u64(response: &Response, name: &str) -> Option<u64> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Parse `bytes <start>-<end>/<total>` into the start offset and total size
fn parse_content_range(value: &str) -> Option<(u64, Option<u64>)> {
    let range = value.trim().strip_prefix("bytes")?.trim_start();
    let (span, total) = range.split_once('/')?;
    let (start, end) = span.split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = end.trim().parse().ok()?;
    if end < start {
        return None;
    }
    let total = match total.trim() {
        "*" => None,
        total => Some(total.parse().ok()?),
    };
    Some((start, total))
}

/// Parse the `bytes */<total>` form sent with a `416`
fn parse_unsatisfied_range(value: &str) -> Option<u64> {
    value
        .trim()
        .strip_prefix("bytes")?
        .trim_start()
        .strip_prefix("*/")?
        .trim()
        .parse()
        .ok()
}
