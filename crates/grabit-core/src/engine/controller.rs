//! Download controller - owns the state machine of a single download
//!
//! The controller is the only writer of `status`. Transfer sessions run on
//! their own tokio tasks, write the byte counters, and report back once they
//! end. Reports from a session that is no longer current, or that arrive after
//! a pause or cancel already moved the status, are discarded.
//!
//! Lock discipline: `Inner::state` is a `parking_lot::Mutex` that is never held
//! across an `.await`. Status events are broadcast while holding it so every
//! subscriber observes transitions in the order they happened.

use crate::config::build_client;
use crate::engine::transfer::{Signal, TransferOutcome, TransferProgress, TransferSession};
use crate::error::{Command, GrabitError};
use crate::link::parse_download_url;
use grabit_types::{DownloadEvent, DownloadSnapshot, DownloadStatus, Settings};
use parking_lot::Mutex;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Builder for a [`DownloadController`]
pub struct DownloadBuilder {
    source: String,
    destination: PathBuf,
    settings: Settings,
    client: Option<Client>,
    continue_from_disk: bool,
}

impl DownloadBuilder {
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Share an HTTP client between downloads instead of building one
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Count an existing destination file as already transferred
    ///
    /// This is how a supervisor picks up a download that ended in `Error` or
    /// `Cancelled`: the bytes on disk are kept and the first session asks for
    /// the remainder with a range request.
    pub fn continue_from_disk(mut self, enabled: bool) -> Self {
        self.continue_from_disk = enabled;
        self
    }

    /// Validate the inputs and start the first transfer session
    ///
    /// The download is `Downloading` as soon as this returns. Must be called
    /// from within a tokio runtime; later commands may come from any thread.
    pub fn start(self) -> Result<DownloadController, GrabitError> {
        let url = parse_download_url(&self.source)?;
        let runtime = Handle::try_current().map_err(|_| {
            GrabitError::Config("downloads must be started inside a tokio runtime".to_string())
        })?;

        let client = match self.client {
            Some(client) => client,
            None => build_client(&self.settings)?,
        };

        let offset = if self.continue_from_disk {
            existing_length(&self.destination)?
        } else {
            0
        };

        let (event_tx, _) = broadcast::channel(self.settings.event_capacity.max(1));
        let (status_tx, _) = watch::channel(DownloadStatus::Downloading);
        let (teardown_tx, _) = watch::channel(0u64);

        let inner = Arc::new(Inner {
            source: url.to_string(),
            destination: self.destination,
            client,
            settings: self.settings,
            runtime,
            progress: Arc::new(TransferProgress::new(offset)),
            state: Mutex::new(State {
                status: DownloadStatus::Downloading,
                session: None,
                sessions_started: 0,
            }),
            event_tx,
            status_tx,
            teardown_tx,
        });

        info!(
            "Starting download of {} into {} (offset {})",
            inner.source,
            inner.destination.display(),
            offset
        );

        {
            let mut state = inner.state.lock();
            Inner::spawn_session(&inner, &mut state);
        }

        Ok(DownloadController { inner })
    }
}

/// Handle to one download
///
/// Cloning shares the download. Once the last handle is dropped an active
/// session is aborted and the destination is no longer written.
#[derive(Clone)]
pub struct DownloadController {
    inner: Arc<Inner>,
}

struct Inner {
    source: String,
    destination: PathBuf,
    client: Client,
    settings: Settings,
    runtime: Handle,
    progress: Arc<TransferProgress>,
    state: Mutex<State>,
    event_tx: broadcast::Sender<DownloadEvent>,
    /// Mirrors `State::status` for async waiters
    status_tx: watch::Sender<DownloadStatus>,
    /// Number of sessions that have fully torn down
    teardown_tx: watch::Sender<u64>,
}

struct State {
    status: DownloadStatus,
    session: Option<ActiveSession>,
    sessions_started: u64,
}

struct ActiveSession {
    id: u64,
    signal: watch::Sender<Signal>,
    task: JoinHandle<()>,
}

impl DownloadController {
    pub fn builder(source: impl Into<String>, destination: impl Into<PathBuf>) -> DownloadBuilder {
        DownloadBuilder {
            source: source.into(),
            destination: destination.into(),
            settings: Settings::default(),
            client: None,
            continue_from_disk: false,
        }
    }

    /// Create a download with default settings; the transfer starts immediately
    pub fn start(
        source: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> Result<Self, GrabitError> {
        Self::builder(source, destination).start()
    }

    pub fn source(&self) -> &str {
        &self.inner.source
    }

    pub fn destination(&self) -> &Path {
        &self.inner.destination
    }

    pub fn status(&self) -> DownloadStatus {
        self.inner.state.lock().status.clone()
    }

    pub fn snapshot(&self) -> DownloadSnapshot {
        let status = self.status();
        DownloadSnapshot {
            source: self.inner.source.clone(),
            destination: self.inner.destination.clone(),
            total_size: self.inner.progress.total_size(),
            bytes_transferred: self.inner.progress.bytes_transferred(),
            status,
        }
    }

    /// Percentage of the resource on disk
    pub fn progress(&self) -> f64 {
        self.snapshot().progress()
    }

    /// Receive status changes and progress updates from now on
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Suspend the transfer; only valid while downloading
    pub fn pause(&self) -> Result<(), GrabitError> {
        let mut state = self.inner.state.lock();
        if state.status != DownloadStatus::Downloading {
            return Err(invalid_transition(Command::Pause, &state.status));
        }

        if let Some(session) = &state.session {
            session.signal.send_replace(Signal::Pause);
        }
        self.inner.transition(&mut state, DownloadStatus::Paused);

        info!(
            "Paused download of {} at byte {}",
            self.inner.source,
            self.inner.progress.bytes_transferred()
        );
        Ok(())
    }

    /// Continue a paused download with a new session
    ///
    /// The new session waits for the previous one to close the file before it
    /// opens it again.
    pub fn resume(&self) -> Result<(), GrabitError> {
        let mut state = self.inner.state.lock();
        if state.status != DownloadStatus::Paused {
            return Err(invalid_transition(Command::Resume, &state.status));
        }

        self.inner.transition(&mut state, DownloadStatus::Downloading);
        Inner::spawn_session(&self.inner, &mut state);

        info!("Resumed download of {}", self.inner.source);
        Ok(())
    }

    /// Abort the download, keeping the partial file on disk
    pub fn cancel(&self) -> Result<(), GrabitError> {
        let mut state = self.inner.state.lock();
        if !matches!(state.status, DownloadStatus::Downloading | DownloadStatus::Paused) {
            return Err(invalid_transition(Command::Cancel, &state.status));
        }

        if let Some(session) = &state.session {
            session.signal.send_replace(Signal::Cancel);
        }
        self.inner.transition(&mut state, DownloadStatus::Cancelled);

        info!("Cancelled download of {}", self.inner.source);
        Ok(())
    }

    /// Wait until every session started so far has closed the destination
    pub async fn settled(&self) {
        let started = self.inner.state.lock().sessions_started;
        let mut teardown_rx = self.inner.teardown_tx.subscribe();
        let _ = teardown_rx.wait_for(|done| *done >= started).await;
    }

    /// Wait for a terminal status and the teardown of the last session
    pub async fn wait(&self) -> DownloadStatus {
        let mut status_rx = self.inner.status_tx.subscribe();
        let status = match status_rx.wait_for(|status| status.is_terminal()).await {
            Ok(status) => status.clone(),
            Err(_) => self.status(),
        };
        self.settled().await;
        status
    }

    /// Stop the download for good and wait until the file is closed
    ///
    /// A download that has not reached a terminal status ends up `Cancelled`.
    pub async fn dispose(self) {
        {
            let mut state = self.inner.state.lock();
            if let Some(session) = &state.session {
                session.signal.send_replace(Signal::Cancel);
            }
            if !state.status.is_terminal() {
                self.inner.transition(&mut state, DownloadStatus::Cancelled);
            }
        }
        self.settled().await;
        debug!("Disposed download of {}", self.inner.source);
    }
}

impl Inner {
    /// Start a session continuing from the current byte count
    fn spawn_session(this: &Arc<Inner>, state: &mut State) {
        state.sessions_started += 1;
        let id = state.sessions_started;
        let previous = state.session.take().map(|session| session.task);

        let (signal_tx, signal_rx) = watch::channel(Signal::Run);
        let session = TransferSession::new(
            this.source.clone(),
            this.destination.clone(),
            this.client.clone(),
            &this.settings,
            this.progress.clone(),
            signal_rx,
            this.event_tx.clone(),
        );
        let weak: Weak<Inner> = Arc::downgrade(this);

        let task = this.runtime.spawn(async move {
            // Never two writers on the same file
            if let Some(previous) = previous {
                let _ = previous.await;
            }

            let result = session.run().await;

            match weak.upgrade() {
                Some(inner) => inner.finish_session(id, result),
                None => debug!("Download dropped before session {} finished", id),
            }
        });

        debug!("Spawned session {} for {}", id, this.source);
        state.session = Some(ActiveSession {
            id,
            signal: signal_tx,
            task,
        });
    }

    /// Apply a session report if it is still relevant
    fn finish_session(&self, id: u64, result: Result<TransferOutcome, GrabitError>) {
        let mut state = self.state.lock();
        let current = state.session.as_ref().is_some_and(|session| session.id == id);
        let accepting = current && state.status == DownloadStatus::Downloading;

        match result {
            Ok(TransferOutcome::Suspended) => {
                debug!(
                    "Session {} of {} suspended at byte {}",
                    id,
                    self.source,
                    self.progress.bytes_transferred()
                );
            }
            Ok(TransferOutcome::Complete) if accepting => {
                info!("Download of {} complete", self.source);
                self.transition(&mut state, DownloadStatus::Complete);
            }
            Err(e) if accepting => {
                warn!("Download of {} failed: {}", self.source, e);
                self.transition(&mut state, DownloadStatus::Error(e.into_failure()));
            }
            Ok(TransferOutcome::Complete) => {
                warn!(
                    "Discarding completion of session {} for {} (status is {})",
                    id, self.source, state.status
                );
            }
            Err(e) => {
                warn!(
                    "Discarding error from session {} for {} (status is {}): {}",
                    id, self.source, state.status, e
                );
            }
        }

        self.teardown_tx.send_modify(|done| *done += 1);
    }

    /// Set the status and notify subscribers once
    fn transition(&self, state: &mut State, status: DownloadStatus) {
        debug!("{}: {} -> {}", self.source, state.status, status);
        state.status = status.clone();
        self.status_tx.send_replace(status.clone());
        let _ = self.event_tx.send(DownloadEvent::StatusChanged {
            status,
            bytes_transferred: self.progress.bytes_transferred(),
            total_size: self.progress.total_size(),
        });
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(session) = self.state.get_mut().session.take() {
            session.signal.send_replace(Signal::Cancel);
        }
    }
}

fn invalid_transition(command: Command, from: &DownloadStatus) -> GrabitError {
    GrabitError::InvalidTransition {
        command,
        from: from.clone(),
    }
}

fn existing_length(path: &Path) -> Result<u64, GrabitError> {
    match std::fs::metadata(path) {
        Ok(metadata) => Ok(metadata.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}
