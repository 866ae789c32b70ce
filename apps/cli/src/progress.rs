//! Progress bar for a single download

use console::style;
use grabit_types::{DownloadEvent, DownloadSnapshot, DownloadStatus};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

const TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}";

/// Renders download events; cheap to clone and safe to use from other threads
#[derive(Clone)]
pub struct DownloadProgress {
    bar: ProgressBar,
}

impl DownloadProgress {
    pub fn new(snapshot: &DownloadSnapshot, hidden: bool) -> Self {
        let bar = ProgressBar::new(snapshot.total_size.unwrap_or(0));
        if hidden {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }

        let bar_style = ProgressStyle::with_template(TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░  ");
        bar.set_style(bar_style);
        bar.set_position(snapshot.bytes_transferred);

        Self { bar }
    }

    /// Update the bar from an event
    pub fn handle_event(&self, event: &DownloadEvent) {
        match event {
            DownloadEvent::Progress {
                bytes_transferred,
                total_size,
            } => {
                if let Some(total) = total_size {
                    self.bar.set_length(*total);
                }
                self.bar.set_position(*bytes_transferred);
            }

            DownloadEvent::StatusChanged {
                status,
                bytes_transferred,
                total_size,
            } => {
                if let Some(total) = total_size {
                    self.bar.set_length(*total);
                }
                self.bar.set_position(*bytes_transferred);

                match status {
                    DownloadStatus::Paused => {
                        self.bar.set_message(format!("{} Paused", style("⏸").yellow()));
                    }
                    DownloadStatus::Downloading => {
                        self.bar.set_message("");
                    }
                    _ => {}
                }
            }
        }
    }

    /// Print a line above the bar
    pub fn println(&self, message: impl AsRef<str>) {
        self.bar.println(message);
    }

    /// Settle the bar on the final status
    pub fn finish(&self, snapshot: &DownloadSnapshot) {
        if let Some(total) = snapshot.total_size {
            self.bar.set_length(total);
        }
        self.bar.set_position(snapshot.bytes_transferred);

        match &snapshot.status {
            DownloadStatus::Complete => {
                self.bar.finish_with_message(format!(
                    "{} Download complete",
                    style("✓").green().bold()
                ));
            }
            DownloadStatus::Error(failure) => {
                self.bar.abandon_with_message(format!(
                    "{} Failed: {}",
                    style("✗").red().bold(),
                    failure
                ));
            }
            DownloadStatus::Cancelled => {
                self.bar
                    .abandon_with_message(format!("{} Cancelled", style("○").dim()));
            }
            DownloadStatus::Downloading | DownloadStatus::Paused => self.bar.abandon(),
        }
    }
}
