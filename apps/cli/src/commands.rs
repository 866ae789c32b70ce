//! CLI command implementations

use crate::output::{format_bytes, format_size, print_json};
use crate::progress::DownloadProgress;
use crate::{ConfigAction, OutputFormat};
use anyhow::{Context, Result};
use console::style;
use grabit_core::{
    build_client, file_name_from_url, parse_download_url, probe_url, DownloadController,
    DownloadStatus, GrabitError,
};
use grabit_types::{LinkInfo, Settings};
use std::io::BufRead;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

// ============================================================================
// Download Command
// ============================================================================

pub struct GetOptions {
    pub out: Option<PathBuf>,
    pub continue_download: bool,
    pub interactive: bool,
}

/// Run one download to a terminal status
///
/// Returns `true` when the download completed.
pub async fn get(
    settings: Settings,
    url: &str,
    options: GetOptions,
    format: OutputFormat,
) -> Result<bool> {
    let parsed = parse_download_url(url)?;
    let destination = match options.out {
        Some(path) => path,
        None => std::env::current_dir()
            .context("Failed to resolve the current directory")?
            .join(file_name_from_url(&parsed)),
    };

    let download = DownloadController::builder(url, &destination)
        .settings(settings)
        .continue_from_disk(options.continue_download)
        .start()
        .with_context(|| format!("Failed to start download of {}", url))?;
    let mut events = download.subscribe();

    let progress = DownloadProgress::new(
        &download.snapshot(),
        !matches!(format, OutputFormat::Human),
    );

    if options.interactive {
        spawn_input_reader(download.clone(), progress.clone());
        progress.println(format!(
            "{} p = pause, r = resume, c = cancel (then Enter)",
            style("ℹ").blue()
        ));
    }

    let finished = download.wait();
    tokio::pin!(finished);

    let status = loop {
        tokio::select! {
            status = &mut finished => break status,
            event = events.recv() => match event {
                Ok(event) => progress.handle_event(&event),
                Err(RecvError::Lagged(skipped)) => debug!("Skipped {} progress events", skipped),
                Err(RecvError::Closed) => {}
            },
            _ = tokio::signal::ctrl_c() => {
                if let Err(e) = download.cancel() {
                    debug!("Ignoring Ctrl-C: {}", e);
                }
            }
        }
    };

    let snapshot = download.snapshot();
    progress.finish(&snapshot);

    match format {
        OutputFormat::Json => print_json(&snapshot)?,
        OutputFormat::Human | OutputFormat::Table => {
            if status == DownloadStatus::Complete {
                println!(
                    "{} Saved {} ({})",
                    style("✓").green().bold(),
                    style(destination.display()).cyan(),
                    format_bytes(snapshot.bytes_transferred)
                );
            } else if status == DownloadStatus::Cancelled {
                println!(
                    "{} Partial file kept at {}; rerun with --continue to resume",
                    style("○").dim(),
                    destination.display()
                );
            }
        }
    }

    Ok(status == DownloadStatus::Complete)
}

/// Read control commands from stdin on a plain thread
///
/// Blocking stdin reads would hold up runtime shutdown on a tokio blocking
/// thread, so this thread is left detached instead.
fn spawn_input_reader(download: DownloadController, progress: DownloadProgress) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                return;
            };
            let result = match line.trim() {
                "p" | "pause" => download.pause(),
                "r" | "resume" => download.resume(),
                "c" | "cancel" => download.cancel(),
                "" => continue,
                other => {
                    progress.println(format!("{} Unknown command: {}", style("?").yellow(), other));
                    continue;
                }
            };
            if let Err(e) = result {
                progress.println(format!("{} {}", style("✗").red(), e));
            }
            if download.status().is_terminal() {
                return;
            }
        }
    });
}

// ============================================================================
// Probe Command
// ============================================================================

pub async fn probe_urls(settings: &Settings, urls: Vec<String>, format: OutputFormat) -> Result<()> {
    let client = build_client(settings)?;
    let mut results = Vec::new();

    for url in urls {
        let info = match parse_download_url(&url) {
            Ok(parsed) => probe_url(&client, &parsed).await,
            Err(e) => Err(e),
        };
        results.push(ProbeResult { url, info });
    }

    match format {
        OutputFormat::Json => {
            let json: Vec<_> = results
                .iter()
                .map(|r| match &r.info {
                    Ok(info) => serde_json::to_value(info),
                    Err(e) => Ok(serde_json::json!({ "url": r.url, "error": e.to_string() })),
                })
                .collect::<Result<_, _>>()?;
            print_json(&json)?;
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct ProbeRow {
                filename: String,
                size: String,
                resumable: String,
                content_type: String,
            }

            let rows: Vec<ProbeRow> = results
                .iter()
                .map(|r| match &r.info {
                    Ok(info) => ProbeRow {
                        filename: info.filename.clone(),
                        size: format_size(info.size),
                        resumable: if info.resumable { "yes" } else { "no" }.to_string(),
                        content_type: info.content_type.clone().unwrap_or_default(),
                    },
                    Err(e) => ProbeRow {
                        filename: r.url.clone(),
                        size: "-".to_string(),
                        resumable: "-".to_string(),
                        content_type: e.to_string(),
                    },
                })
                .collect();

            println!("{}", Table::new(rows));
        }
        OutputFormat::Human => {
            for result in &results {
                match &result.info {
                    Ok(info) => print_link_info(info),
                    Err(e) => println!("{} {}: {}", style("✗").red().bold(), result.url, e),
                }
            }
        }
    }

    Ok(())
}

struct ProbeResult {
    url: String,
    info: Result<LinkInfo, GrabitError>,
}

fn print_link_info(info: &LinkInfo) {
    println!("{} {}", style("●").cyan(), style(&info.filename).bold());
    println!("  URL: {}", info.final_url.as_deref().unwrap_or(&info.url));
    println!("  Size: {}", format_size(info.size));
    if let Some(content_type) = &info.content_type {
        println!("  Type: {}", content_type);
    }
    println!(
        "  Resumable: {}",
        if info.resumable {
            style("yes").green()
        } else {
            style("no").yellow()
        }
    );
}

// ============================================================================
// Config Command
// ============================================================================

pub fn config_action(
    settings: &Settings,
    config_path: Option<PathBuf>,
    action: Option<ConfigAction>,
    format: OutputFormat,
) -> Result<()> {
    match action.unwrap_or(ConfigAction::Show) {
        ConfigAction::Show => match format {
            OutputFormat::Json => print_json(settings)?,
            OutputFormat::Human | OutputFormat::Table => {
                println!("{}", style("Settings").bold());
                println!("  user_agent: {}", settings.user_agent);
                println!("  connect_timeout_secs: {}", settings.connect_timeout_secs);
                println!("  read_timeout_secs: {}", settings.read_timeout_secs);
                println!("  progress_interval_ms: {}", settings.progress_interval_ms);
                println!("  event_capacity: {}", settings.event_capacity);
                println!("  resume_policy: {}", settings.resume_policy);
                println!(
                    "  proxy: {}",
                    settings.proxy.as_deref().unwrap_or("(none)")
                );
            }
        },
        ConfigAction::Path => match config_path {
            Some(path) => println!("{}", path.display()),
            None => println!("No config directory available on this platform"),
        },
    }

    Ok(())
}
