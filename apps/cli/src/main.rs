//! grabit CLI - resumable single-file downloads
//!
//! Downloads one URL at a time with a progress bar. While a download runs,
//! typing `p`, `r` or `c` followed by Enter pauses, resumes or cancels it.

mod commands;
mod output;
mod progress;

use anyhow::Result;
use clap::{Parser, Subcommand};
use grabit_types::ResumePolicy;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// grabit - resumable downloads
#[derive(Parser)]
#[command(name = "grabit")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Settings file (JSON)
    #[arg(long, env = "GRABIT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "human", global = true)]
    output: OutputFormat,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Table,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum PolicyArg {
    /// Start over from byte 0
    Restart,
    /// Stop with an error
    Fail,
}

impl From<PolicyArg> for ResumePolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Restart => ResumePolicy::Restart,
            PolicyArg::Fail => ResumePolicy::Fail,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Download a URL
    Get {
        /// URL to download
        url: String,

        /// Destination file (defaults to the URL's file name in the current directory)
        #[arg(short = 'o', long = "out")]
        out: Option<PathBuf>,

        /// Keep an existing destination file and request only the remaining bytes
        #[arg(short = 'c', long = "continue")]
        continue_download: bool,

        /// What to do when the server ignores a range request
        #[arg(long)]
        resume_policy: Option<PolicyArg>,

        /// Do not read pause/resume/cancel commands from stdin
        #[arg(long)]
        no_input: bool,
    },

    /// Probe URLs for size, type and resume support
    Probe {
        /// URLs to probe
        urls: Vec<String>,
    },

    /// Show settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective settings
    Show,

    /// Print the default settings file location
    Path,
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli.config.or_else(grabit_core::default_config_path);
    let settings = grabit_core::load_settings_or_default(config_path.as_deref()).await?;

    match cli.command {
        Commands::Get {
            url,
            out,
            continue_download,
            resume_policy,
            no_input,
        } => {
            let mut settings = settings;
            if let Some(policy) = resume_policy {
                settings.resume_policy = policy.into();
            }
            let options = commands::GetOptions {
                out,
                continue_download,
                interactive: !no_input,
            };
            let completed = commands::get(settings, &url, options, cli.output).await?;
            if !completed {
                std::process::exit(1);
            }
        }

        Commands::Probe { urls } => commands::probe_urls(&settings, urls, cli.output).await?,

        Commands::Config { action } => {
            commands::config_action(&settings, config_path, action, cli.output)?
        }

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            clap_complete::generate(shell, &mut Cli::command(), "grabit", &mut std::io::stdout());
        }
    }

    Ok(())
}
