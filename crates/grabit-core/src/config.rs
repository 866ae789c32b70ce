//! Settings loading and HTTP client construction

use crate::error::GrabitError;
use grabit_types::Settings;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// `<config dir>/grabit/config.json`, if the platform has a config dir
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("grabit").join("config.json"))
}

/// Load settings from a JSON file
///
/// Fields missing from the file keep their defaults.
pub async fn load_settings(path: &Path) -> Result<Settings, GrabitError> {
    let contents = tokio::fs::read_to_string(path).await?;
    let settings: Settings = serde_json::from_str(&contents)
        .map_err(|e| GrabitError::Config(format!("{}: {}", path.display(), e)))?;

    info!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Load settings from `path` when it exists, defaults otherwise
pub async fn load_settings_or_default(path: Option<&Path>) -> Result<Settings, GrabitError> {
    match path {
        Some(path) if tokio::fs::try_exists(path).await? => load_settings(path).await,
        Some(path) => {
            debug!("No settings file at {}, using defaults", path.display());
            Ok(Settings::default())
        }
        None => Ok(Settings::default()),
    }
}

/// Build the HTTP client used by transfer sessions
///
/// There is no overall request timeout; a silent server is caught by the
/// session's read timeout, which covers the headers and every body chunk.
pub fn build_client(settings: &Settings) -> Result<Client, GrabitError> {
    let mut builder = Client::builder()
        .user_agent(settings.user_agent.as_str())
        .connect_timeout(Duration::from_secs(settings.connect_timeout_secs.max(1)));

    if let Some(proxy) = &settings.proxy {
        let proxy = reqwest::Proxy::all(proxy.as_str())
            .map_err(|e| GrabitError::Config(format!("invalid proxy {}: {}", proxy, e)))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| GrabitError::Config(e.to_string()))
}
