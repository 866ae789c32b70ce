//! URL helpers: validation, file-name derivation and probing

use crate::error::GrabitError;
use grabit_types::LinkInfo;
use reqwest::header::{ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Client;
use tracing::info;
use url::Url;

/// Parse an absolute `http`/`https` URL
pub fn parse_download_url(source: &str) -> Result<Url, GrabitError> {
    let url = Url::parse(source).map_err(|_| GrabitError::InvalidUrl(source.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(GrabitError::InvalidUrl(source.to_string())),
    }
}

/// Last non-empty path segment of the URL, percent-decoded
///
/// Falls back to `download` when the path has no usable segment.
pub fn file_name_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|segment| {
            urlencoding::decode(segment)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| segment.to_string())
        })
        .filter(|name| !name.contains('/') && name != "." && name != "..")
        .unwrap_or_else(|| "download".to_string())
}

/// Probe a URL for metadata with a HEAD request
pub async fn probe_url(client: &Client, url: &Url) -> Result<LinkInfo, GrabitError> {
    info!("Probing URL: {}", url);

    let response = client.head(url.as_str()).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(GrabitError::BadStatus(status.as_u16()));
    }

    let final_url = response.url().clone();
    let headers = response.headers();

    let size = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let resumable = headers
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().eq_ignore_ascii_case("bytes"))
        .unwrap_or(false);

    let filename = headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(filename_from_disposition)
        .unwrap_or_else(|| file_name_from_url(&final_url));

    Ok(LinkInfo {
        url: url.to_string(),
        final_url: Some(final_url.to_string()),
        filename,
        size,
        content_type,
        resumable,
    })
}

/// Extract `filename=` (or RFC 5987 `filename*=`) from a Content-Disposition value
fn filename_from_disposition(value: &str) -> Option<String> {
    let mut plain = None;
    for part in value.split(';').map(str::trim) {
        if let Some(encoded) = part.strip_prefix("filename*=") {
            // charset'lang'percent-encoded
            let encoded = encoded.rsplit('\'').next()?;
            if let Ok(decoded) = urlencoding::decode(encoded.trim_matches('"')) {
                return Some(decoded.into_owned()).filter(|name| !name.is_empty());
            }
        } else if let Some(name) = part.strip_prefix("filename=") {
            plain = Some(name.trim_matches('"').to_string());
        }
    }
    plain.filter(|name| !name.is_empty())
}
