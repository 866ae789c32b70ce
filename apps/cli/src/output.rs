//! Formatting helpers shared by the commands

use serde::Serialize;

/// Pretty-print a value as JSON on stdout
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Format bytes as human-readable
pub fn format_bytes(bytes: u64) -> String {
    human_bytes::human_bytes(bytes as f64)
}

/// Format an optional size, `?` when unknown
pub fn format_size(size: Option<u64>) -> String {
    size.map(format_bytes).unwrap_or_else(|| "?".to_string())
}
