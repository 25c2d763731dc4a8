//! Shared helpers for paths, timestamps, and text previews.

use chrono::{SecondsFormat, Utc};
use std::fs;
use std::path::Path;

/// UTC timestamp with second precision, e.g. `2026-08-25T14:03:07Z`.
pub fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Render `path` relative to `base` for log lines and stored records.
/// Falls back to the full path when it lives outside `base`.
pub fn rel_display(path: &Path, base: &Path) -> String {
    match path.strip_prefix(base) {
        Ok(rel) => rel.display().to_string(),
        Err(_) => path.display().to_string(),
    }
}

/// True when the file exists and contains more than whitespace.
pub fn file_has_text(path: &Path) -> bool {
    match fs::read_to_string(path) {
        Ok(text) => !text.trim().is_empty(),
        Err(_) => false,
    }
}

/// Flatten newlines and truncate to `max` characters, so raw replies can
/// be quoted inside a single error line.
pub fn single_line_preview(text: &str, max: usize) -> String {
    let flat = text.trim().replace('\n', " ");
    if flat.chars().count() <= max {
        return flat;
    }
    let cut: String = flat.chars().take(max).collect();
    format!("{}...", cut.trim_end())
}
