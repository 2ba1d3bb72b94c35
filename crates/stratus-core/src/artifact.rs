//! Image artifact checks.

use crate::error::{CoreError, Result};
use std::path::Path;

/// Whether the hypervisor fetches this location itself.
pub fn is_remote(location: &str) -> bool {
    let lower = location.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Check that an image location resolves to a readable artifact.
///
/// Local paths (optionally `file://`) must name a regular file that can be
/// opened. HTTP(S) locations are passed through unchecked.
pub async fn verify_artifact(location: &str) -> Result<()> {
    let location = location.trim();
    if location.is_empty() {
        return Err(CoreError::field("location", "is required"));
    }
    if is_remote(location) {
        tracing::debug!(location, "Remote artifact, skipping local check");
        return Ok(());
    }

    let path = Path::new(location.strip_prefix("file://").unwrap_or(location));
    let unreadable = |reason: String| CoreError::field("location", format!("{location}: {reason}"));

    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| unreadable(e.to_string()))?;
    if !metadata.is_file() {
        return Err(unreadable("not a regular file".into()));
    }
    tokio::fs::File::open(path)
        .await
        .map_err(|e| unreadable(e.to_string()))?;

    tracing::debug!(location, bytes = metadata.len(), "Image artifact verified");
    Ok(())
}
