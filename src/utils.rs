//! Utility functions and helpers

use std::path::Path;

use crate::error::Result;

/// Ensure a directory exists, creating it if necessary
pub(crate) async fn ensure_dir_exists(path: &Path) -> Result<()> {
    if !tokio::fs::try_exists(path).await? {
        tokio::fs::create_dir_all(path).await?;
    }
    Ok(())
}

/// Prefix for a scratch file name, carrying a millisecond timestamp.
///
/// The caller appends a random component, so two calls in the same
/// millisecond still get distinct names.
pub(crate) fn timestamped_prefix(prefix: &str) -> String {
    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S_%3f");
    format!("{}-{}-", prefix, timestamp)
}

/// Last `max_chars` characters of a process diagnostic stream.
pub(crate) fn stderr_tail(stderr: &[u8], max_chars: usize) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - max_chars).collect();
    format!("...{}", tail)
}
