//! Filesystem helpers shared across modules.
//!
//! Errors carry the operation and the path they were raised for.

use std::path::Path;

use crate::{Error, Result};

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all_with_op(op: &'static str, path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| Error::io_path(op, path, e))
}

/// Synchronous variant for start-up code that runs before the runtime.
pub fn ensure_dir_all_sync_with_op(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| Error::io_path(op, path, e))
}

/// Whether `path` is a regular file with at least one byte.
pub async fn is_non_empty_file(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    }
}

pub async fn remove_dir_all_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io_path("removing directory", path, e)),
    }
}

/// Copy `from` to `to`, creating the destination's parent directory.
pub async fn copy_file(from: &Path, to: &Path) -> Result<u64> {
    if let Some(parent) = to.parent() {
        ensure_dir_all_with_op("creating directory", parent).await?;
    }
    tokio::fs::copy(from, to)
        .await
        .map_err(|e| Error::io_path("copying", from, e))
}
