//! Asynchronous copy-out of cache objects.
//!
//! The dispatcher validates the destination synchronously, picks a unique
//! filename, and hands the copy to a spawned task that owns the reply
//! channel. The core never awaits the copy; a caller that went away simply
//! drops the receiver and the completed copy is reported to no one.

use std::path::{Path, PathBuf};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use filecache_core::{FileCacheError, FileCacheResult};

/// Upper bound on the `-(N)` suffix tried while searching for a unique
/// destination filename.
pub const MAX_UNIQUE_FILE_INDEX: u32 = 1000;

/// Splits a filename into its basename and extension. The extension keeps
/// its leading dot; a name without one yields an empty extension.
fn split_extension(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => file_name.split_at(idx),
        _ => (file_name, ""),
    }
}

/// Picks a destination path under `dir` that does not collide with an
/// existing entry, appending `-(N)` to the basename as needed. Fails with
/// `Argument` once the bounded index is exhausted.
pub fn unique_destination(dir: &Path, file_name: &str) -> FileCacheResult<PathBuf> {
    let (basename, extension) = split_extension(file_name);
    let mut candidate = file_name.to_string();
    let mut index = 1u32;
    while dir.join(&candidate).exists() && index < MAX_UNIQUE_FILE_INDEX {
        candidate = format!("{}-({}){}", basename, index, extension);
        index += 1;
    }
    if index == MAX_UNIQUE_FILE_INDEX {
        return Err(FileCacheError::Argument(
            "CopyCacheObject: No unique destination name found.".to_string(),
        ));
    }
    Ok(dir.join(candidate))
}

/// Starts an asynchronous copy of `source` to `destination`. The returned
/// receiver resolves with the final destination once the copy completes;
/// dropping it does not cancel the copy.
pub fn start_copy(
    source: PathBuf,
    destination: PathBuf,
) -> oneshot::Receiver<FileCacheResult<PathBuf>> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        debug!(source = %source.display(), destination = %destination.display(), "starting copy");
        let result = match tokio::fs::copy(&source, &destination).await {
            Ok(bytes) => {
                debug!(destination = %destination.display(), bytes, "copy complete");
                Ok(destination)
            }
            Err(e) => {
                warn!(source = %source.display(), error = %e, "copy failed");
                Err(FileCacheError::Directory(format!("CopyCacheObject: {}", e)))
            }
        };
        // The originating request may already be gone; that discards the
        // reply, not the copy.
        let _ = tx.send(result);
    });
    rx
}
