//! On-disk directory tree management under the cache root.
//!
//! The tree is `<root>/<typeName>/<shard>/<entry>`. Object creation makes any
//! missing shard directory; object removal deletes the entry and prunes the
//! shard directory once it empties. The type directory itself is only removed
//! when the type is deleted. Creation failures surface as errors; removal
//! failures are logged and left for the next maintenance sweep to heal.

use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{FileCacheError, FileCacheResult};
use crate::pathcodec;
use crate::types::ObjectId;

const FALLBACK_BLOCK_SIZE: u64 = 4096;

/// Owns the cache root directory and performs all tree operations.
#[derive(Debug, Clone)]
pub struct DiskLayout {
    root: PathBuf,
}

impl DiskLayout {
    /// Creates a layout over `root`, creating the directory if missing.
    pub fn new(root: impl Into<PathBuf>) -> FileCacheResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            FileCacheError::Directory(format!(
                "Unable to create cache root '{}': {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    /// Returns the cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the filesystem block size of the device holding the root.
    pub fn fs_block_size(&self) -> u64 {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            fs::metadata(&self.root)
                .map(|m| m.blksize())
                .unwrap_or(FALLBACK_BLOCK_SIZE)
        }
        #[cfg(not(unix))]
        {
            FALLBACK_BLOCK_SIZE
        }
    }

    /// Creates the directory for a cache type.
    pub fn create_type_dir(&self, type_name: &str) -> FileCacheResult<()> {
        let dir = self.root.join(type_name);
        fs::create_dir_all(&dir).map_err(|e| {
            FileCacheError::Directory(format!(
                "Unable to create type directory '{}': {}",
                dir.display(),
                e
            ))
        })?;
        debug!(type_name, "created type directory");
        Ok(())
    }

    /// Removes a type directory and everything beneath it. Failures are
    /// logged and swallowed.
    pub fn remove_type_dir(&self, type_name: &str) {
        let dir = self.root.join(type_name);
        if let Err(e) = fs::remove_dir_all(&dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(type_name, error = %e, "failed to remove type directory");
            }
        }
    }

    /// Creates the on-disk entry for an object, making the shard directory as
    /// needed. `dir_object` selects the directory variant. Returns the full
    /// path of the new entry.
    pub fn create_object(
        &self,
        type_name: &str,
        id: ObjectId,
        filename: &str,
        dir_object: bool,
    ) -> FileCacheResult<PathBuf> {
        let path = pathcodec::encode_path(&self.root, type_name, id, filename);
        let shard_dir = path.parent().expect("encoded path always has a shard dir");
        fs::create_dir_all(shard_dir).map_err(|e| {
            FileCacheError::Directory(format!(
                "Unable to create shard directory '{}': {}",
                shard_dir.display(),
                e
            ))
        })?;

        let result = if dir_object {
            fs::create_dir(&path)
        } else {
            fs::File::create(&path).map(|_| ())
        };
        if let Err(e) = result {
            self.prune_shard_dir(shard_dir);
            return Err(FileCacheError::Directory(format!(
                "Unable to create object '{}': {}",
                path.display(),
                e
            )));
        }
        debug!(type_name, %id, path = %path.display(), "created object entry");
        Ok(path)
    }

    /// Removes the on-disk entry for an object and prunes the shard directory
    /// if it becomes empty. Failures are logged and swallowed.
    pub fn remove_object(&self, type_name: &str, id: ObjectId, filename: &str, dir_object: bool) {
        let path = pathcodec::encode_path(&self.root, type_name, id, filename);
        self.remove_entry(&path, dir_object);
    }

    /// Removes an arbitrary entry path plus its shard directory when emptied.
    /// Used by startup cleanup for entries that failed to decode.
    pub fn remove_entry(&self, path: &Path, dir_object: bool) {
        let result = if dir_object {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        match result {
            Ok(()) => debug!(path = %path.display(), "removed object entry"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to remove object entry");
                return;
            }
        }
        if let Some(shard_dir) = path.parent() {
            self.prune_shard_dir(shard_dir);
        }
    }

    fn prune_shard_dir(&self, shard_dir: &Path) {
        let empty = match fs::read_dir(shard_dir) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => return,
        };
        if empty {
            if let Err(e) = fs::remove_dir(shard_dir) {
                warn!(path = %shard_dir.display(), error = %e, "failed to prune shard directory");
            }
        }
    }

    /// Lists the type directories present under the root.
    pub fn list_type_dirs(&self) -> FileCacheResult<Vec<String>> {
        self.list_dir_names(&self.root)
    }

    /// Lists the shard directories present under a type.
    pub fn list_shards(&self, type_name: &str) -> FileCacheResult<Vec<String>> {
        self.list_dir_names(&self.root.join(type_name))
    }

    /// Lists the entries under one shard of a type, with their metadata.
    pub fn list_entries(
        &self,
        type_name: &str,
        shard: &str,
    ) -> FileCacheResult<Vec<(String, Metadata)>> {
        let dir = self.root.join(type_name).join(shard);
        let mut out = Vec::new();
        for entry in fs::read_dir(&dir).map_err(FileCacheError::Io)? {
            let entry = entry.map_err(FileCacheError::Io)?;
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            let meta = entry.metadata().map_err(FileCacheError::Io)?;
            out.push((name, meta));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    /// Returns true when a directory entry contains nothing at all.
    pub fn dir_is_empty(&self, path: &Path) -> bool {
        match fs::read_dir(path) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => false,
        }
    }

    fn list_dir_names(&self, dir: &Path) -> FileCacheResult<Vec<String>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(dir).map_err(FileCacheError::Io)? {
            let entry = entry.map_err(FileCacheError::Io)?;
            let meta = entry.metadata().map_err(FileCacheError::Io)?;
            if !meta.is_dir() {
                continue;
            }
            if let Ok(name) = entry.file_name().into_string() {
                out.push(name);
            }
        }
        out.sort();
        Ok(out)
    }
}

/// Returns a file's mtime as whole seconds since the Unix epoch.
pub fn mtime_secs(meta: &Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
