//! Common test utilities for cache engine integration tests.

use std::path::PathBuf;

use tempfile::TempDir;

use filecache_core::{CacheParams, CacheSet};

/// Disk budget used by every test cache.
pub const TEST_BUDGET: u64 = 1 << 20;

/// An on-disk cache set rooted in a temporary directory.
pub struct TestCache {
    dir: TempDir,
    pub set: CacheSet,
}

impl TestCache {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let set = CacheSet::new(dir.path().join("cache"), TEST_BUDGET).unwrap();
        Self { dir, set }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    /// Drops the in-memory set and rebuilds it from the directory tree,
    /// simulating a process restart.
    pub fn restart(self) -> Self {
        let Self { dir, set } = self;
        drop(set);
        let mut set = CacheSet::new(dir.path().join("cache"), TEST_BUDGET).unwrap();
        set.walk_dir_tree().unwrap();
        set.cleanup_at_startup();
        Self { dir, set }
    }

    pub fn define(&mut self, name: &str, lo: u64, hi: u64, default_size: u64) {
        self.set
            .define_type(name, CacheParams::new(lo, hi, default_size, 0, 0), false)
            .unwrap();
    }
}
