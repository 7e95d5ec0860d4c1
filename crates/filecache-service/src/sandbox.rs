//! Destination path policy for copy-out requests.
//!
//! The platform sandbox decides whether a caller may write into a directory;
//! this trait is the seam the service consults before any copy leaves the
//! cache.

use std::path::{Path, PathBuf};

/// Access being requested on a destination path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRequest {
    /// Write to existing entries.
    pub write: bool,
    /// Create new entries.
    pub create: bool,
}

impl AccessRequest {
    /// Write plus create, the access a copy-out needs.
    pub const WRITE_CREATE: AccessRequest = AccessRequest {
        write: true,
        create: true,
    };
}

/// Decides whether a caller may access a destination path.
pub trait PathPolicy {
    /// Returns true when `caller` may perform `access` on `path`.
    fn is_path_allowed(&self, path: &Path, caller: &str, access: AccessRequest) -> bool;
}

/// Permits destinations under a fixed set of directory prefixes.
#[derive(Debug, Clone, Default)]
pub struct PrefixAllowlist {
    prefixes: Vec<PathBuf>,
}

impl PrefixAllowlist {
    /// Creates an allowlist from the given directory prefixes.
    pub fn new(prefixes: Vec<PathBuf>) -> Self {
        Self { prefixes }
    }
}

impl PathPolicy for PrefixAllowlist {
    fn is_path_allowed(&self, path: &Path, _caller: &str, _access: AccessRequest) -> bool {
        self.prefixes.iter().any(|p| path.starts_with(p))
    }
}

/// Permits every destination. Test and single-user deployments only.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PathPolicy for AllowAll {
    fn is_path_allowed(&self, _path: &Path, _caller: &str, _access: AccessRequest) -> bool {
        true
    }
}
