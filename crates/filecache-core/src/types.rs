//! Core identifier and parameter types shared across the cache engine.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Maximum length of a cache type name in characters.
pub const MAX_TYPE_NAME_LEN: usize = 64;

/// Maximum value for an object's cost parameter.
pub const MAX_COST: u8 = 100;

/// Represents a unique identifier for a cached object within one cache root
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(u64);

impl ObjectId {
    /// The reserved invalid id (0). Never assigned to a live object.
    pub const INVALID: ObjectId = ObjectId(0);

    /// Creates a new ObjectId from a raw u64 value
    pub fn new(id: u64) -> Self {
        ObjectId(id)
    }

    /// Returns the raw u64 value of this object ID
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns true if this id is valid (nonzero)
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-type cache parameters: watermarks plus insert-time defaults.
///
/// `lo_watermark` is the space in bytes the type is guaranteed to keep
/// available; `hi_watermark` is the maximum the type may occupy. `size`,
/// `cost`, and `lifetime` are the defaults applied when an insert omits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheParams {
    /// Guaranteed reservation floor in bytes (must be > 0).
    pub lo_watermark: u64,
    /// Usage ceiling in bytes (must be strictly greater than `lo_watermark`).
    pub hi_watermark: u64,
    /// Default object size in bytes.
    pub size: u64,
    /// Default object cost, 0-100.
    pub cost: u8,
    /// Default object lifetime in seconds. 0 means no lifetime.
    pub lifetime: u64,
}

impl CacheParams {
    /// Creates a parameter set with explicit watermarks and defaults.
    pub fn new(lo_watermark: u64, hi_watermark: u64, size: u64, cost: u8, lifetime: u64) -> Self {
        Self {
            lo_watermark,
            hi_watermark,
            size,
            cost,
            lifetime,
        }
    }

    /// Placeholder parameters used for type directories rediscovered on disk
    /// before the external configuration step re-defines them. The ceiling is
    /// effectively unbounded so recovered objects are never evicted before
    /// the real watermarks arrive.
    pub fn recovered() -> Self {
        Self {
            lo_watermark: 1,
            hi_watermark: u64::MAX,
            size: 0,
            cost: 0,
            lifetime: 0,
        }
    }
}

impl Default for CacheParams {
    fn default() -> Self {
        Self::recovered()
    }
}

/// Validates a cache type name: 1-64 characters, must not start with `.`.
pub fn valid_type_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().count() <= MAX_TYPE_NAME_LEN
        && !name.starts_with('.')
        && !name.contains('/')
}

/// Returns the current time as whole seconds since the Unix epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
