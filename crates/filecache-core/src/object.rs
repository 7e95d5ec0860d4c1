//! Per-object metadata record.

use crate::types::{now_secs, ObjectId};

/// A cached object entry with reservation and pin tracking.
///
/// The record is owned by exactly one type cache. `size` is the reserved
/// byte count (not the live on-disk size while the object is being written),
/// and `subscriber_count`/`write_open` together pin the object against
/// removal: an object is only evictable when neither holds.
#[derive(Debug, Clone)]
pub struct CachedObject {
    /// Object id, unique across all types for the cache root's lifetime.
    pub id: ObjectId,
    /// Caller-supplied basename used when copying out. Extension matters.
    pub filename: String,
    /// Reserved size in bytes.
    pub size: u64,
    /// Eviction cost, 0-100. Higher costs evict later.
    pub cost: u8,
    /// Lifetime in seconds; objects older than this become most evictable.
    /// 0 means no lifetime.
    pub lifetime: u64,
    /// Creation timestamp, epoch seconds.
    pub created_at: u64,
    /// Last access timestamp, epoch seconds.
    pub last_access_at: u64,
    /// Whether the object is still receiving content.
    pub write_open: bool,
    /// Number of live subscriptions pinning the object.
    pub subscriber_count: u32,
    /// Remove the object as soon as it becomes evictable.
    pub pending_expire: bool,
}

impl CachedObject {
    /// Creates a fresh record stamped with the current time.
    pub fn new(id: ObjectId, filename: String, size: u64, cost: u8, lifetime: u64) -> Self {
        let now = now_secs();
        Self {
            id,
            filename,
            size,
            cost,
            lifetime,
            created_at: now,
            last_access_at: now,
            write_open: false,
            subscriber_count: 0,
            pending_expire: false,
        }
    }

    /// Reconstructs a record discovered by the startup walk. Timestamps come
    /// from the backing file's mtime; cost and lifetime from type defaults.
    pub fn recovered(
        id: ObjectId,
        filename: String,
        size: u64,
        cost: u8,
        lifetime: u64,
        mtime: u64,
    ) -> Self {
        Self {
            id,
            filename,
            size,
            cost,
            lifetime,
            created_at: mtime,
            last_access_at: mtime,
            write_open: false,
            subscriber_count: 0,
            pending_expire: false,
        }
    }

    /// True when nothing pins the object: no subscribers and not mid-write.
    pub fn is_evictable(&self) -> bool {
        self.subscriber_count == 0 && !self.write_open
    }

    /// Updates the reserved size. Advances the access time.
    pub fn set_size(&mut self, size: u64) {
        self.size = size;
        self.touch();
    }

    /// Advances the access time to now.
    pub fn touch(&mut self) {
        self.last_access_at = now_secs();
    }

    /// Adds a subscriber pin. Advances the access time.
    pub fn subscribe(&mut self) {
        self.subscriber_count += 1;
        self.touch();
    }

    /// Drops a subscriber pin; once the count reaches zero the write window
    /// is considered closed. Returns the remaining count.
    pub fn unsubscribe(&mut self) -> u32 {
        self.subscriber_count = self.subscriber_count.saturating_sub(1);
        if self.subscriber_count == 0 {
            self.write_open = false;
        }
        self.subscriber_count
    }
}
