//! Per-type object table with watermark accounting and eviction.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::error::{FileCacheError, FileCacheResult};
use crate::layout::DiskLayout;
use crate::object::CachedObject;
use crate::types::{now_secs, CacheParams, ObjectId};

/// Score adjustment for objects that have outlived their lifetime. Large
/// enough to dominate any cost value, making such objects most evictable.
const LIFETIME_EXPIRED_WEIGHT: i64 = -10_000;

/// Outcome of a space reservation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// The reservation fits below the ceiling as-is.
    Admitted,
    /// The reservation fits after evicting the given number of objects.
    AdmittedAfterEviction {
        /// Number of objects evicted.
        evicted: usize,
        /// Bytes reclaimed by the eviction.
        freed: u64,
    },
    /// Not enough evictable bytes exist; nothing was removed.
    InsufficientSpace {
        /// Bytes that would have to be reclaimed.
        needed: u64,
        /// Evictable bytes actually available.
        evictable: u64,
    },
}

/// Outcome of an expire request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireOutcome {
    /// The object was removed immediately.
    Removed,
    /// The object is pinned; removal is deferred until it is released.
    Deferred,
}

/// Per-type object table, usage accounting, and eviction policy.
#[derive(Debug)]
pub struct TypeCache {
    name: String,
    params: CacheParams,
    dir_type: bool,
    objects: BTreeMap<ObjectId, CachedObject>,
    used_bytes: u64,
    removed_log: Vec<ObjectId>,
}

impl TypeCache {
    /// Creates an empty type cache.
    pub fn new(name: impl Into<String>, params: CacheParams, dir_type: bool) -> Self {
        Self {
            name: name.into(),
            params,
            dir_type,
            objects: BTreeMap::new(),
            used_bytes: 0,
            removed_log: Vec::new(),
        }
    }

    /// Drains the ids removed since the last call. The owning cache set uses
    /// this to keep its reverse index current across internal evictions.
    pub fn take_removed(&mut self) -> Vec<ObjectId> {
        std::mem::take(&mut self.removed_log)
    }

    /// Returns the type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the type parameters.
    pub fn params(&self) -> CacheParams {
        self.params
    }

    /// Replaces the type parameters.
    pub fn set_params(&mut self, params: CacheParams) {
        self.params = params;
    }

    /// True when objects of this type are directories.
    pub fn is_dir_type(&self) -> bool {
        self.dir_type
    }

    /// Returns the current usage and object count.
    pub fn status(&self) -> (u64, usize) {
        (self.used_bytes, self.objects.len())
    }

    /// Returns the bytes currently reserved by live objects.
    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    /// Looks up an object record.
    pub fn object(&self, id: ObjectId) -> Option<&CachedObject> {
        self.objects.get(&id)
    }

    /// Iterates over all object records.
    pub fn objects(&self) -> impl Iterator<Item = &CachedObject> {
        self.objects.values()
    }

    /// True when every object in the table is evictable.
    pub fn all_evictable(&self) -> bool {
        self.objects.values().all(|o| o.is_evictable())
    }

    /// Requests admission of `size` additional bytes, evicting as needed.
    ///
    /// When usage would stay at or below the high watermark the reservation
    /// is admitted outright. Otherwise eviction candidates are selected in
    /// policy order until the shortfall is covered; if the type lacks enough
    /// evictable bytes the decision is `InsufficientSpace` and no object is
    /// removed.
    pub fn reserve(&mut self, layout: &DiskLayout, size: u64) -> AdmissionDecision {
        self.reserve_excluding(layout, size, None)
    }

    fn reserve_excluding(
        &mut self,
        layout: &DiskLayout,
        size: u64,
        exclude: Option<ObjectId>,
    ) -> AdmissionDecision {
        let ceiling = self.params.hi_watermark;
        if self.used_bytes.saturating_add(size) <= ceiling {
            return AdmissionDecision::Admitted;
        }
        let needed = self.used_bytes.saturating_add(size) - ceiling;

        let candidates = self.eviction_order(exclude);
        let evictable: u64 = candidates
            .iter()
            .map(|id| self.objects[id].size)
            .sum();
        if evictable < needed {
            debug!(
                type_name = %self.name,
                needed,
                evictable,
                "reservation rejected, insufficient evictable bytes"
            );
            return AdmissionDecision::InsufficientSpace { needed, evictable };
        }

        let mut freed = 0u64;
        let mut evicted = 0usize;
        for id in candidates {
            if freed >= needed {
                break;
            }
            freed += self.objects[&id].size;
            evicted += 1;
            info!(type_name = %self.name, %id, "evicting object for reservation");
            self.remove(layout, id);
        }
        AdmissionDecision::AdmittedAfterEviction { evicted, freed }
    }

    /// Returns all evictable objects in eviction order: pending-expire
    /// objects first, then ascending cost-and-age score, then least recently
    /// accessed, then ascending id.
    fn eviction_order(&self, exclude: Option<ObjectId>) -> Vec<ObjectId> {
        let now = now_secs();
        let mut candidates: Vec<&CachedObject> = self
            .objects
            .values()
            .filter(|o| o.is_evictable() && Some(o.id) != exclude)
            .collect();
        candidates.sort_by_key(|o| {
            (
                !o.pending_expire,
                Self::eviction_score(o, now),
                o.last_access_at,
                o.id,
            )
        });
        candidates.into_iter().map(|o| o.id).collect()
    }

    /// Eviction score: cost plus an age adjustment. Objects older than a
    /// nonzero lifetime take a large negative weight; a zero lifetime is
    /// neutral. Lower scores evict first.
    fn eviction_score(obj: &CachedObject, now: u64) -> i64 {
        let mut score = obj.cost as i64;
        if obj.lifetime > 0 && now.saturating_sub(obj.last_access_at) > obj.lifetime {
            score += LIFETIME_EXPIRED_WEIGHT;
        }
        score
    }

    /// Admits and inserts a new object, creating its on-disk entry. The id is
    /// allocated by the owning cache set. On failure nothing is recorded and
    /// any partially created path is removed.
    pub fn insert(
        &mut self,
        layout: &DiskLayout,
        id: ObjectId,
        filename: &str,
        size: u64,
        cost: u8,
        lifetime: u64,
    ) -> FileCacheResult<PathBuf> {
        match self.reserve(layout, size) {
            AdmissionDecision::InsufficientSpace { needed, evictable } => {
                return Err(FileCacheError::Exists(format!(
                    "Insufficient space in type '{}': needed {} more bytes, {} evictable.",
                    self.name, needed, evictable
                )));
            }
            AdmissionDecision::Admitted => {}
            AdmissionDecision::AdmittedAfterEviction { evicted, freed } => {
                debug!(
                    type_name = %self.name,
                    evicted,
                    freed,
                    "insert admitted after eviction"
                );
            }
        }

        let path = layout.create_object(&self.name, id, filename, self.dir_type)?;
        let obj = CachedObject::new(id, filename.to_string(), size, cost, lifetime);
        self.objects.insert(id, obj);
        self.used_bytes += size;
        debug!(type_name = %self.name, %id, size, "inserted object");
        Ok(path)
    }

    /// Registers an object reconstructed by the startup walk. No disk entry
    /// is created; the backing file already exists.
    pub fn insert_recovered(&mut self, obj: CachedObject) {
        self.used_bytes += obj.size;
        self.objects.insert(obj.id, obj);
    }

    /// Removes an evictable object from the table and from disk.
    pub fn remove(&mut self, layout: &DiskLayout, id: ObjectId) {
        if let Some(obj) = self.objects.remove(&id) {
            self.used_bytes = self.used_bytes.saturating_sub(obj.size);
            self.removed_log.push(id);
            layout.remove_object(&self.name, id, &obj.filename, self.dir_type);
        }
    }

    /// Drops an object record without touching disk. Used by orphan cleanup
    /// when the backing file has already vanished.
    pub fn drop_record(&mut self, id: ObjectId) {
        if let Some(obj) = self.objects.remove(&id) {
            self.used_bytes = self.used_bytes.saturating_sub(obj.size);
            self.removed_log.push(id);
            warn!(type_name = %self.name, %id, "dropped orphaned object record");
        }
    }

    /// Expires an object: immediate removal when evictable, otherwise the
    /// pending-expire flag is raised and removal waits for release.
    pub fn expire(&mut self, layout: &DiskLayout, id: ObjectId) -> Option<ExpireOutcome> {
        let obj = self.objects.get_mut(&id)?;
        if obj.is_evictable() {
            self.remove(layout, id);
            Some(ExpireOutcome::Removed)
        } else {
            obj.pending_expire = true;
            debug!(type_name = %self.name, %id, "expire deferred, object in use");
            Some(ExpireOutcome::Deferred)
        }
    }

    /// Resizes an object's reservation. Growth must be admitted like an
    /// insert; on failure the prior size is returned unchanged. Returns the
    /// resulting size.
    pub fn resize(&mut self, layout: &DiskLayout, id: ObjectId, new_size: u64) -> Option<u64> {
        let old_size = self.objects.get(&id)?.size;
        if new_size == old_size {
            if let Some(obj) = self.objects.get_mut(&id) {
                obj.touch();
            }
            return Some(old_size);
        }
        if new_size > old_size {
            let delta = new_size - old_size;
            if let AdmissionDecision::InsufficientSpace { .. } =
                self.reserve_excluding(layout, delta, Some(id))
            {
                return Some(old_size);
            }
            let obj = self.objects.get_mut(&id)?;
            obj.set_size(new_size);
            self.used_bytes += delta;
        } else {
            let delta = old_size - new_size;
            let obj = self.objects.get_mut(&id)?;
            obj.set_size(new_size);
            self.used_bytes = self.used_bytes.saturating_sub(delta);
        }
        Some(new_size)
    }

    /// Advances an object's access time. Returns false when absent.
    pub fn touch(&mut self, id: ObjectId) -> bool {
        match self.objects.get_mut(&id) {
            Some(obj) => {
                obj.touch();
                true
            }
            None => false,
        }
    }

    /// Adds a subscriber pin to an object. Returns false when absent.
    pub fn subscribe(&mut self, id: ObjectId) -> bool {
        match self.objects.get_mut(&id) {
            Some(obj) => {
                obj.subscribe();
                true
            }
            None => false,
        }
    }

    /// Marks an object as still receiving content.
    pub fn mark_write_open(&mut self, id: ObjectId) {
        if let Some(obj) = self.objects.get_mut(&id) {
            obj.write_open = true;
        }
    }

    /// Drops a subscriber pin. When the last pin is released on a
    /// pending-expire object the object is removed immediately. Returns true
    /// when the object was removed.
    pub fn unsubscribe(&mut self, layout: &DiskLayout, id: ObjectId) -> bool {
        let (count, pending) = match self.objects.get_mut(&id) {
            Some(obj) => (obj.unsubscribe(), obj.pending_expire),
            None => return false,
        };
        if count == 0 && pending {
            self.remove(layout, id);
            return true;
        }
        false
    }

    /// Resets an object's access time after a backing-file discrepancy.
    pub fn reset_access(&mut self, id: ObjectId) {
        if let Some(obj) = self.objects.get_mut(&id) {
            obj.touch();
        }
    }

    /// Removes every object in the table. Precondition: all are evictable.
    /// Returns the bytes reclaimed.
    pub fn remove_all(&mut self, layout: &DiskLayout) -> u64 {
        let freed = self.used_bytes;
        let ids: Vec<ObjectId> = self.objects.keys().copied().collect();
        for id in ids {
            self.remove(layout, id);
        }
        freed
    }

    #[cfg(test)]
    pub(crate) fn object_mut(&mut self, id: ObjectId) -> Option<&mut CachedObject> {
        self.objects.get_mut(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_cache(hi: u64) -> (TempDir, DiskLayout, TypeCache) {
        let dir = TempDir::new().unwrap();
        let layout = DiskLayout::new(dir.path().join("cache")).unwrap();
        layout.create_type_dir("t").unwrap();
        let params = CacheParams::new(hi / 2, hi, 0, 0, 0);
        (dir, layout, TypeCache::new("t", params, false))
    }

    fn insert_n(cache: &mut TypeCache, layout: &DiskLayout, n: u64, size: u64) -> Vec<ObjectId> {
        (1..=n)
            .map(|i| {
                let id = ObjectId::new(i);
                cache
                    .insert(layout, id, &format!("f{}", i), size, 0, 0)
                    .unwrap();
                id
            })
            .collect()
    }

    #[test]
    fn test_insert_accounts_usage() {
        let (_dir, layout, mut cache) = create_test_cache(8192);
        let path = cache
            .insert(&layout, ObjectId::new(1), "foo.bar", 1024, 10, 0)
            .unwrap();
        assert!(path.exists());
        assert_eq!(cache.status(), (1024, 1));
    }

    #[test]
    fn test_insert_exactly_at_ceiling_succeeds() {
        let (_dir, layout, mut cache) = create_test_cache(8192);
        cache
            .insert(&layout, ObjectId::new(1), "f", 8192, 0, 0)
            .unwrap();
        assert_eq!(cache.used_bytes(), 8192);
    }

    #[test]
    fn test_insert_over_ceiling_evicts_lru() {
        let (_dir, layout, mut cache) = create_test_cache(4096);
        let ids = insert_n(&mut cache, &layout, 4, 1024);

        // Age object 1 so LRU breaks the tie in its favor.
        cache.object_mut(ids[0]).unwrap().last_access_at -= 10;

        cache
            .insert(&layout, ObjectId::new(5), "f5", 1024, 0, 0)
            .unwrap();
        assert!(cache.object(ids[0]).is_none());
        assert!(cache.object(ids[1]).is_some());
        assert_eq!(cache.used_bytes(), 4096);
    }

    #[test]
    fn test_insert_too_large_fails_without_eviction() {
        let (_dir, layout, mut cache) = create_test_cache(4096);
        insert_n(&mut cache, &layout, 2, 1024);

        let err = cache
            .insert(&layout, ObjectId::new(9), "big", 8192, 0, 0)
            .unwrap_err();
        assert!(matches!(err, FileCacheError::Exists(_)));
        assert_eq!(cache.status(), (2048, 2));
    }

    #[test]
    fn test_pinned_objects_block_eviction() {
        let (_dir, layout, mut cache) = create_test_cache(2048);
        let ids = insert_n(&mut cache, &layout, 2, 1024);
        for id in &ids {
            assert!(cache.subscribe(*id));
        }

        let err = cache
            .insert(&layout, ObjectId::new(3), "f3", 1024, 0, 0)
            .unwrap_err();
        assert!(matches!(err, FileCacheError::Exists(_)));
        assert_eq!(cache.status(), (2048, 2));
    }

    #[test]
    fn test_pending_expire_evicts_first() {
        let (_dir, layout, mut cache) = create_test_cache(3072);
        let ids = insert_n(&mut cache, &layout, 3, 1024);
        cache.object_mut(ids[2]).unwrap().pending_expire = true;

        cache
            .insert(&layout, ObjectId::new(4), "f4", 1024, 0, 0)
            .unwrap();
        assert!(cache.object(ids[2]).is_none());
        assert!(cache.object(ids[0]).is_some());
    }

    #[test]
    fn test_lifetime_expired_evicts_before_costly() {
        let (_dir, layout, mut cache) = create_test_cache(2048);
        cache
            .insert(&layout, ObjectId::new(1), "cheap", 1024, 0, 0)
            .unwrap();
        cache
            .insert(&layout, ObjectId::new(2), "stale", 1024, 100, 60)
            .unwrap();
        // Object 2 is costly but has outlived its 60 second lifetime.
        cache.object_mut(ObjectId::new(2)).unwrap().last_access_at -= 120;

        cache
            .insert(&layout, ObjectId::new(3), "new", 1024, 0, 0)
            .unwrap();
        assert!(cache.object(ObjectId::new(2)).is_none());
        assert!(cache.object(ObjectId::new(1)).is_some());
    }

    #[test]
    fn test_low_cost_evicts_before_high_cost() {
        let (_dir, layout, mut cache) = create_test_cache(2048);
        cache
            .insert(&layout, ObjectId::new(1), "pricey", 1024, 90, 0)
            .unwrap();
        cache
            .insert(&layout, ObjectId::new(2), "cheap", 1024, 5, 0)
            .unwrap();

        cache
            .insert(&layout, ObjectId::new(3), "new", 1024, 0, 0)
            .unwrap();
        assert!(cache.object(ObjectId::new(2)).is_none());
        assert!(cache.object(ObjectId::new(1)).is_some());
    }

    #[test]
    fn test_id_breaks_remaining_ties() {
        let (_dir, layout, mut cache) = create_test_cache(2048);
        let ids = insert_n(&mut cache, &layout, 2, 1024);
        let access = cache.object(ids[0]).unwrap().last_access_at;
        cache.object_mut(ids[1]).unwrap().last_access_at = access;

        cache
            .insert(&layout, ObjectId::new(3), "f3", 1024, 0, 0)
            .unwrap();
        assert!(cache.object(ids[0]).is_none());
        assert!(cache.object(ids[1]).is_some());
    }

    #[test]
    fn test_expire_evictable_removes() {
        let (_dir, layout, mut cache) = create_test_cache(8192);
        cache
            .insert(&layout, ObjectId::new(1), "f", 1024, 0, 0)
            .unwrap();
        assert_eq!(
            cache.expire(&layout, ObjectId::new(1)),
            Some(ExpireOutcome::Removed)
        );
        assert_eq!(cache.status(), (0, 0));
    }

    #[test]
    fn test_expire_pinned_defers_then_unsubscribe_removes() {
        let (_dir, layout, mut cache) = create_test_cache(8192);
        let id = ObjectId::new(1);
        cache.insert(&layout, id, "f", 1024, 0, 0).unwrap();
        cache.subscribe(id);

        assert_eq!(cache.expire(&layout, id), Some(ExpireOutcome::Deferred));
        assert!(cache.object(id).is_some());
        assert!(cache.object(id).unwrap().pending_expire);

        assert!(cache.unsubscribe(&layout, id));
        assert!(cache.object(id).is_none());
        assert_eq!(cache.used_bytes(), 0);
    }

    #[test]
    fn test_subscribe_during_pending_expire_keeps_object() {
        let (_dir, layout, mut cache) = create_test_cache(8192);
        let id = ObjectId::new(1);
        cache.insert(&layout, id, "f", 1024, 0, 0).unwrap();
        cache.subscribe(id);
        cache.expire(&layout, id);
        cache.subscribe(id);

        assert!(!cache.unsubscribe(&layout, id));
        assert!(cache.object(id).is_some());
        assert!(cache.unsubscribe(&layout, id));
        assert!(cache.object(id).is_none());
    }

    #[test]
    fn test_expire_missing_returns_none() {
        let (_dir, layout, mut cache) = create_test_cache(8192);
        assert_eq!(cache.expire(&layout, ObjectId::new(99)), None);
    }

    #[test]
    fn test_resize_grow_and_shrink() {
        let (_dir, layout, mut cache) = create_test_cache(8192);
        let id = ObjectId::new(1);
        cache.insert(&layout, id, "f", 1024, 0, 0).unwrap();

        assert_eq!(cache.resize(&layout, id, 2048), Some(2048));
        assert_eq!(cache.used_bytes(), 2048);

        assert_eq!(cache.resize(&layout, id, 512), Some(512));
        assert_eq!(cache.used_bytes(), 512);
    }

    #[test]
    fn test_resize_grow_beyond_ceiling_returns_prior_size() {
        let (_dir, layout, mut cache) = create_test_cache(4096);
        let id = ObjectId::new(1);
        cache.insert(&layout, id, "f", 1024, 0, 0).unwrap();
        cache.subscribe(id);
        // Pinned, so nothing is evictable to cover the growth.
        assert_eq!(cache.resize(&layout, id, 8192), Some(1024));
        assert_eq!(cache.used_bytes(), 1024);
    }

    #[test]
    fn test_resize_grow_may_evict_others() {
        let (_dir, layout, mut cache) = create_test_cache(2048);
        let ids = insert_n(&mut cache, &layout, 2, 1024);
        cache.subscribe(ids[0]);

        assert_eq!(cache.resize(&layout, ids[0], 2048), Some(2048));
        assert!(cache.object(ids[1]).is_none());
        assert_eq!(cache.used_bytes(), 2048);
    }

    #[test]
    fn test_touch_and_missing() {
        let (_dir, layout, mut cache) = create_test_cache(8192);
        let id = ObjectId::new(1);
        cache.insert(&layout, id, "f", 1024, 0, 0).unwrap();
        assert!(cache.touch(id));
        assert!(!cache.touch(ObjectId::new(2)));
    }

    #[test]
    fn test_remove_all_returns_freed_bytes() {
        let (_dir, layout, mut cache) = create_test_cache(8192);
        insert_n(&mut cache, &layout, 3, 1024);
        assert_eq!(cache.remove_all(&layout), 3072);
        assert_eq!(cache.status(), (0, 0));
    }

    #[test]
    fn test_drop_record_keeps_disk_untouched() {
        let (_dir, layout, mut cache) = create_test_cache(8192);
        let id = ObjectId::new(1);
        let path = cache.insert(&layout, id, "f", 1024, 0, 0).unwrap();
        cache.drop_record(id);
        assert_eq!(cache.status(), (0, 0));
        assert!(path.exists());
    }
}
