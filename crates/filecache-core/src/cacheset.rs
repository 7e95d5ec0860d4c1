//! Top-level registry of cache types.
//!
//! The cache set owns the disk layout, the type table, the process-wide
//! monotonic object-id counter, and the reverse index from object id to
//! owning type. All object-indexed operations route through here.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{FileCacheError, FileCacheResult};
use crate::layout::{self, DiskLayout};
use crate::object::CachedObject;
use crate::pathcodec;
use crate::subscriptions::SubscriptionTable;
use crate::typecache::{ExpireOutcome, TypeCache};
use crate::types::{now_secs, valid_type_name, CacheParams, ObjectId};

/// Partial parameter update for an existing type. Omitted fields retain
/// their current values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CacheParamsUpdate {
    /// New reservation floor in bytes.
    pub lo_watermark: Option<u64>,
    /// New usage ceiling in bytes.
    pub hi_watermark: Option<u64>,
    /// New default object size.
    pub size: Option<u64>,
    /// New default object cost.
    pub cost: Option<u8>,
    /// New default object lifetime in seconds.
    pub lifetime: Option<u64>,
}

/// Cache-wide status summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CacheStatus {
    /// Number of defined types.
    pub num_types: usize,
    /// Total bytes reserved across all types.
    pub size: u64,
    /// Total live objects across all types.
    pub num_objs: usize,
    /// Bytes still available under the configured disk budget, honoring each
    /// type's reservation floor.
    pub avail_space: u64,
}

/// Registry of cache types plus the shared id counter and reverse index.
#[derive(Debug)]
pub struct CacheSet {
    layout: DiskLayout,
    types: BTreeMap<String, TypeCache>,
    object_types: HashMap<ObjectId, String>,
    next_object_id: u64,
    disk_budget: u64,
    stale_entries: Vec<(PathBuf, bool)>,
}

impl CacheSet {
    /// Creates a cache set over `root` with the given total disk budget.
    pub fn new(root: impl Into<PathBuf>, disk_budget: u64) -> FileCacheResult<Self> {
        let layout = DiskLayout::new(root)?;
        Ok(Self {
            layout,
            types: BTreeMap::new(),
            object_types: HashMap::new(),
            next_object_id: 1,
            disk_budget,
            stale_entries: Vec::new(),
        })
    }

    /// Returns the cache root directory.
    pub fn base_dir(&self) -> &Path {
        self.layout.root()
    }

    /// Returns the filesystem block size under the cache root.
    pub fn fs_block_size(&self) -> u64 {
        self.layout.fs_block_size()
    }

    fn sync_index(&mut self, type_name: &str) {
        if let Some(tc) = self.types.get_mut(type_name) {
            for id in tc.take_removed() {
                self.object_types.remove(&id);
            }
        }
    }

    /// Defines a new cache type. Re-defining an existing name fails with
    /// `Exists` regardless of whether the parameters match.
    pub fn define_type(
        &mut self,
        name: &str,
        params: CacheParams,
        dir_type: bool,
    ) -> FileCacheResult<()> {
        if !valid_type_name(name) {
            return Err(FileCacheError::InvalidParams(format!(
                "'{}' is not a valid type name.",
                name
            )));
        }
        if params.lo_watermark == 0 || params.hi_watermark <= params.lo_watermark {
            return Err(FileCacheError::InvalidParams(
                "hiWatermark must be greater than loWatermark.".to_string(),
            ));
        }
        if self.types.contains_key(name) {
            return Err(FileCacheError::Exists(format!(
                "Type '{}' already exists.",
                name
            )));
        }

        let reserved: u64 = self
            .types
            .values()
            .map(|tc| tc.params().lo_watermark)
            .sum::<u64>()
            .saturating_add(params.lo_watermark);
        if reserved > self.disk_budget {
            warn!(
                type_name = name,
                reserved,
                budget = self.disk_budget,
                "sum of loWatermarks exceeds the configured disk budget"
            );
        }

        self.layout
            .create_type_dir(name)
            .map_err(|e| FileCacheError::Define(format!("Unable to define type '{}': {}", name, e)))?;
        self.types
            .insert(name.to_string(), TypeCache::new(name, params, dir_type));
        info!(type_name = name, dir_type, "defined cache type");
        Ok(())
    }

    /// Applies a partial parameter update to an existing type.
    pub fn change_type(&mut self, name: &str, update: CacheParamsUpdate) -> FileCacheResult<()> {
        let tc = self.types.get_mut(name).ok_or_else(|| {
            FileCacheError::Change(format!("Type '{}' does not exist.", name))
        })?;
        let mut params = tc.params();
        if let Some(lo) = update.lo_watermark {
            params.lo_watermark = lo;
        }
        if let Some(hi) = update.hi_watermark {
            params.hi_watermark = hi;
        }
        if let Some(size) = update.size {
            params.size = size;
        }
        if let Some(cost) = update.cost {
            params.cost = cost;
        }
        if let Some(lifetime) = update.lifetime {
            params.lifetime = lifetime;
        }
        if params.lo_watermark == 0 || params.hi_watermark <= params.lo_watermark {
            return Err(FileCacheError::InvalidParams(
                "hiWatermark must be greater than loWatermark.".to_string(),
            ));
        }
        tc.set_params(params);
        debug!(type_name = name, ?params, "changed cache type");
        Ok(())
    }

    /// Deletes a type and all of its objects. Fails when any object is
    /// non-evictable. Returns the bytes reclaimed.
    pub fn delete_type(&mut self, name: &str) -> FileCacheResult<u64> {
        let tc = self.types.get_mut(name).ok_or_else(|| {
            FileCacheError::Delete(format!("Type '{}' does not exist.", name))
        })?;
        if !tc.all_evictable() {
            return Err(FileCacheError::Delete(format!(
                "Type '{}' has objects in use.",
                name
            )));
        }
        let freed = tc.remove_all(&self.layout);
        self.sync_index(name);
        self.types.remove(name);
        self.layout.remove_type_dir(name);
        info!(type_name = name, freed, "deleted cache type");
        Ok(freed)
    }

    /// Returns the parameters of a type.
    pub fn describe_type(&self, name: &str) -> FileCacheResult<CacheParams> {
        self.types
            .get(name)
            .map(|tc| tc.params())
            .ok_or_else(|| FileCacheError::Exists(format!("Type '{}' does not exist.", name)))
    }

    /// True when the type is defined.
    pub fn type_exists(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// True when the type stores directory objects.
    pub fn is_dir_type(&self, name: &str) -> bool {
        self.types.get(name).map(|tc| tc.is_dir_type()).unwrap_or(false)
    }

    /// Returns the names of all defined types.
    pub fn get_types(&self) -> Vec<String> {
        self.types.keys().cloned().collect()
    }

    /// Returns usage and object count for one type.
    pub fn get_type_status(&self, name: &str) -> Option<(u64, usize)> {
        self.types.get(name).map(|tc| tc.status())
    }

    /// Returns the cache-wide status summary.
    pub fn get_cache_status(&self) -> CacheStatus {
        let mut size = 0u64;
        let mut num_objs = 0usize;
        let mut committed = 0u64;
        for tc in self.types.values() {
            let (used, count) = tc.status();
            size += used;
            num_objs += count;
            committed += used.max(tc.params().lo_watermark);
        }
        CacheStatus {
            num_types: self.types.len(),
            size,
            num_objs,
            avail_space: self.disk_budget.saturating_sub(committed),
        }
    }

    /// Returns the name of the type owning an object id, if the object is
    /// still live.
    pub fn type_for_object(&self, id: ObjectId) -> Option<&str> {
        let name = self.object_types.get(&id)?;
        let tc = self.types.get(name)?;
        tc.object(id).map(|_| name.as_str())
    }

    /// Inserts a new object into a type, evicting as needed. Returns the id
    /// and the full on-disk path.
    pub fn insert(
        &mut self,
        type_name: &str,
        filename: &str,
        size: u64,
        cost: u8,
        lifetime: u64,
    ) -> FileCacheResult<(ObjectId, PathBuf)> {
        if !self.types.contains_key(type_name) {
            return Err(FileCacheError::Exists(format!(
                "No type '{}' defined.",
                type_name
            )));
        }
        let id = ObjectId::new(self.next_object_id);
        let layout = &self.layout;
        let tc = self
            .types
            .get_mut(type_name)
            .expect("presence checked above");
        let result = tc.insert(layout, id, filename, size, cost, lifetime);
        self.sync_index(type_name);
        let path = result?;
        self.next_object_id += 1;
        self.object_types.insert(id, type_name.to_string());
        Ok((id, path))
    }

    /// Resizes an object's reservation. Returns the resulting size, which is
    /// the prior size when growth could not be admitted.
    pub fn resize(&mut self, id: ObjectId, new_size: u64) -> Option<u64> {
        let type_name = self.type_for_object(id)?.to_string();
        let layout = &self.layout;
        let result = self.types.get_mut(&type_name)?.resize(layout, id, new_size);
        self.sync_index(&type_name);
        result
    }

    /// Expires an object, deferring when it is pinned.
    pub fn expire(&mut self, id: ObjectId) -> Option<ExpireOutcome> {
        let type_name = self.type_for_object(id)?.to_string();
        let layout = &self.layout;
        let outcome = self.types.get_mut(&type_name)?.expire(layout, id);
        self.sync_index(&type_name);
        outcome
    }

    /// Advances an object's access time.
    pub fn touch(&mut self, id: ObjectId) -> bool {
        let type_name = match self.type_for_object(id) {
            Some(name) => name.to_string(),
            None => return false,
        };
        self.types
            .get_mut(&type_name)
            .map(|tc| tc.touch(id))
            .unwrap_or(false)
    }

    /// Adds a subscriber pin to an object and returns its filesystem path.
    pub fn subscribe(&mut self, id: ObjectId) -> Option<PathBuf> {
        let type_name = self.type_for_object(id)?.to_string();
        let tc = self.types.get_mut(&type_name)?;
        if !tc.subscribe(id) {
            return None;
        }
        let filename = tc.object(id)?.filename.clone();
        Some(pathcodec::encode_path(
            self.layout.root(),
            &type_name,
            id,
            &filename,
        ))
    }

    /// Marks an object as still receiving content.
    pub fn mark_write_open(&mut self, id: ObjectId) {
        if let Some(type_name) = self.type_for_object(id).map(|n| n.to_string()) {
            if let Some(tc) = self.types.get_mut(&type_name) {
                tc.mark_write_open(id);
            }
        }
    }

    /// Drops a subscriber pin. A pending-expire object whose last pin is
    /// released is removed immediately.
    pub fn unsubscribe(&mut self, type_name: &str, id: ObjectId) {
        let layout = &self.layout;
        if let Some(tc) = self.types.get_mut(type_name) {
            tc.unsubscribe(layout, id);
        }
        self.sync_index(type_name);
    }

    /// Returns an object's reserved size.
    pub fn object_size(&self, id: ObjectId) -> Option<u64> {
        let type_name = self.type_for_object(id)?;
        self.types.get(type_name)?.object(id).map(|o| o.size)
    }

    /// Returns an object's caller-supplied filename.
    pub fn object_filename(&self, id: ObjectId) -> Option<String> {
        let type_name = self.type_for_object(id)?;
        self.types
            .get(type_name)?
            .object(id)
            .map(|o| o.filename.clone())
    }

    /// Returns an object's full on-disk path.
    pub fn object_path(&self, id: ObjectId) -> Option<PathBuf> {
        let type_name = self.type_for_object(id)?;
        let obj = self.types.get(type_name)?.object(id)?;
        Some(pathcodec::encode_path(
            self.layout.root(),
            type_name,
            id,
            &obj.filename,
        ))
    }

    /// Walks the directory tree at startup and reconstructs object records
    /// from on-disk truth: id from the path, size from stat, filename from
    /// the entry name, timestamps from mtime, cost and lifetime from the
    /// owning type's defaults.
    ///
    /// Type directories with no registered type are re-registered with
    /// placeholder parameters pending the external configuration step.
    /// Entries that fail to decode are queued for startup cleanup. Hidden
    /// (dot-prefixed) top-level directories are left untouched.
    pub fn walk_dir_tree(&mut self) -> FileCacheResult<()> {
        let mut max_id = self.next_object_id.saturating_sub(1);
        for type_name in self.layout.list_type_dirs()? {
            if type_name.starts_with('.') {
                continue;
            }
            let mut recovered: Vec<CachedObject> = Vec::new();
            let mut any_dir = false;
            for shard in self.layout.list_shards(&type_name)? {
                for (entry, meta) in self.layout.list_entries(&type_name, &shard)? {
                    let path = self
                        .layout
                        .root()
                        .join(&type_name)
                        .join(&shard)
                        .join(&entry);
                    let id = pathcodec::decode_object_id(&path);
                    if !id.is_valid() {
                        warn!(path = %path.display(), "undecodable cache entry queued for cleanup");
                        self.stale_entries.push((path, meta.is_dir()));
                        continue;
                    }
                    let filename = pathcodec::filename_from_entry(&entry)
                        .unwrap_or(entry.as_str())
                        .to_string();
                    any_dir |= meta.is_dir();
                    max_id = max_id.max(id.as_u64());
                    recovered.push(CachedObject::recovered(
                        id,
                        filename,
                        meta.len(),
                        0,
                        0,
                        layout::mtime_secs(&meta),
                    ));
                }
            }

            let tc = self
                .types
                .entry(type_name.clone())
                .or_insert_with(|| TypeCache::new(&type_name, CacheParams::recovered(), any_dir));
            let defaults = tc.params();
            for mut obj in recovered {
                obj.cost = defaults.cost;
                obj.lifetime = defaults.lifetime;
                self.object_types.insert(obj.id, type_name.clone());
                tc.insert_recovered(obj);
            }
            let (used, count) = tc.status();
            info!(type_name = %type_name, count, used, "recovered cache type from disk");
        }
        self.next_object_id = max_id + 1;
        Ok(())
    }

    /// Startup cleanup: removes entries that failed to decode during the walk
    /// and drops records whose backing file has gone missing.
    pub fn cleanup_at_startup(&mut self) {
        for (path, is_dir) in std::mem::take(&mut self.stale_entries) {
            self.layout.remove_entry(&path, is_dir);
        }
        self.cleanup_orphans();
    }

    /// Drops evictable records whose backing path no longer exists. Pinned
    /// and mid-write objects are left to the subscribed-object validation.
    pub fn cleanup_orphans(&mut self) {
        let root = self.layout.root().to_path_buf();
        for (type_name, tc) in self.types.iter_mut() {
            let missing: Vec<ObjectId> = tc
                .objects()
                .filter(|o| o.is_evictable())
                .filter(|o| {
                    !pathcodec::encode_path(&root, type_name, o.id, &o.filename).exists()
                })
                .map(|o| o.id)
                .collect();
            for id in missing {
                tc.drop_record(id);
            }
            for id in tc.take_removed() {
                self.object_types.remove(&id);
            }
        }
    }

    /// Removes evictable directory objects that are still empty past the
    /// stale threshold. Fresh, still-empty directories get a grace period.
    pub fn cleanup_dir_types(&mut self, stale_secs: u64) {
        let now = now_secs();
        let root = self.layout.root().to_path_buf();
        let layout = self.layout.clone();
        for (type_name, tc) in self.types.iter_mut() {
            if !tc.is_dir_type() {
                continue;
            }
            let stale: Vec<ObjectId> = tc
                .objects()
                .filter(|o| o.is_evictable())
                .filter(|o| now.saturating_sub(o.created_at) >= stale_secs)
                .filter(|o| {
                    let path = pathcodec::encode_path(&root, type_name, o.id, &o.filename);
                    layout.dir_is_empty(&path)
                })
                .map(|o| o.id)
                .collect();
            for id in stale {
                info!(type_name = %type_name, %id, "removing stale empty directory object");
                tc.remove(&layout, id);
            }
            for id in tc.take_removed() {
                self.object_types.remove(&id);
            }
        }
    }

    /// Validates one subscribed object against disk: a missing backing path
    /// or a size mismatch resets the access time so a mid-write object is
    /// never aged out under its writer.
    pub fn check_subscribed_object(&mut self, type_name: &str, id: ObjectId) {
        let Some(tc) = self.types.get_mut(type_name) else {
            return;
        };
        let Some(obj) = tc.object(id) else {
            return;
        };
        let path = pathcodec::encode_path(self.layout.root(), type_name, id, &obj.filename);
        let consistent = match fs::metadata(&path) {
            Ok(meta) => meta.is_dir() || meta.len() == obj.size,
            Err(_) => false,
        };
        if !consistent {
            debug!(type_name, %id, "subscribed object inconsistent with disk, resetting access");
            tc.reset_access(id);
        }
    }

    /// Runs the short-interval maintenance pass: orphan cleanup plus
    /// validation of every subscribed object.
    pub fn run_worker_pass(&mut self, subscriptions: &SubscriptionTable) {
        debug!("maintenance worker pass");
        self.cleanup_orphans();
        for (type_name, id) in subscriptions.subscribed_objects() {
            self.check_subscribed_object(&type_name, id);
        }
    }
}
