//! Request surface of the file cache service.
//!
//! Each inbound method maps to one `Dispatcher` call taking a typed request
//! and returning a typed response or a wire-stable error. The dispatcher owns
//! the cache set and the subscription table; the transport owns request
//! lifetimes and calls [`Dispatcher::cancel_subscription`] when a
//! subscription's handle goes away.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use filecache_core::{
    pathcodec, CacheParams, CacheParamsUpdate, CacheSet, ExpireOutcome, FileCacheError,
    FileCacheResult, ObjectId, SubscriptionHandle, SubscriptionTable, MAX_COST,
};

use crate::copy::{self, unique_destination};
use crate::sandbox::{AccessRequest, PathPolicy};

/// Reply channel for an asynchronous copy. Resolves once the copy finishes,
/// whether or not the caller is still around to read it.
pub type CopyReply = oneshot::Receiver<FileCacheResult<PathBuf>>;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefineTypeRequest {
    pub type_name: String,
    pub lo_watermark: u64,
    pub hi_watermark: u64,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub cost: Option<u8>,
    #[serde(default)]
    pub lifetime: Option<u64>,
    #[serde(default)]
    pub dir_type: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeTypeRequest {
    pub type_name: String,
    #[serde(default)]
    pub lo_watermark: Option<u64>,
    #[serde(default)]
    pub hi_watermark: Option<u64>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub cost: Option<u8>,
    #[serde(default)]
    pub lifetime: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeNameRequest {
    pub type_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertCacheObjectRequest {
    pub type_name: String,
    pub file_name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub cost: Option<u8>,
    #[serde(default)]
    pub lifetime: Option<u64>,
    #[serde(default)]
    pub subscribe: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathNameRequest {
    pub path_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeCacheObjectRequest {
    pub path_name: String,
    pub new_size: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyCacheObjectRequest {
    pub path_name: String,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DescribeTypeResponse {
    pub lo_watermark: u64,
    pub hi_watermark: u64,
    pub size: u64,
    pub cost: u8,
    pub lifetime: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteTypeResponse {
    pub freed_space: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InsertCacheObjectResponse {
    pub path_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribed: Option<bool>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResizeCacheObjectResponse {
    pub new_size: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeCacheObjectResponse {
    pub subscribed: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatusResponse {
    pub num_types: usize,
    pub size: u64,
    pub num_objs: usize,
    pub avail_space: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CacheTypeStatusResponse {
    pub size: u64,
    pub num_objs: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSizeResponse {
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectFilenameResponse {
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CacheTypesResponse {
    pub types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VersionResponse {
    pub version: String,
}

/// Translates inbound requests into cache engine calls.
pub struct Dispatcher {
    cache: CacheSet,
    subscriptions: SubscriptionTable,
    policy: Box<dyn PathPolicy + Send + Sync>,
    download_dir: PathBuf,
}

impl Dispatcher {
    /// Creates a dispatcher over an already-initialized cache set.
    pub fn new(
        cache: CacheSet,
        policy: Box<dyn PathPolicy + Send + Sync>,
        download_dir: PathBuf,
    ) -> Self {
        Self {
            cache,
            subscriptions: SubscriptionTable::new(),
            policy,
            download_dir,
        }
    }

    /// Access to the underlying cache set, for maintenance driving.
    pub fn cache_mut(&mut self) -> &mut CacheSet {
        &mut self.cache
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    fn validate_cost(cost: Option<u8>) -> FileCacheResult<()> {
        if let Some(cost) = cost {
            if cost > MAX_COST {
                return Err(FileCacheError::InvalidParams(
                    "cost must be between 0 and 100.".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Decodes an object id from a caller-supplied path and cross-checks the
    /// path's type segment against the reverse index.
    fn object_from_path(&self, path_name: &str, op: &str) -> FileCacheResult<ObjectId> {
        let path = Path::new(path_name);
        let id = pathcodec::decode_object_id(path);
        if !id.is_valid() {
            return Err(FileCacheError::Exists(format!(
                "{}: Invalid object id derived from pathname.",
                op
            )));
        }
        let derived = pathcodec::extract_type_name(self.cache.base_dir(), path);
        match (derived, self.cache.type_for_object(id)) {
            (Some(from_path), Some(owner)) if from_path == owner => Ok(id),
            _ => Err(FileCacheError::Exists(format!(
                "{}: pathName no longer found in cache.",
                op
            ))),
        }
    }

    pub fn define_type(&mut self, req: DefineTypeRequest) -> FileCacheResult<()> {
        Self::validate_cost(req.cost)?;
        let params = CacheParams::new(
            req.lo_watermark,
            req.hi_watermark,
            req.size.unwrap_or(0),
            req.cost.unwrap_or(0),
            req.lifetime.unwrap_or(0),
        );
        self.cache
            .define_type(&req.type_name, params, req.dir_type.unwrap_or(false))
    }

    pub fn change_type(&mut self, req: ChangeTypeRequest) -> FileCacheResult<()> {
        Self::validate_cost(req.cost)?;
        self.cache.change_type(
            &req.type_name,
            CacheParamsUpdate {
                lo_watermark: req.lo_watermark,
                hi_watermark: req.hi_watermark,
                size: req.size,
                cost: req.cost,
                lifetime: req.lifetime,
            },
        )
    }

    pub fn delete_type(&mut self, req: TypeNameRequest) -> FileCacheResult<DeleteTypeResponse> {
        let freed_space = self.cache.delete_type(&req.type_name)?;
        Ok(DeleteTypeResponse { freed_space })
    }

    pub fn describe_type(&self, req: TypeNameRequest) -> FileCacheResult<DescribeTypeResponse> {
        let params = self.cache.describe_type(&req.type_name)?;
        Ok(DescribeTypeResponse {
            lo_watermark: params.lo_watermark,
            hi_watermark: params.hi_watermark,
            size: params.size,
            cost: params.cost,
            lifetime: params.lifetime,
        })
    }

    /// Inserts a new cache object and returns its write path. With
    /// `subscribe` the object is pinned and left write-open; the returned
    /// handle must be cancelled when the caller's request goes away.
    pub fn insert_cache_object(
        &mut self,
        req: InsertCacheObjectRequest,
    ) -> FileCacheResult<(InsertCacheObjectResponse, Option<SubscriptionHandle>)> {
        Self::validate_cost(req.cost)?;
        if !self.cache.type_exists(&req.type_name) {
            return Err(FileCacheError::Exists(format!(
                "No type '{}' defined.",
                req.type_name
            )));
        }
        let defaults = self.cache.describe_type(&req.type_name)?;
        let size = req.size.unwrap_or(defaults.size);
        let cost = req.cost.unwrap_or(defaults.cost);
        let lifetime = req.lifetime.unwrap_or(defaults.lifetime);

        if self.cache.is_dir_type(&req.type_name) && size <= self.cache.fs_block_size() {
            return Err(FileCacheError::InvalidParams(
                "size must be greater than 1 block when dirType = true.".to_string(),
            ));
        }

        let (id, path) = self
            .cache
            .insert(&req.type_name, &req.file_name, size, cost, lifetime)?;
        debug!(type_name = %req.type_name, %id, size, "inserted cache object");

        let mut response = InsertCacheObjectResponse {
            path_name: path.to_string_lossy().into_owned(),
            subscribed: None,
        };
        let mut handle = None;
        if req.subscribe {
            if self.cache.subscribe(id).is_some() {
                self.cache.mark_write_open(id);
                handle = Some(self.subscriptions.add(&req.type_name, id));
                response.subscribed = Some(true);
            } else {
                warn!(%id, "could not subscribe freshly inserted object");
            }
        }
        Ok((response, handle))
    }

    pub fn resize_cache_object(
        &mut self,
        req: ResizeCacheObjectRequest,
    ) -> FileCacheResult<ResizeCacheObjectResponse> {
        if req.new_size == 0 {
            return Err(FileCacheError::InvalidParams(
                "newSize must be greater than 0.".to_string(),
            ));
        }
        let id = self.object_from_path(&req.path_name, "ResizeCacheObject")?;
        match self.cache.resize(id, req.new_size) {
            Some(size) if size == req.new_size => {
                Ok(ResizeCacheObjectResponse { new_size: size })
            }
            Some(_) => Err(FileCacheError::Resize(
                "ResizeCacheObject: Unable to resize object.".to_string(),
            )),
            None => Err(FileCacheError::Exists(
                "ResizeCacheObject: pathName no longer found in cache.".to_string(),
            )),
        }
    }

    /// Expires an object. When the object is pinned the expire is deferred
    /// and the caller is told so with `InUse`.
    pub fn expire_cache_object(&mut self, req: PathNameRequest) -> FileCacheResult<()> {
        let id = self.object_from_path(&req.path_name, "ExpireCacheObject")?;
        match self.cache.expire(id) {
            Some(ExpireOutcome::Removed) => Ok(()),
            Some(ExpireOutcome::Deferred) => Err(FileCacheError::InUse(
                "ExpireCacheObject: Expire deferred, object in use.".to_string(),
            )),
            None => Err(FileCacheError::Exists(
                "ExpireCacheObject: pathName no longer found in cache.".to_string(),
            )),
        }
    }

    /// Subscribes to an object, pinning it. The returned handle must be
    /// cancelled when the caller's request goes away.
    pub fn subscribe_cache_object(
        &mut self,
        req: PathNameRequest,
    ) -> FileCacheResult<(SubscribeCacheObjectResponse, SubscriptionHandle)> {
        let id = self.object_from_path(&req.path_name, "SubscribeCacheObject")?;
        let type_name = self
            .cache
            .type_for_object(id)
            .map(|n| n.to_string())
            .ok_or_else(|| {
                FileCacheError::Exists(
                    "SubscribeCacheObject: Could not find object to match derived id.".to_string(),
                )
            })?;
        self.cache.subscribe(id).ok_or_else(|| {
            FileCacheError::Exists(
                "SubscribeCacheObject: Could not find object to match derived id.".to_string(),
            )
        })?;
        let handle = self.subscriptions.add(&type_name, id);
        Ok((SubscribeCacheObjectResponse { subscribed: true }, handle))
    }

    /// Cancels a subscription; the last handle for an object runs the
    /// unsubscribe path, which may remove a pending-expire object.
    pub fn cancel_subscription(&mut self, handle: SubscriptionHandle) {
        if let Some((type_name, id, last)) = self.subscriptions.cancel(handle) {
            if last {
                self.cache.unsubscribe(&type_name, id);
            }
        }
    }

    pub fn touch_cache_object(&mut self, req: PathNameRequest) -> FileCacheResult<()> {
        let id = self.object_from_path(&req.path_name, "TouchCacheObject")?;
        if self.cache.touch(id) {
            Ok(())
        } else {
            Err(FileCacheError::Exists(
                "TouchCacheObject: Could not locate object".to_string(),
            ))
        }
    }

    /// Validates a copy request, resolves a unique destination, and starts
    /// the asynchronous copy. The reply channel resolves when the copy
    /// completes.
    pub fn copy_cache_object(
        &mut self,
        req: CopyCacheObjectRequest,
        caller: &str,
    ) -> FileCacheResult<CopyReply> {
        let id = self.object_from_path(&req.path_name, "CopyCacheObject")?;
        let source = self.cache.object_path(id).ok_or_else(|| {
            FileCacheError::Exists("CopyCacheObject: Could not locate object".to_string())
        })?;
        let file_name = match req.file_name.filter(|f| !f.is_empty()) {
            Some(name) => name,
            None => {
                let name = self.cache.object_filename(id).unwrap_or_default();
                if name.is_empty() {
                    return Err(FileCacheError::Argument(
                        "CopyCacheObject: No fileName specified or found.".to_string(),
                    ));
                }
                name
            }
        };
        let destination = req
            .destination
            .filter(|d| !d.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.download_dir.clone());

        if !self
            .policy
            .is_path_allowed(&destination, caller, AccessRequest::WRITE_CREATE)
        {
            return Err(FileCacheError::Perm(
                "CopyCacheObject: Invalid destination, no write permission.".to_string(),
            ));
        }
        if !destination.exists() {
            std::fs::create_dir_all(&destination).map_err(|e| {
                FileCacheError::Directory(format!("CopyCacheObject: {}", e))
            })?;
        }
        if !destination.is_dir() {
            return Err(FileCacheError::Argument(
                "CopyCacheObject: Invalid destination, not a directory.".to_string(),
            ));
        }

        let dest_file = unique_destination(&destination, &file_name)?;
        Ok(copy::start_copy(source, dest_file))
    }

    pub fn get_cache_status(&self) -> CacheStatusResponse {
        let status = self.cache.get_cache_status();
        CacheStatusResponse {
            num_types: status.num_types,
            size: status.size,
            num_objs: status.num_objs,
            avail_space: status.avail_space,
        }
    }

    pub fn get_cache_type_status(
        &self,
        req: TypeNameRequest,
    ) -> FileCacheResult<CacheTypeStatusResponse> {
        match self.cache.get_type_status(&req.type_name) {
            Some((size, num_objs)) => Ok(CacheTypeStatusResponse { size, num_objs }),
            None => Err(FileCacheError::Exists(format!(
                "GetCacheTypeStatus: Type '{}' doesn't exist",
                req.type_name
            ))),
        }
    }

    pub fn get_cache_object_size(
        &self,
        req: PathNameRequest,
    ) -> FileCacheResult<ObjectSizeResponse> {
        let id = self.object_from_path(&req.path_name, "GetCacheObjectSize")?;
        match self.cache.object_size(id) {
            Some(size) => Ok(ObjectSizeResponse { size }),
            None => Err(FileCacheError::Exists(format!(
                "GetCacheObjectSize: Object '{}' doesn't exist",
                req.path_name
            ))),
        }
    }

    pub fn get_cache_object_filename(
        &self,
        req: PathNameRequest,
    ) -> FileCacheResult<ObjectFilenameResponse> {
        let id = self.object_from_path(&req.path_name, "GetCacheObjectFilename")?;
        match self.cache.object_filename(id) {
            Some(file_name) => Ok(ObjectFilenameResponse { file_name }),
            None => Err(FileCacheError::Exists(format!(
                "GetCacheObjectFilename: Object '{}' doesn't exist",
                req.path_name
            ))),
        }
    }

    pub fn get_cache_types(&self) -> CacheTypesResponse {
        CacheTypesResponse {
            types: self.cache.get_types(),
        }
    }

    pub fn get_version(&self) -> VersionResponse {
        VersionResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Runs the short-interval maintenance pass.
    pub fn run_worker_pass(&mut self) {
        let Self {
            cache,
            subscriptions,
            ..
        } = self;
        cache.run_worker_pass(subscriptions);
    }

    /// Runs the long-interval directory-type cleanup pass.
    pub fn run_cleaner_pass(&mut self, stale_secs: u64) {
        self.cache.cleanup_dir_types(stale_secs);
    }
}
