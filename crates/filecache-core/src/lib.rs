#![warn(missing_docs)]

//! Persistent on-disk file cache engine: type registry, watermark-driven
//! eviction, subscription pinning, and on-disk reconciliation.
//!
//! Clients reserve space for named objects within named types, write content
//! through the filesystem paths the cache hands out, and keep entries alive
//! via subscriptions. Each type enforces its own usage ceiling; admission
//! evicts by pending-expire state, cost-and-age score, recency, and id. All
//! metadata lives in memory and is rebuilt from the directory tree at
//! startup.

pub mod cacheset;
pub mod error;
pub mod layout;
pub mod maintenance;
pub mod object;
pub mod pathcodec;
pub mod subscriptions;
pub mod typecache;
pub mod types;

pub use cacheset::{CacheParamsUpdate, CacheSet, CacheStatus};
pub use error::{FileCacheError, FileCacheResult};
pub use layout::DiskLayout;
pub use maintenance::{DueTasks, MaintenanceConfig, MaintenanceScheduler};
pub use object::CachedObject;
pub use subscriptions::{SubscriptionHandle, SubscriptionTable};
pub use typecache::{AdmissionDecision, ExpireOutcome, TypeCache};
pub use types::{CacheParams, ObjectId, MAX_COST, MAX_TYPE_NAME_LEN};
