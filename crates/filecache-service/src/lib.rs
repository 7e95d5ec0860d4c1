//! File cache service layer: typed request surface, sandbox policy, the
//! asynchronous copier, and service configuration.

pub mod api;
pub mod config;
pub mod copy;
pub mod sandbox;

pub use api::{CopyReply, Dispatcher};
pub use config::ServiceConfig;
pub use copy::MAX_UNIQUE_FILE_INDEX;
pub use sandbox::{AccessRequest, AllowAll, PathPolicy, PrefixAllowlist};
