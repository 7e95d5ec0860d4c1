//! End-to-end service flows through the dispatcher: boot, insert, copy out,
//! restart, and maintenance passes.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use filecache_core::CacheSet;
use filecache_service::api::{
    CopyCacheObjectRequest, DefineTypeRequest, InsertCacheObjectRequest, PathNameRequest,
};
use filecache_service::{AllowAll, Dispatcher};

const BUDGET: u64 = 1 << 20;

/// Boots a dispatcher the way the daemon does: type definitions arrive from
/// the configuration step, then the walk reconciles with on-disk truth.
fn boot(root: &Path, download_dir: PathBuf, types: &[&str]) -> Dispatcher {
    let mut cache = CacheSet::new(root, BUDGET).unwrap();
    cache.walk_dir_tree().unwrap();
    cache.cleanup_at_startup();
    let mut dispatcher = Dispatcher::new(cache, Box::new(AllowAll), download_dir);
    for name in types {
        define(&mut dispatcher, name);
    }
    dispatcher
}

/// Declares a type the way the configurator does at each boot: a type the
/// walk already recovered answers `Exists`, which the configurator ignores.
fn define(dispatcher: &mut Dispatcher, name: &str) {
    match dispatcher.define_type(DefineTypeRequest {
        type_name: name.to_string(),
        lo_watermark: 4096,
        hi_watermark: 65536,
        size: Some(1024),
        cost: None,
        lifetime: None,
        dir_type: None,
    }) {
        Ok(()) => {}
        Err(filecache_core::FileCacheError::Exists(_)) => {}
        Err(e) => panic!("define failed: {}", e),
    }
}

#[test]
fn test_status_survives_restart() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("cache");
    let downloads = dir.path().join("downloads");

    let before = {
        let mut dispatcher = boot(&root, downloads.clone(), &["t"]);
        for (name, content) in [("a.bin", &b"aaaa"[..]), ("b.bin", &b"bb"[..])] {
            let (response, _) = dispatcher
                .insert_cache_object(InsertCacheObjectRequest {
                    type_name: "t".to_string(),
                    file_name: name.to_string(),
                    size: Some(content.len() as u64),
                    cost: None,
                    lifetime: None,
                    subscribe: false,
                })
                .unwrap();
            std::fs::write(&response.path_name, content).unwrap();
        }
        dispatcher.get_cache_status()
    };

    let dispatcher = boot(&root, downloads, &["t"]);
    let after = dispatcher.get_cache_status();
    assert_eq!(after.num_types, before.num_types);
    assert_eq!(after.num_objs, before.num_objs);
    assert_eq!(after.size, before.size);
}

#[tokio::test]
async fn test_insert_write_copy_flow() {
    let dir = TempDir::new().unwrap();
    let mut dispatcher = boot(
        &dir.path().join("cache"),
        dir.path().join("downloads"),
        &["t"],
    );

    let (response, handle) = dispatcher
        .insert_cache_object(InsertCacheObjectRequest {
            type_name: "t".to_string(),
            file_name: "report.txt".to_string(),
            size: Some(64),
            cost: None,
            lifetime: None,
            subscribe: true,
        })
        .unwrap();
    std::fs::write(&response.path_name, b"finished report").unwrap();
    dispatcher.cancel_subscription(handle.unwrap());

    let reply = dispatcher
        .copy_cache_object(
            CopyCacheObjectRequest {
                path_name: response.path_name,
                destination: None,
                file_name: None,
            },
            "caller",
        )
        .unwrap();
    let copied = reply.await.unwrap().unwrap();
    assert_eq!(copied, dir.path().join("downloads").join("report.txt"));
    assert_eq!(std::fs::read(copied).unwrap(), b"finished report");
}

#[test]
fn test_worker_pass_keeps_subscribed_object() {
    let dir = TempDir::new().unwrap();
    let mut dispatcher = boot(
        &dir.path().join("cache"),
        dir.path().join("downloads"),
        &["t"],
    );

    let (response, handle) = dispatcher
        .insert_cache_object(InsertCacheObjectRequest {
            type_name: "t".to_string(),
            file_name: "open.bin".to_string(),
            size: Some(1024),
            cost: None,
            lifetime: None,
            subscribe: true,
        })
        .unwrap();

    // The backing file is mid-write and smaller than its reservation; the
    // worker pass must not drop it.
    std::fs::write(&response.path_name, b"so far").unwrap();
    dispatcher.run_worker_pass();

    assert!(dispatcher
        .get_cache_object_size(PathNameRequest {
            path_name: response.path_name.clone(),
        })
        .is_ok());

    dispatcher.cancel_subscription(handle.unwrap());
}
