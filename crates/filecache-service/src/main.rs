//! File cache service daemon.
//!
//! Boot order: load configuration, create the default copy destination,
//! rebuild cache state from the directory tree, purge stale entries, then
//! run the maintenance loop until shutdown.

use std::path::PathBuf;
use std::time::Duration;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use filecache_core::{CacheSet, MaintenanceScheduler};
use filecache_service::{Dispatcher, PrefixAllowlist, ServiceConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ServiceConfig::from_file(&PathBuf::from(path))?,
        None => ServiceConfig::default(),
    };
    tracing::info!(cache_root = %config.cache_root.display(), "file cache service starting");

    std::fs::create_dir_all(&config.download_dir)?;

    let mut cache = CacheSet::new(&config.cache_root, config.disk_budget_bytes)?;
    cache.walk_dir_tree()?;
    cache.cleanup_at_startup();

    let policy = PrefixAllowlist::new(vec![config.download_dir.clone()]);
    let mut dispatcher = Dispatcher::new(cache, Box::new(policy), config.download_dir.clone());

    let maintenance = config.maintenance();
    let stale_secs = maintenance.dir_type_stale_secs;
    let mut scheduler =
        MaintenanceScheduler::new(maintenance, filecache_core::types::now_secs());
    let mut tick = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let now = filecache_core::types::now_secs();
                let due = scheduler.due(now);
                if due.worker {
                    dispatcher.run_worker_pass();
                }
                if due.cleaner {
                    dispatcher.run_cleaner_pass(stale_secs);
                    scheduler.restart_cleaner(now);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    Ok(())
}
