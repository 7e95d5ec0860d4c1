use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub cache_root: PathBuf,
    pub download_dir: PathBuf,
    pub disk_budget_bytes: u64,
    pub worker_interval_secs: u64,
    pub cleaner_interval_secs: u64,
    pub dir_type_stale_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from("/var/lib/filecache/cache"),
            download_dir: PathBuf::from("/var/lib/filecache/downloads"),
            disk_budget_bytes: 256 * 1024 * 1024,
            worker_interval_secs: 15,
            cleaner_interval_secs: 120,
            dir_type_stale_secs: 120,
        }
    }
}

impl ServiceConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: ServiceConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: ServiceConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    pub fn maintenance(&self) -> filecache_core::MaintenanceConfig {
        filecache_core::MaintenanceConfig {
            worker_interval_secs: self.worker_interval_secs,
            cleaner_interval_secs: self.cleaner_interval_secs,
            dir_type_stale_secs: self.dir_type_stale_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_values() {
        let config = ServiceConfig::default();
        assert_eq!(config.cache_root, PathBuf::from("/var/lib/filecache/cache"));
        assert_eq!(
            config.download_dir,
            PathBuf::from("/var/lib/filecache/downloads")
        );
        assert_eq!(config.disk_budget_bytes, 256 * 1024 * 1024);
        assert_eq!(config.worker_interval_secs, 15);
        assert_eq!(config.cleaner_interval_secs, 120);
    }

    #[test]
    fn test_serialization_round_trip() {
        let config = ServiceConfig {
            cache_root: PathBuf::from("/custom/cache"),
            download_dir: PathBuf::from("/custom/downloads"),
            disk_budget_bytes: 1024,
            worker_interval_secs: 5,
            cleaner_interval_secs: 60,
            dir_type_stale_secs: 30,
        };

        let json = serde_json::to_string(&config).unwrap();
        let decoded: ServiceConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.cache_root, decoded.cache_root);
        assert_eq!(config.download_dir, decoded.download_dir);
        assert_eq!(config.disk_budget_bytes, decoded.disk_budget_bytes);
        assert_eq!(config.worker_interval_secs, decoded.worker_interval_secs);
    }

    #[test]
    fn test_from_file_toml() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
cache_root = "/test/cache"
download_dir = "/test/downloads"
disk_budget_bytes = 4096
worker_interval_secs = 10
cleaner_interval_secs = 90
dir_type_stale_secs = 45
"#
        )
        .unwrap();

        let config = ServiceConfig::from_file(file.path()).unwrap();
        assert_eq!(config.cache_root, PathBuf::from("/test/cache"));
        assert_eq!(config.disk_budget_bytes, 4096);
        assert_eq!(config.cleaner_interval_secs, 90);
    }

    #[test]
    fn test_from_file_unknown_extension() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(file, "cache_root: /nope").unwrap();
        assert!(ServiceConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_maintenance_conversion() {
        let config = ServiceConfig {
            worker_interval_secs: 7,
            ..Default::default()
        };
        assert_eq!(config.maintenance().worker_interval_secs, 7);
    }
}
