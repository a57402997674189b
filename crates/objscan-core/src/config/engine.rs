use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::process::DEFAULT_CHUNK_SIZE;
use crate::process::layout::ObjectLayout;

use super::{limits, retry, scan, timing};

/// Type name of the default root object.
pub const DEFAULT_ROOT_TYPE: &str = "UIRoot";

/// Top-level configuration, one section per engine component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scan: ScanConfig,
    pub graph: GraphConfig,
    pub worker: WorkerConfig,
    pub cache: CacheConfig,
    pub layout: ObjectLayout,
}

/// Bounds for the region scans of the locate pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Bytes read per call while scanning a region; multiple of 8.
    pub chunk_size: usize,
    /// Regions smaller than this are skipped.
    pub min_region_size: u64,
    /// Stop the type scan after this many bytes once something matched.
    /// `None` scans every region.
    pub early_out_bytes: Option<u64>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            min_region_size: scan::MIN_REGION_SIZE,
            early_out_bytes: Some(scan::EARLY_OUT_BYTES),
        }
    }
}

/// What the graph reader keeps from each object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Attribute names followed from a node to its ordered children sequence.
    pub children_path: Vec<String>,
    /// Attributes kept even when their value is a container or a reference.
    pub structural_fields: Vec<String>,
    pub max_depth: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            children_path: vec!["children".to_string(), "_childrenObjects".to_string()],
            structural_fields: [
                "_displayX",
                "_displayY",
                "_displayWidth",
                "_displayHeight",
                "_color",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_depth: limits::MAX_DEPTH,
        }
    }
}

/// Background worker cadence and budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Declared type name of the root object.
    pub root_type: String,
    pub poll_interval_ms: u64,
    pub read_budget_ms: u64,
    pub locate_budget_ms: u64,
    pub max_consecutive_failures: u32,
    pub backoff_delays_ms: Vec<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            root_type: DEFAULT_ROOT_TYPE.to_string(),
            poll_interval_ms: timing::POLL_INTERVAL_MS,
            read_budget_ms: timing::READ_BUDGET_MS,
            locate_budget_ms: timing::LOCATE_BUDGET_MS,
            max_consecutive_failures: retry::MAX_CONSECUTIVE_FAILURES,
            backoff_delays_ms: retry::BACKOFF_DELAYS_MS.to_vec(),
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn read_budget(&self) -> Duration {
        Duration::from_millis(self.read_budget_ms)
    }

    pub fn locate_budget(&self) -> Duration {
        Duration::from_millis(self.locate_budget_ms)
    }
}

/// Root address cache location and staleness.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Cache file; defaults to the platform cache directory.
    pub path: Option<PathBuf>,
    pub ttl_hours: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            ttl_hours: timing::CACHE_TTL_HOURS,
        }
    }
}

impl CacheConfig {
    /// Resolve the cache file path, falling back to `<cache dir>/objscan/root_cache.json`.
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("objscan")
                .join("root_cache.json")
        })
    }
}

impl EngineConfig {
    /// Load a TOML config file. Missing sections and keys keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make scans or the worker loop degenerate.
    pub fn validate(&self) -> Result<()> {
        if self.scan.chunk_size == 0 || self.scan.chunk_size % 8 != 0 {
            return Err(Error::Config(format!(
                "scan.chunk_size must be a non-zero multiple of 8, got {}",
                self.scan.chunk_size
            )));
        }
        if self.worker.read_budget_ms == 0 || self.worker.locate_budget_ms == 0 {
            return Err(Error::Config("worker budgets must be non-zero".to_string()));
        }
        if self.worker.max_consecutive_failures == 0 {
            return Err(Error::Config(
                "worker.max_consecutive_failures must be at least 1".to_string(),
            ));
        }
        if self.worker.root_type.trim().is_empty() {
            return Err(Error::Config("worker.root_type must not be empty".to_string()));
        }
        if self.graph.max_depth > limits::MAX_DEPTH {
            return Err(Error::Config(format!(
                "graph.max_depth may not exceed {}",
                limits::MAX_DEPTH
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scan.chunk_size, 4 * 1024 * 1024);
        assert_eq!(config.worker.root_type, "UIRoot");
        assert_eq!(
            config.graph.children_path,
            vec!["children".to_string(), "_childrenObjects".to_string()]
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let content = r#"
[scan]
chunk_size = 65536

[worker]
root_type = "DesktopRoot"
poll_interval_ms = 250
"#;
        let config: EngineConfig = toml::from_str(content).unwrap();
        assert_eq!(config.scan.chunk_size, 65536);
        assert_eq!(config.scan.min_region_size, scan::MIN_REGION_SIZE);
        assert_eq!(config.worker.root_type, "DesktopRoot");
        assert_eq!(config.worker.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.worker.read_budget_ms, timing::READ_BUDGET_MS);
        assert_eq!(config.layout, ObjectLayout::default());
    }

    #[test]
    fn test_unaligned_chunk_size_rejected() {
        let mut config = EngineConfig::default();
        config.scan.chunk_size = 1000 + 3;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_budget_rejected() {
        let mut config = EngineConfig::default();
        config.worker.read_budget_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("objscan.toml");
        fs::write(&path, "[cache]\nenabled = false\nttl_hours = 1\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.ttl_hours, 1);
    }

    #[test]
    fn test_cache_path_override() {
        let config = CacheConfig {
            path: Some(PathBuf::from("/tmp/roots.json")),
            ..Default::default()
        };
        assert_eq!(config.resolved_path(), PathBuf::from("/tmp/roots.json"));
    }
}
