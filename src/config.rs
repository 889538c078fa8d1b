use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cache: CacheSection,
    pub segments: SegmentSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Byte budget shared across all store namespaces
    pub max_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentSection {
    /// Target number of live segments per store
    pub per_store: i64,
    /// Floor on segment width, regardless of retention
    pub min_interval_ms: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache: CacheSection::default(),
            segments: SegmentSection::default(),
        }
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_bytes: 32 * 1024 * 1024,
        }
    }
}

impl Default for SegmentSection {
    fn default() -> Self {
        Self {
            per_store: 3,
            min_interval_ms: 1,
        }
    }
}

impl EngineConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: EngineConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }
}

impl SegmentSection {
    /// Segment width for a store with the given retention
    pub fn interval_for(&self, retention_ms: i64) -> i64 {
        (retention_ms / self.per_store.max(1)).max(self.min_interval_ms).max(1)
    }
}
