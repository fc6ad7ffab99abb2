//! Persistent layer cache.
//!
//! Each committed layer is recorded as `<fingerprint>.meta.json` in the
//! cache directory, so rebuilds in later processes can reuse it.

use std::path::{Path, PathBuf};

use kiln_core::error::{KilnError, Result};
use serde::{Deserialize, Serialize};

use super::LayerCache;
use crate::layer::ImageLayer;

/// Metadata for a cached layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerCacheEntry {
    /// Layer fingerprint (cache key)
    pub key: String,
    /// Image committed for the layer
    pub image_id: String,
    /// Image the layer was built on, `None` for the base layer
    pub parent_id: Option<String>,
    /// Content of the layer's commands, for inspection
    pub commands: Vec<String>,
    /// When this layer was cached (Unix timestamp)
    pub cached_at: i64,
    /// Last time this layer was looked up (Unix timestamp)
    pub last_accessed: i64,
}

/// Layer cache stored as JSON files in a directory.
pub struct DiskLayerCache {
    /// Root directory for the cache (e.g., ~/.kiln/cache/layers)
    cache_dir: PathBuf,
}

impl DiskLayerCache {
    /// Create a cache at the given directory, creating it if needed.
    pub fn new(cache_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(cache_dir).map_err(|e| {
            KilnError::CacheError(format!(
                "Failed to create layer cache directory {}: {}",
                cache_dir.display(),
                e
            ))
        })?;

        Ok(Self {
            cache_dir: cache_dir.to_path_buf(),
        })
    }

    /// Default cache directory: `~/.kiln/cache/layers`.
    pub fn default_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(".kiln").join("cache").join("layers"))
            .ok_or_else(|| {
                KilnError::CacheError("Cannot determine home directory".to_string())
            })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Look up an entry by key, refreshing its access time.
    pub fn get(&self, key: &str) -> Result<Option<LayerCacheEntry>> {
        let meta_path = self.meta_path(key);
        if !meta_path.is_file() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&meta_path).map_err(|e| {
            KilnError::CacheError(format!(
                "Failed to read layer metadata {}: {}",
                meta_path.display(),
                e
            ))
        })?;

        let mut entry = match serde_json::from_str::<LayerCacheEntry>(&content) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(
                    path = %meta_path.display(),
                    error = %e,
                    "Ignoring corrupt layer cache entry"
                );
                return Ok(None);
            }
        };

        entry.last_accessed = chrono::Utc::now().timestamp();
        let _ = std::fs::write(&meta_path, serde_json::to_string_pretty(&entry)?);

        Ok(Some(entry))
    }

    /// Store an entry, replacing any existing one with the same key.
    pub fn put(&self, entry: &LayerCacheEntry) -> Result<()> {
        let meta_path = self.meta_path(&entry.key);
        std::fs::write(&meta_path, serde_json::to_string_pretty(entry)?).map_err(|e| {
            KilnError::CacheError(format!(
                "Failed to write layer metadata {}: {}",
                meta_path.display(),
                e
            ))
        })?;

        tracing::debug!(
            key = %entry.key,
            image_id = %entry.image_id,
            path = %meta_path.display(),
            "Cached layer"
        );

        Ok(())
    }

    /// Remove a cached entry by key.
    pub fn invalidate(&self, key: &str) -> Result<()> {
        let meta_path = self.meta_path(key);
        if meta_path.exists() {
            std::fs::remove_file(&meta_path).map_err(|e| {
                KilnError::CacheError(format!(
                    "Failed to remove layer metadata {}: {}",
                    meta_path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Keep at most `max_entries` entries.
    ///
    /// Evicts least-recently-accessed entries first.
    /// Returns the number of entries evicted.
    pub fn prune(&self, max_entries: usize) -> Result<usize> {
        let mut entries = self.list_entries()?;
        if entries.len() <= max_entries {
            return Ok(0);
        }

        // Oldest first
        entries.sort_by_key(|e| e.last_accessed);

        let excess = entries.len() - max_entries;
        for entry in entries.iter().take(excess) {
            self.invalidate(&entry.key)?;
            tracing::debug!(
                key = %entry.key,
                image_id = %entry.image_id,
                "Evicted cached layer"
            );
        }

        Ok(excess)
    }

    /// List all cached entries. Unreadable entries are skipped.
    pub fn list_entries(&self) -> Result<Vec<LayerCacheEntry>> {
        let mut entries = Vec::new();

        let read_dir = std::fs::read_dir(&self.cache_dir).map_err(|e| {
            KilnError::CacheError(format!(
                "Failed to read cache directory {}: {}",
                self.cache_dir.display(),
                e
            ))
        })?;

        for entry in read_dir {
            let entry = entry.map_err(|e| {
                KilnError::CacheError(format!("Failed to read directory entry: {}", e))
            })?;
            let path = entry.path();

            let is_meta = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".meta.json"));
            if !is_meta {
                continue;
            }

            if let Ok(content) = std::fs::read_to_string(&path) {
                if let Ok(meta) = serde_json::from_str::<LayerCacheEntry>(&content) {
                    entries.push(meta);
                }
            }
        }

        Ok(entries)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.meta.json", key))
    }
}

impl LayerCache for DiskLayerCache {
    fn get_layer(&self, parent: Option<&str>, layer: &ImageLayer) -> Result<Option<String>> {
        let key = layer.fingerprint(parent);
        Ok(self.get(&key)?.map(|entry| entry.image_id))
    }

    fn add(&self, image_id: &str, parent_id: Option<&str>, layer: &ImageLayer) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        self.put(&LayerCacheEntry {
            key: layer.fingerprint(parent_id),
            image_id: image_id.to_string(),
            parent_id: parent_id.map(str::to_string),
            commands: layer
                .commands
                .iter()
                .map(|c| c.content().to_string())
                .collect(),
            cached_at: now,
            last_accessed: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::command;
    use tempfile::TempDir;

    fn layer(value: &str) -> ImageLayer {
        let mut layer = ImageLayer::new(0);
        layer.add_command(command("RUN", value));
        layer
    }

    fn entry(key: &str, last_accessed: i64) -> LayerCacheEntry {
        LayerCacheEntry {
            key: key.to_string(),
            image_id: format!("sha256:{}", key),
            parent_id: None,
            commands: vec![],
            cached_at: last_accessed,
            last_accessed,
        }
    }

    #[test]
    fn test_disk_cache_new_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let cache_dir = tmp.path().join("layers");

        assert!(!cache_dir.exists());
        let _cache = DiskLayerCache::new(&cache_dir).unwrap();
        assert!(cache_dir.is_dir());
    }

    #[test]
    fn test_disk_cache_miss() {
        let tmp = TempDir::new().unwrap();
        let cache = DiskLayerCache::new(tmp.path()).unwrap();
        assert!(cache.get_layer(None, &layer("make")).unwrap().is_none());
    }

    #[test]
    fn test_disk_cache_add_and_get() {
        let tmp = TempDir::new().unwrap();
        let cache = DiskLayerCache::new(tmp.path()).unwrap();
        let l = layer("make");

        cache.add("sha256:img", Some("sha256:base"), &l).unwrap();

        assert_eq!(
            cache.get_layer(Some("sha256:base"), &l).unwrap(),
            Some("sha256:img".to_string())
        );
        assert!(cache.get_layer(None, &l).unwrap().is_none());

        let entries = cache.list_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].parent_id.as_deref(), Some("sha256:base"));
        assert_eq!(entries[0].commands, vec!["RUN make".to_string()]);
    }

    #[test]
    fn test_disk_cache_persists_across_instances() {
        let tmp = TempDir::new().unwrap();
        let l = layer("make");
        DiskLayerCache::new(tmp.path())
            .unwrap()
            .add("sha256:img", None, &l)
            .unwrap();

        let reopened = DiskLayerCache::new(tmp.path()).unwrap();
        assert_eq!(
            reopened.get_layer(None, &l).unwrap(),
            Some("sha256:img".to_string())
        );
    }

    #[test]
    fn test_disk_cache_get_updates_last_accessed() {
        let tmp = TempDir::new().unwrap();
        let cache = DiskLayerCache::new(tmp.path()).unwrap();
        cache.put(&entry("k1", 1000)).unwrap();

        let fetched = cache.get("k1").unwrap().unwrap();
        assert!(fetched.last_accessed > 1000);
        assert_eq!(fetched.cached_at, 1000);
    }

    #[test]
    fn test_disk_cache_corrupt_entry_is_miss() {
        let tmp = TempDir::new().unwrap();
        let cache = DiskLayerCache::new(tmp.path()).unwrap();
        std::fs::write(tmp.path().join("bad.meta.json"), "{not json").unwrap();

        assert!(cache.get("bad").unwrap().is_none());
        assert!(cache.list_entries().unwrap().is_empty());
    }

    #[test]
    fn test_disk_cache_invalidate() {
        let tmp = TempDir::new().unwrap();
        let cache = DiskLayerCache::new(tmp.path()).unwrap();
        let l = layer("make");
        cache.add("sha256:img", None, &l).unwrap();

        cache.invalidate(&l.fingerprint(None)).unwrap();
        assert!(cache.get_layer(None, &l).unwrap().is_none());

        // Nonexistent keys are fine
        cache.invalidate("missing").unwrap();
    }

    #[test]
    fn test_disk_cache_prune_evicts_oldest() {
        let tmp = TempDir::new().unwrap();
        let cache = DiskLayerCache::new(tmp.path()).unwrap();
        cache.put(&entry("old", 100)).unwrap();
        cache.put(&entry("mid", 200)).unwrap();
        cache.put(&entry("new", 300)).unwrap();

        assert_eq!(cache.prune(5).unwrap(), 0);
        assert_eq!(cache.prune(1).unwrap(), 2);

        let remaining = cache.list_entries().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].key, "new");
    }

    #[test]
    fn test_disk_cache_list_ignores_other_files() {
        let tmp = TempDir::new().unwrap();
        let cache = DiskLayerCache::new(tmp.path()).unwrap();
        std::fs::write(tmp.path().join("notes.json"), "{}").unwrap();
        std::fs::write(tmp.path().join("README"), "x").unwrap();
        cache.put(&entry("k", 1)).unwrap();

        assert_eq!(cache.list_entries().unwrap().len(), 1);
    }

    #[test]
    fn test_default_dir() {
        if let Ok(dir) = DiskLayerCache::default_dir() {
            assert!(dir.ends_with(".kiln/cache/layers"));
        }
    }
}
