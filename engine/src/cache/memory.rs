//! In-memory layer cache.

use dashmap::DashMap;
use kiln_core::error::Result;

use super::LayerCache;
use crate::layer::ImageLayer;

/// Layer cache that lives as long as the process.
#[derive(Debug, Default)]
pub struct MemoryLayerCache {
    entries: DashMap<String, String>,
}

impl MemoryLayerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl LayerCache for MemoryLayerCache {
    fn get_layer(&self, parent: Option<&str>, layer: &ImageLayer) -> Result<Option<String>> {
        let key = layer.fingerprint(parent);
        Ok(self.entries.get(&key).map(|entry| entry.value().clone()))
    }

    fn add(&self, image_id: &str, parent_id: Option<&str>, layer: &ImageLayer) -> Result<()> {
        let key = layer.fingerprint(parent_id);
        tracing::debug!(key = %key, image_id, layer = layer.number, "Cached layer in memory");
        self.entries.insert(key, image_id.to_string());
        Ok(())
    }
}
