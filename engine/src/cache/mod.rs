//! Layer caches: reuse images built from the same layer on the same parent.
//!
//! - `MemoryLayerCache`: per-process cache backed by a concurrent map
//! - `DiskLayerCache`: persistent cache with one metadata file per layer

pub mod disk;
pub mod memory;

pub use disk::{DiskLayerCache, LayerCacheEntry};
pub use memory::MemoryLayerCache;

use kiln_core::error::Result;

use crate::layer::ImageLayer;

/// Lookup of previously committed layers.
///
/// Entries are keyed by [`ImageLayer::fingerprint`], so a layer is reused
/// only when its parent image, every command's content and the resolved
/// build state match.
pub trait LayerCache: Send + Sync {
    /// Image id previously committed for `layer` on top of `parent`.
    fn get_layer(&self, parent: Option<&str>, layer: &ImageLayer) -> Result<Option<String>>;

    /// Record `image_id` as the result of `layer` on top of `parent_id`.
    fn add(&self, image_id: &str, parent_id: Option<&str>, layer: &ImageLayer) -> Result<()>;
}
