//! The fast-path texture cache.
//!
//! Textures created out of external image-buffer planes are expensive to
//! re-wrap every frame; the cache remembers the texture name created for a
//! given plane so the next frame reuses it. Entries stay valid until
//! [`Device::flush_texture_cache`](super::Device::flush_texture_cache) runs,
//! which the consumer must do once it is finished with cache-derived
//! textures for the frame — afterwards stale names would be reused.

use std::collections::HashMap;

use crate::backends::ResourceName;

#[derive(Debug, Default)]
pub struct TextureCache {
    entries: HashMap<(usize, usize), ResourceName>,
}

impl TextureCache {
    pub(crate) fn new() -> Self {
        Default::default()
    }

    /// Looks up the texture name cached for `plane` of the image buffer at
    /// `base`.
    pub fn lookup(&self, base: usize, plane: usize) -> Option<ResourceName> {
        self.entries.get(&(base, plane)).cloned()
    }

    pub fn insert(&mut self, base: usize, plane: usize, name: ResourceName) {
        self.entries.insert((base, plane), name);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Empties the cache, handing back the names it owned so the device can
    /// delete them on the owning thread.
    pub(crate) fn drain(&mut self) -> Vec<ResourceName> {
        self.entries.drain().map(|(_, v)| v).collect()
    }
}
