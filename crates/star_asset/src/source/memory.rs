use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

use parking_lot::RwLock;
use star_core::JsonObject;

use super::{AssetSource, ByteStream};
use crate::error::{AssetError, AssetResult};
use crate::image::Image;

#[derive(Clone)]
pub enum MemoryEntry {
    Bytes(Arc<Vec<u8>>),
    Image(Arc<Image>),
}

/// Files produced at runtime, mostly by load scripts
pub struct MemorySource {
    name: String,
    metadata: JsonObject,
    entries: RwLock<BTreeMap<String, MemoryEntry>>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_metadata(name, JsonObject::new())
    }

    pub fn with_metadata(name: impl Into<String>, metadata: JsonObject) -> Self {
        Self {
            name: name.into(),
            metadata,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn add_bytes(&self, path: impl Into<String>, bytes: Vec<u8>) {
        self.entries.write().insert(path.into(), MemoryEntry::Bytes(Arc::new(bytes)));
    }

    pub fn add_image(&self, path: impl Into<String>, image: Image) {
        self.entries.write().insert(path.into(), MemoryEntry::Image(Arc::new(image)));
    }

    pub fn remove(&self, path: &str) -> bool {
        self.entries.write().remove(path).is_some()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.read().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn entry(&self, path: &str) -> AssetResult<MemoryEntry> {
        self.entries
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| AssetError::NotFound(format!("{} in {}", path, self.name)))
    }
}

impl AssetSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn metadata(&self) -> JsonObject {
        self.metadata.clone()
    }

    fn asset_paths(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    fn open(&self, path: &str) -> AssetResult<Box<dyn ByteStream>> {
        Ok(Box::new(Cursor::new(self.read(path)?)))
    }

    /// Images are served as PNG
    fn read(&self, path: &str) -> AssetResult<Vec<u8>> {
        match self.entry(path)? {
            MemoryEntry::Bytes(bytes) => Ok(bytes.as_ref().clone()),
            MemoryEntry::Image(image) => image.encode_png(),
        }
    }

    /// Images report their raw pixel size so the digest does not depend on
    /// PNG encoder output
    fn size(&self, path: &str) -> AssetResult<u64> {
        Ok(match self.entry(path)? {
            MemoryEntry::Bytes(bytes) => bytes.len() as u64,
            MemoryEntry::Image(image) => image.byte_size() as u64,
        })
    }

    fn image(&self, path: &str) -> Option<Arc<Image>> {
        match self.entries.read().get(path) {
            Some(MemoryEntry::Image(image)) => Some(image.clone()),
            _ => None,
        }
    }
}
