//! Read-only byte stores that make up the virtual filesystem

mod directory;
mod memory;
mod packed;

pub use directory::DirectorySource;
pub use memory::{MemoryEntry, MemorySource};
pub use packed::{PackedSource, PACK_MAGIC};

pub(crate) fn packed_header_size() -> u64 {
    packed::HEADER_SIZE
}

use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use star_core::JsonObject;

use crate::error::AssetResult;
use crate::image::Image;

/// Seekable stream over one file of a source
pub trait ByteStream: Read + Seek + Send {}

impl<T: Read + Seek + Send> ByteStream for T {}

/// A read-only collection of files keyed by absolute path
pub trait AssetSource: Send + Sync {
    /// Name used in logs and as the source key, usually its filesystem path
    fn name(&self) -> &str;

    /// Contents of the source's metadata file, empty when absent
    fn metadata(&self) -> JsonObject;

    /// Every path this source provides, with original case
    fn asset_paths(&self) -> Vec<String>;

    fn open(&self, path: &str) -> AssetResult<Box<dyn ByteStream>>;

    fn read(&self, path: &str) -> AssetResult<Vec<u8>> {
        let mut stream = self.open(path)?;
        let mut out = Vec::new();
        stream.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Byte size of the file as opened
    fn size(&self, path: &str) -> AssetResult<u64> {
        let mut stream = self.open(path)?;
        Ok(stream.seek(SeekFrom::End(0))?)
    }

    /// A ready image stored by a load script, if this source holds one
    fn image(&self, _path: &str) -> Option<Arc<Image>> {
        None
    }
}
