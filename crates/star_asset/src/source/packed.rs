use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use parking_lot::Mutex;
use star_core::{DataReader, Json, JsonObject};

use super::{AssetSource, ByteStream};
use crate::error::{AssetError, AssetResult};

/// First bytes of every packed asset file
pub const PACK_MAGIC: &[u8; 8] = b"STARPAK1";

/// Magic, index offset (u64) and index count (u32)
pub(crate) const HEADER_SIZE: u64 = 8 + 8 + 4;

/// A single packed archive.
///
/// Layout, all big-endian: `magic`, `index offset: u64`, `index count: u32`,
/// then the file blobs, then at the index offset the metadata as a JSON
/// string followed by `(path, offset: u64, size: u64)` per file.
pub struct PackedSource {
    name: String,
    file: Mutex<File>,
    metadata: JsonObject,
    paths: Vec<String>,
    index: HashMap<String, (u64, u64)>,
}

impl PackedSource {
    pub fn new(path: impl AsRef<Path>) -> AssetResult<Self> {
        let name = path.as_ref().display().to_string();
        let malformed = |reason: &str| AssetError::Malformed {
            path: name.clone(),
            reason: reason.to_string(),
        };
        let mut file = File::open(path.as_ref())?;

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)
            .map_err(|_| malformed("truncated header"))?;
        let mut reader = DataReader::new(&header);
        if reader.read_raw(8)? != PACK_MAGIC {
            return Err(malformed("bad magic"));
        }
        let index_offset = reader.read_u64()?;
        let index_count = reader.read_u32()?;

        let mut index_bytes = Vec::new();
        file.seek(SeekFrom::Start(index_offset))?;
        file.read_to_end(&mut index_bytes)?;
        let mut reader = DataReader::new(&index_bytes);

        let metadata = match serde_json::from_str::<Json>(&reader.read_string()?)? {
            Json::Object(obj) => obj,
            Json::Null => JsonObject::new(),
            _ => return Err(malformed("metadata must be an object")),
        };

        let file_len = file.metadata()?.len();
        let mut paths = Vec::with_capacity(index_count as usize);
        let mut index = HashMap::with_capacity(index_count as usize);
        for _ in 0..index_count {
            let path = reader.read_string()?;
            let offset = reader.read_u64()?;
            let size = reader.read_u64()?;
            if !path.starts_with('/') || offset.saturating_add(size) > file_len {
                return Err(malformed("bad index entry"));
            }
            paths.push(path.clone());
            index.insert(path, (offset, size));
        }

        Ok(Self {
            name,
            file: Mutex::new(file),
            metadata,
            paths,
            index,
        })
    }
}

impl AssetSource for PackedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn metadata(&self) -> JsonObject {
        self.metadata.clone()
    }

    fn asset_paths(&self) -> Vec<String> {
        self.paths.clone()
    }

    fn open(&self, path: &str) -> AssetResult<Box<dyn ByteStream>> {
        Ok(Box::new(Cursor::new(self.read(path)?)))
    }

    fn read(&self, path: &str) -> AssetResult<Vec<u8>> {
        let &(offset, size) = self
            .index
            .get(path)
            .ok_or_else(|| AssetError::NotFound(format!("{} in {}", path, self.name)))?;
        let mut out = vec![0u8; size as usize];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut out)?;
        Ok(out)
    }

    fn size(&self, path: &str) -> AssetResult<u64> {
        self.index
            .get(path)
            .map(|&(_, size)| size)
            .ok_or_else(|| AssetError::NotFound(format!("{} in {}", path, self.name)))
    }
}
