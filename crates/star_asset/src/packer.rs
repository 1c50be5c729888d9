//! Writer for packed asset archives

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use star_core::{DataWriter, Json};

use crate::error::AssetResult;
use crate::settings::IgnoreList;
use crate::source::{AssetSource, DirectorySource, PACK_MAGIC};

/// Pack every file under `dir` into `output`, skipping paths matching
/// `ignore`. Returns the number of files written.
pub fn pack_directory(dir: &Path, output: &Path, ignore: &[String]) -> AssetResult<usize> {
    let source = DirectorySource::new(dir)?;
    let ignore = IgnoreList::new(ignore)?;
    let mut out = BufWriter::new(File::create(output)?);

    out.write_all(PACK_MAGIC)?;
    out.write_all(&[0u8; 12])?;
    let mut offset = crate::source::packed_header_size();

    let mut index = Vec::new();
    for path in source.asset_paths() {
        if ignore.matches(&path) {
            log::debug!("Not packing ignored file {}", path);
            continue;
        }
        let bytes = source.read(&path)?;
        out.write_all(&bytes)?;
        index.push((path, offset, bytes.len() as u64));
        offset += bytes.len() as u64;
    }

    let mut writer = DataWriter::new();
    writer.write_string(&Json::Object(source.metadata()).to_string());
    for (path, file_offset, size) in &index {
        writer.write_string(path);
        writer.write_u64(*file_offset);
        writer.write_u64(*size);
    }
    out.write_all(writer.as_bytes())?;

    let mut header = DataWriter::new();
    header.write_u64(offset);
    header.write_u32(index.len() as u32);
    out.seek(SeekFrom::Start(PACK_MAGIC.len() as u64))?;
    out.write_all(header.as_bytes())?;
    out.flush()?;

    log::info!("Packed {} files from {} into {}", index.len(), dir.display(), output.display());
    Ok(index.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::PackedSource;
    use std::fs;

    #[test]
    fn test_pack_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let assets = dir.path().join("assets");
        fs::create_dir_all(assets.join("items")).unwrap();
        fs::write(assets.join("items/a.json"), br#"{"a": 1}"#).unwrap();
        fs::write(assets.join("b.txt"), b"bee").unwrap();
        fs::write(assets.join("skip.tmp"), b"x").unwrap();
        fs::write(assets.join("_metadata"), br#"{"name": "packed"}"#).unwrap();

        let pak = dir.path().join("assets.pak");
        assert_eq!(pack_directory(&assets, &pak, &["\\.tmp$".to_string()]).unwrap(), 2);

        let packed = PackedSource::new(&pak).unwrap();
        assert_eq!(packed.asset_paths(), vec!["/b.txt", "/items/a.json"]);
        assert_eq!(packed.read("/items/a.json").unwrap(), br#"{"a": 1}"#);
        assert_eq!(packed.size("/b.txt").unwrap(), 3);
        assert_eq!(packed.metadata().get("name"), Some(&Json::from("packed")));
        assert!(packed.read("/skip.tmp").is_err());
    }
}
