use std::fs::{self, File};
use std::path::{Path, PathBuf};

use star_core::{Json, JsonObject};

use super::{AssetSource, ByteStream};
use crate::error::{AssetError, AssetResult};
use crate::path::AssetPath;

const METADATA_FILES: [&str; 2] = ["_metadata", ".metadata"];

/// Files under a directory on disk
pub struct DirectorySource {
    name: String,
    root: PathBuf,
    metadata: JsonObject,
    paths: Vec<String>,
}

impl DirectorySource {
    pub fn new(root: impl AsRef<Path>) -> AssetResult<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(AssetError::NotFound(root.display().to_string()));
        }

        let mut metadata = JsonObject::new();
        for file in METADATA_FILES {
            let candidate = root.join(file);
            if candidate.is_file() {
                let text = fs::read_to_string(&candidate)?;
                match serde_json::from_str::<Json>(&text)? {
                    Json::Object(obj) => metadata = obj,
                    _ => {
                        return Err(AssetError::Malformed {
                            path: candidate.display().to_string(),
                            reason: "metadata must be an object".to_string(),
                        })
                    }
                }
                break;
            }
        }

        let mut paths = Vec::new();
        scan(&root, "", &mut paths)?;
        paths.retain(|p| !METADATA_FILES.iter().any(|m| p.strip_prefix('/') == Some(*m)));
        paths.sort();

        Ok(Self {
            name: root.display().to_string(),
            root,
            metadata,
            paths,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, path: &str) -> AssetResult<PathBuf> {
        AssetPath::validate(path)?;
        Ok(self.root.join(path.trim_start_matches('/')))
    }
}

fn scan(dir: &Path, prefix: &str, out: &mut Vec<String>) -> AssetResult<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            log::warn!("Skipping non UTF-8 file name under {}", dir.display());
            continue;
        };
        if name.contains('\\') {
            continue;
        }
        let virtual_path = format!("{}/{}", prefix, name);
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            scan(&entry.path(), &virtual_path, out)?;
        } else if file_type.is_file() {
            out.push(virtual_path);
        }
    }
    Ok(())
}

impl AssetSource for DirectorySource {
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
        let file = File::open(self.file_path(path)?)
            .map_err(|e| AssetError::Io(format!("{}: {}", path, e)))?;
        Ok(Box::new(file))
    }

    fn read(&self, path: &str) -> AssetResult<Vec<u8>> {
        fs::read(self.file_path(path)?).map_err(|e| AssetError::Io(format!("{}: {}", path, e)))
    }

    fn size(&self, path: &str) -> AssetResult<u64> {
        Ok(fs::metadata(self.file_path(path)?)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/a.json"), b"{}").unwrap();
        fs::write(dir.path().join("b.txt"), b"hello").unwrap();
        fs::write(dir.path().join("_metadata"), br#"{"name": "base"}"#).unwrap();

        let source = DirectorySource::new(dir.path()).unwrap();
        assert_eq!(source.asset_paths(), vec!["/b.txt", "/sub/a.json"]);
        assert_eq!(source.metadata().get("name"), Some(&Json::from("base")));
        assert_eq!(source.read("/b.txt").unwrap(), b"hello");
        assert_eq!(source.size("/b.txt").unwrap(), 5);
        assert!(source.open("/../escape").is_err());
    }
}
