//! Asset registry configuration

use regex::RegexSet;
use serde::{Deserialize, Serialize};

use crate::error::{AssetError, AssetResult};

/// Settings for an [`Assets`](crate::Assets) registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AssetsSettings {
    /// Number of background loader threads
    pub worker_pool_size: usize,
    /// Seconds an unreferenced asset stays cached
    pub asset_time_to_live: f64,
    /// Compressed audio shorter than this many seconds is decoded into
    /// memory after loading
    pub audio_decompress_limit: f64,
    /// Substituted for images that do not exist
    pub missing_image: Option<String>,
    /// Substituted for audio that does not exist
    pub missing_audio: Option<String>,
    /// Regexes of paths left out of the digest
    pub digest_ignore: Vec<String>,
    /// Regexes of source files skipped entirely
    pub path_ignore: Vec<String>,
}

impl Default for AssetsSettings {
    fn default() -> Self {
        Self {
            worker_pool_size: 4,
            asset_time_to_live: 30.0,
            audio_decompress_limit: 4.0,
            missing_image: None,
            missing_audio: None,
            digest_ignore: Vec::new(),
            path_ignore: Vec::new(),
        }
    }
}

/// A compiled list of path regexes
#[derive(Debug, Clone)]
pub struct IgnoreList {
    set: RegexSet,
}

impl IgnoreList {
    pub fn new(patterns: &[String]) -> AssetResult<Self> {
        let set = RegexSet::new(patterns).map_err(|e| AssetError::Malformed {
            path: "<settings>".to_string(),
            reason: format!("bad ignore pattern: {}", e),
        })?;
        Ok(Self { set })
    }

    #[inline]
    pub fn matches(&self, path: &str) -> bool {
        self.set.is_match(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_camel_case() {
        let settings: AssetsSettings = serde_json::from_str(
            r#"{"workerPoolSize": 2, "missingImage": "/missing.png", "digestIgnore": ["\\.txt$"]}"#,
        )
        .unwrap();
        assert_eq!(settings.worker_pool_size, 2);
        assert_eq!(settings.missing_image.as_deref(), Some("/missing.png"));
        assert_eq!(settings.asset_time_to_live, 30.0);

        let ignore = IgnoreList::new(&settings.digest_ignore).unwrap();
        assert!(ignore.matches("/notes.txt"));
        assert!(!ignore.matches("/a.json"));
        assert!(IgnoreList::new(&["(".to_string()]).is_err());
    }
}
