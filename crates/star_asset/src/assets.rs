//! Typed asset values and cache keys

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use star_core::Json;

use crate::audio::Audio;
use crate::image::Image;
use crate::path::AssetPath;

/// Kind of value an asset path is loaded as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Json,
    Image,
    Audio,
    Font,
    Bytes,
}

impl AssetType {
    pub fn name(self) -> &'static str {
        match self {
            AssetType::Json => "json",
            AssetType::Image => "image",
            AssetType::Audio => "audio",
            AssetType::Font => "font",
            AssetType::Bytes => "bytes",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "json" => Some(AssetType::Json),
            "image" => Some(AssetType::Image),
            "audio" => Some(AssetType::Audio),
            "font" => Some(AssetType::Font),
            "bytes" => Some(AssetType::Bytes),
            _ => None,
        }
    }
}

/// Cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetId {
    pub kind: AssetType,
    pub path: AssetPath,
}

impl AssetId {
    pub fn new(kind: AssetType, path: AssetPath) -> Self {
        Self { kind, path }
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind.name(), self.path)
    }
}

/// Raw font file bytes; rasterising is up to the renderer
#[derive(Debug, Clone, PartialEq)]
pub struct Font {
    data: Vec<u8>,
}

impl Font {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// A loaded asset
#[derive(Clone)]
pub enum AssetData {
    Json(Arc<Json>),
    Image(Arc<Image>),
    Audio(Arc<Audio>),
    Font(Arc<Font>),
    Bytes(Arc<Vec<u8>>),
}

impl AssetData {
    pub fn kind(&self) -> AssetType {
        match self {
            AssetData::Json(_) => AssetType::Json,
            AssetData::Image(_) => AssetType::Image,
            AssetData::Audio(_) => AssetType::Audio,
            AssetData::Font(_) => AssetType::Font,
            AssetData::Bytes(_) => AssetType::Bytes,
        }
    }

    /// Held somewhere besides the cache, so eviction would not free it
    pub fn should_persist(&self) -> bool {
        let count = match self {
            AssetData::Json(a) => Arc::strong_count(a),
            AssetData::Image(a) => Arc::strong_count(a),
            AssetData::Audio(a) => Arc::strong_count(a),
            AssetData::Font(a) => Arc::strong_count(a),
            AssetData::Bytes(a) => Arc::strong_count(a),
        };
        count > 1
    }

    pub fn needs_post_processing(&self) -> bool {
        matches!(self, AssetData::Audio(a) if a.needs_post_processing())
    }

    pub fn into_json(self) -> Option<Arc<Json>> {
        match self {
            AssetData::Json(j) => Some(j),
            _ => None,
        }
    }

    pub fn into_image(self) -> Option<Arc<Image>> {
        match self {
            AssetData::Image(i) => Some(i),
            _ => None,
        }
    }

    pub fn into_audio(self) -> Option<Arc<Audio>> {
        match self {
            AssetData::Audio(a) => Some(a),
            _ => None,
        }
    }

    pub fn into_font(self) -> Option<Arc<Font>> {
        match self {
            AssetData::Font(f) => Some(f),
            _ => None,
        }
    }

    pub fn into_bytes(self) -> Option<Arc<Vec<u8>>> {
        match self {
            AssetData::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Debug for AssetData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetData::Json(j) => write!(f, "Json({})", j),
            AssetData::Image(i) => write!(f, "{:?}", i),
            AssetData::Audio(a) => write!(f, "Audio({:?})", a.format()),
            AssetData::Font(font) => write!(f, "Font({} bytes)", font.data().len()),
            AssetData::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
        }
    }
}
