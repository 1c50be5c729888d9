//! # star_asset - Asset Registry
//!
//! Every game definition, sprite, sound and script lives in an asset
//! source: a directory, a packed archive or a memory store filled by load
//! scripts. [`Assets`] layers the sources into one virtual filesystem and
//! serves typed assets from it through a time-to-live cache.
//!
//! ## Features
//!
//! - **Patching**: JSON merge and JSON patch files, Lua patches for JSON
//!   and images, patch lists
//! - **Paths**: `/path.ext:subPath?directive?directive` with sub-paths
//!   into JSON and sprite frames and image directives
//! - **Workers**: background loading with load and post-process priorities
//! - **Digest**: SHA-256 over paths and sizes, for client/server checks
//! - **Hot reload**: rebuild everything after sources change on disk
//!
//! ## Example
//!
//! ```ignore
//! use star_asset::{Assets, AssetsSettings};
//!
//! let assets = Assets::new(AssetsSettings::default(), [std::path::Path::new("assets")])?;
//! let config = assets.json("/player.config:movementParameters")?;
//! let icon = assets.image("/items/sword.png?hueshift=40")?;
//! ```

pub mod assets;
pub mod audio;
pub mod directives;
pub mod error;
pub mod frames;
pub mod image;
pub mod image_ops;
pub mod json_patch;
mod loader;
pub mod packer;
pub mod path;
pub mod registry;
pub mod scripts;
pub mod settings;
pub mod source;
pub mod watcher;

pub use assets::{AssetData, AssetId, AssetType, Font};
pub use audio::{Audio, AudioDecoder, AudioFormat, PcmData};
pub use directives::{Directives, DirectivesGroup};
pub use error::{AssetError, AssetResult};
pub use frames::FramesSpecification;
pub use image::Image;
pub use image_ops::ImageOperation;
pub use packer::pack_directory;
pub use path::AssetPath;
pub use registry::{Assets, SourceLocation};
pub use scripts::LuaImage;
pub use settings::AssetsSettings;
pub use source::{AssetSource, ByteStream, DirectorySource, MemorySource, PackedSource};
pub use watcher::{AssetChange, AssetChangeKind, AssetWatcher};
