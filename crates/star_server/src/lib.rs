//! # star_server - Dedicated World Server
//!
//! Hosts one server world over a layered asset registry. The `starserver`
//! binary wraps [`ServerHost`] in a fixed-rate tick loop with a stdin
//! admin console; `asset_packer` turns a directory source into a packed
//! archive.

pub mod config;
pub mod error;
pub mod host;

pub use config::{AssetsConfig, ServerConfig, WorldConfig};
pub use error::{ServerError, ServerResult};
pub use host::{ClientTable, ServerHost};
