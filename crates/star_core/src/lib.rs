//! # star_core - Star Engine Core
//!
//! Small shared primitives used by every other crate in the workspace:
//! - Big-endian binary streams with variable-length integers
//! - JSON path queries and merging
//! - RGBA colours with hex parsing
//!
//! Nothing in here knows about assets, worlds or the network; those crates
//! build on these types.

pub mod color;
pub mod data_stream;
pub mod error;
pub mod json;

pub use color::Color;
pub use data_stream::{DataReader, DataWriter};
pub use error::{DataError, DataResult};
pub use json::{Json, JsonObject};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::color::Color;
    pub use crate::data_stream::{DataReader, DataWriter};
    pub use crate::error::{DataError, DataResult};
    pub use crate::json::{json_merge, json_query, Json, JsonObject};
}
