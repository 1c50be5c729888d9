//! Asset errors

use thiserror::Error;

/// Errors raised while resolving, reading or building assets
#[derive(Debug, Clone, Error)]
pub enum AssetError {
    /// Path failed validation
    #[error("invalid asset path '{path}': {rule}")]
    InvalidPath { rule: &'static str, path: String },

    /// No source provides the path
    #[error("no such asset '{0}'")]
    NotFound(String),

    /// Asset bytes could not be interpreted
    #[error("malformed asset '{path}': {reason}")]
    Malformed { path: String, reason: String },

    /// A patch could not be applied
    #[error("could not apply patch '{patch}' to '{path}': {reason}")]
    PatchFailed {
        path: String,
        patch: String,
        reason: String,
    },

    /// Image decode or processing failure
    #[error("image error: {0}")]
    Image(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("json error: {0}")]
    Json(String),

    /// Load or patch script failure
    #[error("script error: {0}")]
    Script(String),

    /// Loading this asset failed before and has not been retried
    #[error("asset '{0}' failed to load previously")]
    FailedPreviously(String),

    /// Bad image operation in a directives string
    #[error("directives error: {0}")]
    Directives(String),
}

impl From<std::io::Error> for AssetError {
    fn from(e: std::io::Error) -> Self {
        AssetError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AssetError {
    fn from(e: serde_json::Error) -> Self {
        AssetError::Json(e.to_string())
    }
}

impl From<image::ImageError> for AssetError {
    fn from(e: image::ImageError) -> Self {
        AssetError::Image(e.to_string())
    }
}

impl From<star_script::ScriptError> for AssetError {
    fn from(e: star_script::ScriptError) -> Self {
        AssetError::Script(e.to_string())
    }
}

impl From<star_script::mlua::Error> for AssetError {
    fn from(e: star_script::mlua::Error) -> Self {
        AssetError::Script(e.to_string())
    }
}

impl From<star_core::DataError> for AssetError {
    fn from(e: star_core::DataError) -> Self {
        AssetError::Io(e.to_string())
    }
}

/// Result type for asset operations
pub type AssetResult<T> = Result<T, AssetError>;
