//! Script errors

use thiserror::Error;

/// Errors raised by the script layer
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    /// Error raised by the interpreter, compile or runtime
    #[error("lua error: {0}")]
    Lua(String),

    /// A script asked for a function it does not define
    #[error("function '{0}' not found")]
    MissingFunction(String),

    /// A value could not cross the Lua boundary
    #[error("conversion error: {0}")]
    Conversion(String),

    /// Script source could not be loaded
    #[error("failed to load script '{path}': {reason}")]
    Load { path: String, reason: String },

    /// Component is not initialised or stopped after an error
    #[error("script component is not running")]
    NotRunning,
}

impl From<mlua::Error> for ScriptError {
    fn from(e: mlua::Error) -> Self {
        ScriptError::Lua(e.to_string())
    }
}

/// Result type for script operations
pub type ScriptResult<T> = Result<T, ScriptError>;
