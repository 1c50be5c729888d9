//! Net element errors

use star_core::DataError;
use thiserror::Error;

/// Errors raised while reading replicated state
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NetError {
    /// Underlying stream was truncated or malformed
    #[error("stream error: {0}")]
    Data(#[from] DataError),

    /// Enum discriminant out of range
    #[error("unknown enum value {value} for {type_name}")]
    UnknownEnumValue { type_name: &'static str, value: u64 },

    /// Peers speak incompatible protocol versions
    #[error("incompatible net rules: local {local}, remote {remote}")]
    CompatibilityMismatch { local: u32, remote: u32 },

    /// Payload decoded but describes impossible state
    #[error("malformed net state: {0}")]
    Malformed(String),
}

/// Result type for net element operations
pub type NetResult<T> = Result<T, NetError>;
