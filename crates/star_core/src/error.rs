//! Error types for binary streams

use thiserror::Error;

/// Errors raised while decoding a binary stream
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataError {
    /// Stream ended before the value was complete
    #[error("unexpected end of stream reading {0}")]
    UnexpectedEof(&'static str),

    /// A variable-length integer did not terminate within 10 bytes
    #[error("variable length integer too long")]
    VlqOverflow,

    /// String bytes were not valid UTF-8
    #[error("invalid utf-8 in string: {0}")]
    InvalidUtf8(String),

    /// Value decoded but is not valid for its type
    #[error("invalid data: {0}")]
    Invalid(String),
}

/// Result type for stream decoding
pub type DataResult<T> = Result<T, DataError>;
