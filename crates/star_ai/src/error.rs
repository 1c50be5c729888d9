//! Error types for AI configuration

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("Invalid behavior tree: {0}")]
    InvalidBehavior(String),

    #[error("Unknown {kind} node '{name}'")]
    UnknownNode { kind: &'static str, name: String },

    #[error("Invalid AI config: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AiError>;
