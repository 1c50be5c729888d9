//! Error types for movement configuration

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PhysicsError {
    /// Parameters JSON did not match the expected shape
    #[error("Invalid movement parameters: {0}")]
    InvalidParameters(#[from] serde_json::Error),

    /// Collision polygon has too few vertices
    #[error("Degenerate collision poly with {0} vertices")]
    DegeneratePoly(usize),

    #[error("Unknown collision kind: {0}")]
    UnknownCollisionKind(String),
}

pub type Result<T> = std::result::Result<T, PhysicsError>;
