//! Server errors

use star_asset::AssetError;
use star_world::{ConnectionId, WorldError};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config {path}: {reason}")]
    Config { path: String, reason: String },

    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),

    #[error("World error: {0}")]
    World(#[from] WorldError),

    #[error("{name} is banned: {reason}")]
    Banned { name: String, reason: String },

    #[error("A player named '{0}' is already connected")]
    NameTaken(String),

    #[error("Asset digest mismatch: server has {server}, client has {client}")]
    DigestMismatch { server: String, client: String },

    #[error("No free connection ids")]
    ServerFull,

    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionId),
}

pub type ServerResult<T> = Result<T, ServerError>;
