//! Error types for the world

use star_asset::AssetError;
use star_core::DataError;
use star_math::Vec2I;
use star_net::NetError;
use star_physics::PhysicsError;
use star_script::ScriptError;
use thiserror::Error;

use crate::entity::EntityId;

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("No entity with id {0}")]
    EntityNotFound(EntityId),

    #[error("No entity with unique id '{0}'")]
    UniqueIdNotFound(String),

    #[error("Unique id '{0}' is already in use")]
    DuplicateUniqueId(String),

    #[error("Cannot place {name} at {position:?}: {reason}")]
    InvalidPlacement {
        name: String,
        position: Vec2I,
        reason: String,
    },

    #[error("Tile {0:?} is protected")]
    Protected(Vec2I),

    #[error("Entity {0} is not simulated here")]
    NotMaster(EntityId),

    #[error("Only the server may perform {0}")]
    ServerOnly(&'static str),

    #[error("Invalid spawn: {0}")]
    InvalidSpawn(String),

    #[error("Unknown {kind} '{name}'")]
    UnknownConfig { kind: &'static str, name: String },

    #[error("Invalid {kind} config '{name}': {reason}")]
    InvalidConfig {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("Entity id space exhausted")]
    IdSpaceExhausted,

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Unknown peer connection {0}")]
    UnknownPeer(u16),

    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),

    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    #[error("Net error: {0}")]
    Net(#[from] NetError),

    #[error("Stream error: {0}")]
    Data(#[from] DataError),

    #[error("Physics config error: {0}")]
    Physics(#[from] PhysicsError),

    #[error("AI config error: {0}")]
    Ai(#[from] star_ai::AiError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WorldError>;
