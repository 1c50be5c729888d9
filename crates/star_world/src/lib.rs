//! # star_world - Replicated Tile Worlds
//!
//! A [`World`] holds a tile grid, the entities living on it and the
//! replication state for every connected peer. Each entity is mastered by
//! exactly one peer; the master runs its scripts and physics and streams
//! net state deltas to the peers that relay it.
//!
//! ## Features
//!
//! - **Tiles**: foreground and background materials, liquids that flow,
//!   dungeon ids with tile protection, a sector collision cache
//! - **Entities**: objects, vehicles, monsters, NPCs, projectiles,
//!   stagehands, players and item drops built by the [`EntityFactory`]
//!   from asset configs
//! - **Scripts**: per-entity Lua contexts with the `world`, `entity`,
//!   `config`, `message` and kind-specific tables
//! - **Interaction**: wires between objects, damage between teams,
//!   entity messages answered through [`RpcPromise`]s
//! - **Replication**: entity create, update and destroy packets per peer,
//!   id spaces per connection
//!
//! ## Example
//!
//! ```ignore
//! use star_world::prelude::*;
//!
//! let resources = WorldResources::load(assets)?;
//! let mut world = World::new(WorldSettings::default(), resources, WorldRole::Server)?;
//! let id = world.spawn_entity(EntityType::Monster, "poptop", Vec2F::new(10.0, 20.0), &Json::Null)?;
//! world.update();
//! ```

pub mod callbacks;
pub mod collision;
pub mod damage;
pub mod entities;
pub mod entity;
pub mod error;
pub mod factory;
pub mod interaction;
pub mod liquid;
pub mod material;
pub mod packets;
pub mod physics;
pub mod resources;
pub mod rpc;
pub mod settings;
pub mod status;
pub mod tile;
pub mod wire;
pub mod world;

pub mod prelude {
    //! Common imports for world users
    pub use crate::damage::{DamageSource, DamageSourceConfig, EntityDamageTeam, TeamType};
    pub use crate::entities::{ItemDrop, Monster, Npc, Object, Player, Projectile, Stagehand, Vehicle};
    pub use crate::entity::{
        ClientEntityMode, ConnectionId, Entity, EntityId, EntityMode, EntityType, LoungeControl, SERVER_CONNECTION_ID,
    };
    pub use crate::error::{Result, WorldError};
    pub use crate::factory::EntityFactory;
    pub use crate::interaction::{InteractAction, InteractActionType, InteractRequest};
    pub use crate::packets::{MessageTarget, WorldPacket};
    pub use crate::resources::WorldResources;
    pub use crate::rpc::RpcPromise;
    pub use crate::settings::WorldSettings;
    pub use crate::tile::{TileLayer, TileModification};
    pub use crate::wire::WireConnection;
    pub use crate::world::{World, WorldRole};
    pub use star_core::Json;
    pub use star_math::{RectF, RectI, Vec2F, Vec2I};
    pub use star_physics::Direction;
}

pub use prelude::*;
