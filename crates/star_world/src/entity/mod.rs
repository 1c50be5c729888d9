//! The entity model
//!
//! Every world inhabitant implements [`Entity`]. Optional capabilities
//! (occupying tiles, wiring, exporting physics, being interactive, taking
//! damage, running scripts, carrying loungers) are separate traits reached
//! through the `as_*` accessors, so the world can ask any entity whether it
//! has a capability without knowing its concrete type.

pub mod id_space;

use std::any::Any;

use serde::{Deserialize, Serialize};
use star_core::Json;
use star_math::{PolyF, RectF, Vec2F, Vec2I};
use star_net::{NetCompatibilityRules, NetResult};
use star_physics::{MovingCollision, PhysicsForceRegion};

use crate::damage::{DamageNotification, DamageRequest, DamageSource, EntityDamageTeam, HitType};
use crate::error::Result;
use crate::interaction::{InteractAction, InteractRequest};
use crate::wire::WireConnection;
use crate::world::World;

pub use id_space::{
    connection_entity_space, connection_for_entity, ConnectionId, EntityIdMap, MAX_CLIENT_CONNECTION_ID,
    SERVER_CONNECTION_ID,
};

pub type EntityId = i32;

pub const NULL_ENTITY_ID: EntityId = 0;

/// Entity kinds, in default update order: physics producers update before
/// the actors that stand on them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Object,
    Vehicle,
    ItemDrop,
    Projectile,
    Stagehand,
    Monster,
    Npc,
    Player,
}
star_net::net_enum!(EntityType {
    Object,
    Vehicle,
    ItemDrop,
    Projectile,
    Stagehand,
    Monster,
    Npc,
    Player,
});

impl EntityType {
    pub const ALL: [EntityType; 8] = [
        EntityType::Object,
        EntityType::Vehicle,
        EntityType::ItemDrop,
        EntityType::Projectile,
        EntityType::Stagehand,
        EntityType::Monster,
        EntityType::Npc,
        EntityType::Player,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EntityType::Object => "object",
            EntityType::Vehicle => "vehicle",
            EntityType::ItemDrop => "itemdrop",
            EntityType::Projectile => "projectile",
            EntityType::Stagehand => "stagehand",
            EntityType::Monster => "monster",
            EntityType::Npc => "npc",
            EntityType::Player => "player",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        Self::ALL.into_iter().find(|t| t.name() == lower)
    }
}

/// Who simulates an entity. Fixed at `init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityMode {
    Master,
    Slave,
}

/// Whether a client may create and simulate an entity kind itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClientEntityMode {
    #[default]
    ClientSlaveOnly,
    ClientMasterAllowed,
    /// Only exists as master on its owning client, such as players
    ClientPresenceMaster,
}

/// Common state for the `entity_id`/`entity_mode` bookkeeping every
/// entity does
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityHandle {
    pub id: EntityId,
    pub mode: Option<EntityMode>,
}

impl EntityHandle {
    pub fn bind(&mut self, id: EntityId, mode: EntityMode) {
        self.id = id;
        self.mode = Some(mode);
    }

    pub fn unbind(&mut self) {
        self.mode = None;
    }

    #[inline]
    pub fn is_master(&self) -> bool {
        self.mode == Some(EntityMode::Master)
    }

    #[inline]
    pub fn in_world(&self) -> bool {
        self.mode.is_some()
    }
}

/// Lifecycle: constructed by the factory, `init` binds it to the world,
/// `update` runs once per step, and the world calls `destroy` then
/// `uninit` when `should_destroy` reports true.
pub trait Entity: Any {
    fn entity_type(&self) -> EntityType;

    fn client_entity_mode(&self) -> ClientEntityMode {
        ClientEntityMode::ClientSlaveOnly
    }

    fn init(&mut self, world: &mut World, id: EntityId, mode: EntityMode) -> Result<()>;

    fn uninit(&mut self, world: &mut World);

    fn entity_id(&self) -> EntityId;

    fn entity_mode(&self) -> Option<EntityMode>;

    fn is_master(&self) -> bool {
        self.entity_mode() == Some(EntityMode::Master)
    }

    fn position(&self) -> Vec2F;

    /// Rough bounds relative to `position`, used for queries
    fn meta_bound_box(&self) -> RectF;

    fn world_bound_box(&self) -> RectF {
        self.meta_bound_box().translated(self.position())
    }

    fn team(&self) -> EntityDamageTeam {
        EntityDamageTeam::default()
    }

    /// Saved with the world when true
    fn persistent(&self) -> bool {
        false
    }

    /// Keeps its surroundings simulated
    fn keep_alive(&self) -> bool {
        false
    }

    fn unique_id(&self) -> Option<String> {
        None
    }

    /// Config name the factory built this from
    fn name(&self) -> String {
        String::new()
    }

    fn update(&mut self, world: &mut World, dt: f32, step: u64);

    fn should_destroy(&self) -> bool {
        false
    }

    /// Last call before removal on the master
    fn destroy(&mut self, _world: &mut World) {}

    fn write_net_state(&mut self, from_version: u64, rules: NetCompatibilityRules) -> (Vec<u8>, u64);

    fn read_net_state(&mut self, data: &[u8], interpolation_time: f32, rules: NetCompatibilityRules) -> NetResult<()>;

    fn enable_interpolation(&mut self, _extrapolation_hint: f32) {}

    fn disable_interpolation(&mut self) {}

    /// Enough to rebuild this entity through the factory on a peer
    fn store_spawn(&self) -> Json;

    /// A script message; `None` when nothing handles it
    fn receive_message(&mut self, _world: &mut World, _from: ConnectionId, _name: &str, _args: &[Json]) -> Option<Json> {
        None
    }

    /// Damage areas active this step
    fn damage_sources(&self) -> Vec<DamageSource> {
        Vec::new()
    }

    /// One of this entity's damage sources hit `target`
    fn hit_other(&mut self, _world: &mut World, _target: EntityId, _request: &DamageRequest) {}

    fn damaged_other(&mut self, _world: &mut World, _notification: &DamageNotification) {}

    fn as_tile_entity(&self) -> Option<&dyn TileEntity> {
        None
    }

    fn as_tile_entity_mut(&mut self) -> Option<&mut dyn TileEntity> {
        None
    }

    fn as_wire_entity(&self) -> Option<&dyn WireEntity> {
        None
    }

    fn as_wire_entity_mut(&mut self) -> Option<&mut dyn WireEntity> {
        None
    }

    fn as_physics_entity(&self) -> Option<&dyn PhysicsEntity> {
        None
    }

    fn as_interactive_mut(&mut self) -> Option<&mut dyn InteractiveEntity> {
        None
    }

    fn as_damage_target(&self) -> Option<&dyn DamageTarget> {
        None
    }

    fn as_damage_target_mut(&mut self) -> Option<&mut dyn DamageTarget> {
        None
    }

    fn as_scripted_mut(&mut self) -> Option<&mut dyn ScriptedEntity> {
        None
    }

    fn as_loungeable(&self) -> Option<&dyn LoungeableEntity> {
        None
    }

    fn as_loungeable_mut(&mut self) -> Option<&mut dyn LoungeableEntity> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// An entity anchored to the tile grid
pub trait TileEntity {
    fn tile_position(&self) -> Vec2I;

    /// Occupied tiles, relative to `tile_position`
    fn spaces(&self) -> Vec<Vec2I>;

    /// Tiles outside `spaces` that must stay solid, relative to
    /// `tile_position`
    fn roots(&self) -> Vec<Vec2I> {
        Vec::new()
    }

    /// Metamaterials to stamp into the foreground, relative to
    /// `tile_position`
    fn material_spaces(&self) -> Vec<(Vec2I, crate::material::MaterialId)> {
        Vec::new()
    }

    /// Tiles that accept interaction, relative to `tile_position`
    fn interactive_spaces(&self) -> Vec<Vec2I> {
        self.spaces()
    }

    /// Called by the world when a tile at or next to the entity changed
    fn neighbors_changed(&mut self) {}

    fn occupied_spaces(&self) -> Vec<Vec2I> {
        let base = self.tile_position();
        self.spaces().into_iter().map(|s| s + base).collect()
    }
}

/// Numbered wire nodes carrying one boolean level each
pub trait WireEntity {
    fn input_node_count(&self) -> usize;

    fn output_node_count(&self) -> usize;

    /// Where the input node sits in world tiles; connections address nodes
    /// by this position plus index
    fn wire_location(&self) -> Vec2I;

    fn input_connections(&self, node: usize) -> Vec<WireConnection>;

    fn output_connections(&self, node: usize) -> Vec<WireConnection>;

    fn add_input_connection(&mut self, node: usize, connection: WireConnection);

    fn add_output_connection(&mut self, node: usize, connection: WireConnection);

    fn remove_input_connection(&mut self, node: usize, connection: WireConnection);

    fn remove_output_connection(&mut self, node: usize, connection: WireConnection);

    fn input_state(&self, node: usize) -> bool;

    fn set_input_state(&mut self, node: usize, state: bool);

    fn output_state(&self, node: usize) -> bool;

    /// React to this step's input levels and publish new outputs
    fn evaluate(&mut self, world: &mut World);
}

/// Exports collision geometry and forces other bodies respond to
pub trait PhysicsEntity {
    fn moving_collisions(&self) -> Vec<MovingCollision>;

    fn force_regions(&self) -> Vec<PhysicsForceRegion>;
}

pub trait InteractiveEntity {
    fn is_interactive(&self) -> bool;

    fn interact(&mut self, world: &mut World, request: &InteractRequest) -> InteractAction;
}

pub trait DamageTarget {
    /// World-space area that can be hit
    fn hit_poly(&self) -> Option<PolyF>;

    /// How a source would hit this target, `None` to ignore it
    fn query_hit(&self, source: &DamageSource) -> Option<HitType>;

    fn apply_damage(&mut self, world: &mut World, request: &DamageRequest) -> Vec<DamageNotification>;
}

pub trait ScriptedEntity {
    /// Call a script function; `None` when missing or on error
    fn call_script(&mut self, world: &mut World, function: &str, args: &[Json]) -> Option<Json>;

    /// Evaluate code in the entity's script context
    fn eval_script(&mut self, world: &mut World, code: &str) -> Result<Json>;
}

/// Named control inputs a lounging entity forwards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LoungeControl {
    Left,
    Right,
    Down,
    Up,
    Jump,
    PrimaryFire,
    AltFire,
    Special1,
    Special2,
    Special3,
    Walk,
}

impl LoungeControl {
    pub const ALL: [LoungeControl; 11] = [
        LoungeControl::Left,
        LoungeControl::Right,
        LoungeControl::Down,
        LoungeControl::Up,
        LoungeControl::Jump,
        LoungeControl::PrimaryFire,
        LoungeControl::AltFire,
        LoungeControl::Special1,
        LoungeControl::Special2,
        LoungeControl::Special3,
        LoungeControl::Walk,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        serde_json::from_value(Json::String(name.to_string())).ok()
    }
}

/// Seats other entities can occupy
pub trait LoungeableEntity {
    fn lounge_anchor_count(&self) -> usize;

    /// World position of a seat, `None` when the seat is disabled
    fn lounge_anchor(&self, anchor: usize) -> Option<Vec2F>;

    fn set_lounge_controls(
        &mut self,
        anchor: usize,
        controls: &[LoungeControl],
        aim: Vec2F,
        from_remote: bool,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_names() {
        for kind in EntityType::ALL {
            assert_eq!(EntityType::from_name(kind.name()), Some(kind));
        }
        assert_eq!(EntityType::from_name("ItemDrop"), Some(EntityType::ItemDrop));
        let parsed: EntityType = serde_json::from_value(serde_json::json!("npc")).unwrap();
        assert_eq!(parsed, EntityType::Npc);
    }

    #[test]
    fn test_update_order_is_declaration_order() {
        let mut sorted = EntityType::ALL.to_vec();
        sorted.sort();
        assert_eq!(sorted, EntityType::ALL.to_vec());
        assert!(EntityType::Vehicle < EntityType::Monster);
    }

    #[test]
    fn test_lounge_control_names() {
        assert_eq!(LoungeControl::from_name("Jump"), Some(LoungeControl::Jump));
        assert_eq!(LoungeControl::from_name("jump"), None);
    }
}
