//! Placeable tile objects
//!
//! An object sits at a tile position in one of the orientations its config
//! lists. Placement picks the first orientation whose spaces are free and
//! whose anchors are satisfied; a placed object re-checks its anchors after
//! a neighbouring tile changes and breaks once they no longer hold.

use std::any::Any;
use std::cell::RefCell;
use std::mem;

use serde::Deserialize;
use serde_json::json;
use star_core::Json;
use star_math::{RectF, Vec2F, Vec2I};
use star_net::{
    NetCompatibilityRules, NetElementBool, NetElementData, NetElementJson, NetElementTop, NetResult,
};
use star_physics::{CollisionKind, CollisionWorld, Direction, MovingCollision, PhysicsForceRegion};
use star_script::mlua::{self, Scope, Value};
use star_script::{json_to_lua, lua_to_json, LuaCallbacks, ScriptComponent};

use super::{eval_entry, init_scripts, invoke_entry, invoke_json_entry, message_entry, update_entry};
use super::{EntityConfig, ScriptedState};
use crate::callbacks::{runtime, with_cell};
use crate::damage::{DamageSource, DamageSourceConfig, EntityDamageTeam};
use crate::entity::{
    ConnectionId, Entity, EntityHandle, EntityId, EntityMode, EntityType, InteractiveEntity, PhysicsEntity,
    ScriptedEntity, TileEntity, WireEntity,
};
use crate::error::{Result, WorldError};
use crate::interaction::{InteractAction, InteractActionType, InteractRequest};
use crate::material::MaterialId;
use crate::physics::PhysicsExports;
use crate::wire::WireConnection;
use crate::world::World;

/// A tile next to an object's spaces that must hold for it to stay placed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Bottom,
    Top,
    Left,
    Right,
    /// Every space needs a background tile behind it
    Background,
}

impl Anchor {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "bottom" => Some(Anchor::Bottom),
            "top" => Some(Anchor::Top),
            "left" => Some(Anchor::Left),
            "right" => Some(Anchor::Right),
            "background" => Some(Anchor::Background),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct OrientationConfig {
    spaces: Vec<Vec2I>,
    anchors: Vec<String>,
    direction: Option<String>,
    material_spaces: Vec<(Vec2I, String)>,
    interactive_spaces: Option<Vec<Vec2I>>,
    touch_damage: Option<DamageSourceConfig>,
}

impl Default for OrientationConfig {
    fn default() -> Self {
        Self {
            spaces: vec![Vec2I::ZERO],
            anchors: Vec::new(),
            direction: None,
            material_spaces: Vec::new(),
            interactive_spaces: None,
            touch_damage: None,
        }
    }
}

/// One entry of an object's `orientations` list
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectOrientation {
    pub spaces: Vec<Vec2I>,
    pub anchors: Vec<Anchor>,
    /// Only usable when placed facing this way
    pub direction: Option<Direction>,
    /// Material names, resolved against the world's materials at init
    pub material_spaces: Vec<(Vec2I, String)>,
    pub interactive_spaces: Vec<Vec2I>,
    pub touch_damage: Option<DamageSourceConfig>,
}

impl ObjectOrientation {
    /// Parse `orientations`; a config without any gets one single-tile
    /// orientation with no anchors
    pub fn parse_all(config: &EntityConfig) -> Result<Vec<Self>> {
        let invalid = |reason: String| WorldError::InvalidConfig {
            kind: "object",
            name: config.name().to_string(),
            reason,
        };
        let raw: Vec<OrientationConfig> = config.parse("orientations")?.unwrap_or_default();
        let raw = if raw.is_empty() {
            vec![OrientationConfig::default()]
        } else {
            raw
        };

        raw.into_iter()
            .map(|o| {
                let anchors = o
                    .anchors
                    .iter()
                    .map(|a| Anchor::from_name(a).ok_or_else(|| invalid(format!("unknown anchor '{}'", a))))
                    .collect::<Result<Vec<_>>>()?;
                let direction = match o.direction.as_deref() {
                    None => None,
                    Some("left") => Some(Direction::Left),
                    Some("right") => Some(Direction::Right),
                    Some(other) => return Err(invalid(format!("unknown direction '{}'", other))),
                };
                if o.spaces.is_empty() {
                    return Err(invalid("orientation without spaces".to_string()));
                }
                Ok(Self {
                    interactive_spaces: o.interactive_spaces.unwrap_or_else(|| o.spaces.clone()),
                    spaces: o.spaces,
                    anchors,
                    direction,
                    material_spaces: o.material_spaces,
                    touch_damage: o.touch_damage,
                })
            })
            .collect()
    }

    /// Tiles that have to be solid (or have a background) for each anchor,
    /// relative to the object
    fn anchor_tiles(&self, anchor: Anchor) -> Vec<Vec2I> {
        let min_x = self.spaces.iter().map(|s| s.x).min().unwrap_or(0);
        let max_x = self.spaces.iter().map(|s| s.x).max().unwrap_or(0);
        let min_y = self.spaces.iter().map(|s| s.y).min().unwrap_or(0);
        let max_y = self.spaces.iter().map(|s| s.y).max().unwrap_or(0);
        match anchor {
            Anchor::Bottom => self
                .spaces
                .iter()
                .filter(|s| s.y == min_y)
                .map(|s| *s + Vec2I::new(0, -1))
                .collect(),
            Anchor::Top => self
                .spaces
                .iter()
                .filter(|s| s.y == max_y)
                .map(|s| *s + Vec2I::new(0, 1))
                .collect(),
            Anchor::Left => self
                .spaces
                .iter()
                .filter(|s| s.x == min_x)
                .map(|s| *s + Vec2I::new(-1, 0))
                .collect(),
            Anchor::Right => self
                .spaces
                .iter()
                .filter(|s| s.x == max_x)
                .map(|s| *s + Vec2I::new(1, 0))
                .collect(),
            Anchor::Background => self.spaces.clone(),
        }
    }

    fn bound_box(&self) -> RectF {
        let points: Vec<Vec2F> = self
            .spaces
            .iter()
            .flat_map(|s| [s.to_f32(), (*s + Vec2I::new(1, 1)).to_f32()])
            .collect();
        RectF::from_points(&points)
    }
}

fn anchor_holds(world: &World, base: Vec2I, orientation: &ObjectOrientation) -> bool {
    orientation.anchors.iter().all(|anchor| {
        orientation.anchor_tiles(*anchor).into_iter().all(|offset| {
            let tile = base + offset;
            match anchor {
                Anchor::Background => world.tile(tile).background != crate::material::EMPTY_MATERIAL,
                _ => !matches!(world.tile_collision(tile), CollisionKind::None | CollisionKind::Null),
            }
        })
    })
}

fn direction_name(direction: Direction) -> &'static str {
    match direction {
        Direction::Left => "left",
        Direction::Right => "right",
    }
}

#[derive(Debug, Default)]
struct ObjectNetState {
    /// Index into the orientation list, -1 before one is chosen
    orientation: NetElementData<i32>,
    interactive: NetElementBool,
    parameters: NetElementJson,
    input_connections: NetElementData<Vec<Vec<WireConnection>>>,
    output_connections: NetElementData<Vec<Vec<WireConnection>>>,
    output_levels: NetElementData<Vec<bool>>,
    physics_flags: NetElementData<Vec<bool>>,
    broken: NetElementBool,
}
star_net::net_element_group!(ObjectNetState {
    orientation,
    interactive,
    parameters,
    input_connections,
    output_connections,
    output_levels,
    physics_flags,
    broken
});

/// Everything the `object` script table can reach
pub struct ObjectState {
    handle: EntityHandle,
    config: EntityConfig,
    tile_position: Vec2I,
    direction: Direction,
    orientations: Vec<ObjectOrientation>,
    /// Material ids for the chosen orientation's material spaces
    material_spaces: Vec<(Vec2I, MaterialId)>,
    input_positions: Vec<Vec2I>,
    output_positions: Vec<Vec2I>,
    input_levels: Vec<bool>,
    last_input_levels: Vec<bool>,
    physics: PhysicsExports,
    net: NetElementTop<ObjectNetState>,
    neighbors_dirty: bool,
    smashed: bool,
}

impl ObjectState {
    pub fn orientation(&self) -> Option<&ObjectOrientation> {
        usize::try_from(*self.net.orientation.get())
            .ok()
            .and_then(|i| self.orientations.get(i))
    }

    fn orientation_fits(&self, world: &World, orientation: &ObjectOrientation) -> bool {
        if orientation.direction.map_or(false, |d| d != self.direction) {
            return false;
        }
        let id = self.handle.id;
        let spaces_free = orientation.spaces.iter().all(|offset| {
            let tile = self.tile_position + *offset;
            world.tiles().contains(tile)
                && !world.tile_collision(tile).is_solid()
                && world.tile_entity_at(tile).map_or(true, |other| other == id)
        });
        spaces_free && anchor_holds(world, self.tile_position, orientation)
    }

    /// False when the node does not exist
    fn set_output_level(&mut self, node: usize, level: bool) -> bool {
        if node >= self.output_positions.len() {
            return false;
        }
        if self.net.output_levels.get().get(node) != Some(&level) {
            self.net.output_levels.update(|levels| levels[node] = level);
        }
        true
    }

    fn set_config_parameter(&mut self, key: &str, value: Json) {
        if let Some(parameters) = self.config.parameters_mut().as_object_mut() {
            parameters.insert(key.to_string(), value);
        }
        let parameters = self.config.parameters().clone();
        self.net.parameters.set(parameters);
    }
}

impl ScriptedState for ObjectState {
    fn entity_id(&self) -> EntityId {
        self.handle.id
    }

    fn entity_type(&self) -> EntityType {
        EntityType::Object
    }

    fn position(&self) -> Vec2F {
        self.tile_position.to_f32()
    }

    fn config(&self) -> &EntityConfig {
        &self.config
    }

    fn register_callbacks<'scope, 'env, 's: 'env>(
        scope: &'scope Scope<'scope, 'env>,
        callbacks: &mut LuaCallbacks,
        state: &'env RefCell<&'s mut Self>,
    ) -> mlua::Result<()> {
        let mut reg = |name: &str, function: mlua::Function| callbacks.register("object", name, function);

        reg("name", scope.create_function(move |_, ()| with_cell(state, |s| s.config.name().to_string()))?)?;
        reg("direction", scope.create_function(move |_, ()| with_cell(state, |s| s.direction.numerical() as i32))?)?;
        reg("position", scope.create_function(move |_, ()| with_cell(state, |s| s.tile_position.to_array()))?)?;
        reg("isInteractive", scope.create_function(move |_, ()| with_cell(state, |s| *s.net.interactive.get()))?)?;
        reg("setInteractive", scope.create_function(move |_, interactive: bool| {
            with_cell(state, |s| s.net.interactive.set(interactive))
        })?)?;
        reg("smash", scope.create_function(move |_, smash: Option<bool>| {
            with_cell(state, |s| {
                s.smashed = smash.unwrap_or(false);
                s.net.broken.set(true);
            })
        })?)?;
        reg("inputNodeCount", scope.create_function(move |_, ()| with_cell(state, |s| s.input_positions.len()))?)?;
        reg("outputNodeCount", scope.create_function(move |_, ()| with_cell(state, |s| s.output_positions.len()))?)?;
        reg("isInputNodeConnected", scope.create_function(move |_, node: usize| {
            with_cell(state, |s| s.net.input_connections.get().get(node).map_or(false, |c| !c.is_empty()))
        })?)?;
        reg("isOutputNodeConnected", scope.create_function(move |_, node: usize| {
            with_cell(state, |s| s.net.output_connections.get().get(node).map_or(false, |c| !c.is_empty()))
        })?)?;
        reg("getInputNodeLevel", scope.create_function(move |_, node: usize| {
            with_cell(state, |s| s.input_levels.get(node).copied().unwrap_or(false))
        })?)?;
        reg("getOutputNodeLevel", scope.create_function(move |_, node: usize| {
            with_cell(state, |s| s.net.output_levels.get().get(node).copied().unwrap_or(false))
        })?)?;
        reg("setOutputNodeLevel", scope.create_function(move |_, (node, level): (usize, bool)| {
            let known = with_cell(state, |s| s.set_output_level(node, level))?;
            if known {
                Ok(())
            } else {
                Err(runtime(format!("no output node {}", node)))
            }
        })?)?;
        reg("setConfigParameter", scope.create_function(move |lua, (key, value): (String, Value)| {
            let value = lua_to_json(lua, value)?;
            with_cell(state, |s| s.set_config_parameter(&key, value))
        })?)?;
        reg("setForceRegionEnabled", scope.create_function(move |_, (name, enabled): (String, bool)| {
            with_cell(state, |s| {
                let found = s.physics.set_force_enabled(&name, enabled);
                s.net.physics_flags.set(s.physics.enabled_flags());
                found
            })
        })?)?;
        reg("setMovingCollisionEnabled", scope.create_function(move |_, (name, enabled): (String, bool)| {
            with_cell(state, |s| {
                let found = s.physics.set_collision_enabled(&name, enabled);
                s.net.physics_flags.set(s.physics.enabled_flags());
                found
            })
        })?)?;
        reg("orientationIndex", scope.create_function(move |_, ()| with_cell(state, |s| *s.net.orientation.get()))?)?;
        reg("parameters", scope.create_function(move |lua, ()| {
            let parameters = with_cell(state, |s| s.config.parameters().clone())?;
            json_to_lua(lua, &parameters)
        })?)?;
        Ok(())
    }
}

/// A placed object
pub struct Object {
    script: ScriptComponent,
    state: ObjectState,
}

impl Object {
    pub fn new(config: EntityConfig, tile_position: Vec2I, direction: Direction) -> Result<Self> {
        let orientations = ObjectOrientation::parse_all(&config)?;
        let input_positions: Vec<Vec2I> = config.parse("inputNodes")?.unwrap_or_default();
        let output_positions: Vec<Vec2I> = config.parse("outputNodes")?.unwrap_or_default();
        let physics = PhysicsExports::from_config(&config.merged())?;
        let script = ScriptComponent::new(config.name(), config.scripts(), config.script_delta());

        let net = ObjectNetState {
            orientation: NetElementData::new(-1),
            interactive: NetElementBool::new(config.get_bool("interactive", config.get("interactAction").is_some())),
            parameters: NetElementJson::new(config.parameters().clone()),
            input_connections: NetElementData::new(vec![Vec::new(); input_positions.len()]),
            output_connections: NetElementData::new(vec![Vec::new(); output_positions.len()]),
            output_levels: NetElementData::new(vec![false; output_positions.len()]),
            physics_flags: NetElementData::new(physics.enabled_flags()),
            broken: NetElementBool::new(false),
        };

        Ok(Self {
            script,
            state: ObjectState {
                handle: EntityHandle::default(),
                tile_position,
                direction,
                orientations,
                material_spaces: Vec::new(),
                input_levels: vec![false; input_positions.len()],
                last_input_levels: vec![false; input_positions.len()],
                input_positions,
                output_positions,
                physics,
                net: NetElementTop::new(net),
                neighbors_dirty: false,
                smashed: false,
                config,
            },
        })
    }

    pub fn tile_position(&self) -> Vec2I {
        self.state.tile_position
    }

    pub fn direction(&self) -> Direction {
        self.state.direction
    }

    pub fn orientation_index(&self) -> Option<usize> {
        usize::try_from(*self.state.net.orientation.get()).ok()
    }

    pub fn orientation(&self) -> Option<&ObjectOrientation> {
        self.state.orientation()
    }

    pub fn config(&self) -> &EntityConfig {
        &self.state.config
    }

    pub fn script(&self) -> &ScriptComponent {
        &self.script
    }

    pub fn is_broken(&self) -> bool {
        *self.state.net.broken.get()
    }

    /// Break the object at the end of the step. A smashed object drops
    /// nothing.
    pub fn break_object(&mut self, smash: bool) {
        self.state.smashed = smash;
        self.state.net.broken.set(true);
    }

    fn resolve_material_spaces(&mut self, world: &World) -> Result<()> {
        let Some(orientation) = self.state.orientation() else {
            return Ok(());
        };
        let materials = world.resources().materials();
        let mut resolved = Vec::with_capacity(orientation.material_spaces.len());
        for (offset, name) in &orientation.material_spaces {
            let id = materials.material_id(name).ok_or_else(|| WorldError::UnknownConfig {
                kind: "material",
                name: name.clone(),
            })?;
            resolved.push((*offset, id));
        }
        self.state.material_spaces = resolved;
        Ok(())
    }
}

impl Entity for Object {
    fn entity_type(&self) -> EntityType {
        EntityType::Object
    }

    fn init(&mut self, world: &mut World, id: EntityId, mode: EntityMode) -> Result<()> {
        self.state.handle.bind(id, mode);
        if mode == EntityMode::Master {
            let chosen = self
                .state
                .orientations
                .iter()
                .position(|o| self.state.orientation_fits(world, o));
            let Some(index) = chosen else {
                self.state.handle.unbind();
                return Err(WorldError::InvalidPlacement {
                    name: self.state.config.name().to_string(),
                    position: self.state.tile_position,
                    reason: "no orientation fits".to_string(),
                });
            };
            self.state.net.orientation.set(index as i32);
        }
        if let Err(e) = self.resolve_material_spaces(world) {
            self.state.handle.unbind();
            return Err(e);
        }
        if mode == EntityMode::Master && !self.script.scripts().is_empty() {
            init_scripts(&mut self.script, world, &mut self.state)?;
        }
        Ok(())
    }

    fn uninit(&mut self, _world: &mut World) {
        self.script.uninit();
        self.state.handle.unbind();
    }

    fn entity_id(&self) -> EntityId {
        self.state.handle.id
    }

    fn entity_mode(&self) -> Option<EntityMode> {
        self.state.handle.mode
    }

    fn position(&self) -> Vec2F {
        self.state.tile_position.to_f32()
    }

    fn meta_bound_box(&self) -> RectF {
        self.state
            .orientation()
            .or_else(|| self.state.orientations.first())
            .map_or(RectF::from_coords(0.0, 0.0, 1.0, 1.0), |o| o.bound_box())
    }

    fn persistent(&self) -> bool {
        true
    }

    fn unique_id(&self) -> Option<String> {
        self.state.config.unique_id()
    }

    fn name(&self) -> String {
        self.state.config.name().to_string()
    }

    fn team(&self) -> EntityDamageTeam {
        self.state.config.parse("damageTeam").ok().flatten().unwrap_or_default()
    }

    fn update(&mut self, world: &mut World, dt: f32, _step: u64) {
        if !self.state.handle.is_master() {
            self.state.net.tick_net_interpolation(dt);
            return;
        }
        if mem::take(&mut self.state.neighbors_dirty) && !self.is_broken() {
            let holds = self
                .state
                .orientation()
                .map_or(true, |o| anchor_holds(world, self.state.tile_position, o));
            if !holds {
                log::debug!(
                    "object {} '{}' lost its anchors",
                    self.state.handle.id,
                    self.state.config.name()
                );
                self.break_object(false);
                return;
            }
        }
        update_entry(&mut self.script, world, &mut self.state, dt);
    }

    fn should_destroy(&self) -> bool {
        self.is_broken()
    }

    fn destroy(&mut self, world: &mut World) {
        if self.script.is_running() {
            let smashed = self.state.smashed;
            let _: Option<()> = invoke_entry(&mut self.script, world, &mut self.state, "die", smashed);
        }
        if self.is_broken() && !self.state.smashed && self.state.config.get_bool("dropOnBreak", true) {
            let center = self.world_bound_box().center();
            let name = self.state.config.name().to_string();
            if let Err(e) = world.spawn_item_drop(&name, 1, center, &Json::Null) {
                log::warn!("broken object {} dropped nothing: {}", self.state.handle.id, e);
            }
        }
    }

    fn write_net_state(&mut self, from_version: u64, rules: NetCompatibilityRules) -> (Vec<u8>, u64) {
        self.state.net.write_net_state(from_version, rules)
    }

    fn read_net_state(&mut self, data: &[u8], interpolation_time: f32, rules: NetCompatibilityRules) -> NetResult<()> {
        self.state.net.read_net_state(data, interpolation_time, rules)?;
        let flags = self.state.net.physics_flags.get().clone();
        self.state.physics.apply_enabled_flags(&flags);
        if self.state.net.parameters.pull_updated() {
            let parameters = self.state.net.parameters.get().clone();
            if parameters.is_object() {
                *self.state.config.parameters_mut() = parameters;
            }
        }
        Ok(())
    }

    fn enable_interpolation(&mut self, extrapolation_hint: f32) {
        self.state.net.enable_net_interpolation(extrapolation_hint);
    }

    fn disable_interpolation(&mut self) {
        self.state.net.disable_net_interpolation();
    }

    fn store_spawn(&self) -> Json {
        json!({
            "name": self.state.config.name(),
            "position": self.state.tile_position.to_array(),
            "direction": direction_name(self.state.direction),
            "parameters": self.state.config.parameters(),
        })
    }

    fn receive_message(&mut self, world: &mut World, from: ConnectionId, name: &str, args: &[Json]) -> Option<Json> {
        let is_local = from == world.connection();
        message_entry(&mut self.script, world, &mut self.state, name, is_local, args)
    }

    fn damage_sources(&self) -> Vec<DamageSource> {
        let Some(touch) = self.state.orientation().and_then(|o| o.touch_damage.as_ref()) else {
            return Vec::new();
        };
        if !self.state.handle.is_master() {
            return Vec::new();
        }
        let mut source = touch.at(self.position(), self.state.handle.id, self.team());
        source.repeat_group = Some(format!("object{}", self.state.handle.id));
        vec![source]
    }

    fn as_tile_entity(&self) -> Option<&dyn TileEntity> {
        Some(self)
    }

    fn as_tile_entity_mut(&mut self) -> Option<&mut dyn TileEntity> {
        Some(self)
    }

    fn as_wire_entity(&self) -> Option<&dyn WireEntity> {
        if self.state.input_positions.is_empty() && self.state.output_positions.is_empty() {
            None
        } else {
            Some(self)
        }
    }

    fn as_wire_entity_mut(&mut self) -> Option<&mut dyn WireEntity> {
        if self.state.input_positions.is_empty() && self.state.output_positions.is_empty() {
            None
        } else {
            Some(self)
        }
    }

    fn as_physics_entity(&self) -> Option<&dyn PhysicsEntity> {
        Some(self)
    }

    fn as_interactive_mut(&mut self) -> Option<&mut dyn InteractiveEntity> {
        Some(self)
    }

    fn as_scripted_mut(&mut self) -> Option<&mut dyn ScriptedEntity> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl TileEntity for Object {
    fn tile_position(&self) -> Vec2I {
        self.state.tile_position
    }

    fn spaces(&self) -> Vec<Vec2I> {
        self.state.orientation().map(|o| o.spaces.clone()).unwrap_or_default()
    }

    fn roots(&self) -> Vec<Vec2I> {
        let Some(orientation) = self.state.orientation() else {
            return Vec::new();
        };
        orientation
            .anchors
            .iter()
            .filter(|a| **a != Anchor::Background)
            .flat_map(|a| orientation.anchor_tiles(*a))
            .collect()
    }

    fn material_spaces(&self) -> Vec<(Vec2I, MaterialId)> {
        self.state.material_spaces.clone()
    }

    fn interactive_spaces(&self) -> Vec<Vec2I> {
        self.state
            .orientation()
            .map(|o| o.interactive_spaces.clone())
            .unwrap_or_default()
    }

    fn neighbors_changed(&mut self) {
        self.state.neighbors_dirty = true;
    }
}

impl WireEntity for Object {
    fn input_node_count(&self) -> usize {
        self.state.input_positions.len()
    }

    fn output_node_count(&self) -> usize {
        self.state.output_positions.len()
    }

    fn wire_location(&self) -> Vec2I {
        self.state.tile_position
    }

    fn input_connections(&self, node: usize) -> Vec<WireConnection> {
        self.state.net.input_connections.get().get(node).cloned().unwrap_or_default()
    }

    fn output_connections(&self, node: usize) -> Vec<WireConnection> {
        self.state.net.output_connections.get().get(node).cloned().unwrap_or_default()
    }

    fn add_input_connection(&mut self, node: usize, connection: WireConnection) {
        self.state.net.input_connections.update(|nodes| {
            if let Some(list) = nodes.get_mut(node) {
                if !list.contains(&connection) {
                    list.push(connection);
                }
            }
        });
    }

    fn add_output_connection(&mut self, node: usize, connection: WireConnection) {
        self.state.net.output_connections.update(|nodes| {
            if let Some(list) = nodes.get_mut(node) {
                if !list.contains(&connection) {
                    list.push(connection);
                }
            }
        });
    }

    fn remove_input_connection(&mut self, node: usize, connection: WireConnection) {
        self.state.net.input_connections.update(|nodes| {
            if let Some(list) = nodes.get_mut(node) {
                list.retain(|c| *c != connection);
            }
        });
    }

    fn remove_output_connection(&mut self, node: usize, connection: WireConnection) {
        self.state.net.output_connections.update(|nodes| {
            if let Some(list) = nodes.get_mut(node) {
                list.retain(|c| *c != connection);
            }
        });
    }

    fn input_state(&self, node: usize) -> bool {
        self.state.input_levels.get(node).copied().unwrap_or(false)
    }

    fn set_input_state(&mut self, node: usize, state: bool) {
        if let Some(level) = self.state.input_levels.get_mut(node) {
            *level = state;
        }
    }

    fn output_state(&self, node: usize) -> bool {
        self.state.net.output_levels.get().get(node).copied().unwrap_or(false)
    }

    fn evaluate(&mut self, world: &mut World) {
        let changed: Vec<(usize, bool)> = self
            .state
            .input_levels
            .iter()
            .zip(&self.state.last_input_levels)
            .enumerate()
            .filter(|(_, (now, before))| now != before)
            .map(|(node, (now, _))| (node, *now))
            .collect();
        self.state.last_input_levels = self.state.input_levels.clone();
        for (node, level) in changed {
            let args = json!({"node": node, "level": level});
            invoke_json_entry(&mut self.script, world, &mut self.state, "onInputNodeChange", &[args]);
        }
    }
}

impl PhysicsEntity for Object {
    fn moving_collisions(&self) -> Vec<MovingCollision> {
        self.state
            .physics
            .moving_collisions(self.state.handle.id, self.position(), Vec2F::ZERO)
    }

    fn force_regions(&self) -> Vec<PhysicsForceRegion> {
        self.state.physics.force_regions(self.position())
    }
}

impl InteractiveEntity for Object {
    fn is_interactive(&self) -> bool {
        *self.state.net.interactive.get()
    }

    fn interact(&mut self, world: &mut World, request: &InteractRequest) -> InteractAction {
        let id = self.state.handle.id;
        let scripted = self
            .script
            .context()
            .map_or(false, |c| c.contains_function("onInteraction"));
        if scripted {
            let args = json!({
                "sourceId": request.source_id,
                "sourcePosition": request.source_position.to_array(),
            });
            return invoke_json_entry(&mut self.script, world, &mut self.state, "onInteraction", &[args])
                .map_or_else(InteractAction::none, |result| InteractAction::from_script_result(&result, id));
        }
        match self
            .state
            .config
            .get_str("interactAction")
            .and_then(InteractActionType::from_name)
        {
            Some(kind) => InteractAction::new(kind, id, self.state.config.get_or("interactData", Json::Null)),
            None => InteractAction::none(),
        }
    }
}

impl ScriptedEntity for Object {
    fn call_script(&mut self, world: &mut World, function: &str, args: &[Json]) -> Option<Json> {
        invoke_json_entry(&mut self.script, world, &mut self.state, function, args)
    }

    fn eval_script(&mut self, world: &mut World, code: &str) -> Result<Json> {
        eval_entry(&mut self.script, world, &mut self.state, code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn config(json: Json) -> EntityConfig {
        EntityConfig::new("testobject", "/objects/test.object", Arc::new(json), Json::Null)
    }

    #[test]
    fn test_default_orientation() {
        let orientations = ObjectOrientation::parse_all(&config(json!({}))).unwrap();
        assert_eq!(orientations.len(), 1);
        assert_eq!(orientations[0].spaces, vec![Vec2I::ZERO]);
        assert_eq!(orientations[0].interactive_spaces, vec![Vec2I::ZERO]);
        assert!(orientations[0].anchors.is_empty());
    }

    #[test]
    fn test_anchor_tiles() {
        let orientations = ObjectOrientation::parse_all(&config(json!({
            "orientations": [{
                "spaces": [[0, 0], [1, 0], [0, 1], [1, 1]],
                "anchors": ["bottom", "left"],
                "direction": "right"
            }]
        })))
        .unwrap();
        let o = &orientations[0];
        assert_eq!(o.direction, Some(Direction::Right));
        assert_eq!(o.anchor_tiles(Anchor::Bottom), vec![Vec2I::new(0, -1), Vec2I::new(1, -1)]);
        assert_eq!(o.anchor_tiles(Anchor::Left), vec![Vec2I::new(-1, 0), Vec2I::new(-1, 1)]);
        assert_eq!(o.bound_box(), RectF::from_coords(0.0, 0.0, 2.0, 2.0));
    }

    #[test]
    fn test_unknown_anchor_is_rejected() {
        let result = ObjectOrientation::parse_all(&config(json!({
            "orientations": [{"anchors": ["sideways"]}]
        })));
        assert!(matches!(result, Err(WorldError::InvalidConfig { .. })));
    }

    #[test]
    fn test_store_spawn() {
        let object = Object::new(config(json!({"inputNodes": [[0, 0]]})), Vec2I::new(4, 7), Direction::Left).unwrap();
        let store = object.store_spawn();
        assert_eq!(store["name"], json!("testobject"));
        assert_eq!(store["position"], json!([4, 7]));
        assert_eq!(store["direction"], json!("left"));
        assert!(object.as_wire_entity().is_some());
        assert_eq!(object.orientation_index(), None);
    }
}
