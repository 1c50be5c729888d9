//! Projectiles
//!
//! Short lived bodies with a time to live and a damage source scaled by
//! `power`. A projectile may follow its source, in which case the source's
//! motion is added to its own each tick.

use std::any::Any;
use std::cell::RefCell;

use serde_json::json;
use star_core::Json;
use star_math::{RectF, Vec2F};
use star_net::{NetCompatibilityRules, NetElementData, NetElementFloat, NetElementTop, NetResult};
use star_physics::{MovementController, MovementParameters};
use star_script::mlua::{self, Scope};
use star_script::{LuaCallbacks, ScriptComponent};

use super::{eval_entry, init_scripts, invoke_entry, invoke_json_entry, message_entry, update_entry};
use super::{EntityConfig, ScriptedState};
use crate::callbacks::with_cell;
use crate::damage::{DamageRequest, DamageSource, DamageSourceConfig, EntityDamageTeam, TeamType};
use crate::entity::{ClientEntityMode, ConnectionId, Entity, EntityHandle, EntityId, EntityMode, EntityType, ScriptedEntity};
use crate::error::Result;
use crate::world::World;

const DEFAULT_TIME_TO_LIVE: f32 = 5.0;
const DEFAULT_SPEED: f32 = 50.0;

struct ProjectileNetState {
    movement: MovementController,
    power: NetElementFloat,
    team: NetElementData<(TeamType, u32)>,
}
star_net::net_element_group!(ProjectileNetState { movement, power, team });

pub struct ProjectileState {
    handle: EntityHandle,
    config: EntityConfig,
    net: NetElementTop<ProjectileNetState>,
    time_to_live: f32,
    source: Option<EntityId>,
    dead: bool,
}

impl ScriptedState for ProjectileState {
    fn entity_id(&self) -> EntityId {
        self.handle.id
    }

    fn entity_type(&self) -> EntityType {
        EntityType::Projectile
    }

    fn position(&self) -> Vec2F {
        self.net.movement.position()
    }

    fn config(&self) -> &EntityConfig {
        &self.config
    }

    fn register_callbacks<'scope, 'env, 's: 'env>(
        scope: &'scope Scope<'scope, 'env>,
        callbacks: &mut LuaCallbacks,
        state: &'env RefCell<&'s mut Self>,
    ) -> mlua::Result<()> {
        let mut reg = |name: &str, function: mlua::Function| callbacks.register("projectile", name, function);
        reg("sourceEntity", scope.create_function(move |_, ()| with_cell(state, |s| s.source))?)?;
        reg("power", scope.create_function(move |_, ()| with_cell(state, |s| s.net.power.get()))?)?;
        reg("setPower", scope.create_function(move |_, power: f32| with_cell(state, |s| s.net.power.set(power)))?)?;
        reg("timeToLive", scope.create_function(move |_, ()| with_cell(state, |s| s.time_to_live))?)?;
        reg("setTimeToLive", scope.create_function(move |_, ttl: f32| {
            with_cell(state, |s| s.time_to_live = ttl)
        })?)?;
        reg("velocity", scope.create_function(move |_, ()| {
            with_cell(state, |s| s.net.movement.velocity().to_array())
        })?)?;
        reg("setVelocity", scope.create_function(move |_, velocity: [f32; 2]| {
            with_cell(state, |s| s.net.movement.set_velocity(Vec2F::from(velocity)))
        })?)?;
        reg("die", scope.create_function(move |_, ()| with_cell(state, |s| s.dead = true))?)?;
        Ok(())
    }
}

pub struct Projectile {
    script: ScriptComponent,
    state: ProjectileState,
    damage: Option<DamageSourceConfig>,
    speed: f32,
    die_on_collision: bool,
    piercing: bool,
    track_source: bool,
    last_source_position: Option<Vec2F>,
}

impl Projectile {
    /// Reads `timeToLive`, `speed`, `power`, `damage`, `movementSettings`,
    /// `piercing` and `dieOnCollision`
    pub fn new(config: EntityConfig) -> Result<Self> {
        let parameters = match config.get("movementSettings") {
            Some(json) => MovementParameters::from_json(json)?,
            None => MovementParameters::default(),
        };
        let script = ScriptComponent::new(config.name(), config.scripts(), config.script_delta_or(1));
        Ok(Self {
            script,
            damage: config.parse("damage")?,
            speed: config.get_f32("speed", DEFAULT_SPEED),
            die_on_collision: config.get_bool("dieOnCollision", true),
            piercing: config.get_bool("piercing", false),
            track_source: false,
            last_source_position: None,
            state: ProjectileState {
                handle: EntityHandle::default(),
                time_to_live: config.get_f32("timeToLive", DEFAULT_TIME_TO_LIVE),
                source: None,
                dead: false,
                net: NetElementTop::new(ProjectileNetState {
                    movement: MovementController::new(parameters),
                    power: NetElementFloat::new(config.get_f32("power", 1.0)),
                    team: NetElementData::new((TeamType::Indiscriminate, 0)),
                }),
                config,
            },
        })
    }

    /// Launch along `direction` at the configured speed
    pub fn set_initial(&mut self, position: Vec2F, direction: Vec2F, source: Option<EntityId>, track_source: bool) {
        let movement = &mut self.state.net.movement;
        movement.set_position(position);
        let velocity = if direction.length() > 0.0 {
            direction.normalize() * self.speed
        } else {
            Vec2F::ZERO
        };
        movement.set_velocity(velocity);
        self.state.source = source;
        self.track_source = track_source && source.is_some();
    }

    pub fn set_team(&mut self, team: EntityDamageTeam) {
        self.state.net.team.set((team.kind, team.team as u32));
    }

    pub fn source_entity(&self) -> Option<EntityId> {
        self.state.source
    }

    pub fn power(&self) -> f32 {
        self.state.net.power.get()
    }

    pub fn time_to_live(&self) -> f32 {
        self.state.time_to_live
    }

    pub fn velocity(&self) -> Vec2F {
        self.state.net.movement.velocity()
    }

    /// Carry the source's movement since last tick over to the projectile
    fn follow_source(&mut self, world: &World) {
        let Some(source) = self.state.source else {
            return;
        };
        match world.entity(source) {
            Some(entity) => {
                let position = entity.position();
                if let Some(last) = self.last_source_position {
                    self.state.net.movement.translate(position - last);
                }
                self.last_source_position = Some(position);
            }
            None => {
                self.track_source = false;
                self.last_source_position = None;
            }
        }
    }
}

impl Entity for Projectile {
    fn entity_type(&self) -> EntityType {
        EntityType::Projectile
    }

    fn client_entity_mode(&self) -> ClientEntityMode {
        ClientEntityMode::ClientMasterAllowed
    }

    fn init(&mut self, world: &mut World, id: EntityId, mode: EntityMode) -> Result<()> {
        self.state.handle.bind(id, mode);
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
        self.state.net.movement.position()
    }

    fn meta_bound_box(&self) -> RectF {
        self.state.net.movement.collision_poly().bound_box()
    }

    fn team(&self) -> EntityDamageTeam {
        let (kind, team) = *self.state.net.team.get();
        EntityDamageTeam::new(kind, team as u16)
    }

    fn name(&self) -> String {
        self.state.config.name().to_string()
    }

    fn update(&mut self, world: &mut World, dt: f32, _step: u64) {
        if !self.state.handle.is_master() {
            self.state.net.tick_net_interpolation(dt);
            self.state.net.movement.tick_slave(dt);
            return;
        }
        if self.track_source {
            self.follow_source(world);
        }
        update_entry(&mut self.script, world, &mut self.state, dt);
        self.state.net.movement.tick_master(dt, world);

        self.state.time_to_live -= dt;
        if self.state.time_to_live <= 0.0 {
            self.state.dead = true;
        }
        if self.die_on_collision && self.state.net.movement.is_colliding() {
            log::trace!("projectile {} hit terrain", self.state.handle.id);
            self.state.dead = true;
        }
    }

    fn should_destroy(&self) -> bool {
        self.state.dead
    }

    fn destroy(&mut self, world: &mut World) {
        let _: Option<()> = invoke_entry(&mut self.script, world, &mut self.state, "destroy", ());
    }

    fn write_net_state(&mut self, from_version: u64, rules: NetCompatibilityRules) -> (Vec<u8>, u64) {
        self.state.net.write_net_state(from_version, rules)
    }

    fn read_net_state(&mut self, data: &[u8], interpolation_time: f32, rules: NetCompatibilityRules) -> NetResult<()> {
        self.state.net.read_net_state(data, interpolation_time, rules)
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
            "position": self.position().to_array(),
            "parameters": self.state.config.parameters(),
        })
    }

    fn receive_message(&mut self, world: &mut World, from: ConnectionId, name: &str, args: &[Json]) -> Option<Json> {
        let is_local = from == world.connection();
        message_entry(&mut self.script, world, &mut self.state, name, is_local, args)
    }

    /// Damage is multiplied by power and attributed to the projectile, so
    /// the hit comes back here
    fn damage_sources(&self) -> Vec<DamageSource> {
        let (Some(damage), true, false) = (&self.damage, self.state.handle.is_master(), self.state.dead) else {
            return Vec::new();
        };
        let id = self.state.handle.id;
        let mut source = damage.at(self.position(), id, self.team());
        source.damage *= self.power();
        source.repeat_group = Some(format!("projectile{}", id));
        vec![source]
    }

    fn hit_other(&mut self, world: &mut World, target: EntityId, _request: &DamageRequest) {
        invoke_json_entry(&mut self.script, world, &mut self.state, "hit", &[json!(target)]);
        if !self.piercing {
            self.state.dead = true;
        }
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

impl ScriptedEntity for Projectile {
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
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn projectile(config: Json) -> Projectile {
        let config = EntityConfig::new("bullet", "/projectiles/bullet.projectile", Arc::new(config), Json::Null);
        Projectile::new(config).unwrap()
    }

    #[test]
    fn test_initial_velocity_uses_speed() {
        let mut p = projectile(json!({"speed": 20.0}));
        p.set_initial(Vec2F::new(1.0, 1.0), Vec2F::new(0.0, 3.0), Some(7), true);
        assert_relative_eq!(p.velocity().y, 20.0);
        assert_relative_eq!(p.velocity().x, 0.0);
        assert_eq!(p.source_entity(), Some(7));
        assert!(p.track_source);
    }

    #[test]
    fn test_tracking_needs_a_source() {
        let mut p = projectile(json!({}));
        p.set_initial(Vec2F::ZERO, Vec2F::new(1.0, 0.0), None, true);
        assert!(!p.track_source);
        assert_relative_eq!(p.velocity().x, DEFAULT_SPEED);
        assert_relative_eq!(p.time_to_live(), DEFAULT_TIME_TO_LIVE);
    }

    #[test]
    fn test_team_is_inherited() {
        let mut p = projectile(json!({"power": 2.5}));
        p.set_team(EntityDamageTeam::new(TeamType::Enemy, 3));
        assert_eq!(p.team(), EntityDamageTeam::new(TeamType::Enemy, 3));
        assert_relative_eq!(p.power(), 2.5);
        // Not in a world yet
        assert!(p.damage_sources().is_empty());
    }
}
