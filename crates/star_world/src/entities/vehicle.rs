//! Scripted vehicles
//!
//! A vehicle is a physics body with named seats. Riders hand it their held
//! controls and aim each tick and the vehicle script turns them into
//! movement. The server masters vehicles; a client seated in a relayed
//! vehicle forwards its controls to the master as `control_all` messages,
//! resent at least every `slaveControlHeartbeat` seconds so the master
//! knows the rider is still aboard. The master drops remote controls not
//! refreshed within `slaveControlTimeout` seconds.

use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use serde_json::json;
use star_core::Json;
use star_math::{RectF, Vec2F};
use star_net::{NetCompatibilityRules, NetElementBool, NetElementData, NetElementTop, NetResult};
use star_physics::{MovementController, MovementParameters, MovingCollision, PhysicsForceRegion};
use star_script::mlua::{self, Scope};
use star_script::{LuaCallbacks, ScriptComponent};

use super::{eval_entry, init_scripts, invoke_entry, invoke_json_entry, message_entry, update_entry};
use super::{EntityConfig, ScriptedState};
use crate::callbacks::{runtime, with_cell};
use crate::entity::{
    ConnectionId, Entity, EntityHandle, EntityId, EntityMode, EntityType, InteractiveEntity, LoungeControl,
    LoungeableEntity, PhysicsEntity, ScriptedEntity,
};
use crate::error::{Result, WorldError};
use crate::interaction::{InteractAction, InteractActionType, InteractRequest};
use crate::packets::MessageTarget;
use crate::physics::PhysicsExports;
use crate::world::World;

pub const DEFAULT_SLAVE_CONTROL_TIMEOUT: f32 = 2.0;
pub const DEFAULT_SLAVE_CONTROL_HEARTBEAT: f32 = 1.0;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoungePositionConfig {
    #[serde(default)]
    offset: [f32; 2],
    #[serde(default = "enabled_default")]
    enabled: bool,
}

fn enabled_default() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq)]
struct SeatControls {
    held: BTreeSet<LoungeControl>,
    aim: Vec2F,
    /// Seconds since the master last heard from a remote rider
    remote_age: Option<f32>,
    /// A rider on this peer set controls since the last update
    local: bool,
    last_sent: Option<(BTreeSet<LoungeControl>, Vec2F)>,
    since_sent: f32,
}

struct VehicleNetState {
    movement: MovementController,
    physics_flags: NetElementData<Vec<bool>>,
    lounge_enabled: NetElementData<Vec<bool>>,
    interactive: NetElementBool,
}
star_net::net_element_group!(VehicleNetState {
    movement,
    physics_flags,
    lounge_enabled,
    interactive
});

pub struct VehicleState {
    handle: EntityHandle,
    config: EntityConfig,
    net: NetElementTop<VehicleNetState>,
    physics: PhysicsExports,
    /// Seat names and offsets, in name order
    lounge_positions: Vec<(String, Vec2F)>,
    seats: Vec<SeatControls>,
    dead: bool,
}

impl VehicleState {
    fn seat_index(&self, name: &str) -> mlua::Result<usize> {
        self.lounge_positions
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| runtime(format!("no lounge position '{}'", name)))
    }

    fn set_lounge_enabled(&mut self, anchor: usize, enabled: bool) {
        self.net.lounge_enabled.update(|flags| {
            if let Some(flag) = flags.get_mut(anchor) {
                *flag = enabled;
            }
        });
    }
}

impl ScriptedState for VehicleState {
    fn entity_id(&self) -> EntityId {
        self.handle.id
    }

    fn entity_type(&self) -> EntityType {
        EntityType::Vehicle
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
        {
            let mut reg = |name: &str, function: mlua::Function| callbacks.register("vehicle", name, function);
            reg("controlHeld", scope.create_function(move |_, (seat, control): (String, String)| {
                let control =
                    LoungeControl::from_name(&control).ok_or_else(|| runtime(format!("unknown control '{}'", control)))?;
                with_cell(state, |s| {
                    let index = s.seat_index(&seat)?;
                    Ok(s.seats[index].held.contains(&control))
                })?
            })?)?;
            reg("aimPosition", scope.create_function(move |_, seat: String| {
                with_cell(state, |s| {
                    let index = s.seat_index(&seat)?;
                    Ok(s.seats[index].aim.to_array())
                })?
            })?)?;
            reg("setLoungeEnabled", scope.create_function(move |_, (seat, enabled): (String, bool)| {
                with_cell(state, |s| {
                    let index = s.seat_index(&seat)?;
                    s.set_lounge_enabled(index, enabled);
                    Ok(())
                })?
            })?)?;
            reg("setInteractive", scope.create_function(move |_, interactive: bool| {
                with_cell(state, |s| s.net.interactive.set(interactive))
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
            reg("destroy", scope.create_function(move |_, ()| with_cell(state, |s| s.dead = true))?)?;
        }

        let mut reg = |name: &str, function: mlua::Function| callbacks.register("mcontroller", name, function);
        reg("position", scope.create_function(move |_, ()| {
            with_cell(state, |s| s.net.movement.position().to_array())
        })?)?;
        reg("setPosition", scope.create_function(move |_, position: [f32; 2]| {
            with_cell(state, |s| s.net.movement.set_position(Vec2F::from(position)))
        })?)?;
        reg("velocity", scope.create_function(move |_, ()| {
            with_cell(state, |s| s.net.movement.velocity().to_array())
        })?)?;
        reg("setVelocity", scope.create_function(move |_, velocity: [f32; 2]| {
            with_cell(state, |s| s.net.movement.set_velocity(Vec2F::from(velocity)))
        })?)?;
        reg("addMomentum", scope.create_function(move |_, momentum: [f32; 2]| {
            with_cell(state, |s| s.net.movement.add_momentum(Vec2F::from(momentum)))
        })?)?;
        reg("force", scope.create_function(move |_, force: [f32; 2]| {
            with_cell(state, |s| s.net.movement.add_force(Vec2F::from(force)))
        })?)?;
        reg("approachVelocity", scope.create_function(move |_, (velocity, force): ([f32; 2], f32)| {
            with_cell(state, |s| s.net.movement.approach_velocity(Vec2F::from(velocity), force))
        })?)?;
        reg("approachXVelocity", scope.create_function(move |_, (velocity, force): (f32, f32)| {
            with_cell(state, |s| s.net.movement.approach_x_velocity(velocity, force))
        })?)?;
        reg("approachYVelocity", scope.create_function(move |_, (velocity, force): (f32, f32)| {
            with_cell(state, |s| s.net.movement.approach_y_velocity(velocity, force))
        })?)?;
        reg("rotation", scope.create_function(move |_, ()| with_cell(state, |s| s.net.movement.rotation()))?)?;
        reg("setRotation", scope.create_function(move |_, angle: f32| {
            with_cell(state, |s| s.net.movement.set_rotation(angle))
        })?)?;
        reg("mass", scope.create_function(move |_, ()| with_cell(state, |s| s.net.movement.mass()))?)?;
        reg("onGround", scope.create_function(move |_, ()| with_cell(state, |s| s.net.movement.on_ground()))?)?;
        reg("zeroG", scope.create_function(move |_, ()| with_cell(state, |s| s.net.movement.zero_g()))?)?;
        reg("isColliding", scope.create_function(move |_, ()| with_cell(state, |s| s.net.movement.is_colliding()))?)?;
        reg("liquidPercentage", scope.create_function(move |_, ()| {
            with_cell(state, |s| s.net.movement.liquid_percentage())
        })?)?;
        Ok(())
    }
}

pub struct Vehicle {
    script: ScriptComponent,
    state: VehicleState,
    slave_control_timeout: f32,
    slave_control_heartbeat: f32,
}

impl Vehicle {
    /// Reads `movementSettings`, `loungePositions`, `physicsForces`,
    /// `physicsCollisions`, `slaveControlTimeout` and `slaveControlHeartbeat`
    pub fn new(config: EntityConfig, position: Vec2F) -> Result<Self> {
        let parameters = match config.get("movementSettings") {
            Some(json) => MovementParameters::from_json(json)?,
            None => MovementParameters::default(),
        };
        let mut movement = MovementController::new(parameters);
        movement.set_position(position);

        let seats: BTreeMap<String, LoungePositionConfig> = config.parse("loungePositions")?.unwrap_or_default();
        let lounge_enabled = seats.values().map(|s| s.enabled).collect();
        let lounge_positions: Vec<(String, Vec2F)> =
            seats.into_iter().map(|(name, s)| (name, Vec2F::from(s.offset))).collect();

        let physics = PhysicsExports::from_config(&config.merged())?;
        let slave_control_timeout = config.get_f32("slaveControlTimeout", DEFAULT_SLAVE_CONTROL_TIMEOUT);
        let slave_control_heartbeat = config.get_f32("slaveControlHeartbeat", DEFAULT_SLAVE_CONTROL_HEARTBEAT);
        if slave_control_heartbeat >= slave_control_timeout {
            return Err(WorldError::InvalidConfig {
                kind: "vehicle",
                name: config.name().to_string(),
                reason: "slaveControlHeartbeat must be shorter than slaveControlTimeout".into(),
            });
        }

        Ok(Self {
            script: ScriptComponent::new(config.name(), config.scripts(), config.script_delta_or(1)),
            slave_control_timeout,
            slave_control_heartbeat,
            state: VehicleState {
                handle: EntityHandle::default(),
                net: NetElementTop::new(VehicleNetState {
                    movement,
                    physics_flags: NetElementData::new(physics.enabled_flags()),
                    lounge_enabled: NetElementData::new(lounge_enabled),
                    interactive: NetElementBool::new(config.get_bool("interactive", true)),
                }),
                physics,
                seats: vec![SeatControls::default(); lounge_positions.len()],
                lounge_positions,
                dead: false,
                config,
            },
        })
    }

    pub fn movement(&self) -> &MovementController {
        &self.state.net.movement
    }

    pub fn movement_mut(&mut self) -> &mut MovementController {
        &mut self.state.net.movement
    }

    pub fn lounge_position_names(&self) -> impl Iterator<Item = &str> {
        self.state.lounge_positions.iter().map(|(name, _)| name.as_str())
    }

    pub fn control_held(&self, anchor: usize, control: LoungeControl) -> bool {
        self.state.seats.get(anchor).map_or(false, |s| s.held.contains(&control))
    }

    pub fn aim_position(&self, anchor: usize) -> Option<Vec2F> {
        self.state.seats.get(anchor).map(|s| s.aim)
    }

    /// Whether a remote rider has checked in within the timeout
    pub fn has_remote_rider(&self) -> bool {
        self.state.seats.iter().any(|s| s.remote_age.is_some())
    }

    /// Age remote controls, dropping the ones past the timeout
    fn age_remote_controls(&mut self, dt: f32) {
        let timeout = self.slave_control_timeout;
        for (anchor, seat) in self.state.seats.iter_mut().enumerate() {
            if let Some(age) = seat.remote_age.as_mut() {
                *age += dt;
                if *age > timeout {
                    log::debug!("vehicle {} seat {}: remote controls timed out", self.state.handle.id, anchor);
                    seat.held.clear();
                    seat.remote_age = None;
                }
            }
        }
    }

    /// Controls from a rider on this peer only last until the next update
    fn clear_local_controls(&mut self) {
        for seat in &mut self.state.seats {
            if seat.remote_age.is_none() {
                seat.held.clear();
            }
            seat.local = false;
        }
    }

    /// Send local riders' controls to the master when they change or the
    /// heartbeat is due
    fn forward_controls(&mut self, world: &mut World, dt: f32) {
        let id = self.state.handle.id;
        for (anchor, seat) in self.state.seats.iter_mut().enumerate() {
            if !seat.local {
                seat.last_sent = None;
                continue;
            }
            seat.local = false;
            seat.since_sent += dt;
            let current = (seat.held.clone(), seat.aim);
            if seat.last_sent.as_ref() == Some(&current) && seat.since_sent < self.slave_control_heartbeat {
                continue;
            }
            let controls: Vec<Json> = current.0.iter().map(|c| json!(c)).collect();
            world.send_entity_message(
                MessageTarget::Id(id),
                "control_all",
                vec![json!(anchor), Json::Array(controls), json!(current.1.to_array())],
            );
            seat.last_sent = Some(current);
            seat.since_sent = 0.0;
        }
    }

    fn receive_controls(&mut self, args: &[Json], from_remote: bool) -> Option<Json> {
        let [anchor, controls, aim] = args else {
            log::warn!("vehicle {}: malformed control_all", self.state.handle.id);
            return None;
        };
        let anchor = anchor.as_u64()? as usize;
        let controls: Vec<LoungeControl> = serde_json::from_value(controls.clone()).ok()?;
        let aim: [f32; 2] = serde_json::from_value(aim.clone()).ok()?;
        self.set_lounge_controls(anchor, &controls, Vec2F::from(aim), from_remote);
        Some(Json::Null)
    }
}

impl Entity for Vehicle {
    fn entity_type(&self) -> EntityType {
        EntityType::Vehicle
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

    fn persistent(&self) -> bool {
        self.state.config.get_bool("persistent", true)
    }

    /// Kept loaded while a remote rider is aboard
    fn keep_alive(&self) -> bool {
        self.has_remote_rider() || self.state.config.get_bool("keepAlive", false)
    }

    fn unique_id(&self) -> Option<String> {
        self.state.config.unique_id()
    }

    fn name(&self) -> String {
        self.state.config.name().to_string()
    }

    fn update(&mut self, world: &mut World, dt: f32, _step: u64) {
        if !self.state.handle.is_master() {
            self.state.net.tick_net_interpolation(dt);
            self.state.net.movement.tick_slave(dt);
            self.forward_controls(world, dt);
            return;
        }
        self.age_remote_controls(dt);
        update_entry(&mut self.script, world, &mut self.state, dt);
        self.state.net.movement.tick_master(dt, world);
        self.clear_local_controls();
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
        self.state.net.read_net_state(data, interpolation_time, rules)?;
        let flags = self.state.net.physics_flags.get().clone();
        self.state.physics.apply_enabled_flags(&flags);
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
            "position": self.position().to_array(),
            "parameters": self.state.config.parameters(),
        })
    }

    fn receive_message(&mut self, world: &mut World, from: ConnectionId, name: &str, args: &[Json]) -> Option<Json> {
        let is_local = from == world.connection();
        if name == "control_all" {
            return self.receive_controls(args, !is_local);
        }
        message_entry(&mut self.script, world, &mut self.state, name, is_local, args)
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

    fn as_loungeable(&self) -> Option<&dyn LoungeableEntity> {
        Some(self)
    }

    fn as_loungeable_mut(&mut self) -> Option<&mut dyn LoungeableEntity> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl LoungeableEntity for Vehicle {
    fn lounge_anchor_count(&self) -> usize {
        self.state.lounge_positions.len()
    }

    fn lounge_anchor(&self, anchor: usize) -> Option<Vec2F> {
        let (_, offset) = self.state.lounge_positions.get(anchor)?;
        let enabled = self.state.net.lounge_enabled.get().get(anchor).copied().unwrap_or(false);
        enabled.then(|| self.position() + *offset)
    }

    fn set_lounge_controls(&mut self, anchor: usize, controls: &[LoungeControl], aim: Vec2F, from_remote: bool) {
        let Some(seat) = self.state.seats.get_mut(anchor) else {
            return;
        };
        seat.held = controls.iter().copied().collect();
        seat.aim = aim;
        if from_remote {
            seat.remote_age = Some(0.0);
        } else {
            seat.remote_age = None;
            seat.local = true;
        }
    }
}

impl PhysicsEntity for Vehicle {
    fn moving_collisions(&self) -> Vec<MovingCollision> {
        self.state
            .physics
            .moving_collisions(self.state.handle.id, self.position(), self.state.net.movement.velocity())
    }

    fn force_regions(&self) -> Vec<PhysicsForceRegion> {
        self.state.physics.force_regions(self.position())
    }
}

impl InteractiveEntity for Vehicle {
    fn is_interactive(&self) -> bool {
        *self.state.net.interactive.get()
    }

    /// Offer the enabled seat nearest the interacting entity
    fn interact(&mut self, _world: &mut World, request: &InteractRequest) -> InteractAction {
        let id = self.state.handle.id;
        let nearest = (0..self.lounge_anchor_count())
            .filter_map(|anchor| self.lounge_anchor(anchor).map(|p| (anchor, (p - request.source_position).length())))
            .min_by(|a, b| a.1.total_cmp(&b.1));
        match nearest {
            Some((anchor, _)) => InteractAction::new(InteractActionType::SitDown, id, json!(anchor)),
            None => InteractAction::none(),
        }
    }
}

impl ScriptedEntity for Vehicle {
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

    fn vehicle() -> Vehicle {
        let config = EntityConfig::new(
            "hoverbike",
            "/vehicles/hoverbike.vehicle",
            Arc::new(json!({
                "loungePositions": {
                    "drivingSeat": {"offset": [0.5, 1.0]},
                    "passengerSeat": {"offset": [-1.0, 1.0], "enabled": false}
                },
                "slaveControlTimeout": 1.0,
                "slaveControlHeartbeat": 0.5
            })),
            Json::Null,
        );
        Vehicle::new(config, Vec2F::new(10.0, 10.0)).unwrap()
    }

    #[test]
    fn test_seats_follow_the_body() {
        let v = vehicle();
        assert_eq!(v.lounge_anchor_count(), 2);
        assert_eq!(v.lounge_position_names().collect::<Vec<_>>(), vec!["drivingSeat", "passengerSeat"]);
        assert_eq!(v.lounge_anchor(0), Some(Vec2F::new(10.5, 11.0)));
        assert_eq!(v.lounge_anchor(1), None);
        assert_eq!(v.lounge_anchor(2), None);
    }

    #[test]
    fn test_remote_controls_time_out() {
        let mut v = vehicle();
        v.set_lounge_controls(0, &[LoungeControl::Right, LoungeControl::Jump], Vec2F::new(3.0, 4.0), true);
        assert!(v.control_held(0, LoungeControl::Jump));
        assert!(v.has_remote_rider());
        assert!(v.keep_alive());

        v.age_remote_controls(0.6);
        v.clear_local_controls();
        assert!(v.control_held(0, LoungeControl::Right));

        v.age_remote_controls(0.6);
        assert!(!v.control_held(0, LoungeControl::Right));
        assert!(!v.has_remote_rider());
    }

    #[test]
    fn test_local_controls_last_one_update() {
        let mut v = vehicle();
        v.set_lounge_controls(0, &[LoungeControl::Left], Vec2F::ZERO, false);
        assert!(v.control_held(0, LoungeControl::Left));
        assert!(!v.keep_alive());
        v.clear_local_controls();
        assert!(!v.control_held(0, LoungeControl::Left));
    }

    #[test]
    fn test_control_message_parsing() {
        let mut v = vehicle();
        let args = [json!(0), json!(["Up", "PrimaryFire"]), json!([1.0, 2.0])];
        assert_eq!(v.receive_controls(&args, true), Some(Json::Null));
        assert!(v.control_held(0, LoungeControl::PrimaryFire));
        assert_eq!(v.aim_position(0), Some(Vec2F::new(1.0, 2.0)));
        assert_eq!(v.receive_controls(&args[..2], true), None);
    }

    #[test]
    fn test_heartbeat_must_beat_timeout() {
        let config = EntityConfig::new(
            "cart",
            "/vehicles/cart.vehicle",
            Arc::new(json!({"slaveControlTimeout": 1.0, "slaveControlHeartbeat": 1.0})),
            Json::Null,
        );
        assert!(matches!(Vehicle::new(config, Vec2F::ZERO), Err(WorldError::InvalidConfig { .. })));
    }
}
