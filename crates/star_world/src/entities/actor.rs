//! Shared body for walking, scripted actors
//!
//! Monsters, NPCs and players all carry an [`ActorBody`]: an actor movement
//! controller, a status controller and a damage team, replicated as one
//! group. Scripts drive it through the `mcontroller` and `status` tables.

use std::cell::RefCell;
use std::collections::HashMap;
use std::mem;

use serde_json::json;
use star_ai::{BehaviorContext, BehaviorStatus, BehaviorTree, Blackboard, PathController, PathFinderParameters};
use star_core::Json;
use star_math::{PolyF, RectF, Vec2F};
use star_net::NetElementData;
use star_physics::{ActorMovementController, ActorMovementModifiers, ActorMovementParameters, Direction};
use star_script::mlua::{self, Scope, Value};
use star_script::{json_to_lua, lua_to_json, LuaCallbacks, ScriptComponent};

use super::{invoke_json_entry, EntityConfig, ScriptedState};
use crate::callbacks::{runtime, with_cell};
use crate::damage::{DamageNotification, DamageRequest, DamageSource, DamageSourceConfig, EntityDamageTeam, HitType, TeamType};
use crate::entity::EntityId;
use crate::error::Result;
use crate::status::{StatusController, StatusSettings};
use crate::world::World;

/// Actors run their scripts every tick unless configured otherwise, since
/// movement controls only last one tick
pub const ACTOR_SCRIPT_DELTA: u32 = 1;

pub struct ActorBody {
    movement: ActorMovementController,
    status: StatusController,
    team: NetElementData<(TeamType, u32)>,

    path: PathController,
    /// Target and run flag from this tick's `controlPathMove`
    path_request: Option<(Vec2F, bool)>,
    path_result: Option<bool>,
    /// Effects scripts or damage asked for, applied on the next tick
    pending_effects: Vec<(String, Option<f32>)>,
    touch_damage: Option<DamageSourceConfig>,
}
star_net::net_element_group!(ActorBody { movement, status, team });

impl ActorBody {
    /// Read `movementSettings`, `statusSettings`, `damageTeam`,
    /// `touchDamage` and `pathFinder`
    pub fn from_config(config: &EntityConfig, position: Vec2F) -> Result<Self> {
        let parameters = match config.get("movementSettings") {
            Some(json) => ActorMovementParameters::from_json(json)?,
            None => ActorMovementParameters::default(),
        };
        let status = StatusSettings::from_json(&config.get_or("statusSettings", Json::Null))?;
        let team: EntityDamageTeam = config.parse("damageTeam")?.unwrap_or_default();
        let path_parameters: PathFinderParameters = config.parse("pathFinder")?.unwrap_or_default();

        let mut movement = ActorMovementController::new(parameters);
        movement.set_position(position);
        Ok(Self {
            movement,
            status: StatusController::new(&status),
            team: NetElementData::new((team.kind, team.team as u32)),
            path: PathController::new(path_parameters),
            path_request: None,
            path_result: None,
            pending_effects: Vec::new(),
            touch_damage: config.parse("touchDamage")?,
        })
    }

    #[inline]
    pub fn movement(&self) -> &ActorMovementController {
        &self.movement
    }

    #[inline]
    pub fn movement_mut(&mut self) -> &mut ActorMovementController {
        &mut self.movement
    }

    #[inline]
    pub fn status(&self) -> &StatusController {
        &self.status
    }

    #[inline]
    pub fn status_mut(&mut self) -> &mut StatusController {
        &mut self.status
    }

    pub fn position(&self) -> Vec2F {
        self.movement.position()
    }

    pub fn team(&self) -> EntityDamageTeam {
        let (kind, team) = *self.team.get();
        EntityDamageTeam::new(kind, team as u16)
    }

    pub fn set_team(&mut self, team: EntityDamageTeam) {
        self.team.set((team.kind, team.team as u32));
    }

    /// Collision poly bounds, relative to the position
    pub fn meta_bound_box(&self) -> RectF {
        self.movement.movement().collision_poly().bound_box()
    }

    pub fn add_effect(&mut self, name: impl Into<String>, duration: Option<f32>) {
        self.pending_effects.push((name.into(), duration));
    }

    /// Last answer of the path controller; `None` while still searching
    pub fn path_result(&self) -> Option<bool> {
        self.path_result
    }

    fn request_path_move(&mut self, target: Vec2F, run: bool) -> Option<bool> {
        if self.path.target().map_or(true, |t| t != target) {
            self.path_result = None;
        }
        self.path_request = Some((target, run));
        self.path_result
    }

    /// Apply queued effects, path following and physics for one tick
    pub fn tick_master(&mut self, world: &World, dt: f32) {
        for (name, duration) in mem::take(&mut self.pending_effects) {
            match world.resources().status_effects().get(&name) {
                Some(config) => self.status.add_effect(config, duration),
                None => log::warn!("unknown status effect '{}'", name),
            }
        }
        let modifiers = self.status.movement_modifiers();
        self.movement.control_modifiers(&modifiers);
        if let Some((target, run)) = self.path_request.take() {
            self.path_result = self.path.control_path_move(&mut self.movement, world, target, run, dt);
        }
        self.movement.tick_master(dt, world);
        self.status.tick_master(dt);
    }

    pub fn tick_slave(&mut self, dt: f32) {
        self.movement.tick_slave(dt);
        self.status.tick_slave(dt);
    }

    pub fn hit_poly(&self) -> Option<PolyF> {
        if self.status.dead() {
            None
        } else {
            Some(self.movement.movement().collision_body())
        }
    }

    pub fn query_hit(&self, _source: &DamageSource) -> Option<HitType> {
        if self.status.dead() {
            None
        } else {
            Some(HitType::Hit)
        }
    }

    pub fn apply_damage(&mut self, id: EntityId, request: &DamageRequest) -> Vec<DamageNotification> {
        let outcome = self.status.apply_damage(request);
        if request.knockback_momentum.length() > 0.0 {
            self.movement.movement_mut().add_momentum(request.knockback_momentum);
        }
        for effect in &request.status_effects {
            self.pending_effects.push((effect.clone(), None));
        }
        vec![DamageNotification {
            source_entity_id: request.source_entity_id,
            target_entity_id: id,
            position: self.position(),
            damage_dealt: outcome.damage_dealt,
            health_lost: outcome.health_lost,
            hit_type: if outcome.killed { HitType::Kill } else { request.hit_type },
            damage_source_kind: request.damage_source_kind.clone(),
        }]
    }

    /// Touch damage from the config, while alive
    pub fn touch_damage(&self, id: EntityId) -> Vec<DamageSource> {
        match &self.touch_damage {
            Some(config) if !self.status.dead() => {
                let mut source = config.at(self.position(), id, self.team());
                source.repeat_group = Some(format!("touch{}", id));
                vec![source]
            }
            _ => Vec::new(),
        }
    }
}

/// Dispatches behavior actions to script functions. An action function gets
/// its resolved parameters and `dt`, and answers `true`, `false`, a status
/// name, or nil to keep running.
struct ScriptBehavior<'a, S> {
    script: &'a mut ScriptComponent,
    world: &'a mut World,
    state: &'a mut S,
}

impl<S: ScriptedState> BehaviorContext for ScriptBehavior<'_, S> {
    fn run_action(
        &mut self,
        name: &str,
        parameters: &HashMap<String, Json>,
        blackboard: &mut Blackboard,
        dt: f32,
    ) -> BehaviorStatus {
        let exists = self.script.context().map_or(false, |c| c.contains_function(name));
        if !exists {
            log::debug!(
                "{} {}: no behavior action '{}'",
                self.state.entity_type().name(),
                self.state.entity_id(),
                name
            );
            return BehaviorStatus::Failure;
        }
        let args: serde_json::Map<String, Json> = parameters
            .iter()
            .map(|(key, value)| (key.clone(), blackboard.resolve(value)))
            .collect();
        let result = invoke_json_entry(self.script, self.world, self.state, name, &[Json::Object(args), json!(dt)]);
        match result {
            None | Some(Json::Null) => BehaviorStatus::Running,
            Some(Json::Bool(true)) => BehaviorStatus::Success,
            Some(Json::Bool(false)) => BehaviorStatus::Failure,
            Some(other) => serde_json::from_value(other).unwrap_or(BehaviorStatus::Failure),
        }
    }
}

/// Tick a behavior tree against the entity's scripts
pub(crate) fn run_behavior<S: ScriptedState>(
    tree: &mut BehaviorTree,
    script: &mut ScriptComponent,
    world: &mut World,
    state: &mut S,
    dt: f32,
) -> BehaviorStatus {
    if !script.is_running() {
        return BehaviorStatus::Failure;
    }
    let mut context = ScriptBehavior { script, world, state };
    tree.run(&mut context, dt)
}

/// Script-visible state of an entity built around an [`ActorBody`]
pub trait ActorState: ScriptedState {
    fn body(&self) -> &ActorBody;

    fn body_mut(&mut self) -> &mut ActorBody;
}

fn with_body<S: ActorState, R>(state: &RefCell<&mut S>, f: impl FnOnce(&mut ActorBody) -> R) -> mlua::Result<R> {
    with_cell(state, |s| f(s.body_mut()))
}

fn direction(value: f32) -> mlua::Result<Direction> {
    Direction::from_sign(value).ok_or_else(|| runtime("direction must be -1 or 1"))
}

/// Install the `mcontroller` and `status` tables
pub fn register_actor<'scope, 'env, 's: 'env, S: ActorState>(
    scope: &'scope Scope<'scope, 'env>,
    callbacks: &mut LuaCallbacks,
    state: &'env RefCell<&'s mut S>,
) -> mlua::Result<()> {
    register_mcontroller(scope, callbacks, state)?;
    register_status(scope, callbacks, state)
}

fn register_mcontroller<'scope, 'env, 's: 'env, S: ActorState>(
    scope: &'scope Scope<'scope, 'env>,
    callbacks: &mut LuaCallbacks,
    state: &'env RefCell<&'s mut S>,
) -> mlua::Result<()> {
    let mut reg = |name: &str, function: mlua::Function| callbacks.register("mcontroller", name, function);

    reg("position", scope.create_function(move |_, ()| with_body(state, |b| b.movement.position().to_array()))?)?;
    reg("setPosition", scope.create_function(move |_, pos: [f32; 2]| {
        with_body(state, |b| b.movement.set_position(Vec2F::from(pos)))
    })?)?;
    reg("velocity", scope.create_function(move |_, ()| with_body(state, |b| b.movement.velocity().to_array()))?)?;
    reg("xVelocity", scope.create_function(move |_, ()| with_body(state, |b| b.movement.velocity().x))?)?;
    reg("yVelocity", scope.create_function(move |_, ()| with_body(state, |b| b.movement.velocity().y))?)?;
    reg("setVelocity", scope.create_function(move |_, v: [f32; 2]| {
        with_body(state, |b| b.movement.set_velocity(Vec2F::from(v)))
    })?)?;
    reg("addMomentum", scope.create_function(move |_, m: [f32; 2]| {
        with_body(state, |b| b.movement.movement_mut().add_momentum(Vec2F::from(m)))
    })?)?;
    reg("mass", scope.create_function(move |_, ()| with_body(state, |b| b.movement.movement().mass()))?)?;
    reg("boundBox", scope.create_function(move |_, ()| with_body(state, |b| b.meta_bound_box().to_array()))?)?;
    reg("onGround", scope.create_function(move |_, ()| with_body(state, |b| b.movement.on_ground()))?)?;
    reg("isColliding", scope.create_function(move |_, ()| with_body(state, |b| b.movement.movement().is_colliding()))?)?;
    reg("liquidPercentage", scope.create_function(move |_, ()| {
        with_body(state, |b| b.movement.movement().liquid_percentage())
    })?)?;
    reg("facingDirection", scope.create_function(move |_, ()| with_body(state, |b| b.movement.facing().numerical()))?)?;
    reg("moving", scope.create_function(move |_, ()| with_body(state, |b| b.movement.moving()))?)?;
    reg("walking", scope.create_function(move |_, ()| with_body(state, |b| b.movement.walking()))?)?;
    reg("running", scope.create_function(move |_, ()| with_body(state, |b| b.movement.running()))?)?;
    reg("crouching", scope.create_function(move |_, ()| with_body(state, |b| b.movement.crouching()))?)?;
    reg("flying", scope.create_function(move |_, ()| with_body(state, |b| b.movement.flying()))?)?;
    reg("falling", scope.create_function(move |_, ()| with_body(state, |b| b.movement.falling()))?)?;
    reg("jumping", scope.create_function(move |_, ()| with_body(state, |b| b.movement.jumping()))?)?;
    reg("canJump", scope.create_function(move |_, ()| with_body(state, |b| b.movement.can_jump()))?)?;

    reg("controlMove", scope.create_function(move |_, (dir, run): (f32, Option<bool>)| {
        let dir = direction(dir)?;
        with_body(state, |b| b.movement.control_move(dir, run.unwrap_or(false)))
    })?)?;
    reg("controlFace", scope.create_function(move |_, dir: f32| {
        let dir = direction(dir)?;
        with_body(state, |b| b.movement.control_face(dir))
    })?)?;
    reg("controlCrouch", scope.create_function(move |_, ()| with_body(state, |b| b.movement.control_crouch()))?)?;
    reg("controlDown", scope.create_function(move |_, ()| with_body(state, |b| b.movement.control_down()))?)?;
    reg("controlJump", scope.create_function(move |_, ()| with_body(state, |b| b.movement.control_jump()))?)?;
    reg("controlFly", scope.create_function(move |_, v: [f32; 2]| {
        with_body(state, |b| b.movement.control_fly(Vec2F::from(v)))
    })?)?;
    reg("controlApproachVelocity", scope.create_function(move |_, (v, force): ([f32; 2], f32)| {
        with_body(state, |b| b.movement.control_approach_velocity(Vec2F::from(v), force))
    })?)?;
    reg("controlApproachXVelocity", scope.create_function(move |_, (x, force): (f32, f32)| {
        with_body(state, |b| b.movement.control_approach_x_velocity(x, force))
    })?)?;
    reg("controlApproachYVelocity", scope.create_function(move |_, (y, force): (f32, f32)| {
        with_body(state, |b| b.movement.control_approach_y_velocity(y, force))
    })?)?;
    reg("controlForce", scope.create_function(move |_, f: [f32; 2]| {
        with_body(state, |b| b.movement.control_force(Vec2F::from(f)))
    })?)?;
    reg("controlParameters", scope.create_function(move |lua, table: Value| {
        let json = lua_to_json(lua, table)?;
        let parameters = ActorMovementParameters::from_json(&json).map_err(|e| runtime(e.to_string()))?;
        with_body(state, |b| b.movement.control_parameters(&parameters))
    })?)?;
    reg("controlModifiers", scope.create_function(move |lua, table: Value| {
        let json = lua_to_json(lua, table)?;
        let modifiers: ActorMovementModifiers = serde_json::from_value(json).map_err(|e| runtime(e.to_string()))?;
        with_body(state, |b| b.movement.control_modifiers(&modifiers))
    })?)?;
    reg("clearControls", scope.create_function(move |_, ()| with_body(state, |b| b.movement.clear_controls()))?)?;
    reg("baseParameters", scope.create_function(move |lua, ()| {
        let json = with_body(state, |b| b.movement.base_parameters().to_json())?;
        json_to_lua(lua, &json)
    })?)?;
    reg("controlPathMove", scope.create_function(move |_, (target, run): ([f32; 2], Option<bool>)| {
        with_body(state, |b| b.request_path_move(Vec2F::from(target), run.unwrap_or(false)))
    })?)?;
    reg("pathfinding", scope.create_function(move |_, ()| {
        with_body(state, |b| b.path.target().is_some() && b.path_result.is_none())
    })?)?;
    Ok(())
}

fn health_only(resource: &str) -> mlua::Result<()> {
    if resource == "health" {
        Ok(())
    } else {
        Err(runtime(format!("unknown resource '{}'", resource)))
    }
}

fn register_status<'scope, 'env, 's: 'env, S: ActorState>(
    scope: &'scope Scope<'scope, 'env>,
    callbacks: &mut LuaCallbacks,
    state: &'env RefCell<&'s mut S>,
) -> mlua::Result<()> {
    let mut reg = |name: &str, function: mlua::Function| callbacks.register("status", name, function);

    reg("resource", scope.create_function(move |_, name: String| {
        health_only(&name)?;
        with_body(state, |b| b.status.health())
    })?)?;
    reg("resourceMax", scope.create_function(move |_, name: String| {
        health_only(&name)?;
        with_body(state, |b| b.status.max_health())
    })?)?;
    reg("resourcePercentage", scope.create_function(move |_, name: String| {
        health_only(&name)?;
        with_body(state, |b| b.status.health_percentage())
    })?)?;
    reg("setResource", scope.create_function(move |_, (name, value): (String, f32)| {
        health_only(&name)?;
        with_body(state, |b| b.status.set_health(value))
    })?)?;
    reg("modifyResource", scope.create_function(move |_, (name, delta): (String, f32)| {
        health_only(&name)?;
        with_body(state, |b| b.status.heal(delta))
    })?)?;
    reg("stat", scope.create_function(move |_, name: String| with_body(state, |b| b.status.stat(&name)))?)?;
    reg("setStat", scope.create_function(move |_, (name, value): (String, f32)| {
        with_body(state, |b| b.status.set_base_stat(&name, value))
    })?)?;
    reg("dead", scope.create_function(move |_, ()| with_body(state, |b| b.status.dead()))?)?;
    reg("addEphemeralEffect", scope.create_function(move |_, (name, duration): (String, Option<f32>)| {
        with_body(state, |b| b.add_effect(name, duration))
    })?)?;
    reg("removeEphemeralEffect", scope.create_function(move |_, name: String| {
        with_body(state, |b| b.status.remove_effect(&name))
    })?)?;
    reg("uniqueStatusEffectActive", scope.create_function(move |_, name: String| {
        with_body(state, |b| b.status.has_effect(&name))
    })?)?;
    reg("activeUniqueStatusEffectSummary", scope.create_function(move |lua, ()| {
        let effects = with_body(state, |b| b.status.active_effects())?;
        let summary: Vec<Json> = effects
            .into_iter()
            .map(|(name, remaining)| {
                let remaining = if remaining.is_finite() { Json::from(remaining) } else { Json::Null };
                Json::Array(vec![Json::String(name), remaining])
            })
            .collect();
        json_to_lua(lua, &Json::Array(summary))
    })?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::damage::DamageType;
    use serde_json::json;
    use std::sync::Arc;

    fn body(config: Json) -> ActorBody {
        let config = EntityConfig::new("poptop", "/monsters/poptop.monstertype", Arc::new(config), Json::Null);
        ActorBody::from_config(&config, Vec2F::new(10.0, 20.0)).unwrap()
    }

    fn request(damage: f32) -> DamageRequest {
        DamageRequest {
            hit_type: HitType::Hit,
            damage_type: DamageType::Damage,
            damage,
            knockback_momentum: Vec2F::new(5.0, 0.0),
            source_entity_id: 3,
            damage_source_kind: "slash".into(),
            status_effects: vec!["burning".into()],
        }
    }

    #[test]
    fn test_config_sets_team_and_health() {
        let body = body(json!({
            "damageTeam": {"type": "enemy", "team": 2},
            "statusSettings": {"stats": {"maxHealth": 40.0}}
        }));
        assert_eq!(body.team(), EntityDamageTeam::new(TeamType::Enemy, 2));
        assert_eq!(body.status().max_health(), 40.0);
        assert_eq!(body.position(), Vec2F::new(10.0, 20.0));
    }

    #[test]
    fn test_lethal_damage_reports_kill() {
        let mut body = body(json!({"statusSettings": {"stats": {"maxHealth": 10.0}}}));
        let notes = body.apply_damage(7, &request(4.0));
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].hit_type, HitType::Hit);
        assert_eq!(notes[0].target_entity_id, 7);
        assert_eq!(body.pending_effects, vec![("burning".to_string(), None)]);

        let notes = body.apply_damage(7, &request(50.0));
        assert_eq!(notes[0].hit_type, HitType::Kill);
        assert_eq!(notes[0].health_lost, 6.0);
        assert!(body.hit_poly().is_none());
    }

    #[test]
    fn test_touch_damage_carries_team() {
        let body = body(json!({
            "damageTeam": {"type": "enemy"},
            "touchDamage": {"damage": 5.0, "poly": [[-1, -1], [1, -1], [1, 1], [-1, 1]]}
        }));
        let sources = body.touch_damage(9);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].team.kind, TeamType::Enemy);
        assert_eq!(sources[0].source_entity_id, 9);
        assert_eq!(sources[0].repeat_key(), "touch9");
    }

    #[test]
    fn test_path_request_resets_on_new_target() {
        let mut body = body(json!({}));
        body.path_result = Some(true);
        assert_eq!(body.request_path_move(Vec2F::new(1.0, 1.0), false), None);
        assert_eq!(body.path_request, Some((Vec2F::new(1.0, 1.0), false)));
    }
}
