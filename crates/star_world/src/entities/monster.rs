//! Scripted monsters
//!
//! A monster is an [`ActorBody`] driven by its scripts and, when the config
//! has a `behavior` tree, by behavior actions dispatched to script
//! functions of the same name.

use std::any::Any;
use std::cell::RefCell;

use serde_json::json;
use star_ai::BehaviorTree;
use star_core::Json;
use star_math::{PolyF, RectF, Vec2F};
use star_net::{NetCompatibilityRules, NetElementBool, NetElementTop, NetResult};
use star_script::mlua::{self, Scope};
use star_script::{LuaCallbacks, ScriptComponent};

use super::actor::{register_actor, run_behavior, ActorBody, ActorState, ACTOR_SCRIPT_DELTA};
use super::{eval_entry, init_scripts, invoke_entry, invoke_json_entry, message_entry, update_entry};
use super::{EntityConfig, ScriptedState};
use crate::callbacks::with_cell;
use crate::damage::{DamageNotification, DamageRequest, DamageSource, EntityDamageTeam, HitType};
use crate::entity::{
    ConnectionId, DamageTarget, Entity, EntityHandle, EntityId, EntityMode, EntityType, ScriptedEntity,
};
use crate::error::{Result, WorldError};
use crate::world::World;

struct MonsterNetState {
    body: ActorBody,
    aggressive: NetElementBool,
}
star_net::net_element_group!(MonsterNetState { body, aggressive });

pub struct MonsterState {
    handle: EntityHandle,
    config: EntityConfig,
    level: f32,
    seed: u64,
    net: NetElementTop<MonsterNetState>,
}

impl ActorState for MonsterState {
    fn body(&self) -> &ActorBody {
        &self.net.body
    }

    fn body_mut(&mut self) -> &mut ActorBody {
        &mut self.net.body
    }
}

impl ScriptedState for MonsterState {
    fn entity_id(&self) -> EntityId {
        self.handle.id
    }

    fn entity_type(&self) -> EntityType {
        EntityType::Monster
    }

    fn position(&self) -> Vec2F {
        self.net.body.position()
    }

    fn config(&self) -> &EntityConfig {
        &self.config
    }

    fn register_callbacks<'scope, 'env, 's: 'env>(
        scope: &'scope Scope<'scope, 'env>,
        callbacks: &mut LuaCallbacks,
        state: &'env RefCell<&'s mut Self>,
    ) -> mlua::Result<()> {
        register_actor(scope, callbacks, state)?;
        let mut reg = |name: &str, function: mlua::Function| callbacks.register("monster", name, function);
        reg("type", scope.create_function(move |_, ()| with_cell(state, |s| s.config.name().to_string()))?)?;
        reg("level", scope.create_function(move |_, ()| with_cell(state, |s| s.level))?)?;
        reg("seed", scope.create_function(move |_, ()| with_cell(state, |s| s.seed.to_string()))?)?;
        reg("aggressive", scope.create_function(move |_, ()| with_cell(state, |s| *s.net.aggressive.get()))?)?;
        reg("setAggressive", scope.create_function(move |_, aggressive: bool| {
            with_cell(state, |s| s.net.aggressive.set(aggressive))
        })?)?;
        Ok(())
    }
}

pub struct Monster {
    script: ScriptComponent,
    behavior: Option<BehaviorTree>,
    state: MonsterState,
}

impl Monster {
    pub fn new(config: EntityConfig, position: Vec2F) -> Result<Self> {
        let body = ActorBody::from_config(&config, position)?;
        let behavior = config.get("behavior").map(BehaviorTree::from_json).transpose()?;
        let level = config.get_f32("level", 1.0);
        let seed = config.get("seed").and_then(Json::as_u64).unwrap_or(0);
        let aggressive = config.get_bool("aggressive", false);
        let script = ScriptComponent::new(config.name(), config.scripts(), config.script_delta_or(ACTOR_SCRIPT_DELTA));
        Ok(Self {
            script,
            behavior,
            state: MonsterState {
                handle: EntityHandle::default(),
                level,
                seed,
                net: NetElementTop::new(MonsterNetState {
                    body,
                    aggressive: NetElementBool::new(aggressive),
                }),
                config,
            },
        })
    }

    pub fn monster_type(&self) -> &str {
        self.state.config.name()
    }

    pub fn level(&self) -> f32 {
        self.state.level
    }

    pub fn aggressive(&self) -> bool {
        *self.state.net.aggressive.get()
    }

    pub fn body(&self) -> &ActorBody {
        &self.state.net.body
    }

    pub fn body_mut(&mut self) -> &mut ActorBody {
        &mut self.state.net.body
    }

    pub fn behavior(&self) -> Option<&BehaviorTree> {
        self.behavior.as_ref()
    }
}

impl Entity for Monster {
    fn entity_type(&self) -> EntityType {
        EntityType::Monster
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
        self.state.net.body.position()
    }

    fn meta_bound_box(&self) -> RectF {
        self.state.net.body.meta_bound_box()
    }

    fn team(&self) -> EntityDamageTeam {
        self.state.net.body.team()
    }

    fn persistent(&self) -> bool {
        self.state.config.get_bool("persistent", false)
    }

    fn keep_alive(&self) -> bool {
        self.state.config.get_bool("keepAlive", false)
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
            self.state.net.body.tick_slave(dt);
            return;
        }
        update_entry(&mut self.script, world, &mut self.state, dt);
        if let Some(tree) = self.behavior.as_mut() {
            run_behavior(tree, &mut self.script, world, &mut self.state, dt);
        }
        self.state.net.body.tick_master(world, dt);
    }

    fn should_destroy(&self) -> bool {
        self.state.net.body.status().dead()
    }

    fn destroy(&mut self, world: &mut World) {
        let _: Option<()> = invoke_entry(&mut self.script, world, &mut self.state, "die", ());
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
            "level": self.state.level,
            "seed": self.state.seed,
        })
    }

    fn receive_message(&mut self, world: &mut World, from: ConnectionId, name: &str, args: &[Json]) -> Option<Json> {
        let is_local = from == world.connection();
        message_entry(&mut self.script, world, &mut self.state, name, is_local, args)
    }

    fn damage_sources(&self) -> Vec<DamageSource> {
        if self.state.handle.is_master() {
            self.state.net.body.touch_damage(self.state.handle.id)
        } else {
            Vec::new()
        }
    }

    fn damaged_other(&mut self, world: &mut World, notification: &DamageNotification) {
        if let Ok(args) = serde_json::to_value(notification) {
            invoke_json_entry(&mut self.script, world, &mut self.state, "damagedOther", &[args]);
        }
    }

    fn as_damage_target(&self) -> Option<&dyn DamageTarget> {
        Some(self)
    }

    fn as_damage_target_mut(&mut self) -> Option<&mut dyn DamageTarget> {
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

impl DamageTarget for Monster {
    fn hit_poly(&self) -> Option<PolyF> {
        self.state.net.body.hit_poly()
    }

    fn query_hit(&self, source: &DamageSource) -> Option<HitType> {
        self.state.net.body.query_hit(source)
    }

    fn apply_damage(&mut self, world: &mut World, request: &DamageRequest) -> Vec<DamageNotification> {
        let id = self.state.handle.id;
        let notifications = self.state.net.body.apply_damage(id, request);
        for notification in &notifications {
            if let Ok(args) = serde_json::to_value(notification) {
                invoke_json_entry(&mut self.script, world, &mut self.state, "damage", &[args]);
            }
        }
        notifications
    }
}

impl ScriptedEntity for Monster {
    fn call_script(&mut self, world: &mut World, function: &str, args: &[Json]) -> Option<Json> {
        invoke_json_entry(&mut self.script, world, &mut self.state, function, args)
    }

    fn eval_script(&mut self, world: &mut World, code: &str) -> Result<Json> {
        eval_entry(&mut self.script, world, &mut self.state, code)
    }
}

/// Monster level and seed come from spawn arguments as well as parameters
pub(crate) fn monster_parameters(parameters: &Json, level: Option<f32>, seed: Option<u64>) -> Result<Json> {
    let mut parameters = match parameters {
        Json::Null => Json::Object(Default::default()),
        Json::Object(_) => parameters.clone(),
        _ => return Err(WorldError::InvalidSpawn("monster parameters must be an object".into())),
    };
    if let Some(object) = parameters.as_object_mut() {
        if let Some(level) = level {
            object.insert("level".into(), json!(level));
        }
        if let Some(seed) = seed {
            object.insert("seed".into(), json!(seed));
        }
    }
    Ok(parameters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn monster(config: Json, parameters: Json) -> Monster {
        let config = EntityConfig::new("gleap", "/monsters/gleap.monstertype", Arc::new(config), parameters);
        Monster::new(config, Vec2F::new(5.0, 5.0)).unwrap()
    }

    #[test]
    fn test_spawn_store_carries_level() {
        let parameters = monster_parameters(&Json::Null, Some(3.0), Some(42)).unwrap();
        let m = monster(json!({"aggressive": true}), parameters);
        assert_eq!(m.level(), 3.0);
        assert!(m.aggressive());
        let store = m.store_spawn();
        assert_eq!(store["name"], json!("gleap"));
        assert_eq!(store["seed"], json!(42));
        assert_eq!(store["position"], json!([5.0, 5.0]));
    }

    #[test]
    fn test_bad_behavior_is_rejected() {
        let config = EntityConfig::new(
            "gleap",
            "/monsters/gleap.monstertype",
            Arc::new(json!({"behavior": {"type": "composite", "name": "nonsense"}})),
            Json::Null,
        );
        assert!(matches!(Monster::new(config, Vec2F::ZERO), Err(WorldError::Ai(_))));
    }

    #[test]
    fn test_parameters_must_be_object() {
        assert!(monster_parameters(&json!([1, 2]), None, None).is_err());
    }
}
