//! Scripted NPCs
//!
//! Like monsters, but built from an `.npctype` plus a species, and able to
//! answer interactions through the script's `interact` function.

use std::any::Any;
use std::cell::RefCell;

use serde_json::json;
use star_ai::BehaviorTree;
use star_core::Json;
use star_math::{PolyF, RectF, Vec2F};
use star_net::{NetCompatibilityRules, NetElementBool, NetElementString, NetElementTop, NetResult};
use star_script::mlua::{self, Scope, Value};
use star_script::{lua_to_json, LuaCallbacks, ScriptComponent};

use super::actor::{register_actor, run_behavior, ActorBody, ActorState, ACTOR_SCRIPT_DELTA};
use super::{eval_entry, init_scripts, invoke_entry, invoke_json_entry, message_entry, update_entry};
use super::{EntityConfig, ScriptedState};
use crate::callbacks::{runtime, with_cell};
use crate::damage::{DamageNotification, DamageRequest, DamageSource, EntityDamageTeam, HitType};
use crate::entity::{
    ConnectionId, DamageTarget, Entity, EntityHandle, EntityId, EntityMode, EntityType, InteractiveEntity,
    ScriptedEntity,
};
use crate::error::{Result, WorldError};
use crate::interaction::{InteractAction, InteractRequest};
use crate::world::World;

struct NpcNetState {
    body: ActorBody,
    species: NetElementString,
    interactive: NetElementBool,
}
star_net::net_element_group!(NpcNetState {
    body,
    species,
    interactive
});

pub struct NpcState {
    handle: EntityHandle,
    config: EntityConfig,
    level: f32,
    seed: u64,
    net: NetElementTop<NpcNetState>,
}

impl ActorState for NpcState {
    fn body(&self) -> &ActorBody {
        &self.net.body
    }

    fn body_mut(&mut self) -> &mut ActorBody {
        &mut self.net.body
    }
}

impl ScriptedState for NpcState {
    fn entity_id(&self) -> EntityId {
        self.handle.id
    }

    fn entity_type(&self) -> EntityType {
        EntityType::Npc
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
        let mut reg = |name: &str, function: mlua::Function| callbacks.register("npc", name, function);
        reg("npcType", scope.create_function(move |_, ()| with_cell(state, |s| s.config.name().to_string()))?)?;
        reg("species", scope.create_function(move |_, ()| with_cell(state, |s| s.net.species.get().clone()))?)?;
        reg("level", scope.create_function(move |_, ()| with_cell(state, |s| s.level))?)?;
        reg("seed", scope.create_function(move |_, ()| with_cell(state, |s| s.seed.to_string()))?)?;
        reg("setInteractive", scope.create_function(move |_, interactive: bool| {
            with_cell(state, |s| s.net.interactive.set(interactive))
        })?)?;
        reg("setDamageTeam", scope.create_function(move |lua, team: Value| {
            let team: EntityDamageTeam =
                serde_json::from_value(lua_to_json(lua, team)?).map_err(|e| runtime(e.to_string()))?;
            with_cell(state, |s| s.net.body.set_team(team))
        })?)?;
        Ok(())
    }
}

pub struct Npc {
    script: ScriptComponent,
    behavior: Option<BehaviorTree>,
    state: NpcState,
}

impl Npc {
    /// `species` comes from the parameters; an NPC without one cannot spawn
    pub fn new(config: EntityConfig, position: Vec2F) -> Result<Self> {
        let species = config
            .get_str("species")
            .map(str::to_string)
            .ok_or_else(|| WorldError::InvalidSpawn(format!("npc '{}' has no species", config.name())))?;
        let body = ActorBody::from_config(&config, position)?;
        let behavior = config.get("behavior").map(BehaviorTree::from_json).transpose()?;
        let level = config.get_f32("level", 1.0);
        let seed = config.get("seed").and_then(Json::as_u64).unwrap_or(0);
        let interactive = config.get_bool("interactive", true);
        let script = ScriptComponent::new(config.name(), config.scripts(), config.script_delta_or(ACTOR_SCRIPT_DELTA));
        Ok(Self {
            script,
            behavior,
            state: NpcState {
                handle: EntityHandle::default(),
                level,
                seed,
                net: NetElementTop::new(NpcNetState {
                    body,
                    species: NetElementString::new(species),
                    interactive: NetElementBool::new(interactive),
                }),
                config,
            },
        })
    }

    pub fn npc_type(&self) -> &str {
        self.state.config.name()
    }

    pub fn species(&self) -> &str {
        self.state.net.species.get()
    }

    pub fn level(&self) -> f32 {
        self.state.level
    }

    pub fn body(&self) -> &ActorBody {
        &self.state.net.body
    }

    pub fn body_mut(&mut self) -> &mut ActorBody {
        &mut self.state.net.body
    }
}

impl Entity for Npc {
    fn entity_type(&self) -> EntityType {
        EntityType::Npc
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
        self.state.config.get_bool("persistent", true)
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
            "species": self.species(),
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

    fn as_interactive_mut(&mut self) -> Option<&mut dyn InteractiveEntity> {
        Some(self)
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

impl DamageTarget for Npc {
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

impl InteractiveEntity for Npc {
    fn is_interactive(&self) -> bool {
        *self.state.net.interactive.get()
    }

    fn interact(&mut self, world: &mut World, request: &InteractRequest) -> InteractAction {
        let id = self.state.handle.id;
        let args = json!({
            "sourceId": request.source_id,
            "sourcePosition": request.source_position.to_array(),
        });
        invoke_json_entry(&mut self.script, world, &mut self.state, "interact", &[args])
            .map_or_else(InteractAction::none, |result| InteractAction::from_script_result(&result, id))
    }
}

impl ScriptedEntity for Npc {
    fn call_script(&mut self, world: &mut World, function: &str, args: &[Json]) -> Option<Json> {
        invoke_json_entry(&mut self.script, world, &mut self.state, function, args)
    }

    fn eval_script(&mut self, world: &mut World, code: &str) -> Result<Json> {
        eval_entry(&mut self.script, world, &mut self.state, code)
    }
}
