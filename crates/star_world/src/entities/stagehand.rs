//! Stagehands: invisible scripted entities that watch a region and run
//! events. They have a position and a broadcast area, nothing else.

use std::any::Any;
use std::cell::RefCell;

use serde_json::json;
use star_core::Json;
use star_math::{RectF, Vec2F};
use star_net::{NetCompatibilityRules, NetElementData, NetElementTop, NetResult};
use star_script::mlua::{self, Scope};
use star_script::{LuaCallbacks, ScriptComponent};

use super::{eval_entry, init_scripts, invoke_entry, invoke_json_entry, message_entry, update_entry};
use super::{EntityConfig, ScriptedState};
use crate::callbacks::with_cell;
use crate::entity::{ConnectionId, Entity, EntityHandle, EntityId, EntityMode, EntityType, ScriptedEntity};
use crate::error::Result;
use crate::world::World;

struct StagehandNetState {
    position: NetElementData<Vec2F>,
}
star_net::net_element_group!(StagehandNetState { position });

pub struct StagehandState {
    handle: EntityHandle,
    config: EntityConfig,
    broadcast_area: RectF,
    net: NetElementTop<StagehandNetState>,
    dead: bool,
}

impl ScriptedState for StagehandState {
    fn entity_id(&self) -> EntityId {
        self.handle.id
    }

    fn entity_type(&self) -> EntityType {
        EntityType::Stagehand
    }

    fn position(&self) -> Vec2F {
        *self.net.position.get()
    }

    fn config(&self) -> &EntityConfig {
        &self.config
    }

    fn register_callbacks<'scope, 'env, 's: 'env>(
        scope: &'scope Scope<'scope, 'env>,
        callbacks: &mut LuaCallbacks,
        state: &'env RefCell<&'s mut Self>,
    ) -> mlua::Result<()> {
        let mut reg = |name: &str, function: mlua::Function| callbacks.register("stagehand", name, function);
        reg("id", scope.create_function(move |_, ()| with_cell(state, |s| s.handle.id))?)?;
        reg("typeName", scope.create_function(move |_, ()| with_cell(state, |s| s.config.name().to_string()))?)?;
        reg("setPosition", scope.create_function(move |_, position: [f32; 2]| {
            with_cell(state, |s| s.net.position.set(Vec2F::from(position)))
        })?)?;
        reg("broadcastArea", scope.create_function(move |_, ()| {
            with_cell(state, |s| s.broadcast_area.translated(*s.net.position.get()).to_array())
        })?)?;
        reg("die", scope.create_function(move |_, ()| with_cell(state, |s| s.dead = true))?)?;
        Ok(())
    }
}

pub struct Stagehand {
    script: ScriptComponent,
    state: StagehandState,
}

impl Stagehand {
    /// `broadcastArea` is relative to the position and defaults to a
    /// 16 tile square around it
    pub fn new(config: EntityConfig, position: Vec2F) -> Result<Self> {
        let broadcast_area = config
            .parse::<[f32; 4]>("broadcastArea")?
            .map_or(RectF::from_coords(-8.0, -8.0, 8.0, 8.0), |[x0, y0, x1, y1]| {
                RectF::from_coords(x0, y0, x1, y1)
            });
        Ok(Self {
            script: ScriptComponent::new(config.name(), config.scripts(), config.script_delta()),
            state: StagehandState {
                handle: EntityHandle::default(),
                broadcast_area,
                net: NetElementTop::new(StagehandNetState {
                    position: NetElementData::new(position),
                }),
                dead: false,
                config,
            },
        })
    }

    pub fn type_name(&self) -> &str {
        self.state.config.name()
    }

    pub fn broadcast_area(&self) -> RectF {
        self.state.broadcast_area.translated(self.position())
    }
}

impl Entity for Stagehand {
    fn entity_type(&self) -> EntityType {
        EntityType::Stagehand
    }

    fn init(&mut self, world: &mut World, id: EntityId, mode: EntityMode) -> Result<()> {
        self.state.handle.bind(id, mode);
        if mode == EntityMode::Master && !self.script.scripts().is_empty() {
            init_scripts(&mut self.script, world, &mut self.state)?;
        }
        Ok(())
    }

    fn uninit(&mut self, world: &mut World) {
        if self.state.handle.is_master() {
            let _: Option<()> = invoke_entry(&mut self.script, world, &mut self.state, "uninit", ());
        }
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
        *self.state.net.position.get()
    }

    fn meta_bound_box(&self) -> RectF {
        self.state.broadcast_area
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
        if self.state.handle.is_master() {
            update_entry(&mut self.script, world, &mut self.state, dt);
        } else {
            self.state.net.tick_net_interpolation(dt);
        }
    }

    fn should_destroy(&self) -> bool {
        self.state.dead
    }

    fn write_net_state(&mut self, from_version: u64, rules: NetCompatibilityRules) -> (Vec<u8>, u64) {
        self.state.net.write_net_state(from_version, rules)
    }

    fn read_net_state(&mut self, data: &[u8], interpolation_time: f32, rules: NetCompatibilityRules) -> NetResult<()> {
        self.state.net.read_net_state(data, interpolation_time, rules)
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

impl ScriptedEntity for Stagehand {
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

    #[test]
    fn test_broadcast_area_follows_position() {
        let config = EntityConfig::new(
            "questtracker",
            "/stagehands/questtracker.stagehand",
            Arc::new(json!({"broadcastArea": [-2, -1, 2, 1]})),
            json!({"uniqueId": "tracker"}),
        );
        let stagehand = Stagehand::new(config, Vec2F::new(10.0, 20.0)).unwrap();
        assert_eq!(stagehand.broadcast_area(), RectF::from_coords(8.0, 19.0, 12.0, 21.0));
        assert_eq!(stagehand.unique_id().as_deref(), Some("tracker"));
        assert_eq!(stagehand.type_name(), "questtracker");
        assert!(!stagehand.persistent());
    }

    #[test]
    fn test_default_area() {
        let config = EntityConfig::new("s", "/s.stagehand", Arc::new(json!({})), Json::Null);
        let stagehand = Stagehand::new(config, Vec2F::ZERO).unwrap();
        assert_eq!(stagehand.meta_bound_box(), RectF::from_coords(-8.0, -8.0, 8.0, 8.0));
    }
}
