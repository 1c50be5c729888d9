//! Concrete entity kinds
//!
//! Each kind is built by the [`EntityFactory`](crate::factory::EntityFactory)
//! from an asset config plus instance parameters, and rebuilt on peers from
//! its `store_spawn` JSON.

pub mod actor;
pub mod item_drop;
pub mod monster;
pub mod npc;
pub mod object;
pub mod player;
pub mod projectile;
pub mod stagehand;
pub mod vehicle;

use std::cell::RefCell;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use star_asset::AssetPath;
use star_core::json::{json_merge, json_query};
use star_core::Json;
use star_math::Vec2F;
use star_script::mlua::{self, FromLuaMulti, IntoLuaMulti, MultiValue, Scope};
use star_script::{first_json, json_args, LuaCallbacks, ScriptComponent};

use crate::callbacks::{register_entity, register_world};
use crate::entity::{EntityId, EntityType};
use crate::error::{Result, WorldError};
use crate::world::World;

pub use actor::ActorBody;
pub use item_drop::ItemDrop;
pub use monster::Monster;
pub use npc::Npc;
pub use object::Object;
pub use player::Player;
pub use projectile::Projectile;
pub use stagehand::Stagehand;
pub use vehicle::Vehicle;

/// Ticks between script updates when a config does not say
pub const DEFAULT_SCRIPT_DELTA: u32 = 5;

/// A config asset plus the parameters one instance was spawned with.
/// Lookups check the parameters first, as `config.getParameter` does.
#[derive(Debug, Clone)]
pub struct EntityConfig {
    name: String,
    path: String,
    config: Arc<Json>,
    parameters: Json,
}

impl EntityConfig {
    pub fn new(name: impl Into<String>, path: impl Into<String>, config: Arc<Json>, parameters: Json) -> Self {
        let parameters = if parameters.is_object() {
            parameters
        } else {
            Json::Object(Default::default())
        };
        Self {
            name: name.into(),
            path: path.into(),
            config,
            parameters,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Asset path the config was read from
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    pub fn parameters(&self) -> &Json {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut Json {
        &mut self.parameters
    }

    pub fn get(&self, path: &str) -> Option<&Json> {
        json_query(&self.parameters, path)
            .or_else(|| json_query(&self.config, path))
            .filter(|v| !v.is_null())
    }

    pub fn get_or(&self, path: &str, default: Json) -> Json {
        self.get(path).cloned().unwrap_or(default)
    }

    pub fn get_f32(&self, path: &str, default: f32) -> f32 {
        self.get(path).and_then(Json::as_f64).map_or(default, |v| v as f32)
    }

    pub fn get_bool(&self, path: &str, default: bool) -> bool {
        self.get(path).and_then(Json::as_bool).unwrap_or(default)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Json::as_str)
    }

    /// Deserialize one key, `None` when absent
    pub fn parse<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            Some(value) => T::deserialize(value).map(Some).map_err(|e| WorldError::InvalidConfig {
                kind: "entity",
                name: self.name.clone(),
                reason: format!("{}: {}", key, e),
            }),
            None => Ok(None),
        }
    }

    /// Config with the parameters merged over it
    pub fn merged(&self) -> Json {
        json_merge(&self.config, &self.parameters)
    }

    /// `scripts`, resolved against the config's directory
    pub fn scripts(&self) -> Vec<String> {
        self.get("scripts")
            .and_then(Json::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Json::as_str)
                    .map(|s| AssetPath::relative_to(&self.path, s))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn script_delta(&self) -> u32 {
        self.script_delta_or(DEFAULT_SCRIPT_DELTA)
    }

    pub fn script_delta_or(&self, default: u32) -> u32 {
        self.get("scriptDelta").and_then(Json::as_u64).map_or(default, |d| d as u32)
    }

    pub fn unique_id(&self) -> Option<String> {
        self.get_str("uniqueId").map(str::to_string)
    }
}

/// The part of a scripted entity its script tables can see. Kept apart
/// from the entity's [`ScriptComponent`] so a running script can borrow it.
pub trait ScriptedState {
    fn entity_id(&self) -> EntityId;

    fn entity_type(&self) -> EntityType;

    fn position(&self) -> Vec2F;

    fn config(&self) -> &EntityConfig;

    /// Install the kind's own tables, such as `object` or `monster`
    fn register_callbacks<'scope, 'env, 's: 'env>(
        scope: &'scope Scope<'scope, 'env>,
        callbacks: &mut LuaCallbacks,
        state: &'env RefCell<&'s mut Self>,
    ) -> mlua::Result<()>
    where
        Self: Sized;
}

/// Create the script context and run `init` with every table in scope
pub(crate) fn init_scripts<S: ScriptedState>(script: &mut ScriptComponent, world: &mut World, state: &mut S) -> Result<()> {
    let resources = world.resources().clone();
    script.set_label(format!("{} {}", state.entity_type().name(), state.entity_id()));
    script.init(resources.lua(), |_| Ok(()))?;
    let _: Option<()> = invoke_entry(script, world, state, "init", ());
    Ok(())
}

/// Call a script function with the `world`, `entity`, `config` and kind
/// tables in scope. `None` when the function is missing or failed.
pub(crate) fn invoke_entry<S, A, R>(
    script: &mut ScriptComponent,
    world: &mut World,
    state: &mut S,
    name: &str,
    args: A,
) -> Option<R>
where
    S: ScriptedState,
    A: IntoLuaMulti,
    R: FromLuaMulti,
{
    let id = state.entity_id();
    let world = RefCell::new(world);
    let state = RefCell::new(state);
    script.invoke_with(name, args, |scope, callbacks| {
        register_world(scope, callbacks, &world, id)?;
        register_entity(scope, callbacks, &state)?;
        S::register_callbacks(scope, callbacks, &state)
    })
}

/// [`invoke_entry`] with JSON arguments and result
pub(crate) fn invoke_json_entry<S: ScriptedState>(
    script: &mut ScriptComponent,
    world: &mut World,
    state: &mut S,
    name: &str,
    args: &[Json],
) -> Option<Json> {
    let lua = script.context()?.lua().clone();
    let args = match json_args(&lua, args) {
        Ok(args) => args,
        Err(e) => {
            log::error!("{} {}: bad arguments for '{}': {}", state.entity_type().name(), state.entity_id(), name, e);
            return None;
        }
    };
    let values: MultiValue = invoke_entry(script, world, state, name, args)?;
    match first_json(&lua, values) {
        Ok(result) => result,
        Err(e) => {
            log::error!("{} {}: bad result from '{}': {}", state.entity_type().name(), state.entity_id(), name, e);
            None
        }
    }
}

/// Deliver a message to a `message.setHandler` handler
pub(crate) fn message_entry<S: ScriptedState>(
    script: &mut ScriptComponent,
    world: &mut World,
    state: &mut S,
    name: &str,
    is_local: bool,
    args: &[Json],
) -> Option<Json> {
    let id = state.entity_id();
    let world = RefCell::new(world);
    let state = RefCell::new(state);
    script.handle_message_with(name, is_local, args, |scope, callbacks| {
        register_world(scope, callbacks, &world, id)?;
        register_entity(scope, callbacks, &state)?;
        S::register_callbacks(scope, callbacks, &state)
    })
}

pub(crate) fn eval_entry<S: ScriptedState>(
    script: &mut ScriptComponent,
    world: &mut World,
    state: &mut S,
    code: &str,
) -> Result<Json> {
    let id = state.entity_id();
    let world = RefCell::new(world);
    let state = RefCell::new(state);
    let result = script.eval_with(code, |scope, callbacks| {
        register_world(scope, callbacks, &world, id)?;
        register_entity(scope, callbacks, &state)?;
        S::register_callbacks(scope, callbacks, &state)
    })?;
    Ok(result)
}

/// Count a step and run `update` when the script's delta is due
pub(crate) fn update_entry<S: ScriptedState>(script: &mut ScriptComponent, world: &mut World, state: &mut S, dt: f32) {
    if script.tick() {
        let dt = script.update_dt(dt);
        let _: Option<()> = invoke_entry(script, world, state, "update", dt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parameters_override_config() {
        let config = EntityConfig::new(
            "lamp",
            "/objects/lamp/lamp.object",
            Arc::new(json!({"scripts": ["lamp.lua", "/lib/util.lua"], "light": {"level": 3}, "scriptDelta": 10})),
            json!({"light": {"level": 7}, "uniqueId": "lamp-1"}),
        );
        assert_eq!(config.get("light.level"), Some(&json!(7)));
        assert_eq!(config.get_f32("missing", 2.5), 2.5);
        assert_eq!(config.scripts(), vec!["/objects/lamp/lamp.lua".to_string(), "/lib/util.lua".to_string()]);
        assert_eq!(config.script_delta(), 10);
        assert_eq!(config.unique_id().as_deref(), Some("lamp-1"));
        assert_eq!(config.merged()["light"]["level"], json!(7));
    }

    #[test]
    fn test_non_object_parameters_are_ignored() {
        let config = EntityConfig::new("x", "/x.object", Arc::new(json!({"a": 1})), Json::Null);
        assert_eq!(config.get("a"), Some(&json!(1)));
        assert!(config.parameters().is_object());
        assert_eq!(config.script_delta(), DEFAULT_SCRIPT_DELTA);
    }
}
