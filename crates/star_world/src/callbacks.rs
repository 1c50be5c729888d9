//! The `world`, `entity` and `config` script tables
//!
//! Tables are registered per invocation inside an `mlua` scope. The world
//! is shared through a `RefCell` so every function can reach it mutably;
//! a function that re-enters while another holds the world gets a Lua
//! error instead of a panic.

use std::cell::RefCell;

use star_core::Json;
use star_math::{RectF, Vec2F, Vec2I};
use star_physics::{CollisionKind, CollisionSet, CollisionWorld, Direction};
use star_script::mlua::{self, Lua, Scope, Table, Value, Variadic};
use star_script::{json_to_lua, lua_to_json, LuaCallbacks};

use crate::entities::ScriptedState;
use crate::entity::{EntityId, EntityType, NULL_ENTITY_ID};
use crate::error::Result;
use crate::packets::MessageTarget;
use crate::tile::TileLayer;
use crate::world::World;

/// Mutable world access shared by the functions of one invocation
pub type WorldCell<'w> = RefCell<&'w mut World>;

pub(crate) fn runtime(message: impl Into<String>) -> mlua::Error {
    mlua::Error::RuntimeError(message.into())
}

fn with_world<R>(world: &WorldCell<'_>, f: impl FnOnce(&mut World) -> R) -> mlua::Result<R> {
    let mut guard = world.try_borrow_mut().map_err(|_| runtime("world is busy"))?;
    Ok(f(&mut **guard))
}

/// Borrow an entity's script-visible state for one callback
pub(crate) fn with_cell<T, R>(cell: &RefCell<&mut T>, f: impl FnOnce(&mut T) -> R) -> mlua::Result<R> {
    let mut guard = cell.try_borrow_mut().map_err(|_| runtime("entity state is busy"))?;
    Ok(f(&mut **guard))
}

/// Read `value` as JSON, treating nil as an empty object
pub(crate) fn json_parameters(lua: &Lua, value: Option<Value>) -> mlua::Result<Json> {
    match value {
        None | Some(Value::Nil) => Ok(Json::Object(Default::default())),
        Some(value) => lua_to_json(lua, value),
    }
}

pub(crate) fn json_list(lua: &Lua, values: Variadic<Value>) -> mlua::Result<Vec<Json>> {
    values.into_iter().map(|v| lua_to_json(lua, v)).collect()
}

fn collision_set(names: Option<Vec<String>>) -> mlua::Result<CollisionSet> {
    match names {
        None => Ok(CollisionSet::DEFAULT),
        Some(names) => {
            let kinds = names
                .iter()
                .map(|n| CollisionKind::from_name(n).map_err(|e| runtime(e.to_string())))
                .collect::<mlua::Result<Vec<_>>>()?;
            Ok(CollisionSet::of(&kinds))
        }
    }
}

fn layer(name: &str) -> mlua::Result<TileLayer> {
    TileLayer::from_name(name).ok_or_else(|| runtime(format!("unknown tile layer '{}'", name)))
}

fn message_target(value: Value) -> mlua::Result<MessageTarget> {
    match value {
        Value::Integer(id) => Ok(MessageTarget::Id(id as EntityId)),
        Value::Number(id) => Ok(MessageTarget::Id(id as EntityId)),
        Value::String(unique) => Ok(MessageTarget::UniqueId(unique.to_str()?.to_string())),
        other => Err(runtime(format!("bad message target {}", other.type_name()))),
    }
}

fn log_spawn(kind: &str, name: &str, result: Result<EntityId>) -> Option<EntityId> {
    match result {
        Ok(id) => Some(id),
        Err(e) => {
            log::warn!("script failed to spawn {} '{}': {}", kind, name, e);
            None
        }
    }
}

/// Install the `world` table. `source` is the calling entity, or the null
/// id for server-side scripts.
pub fn register_world<'scope, 'env, 'w: 'env>(
    scope: &'scope Scope<'scope, 'env>,
    callbacks: &mut LuaCallbacks,
    world: &'env WorldCell<'w>,
    source: EntityId,
) -> mlua::Result<()> {
    let mut reg = |name: &str, function: mlua::Function| callbacks.register("world", name, function);

    reg("time", scope.create_function(move |_, ()| with_world(world, |w| w.time()))?)?;
    reg("currentStep", scope.create_function(move |_, ()| with_world(world, |w| w.current_step()))?)?;
    reg("gravity", scope.create_function(move |_, pos: [f32; 2]| {
        with_world(world, |w| w.gravity(Vec2F::from(pos)))
    })?)?;

    reg("entityExists", scope.create_function(move |_, id: EntityId| {
        with_world(world, |w| w.entity(id).is_some())
    })?)?;
    reg("entityPosition", scope.create_function(move |_, id: EntityId| {
        with_world(world, |w| w.entity(id).map(|e| e.position().to_array()))
    })?)?;
    reg("entityType", scope.create_function(move |_, id: EntityId| {
        with_world(world, |w| w.entity(id).map(|e| e.entity_type().name()))
    })?)?;
    reg("entityName", scope.create_function(move |_, id: EntityId| {
        with_world(world, |w| w.entity(id).map(|e| e.name()))
    })?)?;
    reg("entityUniqueId", scope.create_function(move |_, id: EntityId| {
        with_world(world, |w| w.entity(id).and_then(|e| e.unique_id()))
    })?)?;
    reg("uniqueEntityId", scope.create_function(move |_, unique: String| {
        with_world(world, |w| w.unique_entity(&unique))
    })?)?;
    reg("entityQuery", scope.create_function(move |_, (a, b, options): ([f32; 2], [f32; 2], Option<Table>)| {
        let mut types: Option<Vec<EntityType>> = None;
        let mut without = NULL_ENTITY_ID;
        if let Some(options) = options {
            if let Some(names) = options.get::<Option<Vec<String>>>("includedTypes")? {
                types = Some(names.iter().filter_map(|n| EntityType::from_name(n)).collect());
            }
            without = options.get::<Option<EntityId>>("withoutEntityId")?.unwrap_or(NULL_ENTITY_ID);
        }
        let region = RectF::from_coords(a[0].min(b[0]), a[1].min(b[1]), a[0].max(b[0]), a[1].max(b[1]));
        with_world(world, |w| {
            w.entity_query(region, |e| {
                e.entity_id() != without && types.as_ref().map_or(true, |t| t.contains(&e.entity_type()))
            })
        })
    })?)?;

    reg("spawnMonster", scope.create_function(move |lua, (kind, pos, params): (String, [f32; 2], Option<Value>)| {
        let params = json_parameters(lua, params)?;
        with_world(world, |w| {
            log_spawn("monster", &kind, w.spawn_entity(EntityType::Monster, &kind, Vec2F::from(pos), &params))
        })
    })?)?;
    reg("spawnNpc", scope.create_function(
        move |lua, (pos, species, kind, level, _seed, params): ([f32; 2], String, String, Option<f32>, Value, Option<Value>)| {
            let mut params = json_parameters(lua, params)?;
            if let Some(object) = params.as_object_mut() {
                object.insert("species".into(), Json::from(species));
                if let Some(level) = level {
                    object.insert("level".into(), Json::from(level));
                }
            }
            with_world(world, |w| {
                log_spawn("npc", &kind, w.spawn_entity(EntityType::Npc, &kind, Vec2F::from(pos), &params))
            })
        },
    )?)?;
    reg("spawnVehicle", scope.create_function(move |lua, (name, pos, params): (String, [f32; 2], Option<Value>)| {
        let params = json_parameters(lua, params)?;
        with_world(world, |w| {
            log_spawn("vehicle", &name, w.spawn_entity(EntityType::Vehicle, &name, Vec2F::from(pos), &params))
        })
    })?)?;
    reg("spawnStagehand", scope.create_function(move |lua, (pos, kind, params): ([f32; 2], String, Option<Value>)| {
        let params = json_parameters(lua, params)?;
        with_world(world, |w| {
            log_spawn("stagehand", &kind, w.spawn_entity(EntityType::Stagehand, &kind, Vec2F::from(pos), &params))
        })
    })?)?;
    reg("spawnProjectile", scope.create_function(
        move |lua,
              (name, pos, source_id, direction, track, params): (
            String,
            [f32; 2],
            Option<EntityId>,
            Option<[f32; 2]>,
            Option<bool>,
            Option<Value>,
        )| {
            let params = json_parameters(lua, params)?;
            let direction = direction.map_or(Vec2F::X, Vec2F::from);
            with_world(world, |w| {
                let result = w.spawn_projectile(
                    &name,
                    Vec2F::from(pos),
                    source_id.filter(|id| *id != NULL_ENTITY_ID),
                    direction,
                    track.unwrap_or(false),
                    &params,
                );
                log_spawn("projectile", &name, result)
            })
        },
    )?)?;
    reg("spawnItem", scope.create_function(move |lua, (item, pos, count, params): (String, [f32; 2], Option<u64>, Option<Value>)| {
        let params = json_parameters(lua, params)?;
        with_world(world, |w| {
            log_spawn("item", &item, w.spawn_item_drop(&item, count.unwrap_or(1), Vec2F::from(pos), &params))
        })
    })?)?;
    reg("placeObject", scope.create_function(move |lua, (name, pos, direction, params): (String, [i32; 2], Option<i32>, Option<Value>)| {
        let params = json_parameters(lua, params)?;
        let direction = if direction.unwrap_or(1) < 0 { Direction::Left } else { Direction::Right };
        with_world(world, |w| {
            log_spawn("object", &name, w.place_object(&name, Vec2I::from(pos), direction, &params)).is_some()
        })
    })?)?;
    reg("breakObject", scope.create_function(move |_, (id, smash): (EntityId, Option<bool>)| {
        with_world(world, |w| w.break_object(id, smash.unwrap_or(false)).is_ok())
    })?)?;

    reg("material", scope.create_function(move |_, (pos, layer_name): ([i32; 2], String)| {
        let layer = layer(&layer_name)?;
        with_world(world, |w| {
            let id = w.material(Vec2I::from(pos), layer);
            w.resources().materials().material_name(id).map(str::to_string)
        })
    })?)?;
    reg("placeMaterial", scope.create_function(move |_, (pos, layer_name, material): ([i32; 2], String, String)| {
        let layer = layer(&layer_name)?;
        with_world(world, |w| w.place_material(Vec2I::from(pos), layer, &material).is_ok())
    })?)?;
    reg("liquidAt", scope.create_function(move |lua, pos: [i32; 2]| {
        let level = with_world(world, |w| w.liquid_at(Vec2I::from(pos)))?;
        if level.is_empty() {
            return Ok(Value::Nil);
        }
        let table = lua.create_table()?;
        table.push(level.liquid)?;
        table.push(level.level)?;
        Ok(Value::Table(table))
    })?)?;
    reg("spawnLiquid", scope.create_function(move |_, (pos, liquid, quantity): ([i32; 2], Value, f32)| {
        with_world(world, |w| {
            let id = match &liquid {
                Value::Integer(id) => Some(*id as u8),
                Value::String(name) => name
                    .to_str()
                    .ok()
                    .and_then(|n| w.resources().liquids().liquid_id(&n)),
                _ => None,
            };
            id.map_or(false, |id| w.spawn_liquid(Vec2I::from(pos), id, quantity).is_ok())
        })
    })?)?;
    reg("pointTileCollision", scope.create_function(move |_, (pos, kinds): ([f32; 2], Option<Vec<String>>)| {
        let set = collision_set(kinds)?;
        with_world(world, |w| set.contains(w.tile_collision(Vec2F::from(pos).floor())))
    })?)?;
    reg("rectTileCollision", scope.create_function(move |_, (rect, kinds): ([f32; 4], Option<Vec<String>>)| {
        let set = collision_set(kinds)?;
        with_world(world, |w| {
            let region = RectF::from(rect).to_tiles();
            let colliding = region.tiles().any(|tile| set.contains(w.tile_collision(tile)));
            colliding
        })
    })?)?;
    reg("isTileProtected", scope.create_function(move |_, pos: [f32; 2]| {
        with_world(world, |w| w.is_tile_protected(Vec2F::from(pos).floor()))
    })?)?;
    reg("dungeonId", scope.create_function(move |_, pos: [f32; 2]| {
        with_world(world, |w| w.dungeon_id(Vec2F::from(pos).floor()))
    })?)?;
    reg("setTileProtection", scope.create_function(move |_, (dungeon, protected): (u16, bool)| {
        with_world(world, |w| w.set_tile_protection(dungeon, protected))
    })?)?;

    reg("sendEntityMessage", scope.create_function(move |lua, (target, name, args): (Value, String, Variadic<Value>)| {
        let target = message_target(target)?;
        let args = json_list(lua, args)?;
        with_world(world, |w| w.send_entity_message(target, &name, args))
    })?)?;
    reg("callScriptedEntity", scope.create_function(move |lua, (id, function, args): (EntityId, String, Variadic<Value>)| {
        if id == source {
            return Err(runtime("an entity cannot call its own scripts through the world"));
        }
        let args = json_list(lua, args)?;
        let result = with_world(world, |w| w.call_scripted_entity(id, &function, &args))?;
        match result {
            Ok(Some(value)) => json_to_lua(lua, &value),
            Ok(None) => Ok(Value::Nil),
            Err(e) => Err(runtime(e.to_string())),
        }
    })?)?;

    reg("getProperty", scope.create_function(move |lua, (name, default): (String, Value)| {
        let value = with_world(world, |w| w.property(&name))?;
        if value.is_null() {
            Ok(default)
        } else {
            json_to_lua(lua, &value)
        }
    })?)?;
    reg("setProperty", scope.create_function(move |lua, (name, value): (String, Value)| {
        let value = lua_to_json(lua, value)?;
        with_world(world, |w| w.set_property(&name, value))
    })?)?;
    reg("setPlayerStart", scope.create_function(move |_, pos: [f32; 2]| {
        with_world(world, |w| w.set_player_start(Vec2F::from(pos)))
    })?)?;
    reg("universeFlagSet", scope.create_function(move |_, flag: String| {
        with_world(world, |w| w.universe_flag_set(&flag))
    })?)?;
    reg("setUniverseFlag", scope.create_function(move |_, flag: String| {
        with_world(world, |w| w.set_universe_flag(&flag))
    })?)?;

    Ok(())
}

/// Install the `entity` and `config` tables for a scripted entity
pub fn register_entity<'scope, 'env, 's: 'env, S: ScriptedState>(
    scope: &'scope Scope<'scope, 'env>,
    callbacks: &mut LuaCallbacks,
    state: &'env RefCell<&'s mut S>,
) -> mlua::Result<()> {
    callbacks.register("entity", "id", scope.create_function(move |_, ()| with_cell(state, |s| s.entity_id()))?)?;
    callbacks.register(
        "entity",
        "entityType",
        scope.create_function(move |_, ()| with_cell(state, |s| s.entity_type().name()))?,
    )?;
    callbacks.register(
        "entity",
        "position",
        scope.create_function(move |_, ()| with_cell(state, |s| s.position().to_array()))?,
    )?;
    callbacks.register(
        "entity",
        "uniqueId",
        scope.create_function(move |_, ()| with_cell(state, |s| s.config().unique_id()))?,
    )?;
    callbacks.register(
        "config",
        "getParameter",
        scope.create_function(move |lua, (path, default): (String, Value)| {
            let value = with_cell(state, |s| s.config().get(&path).cloned())?;
            match value {
                Some(value) => json_to_lua(lua, &value),
                None => Ok(default),
            }
        })?,
    )?;
    Ok(())
}

/// Evaluate code in a fresh context with the `world` table, as the `run`
/// command does
pub fn eval_world_script(world: &mut World, code: &str) -> Result<Json> {
    let resources = world.resources().clone();
    let context = resources.lua().create_context()?;
    let cell = RefCell::new(world);
    let result = context.scoped(
        |scope, callbacks| register_world(scope, callbacks, &cell, NULL_ENTITY_ID),
        |context| context.eval(code),
    )?;
    Ok(result)
}
