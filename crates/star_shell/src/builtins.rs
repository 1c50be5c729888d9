//! Built-in admin commands

use serde_json::json;
use star_world::callbacks::eval_world_script;
use star_world::{Direction, EntityId, EntityType, Json, MessageTarget, Vec2F};

use crate::command::{parse_bool, Command, CommandError, CommandResult};
use crate::context::ClientInfo;
use crate::processor::{Access, CommandEnv, CommandSpec};

const HELP: &str = "help [command]";
const SPAWN_MONSTER: &str = "spawnmonster <type> [level] [parameters]";
const SPAWN_NPC: &str = "spawnnpc <species> <type> [level] [seed] [parameters]";
const SPAWN_VEHICLE: &str = "spawnvehicle <name> [parameters]";
const SPAWN_STAGEHAND: &str = "spawnstagehand <type> [parameters]";
const PLACE_OBJECT: &str = "placeobject <name> [left|right] [parameters]";
const SPAWN_LIQUID: &str = "spawnliquid <liquid> [quantity]";
const WARP: &str = "warp [player] <x> <y>";
const SET_TILE_PROTECTION: &str = "settileprotection <dungeonId> <true|false>";
const SET_DUNGEON_ID: &str = "setdungeonid <dungeonId> <x0> <y0> <x1> <y1>";
const SET_PLAYER_START: &str = "setplayerstart [x] [y]";
const SET_BIOME: &str = "setbiome <biome> <x0> <y0> <x1> <y1>";
const SET_WEATHER: &str = "setweather [weather|none]";
const SET_UNIVERSE_FLAG: &str = "setuniverseflag <flag>";
const BAN: &str = "ban <player> [reason]";
const UNBAN: &str = "unban <player>";
const KICK: &str = "kick <player> [reason]";
const RUN: &str = "run <lua>";
const ENTITY_EVAL: &str = "entityeval <entityId> <lua>";
const TIMESCALE: &str = "timescale <scale>";
const TIMESTEP: &str = "timestep <seconds>";

macro_rules! spec {
    ($name:literal, $usage:expr, $access:ident, $description:literal, $handler:expr) => {
        CommandSpec {
            name: $name,
            usage: $usage,
            description: $description,
            access: Access::$access,
            handler: $handler,
        }
    };
}

pub fn all() -> Vec<CommandSpec> {
    vec![
        spec!("help", HELP, Anyone, "List commands or show one command's usage", help),
        spec!("whoami", "whoami", Anyone, "Show your name and whether you are an admin", whoami),
        spec!("list", "list", Admin, "List connected clients", list),
        spec!("spawnmonster", SPAWN_MONSTER, Admin, "Spawn a monster at your aim position", spawn_monster),
        spec!("spawnnpc", SPAWN_NPC, Admin, "Spawn an NPC at your aim position", spawn_npc),
        spec!("spawnvehicle", SPAWN_VEHICLE, Admin, "Spawn a vehicle at your aim position", spawn_vehicle),
        spec!("spawnstagehand", SPAWN_STAGEHAND, Admin, "Spawn a stagehand at your aim position", spawn_stagehand),
        spec!("placeobject", PLACE_OBJECT, Admin, "Place an object on the tile you aim at", place_object),
        spec!("spawnliquid", SPAWN_LIQUID, Admin, "Pour liquid on the tile you aim at", spawn_liquid),
        spec!("warp", WARP, Admin, "Move a player to a position", warp),
        spec!("settileprotection", SET_TILE_PROTECTION, Admin, "Protect or unprotect a dungeon id", set_tile_protection),
        spec!("setdungeonid", SET_DUNGEON_ID, Admin, "Assign a dungeon id to a tile region", set_dungeon_id),
        spec!("setplayerstart", SET_PLAYER_START, Admin, "Set where players appear", set_player_start),
        spec!("setbiome", SET_BIOME, Admin, "Assign a biome to a tile region", set_biome),
        spec!("setweather", SET_WEATHER, Admin, "Set or clear the weather", set_weather),
        spec!("setuniverseflag", SET_UNIVERSE_FLAG, Admin, "Set a universe flag", set_universe_flag),
        spec!("resetuniverseflags", "resetuniverseflags", Admin, "Clear every universe flag", reset_universe_flags),
        spec!("ban", BAN, Admin, "Ban a player by name and kick them", ban),
        spec!("unban", UNBAN, Admin, "Lift a ban", unban),
        spec!("kick", KICK, Admin, "Disconnect a player", kick),
        spec!("run", RUN, Local, "Evaluate Lua with the world table", run),
        spec!("entityeval", ENTITY_EVAL, Local, "Evaluate Lua in an entity's script context", entity_eval),
        spec!("enablespawning", "enablespawning", Admin, "Turn ambient spawning on", enable_spawning),
        spec!("disablespawning", "disablespawning", Admin, "Turn ambient spawning off", disable_spawning),
        spec!("timescale", TIMESCALE, Admin, "Scale simulated time per step", timescale),
        spec!("timestep", TIMESTEP, Admin, "Set the seconds simulated per step", timestep),
        spec!("reload", "reload", Admin, "Reload assets", reload),
        spec!("entitycount", "entitycount", Admin, "Count entities by type", entity_count),
    ]
}

/// The caller's aim position, falling back to the player start
fn spawn_position(env: &CommandEnv<'_>) -> Result<Vec2F, CommandError> {
    env.caller
        .position
        .or_else(|| env.world.player_start())
        .ok_or_else(|| CommandError::Failed("No position to spawn at; set a player start first".into()))
}

/// Add fields to a parameter object, turning null into one
fn with_fields(mut parameters: Json, fields: impl IntoIterator<Item = (&'static str, Json)>) -> Json {
    if parameters.is_null() {
        parameters = Json::Object(Default::default());
    }
    if let Some(object) = parameters.as_object_mut() {
        for (key, value) in fields {
            object.insert(key.to_string(), value);
        }
    }
    parameters
}

fn find_client(env: &CommandEnv<'_>, name: &str) -> Result<ClientInfo, CommandError> {
    env.server
        .client_named(name)
        .ok_or_else(|| CommandError::Failed(format!("No player named '{}' is connected", name)))
}

/// Script results as an admin would want to read them
fn render(value: &Json) -> String {
    match value {
        Json::Null => "nil".to_string(),
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn help(env: &mut CommandEnv<'_>, cmd: &Command) -> CommandResult {
    if let Some(name) = cmd.get_arg(0) {
        let spec = env
            .commands
            .get(name.to_lowercase().as_str())
            .ok_or_else(|| CommandError::UnknownCommand(name.to_string()))?;
        return Ok(format!("{} - {}", spec.usage, spec.description));
    }
    let names: Vec<&str> = env.commands.keys().copied().collect();
    Ok(format!("Available commands: {}", names.join(", ")))
}

fn whoami(env: &mut CommandEnv<'_>, _cmd: &Command) -> CommandResult {
    let admin = if env.caller.admin { "an" } else { "not an" };
    Ok(format!("Server: You are {}. You are {} Admin", env.caller.name, admin))
}

fn list(env: &mut CommandEnv<'_>, _cmd: &Command) -> CommandResult {
    let clients = env.server.clients();
    if clients.is_empty() {
        return Ok("No clients connected".to_string());
    }
    let lines: Vec<String> = clients
        .iter()
        .map(|c| {
            let player = c.player.map_or_else(|| "-".to_string(), |id| id.to_string());
            format!("${} : {} : {}", c.connection, c.name, player)
        })
        .collect();
    Ok(lines.join("\n"))
}

fn spawn_monster(env: &mut CommandEnv<'_>, cmd: &Command) -> CommandResult {
    let kind = cmd.require_arg(0, SPAWN_MONSTER)?;
    let mut parameters = cmd.json_arg(2)?;
    if let Some(level) = cmd.parse_arg::<f32>(1, "level")? {
        parameters = with_fields(parameters, [("level", json!(level))]);
    }
    let position = spawn_position(env)?;
    let id = env.world.spawn_entity(EntityType::Monster, kind, position, &parameters)?;
    Ok(format!("Spawned monster '{}' with id {}", kind, id))
}

fn spawn_npc(env: &mut CommandEnv<'_>, cmd: &Command) -> CommandResult {
    let species = cmd.require_arg(0, SPAWN_NPC)?;
    let kind = cmd.require_arg(1, SPAWN_NPC)?;
    let mut fields = vec![("species", json!(species))];
    if let Some(level) = cmd.parse_arg::<f32>(2, "level")? {
        fields.push(("level", json!(level)));
    }
    if let Some(seed) = cmd.parse_arg::<u64>(3, "seed")? {
        fields.push(("seed", json!(seed)));
    }
    let parameters = with_fields(cmd.json_arg(4)?, fields);
    let position = spawn_position(env)?;
    let id = env.world.spawn_entity(EntityType::Npc, kind, position, &parameters)?;
    Ok(format!("Spawned {} npc '{}' with id {}", species, kind, id))
}

fn spawn_vehicle(env: &mut CommandEnv<'_>, cmd: &Command) -> CommandResult {
    let name = cmd.require_arg(0, SPAWN_VEHICLE)?;
    let parameters = cmd.json_arg(1)?;
    let position = spawn_position(env)?;
    let id = env.world.spawn_entity(EntityType::Vehicle, name, position, &parameters)?;
    Ok(format!("Spawned vehicle '{}' with id {}", name, id))
}

fn spawn_stagehand(env: &mut CommandEnv<'_>, cmd: &Command) -> CommandResult {
    let kind = cmd.require_arg(0, SPAWN_STAGEHAND)?;
    let parameters = cmd.json_arg(1)?;
    let position = spawn_position(env)?;
    let id = env.world.spawn_entity(EntityType::Stagehand, kind, position, &parameters)?;
    Ok(format!("Spawned stagehand '{}' with id {}", kind, id))
}

fn place_object(env: &mut CommandEnv<'_>, cmd: &Command) -> CommandResult {
    let name = cmd.require_arg(0, PLACE_OBJECT)?;
    let (direction, parameters_index) = match cmd.get_arg(1).map(str::to_lowercase).as_deref() {
        Some("left") => (Direction::Left, 2),
        Some("right") => (Direction::Right, 2),
        _ => (Direction::Right, 1),
    };
    let parameters = cmd.json_arg(parameters_index)?;
    let tile = spawn_position(env)?.floor();
    let id = env.world.place_object(name, tile, direction, &parameters)?;
    Ok(format!("Placed object '{}' at {:?} with id {}", name, tile.to_array(), id))
}

fn spawn_liquid(env: &mut CommandEnv<'_>, cmd: &Command) -> CommandResult {
    let name = cmd.require_arg(0, SPAWN_LIQUID)?;
    let liquid = env
        .world
        .resources()
        .liquids()
        .liquid_id(name)
        .or_else(|| name.parse().ok())
        .ok_or_else(|| CommandError::InvalidArgument {
            name: "liquid",
            value: name.to_string(),
        })?;
    let quantity = cmd.parse_arg::<f32>(1, "quantity")?.unwrap_or(1.0);
    if quantity <= 0.0 {
        return Err(CommandError::InvalidArgument {
            name: "quantity",
            value: quantity.to_string(),
        });
    }
    let tile = spawn_position(env)?.floor();
    env.world.spawn_liquid(tile, liquid, quantity)?;
    Ok(format!("Spawned {} {} at {:?}", quantity, name, tile.to_array()))
}

fn warp(env: &mut CommandEnv<'_>, cmd: &Command) -> CommandResult {
    let (target, position) = if cmd.args.len() >= 3 {
        (find_client(env, cmd.require_arg(0, WARP)?)?, cmd.position_arg(1)?)
    } else {
        let own = env
            .server
            .clients()
            .into_iter()
            .find(|c| c.connection == env.caller.connection)
            .ok_or_else(|| CommandError::Failed("The console has no player to warp; name one".into()))?;
        (own, cmd.position_arg(0)?)
    };
    let position = position.ok_or(CommandError::MissingArgument(WARP))?;
    let player = target
        .player
        .ok_or_else(|| CommandError::Failed(format!("{} has no player in the world", target.name)))?;
    // The reply is not awaited; the player's owner applies the move
    let _ = env.world.send_entity_message(
        MessageTarget::Id(player),
        "warp",
        vec![json!(position.to_array())],
    );
    Ok(format!("Warping {} to {:?}", target.name, position.to_array()))
}

fn set_tile_protection(env: &mut CommandEnv<'_>, cmd: &Command) -> CommandResult {
    let dungeon = cmd.require_parsed::<u16>(0, "dungeon id", SET_TILE_PROTECTION)?;
    let value = cmd.require_arg(1, SET_TILE_PROTECTION)?;
    let protected = parse_bool(value).ok_or_else(|| CommandError::InvalidArgument {
        name: "protection",
        value: value.to_string(),
    })?;
    env.world.set_tile_protection(dungeon, protected);
    let state = if protected { "protected" } else { "unprotected" };
    Ok(format!("Dungeon id {} is now {}", dungeon, state))
}

fn set_dungeon_id(env: &mut CommandEnv<'_>, cmd: &Command) -> CommandResult {
    let dungeon = cmd.require_parsed::<u16>(0, "dungeon id", SET_DUNGEON_ID)?;
    let region = cmd.region_arg(1, SET_DUNGEON_ID)?;
    env.world.set_dungeon_id(region, dungeon);
    Ok(format!("Set dungeon id {} on {:?}", dungeon, region.to_array()))
}

fn set_player_start(env: &mut CommandEnv<'_>, cmd: &Command) -> CommandResult {
    let position = cmd
        .position_arg(0)?
        .or(env.caller.position)
        .ok_or(CommandError::MissingArgument(SET_PLAYER_START))?;
    env.world.set_player_start(position);
    Ok(format!("Player start set to {:?}", position.to_array()))
}

fn set_biome(env: &mut CommandEnv<'_>, cmd: &Command) -> CommandResult {
    let biome = cmd.require_arg(0, SET_BIOME)?;
    let region = cmd.region_arg(1, SET_BIOME)?;
    env.world.set_biome(region, biome);
    Ok(format!("Biome '{}' set on {:?}", biome, region.to_array()))
}

fn set_weather(env: &mut CommandEnv<'_>, cmd: &Command) -> CommandResult {
    match cmd.get_arg(0).filter(|w| !w.eq_ignore_ascii_case("none")) {
        Some(weather) => {
            env.world.set_weather(Some(weather.to_string()));
            Ok(format!("Weather set to '{}'", weather))
        }
        None => {
            env.world.set_weather(None);
            Ok("Weather cleared".to_string())
        }
    }
}

fn set_universe_flag(env: &mut CommandEnv<'_>, cmd: &Command) -> CommandResult {
    let flag = cmd.require_arg(0, SET_UNIVERSE_FLAG)?;
    env.world.set_universe_flag(flag);
    Ok(format!("Universe flag '{}' set", flag))
}

fn reset_universe_flags(env: &mut CommandEnv<'_>, _cmd: &Command) -> CommandResult {
    let count = env.world.universe_flags().count();
    env.world.reset_universe_flags();
    Ok(format!("Cleared {} universe flags", count))
}

fn ban(env: &mut CommandEnv<'_>, cmd: &Command) -> CommandResult {
    let name = cmd.require_arg(0, BAN)?;
    let reason = cmd.rest(1).unwrap_or_else(|| "You are banned".to_string());
    if !env.bans.ban(name, &reason) {
        return Ok(format!("{} was already banned", name));
    }
    if let Some(client) = env.server.client_named(name) {
        env.server.kick(client.connection, &reason);
    }
    Ok(format!("Banned {}", name))
}

fn unban(env: &mut CommandEnv<'_>, cmd: &Command) -> CommandResult {
    let name = cmd.require_arg(0, UNBAN)?;
    if env.bans.unban(name) {
        Ok(format!("Unbanned {}", name))
    } else {
        Err(CommandError::Failed(format!("{} is not banned", name)))
    }
}

fn kick(env: &mut CommandEnv<'_>, cmd: &Command) -> CommandResult {
    let client = find_client(env, cmd.require_arg(0, KICK)?)?;
    let reason = cmd.rest(1).unwrap_or_else(|| "Kicked by an admin".to_string());
    if env.server.kick(client.connection, &reason) {
        Ok(format!("Kicked {}", client.name))
    } else {
        Err(CommandError::Failed(format!("{} could not be kicked", client.name)))
    }
}

fn run(env: &mut CommandEnv<'_>, cmd: &Command) -> CommandResult {
    let code = cmd.raw_rest(0).ok_or(CommandError::MissingArgument(RUN))?;
    let result = eval_world_script(env.world, code)?;
    Ok(render(&result))
}

fn entity_eval(env: &mut CommandEnv<'_>, cmd: &Command) -> CommandResult {
    let id = cmd.require_parsed::<EntityId>(0, "entity id", ENTITY_EVAL)?;
    let code = cmd.raw_rest(1).ok_or(CommandError::MissingArgument(ENTITY_EVAL))?;
    let result = env.world.eval_in_entity(id, code)?;
    Ok(render(&result))
}

fn enable_spawning(env: &mut CommandEnv<'_>, _cmd: &Command) -> CommandResult {
    env.world.set_spawning_enabled(true);
    Ok("Enabled spawning".to_string())
}

fn disable_spawning(env: &mut CommandEnv<'_>, _cmd: &Command) -> CommandResult {
    env.world.set_spawning_enabled(false);
    Ok("Disabled spawning".to_string())
}

fn positive(cmd: &Command, name: &'static str, usage: &'static str) -> Result<f32, CommandError> {
    let value = cmd.require_parsed::<f32>(0, name, usage)?;
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(CommandError::InvalidArgument {
            name,
            value: value.to_string(),
        })
    }
}

fn timescale(env: &mut CommandEnv<'_>, cmd: &Command) -> CommandResult {
    let scale = positive(cmd, "timescale", TIMESCALE)?;
    env.world.set_timescale(scale);
    Ok(format!("Set timescale to {}", scale))
}

fn timestep(env: &mut CommandEnv<'_>, cmd: &Command) -> CommandResult {
    let step = positive(cmd, "timestep", TIMESTEP)?;
    env.world.set_timestep(step);
    Ok(format!("Set timestep to {}", step))
}

fn reload(env: &mut CommandEnv<'_>, _cmd: &Command) -> CommandResult {
    env.server.reload().map_err(CommandError::Failed)?;
    Ok("Assets reloaded".to_string())
}

fn entity_count(env: &mut CommandEnv<'_>, _cmd: &Command) -> CommandResult {
    let counts = env.world.entity_counts();
    let total: usize = counts.values().sum();
    let by_type: Vec<String> = counts
        .iter()
        .map(|(kind, count)| format!("{} {}", kind.name(), count))
        .collect();
    if by_type.is_empty() {
        return Ok("0 entities".to_string());
    }
    Ok(format!("{} entities ({})", total, by_type.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_fields() {
        let params = with_fields(Json::Null, [("level", json!(3.0))]);
        assert_eq!(params, json!({"level": 3.0}));
        let params = with_fields(json!({"a": 1, "level": 1}), [("level", json!(2))]);
        assert_eq!(params, json!({"a": 1, "level": 2}));
    }

    #[test]
    fn test_render() {
        assert_eq!(render(&Json::Null), "nil");
        assert_eq!(render(&json!("text")), "text");
        assert_eq!(render(&json!([1, true])), "[1,true]");
    }

    #[test]
    fn test_command_names_are_unique() {
        let specs = all();
        let mut names: Vec<&str> = specs.iter().map(|s| s.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), specs.len());
    }
}
