//! Commands run against a real world built from a small asset tree

use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

use serde_json::json;
use star_asset::{Assets, AssetsSettings};
use star_shell::*;
use star_world::{
    ConnectionId, EntityType, Monster, Npc, Vec2F, Vec2I, World, WorldResources, WorldRole, WorldSettings,
};
use tempfile::TempDir;

fn write(dir: &Path, path: &str, contents: &str) {
    let full = dir.join(path.trim_start_matches('/'));
    fs::create_dir_all(full.parent().unwrap()).unwrap();
    fs::write(full, contents).unwrap();
}

fn asset_tree() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "/tiles/dirt.material", r#"{"materialId": 1, "materialName": "dirt"}"#);
    write(root, "/liquids/water.liquid", r#"{"liquidId": 1, "name": "water"}"#);
    write(root, "/monsters/poptop.monstertype", r#"{"type": "poptop"}"#);
    write(root, "/npcs/guard.npctype", r#"{"type": "guard"}"#);
    write(root, "/objects/crate.object", r#"{"objectName": "crate"}"#);
    write(
        root,
        "/stagehands/counter.stagehand",
        r#"{"type": "counter", "scripts": ["counter.lua"]}"#,
    );
    write(root, "/stagehands/counter.lua", "function init() count = 41 end");
    dir
}

fn world(dir: &TempDir) -> World {
    let settings = AssetsSettings {
        worker_pool_size: 0,
        ..Default::default()
    };
    let assets = Assets::new(settings, [dir.path()]).unwrap();
    let resources: Rc<WorldResources> = WorldResources::load(Arc::new(assets)).unwrap();
    let settings = WorldSettings {
        size: Vec2I::new(100, 100),
        ..Default::default()
    };
    World::new(settings, resources, WorldRole::Server).unwrap()
}

#[derive(Default)]
struct TestServer {
    clients: Vec<ClientInfo>,
    kicked: Vec<(ConnectionId, String)>,
    reloads: usize,
}

impl ServerControl for TestServer {
    fn clients(&self) -> Vec<ClientInfo> {
        self.clients.clone()
    }

    fn kick(&mut self, connection: ConnectionId, reason: &str) -> bool {
        let before = self.clients.len();
        self.clients.retain(|c| c.connection != connection);
        self.kicked.push((connection, reason.to_string()));
        self.clients.len() != before
    }

    fn reload(&mut self) -> Result<(), String> {
        self.reloads += 1;
        Ok(())
    }
}

fn client(connection: ConnectionId, name: &str) -> ClientInfo {
    ClientInfo {
        connection,
        name: name.to_string(),
        admin: false,
        player: None,
    }
}

struct Harness {
    _dir: TempDir,
    world: World,
    server: TestServer,
    processor: CommandProcessor,
}

impl Harness {
    fn new() -> Self {
        let dir = asset_tree();
        Self {
            world: world(&dir),
            _dir: dir,
            server: TestServer::default(),
            processor: CommandProcessor::new(),
        }
    }

    fn run(&mut self, caller: &CommandCaller, line: &str) -> String {
        self.processor.execute(caller, &mut self.world, &mut self.server, line)
    }

    fn console(&mut self, line: &str) -> String {
        self.run(&CommandCaller::console(), line)
    }
}

#[test]
fn test_help_and_whoami() {
    let mut h = Harness::new();
    let player = CommandCaller::client(2, "nova", false);
    assert!(h.run(&player, "help").starts_with("Available commands: ban, disablespawning"));
    assert_eq!(
        h.run(&player, "help spawnliquid"),
        "spawnliquid <liquid> [quantity] - Pour liquid on the tile you aim at"
    );
    assert_eq!(h.run(&player, "whoami"), "Server: You are nova. You are not an Admin");
    assert_eq!(h.console("whoami"), "Server: You are console. You are an Admin");
    assert_eq!(h.run(&player, "frobnicate"), "Unknown command 'frobnicate'");
}

#[test]
fn test_permissions() {
    let mut h = Harness::new();
    let player = CommandCaller::client(2, "nova", false);
    let admin = CommandCaller::client(3, "op", true);
    assert_eq!(h.run(&player, "entitycount"), "Insufficient privileges for 'entitycount'");
    assert_eq!(h.run(&admin, "entitycount"), "0 entities");
    assert_eq!(h.run(&admin, "run return 1"), "'run' can only be run from the server console");
}

#[test]
fn test_spawn_commands_use_caller_position() {
    let mut h = Harness::new();
    let admin = CommandCaller::client(3, "op", true).at(Vec2F::new(20.0, 30.0));

    let reply = h.run(&admin, r#"spawnmonster poptop 4 {"aggressive": true}"#);
    assert!(reply.starts_with("Spawned monster 'poptop'"), "{}", reply);
    let reply = h.run(&admin, "spawnnpc avian guard 2 77");
    assert!(reply.starts_with("Spawned avian npc 'guard'"), "{}", reply);

    let monster = h.world.entity_ids().into_iter().find_map(|id| h.world.entity_as::<Monster>(id).map(|m| m.level()));
    assert_eq!(monster, Some(4.0));
    let npc = h.world.entity_ids().into_iter().find(|id| h.world.entity_as::<Npc>(*id).is_some()).unwrap();
    assert_eq!(h.world.entity(npc).unwrap().store_spawn()["species"], json!("avian"));
    assert_eq!(h.world.entity(npc).unwrap().position(), Vec2F::new(20.0, 30.0));

    assert_eq!(h.console("entitycount"), "2 entities (monster 1, npc 1)");
    assert_eq!(
        h.console("spawnmonster poptop"),
        "No position to spawn at; set a player start first"
    );
    assert_eq!(h.run(&admin, "spawnmonster nothing"), "Unknown monster 'nothing'");
    assert!(h.run(&admin, "spawnmonster poptop x").starts_with("Invalid level"));
}

#[test]
fn test_place_object_and_liquid() {
    let mut h = Harness::new();
    h.console("setplayerstart 10.5 12.2");
    assert_eq!(h.world.player_start(), Some(Vec2F::new(10.5, 12.2)));

    let reply = h.console("placeobject crate left");
    assert!(reply.starts_with("Placed object 'crate' at [10, 12]"), "{}", reply);
    assert!(h.world.tile_entity_at(Vec2I::new(10, 12)).is_some());

    assert_eq!(h.console("spawnliquid lava"), "Invalid liquid 'lava'");
    let admin = CommandCaller::client(3, "op", true).at(Vec2F::new(40.0, 40.0));
    assert_eq!(h.run(&admin, "spawnliquid water 2"), "Spawned 2 water at [40, 40]");
    h.world.update();
    assert!(!h.world.liquid_at(Vec2I::new(40, 40)).is_empty() || !h.world.liquid_at(Vec2I::new(40, 39)).is_empty());
}

#[test]
fn test_world_state_commands() {
    let mut h = Harness::new();
    assert_eq!(h.console("setdungeonid 9 0 0 4 4"), "Set dungeon id 9 on [0, 0, 4, 4]");
    assert_eq!(h.console("settileprotection 9 true"), "Dungeon id 9 is now protected");
    assert!(h.world.is_tile_protected(Vec2I::new(2, 2)));
    assert!(h.console("settileprotection 9 maybe").starts_with("Invalid protection"));

    h.console("setbiome desert 0 0 50 50");
    assert_eq!(h.world.biome_at(Vec2I::new(10, 10)), Some("desert"));
    h.console("setweather sandstorm");
    assert_eq!(h.world.weather(), Some("sandstorm"));
    assert_eq!(h.console("setweather none"), "Weather cleared");
    assert_eq!(h.world.weather(), None);

    h.console("setuniverseflag outpost_built");
    assert!(h.world.universe_flag_set("outpost_built"));
    assert_eq!(h.console("resetuniverseflags"), "Cleared 1 universe flags");

    h.console("disablespawning");
    assert!(!h.world.spawning_enabled());
    h.console("enablespawning");
    assert!(h.world.spawning_enabled());

    h.console("timescale 0.5");
    assert_eq!(h.world.timescale(), 0.5);
    assert!(h.console("timescale -1").starts_with("Invalid timescale"));
    h.console("timestep 0.025");
    assert_eq!(h.world.timestep(), 0.025);
}

#[test]
fn test_scripts_run_from_console() {
    let mut h = Harness::new();
    assert_eq!(h.console("run return 'hello'"), "hello");
    assert_eq!(h.console(r#"run world.setProperty("mode", "siege")"#), "nil");
    assert_eq!(h.world.property("mode"), json!("siege"));

    h.world.set_player_start(Vec2F::new(5.0, 5.0));
    let id = h.world
        .spawn_entity(EntityType::Stagehand, "counter", Vec2F::new(5.0, 5.0), &json!(null))
        .unwrap();
    assert_eq!(h.console(&format!("entityeval {} return count + 1", id)), "42");
    assert_eq!(h.console("entityeval 999 return 1"), "No entity with id 999");
}

#[test]
fn test_connection_commands() {
    let mut h = Harness::new();
    h.server.clients = vec![client(2, "Nova"), client(3, "Griefer")];

    assert_eq!(h.console("list"), "$2 : Nova : -\n$3 : Griefer : -");
    assert_eq!(h.console("kick nova too loud"), "Kicked Nova");
    assert_eq!(h.server.kicked, vec![(2, "too loud".to_string())]);
    assert_eq!(h.console("kick nova"), "No player named 'nova' is connected");

    assert_eq!(h.console("ban griefer lava everywhere"), "Banned griefer");
    assert!(h.processor.bans().is_banned("Griefer"));
    assert_eq!(h.server.kicked.last(), Some(&(3, "lava everywhere".to_string())));
    assert_eq!(h.console("unban griefer"), "Unbanned griefer");
    assert_eq!(h.console("unban griefer"), "griefer is not banned");

    assert_eq!(h.console("reload"), "Assets reloaded");
    assert_eq!(h.server.reloads, 1);
    assert_eq!(h.console("warp 1 2"), "The console has no player to warp; name one");
}
