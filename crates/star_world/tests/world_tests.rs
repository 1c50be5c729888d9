//! Whole-world tests over a small asset tree: tiles, scripts, wires and
//! server/client replication

use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

use serde_json::json;
use star_asset::{Assets, AssetsSettings};
use star_net::NetCompatibilityRules;
use star_world::callbacks::eval_world_script;
use star_world::prelude::*;
use tempfile::TempDir;

const CLIENT: ConnectionId = 1;

fn write(dir: &Path, path: &str, contents: impl AsRef<[u8]>) {
    let full = dir.join(path.trim_start_matches('/'));
    fs::create_dir_all(full.parent().unwrap()).unwrap();
    fs::write(full, contents).unwrap();
}

fn asset_tree() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "/tiles/dirt.material", r#"{"materialId": 1, "materialName": "dirt"}"#);
    write(root, "/liquids/water.liquid", r#"{"liquidId": 1, "name": "water"}"#);
    write(
        root,
        "/stagehands/relay.stagehand",
        r#"{"type": "relay", "scripts": ["relay.lua"], "scriptDelta": 1}"#,
    );
    write(
        root,
        "/stagehands/relay.lua",
        r#"
        function init()
          message.setHandler("ping", function(isLocal, text)
            return text .. (isLocal and " local" or " remote")
          end)
        end
        "#,
    );
    write(
        root,
        "/objects/switch.object",
        r#"{"objectName": "switch", "outputNodes": [[0, 0]], "scripts": ["switch.lua"]}"#,
    );
    write(
        root,
        "/objects/switch.lua",
        r#"
        function init()
          message.setHandler("toggle", function(isLocal, on)
            object.setOutputNodeLevel(0, on)
            return on
          end)
        end
        "#,
    );
    write(
        root,
        "/objects/lamp.object",
        r#"{"objectName": "lamp", "inputNodes": [[0, 0]], "scripts": ["lamp.lua"]}"#,
    );
    write(
        root,
        "/objects/lamp.lua",
        "function onInputNodeChange(args) world.setProperty('lampLit', args.level) end",
    );
    dir
}

fn resources(dir: &TempDir) -> Rc<WorldResources> {
    let settings = AssetsSettings {
        worker_pool_size: 0,
        ..Default::default()
    };
    let assets = Assets::new(settings, [dir.path()]).expect("assets should open");
    WorldResources::load(Arc::new(assets)).expect("resources should load")
}

fn settings() -> WorldSettings {
    WorldSettings {
        size: Vec2I::new(100, 100),
        ..Default::default()
    }
}

fn server(resources: &Rc<WorldResources>) -> World {
    World::new(settings(), resources.clone(), WorldRole::Server).unwrap()
}

/// A server and a client world joined to each other
fn connected(resources: &Rc<WorldResources>) -> (World, World) {
    let mut server = server(resources);
    let mut client = World::new(settings(), resources.clone(), WorldRole::Client(CLIENT)).unwrap();
    server.add_peer(CLIENT, NetCompatibilityRules::latest()).unwrap();
    client.add_peer(SERVER_CONNECTION_ID, NetCompatibilityRules::latest()).unwrap();
    (server, client)
}

fn server_to_client(server: &mut World, client: &mut World) {
    let packets = server.take_outgoing(CLIENT).unwrap();
    client.handle_incoming(SERVER_CONNECTION_ID, packets).unwrap();
}

fn client_to_server(client: &mut World, server: &mut World) {
    let packets = client.take_outgoing(SERVER_CONNECTION_ID).unwrap();
    server.handle_incoming(CLIENT, packets).unwrap();
}

#[test]
fn test_material_placement_applies_next_step() {
    let dir = asset_tree();
    let resources = resources(&dir);
    let mut world = server(&resources);
    let dirt = resources.materials().material_id("dirt").unwrap();

    world.place_material(Vec2I::new(3, 3), TileLayer::Foreground, "dirt").unwrap();
    assert_ne!(world.material(Vec2I::new(3, 3), TileLayer::Foreground), dirt);
    world.update();
    assert_eq!(world.material(Vec2I::new(3, 3), TileLayer::Foreground), dirt);

    let unknown = world.place_material(Vec2I::new(4, 3), TileLayer::Foreground, "marble");
    assert!(matches!(unknown, Err(WorldError::UnknownConfig { kind: "material", .. })));
    let outside = world.place_material(Vec2I::new(500, 3), TileLayer::Foreground, "dirt");
    assert!(matches!(outside, Err(WorldError::InvalidPlacement { .. })));
}

#[test]
fn test_protected_dungeon_rejects_changes() {
    let dir = asset_tree();
    let resources = resources(&dir);
    let mut world = server(&resources);

    world.set_dungeon_id(RectI::from_coords(0, 0, 10, 10), 7);
    world.set_tile_protection(7, true);
    assert!(world.is_tile_protected(Vec2I::new(5, 5)));
    let result = world.place_material(Vec2I::new(5, 5), TileLayer::Foreground, "dirt");
    assert!(matches!(result, Err(WorldError::Protected(_))));

    world.set_tile_protection(7, false);
    assert!(world.place_material(Vec2I::new(5, 5), TileLayer::Foreground, "dirt").is_ok());
    assert_eq!(world.protected_dungeons().count(), 0);
}

#[test]
fn test_world_script_reads_and_writes_state() {
    let dir = asset_tree();
    let resources = resources(&dir);
    let mut world = server(&resources);

    let result = eval_world_script(&mut world, "world.setProperty('greeting', 'hi') return world.getProperty('greeting')");
    assert_eq!(result.unwrap(), json!("hi"));
    assert_eq!(world.property("greeting"), json!("hi"));

    let id = eval_world_script(&mut world, "return world.spawnStagehand({5, 5}, 'relay')").unwrap();
    let id = id.as_i64().unwrap() as EntityId;
    assert_eq!(world.entity(id).map(|e| e.entity_type()), Some(EntityType::Stagehand));

    assert!(eval_world_script(&mut world, "this is not lua").is_err());
}

#[test]
fn test_local_message_reaches_script_handler() {
    let dir = asset_tree();
    let resources = resources(&dir);
    let mut world = server(&resources);
    let id = world
        .spawn_entity(EntityType::Stagehand, "relay", Vec2F::new(5.0, 5.0), &json!({"uniqueId": "relay"}))
        .unwrap();

    let by_id = world.send_entity_message(MessageTarget::Id(id), "ping", vec![json!("hello")]);
    let by_unique = world.send_entity_message(MessageTarget::UniqueId("relay".into()), "ping", vec![json!("yo")]);
    let unhandled = world.send_entity_message(MessageTarget::Id(id), "shout", vec![]);
    let missing = world.send_entity_message(MessageTarget::UniqueId("nobody".into()), "ping", vec![]);
    assert!(!by_id.finished());

    world.update();
    assert_eq!(by_id.result(), Some(json!("hello local")));
    assert_eq!(by_unique.result(), Some(json!("yo local")));
    assert!(unhandled.finished() && !unhandled.succeeded());
    assert!(missing.error().is_some());
}

#[test]
fn test_wire_signal_arrives_the_step_after_output_changes() {
    let dir = asset_tree();
    let resources = resources(&dir);
    let mut world = server(&resources);
    let switch = world
        .place_object("switch", Vec2I::new(10, 10), Direction::Right, &Json::Null)
        .unwrap();
    world
        .place_object("lamp", Vec2I::new(14, 10), Direction::Right, &Json::Null)
        .unwrap();

    world
        .connect_wire(
            WireConnection::new(Vec2I::new(10, 10), 0),
            WireConnection::new(Vec2I::new(14, 10), 0),
        )
        .unwrap();
    let bad_node = world.connect_wire(
        WireConnection::new(Vec2I::new(10, 10), 3),
        WireConnection::new(Vec2I::new(14, 10), 0),
    );
    assert!(bad_node.is_err());

    let toggled = world.send_entity_message(MessageTarget::Id(switch), "toggle", vec![json!(true)]);
    world.update();
    assert_eq!(toggled.result(), Some(json!(true)));
    assert_eq!(world.property("lampLit"), Json::Null);

    world.update();
    assert_eq!(world.property("lampLit"), json!(true));
}

#[test]
fn test_broken_object_leaves_a_drop() {
    let dir = asset_tree();
    let resources = resources(&dir);
    let mut world = server(&resources);
    let lamp = world
        .place_object("lamp", Vec2I::new(20, 20), Direction::Left, &Json::Null)
        .unwrap();
    assert_eq!(world.tile_entity_at(Vec2I::new(20, 20)), Some(lamp));

    world.break_object(lamp, false).unwrap();
    world.update();
    assert!(world.entity(lamp).is_none());
    assert_eq!(world.tile_entity_at(Vec2I::new(20, 20)), None);
    let counts = world.entity_counts();
    assert_eq!(counts.get(&EntityType::ItemDrop), Some(&1));
}

#[test]
fn test_server_entities_and_tiles_replicate_to_client() {
    let dir = asset_tree();
    let resources = resources(&dir);
    let (mut server, mut client) = connected(&resources);
    let dirt = resources.materials().material_id("dirt").unwrap();

    let id = server
        .spawn_entity(EntityType::Stagehand, "relay", Vec2F::new(30.0, 40.0), &Json::Null)
        .unwrap();
    server.place_material(Vec2I::new(1, 1), TileLayer::Background, "dirt").unwrap();
    server.update();
    server_to_client(&mut server, &mut client);

    let replica = client.entity(id).expect("client should hold a replica");
    assert!(!replica.is_master());
    assert_eq!(replica.position(), Vec2F::new(30.0, 40.0));
    assert_eq!(client.material(Vec2I::new(1, 1), TileLayer::Background), dirt);

    server.remove_entity(id, true).unwrap();
    server_to_client(&mut server, &mut client);
    assert!(client.entity(id).is_none());
}

#[test]
fn test_client_message_is_routed_to_the_master() {
    let dir = asset_tree();
    let resources = resources(&dir);
    let (mut server, mut client) = connected(&resources);
    let id = server
        .spawn_entity(EntityType::Stagehand, "relay", Vec2F::new(5.0, 5.0), &Json::Null)
        .unwrap();
    server.update();
    server_to_client(&mut server, &mut client);

    let reply = client.send_entity_message(MessageTarget::Id(id), "ping", vec![json!("hello")]);
    client.update();
    client_to_server(&mut client, &mut server);
    server.update();
    server_to_client(&mut server, &mut client);

    assert_eq!(reply.result(), Some(json!("hello remote")));
}

#[test]
fn test_client_mastered_drop_and_disconnect() {
    let dir = asset_tree();
    let resources = resources(&dir);
    let (mut server, mut client) = connected(&resources);

    let refused = client.spawn_entity(EntityType::Stagehand, "relay", Vec2F::ZERO, &Json::Null);
    assert!(matches!(refused, Err(WorldError::InvalidSpawn(_))));
    assert!(matches!(
        client.place_material(Vec2I::new(1, 1), TileLayer::Foreground, "dirt"),
        Err(WorldError::ServerOnly(_))
    ));

    let drop = client.spawn_item_drop("dirt", 4, Vec2F::new(50.0, 60.0), &Json::Null).unwrap();
    client.update();
    client_to_server(&mut client, &mut server);
    assert_eq!(server.entity_as::<ItemDrop>(drop).map(|d| d.count()), Some(4));
    assert!(!server.entity(drop).unwrap().is_master());

    server.remove_peer(CLIENT).unwrap();
    assert!(server.entity(drop).is_none());
    assert!(server.peer_connections().is_empty());
}

#[test]
fn test_unknown_peer_is_rejected() {
    let dir = asset_tree();
    let resources = resources(&dir);
    let mut world = server(&resources);
    assert!(matches!(world.take_outgoing(9), Err(WorldError::UnknownPeer(9))));
    assert!(world.add_peer(SERVER_CONNECTION_ID, NetCompatibilityRules::latest()).is_err());
    assert!(world.handle_incoming(9, Vec::new()).is_err());
}
