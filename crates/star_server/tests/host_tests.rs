//! Server host tests: admission, chat commands, reloads and dropping
//! misbehaving clients

use std::fs;
use std::path::Path;

use star_asset::AssetType;
use star_net::NetCompatibilityRules;
use star_server::*;
use star_shell::ServerControl;
use star_world::{
    EntityType, Json, TileLayer, Vec2F, Vec2I, World, WorldError, WorldPacket, WorldResources, WorldRole,
    SERVER_CONNECTION_ID,
};
use tempfile::TempDir;

fn write(dir: &Path, path: &str, contents: &str) {
    let full = dir.join(path.trim_start_matches('/'));
    fs::create_dir_all(full.parent().unwrap()).unwrap();
    fs::write(full, contents).unwrap();
}

fn host_with(admins: &[&str], max_clients: usize) -> (TempDir, ServerHost) {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "/tiles/dirt.material", r#"{"materialId": 1, "materialName": "dirt"}"#);
    write(dir.path(), "/monsters/poptop.monstertype", r#"{"type": "poptop"}"#);

    let mut config = ServerConfig::default();
    config.assets.sources = vec![dir.path().to_path_buf()];
    config.assets.settings.worker_pool_size = 0;
    config.world.width = 100;
    config.world.height = 100;
    config.admins = admins.iter().map(|s| s.to_string()).collect();
    config.max_clients = max_clients;
    let host = ServerHost::new(config).unwrap();
    (dir, host)
}

fn host() -> (TempDir, ServerHost) {
    host_with(&["Kae"], 8)
}

fn latest() -> NetCompatibilityRules {
    NetCompatibilityRules::latest()
}

#[test]
fn test_admission() {
    let (_dir, mut host) = host_with(&[], 2);
    let digest = host.assets().digest_hex();

    let (nova, _) = host.connect("nova", latest(), Some(&digest)).unwrap();
    assert!(matches!(host.connect("NOVA", latest(), None), Err(ServerError::NameTaken(_))));
    assert!(matches!(
        host.connect("vex", latest(), Some("00")),
        Err(ServerError::DigestMismatch { .. })
    ));
    let (vex, _) = host.connect("vex", latest(), None).unwrap();
    assert_ne!(nova, vex);
    assert!(matches!(host.connect("third", latest(), None), Err(ServerError::ServerFull)));
    assert_eq!(host.world().peer_connections().len(), 2);

    host.disconnect(nova).unwrap();
    assert!(matches!(host.disconnect(nova), Err(ServerError::UnknownConnection(_))));
    assert_eq!(host.clients().len(), 1);
    assert_eq!(host.world().peer_connections(), vec![vex]);
}

#[test]
fn test_admins_come_from_config() {
    let (_dir, mut host) = host();
    let (nova, _) = host.connect("nova", latest(), None).unwrap();
    let (kae, _) = host.connect("kae", latest(), None).unwrap();

    assert_eq!(host.client_command(nova, "entitycount").unwrap(), "Insufficient privileges for 'entitycount'");
    assert_eq!(host.client_command(kae, "entitycount").unwrap(), "0 entities");
    assert_eq!(host.client_command(kae, "whoami").unwrap(), "Server: You are kae. You are an Admin");
    assert!(host.client_command(99, "help").is_err());
    assert_eq!(host.console_command("list"), "$1 : nova : -\n$2 : kae : -");
}

#[test]
fn test_chat_commands_run_where_the_player_stands() {
    let (_dir, mut host) = host();
    let (kae, rules) = host.connect("kae", latest(), None).unwrap();

    let resources = WorldResources::load(host.assets().clone()).unwrap();
    let mut client = World::new(host.config().world_settings(), resources, WorldRole::Client(kae)).unwrap();
    client.add_peer(SERVER_CONNECTION_ID, rules).unwrap();
    let player = client
        .spawn_entity(EntityType::Player, "kae", Vec2F::new(30.0, 40.0), &Json::Null)
        .unwrap();
    client.update();
    let packets = client.take_outgoing(SERVER_CONNECTION_ID).unwrap();
    host.handle_incoming(kae, packets).unwrap();
    host.tick();

    let info = host.clients().get(kae).unwrap();
    assert_eq!(info.player, Some(player));
    let standing = host.world().entity(player).unwrap().position();

    let reply = host.client_command(kae, "spawnmonster poptop").unwrap();
    let id: i32 = reply.rsplit(' ').next().unwrap().parse().unwrap();
    assert_eq!(host.world().entity(id).unwrap().position(), standing);
    assert_eq!(host.console_command("list"), format!("$1 : kae : {}", player));

    host.disconnect(kae).unwrap();
    assert!(host.world().entity(player).is_none());
}

#[test]
fn test_ban_kicks_and_blocks() {
    let (_dir, mut host) = host();
    let (griefer, _) = host.connect("Griefer", latest(), None).unwrap();

    assert_eq!(host.console_command("ban griefer lava everywhere"), "Banned griefer");
    assert_eq!(host.take_disconnected(), vec![(griefer, "lava everywhere".to_string())]);
    assert!(host.clients().is_empty());
    assert!(host.world().peer_connections().is_empty());

    match host.connect("griefer", latest(), None) {
        Err(ServerError::Banned { reason, .. }) => assert_eq!(reason, "lava everywhere"),
        other => panic!("expected a ban, got {:?}", other.map(|(c, _)| c)),
    }
    host.console_command("unban griefer");
    assert!(host.connect("griefer", latest(), None).is_ok());
}

#[test]
fn test_malformed_packets_drop_the_client() {
    let (_dir, mut host) = host();
    let (nova, _) = host.connect("nova", latest(), None).unwrap();

    let server_entity = host
        .world_mut()
        .spawn_entity(EntityType::Monster, "poptop", Vec2F::new(10.0, 10.0), &Json::Null)
        .unwrap();
    let result = host.handle_incoming(
        nova,
        vec![WorldPacket::EntityDestroy {
            entity_id: server_entity,
            death: true,
        }],
    );
    assert!(matches!(result, Err(ServerError::World(WorldError::MalformedPacket(_)))));
    assert!(host.world().entity(server_entity).is_some());
    assert_eq!(host.take_disconnected().len(), 1);
    assert!(host.clients().get(nova).is_none());
    assert!(matches!(host.take_outgoing(nova), Err(ServerError::World(_))));
}

#[test]
fn test_reload_picks_up_new_assets() {
    let (dir, mut host) = host();
    let stone = |host: &mut ServerHost| {
        host.world_mut()
            .place_material(Vec2I::new(3, 3), TileLayer::Foreground, "stone")
    };
    assert!(matches!(stone(&mut host), Err(WorldError::UnknownConfig { .. })));

    write(dir.path(), "/tiles/stone.material", r#"{"materialId": 2, "materialName": "stone"}"#);
    assert_eq!(host.console_command("reload"), "Assets reloaded");
    assert!(stone(&mut host).is_ok());
    host.tick();
    assert_eq!(host.world().material(Vec2I::new(3, 3), TileLayer::Foreground), 2);
}

#[test]
fn test_tick_evicts_expired_assets() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "/tiles/dirt.material", r#"{"materialId": 1, "materialName": "dirt"}"#);
    write(dir.path(), "/notes/readme.txt", "dig down");
    write(dir.path(), "/notes/credits.txt", "everyone");

    let mut config = ServerConfig::default();
    config.assets.sources = vec![dir.path().to_path_buf()];
    config.assets.settings.worker_pool_size = 0;
    config.assets.settings.asset_time_to_live = 0.0;
    config.asset_cleanup_interval = 0.0;
    config.world.width = 100;
    config.world.height = 100;
    let mut host = ServerHost::new(config).unwrap();

    host.assets().bytes("/notes/readme.txt").unwrap();
    let held = host.assets().bytes("/notes/credits.txt").unwrap();
    assert!(host.assets().is_cached(AssetType::Bytes, "/notes/readme.txt"));

    host.tick();
    assert!(!host.assets().is_cached(AssetType::Bytes, "/notes/readme.txt"));
    assert!(host.assets().is_cached(AssetType::Bytes, "/notes/credits.txt"));
    assert_eq!(held.as_slice(), b"everyone");
}

#[test]
fn test_client_table_kick() {
    let (_dir, mut host) = host();
    let (nova, _) = host.connect("nova", latest(), None).unwrap();
    assert_eq!(host.console_command("kick nova afk"), "Kicked nova");
    assert_eq!(host.take_disconnected(), vec![(nova, "afk".to_string())]);
    assert!(host.clients().client_named("nova").is_none());
    assert!(host.status().starts_with("0 clients"));
}
