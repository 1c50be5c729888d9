//! The server host
//!
//! Owns the asset registry, the one server world and the client table,
//! and routes console and chat commands into the world. The transport is
//! the embedder's: it calls [`ServerHost::connect`] when a client says
//! hello, feeds its packets to [`ServerHost::handle_incoming`] and ships
//! whatever [`ServerHost::take_outgoing`] returns.

use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use star_asset::{Assets, AssetWatcher};
use star_net::NetCompatibilityRules;
use star_shell::{ClientInfo, CommandCaller, CommandProcessor, ServerControl};
use star_world::entity::{connection_for_entity, MAX_CLIENT_CONNECTION_ID};
use star_world::{ConnectionId, EntityType, Player, World, WorldPacket, WorldResources, WorldRole};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};

/// Connected clients, plus the requests commands make of the server
pub struct ClientTable {
    clients: BTreeMap<ConnectionId, ClientInfo>,
    assets: Arc<Assets>,
    kicks: Vec<(ConnectionId, String)>,
    reloaded: Option<Rc<WorldResources>>,
}

impl ClientTable {
    fn new(assets: Arc<Assets>) -> Self {
        Self {
            clients: BTreeMap::new(),
            assets,
            kicks: Vec::new(),
            reloaded: None,
        }
    }

    pub fn get(&self, connection: ConnectionId) -> Option<&ClientInfo> {
        self.clients.get(&connection)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    fn free_connection(&self) -> Option<ConnectionId> {
        (1..=MAX_CLIENT_CONNECTION_ID).find(|c| !self.clients.contains_key(c))
    }
}

impl ServerControl for ClientTable {
    fn clients(&self) -> Vec<ClientInfo> {
        self.clients.values().cloned().collect()
    }

    fn kick(&mut self, connection: ConnectionId, reason: &str) -> bool {
        if self.clients.remove(&connection).is_none() {
            return false;
        }
        self.kicks.push((connection, reason.to_string()));
        true
    }

    fn reload(&mut self) -> Result<(), String> {
        self.assets.hot_reload().map_err(|e| e.to_string())?;
        let resources = WorldResources::load(self.assets.clone()).map_err(|e| e.to_string())?;
        self.reloaded = Some(resources);
        Ok(())
    }
}

pub struct ServerHost {
    config: ServerConfig,
    assets: Arc<Assets>,
    world: World,
    processor: CommandProcessor,
    clients: ClientTable,
    watcher: Option<AssetWatcher>,
    disconnected: Vec<(ConnectionId, String)>,
    cleanup_interval: Duration,
    last_cleanup: Instant,
}

impl ServerHost {
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let assets = Arc::new(Assets::new(config.assets.settings.clone(), config.assets.sources.clone())?);
        log::info!(
            "Assets loaded from {} sources, digest {}",
            assets.asset_sources().len(),
            assets.digest_hex()
        );

        let watcher = if config.hot_reload {
            let mut watcher = AssetWatcher::new()?;
            for dir in assets.directory_sources() {
                watcher.watch(dir)?;
            }
            Some(watcher)
        } else {
            None
        };

        let resources = WorldResources::load(assets.clone())?;
        let world = World::new(config.world_settings(), resources, WorldRole::Server)?;
        let cleanup_interval = Duration::try_from_secs_f64(config.asset_cleanup_interval).unwrap_or(Duration::ZERO);

        Ok(Self {
            config,
            clients: ClientTable::new(assets.clone()),
            assets,
            world,
            processor: CommandProcessor::new(),
            watcher,
            disconnected: Vec::new(),
            cleanup_interval,
            last_cleanup: Instant::now(),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn assets(&self) -> &Arc<Assets> {
        &self.assets
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn processor_mut(&mut self) -> &mut CommandProcessor {
        &mut self.processor
    }

    pub fn clients(&self) -> &ClientTable {
        &self.clients
    }

    /// Admit a client. `digest` is the hex asset digest the client
    /// reports; `None` skips the check.
    pub fn connect(
        &mut self,
        name: &str,
        remote_rules: NetCompatibilityRules,
        digest: Option<&str>,
    ) -> ServerResult<(ConnectionId, NetCompatibilityRules)> {
        if let Some(reason) = self.processor.bans().reason(name) {
            return Err(ServerError::Banned {
                name: name.to_string(),
                reason: reason.to_string(),
            });
        }
        if self.clients.client_named(name).is_some() {
            return Err(ServerError::NameTaken(name.to_string()));
        }
        if let Some(client) = digest {
            let server = self.assets.digest_hex();
            if !client.eq_ignore_ascii_case(&server) {
                return Err(ServerError::DigestMismatch {
                    server,
                    client: client.to_string(),
                });
            }
        }
        if self.clients.len() >= self.config.max_clients {
            return Err(ServerError::ServerFull);
        }
        let connection = self.clients.free_connection().ok_or(ServerError::ServerFull)?;

        let rules = self.world.add_peer(connection, remote_rules)?;
        let admin = self.config.is_admin(name);
        self.clients.clients.insert(
            connection,
            ClientInfo {
                connection,
                name: name.to_string(),
                admin,
                player: None,
            },
        );
        log::info!("{} connected as ${}{}", name, connection, if admin { " (admin)" } else { "" });
        Ok((connection, rules))
    }

    pub fn disconnect(&mut self, connection: ConnectionId) -> ServerResult<()> {
        let client = self
            .clients
            .clients
            .remove(&connection)
            .ok_or(ServerError::UnknownConnection(connection))?;
        self.world.remove_peer(connection)?;
        log::info!("{} (${}) disconnected", client.name, connection);
        Ok(())
    }

    /// Clients the server dropped since the last call, with the reason.
    /// The transport closes these connections.
    pub fn take_disconnected(&mut self) -> Vec<(ConnectionId, String)> {
        std::mem::take(&mut self.disconnected)
    }

    /// Apply a client's packets. A client that sends something malformed
    /// is dropped.
    pub fn handle_incoming(&mut self, connection: ConnectionId, packets: Vec<WorldPacket>) -> ServerResult<()> {
        if self.clients.get(connection).is_none() {
            return Err(ServerError::UnknownConnection(connection));
        }
        if let Err(e) = self.world.handle_incoming(connection, packets) {
            log::warn!("Dropping connection {}: {}", connection, e);
            self.clients.clients.remove(&connection);
            if let Err(e) = self.world.remove_peer(connection) {
                log::warn!("Failed to remove peer {}: {}", connection, e);
            }
            self.disconnected.push((connection, e.to_string()));
            return Err(e.into());
        }
        Ok(())
    }

    pub fn take_outgoing(&mut self, connection: ConnectionId) -> ServerResult<Vec<WorldPacket>> {
        Ok(self.world.take_outgoing(connection)?)
    }

    /// Run a line typed at the server console
    pub fn console_command(&mut self, line: &str) -> String {
        self.run_command(&CommandCaller::console(), line)
    }

    /// Run a chat command from a connected client, standing where its
    /// player stands
    pub fn client_command(&mut self, connection: ConnectionId, line: &str) -> ServerResult<String> {
        let client = self
            .clients
            .get(connection)
            .ok_or(ServerError::UnknownConnection(connection))?;
        let mut caller = CommandCaller::client(connection, client.name.clone(), client.admin);
        if let Some(position) = client.player.and_then(|id| self.world.entity(id)).map(|e| e.position()) {
            caller = caller.at(position);
        }
        Ok(self.run_command(&caller, line))
    }

    fn run_command(&mut self, caller: &CommandCaller, line: &str) -> String {
        let reply = self.processor.execute(caller, &mut self.world, &mut self.clients, line);
        self.apply_requests();
        reply
    }

    fn apply_requests(&mut self) {
        for (connection, reason) in std::mem::take(&mut self.clients.kicks) {
            if let Err(e) = self.world.remove_peer(connection) {
                log::warn!("Failed to remove peer {}: {}", connection, e);
            }
            log::info!("Kicked ${}: {}", connection, reason);
            self.disconnected.push((connection, reason));
        }
        if let Some(resources) = self.clients.reloaded.take() {
            self.world.set_resources(resources);
            log::info!("World resources rebuilt, digest now {}", self.assets.digest_hex());
        }
    }

    /// One world step, after picking up changed asset files and sweeping
    /// expired assets out of the cache
    pub fn tick(&mut self) {
        let changed = self.watcher.as_mut().map(|w| w.poll()).unwrap_or_default();
        if let Some(change) = changed.first() {
            log::info!("{} asset files changed ({} first), reloading", changed.len(), change.asset_path);
            if let Err(e) = self.clients.reload() {
                log::error!("Asset reload failed: {}", e);
            }
        }
        self.apply_requests();

        if self.last_cleanup.elapsed() >= self.cleanup_interval {
            self.assets.cleanup();
            self.last_cleanup = Instant::now();
        }

        self.world.update();
        self.refresh_players();
    }

    /// Point each client at the player entity it masters
    fn refresh_players(&mut self) {
        let players: Vec<_> = self
            .world
            .entity_ids()
            .into_iter()
            .filter(|id| self.world.entity_as::<Player>(*id).is_some())
            .filter_map(|id| connection_for_entity(id).map(|c| (c, id)))
            .collect();
        for client in self.clients.clients.values_mut() {
            client.player = players.iter().find(|(c, _)| *c == client.connection).map(|(_, id)| *id);
        }
    }

    /// Entity counts for the status line
    pub fn status(&self) -> String {
        let counts = self.world.entity_counts();
        format!(
            "{} clients, {} entities ({} players), step {}",
            self.clients.len(),
            self.world.entity_count(),
            counts.get(&EntityType::Player).copied().unwrap_or(0),
            self.world.current_step()
        )
    }
}
