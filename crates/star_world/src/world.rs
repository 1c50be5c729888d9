//! The world: tile grid, entity table and the per-step loop
//!
//! A [`World`] is either the server's master copy or a client's view of it.
//! The server simulates every entity it created and relays entities that
//! clients master; a client simulates the entities it created in its own id
//! space and applies the server's packets for everything else.
//!
//! One step runs, in order: queued tile modifications, liquid flow, entity
//! updates by type then id, wires, damage, entity messages, removal of
//! finished entities, then per-peer packet batches.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::mem;
use std::rc::Rc;

use star_core::{Json, JsonObject};
use star_math::{RectF, RectI, Vec2F, Vec2I};
use star_net::NetCompatibilityRules;
use star_physics::collision::liquid_coverage;
use star_physics::{CollisionBlock, CollisionKind, CollisionWorld, Direction, MovingCollision, PhysicsForceRegion};

use crate::collision::CollisionCache;
use crate::damage::{RecentHits, DEFAULT_DAMAGE_REPEAT_TIMEOUT};
use crate::entities::Object;
use crate::entity::{
    connection_for_entity, ClientEntityMode, ConnectionId, Entity, EntityId, EntityIdMap, EntityMode, EntityType,
    MAX_CLIENT_CONNECTION_ID, SERVER_CONNECTION_ID,
};
use crate::error::{Result, WorldError};
use crate::interaction::{InteractAction, InteractRequest};
use crate::liquid::update_liquids;
use crate::material::{MaterialDatabase, MaterialId, EMPTY_MATERIAL};
use crate::packets::{MessageTarget, WorldPacket};
use crate::resources::WorldResources;
use crate::rpc::RpcPromise;
use crate::settings::{WorldClock, WorldSettings};
use crate::tile::{DungeonId, LiquidId, LiquidLevel, Tile, TileGrid, TileLayer, TileModification};
use crate::wire::{update_wires, WireConnection};

/// Which side of a connection this world is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorldRole {
    Server,
    Client(ConnectionId),
}

impl WorldRole {
    pub fn connection(self) -> ConnectionId {
        match self {
            WorldRole::Server => SERVER_CONNECTION_ID,
            WorldRole::Client(connection) => connection,
        }
    }
}

/// Replication state for one remote world
#[derive(Debug)]
struct Peer {
    rules: NetCompatibilityRules,
    /// Net version each replicated entity was last sent at
    versions: HashMap<EntityId, u64>,
    outgoing: Vec<WorldPacket>,
}

impl Peer {
    fn new(rules: NetCompatibilityRules) -> Self {
        Self {
            rules,
            versions: HashMap::new(),
            outgoing: Vec::new(),
        }
    }
}

/// Where the answer to a message goes
#[derive(Debug)]
enum Reply {
    Promise(RpcPromise),
    Peer { connection: ConnectionId, uuid: String },
}

#[derive(Debug)]
struct PendingMessage {
    from_connection: ConnectionId,
    target: MessageTarget,
    name: String,
    args: Vec<Json>,
    reply: Reply,
}

#[derive(Debug, Clone, PartialEq)]
struct BiomeRegion {
    region: RectI,
    biome: String,
}

pub struct World {
    role: WorldRole,
    settings: WorldSettings,
    update_order: Vec<EntityType>,
    resources: Rc<WorldResources>,
    clock: WorldClock,

    tiles: TileGrid,
    collision_cache: CollisionCache,
    pending_tile_modifications: Vec<(Vec2I, TileModification)>,
    dirty_tiles: BTreeSet<Vec2I>,
    protected_dungeons: BTreeSet<DungeonId>,

    entities: BTreeMap<EntityId, Box<dyn Entity>>,
    ids: EntityIdMap,
    unique_ids: HashMap<String, EntityId>,
    /// Occupied tile to the tile entity occupying it
    tile_entity_spaces: HashMap<Vec2I, EntityId>,
    recent_hits: RecentHits,

    messages: VecDeque<PendingMessage>,
    /// Messages sent on to another world, by uuid, with the peer they went to
    forwarded: HashMap<String, (ConnectionId, Reply)>,
    next_message_id: u64,

    peers: BTreeMap<ConnectionId, Peer>,
    next_interact_id: u64,
    interact_results: Vec<(u64, InteractAction)>,

    properties: JsonObject,
    universe_flags: BTreeSet<String>,
    weather: Option<String>,
    player_start: Option<Vec2F>,
    biome_regions: Vec<BiomeRegion>,
    spawning_enabled: bool,
}

impl World {
    pub fn new(settings: WorldSettings, resources: Rc<WorldResources>, role: WorldRole) -> Result<Self> {
        let connection = role.connection();
        if connection > MAX_CLIENT_CONNECTION_ID {
            return Err(WorldError::UnknownPeer(connection));
        }
        let ids = EntityIdMap::new(connection)?;
        log::info!(
            "creating {:?} world {}x{} (gravity {})",
            role,
            settings.size.x,
            settings.size.y,
            settings.gravity
        );
        Ok(Self {
            role,
            update_order: settings.resolved_update_order(),
            clock: WorldClock::new(settings.timestep),
            tiles: TileGrid::new(settings.size),
            settings,
            resources,
            collision_cache: CollisionCache::new(),
            pending_tile_modifications: Vec::new(),
            dirty_tiles: BTreeSet::new(),
            protected_dungeons: BTreeSet::new(),
            entities: BTreeMap::new(),
            ids,
            unique_ids: HashMap::new(),
            tile_entity_spaces: HashMap::new(),
            recent_hits: RecentHits::default(),
            messages: VecDeque::new(),
            forwarded: HashMap::new(),
            next_message_id: 0,
            peers: BTreeMap::new(),
            next_interact_id: 0,
            interact_results: Vec::new(),
            properties: JsonObject::new(),
            universe_flags: BTreeSet::new(),
            weather: None,
            player_start: None,
            biome_regions: Vec::new(),
            spawning_enabled: true,
        })
    }

    #[inline]
    pub fn role(&self) -> WorldRole {
        self.role
    }

    #[inline]
    pub fn is_server(&self) -> bool {
        self.role == WorldRole::Server
    }

    #[inline]
    pub fn connection(&self) -> ConnectionId {
        self.role.connection()
    }

    pub fn settings(&self) -> &WorldSettings {
        &self.settings
    }

    pub fn resources(&self) -> &Rc<WorldResources> {
        &self.resources
    }

    /// Swap in freshly loaded resources; running scripts keep their
    /// current contexts until re-initialised
    pub fn set_resources(&mut self, resources: Rc<WorldResources>) {
        self.resources = resources;
        self.collision_cache.clear();
    }

    // -- Clock --

    pub fn clock(&self) -> &WorldClock {
        &self.clock
    }

    pub fn time(&self) -> f64 {
        self.clock.time()
    }

    pub fn current_step(&self) -> u64 {
        self.clock.step()
    }

    pub fn timescale(&self) -> f32 {
        self.clock.timescale()
    }

    pub fn set_timescale(&mut self, timescale: f32) {
        self.clock.set_timescale(timescale);
    }

    pub fn timestep(&self) -> f32 {
        self.clock.timestep()
    }

    pub fn set_timestep(&mut self, timestep: f32) {
        self.clock.set_timestep(timestep);
    }

    // -- Tiles --

    pub fn tiles(&self) -> &TileGrid {
        &self.tiles
    }

    pub fn tile(&self, position: Vec2I) -> Tile {
        self.tiles.get(position)
    }

    pub fn material(&self, position: Vec2I, layer: TileLayer) -> MaterialId {
        self.tiles.get(position).material(layer)
    }

    /// Queue a change for the start of the next step. Fails immediately
    /// when the change could never apply.
    pub fn modify_tile(&mut self, position: Vec2I, modification: TileModification) -> Result<()> {
        if !self.is_server() {
            return Err(WorldError::ServerOnly("tile modification"));
        }
        self.validate_modification(position, &modification)?;
        self.pending_tile_modifications.push((position, modification));
        Ok(())
    }

    /// Place a material by name
    pub fn place_material(&mut self, position: Vec2I, layer: TileLayer, material: &str) -> Result<()> {
        let id = self
            .resources
            .materials()
            .material_id(material)
            .ok_or_else(|| WorldError::UnknownConfig {
                kind: "material",
                name: material.to_string(),
            })?;
        self.modify_tile(position, TileModification::PlaceMaterial { layer, material: id })
    }

    pub fn spawn_liquid(&mut self, position: Vec2I, liquid: LiquidId, quantity: f32) -> Result<()> {
        self.modify_tile(position, TileModification::PlaceLiquid { liquid, quantity })
    }

    pub fn liquid_at(&self, position: Vec2I) -> LiquidLevel {
        self.tiles.get(position).liquid
    }

    fn validate_modification(&self, position: Vec2I, modification: &TileModification) -> Result<()> {
        let invalid = |reason: &str| WorldError::InvalidPlacement {
            name: "tile".to_string(),
            position,
            reason: reason.to_string(),
        };
        if !self.tiles.contains(position) {
            return Err(invalid("outside the world"));
        }
        if self.is_tile_protected(position) {
            return Err(WorldError::Protected(position));
        }
        let tile = self.tiles.get(position);
        match *modification {
            TileModification::PlaceMaterial { layer, material } => {
                if !self.resources.materials().is_placeable(material) {
                    return Err(invalid("material is not placeable"));
                }
                if tile.material(layer) != EMPTY_MATERIAL {
                    return Err(invalid("tile is occupied"));
                }
                if layer == TileLayer::Foreground && self.tile_entity_spaces.contains_key(&position) {
                    return Err(invalid("an object occupies the tile"));
                }
            }
            TileModification::RemoveMaterial { layer } => {
                let material = tile.material(layer);
                if material == EMPTY_MATERIAL {
                    return Err(invalid("nothing to remove"));
                }
                if MaterialDatabase::is_meta(material) {
                    return Err(invalid("metamaterials cannot be removed"));
                }
            }
            TileModification::PlaceLiquid { liquid, quantity } => {
                if self.resources.liquids().info(liquid).is_none() {
                    return Err(WorldError::UnknownConfig {
                        kind: "liquid",
                        name: liquid.to_string(),
                    });
                }
                if quantity <= 0.0 {
                    return Err(invalid("liquid quantity must be positive"));
                }
                if tile.collision.is_solid() {
                    return Err(invalid("tile is solid"));
                }
                if !tile.liquid.is_empty() && tile.liquid.liquid != liquid {
                    return Err(invalid("tile holds another liquid"));
                }
            }
        }
        Ok(())
    }

    fn apply_tile_modifications(&mut self) {
        for (position, modification) in mem::take(&mut self.pending_tile_modifications) {
            if let Err(e) = self.validate_modification(position, &modification) {
                log::debug!("dropping tile modification at {:?}: {}", position, e);
                continue;
            }
            match modification {
                TileModification::PlaceMaterial { layer, material } => self.set_material(position, layer, material),
                TileModification::RemoveMaterial { layer } => self.set_material(position, layer, EMPTY_MATERIAL),
                TileModification::PlaceLiquid { liquid, quantity } => {
                    if let Some(tile) = self.tiles.get_mut(position) {
                        tile.liquid.liquid = liquid;
                        tile.liquid.level += quantity;
                    }
                    self.dirty_tiles.insert(position);
                }
            }
        }
    }

    /// Write a material without validation and refresh everything that
    /// depends on it
    fn set_material(&mut self, position: Vec2I, layer: TileLayer, material: MaterialId) {
        let collision = self.resources.materials().collision_kind(material);
        let Some(tile) = self.tiles.get_mut(position) else {
            return;
        };
        match layer {
            TileLayer::Foreground => {
                tile.foreground = material;
                tile.collision = if material == EMPTY_MATERIAL {
                    CollisionKind::None
                } else {
                    collision
                };
            }
            TileLayer::Background => tile.background = material,
        }
        self.tile_changed(position);
    }

    fn tile_changed(&mut self, position: Vec2I) {
        self.collision_cache.invalidate(position);
        self.dirty_tiles.insert(position);

        let mut neighbors: BTreeSet<EntityId> = BTreeSet::new();
        for dy in -1..=1 {
            for dx in -1..=1 {
                if let Some(id) = self.tile_entity_spaces.get(&(position + Vec2I::new(dx, dy))) {
                    neighbors.insert(*id);
                }
            }
        }
        for id in neighbors {
            if let Some(tile_entity) = self.entities.get_mut(&id).and_then(|e| e.as_tile_entity_mut()) {
                tile_entity.neighbors_changed();
            }
        }
    }

    pub fn dungeon_id(&self, position: Vec2I) -> DungeonId {
        self.tiles.get(position).dungeon_id
    }

    pub fn set_dungeon_id(&mut self, region: RectI, dungeon: DungeonId) {
        let region = region.intersection(&self.tiles.bounds());
        for position in region.tiles() {
            if let Some(tile) = self.tiles.get_mut(position) {
                tile.dungeon_id = dungeon;
                self.dirty_tiles.insert(position);
            }
        }
    }

    pub fn is_tile_protected(&self, position: Vec2I) -> bool {
        self.protected_dungeons.contains(&self.tiles.get(position).dungeon_id)
    }

    pub fn set_tile_protection(&mut self, dungeon: DungeonId, protected: bool) {
        if protected {
            self.protected_dungeons.insert(dungeon);
        } else {
            self.protected_dungeons.remove(&dungeon);
        }
    }

    pub fn protected_dungeons(&self) -> impl Iterator<Item = DungeonId> + '_ {
        self.protected_dungeons.iter().copied()
    }

    // -- Entities --

    /// Add an entity this world will master
    pub fn add_entity(&mut self, entity: Box<dyn Entity>) -> Result<EntityId> {
        if !self.is_server() && entity.client_entity_mode() == ClientEntityMode::ClientSlaveOnly {
            return Err(WorldError::InvalidSpawn(format!(
                "{} entities cannot be mastered by a client",
                entity.entity_type().name()
            )));
        }
        if let Some(unique) = entity.unique_id() {
            if self.unique_ids.contains_key(&unique) {
                return Err(WorldError::DuplicateUniqueId(unique));
            }
        }
        let id = self.ids.reserve()?;
        self.insert_entity(entity, id, EntityMode::Master)
    }

    fn insert_entity(&mut self, mut entity: Box<dyn Entity>, id: EntityId, mode: EntityMode) -> Result<EntityId> {
        if let Err(e) = entity.init(self, id, mode) {
            if mode == EntityMode::Master {
                self.ids.release(id);
            }
            return Err(e);
        }
        if mode == EntityMode::Slave && self.settings.interpolation_time > 0.0 {
            entity.enable_interpolation(self.settings.extrapolation_hint);
        }
        if let Some(unique) = entity.unique_id() {
            self.unique_ids.insert(unique, id);
        }
        self.claim_tile_spaces(id, entity.as_ref());
        log::debug!(
            "added {} {} '{}' as {:?}",
            entity.entity_type().name(),
            id,
            entity.name(),
            mode
        );
        self.entities.insert(id, entity);
        Ok(id)
    }

    fn claim_tile_spaces(&mut self, id: EntityId, entity: &dyn Entity) {
        let Some(tile_entity) = entity.as_tile_entity() else {
            return;
        };
        for space in tile_entity.occupied_spaces() {
            self.tile_entity_spaces.insert(space, id);
        }
        let base = tile_entity.tile_position();
        for (offset, material) in tile_entity.material_spaces() {
            let position = base + offset;
            if self.tiles.get(position).foreground == EMPTY_MATERIAL {
                self.set_material(position, TileLayer::Foreground, material);
            }
        }
    }

    fn release_tile_spaces(&mut self, id: EntityId, entity: &dyn Entity) {
        let Some(tile_entity) = entity.as_tile_entity() else {
            return;
        };
        self.tile_entity_spaces.retain(|_, owner| *owner != id);
        let base = tile_entity.tile_position();
        for (offset, material) in tile_entity.material_spaces() {
            let position = base + offset;
            if self.tiles.get(position).foreground == material {
                self.set_material(position, TileLayer::Foreground, EMPTY_MATERIAL);
            }
        }
    }

    /// Remove an entity now. `death` tells peers whether it died or just
    /// left their view.
    pub fn remove_entity(&mut self, id: EntityId, death: bool) -> Result<()> {
        let mut entity = self.entities.remove(&id).ok_or(WorldError::EntityNotFound(id))?;
        self.disconnect_entity_wires(entity.as_ref());
        if entity.is_master() {
            entity.destroy(self);
        }
        entity.uninit(self);
        self.release_tile_spaces(id, entity.as_ref());
        if let Some(unique) = entity.unique_id() {
            if self.unique_ids.get(&unique) == Some(&id) {
                self.unique_ids.remove(&unique);
            }
        }
        if self.ids.contains_id(id) {
            self.ids.release(id);
        }
        self.recent_hits.forget_target(id);
        for peer in self.peers.values_mut() {
            if peer.versions.remove(&id).is_some() {
                peer.outgoing.push(WorldPacket::EntityDestroy { entity_id: id, death });
            }
        }
        log::debug!("removed {} {}", entity.entity_type().name(), id);
        Ok(())
    }

    pub fn entity(&self, id: EntityId) -> Option<&dyn Entity> {
        self.entities.get(&id).map(|e| e.as_ref())
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut dyn Entity> {
        match self.entities.get_mut(&id) {
            Some(e) => Some(e.as_mut()),
            None => None,
        }
    }

    pub fn entity_as<T: Entity>(&self, id: EntityId) -> Option<&T> {
        self.entities.get(&id)?.as_any().downcast_ref::<T>()
    }

    pub fn entity_as_mut<T: Entity>(&mut self, id: EntityId) -> Option<&mut T> {
        self.entities.get_mut(&id)?.as_any_mut().downcast_mut::<T>()
    }

    /// Ids in ascending order
    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.entities.keys().copied().collect()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn entity_counts(&self) -> BTreeMap<EntityType, usize> {
        let mut counts = BTreeMap::new();
        for entity in self.entities.values() {
            *counts.entry(entity.entity_type()).or_insert(0) += 1;
        }
        counts
    }

    pub fn unique_entity(&self, unique_id: &str) -> Option<EntityId> {
        self.unique_ids.get(unique_id).copied()
    }

    /// Entities whose bounds touch `region` and pass `filter`, by id
    pub fn entity_query(&self, region: RectF, filter: impl Fn(&dyn Entity) -> bool) -> Vec<EntityId> {
        self.entities
            .iter()
            .filter(|(_, e)| e.world_bound_box().intersects(&region) && filter(e.as_ref()))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Tile entity occupying `position`
    pub fn tile_entity_at(&self, position: Vec2I) -> Option<EntityId> {
        self.tile_entity_spaces.get(&position).copied()
    }

    /// Run `f` with the entity lifted out of the table so it can use the
    /// world mutably. The entity cannot see itself through the world while
    /// `f` runs.
    pub fn with_entity<R>(&mut self, id: EntityId, f: impl FnOnce(&mut dyn Entity, &mut World) -> R) -> Option<R> {
        let mut entity = self.entities.remove(&id)?;
        let result = f(entity.as_mut(), self);
        self.entities.insert(id, entity);
        Some(result)
    }

    /// Build a configured entity through the factory and master it here
    pub fn spawn_entity(&mut self, kind: EntityType, name: &str, position: Vec2F, parameters: &Json) -> Result<EntityId> {
        let resources = self.resources.clone();
        let entity = resources.factory().create(kind, name, position, parameters)?;
        self.add_entity(entity)
    }

    pub fn place_object(
        &mut self,
        name: &str,
        position: Vec2I,
        direction: Direction,
        parameters: &Json,
    ) -> Result<EntityId> {
        let resources = self.resources.clone();
        let object = resources.factory().create_object(name, position, direction, parameters)?;
        self.add_entity(Box::new(object))
    }

    pub fn spawn_projectile(
        &mut self,
        name: &str,
        position: Vec2F,
        source: Option<EntityId>,
        direction: Vec2F,
        track_source: bool,
        parameters: &Json,
    ) -> Result<EntityId> {
        let resources = self.resources.clone();
        let mut projectile = resources.factory().create_projectile(name, parameters)?;
        projectile.set_initial(position, direction, source, track_source);
        if let Some(source) = source.and_then(|s| self.entities.get(&s)) {
            projectile.set_team(source.team());
        }
        self.add_entity(Box::new(projectile))
    }

    pub fn spawn_item_drop(&mut self, item: &str, count: u64, position: Vec2F, parameters: &Json) -> Result<EntityId> {
        let resources = self.resources.clone();
        let drop = resources.factory().create_item_drop(item, count, position, parameters)?;
        self.add_entity(Box::new(drop))
    }

    /// Mark an object broken; it is removed at the end of the step
    pub fn break_object(&mut self, id: EntityId, smash: bool) -> Result<()> {
        let object = self.entity_as_mut::<Object>(id).ok_or(WorldError::EntityNotFound(id))?;
        if !object.is_master() {
            return Err(WorldError::NotMaster(id));
        }
        object.break_object(smash);
        Ok(())
    }

    // -- Interaction --

    /// Resolve an interaction. Only the server does this; a target it
    /// does not master gives no action.
    pub fn interact(&mut self, request: InteractRequest) -> Result<InteractAction> {
        if !self.is_server() {
            return Err(WorldError::ServerOnly("interaction"));
        }
        let target = request.target_id;
        let entity = self.entities.get(&target).ok_or(WorldError::EntityNotFound(target))?;
        if !entity.is_master() {
            log::debug!("interaction with relayed entity {} ignored", target);
            return Ok(InteractAction::none());
        }
        let action = self.with_entity(target, |entity, world| match entity.as_interactive_mut() {
            Some(interactive) if interactive.is_interactive() => interactive.interact(world, &request),
            _ => InteractAction::none(),
        });
        Ok(action.unwrap_or_else(InteractAction::none))
    }

    /// Ask the server to resolve an interaction; the answer shows up in
    /// [`World::take_interact_results`] under the returned id
    pub fn request_interact(&mut self, request: InteractRequest) -> Result<u64> {
        let peer = self
            .peers
            .get_mut(&SERVER_CONNECTION_ID)
            .ok_or(WorldError::UnknownPeer(SERVER_CONNECTION_ID))?;
        self.next_interact_id += 1;
        let request_id = self.next_interact_id;
        peer.outgoing.push(WorldPacket::EntityInteract { request, request_id });
        Ok(request_id)
    }

    pub fn take_interact_results(&mut self) -> Vec<(u64, InteractAction)> {
        mem::take(&mut self.interact_results)
    }

    // -- Messages --

    /// Queue a message; it is delivered during the message phase of the
    /// current or next step
    pub fn send_entity_message(&mut self, target: MessageTarget, name: &str, args: Vec<Json>) -> RpcPromise {
        let promise = RpcPromise::pending();
        self.messages.push_back(PendingMessage {
            from_connection: self.connection(),
            target,
            name: name.to_string(),
            args,
            reply: Reply::Promise(promise.clone()),
        });
        promise
    }

    /// Call a function in a local master entity's scripts
    pub fn call_scripted_entity(&mut self, id: EntityId, function: &str, args: &[Json]) -> Result<Option<Json>> {
        let entity = self.entities.get(&id).ok_or(WorldError::EntityNotFound(id))?;
        if !entity.is_master() {
            return Err(WorldError::NotMaster(id));
        }
        let result = self.with_entity(id, |entity, world| {
            entity.as_scripted_mut().map(|s| s.call_script(world, function, args))
        });
        Ok(result.flatten().flatten())
    }

    /// Evaluate code in a local master entity's script context
    pub fn eval_in_entity(&mut self, id: EntityId, code: &str) -> Result<Json> {
        let entity = self.entities.get(&id).ok_or(WorldError::EntityNotFound(id))?;
        if !entity.is_master() {
            return Err(WorldError::NotMaster(id));
        }
        let kind = entity.entity_type();
        self.with_entity(id, |entity, world| match entity.as_scripted_mut() {
            Some(scripted) => scripted.eval_script(world, code),
            None => Err(WorldError::InvalidSpawn(format!("{} {} has no scripts", kind.name(), id))),
        })
        .unwrap_or(Err(WorldError::EntityNotFound(id)))
    }

    fn process_messages(&mut self) {
        let pending: Vec<PendingMessage> = self.messages.drain(..).collect();
        for message in pending {
            self.deliver_message(message);
        }
    }

    fn deliver_message(&mut self, message: PendingMessage) {
        let target_id = match &message.target {
            MessageTarget::Id(id) => Some(*id),
            MessageTarget::UniqueId(unique) => self.unique_ids.get(unique).copied(),
        };
        let located = target_id.and_then(|id| self.entities.get(&id).map(|e| (id, e.is_master())));
        match located {
            Some((id, true)) => {
                let response = self
                    .with_entity(id, |entity, world| {
                        entity.receive_message(world, message.from_connection, &message.name, &message.args)
                    })
                    .flatten();
                let result =
                    response.ok_or_else(|| format!("Message '{}' not handled by entity {}", message.name, id));
                self.send_reply(message.reply, result);
            }
            Some((id, false)) => {
                let owner = if self.is_server() {
                    connection_for_entity(id)
                } else {
                    Some(SERVER_CONNECTION_ID)
                };
                self.forward_message(owner, message);
            }
            None if !self.is_server() => self.forward_message(Some(SERVER_CONNECTION_ID), message),
            None => {
                let error = format!("No {} to deliver '{}' to", message.target, message.name);
                self.send_reply(message.reply, Err(error));
            }
        }
    }

    fn forward_message(&mut self, owner: Option<ConnectionId>, message: PendingMessage) {
        let connection = match owner {
            Some(connection) if self.peers.contains_key(&connection) => connection,
            _ => {
                let error = format!("Owner of {} is not connected", message.target);
                self.send_reply(message.reply, Err(error));
                return;
            }
        };
        self.next_message_id += 1;
        let uuid = format!("{}:{}", self.connection(), self.next_message_id);
        if let Some(peer) = self.peers.get_mut(&connection) {
            peer.outgoing.push(WorldPacket::EntityMessage {
                target: message.target,
                name: message.name,
                args: message.args,
                uuid: uuid.clone(),
                from_connection: message.from_connection,
            });
        }
        self.forwarded.insert(uuid, (connection, message.reply));
    }

    fn send_reply(&mut self, reply: Reply, result: std::result::Result<Json, String>) {
        match reply {
            Reply::Promise(promise) => promise.complete(result),
            Reply::Peer { connection, uuid } => match self.peers.get_mut(&connection) {
                Some(peer) => peer.outgoing.push(WorldPacket::EntityMessageResponse { uuid, response: result }),
                None => log::debug!("dropping reply {} for closed connection {}", uuid, connection),
            },
        }
    }

    // -- Wires --

    /// Wire entity whose wire location is `location`
    pub fn wire_entity_at(&self, location: Vec2I) -> Option<EntityId> {
        self.entities
            .iter()
            .find(|(_, e)| e.as_wire_entity().map_or(false, |w| w.wire_location() == location))
            .map(|(id, _)| *id)
    }

    /// Connect an output node to an input node
    pub fn connect_wire(&mut self, output: WireConnection, input: WireConnection) -> Result<()> {
        let (source, target) = self.wire_endpoints(output, input)?;
        if let Some(wire) = self.entities.get_mut(&source).and_then(|e| e.as_wire_entity_mut()) {
            wire.add_output_connection(output.node_index, input);
        }
        if let Some(wire) = self.entities.get_mut(&target).and_then(|e| e.as_wire_entity_mut()) {
            wire.add_input_connection(input.node_index, output);
        }
        Ok(())
    }

    pub fn disconnect_wire(&mut self, output: WireConnection, input: WireConnection) -> Result<()> {
        let (source, target) = self.wire_endpoints(output, input)?;
        if let Some(wire) = self.entities.get_mut(&source).and_then(|e| e.as_wire_entity_mut()) {
            wire.remove_output_connection(output.node_index, input);
        }
        if let Some(wire) = self.entities.get_mut(&target).and_then(|e| e.as_wire_entity_mut()) {
            wire.remove_input_connection(input.node_index, output);
        }
        Ok(())
    }

    fn wire_endpoints(&self, output: WireConnection, input: WireConnection) -> Result<(EntityId, EntityId)> {
        let invalid = |position: Vec2I, reason: &str| WorldError::InvalidPlacement {
            name: "wire".to_string(),
            position,
            reason: reason.to_string(),
        };
        let source = self
            .wire_entity_at(output.entity_location)
            .ok_or_else(|| invalid(output.entity_location, "no wire entity"))?;
        let target = self
            .wire_entity_at(input.entity_location)
            .ok_or_else(|| invalid(input.entity_location, "no wire entity"))?;
        let outputs = self
            .entities
            .get(&source)
            .and_then(|e| e.as_wire_entity())
            .map_or(0, |w| w.output_node_count());
        let inputs = self
            .entities
            .get(&target)
            .and_then(|e| e.as_wire_entity())
            .map_or(0, |w| w.input_node_count());
        if output.node_index >= outputs {
            return Err(invalid(output.entity_location, "no such output node"));
        }
        if input.node_index >= inputs {
            return Err(invalid(input.entity_location, "no such input node"));
        }
        Ok((source, target))
    }

    /// Drop every connection other entities hold to a leaving wire entity
    fn disconnect_entity_wires(&mut self, leaving: &dyn Entity) {
        let Some(wire) = leaving.as_wire_entity() else {
            return;
        };
        let location = wire.wire_location();
        for entity in self.entities.values_mut() {
            let Some(other) = entity.as_wire_entity_mut() else {
                continue;
            };
            for node in 0..other.input_node_count() {
                for connection in other.input_connections(node) {
                    if connection.entity_location == location {
                        other.remove_input_connection(node, connection);
                    }
                }
            }
            for node in 0..other.output_node_count() {
                for connection in other.output_connections(node) {
                    if connection.entity_location == location {
                        other.remove_output_connection(node, connection);
                    }
                }
            }
        }
    }

    // -- World state --

    pub fn property(&self, name: &str) -> Json {
        self.properties.get(name).cloned().unwrap_or(Json::Null)
    }

    /// Setting null removes the property
    pub fn set_property(&mut self, name: &str, value: Json) {
        if value.is_null() {
            self.properties.remove(name);
        } else {
            self.properties.insert(name.to_string(), value);
        }
    }

    pub fn universe_flags(&self) -> impl Iterator<Item = &str> {
        self.universe_flags.iter().map(String::as_str)
    }

    pub fn universe_flag_set(&self, flag: &str) -> bool {
        self.universe_flags.contains(flag)
    }

    pub fn set_universe_flag(&mut self, flag: &str) {
        self.universe_flags.insert(flag.to_string());
    }

    pub fn reset_universe_flags(&mut self) {
        self.universe_flags.clear();
    }

    pub fn weather(&self) -> Option<&str> {
        self.weather.as_deref()
    }

    pub fn set_weather(&mut self, weather: Option<String>) {
        self.weather = weather;
    }

    pub fn player_start(&self) -> Option<Vec2F> {
        self.player_start
    }

    pub fn set_player_start(&mut self, position: Vec2F) {
        self.player_start = Some(position);
    }

    /// Assign a biome to a region; later assignments win where regions
    /// overlap
    pub fn set_biome(&mut self, region: RectI, biome: &str) {
        self.biome_regions.retain(|r| r.region != region);
        self.biome_regions.push(BiomeRegion {
            region,
            biome: biome.to_string(),
        });
    }

    pub fn biome_at(&self, position: Vec2I) -> Option<&str> {
        self.biome_regions
            .iter()
            .rev()
            .find(|r| r.region.contains(position))
            .map(|r| r.biome.as_str())
    }

    pub fn spawning_enabled(&self) -> bool {
        self.spawning_enabled
    }

    pub fn set_spawning_enabled(&mut self, enabled: bool) {
        self.spawning_enabled = enabled;
    }

    // -- Step --

    /// Advance the world by one step
    pub fn update(&mut self) {
        let dt = self.clock.advance();
        let step = self.clock.step();

        if self.is_server() {
            self.apply_tile_modifications();
            let delta = self.settings.liquid_update_delta as u64;
            if delta > 0 && step % delta == 0 {
                let changed = update_liquids(&mut self.tiles);
                self.dirty_tiles.extend(changed);
            }
        }

        self.update_entities(dt, step);
        update_wires(self);
        self.resolve_damage(dt);
        self.process_messages();
        self.remove_finished_entities();
        self.write_peer_updates();
    }

    fn update_entities(&mut self, dt: f32, step: u64) {
        let order = &self.update_order;
        let mut sequence: Vec<(usize, EntityId)> = self
            .entities
            .iter()
            .map(|(id, e)| {
                let rank = order.iter().position(|k| *k == e.entity_type()).unwrap_or(order.len());
                (rank, *id)
            })
            .collect();
        sequence.sort_unstable();
        for (_, id) in sequence {
            self.with_entity(id, |entity, world| entity.update(world, dt, step));
        }
    }

    /// Pair every damage source with the master targets it touches
    fn resolve_damage(&mut self, dt: f32) {
        self.recent_hits.tick(dt);
        let sources: Vec<_> = self.entities.values().flat_map(|e| e.damage_sources()).collect();
        for source in sources {
            let key = source.repeat_key();
            let bounds = source.poly.bound_box();
            let candidates: Vec<EntityId> = self
                .entities
                .iter()
                .filter(|(_, e)| e.is_master() && e.world_bound_box().intersects(&bounds))
                .map(|(id, _)| *id)
                .collect();

            for target_id in candidates {
                let Some(target) = self.entities.get(&target_id) else {
                    continue;
                };
                if !source.team.can_damage(target.team(), source.source_entity_id == target_id) {
                    continue;
                }
                if !self.recent_hits.can_hit(&key, target_id) {
                    continue;
                }
                let Some(damageable) = target.as_damage_target() else {
                    continue;
                };
                let Some(hit_poly) = damageable.hit_poly() else {
                    continue;
                };
                if !hit_poly.intersects(&source.poly) {
                    continue;
                }
                let Some(hit_type) = damageable.query_hit(&source) else {
                    continue;
                };

                let request = source.request_for(hit_type, hit_poly.center());
                let timeout = source.repeat_timeout.unwrap_or(DEFAULT_DAMAGE_REPEAT_TIMEOUT);
                self.recent_hits.record(key.clone(), target_id, timeout);
                let notifications = self
                    .with_entity(target_id, |entity, world| {
                        entity
                            .as_damage_target_mut()
                            .map(|t| t.apply_damage(world, &request))
                            .unwrap_or_default()
                    })
                    .unwrap_or_default();
                self.with_entity(source.source_entity_id, |entity, world| {
                    if entity.is_master() {
                        entity.hit_other(world, target_id, &request);
                        for notification in &notifications {
                            entity.damaged_other(world, notification);
                        }
                    }
                });
            }
        }
    }

    fn remove_finished_entities(&mut self) {
        let finished: Vec<EntityId> = self
            .entities
            .iter()
            .filter(|(_, e)| e.is_master() && e.should_destroy())
            .map(|(id, _)| *id)
            .collect();
        for id in finished {
            if let Err(e) = self.remove_entity(id, true) {
                log::warn!("failed to remove entity {}: {}", id, e);
            }
        }
    }

    // -- Peers --

    /// Start replicating to a remote world. A client world has exactly one
    /// peer, the server.
    pub fn add_peer(&mut self, connection: ConnectionId, remote_rules: NetCompatibilityRules) -> Result<NetCompatibilityRules> {
        let valid = match self.role {
            WorldRole::Server => connection != SERVER_CONNECTION_ID && connection <= MAX_CLIENT_CONNECTION_ID,
            WorldRole::Client(_) => connection == SERVER_CONNECTION_ID,
        };
        if !valid || self.peers.contains_key(&connection) {
            return Err(WorldError::UnknownPeer(connection));
        }
        let rules = NetCompatibilityRules::negotiate(NetCompatibilityRules::latest(), remote_rules)?;
        let mut peer = Peer::new(rules);
        if self.is_server() {
            for position in self.tiles.non_empty() {
                peer.outgoing.push(WorldPacket::TileUpdate {
                    position,
                    tile: self.tiles.get(position),
                });
            }
        }
        self.peers.insert(connection, peer);
        log::info!("connection {} joined with net version {}", connection, rules.version());
        Ok(rules)
    }

    /// Stop replicating to a peer and drop every entity it mastered
    pub fn remove_peer(&mut self, connection: ConnectionId) -> Result<()> {
        self.peers.remove(&connection).ok_or(WorldError::UnknownPeer(connection))?;
        let owned: Vec<EntityId> = self
            .entities
            .iter()
            .filter(|(id, e)| !e.is_master() && self.owner_of(**id) == Some(connection))
            .map(|(id, _)| *id)
            .collect();
        for id in owned {
            if let Err(e) = self.remove_entity(id, false) {
                log::warn!("failed to remove entity {} of connection {}: {}", id, connection, e);
            }
        }
        let stale: Vec<String> = self
            .forwarded
            .iter()
            .filter(|(_, (c, _))| *c == connection)
            .map(|(uuid, _)| uuid.clone())
            .collect();
        for uuid in stale {
            if let Some((_, reply)) = self.forwarded.remove(&uuid) {
                self.send_reply(reply, Err(format!("connection {} closed", connection)));
            }
        }
        log::info!("connection {} left", connection);
        Ok(())
    }

    pub fn peer_connections(&self) -> Vec<ConnectionId> {
        self.peers.keys().copied().collect()
    }

    /// Connection that masters `id` from this world's point of view
    fn owner_of(&self, id: EntityId) -> Option<ConnectionId> {
        if self.ids.contains_id(id) {
            Some(self.connection())
        } else if self.is_server() {
            connection_for_entity(id)
        } else {
            Some(SERVER_CONNECTION_ID)
        }
    }

    /// Packets queued for a peer since the last call
    pub fn take_outgoing(&mut self, connection: ConnectionId) -> Result<Vec<WorldPacket>> {
        let peer = self.peers.get_mut(&connection).ok_or(WorldError::UnknownPeer(connection))?;
        Ok(mem::take(&mut peer.outgoing))
    }

    fn write_peer_updates(&mut self) {
        let server = self.is_server();
        let dirty = mem::take(&mut self.dirty_tiles);
        let connections: Vec<ConnectionId> = self.peers.keys().copied().collect();
        for connection in connections {
            let Some(mut peer) = self.peers.remove(&connection) else {
                continue;
            };
            if server {
                for position in &dirty {
                    peer.outgoing.push(WorldPacket::TileUpdate {
                        position: *position,
                        tile: self.tiles.get(*position),
                    });
                }
            }
            for (id, entity) in self.entities.iter_mut() {
                // Never echo an entity back to the connection that owns it
                if connection_for_entity(*id) == Some(connection) {
                    continue;
                }
                if !server && !entity.is_master() {
                    continue;
                }
                match peer.versions.get(id).copied() {
                    None => {
                        let (net_state, version) = entity.write_net_state(0, peer.rules);
                        peer.outgoing.push(WorldPacket::EntityCreate {
                            entity_type: entity.entity_type(),
                            store: entity.store_spawn(),
                            net_state,
                            entity_id: *id,
                        });
                        peer.versions.insert(*id, version);
                    }
                    Some(from) => {
                        let (delta, version) = entity.write_net_state(from, peer.rules);
                        if !delta.is_empty() {
                            peer.outgoing.push(WorldPacket::EntityUpdate { entity_id: *id, delta });
                            peer.versions.insert(*id, version);
                        }
                    }
                }
            }
            self.peers.insert(connection, peer);
        }
    }

    /// Apply a batch from a peer. An error means the peer sent something
    /// it must not and should be disconnected.
    pub fn handle_incoming(&mut self, from: ConnectionId, packets: Vec<WorldPacket>) -> Result<()> {
        if !self.peers.contains_key(&from) {
            return Err(WorldError::UnknownPeer(from));
        }
        for packet in packets {
            let name = packet.name();
            if let Err(e) = self.handle_packet(from, packet) {
                log::warn!("rejecting {} from connection {}: {}", name, from, e);
                return Err(e);
            }
        }
        Ok(())
    }

    fn handle_packet(&mut self, from: ConnectionId, packet: WorldPacket) -> Result<()> {
        let rules = self.peers.get(&from).map(|p| p.rules).ok_or(WorldError::UnknownPeer(from))?;
        match packet {
            WorldPacket::EntityCreate {
                entity_type,
                store,
                net_state,
                entity_id,
            } => {
                self.check_sender_owns(from, entity_id)?;
                if self.entities.contains_key(&entity_id) {
                    return Err(WorldError::MalformedPacket(format!("entity {} already exists", entity_id)));
                }
                let resources = self.resources.clone();
                let mut entity = resources.factory().net_load_entity(entity_type, &store)?;
                if self.is_server() && entity.client_entity_mode() == ClientEntityMode::ClientSlaveOnly {
                    return Err(WorldError::MalformedPacket(format!(
                        "clients may not create {} entities",
                        entity_type.name()
                    )));
                }
                entity.read_net_state(&net_state, 0.0, rules)?;
                self.insert_entity(entity, entity_id, EntityMode::Slave)?;
            }
            WorldPacket::EntityUpdate { entity_id, delta } => {
                self.check_sender_owns(from, entity_id)?;
                let interpolation_time = self.settings.interpolation_time;
                match self.entities.get_mut(&entity_id) {
                    Some(entity) if !entity.is_master() => entity.read_net_state(&delta, interpolation_time, rules)?,
                    Some(_) => {
                        return Err(WorldError::MalformedPacket(format!(
                            "update for locally mastered entity {}",
                            entity_id
                        )))
                    }
                    None => log::debug!("update for unknown entity {}", entity_id),
                }
            }
            WorldPacket::EntityDestroy { entity_id, death } => {
                self.check_sender_owns(from, entity_id)?;
                if self.entities.get(&entity_id).map_or(false, |e| !e.is_master()) {
                    self.remove_entity(entity_id, death)?;
                }
            }
            WorldPacket::EntityMessage {
                target,
                name,
                args,
                uuid,
                from_connection,
            } => {
                self.messages.push_back(PendingMessage {
                    from_connection,
                    target,
                    name,
                    args,
                    reply: Reply::Peer { connection: from, uuid },
                });
            }
            WorldPacket::EntityMessageResponse { uuid, response } => match self.forwarded.remove(&uuid) {
                Some((_, reply)) => self.send_reply(reply, response),
                None => log::debug!("response to unknown message {}", uuid),
            },
            WorldPacket::EntityInteract { request, request_id } => {
                if !self.is_server() {
                    return Err(WorldError::MalformedPacket("interact request sent to a client".into()));
                }
                let action = self.interact(request).unwrap_or_else(|e| {
                    log::debug!("interaction from connection {} failed: {}", from, e);
                    InteractAction::none()
                });
                if let Some(peer) = self.peers.get_mut(&from) {
                    peer.outgoing.push(WorldPacket::EntityInteractResult { action, request_id });
                }
            }
            WorldPacket::EntityInteractResult { action, request_id } => {
                if self.is_server() {
                    return Err(WorldError::MalformedPacket("interact result sent to the server".into()));
                }
                self.interact_results.push((request_id, action));
            }
            WorldPacket::TileUpdate { position, tile } => {
                if self.is_server() {
                    return Err(WorldError::MalformedPacket("clients cannot send tiles".into()));
                }
                let Some(existing) = self.tiles.get_mut(position) else {
                    return Err(WorldError::MalformedPacket(format!("tile {:?} outside the world", position)));
                };
                *existing = tile;
                self.tile_changed(position);
            }
        }
        Ok(())
    }

    fn check_sender_owns(&self, from: ConnectionId, id: EntityId) -> Result<()> {
        let owns = if self.is_server() {
            connection_for_entity(id) == Some(from)
        } else {
            !self.ids.contains_id(id) && id != 0
        };
        if owns {
            Ok(())
        } else {
            Err(WorldError::MalformedPacket(format!(
                "connection {} does not own entity {}",
                from, id
            )))
        }
    }
}

impl CollisionWorld for World {
    fn tile_collision(&self, tile: Vec2I) -> CollisionKind {
        self.tiles.collision(tile)
    }

    fn gravity(&self, _position: Vec2F) -> f32 {
        self.settings.gravity
    }

    fn collision_blocks(&self, region: RectI, out: &mut Vec<CollisionBlock>) {
        self.collision_cache.collision_blocks(&self.tiles, region, out);
    }

    fn liquid_percentage(&self, region: &RectF) -> f32 {
        liquid_coverage(region, |tile| {
            let liquid = self.tiles.get(tile).liquid;
            if liquid.is_empty() {
                0.0
            } else {
                liquid.level.min(1.0)
            }
        })
    }

    fn moving_collisions(&self, region: &RectF, out: &mut Vec<MovingCollision>) {
        for entity in self.entities.values() {
            if let Some(physics) = entity.as_physics_entity() {
                out.extend(
                    physics
                        .moving_collisions()
                        .into_iter()
                        .filter(|c| c.bound_box().intersects(region)),
                );
            }
        }
    }

    fn force_regions(&self, region: &RectF, out: &mut Vec<PhysicsForceRegion>) {
        for entity in self.entities.values() {
            if let Some(physics) = entity.as_physics_entity() {
                out.extend(
                    physics
                        .force_regions()
                        .into_iter()
                        .filter(|f| f.bound_box().intersects(region)),
                );
            }
        }
    }
}
