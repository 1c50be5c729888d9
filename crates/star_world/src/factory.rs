//! Entity factory
//!
//! Indexes every entity config in the assets by kind and name, builds
//! master entities from a name plus parameters, and rebuilds slaves from
//! the `store_spawn` JSON a master sends with its first net state.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use star_asset::Assets;
use star_core::Json;
use star_math::{Vec2F, Vec2I};
use star_physics::Direction;

use crate::entities::monster::monster_parameters;
use crate::entities::{EntityConfig, ItemDrop, Monster, Npc, Object, Player, Projectile, Stagehand, Vehicle};
use crate::entity::{Entity, EntityType};
use crate::error::{Result, WorldError};

/// Asset extension and name key for each kind built from configs
const CONFIG_KINDS: [(EntityType, &str, &str); 6] = [
    (EntityType::Object, "object", "objectName"),
    (EntityType::Vehicle, "vehicle", "name"),
    (EntityType::Monster, "monstertype", "type"),
    (EntityType::Npc, "npctype", "type"),
    (EntityType::Projectile, "projectile", "projectileName"),
    (EntityType::Stagehand, "stagehand", "type"),
];

pub const PLAYER_CONFIG_PATH: &str = "/player.config";

#[derive(Debug, Clone)]
struct ConfigEntry {
    path: String,
    config: Arc<Json>,
}

/// Shape of a `store_spawn` value
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct SpawnStore {
    name: String,
    position: Option<[f32; 2]>,
    parameters: Json,
    direction: Option<Direction>,
    count: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct EntityFactory {
    configs: BTreeMap<(EntityType, String), ConfigEntry>,
    player_config: Arc<Json>,
}

impl Default for EntityFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityFactory {
    pub fn new() -> Self {
        Self {
            configs: BTreeMap::new(),
            player_config: Arc::new(Json::Object(Default::default())),
        }
    }

    /// Scan the assets for entity configs. Two configs claiming the same
    /// kind and name is an error.
    pub fn load(assets: &Assets) -> Result<Self> {
        let mut factory = Self::new();
        for (kind, extension, key) in CONFIG_KINDS {
            for path in assets.scan_extension(extension) {
                let config = assets.json(&path)?;
                let name = config
                    .get(key)
                    .and_then(Json::as_str)
                    .ok_or_else(|| WorldError::InvalidConfig {
                        kind: kind.name(),
                        name: path.clone(),
                        reason: format!("missing '{}'", key),
                    })?
                    .to_string();
                factory.insert(kind, name, path, config)?;
            }
        }
        if let Some(player) = assets.try_json(PLAYER_CONFIG_PATH)? {
            factory.player_config = player;
        }
        log::debug!("entity factory indexed {} configs", factory.len());
        Ok(factory)
    }

    pub fn insert(&mut self, kind: EntityType, name: String, path: String, config: Arc<Json>) -> Result<()> {
        if let Some(existing) = self.configs.get(&(kind, name.clone())) {
            return Err(WorldError::InvalidConfig {
                kind: kind.name(),
                name,
                reason: format!("defined by both {} and {}", existing.path, path),
            });
        }
        self.configs.insert((kind, name), ConfigEntry { path, config });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    pub fn contains(&self, kind: EntityType, name: &str) -> bool {
        self.configs.contains_key(&(kind, name.to_string()))
    }

    /// Config names of one kind, sorted
    pub fn names(&self, kind: EntityType) -> Vec<&str> {
        self.configs
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, name)| name.as_str())
            .collect()
    }

    pub fn config(&self, kind: EntityType, name: &str, parameters: &Json) -> Result<EntityConfig> {
        let entry = self
            .configs
            .get(&(kind, name.to_string()))
            .ok_or_else(|| WorldError::UnknownConfig {
                kind: kind.name(),
                name: name.to_string(),
            })?;
        Ok(EntityConfig::new(name, entry.path.clone(), entry.config.clone(), parameters.clone()))
    }

    /// Build a master entity of any kind. Objects take the tile under
    /// `position` and an optional `direction` parameter; item drops take
    /// `name` as the item and an optional `count` parameter.
    pub fn create(&self, kind: EntityType, name: &str, position: Vec2F, parameters: &Json) -> Result<Box<dyn Entity>> {
        Ok(match kind {
            EntityType::Object => {
                let direction = parameters
                    .get("direction")
                    .and_then(|d| Direction::deserialize(d).ok())
                    .unwrap_or_default();
                Box::new(self.create_object(name, position.floor(), direction, parameters)?)
            }
            EntityType::Vehicle => Box::new(Vehicle::new(self.config(kind, name, parameters)?, position)?),
            EntityType::Monster => {
                let parameters = monster_parameters(parameters, None, None)?;
                Box::new(Monster::new(self.config(kind, name, &parameters)?, position)?)
            }
            EntityType::Npc => Box::new(Npc::new(self.config(kind, name, parameters)?, position)?),
            EntityType::Stagehand => Box::new(Stagehand::new(self.config(kind, name, parameters)?, position)?),
            EntityType::Projectile => {
                let mut projectile = self.create_projectile(name, parameters)?;
                projectile.set_initial(position, Vec2F::ZERO, None, false);
                Box::new(projectile)
            }
            EntityType::ItemDrop => {
                let count = parameters.get("count").and_then(Json::as_u64).unwrap_or(1);
                Box::new(self.create_item_drop(name, count, position, parameters)?)
            }
            EntityType::Player => Box::new(self.create_player(name, position, parameters)?),
        })
    }

    pub fn create_object(&self, name: &str, position: Vec2I, direction: Direction, parameters: &Json) -> Result<Object> {
        Object::new(self.config(EntityType::Object, name, parameters)?, position, direction)
    }

    pub fn create_projectile(&self, name: &str, parameters: &Json) -> Result<Projectile> {
        Projectile::new(self.config(EntityType::Projectile, name, parameters)?)
    }

    pub fn create_item_drop(&self, item: &str, count: u64, position: Vec2F, parameters: &Json) -> Result<ItemDrop> {
        ItemDrop::new(item, count, position, parameters.clone())
    }

    /// Players share `/player.config` and are named rather than typed
    pub fn create_player(&self, name: &str, position: Vec2F, parameters: &Json) -> Result<Player> {
        let config = EntityConfig::new("player", PLAYER_CONFIG_PATH, self.player_config.clone(), parameters.clone());
        Player::new(config, name, position)
    }

    /// Rebuild an entity from the JSON its master stored at spawn
    pub fn net_load_entity(&self, kind: EntityType, store: &Json) -> Result<Box<dyn Entity>> {
        let store = SpawnStore::deserialize(store).map_err(|e| WorldError::InvalidSpawn(format!(
            "bad {} store: {}",
            kind.name(),
            e
        )))?;
        let position = store.position.map(Vec2F::from).unwrap_or_default();
        let parameters = &store.parameters;
        Ok(match kind {
            EntityType::Object => {
                let tile = store.position.map_or(Vec2I::ZERO, |[x, y]| Vec2I::new(x as i32, y as i32));
                let direction = store.direction.unwrap_or_default();
                Box::new(self.create_object(&store.name, tile, direction, parameters)?)
            }
            EntityType::ItemDrop => {
                Box::new(self.create_item_drop(&store.name, store.count.unwrap_or(1), position, parameters)?)
            }
            EntityType::Projectile => {
                let mut projectile = self.create_projectile(&store.name, parameters)?;
                projectile.set_initial(position, Vec2F::ZERO, None, false);
                Box::new(projectile)
            }
            EntityType::Vehicle | EntityType::Monster | EntityType::Npc | EntityType::Stagehand | EntityType::Player => {
                self.create(kind, &store.name, position, parameters)?
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn factory() -> EntityFactory {
        let mut factory = EntityFactory::new();
        factory
            .insert(
                EntityType::Object,
                "crate".into(),
                "/objects/crate.object".into(),
                Arc::new(json!({"objectName": "crate", "orientations": [{"spaces": [[0, 0]]}]})),
            )
            .unwrap();
        factory
            .insert(
                EntityType::Monster,
                "poptop".into(),
                "/monsters/poptop.monstertype".into(),
                Arc::new(json!({"type": "poptop", "statusSettings": {"stats": {"maxHealth": 30.0}}})),
            )
            .unwrap();
        factory
            .insert(
                EntityType::Npc,
                "guard".into(),
                "/npcs/guard.npctype".into(),
                Arc::new(json!({"type": "guard"})),
            )
            .unwrap();
        factory
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut factory = factory();
        let result = factory.insert(
            EntityType::Object,
            "crate".into(),
            "/other/crate.object".into(),
            Arc::new(json!({})),
        );
        assert!(matches!(result, Err(WorldError::InvalidConfig { .. })));
        assert_eq!(factory.len(), 3);
        assert_eq!(factory.names(EntityType::Monster), vec!["poptop"]);
    }

    #[test]
    fn test_unknown_config() {
        let result = factory().create(EntityType::Vehicle, "boat", Vec2F::ZERO, &Json::Null);
        assert!(matches!(result, Err(WorldError::UnknownConfig { kind: "vehicle", .. })));
    }

    #[test]
    fn test_store_rebuilds_same_kind() {
        let factory = factory();
        let monster = factory
            .create(EntityType::Monster, "poptop", Vec2F::new(4.0, 5.0), &json!({"level": 2}))
            .unwrap();
        let rebuilt = factory.net_load_entity(EntityType::Monster, &monster.store_spawn()).unwrap();
        assert_eq!(rebuilt.entity_type(), EntityType::Monster);
        assert_eq!(rebuilt.position(), Vec2F::new(4.0, 5.0));
        assert_eq!(rebuilt.store_spawn(), monster.store_spawn());

        let object = factory
            .create(EntityType::Object, "crate", Vec2F::new(3.5, 7.2), &json!({"direction": "left"}))
            .unwrap();
        let store = object.store_spawn();
        assert_eq!(store["position"], json!([3, 7]));
        assert_eq!(store["direction"], json!("left"));
        let rebuilt = factory.net_load_entity(EntityType::Object, &store).unwrap();
        assert_eq!(rebuilt.store_spawn(), store);
    }

    #[test]
    fn test_npc_species_survives_store() {
        let factory = factory();
        let npc = factory
            .create(EntityType::Npc, "guard", Vec2F::ZERO, &json!({"species": "avian"}))
            .unwrap();
        let rebuilt = factory.net_load_entity(EntityType::Npc, &npc.store_spawn()).unwrap();
        assert_eq!(rebuilt.store_spawn()["species"], json!("avian"));
    }

    #[test]
    fn test_item_drop_count_parameter() {
        let drop = factory()
            .create(EntityType::ItemDrop, "torch", Vec2F::ZERO, &json!({"count": 5}))
            .unwrap();
        assert_eq!(drop.store_spawn()["count"], json!(5));
    }
}
