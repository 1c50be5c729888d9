//! Tile materials
//!
//! Real materials come from `.material` assets. A handful of reserved ids
//! at the top of the range are metamaterials the engine stamps itself:
//! empty space, unloaded space, dungeon structure, world boundaries and the
//! solid or platform spaces of placed objects.

use std::collections::HashMap;

use serde::Deserialize;
use star_asset::Assets;
use star_core::Json;
use star_physics::CollisionKind;

use crate::error::{Result, WorldError};

pub type MaterialId = u16;

pub const EMPTY_MATERIAL: MaterialId = 65535;
pub const NULL_MATERIAL: MaterialId = 65534;
pub const STRUCTURE_MATERIAL: MaterialId = 65533;
pub const BOUNDARY_MATERIAL: MaterialId = 65527;
pub const OBJECT_SOLID_MATERIAL: MaterialId = 65500;
pub const OBJECT_PLATFORM_MATERIAL: MaterialId = 65501;

/// Ids at or above this are reserved for metamaterials
pub const FIRST_META_MATERIAL: MaterialId = 65000;

#[derive(Debug, Clone, PartialEq)]
pub struct MaterialInfo {
    pub id: MaterialId,
    pub name: String,
    pub collision: CollisionKind,
    /// Asset path of the definition, empty for metamaterials
    pub path: String,
    pub config: Json,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MaterialFile {
    material_id: MaterialId,
    material_name: String,
    #[serde(default)]
    collision_kind: Option<String>,
}

/// Name and collision lookup for every material id
#[derive(Debug, Clone)]
pub struct MaterialDatabase {
    by_id: HashMap<MaterialId, MaterialInfo>,
    by_name: HashMap<String, MaterialId>,
}

impl Default for MaterialDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MaterialDatabase {
    /// Database holding only the metamaterials
    pub fn new() -> Self {
        let mut db = Self {
            by_id: HashMap::new(),
            by_name: HashMap::new(),
        };
        for (id, name, collision) in [
            (EMPTY_MATERIAL, "metamaterial:empty", CollisionKind::None),
            (NULL_MATERIAL, "metamaterial:null", CollisionKind::Null),
            (STRUCTURE_MATERIAL, "metamaterial:structure", CollisionKind::Block),
            (BOUNDARY_MATERIAL, "metamaterial:boundary", CollisionKind::Slippery),
            (OBJECT_SOLID_MATERIAL, "metamaterial:objectsolid", CollisionKind::Block),
            (OBJECT_PLATFORM_MATERIAL, "metamaterial:objectplatform", CollisionKind::Platform),
        ] {
            db.insert(MaterialInfo {
                id,
                name: name.to_string(),
                collision,
                path: String::new(),
                config: Json::Null,
            });
        }
        db
    }

    /// Metamaterials plus every `.material` asset
    pub fn load(assets: &Assets) -> Result<Self> {
        let mut db = Self::new();
        for path in assets.scan_extension("material") {
            let config = assets.json(&path)?;
            let file = MaterialFile::deserialize(&*config).map_err(|e| WorldError::InvalidConfig {
                kind: "material",
                name: path.clone(),
                reason: e.to_string(),
            })?;
            if file.material_id >= FIRST_META_MATERIAL {
                return Err(WorldError::InvalidConfig {
                    kind: "material",
                    name: path,
                    reason: format!("id {} is reserved for metamaterials", file.material_id),
                });
            }
            if let Some(existing) = db.by_id.get(&file.material_id) {
                return Err(WorldError::InvalidConfig {
                    kind: "material",
                    name: path,
                    reason: format!("id {} already used by '{}'", file.material_id, existing.name),
                });
            }
            let collision = match &file.collision_kind {
                Some(name) => CollisionKind::from_name(name)?,
                None => CollisionKind::Block,
            };
            db.insert(MaterialInfo {
                id: file.material_id,
                name: file.material_name,
                collision,
                path,
                config: (*config).clone(),
            });
        }
        log::debug!("loaded {} materials", db.by_id.len());
        Ok(db)
    }

    fn insert(&mut self, info: MaterialInfo) {
        self.by_name.insert(info.name.clone(), info.id);
        self.by_id.insert(info.id, info);
    }

    pub fn info(&self, id: MaterialId) -> Option<&MaterialInfo> {
        self.by_id.get(&id)
    }

    pub fn material_id(&self, name: &str) -> Option<MaterialId> {
        self.by_name.get(name).copied()
    }

    pub fn material_name(&self, id: MaterialId) -> Option<&str> {
        self.by_id.get(&id).map(|m| m.name.as_str())
    }

    /// Unknown ids collide as `Null` so holes in content never let
    /// bodies fall through
    pub fn collision_kind(&self, id: MaterialId) -> CollisionKind {
        self.by_id.get(&id).map_or(CollisionKind::Null, |m| m.collision)
    }

    pub fn is_meta(id: MaterialId) -> bool {
        id >= FIRST_META_MATERIAL
    }

    /// A real material or the empty metamaterial may be placed by players
    pub fn is_placeable(&self, id: MaterialId) -> bool {
        !Self::is_meta(id) && self.by_id.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metamaterials() {
        let db = MaterialDatabase::new();
        assert_eq!(db.collision_kind(EMPTY_MATERIAL), CollisionKind::None);
        assert_eq!(db.collision_kind(OBJECT_PLATFORM_MATERIAL), CollisionKind::Platform);
        assert_eq!(db.collision_kind(1234), CollisionKind::Null);
        assert_eq!(db.material_id("metamaterial:structure"), Some(STRUCTURE_MATERIAL));
        assert!(!db.is_placeable(OBJECT_SOLID_MATERIAL));
    }
}
