//! Databases and the script interpreter shared by a world and its entities

use std::rc::Rc;
use std::sync::Arc;

use star_asset::Assets;
use star_script::{LuaRoot, ScriptError};

use crate::error::Result;
use crate::factory::EntityFactory;
use crate::liquid::LiquidDatabase;
use crate::material::MaterialDatabase;
use crate::status::StatusEffectDatabase;

/// Everything loaded from assets once per world thread.
///
/// Rebuilt as a whole on `reload`; entities already in the world keep the
/// script contexts they were initialised with.
pub struct WorldResources {
    assets: Arc<Assets>,
    lua: LuaRoot,
    materials: MaterialDatabase,
    liquids: LiquidDatabase,
    status_effects: StatusEffectDatabase,
    factory: EntityFactory,
}

impl WorldResources {
    pub fn load(assets: Arc<Assets>) -> Result<Rc<Self>> {
        let script_assets = assets.clone();
        let lua = LuaRoot::new(move |path| {
            let bytes = script_assets.bytes(path).map_err(|e| ScriptError::Load {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
            String::from_utf8(bytes.to_vec()).map_err(|e| ScriptError::Load {
                path: path.to_string(),
                reason: e.to_string(),
            })
        })?;

        let materials = MaterialDatabase::load(&assets)?;
        let liquids = LiquidDatabase::load(&assets)?;
        let status_effects = StatusEffectDatabase::load(&assets)?;
        let factory = EntityFactory::load(&assets)?;
        log::info!(
            "world resources loaded: {} materials, {} status effects, {} entity configs",
            materials.len(),
            status_effects.len(),
            factory.len()
        );

        Ok(Rc::new(Self {
            assets,
            lua,
            materials,
            liquids,
            status_effects,
            factory,
        }))
    }

    #[inline]
    pub fn assets(&self) -> &Arc<Assets> {
        &self.assets
    }

    #[inline]
    pub fn lua(&self) -> &LuaRoot {
        &self.lua
    }

    #[inline]
    pub fn materials(&self) -> &MaterialDatabase {
        &self.materials
    }

    #[inline]
    pub fn liquids(&self) -> &LiquidDatabase {
        &self.liquids
    }

    #[inline]
    pub fn status_effects(&self) -> &StatusEffectDatabase {
        &self.status_effects
    }

    #[inline]
    pub fn factory(&self) -> &EntityFactory {
        &self.factory
    }
}
