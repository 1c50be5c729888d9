//! Liquid definitions and cellular liquid flow

use std::collections::{BTreeSet, HashMap};

use serde::Deserialize;
use star_asset::Assets;
use star_core::Json;
use star_math::Vec2I;

use crate::error::{Result, WorldError};
use crate::tile::{LiquidId, LiquidLevel, TileGrid, EMPTY_LIQUID};

/// Levels below this evaporate
const MIN_LEVEL: f32 = 0.005;
/// Share of a level difference that moves sideways per pass
const SPREAD_RATE: f32 = 1.0 / 3.0;

#[derive(Debug, Clone, PartialEq)]
pub struct LiquidInfo {
    pub id: LiquidId,
    pub name: String,
    pub path: String,
    pub config: Json,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiquidFile {
    liquid_id: LiquidId,
    name: String,
}

#[derive(Debug, Clone, Default)]
pub struct LiquidDatabase {
    by_id: HashMap<LiquidId, LiquidInfo>,
    by_name: HashMap<String, LiquidId>,
}

impl LiquidDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `.liquid` asset. Id 0 is reserved for "no liquid".
    pub fn load(assets: &Assets) -> Result<Self> {
        let mut db = Self::new();
        for path in assets.scan_extension("liquid") {
            let config = assets.json(&path)?;
            let file = LiquidFile::deserialize(&*config).map_err(|e| WorldError::InvalidConfig {
                kind: "liquid",
                name: path.clone(),
                reason: e.to_string(),
            })?;
            if file.liquid_id == EMPTY_LIQUID || db.by_id.contains_key(&file.liquid_id) {
                return Err(WorldError::InvalidConfig {
                    kind: "liquid",
                    name: path,
                    reason: format!("liquid id {} is reserved or duplicated", file.liquid_id),
                });
            }
            db.insert(LiquidInfo {
                id: file.liquid_id,
                name: file.name,
                path,
                config: (*config).clone(),
            });
        }
        Ok(db)
    }

    pub fn insert(&mut self, info: LiquidInfo) {
        self.by_name.insert(info.name.clone(), info.id);
        self.by_id.insert(info.id, info);
    }

    pub fn info(&self, id: LiquidId) -> Option<&LiquidInfo> {
        self.by_id.get(&id)
    }

    pub fn liquid_id(&self, name: &str) -> Option<LiquidId> {
        self.by_name.get(name).copied()
    }

    pub fn liquid_name(&self, id: LiquidId) -> Option<&str> {
        self.by_id.get(&id).map(|l| l.name.as_str())
    }
}

fn open(grid: &TileGrid, pos: Vec2I, liquid: LiquidId) -> bool {
    let tile = grid.get(pos);
    grid.contains(pos)
        && !tile.collision.is_solid()
        && (tile.liquid.is_empty() || tile.liquid.liquid == liquid)
}

fn set_level(grid: &mut TileGrid, pos: Vec2I, liquid: LiquidId, level: f32) {
    if let Some(tile) = grid.get_mut(pos) {
        if level < MIN_LEVEL {
            tile.liquid = LiquidLevel::EMPTY;
        } else {
            tile.liquid.liquid = liquid;
            tile.liquid.level = level;
        }
    }
}

/// One flow pass over the whole grid: liquid falls into open space
/// below, then levels out sideways where it rests, then pressure is
/// recomputed top down. Returns the tiles whose liquid changed.
pub fn update_liquids(grid: &mut TileGrid) -> BTreeSet<Vec2I> {
    let size = grid.size();
    let before: Vec<LiquidLevel> = grid
        .bounds()
        .tiles()
        .map(|pos| grid.get(pos).liquid)
        .collect();

    // Falling, bottom row first so a column drops one tile per pass
    for y in 1..size.y {
        for x in 0..size.x {
            let pos = Vec2I::new(x, y);
            let here = grid.get(pos).liquid;
            if here.is_empty() {
                continue;
            }
            let below_pos = Vec2I::new(x, y - 1);
            if !open(grid, below_pos, here.liquid) {
                continue;
            }
            let below = grid.get(below_pos).liquid;
            let room = 1.0 - if below.is_empty() { 0.0 } else { below.level };
            let moved = here.level.min(room.max(0.0));
            if moved > 0.0 {
                let below_level = if below.is_empty() { 0.0 } else { below.level };
                set_level(grid, below_pos, here.liquid, below_level + moved);
                set_level(grid, pos, here.liquid, here.level - moved);
            }
        }
    }

    // Spreading, computed against a snapshot so scan order does not matter
    let snapshot: Vec<LiquidLevel> = grid
        .bounds()
        .tiles()
        .map(|pos| grid.get(pos).liquid)
        .collect();
    let width = size.x as usize;
    let at = |pos: Vec2I| snapshot[pos.y as usize * width + pos.x as usize];
    let mut deltas: HashMap<Vec2I, (LiquidId, f32)> = HashMap::new();
    for pos in grid.bounds().tiles() {
        let here = at(pos);
        if here.is_empty() {
            continue;
        }
        let below = Vec2I::new(pos.x, pos.y - 1);
        let resting = !open(grid, below, here.liquid) || grid.get(below).liquid.level >= 1.0;
        if !resting {
            continue;
        }
        for side in [Vec2I::new(pos.x - 1, pos.y), Vec2I::new(pos.x + 1, pos.y)] {
            if !open(grid, side, here.liquid) {
                continue;
            }
            let neighbor = at(side);
            let neighbor_level = if neighbor.is_empty() { 0.0 } else { neighbor.level };
            if here.level > neighbor_level {
                let flow = (here.level - neighbor_level) * SPREAD_RATE;
                deltas.entry(pos).or_insert((here.liquid, 0.0)).1 -= flow;
                deltas.entry(side).or_insert((here.liquid, 0.0)).1 += flow;
            }
        }
    }
    for (pos, (liquid, delta)) in deltas {
        let current = grid.get(pos).liquid;
        let level = if current.is_empty() { 0.0 } else { current.level };
        set_level(grid, pos, liquid, level + delta);
    }

    // Pressure is the level plus the pressure of a full tile above
    for x in 0..size.x {
        let mut above_pressure = 0.0;
        for y in (0..size.y).rev() {
            let pos = Vec2I::new(x, y);
            if let Some(tile) = grid.get_mut(pos) {
                if tile.liquid.is_empty() {
                    tile.liquid.pressure = 0.0;
                    above_pressure = 0.0;
                } else {
                    tile.liquid.pressure = tile.liquid.level + above_pressure;
                    above_pressure = if tile.liquid.level >= 1.0 { tile.liquid.pressure } else { 0.0 };
                }
            }
        }
    }

    grid.bounds()
        .tiles()
        .zip(before)
        .filter(|(pos, old)| grid.get(*pos).liquid != *old)
        .map(|(pos, _)| pos)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use star_physics::CollisionKind;

    fn total(grid: &TileGrid) -> f32 {
        grid.bounds()
            .tiles()
            .map(|p| grid.get(p).liquid)
            .filter(|l| !l.is_empty())
            .map(|l| l.level)
            .sum()
    }

    fn floor(size: Vec2I) -> TileGrid {
        let mut grid = TileGrid::new(size);
        for x in 0..size.x {
            if let Some(tile) = grid.get_mut(Vec2I::new(x, 0)) {
                tile.collision = CollisionKind::Block;
            }
        }
        grid
    }

    #[test]
    fn test_liquid_falls_to_floor() {
        let mut grid = floor(Vec2I::new(1, 6));
        set_level(&mut grid, Vec2I::new(0, 5), 1, 1.0);
        for _ in 0..10 {
            update_liquids(&mut grid);
        }
        let settled = grid.get(Vec2I::new(0, 1)).liquid;
        assert_eq!(settled.liquid, 1);
        assert!((settled.level - 1.0).abs() < 1e-5);
        assert!(grid.get(Vec2I::new(0, 5)).liquid.is_empty());
    }

    #[test]
    fn test_liquid_spreads_and_conserves() {
        let mut grid = floor(Vec2I::new(5, 3));
        set_level(&mut grid, Vec2I::new(2, 1), 1, 0.9);
        let changed = update_liquids(&mut grid);
        assert!(changed.contains(&Vec2I::new(1, 1)));
        assert!(changed.contains(&Vec2I::new(3, 1)));
        for _ in 0..20 {
            update_liquids(&mut grid);
        }
        let left = grid.get(Vec2I::new(0, 1)).liquid.level;
        let right = grid.get(Vec2I::new(4, 1)).liquid.level;
        assert!((left - right).abs() < 1e-4);
        assert!(total(&grid) <= 0.9 + 1e-4);
        assert!(total(&grid) > 0.85);
    }

    #[test]
    fn test_pressure_accumulates() {
        let mut grid = floor(Vec2I::new(1, 4));
        for y in 1..4 {
            set_level(&mut grid, Vec2I::new(0, y), 1, 1.0);
        }
        update_liquids(&mut grid);
        assert!((grid.get(Vec2I::new(0, 1)).liquid.pressure - 3.0).abs() < 1e-5);
        assert!((grid.get(Vec2I::new(0, 3)).liquid.pressure - 1.0).abs() < 1e-5);
    }
}
