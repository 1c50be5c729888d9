//! Per-sector cache of tile collision blocks

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use star_math::{RectI, Vec2I};
use star_physics::{CollisionBlock, CollisionKind};

use crate::tile::TileGrid;

/// Sector edge length in tiles
pub const SECTOR_SIZE: i32 = 32;

fn sector_of(tile: Vec2I) -> Vec2I {
    Vec2I::new(tile.x.div_euclid(SECTOR_SIZE), tile.y.div_euclid(SECTOR_SIZE))
}

fn sector_rect(sector: Vec2I) -> RectI {
    RectI::with_size(
        Vec2I::new(sector.x * SECTOR_SIZE, sector.y * SECTOR_SIZE),
        Vec2I::new(SECTOR_SIZE, SECTOR_SIZE),
    )
}

/// Collision blocks built lazily per sector and dropped when a tile in the
/// sector changes
#[derive(Debug, Default)]
pub struct CollisionCache {
    sectors: RefCell<HashMap<Vec2I, Rc<Vec<CollisionBlock>>>>,
}

impl CollisionCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn sector(&self, grid: &TileGrid, sector: Vec2I) -> Rc<Vec<CollisionBlock>> {
        if let Some(blocks) = self.sectors.borrow().get(&sector) {
            return blocks.clone();
        }
        let blocks: Vec<CollisionBlock> = sector_rect(sector)
            .tiles()
            .filter_map(|tile| {
                let kind = grid.collision(tile);
                (kind != CollisionKind::None).then(|| CollisionBlock::tile(tile, kind))
            })
            .collect();
        let blocks = Rc::new(blocks);
        self.sectors.borrow_mut().insert(sector, blocks.clone());
        blocks
    }

    /// Append the blocks of every colliding tile in `region`
    pub fn collision_blocks(&self, grid: &TileGrid, region: RectI, out: &mut Vec<CollisionBlock>) {
        if region.is_empty() {
            return;
        }
        let first = sector_of(region.min);
        let last = sector_of(Vec2I::new(region.max.x - 1, region.max.y - 1));
        for sy in first.y..=last.y {
            for sx in first.x..=last.x {
                let blocks = self.sector(grid, Vec2I::new(sx, sy));
                out.extend(blocks.iter().filter(|b| region.contains(b.space)).cloned());
            }
        }
    }

    pub fn invalidate(&self, tile: Vec2I) {
        self.sectors.borrow_mut().remove(&sector_of(tile));
    }

    pub fn clear(&self) {
        self.sectors.borrow_mut().clear();
    }

    pub fn cached_sectors(&self) -> usize {
        self.sectors.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_invalidation() {
        let mut grid = TileGrid::new(Vec2I::new(64, 64));
        if let Some(tile) = grid.get_mut(Vec2I::new(3, 3)) {
            tile.collision = CollisionKind::Block;
        }
        let cache = CollisionCache::new();
        let mut out = Vec::new();
        cache.collision_blocks(&grid, RectI::from_coords(0, 0, 8, 8), &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(cache.cached_sectors(), 1);

        if let Some(tile) = grid.get_mut(Vec2I::new(4, 3)) {
            tile.collision = CollisionKind::Platform;
        }
        // Stale until the sector is invalidated
        out.clear();
        cache.collision_blocks(&grid, RectI::from_coords(0, 0, 8, 8), &mut out);
        assert_eq!(out.len(), 1);

        cache.invalidate(Vec2I::new(4, 3));
        out.clear();
        cache.collision_blocks(&grid, RectI::from_coords(0, 0, 8, 8), &mut out);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_outside_world_is_null() {
        let grid = TileGrid::new(Vec2I::new(4, 4));
        let cache = CollisionCache::new();
        let mut out = Vec::new();
        cache.collision_blocks(&grid, RectI::from_coords(-2, 0, 0, 1), &mut out);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|b| b.kind == CollisionKind::Null));
    }
}
