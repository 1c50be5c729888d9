//! Collision kinds and the world query surface movement runs against

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use star_math::{PolyF, RectF, RectI, Vec2F, Vec2I};

use crate::error::{PhysicsError, Result};
use crate::forces::{MovingCollision, PhysicsForceRegion};

/// Per-tile collision tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CollisionKind {
    /// Unloaded or ungenerated space. Collides like `Block`.
    Null = 0,
    None = 1,
    /// Collides only from above and can be dropped through
    Platform = 2,
    /// Placed by entities (object solid spaces, vehicles)
    Dynamic = 3,
    /// Solid with no ground friction
    Slippery = 4,
    Block = 5,
}

impl CollisionKind {
    pub const ALL: [CollisionKind; 6] = [
        CollisionKind::Null,
        CollisionKind::None,
        CollisionKind::Platform,
        CollisionKind::Dynamic,
        CollisionKind::Slippery,
        CollisionKind::Block,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CollisionKind::Null => "null",
            CollisionKind::None => "none",
            CollisionKind::Platform => "platform",
            CollisionKind::Dynamic => "dynamic",
            CollisionKind::Slippery => "slippery",
            CollisionKind::Block => "block",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| PhysicsError::UnknownCollisionKind(name.to_string()))
    }

    /// Blocks movement from every side
    #[inline]
    pub fn is_solid(self) -> bool {
        CollisionSet::BLOCK.contains(self)
    }

    /// The stronger of two kinds sharing a tile
    pub fn max_with(self, other: Self) -> Self {
        if self == CollisionKind::Null || other == CollisionKind::Null {
            CollisionKind::Null
        } else {
            self.max(other)
        }
    }
}

/// Bitmask over [`CollisionKind`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CollisionSet(u8);

impl CollisionSet {
    pub const EMPTY: Self = Self(0);
    /// Everything that stops movement from all sides
    pub const BLOCK: Self = Self::of(&[
        CollisionKind::Null,
        CollisionKind::Dynamic,
        CollisionKind::Slippery,
        CollisionKind::Block,
    ]);
    /// Solid kinds plus platforms
    pub const DEFAULT: Self = Self::of(&[
        CollisionKind::Null,
        CollisionKind::Platform,
        CollisionKind::Dynamic,
        CollisionKind::Slippery,
        CollisionKind::Block,
    ]);

    pub const fn of(kinds: &[CollisionKind]) -> Self {
        let mut bits = 0u8;
        let mut i = 0;
        while i < kinds.len() {
            bits |= 1 << kinds[i] as u8;
            i += 1;
        }
        Self(bits)
    }

    #[inline]
    pub const fn contains(self, kind: CollisionKind) -> bool {
        self.0 & (1 << kind as u8) != 0
    }

    #[inline]
    pub fn insert(&mut self, kind: CollisionKind) {
        self.0 |= 1 << kind as u8;
    }

    #[inline]
    pub fn remove(&mut self, kind: CollisionKind) {
        self.0 &= !(1 << kind as u8);
    }

    pub fn without(mut self, kind: CollisionKind) -> Self {
        self.remove(kind);
        self
    }

    #[inline]
    pub fn bits(self) -> u8 {
        self.0
    }
}

/// One collidable polygon produced for a tile
#[derive(Debug, Clone, PartialEq)]
pub struct CollisionBlock {
    pub kind: CollisionKind,
    pub space: Vec2I,
    pub poly: PolyF,
    pub poly_bounds: RectF,
}

impl CollisionBlock {
    /// Full-tile square block
    pub fn tile(space: Vec2I, kind: CollisionKind) -> Self {
        let bounds = RectF::with_size(space.to_f32(), Vec2F::ONE);
        Self {
            kind,
            space,
            poly: PolyF::from_rect(&bounds),
            poly_bounds: bounds,
        }
    }

    pub fn with_poly(space: Vec2I, kind: CollisionKind, poly: PolyF) -> Self {
        let poly_bounds = poly.bound_box();
        Self {
            kind,
            space,
            poly,
            poly_bounds,
        }
    }
}

/// What a movement controller asks of the world around it
pub trait CollisionWorld {
    /// Collision kind of a single tile
    fn tile_collision(&self, tile: Vec2I) -> CollisionKind;

    /// Downward gravity at `position` in tiles/s²
    fn gravity(&self, position: Vec2F) -> f32;

    /// Append blocks for every colliding tile in `region`
    fn collision_blocks(&self, region: RectI, out: &mut Vec<CollisionBlock>) {
        for tile in region.tiles() {
            let kind = self.tile_collision(tile);
            if kind != CollisionKind::None {
                out.push(CollisionBlock::tile(tile, kind));
            }
        }
    }

    /// Fraction of `region` covered by liquid, `0.0..=1.0`
    fn liquid_percentage(&self, _region: &RectF) -> f32 {
        0.0
    }

    /// Moving collision polys exported by physics entities near `region`
    fn moving_collisions(&self, _region: &RectF, _out: &mut Vec<MovingCollision>) {}

    /// Force regions exported by physics entities near `region`
    fn force_regions(&self, _region: &RectF, _out: &mut Vec<PhysicsForceRegion>) {}

    /// Whether any tile in `region` collides with a kind in `set`
    fn rect_collision(&self, region: RectI, set: CollisionSet) -> bool {
        region.tiles().any(|tile| set.contains(self.tile_collision(tile)))
    }
}

/// Sparse tile collision map with uniform gravity.
///
/// Stands in for a full world where only collision matters: path finder
/// searches, scripted previews and tests.
#[derive(Debug, Clone)]
pub struct CollisionGrid {
    tiles: HashMap<Vec2I, CollisionKind>,
    liquid: HashMap<Vec2I, f32>,
    gravity: f32,
    moving: Vec<MovingCollision>,
}

impl CollisionGrid {
    pub fn new(gravity: f32) -> Self {
        Self {
            tiles: HashMap::new(),
            liquid: HashMap::new(),
            gravity,
            moving: Vec::new(),
        }
    }

    pub fn set(&mut self, tile: Vec2I, kind: CollisionKind) {
        if kind == CollisionKind::None {
            self.tiles.remove(&tile);
        } else {
            self.tiles.insert(tile, kind);
        }
    }

    /// Fill the inclusive-exclusive tile rectangle
    pub fn fill(&mut self, region: RectI, kind: CollisionKind) {
        for tile in region.tiles() {
            self.set(tile, kind);
        }
    }

    pub fn set_liquid(&mut self, tile: Vec2I, level: f32) {
        if level <= 0.0 {
            self.liquid.remove(&tile);
        } else {
            self.liquid.insert(tile, level.min(1.0));
        }
    }

    pub fn add_moving_collision(&mut self, collision: MovingCollision) {
        self.moving.push(collision);
    }

    pub fn clear_moving_collisions(&mut self) {
        self.moving.clear();
    }

    pub fn set_gravity(&mut self, gravity: f32) {
        self.gravity = gravity;
    }
}

impl CollisionWorld for CollisionGrid {
    fn tile_collision(&self, tile: Vec2I) -> CollisionKind {
        self.tiles.get(&tile).copied().unwrap_or(CollisionKind::None)
    }

    fn gravity(&self, _position: Vec2F) -> f32 {
        self.gravity
    }

    fn liquid_percentage(&self, region: &RectF) -> f32 {
        liquid_coverage(region, |tile| self.liquid.get(&tile).copied().unwrap_or(0.0))
    }

    fn moving_collisions(&self, region: &RectF, out: &mut Vec<MovingCollision>) {
        out.extend(
            self.moving
                .iter()
                .filter(|m| m.bound_box().intersects(region))
                .cloned(),
        );
    }
}

/// Area-weighted liquid coverage of `region`, where each tile's liquid
/// fills it from the bottom up to `level`
pub fn liquid_coverage(region: &RectF, level_at: impl Fn(Vec2I) -> f32) -> f32 {
    let area = region.width() * region.height();
    if area <= 0.0 {
        return 0.0;
    }
    let mut covered = 0.0;
    for tile in region.to_tiles().tiles() {
        let level = level_at(tile);
        if level <= 0.0 {
            continue;
        }
        let base = tile.to_f32();
        let liquid = RectF::with_size(base, Vec2F::new(1.0, level));
        let overlap = liquid.intersection(region);
        if !overlap.is_null() && !overlap.is_empty() {
            covered += overlap.width() * overlap.height();
        }
    }
    (covered / area).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_collision_sets() {
        assert!(CollisionSet::DEFAULT.contains(CollisionKind::Platform));
        assert!(!CollisionSet::BLOCK.contains(CollisionKind::Platform));
        assert!(CollisionSet::BLOCK.contains(CollisionKind::Null));
        assert!(!CollisionSet::DEFAULT.contains(CollisionKind::None));
        assert!(!CollisionSet::DEFAULT.without(CollisionKind::Block).contains(CollisionKind::Block));
    }

    #[test]
    fn test_null_dominates() {
        assert_eq!(
            CollisionKind::Platform.max_with(CollisionKind::Null),
            CollisionKind::Null
        );
        assert_eq!(
            CollisionKind::Platform.max_with(CollisionKind::Block),
            CollisionKind::Block
        );
        assert!(CollisionKind::Null.is_solid());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(CollisionKind::from_name("Slippery").unwrap(), CollisionKind::Slippery);
        assert!(CollisionKind::from_name("lava").is_err());
    }

    #[test]
    fn test_grid_liquid_coverage() {
        let mut grid = CollisionGrid::new(10.0);
        grid.set_liquid(Vec2I::new(0, 0), 1.0);
        grid.set_liquid(Vec2I::new(0, 1), 0.5);
        let region = RectF::from_coords(0.0, 0.0, 1.0, 2.0);
        assert_relative_eq!(grid.liquid_percentage(&region), 0.75, epsilon = 1e-5);
        let dry = RectF::from_coords(3.0, 3.0, 4.0, 4.0);
        assert_eq!(grid.liquid_percentage(&dry), 0.0);
    }
}
