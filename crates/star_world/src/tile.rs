//! The tile grid

use serde::{Deserialize, Serialize};
use star_core::{DataReader, DataResult, DataWriter};
use star_math::{RectI, Vec2I};
use star_physics::CollisionKind;

use crate::material::{MaterialId, EMPTY_MATERIAL, NULL_MATERIAL};

pub type LiquidId = u8;
pub type DungeonId = u16;

pub const EMPTY_LIQUID: LiquidId = 0;
/// Tiles outside any dungeon
pub const NO_DUNGEON: DungeonId = 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileLayer {
    Foreground,
    Background,
}

impl TileLayer {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "foreground" | "fg" => Some(TileLayer::Foreground),
            "background" | "bg" => Some(TileLayer::Background),
            _ => None,
        }
    }
}

/// Liquid in one tile; `level` is the fill fraction and may exceed 1 only
/// through `pressure`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiquidLevel {
    pub liquid: LiquidId,
    pub level: f32,
    pub pressure: f32,
}

impl LiquidLevel {
    pub const EMPTY: Self = Self {
        liquid: EMPTY_LIQUID,
        level: 0.0,
        pressure: 0.0,
    };

    pub fn is_empty(&self) -> bool {
        self.liquid == EMPTY_LIQUID || self.level <= 0.0
    }
}

impl Default for LiquidLevel {
    fn default() -> Self {
        Self::EMPTY
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tile {
    pub foreground: MaterialId,
    pub background: MaterialId,
    /// Derived from the foreground material
    pub collision: CollisionKind,
    pub liquid: LiquidLevel,
    pub dungeon_id: DungeonId,
}

impl Tile {
    pub const EMPTY: Self = Self {
        foreground: EMPTY_MATERIAL,
        background: EMPTY_MATERIAL,
        collision: CollisionKind::None,
        liquid: LiquidLevel::EMPTY,
        dungeon_id: NO_DUNGEON,
    };

    /// What reads outside the world return
    pub const NULL: Self = Self {
        foreground: NULL_MATERIAL,
        background: NULL_MATERIAL,
        collision: CollisionKind::Null,
        liquid: LiquidLevel::EMPTY,
        dungeon_id: NO_DUNGEON,
    };

    pub fn material(&self, layer: TileLayer) -> MaterialId {
        match layer {
            TileLayer::Foreground => self.foreground,
            TileLayer::Background => self.background,
        }
    }

    pub fn write(&self, out: &mut DataWriter) {
        out.write_u16(self.foreground);
        out.write_u16(self.background);
        out.write_u8(self.collision as u8);
        out.write_u8(self.liquid.liquid);
        out.write_f32(self.liquid.level);
        out.write_f32(self.liquid.pressure);
        out.write_u16(self.dungeon_id);
    }

    pub fn read(input: &mut DataReader<'_>) -> DataResult<Self> {
        let foreground = input.read_u16()?;
        let background = input.read_u16()?;
        let kind = input.read_u8()?;
        let collision = CollisionKind::ALL
            .into_iter()
            .find(|k| *k as u8 == kind)
            .ok_or_else(|| star_core::DataError::Invalid(format!("collision kind {}", kind)))?;
        let liquid = LiquidLevel {
            liquid: input.read_u8()?,
            level: input.read_f32()?,
            pressure: input.read_f32()?,
        };
        let dungeon_id = input.read_u16()?;
        Ok(Self {
            foreground,
            background,
            collision,
            liquid,
            dungeon_id,
        })
    }
}

impl Default for Tile {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// A change requested by scripts, commands or peers. Applied at the start
/// of the next world step.
#[derive(Debug, Clone, PartialEq)]
pub enum TileModification {
    PlaceMaterial {
        layer: TileLayer,
        material: MaterialId,
    },
    RemoveMaterial {
        layer: TileLayer,
    },
    PlaceLiquid {
        liquid: LiquidId,
        quantity: f32,
    },
}

/// Fixed-size, non-wrapping tile storage
#[derive(Debug, Clone)]
pub struct TileGrid {
    size: Vec2I,
    tiles: Vec<Tile>,
}

impl TileGrid {
    pub fn new(size: Vec2I) -> Self {
        let size = Vec2I::new(size.x.max(0), size.y.max(0));
        Self {
            size,
            tiles: vec![Tile::EMPTY; (size.x as usize) * (size.y as usize)],
        }
    }

    #[inline]
    pub fn size(&self) -> Vec2I {
        self.size
    }

    pub fn bounds(&self) -> RectI {
        RectI::new(Vec2I::ZERO, self.size)
    }

    #[inline]
    pub fn contains(&self, pos: Vec2I) -> bool {
        pos.x >= 0 && pos.y >= 0 && pos.x < self.size.x && pos.y < self.size.y
    }

    fn index(&self, pos: Vec2I) -> Option<usize> {
        if self.contains(pos) {
            Some(pos.y as usize * self.size.x as usize + pos.x as usize)
        } else {
            None
        }
    }

    /// The tile at `pos`, or [`Tile::NULL`] outside the world
    pub fn get(&self, pos: Vec2I) -> Tile {
        self.index(pos).map_or(Tile::NULL, |i| self.tiles[i])
    }

    pub fn get_mut(&mut self, pos: Vec2I) -> Option<&mut Tile> {
        self.index(pos).map(move |i| &mut self.tiles[i])
    }

    pub fn collision(&self, pos: Vec2I) -> CollisionKind {
        self.get(pos).collision
    }

    /// Positions of tiles differing from [`Tile::EMPTY`]
    pub fn non_empty(&self) -> impl Iterator<Item = Vec2I> + '_ {
        let width = self.size.x.max(1) as usize;
        self.tiles
            .iter()
            .enumerate()
            .filter(|(_, t)| **t != Tile::EMPTY)
            .map(move |(i, _)| Vec2I::new((i % width) as i32, (i / width) as i32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_bounds_reads_null() {
        let grid = TileGrid::new(Vec2I::new(4, 4));
        assert_eq!(grid.get(Vec2I::new(1, 1)), Tile::EMPTY);
        assert_eq!(grid.collision(Vec2I::new(-1, 0)), CollisionKind::Null);
        assert_eq!(grid.collision(Vec2I::new(4, 0)), CollisionKind::Null);
    }

    #[test]
    fn test_tile_encoding() {
        let tile = Tile {
            foreground: 3,
            collision: CollisionKind::Block,
            liquid: LiquidLevel {
                liquid: 1,
                level: 0.5,
                pressure: 0.5,
            },
            ..Tile::EMPTY
        };
        let mut out = DataWriter::new();
        tile.write(&mut out);
        let bytes = out.into_bytes();
        let mut input = DataReader::new(&bytes);
        assert_eq!(Tile::read(&mut input).unwrap(), tile);
        assert!(input.at_end());
    }

    #[test]
    fn test_non_empty_positions() {
        let mut grid = TileGrid::new(Vec2I::new(3, 2));
        if let Some(tile) = grid.get_mut(Vec2I::new(2, 1)) {
            tile.foreground = 1;
        }
        assert_eq!(grid.non_empty().collect::<Vec<_>>(), vec![Vec2I::new(2, 1)]);
    }
}
