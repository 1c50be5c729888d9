//! Axis aligned rectangles

use crate::vector::{Vec2F, Vec2I};

/// Float rectangle, `min` inclusive and `max` exclusive
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "[f32; 4]", into = "[f32; 4]"))]
pub struct RectF {
    pub min: Vec2F,
    pub max: Vec2F,
}

impl RectF {
    /// Inverted rectangle that any `combine` replaces
    pub const NULL: Self = Self {
        min: Vec2F::new(f32::MAX, f32::MAX),
        max: Vec2F::new(f32::MIN, f32::MIN),
    };

    #[inline]
    pub const fn new(min: Vec2F, max: Vec2F) -> Self {
        Self { min, max }
    }

    #[inline]
    pub const fn from_coords(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self::new(Vec2F::new(x_min, y_min), Vec2F::new(x_max, y_max))
    }

    #[inline]
    pub fn with_size(min: Vec2F, size: Vec2F) -> Self {
        Self::new(min, min + size)
    }

    #[inline]
    pub fn with_center(center: Vec2F, size: Vec2F) -> Self {
        Self::new(center - size * 0.5, center + size * 0.5)
    }

    pub fn from_points(points: &[Vec2F]) -> Self {
        points
            .iter()
            .fold(Self::NULL, |r, &p| Self::new(r.min.min(p), r.max.max(p)))
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x >= self.max.x || self.min.y >= self.max.y
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.max.x - self.min.x
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.max.y - self.min.y
    }

    #[inline]
    pub fn size(&self) -> Vec2F {
        self.max - self.min
    }

    #[inline]
    pub fn center(&self) -> Vec2F {
        (self.min + self.max) * 0.5
    }

    #[inline]
    pub fn contains(&self, p: Vec2F) -> bool {
        p.x >= self.min.x && p.x < self.max.x && p.y >= self.min.y && p.y < self.max.y
    }

    /// Strict overlap; touching edges do not intersect
    #[inline]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.x < other.max.x
            && other.min.x < self.max.x
            && self.min.y < other.max.y
            && other.min.y < self.max.y
    }

    pub fn intersection(&self, other: &Self) -> Self {
        Self::new(self.min.max(other.min), self.max.min(other.max))
    }

    pub fn combine(&self, other: &Self) -> Self {
        if self.is_null() {
            return *other;
        }
        if other.is_null() {
            return *self;
        }
        Self::new(self.min.min(other.min), self.max.max(other.max))
    }

    pub fn combine_point(&self, p: Vec2F) -> Self {
        Self::new(self.min.min(p), self.max.max(p))
    }

    #[inline]
    pub fn translated(&self, offset: Vec2F) -> Self {
        Self::new(self.min + offset, self.max + offset)
    }

    #[inline]
    pub fn padded(&self, amount: f32) -> Self {
        Self::new(self.min - Vec2F::splat(amount), self.max + Vec2F::splat(amount))
    }

    pub fn corners(&self) -> [Vec2F; 4] {
        [
            self.min,
            Vec2F::new(self.max.x, self.min.y),
            self.max,
            Vec2F::new(self.min.x, self.max.y),
        ]
    }

    /// Smallest integer rectangle covering this one
    pub fn to_tiles(&self) -> RectI {
        RectI::new(
            Vec2I::new(self.min.x.floor() as i32, self.min.y.floor() as i32),
            Vec2I::new(self.max.x.ceil() as i32, self.max.y.ceil() as i32),
        )
    }

    #[inline]
    pub fn to_array(&self) -> [f32; 4] {
        [self.min.x, self.min.y, self.max.x, self.max.y]
    }
}

impl From<[f32; 4]> for RectF {
    fn from(v: [f32; 4]) -> Self {
        Self::from_coords(v[0], v[1], v[2], v[3])
    }
}

impl From<RectF> for [f32; 4] {
    fn from(r: RectF) -> Self {
        r.to_array()
    }
}

/// Integer rectangle, `min` inclusive and `max` exclusive
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "[i32; 4]", into = "[i32; 4]"))]
pub struct RectI {
    pub min: Vec2I,
    pub max: Vec2I,
}

impl RectI {
    #[inline]
    pub const fn new(min: Vec2I, max: Vec2I) -> Self {
        Self { min, max }
    }

    #[inline]
    pub const fn from_coords(x_min: i32, y_min: i32, x_max: i32, y_max: i32) -> Self {
        Self::new(Vec2I::new(x_min, y_min), Vec2I::new(x_max, y_max))
    }

    #[inline]
    pub fn with_size(min: Vec2I, size: Vec2I) -> Self {
        Self::new(min, min + size)
    }

    #[inline]
    pub fn width(&self) -> i32 {
        self.max.x - self.min.x
    }

    #[inline]
    pub fn height(&self) -> i32 {
        self.max.y - self.min.y
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x >= self.max.x || self.min.y >= self.max.y
    }

    #[inline]
    pub fn contains(&self, p: Vec2I) -> bool {
        p.x >= self.min.x && p.x < self.max.x && p.y >= self.min.y && p.y < self.max.y
    }

    #[inline]
    pub fn contains_rect(&self, other: &Self) -> bool {
        other.min.x >= self.min.x
            && other.min.y >= self.min.y
            && other.max.x <= self.max.x
            && other.max.y <= self.max.y
    }

    pub fn intersection(&self, other: &Self) -> Self {
        Self::new(
            Vec2I::new(self.min.x.max(other.min.x), self.min.y.max(other.min.y)),
            Vec2I::new(self.max.x.min(other.max.x), self.max.y.min(other.max.y)),
        )
    }

    #[inline]
    pub fn translated(&self, offset: Vec2I) -> Self {
        Self::new(self.min + offset, self.max + offset)
    }

    #[inline]
    pub fn padded(&self, amount: i32) -> Self {
        Self::from_coords(
            self.min.x - amount,
            self.min.y - amount,
            self.max.x + amount,
            self.max.y + amount,
        )
    }

    pub fn to_f32(&self) -> RectF {
        RectF::new(self.min.to_f32(), self.max.to_f32())
    }

    /// Every contained tile in row-major order
    pub fn tiles(&self) -> impl Iterator<Item = Vec2I> + '_ {
        let (x0, x1) = (self.min.x, self.max.x);
        (self.min.y..self.max.y).flat_map(move |y| (x0..x1).map(move |x| Vec2I::new(x, y)))
    }

    #[inline]
    pub fn to_array(&self) -> [i32; 4] {
        [self.min.x, self.min.y, self.max.x, self.max.y]
    }
}

impl From<[i32; 4]> for RectI {
    fn from(v: [i32; 4]) -> Self {
        Self::from_coords(v[0], v[1], v[2], v[3])
    }
}

impl From<RectI> for [i32; 4] {
    fn from(r: RectI) -> Self {
        r.to_array()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touching_rects_do_not_intersect() {
        let a = RectF::from_coords(0.0, 0.0, 1.0, 1.0);
        let b = RectF::from_coords(1.0, 0.0, 2.0, 1.0);
        assert!(!a.intersects(&b));
        assert!(a.intersects(&b.translated(Vec2F::new(-0.1, 0.0))));
    }

    #[test]
    fn test_to_tiles_covers() {
        let r = RectF::from_coords(-0.5, 0.2, 1.5, 0.8).to_tiles();
        assert_eq!(r, RectI::from_coords(-1, 0, 2, 1));
        assert_eq!(r.tiles().count(), 3);
    }

    #[test]
    fn test_combine_with_null() {
        let a = RectF::from_coords(0.0, 0.0, 1.0, 1.0);
        assert_eq!(RectF::NULL.combine(&a), a);
    }
}
