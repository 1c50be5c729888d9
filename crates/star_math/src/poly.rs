//! Convex polygons with separating axis tests

use crate::rect::RectF;
use crate::vector::Vec2F;

/// Result of a separating axis intersection
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SatResult {
    /// Translation to apply to the first polygon to separate the pair
    pub translation: Vec2F,
    /// Unit axis of the translation
    pub normal: Vec2F,
    /// Penetration depth along `normal`
    pub depth: f32,
}

/// Convex polygon with counter-clockwise vertices
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "Vec<Vec2F>", into = "Vec<Vec2F>"))]
pub struct PolyF {
    vertices: Vec<Vec2F>,
}

impl PolyF {
    /// Build from vertices, taking the convex hull so winding and
    /// convexity hold regardless of input order
    pub fn new(points: impl IntoIterator<Item = Vec2F>) -> Self {
        Self {
            vertices: convex_hull(points.into_iter().collect()),
        }
    }

    pub fn from_rect(rect: &RectF) -> Self {
        Self {
            vertices: rect.corners().to_vec(),
        }
    }

    #[inline]
    pub fn vertices(&self) -> &[Vec2F] {
        &self.vertices
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn translate(&mut self, offset: Vec2F) {
        for v in &mut self.vertices {
            *v += offset;
        }
    }

    pub fn translated(&self, offset: Vec2F) -> Self {
        let mut out = self.clone();
        out.translate(offset);
        out
    }

    pub fn rotated(&self, angle: f32) -> Self {
        Self {
            vertices: self.vertices.iter().map(|v| v.rotate(angle)).collect(),
        }
    }

    /// Mirror around the y axis, keeping counter-clockwise winding
    pub fn flipped_horizontal(&self) -> Self {
        let mut vertices: Vec<Vec2F> =
            self.vertices.iter().map(|v| Vec2F::new(-v.x, v.y)).collect();
        vertices.reverse();
        Self { vertices }
    }

    pub fn bound_box(&self) -> RectF {
        RectF::from_points(&self.vertices)
    }

    pub fn center(&self) -> Vec2F {
        if self.vertices.is_empty() {
            return Vec2F::ZERO;
        }
        let sum = self.vertices.iter().fold(Vec2F::ZERO, |a, &b| a + b);
        sum / self.vertices.len() as f32
    }

    /// Edges as (start, end) pairs
    pub fn sides(&self) -> impl Iterator<Item = (Vec2F, Vec2F)> + '_ {
        let n = self.vertices.len();
        (0..n).map(move |i| (self.vertices[i], self.vertices[(i + 1) % n]))
    }

    /// Outward unit normals, one per edge
    pub fn normals(&self) -> impl Iterator<Item = Vec2F> + '_ {
        self.sides()
            .map(|(a, b)| Vec2F::new(b.y - a.y, a.x - b.x).normalize())
            .filter(|n| *n != Vec2F::ZERO)
    }

    pub fn contains(&self, p: Vec2F) -> bool {
        if self.vertices.len() < 3 {
            return false;
        }
        self.sides().all(|(a, b)| (b - a).cross(p - a) >= 0.0)
    }

    fn project(&self, axis: Vec2F) -> (f32, f32) {
        let mut min = f32::MAX;
        let mut max = f32::MIN;
        for v in &self.vertices {
            let d = v.dot(axis);
            min = min.min(d);
            max = max.max(d);
        }
        (min, max)
    }

    /// Strict overlap test
    pub fn intersects(&self, other: &Self) -> bool {
        self.sat_intersection(other).is_some()
    }

    /// Minimum translation that separates `self` from `other`, or `None`
    /// when they do not overlap. Touching polygons do not overlap.
    pub fn sat_intersection(&self, other: &Self) -> Option<SatResult> {
        if self.vertices.is_empty() || other.vertices.is_empty() {
            return None;
        }

        let mut best: Option<SatResult> = None;
        for axis in self.normals().chain(other.normals()) {
            let (a_min, a_max) = self.project(axis);
            let (b_min, b_max) = other.project(axis);
            let push_negative = a_max - b_min;
            let push_positive = b_max - a_min;
            if push_negative <= 0.0 || push_positive <= 0.0 {
                return None;
            }
            let (depth, normal) = if push_negative < push_positive {
                (push_negative, -axis)
            } else {
                (push_positive, axis)
            };
            if best.map_or(true, |b| depth < b.depth) {
                best = Some(SatResult {
                    translation: normal * depth,
                    normal,
                    depth,
                });
            }
        }
        best
    }

    /// Distance `self` must move along the unit `direction` to separate from
    /// `other`, or `None` when they do not overlap
    pub fn directional_sat(&self, other: &Self, direction: Vec2F) -> Option<f32> {
        self.sat_intersection(other)?;

        let mut best = f32::MAX;
        for axis in self.normals().chain(other.normals()) {
            let dn = direction.dot(axis);
            if dn.abs() < 1e-6 {
                continue;
            }
            let (a_min, a_max) = self.project(axis);
            let (b_min, b_max) = other.project(axis);
            let needed = if dn > 0.0 {
                (b_max - a_min) / dn
            } else {
                (a_max - b_min) / -dn
            };
            best = best.min(needed);
        }
        if best == f32::MAX { None } else { Some(best) }
    }
}

impl From<Vec<Vec2F>> for PolyF {
    fn from(points: Vec<Vec2F>) -> Self {
        Self::new(points)
    }
}

impl From<PolyF> for Vec<Vec2F> {
    fn from(p: PolyF) -> Self {
        p.vertices
    }
}

/// Monotone chain convex hull, counter-clockwise, no collinear points
pub fn convex_hull(mut points: Vec<Vec2F>) -> Vec<Vec2F> {
    points.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    points.dedup();
    if points.len() < 3 {
        return points;
    }

    let mut hull: Vec<Vec2F> = Vec::with_capacity(points.len() * 2);
    for pass in 0..2 {
        let start = hull.len();
        let iter: Box<dyn Iterator<Item = &Vec2F>> = if pass == 0 {
            Box::new(points.iter())
        } else {
            Box::new(points.iter().rev())
        };
        for &p in iter {
            while hull.len() >= start + 2 {
                let a = hull[hull.len() - 2];
                let b = hull[hull.len() - 1];
                if (b - a).cross(p - a) <= 0.0 {
                    hull.pop();
                } else {
                    break;
                }
            }
            hull.push(p);
        }
        hull.pop();
    }
    hull
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_square() -> PolyF {
        PolyF::from_rect(&RectF::from_coords(0.0, 0.0, 1.0, 1.0))
    }

    #[test]
    fn test_hull_orders_ccw() {
        let p = PolyF::new([
            Vec2F::new(1.0, 1.0),
            Vec2F::new(0.0, 0.0),
            Vec2F::new(0.5, 0.5),
            Vec2F::new(1.0, 0.0),
            Vec2F::new(0.0, 1.0),
        ]);
        assert_eq!(p.len(), 4);
        assert!(p.contains(Vec2F::new(0.5, 0.5)));
        assert!(!p.contains(Vec2F::new(1.5, 0.5)));
    }

    #[test]
    fn test_sat_pushes_out_shallowest() {
        let body = unit_square().translated(Vec2F::new(0.0, 0.9));
        let ground = unit_square();
        let hit = body.sat_intersection(&ground).unwrap();
        assert_relative_eq!(hit.translation.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(hit.translation.y, 0.1, epsilon = 1e-5);
    }

    #[test]
    fn test_touching_is_not_intersecting() {
        let body = unit_square().translated(Vec2F::new(0.0, 1.0));
        assert!(body.sat_intersection(&unit_square()).is_none());
    }

    #[test]
    fn test_directional_sat_up() {
        let body = unit_square().translated(Vec2F::new(0.8, 0.5));
        let ground = unit_square();
        let up = body.directional_sat(&ground, Vec2F::Y).unwrap();
        assert_relative_eq!(up, 0.5, epsilon = 1e-5);
    }
}
