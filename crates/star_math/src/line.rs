//! Line segments

use crate::vector::Vec2F;

/// Line segment from `start` to `end`
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Line2F {
    pub start: Vec2F,
    pub end: Vec2F,
}

impl Line2F {
    #[inline]
    pub const fn new(start: Vec2F, end: Vec2F) -> Self {
        Self { start, end }
    }

    #[inline]
    pub fn diff(&self) -> Vec2F {
        self.end - self.start
    }

    #[inline]
    pub fn length(&self) -> f32 {
        self.diff().length()
    }

    #[inline]
    pub fn eval(&self, t: f32) -> Vec2F {
        self.start + self.diff() * t
    }

    /// Segment intersection, returning the parameter along `self` and the point
    pub fn intersection(&self, other: &Self) -> Option<(f32, Vec2F)> {
        let r = self.diff();
        let s = other.diff();
        let denom = r.cross(s);
        if denom.abs() < 1e-9 {
            return None;
        }
        let qp = other.start - self.start;
        let t = qp.cross(s) / denom;
        let u = qp.cross(r) / denom;
        if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
            Some((t, self.eval(t)))
        } else {
            None
        }
    }

    /// Distance from `p` to the closest point on the segment
    pub fn distance_to(&self, p: Vec2F) -> f32 {
        let d = self.diff();
        let len2 = d.length_squared();
        if len2 == 0.0 {
            return (p - self.start).length();
        }
        let t = ((p - self.start).dot(d) / len2).clamp(0.0, 1.0);
        (p - self.eval(t)).length()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crossing_segments() {
        let a = Line2F::new(Vec2F::new(0.0, 0.0), Vec2F::new(2.0, 2.0));
        let b = Line2F::new(Vec2F::new(0.0, 2.0), Vec2F::new(2.0, 0.0));
        let (t, p) = a.intersection(&b).unwrap();
        assert!((t - 0.5).abs() < 1e-6);
        assert_eq!(p, Vec2F::new(1.0, 1.0));
    }

    #[test]
    fn test_parallel_segments_miss() {
        let a = Line2F::new(Vec2F::new(0.0, 0.0), Vec2F::new(1.0, 0.0));
        let b = Line2F::new(Vec2F::new(0.0, 1.0), Vec2F::new(1.0, 1.0));
        assert!(a.intersection(&b).is_none());
        assert_eq!(a.distance_to(Vec2F::new(0.5, 1.0)), 1.0);
    }
}
