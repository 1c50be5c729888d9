//! # star_math - 2D Math
//!
//! Tile-space geometry: vectors, axis aligned rectangles, convex polygons
//! with separating-axis intersection, and line segments.
//!
//! World space is y-up. One unit is one tile.

pub mod line;
pub mod poly;
pub mod rect;
pub mod vector;

pub use line::*;
pub use poly::*;
pub use rect::*;
pub use vector::*;

/// Common math constants
pub mod consts {
    pub const PI: f32 = core::f32::consts::PI;
    pub const TAU: f32 = PI * 2.0;
    pub const EPSILON: f32 = 1e-6;
}

/// Linear interpolation
#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Move `current` toward `target` by at most `max_delta`
#[inline]
pub fn approach(target: f32, current: f32, max_delta: f32) -> f32 {
    if current < target {
        (current + max_delta).min(target)
    } else {
        (current - max_delta).max(target)
    }
}

/// Sign as -1, 0 or 1
#[inline]
pub fn sign_of(v: f32) -> f32 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approach_clamps() {
        assert_eq!(approach(10.0, 0.0, 3.0), 3.0);
        assert_eq!(approach(1.0, 0.0, 3.0), 1.0);
        assert_eq!(approach(-1.0, 0.0, 3.0), -1.0);
    }
}
