//! Force regions and moving collisions exported by physics entities

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use star_math::{Line2F, PolyF, RectF, Vec2F};

use crate::collision::CollisionKind;

/// Which movement controllers a force region or collision affects, by
/// their `physicsEffectCategories`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PhysicsCategoryFilter {
    Whitelist(BTreeSet<String>),
    Blacklist(BTreeSet<String>),
}

impl Default for PhysicsCategoryFilter {
    fn default() -> Self {
        PhysicsCategoryFilter::Blacklist(BTreeSet::new())
    }
}

impl PhysicsCategoryFilter {
    pub fn check(&self, categories: &BTreeSet<String>) -> bool {
        match self {
            PhysicsCategoryFilter::Whitelist(allowed) => {
                categories.iter().any(|c| allowed.contains(c))
            }
            PhysicsCategoryFilter::Blacklist(denied) => {
                !categories.iter().any(|c| denied.contains(c))
            }
        }
    }
}

/// A polygon other bodies treat as ground or wall that may move
#[derive(Debug, Clone, PartialEq)]
pub struct MovingCollision {
    /// Entity that owns the poly and the index within that entity
    pub source: MovingCollisionId,
    pub position: Vec2F,
    /// Poly relative to `position`
    pub collision: PolyF,
    pub kind: CollisionKind,
    /// Velocity bodies standing on it are carried with
    pub velocity: Vec2F,
    pub categories: PhysicsCategoryFilter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MovingCollisionId {
    pub entity: i32,
    pub index: usize,
}

impl MovingCollision {
    pub fn world_poly(&self) -> PolyF {
        self.collision.translated(self.position)
    }

    pub fn bound_box(&self) -> RectF {
        self.collision.bound_box().translated(self.position)
    }
}

/// An area that pushes bodies toward a target velocity
#[derive(Debug, Clone, PartialEq)]
pub enum PhysicsForceRegion {
    /// Approach a target velocity on either axis inside a poly
    Directional {
        region: PolyF,
        x_target_velocity: Option<f32>,
        y_target_velocity: Option<f32>,
        control_force: f32,
        categories: PhysicsCategoryFilter,
    },
    /// Push away from (positive) or toward (negative) a centre point
    Radial {
        center: Vec2F,
        outer_radius: f32,
        inner_radius: f32,
        target_radial_velocity: f32,
        control_force: f32,
        categories: PhysicsCategoryFilter,
    },
    /// Push along a line, strongest at its start and fading to its end
    Gradient {
        region: PolyF,
        gradient: Line2F,
        base_target_velocity: f32,
        base_control_force: f32,
        categories: PhysicsCategoryFilter,
    },
}

impl PhysicsForceRegion {
    pub fn categories(&self) -> &PhysicsCategoryFilter {
        match self {
            PhysicsForceRegion::Directional { categories, .. }
            | PhysicsForceRegion::Radial { categories, .. }
            | PhysicsForceRegion::Gradient { categories, .. } => categories,
        }
    }

    pub fn bound_box(&self) -> RectF {
        match self {
            PhysicsForceRegion::Directional { region, .. }
            | PhysicsForceRegion::Gradient { region, .. } => region.bound_box(),
            PhysicsForceRegion::Radial {
                center,
                outer_radius,
                ..
            } => RectF::with_center(*center, Vec2F::splat(outer_radius * 2.0)),
        }
    }

    pub fn translated(&self, offset: Vec2F) -> Self {
        let mut out = self.clone();
        match &mut out {
            PhysicsForceRegion::Directional { region, .. } => region.translate(offset),
            PhysicsForceRegion::Radial { center, .. } => *center += offset,
            PhysicsForceRegion::Gradient {
                region, gradient, ..
            } => {
                region.translate(offset);
                *gradient = Line2F::new(gradient.start + offset, gradient.end + offset);
            }
        }
        out
    }

    /// Velocity to approach and the force cap for a body with `body` poly,
    /// as `(target, axis mask, force)`. `None` when the body is outside.
    pub(crate) fn approach_for(&self, body: &PolyF) -> Option<ForceApproach> {
        match self {
            PhysicsForceRegion::Directional {
                region,
                x_target_velocity,
                y_target_velocity,
                control_force,
                ..
            } => {
                if !region.intersects(body) {
                    return None;
                }
                Some(ForceApproach {
                    x: *x_target_velocity,
                    y: *y_target_velocity,
                    along: None,
                    force: *control_force,
                })
            }
            PhysicsForceRegion::Radial {
                center,
                outer_radius,
                inner_radius,
                target_radial_velocity,
                control_force,
                ..
            } => {
                let offset = body.center() - *center;
                let distance = offset.length();
                if distance > *outer_radius || distance < *inner_radius || distance <= 0.0 {
                    return None;
                }
                Some(ForceApproach {
                    x: None,
                    y: None,
                    along: Some((offset / distance, *target_radial_velocity)),
                    force: *control_force,
                })
            }
            PhysicsForceRegion::Gradient {
                region,
                gradient,
                base_target_velocity,
                base_control_force,
                ..
            } => {
                if !region.intersects(body) {
                    return None;
                }
                let length = gradient.length();
                if length <= 0.0 {
                    return None;
                }
                let direction = gradient.diff() / length;
                let along = (body.center() - gradient.start).dot(direction) / length;
                let strength = 1.0 - along.clamp(0.0, 1.0);
                Some(ForceApproach {
                    x: None,
                    y: None,
                    along: Some((direction, base_target_velocity * strength)),
                    force: base_control_force * strength,
                })
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ForceApproach {
    pub x: Option<f32>,
    pub y: Option<f32>,
    pub along: Option<(Vec2F, f32)>,
    pub force: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categories(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_category_filter() {
        let white = PhysicsCategoryFilter::Whitelist(categories(&["player"]));
        assert!(white.check(&categories(&["player", "monster"])));
        assert!(!white.check(&categories(&["monster"])));

        let black = PhysicsCategoryFilter::Blacklist(categories(&["projectile"]));
        assert!(black.check(&categories(&["player"])));
        assert!(!black.check(&categories(&["projectile"])));
        assert!(PhysicsCategoryFilter::default().check(&BTreeSet::new()));
    }

    #[test]
    fn test_radial_outside_radius() {
        let region = PhysicsForceRegion::Radial {
            center: Vec2F::ZERO,
            outer_radius: 2.0,
            inner_radius: 0.0,
            target_radial_velocity: 5.0,
            control_force: 10.0,
            categories: PhysicsCategoryFilter::default(),
        };
        let near = PolyF::from_rect(&RectF::with_center(Vec2F::new(1.0, 0.0), Vec2F::ONE));
        let far = PolyF::from_rect(&RectF::with_center(Vec2F::new(5.0, 0.0), Vec2F::ONE));
        let approach = region.approach_for(&near).unwrap();
        assert_eq!(approach.along.unwrap().0, Vec2F::X);
        assert!(region.approach_for(&far).is_none());
    }
}
