//! Force region and moving collision configs
//!
//! Vehicles and objects declare named `physicsForces` and
//! `physicsCollisions` in their config. Each can be toggled by scripts and
//! is exported in world space while enabled.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use star_core::Json;
use star_math::{Line2F, PolyF, RectF, Vec2F};
use star_physics::{CollisionKind, MovingCollision, MovingCollisionId, PhysicsCategoryFilter, PhysicsForceRegion};

use crate::entity::EntityId;
use crate::error::{Result, WorldError};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CategoryConfig {
    category_whitelist: Option<BTreeSet<String>>,
    category_blacklist: Option<BTreeSet<String>>,
}

impl CategoryConfig {
    fn filter(self) -> PhysicsCategoryFilter {
        match (self.category_whitelist, self.category_blacklist) {
            (Some(white), _) => PhysicsCategoryFilter::Whitelist(white),
            (None, Some(black)) => PhysicsCategoryFilter::Blacklist(black),
            (None, None) => PhysicsCategoryFilter::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ForceRegionConfig {
    #[serde(rename = "DirectionalForceRegion", rename_all = "camelCase")]
    Directional {
        rect_region: Option<RectF>,
        poly_region: Option<PolyF>,
        x_target_velocity: Option<f32>,
        y_target_velocity: Option<f32>,
        control_force: f32,
        #[serde(flatten)]
        categories: CategoryConfig,
    },
    #[serde(rename = "RadialForceRegion", rename_all = "camelCase")]
    Radial {
        #[serde(default)]
        center: Vec2F,
        outer_radius: f32,
        #[serde(default)]
        inner_radius: f32,
        target_radial_velocity: f32,
        control_force: f32,
        #[serde(flatten)]
        categories: CategoryConfig,
    },
    #[serde(rename = "GradientForceRegion", rename_all = "camelCase")]
    Gradient {
        rect_region: Option<RectF>,
        poly_region: Option<PolyF>,
        gradient: [Vec2F; 2],
        base_target_velocity: f32,
        base_control_force: f32,
        #[serde(flatten)]
        categories: CategoryConfig,
    },
}

fn region_poly(rect: Option<RectF>, poly: Option<PolyF>, name: &str) -> Result<PolyF> {
    match (poly, rect) {
        (Some(poly), _) => Ok(poly),
        (None, Some(rect)) => Ok(PolyF::from_rect(&rect)),
        (None, None) => Err(WorldError::InvalidConfig {
            kind: "force region",
            name: name.to_string(),
            reason: "needs a rectRegion or polyRegion".into(),
        }),
    }
}

/// Parse one force region; coordinates are relative to the owner
pub fn parse_force_region(name: &str, json: &Json) -> Result<PhysicsForceRegion> {
    let config: ForceRegionConfig = serde_json::from_value(json.clone()).map_err(|e| WorldError::InvalidConfig {
        kind: "force region",
        name: name.to_string(),
        reason: e.to_string(),
    })?;
    Ok(match config {
        ForceRegionConfig::Directional {
            rect_region,
            poly_region,
            x_target_velocity,
            y_target_velocity,
            control_force,
            categories,
        } => PhysicsForceRegion::Directional {
            region: region_poly(rect_region, poly_region, name)?,
            x_target_velocity,
            y_target_velocity,
            control_force,
            categories: categories.filter(),
        },
        ForceRegionConfig::Radial {
            center,
            outer_radius,
            inner_radius,
            target_radial_velocity,
            control_force,
            categories,
        } => PhysicsForceRegion::Radial {
            center,
            outer_radius,
            inner_radius,
            target_radial_velocity,
            control_force,
            categories: categories.filter(),
        },
        ForceRegionConfig::Gradient {
            rect_region,
            poly_region,
            gradient,
            base_target_velocity,
            base_control_force,
            categories,
        } => PhysicsForceRegion::Gradient {
            region: region_poly(rect_region, poly_region, name)?,
            gradient: Line2F::new(gradient[0], gradient[1]),
            base_target_velocity,
            base_control_force,
            categories: categories.filter(),
        },
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MovingCollisionConfig {
    #[serde(default)]
    position: Vec2F,
    collision: PolyF,
    #[serde(default)]
    collision_kind: Option<String>,
    #[serde(flatten)]
    categories: CategoryConfig,
}

/// A moving collision relative to its owner, before it is placed in the
/// world
#[derive(Debug, Clone, PartialEq)]
pub struct MovingCollisionTemplate {
    pub position: Vec2F,
    pub collision: PolyF,
    pub kind: CollisionKind,
    pub categories: PhysicsCategoryFilter,
}

impl MovingCollisionTemplate {
    pub fn from_json(name: &str, json: &Json) -> Result<Self> {
        let config: MovingCollisionConfig =
            serde_json::from_value(json.clone()).map_err(|e| WorldError::InvalidConfig {
                kind: "moving collision",
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        let kind = match config.collision_kind.as_deref() {
            Some(kind) => CollisionKind::from_name(kind)?,
            None => CollisionKind::Block,
        };
        Ok(Self {
            position: config.position,
            collision: config.collision,
            kind,
            categories: config.categories.filter(),
        })
    }

    pub fn place(&self, owner: EntityId, index: usize, origin: Vec2F, velocity: Vec2F) -> MovingCollision {
        MovingCollision {
            source: MovingCollisionId { entity: owner, index },
            position: origin + self.position,
            collision: self.collision.clone(),
            kind: self.kind,
            velocity,
            categories: self.categories.clone(),
        }
    }
}

/// Named force regions and collisions an entity can switch on and off
#[derive(Debug, Clone, Default)]
pub struct PhysicsExports {
    forces: BTreeMap<String, (PhysicsForceRegion, bool)>,
    collisions: BTreeMap<String, (MovingCollisionTemplate, bool)>,
}

impl PhysicsExports {
    /// Read `physicsForces` and `physicsCollisions` from an entity config.
    /// Entries start enabled unless they set `"enabled": false`.
    pub fn from_config(config: &Json) -> Result<Self> {
        let mut exports = Self::default();
        if let Some(forces) = config.get("physicsForces").and_then(Json::as_object) {
            for (name, json) in forces {
                let enabled = json.get("enabled").and_then(Json::as_bool).unwrap_or(true);
                exports
                    .forces
                    .insert(name.clone(), (parse_force_region(name, json)?, enabled));
            }
        }
        if let Some(collisions) = config.get("physicsCollisions").and_then(Json::as_object) {
            for (name, json) in collisions {
                let enabled = json.get("enabled").and_then(Json::as_bool).unwrap_or(true);
                exports
                    .collisions
                    .insert(name.clone(), (MovingCollisionTemplate::from_json(name, json)?, enabled));
            }
        }
        Ok(exports)
    }

    pub fn set_force_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.forces.get_mut(name) {
            Some(entry) => {
                entry.1 = enabled;
                true
            }
            None => false,
        }
    }

    pub fn set_collision_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.collisions.get_mut(name) {
            Some(entry) => {
                entry.1 = enabled;
                true
            }
            None => false,
        }
    }

    /// Enabled flags in name order, forces then collisions, for
    /// replication
    pub fn enabled_flags(&self) -> Vec<bool> {
        self.forces
            .values()
            .map(|(_, e)| *e)
            .chain(self.collisions.values().map(|(_, e)| *e))
            .collect()
    }

    pub fn apply_enabled_flags(&mut self, flags: &[bool]) {
        let mut flags = flags.iter().copied();
        for entry in self.forces.values_mut() {
            if let Some(flag) = flags.next() {
                entry.1 = flag;
            }
        }
        for entry in self.collisions.values_mut() {
            if let Some(flag) = flags.next() {
                entry.1 = flag;
            }
        }
    }

    pub fn force_regions(&self, origin: Vec2F) -> Vec<PhysicsForceRegion> {
        self.forces
            .values()
            .filter(|(_, enabled)| *enabled)
            .map(|(region, _)| region.translated(origin))
            .collect()
    }

    pub fn moving_collisions(&self, owner: EntityId, origin: Vec2F, velocity: Vec2F) -> Vec<MovingCollision> {
        self.collisions
            .values()
            .enumerate()
            .filter(|(_, (_, enabled))| *enabled)
            .map(|(index, (template, _))| template.place(owner, index, origin, velocity))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_force_regions() {
        let region = parse_force_region(
            "lift",
            &json!({
                "type": "DirectionalForceRegion",
                "rectRegion": [0, 0, 2, 4],
                "yTargetVelocity": 10,
                "controlForce": 200,
                "categoryWhitelist": ["player"]
            }),
        )
        .unwrap();
        match region {
            PhysicsForceRegion::Directional {
                y_target_velocity,
                x_target_velocity,
                categories,
                ..
            } => {
                assert_eq!(y_target_velocity, Some(10.0));
                assert_eq!(x_target_velocity, None);
                assert!(matches!(categories, PhysicsCategoryFilter::Whitelist(_)));
            }
            other => panic!("unexpected region {:?}", other),
        }

        let radial = parse_force_region(
            "vortex",
            &json!({"type": "RadialForceRegion", "outerRadius": 5, "targetRadialVelocity": -3, "controlForce": 50}),
        )
        .unwrap();
        assert!(matches!(radial, PhysicsForceRegion::Radial { outer_radius, .. } if outer_radius == 5.0));

        assert!(parse_force_region("bad", &json!({"type": "DirectionalForceRegion", "controlForce": 1})).is_err());
        assert!(parse_force_region("bad", &json!({"type": "Tornado"})).is_err());
    }

    #[test]
    fn test_exports_toggle_and_place() {
        let config = json!({
            "physicsForces": {
                "push": {"type": "RadialForceRegion", "outerRadius": 2, "targetRadialVelocity": 5, "controlForce": 10}
            },
            "physicsCollisions": {
                "deck": {"collision": [[-2, 0], [2, 0], [2, 0.5], [-2, 0.5]], "collisionKind": "platform"},
                "hull": {"collision": [[-2, -1], [2, -1], [2, 0], [-2, 0]], "enabled": false}
            }
        });
        let mut exports = PhysicsExports::from_config(&config).unwrap();
        let origin = Vec2F::new(10.0, 5.0);

        let collisions = exports.moving_collisions(7, origin, Vec2F::new(1.0, 0.0));
        assert_eq!(collisions.len(), 1);
        assert_eq!(collisions[0].kind, CollisionKind::Platform);
        assert_eq!(collisions[0].position, origin);
        assert_eq!(collisions[0].source, MovingCollisionId { entity: 7, index: 0 });

        assert!(exports.set_collision_enabled("hull", true));
        assert!(!exports.set_collision_enabled("sail", true));
        assert_eq!(exports.moving_collisions(7, origin, Vec2F::ZERO).len(), 2);

        assert_eq!(exports.enabled_flags(), vec![true, true, true]);
        exports.set_force_enabled("push", false);
        assert!(exports.force_regions(origin).is_empty());

        let mut copy = PhysicsExports::from_config(&config).unwrap();
        copy.apply_enabled_flags(&exports.enabled_flags());
        assert_eq!(copy.enabled_flags(), exports.enabled_flags());
    }
}
