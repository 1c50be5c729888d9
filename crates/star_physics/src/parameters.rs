//! Movement parameter records
//!
//! Every field is optional so configs can be layered: built-in defaults,
//! then the entity type's config, then instance tweaks, then per-tick
//! control parameters. [`MovementParameters::merge`] overrides only the
//! fields the right-hand side sets.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use star_core::Json;
use star_math::{PolyF, RectF, Vec2F};

use crate::error::Result;

/// Copy every `Some` field of `$other` over `$self`
macro_rules! merge_fields {
    ($self:ident, $other:ident, { $($field:ident),+ $(,)? }) => {
        $(
            if $other.$field.is_some() {
                $self.$field = $other.$field.clone();
            }
        )+
    };
}

/// Parameters of the base rigid-body integrator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MovementParameters {
    pub mass: Option<f32>,
    pub gravity_multiplier: Option<f32>,
    pub liquid_buoyancy: Option<f32>,
    pub air_buoyancy: Option<f32>,
    /// Fraction of normal velocity kept on impact, 0 for no bounce
    pub bounce_factor: Option<f32>,
    pub stop_on_first_bounce: Option<bool>,
    /// Convert shallow sideways corrections into upward ones so bodies walk
    /// up ramps
    pub enable_surface_slope_correction: Option<bool>,
    pub slope_sliding_factor: Option<f32>,
    pub max_movement_per_step: Option<f32>,
    pub maximum_correction: Option<f32>,
    pub speed_limit: Option<f32>,
    pub discontinuity_threshold: Option<f32>,
    pub collision_poly: Option<PolyF>,
    pub sticky_collision: Option<bool>,
    pub sticky_force: Option<f32>,
    pub air_friction: Option<f32>,
    pub liquid_friction: Option<f32>,
    pub ground_friction: Option<f32>,
    pub collision_enabled: Option<bool>,
    pub friction_enabled: Option<bool>,
    pub gravity_enabled: Option<bool>,
    pub ignore_platform_collision: Option<bool>,
    pub maximum_platform_correction: Option<f32>,
    pub maximum_platform_correction_velocity_factor: Option<f32>,
    pub physics_effect_categories: Option<BTreeSet<String>>,
    pub rest_duration: Option<f32>,
}

impl MovementParameters {
    /// Values used for any field no config sets
    pub fn sensible_defaults() -> Self {
        Self {
            mass: Some(1.0),
            gravity_multiplier: Some(1.0),
            liquid_buoyancy: Some(0.0),
            air_buoyancy: Some(0.0),
            bounce_factor: Some(0.0),
            stop_on_first_bounce: Some(false),
            enable_surface_slope_correction: Some(false),
            slope_sliding_factor: Some(0.0),
            max_movement_per_step: Some(0.4),
            maximum_correction: Some(3.0),
            speed_limit: Some(100.0),
            discontinuity_threshold: Some(0.5),
            collision_poly: Some(PolyF::from_rect(&RectF::with_center(
                Vec2F::ZERO,
                Vec2F::ONE,
            ))),
            sticky_collision: Some(false),
            sticky_force: Some(0.0),
            air_friction: Some(0.0),
            liquid_friction: Some(0.0),
            ground_friction: Some(0.0),
            collision_enabled: Some(true),
            friction_enabled: Some(true),
            gravity_enabled: Some(true),
            ignore_platform_collision: Some(false),
            maximum_platform_correction: Some(f32::MAX),
            maximum_platform_correction_velocity_factor: Some(0.0),
            physics_effect_categories: Some(BTreeSet::new()),
            rest_duration: Some(0.0),
        }
    }

    pub fn from_json(json: &Json) -> Result<Self> {
        Ok(serde_json::from_value(json.clone())?)
    }

    pub fn to_json(&self) -> Json {
        serde_json::to_value(self).unwrap_or(Json::Null)
    }

    /// `self` with every field set in `rhs` replaced
    pub fn merge(&self, rhs: &Self) -> Self {
        let mut out = self.clone();
        merge_fields!(out, rhs, {
            mass,
            gravity_multiplier,
            liquid_buoyancy,
            air_buoyancy,
            bounce_factor,
            stop_on_first_bounce,
            enable_surface_slope_correction,
            slope_sliding_factor,
            max_movement_per_step,
            maximum_correction,
            speed_limit,
            discontinuity_threshold,
            collision_poly,
            sticky_collision,
            sticky_force,
            air_friction,
            liquid_friction,
            ground_friction,
            collision_enabled,
            friction_enabled,
            gravity_enabled,
            ignore_platform_collision,
            maximum_platform_correction,
            maximum_platform_correction_velocity_factor,
            physics_effect_categories,
            rest_duration,
        });
        out
    }
}

/// Jump behavior in one medium (air or liquid)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JumpProfile {
    pub jump_speed: Option<f32>,
    /// Force holding the jump applies toward `jump_speed`
    pub jump_control_force: Option<f32>,
    /// Fraction of `jump_speed` given instantly on takeoff
    pub jump_initial_percentage: Option<f32>,
    /// Seconds `controlJump` keeps pushing after takeoff
    pub jump_hold_time: Option<f32>,
    pub multi_jump: Option<bool>,
    /// Seconds after landing before another jump may start
    pub re_jump_delay: Option<f32>,
    /// Jump again while the control stays held
    pub auto_jump: Option<bool>,
    /// Hitting a ceiling ends the hold
    pub collision_cancelled: Option<bool>,
}

impl JumpProfile {
    pub fn merge(&self, rhs: &Self) -> Self {
        let mut out = self.clone();
        merge_fields!(out, rhs, {
            jump_speed,
            jump_control_force,
            jump_initial_percentage,
            jump_hold_time,
            multi_jump,
            re_jump_delay,
            auto_jump,
            collision_cancelled,
        });
        out
    }
}

/// Parameters for walking, jumping, flying actors
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActorMovementParameters {
    pub mass: Option<f32>,
    pub gravity_multiplier: Option<f32>,
    pub liquid_buoyancy: Option<f32>,
    pub air_buoyancy: Option<f32>,
    pub bounce_factor: Option<f32>,
    pub slope_sliding_factor: Option<f32>,
    pub stop_on_first_bounce: Option<bool>,
    pub enable_surface_slope_correction: Option<bool>,
    pub max_movement_per_step: Option<f32>,
    pub maximum_correction: Option<f32>,
    pub speed_limit: Option<f32>,

    pub standing_poly: Option<PolyF>,
    pub crouching_poly: Option<PolyF>,
    pub sticky_collision: Option<bool>,
    pub sticky_force: Option<f32>,

    pub walk_speed: Option<f32>,
    pub run_speed: Option<f32>,
    pub fly_speed: Option<f32>,
    pub air_friction: Option<f32>,
    pub liquid_friction: Option<f32>,
    /// Liquid coverage above which liquid movement takes over
    pub minimum_liquid_percentage: Option<f32>,
    /// Fraction of speed lost when fully submerged
    pub liquid_impedance: Option<f32>,
    /// Ground friction while not trying to move
    pub normal_ground_friction: Option<f32>,
    /// Ground friction while walking or running
    pub ambulating_ground_friction: Option<f32>,
    pub ground_force: Option<f32>,
    pub air_force: Option<f32>,
    pub liquid_force: Option<f32>,
    pub air_jump_profile: Option<JumpProfile>,
    pub liquid_jump_profile: Option<JumpProfile>,

    pub fall_status_speed_min: Option<f32>,
    /// Ticks platforms stay ignored after `controlDown` is released
    pub fall_through_sustain_frames: Option<u32>,
    pub maximum_platform_correction: Option<f32>,
    pub maximum_platform_correction_velocity_factor: Option<f32>,

    pub physics_effect_categories: Option<BTreeSet<String>>,

    /// Seconds ground movement stays on after leaving the ground
    pub ground_movement_minimum_sustain: Option<f32>,
    /// Upper bound on that, kept only while ground is within
    /// `ground_movement_check_distance` below
    pub ground_movement_maximum_sustain: Option<f32>,
    pub ground_movement_check_distance: Option<f32>,

    pub collision_enabled: Option<bool>,
    pub friction_enabled: Option<bool>,
    pub gravity_enabled: Option<bool>,

    /// Nodes per second the path controller may explore
    pub path_explore_rate: Option<f32>,
}

impl ActorMovementParameters {
    pub fn sensible_defaults() -> Self {
        let jump = JumpProfile {
            jump_speed: Some(0.0),
            jump_control_force: Some(0.0),
            jump_initial_percentage: Some(0.0),
            jump_hold_time: Some(0.0),
            multi_jump: Some(false),
            re_jump_delay: Some(0.0),
            auto_jump: Some(false),
            collision_cancelled: Some(false),
        };
        let body = PolyF::from_rect(&RectF::with_center(Vec2F::ZERO, Vec2F::ONE));
        Self {
            mass: Some(1.0),
            gravity_multiplier: Some(1.0),
            liquid_buoyancy: Some(0.0),
            air_buoyancy: Some(0.0),
            bounce_factor: Some(0.0),
            slope_sliding_factor: Some(0.0),
            stop_on_first_bounce: Some(false),
            enable_surface_slope_correction: Some(true),
            max_movement_per_step: Some(0.4),
            maximum_correction: Some(3.0),
            speed_limit: Some(100.0),
            standing_poly: Some(body.clone()),
            crouching_poly: Some(body),
            sticky_collision: Some(false),
            sticky_force: Some(0.0),
            walk_speed: Some(0.0),
            run_speed: Some(0.0),
            fly_speed: Some(0.0),
            air_friction: Some(0.0),
            liquid_friction: Some(0.0),
            minimum_liquid_percentage: Some(0.5),
            liquid_impedance: Some(0.0),
            normal_ground_friction: Some(0.0),
            ambulating_ground_friction: Some(0.0),
            ground_force: Some(0.0),
            air_force: Some(0.0),
            liquid_force: Some(0.0),
            air_jump_profile: Some(jump.clone()),
            liquid_jump_profile: Some(jump),
            fall_status_speed_min: Some(0.0),
            fall_through_sustain_frames: Some(0),
            maximum_platform_correction: Some(f32::MAX),
            maximum_platform_correction_velocity_factor: Some(0.0),
            physics_effect_categories: Some(BTreeSet::new()),
            ground_movement_minimum_sustain: Some(0.0),
            ground_movement_maximum_sustain: Some(0.0),
            ground_movement_check_distance: Some(0.0),
            collision_enabled: Some(true),
            friction_enabled: Some(true),
            gravity_enabled: Some(true),
            path_explore_rate: Some(100.0),
        }
    }

    pub fn from_json(json: &Json) -> Result<Self> {
        Ok(serde_json::from_value(json.clone())?)
    }

    pub fn to_json(&self) -> Json {
        serde_json::to_value(self).unwrap_or(Json::Null)
    }

    pub fn merge(&self, rhs: &Self) -> Self {
        let mut out = self.clone();
        merge_fields!(out, rhs, {
            mass,
            gravity_multiplier,
            liquid_buoyancy,
            air_buoyancy,
            bounce_factor,
            slope_sliding_factor,
            stop_on_first_bounce,
            enable_surface_slope_correction,
            max_movement_per_step,
            maximum_correction,
            speed_limit,
            standing_poly,
            crouching_poly,
            sticky_collision,
            sticky_force,
            walk_speed,
            run_speed,
            fly_speed,
            air_friction,
            liquid_friction,
            minimum_liquid_percentage,
            liquid_impedance,
            normal_ground_friction,
            ambulating_ground_friction,
            ground_force,
            air_force,
            liquid_force,
            fall_status_speed_min,
            fall_through_sustain_frames,
            maximum_platform_correction,
            maximum_platform_correction_velocity_factor,
            physics_effect_categories,
            ground_movement_minimum_sustain,
            ground_movement_maximum_sustain,
            ground_movement_check_distance,
            collision_enabled,
            friction_enabled,
            gravity_enabled,
            path_explore_rate,
        });
        // Jump profiles merge field by field rather than wholesale
        out.air_jump_profile = merge_profile(&self.air_jump_profile, &rhs.air_jump_profile);
        out.liquid_jump_profile = merge_profile(&self.liquid_jump_profile, &rhs.liquid_jump_profile);
        out
    }

    pub fn air_jump(&self) -> JumpProfile {
        self.air_jump_profile.clone().unwrap_or_default()
    }

    pub fn liquid_jump(&self) -> JumpProfile {
        self.liquid_jump_profile.clone().unwrap_or_default()
    }
}

fn merge_profile(base: &Option<JumpProfile>, rhs: &Option<JumpProfile>) -> Option<JumpProfile> {
    match (base, rhs) {
        (Some(b), Some(r)) => Some(b.merge(r)),
        (None, Some(r)) => Some(r.clone()),
        (b, None) => b.clone(),
    }
}

/// Additive percentage modifiers from transient sources (status effects,
/// tech, scripts). `0.0` means unmodified, `0.25` means +25%.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActorMovementModifiers {
    pub ground_movement_modifier: f32,
    pub liquid_movement_modifier: f32,
    pub speed_modifier: f32,
    pub air_jump_modifier: f32,
    pub liquid_jump_modifier: f32,
    pub running_suppressed: bool,
    pub jumping_suppressed: bool,
    pub facing_suppressed: bool,
    pub movement_suppressed: bool,
}

impl ActorMovementModifiers {
    /// Sum percentages and union suppression flags
    pub fn combine(&self, rhs: &Self) -> Self {
        Self {
            ground_movement_modifier: self.ground_movement_modifier + rhs.ground_movement_modifier,
            liquid_movement_modifier: self.liquid_movement_modifier + rhs.liquid_movement_modifier,
            speed_modifier: self.speed_modifier + rhs.speed_modifier,
            air_jump_modifier: self.air_jump_modifier + rhs.air_jump_modifier,
            liquid_jump_modifier: self.liquid_jump_modifier + rhs.liquid_jump_modifier,
            running_suppressed: self.running_suppressed || rhs.running_suppressed,
            jumping_suppressed: self.jumping_suppressed || rhs.jumping_suppressed,
            facing_suppressed: self.facing_suppressed || rhs.facing_suppressed,
            movement_suppressed: self.movement_suppressed || rhs.movement_suppressed,
        }
    }

    /// Multiplier form of a percentage, never negative
    #[inline]
    pub fn factor(percentage: f32) -> f32 {
        (1.0 + percentage).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_overrides_only_set_fields() {
        let base = MovementParameters::sensible_defaults();
        let tweak = MovementParameters {
            mass: Some(4.0),
            ..Default::default()
        };
        let merged = base.merge(&tweak);
        assert_eq!(merged.mass, Some(4.0));
        assert_eq!(merged.gravity_multiplier, Some(1.0));
        assert_eq!(merged.max_movement_per_step, Some(0.4));
    }

    #[test]
    fn test_parameters_from_json() {
        let params = MovementParameters::from_json(&json!({
            "gravityMultiplier": 0.5,
            "collisionPoly": [[-1, -1], [1, -1], [1, 1], [-1, 1]],
            "physicsEffectCategories": ["monster"]
        }))
        .unwrap();
        assert_eq!(params.gravity_multiplier, Some(0.5));
        assert_eq!(params.collision_poly.as_ref().map(|p| p.len()), Some(4));
        assert!(params.mass.is_none());
        assert!(MovementParameters::from_json(&json!({"mass": "heavy"})).is_err());
    }

    #[test]
    fn test_jump_profiles_merge_by_field() {
        let base = ActorMovementParameters::sensible_defaults();
        let species = ActorMovementParameters::from_json(&json!({
            "airJumpProfile": {"jumpSpeed": 23.5}
        }))
        .unwrap();
        let merged = base.merge(&species);
        let jump = merged.air_jump();
        assert_eq!(jump.jump_speed, Some(23.5));
        assert_eq!(jump.multi_jump, Some(false));
    }

    #[test]
    fn test_modifiers_sum() {
        let a = ActorMovementModifiers {
            speed_modifier: 0.25,
            ..Default::default()
        };
        let b = ActorMovementModifiers {
            speed_modifier: -0.5,
            jumping_suppressed: true,
            ..Default::default()
        };
        let both = a.combine(&b);
        assert_eq!(both.speed_modifier, -0.25);
        assert!(both.jumping_suppressed);
        assert_eq!(ActorMovementModifiers::factor(both.speed_modifier), 0.75);
        assert_eq!(ActorMovementModifiers::factor(-3.0), 0.0);
    }
}
