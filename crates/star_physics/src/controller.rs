//! Rigid-body movement against the tile collision grid
//!
//! [`MovementController`] integrates a convex body with semi-implicit Euler,
//! splits each tick into steps of at most `maxMovementPerStep` tiles and
//! resolves every step against nearby tile blocks and moving collisions with
//! separating-axis corrections, nearest poly first.

use std::collections::{BTreeSet, HashSet};

use star_core::{DataReader, DataWriter};
use star_math::{PolyF, RectF, SatResult, Vec2F, Vec2I};
use star_net::{
    NetCompatibilityRules, NetElement, NetElementBool, NetElementData, NetElementFloat,
    NetElementVersion, NetResult,
};

use crate::collision::{CollisionBlock, CollisionKind, CollisionWorld};
use crate::forces::{ForceApproach, MovingCollision, MovingCollisionId};
use crate::parameters::MovementParameters;

/// Platforms only catch bodies whose bottom started within this distance
/// above (or below) their top
const PLATFORM_TOLERANCE: f32 = 0.05;
/// How far a sticky body probes toward its surface to stay attached
const STICK_PROBE: f32 = 0.05;
/// Sub-step cap per tick so huge velocities cannot stall the world thread
const MAX_STEPS: usize = 64;

/// Fully resolved parameters, every field present
#[derive(Debug, Clone)]
struct Resolved {
    mass: f32,
    gravity_multiplier: f32,
    liquid_buoyancy: f32,
    air_buoyancy: f32,
    bounce_factor: f32,
    stop_on_first_bounce: bool,
    enable_surface_slope_correction: bool,
    slope_sliding_factor: f32,
    max_movement_per_step: f32,
    maximum_correction: f32,
    speed_limit: f32,
    collision_poly: PolyF,
    sticky_collision: bool,
    sticky_force: f32,
    air_friction: f32,
    liquid_friction: f32,
    ground_friction: f32,
    collision_enabled: bool,
    friction_enabled: bool,
    gravity_enabled: bool,
    ignore_platform_collision: bool,
    maximum_platform_correction: f32,
    maximum_platform_correction_velocity_factor: f32,
    physics_effect_categories: BTreeSet<String>,
}

impl Resolved {
    fn from(p: &MovementParameters) -> Self {
        let d = MovementParameters::sensible_defaults().merge(p);
        Self {
            mass: d.mass.unwrap_or(1.0).max(f32::EPSILON),
            gravity_multiplier: d.gravity_multiplier.unwrap_or(1.0),
            liquid_buoyancy: d.liquid_buoyancy.unwrap_or(0.0),
            air_buoyancy: d.air_buoyancy.unwrap_or(0.0),
            bounce_factor: d.bounce_factor.unwrap_or(0.0),
            stop_on_first_bounce: d.stop_on_first_bounce.unwrap_or(false),
            enable_surface_slope_correction: d.enable_surface_slope_correction.unwrap_or(false),
            slope_sliding_factor: d.slope_sliding_factor.unwrap_or(0.0),
            max_movement_per_step: d.max_movement_per_step.unwrap_or(0.4).max(0.01),
            maximum_correction: d.maximum_correction.unwrap_or(3.0),
            speed_limit: d.speed_limit.unwrap_or(100.0),
            collision_poly: d.collision_poly.unwrap_or_default(),
            sticky_collision: d.sticky_collision.unwrap_or(false),
            sticky_force: d.sticky_force.unwrap_or(0.0),
            air_friction: d.air_friction.unwrap_or(0.0),
            liquid_friction: d.liquid_friction.unwrap_or(0.0),
            ground_friction: d.ground_friction.unwrap_or(0.0),
            collision_enabled: d.collision_enabled.unwrap_or(true),
            friction_enabled: d.friction_enabled.unwrap_or(true),
            gravity_enabled: d.gravity_enabled.unwrap_or(true),
            ignore_platform_collision: d.ignore_platform_collision.unwrap_or(false),
            maximum_platform_correction: d.maximum_platform_correction.unwrap_or(f32::MAX),
            maximum_platform_correction_velocity_factor: d
                .maximum_platform_correction_velocity_factor
                .unwrap_or(0.0),
            physics_effect_categories: d.physics_effect_categories.unwrap_or_default(),
        }
    }
}

/// Outcome of moving the body once against collision geometry
#[derive(Debug, Clone, Default)]
pub struct CollisionResult {
    /// Movement actually applied, including corrections
    pub movement: Vec2F,
    pub correction: Vec2F,
    pub collided: bool,
    pub on_ground: bool,
    pub hit_ceiling: bool,
    /// Normal of the supporting surface when `on_ground`
    pub ground_normal: Vec2F,
    pub ground_kind: Option<CollisionKind>,
    pub surface_moving_collision: Option<MovingCollisionId>,
    pub surface_velocity: Vec2F,
    pub null_collision: bool,
    /// Corrections exceeded `maximumCorrection`; the step was discarded
    pub is_stuck: bool,
}

#[derive(Debug, Clone, Copy)]
enum Approach {
    Velocity { target: Vec2F, force: f32 },
    Along { direction: Vec2F, target: f32, force: f32, positive_only: bool },
}

/// Replicated movement state
#[derive(Debug, Clone)]
pub struct MovementNetState {
    x_position: NetElementFloat,
    y_position: NetElementFloat,
    x_velocity: NetElementFloat,
    y_velocity: NetElementFloat,
    rotation: NetElementFloat,
    on_ground: NetElementBool,
    zero_g: NetElementBool,
    colliding: NetElementBool,
    collision_stuck: NetElementBool,
    surface_moving_collision: NetElementData<Option<(i32, u32)>>,
    liquid_percentage: NetElementFloat,
}
star_net::net_element_group!(MovementNetState {
    x_position,
    y_position,
    x_velocity,
    y_velocity,
    rotation,
    on_ground,
    zero_g,
    colliding,
    collision_stuck,
    surface_moving_collision,
    liquid_percentage,
});

impl Default for MovementNetState {
    fn default() -> Self {
        Self {
            x_position: NetElementFloat::new(0.0).with_fixed_point(0.0125),
            y_position: NetElementFloat::new(0.0).with_fixed_point(0.0125),
            x_velocity: NetElementFloat::new(0.0).with_fixed_point(0.00625),
            y_velocity: NetElementFloat::new(0.0).with_fixed_point(0.00625),
            rotation: NetElementFloat::new(0.0).with_fixed_point(0.01),
            on_ground: NetElementBool::new(false),
            zero_g: NetElementBool::new(false),
            colliding: NetElementBool::new(false),
            collision_stuck: NetElementBool::new(false),
            surface_moving_collision: NetElementData::new(None),
            liquid_percentage: NetElementFloat::new(0.0).with_fixed_point(0.01),
        }
    }
}

/// Integrates one body against the collision world
#[derive(Debug, Clone)]
pub struct MovementController {
    parameters: MovementParameters,
    resolved: Resolved,

    position: Vec2F,
    velocity: Vec2F,
    rotation: f32,

    on_ground: bool,
    zero_g: bool,
    colliding: bool,
    null_colliding: bool,
    collision_stuck: bool,
    hit_ceiling: bool,
    liquid_percentage: f32,
    ground_normal: Vec2F,
    ground_kind: Option<CollisionKind>,
    surface_moving_collision: Option<MovingCollisionId>,
    surface_velocity: Vec2F,
    sticking_direction: Option<Vec2F>,
    resting_time: f32,

    applied_force: Vec2F,
    approaches: Vec<Approach>,
    ignore_platforms_once: bool,

    net: MovementNetState,
}

impl Default for MovementController {
    fn default() -> Self {
        Self::new(MovementParameters::default())
    }
}

impl MovementController {
    pub fn new(parameters: MovementParameters) -> Self {
        let resolved = Resolved::from(&parameters);
        Self {
            parameters,
            resolved,
            position: Vec2F::ZERO,
            velocity: Vec2F::ZERO,
            rotation: 0.0,
            on_ground: false,
            zero_g: false,
            colliding: false,
            null_colliding: false,
            collision_stuck: false,
            hit_ceiling: false,
            liquid_percentage: 0.0,
            ground_normal: Vec2F::Y,
            ground_kind: None,
            surface_moving_collision: None,
            surface_velocity: Vec2F::ZERO,
            sticking_direction: None,
            resting_time: 0.0,
            applied_force: Vec2F::ZERO,
            approaches: Vec::new(),
            ignore_platforms_once: false,
            net: MovementNetState::default(),
        }
    }

    pub fn parameters(&self) -> &MovementParameters {
        &self.parameters
    }

    /// Replace the parameters (unset fields fall back to defaults)
    pub fn reset_parameters(&mut self, parameters: MovementParameters) {
        self.parameters = parameters;
        self.resolved = Resolved::from(&self.parameters);
    }

    /// Merge `parameters` over the current ones
    pub fn update_parameters(&mut self, parameters: &MovementParameters) {
        self.parameters = self.parameters.merge(parameters);
        self.resolved = Resolved::from(&self.parameters);
    }

    #[inline]
    pub fn position(&self) -> Vec2F {
        self.position
    }

    pub fn set_position(&mut self, position: Vec2F) {
        self.position = position;
        self.sync_net();
    }

    pub fn translate(&mut self, offset: Vec2F) {
        self.set_position(self.position + offset);
    }

    #[inline]
    pub fn velocity(&self) -> Vec2F {
        self.velocity
    }

    pub fn set_velocity(&mut self, velocity: Vec2F) {
        self.velocity = velocity;
        self.sync_net();
    }

    pub fn set_x_velocity(&mut self, x: f32) {
        self.set_velocity(Vec2F::new(x, self.velocity.y));
    }

    pub fn set_y_velocity(&mut self, y: f32) {
        self.set_velocity(Vec2F::new(self.velocity.x, y));
    }

    #[inline]
    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    pub fn set_rotation(&mut self, angle: f32) {
        self.rotation = angle;
        self.sync_net();
    }

    #[inline]
    pub fn mass(&self) -> f32 {
        self.resolved.mass
    }

    /// Collision poly relative to the position, with rotation applied
    pub fn collision_poly(&self) -> PolyF {
        if self.rotation == 0.0 {
            self.resolved.collision_poly.clone()
        } else {
            self.resolved.collision_poly.rotated(self.rotation)
        }
    }

    /// Collision poly in world space
    pub fn collision_body(&self) -> PolyF {
        self.collision_poly().translated(self.position)
    }

    pub fn collision_bound_box(&self) -> RectF {
        self.collision_body().bound_box()
    }

    /// Lowest point of the body in world space
    pub fn feet_y(&self) -> f32 {
        self.collision_bound_box().min.y
    }

    #[inline]
    pub fn on_ground(&self) -> bool {
        self.on_ground
    }

    #[inline]
    pub fn zero_g(&self) -> bool {
        self.zero_g
    }

    #[inline]
    pub fn is_colliding(&self) -> bool {
        self.colliding
    }

    #[inline]
    pub fn is_null_colliding(&self) -> bool {
        self.null_colliding
    }

    #[inline]
    pub fn collision_stuck(&self) -> bool {
        self.collision_stuck
    }

    /// Whether a step this tick was pushed down by a ceiling
    #[inline]
    pub fn hit_ceiling(&self) -> bool {
        self.hit_ceiling
    }

    #[inline]
    pub fn liquid_percentage(&self) -> f32 {
        self.liquid_percentage
    }

    /// Unit normal of the ground surface, `Vec2F::Y` on flat ground
    #[inline]
    pub fn surface_normal(&self) -> Vec2F {
        self.ground_normal
    }

    pub fn ground_kind(&self) -> Option<CollisionKind> {
        self.ground_kind
    }

    pub fn surface_moving_collision(&self) -> Option<MovingCollisionId> {
        self.surface_moving_collision
    }

    /// Velocity of the supporting surface, zero on tiles
    pub fn surface_velocity(&self) -> Vec2F {
        self.surface_velocity
    }

    /// Inward normal of the surface a sticky body clings to
    pub fn sticking_direction(&self) -> Option<Vec2F> {
        self.sticking_direction
    }

    /// Seconds the body has spent without moving
    pub fn resting_time(&self) -> f32 {
        self.resting_time
    }

    pub fn at_rest(&self) -> bool {
        self.resting_time > 0.0 && self.resting_time >= self.rest_duration()
    }

    fn rest_duration(&self) -> f32 {
        self.parameters.rest_duration.unwrap_or(0.0)
    }

    pub fn physics_effect_categories(&self) -> &BTreeSet<String> {
        &self.resolved.physics_effect_categories
    }

    pub fn add_momentum(&mut self, momentum: Vec2F) {
        self.set_velocity(self.velocity + momentum / self.resolved.mass);
    }

    /// Force applied over the next tick
    pub fn add_force(&mut self, force: Vec2F) {
        self.applied_force += force;
    }

    /// Approach `target` during the next tick, changing velocity by at most
    /// `max_force / mass * dt`
    pub fn approach_velocity(&mut self, target: Vec2F, max_force: f32) {
        self.approaches.push(Approach::Velocity {
            target,
            force: max_force,
        });
    }

    /// Approach `target` speed along `angle`, leaving the perpendicular
    /// component alone
    pub fn approach_velocity_along_angle(
        &mut self,
        angle: f32,
        target: f32,
        max_force: f32,
        positive_only: bool,
    ) {
        self.approaches.push(Approach::Along {
            direction: Vec2F::with_angle(angle, 1.0),
            target,
            force: max_force,
            positive_only,
        });
    }

    pub fn approach_x_velocity(&mut self, target: f32, max_force: f32) {
        self.approaches.push(Approach::Along {
            direction: Vec2F::X,
            target,
            force: max_force,
            positive_only: false,
        });
    }

    pub fn approach_y_velocity(&mut self, target: f32, max_force: f32) {
        self.approaches.push(Approach::Along {
            direction: Vec2F::Y,
            target,
            force: max_force,
            positive_only: false,
        });
    }

    /// Ignore platforms during the next tick only
    pub fn ignore_platforms_next_tick(&mut self) {
        self.ignore_platforms_once = true;
    }

    fn apply_approach(&mut self, approach: Approach, dt: f32) {
        match approach {
            Approach::Velocity { target, force } => {
                let max_delta = force / self.resolved.mass * dt;
                let diff = target - self.velocity;
                self.velocity += diff.clamp_length(max_delta.max(0.0));
            }
            Approach::Along {
                direction,
                target,
                force,
                positive_only,
            } => {
                let max_delta = (force / self.resolved.mass * dt).max(0.0);
                let diff = target - self.velocity.dot(direction);
                if positive_only && diff * star_math::sign_of(target) <= 0.0 {
                    return;
                }
                self.velocity += direction * diff.clamp(-max_delta, max_delta);
            }
        }
    }

    fn apply_force_approach(&mut self, approach: ForceApproach, dt: f32) {
        if let Some(x) = approach.x {
            self.apply_approach(
                Approach::Along {
                    direction: Vec2F::X,
                    target: x,
                    force: approach.force,
                    positive_only: false,
                },
                dt,
            );
        }
        if let Some(y) = approach.y {
            self.apply_approach(
                Approach::Along {
                    direction: Vec2F::Y,
                    target: y,
                    force: approach.force,
                    positive_only: false,
                },
                dt,
            );
        }
        if let Some((direction, target)) = approach.along {
            self.apply_approach(
                Approach::Along {
                    direction,
                    target,
                    force: approach.force,
                    positive_only: true,
                },
                dt,
            );
        }
    }

    /// Advance one tick on the master.
    ///
    /// A zero or negative `dt` is a no-op, so repeated zero steps leave
    /// position and velocity untouched.
    pub fn tick_master(&mut self, dt: f32, world: &dyn CollisionWorld) {
        let approaches = std::mem::take(&mut self.approaches);
        let applied_force = std::mem::take(&mut self.applied_force);
        let ignore_platforms_once = std::mem::take(&mut self.ignore_platforms_once);
        if dt <= 0.0 {
            return;
        }

        let p = self.resolved.clone();
        let start_position = self.position;
        let body_box = self.collision_bound_box();

        self.liquid_percentage = world.liquid_percentage(&body_box);
        let gravity = world.gravity(self.position) * p.gravity_multiplier;
        self.zero_g = !p.gravity_enabled || gravity == 0.0;

        if let Some(direction) = self.sticking_direction {
            if !self.touching(world, direction * STICK_PROBE) {
                self.sticking_direction = None;
            }
        }

        let mut regions = Vec::new();
        world.force_regions(&body_box.padded(1.0), &mut regions);
        let body = self.collision_body();
        for region in &regions {
            if !region.categories().check(&p.physics_effect_categories) {
                continue;
            }
            if let Some(approach) = region.approach_for(&body) {
                self.apply_force_approach(approach, dt);
            }
        }

        match self.sticking_direction {
            Some(direction) => {
                self.velocity += direction * (p.sticky_force / p.mass * dt);
            }
            None if !self.zero_g => {
                let buoyancy = star_math::lerp(p.air_buoyancy, p.liquid_buoyancy, self.liquid_percentage);
                self.velocity.y -= gravity * (1.0 - buoyancy) * dt;
            }
            None => {}
        }

        self.velocity += applied_force / p.mass * dt;
        for approach in approaches {
            self.apply_approach(approach, dt);
        }

        if p.friction_enabled {
            let mut friction = star_math::lerp(p.air_friction, p.liquid_friction, self.liquid_percentage);
            let mut reference = Vec2F::ZERO;
            if self.on_ground {
                if self.ground_kind != Some(CollisionKind::Slippery) {
                    friction = friction.max(p.ground_friction);
                }
                reference = self.surface_velocity;
            }
            if friction > 0.0 {
                self.velocity = reference + (self.velocity - reference) * (-friction * dt).exp();
            }
        }

        if self.on_ground && p.slope_sliding_factor > 0.0 && !self.zero_g {
            let n = self.ground_normal;
            if n.x != 0.0 {
                // Downhill tangent
                let tangent = if n.x > 0.0 {
                    Vec2F::new(n.y, -n.x)
                } else {
                    Vec2F::new(-n.y, n.x)
                };
                self.velocity += tangent * (gravity * p.slope_sliding_factor * n.x.abs() * dt);
            }
        }

        self.velocity = self.velocity.clamp_length(p.speed_limit);

        let movement = self.velocity * dt;
        if !p.collision_enabled {
            self.position += movement;
            self.clear_contacts();
            self.finish_tick(dt, start_position);
            return;
        }

        let ignore_platforms = p.ignore_platform_collision || ignore_platforms_once;
        let steps = ((movement.length() / p.max_movement_per_step).ceil() as usize).clamp(1, MAX_STEPS);
        let step = movement / steps as f32;

        self.clear_contacts();
        let mut scratch = CollisionScratch::default();
        for _ in 0..steps {
            let result = self.collision_move(world, step, ignore_platforms, &mut scratch);
            if result.is_stuck {
                self.collision_stuck = true;
                break;
            }
            self.position += result.movement;
            self.null_colliding |= result.null_collision;
            self.hit_ceiling |= result.hit_ceiling;
            if !result.collided {
                continue;
            }

            self.colliding = true;
            let normal = result.correction.normalize();
            let into = self.velocity.dot(normal);
            if into < 0.0 {
                self.velocity -= normal * (into * (1.0 + p.bounce_factor));
            }
            if result.on_ground {
                self.on_ground = true;
                self.ground_normal = result.ground_normal;
                self.ground_kind = result.ground_kind;
                self.surface_moving_collision = result.surface_moving_collision;
                self.surface_velocity = result.surface_velocity;
            }
            if p.sticky_collision {
                self.sticking_direction = Some(-normal);
                self.velocity = Vec2F::ZERO;
                break;
            }
            if p.stop_on_first_bounce {
                break;
            }
        }

        self.finish_tick(dt, start_position);
    }

    /// Advance one tick on a slave: only interpolation moves
    pub fn tick_slave(&mut self, dt: f32) {
        self.net.tick_net_interpolation(dt);
        self.pull_net();
    }

    fn clear_contacts(&mut self) {
        self.on_ground = false;
        self.colliding = false;
        self.null_colliding = false;
        self.collision_stuck = false;
        self.hit_ceiling = false;
        self.ground_normal = Vec2F::Y;
        self.ground_kind = None;
        self.surface_moving_collision = None;
        self.surface_velocity = Vec2F::ZERO;
    }

    fn finish_tick(&mut self, dt: f32, start_position: Vec2F) {
        if (self.position - start_position).length_squared() < 1e-8 {
            self.resting_time += dt;
        } else {
            self.resting_time = 0.0;
        }
        self.sync_net();
    }

    /// Whether the body overlaps any solid geometry after moving by `offset`
    fn touching(&self, world: &dyn CollisionWorld, offset: Vec2F) -> bool {
        let body = self.collision_body().translated(offset);
        let mut blocks = Vec::new();
        world.collision_blocks(body.bound_box().padded(1.0).to_tiles(), &mut blocks);
        blocks
            .iter()
            .filter(|b| b.kind.is_solid())
            .any(|b| body.intersects(&b.poly))
    }

    /// Move the body by `movement` and push it out of overlapping geometry
    pub fn collision_move(
        &self,
        world: &dyn CollisionWorld,
        movement: Vec2F,
        ignore_platforms: bool,
        scratch: &mut CollisionScratch,
    ) -> CollisionResult {
        let p = &self.resolved;
        let start_body = self.collision_body();
        let mut body = start_body.translated(movement);
        let region = start_body.bound_box().combine(&body.bound_box()).padded(1.0);

        scratch.blocks.clear();
        scratch.moving.clear();
        world.collision_blocks(region.to_tiles(), &mut scratch.blocks);
        world.moving_collisions(&region, &mut scratch.moving);

        let solid: HashSet<Vec2I> = scratch
            .blocks
            .iter()
            .filter(|b| b.kind.is_solid() && is_full_tile(b))
            .map(|b| b.space)
            .collect();

        let mut candidates: Vec<Candidate> = scratch
            .blocks
            .iter()
            .filter(|b| b.kind != CollisionKind::None)
            .map(|b| Candidate {
                poly: b.poly.clone(),
                kind: b.kind,
                moving: None,
                center: b.poly_bounds.center(),
                blocked: if is_full_tile(b) {
                    internal_faces(b.space, &solid)
                } else {
                    Vec::new()
                },
            })
            .collect();
        candidates.extend(
            scratch
                .moving
                .iter()
                .filter(|m| m.categories.check(&p.physics_effect_categories))
                .map(|m| {
                    let poly = m.world_poly();
                    let center = poly.center();
                    Candidate {
                        poly,
                        kind: m.kind,
                        moving: Some((m.source, m.velocity)),
                        center,
                        blocked: Vec::new(),
                    }
                }),
        );

        let body_center = body.center();
        candidates.sort_by(|a, b| {
            (a.center - body_center)
                .length_squared()
                .total_cmp(&(b.center - body_center).length_squared())
        });

        let start_bottom = start_body.bound_box().min.y;
        let max_platform_correction = p.maximum_platform_correction
            + p.maximum_platform_correction_velocity_factor * self.velocity.length();

        let mut result = CollisionResult::default();
        for candidate in &candidates {
            let push = if candidate.kind == CollisionKind::Platform {
                if ignore_platforms || movement.y > 0.0 {
                    continue;
                }
                let top = candidate.poly.bound_box().max.y;
                if start_bottom < top - PLATFORM_TOLERANCE {
                    continue;
                }
                match body.directional_sat(&candidate.poly, Vec2F::Y) {
                    Some(up) if up <= max_platform_correction => Vec2F::new(0.0, up),
                    _ => continue,
                }
            } else {
                let Some(sat) = separation(&body, &candidate.poly, &candidate.blocked) else {
                    continue;
                };
                let sloped = sat.normal.x != 0.0 && sat.normal.y > 0.0;
                if p.enable_surface_slope_correction && sloped && movement.y <= 0.0 {
                    match body.directional_sat(&candidate.poly, Vec2F::Y) {
                        Some(up) => Vec2F::new(0.0, up),
                        None => sat.translation,
                    }
                } else {
                    sat.translation
                }
            };

            body.translate(push);
            result.correction += push;
            result.collided = true;
            if candidate.kind == CollisionKind::Null {
                result.null_collision = true;
            }

            let direction = push.normalize();
            if direction.y > direction.x.abs() {
                result.on_ground = true;
                result.ground_normal = surface_normal(&candidate.poly, &body);
                result.ground_kind = Some(candidate.kind);
                if let Some((id, velocity)) = candidate.moving {
                    result.surface_moving_collision = Some(id);
                    result.surface_velocity = velocity;
                }
            } else if -direction.y > direction.x.abs() {
                result.hit_ceiling = true;
            }
        }

        if result.correction.length() > p.maximum_correction {
            return CollisionResult {
                is_stuck: true,
                ..Default::default()
            };
        }
        result.movement = movement + result.correction;
        result
    }

    fn sync_net(&mut self) {
        let n = &mut self.net;
        n.x_position.set(self.position.x);
        n.y_position.set(self.position.y);
        n.x_velocity.set(self.velocity.x);
        n.y_velocity.set(self.velocity.y);
        n.rotation.set(self.rotation);
        n.on_ground.set(self.on_ground);
        n.zero_g.set(self.zero_g);
        n.colliding.set(self.colliding);
        n.collision_stuck.set(self.collision_stuck);
        n.surface_moving_collision
            .set(self.surface_moving_collision.map(|id| (id.entity, id.index as u32)));
        n.liquid_percentage.set(self.liquid_percentage);
    }

    fn pull_net(&mut self) {
        let n = &self.net;
        self.position = Vec2F::new(n.x_position.get(), n.y_position.get());
        self.velocity = Vec2F::new(n.x_velocity.get(), n.y_velocity.get());
        self.rotation = n.rotation.get();
        self.on_ground = *n.on_ground.get();
        self.zero_g = *n.zero_g.get();
        self.colliding = *n.colliding.get();
        self.collision_stuck = *n.collision_stuck.get();
        self.surface_moving_collision = n.surface_moving_collision.get().map(|(entity, index)| {
            MovingCollisionId {
                entity,
                index: index as usize,
            }
        });
        self.liquid_percentage = n.liquid_percentage.get();
    }
}

/// Reused buffers for [`MovementController::collision_move`]
#[derive(Debug, Default)]
pub struct CollisionScratch {
    blocks: Vec<CollisionBlock>,
    moving: Vec<MovingCollision>,
}

struct Candidate {
    poly: PolyF,
    kind: CollisionKind,
    moving: Option<(MovingCollisionId, Vec2F)>,
    center: Vec2F,
    /// Push directions that would exit through a face shared with another
    /// solid tile
    blocked: Vec<Vec2F>,
}

fn is_full_tile(block: &CollisionBlock) -> bool {
    block.poly_bounds == RectF::with_size(block.space.to_f32(), Vec2F::ONE) && block.poly.len() == 4
}

fn internal_faces(space: Vec2I, solid: &HashSet<Vec2I>) -> Vec<Vec2F> {
    [
        (Vec2I::new(1, 0), Vec2F::X),
        (Vec2I::new(-1, 0), -Vec2F::X),
        (Vec2I::new(0, 1), Vec2F::Y),
        (Vec2I::new(0, -1), -Vec2F::Y),
    ]
    .into_iter()
    .filter(|(offset, _)| solid.contains(&(space + *offset)))
    .map(|(_, direction)| direction)
    .collect()
}

fn project(poly: &PolyF, axis: Vec2F) -> (f32, f32) {
    poly.vertices()
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), v| {
            let d = v.dot(axis);
            (lo.min(d), hi.max(d))
        })
}

/// Minimum translation moving `body` out of `solid` without crossing a
/// `blocked` direction. Falls back to the unconstrained translation when
/// every direction is blocked.
fn separation(body: &PolyF, solid: &PolyF, blocked: &[Vec2F]) -> Option<SatResult> {
    let mut best: Option<(f32, Vec2F)> = None;
    let mut best_any: Option<(f32, Vec2F)> = None;
    for axis in body.normals().chain(solid.normals()) {
        let (a_min, a_max) = project(body, axis);
        let (b_min, b_max) = project(solid, axis);
        let push_negative = a_max - b_min;
        let push_positive = b_max - a_min;
        if push_negative <= 0.0 || push_positive <= 0.0 {
            return None;
        }
        for (depth, direction) in [(push_negative, -axis), (push_positive, axis)] {
            if best_any.map_or(true, |(d, _)| depth < d) {
                best_any = Some((depth, direction));
            }
            if blocked.iter().any(|b| direction.dot(*b) > 0.999) {
                continue;
            }
            if best.map_or(true, |(d, _)| depth < d) {
                best = Some((depth, direction));
            }
        }
    }
    best.or(best_any).map(|(depth, normal)| SatResult {
        translation: normal * depth,
        normal,
        depth,
    })
}

/// Normal of the edge of `surface` the body rests on, found by probing
/// slightly below the body
fn surface_normal(surface: &PolyF, body: &PolyF) -> Vec2F {
    let probe = body.translated(Vec2F::new(0.0, -STICK_PROBE));
    match probe.sat_intersection(surface) {
        Some(sat) if sat.normal.y > 0.0 => sat.normal,
        _ => Vec2F::Y,
    }
}

impl NetElement for MovementController {
    fn init_net_version(&mut self, version: Option<NetElementVersion>) {
        self.net.init_net_version(version);
    }

    fn net_store(&self, out: &mut DataWriter, rules: NetCompatibilityRules) {
        self.net.net_store(out, rules);
    }

    fn net_load(&mut self, input: &mut DataReader<'_>, rules: NetCompatibilityRules) -> NetResult<()> {
        self.net.net_load(input, rules)?;
        self.pull_net();
        Ok(())
    }

    fn write_net_delta(&self, out: &mut DataWriter, from_version: u64, rules: NetCompatibilityRules) -> bool {
        self.net.write_net_delta(out, from_version, rules)
    }

    fn read_net_delta(
        &mut self,
        input: &mut DataReader<'_>,
        interpolation_time: f32,
        rules: NetCompatibilityRules,
    ) -> NetResult<()> {
        self.net.read_net_delta(input, interpolation_time, rules)?;
        self.pull_net();
        Ok(())
    }

    fn blank_net_delta(&mut self, interpolation_time: f32) {
        self.net.blank_net_delta(interpolation_time);
    }

    fn enable_net_interpolation(&mut self, extrapolation_hint: f32) {
        self.net.enable_net_interpolation(extrapolation_hint);
    }

    fn disable_net_interpolation(&mut self) {
        self.net.disable_net_interpolation();
    }

    fn tick_net_interpolation(&mut self, dt: f32) {
        self.net.tick_net_interpolation(dt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::CollisionGrid;
    use approx::assert_relative_eq;
    use star_math::RectI;

    fn floor_world() -> CollisionGrid {
        let mut grid = CollisionGrid::new(10.0);
        grid.fill(RectI::from_coords(-10, -1, 10, 0), CollisionKind::Block);
        grid
    }

    #[test]
    fn test_zero_dt_is_noop() {
        let world = floor_world();
        let mut body = MovementController::default();
        body.set_position(Vec2F::new(0.0, 3.0));
        body.set_velocity(Vec2F::new(2.0, -1.0));
        body.tick_master(0.0, &world);
        body.tick_master(0.0, &world);
        assert_eq!(body.position(), Vec2F::new(0.0, 3.0));
        assert_eq!(body.velocity(), Vec2F::new(2.0, -1.0));
    }

    #[test]
    fn test_falls_and_lands() {
        let world = floor_world();
        let mut body = MovementController::default();
        body.set_position(Vec2F::new(0.0, 2.0));
        for _ in 0..120 {
            body.tick_master(1.0 / 60.0, &world);
        }
        assert!(body.on_ground());
        assert_relative_eq!(body.position().y, 0.5, epsilon = 1e-3);
        assert!(body.velocity().y.abs() < 1e-3);
        assert!(!body.collision_stuck());
    }

    #[test]
    fn test_walks_across_tile_seams() {
        let world = floor_world();
        let mut body = MovementController::default();
        body.set_position(Vec2F::new(-5.0, 0.5));
        for _ in 0..60 {
            body.approach_x_velocity(4.0, 1000.0);
            body.tick_master(1.0 / 60.0, &world);
        }
        assert!(body.on_ground());
        assert!(body.position().x > -1.5);
        assert_relative_eq!(body.position().y, 0.5, epsilon = 1e-3);
    }

    #[test]
    fn test_wall_stops_horizontal_motion() {
        let mut world = floor_world();
        world.fill(RectI::from_coords(3, 0, 4, 5), CollisionKind::Block);
        let mut body = MovementController::default();
        body.set_position(Vec2F::new(0.0, 0.5));
        for _ in 0..120 {
            body.approach_x_velocity(8.0, 1000.0);
            body.tick_master(1.0 / 60.0, &world);
        }
        assert!(body.position().x <= 2.5 + 1e-3);
        assert!(body.velocity().x.abs() < 1.0);
    }

    #[test]
    fn test_stop_on_first_bounce() {
        let world = floor_world();
        let mut body = MovementController::new(MovementParameters {
            stop_on_first_bounce: Some(true),
            bounce_factor: Some(0.5),
            ..Default::default()
        });
        body.set_position(Vec2F::new(0.0, 0.6));
        body.set_velocity(Vec2F::new(0.0, -30.0));
        body.tick_master(1.0 / 60.0, &world);
        assert!(body.is_colliding());
        assert!(body.velocity().y > 0.0);
    }

    #[test]
    fn test_collision_disabled_passes_through() {
        let world = floor_world();
        let mut body = MovementController::new(MovementParameters {
            collision_enabled: Some(false),
            gravity_enabled: Some(false),
            ..Default::default()
        });
        body.set_position(Vec2F::new(0.0, 0.5));
        body.set_velocity(Vec2F::new(0.0, -60.0));
        body.tick_master(1.0 / 60.0, &world);
        assert_relative_eq!(body.position().y, -0.5, epsilon = 1e-4);
        assert!(!body.on_ground());
    }

    #[test]
    fn test_stuck_inside_solid() {
        let mut world = floor_world();
        world.fill(RectI::from_coords(-10, 0, 10, 10), CollisionKind::Block);
        let mut body = MovementController::new(MovementParameters {
            maximum_correction: Some(0.25),
            ..Default::default()
        });
        body.set_position(Vec2F::new(0.0, 5.0));
        body.tick_master(1.0 / 60.0, &world);
        assert!(body.collision_stuck());
        assert_eq!(body.position(), Vec2F::new(0.0, 5.0));
    }

    #[test]
    fn test_sticky_body_clings() {
        let world = floor_world();
        let mut body = MovementController::new(MovementParameters {
            sticky_collision: Some(true),
            sticky_force: Some(1.0),
            ..Default::default()
        });
        body.set_position(Vec2F::new(0.0, 1.0));
        for _ in 0..60 {
            body.tick_master(1.0 / 60.0, &world);
        }
        let dir = body.sticking_direction().unwrap();
        assert_relative_eq!(dir.y, -1.0, epsilon = 1e-4);
        assert_relative_eq!(body.position().y, 0.5, epsilon = 1e-3);
    }

    #[test]
    fn test_net_state_replicates_position() {
        let mut master = MovementController::default();
        let mut top = star_net::NetElementTop::new(MovementController::default());
        master.set_position(Vec2F::new(3.0, 4.0));
        master.set_velocity(Vec2F::new(1.0, 0.0));

        let mut writer = star_net::NetElementTop::new(master);
        let rules = NetCompatibilityRules::latest();
        let (bytes, _) = writer.write_net_state(0, rules);
        top.read_net_state(&bytes, 0.0, rules).unwrap();
        assert_relative_eq!(top.position().x, 3.0, epsilon = 0.02);
        assert_relative_eq!(top.position().y, 4.0, epsilon = 0.02);
        assert_relative_eq!(top.velocity().x, 1.0, epsilon = 0.01);
    }
}
