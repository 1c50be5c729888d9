//! Walking, running, jumping and flying actors
//!
//! [`ActorMovementController`] turns per-tick intents (`control_move`,
//! `control_jump`, `control_down`, ...) into forces on a
//! [`MovementController`]. Controls last one tick and are cleared after
//! [`ActorMovementController::tick_master`].

use serde::{Deserialize, Serialize};
use star_math::{RectF, Vec2F};
use star_net::{NetElementBool, NetElementEnum};

use crate::collision::{CollisionSet, CollisionWorld};
use crate::controller::MovementController;
use crate::parameters::{
    ActorMovementModifiers, ActorMovementParameters, JumpProfile, MovementParameters,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    #[default]
    Right,
}
star_net::net_enum!(Direction { Left, Right });

impl Direction {
    pub fn numerical(self) -> f32 {
        match self {
            Direction::Left => -1.0,
            Direction::Right => 1.0,
        }
    }

    pub fn from_sign(value: f32) -> Option<Self> {
        if value < 0.0 {
            Some(Direction::Left)
        } else if value > 0.0 {
            Some(Direction::Right)
        } else {
            None
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }
}

/// Replicated actor flags
#[derive(Debug, Clone, Default)]
pub struct ActorNetState {
    facing: NetElementEnum<Direction>,
    moving: NetElementBool,
    walking: NetElementBool,
    running: NetElementBool,
    crouching: NetElementBool,
    flying: NetElementBool,
    falling: NetElementBool,
    jumping: NetElementBool,
    ground_movement: NetElementBool,
    liquid_movement: NetElementBool,
}
star_net::net_element_group!(ActorNetState {
    facing,
    moving,
    walking,
    running,
    crouching,
    flying,
    falling,
    jumping,
    ground_movement,
    liquid_movement,
});

/// Intents for one tick
#[derive(Debug, Clone, Default)]
struct Controls {
    move_direction: Option<Direction>,
    run: bool,
    crouch: bool,
    down: bool,
    jump: bool,
    fly: Option<Vec2F>,
    face: Option<Direction>,
    parameters: ActorMovementParameters,
    modifiers: ActorMovementModifiers,
}

#[derive(Debug, Clone)]
pub struct ActorMovementController {
    movement: MovementController,
    state: ActorNetState,

    base_parameters: ActorMovementParameters,
    base_modifiers: ActorMovementModifiers,
    controls: Controls,

    /// Ticks left during which platforms stay ignored
    fall_through_sustain: u32,
    air_time: f32,
    jump_hold_timer: f32,
    jump_speed: f32,
    re_jump_timer: f32,
    last_control_jump: bool,
}
star_net::net_element_group!(ActorMovementController { movement, state });

impl Default for ActorMovementController {
    fn default() -> Self {
        Self::new(ActorMovementParameters::default())
    }
}

impl ActorMovementController {
    pub fn new(parameters: ActorMovementParameters) -> Self {
        let base_parameters = ActorMovementParameters::sensible_defaults().merge(&parameters);
        let mut this = Self {
            movement: MovementController::default(),
            state: ActorNetState::default(),
            base_parameters,
            base_modifiers: ActorMovementModifiers::default(),
            controls: Controls::default(),
            fall_through_sustain: 0,
            air_time: 0.0,
            jump_hold_timer: 0.0,
            jump_speed: 0.0,
            re_jump_timer: 0.0,
            last_control_jump: false,
        };
        let params = this.base_parameters.clone();
        this.movement
            .reset_parameters(body_parameters(&params, false, false, false));
        this
    }

    pub fn movement(&self) -> &MovementController {
        &self.movement
    }

    pub fn movement_mut(&mut self) -> &mut MovementController {
        &mut self.movement
    }

    pub fn base_parameters(&self) -> &ActorMovementParameters {
        &self.base_parameters
    }

    /// Replace the base parameters, layered over the built-in defaults
    pub fn reset_base_parameters(&mut self, parameters: &ActorMovementParameters) {
        self.base_parameters = ActorMovementParameters::sensible_defaults().merge(parameters);
    }

    /// Merge over the current base parameters
    pub fn update_base_parameters(&mut self, parameters: &ActorMovementParameters) {
        self.base_parameters = self.base_parameters.merge(parameters);
    }

    pub fn base_modifiers(&self) -> &ActorMovementModifiers {
        &self.base_modifiers
    }

    pub fn set_base_modifiers(&mut self, modifiers: ActorMovementModifiers) {
        self.base_modifiers = modifiers;
    }

    /// Base parameters with this tick's control parameters merged on
    pub fn active_parameters(&self) -> ActorMovementParameters {
        self.base_parameters.merge(&self.controls.parameters)
    }

    pub fn active_modifiers(&self) -> ActorMovementModifiers {
        self.base_modifiers.combine(&self.controls.modifiers)
    }

    #[inline]
    pub fn position(&self) -> Vec2F {
        self.movement.position()
    }

    pub fn set_position(&mut self, position: Vec2F) {
        self.movement.set_position(position);
    }

    #[inline]
    pub fn velocity(&self) -> Vec2F {
        self.movement.velocity()
    }

    pub fn set_velocity(&mut self, velocity: Vec2F) {
        self.movement.set_velocity(velocity);
    }

    pub fn on_ground(&self) -> bool {
        self.movement.on_ground()
    }

    pub fn facing(&self) -> Direction {
        *self.state.facing.get()
    }

    pub fn set_facing(&mut self, facing: Direction) {
        self.state.facing.set(facing);
    }

    pub fn moving(&self) -> bool {
        *self.state.moving.get()
    }

    pub fn walking(&self) -> bool {
        *self.state.walking.get()
    }

    pub fn running(&self) -> bool {
        *self.state.running.get()
    }

    pub fn crouching(&self) -> bool {
        *self.state.crouching.get()
    }

    pub fn flying(&self) -> bool {
        *self.state.flying.get()
    }

    pub fn falling(&self) -> bool {
        *self.state.falling.get()
    }

    pub fn jumping(&self) -> bool {
        *self.state.jumping.get()
    }

    /// On the ground, or recently enough left it to still move as if so
    pub fn ground_movement(&self) -> bool {
        *self.state.ground_movement.get()
    }

    pub fn liquid_movement(&self) -> bool {
        *self.state.liquid_movement.get()
    }

    /// Whether a jump could start this tick
    pub fn can_jump(&self) -> bool {
        let params = self.active_parameters();
        let profile = self.jump_profile(&params);
        let grounded = self.ground_movement() || self.liquid_movement();
        let multi = profile.multi_jump.unwrap_or(false);
        (grounded || multi)
            && self.re_jump_timer <= 0.0
            && profile.jump_speed.unwrap_or(0.0) > 0.0
            && !self.active_modifiers().jumping_suppressed
    }

    pub fn control_move(&mut self, direction: Direction, run: bool) {
        self.controls.move_direction = Some(direction);
        self.controls.run = run;
    }

    pub fn control_face(&mut self, direction: Direction) {
        self.controls.face = Some(direction);
    }

    pub fn control_crouch(&mut self) {
        self.controls.crouch = true;
    }

    /// Drop through platforms
    pub fn control_down(&mut self) {
        self.controls.down = true;
    }

    pub fn control_jump(&mut self) {
        self.controls.jump = true;
    }

    /// Fly toward `direction`, scaled by `flySpeed`
    pub fn control_fly(&mut self, direction: Vec2F) {
        self.controls.fly = Some(direction);
    }

    pub fn control_approach_velocity(&mut self, target: Vec2F, max_force: f32) {
        self.movement.approach_velocity(target, max_force);
    }

    pub fn control_approach_x_velocity(&mut self, target: f32, max_force: f32) {
        self.movement.approach_x_velocity(target, max_force);
    }

    pub fn control_approach_y_velocity(&mut self, target: f32, max_force: f32) {
        self.movement.approach_y_velocity(target, max_force);
    }

    pub fn control_force(&mut self, force: Vec2F) {
        self.movement.add_force(force);
    }

    /// Parameters merged on for the next tick only
    pub fn control_parameters(&mut self, parameters: &ActorMovementParameters) {
        self.controls.parameters = self.controls.parameters.merge(parameters);
    }

    /// Modifiers summed in for the next tick only
    pub fn control_modifiers(&mut self, modifiers: &ActorMovementModifiers) {
        self.controls.modifiers = self.controls.modifiers.combine(modifiers);
    }

    pub fn clear_controls(&mut self) {
        self.controls = Controls::default();
    }

    fn jump_profile(&self, params: &ActorMovementParameters) -> JumpProfile {
        if self.liquid_movement() {
            params.liquid_jump()
        } else {
            params.air_jump()
        }
    }

    fn ground_below(&self, world: &dyn CollisionWorld, distance: f32) -> bool {
        if distance <= 0.0 {
            return false;
        }
        let bounds = self.movement.collision_bound_box();
        let probe = RectF::from_coords(
            bounds.min.x,
            bounds.min.y - distance,
            bounds.max.x,
            bounds.min.y,
        );
        world.rect_collision(probe.to_tiles(), CollisionSet::DEFAULT)
    }

    pub fn tick_master(&mut self, dt: f32, world: &dyn CollisionWorld) {
        if dt <= 0.0 {
            self.clear_controls();
            return;
        }

        let params = self.active_parameters();
        let modifiers = self.active_modifiers();
        let mut controls = std::mem::take(&mut self.controls);

        if modifiers.movement_suppressed {
            controls.move_direction = None;
            controls.jump = false;
            controls.fly = None;
        }
        if modifiers.running_suppressed {
            controls.run = false;
        }
        if modifiers.jumping_suppressed {
            controls.jump = false;
        }

        let liquid_movement =
            self.movement.liquid_percentage() >= params.minimum_liquid_percentage.unwrap_or(0.5);
        self.state.liquid_movement.set(liquid_movement);

        let flying = controls.fly.is_some();
        let crouching = controls.crouch && self.movement.on_ground() && !flying;
        let moving = controls.move_direction.is_some();
        self.movement
            .reset_parameters(body_parameters(&params, crouching, moving, flying));

        if controls.down {
            self.fall_through_sustain = params.fall_through_sustain_frames.unwrap_or(0);
        } else {
            self.fall_through_sustain = self.fall_through_sustain.saturating_sub(1);
        }
        if controls.down || self.fall_through_sustain > 0 {
            self.movement.ignore_platforms_next_tick();
        }

        let on_ground = self.movement.on_ground();
        if on_ground {
            self.air_time = 0.0;
        } else {
            self.air_time += dt;
        }
        let ground_movement = on_ground
            || (!self.jumping()
                && (self.air_time <= params.ground_movement_minimum_sustain.unwrap_or(0.0)
                    || (self.air_time <= params.ground_movement_maximum_sustain.unwrap_or(0.0)
                        && self.ground_below(
                            world,
                            params.ground_movement_check_distance.unwrap_or(0.0),
                        ))));

        if let Some(direction) = controls.fly {
            let speed = params.fly_speed.unwrap_or(0.0) * ActorMovementModifiers::factor(modifiers.speed_modifier);
            self.movement
                .approach_velocity(direction.normalize() * speed, params.air_force.unwrap_or(0.0));
        }

        let mut walking = false;
        let mut running = false;
        if let Some(direction) = controls.move_direction {
            let base_speed = if controls.run {
                params.run_speed.unwrap_or(0.0)
            } else {
                params.walk_speed.unwrap_or(0.0)
            };
            let mut speed = base_speed * ActorMovementModifiers::factor(modifiers.speed_modifier);
            let force = if liquid_movement {
                let impedance = params.liquid_impedance.unwrap_or(0.0) * self.movement.liquid_percentage();
                speed *= (1.0 - impedance).max(0.0)
                    * ActorMovementModifiers::factor(modifiers.liquid_movement_modifier);
                params.liquid_force.unwrap_or(0.0)
            } else if ground_movement {
                speed *= ActorMovementModifiers::factor(modifiers.ground_movement_modifier);
                params.ground_force.unwrap_or(0.0)
            } else {
                params.air_force.unwrap_or(0.0)
            };
            self.movement.approach_x_velocity(direction.numerical() * speed, force);
            walking = ground_movement && !controls.run;
            running = ground_movement && controls.run;
            if !modifiers.facing_suppressed {
                self.state.facing.set(direction);
            }
        }
        if let Some(face) = controls.face {
            if !modifiers.facing_suppressed {
                self.state.facing.set(face);
            }
        }

        self.tick_jump(dt, &params, &modifiers, controls.jump, ground_movement, liquid_movement);

        self.movement.tick_master(dt, world);

        let profile = self.jump_profile(&params);
        if self.jumping() {
            if profile.collision_cancelled.unwrap_or(false) && self.movement.hit_ceiling() {
                self.jump_hold_timer = 0.0;
            }
            if self.movement.on_ground() && self.movement.velocity().y <= 0.0 {
                self.state.jumping.set(false);
                self.re_jump_timer = profile.re_jump_delay.unwrap_or(0.0);
            }
        }

        let ground_after = self.movement.on_ground() || (ground_movement && !self.jumping());
        self.state.ground_movement.set(ground_after);
        self.state.moving.set(moving);
        self.state.walking.set(walking);
        self.state.running.set(running);
        self.state.crouching.set(crouching);
        self.state.flying.set(flying);
        let fall_speed = params.fall_status_speed_min.unwrap_or(0.0);
        self.state.falling.set(
            !ground_after && !flying && self.movement.velocity().y < -fall_speed,
        );
        self.last_control_jump = controls.jump;
    }

    fn tick_jump(
        &mut self,
        dt: f32,
        params: &ActorMovementParameters,
        modifiers: &ActorMovementModifiers,
        control_jump: bool,
        ground_movement: bool,
        liquid_movement: bool,
    ) {
        self.re_jump_timer = (self.re_jump_timer - dt).max(0.0);
        let profile = if liquid_movement {
            params.liquid_jump()
        } else {
            params.air_jump()
        };
        let jump_modifier = if liquid_movement {
            modifiers.liquid_jump_modifier
        } else {
            modifiers.air_jump_modifier
        };
        let jump_speed = profile.jump_speed.unwrap_or(0.0) * ActorMovementModifiers::factor(jump_modifier);
        let hold_time = profile.jump_hold_time.unwrap_or(0.0);
        let initial = profile.jump_initial_percentage.unwrap_or(1.0);

        if control_jump {
            let fresh_press = !self.last_control_jump || profile.auto_jump.unwrap_or(false);
            let can_start = (ground_movement || liquid_movement || profile.multi_jump.unwrap_or(false))
                && self.re_jump_timer <= 0.0
                && fresh_press
                && jump_speed > 0.0;
            if can_start {
                let surface = self.movement.surface_velocity().y.max(0.0);
                self.movement.set_y_velocity(surface + jump_speed * initial);
                self.jump_speed = jump_speed;
                self.jump_hold_timer = hold_time;
                self.air_time = f32::MAX;
                self.state.jumping.set(true);
                self.state.ground_movement.set(false);
            } else if self.jumping() && self.jump_hold_timer > 0.0 {
                self.movement
                    .approach_y_velocity(self.jump_speed, profile.jump_control_force.unwrap_or(0.0));
                self.jump_hold_timer = (self.jump_hold_timer - dt).max(0.0);
            }
        } else if self.jumping() && self.jump_hold_timer > 0.0 {
            // Released early: keep the takeoff share plus what the hold earned
            let held = if hold_time > 0.0 {
                1.0 - self.jump_hold_timer / hold_time
            } else {
                1.0
            };
            let cap = self.jump_speed * star_math::lerp(initial, 1.0, held);
            if self.movement.velocity().y > cap {
                self.movement.set_y_velocity(cap);
            }
            self.jump_hold_timer = 0.0;
        }
    }

    /// Slaves only advance interpolation
    pub fn tick_slave(&mut self, dt: f32) {
        self.movement.tick_slave(dt);
        self.clear_controls();
    }
}

/// Movement parameters the body runs with for the given actor state
fn body_parameters(
    params: &ActorMovementParameters,
    crouching: bool,
    moving: bool,
    flying: bool,
) -> MovementParameters {
    let poly = if crouching {
        params.crouching_poly.clone()
    } else {
        params.standing_poly.clone()
    };
    let ground_friction = if moving {
        params.ambulating_ground_friction
    } else {
        params.normal_ground_friction
    };
    MovementParameters {
        mass: params.mass,
        gravity_multiplier: params.gravity_multiplier,
        liquid_buoyancy: params.liquid_buoyancy,
        air_buoyancy: params.air_buoyancy,
        bounce_factor: params.bounce_factor,
        stop_on_first_bounce: params.stop_on_first_bounce,
        enable_surface_slope_correction: params.enable_surface_slope_correction,
        slope_sliding_factor: params.slope_sliding_factor,
        max_movement_per_step: params.max_movement_per_step,
        maximum_correction: params.maximum_correction,
        speed_limit: params.speed_limit,
        collision_poly: poly,
        sticky_collision: params.sticky_collision,
        sticky_force: params.sticky_force,
        air_friction: params.air_friction,
        liquid_friction: params.liquid_friction,
        ground_friction,
        collision_enabled: params.collision_enabled,
        friction_enabled: params.friction_enabled,
        gravity_enabled: Some(params.gravity_enabled.unwrap_or(true) && !flying),
        ignore_platform_collision: None,
        maximum_platform_correction: params.maximum_platform_correction,
        maximum_platform_correction_velocity_factor: params
            .maximum_platform_correction_velocity_factor,
        physics_effect_categories: params.physics_effect_categories.clone(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::{CollisionGrid, CollisionKind};
    use crate::parameters::JumpProfile;
    use star_math::RectI;

    fn walker() -> ActorMovementController {
        ActorMovementController::new(ActorMovementParameters {
            walk_speed: Some(5.0),
            run_speed: Some(10.0),
            ground_force: Some(200.0),
            air_force: Some(50.0),
            normal_ground_friction: Some(20.0),
            air_jump_profile: Some(JumpProfile {
                jump_speed: Some(20.0),
                jump_control_force: Some(400.0),
                jump_initial_percentage: Some(0.5),
                jump_hold_time: Some(0.25),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn floor() -> CollisionGrid {
        let mut grid = CollisionGrid::new(80.0);
        grid.fill(RectI::from_coords(-50, -1, 50, 0), CollisionKind::Block);
        grid
    }

    fn settle(actor: &mut ActorMovementController, world: &CollisionGrid) {
        for _ in 0..10 {
            actor.tick_master(1.0 / 60.0, world);
        }
    }

    #[test]
    fn test_walk_reaches_walk_speed() {
        let world = floor();
        let mut actor = walker();
        actor.set_position(Vec2F::new(0.0, 0.5));
        settle(&mut actor, &world);
        for _ in 0..30 {
            actor.control_move(Direction::Right, false);
            actor.tick_master(1.0 / 60.0, &world);
        }
        assert!((actor.velocity().x - 5.0).abs() < 0.01);
        assert!(actor.walking());
        assert_eq!(actor.facing(), Direction::Right);
    }

    #[test]
    fn test_speed_modifier_sums() {
        let world = floor();
        let mut actor = walker();
        actor.set_position(Vec2F::new(0.0, 0.5));
        settle(&mut actor, &world);
        for _ in 0..30 {
            actor.control_move(Direction::Left, true);
            actor.control_modifiers(&ActorMovementModifiers {
                speed_modifier: 0.25,
                ..Default::default()
            });
            actor.control_modifiers(&ActorMovementModifiers {
                speed_modifier: 0.25,
                ..Default::default()
            });
            actor.tick_master(1.0 / 60.0, &world);
        }
        assert!((actor.velocity().x + 15.0).abs() < 0.05);
        assert_eq!(actor.facing(), Direction::Left);
    }

    #[test]
    fn test_short_hop_lower_than_full_jump() {
        let world = floor();
        let peak = |hold_ticks: usize| {
            let mut actor = walker();
            actor.set_position(Vec2F::new(0.0, 0.5));
            settle(&mut actor, &world);
            let mut best = actor.position().y;
            for tick in 0..120 {
                if tick < hold_ticks {
                    actor.control_jump();
                }
                actor.tick_master(1.0 / 60.0, &world);
                best = best.max(actor.position().y);
            }
            best
        };
        let tap = peak(1);
        let full = peak(30);
        assert!(tap > 0.5);
        assert!(full > tap + 0.5);
    }

    #[test]
    fn test_jump_requires_fresh_press() {
        let world = floor();
        let mut actor = walker();
        actor.set_position(Vec2F::new(0.0, 0.5));
        settle(&mut actor, &world);
        let mut takeoffs = 0;
        let mut was_jumping = false;
        for _ in 0..240 {
            actor.control_jump();
            actor.tick_master(1.0 / 60.0, &world);
            if actor.jumping() && !was_jumping {
                takeoffs += 1;
            }
            was_jumping = actor.jumping();
        }
        assert_eq!(takeoffs, 1);
    }

    #[test]
    fn test_suppressed_movement_ignores_controls() {
        let world = floor();
        let mut actor = walker();
        actor.set_position(Vec2F::new(0.0, 0.5));
        settle(&mut actor, &world);
        for _ in 0..30 {
            actor.control_move(Direction::Right, false);
            actor.control_modifiers(&ActorMovementModifiers {
                movement_suppressed: true,
                ..Default::default()
            });
            actor.tick_master(1.0 / 60.0, &world);
        }
        assert!(actor.velocity().x.abs() < 1e-3);
        assert!(!actor.moving());
    }
}
