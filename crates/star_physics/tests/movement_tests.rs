//! Movement scenarios against small collision grids

use approx::assert_relative_eq;
use star_physics::prelude::*;

const DT: f32 = 1.0 / 60.0;

#[test]
fn test_zero_step_keeps_state() {
    let mut world = CollisionGrid::new(80.0);
    world.fill(RectI::from_coords(0, 0, 10, 1), CollisionKind::Block);

    let mut body = MovementController::default();
    body.set_position(Vec2F::new(5.0, 1.5));
    body.tick_master(DT, &world);
    assert!(body.on_ground());

    let position = body.position();
    let velocity = body.velocity();
    for _ in 0..10 {
        body.tick_master(0.0, &world);
    }
    assert_eq!(body.position(), position);
    assert_eq!(body.velocity(), velocity);
}

#[test]
fn test_drop_through_platform() {
    let mut world = CollisionGrid::new(80.0);
    // Platform row whose top surface is y = 10
    world.fill(RectI::from_coords(0, 9, 11, 10), CollisionKind::Platform);

    let sustain = 5;
    let mut actor = ActorMovementController::new(ActorMovementParameters {
        fall_through_sustain_frames: Some(sustain),
        ..Default::default()
    });
    actor.set_position(Vec2F::new(5.5, 10.5));
    for _ in 0..5 {
        actor.tick_master(DT, &world);
    }
    assert!(actor.on_ground());
    assert_relative_eq!(actor.position().y, 10.5, epsilon = 1e-3);

    for _ in 0..(sustain + 1) {
        actor.control_down();
        actor.tick_master(DT, &world);
    }
    actor.tick_master(DT, &world);

    assert!(actor.position().y < 10.0);
    assert!(!actor.on_ground());
}

#[test]
fn test_platform_catches_from_above_only() {
    let mut world = CollisionGrid::new(80.0);
    world.fill(RectI::from_coords(0, 9, 11, 10), CollisionKind::Platform);

    // Jumping up through the platform from below
    let mut body = MovementController::default();
    body.set_position(Vec2F::new(5.5, 8.0));
    body.set_velocity(Vec2F::new(0.0, 25.0));
    let mut highest = body.position().y;
    for _ in 0..60 {
        body.tick_master(DT, &world);
        highest = highest.max(body.position().y);
    }
    assert!(highest > 10.5);
    assert!(body.on_ground());
    assert_relative_eq!(body.position().y, 10.5, epsilon = 1e-3);
}

#[test]
fn test_projectile_arc() {
    let world = CollisionGrid::new(1.0);
    let mut projectile = MovementController::default();
    projectile.set_position(Vec2F::ZERO);
    projectile.set_velocity(Vec2F::new(10.0, 0.0));

    for tick in 1..=60 {
        projectile.tick_master(DT, &world);
        let t = tick as f32 * DT;
        let position = projectile.position();
        assert_relative_eq!(position.x, 10.0 * t, epsilon = 0.01);
        assert_relative_eq!(position.y, -t * t / 2.0, epsilon = 0.01);
    }
}

#[test]
fn test_moving_collision_carries_body() {
    let mut world = CollisionGrid::new(80.0);
    world.add_moving_collision(MovingCollision {
        source: MovingCollisionId { entity: 7, index: 0 },
        position: Vec2F::ZERO,
        collision: PolyF::from_rect(&RectF::from_coords(-20.0, -1.0, 20.0, 0.0)),
        kind: CollisionKind::Block,
        velocity: Vec2F::new(2.0, 0.0),
        categories: PhysicsCategoryFilter::default(),
    });

    let mut body = MovementController::new(MovementParameters {
        ground_friction: Some(10.0),
        ..Default::default()
    });
    body.set_position(Vec2F::new(0.0, 0.5));
    for _ in 0..120 {
        body.tick_master(DT, &world);
    }
    assert!(body.on_ground());
    assert_eq!(
        body.surface_moving_collision(),
        Some(MovingCollisionId { entity: 7, index: 0 })
    );
    assert_relative_eq!(body.velocity().x, 2.0, epsilon = 0.01);
}

#[test]
fn test_moving_collision_category_filter() {
    let mut world = CollisionGrid::new(80.0);
    world.add_moving_collision(MovingCollision {
        source: MovingCollisionId { entity: 3, index: 1 },
        position: Vec2F::ZERO,
        collision: PolyF::from_rect(&RectF::from_coords(-5.0, -1.0, 5.0, 0.0)),
        kind: CollisionKind::Block,
        velocity: Vec2F::ZERO,
        categories: PhysicsCategoryFilter::Blacklist(["ghost".to_string()].into()),
    });

    let mut ghost = MovementController::new(MovementParameters {
        physics_effect_categories: Some(["ghost".to_string()].into()),
        ..Default::default()
    });
    ghost.set_position(Vec2F::new(0.0, 0.5));
    for _ in 0..30 {
        ghost.tick_master(DT, &world);
    }
    assert!(ghost.position().y < 0.0);
}

#[test]
fn test_directional_force_region() {
    struct Updraft(CollisionGrid);
    impl CollisionWorld for Updraft {
        fn tile_collision(&self, tile: Vec2I) -> CollisionKind {
            self.0.tile_collision(tile)
        }
        fn gravity(&self, position: Vec2F) -> f32 {
            self.0.gravity(position)
        }
        fn force_regions(&self, _region: &RectF, out: &mut Vec<PhysicsForceRegion>) {
            out.push(PhysicsForceRegion::Directional {
                region: PolyF::from_rect(&RectF::from_coords(-10.0, -10.0, 10.0, 10.0)),
                x_target_velocity: None,
                y_target_velocity: Some(5.0),
                control_force: 1000.0,
                categories: PhysicsCategoryFilter::default(),
            });
        }
    }

    let world = Updraft(CollisionGrid::new(10.0));
    let mut body = MovementController::default();
    for _ in 0..30 {
        body.tick_master(DT, &world);
    }
    // The region pulls to 5 before gravity takes its share each tick
    assert_relative_eq!(body.velocity().y, 5.0 - 10.0 * DT, epsilon = 1e-3);
    assert!(body.position().y > 1.0);
}

#[test]
fn test_liquid_buoyancy_floats() {
    let mut world = CollisionGrid::new(80.0);
    for x in -2..2 {
        for y in -2..2 {
            world.set_liquid(Vec2I::new(x, y), 1.0);
        }
    }
    let mut body = MovementController::new(MovementParameters {
        liquid_buoyancy: Some(1.0),
        ..Default::default()
    });
    body.tick_master(DT, &world);
    assert_relative_eq!(body.liquid_percentage(), 1.0, epsilon = 1e-5);
    for _ in 0..30 {
        body.tick_master(DT, &world);
    }
    assert_relative_eq!(body.position().y, 0.0, epsilon = 1e-4);
}
