//! Path searches over small collision grids

use star_ai::prelude::*;
use star_math::{PolyF, RectF, RectI, Vec2F};
use star_physics::{ActorMovementParameters, CollisionGrid, CollisionKind, JumpProfile};

/// Actor whose position is the bottom centre of a 1x1 body
fn walker(walk_speed: f32, jump_speed: f32) -> ActorMovementParameters {
    ActorMovementParameters {
        standing_poly: Some(PolyF::from_rect(&RectF::from_coords(-0.5, 0.0, 0.5, 1.0))),
        walk_speed: Some(walk_speed),
        air_jump_profile: Some(JumpProfile {
            jump_speed: Some(jump_speed),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Floor along y = 0 for x in 0..=20 with a 3 tile wall at x = 10
fn walled_floor() -> CollisionGrid {
    let mut grid = CollisionGrid::new(8.0);
    grid.fill(RectI::from_coords(0, 0, 21, 1), CollisionKind::Block);
    grid.fill(RectI::from_coords(10, 1, 11, 4), CollisionKind::Block);
    grid
}

fn assert_chained(path: &[Edge]) {
    for pair in path.windows(2) {
        assert_eq!(pair[0].target, pair[1].source);
    }
}

#[test]
fn test_path_over_wall_uses_one_jump() {
    let world = walled_floor();
    let mut finder = PathFinder::new(
        &walker(5.0, 8.0),
        PathFinderParameters::default(),
        Vec2F::new(1.0, 1.0),
        Vec2F::new(18.0, 1.0),
    );
    assert_eq!(finder.explore(&world, None), Some(true));

    let path = finder.result().unwrap();
    assert_chained(path);
    let jumps: Vec<&Edge> = path.iter().filter(|e| e.action == Action::Jump).collect();
    assert_eq!(jumps.len(), 1);
    let takeoff = jumps[0].source.position.x;
    assert!((5.0..10.0).contains(&takeoff), "jumped from x = {takeoff}");

    let end = path.last().unwrap().target;
    assert!(end.is_resting());
    assert!((end.position.x - 18.0).abs() <= 1.0);
    assert_eq!(end.position.y, 1.0);
}

#[test]
fn test_path_properties_with_landing_limit() {
    let world = walled_floor();
    let parameters = PathFinderParameters {
        max_landing_velocity: Some(-9.0),
        ..Default::default()
    };
    let mut finder = PathFinder::new(
        &walker(5.0, 8.0),
        parameters,
        Vec2F::new(1.0, 1.0),
        Vec2F::new(18.0, 1.0),
    );
    assert_eq!(finder.explore(&world, None), Some(true));

    let path = finder.result().unwrap();
    assert!(!path.is_empty());
    assert_chained(path);
    assert_eq!(path[0].source.position, Vec2F::new(1.0, 1.0));
    for edge in path.iter().filter(|e| e.action == Action::Land) {
        let velocity = edge.source.velocity.unwrap();
        assert!(velocity.y >= -9.0);
        assert!(edge.target.is_resting());
    }
    let end = path.last().unwrap().target;
    assert!(end.is_resting());
    assert_eq!(end.position.y, 1.0);
}

#[test]
fn test_hard_landing_limit_makes_far_side_unreachable() {
    let world = walled_floor();
    let parameters = PathFinderParameters {
        max_landing_velocity: Some(-5.0),
        ..Default::default()
    };
    let mut finder = PathFinder::new(
        &walker(5.0, 8.0),
        parameters,
        Vec2F::new(1.0, 1.0),
        Vec2F::new(18.0, 1.0),
    );
    assert_eq!(finder.explore(&world, None), Some(false));
    assert!(finder.result().is_none());
}

#[test]
fn test_return_best_gives_partial_path() {
    let world = walled_floor();
    let parameters = PathFinderParameters {
        return_best: true,
        max_landing_velocity: Some(-5.0),
        ..Default::default()
    };
    let mut finder = PathFinder::new(
        &walker(5.0, 8.0),
        parameters,
        Vec2F::new(1.0, 1.0),
        Vec2F::new(18.0, 1.0),
    );
    assert_eq!(finder.explore(&world, None), Some(false));
    let path = finder.result().unwrap();
    assert_chained(path);
    let end = path.last().unwrap().target;
    assert!(end.is_resting());
    assert!(end.position.x > 1.0);
}

#[test]
fn test_incremental_explore() {
    let world = walled_floor();
    let mut finder = PathFinder::new(
        &walker(5.0, 8.0),
        PathFinderParameters::default(),
        Vec2F::new(1.0, 1.0),
        Vec2F::new(18.0, 1.0),
    );
    assert_eq!(finder.explore(&world, Some(3)), None);
    assert_eq!(finder.searched_nodes(), 3);

    let mut calls = 1;
    let found = loop {
        if let Some(found) = finder.explore(&world, Some(50)) {
            break found;
        }
        calls += 1;
        assert!(calls < 10_000);
    };
    assert!(found);
    assert!(calls > 1);
    // A finished search keeps answering the same way
    assert_eq!(finder.explore(&world, Some(1)), Some(true));
}

#[test]
fn test_drop_through_platform() {
    let mut world = CollisionGrid::new(8.0);
    world.fill(RectI::from_coords(0, 0, 10, 1), CollisionKind::Block);
    world.fill(RectI::from_coords(0, 3, 10, 4), CollisionKind::Platform);

    let mut finder = PathFinder::new(
        &walker(5.0, 8.0),
        PathFinderParameters::default(),
        Vec2F::new(5.0, 4.0),
        Vec2F::new(5.0, 1.0),
    );
    assert_eq!(finder.explore(&world, None), Some(true));
    let path = finder.result().unwrap();
    assert_chained(path);
    assert_eq!(path[0].action, Action::Drop);
    assert_eq!(path.last().unwrap().action, Action::Land);
}

#[test]
fn test_zero_gravity_flies() {
    let world = CollisionGrid::new(0.0);
    let parameters = PathFinderParameters {
        must_end_on_ground: false,
        ..Default::default()
    };
    let mut movement = walker(5.0, 8.0);
    movement.fly_speed = Some(4.0);
    let mut finder = PathFinder::new(&movement, parameters, Vec2F::ZERO, Vec2F::new(5.0, 5.0));
    assert_eq!(finder.explore(&world, None), Some(true));
    let path = finder.result().unwrap();
    assert!(path.iter().all(|e| e.action == Action::Fly));
    assert_eq!(path.len(), 4);
}

#[test]
fn test_swim_across_pool() {
    // Pool of liquid 3 deep between two banks
    let mut world = CollisionGrid::new(8.0);
    world.fill(RectI::from_coords(0, 0, 20, 1), CollisionKind::Block);
    world.fill(RectI::from_coords(0, 1, 5, 4), CollisionKind::Block);
    world.fill(RectI::from_coords(12, 1, 20, 4), CollisionKind::Block);
    for x in 5..12 {
        for y in 1..4 {
            world.set_liquid(star_math::Vec2I::new(x, y), 1.0);
        }
    }

    let mut finder = PathFinder::new(
        &walker(5.0, 0.0),
        PathFinderParameters {
            swim_cost: 2.0,
            must_end_on_ground: false,
            ..Default::default()
        },
        Vec2F::new(8.0, 1.0),
        Vec2F::new(8.0, 3.0),
    );
    assert_eq!(finder.explore(&world, None), Some(true));
    let path = finder.result().unwrap();
    assert_chained(path);
    assert_eq!(path[0].action, Action::Swim);
    assert!(path.last().unwrap().target.position.y >= 2.0);
}
