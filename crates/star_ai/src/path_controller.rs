//! Drives an actor movement controller along a path found by [`PathFinder`]

use star_math::Vec2F;
use star_physics::{ActorMovementController, CollisionWorld, Direction};

use crate::pathfinder::{Action, Edge, Path, PathFinder, PathFinderParameters};

/// How far the target may move before the path is searched again
const REPLAN_DISTANCE: f32 = 1.0;
/// Horizontal slack when deciding an edge target was reached
const REACH_X: f32 = 0.2;
/// Extra seconds an edge may take beyond its nominal duration
const EDGE_GRACE: f32 = 1.0;

/// Follows paths toward a moving target, searching incrementally each tick
#[derive(Debug, Clone, Default)]
pub struct PathController {
    parameters: PathFinderParameters,
    target: Option<Vec2F>,
    finder: Option<PathFinder>,
    path: Option<Path>,
    edge_index: usize,
    edge_time: f32,
}

impl PathController {
    pub fn new(parameters: PathFinderParameters) -> Self {
        Self {
            parameters,
            ..Default::default()
        }
    }

    pub fn parameters(&self) -> &PathFinderParameters {
        &self.parameters
    }

    pub fn set_parameters(&mut self, parameters: PathFinderParameters) {
        self.parameters = parameters;
        self.reset();
    }

    pub fn target(&self) -> Option<Vec2F> {
        self.target
    }

    /// Remaining edges of the current path
    pub fn path(&self) -> Option<&[Edge]> {
        self.path.as_ref().map(|path| &path[self.edge_index.min(path.len())..])
    }

    pub fn current_action(&self) -> Option<Action> {
        self.path
            .as_ref()
            .and_then(|path| path.get(self.edge_index))
            .map(|edge| edge.action)
    }

    /// Drop the current path and any search in progress
    pub fn reset(&mut self) {
        self.target = None;
        self.finder = None;
        self.path = None;
        self.edge_index = 0;
        self.edge_time = 0.0;
    }

    /// Apply one tick of controls moving `actor` toward `target`.
    ///
    /// Returns `Some(true)` once the actor stands at the target,
    /// `Some(false)` when no path exists and `None` while still working.
    pub fn control_path_move(
        &mut self,
        actor: &mut ActorMovementController,
        world: &dyn CollisionWorld,
        target: Vec2F,
        run: bool,
        dt: f32,
    ) -> Option<bool> {
        let position = actor.position();
        if actor.on_ground()
            && (position.x - target.x).abs() <= 0.5
            && (position.y - target.y).abs() <= 1.0
        {
            self.path = None;
            return Some(true);
        }

        let moved = self
            .target
            .map_or(true, |old| (old - target).length() > REPLAN_DISTANCE);
        if moved {
            self.start_search(actor, target);
        }

        if let Some(finder) = self.finder.as_mut() {
            let rate = actor.active_parameters().path_explore_rate.unwrap_or(100.0);
            let budget = ((rate * dt).ceil() as usize).max(1);
            match finder.explore(world, Some(budget)) {
                None => {}
                Some(true) => {
                    self.path = finder.result().cloned();
                    self.edge_index = 0;
                    self.edge_time = 0.0;
                    self.finder = None;
                }
                Some(false) => {
                    log::debug!("no path from {:?} to {:?}", position, target);
                    self.finder = None;
                    self.path = None;
                    return Some(false);
                }
            }
        }

        let Some(path) = self.path.as_ref() else {
            return None;
        };
        let Some(edge) = path.get(self.edge_index).cloned() else {
            // Paths end within a tile of the target, close the rest on foot
            if actor.on_ground() && (position.y - target.y).abs() <= 1.0 {
                if let Some(direction) = Direction::from_sign(target.x - position.x) {
                    actor.control_move(direction, false);
                }
            } else {
                self.start_search(actor, target);
            }
            return None;
        };

        if self.edge_reached(actor, &edge) {
            self.edge_index += 1;
            self.edge_time = 0.0;
            return None;
        }

        self.edge_time += dt;
        if self.edge_time > edge_duration(&edge) + EDGE_GRACE {
            log::debug!("{} edge timed out at {:?}, replanning", edge.action.name(), position);
            self.start_search(actor, target);
            return None;
        }

        apply_controls(actor, &edge, run);
        None
    }

    fn start_search(&mut self, actor: &ActorMovementController, target: Vec2F) {
        let movement = actor.active_parameters();
        self.finder = Some(PathFinder::new(
            &movement,
            self.parameters.clone(),
            actor.position(),
            target,
        ));
        self.target = Some(target);
        self.path = None;
        self.edge_index = 0;
        self.edge_time = 0.0;
    }

    fn edge_reached(&self, actor: &ActorMovementController, edge: &Edge) -> bool {
        let position = actor.position();
        let target = edge.target.position;
        let dx = (position.x - target.x).abs();
        match edge.action {
            Action::Walk | Action::Land => {
                if edge.target.is_resting() {
                    actor.on_ground() && dx <= REACH_X && (position.y - target.y).abs() < 0.5
                } else {
                    // Walking off a ledge is done once the actor is airborne past it
                    !actor.on_ground() || dx <= REACH_X
                }
            }
            Action::Drop => !actor.on_ground() || position.y <= target.y,
            Action::Jump | Action::Arc => match edge.target.velocity {
                Some(_) => {
                    let dy = (position.y - target.y).abs();
                    (dx <= 0.5 && dy <= 0.5) || (actor.on_ground() && edge.action == Action::Arc)
                }
                None => actor.on_ground() && dx <= 0.5,
            },
            Action::Swim | Action::Fly => (position - target).length() <= REACH_X * 2.0,
        }
    }
}

/// Nominal time to traverse an edge at its velocity
fn edge_duration(edge: &Edge) -> f32 {
    let distance = (edge.target.position - edge.source.position).length();
    let speed = edge.velocity.length();
    if speed > 0.0 {
        distance / speed
    } else {
        1.0
    }
}

fn apply_controls(actor: &mut ActorMovementController, edge: &Edge, run: bool) {
    let position = actor.position();
    let target = edge.target.position;
    let toward = Direction::from_sign(target.x - position.x);
    match edge.action {
        Action::Walk => {
            if let Some(direction) = toward {
                actor.control_move(direction, run);
            }
        }
        Action::Jump => {
            actor.control_jump();
            if let Some(direction) = Direction::from_sign(edge.velocity.x) {
                actor.control_move(direction, run);
            }
        }
        Action::Arc => {
            if actor.velocity().y > 0.0 {
                actor.control_jump();
            }
            let heading = edge
                .target
                .velocity
                .map(|v| v.x)
                .filter(|vx| *vx != 0.0)
                .unwrap_or(edge.velocity.x);
            if let Some(direction) = Direction::from_sign(heading) {
                actor.control_move(direction, run);
            }
        }
        Action::Drop => actor.control_down(),
        Action::Swim | Action::Fly => {
            let offset = target - position;
            if offset.length() > 0.0 {
                actor.control_fly(offset.normalize());
            }
        }
        Action::Land => {
            if let Some(direction) = toward {
                if (target.x - position.x).abs() > REACH_X {
                    actor.control_move(direction, false);
                }
            }
        }
    }
}
