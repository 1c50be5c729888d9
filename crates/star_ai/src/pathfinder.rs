//! Platformer path finding
//!
//! A* over a graph whose nodes are body positions, optionally with a
//! velocity. Resting nodes stand on ground, float in liquid or hover in
//! zero gravity; moving nodes are points along a ballistic arc. Jump and
//! fall edges are produced by integrating the arc against tile collision,
//! so every edge is one the actor can physically take.
//!
//! Node identity is the 1-tile grid cell of the body's feet plus a
//! quantized velocity. Arc nodes keep their exact position so that
//! consecutive arc segments do not accumulate rounding drift.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use star_math::{RectF, Vec2F, Vec2I};
use star_physics::{ActorMovementParameters, CollisionBlock, CollisionSet, CollisionWorld};

/// Inset applied to the body before testing it against tiles
const COLLISION_MARGIN: f32 = 0.05;
/// Distance an arc moves per integration step
const ARC_STEP: f32 = 0.1;
const MAX_ARC_DT: f32 = 0.05;
const MAX_ARC_STEPS: usize = 2000;
/// Velocity buckets per tile/s used for node identity
const VELOCITY_QUANTA: f32 = 4.0;

/// How an edge is traversed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Walk,
    Jump,
    Arc,
    Drop,
    Swim,
    Fly,
    Land,
}

impl Action {
    pub fn name(self) -> &'static str {
        match self {
            Action::Walk => "walk",
            Action::Jump => "jump",
            Action::Arc => "arc",
            Action::Drop => "drop",
            Action::Swim => "swim",
            Action::Fly => "fly",
            Action::Land => "land",
        }
    }
}

/// A body position, moving when `velocity` is set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node {
    pub position: Vec2F,
    pub velocity: Option<Vec2F>,
}

impl Node {
    pub fn resting(position: Vec2F) -> Self {
        Self {
            position,
            velocity: None,
        }
    }

    pub fn moving(position: Vec2F, velocity: Vec2F) -> Self {
        Self {
            position,
            velocity: Some(velocity),
        }
    }

    pub fn is_resting(&self) -> bool {
        self.velocity.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub cost: f32,
    pub action: Action,
    /// Velocity the actor should have while traversing the edge
    pub velocity: Vec2F,
    pub source: Node,
    pub target: Node,
}

pub type Path = Vec<Edge>;

/// Search tuning, read from JSON as `pathFinder` config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PathFinderParameters {
    /// On failure, return the path to the node closest to the target
    pub return_best: bool,
    /// Only accept a goal node that rests on ground
    pub must_end_on_ground: bool,
    /// Also try jumps at walking speed, not just standing and running
    pub enable_walk_speed_jumps: bool,
    pub swim_cost: f32,
    /// Weight of distance travelled while rising after a jump
    pub jump_cost: f32,
    pub liquid_jump_cost: f32,
    pub drop_cost: f32,
    /// Takeoff speed multiplier for the short jump variant
    pub small_jump_multiplier: f32,
    /// Horizontal speed, relative to walk speed, of the slow apex variant
    pub jump_drop_x_multiplier: f32,
    /// Nodes further than this from the source are never visited
    pub max_distance: f32,
    pub max_f_score: Option<f32>,
    pub max_nodes_to_search: Option<usize>,
    /// Arcs landing faster than this (a negative speed) are discarded
    pub max_landing_velocity: Option<f32>,
    /// Body bounds, defaulting to the standing poly's bounds
    pub bound_box: Option<RectF>,
}

impl Default for PathFinderParameters {
    fn default() -> Self {
        Self {
            return_best: false,
            must_end_on_ground: true,
            enable_walk_speed_jumps: true,
            swim_cost: 40.0,
            jump_cost: 3.0,
            liquid_jump_cost: 10.0,
            drop_cost: 3.0,
            small_jump_multiplier: 0.75,
            jump_drop_x_multiplier: 0.125,
            max_distance: 50.0,
            max_f_score: None,
            max_nodes_to_search: None,
            max_landing_velocity: None,
            bound_box: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct NodeKey {
    cell: Vec2I,
    velocity: Option<(i32, i32)>,
}

#[derive(Debug, Clone, Copy)]
struct OpenNode {
    key: NodeKey,
    f_score: f32,
}

impl PartialEq for OpenNode {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for OpenNode {}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f_score
            .partial_cmp(&self.f_score)
            .unwrap_or(Ordering::Equal)
    }
}

#[derive(Debug, Clone)]
struct NodeRecord {
    node: Node,
    g_score: f32,
    came_from: Option<Edge>,
}

/// Incremental A* search from one body position to another.
///
/// Drive it with [`PathFinder::explore`] until it returns `Some`; the
/// search keeps its frontier between calls so the work can be spread
/// across ticks.
#[derive(Debug, Clone)]
pub struct PathFinder {
    parameters: PathFinderParameters,
    movement: ActorMovementParameters,
    bound_box: RectF,
    source: Vec2F,
    target: Vec2F,

    open: BinaryHeap<OpenNode>,
    records: HashMap<NodeKey, NodeRecord>,
    closed: HashSet<NodeKey>,
    started: bool,
    searched: usize,
    best: Option<(NodeKey, f32)>,

    found: Option<bool>,
    result: Option<Path>,
}

impl PathFinder {
    /// Search from actor position `source` to `target` for an actor moving
    /// with `movement`
    pub fn new(
        movement: &ActorMovementParameters,
        parameters: PathFinderParameters,
        source: Vec2F,
        target: Vec2F,
    ) -> Self {
        let movement = ActorMovementParameters::sensible_defaults().merge(movement);
        let bound_box = parameters.bound_box.unwrap_or_else(|| {
            movement
                .standing_poly
                .as_ref()
                .map(|poly| poly.bound_box())
                .unwrap_or_else(|| RectF::with_center(Vec2F::ZERO, Vec2F::ONE))
        });
        Self {
            parameters,
            movement,
            bound_box,
            source,
            target,
            open: BinaryHeap::new(),
            records: HashMap::new(),
            closed: HashSet::new(),
            started: false,
            searched: 0,
            best: None,
            found: None,
            result: None,
        }
    }

    pub fn parameters(&self) -> &PathFinderParameters {
        &self.parameters
    }

    pub fn source(&self) -> Vec2F {
        self.source
    }

    pub fn target(&self) -> Vec2F {
        self.target
    }

    /// Nodes expanded so far
    pub fn searched_nodes(&self) -> usize {
        self.searched
    }

    /// The found path, or the best partial path when `return_best` is set
    /// and the search failed
    pub fn result(&self) -> Option<&Path> {
        self.result.as_ref()
    }

    /// Expand up to `max_nodes` nodes (unbounded with `None`).
    ///
    /// Returns `None` while the search is still going, `Some(true)` once a
    /// path was found and `Some(false)` when the search is exhausted.
    pub fn explore(&mut self, world: &dyn CollisionWorld, max_nodes: Option<usize>) -> Option<bool> {
        if let Some(found) = self.found {
            return Some(found);
        }
        if !self.started {
            self.start(world);
        }

        let mut budget = max_nodes;
        let mut edges = Vec::new();
        while let Some(open) = self.open.pop() {
            if self.closed.contains(&open.key) {
                continue;
            }
            if let Some(remaining) = budget.as_mut() {
                if *remaining == 0 {
                    self.open.push(open);
                    return None;
                }
                *remaining -= 1;
            }
            if self
                .parameters
                .max_f_score
                .is_some_and(|max| open.f_score > max)
            {
                break;
            }
            if self
                .parameters
                .max_nodes_to_search
                .is_some_and(|max| self.searched >= max)
            {
                break;
            }

            let Some(record) = self.records.get(&open.key) else {
                continue;
            };
            let node = record.node;
            let g_score = record.g_score;
            self.closed.insert(open.key);
            self.searched += 1;

            if self.is_goal(world, &node) {
                self.result = Some(self.reconstruct(open.key));
                self.found = Some(true);
                return Some(true);
            }
            self.track_best(world, open.key, &node);

            edges.clear();
            self.neighbors(world, &node, &mut edges);
            for edge in edges.drain(..) {
                let key = self.key(&edge.target);
                if self.closed.contains(&key) {
                    continue;
                }
                if (edge.target.position - self.source).length() > self.parameters.max_distance {
                    continue;
                }
                let tentative = g_score + edge.cost;
                let better = self
                    .records
                    .get(&key)
                    .map_or(true, |existing| tentative < existing.g_score);
                if better {
                    let f_score = tentative + self.heuristic(edge.target.position);
                    self.records.insert(
                        key,
                        NodeRecord {
                            node: edge.target,
                            g_score: tentative,
                            came_from: Some(edge),
                        },
                    );
                    self.open.push(OpenNode { key, f_score });
                }
            }
        }

        log::trace!(
            "Path search from {:?} to {:?} failed after {} nodes",
            self.source,
            self.target,
            self.searched
        );
        if self.parameters.return_best {
            self.result = self.best.map(|(key, _)| self.reconstruct(key));
        }
        self.found = Some(false);
        Some(false)
    }

    fn start(&mut self, world: &dyn CollisionWorld) {
        self.started = true;
        let rest = self.snap(self.source);
        let node = if self.valid(world, rest) && self.supported(world, rest) {
            Node::resting(rest)
        } else {
            Node::moving(self.source, Vec2F::ZERO)
        };
        let key = self.key(&node);
        self.records.insert(
            key,
            NodeRecord {
                node,
                g_score: 0.0,
                came_from: None,
            },
        );
        self.open.push(OpenNode {
            key,
            f_score: self.heuristic(node.position),
        });
    }

    fn reconstruct(&self, mut key: NodeKey) -> Path {
        let mut path = Vec::new();
        while let Some(edge) = self.records.get(&key).and_then(|r| r.came_from) {
            path.push(edge);
            key = self.key(&edge.source);
        }
        path.reverse();
        path
    }

    fn track_best(&mut self, world: &dyn CollisionWorld, key: NodeKey, node: &Node) {
        if !self.parameters.return_best {
            return;
        }
        if self.parameters.must_end_on_ground
            && !(node.is_resting() && self.on_ground(world, node.position))
        {
            return;
        }
        let h = self.heuristic(node.position);
        if self.best.map_or(true, |(_, best)| h < best) {
            self.best = Some((key, h));
        }
    }

    fn is_goal(&self, world: &dyn CollisionWorld, node: &Node) -> bool {
        let offset = (node.position - self.target).abs();
        if offset.x > 1.0 || offset.y > 1.0 {
            return false;
        }
        !self.parameters.must_end_on_ground
            || (node.is_resting() && self.on_ground(world, node.position))
    }

    /// Deliberately inflated so the search stays narrow
    fn heuristic(&self, position: Vec2F) -> f32 {
        let d = (position - self.target).abs();
        2.0 * (d.x + d.y)
    }

    fn key(&self, node: &Node) -> NodeKey {
        NodeKey {
            cell: Vec2I::new(
                node.position.x.round() as i32,
                self.feet(node.position).round() as i32,
            ),
            velocity: node.velocity.map(|v| {
                (
                    (v.x * VELOCITY_QUANTA).round() as i32,
                    (v.y * VELOCITY_QUANTA).round() as i32,
                )
            }),
        }
    }

    // Geometry. Positions are actor positions; the body is `bound_box`
    // translated there and its feet are the bottom edge.

    fn feet(&self, position: Vec2F) -> f32 {
        position.y + self.bound_box.min.y
    }

    /// Nearest position with the feet on a tile boundary
    fn snap(&self, position: Vec2F) -> Vec2F {
        Vec2F::new(
            position.x.round(),
            self.feet(position).round() - self.bound_box.min.y,
        )
    }

    fn body(&self, position: Vec2F) -> RectF {
        self.bound_box.translated(position)
    }

    fn valid(&self, world: &dyn CollisionWorld, position: Vec2F) -> bool {
        let body = self.body(position).padded(-COLLISION_MARGIN);
        !world.rect_collision(body.to_tiles(), CollisionSet::BLOCK)
    }

    /// Row of tiles directly under the feet; only meaningful with the feet
    /// on a tile boundary
    fn ground_probe(&self, position: Vec2F) -> RectF {
        let body = self.body(position);
        RectF::from_coords(
            body.min.x + COLLISION_MARGIN,
            body.min.y - COLLISION_MARGIN,
            body.max.x - COLLISION_MARGIN,
            body.min.y,
        )
    }

    fn on_ground(&self, world: &dyn CollisionWorld, position: Vec2F) -> bool {
        world.rect_collision(self.ground_probe(position).to_tiles(), CollisionSet::DEFAULT)
    }

    fn on_solid_ground(&self, world: &dyn CollisionWorld, position: Vec2F) -> bool {
        world.rect_collision(self.ground_probe(position).to_tiles(), CollisionSet::BLOCK)
    }

    fn in_liquid(&self, world: &dyn CollisionWorld, position: Vec2F) -> bool {
        let threshold = self.movement.minimum_liquid_percentage.unwrap_or(0.5);
        world.liquid_percentage(&self.body(position)) >= threshold
    }

    fn gravity(&self, world: &dyn CollisionWorld, position: Vec2F) -> f32 {
        if !self.movement.gravity_enabled.unwrap_or(true) {
            return 0.0;
        }
        world.gravity(position) * self.movement.gravity_multiplier.unwrap_or(1.0)
    }

    /// Whether a body can stay at rest here
    fn supported(&self, world: &dyn CollisionWorld, position: Vec2F) -> bool {
        self.on_ground(world, position)
            || self.in_liquid(world, position)
            || self.gravity(world, position) == 0.0
    }

    /// Whether every solid tile the body would overlap is a partial slope
    fn blocked_by_ramp(&self, world: &dyn CollisionWorld, position: Vec2F) -> bool {
        let mut blocks = Vec::new();
        let region = self.body(position).padded(-COLLISION_MARGIN).to_tiles();
        world.collision_blocks(region, &mut blocks);
        let mut solids = blocks
            .iter()
            .filter(|block| CollisionSet::BLOCK.contains(block.kind))
            .peekable();
        solids.peek().is_some() && solids.all(|block| !is_full_tile(block))
    }

    fn walk_speed(&self) -> f32 {
        self.movement.walk_speed.unwrap_or(0.0)
    }

    fn run_speed(&self) -> f32 {
        self.movement.run_speed.unwrap_or(0.0)
    }

    // Edge generation

    fn neighbors(&self, world: &dyn CollisionWorld, node: &Node, out: &mut Vec<Edge>) {
        match node.velocity {
            None => self.rest_edges(world, node, out),
            Some(velocity) => self.moving_edges(world, node, velocity, out),
        }
    }

    fn rest_edges(&self, world: &dyn CollisionWorld, node: &Node, out: &mut Vec<Edge>) {
        let position = node.position;
        if self.gravity(world, position) == 0.0 {
            let speed = self.movement.fly_speed.unwrap_or(0.0);
            self.eight_way(world, node, Action::Fly, 1.0, speed, out);
            return;
        }

        let in_liquid = self.in_liquid(world, position);
        if in_liquid {
            self.eight_way(world, node, Action::Swim, self.parameters.swim_cost, self.walk_speed(), out);
        }
        if self.on_ground(world, position) {
            self.walk_edges(world, node, out);
            self.drop_edges(world, node, out);
        }
        self.jump_edges(world, node, in_liquid, out);
    }

    fn eight_way(
        &self,
        world: &dyn CollisionWorld,
        node: &Node,
        action: Action,
        weight: f32,
        speed: f32,
        out: &mut Vec<Edge>,
    ) {
        for dy in -1..=1 {
            for dx in -1..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let offset = Vec2F::new(dx as f32, dy as f32);
                let target = node.position + offset;
                if !self.valid(world, target) {
                    continue;
                }
                // No squeezing between diagonal corners
                if dx != 0
                    && dy != 0
                    && (!self.valid(world, node.position + Vec2F::new(offset.x, 0.0))
                        || !self.valid(world, node.position + Vec2F::new(0.0, offset.y)))
                {
                    continue;
                }
                if action == Action::Swim
                    && !self.in_liquid(world, target)
                    && !self.on_ground(world, target)
                {
                    continue;
                }
                push_edge(
                    out,
                    action,
                    weight,
                    offset.normalize() * speed,
                    *node,
                    Node::resting(target),
                );
            }
        }
    }

    fn walk_edges(&self, world: &dyn CollisionWorld, node: &Node, out: &mut Vec<Edge>) {
        let walk = self.walk_speed();
        let run = self.run_speed();
        if walk <= 0.0 && run <= 0.0 {
            return;
        }
        for direction in [-1.0f32, 1.0] {
            let side = node.position + Vec2F::new(direction, 0.0);
            let speed = if walk > 0.0 { walk } else { run };
            let velocity = Vec2F::new(direction * speed, 0.0);
            if self.valid(world, side) {
                if self.on_ground(world, side) {
                    push_edge(out, Action::Walk, 1.0, velocity, *node, Node::resting(side));
                    continue;
                }
                let below = side - Vec2F::Y;
                if self.valid(world, below) && self.on_ground(world, below) {
                    push_edge(out, Action::Walk, 1.0, velocity, *node, Node::resting(below));
                    continue;
                }
                // Walking off the ledge starts a fall at walking or running speed
                for speed in distinct_speeds(&[walk, run]) {
                    let carried = Vec2F::new(direction * speed, 0.0);
                    push_edge(out, Action::Walk, 1.0, carried, *node, Node::moving(side, carried));
                }
            } else {
                let above = side + Vec2F::Y;
                if self.valid(world, above)
                    && self.on_ground(world, above)
                    && self.blocked_by_ramp(world, side)
                {
                    push_edge(out, Action::Walk, 1.0, velocity, *node, Node::resting(above));
                }
            }
        }
    }

    fn drop_edges(&self, world: &dyn CollisionWorld, node: &Node, out: &mut Vec<Edge>) {
        if self.on_solid_ground(world, node.position) {
            return;
        }
        let below = node.position - Vec2F::Y;
        if !self.valid(world, below) {
            return;
        }
        let target = if self.on_ground(world, below) {
            Node::resting(below)
        } else {
            Node::moving(below, Vec2F::ZERO)
        };
        push_edge(out, Action::Drop, self.parameters.drop_cost, Vec2F::ZERO, *node, target);
    }

    fn jump_edges(
        &self,
        world: &dyn CollisionWorld,
        node: &Node,
        in_liquid: bool,
        out: &mut Vec<Edge>,
    ) {
        let profile = if in_liquid {
            self.movement.liquid_jump()
        } else {
            self.movement.air_jump()
        };
        let jump_speed = profile.jump_speed.unwrap_or(0.0);
        if jump_speed <= 0.0 {
            return;
        }
        let mut speeds = vec![self.run_speed()];
        if self.parameters.enable_walk_speed_jumps {
            speeds.push(self.walk_speed());
        }
        let mut x_velocities = vec![0.0];
        for speed in distinct_speeds(&speeds) {
            x_velocities.push(speed);
            x_velocities.push(-speed);
        }
        for multiplier in [1.0, self.parameters.small_jump_multiplier] {
            for &vx in &x_velocities {
                let velocity = Vec2F::new(vx, jump_speed * multiplier);
                self.simulate_arc(world, node, velocity, Action::Jump, in_liquid, out);
            }
        }
    }

    fn moving_edges(
        &self,
        world: &dyn CollisionWorld,
        node: &Node,
        velocity: Vec2F,
        out: &mut Vec<Edge>,
    ) {
        let feet = self.feet(node.position);
        let on_boundary = (feet - feet.round()).abs() < 1e-3;
        if velocity.y <= 0.0 && on_boundary && self.on_ground(world, node.position) {
            if self
                .parameters
                .max_landing_velocity
                .is_some_and(|max| velocity.y < max)
            {
                return;
            }
            let y = self.snap(node.position).y;
            let x = node.position.x;
            for candidate in [x.round(), x.floor(), x.ceil()] {
                let rest = Vec2F::new(candidate, y);
                if self.valid(world, rest) && self.on_ground(world, rest) {
                    push_edge(out, Action::Land, 0.0, Vec2F::ZERO, *node, Node::resting(rest));
                    return;
                }
            }
            return;
        }
        let in_liquid = self.in_liquid(world, node.position);
        self.simulate_arc(world, node, velocity, Action::Arc, in_liquid, out);
    }

    /// Weight of arc distance: rising costs like a jump
    fn arc_weight(&self, velocity: Vec2F, in_liquid: bool) -> f32 {
        if velocity.y > 0.0 {
            if in_liquid {
                self.parameters.liquid_jump_cost
            } else {
                self.parameters.jump_cost
            }
        } else {
            1.0
        }
    }

    /// Integrate from `source` with `velocity` until the body reaches a new
    /// grid cell, lands, enters liquid or peaks. A peak forks into one edge
    /// per mid-air horizontal speed choice.
    fn simulate_arc(
        &self,
        world: &dyn CollisionWorld,
        source: &Node,
        velocity: Vec2F,
        action: Action,
        in_liquid: bool,
        out: &mut Vec<Edge>,
    ) {
        let gravity = self.gravity(world, source.position);
        if gravity <= 0.0 {
            return;
        }
        let weight = self.arc_weight(velocity, in_liquid);
        let start_cell = self.key(&Node::resting(source.position)).cell;
        let mut position = source.position;
        let mut current = velocity;
        let mut was_in_liquid = in_liquid;

        for _ in 0..MAX_ARC_STEPS {
            let speed = current.x.abs().max(current.y.abs()).max(1.0);
            let dt = (ARC_STEP / speed).min(MAX_ARC_DT);
            let rising = current.y > 0.0;
            current.y -= gravity * dt;

            let mut next = position;
            if current.x != 0.0 {
                next.x += current.x * dt;
                if !self.valid(world, next) {
                    // A wall ends the rise; the arc peaks here
                    next.x = position.x;
                    current.x = 0.0;
                    if rising {
                        current.y = current.y.min(0.0);
                    }
                }
            }
            next.y += current.y * dt;
            if current.y > 0.0 {
                if !self.valid(world, next) {
                    // Ceiling
                    next.y = position.y;
                    current.y = 0.0;
                }
            } else {
                let from = self.feet(position);
                let to = self.feet(next);
                let boundary = from.floor();
                if to < boundary {
                    let landed = Vec2F::new(next.x, boundary - self.bound_box.min.y);
                    if self.on_ground(world, landed) && self.valid(world, landed) {
                        push_edge(out, action, weight, velocity, *source, Node::moving(landed, current));
                        return;
                    }
                }
                if !self.valid(world, next) {
                    return;
                }
            }

            position = next;
            if rising && current.y <= 0.0 {
                for vx in self.apex_velocities(velocity.x) {
                    let target = Node::moving(position, Vec2F::new(vx, current.y));
                    push_edge(out, action, weight, velocity, *source, target);
                }
                return;
            }
            let now_in_liquid = self.in_liquid(world, position);
            if now_in_liquid && !was_in_liquid {
                let rest = self.snap(position);
                if self.valid(world, rest) {
                    push_edge(out, action, weight, velocity, *source, Node::resting(rest));
                }
                return;
            }
            was_in_liquid = now_in_liquid;
            if (position - self.source).length() > self.parameters.max_distance {
                return;
            }
            if self.key(&Node::resting(position)).cell != start_cell {
                push_edge(out, action, weight, velocity, *source, Node::moving(position, current));
                return;
            }
        }
    }

    /// Horizontal speeds the actor may switch to at the top of a jump
    /// that left the ground at `jump_x`
    fn apex_velocities(&self, jump_x: f32) -> Vec<f32> {
        let walk = self.walk_speed();
        let mut speeds = Vec::new();
        for speed in distinct_speeds(&[
            self.run_speed(),
            walk,
            walk * self.parameters.jump_drop_x_multiplier,
        ]) {
            speeds.push(speed);
            speeds.push(-speed);
        }
        if jump_x == 0.0 {
            speeds.push(0.0);
        }
        speeds
    }
}

fn push_edge(
    out: &mut Vec<Edge>,
    action: Action,
    weight: f32,
    velocity: Vec2F,
    source: Node,
    target: Node,
) {
    let cost = (target.position - source.position).length() * weight;
    out.push(Edge {
        cost,
        action,
        velocity,
        source,
        target,
    });
}

/// Positive speeds with duplicates removed, in input order
fn distinct_speeds(speeds: &[f32]) -> Vec<f32> {
    let mut out: Vec<f32> = Vec::new();
    for &speed in speeds {
        if speed > 0.0 && !out.iter().any(|s| (s - speed).abs() < 1e-4) {
            out.push(speed);
        }
    }
    out
}

fn is_full_tile(block: &CollisionBlock) -> bool {
    let tile = RectF::with_size(block.space.to_f32(), Vec2F::ONE);
    block.poly.len() == 4
        && (block.poly_bounds.min - tile.min).length() < 1e-4
        && (block.poly_bounds.max - tile.max).length() < 1e-4
}

#[cfg(test)]
mod tests {
    use super::*;
    use star_math::{PolyF, RectI};
    use star_physics::{CollisionGrid, CollisionKind, JumpProfile};

    fn feet_body() -> PolyF {
        PolyF::from_rect(&RectF::from_coords(-0.5, 0.0, 0.5, 1.0))
    }

    fn walker() -> ActorMovementParameters {
        ActorMovementParameters {
            standing_poly: Some(feet_body()),
            walk_speed: Some(5.0),
            air_jump_profile: Some(JumpProfile {
                jump_speed: Some(8.0),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn floor(width: i32) -> CollisionGrid {
        let mut grid = CollisionGrid::new(8.0);
        grid.fill(RectI::from_coords(0, 0, width, 1), CollisionKind::Block);
        grid
    }

    #[test]
    fn test_walk_along_floor() {
        let world = floor(10);
        let mut finder = PathFinder::new(
            &walker(),
            PathFinderParameters::default(),
            Vec2F::new(1.0, 1.0),
            Vec2F::new(6.0, 1.0),
        );
        assert_eq!(finder.explore(&world, None), Some(true));
        let path = finder.result().unwrap();
        assert!(path.iter().all(|edge| edge.action == Action::Walk));
        assert_eq!(path.len(), 4);
        assert_eq!(path.last().unwrap().target.position, Vec2F::new(5.0, 1.0));
    }

    #[test]
    fn test_source_is_snapped_to_rest() {
        let world = floor(10);
        let mut finder = PathFinder::new(
            &walker(),
            PathFinderParameters::default(),
            Vec2F::new(1.2, 1.03),
            Vec2F::new(3.0, 1.0),
        );
        assert_eq!(finder.explore(&world, None), Some(true));
        let first = finder.result().unwrap()[0];
        assert_eq!(first.source, Node::resting(Vec2F::new(1.0, 1.0)));
    }

    #[test]
    fn test_step_down_is_a_walk() {
        let mut world = floor(10);
        world.fill(RectI::from_coords(0, 1, 3, 2), CollisionKind::Block);
        let mut finder = PathFinder::new(
            &walker(),
            PathFinderParameters::default(),
            Vec2F::new(1.0, 2.0),
            Vec2F::new(6.0, 1.0),
        );
        assert_eq!(finder.explore(&world, None), Some(true));
        let path = finder.result().unwrap();
        assert!(path.iter().all(|edge| edge.action == Action::Walk));
    }

    #[test]
    fn test_apex_forks_include_vertical_only_for_vertical_jumps() {
        let finder = PathFinder::new(
            &walker(),
            PathFinderParameters::default(),
            Vec2F::ZERO,
            Vec2F::ZERO,
        );
        let vertical = finder.apex_velocities(0.0);
        let sideways = finder.apex_velocities(5.0);
        assert!(vertical.contains(&0.0));
        assert!(!sideways.contains(&0.0));
        assert!(sideways.contains(&0.625));
        assert!(sideways.contains(&-5.0));
    }

    #[test]
    fn test_wall_contact_ends_the_rise() {
        let mut world = floor(10);
        world.fill(RectI::from_coords(3, 1, 4, 6), CollisionKind::Block);
        let finder = PathFinder::new(
            &walker(),
            PathFinderParameters::default(),
            Vec2F::new(2.5, 1.0),
            Vec2F::new(8.0, 1.0),
        );
        let source = Node::resting(Vec2F::new(2.5, 1.0));
        let mut edges = Vec::new();
        finder.simulate_arc(&world, &source, Vec2F::new(5.0, 8.0), Action::Jump, false, &mut edges);

        assert!(!edges.is_empty());
        for edge in &edges {
            let velocity = edge.target.velocity.unwrap();
            assert!(velocity.y <= 0.0, "still rising after the wall: {:?}", velocity);
            assert_ne!(velocity.x, 0.0);
            assert!(edge.target.position.x <= 2.5);
        }
        assert!(edges.iter().any(|e| e.target.velocity.unwrap().x < 0.0));
    }

    #[test]
    fn test_distinct_speeds() {
        assert_eq!(distinct_speeds(&[5.0, 5.0, 0.0, 2.0]), vec![5.0, 2.0]);
    }
}
