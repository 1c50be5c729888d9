//! # star_ai - Actor Navigation and Behavior
//!
//! Path finding and decision making for scripted actors.
//!
//! ## Features
//!
//! - Platformer A* over walk, jump, fall, drop, swim and fly moves
//! - Incremental searches that spread their work over several ticks
//! - A path controller steering an [`ActorMovementController`] along a path
//! - JSON behavior trees with a per-instance blackboard
//!
//! ## Example
//!
//! ```ignore
//! use star_ai::prelude::*;
//!
//! let mut finder = PathFinder::new(&movement, PathFinderParameters::default(), from, to);
//! while finder.explore(&world, Some(100)).is_none() {}
//! if let Some(path) = finder.result() {
//!     for edge in path {
//!         println!("{} to {:?}", edge.action.name(), edge.target.position);
//!     }
//! }
//! ```
//!
//! [`ActorMovementController`]: star_physics::ActorMovementController

pub mod behavior;
pub mod error;
pub mod path_controller;
pub mod pathfinder;

pub mod prelude {
    pub use crate::behavior::{BehaviorContext, BehaviorNode, BehaviorStatus, BehaviorTree, Blackboard};
    pub use crate::error::{AiError, Result};
    pub use crate::path_controller::PathController;
    pub use crate::pathfinder::{Action, Edge, Node, Path, PathFinder, PathFinderParameters};
}

pub use prelude::*;
