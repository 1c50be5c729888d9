//! # star_physics - Tile Movement
//!
//! Bodies in the world are convex polys moved against the tile collision
//! grid, never against each other. Physics entities contribute moving
//! collision polys and force regions that other bodies react to.
//!
//! ## Features
//!
//! - **Collision kinds**: `Null`, `None`, `Platform`, `Dynamic`,
//!   `Slippery`, `Block` and [`CollisionSet`] masks over them
//! - **Movement controller**: sub-stepped integration, separating-axis
//!   corrections, platforms, slopes, sticky bodies, bounce
//! - **Actor controller**: walk, run, crouch, jump profiles, flying and
//!   additive movement modifiers
//! - **Replication**: both controllers are net elements
//!
//! ## Example
//!
//! ```ignore
//! use star_physics::prelude::*;
//!
//! let mut world = CollisionGrid::new(80.0);
//! world.fill(RectI::from_coords(0, -1, 20, 0), CollisionKind::Block);
//!
//! let mut body = MovementController::new(MovementParameters::default());
//! body.set_position(Vec2F::new(5.0, 3.0));
//! body.tick_master(1.0 / 60.0, &world);
//! ```

pub mod actor;
pub mod collision;
pub mod controller;
pub mod error;
pub mod forces;
pub mod parameters;

pub mod prelude {
    //! Common imports for movement
    pub use crate::actor::{ActorMovementController, Direction};
    pub use crate::collision::{CollisionBlock, CollisionGrid, CollisionKind, CollisionSet, CollisionWorld};
    pub use crate::controller::{CollisionResult, MovementController};
    pub use crate::error::{PhysicsError, Result};
    pub use crate::forces::{MovingCollision, MovingCollisionId, PhysicsCategoryFilter, PhysicsForceRegion};
    pub use crate::parameters::{
        ActorMovementModifiers, ActorMovementParameters, JumpProfile, MovementParameters,
    };
    pub use star_math::{PolyF, RectF, RectI, Vec2F, Vec2I};
}

pub use actor::{ActorMovementController, Direction};
pub use collision::{CollisionBlock, CollisionGrid, CollisionKind, CollisionSet, CollisionWorld};
pub use controller::{CollisionResult, CollisionScratch, MovementController};
pub use error::{PhysicsError, Result};
pub use forces::{MovingCollision, MovingCollisionId, PhysicsCategoryFilter, PhysicsForceRegion};
pub use parameters::{ActorMovementModifiers, ActorMovementParameters, JumpProfile, MovementParameters};
