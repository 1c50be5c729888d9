//! Lua scripting for entities, assets and commands
//!
//! A [`LuaRoot`] owns one interpreter per thread. Each scripted thing gets
//! a [`LuaContext`], an environment layered over the shared globals, and
//! usually drives it through a [`ScriptComponent`] which handles update
//! pacing, message handlers and the error state.
//!
//! Callback tables that need to borrow engine state (the world, the owning
//! entity) are registered per invocation through [`LuaCallbacks`] inside an
//! `mlua` scope, so scripts never hold references past the call.

pub mod callbacks;
pub mod component;
pub mod context;
pub mod convert;
pub mod error;
pub mod root;

pub use callbacks::{install_utility_callbacks, LuaCallbacks};
pub use component::{ScriptComponent, ScriptState};
pub use context::LuaContext;
pub use convert::{first_json, json_args, json_to_lua, lua_to_json};
pub use error::{ScriptError, ScriptResult};
pub use root::{LuaRoot, ScriptLoader};

pub use mlua;

pub mod prelude {
    pub use crate::{LuaCallbacks, LuaContext, LuaRoot, ScriptComponent, ScriptError, ScriptResult};
}
