//! Promises for entity messages
//!
//! A message sent with `world.sendEntityMessage` may be answered later in
//! the step, or several steps later when it crosses the network. The caller
//! keeps an [`RpcPromise`]; the world keeps a clone and fulfills it.

use std::cell::RefCell;
use std::rc::Rc;

use star_core::Json;
use star_script::json_to_lua;
use star_script::mlua::{UserData, UserDataMethods, Value};

#[derive(Debug, Clone, PartialEq)]
enum RpcState {
    Pending,
    Fulfilled(Json),
    Failed(String),
}

/// Shared handle to the outcome of one message
#[derive(Debug, Clone)]
pub struct RpcPromise {
    state: Rc<RefCell<RpcState>>,
}

impl Default for RpcPromise {
    fn default() -> Self {
        Self::pending()
    }
}

impl RpcPromise {
    pub fn pending() -> Self {
        Self {
            state: Rc::new(RefCell::new(RpcState::Pending)),
        }
    }

    pub fn resolved(value: Json) -> Self {
        Self {
            state: Rc::new(RefCell::new(RpcState::Fulfilled(value))),
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            state: Rc::new(RefCell::new(RpcState::Failed(error.into()))),
        }
    }

    /// First completion wins
    pub fn fulfill(&self, value: Json) {
        let mut state = self.state.borrow_mut();
        if *state == RpcState::Pending {
            *state = RpcState::Fulfilled(value);
        }
    }

    pub fn fail(&self, error: impl Into<String>) {
        let mut state = self.state.borrow_mut();
        if *state == RpcState::Pending {
            *state = RpcState::Failed(error.into());
        }
    }

    pub fn complete(&self, result: std::result::Result<Json, String>) {
        match result {
            Ok(value) => self.fulfill(value),
            Err(error) => self.fail(error),
        }
    }

    pub fn finished(&self) -> bool {
        *self.state.borrow() != RpcState::Pending
    }

    pub fn succeeded(&self) -> bool {
        matches!(*self.state.borrow(), RpcState::Fulfilled(_))
    }

    pub fn result(&self) -> Option<Json> {
        match &*self.state.borrow() {
            RpcState::Fulfilled(value) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<String> {
        match &*self.state.borrow() {
            RpcState::Failed(error) => Some(error.clone()),
            _ => None,
        }
    }
}

impl UserData for RpcPromise {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("finished", |_, this, ()| Ok(this.finished()));
        methods.add_method("succeeded", |_, this, ()| Ok(this.succeeded()));
        methods.add_method("result", |lua, this, ()| match this.result() {
            Some(value) => json_to_lua(lua, &value),
            None => Ok(Value::Nil),
        });
        methods.add_method("error", |_, this, ()| Ok(this.error()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_completion_wins() {
        let promise = RpcPromise::pending();
        let keeper = promise.clone();
        assert!(!promise.finished());

        keeper.fulfill(json!(3));
        keeper.fail("late");
        assert!(promise.finished());
        assert!(promise.succeeded());
        assert_eq!(promise.result(), Some(json!(3)));
        assert_eq!(promise.error(), None);
    }

    #[test]
    fn test_promise_from_lua() {
        let lua = star_script::mlua::Lua::new();
        let promise = RpcPromise::rejected("no handler");
        lua.globals().set("p", promise).unwrap();
        let (finished, ok, err): (bool, bool, String) = lua
            .load("return p:finished(), p:succeeded(), p:error()")
            .eval()
            .unwrap();
        assert!(finished);
        assert!(!ok);
        assert_eq!(err, "no handler");
    }
}
