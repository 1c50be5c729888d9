//! Scripted behaviour attached to an entity

use std::cell::Cell;
use std::rc::Rc;

use mlua::{FromLuaMulti, Function, IntoLuaMulti, MultiValue, Scope, Table, Value, Variadic};
use star_core::Json;

use crate::callbacks::LuaCallbacks;
use crate::context::LuaContext;
use crate::convert::{first_json, json_args};
use crate::error::{ScriptError, ScriptResult};
use crate::root::LuaRoot;

const HANDLER_TABLE: &str = "__messageHandlers";

/// Lifecycle of a [`ScriptComponent`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptState {
    Uninitialized,
    Running,
    /// Stopped after a script error until re-initialised
    Errored(String),
}

/// One set of scripts sharing a context.
///
/// Any error raised at an entry point is logged with the owner's label and
/// stops the component; later invocations return `None` until `init` runs
/// again.
pub struct ScriptComponent {
    label: String,
    scripts: Vec<String>,
    update_delta: Rc<Cell<u32>>,
    steps_since_update: u32,
    context: Option<LuaContext>,
    state: ScriptState,
}

impl ScriptComponent {
    pub fn new(label: impl Into<String>, scripts: Vec<String>, update_delta: u32) -> Self {
        Self {
            label: label.into(),
            scripts,
            update_delta: Rc::new(Cell::new(update_delta)),
            steps_since_update: 0,
            context: None,
            state: ScriptState::Uninitialized,
        }
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    #[inline]
    pub fn scripts(&self) -> &[String] {
        &self.scripts
    }

    #[inline]
    pub fn state(&self) -> &ScriptState {
        &self.state
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.state == ScriptState::Running
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            ScriptState::Errored(e) => Some(e),
            _ => None,
        }
    }

    /// Ticks between `update` calls; 0 disables updates
    pub fn update_delta(&self) -> u32 {
        self.update_delta.get()
    }

    pub fn set_update_delta(&mut self, delta: u32) {
        self.update_delta.set(delta);
    }

    pub fn context(&self) -> Option<&LuaContext> {
        self.context.as_ref()
    }

    /// Create the context, install the `script` and `message` tables plus
    /// any static tables from `install`, then load every script. Does not
    /// call the scripts' `init`; use an invoke method for that so the world
    /// callbacks can be in scope.
    pub fn init(
        &mut self,
        root: &LuaRoot,
        install: impl FnOnce(&LuaContext) -> ScriptResult<()>,
    ) -> ScriptResult<()> {
        self.context = None;
        self.steps_since_update = 0;
        let result = self.build_context(root, install);
        match result {
            Ok(context) => {
                self.context = Some(context);
                self.state = ScriptState::Running;
                Ok(())
            }
            Err(e) => {
                log::error!("[{}] failed to initialise scripts {:?}: {}", self.label, self.scripts, e);
                self.state = ScriptState::Errored(e.to_string());
                Err(e)
            }
        }
    }

    fn build_context(
        &self,
        root: &LuaRoot,
        install: impl FnOnce(&LuaContext) -> ScriptResult<()>,
    ) -> ScriptResult<LuaContext> {
        let context = root.create_context()?;
        let lua = context.lua().clone();

        let script = lua.create_table()?;
        let delta = self.update_delta.clone();
        script.set("updateDt", lua.create_function(move |_, dt: Option<f32>| {
            Ok(dt.unwrap_or(1.0 / 60.0) * delta.get().max(1) as f32)
        })?)?;
        let delta = self.update_delta.clone();
        script.set("setUpdateDelta", lua.create_function(move |_, d: u32| {
            delta.set(d);
            Ok(())
        })?)?;
        context.set_callbacks("script", script)?;

        let handlers = lua.create_table()?;
        context.env().set(HANDLER_TABLE, handlers)?;
        let message = lua.create_table()?;
        let set_handler = lua
            .load("local env = ...\nreturn function(name, f) env.__messageHandlers[name] = f end")
            .set_name("=message")
            .call::<Function>(context.env().clone())?;
        message.set("setHandler", set_handler)?;
        context.set_callbacks("message", message)?;

        install(&context)?;
        for path in &self.scripts {
            context.load_script(path)?;
        }
        Ok(context)
    }

    /// Call `uninit` and drop the context
    pub fn uninit(&mut self) {
        if self.is_running() {
            let _: Option<()> = self.invoke("uninit", ());
        }
        self.context = None;
        self.state = ScriptState::Uninitialized;
    }

    /// Count a world step; true when `update` is due
    pub fn tick(&mut self) -> bool {
        let delta = self.update_delta.get();
        if delta == 0 || !self.is_running() {
            return false;
        }
        self.steps_since_update += 1;
        if self.steps_since_update >= delta {
            self.steps_since_update = 0;
            true
        } else {
            false
        }
    }

    /// Time covered by one `update` call for a step of `dt`
    pub fn update_dt(&self, dt: f32) -> f32 {
        dt * self.update_delta.get().max(1) as f32
    }

    fn fail(&mut self, entry: &str, error: ScriptError) {
        log::error!("[{}] script error in '{}': {}", self.label, entry, error);
        self.state = ScriptState::Errored(error.to_string());
    }

    fn running_context(&self) -> Option<&LuaContext> {
        if self.is_running() {
            self.context.as_ref()
        } else {
            None
        }
    }

    /// Call a script function with only static callbacks installed
    pub fn invoke<R: FromLuaMulti>(&mut self, name: &str, args: impl IntoLuaMulti) -> Option<R> {
        let context = self.running_context()?;
        match context.invoke::<R>(name, args) {
            Ok(result) => result,
            Err(e) => {
                self.fail(name, e);
                None
            }
        }
    }

    /// Call a script function with JSON arguments, returning its first
    /// result as JSON
    pub fn invoke_json(&mut self, name: &str, args: &[Json]) -> Option<Json> {
        let context = self.running_context()?;
        let result = json_args(context.lua(), args)
            .map_err(ScriptError::from)
            .and_then(|a| context.invoke::<MultiValue>(name, a))
            .and_then(|r| match r {
                Some(values) => first_json(context.lua(), values),
                None => Ok(None),
            });
        match result {
            Ok(json) => json,
            Err(e) => {
                self.fail(name, e);
                None
            }
        }
    }

    /// Call a script function with extra callback tables that may borrow
    /// local state.
    ///
    /// `register` runs inside an `mlua` scope and adds tables to the
    /// builder; they are installed for the call and removed afterwards.
    /// Returns `None` when the function does not exist or raised an error.
    pub fn invoke_with<'env, A, R, F>(&mut self, name: &str, args: A, register: F) -> Option<R>
    where
        A: IntoLuaMulti,
        R: FromLuaMulti,
        F: for<'scope> FnOnce(&'scope Scope<'scope, 'env>, &mut LuaCallbacks) -> mlua::Result<()>,
    {
        let context = self.running_context()?;
        let function = match context.function(name) {
            Ok(Some(f)) => f,
            Ok(None) => return None,
            Err(e) => {
                self.fail(name, e);
                return None;
            }
        };
        let result = context.call_with(function, args, register);
        self.finish(name, result)
    }

    /// Deliver a message to a handler registered with `message.setHandler`.
    /// Returns `None` when no handler exists.
    pub fn handle_message_with<'env, F>(
        &mut self,
        message: &str,
        is_local: bool,
        args: &[Json],
        register: F,
    ) -> Option<Json>
    where
        F: for<'scope> FnOnce(&'scope Scope<'scope, 'env>, &mut LuaCallbacks) -> mlua::Result<()>,
    {
        let context = self.running_context()?;
        let handler = match message_handler(context, message) {
            Ok(Some(f)) => f,
            Ok(None) => return None,
            Err(e) => {
                self.fail(message, e);
                return None;
            }
        };
        let lua = context.lua();
        let call_args = json_args(lua, args).map(|rest| {
            let mut all: Variadic<Value> = Variadic::new();
            all.push(Value::Boolean(is_local));
            all.extend(rest);
            all
        });
        let call_args = match call_args {
            Ok(a) => a,
            Err(e) => {
                self.fail(message, e.into());
                return None;
            }
        };
        let result = context
            .call_with(handler, call_args, register)
            .and_then(|values: MultiValue| first_json(lua, values));
        match result {
            Ok(json) => json,
            Err(e) => {
                self.fail(message, e);
                None
            }
        }
    }

    pub fn handle_message(&mut self, message: &str, is_local: bool, args: &[Json]) -> Option<Json> {
        self.handle_message_with(message, is_local, args, |_, _| Ok(()))
    }

    pub fn has_message_handler(&self, message: &str) -> bool {
        self.running_context()
            .map(|c| matches!(message_handler(c, message), Ok(Some(_))))
            .unwrap_or(false)
    }

    /// Evaluate code in this component's context, as for `entityeval`
    pub fn eval_with<'env, F>(&mut self, code: &str, register: F) -> ScriptResult<Json>
    where
        F: for<'scope> FnOnce(&'scope Scope<'scope, 'env>, &mut LuaCallbacks) -> mlua::Result<()>,
    {
        let context = self.running_context().ok_or(ScriptError::NotRunning)?;
        let chunk = context
            .lua()
            .load(code)
            .set_name("=eval")
            .set_environment(context.env().clone())
            .into_function()?;
        let values: MultiValue = context.call_with(chunk, (), register)?;
        Ok(first_json(context.lua(), values)?.unwrap_or(Json::Null))
    }

    fn finish<R>(&mut self, entry: &str, result: ScriptResult<R>) -> Option<R> {
        match result {
            Ok(r) => Some(r),
            Err(e) => {
                self.fail(entry, e);
                None
            }
        }
    }
}

fn message_handler(context: &LuaContext, message: &str) -> ScriptResult<Option<Function>> {
    let handlers: Table = context.env().get(HANDLER_TABLE)?;
    Ok(match handlers.get::<Value>(message)? {
        Value::Function(f) => Some(f),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;

    fn root(source: &'static str) -> LuaRoot {
        LuaRoot::new(move |_| Ok(source.to_string())).unwrap()
    }

    #[test]
    fn test_update_delta_and_ticks() {
        let root = root("function update(dt) ticks = (ticks or 0) + 1 end");
        let mut component = ScriptComponent::new("test", vec!["/s.lua".into()], 3);
        component.init(&root, |_| Ok(())).unwrap();

        let due: Vec<bool> = (0..6).map(|_| component.tick()).collect();
        assert_eq!(due, vec![false, false, true, false, false, true]);
        assert!((component.update_dt(1.0 / 60.0) - 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_error_stops_component() {
        let root = root("function update() error('boom') end\nfunction other() return 1 end");
        let mut component = ScriptComponent::new("test", vec!["/s.lua".into()], 1);
        component.init(&root, |_| Ok(())).unwrap();

        let r: Option<()> = component.invoke("update", ());
        assert!(r.is_none());
        assert!(component.error().is_some_and(|e| e.contains("boom")));
        let after: Option<i64> = component.invoke("other", ());
        assert_eq!(after, None);

        component.init(&root, |_| Ok(())).unwrap();
        let after: Option<i64> = component.invoke("other", ());
        assert_eq!(after, Some(1));
    }

    #[test]
    fn test_message_handlers() {
        let root = root(
            "function init() message.setHandler('add', function(isLocal, a, b) return a + b end) end",
        );
        let mut component = ScriptComponent::new("test", vec!["/s.lua".into()], 1);
        component.init(&root, |_| Ok(())).unwrap();
        let _: Option<()> = component.invoke("init", ());

        assert_eq!(component.handle_message("add", true, &[json!(2), json!(3)]), Some(json!(5)));
        assert_eq!(component.handle_message("missing", true, &[]), None);
        assert!(component.is_running());
    }

    #[test]
    fn test_scoped_callbacks_borrow_local_state() {
        let root = root("function update() counter.bump(); counter.bump() end");
        let mut component = ScriptComponent::new("test", vec!["/s.lua".into()], 1);
        component.init(&root, |_| Ok(())).unwrap();

        let count = RefCell::new(0);
        let _: Option<()> = component.invoke_with("update", (), |scope, callbacks| {
            callbacks.register(
                "counter",
                "bump",
                scope.create_function(|_, ()| {
                    *count.borrow_mut() += 1;
                    Ok(())
                })?,
            )
        });
        assert_eq!(*count.borrow(), 2);
        assert_eq!(component.context().unwrap().get_global("counter").unwrap(), Json::Null);
    }
}
