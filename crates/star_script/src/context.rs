//! Isolated script environments

use mlua::{FromLuaMulti, Function, IntoLuaMulti, Lua, Scope, Table, Value};
use star_core::Json;

use crate::callbacks::LuaCallbacks;
use crate::convert::{json_to_lua, lua_to_json};
use crate::error::{ScriptError, ScriptResult};
use crate::root::SourceCache;

/// A global table of its own layered over the shared globals.
///
/// Scripts loaded into a context see each other's globals but not those of
/// other contexts. `require(path)` loads a further script into the same
/// environment, once.
#[derive(Clone)]
pub struct LuaContext {
    lua: Lua,
    env: Table,
}

impl LuaContext {
    pub(crate) fn new(lua: Lua, sources: SourceCache) -> ScriptResult<Self> {
        let env: Table = lua
            .load("return setmetatable({}, { __index = _G })")
            .set_name("=context")
            .eval()?;

        let loaded = lua.create_table()?;
        env.set("__loaded", loaded)?;

        let load_into = lua.create_function(move |lua, (path, env): (String, Table)| {
            let loaded: Table = env.get("__loaded")?;
            if loaded.get::<bool>(path.as_str()).unwrap_or(false) {
                return Ok(());
            }
            let source = sources
                .source(&path)
                .map_err(|e| mlua::Error::RuntimeError(e.to_string()))?;
            loaded.set(path.as_str(), true)?;
            lua.load(&*source).set_name(path.as_str()).set_environment(env).exec()
        })?;

        // The Lua closure keeps `env` alive only from inside Lua, so the
        // environment can still be collected.
        lua.load("local load, env = ...\nenv.require = function(path) return load(path, env) end")
            .set_name("=context")
            .call::<()>((load_into, env.clone()))?;

        Ok(Self { lua, env })
    }

    #[inline]
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    #[inline]
    pub fn env(&self) -> &Table {
        &self.env
    }

    /// Load a script into this context through its root's loader
    pub fn load_script(&self, path: &str) -> ScriptResult<()> {
        let require: Function = self.env.get("require")?;
        require.call::<()>(path).map_err(|e| ScriptError::Load {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Run source text directly in this context
    pub fn load_source(&self, name: &str, source: &str) -> ScriptResult<()> {
        self.lua
            .load(source)
            .set_name(name)
            .set_environment(self.env.clone())
            .exec()?;
        Ok(())
    }

    /// Evaluate an expression or chunk, returning its first result as JSON
    pub fn eval(&self, code: &str) -> ScriptResult<Json> {
        let chunk = self.lua.load(code).set_name("=eval").set_environment(self.env.clone());
        let value: Value = chunk.eval()?;
        lua_to_json(&self.lua, value).map_err(|e| ScriptError::Conversion(e.to_string()))
    }

    /// Install a named callback table
    pub fn set_callbacks(&self, name: &str, callbacks: Table) -> ScriptResult<()> {
        self.env.set(name, callbacks)?;
        Ok(())
    }

    pub fn remove_callbacks(&self, name: &str) -> ScriptResult<()> {
        self.env.set(name, Value::Nil)?;
        Ok(())
    }

    /// Look up a possibly dotted function name such as `behavior.run`
    pub fn function(&self, name: &str) -> ScriptResult<Option<Function>> {
        let mut parts = name.split('.');
        let mut value: Value = match parts.next() {
            Some(first) => self.env.get(first)?,
            None => return Ok(None),
        };
        for part in parts {
            value = match value {
                Value::Table(t) => t.get(part)?,
                _ => return Ok(None),
            };
        }
        Ok(match value {
            Value::Function(f) => Some(f),
            _ => None,
        })
    }

    pub fn contains_function(&self, name: &str) -> bool {
        matches!(self.function(name), Ok(Some(_)))
    }

    /// Call a function if it exists; `Ok(None)` when it does not
    pub fn invoke<R: FromLuaMulti>(&self, name: &str, args: impl IntoLuaMulti) -> ScriptResult<Option<R>> {
        match self.function(name)? {
            Some(f) => Ok(Some(f.call::<R>(args)?)),
            None => Ok(None),
        }
    }

    /// Call a function that must exist
    pub fn call<R: FromLuaMulti>(&self, name: &str, args: impl IntoLuaMulti) -> ScriptResult<R> {
        self.invoke(name, args)?
            .ok_or_else(|| ScriptError::MissingFunction(name.to_string()))
    }

    /// Run `body` with the callback tables built by `register` installed.
    ///
    /// `register` runs inside an `mlua` scope, so its functions may borrow
    /// local state. The tables are removed again before returning.
    pub fn scoped<'env, R, F, B>(&self, register: F, body: B) -> ScriptResult<R>
    where
        F: for<'scope> FnOnce(&'scope Scope<'scope, 'env>, &mut LuaCallbacks) -> mlua::Result<()>,
        B: FnOnce(&LuaContext) -> ScriptResult<R>,
    {
        let mut installed: Vec<String> = Vec::new();
        let mut output = None;

        let scope_result = self.lua.scope(|scope| {
            let mut callbacks = LuaCallbacks::new(&self.lua);
            register(scope, &mut callbacks)?;
            for (name, table) in callbacks.into_tables() {
                self.env.set(name.as_str(), table)?;
                installed.push(name);
            }
            output = Some(body(self));
            Ok(())
        });

        for name in &installed {
            if let Err(e) = self.env.set(name.as_str(), Value::Nil) {
                log::warn!("failed to remove callback table '{}': {}", name, e);
            }
        }
        scope_result?;
        output.unwrap_or(Err(ScriptError::NotRunning))
    }

    /// Call `function` with scoped callback tables installed
    pub fn call_with<'env, A, R, F>(&self, function: Function, args: A, register: F) -> ScriptResult<R>
    where
        A: IntoLuaMulti,
        R: FromLuaMulti,
        F: for<'scope> FnOnce(&'scope Scope<'scope, 'env>, &mut LuaCallbacks) -> mlua::Result<()>,
    {
        self.scoped(register, move |_| Ok(function.call::<R>(args)?))
    }

    pub fn get_global(&self, name: &str) -> ScriptResult<Json> {
        let value: Value = self.env.get(name)?;
        lua_to_json(&self.lua, value).map_err(|e| ScriptError::Conversion(e.to_string()))
    }

    pub fn set_global(&self, name: &str, value: &Json) -> ScriptResult<()> {
        self.env.set(name, json_to_lua(&self.lua, value)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::root::LuaRoot;
    use serde_json::json;

    fn root() -> LuaRoot {
        LuaRoot::new(|path| match path {
            "/lib.lua" => Ok("function double(x) return x * 2 end".to_string()),
            "/main.lua" => Ok("require('/lib.lua')\nfunction run(x) return double(x) + 1 end".to_string()),
            other => Err(ScriptError::Load {
                path: other.to_string(),
                reason: "missing".to_string(),
            }),
        })
        .unwrap()
    }

    #[test]
    fn test_require_and_call() {
        let root = root();
        let ctx = root.create_context().unwrap();
        ctx.load_script("/main.lua").unwrap();
        assert_eq!(ctx.call::<i64>("run", 4).unwrap(), 9);
        assert!(ctx.invoke::<()>("absent", ()).unwrap().is_none());
    }

    #[test]
    fn test_contexts_are_isolated() {
        let root = root();
        let a = root.create_context().unwrap();
        let b = root.create_context().unwrap();
        a.load_source("a", "shared = 1").unwrap();
        assert_eq!(a.get_global("shared").unwrap(), json!(1));
        assert_eq!(b.get_global("shared").unwrap(), Json::Null);
        assert_eq!(b.eval("return math.max(2, 3)").unwrap(), json!(3));
    }

    #[test]
    fn test_missing_script_reports_path() {
        let ctx = root().create_context().unwrap();
        let err = ctx.load_script("/nope.lua").unwrap_err();
        assert!(matches!(err, ScriptError::Load { ref path, .. } if path == "/nope.lua"));
    }

    #[test]
    fn test_dotted_function_lookup() {
        let ctx = root().create_context().unwrap();
        ctx.load_source("t", "behavior = { run = function() return 'ok' end }").unwrap();
        assert_eq!(ctx.call::<String>("behavior.run", ()).unwrap(), "ok");
    }
}
