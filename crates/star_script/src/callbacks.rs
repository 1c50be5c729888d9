//! Callback tables exposed to scripts

use mlua::{Function, Lua, Table, Value, Variadic};
use star_core::json::{json_merge, json_query};

use crate::convert::{json_to_lua, lua_to_json};

/// Builder for named callback tables such as `world` or `entity`.
///
/// Functions may be plain or created inside an `mlua` scope; the tables are
/// installed into a context for the duration of one invocation.
pub struct LuaCallbacks {
    lua: Lua,
    tables: Vec<(String, Table)>,
}

impl LuaCallbacks {
    pub fn new(lua: &Lua) -> Self {
        Self {
            lua: lua.clone(),
            tables: Vec::new(),
        }
    }

    #[inline]
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// The table named `name`, created on first use
    pub fn table(&mut self, name: &str) -> mlua::Result<Table> {
        if let Some((_, t)) = self.tables.iter().find(|(n, _)| n == name) {
            return Ok(t.clone());
        }
        let table = self.lua.create_table()?;
        self.tables.push((name.to_string(), table.clone()));
        Ok(table)
    }

    /// Add `function` as `table.name`
    pub fn register(&mut self, table: &str, name: &str, function: Function) -> mlua::Result<()> {
        self.table(table)?.set(name, function)
    }

    /// Merge another builder's tables into this one
    pub fn extend(&mut self, other: LuaCallbacks) -> mlua::Result<()> {
        for (name, table) in other.tables {
            let target = self.table(&name)?;
            for pair in table.pairs::<Value, Value>() {
                let (k, v) = pair?;
                target.set(k, v)?;
            }
        }
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|(n, _)| n.as_str())
    }

    pub fn into_tables(self) -> Vec<(String, Table)> {
        self.tables
    }
}

fn format_message(lua: &Lua, format: String, args: Variadic<Value>) -> mlua::Result<String> {
    if args.is_empty() {
        return Ok(format);
    }
    let string: Table = lua.globals().get("string")?;
    let format_fn: Function = string.get("format")?;
    let all: Variadic<Value> = std::iter::once(Value::String(lua.create_string(&format)?))
        .chain(args)
        .collect();
    format_fn.call(all)
}

/// Install the `sb` utility table into the interpreter's globals
pub fn install_utility_callbacks(lua: &Lua) -> mlua::Result<()> {
    let sb = lua.create_table()?;

    sb.set(
        "logInfo",
        lua.create_function(|lua, (format, args): (String, Variadic<Value>)| {
            log::info!("{}", format_message(lua, format, args)?);
            Ok(())
        })?,
    )?;
    sb.set(
        "logWarn",
        lua.create_function(|lua, (format, args): (String, Variadic<Value>)| {
            log::warn!("{}", format_message(lua, format, args)?);
            Ok(())
        })?,
    )?;
    sb.set(
        "logError",
        lua.create_function(|lua, (format, args): (String, Variadic<Value>)| {
            log::error!("{}", format_message(lua, format, args)?);
            Ok(())
        })?,
    )?;
    sb.set(
        "jsonMerge",
        lua.create_function(|lua, (base, merger): (Value, Value)| {
            let merged = json_merge(&lua_to_json(lua, base)?, &lua_to_json(lua, merger)?);
            json_to_lua(lua, &merged)
        })?,
    )?;
    sb.set(
        "jsonQuery",
        lua.create_function(|lua, (value, path, default): (Value, String, Value)| {
            let json = lua_to_json(lua, value)?;
            match json_query(&json, &path) {
                Some(found) => json_to_lua(lua, found),
                None => Ok(default),
            }
        })?,
    )?;
    sb.set(
        "printJson",
        lua.create_function(|lua, (value, pretty): (Value, Option<bool>)| {
            let json = lua_to_json(lua, value)?;
            let text = if pretty.unwrap_or(false) {
                serde_json::to_string_pretty(&json)
            } else {
                serde_json::to_string(&json)
            };
            text.map_err(|e| mlua::Error::RuntimeError(e.to_string()))
        })?,
    )?;

    lua.globals().set("sb", sb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sb_json_helpers() {
        let lua = Lua::new();
        install_utility_callbacks(&lua).unwrap();
        let q: i64 = lua
            .load("return sb.jsonQuery({a = {b = {5, 6}}}, 'a.b[1]', 0)")
            .eval()
            .unwrap();
        assert_eq!(q, 6);
        let merged: String = lua
            .load("return sb.printJson(sb.jsonMerge({a = 1}, {b = 2}))")
            .eval()
            .unwrap();
        assert_eq!(merged, r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn test_builder_reuses_tables() {
        let lua = Lua::new();
        let mut callbacks = LuaCallbacks::new(&lua);
        callbacks
            .register("world", "a", lua.create_function(|_, ()| Ok(1)).unwrap())
            .unwrap();
        callbacks
            .register("world", "b", lua.create_function(|_, ()| Ok(2)).unwrap())
            .unwrap();
        assert_eq!(callbacks.names().count(), 1);
    }
}
