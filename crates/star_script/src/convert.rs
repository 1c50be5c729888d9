//! JSON values across the Lua boundary

use mlua::{Lua, LuaSerdeExt, MultiValue, Value};
use star_core::Json;

use crate::error::{ScriptError, ScriptResult};

/// Convert JSON to a Lua value. Arrays keep an array marker so they come
/// back as arrays even when empty.
pub fn json_to_lua(lua: &Lua, json: &Json) -> mlua::Result<Value> {
    lua.to_value(json)
}

/// Convert a Lua value to JSON. `nil` becomes `null`.
pub fn lua_to_json(lua: &Lua, value: Value) -> mlua::Result<Json> {
    match value {
        Value::Nil => Ok(Json::Null),
        other => lua.from_value(other),
    }
}

/// First value of a multi-return as JSON, `None` for nothing or `nil`
pub fn first_json(lua: &Lua, values: MultiValue) -> ScriptResult<Option<Json>> {
    match values.into_iter().next() {
        None | Some(Value::Nil) => Ok(None),
        Some(value) => lua
            .from_value(value)
            .map(Some)
            .map_err(|e| ScriptError::Conversion(e.to_string())),
    }
}

/// Convert JSON arguments for a call
pub fn json_args(lua: &Lua, args: &[Json]) -> mlua::Result<MultiValue> {
    args.iter()
        .map(|a| json_to_lua(lua, a))
        .collect::<mlua::Result<Vec<Value>>>()
        .map(MultiValue::from_vec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip_nested() {
        let lua = Lua::new();
        let value = json!({"name": "crate", "sizes": [1, 2, 3], "empty": [], "flag": true});
        let lua_value = json_to_lua(&lua, &value).unwrap();
        assert_eq!(lua_to_json(&lua, lua_value).unwrap(), value);
    }

    #[test]
    fn test_nil_is_null() {
        let lua = Lua::new();
        assert_eq!(lua_to_json(&lua, Value::Nil).unwrap(), Json::Null);
        assert_eq!(first_json(&lua, MultiValue::new()).unwrap(), None);
    }
}
