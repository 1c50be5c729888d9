//! JSON patch operations (RFC 6902 plus an inverse test)

use serde_json::Value as Json;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PatchError {
    /// A `test` operation did not hold; the patch is skipped
    #[error("test failed: {0}")]
    TestFailed(String),

    #[error("invalid patch operation: {0}")]
    Invalid(String),
}

type PatchResult<T> = Result<T, PatchError>;

fn invalid<T>(msg: impl Into<String>) -> PatchResult<T> {
    Err(PatchError::Invalid(msg.into()))
}

fn pointer_tokens(pointer: &str) -> PatchResult<Vec<String>> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = pointer.strip_prefix('/') else {
        return invalid(format!("pointer '{}' must start with '/'", pointer));
    };
    Ok(rest
        .split('/')
        .map(|t| t.replace("~1", "/").replace("~0", "~"))
        .collect())
}

fn array_index(token: &str, len: usize, allow_end: bool) -> PatchResult<usize> {
    if allow_end && token == "-" {
        return Ok(len);
    }
    let index: usize = token
        .parse()
        .map_err(|_| PatchError::Invalid(format!("'{}' is not an array index", token)))?;
    let max = if allow_end { len } else { len.saturating_sub(1) };
    if index > max || (!allow_end && len == 0) {
        return invalid(format!("index {} out of range", index));
    }
    Ok(index)
}

fn parent_mut<'a>(doc: &'a mut Json, tokens: &[String]) -> PatchResult<&'a mut Json> {
    let mut current = doc;
    for token in tokens {
        current = match current {
            Json::Object(map) => match map.get_mut(token) {
                Some(v) => v,
                None => return invalid(format!("no member '{}'", token)),
            },
            Json::Array(arr) => {
                let i = array_index(token, arr.len(), false)?;
                &mut arr[i]
            }
            _ => return invalid(format!("cannot index into scalar at '{}'", token)),
        };
    }
    Ok(current)
}

fn get<'a>(doc: &'a Json, pointer: &str) -> PatchResult<Option<&'a Json>> {
    pointer_tokens(pointer)?;
    Ok(doc.pointer(pointer))
}

fn add(doc: &mut Json, pointer: &str, value: Json) -> PatchResult<()> {
    let tokens = pointer_tokens(pointer)?;
    let Some((last, parents)) = tokens.split_last() else {
        *doc = value;
        return Ok(());
    };
    match parent_mut(doc, parents)? {
        Json::Object(map) => {
            map.insert(last.clone(), value);
        }
        Json::Array(arr) => {
            let i = array_index(last, arr.len(), true)?;
            arr.insert(i, value);
        }
        _ => return invalid(format!("cannot add to scalar at '{}'", pointer)),
    }
    Ok(())
}

fn remove(doc: &mut Json, pointer: &str) -> PatchResult<Json> {
    let tokens = pointer_tokens(pointer)?;
    let Some((last, parents)) = tokens.split_last() else {
        return invalid("cannot remove the document root");
    };
    match parent_mut(doc, parents)? {
        Json::Object(map) => map
            .remove(last)
            .ok_or_else(|| PatchError::Invalid(format!("no member '{}' to remove", last))),
        Json::Array(arr) => {
            let i = array_index(last, arr.len(), false)?;
            Ok(arr.remove(i))
        }
        _ => invalid(format!("cannot remove from scalar at '{}'", pointer)),
    }
}

fn str_field<'a>(op: &'a Json, field: &str) -> PatchResult<&'a str> {
    op.get(field)
        .and_then(Json::as_str)
        .ok_or_else(|| PatchError::Invalid(format!("operation is missing '{}'", field)))
}

fn value_field(op: &Json) -> PatchResult<Json> {
    op.get("value")
        .cloned()
        .ok_or_else(|| PatchError::Invalid("operation is missing 'value'".to_string()))
}

/// Apply one operation in place
pub fn apply_operation(doc: &mut Json, op: &Json) -> PatchResult<()> {
    let path = str_field(op, "path")?;
    match str_field(op, "op")? {
        "test" => {
            let inverse = op.get("inverse").and_then(Json::as_bool).unwrap_or(false);
            let found = get(doc, path)?;
            let holds = match op.get("value") {
                Some(expected) => found == Some(expected),
                None => found.is_some(),
            };
            if holds == inverse {
                return Err(PatchError::TestFailed(path.to_string()));
            }
            Ok(())
        }
        "add" => add(doc, path, value_field(op)?),
        "remove" => remove(doc, path).map(|_| ()),
        "replace" => {
            if get(doc, path)?.is_none() {
                return invalid(format!("no value at '{}' to replace", path));
            }
            let value = value_field(op)?;
            if let Some(slot) = doc.pointer_mut(path) {
                *slot = value;
            }
            Ok(())
        }
        "copy" => {
            let from = str_field(op, "from")?;
            let value = get(doc, from)?
                .cloned()
                .ok_or_else(|| PatchError::Invalid(format!("no value at '{}' to copy", from)))?;
            add(doc, path, value)
        }
        "move" => {
            let from = str_field(op, "from")?;
            let value = remove(doc, from)?;
            add(doc, path, value)
        }
        other => invalid(format!("unknown op '{}'", other)),
    }
}

/// Apply a list of operations to a copy of `base`. Any failure, including a
/// failed test, leaves `base` untouched.
pub fn apply_patch(base: &Json, operations: &[Json]) -> PatchResult<Json> {
    let mut doc = base.clone();
    for op in operations {
        apply_operation(&mut doc, op)?;
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_basic_operations() {
        let base = json!({"a": 1, "list": [1, 2]});
        let out = apply_patch(
            &base,
            &[
                json!({"op": "replace", "path": "/a", "value": 10}),
                json!({"op": "add", "path": "/list/-", "value": 3}),
                json!({"op": "add", "path": "/list/0", "value": 0}),
                json!({"op": "copy", "from": "/a", "path": "/b"}),
                json!({"op": "move", "from": "/b", "path": "/c"}),
                json!({"op": "remove", "path": "/list/1"}),
            ],
        )
        .unwrap();
        assert_eq!(out, json!({"a": 10, "c": 10, "list": [0, 2, 3]}));
    }

    #[test]
    fn test_failed_test_leaves_base() {
        let base = json!({"a": 1});
        let ops = [
            json!({"op": "add", "path": "/b", "value": 2}),
            json!({"op": "test", "path": "/a", "value": 5}),
        ];
        assert_eq!(apply_patch(&base, &ops), Err(PatchError::TestFailed("/a".to_string())));
    }

    #[test]
    fn test_inverse_and_existence_tests() {
        let base = json!({"a": 1});
        assert!(apply_operation(&mut base.clone(), &json!({"op": "test", "path": "/a"})).is_ok());
        assert!(apply_operation(&mut base.clone(), &json!({"op": "test", "path": "/z", "inverse": true})).is_ok());
        assert!(apply_operation(&mut base.clone(), &json!({"op": "test", "path": "/a", "inverse": true})).is_err());
    }

    #[test]
    fn test_escaped_pointer() {
        let base = json!({"a/b": {"~c": 1}});
        let out = apply_patch(&base, &[json!({"op": "replace", "path": "/a~1b/~0c", "value": 2})]).unwrap();
        assert_eq!(out, json!({"a/b": {"~c": 2}}));
    }
}
