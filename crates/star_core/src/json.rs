//! JSON helpers
//!
//! Query paths use dot notation for object members and brackets for array
//! indices: `stats.health`, `frames[2].name`, `[0][1]`.

pub use serde_json::Value as Json;

/// JSON object map
pub type JsonObject = serde_json::Map<String, Json>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment<'a> {
    Key(&'a str),
    Index(usize),
}

fn parse_query(path: &str) -> Option<Vec<PathSegment<'_>>> {
    let mut segments = Vec::new();
    let bytes = path.as_bytes();
    let mut i = 0;
    let mut start = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'.' => {
                if i > start {
                    segments.push(PathSegment::Key(&path[start..i]));
                }
                i += 1;
                start = i;
            }
            b'[' => {
                if i > start {
                    segments.push(PathSegment::Key(&path[start..i]));
                }
                let close = path[i..].find(']')? + i;
                let index = path[i + 1..close].trim().parse().ok()?;
                segments.push(PathSegment::Index(index));
                i = close + 1;
                start = i;
            }
            _ => i += 1,
        }
    }
    if start < bytes.len() {
        segments.push(PathSegment::Key(&path[start..]));
    }
    Some(segments)
}

/// Look up a value by query path, returning `None` if any step is missing
pub fn json_query<'a>(value: &'a Json, path: &str) -> Option<&'a Json> {
    let mut current = value;
    for segment in parse_query(path)? {
        current = match segment {
            PathSegment::Key(key) => current.as_object()?.get(key)?,
            PathSegment::Index(index) => current.as_array()?.get(index)?,
        };
    }
    Some(current)
}

/// Look up a value by query path, falling back to `default`
pub fn json_query_or(value: &Json, path: &str, default: Json) -> Json {
    json_query(value, path).cloned().unwrap_or(default)
}

/// Set a value at a query path, creating intermediate objects as needed.
/// Returns false if an intermediate step is not an object or array index
/// is out of range.
pub fn json_query_set(value: &mut Json, path: &str, new_value: Json) -> bool {
    let segments = match parse_query(path) {
        Some(s) if !s.is_empty() => s,
        _ => return false,
    };
    let mut current = value;
    let last = segments.len() - 1;
    for (i, segment) in segments.into_iter().enumerate() {
        match segment {
            PathSegment::Key(key) => {
                if current.is_null() {
                    *current = Json::Object(JsonObject::new());
                }
                let Some(obj) = current.as_object_mut() else {
                    return false;
                };
                if i == last {
                    obj.insert(key.to_string(), new_value);
                    return true;
                }
                current = obj.entry(key.to_string()).or_insert(Json::Null);
            }
            PathSegment::Index(index) => {
                let Some(arr) = current.as_array_mut() else {
                    return false;
                };
                let Some(slot) = arr.get_mut(index) else {
                    return false;
                };
                if i == last {
                    *slot = new_value;
                    return true;
                }
                current = slot;
            }
        }
    }
    false
}

/// Recursively merge `merger` into `base`. Objects merge key by key; any
/// other value in `merger` replaces the one in `base`.
pub fn json_merge(base: &Json, merger: &Json) -> Json {
    match (base, merger) {
        (Json::Object(a), Json::Object(b)) => {
            let mut out = a.clone();
            for (key, value) in b {
                let merged = match out.get(key) {
                    Some(existing) => json_merge(existing, value),
                    None => value.clone(),
                };
                out.insert(key.clone(), merged);
            }
            Json::Object(out)
        }
        _ => merger.clone(),
    }
}

/// Like [`json_merge`], but `null` members of `merger` delete the key
pub fn json_merge_nulling(base: &Json, merger: &Json) -> Json {
    match (base, merger) {
        (Json::Object(a), Json::Object(b)) => {
            let mut out = a.clone();
            for (key, value) in b {
                if value.is_null() {
                    out.remove(key);
                    continue;
                }
                let merged = match out.get(key) {
                    Some(existing) => json_merge_nulling(existing, value),
                    None => value.clone(),
                };
                out.insert(key.clone(), merged);
            }
            Json::Object(out)
        }
        _ => merger.clone(),
    }
}

/// Read a float from a JSON number, accepting integers
pub fn json_f32(value: &Json) -> Option<f32> {
    value.as_f64().map(|v| v as f32)
}

/// Read a two element numeric array
pub fn json_vec2(value: &Json) -> Option<[f32; 2]> {
    let arr = value.as_array()?;
    if arr.len() != 2 {
        return None;
    }
    Some([json_f32(&arr[0])?, json_f32(&arr[1])?])
}

/// Read a two element integer array
pub fn json_vec2i(value: &Json) -> Option<[i32; 2]> {
    let arr = value.as_array()?;
    if arr.len() != 2 {
        return None;
    }
    Some([arr[0].as_i64()? as i32, arr[1].as_i64()? as i32])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_nested() {
        let v = json!({"a": {"b": [10, {"c": "x"}]}});
        assert_eq!(json_query(&v, "a.b[0]"), Some(&json!(10)));
        assert_eq!(json_query(&v, "a.b[1].c"), Some(&json!("x")));
        assert_eq!(json_query(&v, "a.missing"), None);
        assert_eq!(json_query(&v, "a.b[5]"), None);
    }

    #[test]
    fn test_query_set_creates_objects() {
        let mut v = json!({});
        assert!(json_query_set(&mut v, "a.b", json!(3)));
        assert_eq!(v, json!({"a": {"b": 3}}));
        assert!(!json_query_set(&mut v, "a.b.c", json!(1)));
    }

    #[test]
    fn test_merge_nulling_removes() {
        let base = json!({"a": 1, "b": {"c": 2, "d": 3}});
        let merged = json_merge_nulling(&base, &json!({"a": null, "b": {"d": 4}}));
        assert_eq!(merged, json!({"b": {"c": 2, "d": 4}}));

        let plain = json_merge(&base, &json!({"a": null}));
        assert_eq!(plain["a"], Json::Null);
    }
}
