//! Sprite atlas `.frames` files

use std::collections::BTreeMap;

use serde_json::json;
use star_core::{Json, JsonObject};
use star_math::RectI;

use crate::error::{AssetError, AssetResult};

/// Named frame rectangles within an image plus aliases.
///
/// Rectangles are top-down pixel coordinates as written in the file. Alias
/// chains are flattened at parse time, so every alias maps directly to a
/// frame name.
#[derive(Debug, Clone, PartialEq)]
pub struct FramesSpecification {
    pub frames_path: String,
    pub frames: BTreeMap<String, RectI>,
    pub aliases: BTreeMap<String, String>,
}

impl FramesSpecification {
    pub fn parse(frames_path: &str, config: &Json) -> AssetResult<Self> {
        let malformed = |reason: String| AssetError::Malformed {
            path: frames_path.to_string(),
            reason,
        };
        let mut frames = BTreeMap::new();

        if let Some(grid) = config.get("frameGrid") {
            let size = vec2i(grid.get("size")).ok_or_else(|| malformed("frameGrid.size missing".into()))?;
            let dims = vec2i(grid.get("dimensions"))
                .ok_or_else(|| malformed("frameGrid.dimensions missing".into()))?;
            let begin = vec2i(grid.get("begin")).unwrap_or([0, 0]);
            if size[0] <= 0 || size[1] <= 0 || dims[0] < 0 || dims[1] < 0 {
                return Err(malformed("frameGrid size and dimensions must be positive".into()));
            }
            let names = grid.get("names").and_then(Json::as_array);

            for row in 0..dims[1] {
                for col in 0..dims[0] {
                    let name = match names {
                        Some(rows) => match rows.get(row as usize).and_then(|r| r.get(col as usize)) {
                            Some(Json::String(s)) => s.clone(),
                            Some(Json::Null) | None => continue,
                            Some(other) => return Err(malformed(format!("bad frame name {}", other))),
                        },
                        None => (row * dims[0] + col).to_string(),
                    };
                    let x0 = begin[0] + col * size[0];
                    let y0 = begin[1] + row * size[1];
                    frames.insert(name, RectI::from_coords(x0, y0, x0 + size[0], y0 + size[1]));
                }
            }
        }

        if let Some(list) = config.get("frameList").and_then(Json::as_object) {
            for (name, rect) in list {
                let r = rect
                    .as_array()
                    .filter(|a| a.len() == 4)
                    .and_then(|a| a.iter().map(|v| v.as_i64().map(|n| n as i32)).collect::<Option<Vec<_>>>())
                    .ok_or_else(|| malformed(format!("frameList entry '{}' is not [x0, y0, x1, y1]", name)))?;
                frames.insert(name.clone(), RectI::from_coords(r[0], r[1], r[2], r[3]));
            }
        }

        let raw_aliases: BTreeMap<String, String> = match config.get("aliases").and_then(Json::as_object) {
            Some(obj) => obj
                .iter()
                .map(|(k, v)| {
                    v.as_str()
                        .map(|s| (k.clone(), s.to_string()))
                        .ok_or_else(|| malformed(format!("alias '{}' is not a string", k)))
                })
                .collect::<AssetResult<_>>()?,
            None => BTreeMap::new(),
        };

        let mut aliases = BTreeMap::new();
        for alias in raw_aliases.keys() {
            let mut target = alias;
            let mut seen = vec![alias.as_str()];
            while let Some(next) = raw_aliases.get(target) {
                if seen.contains(&next.as_str()) {
                    return Err(malformed(format!("alias cycle through '{}'", alias)));
                }
                seen.push(next);
                target = next;
            }
            if !frames.contains_key(target) {
                return Err(malformed(format!("alias '{}' names unknown frame '{}'", alias, target)));
            }
            aliases.insert(alias.clone(), target.clone());
        }

        Ok(Self {
            frames_path: frames_path.to_string(),
            frames,
            aliases,
        })
    }

    /// Frame name after alias resolution
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn rect(&self, name: &str) -> Option<RectI> {
        self.frames.get(self.resolve(name)).copied()
    }

    pub fn to_json(&self) -> Json {
        let frames: JsonObject = self
            .frames
            .iter()
            .map(|(k, r)| (k.clone(), json!(r.to_array())))
            .collect();
        let aliases: JsonObject = self.aliases.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
        json!({ "file": self.frames_path, "frames": frames, "aliases": aliases })
    }
}

fn vec2i(value: Option<&Json>) -> Option<[i32; 2]> {
    value.and_then(star_core::json::json_vec2i)
}

/// Candidate `.frames` files for an image, nearest first: `<name>.frames`,
/// then `default.frames` in each directory up to the root
pub fn frames_candidates(image_path: &str) -> Vec<String> {
    let mut out = vec![format!("{}.frames", crate::path::remove_extension(image_path))];
    let mut dir = crate::path::directory(image_path);
    loop {
        out.push(format!("{}default.frames", dir));
        if dir.len() <= 1 {
            break;
        }
        dir = crate::path::directory(&dir[..dir.len() - 1]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_list_and_aliases() {
        let spec = FramesSpecification::parse(
            "/a.frames",
            &json!({
                "frameGrid": {"size": [8, 8], "dimensions": [2, 1], "names": [["idle", "walk"]]},
                "frameList": {"extra": [0, 8, 4, 12]},
                "aliases": {"default": "stand", "stand": "idle"}
            }),
        )
        .unwrap();
        assert_eq!(spec.rect("walk"), Some(RectI::from_coords(8, 0, 16, 8)));
        assert_eq!(spec.rect("extra"), Some(RectI::from_coords(0, 8, 4, 12)));
        assert_eq!(spec.resolve("default"), "idle");
        assert_eq!(spec.rect("default"), spec.rect("idle"));
    }

    #[test]
    fn test_alias_cycle_rejected() {
        let err = FramesSpecification::parse(
            "/a.frames",
            &json!({"frameList": {"x": [0, 0, 1, 1]}, "aliases": {"a": "b", "b": "a"}}),
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_candidates_walk_up() {
        assert_eq!(
            frames_candidates("/a/b/c.png"),
            vec!["/a/b/c.frames", "/a/b/default.frames", "/a/default.frames", "/default.frames"]
        );
    }
}
