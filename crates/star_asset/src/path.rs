//! Asset path grammar
//!
//! An asset path is `/base/path.ext:subPath?op=args?op=args`. The base is an
//! absolute, case-insensitive virtual path; the optional sub-path names a
//! field or frame within that asset; the directives are image operations
//! applied in order.

use std::fmt;

use crate::directives::{Directives, DirectivesGroup};
use crate::error::{AssetError, AssetResult};

/// A parsed asset path
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AssetPath {
    pub base_path: String,
    pub sub_path: Option<String>,
    pub directives: DirectivesGroup,
}

impl AssetPath {
    /// A path with only a base
    pub fn new(base_path: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            sub_path: None,
            directives: DirectivesGroup::default(),
        }
    }

    /// Split a raw path string into its three parts. Never fails; use
    /// [`AssetPath::validate`] on the base to check it.
    pub fn split(path: &str) -> Self {
        let base_end = path.find(|c: char| c == ':' || c == '?').unwrap_or(path.len());
        let base_path = path[..base_end].to_string();
        let rest = &path[base_end..];

        let (sub_path, directive_str) = match rest.strip_prefix(':') {
            Some(after) => {
                let sub_end = after.find('?').unwrap_or(after.len());
                (Some(after[..sub_end].to_string()), &after[sub_end..])
            }
            None => (None, rest),
        };

        let mut directives = DirectivesGroup::default();
        if !directive_str.is_empty() {
            directives.push(Directives::new(directive_str));
        }

        Self {
            base_path,
            sub_path,
            directives,
        }
    }

    /// The canonical string form; `split(join(p)) == p`
    pub fn join(&self) -> String {
        let mut out = self.base_path.clone();
        if let Some(sub) = &self.sub_path {
            out.push(':');
            out.push_str(sub);
        }
        self.directives.append_to(&mut out);
        out
    }

    pub fn with_sub_path(mut self, sub_path: impl Into<String>) -> Self {
        self.sub_path = Some(sub_path.into());
        self
    }

    pub fn with_directives(mut self, directives: DirectivesGroup) -> Self {
        self.directives = directives;
        self
    }

    /// Same base, no sub-path, no directives
    pub fn base_only(&self) -> AssetPath {
        AssetPath::new(self.base_path.clone())
    }

    /// Same base and sub-path, no directives
    pub fn without_directives(&self) -> AssetPath {
        AssetPath {
            base_path: self.base_path.clone(),
            sub_path: self.sub_path.clone(),
            directives: DirectivesGroup::default(),
        }
    }

    /// Check the rules every base path must satisfy
    pub fn validate(base_path: &str) -> AssetResult<()> {
        let fail = |rule: &'static str| {
            Err(AssetError::InvalidPath {
                rule,
                path: base_path.to_string(),
            })
        };
        if !base_path.starts_with('/') {
            return fail("path must be absolute");
        }
        if base_path.contains('\\') {
            return fail("path must not contain a backslash");
        }
        if base_path.contains("//") {
            return fail("path must not contain empty segments");
        }
        if base_path.len() > 1 && base_path.ends_with('/') {
            return fail("path must not end with '/'");
        }
        if base_path.split('/').any(|s| s == "." || s == "..") {
            return fail("path must not contain '.' or '..' segments");
        }
        Ok(())
    }

    /// Resolve `given` against the directory of `source_path`
    pub fn relative_to(source_path: &str, given: &str) -> String {
        if given.starts_with('/') {
            return given.to_string();
        }
        let source_base = &source_path[..source_path.find(|c: char| c == ':' || c == '?').unwrap_or(source_path.len())];
        let mut out = directory(source_base).to_string();
        out.push_str(given);
        out
    }
}

impl fmt::Display for AssetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.join())
    }
}

impl From<&str> for AssetPath {
    fn from(s: &str) -> Self {
        AssetPath::split(s)
    }
}

/// Everything up to and including the last `/`
pub fn directory(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[..=i],
        None => "",
    }
}

/// The final path segment
pub fn filename(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

/// Lowercase extension of the final segment, without the dot
pub fn extension(path: &str) -> Option<String> {
    let name = filename(path);
    name.rfind('.').map(|i| name[i + 1..].to_ascii_lowercase())
}

/// The path with the final extension removed
pub fn remove_extension(path: &str) -> &str {
    let name_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    match path[name_start..].rfind('.') {
        Some(i) => &path[..name_start + i],
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_parts() {
        let p = AssetPath::split("/items/sword.png:idle.1?flipx?hueshift=30");
        assert_eq!(p.base_path, "/items/sword.png");
        assert_eq!(p.sub_path.as_deref(), Some("idle.1"));
        assert_eq!(p.directives.to_string(), "?flipx?hueshift=30");

        let p = AssetPath::split("/a.json");
        assert_eq!(p.sub_path, None);
        assert!(p.directives.is_empty());

        let p = AssetPath::split("/a.png?crop=0;0;4;4");
        assert_eq!(p.sub_path, None);
        assert_eq!(p.directives.to_string(), "?crop=0;0;4;4");
    }

    #[test]
    fn test_join_split_roundtrip() {
        for s in [
            "/a.png",
            "/dir/b.json:key.sub[2]",
            "/c.png:frame?flipx",
            "/d.png?replace=ff0000=00ff00;0000ff=ffffff?scalenearest=2",
            "/e.json:",
        ] {
            AssetPath::validate(&AssetPath::split(s).base_path).unwrap();
            assert_eq!(AssetPath::split(s).join(), s);
            let p = AssetPath::split(s);
            assert_eq!(AssetPath::split(&p.join()), p);
        }
    }

    #[test]
    fn test_validation_rules() {
        assert!(AssetPath::validate("/ok/path.png").is_ok());
        for bad in ["relative.png", "/a//b.png", "/a/../b.png", "/a/./b.png", "/dir/", "/a\\b.png"] {
            assert!(AssetPath::validate(bad).is_err(), "{} should fail", bad);
        }
    }

    #[test]
    fn test_relative_resolution() {
        assert_eq!(AssetPath::relative_to("/a/b/c.png", "d.png"), "/a/b/d.png");
        assert_eq!(AssetPath::relative_to("/a/b/c.png", "/x.png"), "/x.png");
        assert_eq!(AssetPath::relative_to("/a/c.png:frame?flipx", "mask.png"), "/a/mask.png");
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(directory("/a/b/c.png"), "/a/b/");
        assert_eq!(filename("/a/b/c.png"), "c.png");
        assert_eq!(extension("/a/b/C.PNG").as_deref(), Some("png"));
        assert_eq!(remove_extension("/a.b/c.patch"), "/a.b/c");
        assert_eq!(remove_extension("/a.b/c"), "/a.b/c");
    }
}
