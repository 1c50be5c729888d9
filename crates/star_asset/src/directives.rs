//! Directive strings: `?op=args?op=args`
//!
//! Parsed directives are interned, so every path carrying the same string
//! shares one parsed list. Long strings parse lazily entry by entry.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Range;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use crate::error::{AssetError, AssetResult};
use crate::image::Image;
use crate::image_ops::ImageOperation;

/// Strings shorter than this parse every entry up front
const EAGER_PARSE_LIMIT: usize = 1000;
const INTERN_PURGE_THRESHOLD: usize = 4096;

/// One `?`-separated token and its parse state.
///
/// An unset cell means not parsed yet; `Err` carries the parse failure and
/// is raised when the entry is applied.
pub struct DirectiveEntry {
    range: Range<usize>,
    parsed: OnceLock<Result<ImageOperation, String>>,
}

struct DirectivesData {
    string: String,
    entries: Vec<DirectiveEntry>,
}

impl DirectivesData {
    fn parse(string: &str) -> Self {
        let mut entries = Vec::new();
        let mut offset = 0;
        for token in string.split('?') {
            let range = offset..offset + token.len();
            offset += token.len() + 1;
            if !token.is_empty() {
                entries.push(DirectiveEntry {
                    range,
                    parsed: OnceLock::new(),
                });
            }
        }
        let data = Self {
            string: string.to_string(),
            entries,
        };
        let eager = if string.len() < EAGER_PARSE_LIMIT {
            data.entries.len()
        } else {
            1
        };
        for entry in data.entries.iter().take(eager) {
            data.operation_of(entry);
        }
        data
    }

    fn token(&self, entry: &DirectiveEntry) -> &str {
        &self.string[entry.range.clone()]
    }

    fn operation_of<'a>(&'a self, entry: &'a DirectiveEntry) -> &'a Result<ImageOperation, String> {
        entry.parsed.get_or_init(|| ImageOperation::parse(self.token(entry)))
    }
}

fn interned() -> &'static Mutex<HashMap<String, Weak<DirectivesData>>> {
    static INTERNED: OnceLock<Mutex<HashMap<String, Weak<DirectivesData>>>> = OnceLock::new();
    INTERNED.get_or_init(|| Mutex::new(HashMap::new()))
}

/// A shared, parsed directives string
#[derive(Clone)]
pub struct Directives {
    data: Arc<DirectivesData>,
}

impl Directives {
    /// Parse or reuse the parsed form of `string`
    pub fn new(string: &str) -> Self {
        let mut table = interned().lock();
        if let Some(data) = table.get(string).and_then(Weak::upgrade) {
            return Self { data };
        }
        if table.len() >= INTERN_PURGE_THRESHOLD {
            table.retain(|_, weak| weak.strong_count() > 0);
        }
        let data = Arc::new(DirectivesData::parse(string));
        table.insert(string.to_string(), Arc::downgrade(&data));
        Self { data }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.data.string
    }

    pub fn len(&self) -> usize {
        self.data.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.entries.is_empty()
    }

    /// The first token, always parsed
    pub fn prefix(&self) -> &str {
        self.data
            .entries
            .first()
            .map(|e| self.data.token(e))
            .unwrap_or("")
    }

    /// True when both values share one parsed representation
    pub fn shares_with(&self, other: &Directives) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Whether entry `i` has been parsed yet
    pub fn is_parsed(&self, i: usize) -> bool {
        self.data.entries.get(i).is_some_and(|e| e.parsed.get().is_some())
    }

    /// Parse (if needed) and return every operation
    pub fn operations(&self) -> impl Iterator<Item = AssetResult<&ImageOperation>> + '_ {
        self.data.entries.iter().map(move |entry| {
            self.data
                .operation_of(entry)
                .as_ref()
                .map_err(|e| AssetError::Directives(e.clone()))
        })
    }

    /// Names of every image an operation here reads
    pub fn references(&self) -> Vec<String> {
        self.operations()
            .filter_map(Result::ok)
            .flat_map(|op| op.references().iter().cloned())
            .collect()
    }
}

impl PartialEq for Directives {
    fn eq(&self, other: &Self) -> bool {
        self.shares_with(other) || self.as_str() == other.as_str()
    }
}

impl Eq for Directives {}

impl Hash for Directives {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl fmt::Debug for Directives {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Directives({:?})", self.as_str())
    }
}

/// The directives of an asset path: an ordered list of directive strings
/// applied one after another
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct DirectivesGroup {
    directives: Vec<Directives>,
}

impl DirectivesGroup {
    pub fn parse(string: &str) -> Self {
        let mut group = Self::default();
        if !string.is_empty() {
            group.push(Directives::new(string));
        }
        group
    }

    pub fn push(&mut self, directives: Directives) {
        if !directives.is_empty() {
            self.directives.push(directives);
        }
    }

    /// A new group with `directives` appended
    pub fn with(&self, directives: Directives) -> Self {
        let mut out = self.clone();
        out.push(directives);
        out
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Directives> {
        self.directives.iter()
    }

    pub(crate) fn append_to(&self, out: &mut String) {
        for d in &self.directives {
            out.push_str(d.as_str());
        }
    }

    /// Every referenced image name, in order
    pub fn references(&self) -> Vec<String> {
        self.directives.iter().flat_map(Directives::references).collect()
    }

    /// Run every operation in order on a copy of `image`
    pub fn apply(&self, image: &Image, lookup: &dyn Fn(&str) -> Option<Image>) -> AssetResult<Image> {
        let mut out = image.clone();
        for directives in &self.directives {
            for op in directives.operations() {
                op?.apply(&mut out, lookup)?;
            }
        }
        Ok(out)
    }
}

impl fmt::Display for DirectivesGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = String::new();
        self.append_to(&mut s);
        f.write_str(&s)
    }
}

impl fmt::Debug for DirectivesGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DirectivesGroup({:?})", self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use star_core::Color;

    #[test]
    fn test_equal_strings_share() {
        let a = Directives::new("?flipx?hueshift=10");
        let b = Directives::new("?flipx?hueshift=10");
        assert!(a.shares_with(&b));
        assert_eq!(a.len(), 2);
        assert_eq!(a.prefix(), "flipx");
    }

    #[test]
    fn test_long_strings_parse_lazily() {
        let long = "?flipx".repeat(EAGER_PARSE_LIMIT / 6 + 10);
        let d = Directives::new(&long);
        assert!(d.is_parsed(0));
        assert!(!d.is_parsed(1));
        assert_eq!(d.operations().count(), d.len());
        assert!(d.is_parsed(d.len() - 1));
    }

    #[test]
    fn test_error_entry_fails_on_apply() {
        let group = DirectivesGroup::parse("?flipx?bogus=1");
        let result = group.apply(&Image::new(1, 1), &|_| None);
        assert!(matches!(result, Err(AssetError::Directives(_))));
    }

    #[test]
    fn test_group_applies_in_order() {
        let mut group = DirectivesGroup::parse("?crop=0;0;2;2");
        group.push(Directives::new("?setcolor=0000ff"));
        let out = group.apply(&Image::filled(4, 4, Color::RED), &|_| None).unwrap();
        assert_eq!(out.size(), (2, 2));
        assert_eq!(out.get(1, 1), Color::BLUE);
        assert_eq!(group.to_string(), "?crop=0;0;2;2?setcolor=0000ff");
    }
}
