//! Command representation and argument access

use std::str::FromStr;

use star_world::{Json, RectI, Vec2F, WorldError};

use crate::parser::ParseError;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Unknown command '{0}'")]
    UnknownCommand(String),

    #[error("Not enough arguments, usage: {0}")]
    MissingArgument(&'static str),

    #[error("Invalid {name} '{value}'")]
    InvalidArgument { name: &'static str, value: String },

    #[error("Insufficient privileges for '{0}'")]
    NotAdmin(String),

    #[error("'{0}' can only be run from the server console")]
    NotLocal(String),

    #[error("{0}")]
    Failed(String),

    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("{0}")]
    World(#[from] WorldError),
}

pub type CommandResult = Result<String, CommandError>;

/// A parsed command line
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub args: Vec<String>,
    /// Everything after the name exactly as typed
    pub raw_args: String,
}

impl Command {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            raw_args: args.join(" "),
            args,
        }
    }

    pub fn with_raw_args(mut self, raw_args: impl Into<String>) -> Self {
        self.raw_args = raw_args.into();
        self
    }

    pub fn get_arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    pub fn require_arg(&self, index: usize, usage: &'static str) -> Result<&str, CommandError> {
        self.get_arg(index).ok_or(CommandError::MissingArgument(usage))
    }

    /// Parse an optional argument; present but unparsable is an error
    pub fn parse_arg<T: FromStr>(&self, index: usize, name: &'static str) -> Result<Option<T>, CommandError> {
        self.get_arg(index)
            .map(|value| {
                value.parse().map_err(|_| CommandError::InvalidArgument {
                    name,
                    value: value.to_string(),
                })
            })
            .transpose()
    }

    pub fn require_parsed<T: FromStr>(&self, index: usize, name: &'static str, usage: &'static str) -> Result<T, CommandError> {
        self.parse_arg(index, name)?.ok_or(CommandError::MissingArgument(usage))
    }

    /// Optional JSON object argument, `null` when absent
    pub fn json_arg(&self, index: usize) -> Result<Json, CommandError> {
        let Some(value) = self.get_arg(index) else {
            return Ok(Json::Null);
        };
        match serde_json::from_str::<Json>(value) {
            Ok(json) if json.is_object() => Ok(json),
            _ => Err(CommandError::InvalidArgument {
                name: "parameters",
                value: value.to_string(),
            }),
        }
    }

    /// Two float arguments starting at `index`, if both are present
    pub fn position_arg(&self, index: usize) -> Result<Option<Vec2F>, CommandError> {
        let x = self.parse_arg::<f32>(index, "x coordinate")?;
        let y = self.parse_arg::<f32>(index + 1, "y coordinate")?;
        Ok(match (x, y) {
            (Some(x), Some(y)) => Some(Vec2F::new(x, y)),
            _ => None,
        })
    }

    /// Four integer arguments starting at `index` as a tile region
    pub fn region_arg(&self, index: usize, usage: &'static str) -> Result<RectI, CommandError> {
        let mut coords = [0i32; 4];
        for (i, coord) in coords.iter_mut().enumerate() {
            *coord = self.require_parsed(index + i, "coordinate", usage)?;
        }
        let [x0, y0, x1, y1] = coords;
        Ok(RectI::from_coords(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)))
    }

    /// Typed text after the first `skip` words, untouched by quoting rules.
    /// Commands that take code use this.
    pub fn raw_rest(&self, skip: usize) -> Option<&str> {
        let mut rest = self.raw_args.trim();
        for _ in 0..skip {
            rest = rest.split_once(char::is_whitespace).map_or("", |(_, r)| r).trim_start();
        }
        (!rest.is_empty()).then_some(rest)
    }

    /// Every argument from `index` on, joined back with spaces
    pub fn rest(&self, index: usize) -> Option<String> {
        if index >= self.args.len() {
            return None;
        }
        Some(self.args[index..].join(" "))
    }
}

/// Parse a boolean argument the way admins type it
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Some(true),
        "false" | "off" | "no" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cmd(args: &[&str]) -> Command {
        Command::new("test", args.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_parse_arg() {
        let c = cmd(&["5", "x"]);
        assert_eq!(c.parse_arg::<u32>(0, "level").unwrap(), Some(5));
        assert!(matches!(c.parse_arg::<u32>(1, "level"), Err(CommandError::InvalidArgument { name: "level", .. })));
        assert_eq!(c.parse_arg::<u32>(2, "level").unwrap(), None);
        assert!(matches!(c.require_parsed::<u32>(2, "level", "usage"), Err(CommandError::MissingArgument("usage"))));
    }

    #[test]
    fn test_json_arg() {
        let c = cmd(&[r#"{"a": 1}"#, "[1]"]);
        assert_eq!(c.json_arg(0).unwrap(), json!({"a": 1}));
        assert!(c.json_arg(1).is_err());
        assert_eq!(c.json_arg(2).unwrap(), Json::Null);
    }

    #[test]
    fn test_region_is_normalised() {
        let c = cmd(&["10", "4", "2", "8"]);
        assert_eq!(c.region_arg(0, "u").unwrap(), RectI::from_coords(2, 4, 10, 8));
        assert!(cmd(&["1", "2"]).region_arg(0, "u").is_err());
    }

    #[test]
    fn test_rest_and_position() {
        let c = cmd(&["1.5", "2", "return", "1"]);
        assert_eq!(c.position_arg(0).unwrap(), Some(Vec2F::new(1.5, 2.0)));
        assert_eq!(c.rest(2).as_deref(), Some("return 1"));
        assert_eq!(c.rest(4), None);
        let c = c.with_raw_args("  7   return 'a  b'");
        assert_eq!(c.raw_rest(0), Some("7   return 'a  b'"));
        assert_eq!(c.raw_rest(1), Some("return 'a  b'"));
        assert_eq!(c.raw_rest(4), None);
        assert_eq!(parse_bool("On"), Some(true));
        assert_eq!(parse_bool("maybe"), None);
    }
}
