//! Command parser
//!
//! Splits a command line into a name and arguments. Quotes group words,
//! and a `{...}` or `[...]` run stays one argument so JSON parameters can
//! be typed inline.

use crate::command::Command;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Empty input")]
    EmptyInput,

    #[error("Unclosed quote")]
    UnclosedQuote,

    #[error("Unbalanced '{0}'")]
    UnbalancedBracket(char),
}

#[derive(Debug, Clone, Default)]
pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a command line. A leading `/` (as typed in chat) is dropped.
    pub fn parse(&self, input: &str) -> Result<Command, ParseError> {
        let input = input.trim();
        let input = input.strip_prefix('/').unwrap_or(input);
        let mut words = self.tokenize(input)?.into_iter();
        let name = words.next().ok_or(ParseError::EmptyInput)?;
        let raw = input.split_once(char::is_whitespace).map_or("", |(_, rest)| rest.trim());
        Ok(Command::new(name.to_lowercase(), words.collect()).with_raw_args(raw))
    }

    /// Split into words
    pub fn tokenize(&self, input: &str) -> Result<Vec<String>, ParseError> {
        let mut tokens = Vec::new();
        let mut chars = input.chars().peekable();

        while let Some(&c) = chars.peek() {
            match c {
                ' ' | '\t' => {
                    chars.next();
                }

                // Double-quoted string
                '"' => {
                    chars.next();
                    let mut word = String::new();
                    let mut closed = false;
                    while let Some(c) = chars.next() {
                        match c {
                            '"' => {
                                closed = true;
                                break;
                            }
                            '\\' => match chars.next() {
                                Some('n') => word.push('\n'),
                                Some('t') => word.push('\t'),
                                Some('\\') => word.push('\\'),
                                Some('"') => word.push('"'),
                                Some(other) => {
                                    word.push('\\');
                                    word.push(other);
                                }
                                None => word.push('\\'),
                            },
                            _ => word.push(c),
                        }
                    }
                    if !closed {
                        return Err(ParseError::UnclosedQuote);
                    }
                    tokens.push(word);
                }

                // Single-quoted string (no escapes)
                '\'' => {
                    chars.next();
                    let mut word = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '\'' {
                            closed = true;
                            break;
                        }
                        word.push(c);
                    }
                    if !closed {
                        return Err(ParseError::UnclosedQuote);
                    }
                    tokens.push(word);
                }

                // Bracketed JSON, kept verbatim
                '{' | '[' => tokens.push(bracketed(&mut chars)?),

                _ => {
                    let mut word = String::new();
                    while let Some(&c) = chars.peek() {
                        if matches!(c, ' ' | '\t' | '"' | '\'') {
                            break;
                        }
                        word.push(c);
                        chars.next();
                    }
                    tokens.push(word);
                }
            }
        }

        Ok(tokens)
    }
}

/// Consume one balanced bracket run. Brackets inside JSON strings do not
/// count.
fn bracketed(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Result<String, ParseError> {
    let mut word = String::new();
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in chars.by_ref() {
        word.push(c);
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(c) {
                    return Err(ParseError::UnbalancedBracket(c));
                }
                if stack.is_empty() {
                    return Ok(word);
                }
            }
            _ => {}
        }
    }

    if in_string {
        Err(ParseError::UnclosedQuote)
    } else {
        Err(ParseError::UnbalancedBracket(stack.last().copied().unwrap_or('{')))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let cmd = Parser::new().parse("help").unwrap();
        assert_eq!(cmd.name, "help");
        assert!(cmd.args.is_empty());
    }

    #[test]
    fn test_parse_with_args() {
        let cmd = Parser::new().parse("/SpawnMonster poptop 3").unwrap();
        assert_eq!(cmd.name, "spawnmonster");
        assert_eq!(cmd.args, vec!["poptop", "3"]);
    }

    #[test]
    fn test_parse_quoted() {
        let cmd = Parser::new().parse(r#"kick "Space Cowboy" 'too loud'"#).unwrap();
        assert_eq!(cmd.args, vec!["Space Cowboy", "too loud"]);
        assert_eq!(cmd.raw_args, r#""Space Cowboy" 'too loud'"#);
    }

    #[test]
    fn test_json_argument_stays_whole() {
        let cmd = Parser::new()
            .parse(r#"spawnmonster poptop 2 {"aggressive": true, "name": "a } b", "drops": [1, 2]}"#)
            .unwrap();
        assert_eq!(cmd.args.len(), 3);
        assert_eq!(cmd.args[2], r#"{"aggressive": true, "name": "a } b", "drops": [1, 2]}"#);
    }

    #[test]
    fn test_escape_sequences() {
        let cmd = Parser::new().parse(r#"run "print(\"hi\")""#).unwrap();
        assert_eq!(cmd.args[0], r#"print("hi")"#);
    }

    #[test]
    fn test_errors() {
        let parser = Parser::new();
        assert_eq!(parser.parse("   ").unwrap_err(), ParseError::EmptyInput);
        assert_eq!(parser.parse(r#"kick "unclosed"#).unwrap_err(), ParseError::UnclosedQuote);
        assert_eq!(parser.parse("run {\"a\": 1").unwrap_err(), ParseError::UnbalancedBracket('}'));
        assert_eq!(parser.parse("run {]").unwrap_err(), ParseError::UnbalancedBracket(']'));
    }
}
