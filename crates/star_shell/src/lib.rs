//! # star_shell - Admin Commands
//!
//! The command surface admins reach through chat or the server console.
//! Every command takes its arguments as one line, runs against the world
//! (and the server for connection-level commands) and answers with a
//! string.
//!
//! ```text
//! Input line ──► Parser ──► Command ──► CommandProcessor ──► World
//!                                            │
//!                                            ▼
//!                                      ServerControl
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let mut processor = CommandProcessor::new();
//! let reply = processor.execute(&CommandCaller::console(), &mut world, &mut server, "spawnmonster poptop 2");
//! ```

pub mod builtins;
pub mod command;
pub mod context;
pub mod parser;
pub mod processor;

pub use command::{Command, CommandError, CommandResult};
pub use context::{BanList, ClientInfo, CommandCaller, ServerControl};
pub use parser::{ParseError, Parser};
pub use processor::{Access, CommandEnv, CommandHandler, CommandProcessor, CommandSpec};
