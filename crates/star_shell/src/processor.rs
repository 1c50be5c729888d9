//! Command dispatch
//!
//! Looks a parsed command up in the registry, checks the caller may run
//! it, and renders whatever happens as the string echoed back.

use std::collections::BTreeMap;

use star_world::World;

use crate::builtins;
use crate::command::{Command, CommandError, CommandResult};
use crate::context::{BanList, CommandCaller, ServerControl};
use crate::parser::Parser;

/// Who may run a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Anyone,
    /// Admins, or the server console
    Admin,
    /// The server console only
    Local,
}

pub type CommandHandler = fn(&mut CommandEnv<'_>, &Command) -> CommandResult;

#[derive(Clone)]
pub struct CommandSpec {
    pub name: &'static str,
    pub usage: &'static str,
    pub description: &'static str,
    pub access: Access,
    pub handler: CommandHandler,
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("access", &self.access)
            .finish()
    }
}

/// Everything a handler can touch
pub struct CommandEnv<'a> {
    pub caller: &'a CommandCaller,
    pub world: &'a mut World,
    pub server: &'a mut dyn ServerControl,
    pub bans: &'a mut BanList,
    pub commands: &'a BTreeMap<&'static str, CommandSpec>,
}

pub struct CommandProcessor {
    parser: Parser,
    commands: BTreeMap<&'static str, CommandSpec>,
    bans: BanList,
}

impl Default for CommandProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandProcessor {
    /// A processor with every built-in command
    pub fn new() -> Self {
        let mut processor = Self {
            parser: Parser::new(),
            commands: BTreeMap::new(),
            bans: BanList::new(),
        };
        for spec in builtins::all() {
            processor.register(spec);
        }
        processor
    }

    pub fn register(&mut self, spec: CommandSpec) {
        self.commands.insert(spec.name, spec);
    }

    pub fn command(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name)
    }

    pub fn command_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.commands.keys().copied()
    }

    pub fn bans(&self) -> &BanList {
        &self.bans
    }

    pub fn bans_mut(&mut self) -> &mut BanList {
        &mut self.bans
    }

    /// Run one command line. Failures come back as the reply text.
    pub fn execute(
        &mut self,
        caller: &CommandCaller,
        world: &mut World,
        server: &mut dyn ServerControl,
        line: &str,
    ) -> String {
        match self.try_execute(caller, world, server, line) {
            Ok(reply) => {
                log::info!("{} ran '{}'", caller.name, line.trim());
                reply
            }
            Err(e) => {
                log::info!("{} failed to run '{}': {}", caller.name, line.trim(), e);
                e.to_string()
            }
        }
    }

    pub fn try_execute(
        &mut self,
        caller: &CommandCaller,
        world: &mut World,
        server: &mut dyn ServerControl,
        line: &str,
    ) -> CommandResult {
        let command = self.parser.parse(line)?;
        let spec = self
            .commands
            .get(command.name.as_str())
            .ok_or_else(|| CommandError::UnknownCommand(command.name.clone()))?;
        check_access(caller, spec)?;

        let mut env = CommandEnv {
            caller,
            world,
            server,
            bans: &mut self.bans,
            commands: &self.commands,
        };
        (spec.handler)(&mut env, &command)
    }
}

fn check_access(caller: &CommandCaller, spec: &CommandSpec) -> Result<(), CommandError> {
    match spec.access {
        Access::Anyone => Ok(()),
        Access::Admin if caller.admin || caller.local => Ok(()),
        Access::Admin => Err(CommandError::NotAdmin(spec.name.to_string())),
        Access::Local if caller.local => Ok(()),
        Access::Local => Err(CommandError::NotLocal(spec.name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(access: Access) -> CommandSpec {
        CommandSpec {
            name: "probe",
            usage: "probe",
            description: "",
            access,
            handler: |_, _| Ok(String::new()),
        }
    }

    #[test]
    fn test_access_checks() {
        let console = CommandCaller::console();
        let admin = CommandCaller::client(2, "op", true);
        let player = CommandCaller::client(3, "nova", false);

        assert!(check_access(&player, &spec(Access::Anyone)).is_ok());
        assert!(check_access(&admin, &spec(Access::Admin)).is_ok());
        assert!(matches!(check_access(&player, &spec(Access::Admin)), Err(CommandError::NotAdmin(_))));
        assert!(check_access(&console, &spec(Access::Local)).is_ok());
        assert!(matches!(check_access(&admin, &spec(Access::Local)), Err(CommandError::NotLocal(_))));
    }

    #[test]
    fn test_builtins_registered() {
        let processor = CommandProcessor::new();
        assert_eq!(processor.command_names().count(), 28);
        assert_eq!(processor.command("run").map(|s| s.access), Some(Access::Local));
        assert_eq!(processor.command("whoami").map(|s| s.access), Some(Access::Anyone));
    }
}
