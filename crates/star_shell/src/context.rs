//! Who is running a command, and the server state it can reach beyond the
//! world

use std::collections::BTreeMap;

use star_world::{ConnectionId, EntityId, Vec2F, SERVER_CONNECTION_ID};

/// The issuer of a command
#[derive(Debug, Clone, PartialEq)]
pub struct CommandCaller {
    pub connection: ConnectionId,
    pub name: String,
    pub admin: bool,
    /// Typed at the server console rather than sent by a client
    pub local: bool,
    /// Where spawning commands put things; the caller's aim position
    pub position: Option<Vec2F>,
}

impl CommandCaller {
    /// The server console: local and admin
    pub fn console() -> Self {
        Self {
            connection: SERVER_CONNECTION_ID,
            name: "console".to_string(),
            admin: true,
            local: true,
            position: None,
        }
    }

    pub fn client(connection: ConnectionId, name: impl Into<String>, admin: bool) -> Self {
        Self {
            connection,
            name: name.into(),
            admin,
            local: false,
            position: None,
        }
    }

    pub fn at(mut self, position: Vec2F) -> Self {
        self.position = Some(position);
        self
    }
}

/// A connected client as the server knows it
#[derive(Debug, Clone, PartialEq)]
pub struct ClientInfo {
    pub connection: ConnectionId,
    pub name: String,
    pub admin: bool,
    pub player: Option<EntityId>,
}

/// Server operations outside the world
pub trait ServerControl {
    fn clients(&self) -> Vec<ClientInfo>;

    /// Disconnect a client; false when it is not connected
    fn kick(&mut self, connection: ConnectionId, reason: &str) -> bool;

    /// Reload assets and rebuild the world's resources
    fn reload(&mut self) -> Result<(), String>;

    fn client_named(&self, name: &str) -> Option<ClientInfo> {
        self.clients().into_iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Banned player names with the reason given
#[derive(Debug, Clone, Default)]
pub struct BanList {
    bans: BTreeMap<String, String>,
}

impl BanList {
    pub fn new() -> Self {
        Self::default()
    }

    /// False when the name was already banned
    pub fn ban(&mut self, name: &str, reason: &str) -> bool {
        self.bans.insert(name.to_lowercase(), reason.to_string()).is_none()
    }

    pub fn unban(&mut self, name: &str) -> bool {
        self.bans.remove(&name.to_lowercase()).is_some()
    }

    /// The ban reason when `name` may not connect
    pub fn reason(&self, name: &str) -> Option<&str> {
        self.bans.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn is_banned(&self, name: &str) -> bool {
        self.reason(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.bans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bans.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bans_ignore_case() {
        let mut bans = BanList::new();
        assert!(bans.ban("Griefer", "lava everywhere"));
        assert!(!bans.ban("griefer", "again"));
        assert_eq!(bans.reason("GRIEFER"), Some("again"));
        assert!(bans.unban("griefer"));
        assert!(!bans.is_banned("Griefer"));
        assert!(bans.is_empty());
    }

    #[test]
    fn test_console_caller() {
        let console = CommandCaller::console();
        assert!(console.admin && console.local);
        let client = CommandCaller::client(3, "nova", false).at(Vec2F::new(1.0, 2.0));
        assert!(!client.local);
        assert_eq!(client.position, Some(Vec2F::new(1.0, 2.0)));
    }
}
