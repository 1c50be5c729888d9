//! Entity id allocation
//!
//! The server allocates from `[1, i32::MAX]`. Every client connection owns
//! a block of 65536 negative ids, so ids created on different machines
//! never collide.

use std::collections::BTreeSet;

use crate::entity::EntityId;
use crate::error::{Result, WorldError};

pub type ConnectionId = u16;

pub const SERVER_CONNECTION_ID: ConnectionId = 0;

/// Highest client connection whose id block still fits in an `i32`
pub const MAX_CLIENT_CONNECTION_ID: ConnectionId = 32767;

const CLIENT_SPACE_SIZE: i64 = 65536;

/// Inclusive id range owned by a connection, `None` past
/// [`MAX_CLIENT_CONNECTION_ID`]
pub fn connection_entity_space(connection: ConnectionId) -> Option<(EntityId, EntityId)> {
    if connection == SERVER_CONNECTION_ID {
        Some((1, EntityId::MAX))
    } else if connection <= MAX_CLIENT_CONNECTION_ID {
        let min = -CLIENT_SPACE_SIZE * connection as i64;
        Some((min as EntityId, (min + CLIENT_SPACE_SIZE - 1) as EntityId))
    } else {
        None
    }
}

/// Connection whose space contains `id`; `None` for the null id
pub fn connection_for_entity(id: EntityId) -> Option<ConnectionId> {
    if id > 0 {
        return Some(SERVER_CONNECTION_ID);
    }
    if id == 0 {
        return None;
    }
    let connection = (-(id as i64) + CLIENT_SPACE_SIZE - 1) / CLIENT_SPACE_SIZE;
    ConnectionId::try_from(connection).ok()
}

/// Hands out unused ids within one connection's space. Server ids count
/// up from 1, client ids count down from -1 within their block.
#[derive(Debug, Clone)]
pub struct EntityIdMap {
    min: EntityId,
    max: EntityId,
    ascending: bool,
    next: EntityId,
    used: BTreeSet<EntityId>,
}

impl EntityIdMap {
    pub fn new(connection: ConnectionId) -> Result<Self> {
        let (min, max) =
            connection_entity_space(connection).ok_or(WorldError::UnknownPeer(connection))?;
        let ascending = connection == SERVER_CONNECTION_ID;
        Ok(Self {
            min,
            max,
            ascending,
            next: if ascending { min } else { max },
            used: BTreeSet::new(),
        })
    }

    pub fn contains_id(&self, id: EntityId) -> bool {
        id >= self.min && id <= self.max
    }

    pub fn reserve(&mut self) -> Result<EntityId> {
        let span = (self.max as i64 - self.min as i64 + 1) as u64;
        if self.used.len() as u64 >= span {
            return Err(WorldError::IdSpaceExhausted);
        }
        let mut candidate = self.next;
        while self.used.contains(&candidate) {
            candidate = self.step(candidate);
        }
        self.used.insert(candidate);
        self.next = self.step(candidate);
        Ok(candidate)
    }

    fn step(&self, id: EntityId) -> EntityId {
        if self.ascending {
            if id >= self.max {
                self.min
            } else {
                id + 1
            }
        } else if id <= self.min {
            self.max
        } else {
            id - 1
        }
    }

    /// Mark an id chosen elsewhere as in use. Ids outside this space are
    /// refused.
    pub fn claim(&mut self, id: EntityId) -> bool {
        self.contains_id(id) && self.used.insert(id)
    }

    pub fn release(&mut self, id: EntityId) {
        self.used.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_spaces_disjoint_from_server() {
        let (server_min, server_max) = connection_entity_space(SERVER_CONNECTION_ID).unwrap();
        assert_eq!((server_min, server_max), (1, EntityId::MAX));
        for connection in [1u16, 2, 7, 1000, MAX_CLIENT_CONNECTION_ID] {
            let (min, max) = connection_entity_space(connection).unwrap();
            assert!(min <= max);
            assert!(max < server_min, "connection {} overlaps the server", connection);
            assert_eq!(max as i64 - min as i64 + 1, CLIENT_SPACE_SIZE);
        }
        assert_eq!(connection_entity_space(MAX_CLIENT_CONNECTION_ID + 1), None);
    }

    #[test]
    fn test_client_spaces_disjoint_from_each_other() {
        let (_, max2) = connection_entity_space(2).unwrap();
        let (min1, _) = connection_entity_space(1).unwrap();
        assert!(max2 < min1);
        assert_eq!(connection_entity_space(1), Some((-65536, -1)));
    }

    #[test]
    fn test_connection_for_entity() {
        assert_eq!(connection_for_entity(5), Some(SERVER_CONNECTION_ID));
        assert_eq!(connection_for_entity(0), None);
        assert_eq!(connection_for_entity(-1), Some(1));
        assert_eq!(connection_for_entity(-65536), Some(1));
        assert_eq!(connection_for_entity(-65537), Some(2));
    }

    #[test]
    fn test_reserve_and_release() {
        let mut ids = EntityIdMap::new(SERVER_CONNECTION_ID).unwrap();
        assert_eq!(ids.reserve().unwrap(), 1);
        assert_eq!(ids.reserve().unwrap(), 2);
        ids.release(1);
        assert_eq!(ids.reserve().unwrap(), 3);

        let mut client = EntityIdMap::new(3).unwrap();
        let id = client.reserve().unwrap();
        assert_eq!(id, -3 * 65536 + 65535);
        assert_eq!(connection_for_entity(id), Some(3));
        assert!(client.contains_id(id));
        assert!(!client.contains_id(1));
    }

    #[test]
    fn test_claim_stays_within_space() {
        let mut client = EntityIdMap::new(1).unwrap();
        assert!(!client.claim(5));
        assert!(!client.claim(-65537));
        assert!(client.is_empty());

        for id in -65536..=-2 {
            assert!(client.claim(id));
        }
        assert!(!client.claim(-2));
        assert_eq!(client.reserve().unwrap(), -1);
        assert!(matches!(client.reserve(), Err(WorldError::IdSpaceExhausted)));
    }
}
