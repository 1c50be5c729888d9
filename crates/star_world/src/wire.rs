//! Wire nodes and the per-step wire coordinator
//!
//! All output levels are snapshotted before any input is written, and all
//! inputs are written before any entity evaluates. Within a step the
//! evaluation order of wire entities is therefore invisible; a cycle sees
//! the previous step's levels.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use star_core::{DataReader, DataWriter};
use star_math::Vec2I;
use star_net::{NetResult, NetValue};

use crate::entity::EntityId;
use crate::world::World;

/// One end of a wire: the tile position of a wire entity plus a node index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireConnection {
    pub entity_location: Vec2I,
    pub node_index: usize,
}

impl WireConnection {
    pub const fn new(entity_location: Vec2I, node_index: usize) -> Self {
        Self {
            entity_location,
            node_index,
        }
    }
}

impl NetValue for WireConnection {
    fn write_value(&self, out: &mut DataWriter) {
        self.entity_location.write_value(out);
        out.write_vlq_u(self.node_index as u64);
    }

    fn read_value(input: &mut DataReader<'_>) -> NetResult<Self> {
        let entity_location = Vec2I::read_value(input)?;
        let node_index = input.read_vlq_u()? as usize;
        Ok(Self {
            entity_location,
            node_index,
        })
    }
}

/// A node as configured on an entity: its offset from the entity plus its
/// live connections and level
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WireNode {
    pub position: Vec2I,
    pub connections: Vec<WireConnection>,
    pub state: bool,
}

impl WireNode {
    pub fn new(position: Vec2I) -> Self {
        Self {
            position,
            connections: Vec::new(),
            state: false,
        }
    }

    pub fn connect(&mut self, connection: WireConnection) {
        if !self.connections.contains(&connection) {
            self.connections.push(connection);
        }
    }

    pub fn disconnect(&mut self, connection: WireConnection) {
        self.connections.retain(|c| *c != connection);
    }
}

/// Run one wire step over every wire entity the world simulates
pub fn update_wires(world: &mut World) {
    let mut outputs: HashMap<WireConnection, bool> = HashMap::new();
    let mut masters: Vec<EntityId> = Vec::new();
    for id in world.entity_ids() {
        let Some(entity) = world.entity(id) else {
            continue;
        };
        let Some(wire) = entity.as_wire_entity() else {
            continue;
        };
        let location = wire.wire_location();
        for node in 0..wire.output_node_count() {
            outputs.insert(WireConnection::new(location, node), wire.output_state(node));
        }
        if entity.is_master() {
            masters.push(id);
        }
    }

    for &id in &masters {
        if let Some(wire) = world.entity_mut(id).and_then(|e| e.as_wire_entity_mut()) {
            for node in 0..wire.input_node_count() {
                let level = wire
                    .input_connections(node)
                    .iter()
                    .any(|c| outputs.get(c).copied().unwrap_or(false));
                wire.set_input_state(node, level);
            }
        }
    }

    for id in masters {
        world.with_entity(id, |entity, world| {
            if let Some(wire) = entity.as_wire_entity_mut() {
                wire.evaluate(world);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_connections_are_unique() {
        let mut node = WireNode::new(Vec2I::new(0, 1));
        let c = WireConnection::new(Vec2I::new(4, 4), 0);
        node.connect(c);
        node.connect(c);
        assert_eq!(node.connections.len(), 1);
        node.disconnect(c);
        assert!(node.connections.is_empty());
    }

    #[test]
    fn test_connection_net_value() {
        let c = WireConnection::new(Vec2I::new(-3, 12), 2);
        let mut out = DataWriter::new();
        c.write_value(&mut out);
        let bytes = out.into_bytes();
        assert_eq!(WireConnection::read_value(&mut DataReader::new(&bytes)).unwrap(), c);
    }
}
