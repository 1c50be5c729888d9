//! Packets exchanged between a master world and its peers
//!
//! Each packet is a one byte tag followed by its fields. JSON travels as
//! text, entity ids as signed VLQs and net state as length-prefixed bytes.

use star_core::{DataError, DataReader, DataWriter, Json};
use star_math::Vec2I;

use crate::entity::{ConnectionId, EntityId, EntityType};
use crate::error::{Result, WorldError};
use crate::interaction::{InteractAction, InteractRequest};
use crate::tile::Tile;

/// Entity a message is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageTarget {
    Id(EntityId),
    UniqueId(String),
}

impl std::fmt::Display for MessageTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageTarget::Id(id) => write!(f, "entity {}", id),
            MessageTarget::UniqueId(unique) => write!(f, "unique entity '{}'", unique),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorldPacket {
    /// A new entity: factory store plus its first full net state
    EntityCreate {
        entity_type: EntityType,
        store: Json,
        net_state: Vec<u8>,
        entity_id: EntityId,
    },
    EntityUpdate {
        entity_id: EntityId,
        delta: Vec<u8>,
    },
    EntityDestroy {
        entity_id: EntityId,
        /// Whether the master destroyed it, as opposed to it leaving the
        /// peer's view
        death: bool,
    },
    EntityMessage {
        target: MessageTarget,
        name: String,
        args: Vec<Json>,
        uuid: String,
        from_connection: ConnectionId,
    },
    EntityMessageResponse {
        uuid: String,
        response: std::result::Result<Json, String>,
    },
    EntityInteract {
        request: InteractRequest,
        request_id: u64,
    },
    EntityInteractResult {
        action: InteractAction,
        request_id: u64,
    },
    TileUpdate {
        position: Vec2I,
        tile: Tile,
    },
}

const ENTITY_CREATE: u8 = 0;
const ENTITY_UPDATE: u8 = 1;
const ENTITY_DESTROY: u8 = 2;
const ENTITY_MESSAGE: u8 = 3;
const ENTITY_MESSAGE_RESPONSE: u8 = 4;
const ENTITY_INTERACT: u8 = 5;
const ENTITY_INTERACT_RESULT: u8 = 6;
const TILE_UPDATE: u8 = 7;

fn write_json(out: &mut DataWriter, json: &Json) {
    out.write_string(&json.to_string());
}

fn read_json(input: &mut DataReader<'_>) -> Result<Json> {
    let text = input.read_string()?;
    Ok(serde_json::from_str(&text)?)
}

fn write_id(out: &mut DataWriter, id: EntityId) {
    out.write_vlq_i(id as i64);
}

fn read_id(input: &mut DataReader<'_>) -> Result<EntityId> {
    let raw = input.read_vlq_i()?;
    EntityId::try_from(raw).map_err(|_| WorldError::MalformedPacket(format!("entity id {} out of range", raw)))
}

impl WorldPacket {
    pub fn name(&self) -> &'static str {
        match self {
            WorldPacket::EntityCreate { .. } => "EntityCreate",
            WorldPacket::EntityUpdate { .. } => "EntityUpdate",
            WorldPacket::EntityDestroy { .. } => "EntityDestroy",
            WorldPacket::EntityMessage { .. } => "EntityMessage",
            WorldPacket::EntityMessageResponse { .. } => "EntityMessageResponse",
            WorldPacket::EntityInteract { .. } => "EntityInteract",
            WorldPacket::EntityInteractResult { .. } => "EntityInteractResult",
            WorldPacket::TileUpdate { .. } => "TileUpdate",
        }
    }

    pub fn write(&self, out: &mut DataWriter) {
        match self {
            WorldPacket::EntityCreate {
                entity_type,
                store,
                net_state,
                entity_id,
            } => {
                out.write_u8(ENTITY_CREATE);
                out.write_u8(*entity_type as u8);
                write_json(out, store);
                out.write_bytes(net_state);
                write_id(out, *entity_id);
            }
            WorldPacket::EntityUpdate { entity_id, delta } => {
                out.write_u8(ENTITY_UPDATE);
                write_id(out, *entity_id);
                out.write_bytes(delta);
            }
            WorldPacket::EntityDestroy { entity_id, death } => {
                out.write_u8(ENTITY_DESTROY);
                write_id(out, *entity_id);
                out.write_bool(*death);
            }
            WorldPacket::EntityMessage {
                target,
                name,
                args,
                uuid,
                from_connection,
            } => {
                out.write_u8(ENTITY_MESSAGE);
                match target {
                    MessageTarget::Id(id) => {
                        out.write_u8(0);
                        write_id(out, *id);
                    }
                    MessageTarget::UniqueId(unique) => {
                        out.write_u8(1);
                        out.write_string(unique);
                    }
                }
                out.write_string(name);
                out.write_vlq_u(args.len() as u64);
                for arg in args {
                    write_json(out, arg);
                }
                out.write_string(uuid);
                out.write_u16(*from_connection);
            }
            WorldPacket::EntityMessageResponse { uuid, response } => {
                out.write_u8(ENTITY_MESSAGE_RESPONSE);
                out.write_string(uuid);
                match response {
                    Ok(value) => {
                        out.write_bool(true);
                        write_json(out, value);
                    }
                    Err(error) => {
                        out.write_bool(false);
                        out.write_string(error);
                    }
                }
            }
            WorldPacket::EntityInteract { request, request_id } => {
                out.write_u8(ENTITY_INTERACT);
                request.write(out);
                out.write_vlq_u(*request_id);
            }
            WorldPacket::EntityInteractResult { action, request_id } => {
                out.write_u8(ENTITY_INTERACT_RESULT);
                action.write(out);
                out.write_vlq_u(*request_id);
            }
            WorldPacket::TileUpdate { position, tile } => {
                out.write_u8(TILE_UPDATE);
                out.write_vlq_i(position.x as i64);
                out.write_vlq_i(position.y as i64);
                tile.write(out);
            }
        }
    }

    pub fn read(input: &mut DataReader<'_>) -> Result<Self> {
        let tag = input.read_u8()?;
        let packet = match tag {
            ENTITY_CREATE => {
                let raw_type = input.read_u8()?;
                let entity_type = EntityType::ALL
                    .into_iter()
                    .find(|t| *t as u8 == raw_type)
                    .ok_or_else(|| WorldError::MalformedPacket(format!("entity type {}", raw_type)))?;
                WorldPacket::EntityCreate {
                    entity_type,
                    store: read_json(input)?,
                    net_state: input.read_bytes()?,
                    entity_id: read_id(input)?,
                }
            }
            ENTITY_UPDATE => WorldPacket::EntityUpdate {
                entity_id: read_id(input)?,
                delta: input.read_bytes()?,
            },
            ENTITY_DESTROY => WorldPacket::EntityDestroy {
                entity_id: read_id(input)?,
                death: input.read_bool()?,
            },
            ENTITY_MESSAGE => {
                let target = match input.read_u8()? {
                    0 => MessageTarget::Id(read_id(input)?),
                    1 => MessageTarget::UniqueId(input.read_string()?),
                    other => return Err(WorldError::MalformedPacket(format!("message target {}", other))),
                };
                let name = input.read_string()?;
                let count = input.read_vlq_u()? as usize;
                if count > input.remaining() {
                    return Err(DataError::UnexpectedEof("message arguments").into());
                }
                let mut args = Vec::with_capacity(count);
                for _ in 0..count {
                    args.push(read_json(input)?);
                }
                WorldPacket::EntityMessage {
                    target,
                    name,
                    args,
                    uuid: input.read_string()?,
                    from_connection: input.read_u16()?,
                }
            }
            ENTITY_MESSAGE_RESPONSE => {
                let uuid = input.read_string()?;
                let response = if input.read_bool()? {
                    Ok(read_json(input)?)
                } else {
                    Err(input.read_string()?)
                };
                WorldPacket::EntityMessageResponse { uuid, response }
            }
            ENTITY_INTERACT => WorldPacket::EntityInteract {
                request: InteractRequest::read(input)?,
                request_id: input.read_vlq_u()?,
            },
            ENTITY_INTERACT_RESULT => WorldPacket::EntityInteractResult {
                action: InteractAction::read(input)?,
                request_id: input.read_vlq_u()?,
            },
            TILE_UPDATE => {
                let x = input.read_vlq_i()? as i32;
                let y = input.read_vlq_i()? as i32;
                WorldPacket::TileUpdate {
                    position: Vec2I::new(x, y),
                    tile: Tile::read(input)?,
                }
            }
            other => return Err(WorldError::MalformedPacket(format!("unknown packet tag {}", other))),
        };
        Ok(packet)
    }
}

/// Frame a batch as a packet count followed by the packets
pub fn write_packets(packets: &[WorldPacket]) -> Vec<u8> {
    let mut out = DataWriter::new();
    out.write_vlq_u(packets.len() as u64);
    for packet in packets {
        packet.write(&mut out);
    }
    out.into_bytes()
}

pub fn read_packets(data: &[u8]) -> Result<Vec<WorldPacket>> {
    let mut input = DataReader::new(data);
    let count = input.read_vlq_u()? as usize;
    if count > input.remaining() {
        return Err(WorldError::MalformedPacket(format!("{} packets in {} bytes", count, data.len())));
    }
    let mut packets = Vec::with_capacity(count);
    for _ in 0..count {
        packets.push(WorldPacket::read(&mut input)?);
    }
    if !input.at_end() {
        return Err(WorldError::MalformedPacket(format!("{} trailing bytes", input.remaining())));
    }
    Ok(packets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::InteractActionType;
    use serde_json::json;
    use star_math::Vec2F;

    #[test]
    fn test_batch_encoding() {
        let packets = vec![
            WorldPacket::EntityCreate {
                entity_type: EntityType::Monster,
                store: json!({"name": "poptop"}),
                net_state: vec![1, 2, 3],
                entity_id: 12,
            },
            WorldPacket::EntityMessage {
                target: MessageTarget::UniqueId("boss".into()),
                name: "hello".into(),
                args: vec![json!(1), json!("two")],
                uuid: "m-1".into(),
                from_connection: 3,
            },
            WorldPacket::EntityMessageResponse {
                uuid: "m-1".into(),
                response: Err("no handler".into()),
            },
            WorldPacket::EntityInteract {
                request: InteractRequest {
                    source_id: -5,
                    source_position: Vec2F::new(1.0, 2.0),
                    target_id: 12,
                    interact_position: Vec2F::new(3.0, 2.0),
                },
                request_id: 7,
            },
            WorldPacket::EntityInteractResult {
                action: InteractAction::new(InteractActionType::SitDown, 12, json!(0)),
                request_id: 7,
            },
            WorldPacket::TileUpdate {
                position: Vec2I::new(-1, 40),
                tile: Tile::EMPTY,
            },
            WorldPacket::EntityDestroy {
                entity_id: -70000,
                death: true,
            },
        ];
        let bytes = write_packets(&packets);
        assert_eq!(read_packets(&bytes).unwrap(), packets);
    }

    #[test]
    fn test_malformed_batches_are_rejected() {
        assert!(read_packets(&[1, 99]).is_err());
        assert!(read_packets(&[200]).is_err());

        let mut bytes = write_packets(&[WorldPacket::EntityDestroy {
            entity_id: 3,
            death: false,
        }]);
        bytes.push(0);
        assert!(matches!(read_packets(&bytes), Err(WorldError::MalformedPacket(_))));
    }
}
