//! The closed catalog of wire messages and their binary codec.
//!
//! Every payload begins with a single tag byte selecting the variant,
//! followed by the variant's fields encoded with bincode (fixed-width
//! little-endian integers, so the layout is stable across builds). The
//! tag is written by hand rather than left to bincode's enum encoding:
//! the wire contract requires exactly one byte and must not shift if a
//! serializer default ever changes.

use crate::chunk::MapChunk;
use crate::{MapSize, Player, Vec2};
use std::fmt;

const TAG_SERVER_FULL: u8 = 0;
const TAG_CONNECT_REQUEST: u8 = 1;
const TAG_CONNECT_ACCEPTED: u8 = 2;
const TAG_MAP_DATA_REQUEST: u8 = 3;
const TAG_MAP_CHUNK: u8 = 4;
const TAG_PLAYER_STATE: u8 = 5;
const TAG_MOVE_PLAYER: u8 = 6;
const TAG_RESEND_REQUEST: u8 = 7;

/// A message on the wire, in either direction.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Server is at capacity; the connect request was not registered.
    ServerFull,
    /// Initial handshake from a client.
    ConnectRequest { nickname: String },
    /// Handshake success. Tells the client the map dimensions before
    /// any chunk arrives.
    ConnectAccepted { map_size: MapSize },
    /// Explicit pull for the map chunks.
    MapDataRequest,
    /// One slice of the generated height field.
    MapChunk(MapChunk),
    /// Authoritative snapshot of one player, broadcast periodically.
    PlayerState(Player),
    /// Client asks to move its own player.
    MovePlayer { position: Vec2 },
    /// Reserved. Round-trips through the codec but no dispatcher
    /// handles it on either end.
    ResendRequest { body: Vec<u8> },
}

impl Packet {
    /// The tag byte identifying this variant on the wire.
    pub fn tag(&self) -> u8 {
        match self {
            Packet::ServerFull => TAG_SERVER_FULL,
            Packet::ConnectRequest { .. } => TAG_CONNECT_REQUEST,
            Packet::ConnectAccepted { .. } => TAG_CONNECT_ACCEPTED,
            Packet::MapDataRequest => TAG_MAP_DATA_REQUEST,
            Packet::MapChunk(_) => TAG_MAP_CHUNK,
            Packet::PlayerState(_) => TAG_PLAYER_STATE,
            Packet::MovePlayer { .. } => TAG_MOVE_PLAYER,
            Packet::ResendRequest { .. } => TAG_RESEND_REQUEST,
        }
    }

    /// Serializes the packet to its payload bytes: tag byte first, then
    /// the variant body.
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        let mut payload = vec![self.tag()];
        match self {
            Packet::ServerFull | Packet::MapDataRequest => {}
            Packet::ConnectRequest { nickname } => {
                bincode::serialize_into(&mut payload, nickname)?
            }
            Packet::ConnectAccepted { map_size } => {
                bincode::serialize_into(&mut payload, map_size)?
            }
            Packet::MapChunk(chunk) => bincode::serialize_into(&mut payload, chunk)?,
            Packet::PlayerState(player) => bincode::serialize_into(&mut payload, player)?,
            Packet::MovePlayer { position } => {
                bincode::serialize_into(&mut payload, position)?
            }
            Packet::ResendRequest { body } => bincode::serialize_into(&mut payload, body)?,
        }
        Ok(payload)
    }

    /// Decodes one payload (without the length prefix) back into a packet.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let (&tag, body) = payload.split_first().ok_or(DecodeError::EmptyPayload)?;
        let packet = match tag {
            TAG_SERVER_FULL => Packet::ServerFull,
            TAG_CONNECT_REQUEST => Packet::ConnectRequest {
                nickname: bincode::deserialize(body)?,
            },
            TAG_CONNECT_ACCEPTED => Packet::ConnectAccepted {
                map_size: bincode::deserialize(body)?,
            },
            TAG_MAP_DATA_REQUEST => Packet::MapDataRequest,
            TAG_MAP_CHUNK => Packet::MapChunk(bincode::deserialize(body)?),
            TAG_PLAYER_STATE => Packet::PlayerState(bincode::deserialize(body)?),
            TAG_MOVE_PLAYER => Packet::MovePlayer {
                position: bincode::deserialize(body)?,
            },
            TAG_RESEND_REQUEST => Packet::ResendRequest {
                body: bincode::deserialize(body)?,
            },
            other => return Err(DecodeError::UnknownTag(other)),
        };
        Ok(packet)
    }
}

/// Why a received payload could not be turned into a [`Packet`].
#[derive(Debug)]
pub enum DecodeError {
    /// A frame with a zero-length payload carries no tag byte.
    EmptyPayload,
    /// The tag byte matched no catalog entry.
    UnknownTag(u8),
    /// The length prefix exceeded the frame cap; the stream has no
    /// resynchronization point, so the connection must be dropped.
    FrameTooLarge(usize),
    /// The tag was valid but the body failed to deserialize.
    Body(bincode::Error),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::EmptyPayload => write!(f, "empty payload"),
            DecodeError::UnknownTag(tag) => write!(f, "unknown packet tag {}", tag),
            DecodeError::FrameTooLarge(len) => {
                write!(f, "frame length {} exceeds the frame cap", len)
            }
            DecodeError::Body(err) => write!(f, "malformed packet body: {}", err),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Body(err) => Some(err),
            _ => None,
        }
    }
}

impl From<bincode::Error> for DecodeError {
    fn from(err: bincode::Error) -> Self {
        DecodeError::Body(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<Packet> {
        vec![
            Packet::ServerFull,
            Packet::ConnectRequest {
                nickname: "ada".to_string(),
            },
            Packet::ConnectAccepted {
                map_size: MapSize::new(128, 64),
            },
            Packet::MapDataRequest,
            Packet::MapChunk(MapChunk {
                index: 1,
                start: 240,
                total: 480,
                samples: vec![0.5, -1.25, 3.0],
            }),
            Packet::PlayerState(Player {
                id: 2,
                nickname: "grace".to_string(),
                position: Some(Vec2::new(10.0, -4.5)),
            }),
            Packet::MovePlayer {
                position: Vec2::new(1.0, 2.0),
            },
            Packet::ResendRequest {
                body: vec![1, 2, 3, 4],
            },
        ]
    }

    #[test]
    fn test_roundtrip_every_variant() {
        for packet in catalog() {
            let payload = packet.encode().unwrap();
            let back = Packet::decode(&payload).unwrap();
            assert_eq!(back, packet);
        }
    }

    #[test]
    fn test_payload_starts_with_tag_byte() {
        for packet in catalog() {
            let payload = packet.encode().unwrap();
            assert_eq!(payload[0], packet.tag());
        }
    }

    #[test]
    fn test_tag_values_are_stable() {
        // The wire contract: these numbers must never change.
        assert_eq!(Packet::ServerFull.tag(), 0);
        assert_eq!(
            Packet::ConnectRequest {
                nickname: String::new()
            }
            .tag(),
            1
        );
        assert_eq!(
            Packet::ConnectAccepted {
                map_size: MapSize::new(1, 1)
            }
            .tag(),
            2
        );
        assert_eq!(Packet::MapDataRequest.tag(), 3);
        assert_eq!(
            Packet::MapChunk(MapChunk {
                index: 0,
                start: 0,
                total: 0,
                samples: vec![]
            })
            .tag(),
            4
        );
        assert_eq!(Packet::PlayerState(Player::new(0, "x")).tag(), 5);
        assert_eq!(
            Packet::MovePlayer {
                position: Vec2::new(0.0, 0.0)
            }
            .tag(),
            6
        );
        assert_eq!(Packet::ResendRequest { body: vec![] }.tag(), 7);
    }

    #[test]
    fn test_empty_payload_is_rejected() {
        assert!(matches!(
            Packet::decode(&[]),
            Err(DecodeError::EmptyPayload)
        ));
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        assert!(matches!(
            Packet::decode(&[0xFF]),
            Err(DecodeError::UnknownTag(0xFF))
        ));
    }

    #[test]
    fn test_truncated_body_is_rejected() {
        let payload = Packet::ConnectRequest {
            nickname: "somebody".to_string(),
        }
        .encode()
        .unwrap();
        let truncated = &payload[..payload.len() / 2];
        assert!(matches!(
            Packet::decode(truncated),
            Err(DecodeError::Body(_))
        ));
    }

    #[test]
    fn test_bare_variants_have_no_body() {
        assert_eq!(Packet::ServerFull.encode().unwrap().len(), 1);
        assert_eq!(Packet::MapDataRequest.encode().unwrap().len(), 1);
    }
}
