//! Types and logic shared between the game server and client.
//!
//! This crate owns everything both ends of the wire must agree on:
//! the packet catalog and its binary codec ([`protocol`]), the
//! length-prefix framing state machine ([`framing`]), the parallel
//! height-field generator ([`terrain`]) and the engine that slices a
//! finished height field into network-sized chunks ([`chunk`]).
//!
//! The server is authoritative: clients only ever describe intent
//! (connect, request map data, move), and the server broadcasts the
//! resulting player state back. Nothing in this crate performs I/O;
//! the connection plumbing lives in the `server` and `client` crates.

pub mod chunk;
pub mod framing;
pub mod protocol;
pub mod terrain;

pub use chunk::{build_chunks, ChunkBudget, ChunkProgress, MapChunk};
pub use framing::{encode_frame, FrameDecoder};
pub use protocol::{DecodeError, Packet};
pub use terrain::{generate, GenProgress, HeightField, TerrainParams};

use serde::{Deserialize, Serialize};

/// Longest nickname the server will accept in a connect request.
pub const MAX_NICKNAME_LEN: usize = 32;

/// A 2D position in world units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Dimensions of the generated map, sent to clients during the handshake
/// so they can size their local height field before any chunk arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapSize {
    pub width: u32,
    pub height: u32,
}

impl MapSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Total number of height samples in a map of this size.
    pub fn sample_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// One player as known by the server.
///
/// The id doubles as the player's index in the server's player list;
/// ids are assigned at connect time, increase monotonically and are
/// never reused within a session. Position starts empty and is only
/// ever written by the server's message dispatcher when a move request
/// arrives from the owning connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: u32,
    pub nickname: String,
    pub position: Option<Vec2>,
}

impl Player {
    pub fn new(id: u32, nickname: impl Into<String>) -> Self {
        Self {
            id,
            nickname: nickname.into(),
            position: None,
        }
    }
}
