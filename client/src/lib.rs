//! # Game Client Library
//!
//! Client-side implementation for the multiplayer terrain game: the
//! handshake with an authoritative server, a listener task that
//! reframes the byte stream into packets, reassembly of streamed map
//! chunks into a local height field, and the outgoing request surface
//! (map pull, move requests).
//!
//! The client never simulates anything itself. Player state arrives as
//! authoritative snapshots and simply replaces the local view; the
//! height field is either rebuilt chunk by chunk (remote join) or
//! shared directly with the hosting process (listen-server join).
//! Rendering consumes the completed field read-only and lives outside
//! this crate.
//!
//! ## Module Organization
//!
//! - [`map`] — chunk reassembly with duplicate protection.
//! - [`game`] — the local player list and map source.
//! - [`network`] — handshake, listener task and outgoing requests.

pub mod game;
pub mod map;
pub mod network;
