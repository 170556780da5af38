//! # Game Server Library
//!
//! Authoritative server for the multiplayer terrain game. The server
//! owns the canonical world: it generates the height field, slices it
//! into wire chunks, registers players, applies their move requests and
//! broadcasts periodic player-state snapshots to every connection.
//!
//! ## Architecture
//!
//! ### Per-connection task pair
//! Every accepted TCP connection gets two independent tasks: a receive
//! task running the framing state machine and the message dispatcher,
//! and a send task draining an outbound queue and waking on a fixed
//! interval to broadcast player state. The tasks coordinate only
//! through the append-only connection registry, the outbound channel
//! and the server-wide running flag, so one misbehaving connection can
//! never stall another.
//!
//! ### World preparation
//! Terrain generation and chunking are CPU-bound and run on a blocking
//! worker pool outside the async runtime. The finished map is published
//! through a watch channel; a map-data request received before the map
//! is ready simply waits on that channel, blocking only its own
//! connection.
//!
//! ### Shutdown
//! Shutdown is an explicit protocol: the running flag flips, the accept
//! loop stops, and every connection's receive and send task is awaited
//! in registry order before the server returns. Pending generation work
//! is allowed to run to completion.
//!
//! ## Module Organization
//!
//! - [`config`] — server construction parameters.
//! - [`world`] — player list, prepared map and the generation pass.
//! - [`connection`] — per-connection tasks and the message dispatcher.
//! - [`network`] — bind, accept loop, registry and shutdown.

pub mod config;
pub mod connection;
pub mod network;
pub mod world;
