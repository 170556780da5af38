//! Server construction parameters.
//!
//! Everything here arrives from the command line (or from a test) at
//! construction time; nothing is read from global state.

use shared::{ChunkBudget, TerrainParams};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to. Port 0 picks an ephemeral port.
    pub host: String,
    pub port: u16,
    /// Connect requests beyond this count are answered with ServerFull.
    pub max_players: usize,
    /// How often each send task broadcasts player-state snapshots.
    pub broadcast_interval: Duration,
    /// Worker threads for generation and chunking. 0 = one per core.
    pub workers: usize,
    pub terrain: TerrainParams,
    pub budget: ChunkBudget,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_players: 8,
            broadcast_interval: Duration::from_millis(50),
            workers: 0,
            terrain: TerrainParams::default(),
            budget: ChunkBudget::default(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}
