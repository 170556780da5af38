//! Authoritative world state: the player list and the prepared map.
//!
//! The player list is append-only for the whole session. Ids are list
//! indices, assigned under the write lock at connect time, so they are
//! unique, stable and never reused; a disconnect stops the connection's
//! tasks but leaves the slot in place. In-place updates only ever touch
//! the updating player's own slot.

use log::{error, info, warn};
use shared::terrain::generate;
use shared::{
    build_chunks, ChunkBudget, ChunkProgress, GenProgress, HeightField, MapChunk, Player,
    TerrainParams, Vec2,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, RwLock};

/// The finished map: the height field plus its wire chunks, shared
/// read-only with every serving connection.
#[derive(Debug)]
pub struct PreparedMap {
    pub field: Arc<HeightField>,
    pub chunks: Arc<Vec<MapChunk>>,
}

/// State shared by every connection task.
pub struct WorldState {
    max_players: usize,
    players: RwLock<Vec<Player>>,
    map_tx: watch::Sender<Option<Arc<PreparedMap>>>,
    map_rx: watch::Receiver<Option<Arc<PreparedMap>>>,
    gen_progress: Arc<GenProgress>,
    chunk_progress: Arc<ChunkProgress>,
}

impl WorldState {
    pub fn new(max_players: usize) -> Self {
        let (map_tx, map_rx) = watch::channel(None);
        Self {
            max_players,
            players: RwLock::new(Vec::new()),
            map_tx,
            map_rx,
            gen_progress: Arc::new(GenProgress::new()),
            chunk_progress: Arc::new(ChunkProgress::new()),
        }
    }

    /// Registers a player if the server is below capacity.
    ///
    /// Capacity check and append happen under one write lock, so two
    /// racing connect requests can never both take the last slot.
    pub async fn try_register_player(&self, nickname: &str) -> Option<u32> {
        let mut players = self.players.write().await;
        if players.len() >= self.max_players {
            return None;
        }
        let id = players.len() as u32;
        players.push(Player::new(id, nickname));
        info!("Registered player {} ({})", id, nickname);
        Some(id)
    }

    /// Writes a position into the player's own slot.
    pub async fn set_player_position(&self, id: u32, position: Vec2) {
        let mut players = self.players.write().await;
        match players.get_mut(id as usize) {
            Some(player) => player.position = Some(position),
            None => warn!("Move request for unknown player {}", id),
        }
    }

    pub async fn players_snapshot(&self) -> Vec<Player> {
        self.players.read().await.clone()
    }

    pub async fn player_count(&self) -> usize {
        self.players.read().await.len()
    }

    /// A fresh watch handle on the prepared map. `None` until the
    /// generation pass has fully and successfully completed.
    pub fn map_watch(&self) -> watch::Receiver<Option<Arc<PreparedMap>>> {
        self.map_rx.clone()
    }

    /// The prepared map, if generation has finished.
    pub fn prepared_map(&self) -> Option<Arc<PreparedMap>> {
        self.map_rx.borrow().clone()
    }

    pub fn gen_progress(&self) -> Arc<GenProgress> {
        Arc::clone(&self.gen_progress)
    }

    pub fn chunk_progress(&self) -> Arc<ChunkProgress> {
        Arc::clone(&self.chunk_progress)
    }

    fn publish_map(&self, map: PreparedMap) {
        // Send only fails with no receivers; the world always holds one.
        let _ = self.map_tx.send(Some(Arc::new(map)));
    }
}

/// Runs the generation pass and publishes the result.
///
/// Generation and chunking happen on the blocking pool; the map is
/// published only after both finish, so no connection can ever observe
/// a partially chunked map. On failure nothing is published and the
/// error is logged; connections waiting for map data keep waiting
/// rather than receive corrupt chunks.
pub async fn prepare_map(
    world: Arc<WorldState>,
    terrain: TerrainParams,
    budget: ChunkBudget,
    workers: usize,
) {
    let seed = terrain.resolved_seed();
    let gen_progress = world.gen_progress();
    let chunk_progress = world.chunk_progress();

    info!(
        "Generating {}x{} map (seed {}, {} octaves)",
        terrain.width, terrain.height, seed, terrain.octaves
    );
    let started = Instant::now();

    let built = tokio::task::spawn_blocking(move || {
        let field = generate(&terrain, seed, workers, &gen_progress);
        let chunks = build_chunks(&field, &budget, workers, &chunk_progress);
        (field, chunks)
    })
    .await;

    match built {
        Ok((field, chunks)) => {
            info!(
                "Map ready: {} samples in {} chunks ({:.1}ms)",
                field.len(),
                chunks.len(),
                started.elapsed().as_secs_f64() * 1000.0
            );
            world.publish_map(PreparedMap {
                field: Arc::new(field),
                chunks: Arc::new(chunks),
            });
        }
        Err(e) => {
            // Generation pass died; the map stays unpublished.
            error!("Map generation failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_terrain() -> TerrainParams {
        TerrainParams {
            width: 8,
            height: 8,
            seed: Some(99),
            ..TerrainParams::default()
        }
    }

    #[tokio::test]
    async fn test_register_respects_capacity() {
        let world = WorldState::new(2);
        assert_eq!(world.try_register_player("a").await, Some(0));
        assert_eq!(world.try_register_player("b").await, Some(1));
        assert_eq!(world.try_register_player("c").await, None);
        assert_eq!(world.player_count().await, 2);
    }

    #[tokio::test]
    async fn test_ids_are_list_indices() {
        let world = WorldState::new(4);
        for expected in 0..4u32 {
            let id = world.try_register_player("p").await.unwrap();
            assert_eq!(id, expected);
        }
        let players = world.players_snapshot().await;
        for (index, player) in players.iter().enumerate() {
            assert_eq!(player.id as usize, index);
        }
    }

    #[tokio::test]
    async fn test_move_updates_own_slot_only() {
        let world = WorldState::new(4);
        world.try_register_player("a").await;
        world.try_register_player("b").await;

        world.set_player_position(1, Vec2::new(5.0, 6.0)).await;

        let players = world.players_snapshot().await;
        assert_eq!(players[0].position, None);
        assert_eq!(players[1].position, Some(Vec2::new(5.0, 6.0)));

        // Out-of-range ids are logged and ignored.
        world.set_player_position(17, Vec2::new(1.0, 1.0)).await;
        assert_eq!(world.player_count().await, 2);
    }

    #[tokio::test]
    async fn test_prepare_map_publishes_once_complete() {
        let world = Arc::new(WorldState::new(2));
        assert!(world.prepared_map().is_none());

        prepare_map(
            Arc::clone(&world),
            test_terrain(),
            ChunkBudget::default(),
            2,
        )
        .await;

        let map = world.prepared_map().expect("map should be published");
        assert_eq!(map.field.len(), 64);
        assert_eq!(
            map.chunks.len(),
            ChunkBudget::default().chunk_count(64)
        );
        assert!(world.gen_progress().is_complete());
        assert!(world.chunk_progress().is_ready());
    }

    #[tokio::test]
    async fn test_map_watch_wakes_waiters() {
        let world = Arc::new(WorldState::new(2));
        let mut rx = world.map_watch();

        let waiter = tokio::spawn(async move {
            let guard = rx.wait_for(|m| m.is_some()).await.unwrap();
            guard.as_ref().unwrap().field.len()
        });

        prepare_map(
            Arc::clone(&world),
            test_terrain(),
            ChunkBudget::default(),
            1,
        )
        .await;

        assert_eq!(waiter.await.unwrap(), 64);
    }
}
