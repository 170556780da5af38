//! Local view of the game world as reported by the server.

use crate::map::RemoteMap;
use log::debug;
use shared::{HeightField, MapChunk, MapSize, Player};
use std::sync::Arc;

/// Where this client's copy of the map comes from.
///
/// A remote join rebuilds the field chunk by chunk; a listen-server
/// join shares the hosting process's field directly and ignores any
/// chunk that arrives over the wire.
#[derive(Debug)]
pub enum MapSource {
    Remote(RemoteMap),
    Local(Arc<HeightField>),
}

/// Client-side world state, updated only by the listener task.
#[derive(Debug)]
pub struct ClientWorld {
    players: Vec<Player>,
    map: MapSource,
}

impl ClientWorld {
    pub fn remote(map_size: MapSize) -> Self {
        Self {
            players: Vec::new(),
            map: MapSource::Remote(RemoteMap::new(map_size)),
        }
    }

    pub fn local(field: Arc<HeightField>) -> Self {
        Self {
            players: Vec::new(),
            map: MapSource::Local(field),
        }
    }

    /// Applies one authoritative player snapshot: overwrite the slot if
    /// the id is known, append otherwise.
    pub fn upsert_player(&mut self, player: Player) {
        match self.players.get_mut(player.id as usize) {
            Some(slot) => *slot = player,
            None => self.players.push(player),
        }
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    /// Merges a streamed chunk. Dropped silently on a local join.
    pub fn apply_chunk(&mut self, chunk: &MapChunk) -> bool {
        match &mut self.map {
            MapSource::Remote(map) => {
                let applied = map.apply_chunk(chunk);
                if applied {
                    debug!(
                        "Applied chunk {} ({}/{} samples)",
                        chunk.index,
                        map.samples_filled(),
                        map.field().len()
                    );
                }
                applied
            }
            MapSource::Local(_) => false,
        }
    }

    pub fn map_complete(&self) -> bool {
        match &self.map {
            MapSource::Remote(map) => map.is_complete(),
            MapSource::Local(_) => true,
        }
    }

    pub fn map_samples_filled(&self) -> usize {
        match &self.map {
            MapSource::Remote(map) => map.samples_filled(),
            MapSource::Local(field) => field.len(),
        }
    }

    pub fn height_field(&self) -> &HeightField {
        match &self.map {
            MapSource::Remote(map) => map.field(),
            MapSource::Local(field) => field,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Vec2;

    #[test]
    fn test_upsert_appends_then_overwrites() {
        let mut world = ClientWorld::remote(MapSize::new(2, 2));

        world.upsert_player(Player::new(0, "ada"));
        world.upsert_player(Player::new(1, "grace"));
        assert_eq!(world.players().len(), 2);

        let mut moved = Player::new(1, "grace");
        moved.position = Some(Vec2::new(3.0, 4.0));
        world.upsert_player(moved.clone());

        assert_eq!(world.players().len(), 2);
        assert_eq!(world.players()[1], moved);
    }

    #[test]
    fn test_upsert_out_of_range_id_appends() {
        let mut world = ClientWorld::remote(MapSize::new(2, 2));
        world.upsert_player(Player::new(5, "late"));
        assert_eq!(world.players().len(), 1);
        assert_eq!(world.players()[0].id, 5);
    }

    #[test]
    fn test_local_join_ignores_chunks() {
        let field = Arc::new(HeightField::from_samples(2, 2, vec![1.0, 2.0, 3.0, 4.0]));
        let mut world = ClientWorld::local(Arc::clone(&field));

        assert!(world.map_complete());
        let applied = world.apply_chunk(&MapChunk {
            index: 0,
            start: 0,
            total: 4,
            samples: vec![9.0; 4],
        });
        assert!(!applied);
        // The shared field is untouched.
        assert_eq!(world.height_field().samples(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_remote_join_tracks_fill_progress() {
        let mut world = ClientWorld::remote(MapSize::new(2, 2));
        assert!(!world.map_complete());
        assert_eq!(world.map_samples_filled(), 0);

        world.apply_chunk(&MapChunk {
            index: 0,
            start: 0,
            total: 4,
            samples: vec![1.0, 2.0, 3.0, 4.0],
        });
        assert!(world.map_complete());
        assert_eq!(world.map_samples_filled(), 4);
    }
}
