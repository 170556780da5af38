//! Client-side reassembly of streamed map chunks.

use log::warn;
use shared::{HeightField, MapChunk, MapSize};
use std::collections::HashSet;

/// A height field being rebuilt from the chunks a server streams over.
///
/// Chunks may arrive in any order and more than once; each index is
/// applied at most once, so the filled counter never double-counts and
/// replays are harmless.
#[derive(Debug)]
pub struct RemoteMap {
    field: HeightField,
    applied: HashSet<u32>,
    samples_filled: usize,
}

impl RemoteMap {
    pub fn new(size: MapSize) -> Self {
        Self {
            field: HeightField::zeroed(size.width as usize, size.height as usize),
            applied: HashSet::new(),
            samples_filled: 0,
        }
    }

    /// Merges one chunk into the field. Returns true if the chunk was
    /// new, false if it was a duplicate or failed validation.
    pub fn apply_chunk(&mut self, chunk: &MapChunk) -> bool {
        let total = self.field.len();
        let start = chunk.start as usize;
        let len = chunk.samples.len();

        if chunk.total as usize != total || start + len > total {
            warn!(
                "Ignoring chunk {}: range [{}, {}) does not fit a {}-sample map",
                chunk.index,
                start,
                start + len,
                total
            );
            return false;
        }
        if !self.applied.insert(chunk.index) {
            return false;
        }

        self.field.write_span(start, &chunk.samples);
        self.samples_filled += len;
        true
    }

    pub fn samples_filled(&self) -> usize {
        self.samples_filled
    }

    pub fn chunks_applied(&self) -> usize {
        self.applied.len()
    }

    pub fn is_complete(&self) -> bool {
        self.samples_filled == self.field.len()
    }

    pub fn field(&self) -> &HeightField {
        &self.field
    }

    pub fn into_field(self) -> HeightField {
        self.field
    }
}
