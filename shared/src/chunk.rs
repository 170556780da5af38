//! Slicing a finished height field into network-sized chunks.
//!
//! Chunk sizing is pure arithmetic over a byte budget shared by both
//! ends of the wire. Chunk construction is embarrassingly parallel:
//! every chunk index is independent, each worker writes only its own
//! slots, and the ready flag flips once after every slot is filled.
//! Downstream code must not touch the chunk array before observing
//! that flag.

use crate::terrain::HeightField;
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Hard cap on the wire size of one encoded map chunk.
pub const MAX_CHUNK_WIRE_BYTES: usize = 1024;

/// Encoded cost of one height sample (bincode fixed-width `f32`).
pub const SAMPLE_WIRE_BYTES: usize = 4;

/// Reservation for fixed per-chunk metadata: frame length word, tag
/// byte, three `u32` fields and the sample-vector length word come to
/// 25 bytes; 32 leaves slack.
pub const CHUNK_HEADER_BYTES: usize = 32;

/// The three constants that derive chunk geometry. Client and server
/// builds must agree on these for reassembly to line up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkBudget {
    pub max_wire_bytes: usize,
    pub sample_bytes: usize,
    pub header_bytes: usize,
}

impl Default for ChunkBudget {
    fn default() -> Self {
        Self {
            max_wire_bytes: MAX_CHUNK_WIRE_BYTES,
            sample_bytes: SAMPLE_WIRE_BYTES,
            header_bytes: CHUNK_HEADER_BYTES,
        }
    }
}

impl ChunkBudget {
    /// How many samples fit in one chunk under this budget.
    pub fn samples_per_chunk(&self) -> usize {
        self.max_wire_bytes.saturating_sub(self.header_bytes) / self.sample_bytes
    }

    /// How many chunks a map of `total_samples` splits into.
    pub fn chunk_count(&self, total_samples: usize) -> usize {
        let per_chunk = self.samples_per_chunk();
        if total_samples == 0 || per_chunk == 0 {
            return 0;
        }
        (total_samples + per_chunk - 1) / per_chunk
    }
}

/// A bounded slice of the height field packaged for transfer.
///
/// Self-describing: carries its index, the offset of its first sample
/// and the total map size, so chunks can be applied in any order.
/// Immutable once constructed; one array of chunks is built per session
/// and shared with every requesting connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapChunk {
    pub index: u32,
    pub start: u32,
    pub total: u32,
    pub samples: Vec<f32>,
}

impl MapChunk {
    /// Offset one past the last sample this chunk carries.
    pub fn end(&self) -> u32 {
        self.start + self.samples.len() as u32
    }
}

/// Shared progress of one chunking pass.
#[derive(Debug, Default)]
pub struct ChunkProgress {
    ready: AtomicUsize,
    all_ready: AtomicBool,
}

impl ChunkProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks_ready(&self) -> usize {
        self.ready.load(Ordering::Acquire)
    }

    pub fn is_ready(&self) -> bool {
        self.all_ready.load(Ordering::Acquire)
    }

    fn add_ready(&self, n: usize) {
        self.ready.fetch_add(n, Ordering::AcqRel);
    }

    fn mark_ready(&self) -> bool {
        self.all_ready
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Splits a completed height field into chunks, in parallel.
///
/// Each worker owns a contiguous range of chunk slots; slot `i` is
/// written exactly once and covers samples
/// `[i * per_chunk, min((i + 1) * per_chunk, total))`. Generation order
/// across workers is arbitrary, but the returned array is in index
/// order and the ready flag is only set after every slot is filled.
pub fn build_chunks(
    field: &HeightField,
    budget: &ChunkBudget,
    workers: usize,
    progress: &ChunkProgress,
) -> Vec<MapChunk> {
    let total = field.len();
    let per_chunk = budget.samples_per_chunk();
    let count = budget.chunk_count(total);

    let mut slots: Vec<Option<MapChunk>> = vec![None; count];
    if count > 0 {
        let workers = workers.max(1).min(count);
        let slots_per_worker = (count + workers - 1) / workers;
        let samples = field.samples();

        std::thread::scope(|scope| {
            for (block_index, block) in slots.chunks_mut(slots_per_worker).enumerate() {
                let base = block_index * slots_per_worker;
                scope.spawn(move || {
                    for (offset, slot) in block.iter_mut().enumerate() {
                        let index = base + offset;
                        let start = index * per_chunk;
                        let end = (start + per_chunk).min(total);
                        *slot = Some(MapChunk {
                            index: index as u32,
                            start: start as u32,
                            total: total as u32,
                            samples: samples[start..end].to_vec(),
                        });
                        progress.add_ready(1);
                    }
                });
            }
        });
    }

    progress.mark_ready();
    debug!("Built {} chunks of up to {} samples", count, per_chunk);
    slots.into_iter().flatten().collect()
}
