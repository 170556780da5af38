//! Parallel fractal height-field generation.
//!
//! The generator samples layered Perlin noise across a fixed-size pool
//! of worker threads. Each worker owns a disjoint range of rows, so no
//! two workers ever write the same cell; the only cross-worker traffic
//! is the atomic progress counter. Because the noise is a pure function
//! of seed and coordinates, the output is bit-identical for any worker
//! count.

use crate::MapSize;
use log::debug;
use noise::{NoiseFn, Perlin};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Fractal parameters for one generation pass.
///
/// `seed: None` means draw a fresh random seed; hosts that want
/// reproducible worlds pass `Some(seed)`.
#[derive(Debug, Clone)]
pub struct TerrainParams {
    pub width: usize,
    pub height: usize,
    pub seed: Option<u32>,
    pub octaves: u32,
    pub frequency: f64,
    pub lacunarity: f64,
    pub persistence: f64,
    pub amplitude: f64,
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
            seed: None,
            octaves: 4,
            frequency: 0.015,
            lacunarity: 2.0,
            persistence: 0.5,
            amplitude: 10.0,
        }
    }
}

impl TerrainParams {
    /// The configured seed, or a randomly drawn one.
    pub fn resolved_seed(&self) -> u32 {
        self.seed.unwrap_or_else(|| rand::thread_rng().gen())
    }

    pub fn map_size(&self) -> MapSize {
        MapSize::new(self.width as u32, self.height as u32)
    }

    pub fn sample_count(&self) -> usize {
        self.width * self.height
    }
}

/// Shared progress of one generation pass, injected into the workers.
///
/// Monitors read [`samples_written`](GenProgress::samples_written) to
/// report progress; the complete flag flips exactly once, when every
/// sample is written, and is the sole gate for starting the chunking
/// engine.
#[derive(Debug, Default)]
pub struct GenProgress {
    written: AtomicUsize,
    complete: AtomicBool,
}

impl GenProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples_written(&self) -> usize {
        self.written.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    fn add_written(&self, n: usize) {
        self.written.fetch_add(n, Ordering::AcqRel);
    }

    /// Returns true only for the call that actually flipped the flag.
    fn mark_complete(&self) -> bool {
        self.complete
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// The authoritative 2D grid of terrain elevation samples, row-major.
///
/// Written once by the generator, read-only afterwards; the chunking
/// engine and every serving connection share it without further
/// synchronization.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightField {
    width: usize,
    height: usize,
    samples: Vec<f32>,
}

impl HeightField {
    pub fn from_samples(width: usize, height: usize, samples: Vec<f32>) -> Self {
        assert_eq!(samples.len(), width * height);
        Self {
            width,
            height,
            samples,
        }
    }

    /// An all-zero field, used by clients as the reassembly target.
    pub fn zeroed(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            samples: vec![0.0; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample(&self, x: usize, y: usize) -> f32 {
        self.samples[y * self.width + x]
    }

    pub fn size(&self) -> MapSize {
        MapSize::new(self.width as u32, self.height as u32)
    }

    /// Overwrites the span starting at `start` with `values`.
    ///
    /// Callers are expected to have validated the range against the
    /// field length; used by chunk reassembly on the client.
    pub fn write_span(&mut self, start: usize, values: &[f32]) {
        self.samples[start..start + values.len()].copy_from_slice(values);
    }
}

/// Generates a height field with `workers` threads.
///
/// `workers == 0` means one thread per available core. Blocks until the
/// field is complete; async callers run it under `spawn_blocking`.
pub fn generate(
    params: &TerrainParams,
    seed: u32,
    workers: usize,
    progress: &GenProgress,
) -> HeightField {
    let total = params.sample_count();
    let mut samples = vec![0.0f32; total];
    let noise = Perlin::new(seed);

    let workers = effective_workers(workers, params.height);
    let rows_per_worker = (params.height + workers - 1) / workers;

    if total > 0 {
        std::thread::scope(|scope| {
            let noise = &noise;
            // Disjoint row blocks per worker; the last block may be short.
            let block_len = rows_per_worker * params.width;
            for (i, block) in samples.chunks_mut(block_len).enumerate() {
                let first_row = i * rows_per_worker;
                scope.spawn(move || fill_rows(params, noise, block, first_row, progress));
            }
        });
    }

    debug_assert_eq!(progress.samples_written(), total);
    progress.mark_complete();
    debug!(
        "Generated {}x{} height field with {} workers",
        params.width, params.height, workers
    );
    HeightField::from_samples(params.width, params.height, samples)
}

fn effective_workers(requested: usize, rows: usize) -> usize {
    let requested = if requested == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        requested
    };
    requested.max(1).min(rows.max(1))
}

fn fill_rows(
    params: &TerrainParams,
    noise: &Perlin,
    out: &mut [f32],
    first_row: usize,
    progress: &GenProgress,
) {
    for (r, row) in out.chunks_mut(params.width).enumerate() {
        let y = first_row + r;
        for (x, cell) in row.iter_mut().enumerate() {
            *cell = fractal_sample(params, noise, x, y);
        }
        progress.add_written(row.len());
    }
}

/// Layered 3D gradient noise: frequency doubles (scaled by lacunarity)
/// and amplitude decays (scaled by persistence) each octave.
fn fractal_sample(params: &TerrainParams, noise: &Perlin, x: usize, y: usize) -> f32 {
    let mut frequency = params.frequency;
    let mut amplitude = params.amplitude;
    let mut sum = 0.0f64;
    for _ in 0..params.octaves {
        sum += noise.get([x as f64 * frequency, y as f64 * frequency, 0.0]) * amplitude;
        frequency *= params.lacunarity;
        amplitude *= params.persistence;
    }
    sum as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn small_params() -> TerrainParams {
        TerrainParams {
            width: 32,
            height: 17, // deliberately not divisible by the worker counts
            seed: Some(1234),
            ..TerrainParams::default()
        }
    }

    #[test]
    fn test_generation_is_deterministic_across_worker_counts() {
        let params = small_params();
        let reference = generate(&params, 1234, 1, &GenProgress::new());

        for workers in 2..=5 {
            let progress = GenProgress::new();
            let field = generate(&params, 1234, workers, &progress);
            assert_eq!(field, reference, "{} workers diverged", workers);
        }
    }

    #[test]
    fn test_progress_counter_reaches_exact_total() {
        let params = small_params();
        let progress = GenProgress::new();
        assert!(!progress.is_complete());

        let field = generate(&params, 1234, 4, &progress);

        assert_eq!(progress.samples_written(), params.sample_count());
        assert!(progress.is_complete());
        assert_eq!(field.len(), params.sample_count());
    }

    #[test]
    fn test_complete_flag_flips_once() {
        let progress = GenProgress::new();
        assert!(progress.mark_complete());
        assert!(!progress.mark_complete());
        assert!(progress.is_complete());
    }

    #[test]
    fn test_different_seeds_differ() {
        let params = small_params();
        let a = generate(&params, 1, 2, &GenProgress::new());
        let b = generate(&params, 2, 2, &GenProgress::new());
        assert_ne!(a, b);
    }

    #[test]
    fn test_single_octave_matches_scaled_noise() {
        let params = TerrainParams {
            width: 8,
            height: 8,
            seed: Some(7),
            octaves: 1,
            frequency: 0.1,
            amplitude: 5.0,
            ..TerrainParams::default()
        };
        let field = generate(&params, 7, 1, &GenProgress::new());
        let noise = Perlin::new(7);

        let expected = (noise.get([3.0 * 0.1, 5.0 * 0.1, 0.0]) * 5.0) as f32;
        assert_approx_eq!(field.sample(3, 5), expected, 1e-6);
    }

    #[test]
    fn test_resolved_seed_prefers_explicit() {
        let params = small_params();
        assert_eq!(params.resolved_seed(), 1234);
    }

    #[test]
    fn test_height_field_indexing() {
        let field = HeightField::from_samples(3, 2, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(field.sample(0, 0), 0.0);
        assert_eq!(field.sample(2, 0), 2.0);
        assert_eq!(field.sample(0, 1), 3.0);
        assert_eq!(field.size(), MapSize::new(3, 2));
    }

    #[test]
    fn test_write_span() {
        let mut field = HeightField::zeroed(4, 2);
        field.write_span(2, &[9.0, 8.0, 7.0]);
        assert_eq!(field.samples(), &[0.0, 0.0, 9.0, 8.0, 7.0, 0.0, 0.0, 0.0]);
    }
}
