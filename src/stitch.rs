use rand::Rng;
use rand::seq::SliceRandom;

use crate::edge_set::EdgeSet;
use crate::{FireError, VertexId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StitchTopology {
    Ring,
    Random,
}

impl StitchTopology {
    /// Downscaling has a single sample and always stitches randomly.
    pub fn choose(ring: bool, samples: usize) -> Self {
        if ring && samples > 1 { StitchTopology::Ring } else { StitchTopology::Random }
    }
}

fn pair_count(connectivity: f64, vertices: usize) -> usize {
    (connectivity * vertices as f64).ceil() as usize
}

/// Draw `total` pairs in batches of at most `batch`, dropping self loops.
/// Each batch is handed to `emit` before the next is drawn.
fn draw_pairs<R, F>(
    left: &[VertexId],
    right: &[VertexId],
    total: usize,
    batch: usize,
    rng: &mut R,
    emit: &mut F,
) -> Result<(), FireError>
where
    R: Rng,
    F: FnMut(EdgeSet) -> Result<(), FireError>,
{
    let mut remaining = total;
    while remaining > 0 {
        let size = remaining.min(batch.max(1));
        let mut edges = EdgeSet::new();
        for _ in 0..size {
            if let (Some(&a), Some(&b)) = (left.choose(&mut *rng), right.choose(&mut *rng)) {
                if a != b {
                    edges.add_edge(a, b);
                }
            }
        }
        if !edges.is_empty() {
            emit(edges)?;
        }
        remaining -= size;
    }
    Ok(())
}

/// Connect each sample to its successor, the last wrapping to the first.
pub fn ring_stitch<R, F>(
    samples: &[Vec<VertexId>],
    connectivity: f64,
    batch: usize,
    rng: &mut R,
    mut emit: F,
) -> Result<(), FireError>
where
    R: Rng,
    F: FnMut(EdgeSet) -> Result<(), FireError>,
{
    if samples.len() < 2 {
        return Ok(());
    }
    for (i, sample) in samples.iter().enumerate() {
        let next = &samples[(i + 1) % samples.len()];
        let total = pair_count(connectivity, sample.len());
        draw_pairs(sample, next, total, batch, rng, &mut emit)?;
    }
    Ok(())
}

/// Pool every sample's vertices and connect random pairs from the pool.
pub fn random_stitch<R, F>(
    samples: &[Vec<VertexId>],
    connectivity: f64,
    batch: usize,
    rng: &mut R,
    mut emit: F,
) -> Result<(), FireError>
where
    R: Rng,
    F: FnMut(EdgeSet) -> Result<(), FireError>,
{
    let pool: Vec<VertexId> = samples.iter().flatten().copied().collect();
    if pool.len() < 2 {
        return Ok(());
    }
    let total = pair_count(connectivity, pool.len());
    draw_pairs(&pool, &pool, total, batch, rng, &mut emit)
}

pub fn stitch<R, F>(
    topology: StitchTopology,
    samples: &[Vec<VertexId>],
    connectivity: f64,
    batch: usize,
    rng: &mut R,
    emit: F,
) -> Result<(), FireError>
where
    R: Rng,
    F: FnMut(EdgeSet) -> Result<(), FireError>,
{
    match topology {
        StitchTopology::Ring => ring_stitch(samples, connectivity, batch, rng, emit),
        StitchTopology::Random => random_stitch(samples, connectivity, batch, rng, emit),
    }
}
