//! Append-only nearest-neighbor engines.
//!
//! Engines never update or delete: `add` appends a batch and hands back the
//! contiguous offset range it occupies. Inputs are expected to be prepared for
//! the metric already (unit-normalized for cosine).

mod flat;
mod hnsw;
mod ivf;

pub use flat::FlatEngine;
pub use hnsw::HnswEngine;
pub use ivf::IvfEngine;

use crate::config::{IndexConfig, IndexFamily, Metric};
use crate::error::{IndexError, Result};
use ndarray::{Array2, ArrayView2};
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub offset: usize,
    pub distance: f32,
}

pub trait AnnEngine: Send + Sync {
    fn dimension(&self) -> usize;

    fn metric(&self) -> Metric;

    /// Appends `vectors` (N x D) and returns `[total_count, total_count + N)`.
    fn add(&mut self, vectors: ArrayView2<'_, f32>) -> Result<Range<usize>>;

    /// Up to `k` neighbors per query row, best first. Rows are not padded.
    fn search(&self, queries: ArrayView2<'_, f32>, k: usize) -> Result<Vec<Vec<Neighbor>>>;

    fn total_count(&self) -> usize;
}

/// Creates an empty engine for a validated configuration.
#[must_use]
pub fn build_engine(config: &IndexConfig, family: IndexFamily) -> Box<dyn AnnEngine> {
    match family {
        IndexFamily::Flat => Box::new(FlatEngine::new(config.dimension, config.metric)),
        IndexFamily::Ivf { nlist } => Box::new(IvfEngine::new(
            config.dimension,
            config.metric,
            nlist,
            config.nprobe,
        )),
        IndexFamily::Hnsw { links } => Box::new(HnswEngine::new(
            config.dimension,
            config.metric,
            links,
            config.ef_construction,
            config.ef_search,
        )),
    }
}

/// Stacks equal-length rows into an N x D matrix.
pub fn stack_rows(rows: &[Vec<f32>], dimension: usize) -> Result<Array2<f32>> {
    let mut flat = Vec::with_capacity(rows.len() * dimension);
    for row in rows {
        if row.len() != dimension {
            return Err(IndexError::ShapeMismatch {
                expected: dimension,
                actual: row.len(),
            });
        }
        flat.extend_from_slice(row);
    }
    Array2::from_shape_vec((rows.len(), dimension), flat)
        .map_err(|err| IndexError::Engine(format!("stack vectors: {err}")))
}

pub(crate) fn check_width(dimension: usize, batch: &ArrayView2<'_, f32>) -> Result<()> {
    if batch.ncols() != dimension {
        return Err(IndexError::ShapeMismatch {
            expected: dimension,
            actual: batch.ncols(),
        });
    }
    Ok(())
}

/// Keeps the `k` smallest distances, ordered best first.
pub(crate) fn rank(mut scored: Vec<Neighbor>, k: usize) -> Vec<Neighbor> {
    scored.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.offset.cmp(&b.offset))
    });
    scored.truncate(k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_rows_rejects_ragged_input() {
        let rows = vec![vec![1.0, 2.0], vec![3.0]];
        assert!(matches!(
            stack_rows(&rows, 2),
            Err(IndexError::ShapeMismatch {
                expected: 2,
                actual: 1
            })
        ));
        let ok = stack_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]], 2).unwrap();
        assert_eq!(ok.dim(), (2, 2));
        assert_eq!(ok[[1, 0]], 3.0);
    }

    #[test]
    fn build_engine_follows_family() {
        let config = IndexConfig::new(4, Metric::L2).with_index_key("IVF2,Flat");
        let family = config.validate().unwrap();
        let engine = build_engine(&config, family);
        assert_eq!(engine.dimension(), 4);
        assert_eq!(engine.total_count(), 0);

        let config = IndexConfig::new(3, Metric::InnerProduct).with_index_key("HNSW8");
        let family = config.validate().unwrap();
        assert_eq!(family, IndexFamily::Hnsw { links: 8 });
        let engine = build_engine(&config, family);
        assert_eq!(engine.metric(), Metric::InnerProduct);
    }
}
