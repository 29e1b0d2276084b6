use super::{check_width, AnnEngine, Neighbor};
use crate::config::Metric;
use crate::distance;
use crate::error::Result;
use anndists::dist::distances::Distance;
use hnsw_rs::hnsw::Hnsw;
use ndarray::ArrayView2;
use std::ops::Range;

/// Initial element estimate; the graph grows past it.
const CAPACITY_HINT: usize = 10_000;
const MAX_LAYERS: usize = 16;

/// Graph distance in the index's own convention (lower is better).
#[derive(Debug, Clone, Copy)]
struct MetricDistance(Metric);

impl Distance<f32> for MetricDistance {
    fn eval(&self, va: &[f32], vb: &[f32]) -> f32 {
        distance::distance(self.0, va, vb)
    }
}

/// Hierarchical navigable small-world graph (`HNSW<M>`).
///
/// Graph node ids are engine offsets, assigned in append order.
pub struct HnswEngine {
    dimension: usize,
    metric: Metric,
    ef_search: usize,
    graph: Hnsw<'static, f32, MetricDistance>,
    count: usize,
}

impl HnswEngine {
    #[must_use]
    pub fn new(
        dimension: usize,
        metric: Metric,
        links: usize,
        ef_construction: usize,
        ef_search: usize,
    ) -> Self {
        Self {
            dimension,
            metric,
            ef_search: ef_search.max(1),
            graph: Hnsw::new(
                links,
                CAPACITY_HINT,
                MAX_LAYERS,
                ef_construction.max(1),
                MetricDistance(metric),
            ),
            count: 0,
        }
    }
}

impl AnnEngine for HnswEngine {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn add(&mut self, vectors: ArrayView2<'_, f32>) -> Result<Range<usize>> {
        check_width(self.dimension, &vectors)?;
        let start = self.count;
        for row in vectors.rows() {
            let row = row.to_vec();
            self.graph.insert((&row, self.count));
            self.count += 1;
        }
        Ok(start..self.count)
    }

    fn search(&self, queries: ArrayView2<'_, f32>, k: usize) -> Result<Vec<Vec<Neighbor>>> {
        check_width(self.dimension, &queries)?;
        if self.count == 0 || k == 0 {
            return Ok(vec![Vec::new(); queries.nrows()]);
        }

        let k = k.min(self.count);
        let ef = self.ef_search.max(k);
        Ok(queries
            .rows()
            .into_iter()
            .map(|query| {
                let query = query.to_vec();
                let mut hits: Vec<Neighbor> = self
                    .graph
                    .search(&query, k, ef)
                    .into_iter()
                    .map(|n| Neighbor {
                        offset: n.d_id,
                        distance: n.distance,
                    })
                    .collect();
                hits.sort_by(|a, b| {
                    a.distance
                        .total_cmp(&b.distance)
                        .then_with(|| a.offset.cmp(&b.offset))
                });
                hits.truncate(k);
                hits
            })
            .collect())
    }

    fn total_count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::stack_rows;

    fn grid() -> Vec<Vec<f32>> {
        (0..100)
            .map(|i| vec![(i % 10) as f32, (i / 10) as f32])
            .collect()
    }

    #[test]
    fn offsets_follow_append_order() {
        let mut engine = HnswEngine::new(2, Metric::L2, 16, 100, 32);
        let rows = stack_rows(&grid(), 2).unwrap();
        assert_eq!(engine.add(rows.view()).unwrap(), 0..100);
        let extra = stack_rows(&[vec![0.5, 0.5]], 2).unwrap();
        assert_eq!(engine.add(extra.view()).unwrap(), 100..101);
        assert_eq!(engine.total_count(), 101);
    }

    #[test]
    fn finds_exact_neighbors_on_a_grid() {
        let mut engine = HnswEngine::new(2, Metric::L2, 16, 100, 64);
        let rows = stack_rows(&grid(), 2).unwrap();
        engine.add(rows.view()).unwrap();

        let query = stack_rows(&[vec![3.0, 7.0], vec![9.1, 0.1]], 2).unwrap();
        let hits = engine.search(query.view(), 1).unwrap();
        assert_eq!(hits[0][0].offset, 73);
        assert_eq!(hits[0][0].distance, 0.0);
        assert_eq!(hits[1][0].offset, 9);
    }

    #[test]
    fn empty_graph_returns_unpadded_rows() {
        let engine = HnswEngine::new(3, Metric::Cosine, 8, 40, 16);
        let query = stack_rows(&[vec![1.0, 0.0, 0.0]], 3).unwrap();
        assert_eq!(engine.search(query.view(), 5).unwrap(), vec![Vec::new()]);
    }
}
