use super::{check_width, rank, AnnEngine, Neighbor};
use crate::config::Metric;
use crate::distance;
use crate::error::{IndexError, Result};
use ndarray::{ArrayView1, ArrayView2};
use std::ops::Range;

/// Exact search over every appended vector.
pub struct FlatEngine {
    dimension: usize,
    metric: Metric,
    data: Vec<f32>,
}

impl FlatEngine {
    #[must_use]
    pub const fn new(dimension: usize, metric: Metric) -> Self {
        Self {
            dimension,
            metric,
            data: Vec::new(),
        }
    }

    pub(crate) fn row(&self, offset: usize) -> &[f32] {
        let start = offset * self.dimension;
        &self.data[start..start + self.dimension]
    }

    pub(crate) fn matrix(&self) -> Result<ArrayView2<'_, f32>> {
        ArrayView2::from_shape((self.total_count(), self.dimension), &self.data)
            .map_err(|err| IndexError::Engine(format!("flat storage shape: {err}")))
    }

    pub(crate) fn score(&self, query: &[f32], offset: usize) -> f32 {
        distance::distance(self.metric, query, self.row(offset))
    }

    fn search_one(
        &self,
        base: &ArrayView2<'_, f32>,
        query: ArrayView1<'_, f32>,
        k: usize,
    ) -> Vec<Neighbor> {
        let scored: Vec<Neighbor> = match self.metric {
            Metric::L2 => base
                .rows()
                .into_iter()
                .enumerate()
                .map(|(offset, row)| Neighbor {
                    offset,
                    distance: (&row - &query).mapv(|d| d * d).sum(),
                })
                .collect(),
            Metric::InnerProduct | Metric::Cosine => base
                .dot(&query)
                .iter()
                .enumerate()
                .map(|(offset, ip)| Neighbor {
                    offset,
                    distance: distance::from_inner_product(self.metric, *ip),
                })
                .collect(),
        };
        rank(scored, k)
    }
}

impl AnnEngine for FlatEngine {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn add(&mut self, vectors: ArrayView2<'_, f32>) -> Result<Range<usize>> {
        check_width(self.dimension, &vectors)?;
        let start = self.total_count();
        self.data.reserve(vectors.len());
        self.data.extend(vectors.iter().copied());
        Ok(start..self.total_count())
    }

    fn search(&self, queries: ArrayView2<'_, f32>, k: usize) -> Result<Vec<Vec<Neighbor>>> {
        check_width(self.dimension, &queries)?;
        if k == 0 || self.data.is_empty() {
            return Ok(vec![Vec::new(); queries.nrows()]);
        }
        let base = self.matrix()?;
        Ok(queries
            .rows()
            .into_iter()
            .map(|query| self.search_one(&base, query, k))
            .collect())
    }

    fn total_count(&self) -> usize {
        self.data.len() / self.dimension
    }
}
