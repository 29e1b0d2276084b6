use super::flat::FlatEngine;
use super::{check_width, rank, AnnEngine, Neighbor};
use crate::config::Metric;
use crate::distance::{self, normalize};
use crate::error::Result;
use ndarray::ArrayView2;
use std::ops::Range;

const KMEANS_ITERS: usize = 8;

/// Inverted-file engine (`IVF<nlist>,Flat`).
///
/// Vectors live in a flat store in append order; `lists` only partitions the
/// offsets. The coarse quantizer is trained by k-means once `nlist` vectors
/// exist. Until then every search is an exact scan. Centroids are scored
/// with the engine metric; cosine centroids are kept at unit norm.
pub struct IvfEngine {
    store: FlatEngine,
    nlist: usize,
    nprobe: usize,
    centroids: Vec<Vec<f32>>,
    lists: Vec<Vec<usize>>,
}

impl IvfEngine {
    #[must_use]
    pub fn new(dimension: usize, metric: Metric, nlist: usize, nprobe: usize) -> Self {
        Self {
            store: FlatEngine::new(dimension, metric),
            nlist,
            nprobe: nprobe.max(1),
            centroids: Vec::new(),
            lists: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    fn train(&mut self) {
        let total = self.store.total_count();
        let vectors: Vec<Vec<f32>> = (0..total)
            .map(|offset| self.store.row(offset).to_vec())
            .collect();
        self.centroids = kmeans(self.metric(), &vectors, self.nlist, KMEANS_ITERS);
        self.lists = vec![Vec::new(); self.centroids.len()];
        for offset in 0..total {
            self.assign(offset);
        }
        log::debug!(
            "IVF quantizer trained: {} lists over {total} vectors",
            self.centroids.len()
        );
    }

    fn assign(&mut self, offset: usize) {
        let row = self.store.row(offset);
        if let Some(list) = nearest_centroid(self.store.metric(), row, &self.centroids) {
            self.lists[list].push(offset);
        }
    }

    fn lists_to_scan(&self, query: &[f32]) -> Vec<usize> {
        let metric = self.metric();
        let mut order: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(list, centroid)| (list, distance::distance(metric, query, centroid)))
            .collect();
        order.sort_by(|a, b| a.1.total_cmp(&b.1));
        order.truncate(self.nprobe);
        order.into_iter().map(|(list, _)| list).collect()
    }
}

impl AnnEngine for IvfEngine {
    fn dimension(&self) -> usize {
        self.store.dimension()
    }

    fn metric(&self) -> Metric {
        self.store.metric()
    }

    fn add(&mut self, vectors: ArrayView2<'_, f32>) -> Result<Range<usize>> {
        let range = self.store.add(vectors)?;
        if self.is_trained() {
            for offset in range.clone() {
                self.assign(offset);
            }
        } else if self.store.total_count() >= self.nlist {
            self.train();
        }
        Ok(range)
    }

    fn search(&self, queries: ArrayView2<'_, f32>, k: usize) -> Result<Vec<Vec<Neighbor>>> {
        if !self.is_trained() {
            return self.store.search(queries, k);
        }
        check_width(self.dimension(), &queries)?;

        Ok(queries
            .rows()
            .into_iter()
            .map(|query| {
                let query = query.to_vec();
                let scored = self
                    .lists_to_scan(&query)
                    .into_iter()
                    .flat_map(|list| self.lists[list].iter().copied())
                    .map(|offset| Neighbor {
                        offset,
                        distance: self.store.score(&query, offset),
                    })
                    .collect();
                rank(scored, k)
            })
            .collect())
    }

    fn total_count(&self) -> usize {
        self.store.total_count()
    }
}

fn nearest_centroid(metric: Metric, vector: &[f32], centroids: &[Vec<f32>]) -> Option<usize> {
    centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, distance::distance(metric, vector, c)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}

fn mean(rows: &[&Vec<f32>], dimension: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; dimension];
    for row in rows {
        for (acc, value) in out.iter_mut().zip(row.iter()) {
            *acc += value;
        }
    }
    let n = rows.len().max(1) as f32;
    out.iter_mut().for_each(|v| *v /= n);
    out
}

fn kmeans(metric: Metric, vectors: &[Vec<f32>], k: usize, iters: usize) -> Vec<Vec<f32>> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };
    let dimension = first.len();
    let k = k.min(vectors.len()).max(1);

    // Evenly spaced seeds keep training deterministic.
    let stride = vectors.len() / k;
    let mut centroids: Vec<Vec<f32>> = (0..k).map(|i| vectors[i * stride].clone()).collect();

    let mut assignment = vec![0usize; vectors.len()];
    for _ in 0..iters.max(1) {
        for (i, v) in vectors.iter().enumerate() {
            assignment[i] = nearest_centroid(metric, v, &centroids).unwrap_or(0);
        }
        for (cid, centroid) in centroids.iter_mut().enumerate() {
            let members: Vec<&Vec<f32>> = vectors
                .iter()
                .zip(assignment.iter())
                .filter_map(|(v, a)| (*a == cid).then_some(v))
                .collect();
            if !members.is_empty() {
                *centroid = mean(&members, dimension);
                if metric.normalizes() {
                    normalize(centroid);
                }
            }
        }
    }
    centroids
}
