//! In-memory nearest-neighbor index over chunk embeddings.
//!
//! The index is a cache derived from the metadata store: every entry can be
//! rebuilt from [`MetadataStore::load_all`](crate::storage::metadata::MetadataStore::load_all).
//! It is shared between the indexing worker (writes) and the query worker
//! (reads) behind an internal `RwLock`, held only for the duration of one call.

use crate::core::error::{Error, Result};
use crate::storage::metadata::ChunkId;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Distance metric for nearest-neighbor search. Smaller is closer for both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Squared euclidean distance
    #[default]
    L2,
    /// `1 - cosine similarity`
    Cosine,
}

impl Metric {
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::L2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
            Metric::Cosine => 1.0 - cosine_similarity(a, b),
        }
    }
}

/// One search hit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: ChunkId,
    pub distance: f32,
}

/// Exact nearest-neighbor index keyed by chunk id
pub struct VectorIndex {
    dimension: usize,
    metric: Metric,
    entries: RwLock<HashMap<ChunkId, Vec<f32>>>,
}

impl VectorIndex {
    /// Create an empty index for vectors of `dimension` components
    pub fn new(dimension: usize, metric: Metric) -> Self {
        Self {
            dimension,
            metric,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn len(&self) -> usize {
        self.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: ChunkId) -> bool {
        self.read().map(|entries| entries.contains_key(&id)).unwrap_or(false)
    }

    /// All ids currently present, sorted
    pub fn ids(&self) -> Result<Vec<ChunkId>> {
        let mut ids: Vec<ChunkId> = self.read()?.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Insert a batch of vectors. Nothing is inserted unless every vector is valid.
    pub fn add(&self, ids: &[ChunkId], vectors: &[Vec<f32>]) -> Result<()> {
        self.validate(ids, vectors)?;
        let mut entries = self.write()?;
        insert_all(&mut entries, ids, vectors);
        Ok(())
    }

    /// Remove ids; unknown ids are ignored. Returns how many were present.
    pub fn remove(&self, ids: &[ChunkId]) -> Result<usize> {
        let mut entries = self.write()?;
        Ok(ids.iter().filter(|id| entries.remove(id).is_some()).count())
    }

    /// Remove `stale` and insert `(ids, vectors)` under a single write guard,
    /// so readers see either the previous or the new state of a file.
    pub fn replace(&self, stale: &[ChunkId], ids: &[ChunkId], vectors: &[Vec<f32>]) -> Result<()> {
        self.validate(ids, vectors)?;
        let mut entries = self.write()?;
        for id in stale {
            entries.remove(id);
        }
        insert_all(&mut entries, ids, vectors);
        Ok(())
    }

    /// Drop every entry
    pub fn reset(&self) -> Result<()> {
        self.write()?.clear();
        Ok(())
    }

    /// Replace the whole content with `items` (startup load or recovery)
    pub fn rebuild(&self, items: Vec<(ChunkId, Vec<f32>)>) -> Result<usize> {
        if let Some((_, bad)) = items.iter().find(|(_, v)| v.len() != self.dimension) {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                got: bad.len(),
            });
        }
        let mut entries = self.write()?;
        entries.clear();
        entries.reserve(items.len());
        entries.extend(items);
        Ok(entries.len())
    }

    /// The `k` closest entries to `query`, ordered by ascending distance.
    /// Fewer than `k` are returned when the index holds fewer entries.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                got: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let metric = self.metric;
        let entries = self.read()?;
        let mut hits: Vec<Neighbor> = entries
            .par_iter()
            .map(|(id, vector)| Neighbor {
                id: *id,
                distance: metric.distance(query, vector),
            })
            .collect();
        drop(entries);

        hits.par_sort_unstable_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }

    fn validate(&self, ids: &[ChunkId], vectors: &[Vec<f32>]) -> Result<()> {
        if ids.len() != vectors.len() {
            return Err(Error::Index(format!(
                "{} ids supplied for {} vectors",
                ids.len(),
                vectors.len()
            )));
        }
        match vectors.iter().find(|v| v.len() != self.dimension) {
            Some(bad) => Err(Error::DimensionMismatch {
                expected: self.dimension,
                got: bad.len(),
            }),
            None => Ok(()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<ChunkId, Vec<f32>>>> {
        self.entries
            .read()
            .map_err(|e| Error::Index(format!("Index lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<ChunkId, Vec<f32>>>> {
        self.entries
            .write()
            .map_err(|e| Error::Index(format!("Index lock poisoned: {}", e)))
    }
}

fn insert_all(entries: &mut HashMap<ChunkId, Vec<f32>>, ids: &[ChunkId], vectors: &[Vec<f32>]) {
    for (id, vector) in ids.iter().zip(vectors) {
        entries.insert(*id, vector.clone());
    }
}

/// Calculate cosine similarity between two vectors
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(items: &[(ChunkId, [f32; 3])]) -> VectorIndex {
        let index = VectorIndex::new(3, Metric::L2);
        let ids: Vec<ChunkId> = items.iter().map(|(id, _)| *id).collect();
        let vectors: Vec<Vec<f32>> = items.iter().map(|(_, v)| v.to_vec()).collect();
        index.add(&ids, &vectors).unwrap();
        index
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 0.001);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 0.001);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
        assert!(cosine_similarity(&[1.0, -1.0], &[-1.0, 1.0]) < 0.0);
    }

    #[test]
    fn test_metric_distances() {
        assert_eq!(Metric::L2.distance(&[1.0, 0.0], &[0.0, 1.0]), 2.0);
        assert_eq!(Metric::L2.distance(&[1.0, 2.0], &[1.0, 2.0]), 0.0);
        assert!(Metric::Cosine.distance(&[1.0, 0.0], &[2.0, 0.0]).abs() < 0.001);
        assert!((Metric::Cosine.distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_search_orders_by_distance() {
        let index = index_with(&[
            (1, [0.0, 0.0, 0.0]),
            (2, [1.0, 0.0, 0.0]),
            (3, [3.0, 0.0, 0.0]),
        ]);

        let hits = index.search(&[0.9, 0.0, 0.0], 3).unwrap();
        let ids: Vec<ChunkId> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn test_search_returns_fewer_than_k() {
        let index = index_with(&[(7, [1.0, 1.0, 1.0])]);
        let hits = index.search(&[1.0, 1.0, 1.0], 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 7);

        assert!(index.search(&[1.0, 1.0, 1.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_remove_ignores_unknown_ids() {
        let index = index_with(&[(1, [1.0, 0.0, 0.0]), (2, [0.0, 1.0, 0.0])]);
        assert_eq!(index.remove(&[2, 99]).unwrap(), 1);
        assert_eq!(index.ids().unwrap(), vec![1]);
        assert!(!index.contains(2));
    }

    #[test]
    fn test_add_rejects_wrong_dimension_atomically() {
        let index = VectorIndex::new(3, Metric::L2);
        let result = index.add(&[1, 2], &[vec![1.0, 0.0, 0.0], vec![1.0, 0.0]]);
        assert!(matches!(
            result,
            Err(Error::DimensionMismatch { expected: 3, got: 2 })
        ));
        assert!(index.is_empty());

        assert!(index.add(&[1], &[]).is_err());
        assert!(index.search(&[1.0], 1).is_err());
    }

    #[test]
    fn test_replace_swaps_ids() {
        let index = index_with(&[(1, [1.0, 0.0, 0.0]), (2, [0.0, 1.0, 0.0]), (3, [0.0, 0.0, 1.0])]);
        index
            .replace(&[1, 2], &[4], &[vec![0.5, 0.5, 0.0]])
            .unwrap();
        assert_eq!(index.ids().unwrap(), vec![3, 4]);
    }

    #[test]
    fn test_reset_and_rebuild() {
        let index = index_with(&[(1, [1.0, 0.0, 0.0])]);
        index.reset().unwrap();
        assert!(index.is_empty());

        let loaded = index
            .rebuild(vec![(5, vec![0.0, 1.0, 0.0]), (6, vec![0.0, 0.0, 1.0])])
            .unwrap();
        assert_eq!(loaded, 2);
        assert_eq!(index.ids().unwrap(), vec![5, 6]);

        assert!(index.rebuild(vec![(9, vec![1.0])]).is_err());
        // A failed rebuild keeps the previous content
        assert_eq!(index.len(), 2);
    }
}
