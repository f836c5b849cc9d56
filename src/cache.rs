//! Θ caches: per-batch document-topic slices, assembled on demand into a
//! caller-visible matrix.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::args::{GetThetaMatrixArgs, MatrixLayout};
use crate::phi::WeightVector;

/// Document-topic rows produced by one batch (or, for the ptdw cache,
/// posterior rows per (document, word) position).
#[derive(Debug, Clone)]
pub struct ThetaSlice {
    /// Producing batch id; the cache key.
    pub batch_id: String,
    /// Topic axis of the rows.
    pub topic_names: Vec<String>,
    /// Item ids, one per row.
    pub item_ids: Vec<u32>,
    /// Item titles, positionally paired with `item_ids`.
    pub item_titles: Vec<String>,
    /// Dense rows over the topic axis.
    pub weights: Vec<Vec<f32>>,
}

/// A caller-visible Θ matrix assembled from cached slices.
#[derive(Debug, Clone, Default)]
pub struct ThetaMatrix {
    /// Topic axis of the rows.
    pub topic_names: Vec<String>,
    /// Item ids, one per row.
    pub item_ids: Vec<u32>,
    /// Item titles, positionally paired with `item_ids`.
    pub item_titles: Vec<String>,
    /// One weight row per item.
    pub item_weights: Vec<WeightVector>,
}

impl ThetaMatrix {
    /// Number of rows.
    #[must_use]
    pub fn item_size(&self) -> usize {
        self.item_ids.len()
    }

    /// Number of topics.
    #[must_use]
    pub fn topic_size(&self) -> usize {
        self.topic_names.len()
    }
}

/// Per-batch Θ slice cache.
///
/// Writers within one processing op touch disjoint keys (batch ids are
/// unique per op), so inserts never clobber each other; reads happen only
/// after the op drains.
#[derive(Debug, Default)]
pub struct CacheManager {
    entries: Mutex<(Vec<String>, HashMap<String, ThetaSlice>)>,
}

impl CacheManager {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a slice, overwriting any slice with the same batch id.
    pub fn insert(&self, slice: ThetaSlice) {
        let mut entries = self.entries.lock();
        if !entries.1.contains_key(&slice.batch_id) {
            entries.0.push(slice.batch_id.clone());
        }
        entries.1.insert(slice.batch_id.clone(), slice);
    }

    /// Slice produced by the given batch, if cached.
    #[must_use]
    pub fn get(&self, batch_id: &str) -> Option<ThetaSlice> {
        self.entries.lock().1.get(batch_id).cloned()
    }

    /// Assembles the cached slices, in insertion order, into one matrix.
    #[must_use]
    pub fn request_theta(&self, args: &GetThetaMatrixArgs) -> ThetaMatrix {
        let entries = self.entries.lock();
        let mut theta = ThetaMatrix::default();
        for batch_id in &entries.0 {
            let slice = &entries.1[batch_id];
            if theta.topic_names.is_empty() {
                theta.topic_names = slice.topic_names.clone();
            }
            for ((item_id, title), row) in slice
                .item_ids
                .iter()
                .zip(&slice.item_titles)
                .zip(&slice.weights)
            {
                theta.item_ids.push(*item_id);
                theta.item_titles.push(title.clone());
                theta.item_weights.push(match args.layout {
                    MatrixLayout::Dense => WeightVector::Dense(row.clone()),
                    MatrixLayout::Sparse => {
                        let mut topic_ids = Vec::new();
                        let mut values = Vec::new();
                        for (topic_id, &value) in row.iter().enumerate() {
                            if value.abs() > args.eps {
                                topic_ids.push(topic_id as u32);
                                values.push(value);
                            }
                        }
                        WeightVector::Sparse { topic_ids, values }
                    }
                });
            }
        }
        theta
    }

    /// Drops every cached slice.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.0.clear();
        entries.1.clear();
    }

    /// Number of cached slices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().0.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slice(batch_id: &str, item_id: u32, row: Vec<f32>) -> ThetaSlice {
        ThetaSlice {
            batch_id: batch_id.to_string(),
            topic_names: vec!["t0".to_string(), "t1".to_string()],
            item_ids: vec![item_id],
            item_titles: vec![String::new()],
            weights: vec![row],
        }
    }

    #[test]
    fn test_assembly_follows_insertion_order() {
        let cache = CacheManager::new();
        cache.insert(slice("b1", 10, vec![0.9, 0.1]));
        cache.insert(slice("b0", 20, vec![0.2, 0.8]));

        let theta = cache.request_theta(&GetThetaMatrixArgs::default());
        assert_eq!(theta.item_ids, vec![10, 20]);
        assert_eq!(theta.item_weights[0], WeightVector::Dense(vec![0.9, 0.1]));
    }

    #[test]
    fn test_insert_overwrites_same_batch() {
        let cache = CacheManager::new();
        cache.insert(slice("b0", 1, vec![1.0, 0.0]));
        cache.insert(slice("b0", 2, vec![0.0, 1.0]));

        let theta = cache.request_theta(&GetThetaMatrixArgs::default());
        assert_eq!(theta.item_size(), 1);
        assert_eq!(theta.item_ids, vec![2]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_sparse_layout_filters() {
        let cache = CacheManager::new();
        cache.insert(slice("b0", 1, vec![0.0, 0.7]));

        let args = GetThetaMatrixArgs {
            layout: MatrixLayout::Sparse,
            ..GetThetaMatrixArgs::default()
        };
        let theta = cache.request_theta(&args);
        match &theta.item_weights[0] {
            WeightVector::Sparse { topic_ids, values } => {
                assert_eq!(topic_ids, &vec![1]);
                assert_eq!(values, &vec![0.7]);
            }
            WeightVector::Dense(_) => panic!("expected sparse rows"),
        }
    }

    #[test]
    fn test_clear() {
        let cache = CacheManager::new();
        cache.insert(slice("b0", 1, vec![1.0, 0.0]));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.request_theta(&GetThetaMatrixArgs::default()).item_size(), 0);
    }
}
