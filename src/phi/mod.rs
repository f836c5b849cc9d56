//! Φ matrices: the token × topic arrays the trainer shares between the
//! orchestrator and the worker pool.
//!
//! - [`PhiMatrix`]: the read/accumulate interface the registry hands out
//! - [`DensePhiMatrix`]: owned storage with per-row locks
//! - [`AttachedPhiMatrix`]: storage shared with a caller-held buffer
//! - [`ops`]: the matrix algebra behind Merge, Regularize and Normalize

mod attached;
mod dense;
pub mod ops;

pub use attached::{AttachedBuffer, AttachedPhiMatrix};
pub use dense::DensePhiMatrix;

use serde::{Deserialize, Serialize};

use crate::batch::Token;

/// Read and accumulate interface over a token × topic matrix.
///
/// Published matrices are never mutated; the single exception is the counter
/// target of an in-flight processing op, which workers grow through
/// [`PhiMatrix::increase_row`]. Readers of such a matrix observe
/// monotonically growing values during the op and the final sums afterward.
pub trait PhiMatrix: Send + Sync {
    /// Registry name.
    fn name(&self) -> &str;

    /// Ordered topic names, fixed at creation.
    fn topic_names(&self) -> &[String];

    /// Number of token rows.
    fn token_size(&self) -> usize;

    /// Number of topic columns.
    fn topic_size(&self) -> usize {
        self.topic_names().len()
    }

    /// Token at the given row.
    fn token(&self, token_id: usize) -> &Token;

    /// Row index of a token, if present.
    fn token_index(&self, token: &Token) -> Option<usize>;

    /// Single cell read.
    fn get(&self, token_id: usize, topic_id: usize) -> f32;

    /// Copies out one row.
    fn row_copy(&self, token_id: usize) -> Vec<f32>;

    /// Adds `increment` elementwise into a row. Race-free across rows and
    /// serialized within one row.
    ///
    /// # Panics
    ///
    /// Panics if `increment` length differs from the topic axis width.
    fn increase_row(&self, token_id: usize, increment: &[f32]);

    /// Whether the storage is shared with an external buffer.
    fn is_attached(&self) -> bool {
        false
    }
}

/// Per-token weight row of an external topic model, dense or sparse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WeightVector {
    /// One value per topic of the owning model.
    Dense(Vec<f32>),
    /// Only the above-threshold values, with their topic indices.
    Sparse {
        /// Indices into the owning model's topic axis.
        topic_ids: Vec<u32>,
        /// Values, positionally paired with `topic_ids`.
        values: Vec<f32>,
    },
}

impl WeightVector {
    /// Value at `topic_id`, zero when absent from a sparse row.
    #[must_use]
    pub fn value(&self, topic_id: usize) -> f32 {
        match self {
            WeightVector::Dense(values) => values.get(topic_id).copied().unwrap_or(0.0),
            WeightVector::Sparse { topic_ids, values } => topic_ids
                .iter()
                .position(|&t| t as usize == topic_id)
                .map_or(0.0, |i| values[i]),
        }
    }

    /// Expands to a dense row of the given width.
    #[must_use]
    pub fn to_dense(&self, topic_size: usize) -> Vec<f32> {
        match self {
            WeightVector::Dense(values) => {
                let mut row = values.clone();
                row.resize(topic_size, 0.0);
                row
            }
            WeightVector::Sparse { topic_ids, values } => {
                let mut row = vec![0.0; topic_size];
                for (&t, &v) in topic_ids.iter().zip(values) {
                    if (t as usize) < topic_size {
                        row[t as usize] = v;
                    }
                }
                row
            }
        }
    }
}

/// Caller-visible form of a Φ or N matrix: the unit of export, import,
/// overwrite and merge transfers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicModel {
    /// Model name.
    pub name: String,
    /// Ordered topic names of the weight rows.
    pub topic_names: Vec<String>,
    /// Tokens, positionally paired with `token_weights`.
    pub tokens: Vec<Token>,
    /// One weight row per token.
    pub token_weights: Vec<WeightVector>,
}

impl TopicModel {
    /// Number of tokens.
    #[must_use]
    pub fn token_size(&self) -> usize {
        self.tokens.len()
    }

    /// Number of topics.
    #[must_use]
    pub fn topic_size(&self) -> usize {
        self.topic_names.len()
    }
}
