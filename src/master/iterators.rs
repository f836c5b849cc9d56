//! Batch iterators driving the training schedules.

use crate::args::ProcessBatchesArgs;
use crate::error::{Result, TematicaError};

/// Emits the batch references of one processing step into the args.
pub(crate) trait BatchesIterator {
    fn move_to(&mut self, args: &mut ProcessBatchesArgs);
}

/// Offline iterator: every step emits the full batch list.
pub(crate) struct OfflineBatchesIterator {
    batch_filenames: Vec<String>,
    batch_weights: Vec<f32>,
}

impl OfflineBatchesIterator {
    pub(crate) fn new(batch_filenames: Vec<String>, batch_weights: Vec<f32>) -> Self {
        Self {
            batch_filenames,
            batch_weights,
        }
    }
}

impl BatchesIterator for OfflineBatchesIterator {
    fn move_to(&mut self, args: &mut ProcessBatchesArgs) {
        args.batch_filenames = self.batch_filenames.clone();
        args.batch_weights = self.batch_weights.clone();
    }
}

/// Online iterator: batches partitioned into update groups by the
/// nondecreasing `update_after` boundaries, with per-group mixing weights.
pub(crate) struct OnlineBatchesIterator {
    batch_filenames: Vec<String>,
    batch_weights: Vec<f32>,
    update_after: Vec<usize>,
    apply_weight: Vec<f32>,
    decay_weight: Vec<f32>,
    /// Cursor into `update_after`.
    current: usize,
}

impl OnlineBatchesIterator {
    /// Validates the group structure and builds the iterator.
    ///
    /// # Errors
    ///
    /// Returns [`TematicaError::InvalidOperation`] when `update_after` is
    /// empty, decreasing, out of bounds, or when the weight arrays differ
    /// in length from it.
    pub(crate) fn new(
        batch_filenames: Vec<String>,
        batch_weights: Vec<f32>,
        update_after: Vec<usize>,
        apply_weight: Vec<f32>,
        decay_weight: Vec<f32>,
    ) -> Result<Self> {
        if update_after.is_empty() {
            return Err(TematicaError::InvalidOperation(
                "update_after must not be empty".to_string(),
            ));
        }
        if update_after.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(TematicaError::InvalidOperation(
                "update_after must be nondecreasing".to_string(),
            ));
        }
        if *update_after.last().expect("nonempty") != batch_filenames.len() {
            return Err(TematicaError::InvalidOperation(format!(
                "the final update_after entry ({}) must equal the batch count ({})",
                update_after.last().expect("nonempty"),
                batch_filenames.len()
            )));
        }
        if apply_weight.len() != update_after.len() || decay_weight.len() != update_after.len() {
            return Err(TematicaError::InvalidOperation(
                "apply_weight and decay_weight must match update_after in length".to_string(),
            ));
        }
        Ok(Self {
            batch_filenames,
            batch_weights,
            update_after,
            apply_weight,
            decay_weight,
            current: 0,
        })
    }

    /// Whether another update group remains.
    pub(crate) fn more(&self) -> bool {
        self.current < self.update_after.len()
    }

    /// Apply weight of update group `index` (op-id addressed, not cursor).
    pub(crate) fn apply_weight(&self, index: usize) -> f32 {
        self.apply_weight[index]
    }

    /// Decay weight of update group `index`.
    pub(crate) fn decay_weight(&self, index: usize) -> f32 {
        self.decay_weight[index]
    }

    /// Apply weight of the group at the cursor.
    pub(crate) fn apply_weight_current(&self) -> f32 {
        self.apply_weight[self.current]
    }

    /// Decay weight of the group at the cursor.
    pub(crate) fn decay_weight_current(&self) -> f32 {
        self.decay_weight[self.current]
    }

    /// Rewinds to the first group.
    pub(crate) fn reset(&mut self) {
        self.current = 0;
    }
}

impl BatchesIterator for OnlineBatchesIterator {
    fn move_to(&mut self, args: &mut ProcessBatchesArgs) {
        args.batch_filenames.clear();
        args.batch_weights.clear();

        if self.current >= self.update_after.len() {
            return;
        }

        let first = if self.current == 0 {
            0
        } else {
            self.update_after[self.current - 1]
        };
        let last = self.update_after[self.current];
        for index in first..last {
            args.batch_filenames.push(self.batch_filenames[index].clone());
            args.batch_weights
                .push(self.batch_weights.get(index).copied().unwrap_or(1.0));
        }

        self.current += 1;
    }
}
