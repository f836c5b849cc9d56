//! Request argument types for the master API.
//!
//! These are plain structs with builder setters; the master validates and
//! snapshots them at entry, never mutating caller-owned values.

use std::path::PathBuf;
use std::sync::Arc;

use crate::batch::{Batch, Token};

/// Layout of a retrieved matrix message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatrixLayout {
    /// Every cell, one value per topic.
    #[default]
    Dense,
    /// Only cells above the request's `eps`.
    Sparse,
}

/// What a processing call should capture from the workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThetaMatrixType {
    /// Capture nothing.
    #[default]
    None,
    /// Promote Θ slices to the instance cache (honored only when the
    /// config enables `cache_theta`).
    Cache,
    /// Return a dense Θ assembled from a call-local cache.
    Dense,
    /// Return a sparse Θ assembled from a call-local cache.
    Sparse,
    /// Return dense per-(document, word) posteriors.
    DensePtdw,
    /// Return sparse per-(document, word) posteriors.
    SparsePtdw,
}

impl ThetaMatrixType {
    /// Layout of the returned matrix for the Dense*/Sparse* variants.
    #[must_use]
    pub fn layout(self) -> MatrixLayout {
        match self {
            ThetaMatrixType::Sparse | ThetaMatrixType::SparsePtdw => MatrixLayout::Sparse,
            _ => MatrixLayout::Dense,
        }
    }
}

/// Default sparse-layout threshold.
pub const DEFAULT_EPS: f32 = 1e-37;

/// Arguments of a topic-model retrieval.
#[derive(Debug, Clone)]
pub struct GetTopicModelArgs {
    /// Model to read; the config's Φ name when unset.
    pub model_name: Option<String>,
    /// Tokens to include; all when empty.
    pub tokens: Vec<Token>,
    /// Topics to include, by name; all when empty.
    pub topic_names: Vec<String>,
    /// Dense or sparse rows.
    pub layout: MatrixLayout,
    /// Sparse threshold.
    pub eps: f32,
}

impl Default for GetTopicModelArgs {
    fn default() -> Self {
        Self {
            model_name: None,
            tokens: Vec::new(),
            topic_names: Vec::new(),
            layout: MatrixLayout::Dense,
            eps: DEFAULT_EPS,
        }
    }
}

impl GetTopicModelArgs {
    /// Targets a specific model.
    #[must_use]
    pub fn for_model(name: impl Into<String>) -> Self {
        Self {
            model_name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Sets the layout.
    #[must_use]
    pub fn with_layout(mut self, layout: MatrixLayout) -> Self {
        self.layout = layout;
        self
    }
}

/// Arguments of a Θ retrieval.
#[derive(Debug, Clone)]
pub struct GetThetaMatrixArgs {
    /// Dense or sparse rows.
    pub layout: MatrixLayout,
    /// Sparse threshold.
    pub eps: f32,
}

impl Default for GetThetaMatrixArgs {
    fn default() -> Self {
        Self {
            layout: MatrixLayout::Dense,
            eps: DEFAULT_EPS,
        }
    }
}

/// Arguments of one processing operation over a set of batches.
#[derive(Debug, Clone, Default)]
pub struct ProcessBatchesArgs {
    /// Source Φ name.
    pub pwt_source_name: String,
    /// Counter matrix to create and fill; processing is read-only when unset.
    pub nwt_target_name: Option<String>,
    /// Batches by store key or disk path.
    pub batch_filenames: Vec<String>,
    /// Inline batches, processed after the named ones.
    pub batches: Vec<Arc<Batch>>,
    /// Per-batch weights, positionally paired with the concatenation of
    /// `batch_filenames` and `batches`; missing entries default to 1.0.
    pub batch_weights: Vec<f32>,
    /// What to capture from the workers.
    pub theta_matrix_type: ThetaMatrixType,
    /// Inner E-step iterations; the config value when unset.
    pub inner_iterations_count: Option<usize>,
    /// Class filter; all classes when empty.
    pub class_ids: Vec<String>,
    /// Per-class weights, positionally paired with `class_ids`.
    pub class_weights: Vec<f32>,
    /// Seed Θ from the instance cache when available.
    pub reuse_theta: bool,
    /// Kernel hint: fused inner loop.
    pub opt_for_avx: bool,
}

impl ProcessBatchesArgs {
    /// Creates args reading from `pwt_source`.
    #[must_use]
    pub fn from_source(pwt_source: impl Into<String>) -> Self {
        Self {
            pwt_source_name: pwt_source.into(),
            opt_for_avx: true,
            ..Self::default()
        }
    }

    /// Sets the counter target.
    #[must_use]
    pub fn with_nwt_target(mut self, name: impl Into<String>) -> Self {
        self.nwt_target_name = Some(name.into());
        self
    }

    /// Adds a batch reference by store key or path.
    #[must_use]
    pub fn with_batch_filename(mut self, name: impl Into<String>) -> Self {
        self.batch_filenames.push(name.into());
        self
    }

    /// Adds an inline batch.
    #[must_use]
    pub fn with_batch(mut self, batch: Batch) -> Self {
        self.batches.push(Arc::new(batch));
        self
    }

    /// Sets the capture mode.
    #[must_use]
    pub fn with_theta_matrix_type(mut self, theta_type: ThetaMatrixType) -> Self {
        self.theta_matrix_type = theta_type;
        self
    }

    /// Weight of the batch at `index` in enqueue order.
    #[must_use]
    pub fn batch_weight(&self, index: usize) -> f32 {
        self.batch_weights.get(index).copied().unwrap_or(1.0)
    }

    /// Per-class weight lookup against this snapshot, defaulting to 1.0.
    #[must_use]
    pub fn class_weight(&self, class_id: &str) -> f32 {
        self.class_ids
            .iter()
            .position(|c| c == class_id)
            .and_then(|i| self.class_weights.get(i).copied())
            .unwrap_or(1.0)
    }

    /// Whether `class_id` passes the class filter.
    #[must_use]
    pub fn class_enabled(&self, class_id: &str) -> bool {
        self.class_ids.is_empty() || self.class_ids.iter().any(|c| c == class_id)
    }
}

/// Arguments of a transform request (processing without a counter target).
#[derive(Debug, Clone)]
pub struct TransformArgs {
    /// Batches by store key or disk path.
    pub batch_filenames: Vec<String>,
    /// Inline batches.
    pub batches: Vec<Arc<Batch>>,
    /// What to capture; dense Θ by default.
    pub theta_matrix_type: ThetaMatrixType,
}

impl Default for TransformArgs {
    fn default() -> Self {
        Self {
            batch_filenames: Vec::new(),
            batches: Vec::new(),
            theta_matrix_type: ThetaMatrixType::Dense,
        }
    }
}

impl TransformArgs {
    /// Adds a batch reference by store key or path.
    #[must_use]
    pub fn with_batch_filename(mut self, name: impl Into<String>) -> Self {
        self.batch_filenames.push(name.into());
        self
    }

    /// Adds an inline batch.
    #[must_use]
    pub fn with_batch(mut self, batch: Batch) -> Self {
        self.batches.push(Arc::new(batch));
        self
    }

    /// Sets the capture mode.
    #[must_use]
    pub fn with_theta_matrix_type(mut self, theta_type: ThetaMatrixType) -> Self {
        self.theta_matrix_type = theta_type;
        self
    }
}

/// Arguments of a model merge.
#[derive(Debug, Clone, Default)]
pub struct MergeModelArgs {
    /// Target name; may repeat one of the sources.
    pub nwt_target_name: String,
    /// Source names; missing sources are skipped with a warning.
    pub nwt_source_names: Vec<String>,
    /// Weights, positionally paired with `nwt_source_names`.
    pub source_weights: Vec<f32>,
    /// Topic axis override; the first found source's topics when empty.
    pub topic_names: Vec<String>,
}

impl MergeModelArgs {
    /// Creates a merge into `target`.
    #[must_use]
    pub fn into_target(target: impl Into<String>) -> Self {
        Self {
            nwt_target_name: target.into(),
            ..Self::default()
        }
    }

    /// Adds a weighted source.
    #[must_use]
    pub fn with_source(mut self, name: impl Into<String>, weight: f32) -> Self {
        self.nwt_source_names.push(name.into());
        self.source_weights.push(weight);
        self
    }
}

/// One regularizer activation inside a regularization request.
#[derive(Debug, Clone)]
pub struct RegularizerSettings {
    /// Configured regularizer name.
    pub name: String,
    /// Coefficient for this application.
    pub tau: f32,
}

/// Arguments of a regularization step.
#[derive(Debug, Clone, Default)]
pub struct RegularizeModelArgs {
    /// Current Φ read by the regularizers.
    pub pwt_source_name: String,
    /// Counter matrix the output is reshaped from.
    pub nwt_source_name: String,
    /// Name the R matrix is registered under.
    pub rwt_target_name: String,
    /// Regularizers to apply, in order.
    pub settings: Vec<RegularizerSettings>,
}

/// Arguments of a normalization step.
#[derive(Debug, Clone, Default)]
pub struct NormalizeModelArgs {
    /// Name the normalized Φ is registered under.
    pub pwt_target_name: String,
    /// Counter matrix to normalize.
    pub nwt_source_name: String,
    /// Optional R matrix combined with N before normalization.
    pub rwt_source_name: Option<String>,
}

/// Arguments of model initialization from a dictionary.
#[derive(Debug, Clone)]
pub struct InitializeModelArgs {
    /// Target model name; the config's Φ name when unset.
    pub model_name: Option<String>,
    /// Dictionary supplying the token axis.
    pub dictionary_name: String,
    /// Topic axis; the config's topics when empty.
    pub topic_names: Vec<String>,
    /// PRNG seed; rows are deterministic in (seed, token).
    pub seed: u64,
}

impl InitializeModelArgs {
    /// Creates args over the given dictionary.
    #[must_use]
    pub fn from_dictionary(name: impl Into<String>) -> Self {
        Self {
            model_name: None,
            dictionary_name: name.into(),
            topic_names: Vec::new(),
            seed: 0,
        }
    }

    /// Sets the seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Arguments of a model export.
#[derive(Debug, Clone)]
pub struct ExportModelArgs {
    /// Model to export; the config's Φ name when unset.
    pub model_name: Option<String>,
    /// Target file; must not already exist.
    pub file_name: PathBuf,
}

/// Arguments of a model import.
#[derive(Debug, Clone)]
pub struct ImportModelArgs {
    /// Name to register the imported model under; the config's Φ name when
    /// unset.
    pub model_name: Option<String>,
    /// Source file.
    pub file_name: PathBuf,
}

/// Arguments of an offline fit.
#[derive(Debug, Clone, Default)]
pub struct FitOfflineArgs {
    /// Batches by store key or disk path; when empty, falls back to
    /// `batch_folder`, then to every registered in-memory batch.
    pub batch_filenames: Vec<String>,
    /// Per-batch weights; missing entries default to 1.0.
    pub batch_weights: Vec<f32>,
    /// Folder scanned for `*.batch` files when `batch_filenames` is empty.
    pub batch_folder: Option<PathBuf>,
    /// Full passes over the batch list.
    pub passes: usize,
}

impl FitOfflineArgs {
    /// Creates args for the given number of passes.
    #[must_use]
    pub fn with_passes(passes: usize) -> Self {
        Self {
            passes,
            ..Self::default()
        }
    }

    /// Adds a batch reference.
    #[must_use]
    pub fn with_batch_filename(mut self, name: impl Into<String>) -> Self {
        self.batch_filenames.push(name.into());
        self
    }
}

/// Arguments of an online fit.
#[derive(Debug, Clone, Default)]
pub struct FitOnlineArgs {
    /// Batches by store key or disk path.
    pub batch_filenames: Vec<String>,
    /// Per-batch weights; missing entries default to 1.0.
    pub batch_weights: Vec<f32>,
    /// Nondecreasing group boundaries; the final entry must equal the
    /// batch count.
    pub update_after: Vec<usize>,
    /// Merge weight of each group's fresh counters.
    pub apply_weight: Vec<f32>,
    /// Merge weight of the accumulated counters at each update.
    pub decay_weight: Vec<f32>,
    /// Overlap processing with the model update pipeline.
    pub asynchronous: bool,
}

impl FitOnlineArgs {
    /// Adds a batch reference.
    #[must_use]
    pub fn with_batch_filename(mut self, name: impl Into<String>) -> Self {
        self.batch_filenames.push(name.into());
        self
    }

    /// Appends an update group ending at `update_after` with the given
    /// mixing weights.
    #[must_use]
    pub fn with_update(mut self, update_after: usize, apply: f32, decay: f32) -> Self {
        self.update_after.push(update_after);
        self.apply_weight.push(apply);
        self.decay_weight.push(decay);
        self
    }

    /// Enables the asynchronous schedule.
    #[must_use]
    pub fn with_async(mut self, asynchronous: bool) -> Self {
        self.asynchronous = asynchronous;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_args_weight_defaults() {
        let args = ProcessBatchesArgs::from_source("pwt").with_batch_filename("b0");
        assert_eq!(args.batch_weight(0), 1.0);
        assert_eq!(args.batch_weight(7), 1.0);
    }

    #[test]
    fn test_class_filter() {
        let mut args = ProcessBatchesArgs::from_source("pwt");
        assert!(args.class_enabled("@default_class"));

        args.class_ids = vec!["@labels".to_string()];
        args.class_weights = vec![2.0];
        assert!(!args.class_enabled("@default_class"));
        assert!(args.class_enabled("@labels"));
        assert_eq!(args.class_weight("@labels"), 2.0);
    }

    #[test]
    fn test_theta_type_layout() {
        assert_eq!(ThetaMatrixType::Dense.layout(), MatrixLayout::Dense);
        assert_eq!(ThetaMatrixType::SparsePtdw.layout(), MatrixLayout::Sparse);
        assert_eq!(ThetaMatrixType::None.layout(), MatrixLayout::Dense);
    }

    #[test]
    fn test_online_args_builder() {
        let args = FitOnlineArgs::default()
            .with_batch_filename("b0")
            .with_batch_filename("b1")
            .with_update(2, 0.5, 0.5);
        assert_eq!(args.update_after, vec![2]);
        assert_eq!(args.apply_weight, vec![0.5]);
        assert_eq!(args.decay_weight, vec![0.5]);
    }
}
