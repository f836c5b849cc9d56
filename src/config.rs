//! Master configuration: conventional matrix names, topics, worker pool
//! size, and the regularizer/score sets recreated on reconfigure.

use serde::{Deserialize, Serialize};

/// Default class id for tokens that carry no modality label.
pub const DEFAULT_CLASS_ID: &str = "@default_class";

/// Configuration of a [`crate::Master`] instance.
///
/// Follows builder conventions: construct with [`MasterConfig::new`] and
/// chain `with_*` setters.
///
/// # Examples
///
/// ```
/// use tematica::MasterConfig;
///
/// let config = MasterConfig::new()
///     .with_topic_names(["topic_0", "topic_1"])
///     .with_threads(2)
///     .with_inner_iterations(10);
/// assert_eq!(config.topic_names.len(), 2);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Registry name of the normalized model Φ.
    pub pwt_name: String,
    /// Registry name of the counter matrix N.
    pub nwt_name: String,
    /// Ordered topic names; fixed for every matrix the master creates.
    pub topic_names: Vec<String>,
    /// Class ids (modalities) to include; empty means all.
    pub class_ids: Vec<String>,
    /// Per-class weights, positionally paired with `class_ids`.
    pub class_weights: Vec<f32>,
    /// Φ-regularizers applied between Merge and Normalize.
    pub regularizers: Vec<RegularizerConfig>,
    /// Scores computed per batch and archived per pass.
    pub scores: Vec<ScoreConfig>,
    /// Inner E-step iterations per document.
    pub inner_iterations_count: usize,
    /// Worker pool size. Processing requires at least one worker.
    pub threads: usize,
    /// Keep Θ slices in the instance cache when a request asks for it.
    pub cache_theta: bool,
    /// Kernel hint: use the fused (auto-vectorizable) E-step inner loop.
    pub opt_for_avx: bool,
    /// Seed each document's Θ from the instance cache when available.
    pub reuse_theta: bool,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            pwt_name: "pwt".to_string(),
            nwt_name: "nwt".to_string(),
            topic_names: Vec::new(),
            class_ids: Vec::new(),
            class_weights: Vec::new(),
            regularizers: Vec::new(),
            scores: Vec::new(),
            inner_iterations_count: 10,
            threads: std::thread::available_parallelism().map_or(1, usize::from),
            cache_theta: false,
            opt_for_avx: true,
            reuse_theta: false,
        }
    }
}

impl MasterConfig {
    /// Creates a configuration with default matrix names and pool size.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the registry name of the normalized model Φ.
    #[must_use]
    pub fn with_pwt_name(mut self, name: impl Into<String>) -> Self {
        self.pwt_name = name.into();
        self
    }

    /// Sets the registry name of the counter matrix N.
    #[must_use]
    pub fn with_nwt_name(mut self, name: impl Into<String>) -> Self {
        self.nwt_name = name.into();
        self
    }

    /// Sets the ordered topic names.
    #[must_use]
    pub fn with_topic_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topic_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Declares `count` topics named `topic_0 .. topic_{count-1}`.
    #[must_use]
    pub fn with_topic_count(mut self, count: usize) -> Self {
        self.topic_names = (0..count).map(|i| format!("topic_{i}")).collect();
        self
    }

    /// Restricts processing to the given class ids with matching weights.
    #[must_use]
    pub fn with_class(mut self, class_id: impl Into<String>, weight: f32) -> Self {
        self.class_ids.push(class_id.into());
        self.class_weights.push(weight);
        self
    }

    /// Adds a regularizer.
    #[must_use]
    pub fn with_regularizer(mut self, config: RegularizerConfig) -> Self {
        self.regularizers.push(config);
        self
    }

    /// Adds a score.
    #[must_use]
    pub fn with_score(mut self, config: ScoreConfig) -> Self {
        self.scores.push(config);
        self
    }

    /// Sets the inner E-step iteration count.
    #[must_use]
    pub fn with_inner_iterations(mut self, count: usize) -> Self {
        self.inner_iterations_count = count;
        self
    }

    /// Sets the worker pool size.
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Enables or disables the instance-level Θ cache.
    #[must_use]
    pub fn with_cache_theta(mut self, cache: bool) -> Self {
        self.cache_theta = cache;
        self
    }

    /// Enables or disables Θ reuse across processing calls.
    #[must_use]
    pub fn with_reuse_theta(mut self, reuse: bool) -> Self {
        self.reuse_theta = reuse;
        self
    }

    /// Returns the weight configured for `class_id`, defaulting to 1.0.
    #[must_use]
    pub fn class_weight(&self, class_id: &str) -> f32 {
        self.class_ids
            .iter()
            .position(|c| c == class_id)
            .and_then(|i| self.class_weights.get(i).copied())
            .unwrap_or(1.0)
    }
}

/// Configuration of one Φ-regularizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegularizerConfig {
    /// Unique regularizer name, referenced from regularization settings.
    pub name: String,
    /// Regularization coefficient.
    pub tau: f32,
    /// Which regularizer to instantiate.
    pub kind: RegularizerKind,
}

/// Supported Φ-regularizer kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegularizerKind {
    /// Adds `tau` uniformly to every cell: positive `tau` smooths the
    /// model, negative `tau` sparsifies it.
    SmoothSparsePhi,
}

/// Configuration of one score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreConfig {
    /// Unique score name, used for retrieval and history lookup.
    pub name: String,
    /// Which calculator to instantiate.
    pub kind: ScoreKind,
}

/// Supported score kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScoreKind {
    /// Corpus perplexity, accumulated per batch inside the workers.
    Perplexity,
    /// Fraction of Φ cells below `eps`, computed against the current model.
    SparsityPhi {
        /// Threshold under which a cell counts as zero.
        eps: f32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_names() {
        let config = MasterConfig::default();
        assert_eq!(config.pwt_name, "pwt");
        assert_eq!(config.nwt_name, "nwt");
        assert!(config.threads >= 1);
        assert_eq!(config.inner_iterations_count, 10);
    }

    #[test]
    fn test_builder_chain() {
        let config = MasterConfig::new()
            .with_topic_count(3)
            .with_threads(4)
            .with_class("@default_class", 1.0)
            .with_inner_iterations(20)
            .with_cache_theta(true);
        assert_eq!(config.topic_names, vec!["topic_0", "topic_1", "topic_2"]);
        assert_eq!(config.threads, 4);
        assert!(config.cache_theta);
        assert_eq!(config.inner_iterations_count, 20);
    }

    #[test]
    fn test_class_weight_lookup() {
        let config = MasterConfig::new()
            .with_class("@default_class", 1.0)
            .with_class("@labels", 5.0);
        assert_eq!(config.class_weight("@labels"), 5.0);
        assert_eq!(config.class_weight("@default_class"), 1.0);
        // Unconfigured classes default to 1.0.
        assert_eq!(config.class_weight("@unknown"), 1.0);
    }

    #[test]
    fn test_config_roundtrip_serde() {
        let config = MasterConfig::new().with_topic_count(2).with_score(ScoreConfig {
            name: "perplexity".to_string(),
            kind: ScoreKind::Perplexity,
        });
        let bytes = bincode::serialize(&config).expect("config serializes");
        let back: MasterConfig = bincode::deserialize(&bytes).expect("config deserializes");
        assert_eq!(back.topic_names, config.topic_names);
        assert_eq!(back.scores.len(), 1);
    }
}
