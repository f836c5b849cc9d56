//! Φ-regularizers: additive corrections applied to the counter matrix
//! before normalization.

use std::sync::Arc;

use crate::config::{RegularizerConfig, RegularizerKind};
use crate::phi::{DensePhiMatrix, PhiMatrix};

/// The regularization seam invoked between Merge and Normalize.
///
/// Implementations add their contribution into `r_wt`; an empty regularizer
/// set leaves R all-zero, which makes regularized normalization coincide
/// with the plain one.
pub trait PhiRegularizer: Send + Sync {
    /// Configured regularizer name.
    fn name(&self) -> &str;

    /// Adds `tau`-scaled corrections into `r_wt`. `p_wt` is the current
    /// model and `n_wt` the freshly merged counters; `r_wt` shares the
    /// counter matrix's axes.
    fn apply(&self, tau: f32, p_wt: &dyn PhiMatrix, n_wt: &dyn PhiMatrix, r_wt: &mut DensePhiMatrix);
}

/// Uniform smoothing/sparsing: adds `tau` to every cell. Positive `tau`
/// pulls topics toward the uniform distribution, negative `tau` drives
/// small counters to zero under the normalization clamp.
pub struct SmoothSparsePhi {
    name: String,
}

impl SmoothSparsePhi {
    /// Creates the regularizer under the given configured name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl PhiRegularizer for SmoothSparsePhi {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(
        &self,
        tau: f32,
        _p_wt: &dyn PhiMatrix,
        _n_wt: &dyn PhiMatrix,
        r_wt: &mut DensePhiMatrix,
    ) {
        let increment = vec![tau; r_wt.topic_size()];
        for token_id in 0..r_wt.token_size() {
            r_wt.increase_row(token_id, &increment);
        }
    }
}

/// Instantiates the regularizers named by the config.
#[must_use]
pub fn build_regularizers(configs: &[RegularizerConfig]) -> Vec<Arc<dyn PhiRegularizer>> {
    configs
        .iter()
        .map(|config| match config.kind {
            RegularizerKind::SmoothSparsePhi => {
                Arc::new(SmoothSparsePhi::new(config.name.clone())) as Arc<dyn PhiRegularizer>
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Token;

    #[test]
    fn test_smooth_sparse_adds_tau_uniformly() {
        let mut n_wt = DensePhiMatrix::new("nwt", vec!["t0".to_string(), "t1".to_string()]);
        n_wt.add_token(Token::new("a"));
        n_wt.add_token(Token::new("b"));
        let p_wt = DensePhiMatrix::reshape("pwt", &n_wt);
        let mut r_wt = DensePhiMatrix::reshape("rwt", &n_wt);

        SmoothSparsePhi::new("smooth").apply(0.5, &p_wt, &n_wt, &mut r_wt);
        for token_id in 0..2 {
            for topic_id in 0..2 {
                assert!((r_wt.get(token_id, topic_id) - 0.5).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_build_from_config() {
        let configs = vec![RegularizerConfig {
            name: "smooth".to_string(),
            tau: 0.1,
            kind: RegularizerKind::SmoothSparsePhi,
        }];
        let built = build_regularizers(&configs);
        assert_eq!(built.len(), 1);
        assert_eq!(built[0].name(), "smooth");
    }
}
