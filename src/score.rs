//! Scores: per-batch accumulation during processing and per-pass history.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::args::ProcessBatchesArgs;
use crate::batch::Batch;
use crate::cache::ThetaSlice;
use crate::config::{ScoreConfig, ScoreKind};
use crate::phi::PhiMatrix;

/// A score accumulator. Merging is additive per variant; the reported
/// metric is derived on request.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreValue {
    /// Perplexity raw sums.
    Perplexity {
        /// Weighted log-likelihood sum.
        log_likelihood: f64,
        /// Weighted token occurrence count.
        token_count: f64,
    },
    /// Φ sparsity counts.
    SparsityPhi {
        /// Cells below the threshold.
        zero_count: u64,
        /// All cells.
        total_count: u64,
    },
}

impl ScoreValue {
    /// Folds another accumulator of the same variant into this one.
    pub fn merge(&mut self, other: &ScoreValue) {
        match (self, other) {
            (
                ScoreValue::Perplexity {
                    log_likelihood,
                    token_count,
                },
                ScoreValue::Perplexity {
                    log_likelihood: other_ll,
                    token_count: other_count,
                },
            ) => {
                *log_likelihood += other_ll;
                *token_count += other_count;
            }
            (
                ScoreValue::SparsityPhi {
                    zero_count,
                    total_count,
                },
                ScoreValue::SparsityPhi {
                    zero_count: other_zero,
                    total_count: other_total,
                },
            ) => {
                *zero_count += other_zero;
                *total_count += other_total;
            }
            // Mismatched variants indicate a score name collision; keep the
            // existing accumulator.
            _ => {}
        }
    }

    /// The reported metric.
    #[must_use]
    pub fn value(&self) -> f64 {
        match self {
            ScoreValue::Perplexity {
                log_likelihood,
                token_count,
            } => {
                if *token_count > 0.0 {
                    (-log_likelihood / token_count).exp()
                } else {
                    0.0
                }
            }
            ScoreValue::SparsityPhi {
                zero_count,
                total_count,
            } => {
                if *total_count > 0 {
                    *zero_count as f64 / *total_count as f64
                } else {
                    0.0
                }
            }
        }
    }
}

/// The score computation seam.
///
/// Cumulative scores contribute per batch inside the workers; model scores
/// read the current Φ when a pass is archived.
pub trait ScoreCalculator: Send + Sync {
    /// Configured score name.
    fn name(&self) -> &str;

    /// Whether the score accumulates per-batch contributions.
    fn is_cumulative(&self) -> bool;

    /// Per-batch contribution, for cumulative scores.
    fn score_batch(
        &self,
        _batch: &Batch,
        _phi: &dyn PhiMatrix,
        _theta: &ThetaSlice,
        _args: &ProcessBatchesArgs,
    ) -> Option<ScoreValue> {
        None
    }

    /// Model-level value, for non-cumulative scores.
    fn score_model(&self, _phi: &dyn PhiMatrix) -> Option<ScoreValue> {
        None
    }
}

/// Corpus perplexity: `exp(-Σ c·ln p(w|d) / Σ c)` over the processed
/// occurrences, with class weights applied to the counts.
pub struct PerplexityScore {
    name: String,
}

/// Probability floor for occurrences the model assigns no mass to.
const PERPLEXITY_EPS: f64 = 1e-37;

impl ScoreCalculator for PerplexityScore {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_cumulative(&self) -> bool {
        true
    }

    fn score_batch(
        &self,
        batch: &Batch,
        phi: &dyn PhiMatrix,
        theta: &ThetaSlice,
        args: &ProcessBatchesArgs,
    ) -> Option<ScoreValue> {
        let topic_size = phi.topic_size();
        let mut log_likelihood = 0.0f64;
        let mut token_count = 0.0f64;

        for (item, theta_row) in batch.items.iter().zip(&theta.weights) {
            for (&token_id, &count) in item.token_ids.iter().zip(&item.token_counts) {
                let Some(token) = batch.tokens.get(token_id as usize) else {
                    continue;
                };
                if !args.class_enabled(&token.class_id) {
                    continue;
                }
                let Some(row_id) = phi.token_index(token) else {
                    continue;
                };
                let weight = f64::from(args.class_weight(&token.class_id) * count);
                let mut p_wd = 0.0f64;
                for topic_id in 0..topic_size {
                    p_wd += f64::from(phi.get(row_id, topic_id)) * f64::from(theta_row[topic_id]);
                }
                log_likelihood += weight * p_wd.max(PERPLEXITY_EPS).ln();
                token_count += weight;
            }
        }

        Some(ScoreValue::Perplexity {
            log_likelihood,
            token_count,
        })
    }
}

/// Fraction of Φ cells below a threshold.
pub struct SparsityPhiScore {
    name: String,
    eps: f32,
}

impl ScoreCalculator for SparsityPhiScore {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_cumulative(&self) -> bool {
        false
    }

    fn score_model(&self, phi: &dyn PhiMatrix) -> Option<ScoreValue> {
        let mut zero_count = 0u64;
        let mut total_count = 0u64;
        for token_id in 0..phi.token_size() {
            for value in phi.row_copy(token_id) {
                if value.abs() < self.eps {
                    zero_count += 1;
                }
                total_count += 1;
            }
        }
        Some(ScoreValue::SparsityPhi {
            zero_count,
            total_count,
        })
    }
}

/// Instantiates the calculators named by the config.
#[must_use]
pub fn build_calculators(configs: &[ScoreConfig]) -> Vec<Arc<dyn ScoreCalculator>> {
    configs
        .iter()
        .map(|config| match config.kind {
            ScoreKind::Perplexity => Arc::new(PerplexityScore {
                name: config.name.clone(),
            }) as Arc<dyn ScoreCalculator>,
            ScoreKind::SparsityPhi { eps } => Arc::new(SparsityPhiScore {
                name: config.name.clone(),
                eps,
            }) as Arc<dyn ScoreCalculator>,
        })
        .collect()
}

/// Accumulates per-batch score contributions for one scope (the instance,
/// or a single training pass).
#[derive(Debug, Default)]
pub struct ScoreManager {
    values: Mutex<Vec<(String, ScoreValue)>>,
}

impl ScoreManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a contribution into the named accumulator.
    pub fn append(&self, name: &str, value: &ScoreValue) {
        let mut values = self.values.lock();
        if let Some((_, existing)) = values.iter_mut().find(|(n, _)| n == name) {
            existing.merge(value);
        } else {
            values.push((name.to_string(), value.clone()));
        }
    }

    /// Current accumulator for `name`.
    #[must_use]
    pub fn request_score(&self, name: &str) -> Option<ScoreValue> {
        self.values
            .lock()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }

    /// Every accumulator, in first-appended order.
    #[must_use]
    pub fn request_all_scores(&self) -> Vec<(String, ScoreValue)> {
        self.values.lock().clone()
    }

    /// Drops all accumulators.
    pub fn clear(&self) {
        self.values.lock().clear();
    }
}

/// Archives score snapshots across passes; one entry per (pass, score).
#[derive(Debug, Default)]
pub struct ScoreTracker {
    entries: Mutex<Vec<(String, ScoreValue)>>,
}

impl ScoreTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one archived value.
    pub fn add(&self, name: &str, value: ScoreValue) {
        self.entries.lock().push((name.to_string(), value));
    }

    /// The archived values for `name`, in append order.
    #[must_use]
    pub fn request_score_array(&self, name: &str) -> Vec<ScoreValue> {
        self.entries
            .lock()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Drops the whole history.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Token;
    use crate::phi::DensePhiMatrix;

    #[test]
    fn test_perplexity_merge_and_value() {
        let mut a = ScoreValue::Perplexity {
            log_likelihood: -10.0,
            token_count: 5.0,
        };
        let b = ScoreValue::Perplexity {
            log_likelihood: -10.0,
            token_count: 5.0,
        };
        a.merge(&b);
        match a {
            ScoreValue::Perplexity {
                log_likelihood,
                token_count,
            } => {
                assert!((log_likelihood + 20.0).abs() < 1e-9);
                assert!((token_count - 10.0).abs() < 1e-9);
            }
            ScoreValue::SparsityPhi { .. } => panic!("wrong variant"),
        }
        // exp(20 / 10) = e^2
        let merged = ScoreValue::Perplexity {
            log_likelihood: -20.0,
            token_count: 10.0,
        };
        assert!((merged.value() - 2.0f64.exp()).abs() < 1e-9);
    }

    #[test]
    fn test_sparsity_counts() {
        let mut phi = DensePhiMatrix::new("pwt", vec!["t0".to_string(), "t1".to_string()]);
        let id = phi.add_token(Token::new("w"));
        phi.set_row(id, vec![0.0, 0.5]);

        let calc = SparsityPhiScore {
            name: "sparsity".to_string(),
            eps: 1e-6,
        };
        let value = calc.score_model(&phi).expect("model score");
        assert!((value.value() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_manager_merges_by_name() {
        let manager = ScoreManager::new();
        let contribution = ScoreValue::Perplexity {
            log_likelihood: -1.0,
            token_count: 1.0,
        };
        manager.append("perplexity", &contribution);
        manager.append("perplexity", &contribution);

        let merged = manager.request_score("perplexity").expect("present");
        match merged {
            ScoreValue::Perplexity { token_count, .. } => {
                assert!((token_count - 2.0).abs() < 1e-9);
            }
            ScoreValue::SparsityPhi { .. } => panic!("wrong variant"),
        }
        assert_eq!(manager.request_all_scores().len(), 1);
    }

    #[test]
    fn test_tracker_filters_by_name() {
        let tracker = ScoreTracker::new();
        tracker.add(
            "perplexity",
            ScoreValue::Perplexity {
                log_likelihood: -1.0,
                token_count: 1.0,
            },
        );
        tracker.add(
            "sparsity",
            ScoreValue::SparsityPhi {
                zero_count: 1,
                total_count: 2,
            },
        );
        tracker.add(
            "perplexity",
            ScoreValue::Perplexity {
                log_likelihood: -2.0,
                token_count: 1.0,
            },
        );

        let history = tracker.request_score_array("perplexity");
        assert_eq!(history.len(), 2);
        let missing = tracker.request_score_array("other");
        assert!(missing.is_empty());
    }
}
