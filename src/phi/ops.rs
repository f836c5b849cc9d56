//! Matrix algebra over named Φ/N/R matrices: external retrieval, additive
//! application, and normalization.

use crate::args::{GetTopicModelArgs, MatrixLayout};

use super::{DensePhiMatrix, PhiMatrix, TopicModel, WeightVector};

/// Extracts the caller-visible form of a matrix, filtered and projected by
/// the request.
///
/// Token and topic filters are intersections: requested entries absent from
/// the matrix are dropped from the result.
#[must_use]
pub fn retrieve_external(phi: &dyn PhiMatrix, args: &GetTopicModelArgs) -> TopicModel {
    let topic_projection: Vec<usize> = if args.topic_names.is_empty() {
        (0..phi.topic_size()).collect()
    } else {
        args.topic_names
            .iter()
            .filter_map(|name| phi.topic_names().iter().position(|t| t == name))
            .collect()
    };
    let topic_names: Vec<String> = topic_projection
        .iter()
        .map(|&i| phi.topic_names()[i].clone())
        .collect();

    let token_ids: Vec<usize> = if args.tokens.is_empty() {
        (0..phi.token_size()).collect()
    } else {
        args.tokens
            .iter()
            .filter_map(|token| phi.token_index(token))
            .collect()
    };

    let mut tokens = Vec::with_capacity(token_ids.len());
    let mut token_weights = Vec::with_capacity(token_ids.len());
    for token_id in token_ids {
        let row = phi.row_copy(token_id);
        let projected: Vec<f32> = topic_projection.iter().map(|&i| row[i]).collect();
        let weights = match args.layout {
            MatrixLayout::Dense => WeightVector::Dense(projected),
            MatrixLayout::Sparse => {
                let mut topic_ids = Vec::new();
                let mut values = Vec::new();
                for (i, &v) in projected.iter().enumerate() {
                    if v.abs() > args.eps {
                        topic_ids.push(i as u32);
                        values.push(v);
                    }
                }
                WeightVector::Sparse { topic_ids, values }
            }
        };
        tokens.push(phi.token(token_id).clone());
        token_weights.push(weights);
    }

    TopicModel {
        name: phi.name().to_string(),
        topic_names,
        tokens,
        token_weights,
    }
}

/// Adds `weight * model` into `target`, aligning topics by name and adding
/// rows for tokens the target has not seen. Topics absent from the target
/// contribute nothing.
pub fn apply_topic_model_operation(model: &TopicModel, weight: f32, target: &mut DensePhiMatrix) {
    let topic_mapping: Vec<Option<usize>> = model
        .topic_names
        .iter()
        .map(|name| target.topic_names().iter().position(|t| t == name))
        .collect();

    for (token, weights) in model.tokens.iter().zip(&model.token_weights) {
        let token_id = target.add_token(token.clone());
        let mut increment = vec![0.0; target.topic_size()];
        let source_row = weights.to_dense(model.topic_size());
        for (source_idx, target_idx) in topic_mapping.iter().enumerate() {
            if let Some(target_idx) = *target_idx {
                increment[target_idx] = weight * source_row[source_idx];
            }
        }
        target.increase_row(token_id, &increment);
    }
}

/// Normalizes a counter matrix into Φ: `p(w|t) = max(n, 0) / Σ_w max(n, 0)`
/// per topic. Topics with no mass produce zero columns.
pub fn find_pwt(n_wt: &dyn PhiMatrix, target: &mut DensePhiMatrix) {
    normalize_into(n_wt, None, target);
}

/// Regularized normalization: the counter is shifted by the matching R cell
/// before the clamp, `p(w|t) = max(n + r, 0) / Σ_w max(n + r, 0)`.
pub fn find_pwt_regularized(
    n_wt: &dyn PhiMatrix,
    r_wt: &dyn PhiMatrix,
    target: &mut DensePhiMatrix,
) {
    normalize_into(n_wt, Some(r_wt), target);
}

fn normalize_into(n_wt: &dyn PhiMatrix, r_wt: Option<&dyn PhiMatrix>, target: &mut DensePhiMatrix) {
    let topic_size = target.topic_size();
    let token_count = target.token_size();

    // First pass: clamped values and per-topic totals.
    let mut values = vec![0.0f32; token_count * topic_size];
    let mut topic_totals = vec![0.0f64; topic_size];
    for token_id in 0..token_count {
        let token = target.token(token_id).clone();
        let Some(n_id) = n_wt.token_index(&token) else {
            continue;
        };
        let n_row = n_wt.row_copy(n_id);
        let r_row = match r_wt {
            Some(r) => r.token_index(&token).map(|r_id| r.row_copy(r_id)),
            None => None,
        };
        for topic_id in 0..topic_size {
            let shift = r_row.as_ref().map_or(0.0, |row| row[topic_id]);
            let value = (n_row[topic_id] + shift).max(0.0);
            values[token_id * topic_size + topic_id] = value;
            topic_totals[topic_id] += f64::from(value);
        }
    }

    // Second pass: divide by the topic totals.
    for token_id in 0..token_count {
        let mut row = vec![0.0f32; topic_size];
        for topic_id in 0..topic_size {
            let total = topic_totals[topic_id];
            if total > 0.0 {
                let value = values[token_id * topic_size + topic_id];
                row[topic_id] = (f64::from(value) / total) as f32;
            }
        }
        target.set_row(token_id, row);
    }
}
