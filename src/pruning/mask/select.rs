//! Threshold policy: which components to drop for a sparsity target.

use std::cmp::Ordering;

use tracing::debug;

use super::RankMask;
use crate::pruning::error::PruningError;
use crate::pruning::pruner::{validate_sparsity, PruningScope};

/// Importance scores, one vector per low-rank layer, index-aligned with
/// that layer's components. Higher means more important.
pub type RankScores = Vec<Vec<f64>>;

/// Slack for products like `0.29 × 100`, which land at 28.999999999999996.
const FLOOR_EPSILON: f64 = 1e-9;

/// Number of components to drop: `floor(sparsity × total)`, capped at `total`.
///
/// The product is nudged up by a tiny epsilon before flooring, so decimal
/// sparsities that are not exact in binary still drop the intended count.
#[must_use]
pub fn drop_count(sparsity: f64, total: usize) -> usize {
    let raw = (sparsity * total as f64 + FLOOR_EPSILON).floor();
    if raw <= 0.0 {
        0
    } else {
        (raw as usize).min(total)
    }
}

/// Reject NaN or infinite scores.
///
/// # Errors
///
/// Returns `NumericalInstability` naming the first bad score.
pub fn check_finite(method: &str, scores: &[Vec<f64>]) -> Result<(), PruningError> {
    for (layer, layer_scores) in scores.iter().enumerate() {
        if let Some((index, value)) = layer_scores
            .iter()
            .enumerate()
            .find(|(_, s)| !s.is_finite())
        {
            return Err(PruningError::NumericalInstability {
                method: method.to_string(),
                details: format!("score {value} for component {index} of low-rank layer {layer}"),
            });
        }
    }
    Ok(())
}

fn ascending(a: f64, b: f64) -> Ordering {
    a.total_cmp(&b)
}

/// Turn per-layer scores into keep/drop masks.
///
/// - `Local`: each layer independently drops its `floor(s × len)` lowest
///   scores, ties broken by lower component index first.
/// - `Global`: all components are pooled and the `floor(s × total)` lowest
///   are dropped, ties broken by (layer, index).
///
/// The returned masks have exactly the lengths of the score vectors.
///
/// # Errors
///
/// `InvalidSparsity` if `sparsity` is outside [0, 1];
/// `NumericalInstability` if any score is NaN or infinite.
pub fn select_masks(
    scores: &[Vec<f64>],
    sparsity: f64,
    scope: PruningScope,
) -> Result<Vec<RankMask>, PruningError> {
    validate_sparsity(sparsity)?;
    check_finite("select_masks", scores)?;

    let masks = match scope {
        PruningScope::Local => scores
            .iter()
            .map(|layer_scores| {
                let mut order: Vec<usize> = (0..layer_scores.len()).collect();
                order.sort_by(|&a, &b| {
                    ascending(layer_scores[a], layer_scores[b]).then(a.cmp(&b))
                });
                let n_drop = drop_count(sparsity, layer_scores.len());
                RankMask::from_dropped(layer_scores.len(), &order[..n_drop])
            })
            .collect(),
        PruningScope::Global => {
            let mut pooled: Vec<(usize, usize, f64)> = scores
                .iter()
                .enumerate()
                .flat_map(|(layer, s)| s.iter().enumerate().map(move |(i, &v)| (layer, i, v)))
                .collect();
            pooled.sort_by(|a, b| {
                ascending(a.2, b.2)
                    .then(a.0.cmp(&b.0))
                    .then(a.1.cmp(&b.1))
            });

            let n_drop = drop_count(sparsity, pooled.len());
            let mut dropped: Vec<Vec<usize>> = vec![Vec::new(); scores.len()];
            for &(layer, index, _) in &pooled[..n_drop] {
                dropped[layer].push(index);
            }
            scores
                .iter()
                .zip(&dropped)
                .map(|(s, d)| RankMask::from_dropped(s.len(), d))
                .collect()
        }
    };

    debug!(
        ?scope,
        sparsity,
        layers = scores.len(),
        "selected rank masks"
    );
    Ok(masks)
}
