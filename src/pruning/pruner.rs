//! Pruner base state, the `Pruner` trait and its prune lifecycle.
//!
//! A pruner owns an exclusive borrow of the model for its whole lifetime,
//! so it is the only writer of layer masks and capacities while it runs.
//!
//! ```text
//! prune():
//!   check preconditions        (nothing touched yet)
//!   init unset rank capacities
//!   compute_masks()            (strategy)
//!   validate count + lengths   (all masks, before applying any)
//!   set_mask + squeeze         (per layer, irreversible)
//!   model.invalidate()
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::PruningError;
use super::mask::{RankMask, RankScores};
use crate::autograd::{no_grad, Tensor};
use crate::nn::{Loss, LowRankLayer, Model};

/// How scores are thresholded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruningScope {
    /// Each layer drops its own lowest-scoring fraction.
    Local,
    /// Scores are pooled across all low-rank layers before thresholding.
    #[default]
    Global,
}

/// Check a sparsity target lies in the closed interval [0, 1].
///
/// # Errors
///
/// `InvalidSparsity` for values outside the interval and for NaN.
pub fn validate_sparsity(sparsity: f64) -> Result<(), PruningError> {
    if (0.0..=1.0).contains(&sparsity) {
        Ok(())
    } else {
        Err(PruningError::InvalidSparsity {
            value: sparsity,
            constraint: "must be between 0.0 and 1.0".to_string(),
        })
    }
}

/// Calibration data: model inputs and, for loss-driven scorers, targets.
#[derive(Debug, Clone)]
pub struct Batch {
    inputs: Tensor,
    targets: Option<Tensor>,
}

impl Batch {
    #[must_use]
    pub fn new(inputs: Tensor) -> Self {
        Self {
            inputs,
            targets: None,
        }
    }

    #[must_use]
    pub fn with_targets(inputs: Tensor, targets: Tensor) -> Self {
        Self {
            inputs,
            targets: Some(targets),
        }
    }

    #[must_use]
    pub fn inputs(&self) -> &Tensor {
        &self.inputs
    }

    #[must_use]
    pub fn targets(&self) -> Option<&Tensor> {
        self.targets.as_ref()
    }
}

/// State shared by every pruning strategy.
pub struct PrunerBase<'a> {
    model: &'a mut dyn Model,
    scope: PruningScope,
    sparsity: f64,
    /// Model positions of the low-rank layers, in model order.
    low_rank_layers: Vec<usize>,
    data: Option<Batch>,
    loss: Option<Arc<dyn Loss>>,
}

impl<'a> PrunerBase<'a> {
    /// # Errors
    ///
    /// `InvalidSparsity` if `sparsity` is outside [0, 1]; no state is kept.
    pub fn new(
        model: &'a mut dyn Model,
        scope: PruningScope,
        sparsity: f64,
    ) -> Result<Self, PruningError> {
        validate_sparsity(sparsity)?;
        let low_rank_layers = model.low_rank_indices();
        debug!(
            layers = model.layers().len(),
            low_rank = low_rank_layers.len(),
            "discovered low-rank layers"
        );
        Ok(Self {
            model,
            scope,
            sparsity,
            low_rank_layers,
            data: None,
            loss: None,
        })
    }

    #[must_use]
    pub fn with_data(mut self, data: Batch) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn with_loss<L: Loss + 'static>(self, loss: L) -> Self {
        self.with_shared_loss(Arc::new(loss))
    }

    #[must_use]
    pub fn with_shared_loss(mut self, loss: Arc<dyn Loss>) -> Self {
        self.loss = Some(loss);
        self
    }

    #[must_use]
    pub fn scope(&self) -> PruningScope {
        self.scope
    }

    #[must_use]
    pub fn sparsity(&self) -> f64 {
        self.sparsity
    }

    #[must_use]
    pub fn low_rank_layers(&self) -> &[usize] {
        &self.low_rank_layers
    }

    #[must_use]
    pub fn num_layers(&self) -> usize {
        self.low_rank_layers.len()
    }

    #[must_use]
    pub fn data(&self) -> Option<&Batch> {
        self.data.as_ref()
    }

    #[must_use]
    pub fn loss(&self) -> Option<&Arc<dyn Loss>> {
        self.loss.as_ref()
    }

    #[must_use]
    pub fn model(&self) -> &dyn Model {
        &*self.model
    }

    /// The `k`-th low-rank layer.
    ///
    /// # Errors
    ///
    /// `MissingLayer` if the model no longer exposes it.
    pub fn layer(&self, k: usize) -> Result<&dyn LowRankLayer, PruningError> {
        let index = self.model_index(k)?;
        self.model
            .layers()
            .get(index)
            .and_then(|m| m.as_low_rank())
            .ok_or(PruningError::MissingLayer { index })
    }

    /// # Errors
    ///
    /// `MissingLayer` if the model no longer exposes it.
    pub fn layer_mut(&mut self, k: usize) -> Result<&mut dyn LowRankLayer, PruningError> {
        let index = self.model_index(k)?;
        self.model
            .layers_mut()
            .get_mut(index)
            .and_then(|m| m.as_low_rank_mut())
            .ok_or(PruningError::MissingLayer { index })
    }

    fn model_index(&self, k: usize) -> Result<usize, PruningError> {
        self.low_rank_layers
            .get(k)
            .copied()
            .ok_or(PruningError::MissingLayer { index: k })
    }

    /// Working rank of every low-rank layer, in order.
    ///
    /// # Errors
    ///
    /// `MissingLayer` if a layer vanished.
    pub fn ranks(&self) -> Result<Vec<usize>, PruningError> {
        (0..self.num_layers())
            .map(|k| self.layer(k).map(|l| l.working_rank()))
            .collect()
    }

    /// Give every layer with an unset capacity its `max_rank`.
    fn init_rank_capacities(&mut self) -> Result<(), PruningError> {
        for k in 0..self.num_layers() {
            let layer = self.layer_mut(k)?;
            if layer.rank_capacity().is_none() {
                let max_rank = layer.max_rank();
                layer.set_rank_capacity(max_rank)?;
            }
        }
        Ok(())
    }

    /// Score every component by single-component ablation.
    ///
    /// For each low-rank layer in turn: enable all its components,
    /// evaluate the model once for the baseline, then once per component
    /// with only that component disabled, scoring it with
    /// `distance(baseline, ablated)`. The layer's mask is reset to
    /// all-kept before moving on, so other layers are always evaluated at
    /// full rank. Runs under `no_grad`.
    ///
    /// # Errors
    ///
    /// Propagates mask errors from the layers.
    pub fn ablation_scores<T>(
        &mut self,
        evaluate: impl Fn(&dyn Model) -> T,
        distance: impl Fn(&T, &T) -> f64,
    ) -> Result<RankScores, PruningError> {
        no_grad(|| {
            let mut scores = Vec::with_capacity(self.num_layers());
            for k in 0..self.num_layers() {
                let rank = self.layer(k)?.working_rank();
                self.layer_mut(k)?.set_mask(RankMask::full(rank))?;
                let baseline = evaluate(self.model());

                let mut layer_scores = Vec::with_capacity(rank);
                for i in 0..rank {
                    self.layer_mut(k)?.set_mask(RankMask::without(rank, i))?;
                    let ablated = evaluate(self.model());
                    layer_scores.push(distance(&baseline, &ablated));
                }

                self.layer_mut(k)?.set_mask(RankMask::full(rank))?;
                debug!(layer = self.low_rank_layers[k], rank, "scored layer");
                scores.push(layer_scores);
            }
            Ok(scores)
        })
    }
}

impl std::fmt::Debug for PrunerBase<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrunerBase")
            .field("scope", &self.scope)
            .field("sparsity", &self.sparsity)
            .field("low_rank_layers", &self.low_rank_layers)
            .field("has_data", &self.data.is_some())
            .field("loss", &self.loss.as_ref().map(|l| l.name()))
            .finish()
    }
}

/// A pruning strategy.
///
/// Implementors supply [`Pruner::compute_masks`]; [`Pruner::prune`] runs
/// the shared lifecycle around it.
pub trait Pruner<'a> {
    fn base(&self) -> &PrunerBase<'a>;

    fn base_mut(&mut self) -> &mut PrunerBase<'a>;

    /// Method name for logs and reports.
    fn method(&self) -> &'static str;

    /// Fail early if calibration data the strategy needs is missing.
    ///
    /// Called before any layer is touched.
    ///
    /// # Errors
    ///
    /// `CalibrationRequired` naming what is missing.
    fn check_preconditions(&self) -> Result<(), PruningError> {
        Ok(())
    }

    /// One mask per low-rank layer, in model order, each as long as that
    /// layer's rank capacity.
    ///
    /// # Errors
    ///
    /// Strategy-specific; see each implementor.
    fn compute_masks(&mut self) -> Result<Vec<RankMask>, PruningError>;

    /// Score, mask and squeeze every low-rank layer.
    ///
    /// Structural errors are detected before any mask is applied, so a
    /// failed call leaves every layer's factors untouched.
    ///
    /// # Errors
    ///
    /// Precondition, numerical, and structural errors as described on
    /// [`PruningError`].
    fn prune(&mut self) -> Result<PruningResult, PruningError> {
        self.check_preconditions()?;
        let method = self.method();
        let (scope, sparsity) = (self.base().scope(), self.base().sparsity());

        self.base_mut().init_rank_capacities()?;
        let ranks_before = self.base().ranks()?;
        info!(
            method,
            ?scope,
            sparsity,
            layers = ranks_before.len(),
            total_rank = ranks_before.iter().sum::<usize>(),
            "pruning started"
        );

        let masks = self.compute_masks()?;
        if masks.len() != ranks_before.len() {
            return Err(PruningError::MaskCountMismatch {
                expected: ranks_before.len(),
                got: masks.len(),
            });
        }
        for (k, (mask, &rank)) in masks.iter().zip(&ranks_before).enumerate() {
            if mask.len() != rank {
                return Err(PruningError::MaskLengthMismatch {
                    layer: k,
                    expected: rank,
                    got: mask.len(),
                });
            }
        }

        let base = self.base_mut();
        let mut layers = Vec::with_capacity(masks.len());
        for (k, (mask, rank_before)) in masks.into_iter().zip(ranks_before).enumerate() {
            let model_index = base.low_rank_layers[k];
            let layer = base.layer_mut(k)?;
            layer.set_mask(mask)?;
            layer.squeeze_rank_capacity();

            let rank_after = layer.working_rank();
            if rank_after == 0 && rank_before > 0 {
                warn!(layer = model_index, rank_before, "layer pruned to zero rank");
            }
            layers.push(LayerReport {
                model_index,
                rank_before,
                rank_after,
                dense_parameters: layer.dense_parameter_count(),
                factor_parameters: layer.factor_parameter_count(),
            });
        }
        base.model.invalidate();

        let result = PruningResult {
            method: method.to_string(),
            scope,
            sparsity,
            layers,
        };
        info!(
            method,
            rank_before = result.rank_before(),
            rank_after = result.rank_after(),
            effective_sparsity = result.effective_sparsity(),
            "pruning finished"
        );
        Ok(result)
    }
}

/// Outcome for one low-rank layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerReport {
    /// Position in the model's layer list.
    pub model_index: usize,
    pub rank_before: usize,
    pub rank_after: usize,
    /// Weights of the equivalent dense matrix.
    pub dense_parameters: usize,
    /// Factor weights kept after squeezing.
    pub factor_parameters: usize,
}

/// Report returned by [`Pruner::prune`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PruningResult {
    pub method: String,
    pub scope: PruningScope,
    pub sparsity: f64,
    pub layers: Vec<LayerReport>,
}

impl PruningResult {
    #[must_use]
    pub fn rank_before(&self) -> usize {
        self.layers.iter().map(|l| l.rank_before).sum()
    }

    #[must_use]
    pub fn rank_after(&self) -> usize {
        self.layers.iter().map(|l| l.rank_after).sum()
    }

    /// Fraction of rank components removed. Zero when there were none.
    #[must_use]
    pub fn rank_sparsity(&self) -> f64 {
        let before = self.rank_before();
        if before == 0 {
            return 0.0;
        }
        (before - self.rank_after()) as f64 / before as f64
    }

    /// Weight reduction relative to the dense layers the factors stand for.
    ///
    /// Negative when the kept factors hold more weights than the dense
    /// matrices would.
    #[must_use]
    pub fn effective_sparsity(&self) -> f64 {
        let dense: usize = self.layers.iter().map(|l| l.dense_parameters).sum();
        if dense == 0 {
            return 0.0;
        }
        let kept: usize = self.layers.iter().map(|l| l.factor_parameters).sum();
        (dense as f64 - kept as f64) / dense as f64
    }

    /// Dense weights per kept factor weight; infinite if nothing is kept.
    #[must_use]
    pub fn compression_ratio(&self) -> f64 {
        let dense: usize = self.layers.iter().map(|l| l.dense_parameters).sum();
        let kept: usize = self.layers.iter().map(|l| l.factor_parameters).sum();
        if kept == 0 {
            return f64::INFINITY;
        }
        dense as f64 / kept as f64
    }

    /// # Errors
    ///
    /// `Config` if serialization fails.
    pub fn to_json(&self) -> Result<String, PruningError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
#[path = "pruner_tests.rs"]
mod tests;
