//! Loss-based alignment pruning.
//!
//! Score of component `i` = loss with `i` switched off − baseline loss, on
//! the calibration batch. The sign is kept: a component whose removal
//! lowers the loss scores below zero and is pruned first.

use std::sync::Arc;

use super::error::PruningError;
use super::mask::{check_finite, select_masks, RankMask, RankScores};
use super::pruner::{Batch, Pruner, PrunerBase};
use crate::autograd::Tensor;
use crate::nn::{Loss, Module};

const METHOD: &str = "alignment_loss";

/// Calibration inputs, targets and loss, cloned out of the base so the
/// model can be mutated while they are in use.
pub(crate) struct Calibration {
    pub(crate) inputs: Tensor,
    pub(crate) targets: Tensor,
    pub(crate) loss: Arc<dyn Loss>,
}

pub(crate) fn require_calibration(
    base: &PrunerBase<'_>,
    method: &str,
) -> Result<Calibration, PruningError> {
    let missing = |requirement: &str| PruningError::CalibrationRequired {
        method: method.to_string(),
        requirement: requirement.to_string(),
    };
    let batch: &Batch = base.data().ok_or_else(|| missing("a calibration batch"))?;
    let targets = batch
        .targets()
        .ok_or_else(|| missing("targets in the calibration batch"))?;
    let loss = base.loss().ok_or_else(|| missing("a loss function"))?;
    Ok(Calibration {
        inputs: batch.inputs().clone(),
        targets: targets.clone(),
        loss: Arc::clone(loss),
    })
}

/// Loss-perturbation pruner. Needs inputs, targets and a loss.
#[derive(Debug)]
pub struct LossAlignmentPruner<'a> {
    base: PrunerBase<'a>,
}

impl<'a> LossAlignmentPruner<'a> {
    #[must_use]
    pub fn new(base: PrunerBase<'a>) -> Self {
        Self { base }
    }

    /// Signed loss deltas for every component.
    ///
    /// # Errors
    ///
    /// `CalibrationRequired` if inputs, targets or loss are missing;
    /// `NumericalInstability` for non-finite losses.
    pub fn scores(&mut self) -> Result<RankScores, PruningError> {
        let calib = require_calibration(&self.base, METHOD)?;
        let scores = self.base.ablation_scores(
            |model| {
                let pred = model.forward(&calib.inputs);
                f64::from(calib.loss.forward(&pred, &calib.targets).item())
            },
            |baseline, ablated| ablated - baseline,
        )?;
        check_finite(METHOD, &scores)?;
        Ok(scores)
    }
}

impl<'a> Pruner<'a> for LossAlignmentPruner<'a> {
    fn base(&self) -> &PrunerBase<'a> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PrunerBase<'a> {
        &mut self.base
    }

    fn method(&self) -> &'static str {
        METHOD
    }

    fn check_preconditions(&self) -> Result<(), PruningError> {
        require_calibration(&self.base, METHOD).map(|_| ())
    }

    fn compute_masks(&mut self) -> Result<Vec<RankMask>, PruningError> {
        let scores = self.scores()?;
        select_masks(&scores, self.base.sparsity(), self.base.scope())
    }
}
