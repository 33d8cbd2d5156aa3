//! Gradient-based alignment pruning.
//!
//! First-order estimate of the loss-perturbation score: with the mask gate
//! `g` entering the forward pass multiplicatively, switching component `i`
//! off changes the loss by roughly `-∂L/∂g_i`. The score is `|∂L/∂g_i|`,
//! one forward and one backward pass for the whole model.
//!
//! The pass runs on an isolated autograd tape, so the caller's recorded
//! operations and accumulated gradients are left as they were.
//!
//! # References
//! - Molchanov, P., et al. (2017). Pruning convolutional neural networks for
//!   resource efficient inference. ICLR.

use tracing::debug;

use super::alignment_loss::require_calibration;
use super::error::PruningError;
use super::mask::{check_finite, select_masks, RankMask, RankScores};
use super::pruner::{Pruner, PrunerBase};
use crate::autograd::{get_grad, isolated_graph};
use crate::nn::Module;

const METHOD: &str = "alignment_gradient";

/// Gradient-magnitude pruner. Needs inputs, targets and a loss.
#[derive(Debug)]
pub struct GradientAlignmentPruner<'a> {
    base: PrunerBase<'a>,
}

impl<'a> GradientAlignmentPruner<'a> {
    #[must_use]
    pub fn new(base: PrunerBase<'a>) -> Self {
        Self { base }
    }

    /// `|∂L/∂g_i|` for every component.
    ///
    /// # Errors
    ///
    /// `CalibrationRequired` if inputs, targets or loss are missing;
    /// `NumericalInstability` for non-finite gradients.
    pub fn scores(&mut self) -> Result<RankScores, PruningError> {
        let calib = require_calibration(&self.base, METHOD)?;

        for k in 0..self.base.num_layers() {
            let rank = self.base.layer(k)?.working_rank();
            self.base.layer_mut(k)?.set_mask(RankMask::full(rank))?;
        }
        let tracking = GateTracking::enable(&mut self.base)?;

        let base = tracking.base();
        let scores = isolated_graph(|| {
            let pred = base.model().forward(&calib.inputs);
            let loss = calib.loss.forward(&pred, &calib.targets);
            debug!(loss = loss.item(), "gradient scoring loss");
            loss.backward();

            (0..base.num_layers())
                .map(|k| {
                    let layer = base.layer(k)?;
                    let gate = layer.mask_gate();
                    Ok(match get_grad(gate.id()) {
                        Some(grad) => grad.data().iter().map(|&g| f64::from(g).abs()).collect(),
                        None => vec![0.0; gate.numel()],
                    })
                })
                .collect::<Result<RankScores, PruningError>>()
        });

        drop(tracking);
        let scores = scores?;
        check_finite(METHOD, &scores)?;
        Ok(scores)
    }
}

/// Gate gradient tracking on every layer, switched back off on drop.
struct GateTracking<'g, 'a> {
    base: &'g mut PrunerBase<'a>,
}

impl<'g, 'a> GateTracking<'g, 'a> {
    fn enable(base: &'g mut PrunerBase<'a>) -> Result<Self, PruningError> {
        // Guard exists before the first switch, so a lookup error also resets.
        let mut guard = Self { base };
        for k in 0..guard.base.num_layers() {
            guard.base.layer_mut(k)?.track_mask_gradients(true);
        }
        Ok(guard)
    }

    fn base(&self) -> &PrunerBase<'a> {
        &*self.base
    }
}

impl Drop for GateTracking<'_, '_> {
    fn drop(&mut self) {
        for k in 0..self.base.num_layers() {
            if let Ok(layer) = self.base.layer_mut(k) {
                layer.track_mask_gradients(false);
            }
        }
    }
}

impl<'a> Pruner<'a> for GradientAlignmentPruner<'a> {
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

#[cfg(test)]
mod tests {
    use std::panic::AssertUnwindSafe;

    use super::*;
    use crate::autograd::{clear_graph, tape_len, Tensor};
    use crate::nn::{LowRankLinear, MSELoss, Model, Sequential};
    use crate::pruning::{Batch, PruningScope};

    fn two_component_model(sigmas: [f32; 2]) -> Sequential {
        Sequential::new().add(LowRankLinear::from_factors(
            Tensor::new(&[1.0, 0.0, 0.0, 1.0], &[2, 2]),
            Tensor::from_slice(&sigmas),
            Tensor::new(&[1.0, 1.0], &[2, 1]),
            None,
        ))
    }

    fn calibration() -> Batch {
        Batch::with_targets(Tensor::new(&[1.0, 1.0], &[1, 2]), Tensor::new(&[0.0], &[1, 1]))
    }

    #[test]
    fn test_gate_gradient_scores() {
        // pred = σ0 g0 + σ1 g1 = 3, L = pred², ∂L/∂g_i = 2 · pred · σ_i
        let mut model = two_component_model([1.0, 2.0]);
        let base = PrunerBase::new(&mut model, PruningScope::Local, 0.5)
            .expect("valid")
            .with_data(calibration())
            .with_loss(MSELoss::new());
        let scores = GradientAlignmentPruner::new(base).scores().expect("scores");
        assert!((scores[0][0] - 6.0).abs() < 1e-5);
        assert!((scores[0][1] - 12.0).abs() < 1e-5);
    }

    #[test]
    fn test_gate_tracking_switched_off_afterwards() {
        let mut model = two_component_model([1.0, 2.0]);
        let base = PrunerBase::new(&mut model, PruningScope::Local, 0.5)
            .expect("valid")
            .with_data(calibration())
            .with_loss(MSELoss::new());
        GradientAlignmentPruner::new(base).prune().expect("prune");

        let layer = model.layers()[0].as_low_rank().expect("low-rank");
        assert!(!layer.mask_gate().requires_grad_enabled());
        assert_eq!(layer.factors().1.data(), &[2.0]);
    }

    #[test]
    fn test_gate_tracking_switched_off_after_panic() {
        clear_graph();
        let mut model = two_component_model([1.0, 2.0]);
        // Target width 2 against a prediction width 1 makes the loss panic.
        let mismatched =
            Batch::with_targets(Tensor::new(&[1.0, 1.0], &[1, 2]), Tensor::zeros(&[1, 2]));
        let base = PrunerBase::new(&mut model, PruningScope::Local, 0.5)
            .expect("valid")
            .with_data(mismatched)
            .with_loss(MSELoss::new());
        let mut pruner = GradientAlignmentPruner::new(base);
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| pruner.scores()));
        assert!(outcome.is_err());
        drop(pruner);

        let layer = model.layers()[0].as_low_rank().expect("low-rank");
        assert!(!layer.mask_gate().requires_grad_enabled());
        assert_eq!(tape_len(), 0);
    }

    #[test]
    fn test_caller_tape_untouched() {
        clear_graph();
        let w = Tensor::from_slice(&[1.0, 2.0]).requires_grad();
        let outer = w.mul(&w).sum();
        let before = tape_len();

        let mut model = two_component_model([1.0, 2.0]);
        let base = PrunerBase::new(&mut model, PruningScope::Global, 0.5)
            .expect("valid")
            .with_data(calibration())
            .with_loss(MSELoss::new());
        GradientAlignmentPruner::new(base).prune().expect("prune");

        assert_eq!(tape_len(), before);
        outer.backward();
        let grad = get_grad(w.id()).expect("outer gradient");
        assert_eq!(grad.data(), &[2.0, 4.0]);
        clear_graph();
    }

    #[test]
    fn test_missing_loss_fails_before_mutation() {
        let mut model = two_component_model([1.0, 2.0]);
        let base = PrunerBase::new(&mut model, PruningScope::Local, 0.5)
            .expect("valid")
            .with_data(calibration());
        let err = GradientAlignmentPruner::new(base).prune().unwrap_err();
        assert!(matches!(err, PruningError::CalibrationRequired { .. }));
        assert_eq!(
            model.layers()[0]
                .as_low_rank()
                .expect("low-rank")
                .rank_capacity(),
            None
        );
    }
}
