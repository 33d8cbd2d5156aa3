//! Alignment pruning: rank components by output perturbation.
//!
//! A component's score is how far the model output moves, in Euclidean
//! norm, when only that component is switched off. Because the score
//! comes from real forward passes, it reflects interactions the
//! nonlinearities introduce that a weight-magnitude score cannot see.
//!
//! Cost: one forward pass per component per layer. Each pass depends on
//! the mask state set right before it, so the sweep is sequential.

use nalgebra::DMatrix;
use tracing::debug;

use super::error::PruningError;
use super::mask::{check_finite, select_masks, RankMask, RankScores};
use super::pruner::{Pruner, PrunerBase};
use crate::autograd::Tensor;
use crate::nn::Module;

const METHOD: &str = "alignment";

/// All-ones input of one example shaped like `inputs[0]`, flattened to a
/// single f64 row.
pub(crate) fn unit_input(inputs: &Tensor) -> DMatrix<f64> {
    let features: usize = inputs.shape().get(1..).unwrap_or(&[]).iter().product();
    DMatrix::from_element(1, features, 1.0)
}

/// Output-perturbation pruner.
///
/// Requires a reference input batch; only its per-example shape is used.
///
/// # Example
///
/// ```
/// use lowrank::autograd::Tensor;
/// use lowrank::nn::{LowRankLinear, ReLU, Sequential};
/// use lowrank::pruning::{AlignmentPruner, Batch, Pruner, PrunerBase, PruningScope};
///
/// let mut model = Sequential::new()
///     .add(LowRankLinear::with_seed(4, 8, 4, Some(0)))
///     .add(ReLU::new())
///     .add(LowRankLinear::with_seed(8, 2, 2, Some(1)));
///
/// let base = PrunerBase::new(&mut model, PruningScope::Global, 0.5)
///     .unwrap()
///     .with_data(Batch::new(Tensor::zeros(&[16, 4])));
/// let result = AlignmentPruner::new(base).prune().unwrap();
/// assert_eq!(result.rank_after(), 3);
/// ```
#[derive(Debug)]
pub struct AlignmentPruner<'a> {
    base: PrunerBase<'a>,
}

impl<'a> AlignmentPruner<'a> {
    #[must_use]
    pub fn new(base: PrunerBase<'a>) -> Self {
        Self { base }
    }

    /// Per-component output-perturbation scores for every low-rank layer.
    ///
    /// # Errors
    ///
    /// `CalibrationRequired` without a reference batch;
    /// `NumericalInstability` if a score is NaN or infinite.
    pub fn scores(&mut self) -> Result<RankScores, PruningError> {
        self.check_preconditions()?;
        let input = match self.base.data() {
            Some(batch) => unit_input(batch.inputs()),
            None => return Err(missing_batch()),
        };
        debug!(features = input.ncols(), "alignment input");

        // f64 end to end: a small component next to a large activation
        // would otherwise vanish before the subtraction.
        let distance = |a: &DMatrix<f64>, b: &DMatrix<f64>| (a - b).norm();
        let scores = self
            .base
            .ablation_scores(|model| model.forward_f64(&input), distance)?;
        check_finite(METHOD, &scores)?;
        Ok(scores)
    }
}

fn missing_batch() -> PruningError {
    PruningError::CalibrationRequired {
        method: METHOD.to_string(),
        requirement: "a reference input batch to shape the all-ones input".to_string(),
    }
}

impl<'a> Pruner<'a> for AlignmentPruner<'a> {
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
        match self.base.data() {
            Some(_) => Ok(()),
            None => Err(missing_batch()),
        }
    }

    fn compute_masks(&mut self) -> Result<Vec<RankMask>, PruningError> {
        let scores = self.scores()?;
        select_masks(&scores, self.base.sparsity(), self.base.scope())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::{clear_graph, tape_len};
    use crate::nn::{LowRankLinear, Model, ReLU, Sequential, Tanh};
    use crate::pruning::{Batch, PruningScope};

    fn diagonal(sigmas: &[f32]) -> LowRankLinear {
        let r = sigmas.len();
        let eye: Vec<f32> = (0..r * r)
            .map(|i| if i % (r + 1) == 0 { 1.0 } else { 0.0 })
            .collect();
        LowRankLinear::from_factors(
            Tensor::new(&eye, &[r, r]),
            Tensor::from_slice(sigmas),
            Tensor::new(&eye, &[r, r]),
            None,
        )
    }

    #[test]
    fn test_unit_input_shape() {
        let input = unit_input(&Tensor::zeros(&[32, 3, 2]));
        assert_eq!((input.nrows(), input.ncols()), (1, 6));
        assert!(input.iter().all(|&x| x == 1.0));
    }

    #[test]
    fn test_requires_batch_and_touches_nothing() {
        let mut model = Sequential::new().add(LowRankLinear::with_seed(3, 3, 3, Some(0)));
        let base = PrunerBase::new(&mut model, PruningScope::Local, 0.5).expect("valid");
        let err = AlignmentPruner::new(base).prune().unwrap_err();
        assert!(matches!(err, PruningError::CalibrationRequired { .. }));

        let layer = model.layers()[0].as_low_rank().expect("low-rank");
        assert_eq!(layer.rank_capacity(), None);
    }

    #[test]
    fn test_scores_equal_singular_values_for_diagonal_layer() {
        // y = ones @ diag(σ): removing component i moves the output by σ_i.
        let mut model = Sequential::new().add(diagonal(&[0.5, 3.0, 1.5]));
        let base = PrunerBase::new(&mut model, PruningScope::Local, 0.0)
            .expect("valid")
            .with_data(Batch::new(Tensor::zeros(&[4, 3])));
        let scores = AlignmentPruner::new(base).scores().expect("scores");
        for (got, want) in scores[0].iter().zip([0.5, 3.0, 1.5]) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn test_large_bias_does_not_swamp_scores() {
        // f32 cannot hold 1e8 + 1: the component shifts would round away.
        let layer = LowRankLinear::from_factors(
            Tensor::new(&[1.0, 0.0, 0.0, 1.0], &[2, 2]),
            Tensor::from_slice(&[1.0, 3.0]),
            Tensor::new(&[1.0, 0.0, 0.0, 1.0], &[2, 2]),
            Some(Tensor::from_slice(&[1e8, 1e8])),
        );
        let mut model = Sequential::new().add(layer);
        let base = PrunerBase::new(&mut model, PruningScope::Local, 0.5)
            .expect("valid")
            .with_data(Batch::new(Tensor::zeros(&[1, 2])));
        let mut pruner = AlignmentPruner::new(base);
        let scores = pruner.scores().expect("scores");
        assert_eq!(scores[0], vec![1.0, 3.0]);

        let masks = pruner.compute_masks().expect("masks");
        assert_eq!(masks[0].as_slice(), &[false, true]);
    }

    #[test]
    fn test_zero_effect_component_scores_exactly_zero() {
        let mut model = Sequential::new()
            .add(diagonal(&[2.0, 0.0, 1.0]))
            .add(Tanh::new());
        let base = PrunerBase::new(&mut model, PruningScope::Local, 0.34)
            .expect("valid")
            .with_data(Batch::new(Tensor::zeros(&[1, 3])));
        let mut pruner = AlignmentPruner::new(base);
        let scores = pruner.scores().expect("scores");
        assert_eq!(scores[0][1], 0.0);

        let masks = pruner.compute_masks().expect("masks");
        assert_eq!(masks[0].as_slice(), &[true, false, true]);
    }

    #[test]
    fn test_downstream_dead_unit_hides_upstream_component() {
        // The second component feeds a ReLU input that stays negative.
        let first = LowRankLinear::from_factors(
            Tensor::new(&[1.0, 0.0, 0.0, 1.0], &[2, 2]),
            Tensor::from_slice(&[1.0, 1.0]),
            Tensor::new(&[1.0, 0.0, 0.0, -1.0], &[2, 2]),
            None,
        );
        let mut model = Sequential::new().add(first).add(ReLU::new());
        let base = PrunerBase::new(&mut model, PruningScope::Local, 0.5)
            .expect("valid")
            .with_data(Batch::new(Tensor::zeros(&[1, 2])));
        let scores = AlignmentPruner::new(base).scores().expect("scores");
        assert!(scores[0][0] > 0.0);
        assert_eq!(scores[0][1], 0.0);
    }

    #[test]
    fn test_scoring_records_nothing_on_tape() {
        clear_graph();
        let mut model = Sequential::new()
            .add(LowRankLinear::with_seed(3, 4, 3, Some(5)))
            .add(Tanh::new());
        let base = PrunerBase::new(&mut model, PruningScope::Global, 0.5)
            .expect("valid")
            .with_data(Batch::new(Tensor::zeros(&[2, 3])));
        AlignmentPruner::new(base).prune().expect("prune");
        assert_eq!(tape_len(), 0);
    }
}
