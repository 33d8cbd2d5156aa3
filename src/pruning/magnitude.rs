//! Magnitude pruning over rank components.
//!
//! Each component `i` of `U · diag(σ) · V` is the rank-1 matrix
//! `σ_i · U[:, i] ⊗ V[i, :]`; its Frobenius norm is
//! `|σ_i| · ‖U[:, i]‖ · ‖V[i, :]‖`. No data is needed.
//!
//! # References
//! - Han, S., et al. (2015). Learning both weights and connections. NeurIPS.

use super::error::PruningError;
use super::mask::{check_finite, select_masks, RankMask, RankScores};
use super::pruner::{Pruner, PrunerBase};

const METHOD: &str = "magnitude";

/// Data-free pruner scoring components by their Frobenius norm.
#[derive(Debug)]
pub struct MagnitudePruner<'a> {
    base: PrunerBase<'a>,
}

impl<'a> MagnitudePruner<'a> {
    #[must_use]
    pub fn new(base: PrunerBase<'a>) -> Self {
        Self { base }
    }

    /// # Errors
    ///
    /// `NumericalInstability` if a factor holds NaN or infinite values.
    pub fn scores(&self) -> Result<RankScores, PruningError> {
        let scores = (0..self.base.num_layers())
            .map(|k| self.base.layer(k).map(|l| l.component_norms()))
            .collect::<Result<RankScores, _>>()?;
        check_finite(METHOD, &scores)?;
        Ok(scores)
    }
}

impl<'a> Pruner<'a> for MagnitudePruner<'a> {
    fn base(&self) -> &PrunerBase<'a> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PrunerBase<'a> {
        &mut self.base
    }

    fn method(&self) -> &'static str {
        METHOD
    }

    fn compute_masks(&mut self) -> Result<Vec<RankMask>, PruningError> {
        let scores = self.scores()?;
        select_masks(&scores, self.base.sparsity(), self.base.scope())
    }
}
