//! The `Module` trait shared by every layer and container.

use nalgebra::DMatrix;

use super::lowrank::LowRankLayer;
use super::precise::{row_major, widen_batch};
use crate::autograd::Tensor;

/// A neural network building block with a forward pass.
///
/// Besides the usual forward/parameters surface, a module can advertise
/// capabilities. Pruning discovers its targets through [`Module::as_low_rank`]
/// rather than by concrete type, so any layer that keeps its weight as
/// low-rank factors can opt in by returning `Some(self)`.
pub trait Module {
    /// Forward pass. Masking state set on a layer is honored on the next call.
    fn forward(&self, input: &Tensor) -> Tensor;

    /// Forward pass in f64, one example per row.
    ///
    /// The default narrows to f32 and runs [`Module::forward`]; every layer
    /// in this crate overrides it to stay in f64 throughout.
    fn forward_f64(&self, input: &DMatrix<f64>) -> DMatrix<f64> {
        let narrowed = Tensor::from_f64(&row_major(input), &[input.nrows(), input.ncols()]);
        widen_batch(&self.forward(&narrowed))
    }

    /// Learnable tensors, in a stable order.
    fn parameters(&self) -> Vec<&Tensor> {
        Vec::new()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        Vec::new()
    }

    fn train(&mut self) {}

    fn eval(&mut self) {}

    fn training(&self) -> bool {
        false
    }

    /// Short layer kind used in logs and `Debug` output.
    fn kind(&self) -> &'static str;

    /// Low-rank capability, if this module stores factorized weights.
    fn as_low_rank(&self) -> Option<&dyn LowRankLayer> {
        None
    }

    fn as_low_rank_mut(&mut self) -> Option<&mut dyn LowRankLayer> {
        None
    }

    /// A low-rank replacement of at most `rank` components, for modules
    /// that know how to factorize themselves.
    fn factorize(&self, _rank: usize) -> Option<Box<dyn Module>> {
        None
    }

    /// Total number of learnable scalars.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.numel()).sum()
    }
}
