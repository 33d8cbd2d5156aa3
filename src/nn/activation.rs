//! Activation function modules for use in [`Sequential`](super::Sequential).
//!
//! # References
//!
//! - Nair, V., & Hinton, G. E. (2010). Rectified linear units improve restricted
//!   Boltzmann machines. ICML.

use nalgebra::DMatrix;

use super::module::Module;
use crate::autograd::Tensor;

/// Rectified Linear Unit activation: ReLU(x) = max(0, x)
///
/// # Example
///
/// ```
/// use lowrank::nn::{Module, ReLU};
/// use lowrank::autograd::Tensor;
///
/// let y = ReLU::new().forward(&Tensor::from_slice(&[-1.0, 0.0, 2.0]));
/// assert_eq!(y.data(), &[0.0, 0.0, 2.0]);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ReLU;

impl ReLU {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Module for ReLU {
    fn forward(&self, input: &Tensor) -> Tensor {
        input.relu()
    }

    fn forward_f64(&self, input: &DMatrix<f64>) -> DMatrix<f64> {
        input.map(|v| v.max(0.0))
    }

    fn kind(&self) -> &'static str {
        "ReLU"
    }
}

/// Hyperbolic tangent activation.
///
/// Unlike ReLU it is nonlinear around zero, so ablating one rank component
/// of an upstream layer can change the output by a different amount than
/// a linear model would predict.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tanh;

impl Tanh {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Module for Tanh {
    fn forward(&self, input: &Tensor) -> Tensor {
        input.tanh_()
    }

    fn forward_f64(&self, input: &DMatrix<f64>) -> DMatrix<f64> {
        input.map(f64::tanh)
    }

    fn kind(&self) -> &'static str {
        "Tanh"
    }
}
