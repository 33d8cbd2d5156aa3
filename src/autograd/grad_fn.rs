//! Gradient function trait and implementations.
//!
//! Each differentiable operation implements `GradFn` to define how
//! gradients flow backward through it. The set here is exactly what the
//! dense and low-rank layers, their activations and the two losses need.

use super::tensor::Tensor;

/// Trait for functions that compute gradients during the backward pass.
///
/// For element-wise addition z = x + y, ∂z/∂x = ∂z/∂y = 1, so
/// `backward(grad_output)` returns `[grad_output, grad_output]`.
pub trait GradFn: Send + Sync {
    /// Gradients with respect to the inputs, in forward input order.
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor>;

    /// Human-readable name for debugging.
    fn name(&self) -> &'static str;
}

fn map_grad(grad_output: &Tensor, f: impl Fn(usize, f32) -> f32) -> Tensor {
    let data = grad_output
        .data()
        .iter()
        .enumerate()
        .map(|(i, &g)| f(i, g))
        .collect();
    Tensor::from_vec(data, grad_output.shape())
}

// ============================================================================
// Element-wise Operations
// ============================================================================

/// z = x + y
pub(crate) struct AddBackward;

impl GradFn for AddBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![grad_output.detach(), grad_output.detach()]
    }

    fn name(&self) -> &'static str {
        "AddBackward"
    }
}

/// z = x - y
pub(crate) struct SubBackward;

impl GradFn for SubBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![grad_output.detach(), map_grad(grad_output, |_, g| -g)]
    }

    fn name(&self) -> &'static str {
        "SubBackward"
    }
}

/// z = x * y
pub(crate) struct MulBackward {
    pub(crate) x: Tensor,
    pub(crate) y: Tensor,
}

impl GradFn for MulBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let (x, y) = (self.x.data(), self.y.data());
        vec![
            map_grad(grad_output, |i, g| g * y[i]),
            map_grad(grad_output, |i, g| g * x[i]),
        ]
    }

    fn name(&self) -> &'static str {
        "MulBackward"
    }
}

/// z = x * c
pub(crate) struct MulScalarBackward {
    pub(crate) scalar: f32,
}

impl GradFn for MulScalarBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![map_grad(grad_output, |_, g| g * self.scalar)]
    }

    fn name(&self) -> &'static str {
        "MulScalarBackward"
    }
}

/// z = x^n
pub(crate) struct PowBackward {
    pub(crate) x: Tensor,
    pub(crate) n: f32,
}

impl GradFn for PowBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let x = self.x.data();
        vec![map_grad(grad_output, |i, g| {
            g * self.n * x[i].powf(self.n - 1.0)
        })]
    }

    fn name(&self) -> &'static str {
        "PowBackward"
    }
}

// ============================================================================
// Reduction Operations
// ============================================================================

/// z = sum(x)
pub(crate) struct SumBackward {
    pub(crate) input_shape: Vec<usize>,
}

impl GradFn for SumBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![Tensor::full(&self.input_shape, grad_output.item())]
    }

    fn name(&self) -> &'static str {
        "SumBackward"
    }
}

/// z = mean(x)
pub(crate) struct MeanBackward {
    pub(crate) input_shape: Vec<usize>,
}

impl GradFn for MeanBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let numel: usize = self.input_shape.iter().product();
        let grad = grad_output.item() / numel.max(1) as f32;
        vec![Tensor::full(&self.input_shape, grad)]
    }

    fn name(&self) -> &'static str {
        "MeanBackward"
    }
}

// ============================================================================
// Activation Functions
// ============================================================================

/// z = max(0, x)
pub(crate) struct ReluBackward {
    pub(crate) x: Tensor,
}

impl GradFn for ReluBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let x = self.x.data();
        vec![map_grad(grad_output, |i, g| if x[i] > 0.0 { g } else { 0.0 })]
    }

    fn name(&self) -> &'static str {
        "ReluBackward"
    }
}

/// z = tanh(x), saving the output
pub(crate) struct TanhBackward {
    pub(crate) output: Tensor,
}

impl GradFn for TanhBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let y = self.output.data();
        vec![map_grad(grad_output, |i, g| g * (1.0 - y[i] * y[i]))]
    }

    fn name(&self) -> &'static str {
        "TanhBackward"
    }
}

// ============================================================================
// Linear Algebra
// ============================================================================

/// Z = X @ Y with X: [m, k], Y: [k, n]
pub(crate) struct MatmulBackward {
    pub(crate) x: Tensor,
    pub(crate) y: Tensor,
}

impl GradFn for MatmulBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // ∂L/∂X = G @ Yᵀ, ∂L/∂Y = Xᵀ @ G
        let (m, k) = (self.x.shape()[0], self.x.shape()[1]);
        let n = self.y.shape()[1];
        let (x, y, g) = (self.x.data(), self.y.data(), grad_output.data());

        let mut grad_x = vec![0.0; m * k];
        let mut grad_y = vec![0.0; k * n];
        for i in 0..m {
            for p in 0..k {
                let mut acc = 0.0;
                for j in 0..n {
                    acc += g[i * n + j] * y[p * n + j];
                    grad_y[p * n + j] += x[i * k + p] * g[i * n + j];
                }
                grad_x[i * k + p] = acc;
            }
        }

        vec![
            Tensor::from_vec(grad_x, &[m, k]),
            Tensor::from_vec(grad_y, &[k, n]),
        ]
    }

    fn name(&self) -> &'static str {
        "MatmulBackward"
    }
}

/// Z = Xᵀ
pub(crate) struct TransposeBackward;

impl GradFn for TransposeBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let (rows, cols) = (grad_output.shape()[0], grad_output.shape()[1]);
        let g = grad_output.data();
        let mut data = vec![0.0; rows * cols];
        for i in 0..rows {
            for j in 0..cols {
                data[j * rows + i] = g[i * cols + j];
            }
        }
        vec![Tensor::from_vec(data, &[cols, rows])]
    }

    fn name(&self) -> &'static str {
        "TransposeBackward"
    }
}

/// Z = X + b, with b: [cols] broadcast over rows of X: [rows, cols]
pub(crate) struct BroadcastAddBackward {
    pub(crate) cols: usize,
}

impl GradFn for BroadcastAddBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let mut grad_b = vec![0.0; self.cols];
        for row in grad_output.data().chunks(self.cols.max(1)) {
            for (acc, &g) in grad_b.iter_mut().zip(row) {
                *acc += g;
            }
        }
        vec![grad_output.detach(), Tensor::from_vec(grad_b, &[self.cols])]
    }

    fn name(&self) -> &'static str {
        "BroadcastAddBackward"
    }
}

/// Z = X * s, with s: [cols] scaling each column of X: [rows, cols]
pub(crate) struct BroadcastMulBackward {
    pub(crate) x: Tensor,
    pub(crate) scale: Tensor,
}

impl GradFn for BroadcastMulBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let cols = self.scale.numel();
        let (x, s) = (self.x.data(), self.scale.data());

        let grad_x = map_grad(grad_output, |i, g| g * s[i % cols]);
        let mut grad_s = vec![0.0; cols];
        for (i, &g) in grad_output.data().iter().enumerate() {
            grad_s[i % cols] += g * x[i];
        }
        vec![grad_x, Tensor::from_vec(grad_s, &[cols])]
    }

    fn name(&self) -> &'static str {
        "BroadcastMulBackward"
    }
}

/// Reshape: gradient takes the input's shape back.
pub(crate) struct ViewBackward {
    pub(crate) input_shape: Vec<usize>,
}

impl GradFn for ViewBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![Tensor::new(grad_output.data(), &self.input_shape)]
    }

    fn name(&self) -> &'static str {
        "ViewBackward"
    }
}

// ============================================================================
// Losses
// ============================================================================

/// Cross-entropy over logits: ∂L/∂x = (softmax(x) − one_hot(target)) · scale
pub(crate) struct CrossEntropyBackward {
    pub(crate) softmax_output: Tensor,
    pub(crate) targets: Vec<usize>,
    /// 1/batch for mean reduction, 1 for sum.
    pub(crate) scale: f32,
}

impl GradFn for CrossEntropyBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let classes = self.softmax_output.shape()[1];
        let upstream = grad_output.item() * self.scale;
        let mut data = self.softmax_output.data().to_vec();
        for (b, &target) in self.targets.iter().enumerate() {
            data[b * classes + target] -= 1.0;
        }
        for v in &mut data {
            *v *= upstream;
        }
        vec![Tensor::from_vec(data, self.softmax_output.shape())]
    }

    fn name(&self) -> &'static str {
        "CrossEntropyBackward"
    }
}
