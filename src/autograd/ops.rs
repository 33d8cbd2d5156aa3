//! Differentiable tensor operations.
//!
//! Each operation computes its forward result eagerly and, when tracking
//! is on and any input requires gradients, records a [`GradFn`] on the
//! thread-local tape.

use std::sync::Arc;

use super::grad_fn::{
    AddBackward, BroadcastAddBackward, BroadcastMulBackward, GradFn, MatmulBackward, MeanBackward,
    MulBackward, MulScalarBackward, PowBackward, ReluBackward, SubBackward, SumBackward,
    TanhBackward, TransposeBackward, ViewBackward,
};
use super::tensor::Tensor;
use super::{is_grad_enabled, with_graph};

/// Attach `grad_fn` to `result` and record it, if any input is tracked.
pub(crate) fn record_op(mut result: Tensor, grad_fn: Arc<dyn GradFn>, inputs: &[&Tensor]) -> Tensor {
    if !is_grad_enabled() || !inputs.iter().any(|t| t.requires_grad_enabled()) {
        return result;
    }

    result.requires_grad_(true);
    result.set_grad_fn(grad_fn.clone());
    with_graph(|graph| {
        for input in inputs {
            graph.register_tensor(input);
        }
        graph.record(result.id(), grad_fn, inputs.iter().map(|t| t.id()).collect());
    });
    result
}

impl Tensor {
    fn zip_map(&self, other: &Tensor, op: &str, f: impl Fn(f32, f32) -> f32) -> Tensor {
        assert_eq!(
            self.shape(),
            other.shape(),
            "{op}: shape mismatch {:?} vs {:?}",
            self.shape(),
            other.shape()
        );
        let data = self
            .data()
            .iter()
            .zip(other.data())
            .map(|(&a, &b)| f(a, b))
            .collect();
        Tensor::from_vec(data, self.shape())
    }

    fn unary_map(&self, f: impl Fn(f32) -> f32) -> Tensor {
        Tensor::from_vec(self.data().iter().map(|&x| f(x)).collect(), self.shape())
    }

    /// Element-wise addition.
    #[must_use]
    pub fn add(&self, other: &Tensor) -> Tensor {
        let result = self.zip_map(other, "add", |a, b| a + b);
        record_op(result, Arc::new(AddBackward), &[self, other])
    }

    /// Element-wise subtraction.
    #[must_use]
    pub fn sub(&self, other: &Tensor) -> Tensor {
        let result = self.zip_map(other, "sub", |a, b| a - b);
        record_op(result, Arc::new(SubBackward), &[self, other])
    }

    /// Element-wise multiplication.
    #[must_use]
    pub fn mul(&self, other: &Tensor) -> Tensor {
        let result = self.zip_map(other, "mul", |a, b| a * b);
        record_op(
            result,
            Arc::new(MulBackward {
                x: self.clone(),
                y: other.clone(),
            }),
            &[self, other],
        )
    }

    #[must_use]
    pub fn mul_scalar(&self, scalar: f32) -> Tensor {
        let result = self.unary_map(|x| x * scalar);
        record_op(result, Arc::new(MulScalarBackward { scalar }), &[self])
    }

    /// Element-wise power.
    #[must_use]
    pub fn pow(&self, n: f32) -> Tensor {
        let result = self.unary_map(|x| x.powf(n));
        record_op(
            result,
            Arc::new(PowBackward {
                x: self.clone(),
                n,
            }),
            &[self],
        )
    }

    /// Sum of all elements, as a one-element tensor.
    #[must_use]
    pub fn sum(&self) -> Tensor {
        let total: f32 = self.data().iter().sum();
        record_op(
            Tensor::from_slice(&[total]),
            Arc::new(SumBackward {
                input_shape: self.shape().to_vec(),
            }),
            &[self],
        )
    }

    /// Mean of all elements. Empty tensors average to zero.
    #[must_use]
    pub fn mean(&self) -> Tensor {
        let n = self.numel();
        let mean = if n == 0 {
            0.0
        } else {
            self.data().iter().sum::<f32>() / n as f32
        };
        record_op(
            Tensor::from_slice(&[mean]),
            Arc::new(MeanBackward {
                input_shape: self.shape().to_vec(),
            }),
            &[self],
        )
    }

    #[must_use]
    pub fn relu(&self) -> Tensor {
        let result = self.unary_map(|x| x.max(0.0));
        record_op(result, Arc::new(ReluBackward { x: self.clone() }), &[self])
    }

    #[must_use]
    pub fn tanh_(&self) -> Tensor {
        let result = self.unary_map(f32::tanh);
        let output = result.detach();
        record_op(result, Arc::new(TanhBackward { output }), &[self])
    }

    /// Matrix product of `[m, k]` and `[k, n]`.
    ///
    /// A zero inner dimension yields an all-zero `[m, n]` result.
    ///
    /// # Panics
    ///
    /// Panics unless both operands are 2D with matching inner dimensions.
    #[must_use]
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.ndim(), 2, "matmul requires 2D tensors");
        assert_eq!(other.ndim(), 2, "matmul requires 2D tensors");
        let (m, k) = (self.shape()[0], self.shape()[1]);
        let (k2, n) = (other.shape()[0], other.shape()[1]);
        assert_eq!(k, k2, "matmul: inner dimensions {k} and {k2} differ");

        let (a, b) = (self.data(), other.data());
        let mut out = vec![0.0; m * n];
        for i in 0..m {
            for p in 0..k {
                let a_ip = a[i * k + p];
                if a_ip == 0.0 {
                    continue;
                }
                let row = &b[p * n..(p + 1) * n];
                for (o, &b_pj) in out[i * n..(i + 1) * n].iter_mut().zip(row) {
                    *o += a_ip * b_pj;
                }
            }
        }

        record_op(
            Tensor::from_vec(out, &[m, n]),
            Arc::new(MatmulBackward {
                x: self.clone(),
                y: other.clone(),
            }),
            &[self, other],
        )
    }

    /// Transpose of a 2D tensor.
    #[must_use]
    pub fn transpose(&self) -> Tensor {
        assert_eq!(self.ndim(), 2, "transpose requires a 2D tensor");
        let (rows, cols) = (self.shape()[0], self.shape()[1]);
        let src = self.data();
        let mut data = vec![0.0; rows * cols];
        for i in 0..rows {
            for j in 0..cols {
                data[j * rows + i] = src[i * cols + j];
            }
        }
        record_op(
            Tensor::from_vec(data, &[cols, rows]),
            Arc::new(TransposeBackward),
            &[self],
        )
    }

    /// Add a `[cols]` vector to every row of a `[rows, cols]` tensor.
    #[must_use]
    pub fn broadcast_add(&self, bias: &Tensor) -> Tensor {
        let cols = self.row_width(bias, "broadcast_add");
        let b = bias.data();
        let data = self
            .data()
            .iter()
            .enumerate()
            .map(|(i, &x)| x + b[i % cols])
            .collect();
        record_op(
            Tensor::from_vec(data, self.shape()),
            Arc::new(BroadcastAddBackward { cols }),
            &[self, bias],
        )
    }

    /// Scale column `j` of a `[rows, cols]` tensor by `scale[j]`.
    #[must_use]
    pub fn broadcast_mul(&self, scale: &Tensor) -> Tensor {
        let cols = self.row_width(scale, "broadcast_mul");
        let s = scale.data();
        let data = self
            .data()
            .iter()
            .enumerate()
            .map(|(i, &x)| x * s[i % cols])
            .collect();
        record_op(
            Tensor::from_vec(data, self.shape()),
            Arc::new(BroadcastMulBackward {
                x: self.clone(),
                scale: scale.clone(),
            }),
            &[self, scale],
        )
    }

    /// Reinterpret the data with a new shape of equal element count.
    #[must_use]
    pub fn view(&self, shape: &[usize]) -> Tensor {
        record_op(
            Tensor::new(self.data(), shape),
            Arc::new(ViewBackward {
                input_shape: self.shape().to_vec(),
            }),
            &[self],
        )
    }

    fn row_width(&self, vector: &Tensor, op: &str) -> usize {
        assert_eq!(self.ndim(), 2, "{op} requires a 2D tensor");
        let cols = self.shape()[1];
        assert_eq!(
            vector.numel(),
            cols,
            "{op}: vector of length {} does not match {} columns",
            vector.numel(),
            cols
        );
        cols
    }
}
