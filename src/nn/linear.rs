//! Fully connected (linear) layer.
//!
//! Implements the transformation y = xW^T + b, and its conversion into a
//! [`LowRankLinear`] through a truncated singular value decomposition.
//!
//! # References
//!
//! - Glorot, X., & Bengio, Y. (2010). Understanding the difficulty of training
//!   deep feedforward neural networks. AISTATS.
//! - Eckart, C., & Young, G. (1936). The approximation of one matrix by
//!   another of lower rank. Psychometrika.

use nalgebra::DMatrix;
use tracing::debug;

use super::init::{xavier_uniform, zeros};
use super::lowrank::LowRankLinear;
use super::module::Module;
use super::precise::{add_bias, flatten_rows, widen};
use crate::autograd::Tensor;

/// Fully connected layer: y = xW^T + b
///
/// # Shape
///
/// - Input: `(*, in_features)`; leading dimensions are flattened into one
///   batch dimension
/// - Output: `(batch, out_features)`
pub struct Linear {
    /// Weight matrix, shape: [out_features, in_features]
    weight: Tensor,

    /// Cached transposed weight [in_features, out_features]
    weight_t: Tensor,

    /// Bias vector, shape: [out_features]
    bias: Option<Tensor>,

    in_features: usize,
    out_features: usize,
}

impl Linear {
    /// Create a new Linear layer with Xavier initialization.
    #[must_use]
    pub fn new(in_features: usize, out_features: usize) -> Self {
        Self::with_seed(in_features, out_features, None)
    }

    /// Create a Linear layer with a specific random seed.
    #[must_use]
    pub fn with_seed(in_features: usize, out_features: usize, seed: Option<u64>) -> Self {
        let weight = xavier_uniform(
            &[out_features, in_features],
            in_features,
            out_features,
            seed,
        )
        .requires_grad();
        let bias = zeros(&[out_features]).requires_grad();
        Self::from_parts(weight, Some(bias))
    }

    /// Build a layer from an explicit `[out, in]` weight and optional bias.
    ///
    /// # Panics
    ///
    /// Panics if the weight is not 2D or the bias length differs from the
    /// output dimension.
    #[must_use]
    pub fn from_parts(weight: Tensor, bias: Option<Tensor>) -> Self {
        assert_eq!(weight.ndim(), 2, "Linear weight must be [out, in]");
        let (out_features, in_features) = (weight.shape()[0], weight.shape()[1]);
        if let Some(b) = &bias {
            assert_eq!(b.numel(), out_features, "bias length must equal out_features");
        }
        let weight_t = crate::autograd::no_grad(|| weight.transpose()).requires_grad();
        Self {
            weight,
            weight_t,
            bias,
            in_features,
            out_features,
        }
    }

    #[must_use]
    pub fn in_features(&self) -> usize {
        self.in_features
    }

    #[must_use]
    pub fn out_features(&self) -> usize {
        self.out_features
    }

    #[must_use]
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    #[must_use]
    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    /// Truncated SVD of this layer as a [`LowRankLinear`].
    ///
    /// Keeps the `min(rank, in, out)` largest singular components of `Wᵀ`,
    /// ordered by descending singular value, so `x @ U @ diag(σ) @ V`
    /// is the best rank-r approximation of `x @ Wᵀ`. The bias is copied.
    #[must_use]
    pub fn to_low_rank(&self, rank: usize) -> LowRankLinear {
        let (n_in, n_out) = (self.in_features, self.out_features);
        let keep = rank.min(n_in).min(n_out);

        let wt = DMatrix::from_row_slice(
            n_in,
            n_out,
            &self.weight_t.data().iter().map(|&x| f64::from(x)).collect::<Vec<_>>(),
        );
        let svd = wt.svd(true, true);
        let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
        order.sort_by(|&a, &b| {
            svd.singular_values[b]
                .total_cmp(&svd.singular_values[a])
                .then(a.cmp(&b))
        });
        order.truncate(keep);

        let mut u = vec![0.0f32; n_in * keep];
        let mut sigma = vec![0.0f32; keep];
        let mut v = vec![0.0f32; keep * n_out];
        if let (Some(left), Some(right_t)) = (svd.u.as_ref(), svd.v_t.as_ref()) {
            for (c, &k) in order.iter().enumerate() {
                sigma[c] = svd.singular_values[k] as f32;
                for i in 0..n_in {
                    u[i * keep + c] = left[(i, k)] as f32;
                }
                for j in 0..n_out {
                    v[c * n_out + j] = right_t[(k, j)] as f32;
                }
            }
        }
        debug!(
            in_features = n_in,
            out_features = n_out,
            requested = rank,
            rank = keep,
            "factorized linear layer"
        );

        LowRankLinear::from_factors(
            Tensor::from_vec(u, &[n_in, keep]),
            Tensor::from_slice(&sigma),
            Tensor::from_vec(v, &[keep, n_out]),
            self.bias.as_ref().map(Tensor::detach),
        )
    }
}

/// Collapse leading dimensions so a `(*, features)` input becomes 2D.
pub(crate) fn flatten_batch(input: &Tensor, features: usize) -> Tensor {
    if input.ndim() == 2 {
        return input.clone();
    }
    let rows = if features == 0 {
        input.shape().first().copied().unwrap_or(1)
    } else {
        input.numel() / features
    };
    input.view(&[rows, features])
}

impl Module for Linear {
    fn forward(&self, input: &Tensor) -> Tensor {
        let x = flatten_batch(input, self.in_features);
        let output = x.matmul(&self.weight_t);
        match &self.bias {
            Some(b) => output.broadcast_add(b),
            None => output,
        }
    }

    fn forward_f64(&self, input: &DMatrix<f64>) -> DMatrix<f64> {
        let x = flatten_rows(input, self.in_features);
        let mut out = x * widen(&self.weight_t, self.in_features, self.out_features);
        add_bias(&mut out, self.bias.as_ref());
        out
    }

    fn parameters(&self) -> Vec<&Tensor> {
        let mut params = vec![&self.weight_t];
        if let Some(b) = &self.bias {
            params.push(b);
        }
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = vec![&mut self.weight_t];
        if let Some(b) = &mut self.bias {
            params.push(b);
        }
        params
    }

    fn kind(&self) -> &'static str {
        "Linear"
    }

    fn factorize(&self, rank: usize) -> Option<Box<dyn Module>> {
        Some(Box::new(self.to_low_rank(rank)))
    }
}

impl std::fmt::Debug for Linear {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Linear")
            .field("in_features", &self.in_features)
            .field("out_features", &self.out_features)
            .field("bias", &self.bias.is_some())
            .finish()
    }
}
