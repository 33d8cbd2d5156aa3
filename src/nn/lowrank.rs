//! Low-rank factorized linear layer.
//!
//! The weight of a dense layer is kept as `U · diag(σ) · V` with
//! `U: [in, r]`, `σ: [r]`, `V: [r, out]`. Each of the `r` singular-value
//! components can be masked off through a 0/1 gate and later physically
//! removed ("squeezed").
//!
//! # Rank bookkeeping
//!
//! - `max_rank` is fixed at construction.
//! - `rank_capacity` starts unset (`None`, meaning "use `max_rank`") and
//!   becomes the live component count once a capacity is set or the layer
//!   is squeezed.
//! - The stored factors and the mask always have exactly
//!   `working_rank()` components.
//!
//! A layer may be squeezed down to zero components; it then outputs its
//! bias (or zeros) for every input.

use nalgebra::DMatrix;

use super::init::{xavier_uniform, zeros};
use super::linear::flatten_batch;
use super::module::Module;
use super::precise::{add_bias, flatten_rows, widen};
use crate::autograd::Tensor;
use crate::pruning::{PruningError, RankMask};

/// Capability exposed by layers whose weight is stored as low-rank factors.
///
/// Pruning talks to layers only through this trait.
pub trait LowRankLayer {
    /// Upper bound on components, fixed at construction.
    fn max_rank(&self) -> usize;

    /// Current live component count, `None` until first set.
    fn rank_capacity(&self) -> Option<usize>;

    /// Component count in effect: the capacity, or `max_rank` if unset.
    fn working_rank(&self) -> usize {
        self.rank_capacity().unwrap_or_else(|| self.max_rank())
    }

    /// Set the live component count, truncating to the leading components.
    ///
    /// # Errors
    ///
    /// `InvalidRank` if `capacity` exceeds the components currently stored.
    fn set_rank_capacity(&mut self, capacity: usize) -> Result<(), PruningError>;

    fn mask(&self) -> &RankMask;

    /// Replace the mask. Takes effect on the next forward pass; storage is
    /// not resized.
    ///
    /// # Errors
    ///
    /// `InvalidMask` if the mask length differs from `working_rank()`.
    fn set_mask(&mut self, mask: RankMask) -> Result<(), PruningError>;

    /// Permanently drop masked-off components from storage, set the
    /// capacity to the survivors and reset the mask to all-kept.
    fn squeeze_rank_capacity(&mut self);

    /// `(U, σ, V)`.
    fn factors(&self) -> (&Tensor, &Tensor, &Tensor);

    /// Frobenius norm of each rank-1 term: `σ_i · ‖U[:, i]‖ · ‖V[i, :]‖`.
    fn component_norms(&self) -> Vec<f64>;

    /// The 0/1 gate the mask enters the forward pass through.
    fn mask_gate(&self) -> &Tensor;

    /// Make the gate a gradient-tracking leaf (or stop tracking it).
    fn track_mask_gradients(&mut self, enabled: bool);

    /// Weights of the equivalent dense matrix (`in × out`).
    fn dense_parameter_count(&self) -> usize;

    /// Stored factor weights (`r · (in + out + 1)`).
    fn factor_parameter_count(&self) -> usize;
}

/// Linear layer with factorized weight: y = x U diag(σ ⊙ g) V + b
///
/// `g` is the mask gate. Masked components contribute exactly nothing.
///
/// # Example
///
/// ```
/// use lowrank::autograd::Tensor;
/// use lowrank::nn::{LowRankLayer, LowRankLinear, Module};
/// use lowrank::pruning::RankMask;
///
/// let mut layer = LowRankLinear::with_seed(8, 4, 3, Some(0));
/// layer.set_mask(RankMask::from(vec![true, false, true])).unwrap();
/// layer.squeeze_rank_capacity();
/// assert_eq!(layer.rank_capacity(), Some(2));
/// assert_eq!(layer.forward(&Tensor::ones(&[5, 8])).shape(), &[5, 4]);
/// ```
pub struct LowRankLinear {
    /// Left factor, shape: [in_features, r]
    kernel_u: Tensor,
    /// Singular values, shape: [r]
    sigma: Tensor,
    /// Right factor, shape: [r, out_features]
    kernel_v: Tensor,
    bias: Option<Tensor>,
    /// 0/1 per component, shape: [r]
    gate: Tensor,
    mask: RankMask,
    max_rank: usize,
    rank_capacity: Option<usize>,
    in_features: usize,
    out_features: usize,
}

impl LowRankLinear {
    /// Randomly initialized layer with `rank` components.
    #[must_use]
    pub fn new(in_features: usize, out_features: usize, rank: usize) -> Self {
        Self::with_seed(in_features, out_features, rank, None)
    }

    #[must_use]
    pub fn with_seed(
        in_features: usize,
        out_features: usize,
        rank: usize,
        seed: Option<u64>,
    ) -> Self {
        let kernel_u = xavier_uniform(&[in_features, rank], in_features, rank, seed);
        let kernel_v = xavier_uniform(
            &[rank, out_features],
            rank,
            out_features,
            seed.map(|s| s.wrapping_add(1)),
        );
        Self::from_factors(
            kernel_u,
            Tensor::ones(&[rank]),
            kernel_v,
            Some(zeros(&[out_features])),
        )
    }

    /// Build a layer from explicit factors. `max_rank` is `σ.len()`.
    ///
    /// # Panics
    ///
    /// Panics if the factor shapes are inconsistent.
    #[must_use]
    pub fn from_factors(
        kernel_u: Tensor,
        sigma: Tensor,
        kernel_v: Tensor,
        bias: Option<Tensor>,
    ) -> Self {
        assert_eq!(kernel_u.ndim(), 2, "U must be [in, r]");
        assert_eq!(kernel_v.ndim(), 2, "V must be [r, out]");
        let rank = sigma.numel();
        assert_eq!(kernel_u.shape()[1], rank, "U columns must equal σ length");
        assert_eq!(kernel_v.shape()[0], rank, "V rows must equal σ length");
        let (in_features, out_features) = (kernel_u.shape()[0], kernel_v.shape()[1]);
        if let Some(b) = &bias {
            assert_eq!(b.numel(), out_features, "bias length must equal out_features");
        }

        Self {
            kernel_u: kernel_u.requires_grad(),
            sigma: Tensor::new(sigma.data(), &[rank]).requires_grad(),
            kernel_v: kernel_v.requires_grad(),
            bias: bias.map(Tensor::requires_grad),
            gate: Tensor::ones(&[rank]),
            mask: RankMask::full(rank),
            max_rank: rank,
            rank_capacity: None,
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
    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    fn stored_rank(&self) -> usize {
        self.sigma.numel()
    }

    /// Rebuild the factors from the components listed in `keep`, in order.
    fn gather(&mut self, keep: &[usize]) {
        let (n_in, n_out, r) = (self.in_features, self.out_features, self.stored_rank());
        let k = keep.len();
        let (u, s, v) = (self.kernel_u.data(), self.sigma.data(), self.kernel_v.data());

        let mut new_u = vec![0.0; n_in * k];
        for i in 0..n_in {
            for (c, &src) in keep.iter().enumerate() {
                new_u[i * k + c] = u[i * r + src];
            }
        }
        let new_sigma: Vec<f32> = keep.iter().map(|&src| s[src]).collect();
        let new_v: Vec<f32> = keep
            .iter()
            .flat_map(|&src| v[src * n_out..(src + 1) * n_out].iter().copied())
            .collect();

        let tracking = self.gate.requires_grad_enabled();
        self.kernel_u = Tensor::from_vec(new_u, &[n_in, k]).requires_grad();
        self.sigma = Tensor::from_vec(new_sigma, &[k]).requires_grad();
        self.kernel_v = Tensor::from_vec(new_v, &[k, n_out]).requires_grad();
        self.gate = Tensor::ones(&[k]);
        self.gate.requires_grad_(tracking);
    }

    fn sync_gate(&mut self) {
        let values = self.mask.to_gate();
        self.gate.data_mut().copy_from_slice(&values);
    }
}

impl LowRankLayer for LowRankLinear {
    fn max_rank(&self) -> usize {
        self.max_rank
    }

    fn rank_capacity(&self) -> Option<usize> {
        self.rank_capacity
    }

    fn set_rank_capacity(&mut self, capacity: usize) -> Result<(), PruningError> {
        let available = self.stored_rank();
        if capacity > available {
            return Err(PruningError::InvalidRank {
                requested: capacity,
                available,
            });
        }
        if capacity < available {
            let mask = self.mask.truncated(capacity);
            let leading: Vec<usize> = (0..capacity).collect();
            self.gather(&leading);
            self.mask = mask;
            self.sync_gate();
        }
        self.rank_capacity = Some(capacity);
        Ok(())
    }

    fn mask(&self) -> &RankMask {
        &self.mask
    }

    fn set_mask(&mut self, mask: RankMask) -> Result<(), PruningError> {
        let expected = self.working_rank();
        if mask.len() != expected {
            return Err(PruningError::InvalidMask {
                expected,
                got: mask.len(),
            });
        }
        self.mask = mask;
        self.sync_gate();
        Ok(())
    }

    fn squeeze_rank_capacity(&mut self) {
        let keep = self.mask.kept_indices();
        self.gather(&keep);
        self.rank_capacity = Some(keep.len());
        self.mask = RankMask::full(keep.len());
    }

    fn factors(&self) -> (&Tensor, &Tensor, &Tensor) {
        (&self.kernel_u, &self.sigma, &self.kernel_v)
    }

    fn component_norms(&self) -> Vec<f64> {
        let (n_in, n_out, r) = (self.in_features, self.out_features, self.stored_rank());
        let (u, s, v) = (self.kernel_u.data(), self.sigma.data(), self.kernel_v.data());
        (0..r)
            .map(|c| {
                let u_norm = (0..n_in)
                    .map(|i| f64::from(u[i * r + c]).powi(2))
                    .sum::<f64>()
                    .sqrt();
                let v_norm = v[c * n_out..(c + 1) * n_out]
                    .iter()
                    .map(|&x| f64::from(x).powi(2))
                    .sum::<f64>()
                    .sqrt();
                f64::from(s[c]).abs() * u_norm * v_norm
            })
            .collect()
    }

    fn mask_gate(&self) -> &Tensor {
        &self.gate
    }

    fn track_mask_gradients(&mut self, enabled: bool) {
        self.gate.requires_grad_(enabled);
    }

    fn dense_parameter_count(&self) -> usize {
        self.in_features * self.out_features
    }

    fn factor_parameter_count(&self) -> usize {
        self.stored_rank() * (self.in_features + self.out_features + 1)
    }
}

impl Module for LowRankLinear {
    fn forward(&self, input: &Tensor) -> Tensor {
        let x = flatten_batch(input, self.in_features);
        let output = x
            .matmul(&self.kernel_u)
            .broadcast_mul(&self.sigma)
            .broadcast_mul(&self.gate)
            .matmul(&self.kernel_v);
        match &self.bias {
            Some(b) => output.broadcast_add(b),
            None => output,
        }
    }

    fn forward_f64(&self, input: &DMatrix<f64>) -> DMatrix<f64> {
        let r = self.stored_rank();
        let x = flatten_rows(input, self.in_features);
        let mut hidden = x * widen(&self.kernel_u, self.in_features, r);
        for (c, (&s, &g)) in self.sigma.data().iter().zip(self.gate.data()).enumerate() {
            hidden.column_mut(c).scale_mut(f64::from(s) * f64::from(g));
        }
        let mut out = hidden * widen(&self.kernel_v, r, self.out_features);
        add_bias(&mut out, self.bias.as_ref());
        out
    }

    fn parameters(&self) -> Vec<&Tensor> {
        let mut params = vec![&self.kernel_u, &self.sigma, &self.kernel_v];
        if let Some(b) = &self.bias {
            params.push(b);
        }
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = vec![&mut self.kernel_u, &mut self.sigma, &mut self.kernel_v];
        if let Some(b) = &mut self.bias {
            params.push(b);
        }
        params
    }

    fn kind(&self) -> &'static str {
        "LowRankLinear"
    }

    fn as_low_rank(&self) -> Option<&dyn LowRankLayer> {
        Some(self)
    }

    fn as_low_rank_mut(&mut self) -> Option<&mut dyn LowRankLayer> {
        Some(self)
    }
}

impl std::fmt::Debug for LowRankLinear {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LowRankLinear")
            .field("in_features", &self.in_features)
            .field("out_features", &self.out_features)
            .field("max_rank", &self.max_rank)
            .field("rank_capacity", &self.rank_capacity)
            .field("kept", &self.mask.kept())
            .finish()
    }
}

#[cfg(test)]
#[path = "lowrank_tests.rs"]
mod tests;
