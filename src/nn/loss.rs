//! Differentiable loss functions.
//!
//! Losses reduce to a one-element tensor so they can drive both the
//! loss-perturbation scorer (value only, under `no_grad`) and the gradient
//! scorer (`backward()` to the mask gates).
//!
//! # References
//!
//! - Bishop, C. M. (2006). Pattern Recognition and Machine Learning. Springer.

use std::sync::Arc;

use crate::autograd::grad_fn::CrossEntropyBackward;
use crate::autograd::{ops::record_op, Tensor};

/// A scalar training criterion.
pub trait Loss {
    /// Loss of `pred` against `target`, as a one-element tensor.
    fn forward(&self, pred: &Tensor, target: &Tensor) -> Tensor;

    fn name(&self) -> &'static str;
}

/// Reduction mode for loss functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reduction {
    #[default]
    Mean,
    Sum,
}

/// Mean Squared Error loss for regression.
///
/// Computes: MSE = mean((pred - target)²)
///
/// Gradient: ∂MSE/∂pred = 2 * (pred - target) / n
#[derive(Debug, Clone, Copy, Default)]
pub struct MSELoss {
    reduction: Reduction,
}

impl MSELoss {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_reduction(reduction: Reduction) -> Self {
        Self { reduction }
    }
}

impl Loss for MSELoss {
    /// # Panics
    ///
    /// Panics if the shapes differ.
    fn forward(&self, pred: &Tensor, target: &Tensor) -> Tensor {
        assert_eq!(
            pred.shape(),
            target.shape(),
            "Prediction and target shapes must match"
        );
        let squared = pred.sub(target).pow(2.0);
        match self.reduction {
            Reduction::Mean => squared.mean(),
            Reduction::Sum => squared.sum(),
        }
    }

    fn name(&self) -> &'static str {
        "mse"
    }
}

/// Cross-entropy over logits with integer class targets.
///
/// - `logits`: `[batch, classes]`
/// - `targets`: `[batch]`, class indices stored as f32
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropyLoss {
    reduction: Reduction,
}

impl CrossEntropyLoss {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_reduction(reduction: Reduction) -> Self {
        Self { reduction }
    }
}

/// Row-wise softmax and log-softmax, max-shifted for stability.
fn softmax_rows(data: &[f32], classes: usize) -> (Vec<f32>, Vec<f32>) {
    let mut probs = Vec::with_capacity(data.len());
    let mut log_probs = Vec::with_capacity(data.len());
    for row in data.chunks(classes.max(1)) {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let log_sum = row.iter().map(|&x| (x - max).exp()).sum::<f32>().ln();
        for &x in row {
            let lp = x - max - log_sum;
            log_probs.push(lp);
            probs.push(lp.exp());
        }
    }
    (probs, log_probs)
}

impl Loss for CrossEntropyLoss {
    /// # Panics
    ///
    /// Panics on malformed shapes or an out-of-range target class.
    fn forward(&self, logits: &Tensor, targets: &Tensor) -> Tensor {
        assert_eq!(logits.ndim(), 2, "Logits must be 2D [batch, classes]");
        assert_eq!(targets.ndim(), 1, "Targets must be 1D [batch]");
        let (batch, classes) = (logits.shape()[0], logits.shape()[1]);
        assert_eq!(targets.shape()[0], batch, "Batch sizes must match");

        let target_indices: Vec<usize> = targets
            .data()
            .iter()
            .map(|&t| {
                let idx = t as usize;
                assert!(
                    idx < classes,
                    "Target class {idx} out of bounds for {classes} classes"
                );
                idx
            })
            .collect();

        let (probs, log_probs) = softmax_rows(logits.data(), classes);
        let total: f32 = target_indices
            .iter()
            .enumerate()
            .map(|(b, &t)| -log_probs[b * classes + t])
            .sum();
        let (value, scale) = match self.reduction {
            Reduction::Mean if batch > 0 => (total / batch as f32, 1.0 / batch as f32),
            Reduction::Mean => (0.0, 0.0),
            Reduction::Sum => (total, 1.0),
        };

        record_op(
            Tensor::from_slice(&[value]),
            Arc::new(CrossEntropyBackward {
                softmax_output: Tensor::from_vec(probs, &[batch, classes]),
                targets: target_indices,
                scale,
            }),
            &[logits],
        )
    }

    fn name(&self) -> &'static str {
        "cross_entropy"
    }
}
