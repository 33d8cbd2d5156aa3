//! Rank pruning for factorized layers.
//!
//! A low-rank layer stores its weight as `U · diag(σ) · V`. Pruning scores
//! each rank component, drops the lowest-scoring fraction (per layer or
//! pooled across the model), and squeezes the survivors into smaller
//! factors. Squeezing is permanent.
//!
//! # Methods
//! - [`MagnitudePruner`]: Frobenius norm of each component, data-free
//! - [`AlignmentPruner`]: output shift when a component is switched off
//! - [`LossAlignmentPruner`]: loss change when a component is switched off
//! - [`GradientAlignmentPruner`]: loss gradient with respect to the mask gate
//!
//! # Example
//!
//! ```
//! use lowrank::autograd::Tensor;
//! use lowrank::nn::{Linear, ReLU, Sequential};
//! use lowrank::pruning::{Batch, Pruner, PruningConfig, PruningMethod, PruningScope};
//!
//! let mut model = Sequential::new()
//!     .add(Linear::with_seed(8, 6, Some(0)))
//!     .add(ReLU::new())
//!     .add(Linear::with_seed(6, 2, Some(1)));
//! model.factorize_in_place(4);
//!
//! let config = PruningConfig::new(PruningMethod::Alignment, PruningScope::Local, 0.5);
//! let mut pruner = config
//!     .build(&mut model, Some(Batch::new(Tensor::zeros(&[4, 8]))), None)
//!     .unwrap();
//! let result = pruner.prune().unwrap();
//! assert_eq!(result.rank_before(), 6);
//! assert_eq!(result.rank_after(), 3);
//! ```
//!
//! # References
//! - Han, S., et al. (2015). Learning both weights and connections. NeurIPS.
//! - Molchanov, P., et al. (2017). Pruning convolutional neural networks for
//!   resource efficient inference. ICLR.

mod alignment;
mod alignment_gradient;
mod alignment_loss;
mod config;
mod error;
mod magnitude;
mod mask;
mod pruner;

pub use alignment::AlignmentPruner;
pub use alignment_gradient::GradientAlignmentPruner;
pub use alignment_loss::LossAlignmentPruner;
pub use config::{PruningConfig, PruningMethod};
pub use error::PruningError;
pub use magnitude::MagnitudePruner;
pub use mask::{check_finite, drop_count, select_masks, RankMask, RankScores};
pub use pruner::{
    validate_sparsity, Batch, LayerReport, Pruner, PrunerBase, PruningResult, PruningScope,
};
