//! Lowrank: rank pruning for factorized neural network layers in pure Rust.
//!
//! A dense layer `y = x Wᵀ + b` is factorized through a truncated SVD into
//! `y = x U diag(σ) V + b`. Each of the `r` rank components can then be
//! scored, masked and removed, shrinking the factors while the model keeps
//! running.
//!
//! # Quick Start
//!
//! ```
//! use lowrank::autograd::Tensor;
//! use lowrank::nn::{Linear, MSELoss, Module, Sequential, Tanh};
//! use lowrank::pruning::{Batch, LossAlignmentPruner, Pruner, PrunerBase, PruningScope};
//!
//! let mut model = Sequential::new()
//!     .add(Linear::with_seed(4, 8, Some(7)))
//!     .add(Tanh::new())
//!     .add(Linear::with_seed(8, 1, Some(8)));
//! model.factorize_in_place(4);
//!
//! let batch = Batch::with_targets(Tensor::ones(&[8, 4]), Tensor::zeros(&[8, 1]));
//! let base = PrunerBase::new(&mut model, PruningScope::Global, 0.4)
//!     .unwrap()
//!     .with_data(batch)
//!     .with_loss(MSELoss::new());
//! let result = LossAlignmentPruner::new(base).prune().unwrap();
//! assert_eq!(result.rank_before(), 5);
//! assert_eq!(result.rank_after(), 3);
//!
//! let y = model.forward(&Tensor::ones(&[2, 4]));
//! assert_eq!(y.shape(), &[2, 1]);
//! ```
//!
//! # Modules
//!
//! - [`autograd`]: Tape-based reverse-mode automatic differentiation
//! - [`nn`]: Layers, containers, losses and the low-rank layer capability
//! - [`pruning`]: Rank scoring, mask selection and the prune lifecycle

pub mod autograd;
pub mod nn;
pub mod pruning;

pub use autograd::Tensor;
pub use nn::{LowRankLayer, LowRankLinear, Model, Module, Sequential};
pub use pruning::{Pruner, PruningConfig, PruningError, PruningResult, PruningScope};
