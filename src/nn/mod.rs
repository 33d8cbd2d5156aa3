//! Neural network modules the pruning core operates on.
//!
//! The module is organized around the [`Module`] trait:
//!
//! - **Layers**: [`Linear`], [`LowRankLinear`]
//! - **Activations**: [`ReLU`], [`Tanh`]
//! - **Containers**: [`Sequential`], which implements [`Model`]
//! - **Losses**: [`MSELoss`], [`CrossEntropyLoss`]
//!
//! Layers whose weight is stored as low-rank factors advertise the
//! [`LowRankLayer`] capability through [`Module::as_low_rank`]; that is
//! the only way pruning finds its targets.
//!
//! # Example
//!
//! ```
//! use lowrank::autograd::Tensor;
//! use lowrank::nn::{Linear, Model, Module, ReLU, Sequential};
//!
//! let mut model = Sequential::new()
//!     .add(Linear::with_seed(16, 32, Some(0)))
//!     .add(ReLU::new())
//!     .add(Linear::with_seed(32, 4, Some(1)));
//!
//! // Replace the dense layers with rank-8 truncated SVDs.
//! assert_eq!(model.factorize_in_place(8), 2);
//! assert_eq!(model.low_rank_indices(), vec![0, 2]);
//! assert_eq!(model.forward(&Tensor::ones(&[2, 16])).shape(), &[2, 4]);
//! ```
//!
//! # References
//!
//! - Paszke, A., et al. (2019). `PyTorch`: An imperative style, high-performance
//!   deep learning library. `NeurIPS`.
//! - Denton, E., et al. (2014). Exploiting linear structure within
//!   convolutional networks for efficient evaluation. `NeurIPS`.

mod activation;
mod container;
pub mod init;
mod linear;
pub mod loss;
mod lowrank;
mod module;
mod precise;

pub use activation::{ReLU, Tanh};
pub use container::{ExecutionPlan, Model, PlanStep, Sequential};
pub use init::xavier_uniform;
pub use linear::Linear;
pub use loss::{CrossEntropyLoss, Loss, MSELoss, Reduction};
pub use lowrank::{LowRankLayer, LowRankLinear};
pub use module::Module;
