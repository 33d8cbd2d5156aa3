//! Reverse-mode automatic differentiation for the layers being pruned.
//!
//! Operations on [`Tensor`] are recorded to a thread-local tape while
//! gradient tracking is enabled, and replayed in reverse by
//! [`Tensor::backward`].
//!
//! Pruning needs two scopes on top of the plain tape:
//!
//! - [`no_grad`]: forward passes that must not record anything (output and
//!   loss perturbation scoring).
//! - [`isolated_graph`]: a throwaway tape for a scoring backward pass that
//!   must leave the caller's tape and accumulated gradients untouched.
//!
//! Both scopes restore the previous state through drop guards, so a panic
//! inside the closure does not leave tracking disabled.
//!
//! # Example
//!
//! ```
//! use lowrank::autograd::{no_grad, Tensor};
//!
//! let x = Tensor::from_slice(&[1.0, 2.0]).requires_grad();
//! let y = no_grad(|| x.mul(&x).sum());
//! assert!(!y.requires_grad_enabled());
//! ```
//!
//! # References
//!
//! - Baydin, A. G., et al. (2018). Automatic differentiation in machine learning: a survey. JMLR.
//! - Griewank, A., & Walther, A. (2008). Evaluating derivatives. SIAM.

pub(crate) mod grad_fn;
mod graph;
pub(crate) mod ops;
mod tensor;

pub use grad_fn::GradFn;
pub use graph::ComputationGraph;
pub use tensor::{Tensor, TensorId};

use std::cell::{Cell, RefCell};

thread_local! {
    /// Computation graph for the current thread.
    static GRAPH: RefCell<ComputationGraph> = RefCell::new(ComputationGraph::new());

    /// Gradient tracking switch.
    static GRAD_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Restores the gradient switch to its previous value on drop.
struct GradModeGuard {
    prev: bool,
}

impl GradModeGuard {
    fn set(enabled: bool) -> Self {
        let prev = GRAD_ENABLED.with(|flag| flag.replace(enabled));
        Self { prev }
    }
}

impl Drop for GradModeGuard {
    fn drop(&mut self) {
        GRAD_ENABLED.with(|flag| flag.set(self.prev));
    }
}

/// Swaps the thread-local graph back in on drop.
struct GraphGuard {
    saved: Option<ComputationGraph>,
}

impl Drop for GraphGuard {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            GRAPH.with(|graph| {
                let _scratch = std::mem::replace(&mut *graph.borrow_mut(), saved);
            });
        }
    }
}

/// Execute a closure without gradient tracking.
///
/// Nothing computed inside the closure is recorded to the tape.
/// Nested calls are fine; the previous mode is restored on exit.
pub fn no_grad<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = GradModeGuard::set(false);
    f()
}

/// Execute a closure against a fresh, empty computation graph.
///
/// Gradient tracking is forced on for the duration. Everything recorded
/// inside (tape entries, leaf gradients) is discarded on exit, and the
/// caller's graph is restored exactly as it was.
pub fn isolated_graph<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let saved = GRAPH.with(|graph| std::mem::take(&mut *graph.borrow_mut()));
    let _graph_guard = GraphGuard { saved: Some(saved) };
    let _mode_guard = GradModeGuard::set(true);
    f()
}

/// Check if gradient tracking is currently enabled.
#[must_use]
pub fn is_grad_enabled() -> bool {
    GRAD_ENABLED.with(Cell::get)
}

/// Run a closure with mutable access to the thread-local graph.
pub(crate) fn with_graph<F, R>(f: F) -> R
where
    F: FnOnce(&mut ComputationGraph) -> R,
{
    GRAPH.with(|graph| f(&mut graph.borrow_mut()))
}

/// Number of operations recorded on the current thread's tape.
#[must_use]
pub fn tape_len() -> usize {
    with_graph(|graph| graph.len())
}

/// Clear the computation graph (typically after an optimizer step).
pub fn clear_graph() {
    with_graph(ComputationGraph::clear);
}

/// Get the gradient for a tensor by ID from the graph.
#[must_use]
pub fn get_grad(id: TensorId) -> Option<Tensor> {
    with_graph(|graph| graph.get_grad(id))
}

/// Clear the gradient for a specific tensor by ID.
pub fn clear_grad(id: TensorId) {
    with_graph(|graph| graph.clear_grad(id));
}
