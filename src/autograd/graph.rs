//! Tape-based computation graph and the backward pass.

use std::collections::HashMap;
use std::sync::Arc;

use super::grad_fn::GradFn;
use super::tensor::{Tensor, TensorId};

#[derive(Clone)]
struct TapeEntry {
    output_id: TensorId,
    grad_fn: Arc<dyn GradFn>,
    input_ids: Vec<TensorId>,
}

/// Computation graph that records operations for the backward pass.
///
/// Operations are appended in execution order; `backward` walks the tape in
/// reverse. Leaf tensors are registered by ID so their gradients can be
/// looked up after the pass.
#[allow(missing_debug_implementations)]
#[derive(Default)]
pub struct ComputationGraph {
    tape: Vec<TapeEntry>,
    tensors: HashMap<TensorId, Tensor>,
}

impl ComputationGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all recorded operations and registered tensors.
    pub fn clear(&mut self) {
        self.tape.clear();
        self.tensors.clear();
    }

    /// Register a tensor so a gradient can be stored against its ID.
    ///
    /// Re-registering refreshes the tracking flag but keeps any gradient
    /// already accumulated on the stored copy.
    pub fn register_tensor(&mut self, tensor: &Tensor) {
        let requires = tensor.requires_grad_enabled();
        self.tensors
            .entry(tensor.id())
            .and_modify(|stored| {
                stored.requires_grad_(requires);
            })
            .or_insert_with(|| tensor.clone());
    }

    pub fn record(&mut self, output_id: TensorId, grad_fn: Arc<dyn GradFn>, input_ids: Vec<TensorId>) {
        self.tape.push(TapeEntry {
            output_id,
            grad_fn,
            input_ids,
        });
    }

    #[must_use]
    pub fn get_tensor(&self, id: TensorId) -> Option<&Tensor> {
        self.tensors.get(&id)
    }

    /// Reverse-mode sweep from `output_id`.
    ///
    /// Gradients for tensors used more than once are summed. Only leaves
    /// that require gradients keep their result.
    pub fn backward(&mut self, output_id: TensorId, grad_output: Tensor) {
        let mut grads: HashMap<TensorId, Tensor> = HashMap::new();
        grads.insert(output_id, grad_output);

        for entry in self.tape.iter().rev() {
            let Some(grad_out) = grads.get(&entry.output_id).cloned() else {
                continue;
            };

            let input_grads = entry.grad_fn.backward(&grad_out);
            for (input_id, input_grad) in entry.input_ids.iter().zip(input_grads) {
                match grads.get_mut(input_id) {
                    Some(existing) => {
                        for (a, b) in existing.data_mut().iter_mut().zip(input_grad.data()) {
                            *a += b;
                        }
                    }
                    None => {
                        grads.insert(*input_id, input_grad);
                    }
                }
            }
        }

        for (id, grad) in grads {
            if let Some(tensor) = self.tensors.get_mut(&id) {
                if tensor.requires_grad_enabled() && tensor.is_leaf() {
                    tensor.accumulate_grad(grad);
                }
            }
        }
    }

    /// Number of recorded operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tape.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tape.is_empty()
    }

    /// Gradient for a tensor by ID (after backward).
    #[must_use]
    pub fn get_grad(&self, id: TensorId) -> Option<Tensor> {
        self.tensors.get(&id).and_then(|t| t.grad().cloned())
    }

    pub fn clear_grad(&mut self, id: TensorId) {
        if let Some(tensor) = self.tensors.get_mut(&id) {
            tensor.clear_grad();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::grad_fn::SumBackward;

    #[test]
    fn test_graph_creation() {
        let graph = ComputationGraph::new();
        assert!(graph.is_empty());
        assert_eq!(graph.len(), 0);
    }

    #[test]
    fn test_reregister_does_not_duplicate() {
        let mut graph = ComputationGraph::new();
        let t = Tensor::from_slice(&[1.0, 2.0]).requires_grad();
        graph.register_tensor(&t);
        graph.register_tensor(&t);
        assert_eq!(graph.tensors.len(), 1);
        assert!(graph.get_tensor(t.id()).is_some());
    }

    #[test]
    fn test_backward_through_recorded_sum() {
        let mut graph = ComputationGraph::new();
        let x = Tensor::from_slice(&[1.0, 2.0, 3.0]).requires_grad();
        let out = Tensor::from_slice(&[6.0]);
        graph.register_tensor(&x);
        graph.record(
            out.id(),
            Arc::new(SumBackward {
                input_shape: vec![3],
            }),
            vec![x.id()],
        );

        graph.backward(out.id(), Tensor::from_slice(&[2.0]));
        let grad = graph.get_grad(x.id()).expect("leaf gradient");
        assert_eq!(grad.data(), &[2.0, 2.0, 2.0]);

        graph.clear_grad(x.id());
        assert!(graph.get_grad(x.id()).is_none());
    }

    #[test]
    fn test_clear() {
        let mut graph = ComputationGraph::new();
        let x = Tensor::from_slice(&[1.0]);
        graph.register_tensor(&x);
        graph.record(
            x.id(),
            Arc::new(SumBackward {
                input_shape: vec![1],
            }),
            vec![x.id()],
        );
        graph.clear();
        assert!(graph.is_empty());
        assert!(graph.get_tensor(x.id()).is_none());
    }
}
