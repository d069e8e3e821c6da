//! Computation graph for automatic differentiation.
//!
//! Tape-based recording of operations and the backward pass.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::grad_fn::GradFn;
use super::tensor::{Tensor, TensorId};

/// Entry in the computation tape.
#[derive(Clone)]
pub(crate) struct TapeEntry {
    /// ID of the output tensor
    pub output_id: TensorId,

    /// Function to compute gradients
    pub grad_fn: Arc<dyn GradFn>,

    /// IDs of input tensors
    pub input_ids: Vec<TensorId>,
}

/// Computation graph that records operations for the backward pass.
///
/// Operations are recorded in forward order, then gradients are
/// computed in reverse order. Each thread has its own graph (via
/// `thread_local` storage in the parent module); the training loop
/// clears the tape after every optimizer step so memory stays bounded
/// across iterations.
pub struct ComputationGraph {
    /// Recorded operations (tape)
    tape: Vec<TapeEntry>,

    /// Leaf tensors registered during the forward pass
    tensors: HashMap<TensorId, Tensor>,

    /// Tensor IDs that require gradients
    requires_grad: HashSet<TensorId>,
}

impl ComputationGraph {
    /// Create a new empty computation graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tape: Vec::new(),
            tensors: HashMap::new(),
            requires_grad: HashSet::new(),
        }
    }

    /// Clear all recorded operations and registered tensors.
    pub fn clear(&mut self) {
        self.tape.clear();
        self.tensors.clear();
        self.requires_grad.clear();
    }

    /// Register a tensor that may receive gradients.
    pub fn register_tensor(&mut self, tensor: Tensor) {
        if tensor.requires_grad_enabled() {
            self.requires_grad.insert(tensor.id());
        }
        self.tensors.insert(tensor.id(), tensor);
    }

    /// Record an operation to the tape.
    pub fn record(
        &mut self,
        output_id: TensorId,
        grad_fn: Arc<dyn GradFn>,
        input_ids: Vec<TensorId>,
    ) {
        self.tape.push(TapeEntry {
            output_id,
            grad_fn,
            input_ids,
        });
    }

    /// Compute gradients via backpropagation.
    ///
    /// Walks the tape in reverse, computes gradients w.r.t. each
    /// operation's inputs, accumulates them for tensors used more than
    /// once, and finally stores gradients in registered leaf tensors
    /// that require them.
    pub fn backward(&mut self, output_id: TensorId, grad_output: Tensor) {
        let mut grads: HashMap<TensorId, Tensor> = HashMap::new();
        grads.insert(output_id, grad_output);

        for entry in self.tape.iter().rev() {
            let grad_out = match grads.get(&entry.output_id) {
                Some(g) => g.clone(),
                None => continue,
            };

            let input_grads = entry.grad_fn.backward(&grad_out);

            for (input_id, input_grad) in entry.input_ids.iter().zip(input_grads) {
                grads
                    .entry(*input_id)
                    .and_modify(|existing| {
                        let new_data: Vec<f32> = existing
                            .data()
                            .iter()
                            .zip(input_grad.data().iter())
                            .map(|(a, b)| a + b)
                            .collect();
                        *existing = Tensor::new(&new_data, existing.shape());
                    })
                    .or_insert(input_grad);
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

    /// Get the number of recorded operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tape.len()
    }

    /// Check if the tape is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tape.is_empty()
    }

    /// Get gradient for a tensor by ID (after backward).
    #[must_use]
    pub fn get_grad(&self, id: TensorId) -> Option<Tensor> {
        self.tensors.get(&id).and_then(|t| t.grad().cloned())
    }

    /// Clear gradient for a specific tensor.
    pub fn clear_grad(&mut self, id: TensorId) {
        if let Some(tensor) = self.tensors.get_mut(&id) {
            tensor.clear_grad();
        }
    }
}

impl Default for ComputationGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::grad_fn::NegBackward;

    #[test]
    fn test_graph_creation() {
        let graph = ComputationGraph::new();
        assert!(graph.is_empty());
        assert_eq!(graph.len(), 0);
    }

    #[test]
    fn test_backward_through_neg() {
        let mut graph = ComputationGraph::new();

        let input = Tensor::from_slice(&[1.0, 2.0]).requires_grad();
        let input_id = input.id();
        graph.register_tensor(input);

        let output = Tensor::from_slice(&[-1.0, -2.0]);
        let output_id = output.id();
        graph.register_tensor(output);

        graph.record(output_id, Arc::new(NegBackward), vec![input_id]);

        graph.backward(output_id, Tensor::from_slice(&[1.0, 1.0]));

        let grad = graph.get_grad(input_id).expect("gradient missing");
        assert_eq!(grad.data(), &[-1.0, -1.0]);
    }

    #[test]
    fn test_backward_accumulates_for_reused_input() {
        let mut graph = ComputationGraph::new();

        let input = Tensor::from_slice(&[3.0]).requires_grad();
        let input_id = input.id();
        graph.register_tensor(input);

        // The same input feeds two negations which are both upstream of
        // the output gradient.
        let mid_id = TensorId::new();
        graph.record(mid_id, Arc::new(NegBackward), vec![input_id]);
        graph.record(mid_id, Arc::new(NegBackward), vec![input_id]);

        graph.backward(mid_id, Tensor::from_slice(&[1.0]));

        let grad = graph.get_grad(input_id).expect("gradient missing");
        assert_eq!(grad.data(), &[-2.0]);
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut graph = ComputationGraph::new();
        let t = Tensor::from_slice(&[1.0]).requires_grad();
        let id = t.id();
        graph.register_tensor(t);
        graph.record(TensorId::new(), Arc::new(NegBackward), vec![id]);

        graph.clear();
        assert!(graph.is_empty());
        assert!(graph.get_grad(id).is_none());
    }
}
