//! Reverse-mode automatic differentiation engine.
//!
//! Tape-based, define-by-run: operations are recorded to a thread-local
//! tape during the forward pass, and gradients are computed in reverse
//! order on `backward()`. The op set is exactly what blind kernel
//! estimation needs: element-wise arithmetic, reductions, relu/sigmoid,
//! reshaping, spatial flipping and a 2D convolution differentiable with
//! respect to both input and weight.
//!
//! # Example
//!
//! ```ignore
//! use estimar::autograd::{clear_graph, get_grad, Tensor};
//!
//! let x = Tensor::from_slice(&[1.0, 2.0, 3.0]).requires_grad();
//! let loss = x.pow(2.0).sum();
//! loss.backward();
//! let grad = get_grad(x.id());
//! clear_graph();
//! ```

pub(crate) mod grad_fn;
mod graph;
mod ops;
mod tensor;

pub use grad_fn::GradFn;
pub use graph::ComputationGraph;
pub use tensor::{Tensor, TensorId};

use std::cell::RefCell;

thread_local! {
    /// Computation graph for the current thread.
    static GRAPH: RefCell<ComputationGraph> = RefCell::new(ComputationGraph::new());

    /// Flag to disable gradient tracking (for inference).
    static GRAD_ENABLED: RefCell<bool> = const { RefCell::new(true) };
}

/// Execute a closure without gradient tracking.
pub fn no_grad<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    GRAD_ENABLED.with(|enabled| {
        let prev = *enabled.borrow();
        *enabled.borrow_mut() = false;
        let result = f();
        *enabled.borrow_mut() = prev;
        result
    })
}

/// Check if gradient tracking is currently enabled.
#[must_use]
pub fn is_grad_enabled() -> bool {
    GRAD_ENABLED.with(|enabled| *enabled.borrow())
}

/// Get a reference to the thread-local computation graph.
pub(crate) fn with_graph<F, R>(f: F) -> R
where
    F: FnOnce(&mut ComputationGraph) -> R,
{
    GRAPH.with(|graph| f(&mut graph.borrow_mut()))
}

/// Clear the computation graph (called after each optimizer step).
pub fn clear_graph() {
    GRAPH.with(|graph| graph.borrow_mut().clear());
}

/// Get gradient for a tensor by ID from the graph.
#[must_use]
pub fn get_grad(id: TensorId) -> Option<Tensor> {
    with_graph(|graph| graph.get_grad(id))
}

/// Clear gradient for a specific tensor by ID.
pub fn clear_grad(id: TensorId) {
    with_graph(|graph| graph.clear_grad(id));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_grad_context() {
        assert!(is_grad_enabled());

        no_grad(|| {
            assert!(!is_grad_enabled());
        });

        assert!(is_grad_enabled());
    }

    #[test]
    fn test_no_grad_skips_recording() {
        clear_graph();
        let x = Tensor::from_slice(&[1.0, 2.0]).requires_grad();
        let y = no_grad(|| x.pow(2.0).sum());
        assert!(!y.requires_grad_enabled());
        assert!(with_graph(|g| g.is_empty()));
        clear_graph();
    }
}
