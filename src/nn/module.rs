//! The `Module` trait shared by all network components.

use crate::autograd::Tensor;

/// Interface for neural network layers and models.
///
/// A module owns its parameter tensors and maps an input tensor to an
/// output tensor. `parameters_mut` hands the optimizer mutable access
/// to exactly this module's parameters and nothing else, which is what
/// keeps the two optimizers of an adversarial pair disjoint.
pub trait Module {
    /// Forward pass.
    fn forward(&self, input: &Tensor) -> Tensor;

    /// Immutable references to all trainable parameters, in a stable order.
    fn parameters(&self) -> Vec<&Tensor>;

    /// Mutable references to all trainable parameters, in the same order.
    fn parameters_mut(&mut self) -> Vec<&mut Tensor>;
}
