//! Gradient-based optimizers.
//!
//! The adversarial loop owns one optimizer per model, each bound to a
//! disjoint parameter set. Gradients are read from the thread-local
//! autograd graph by tensor ID; parameters are updated in place through
//! `step_with_params`.
//!
//! # References
//!
//! - Kingma, D. P., & Ba, J. (2015). Adam: A method for stochastic
//!   optimization. ICLR.

use crate::autograd::{clear_grad, get_grad, Tensor, TensorId};

/// Common trait for optimizers.
pub trait Optimizer {
    /// Perform a single optimization step over the given parameters.
    fn step_with_params(&mut self, params: &mut [&mut Tensor]);

    /// Zero all parameter gradients.
    fn zero_grad(&mut self);

    /// Get current learning rate.
    fn lr(&self) -> f32;

    /// Set learning rate.
    fn set_lr(&mut self, lr: f32);
}

/// Adam optimizer (Kingma & Ba, 2015).
///
/// Update rule:
/// ```text
/// m_t = b1 * m_{t-1} + (1 - b1) * grad
/// v_t = b2 * v_{t-1} + (1 - b2) * grad^2
/// m_hat = m_t / (1 - b1^t)
/// v_hat = v_t / (1 - b2^t)
/// param = param - lr * m_hat / (sqrt(v_hat) + eps)
/// ```
#[derive(Debug)]
pub struct Adam {
    param_ids: Vec<TensorId>,
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    /// First moment estimates, one buffer per parameter
    m: Vec<Vec<f32>>,
    /// Second moment estimates, one buffer per parameter
    v: Vec<Vec<f32>>,
    /// Current timestep for bias correction
    t: usize,
    initialized: bool,
}

impl Adam {
    /// Create a new Adam optimizer with default hyperparameters.
    ///
    /// Default: beta1 = 0.9, beta2 = 0.999, eps = 1e-8.
    #[allow(clippy::needless_pass_by_value)]
    #[must_use]
    pub fn new(params: Vec<&mut Tensor>, lr: f32) -> Self {
        let param_ids: Vec<TensorId> = params.iter().map(|p| p.id()).collect();
        Self {
            param_ids,
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            m: Vec::new(),
            v: Vec::new(),
            t: 0,
            initialized: false,
        }
    }

    /// Set beta parameters.
    #[must_use]
    pub fn betas(mut self, beta1: f32, beta2: f32) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }

    /// Set epsilon for numerical stability.
    #[must_use]
    pub fn eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    fn update_param(&mut self, param: &mut Tensor, idx: usize) {
        let Some(grad) = get_grad(param.id()) else {
            return;
        };

        let grad_data = grad.data();
        let param_data = param.data_mut();

        if !self.initialized || idx >= self.m.len() {
            if idx >= self.m.len() {
                self.m.resize(idx + 1, Vec::new());
                self.v.resize(idx + 1, Vec::new());
            }
            self.m[idx] = vec![0.0; param_data.len()];
            self.v[idx] = vec![0.0; param_data.len()];
        }

        let m = &mut self.m[idx];
        let v = &mut self.v[idx];

        let bias_correction1 = 1.0 - self.beta1.powi(self.t as i32);
        let bias_correction2 = 1.0 - self.beta2.powi(self.t as i32);

        for i in 0..param_data.len() {
            let g = grad_data[i];

            m[i] = self.beta1 * m[i] + (1.0 - self.beta1) * g;
            v[i] = self.beta2 * v[i] + (1.0 - self.beta2) * g * g;

            let m_hat = m[i] / bias_correction1;
            let v_hat = v[i] / bias_correction2;

            param_data[i] -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
        }
    }
}

impl Optimizer for Adam {
    fn step_with_params(&mut self, params: &mut [&mut Tensor]) {
        self.t += 1;
        for (idx, param) in params.iter_mut().enumerate() {
            self.update_param(param, idx);
        }
        self.initialized = true;
    }

    fn zero_grad(&mut self) {
        for &id in &self.param_ids {
            clear_grad(id);
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::clear_graph;

    #[test]
    fn test_adam_reduces_quadratic_loss() {
        clear_graph();
        let mut w = Tensor::from_slice(&[5.0, -3.0]).requires_grad();
        let mut opt = Adam::new(vec![&mut w], 0.1);

        let mut last = f32::INFINITY;
        for _ in 0..200 {
            opt.zero_grad();
            let loss = w.pow(2.0).sum();
            loss.backward();
            opt.step_with_params(&mut [&mut w]);
            last = loss.item();
            clear_graph();
        }

        assert!(last < 1e-2, "loss did not converge: {last}");
        assert!(w.data().iter().all(|&x| x.abs() < 0.2));
    }

    #[test]
    fn test_adam_skips_params_without_grad() {
        clear_graph();
        let mut w = Tensor::from_slice(&[1.0]).requires_grad();
        let before = w.data().to_vec();

        let mut opt = Adam::new(vec![&mut w], 0.1);
        // No backward pass happened; step must be a no-op.
        opt.step_with_params(&mut [&mut w]);

        assert_eq!(w.data(), &before[..]);
        clear_graph();
    }

    #[test]
    fn test_first_step_matches_closed_form() {
        clear_graph();
        let mut w = Tensor::from_slice(&[2.0]).requires_grad();
        let mut opt = Adam::new(vec![&mut w], 0.5).betas(0.5, 0.9);

        let loss = w.mul_scalar(3.0).sum(); // grad = 3
        loss.backward();
        opt.step_with_params(&mut [&mut w]);

        // With bias correction the first Adam step is -lr * g / (|g| + eps).
        let expected = 2.0 - 0.5 * 3.0 / (3.0 + 1e-8);
        assert!((w.data()[0] - expected).abs() < 1e-5);
        clear_graph();
    }
}
