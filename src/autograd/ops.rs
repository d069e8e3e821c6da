//! Differentiable operations for tensors.
//!
//! Each operation:
//! 1. Computes the forward result
//! 2. Records a `GradFn` to the computation graph (if gradient tracking
//!    is enabled and an input requires gradients)

use std::sync::Arc;

use super::grad_fn::{
    flip_hw_raw, AbsBackward, AddBackward, AddChannelBiasBackward, Conv2dBackward, DivBackward,
    FlipHwBackward, GradFn, MeanBackward, MulBackward, MulScalarBackward, NegBackward,
    PowBackward, ReluBackward, SigmoidBackward, SubBackward, SumBackward, ViewBackward,
};
use super::tensor::Tensor;
use super::{is_grad_enabled, with_graph};

/// Record a unary or n-ary operation to the thread-local graph.
fn record_op(inputs: &[&Tensor], result: &mut Tensor, grad_fn: Arc<dyn GradFn>) {
    if is_grad_enabled() && inputs.iter().any(|t| t.requires_grad_enabled()) {
        result.requires_grad_(true);
        result.set_grad_fn(grad_fn.clone());

        with_graph(|graph| {
            for input in inputs {
                graph.register_tensor((*input).clone());
            }
            graph.record(
                result.id(),
                grad_fn,
                inputs.iter().map(|t| t.id()).collect(),
            );
        });
    }
}

// ============================================================================
// Element-wise operations
// ============================================================================

impl Tensor {
    /// Element-wise addition: z = self + other
    #[must_use]
    pub fn add(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.shape(), other.shape(), "add: shape mismatch");
        let data: Vec<f32> = self
            .data()
            .iter()
            .zip(other.data().iter())
            .map(|(&a, &b)| a + b)
            .collect();

        let mut result = Tensor::new(&data, self.shape());
        record_op(&[self, other], &mut result, Arc::new(AddBackward));
        result
    }

    /// Element-wise subtraction: z = self - other
    #[must_use]
    pub fn sub(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.shape(), other.shape(), "sub: shape mismatch");
        let data: Vec<f32> = self
            .data()
            .iter()
            .zip(other.data().iter())
            .map(|(&a, &b)| a - b)
            .collect();

        let mut result = Tensor::new(&data, self.shape());
        record_op(&[self, other], &mut result, Arc::new(SubBackward));
        result
    }

    /// Element-wise multiplication: z = self * other
    #[must_use]
    pub fn mul(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.shape(), other.shape(), "mul: shape mismatch");
        let data: Vec<f32> = self
            .data()
            .iter()
            .zip(other.data().iter())
            .map(|(&a, &b)| a * b)
            .collect();

        let mut result = Tensor::new(&data, self.shape());
        record_op(
            &[self, other],
            &mut result,
            Arc::new(MulBackward {
                x: self.clone(),
                y: other.clone(),
            }),
        );
        result
    }

    /// Element-wise division: z = self / other
    #[must_use]
    pub fn div(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.shape(), other.shape(), "div: shape mismatch");
        let data: Vec<f32> = self
            .data()
            .iter()
            .zip(other.data().iter())
            .map(|(&a, &b)| a / b)
            .collect();

        let mut result = Tensor::new(&data, self.shape());
        record_op(
            &[self, other],
            &mut result,
            Arc::new(DivBackward {
                x: self.clone(),
                y: other.clone(),
            }),
        );
        result
    }

    /// Multiply every element by a scalar: z = s * self
    #[must_use]
    pub fn mul_scalar(&self, scalar: f32) -> Tensor {
        let data: Vec<f32> = self.data().iter().map(|&a| a * scalar).collect();

        let mut result = Tensor::new(&data, self.shape());
        record_op(
            &[self],
            &mut result,
            Arc::new(MulScalarBackward { scalar }),
        );
        result
    }

    /// Negation: z = -self
    #[must_use]
    pub fn neg(&self) -> Tensor {
        let data: Vec<f32> = self.data().iter().map(|&a| -a).collect();

        let mut result = Tensor::new(&data, self.shape());
        record_op(&[self], &mut result, Arc::new(NegBackward));
        result
    }

    /// Element-wise absolute value: z = |self|
    #[must_use]
    pub fn abs(&self) -> Tensor {
        let data: Vec<f32> = self.data().iter().map(|&a| a.abs()).collect();

        let mut result = Tensor::new(&data, self.shape());
        record_op(
            &[self],
            &mut result,
            Arc::new(AbsBackward { x: self.clone() }),
        );
        result
    }

    /// Element-wise power: z = self^n
    #[must_use]
    pub fn pow(&self, n: f32) -> Tensor {
        let data: Vec<f32> = self.data().iter().map(|&a| a.powf(n)).collect();

        let mut result = Tensor::new(&data, self.shape());
        record_op(
            &[self],
            &mut result,
            Arc::new(PowBackward {
                x: self.clone(),
                n,
            }),
        );
        result
    }

    // ========================================================================
    // Activations
    // ========================================================================

    /// ReLU activation: z = max(0, self)
    #[must_use]
    pub fn relu(&self) -> Tensor {
        let data: Vec<f32> = self.data().iter().map(|&a| a.max(0.0)).collect();

        let mut result = Tensor::new(&data, self.shape());
        record_op(
            &[self],
            &mut result,
            Arc::new(ReluBackward { x: self.clone() }),
        );
        result
    }

    /// Sigmoid activation: z = 1 / (1 + exp(-self))
    #[must_use]
    pub fn sigmoid(&self) -> Tensor {
        let data: Vec<f32> = self
            .data()
            .iter()
            .map(|&a| 1.0 / (1.0 + (-a).exp()))
            .collect();

        let mut result = Tensor::new(&data, self.shape());
        let output = result.clone();
        record_op(&[self], &mut result, Arc::new(SigmoidBackward { output }));
        result
    }

    // ========================================================================
    // Reductions
    // ========================================================================

    /// Sum of all elements, producing a scalar tensor of shape [1].
    #[must_use]
    pub fn sum(&self) -> Tensor {
        let total: f32 = self.data().iter().sum();

        let mut result = Tensor::new(&[total], &[1]);
        record_op(
            &[self],
            &mut result,
            Arc::new(SumBackward {
                x_shape: self.shape().to_vec(),
            }),
        );
        result
    }

    /// Mean of all elements, producing a scalar tensor of shape [1].
    #[must_use]
    pub fn mean(&self) -> Tensor {
        let total: f32 = self.data().iter().sum();
        let mean = total / self.numel() as f32;

        let mut result = Tensor::new(&[mean], &[1]);
        record_op(
            &[self],
            &mut result,
            Arc::new(MeanBackward {
                x_shape: self.shape().to_vec(),
            }),
        );
        result
    }

    // ========================================================================
    // Shape operations
    // ========================================================================

    /// Reinterpret the tensor with a new shape (same element count).
    #[must_use]
    pub fn view(&self, new_shape: &[usize]) -> Tensor {
        let new_numel: usize = new_shape.iter().product();
        assert_eq!(
            self.numel(),
            new_numel,
            "view: cannot reshape {:?} into {:?}",
            self.shape(),
            new_shape
        );

        let mut result = Tensor::new(self.data(), new_shape);
        record_op(
            &[self],
            &mut result,
            Arc::new(ViewBackward {
                x_shape: self.shape().to_vec(),
            }),
        );
        result
    }

    /// Flip the last two (spatial) axes.
    #[must_use]
    pub fn flip_hw(&self) -> Tensor {
        let flipped = flip_hw_raw(self.data(), self.shape());

        let mut result = Tensor::new(flipped.data(), self.shape());
        record_op(
            &[self],
            &mut result,
            Arc::new(FlipHwBackward {
                shape: self.shape().to_vec(),
            }),
        );
        result
    }

    /// Add a per-channel bias to a [N, C, H, W] tensor.
    #[must_use]
    pub fn add_channel_bias(&self, bias: &Tensor) -> Tensor {
        assert_eq!(self.ndim(), 4, "add_channel_bias expects 4D input");
        assert_eq!(
            bias.shape(),
            &[self.shape()[1]],
            "bias shape must be [channels]"
        );

        let (n, c, h, w) = (
            self.shape()[0],
            self.shape()[1],
            self.shape()[2],
            self.shape()[3],
        );
        let mut data = self.data().to_vec();
        for b in 0..n {
            for ch in 0..c {
                let base = (b * c + ch) * h * w;
                for i in 0..h * w {
                    data[base + i] += bias.data()[ch];
                }
            }
        }

        let mut result = Tensor::new(&data, self.shape());
        record_op(
            &[self, bias],
            &mut result,
            Arc::new(AddChannelBiasBackward {
                x_shape: self.shape().to_vec(),
            }),
        );
        result
    }

    // ========================================================================
    // Convolution
    // ========================================================================

    /// 2D cross-correlation of a [N, C_in, H, W] input with a
    /// [C_out, C_in, K_h, K_w] weight, with zero padding.
    ///
    /// Output spatial size along each axis is
    /// `(in + 2*pad - k) / stride + 1`. Gradients flow to both the input
    /// and the weight.
    #[must_use]
    pub fn conv2d(&self, weight: &Tensor, stride: (usize, usize), padding: (usize, usize)) -> Tensor {
        assert_eq!(self.ndim(), 4, "conv2d expects 4D input, got {:?}", self.shape());
        assert_eq!(
            weight.ndim(),
            4,
            "conv2d expects 4D weight, got {:?}",
            weight.shape()
        );

        let in_shape = self.shape();
        let w_shape = weight.shape();
        let (n, in_c, in_h, in_w) = (in_shape[0], in_shape[1], in_shape[2], in_shape[3]);
        let (out_c, w_in_c, k_h, k_w) = (w_shape[0], w_shape[1], w_shape[2], w_shape[3]);
        assert_eq!(
            in_c, w_in_c,
            "conv2d: input has {in_c} channels but weight expects {w_in_c}"
        );

        let (s_h, s_w) = stride;
        let (p_h, p_w) = padding;
        assert!(
            in_h + 2 * p_h >= k_h && in_w + 2 * p_w >= k_w,
            "conv2d: kernel {k_h}x{k_w} larger than padded input {}x{}",
            in_h + 2 * p_h,
            in_w + 2 * p_w
        );
        let out_h = (in_h + 2 * p_h - k_h) / s_h + 1;
        let out_w = (in_w + 2 * p_w - k_w) / s_w + 1;

        let input = self.data();
        let w = weight.data();
        let mut out = vec![0.0f32; n * out_c * out_h * out_w];

        for b in 0..n {
            for oc in 0..out_c {
                for oh in 0..out_h {
                    for ow in 0..out_w {
                        let mut sum = 0.0;
                        for ic in 0..in_c {
                            for kh in 0..k_h {
                                let ih = oh * s_h + kh;
                                if ih < p_h || ih >= in_h + p_h {
                                    continue;
                                }
                                let ih = ih - p_h;
                                for kw in 0..k_w {
                                    let iw = ow * s_w + kw;
                                    if iw < p_w || iw >= in_w + p_w {
                                        continue;
                                    }
                                    let iw = iw - p_w;
                                    sum += input[((b * in_c + ic) * in_h + ih) * in_w + iw]
                                        * w[((oc * in_c + ic) * k_h + kh) * k_w + kw];
                                }
                            }
                        }
                        out[((b * out_c + oc) * out_h + oh) * out_w + ow] = sum;
                    }
                }
            }
        }

        let mut result = Tensor::new(&out, &[n, out_c, out_h, out_w]);
        record_op(
            &[self, weight],
            &mut result,
            Arc::new(Conv2dBackward {
                input: self.clone(),
                weight: weight.clone(),
                stride,
                padding,
            }),
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::{clear_graph, get_grad};
    use approx::assert_relative_eq;

    fn grad_of(t: &Tensor) -> Vec<f32> {
        get_grad(t.id()).expect("gradient missing").data().to_vec()
    }

    #[test]
    fn test_add_sub_mul_forward() {
        let a = Tensor::from_slice(&[1.0, 2.0]);
        let b = Tensor::from_slice(&[3.0, 4.0]);
        assert_eq!(a.add(&b).data(), &[4.0, 6.0]);
        assert_eq!(a.sub(&b).data(), &[-2.0, -2.0]);
        assert_eq!(a.mul(&b).data(), &[3.0, 8.0]);
    }

    #[test]
    fn test_mul_backward() {
        clear_graph();
        let a = Tensor::from_slice(&[2.0, 3.0]).requires_grad();
        let b = Tensor::from_slice(&[5.0, 7.0]).requires_grad();
        let loss = a.mul(&b).sum();
        loss.backward();

        assert_eq!(grad_of(&a), vec![5.0, 7.0]);
        assert_eq!(grad_of(&b), vec![2.0, 3.0]);
        clear_graph();
    }

    #[test]
    fn test_scalar_chain_backward() {
        clear_graph();
        let a = Tensor::from_slice(&[1.0, -2.0, 3.0]).requires_grad();
        // loss = mean(|a| * 2)
        let loss = a.abs().mul_scalar(2.0).mean();
        assert_relative_eq!(loss.item(), 4.0, epsilon = 1e-6);
        loss.backward();

        let g = grad_of(&a);
        assert_relative_eq!(g[0], 2.0 / 3.0, epsilon = 1e-6);
        assert_relative_eq!(g[1], -2.0 / 3.0, epsilon = 1e-6);
        assert_relative_eq!(g[2], 2.0 / 3.0, epsilon = 1e-6);
        clear_graph();
    }

    #[test]
    fn test_div_backward() {
        clear_graph();
        let a = Tensor::from_slice(&[6.0]).requires_grad();
        let b = Tensor::from_slice(&[3.0]).requires_grad();
        let loss = a.div(&b).sum();
        loss.backward();

        assert_relative_eq!(grad_of(&a)[0], 1.0 / 3.0, epsilon = 1e-6);
        assert_relative_eq!(grad_of(&b)[0], -6.0 / 9.0, epsilon = 1e-6);
        clear_graph();
    }

    #[test]
    fn test_conv2d_forward_valid() {
        // 1x1x3x3 input, 1x1x2x2 weight, valid convolution
        let x = Tensor::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0], &[1, 1, 3, 3]);
        let w = Tensor::new(&[1.0, 0.0, 0.0, 1.0], &[1, 1, 2, 2]);
        let y = x.conv2d(&w, (1, 1), (0, 0));
        assert_eq!(y.shape(), &[1, 1, 2, 2]);
        // y[i][j] = x[i][j] + x[i+1][j+1]
        assert_eq!(y.data(), &[6.0, 8.0, 12.0, 14.0]);
    }

    #[test]
    fn test_conv2d_forward_padding_stride() {
        let x = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[1, 1, 2, 2]);
        let w = Tensor::new(&[1.0], &[1, 1, 1, 1]);
        // padding 1, stride 2: 4x4 padded grid sampled at (0,0),(0,2),(2,0),(2,2)
        let y = x.conv2d(&w, (2, 2), (1, 1));
        assert_eq!(y.shape(), &[1, 1, 2, 2]);
        assert_eq!(y.data(), &[0.0, 0.0, 0.0, 4.0]);
    }

    #[test]
    fn test_conv2d_weight_gradient_matches_finite_difference() {
        clear_graph();
        let x = Tensor::new(&[0.5, -1.0, 2.0, 1.5, 0.0, -0.5, 1.0, 2.5, -2.0], &[1, 1, 3, 3]);
        let w = Tensor::new(&[0.1, -0.2, 0.3, 0.4], &[1, 1, 2, 2]).requires_grad();
        let loss = x.conv2d(&w, (1, 1), (0, 0)).pow(2.0).sum();
        loss.backward();
        let analytic = grad_of(&w);
        clear_graph();

        let eps = 1e-3;
        for i in 0..4 {
            let mut wp = w.detach();
            wp.data_mut()[i] += eps;
            let lp: f32 = x.conv2d(&wp, (1, 1), (0, 0)).pow(2.0).sum().item();
            let mut wm = w.detach();
            wm.data_mut()[i] -= eps;
            let lm: f32 = x.conv2d(&wm, (1, 1), (0, 0)).pow(2.0).sum().item();
            let numeric = (lp - lm) / (2.0 * eps);
            assert_relative_eq!(analytic[i], numeric, epsilon = 1e-2);
        }
    }

    #[test]
    fn test_conv2d_input_gradient_matches_finite_difference() {
        clear_graph();
        let x = Tensor::new(&[0.5, -1.0, 2.0, 1.5], &[1, 1, 2, 2]).requires_grad();
        let w = Tensor::new(&[0.3, -0.7, 0.2, 0.9], &[1, 1, 2, 2]);
        let loss = x.conv2d(&w, (1, 1), (1, 1)).pow(2.0).sum();
        loss.backward();
        let analytic = grad_of(&x);
        clear_graph();

        let eps = 1e-3;
        for i in 0..4 {
            let mut xp = x.detach();
            xp.data_mut()[i] += eps;
            let lp: f32 = xp.conv2d(&w, (1, 1), (1, 1)).pow(2.0).sum().item();
            let mut xm = x.detach();
            xm.data_mut()[i] -= eps;
            let lm: f32 = xm.conv2d(&w, (1, 1), (1, 1)).pow(2.0).sum().item();
            let numeric = (lp - lm) / (2.0 * eps);
            assert_relative_eq!(analytic[i], numeric, epsilon = 1e-2);
        }
    }

    #[test]
    fn test_detach_blocks_gradient() {
        clear_graph();
        let a = Tensor::from_slice(&[2.0]).requires_grad();
        let b = a.mul_scalar(3.0).detach();
        let loss = b.pow(2.0).sum();
        loss.backward();

        assert!(get_grad(a.id()).is_none());
        clear_graph();
    }

    #[test]
    fn test_view_and_flip() {
        let t = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[1, 1, 2, 2]);
        let v = t.view(&[2, 2]);
        assert_eq!(v.shape(), &[2, 2]);
        let f = v.flip_hw();
        assert_eq!(f.data(), &[4.0, 3.0, 2.0, 1.0]);
    }
}
