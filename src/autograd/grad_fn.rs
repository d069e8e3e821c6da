//! Gradient function trait and implementations.
//!
//! Each differentiable operation implements `GradFn` to define how
//! gradients flow backward through the operation.

use super::tensor::Tensor;

/// Trait for functions that compute gradients during the backward pass.
///
/// Each differentiable operation creates a `GradFn` implementation that
/// captures the context needed for gradient computation.
pub trait GradFn: Send + Sync {
    /// Compute gradients with respect to inputs.
    ///
    /// Returns one gradient per input tensor, in the order the inputs
    /// were given during the forward pass.
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor>;

    /// Human-readable name for debugging.
    fn name(&self) -> &'static str;
}

// ============================================================================
// Element-wise operations
// ============================================================================

/// Gradient function for addition: z = x + y
pub(crate) struct AddBackward;

impl GradFn for AddBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // d(x+y)/dx = 1, d(x+y)/dy = 1
        vec![grad_output.clone(), grad_output.clone()]
    }

    fn name(&self) -> &'static str {
        "AddBackward"
    }
}

/// Gradient function for subtraction: z = x - y
pub(crate) struct SubBackward;

impl GradFn for SubBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // d(x-y)/dx = 1, d(x-y)/dy = -1
        let grad_y: Vec<f32> = grad_output.data().iter().map(|&g| -g).collect();
        vec![
            grad_output.clone(),
            Tensor::new(&grad_y, grad_output.shape()),
        ]
    }

    fn name(&self) -> &'static str {
        "SubBackward"
    }
}

/// Gradient function for element-wise multiplication: z = x * y
pub(crate) struct MulBackward {
    pub(crate) x: Tensor,
    pub(crate) y: Tensor,
}

impl GradFn for MulBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // d(x*y)/dx = y, d(x*y)/dy = x
        let grad_x: Vec<f32> = grad_output
            .data()
            .iter()
            .zip(self.y.data().iter())
            .map(|(&g, &y)| g * y)
            .collect();
        let grad_y: Vec<f32> = grad_output
            .data()
            .iter()
            .zip(self.x.data().iter())
            .map(|(&g, &x)| g * x)
            .collect();
        vec![
            Tensor::new(&grad_x, grad_output.shape()),
            Tensor::new(&grad_y, grad_output.shape()),
        ]
    }

    fn name(&self) -> &'static str {
        "MulBackward"
    }
}

/// Gradient function for division: z = x / y
pub(crate) struct DivBackward {
    pub(crate) x: Tensor,
    pub(crate) y: Tensor,
}

impl GradFn for DivBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // d(x/y)/dx = 1/y, d(x/y)/dy = -x/y^2
        let grad_x: Vec<f32> = grad_output
            .data()
            .iter()
            .zip(self.y.data().iter())
            .map(|(&g, &y)| g / y)
            .collect();
        let grad_y: Vec<f32> = grad_output
            .data()
            .iter()
            .zip(self.x.data().iter())
            .zip(self.y.data().iter())
            .map(|((&g, &x), &y)| -g * x / (y * y))
            .collect();
        vec![
            Tensor::new(&grad_x, grad_output.shape()),
            Tensor::new(&grad_y, grad_output.shape()),
        ]
    }

    fn name(&self) -> &'static str {
        "DivBackward"
    }
}

/// Gradient function for scalar multiplication: z = s * x
pub(crate) struct MulScalarBackward {
    pub(crate) scalar: f32,
}

impl GradFn for MulScalarBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let grad: Vec<f32> = grad_output.data().iter().map(|&g| g * self.scalar).collect();
        vec![Tensor::new(&grad, grad_output.shape())]
    }

    fn name(&self) -> &'static str {
        "MulScalarBackward"
    }
}

/// Gradient function for negation: z = -x
pub(crate) struct NegBackward;

impl GradFn for NegBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let grad: Vec<f32> = grad_output.data().iter().map(|&g| -g).collect();
        vec![Tensor::new(&grad, grad_output.shape())]
    }

    fn name(&self) -> &'static str {
        "NegBackward"
    }
}

/// Gradient function for absolute value: z = |x|
pub(crate) struct AbsBackward {
    pub(crate) x: Tensor,
}

impl GradFn for AbsBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // d|x|/dx = sign(x); subgradient 0 at x == 0
        let grad: Vec<f32> = grad_output
            .data()
            .iter()
            .zip(self.x.data().iter())
            .map(|(&g, &x)| {
                if x > 0.0 {
                    g
                } else if x < 0.0 {
                    -g
                } else {
                    0.0
                }
            })
            .collect();
        vec![Tensor::new(&grad, grad_output.shape())]
    }

    fn name(&self) -> &'static str {
        "AbsBackward"
    }
}

/// Gradient function for pow: z = x^n
pub(crate) struct PowBackward {
    pub(crate) x: Tensor,
    pub(crate) n: f32,
}

impl GradFn for PowBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // d(x^n)/dx = n * x^(n-1)
        let grad: Vec<f32> = grad_output
            .data()
            .iter()
            .zip(self.x.data().iter())
            .map(|(&g, &x)| g * self.n * x.powf(self.n - 1.0))
            .collect();
        vec![Tensor::new(&grad, grad_output.shape())]
    }

    fn name(&self) -> &'static str {
        "PowBackward"
    }
}

// ============================================================================
// Activations
// ============================================================================

/// Gradient function for ReLU: z = max(0, x)
pub(crate) struct ReluBackward {
    pub(crate) x: Tensor,
}

impl GradFn for ReluBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let grad: Vec<f32> = grad_output
            .data()
            .iter()
            .zip(self.x.data().iter())
            .map(|(&g, &x)| if x > 0.0 { g } else { 0.0 })
            .collect();
        vec![Tensor::new(&grad, grad_output.shape())]
    }

    fn name(&self) -> &'static str {
        "ReluBackward"
    }
}

/// Gradient function for sigmoid: z = 1 / (1 + exp(-x))
pub(crate) struct SigmoidBackward {
    /// sigmoid(x) - the output is saved, not the input
    pub(crate) output: Tensor,
}

impl GradFn for SigmoidBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // dz/dx = z * (1 - z)
        let grad: Vec<f32> = grad_output
            .data()
            .iter()
            .zip(self.output.data().iter())
            .map(|(&g, &z)| g * z * (1.0 - z))
            .collect();
        vec![Tensor::new(&grad, grad_output.shape())]
    }

    fn name(&self) -> &'static str {
        "SigmoidBackward"
    }
}

// ============================================================================
// Reductions and shape operations
// ============================================================================

/// Gradient function for sum reduction: z = sum(x)
pub(crate) struct SumBackward {
    pub(crate) x_shape: Vec<usize>,
}

impl GradFn for SumBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // Broadcast the scalar gradient back over the input shape.
        let g = grad_output.data()[0];
        let numel: usize = self.x_shape.iter().product();
        vec![Tensor::new(&vec![g; numel], &self.x_shape)]
    }

    fn name(&self) -> &'static str {
        "SumBackward"
    }
}

/// Gradient function for mean reduction: z = mean(x)
pub(crate) struct MeanBackward {
    pub(crate) x_shape: Vec<usize>,
}

impl GradFn for MeanBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let numel: usize = self.x_shape.iter().product();
        let g = grad_output.data()[0] / numel as f32;
        vec![Tensor::new(&vec![g; numel], &self.x_shape)]
    }

    fn name(&self) -> &'static str {
        "MeanBackward"
    }
}

/// Gradient function for view/reshape: data unchanged, shape reinterpreted.
pub(crate) struct ViewBackward {
    pub(crate) x_shape: Vec<usize>,
}

impl GradFn for ViewBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![Tensor::new(grad_output.data(), &self.x_shape)]
    }

    fn name(&self) -> &'static str {
        "ViewBackward"
    }
}

/// Gradient function for flipping the last two axes.
pub(crate) struct FlipHwBackward {
    pub(crate) shape: Vec<usize>,
}

impl GradFn for FlipHwBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // Flipping is an involution; flip the gradient back.
        vec![flip_hw_raw(grad_output.data(), &self.shape)]
    }

    fn name(&self) -> &'static str {
        "FlipHwBackward"
    }
}

/// Flip the last two axes of a row-major tensor.
pub(crate) fn flip_hw_raw(data: &[f32], shape: &[usize]) -> Tensor {
    assert!(shape.len() >= 2, "flip_hw requires at least 2 dimensions");
    let w = shape[shape.len() - 1];
    let h = shape[shape.len() - 2];
    let outer: usize = shape[..shape.len() - 2].iter().product();

    let mut out = vec![0.0; data.len()];
    for o in 0..outer {
        let base = o * h * w;
        for i in 0..h {
            for j in 0..w {
                out[base + i * w + j] = data[base + (h - 1 - i) * w + (w - 1 - j)];
            }
        }
    }
    Tensor::new(&out, shape)
}

/// Gradient function for per-channel bias addition on a [N, C, H, W]
/// tensor: z[n][c][h][w] = x[n][c][h][w] + b[c].
pub(crate) struct AddChannelBiasBackward {
    pub(crate) x_shape: Vec<usize>,
}

impl GradFn for AddChannelBiasBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let (n, c, h, w) = (
            self.x_shape[0],
            self.x_shape[1],
            self.x_shape[2],
            self.x_shape[3],
        );
        let go = grad_output.data();

        let mut grad_bias = vec![0.0f32; c];
        for b in 0..n {
            for ch in 0..c {
                let base = (b * c + ch) * h * w;
                for i in 0..h * w {
                    grad_bias[ch] += go[base + i];
                }
            }
        }

        vec![grad_output.clone(), Tensor::new(&grad_bias, &[c])]
    }

    fn name(&self) -> &'static str {
        "AddChannelBiasBackward"
    }
}

// ============================================================================
// Convolution
// ============================================================================

/// Gradient function for 2D cross-correlation:
/// z = conv2d(input, weight, stride, padding).
///
/// Produces gradients for both the input and the weight, which is what
/// lets constraint losses on the composed kernel reach the generator's
/// layer weights.
pub(crate) struct Conv2dBackward {
    pub(crate) input: Tensor,
    pub(crate) weight: Tensor,
    pub(crate) stride: (usize, usize),
    pub(crate) padding: (usize, usize),
}

impl GradFn for Conv2dBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let in_shape = self.input.shape();
        let w_shape = self.weight.shape();
        let out_shape = grad_output.shape();

        let (n, in_c, in_h, in_w) = (in_shape[0], in_shape[1], in_shape[2], in_shape[3]);
        let (out_c, _, k_h, k_w) = (w_shape[0], w_shape[1], w_shape[2], w_shape[3]);
        let (out_h, out_w) = (out_shape[2], out_shape[3]);
        let (s_h, s_w) = self.stride;
        let (p_h, p_w) = self.padding;

        let input = self.input.data();
        let weight = self.weight.data();
        let go = grad_output.data();

        let mut grad_input = vec![0.0f32; input.len()];
        let mut grad_weight = vec![0.0f32; weight.len()];

        for b in 0..n {
            for oc in 0..out_c {
                for oh in 0..out_h {
                    for ow in 0..out_w {
                        let g = go[((b * out_c + oc) * out_h + oh) * out_w + ow];
                        if g == 0.0 {
                            continue;
                        }
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
                                    let i_idx = ((b * in_c + ic) * in_h + ih) * in_w + iw;
                                    let w_idx = ((oc * in_c + ic) * k_h + kh) * k_w + kw;
                                    grad_input[i_idx] += g * weight[w_idx];
                                    grad_weight[w_idx] += g * input[i_idx];
                                }
                            }
                        }
                    }
                }
            }
        }

        vec![
            Tensor::new(&grad_input, in_shape),
            Tensor::new(&grad_weight, w_shape),
        ]
    }

    fn name(&self) -> &'static str {
        "Conv2dBackward"
    }
}
