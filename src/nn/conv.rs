//! 2D convolution layer.

use super::init::{constant, xavier_normal};
use super::module::Module;
use crate::autograd::Tensor;

/// 2D convolution layer, valid padding, square kernel.
///
/// # Shape
///
/// - Input: `(N, C_in, H, W)`
/// - Output: `(N, C_out, H_out, W_out)` where
///   `H_out = (H - kernel_size) / stride + 1`
pub struct Conv2d {
    /// Weight tensor, shape `[out_channels, in_channels, k, k]`
    weight: Tensor,
    /// Bias tensor, shape `[out_channels]`, or None
    bias: Option<Tensor>,
    /// Kernel size
    kernel_size: usize,
    /// Stride
    stride: usize,
}

impl Conv2d {
    /// Create a Conv2d layer with explicit options.
    ///
    /// Weights get xavier normal init with the given gain; biases (when
    /// present) start at zero.
    #[must_use]
    pub fn with_options(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        bias: bool,
        init_gain: f32,
        seed: Option<u64>,
    ) -> Self {
        let fan_in = in_channels * kernel_size * kernel_size;
        let fan_out = out_channels * kernel_size * kernel_size;
        let weight = xavier_normal(
            &[out_channels, in_channels, kernel_size, kernel_size],
            fan_in,
            fan_out,
            init_gain,
            seed,
        )
        .requires_grad();

        let bias_tensor = if bias {
            Some(constant(&[out_channels], 0.0).requires_grad())
        } else {
            None
        };

        Self {
            weight,
            bias: bias_tensor,
            kernel_size,
            stride,
        }
    }

    /// Kernel size.
    #[must_use]
    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    /// Stride.
    #[must_use]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// The weight tensor.
    #[must_use]
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Replace the weight tensor (for hand-built test networks).
    ///
    /// # Panics
    ///
    /// Panics if the shape differs from the current weight shape.
    pub fn set_weight(&mut self, weight: Tensor) {
        assert_eq!(
            weight.shape(),
            self.weight.shape(),
            "set_weight: shape mismatch"
        );
        self.weight = weight.requires_grad();
    }
}

impl Module for Conv2d {
    fn forward(&self, input: &Tensor) -> Tensor {
        assert_eq!(
            input.ndim(),
            4,
            "Conv2d expects 4D input [N, C, H, W], got {}D",
            input.ndim()
        );

        let out = input.conv2d(&self.weight, (self.stride, self.stride), (0, 0));
        match &self.bias {
            Some(b) => out.add_channel_bias(b),
            None => out,
        }
    }

    fn parameters(&self) -> Vec<&Tensor> {
        match &self.bias {
            Some(b) => vec![&self.weight, b],
            None => vec![&self.weight],
        }
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        match &mut self.bias {
            Some(b) => vec![&mut self.weight, b],
            None => vec![&mut self.weight],
        }
    }
}

impl std::fmt::Debug for Conv2d {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conv2d")
            .field("weight_shape", &self.weight.shape())
            .field("kernel_size", &self.kernel_size)
            .field("stride", &self.stride)
            .field("bias", &self.bias.is_some())
            .finish_non_exhaustive()
    }
}
