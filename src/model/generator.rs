//! The downscaling generator.
//!
//! A stack of convolutions with no bias and no nonlinearity between
//! layers, so the whole network is one linear map: mathematically a
//! single convolution kernel followed by subsampling. The RGB channels
//! of the input are folded into the batch axis before the stack runs,
//! which makes every layer a single-channel-in, single-channel-out map
//! at the image level and is what keeps the network equivalent to one
//! 2D kernel applied per channel.

use crate::autograd::Tensor;
use crate::nn::{Conv2d, Module};

/// Initialization gain for generator layers. Small, so the composed
/// kernel starts close to flat.
const INIT_GAIN: f32 = 0.1;

/// Linear convolutional generator.
pub struct Generator {
    layers: Vec<Conv2d>,
    /// Spatial size of the output for the configured input crop
    output_size: usize,
    /// Subsampling stride of the final layer (1 / scale_factor)
    stride: usize,
}

impl Generator {
    /// Build a generator from its layer structure.
    ///
    /// `structure` lists the kernel size of every layer; all layers use
    /// stride 1 except the last, which subsamples with `stride`.
    /// `input_crop_size` fixes the declared output size.
    #[must_use]
    pub fn new(
        structure: &[usize],
        channels: usize,
        stride: usize,
        input_crop_size: usize,
        seed: Option<u64>,
    ) -> Self {
        assert!(structure.len() >= 2, "generator needs at least 2 layers");

        let mut layers = Vec::with_capacity(structure.len());
        for (i, &k) in structure.iter().enumerate() {
            let (in_c, out_c, s) = if i == 0 {
                (1, channels, 1)
            } else if i == structure.len() - 1 {
                (channels, 1, stride)
            } else {
                (channels, channels, 1)
            };
            let layer_seed = seed.map(|s0| s0.wrapping_add(i as u64));
            layers.push(Conv2d::with_options(
                in_c, out_c, k, s, false, INIT_GAIN, layer_seed,
            ));
        }

        let output_size = Self::output_size_for(structure, stride, input_crop_size);

        Self {
            layers,
            output_size,
            stride,
        }
    }

    /// Output spatial size for a given input size: every layer shaves
    /// `k - 1`, the final layer additionally subsamples.
    #[must_use]
    pub fn output_size_for(structure: &[usize], stride: usize, input_size: usize) -> usize {
        let mut size = input_size;
        for (i, &k) in structure.iter().enumerate() {
            let s = if i == structure.len() - 1 { stride } else { 1 };
            size = (size - k) / s + 1;
        }
        size
    }

    /// Total spatial extent of the composed kernel: `1 + sum(k_i - 1)`.
    #[must_use]
    pub fn composed_kernel_size(structure: &[usize]) -> usize {
        1 + structure.iter().map(|&k| k - 1).sum::<usize>()
    }

    /// Declared output size for the configured input crop.
    #[must_use]
    pub fn output_size(&self) -> usize {
        self.output_size
    }

    /// Subsampling stride of the final layer.
    #[must_use]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Ordered convolution weights, first layer to last. This is the
    /// sequence the kernel extractor composes.
    #[must_use]
    pub fn weights(&self) -> Vec<&Tensor> {
        self.layers.iter().map(Conv2d::weight).collect()
    }

    /// Replace a layer's weight (for hand-built test networks).
    pub fn set_layer_weight(&mut self, layer: usize, weight: Tensor) {
        self.layers[layer].set_weight(weight);
    }
}

impl Module for Generator {
    fn forward(&self, input: &Tensor) -> Tensor {
        assert_eq!(input.ndim(), 4, "Generator expects [N, C, H, W] input");
        let (n, c, h, w) = (
            input.shape()[0],
            input.shape()[1],
            input.shape()[2],
            input.shape()[3],
        );

        // Fold channels into the batch axis: [N, C, H, W] -> [N*C, 1, H, W].
        // Row-major layout makes this a pure reinterpretation.
        let mut x = input.view(&[n * c, 1, h, w]);
        for layer in &self.layers {
            x = layer.forward(&x);
        }

        let oh = x.shape()[2];
        let ow = x.shape()[3];
        x.view(&[n, c, oh, ow])
    }

    fn parameters(&self) -> Vec<&Tensor> {
        self.layers.iter().flat_map(Module::parameters).collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.layers
            .iter_mut()
            .flat_map(Module::parameters_mut)
            .collect()
    }
}
