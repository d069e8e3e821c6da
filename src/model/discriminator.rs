//! The patch discriminator.
//!
//! A fully convolutional classifier: one spatial receptive field of
//! `kernel_size` followed by 1x1 convolutions, ending in a sigmoid. Its
//! output is a map of per-patch real/fake scores rather than a single
//! verdict, so only the first layer shaves spatial extent.

use crate::autograd::Tensor;
use crate::nn::{Conv2d, Module};

/// Patch-based convolutional discriminator.
pub struct Discriminator {
    layers: Vec<Conv2d>,
    /// Spatial pixels shaved by a forward pass
    forward_shave: usize,
}

impl Discriminator {
    /// Build a discriminator.
    ///
    /// `n_layers` counts all convolutions: the spatial first layer,
    /// `n_layers - 2` pointwise feature layers, and the pointwise
    /// output layer.
    #[must_use]
    pub fn new(channels: usize, kernel_size: usize, n_layers: usize, seed: Option<u64>) -> Self {
        assert!(n_layers >= 3, "discriminator needs at least 3 layers");

        let mut layers = Vec::with_capacity(n_layers);
        for i in 0..n_layers {
            let (in_c, out_c, k) = if i == 0 {
                (3, channels, kernel_size)
            } else if i == n_layers - 1 {
                (channels, 1, 1)
            } else {
                (channels, channels, 1)
            };
            let layer_seed = seed.map(|s0| s0.wrapping_add(100 + i as u64));
            layers.push(Conv2d::with_options(in_c, out_c, k, 1, true, 1.0, layer_seed));
        }

        Self {
            layers,
            forward_shave: kernel_size - 1,
        }
    }

    /// Pixels shaved from each spatial axis by a forward pass.
    #[must_use]
    pub fn forward_shave(&self) -> usize {
        self.forward_shave
    }
}

impl Module for Discriminator {
    fn forward(&self, input: &Tensor) -> Tensor {
        assert_eq!(input.ndim(), 4, "Discriminator expects [N, C, H, W] input");

        let last = self.layers.len() - 1;
        let mut x = input.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(&x);
            x = if i == last { x.sigmoid() } else { x.relu() };
        }
        x
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
