//! Loss layers for the adversarial kernel-estimation loop.
//!
//! One adversarial criterion plus five constraint terms evaluated on
//! the extracted kernel or on the generator's output. Each is a struct
//! with a `forward` producing a scalar tensor, so gradients flow back
//! through the autograd tape into whichever tensors require them.

use crate::autograd::Tensor;

/// Penalty scale applied to the boundary mask.
const BOUNDARY_PENALTY: f32 = 30.0;

/// Exponent for the sparsity measure.
const SPARSITY_POWER: f32 = 0.2;

// ============================================================================
// Adversarial criterion
// ============================================================================

/// L1 adversarial loss against constant label maps shaped like the
/// discriminator's output.
pub struct GanLoss {
    label_real: Tensor,
    label_fake: Tensor,
}

impl GanLoss {
    /// Create the criterion for a discriminator whose score map is
    /// `d_last_layer_size` pixels square.
    #[must_use]
    pub fn new(d_last_layer_size: usize) -> Self {
        let shape = [1, 1, d_last_layer_size, d_last_layer_size];
        Self {
            label_real: Tensor::ones(&shape),
            label_fake: Tensor::zeros(&shape),
        }
    }

    /// Mean absolute distance between the score map and the label map
    /// the input is supposed to carry.
    #[must_use]
    pub fn forward(&self, d_last_layer: &Tensor, is_d_input_real: bool) -> Tensor {
        let label = if is_d_input_real {
            &self.label_real
        } else {
            &self.label_fake
        };
        d_last_layer.sub(label).abs().mean()
    }
}

// ============================================================================
// Constraint terms
// ============================================================================

/// Penalizes the generator for downscaling differently than an ideal
/// bicubic downscale of the same crop.
pub struct DownScaleLoss {
    /// Bicubic filter, `[1, 1, k, k]`, constant
    bicubic: Tensor,
    stride: usize,
    /// Zero padding that makes the downscale produce exactly
    /// `size / stride` pixels per axis.
    padding: usize,
}

impl DownScaleLoss {
    /// Create the loss for a given scale factor (e.g. 0.5 for x2
    /// downscaling).
    #[must_use]
    pub fn new(scale_factor: f32) -> Self {
        let stride = (1.0 / scale_factor).round() as usize;
        let taps = bicubic_taps(stride);
        let n = taps.len();

        let mut k2 = vec![0.0f32; n * n];
        for i in 0..n {
            for j in 0..n {
                k2[i * n + j] = taps[i] * taps[j];
            }
        }

        Self {
            bicubic: Tensor::new(&k2, &[1, 1, n, n]),
            stride,
            padding: (n - stride) / 2,
        }
    }

    /// MSE between the generator's output and the bicubic downscale of
    /// its input, center-cropped to the output size.
    #[must_use]
    pub fn forward(&self, g_input: &Tensor, g_output: &Tensor) -> Tensor {
        let (n, c, h, w) = (
            g_input.shape()[0],
            g_input.shape()[1],
            g_input.shape()[2],
            g_input.shape()[3],
        );

        // Per-channel filtering: channels into the batch axis.
        let folded = g_input.view(&[n * c, 1, h, w]);
        let down = folded.conv2d(
            &self.bicubic,
            (self.stride, self.stride),
            (self.padding, self.padding),
        );
        let (dh, dw) = (down.shape()[2], down.shape()[3]);
        let down = down.view(&[n, c, dh, dw]);

        let target = shave_to(&down, g_output.shape()[2], g_output.shape()[3]);
        g_output.sub(&target).pow(2.0).mean()
    }
}

/// Penalizes deviation of the kernel's total mass from 1.
pub struct SumOfWeightsLoss {
    one: Tensor,
}

impl SumOfWeightsLoss {
    #[must_use]
    pub fn new() -> Self {
        Self {
            one: Tensor::ones(&[1]),
        }
    }

    /// `|1 - sum(kernel)|`
    #[must_use]
    pub fn forward(&self, kernel: &Tensor) -> Tensor {
        kernel.sum().sub(&self.one).abs()
    }
}

impl Default for SumOfWeightsLoss {
    fn default() -> Self {
        Self::new()
    }
}

/// Penalizes kernel energy near the boundaries, weighted by an
/// inverted-gaussian mask that is zero in a center window and grows
/// toward the edges.
pub struct BoundariesLoss {
    mask: Tensor,
}

impl BoundariesLoss {
    #[must_use]
    pub fn new(k_size: usize) -> Self {
        Self {
            mask: Tensor::new(&penalty_mask(k_size, BOUNDARY_PENALTY), &[k_size, k_size]),
        }
    }

    /// `mean(|kernel * mask|)`
    #[must_use]
    pub fn forward(&self, kernel: &Tensor) -> Tensor {
        kernel.mul(&self.mask).abs().mean()
    }
}

/// Penalizes distance of the kernel's center of mass from the wanted
/// kernel center (which depends on the scale factor's alignment).
pub struct CentralizedLoss {
    row_grid: Tensor,
    col_grid: Tensor,
    center: Tensor,
}

impl CentralizedLoss {
    #[must_use]
    pub fn new(k_size: usize, scale_factor: f32) -> Self {
        let mut rows = vec![0.0f32; k_size * k_size];
        let mut cols = vec![0.0f32; k_size * k_size];
        for i in 0..k_size {
            for j in 0..k_size {
                rows[i * k_size + j] = i as f32;
                cols[i * k_size + j] = j as f32;
            }
        }

        let stride = (1.0 / scale_factor).round();
        let wanted = (k_size / 2) as f32 + 0.5 * (stride - (k_size % 2) as f32);

        Self {
            row_grid: Tensor::new(&rows, &[k_size, k_size]),
            col_grid: Tensor::new(&cols, &[k_size, k_size]),
            center: Tensor::new(&[wanted], &[1]),
        }
    }

    /// MSE between the (row, col) center of mass and the wanted center.
    #[must_use]
    pub fn forward(&self, kernel: &Tensor) -> Tensor {
        let total = kernel.sum();
        let com_r = kernel.mul(&self.row_grid).sum().div(&total);
        let com_c = kernel.mul(&self.col_grid).sum().div(&total);

        let dr = com_r.sub(&self.center).pow(2.0);
        let dc = com_c.sub(&self.center).pow(2.0);
        dr.add(&dc).mul_scalar(0.5)
    }
}

/// Penalizes non-sparse kernels: small values are expensive relative to
/// their mass under a sub-linear power.
pub struct SparsityLoss;

impl SparsityLoss {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// `mean(|kernel|^0.2)`
    #[must_use]
    pub fn forward(&self, kernel: &Tensor) -> Tensor {
        kernel.abs().pow(SPARSITY_POWER).mean()
    }
}

impl Default for SparsityLoss {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Center-crop a [N, C, H, W] tensor to the given spatial size. Applied
/// only to constant branches, so no gradient bookkeeping is needed.
fn shave_to(t: &Tensor, h: usize, w: usize) -> Tensor {
    let (n, c, th, tw) = (t.shape()[0], t.shape()[1], t.shape()[2], t.shape()[3]);
    assert!(th >= h && tw >= w, "shave_to: target larger than source");
    let off_h = (th - h) / 2;
    let off_w = (tw - w) / 2;

    let src = t.data();
    let mut out = vec![0.0f32; n * c * h * w];
    for b in 0..n {
        for ch in 0..c {
            for i in 0..h {
                for j in 0..w {
                    out[((b * c + ch) * h + i) * w + j] =
                        src[((b * c + ch) * th + i + off_h) * tw + j + off_w];
                }
            }
        }
    }
    Tensor::new(&out, &[n, c, h, w])
}

/// 1-D bicubic (Keys, a = -0.5) anti-aliasing taps for integer-stride
/// downscaling, normalized to sum 1.
fn bicubic_taps(stride: usize) -> Vec<f32> {
    let n = 4 * stride;
    let center = (n as f32 - 1.0) / 2.0;

    let cubic = |x: f32| -> f32 {
        let x = x.abs();
        if x <= 1.0 {
            1.5 * x.powi(3) - 2.5 * x.powi(2) + 1.0
        } else if x < 2.0 {
            -0.5 * (x.powi(3) - 5.0 * x.powi(2) + 8.0 * x - 4.0)
        } else {
            0.0
        }
    };

    let mut taps: Vec<f32> = (0..n)
        .map(|i| cubic((i as f32 - center) / stride as f32))
        .collect();
    let total: f32 = taps.iter().sum();
    for t in &mut taps {
        *t /= total;
    }
    taps
}

/// Inverted-gaussian boundary mask: zero inside a center window,
/// rising toward the edges, scaled by `penalty`.
fn penalty_mask(k_size: usize, penalty: f32) -> Vec<f32> {
    let center = (k_size as f32 - 1.0) / 2.0;
    let sigma = k_size as f32;

    let mut mask: Vec<f32> = (0..k_size * k_size)
        .map(|idx| {
            let (i, j) = (idx / k_size, idx % k_size);
            let d2 = (i as f32 - center).powi(2) + (j as f32 - center).powi(2);
            (-d2 / (2.0 * sigma * sigma)).exp()
        })
        .collect();

    let max = mask.iter().fold(0.0f32, |m, &v| m.max(v));
    for v in &mut mask {
        *v = penalty * (1.0 - *v / max);
    }

    let center_size = k_size / 2 + k_size % 2;
    let margin = (k_size - center_size) / 2;
    let margin = margin.saturating_sub(1);
    if margin > 0 {
        for i in margin..k_size - margin {
            for j in margin..k_size - margin {
                mask[i * k_size + j] = 0.0;
            }
        }
    }
    mask
}
