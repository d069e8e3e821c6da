//! Explicit kernel extraction, post-processing and persistence.
//!
//! The generator is linear, so its whole forward pass (ignoring the
//! final subsampling) equals a single convolution with some kernel.
//! [`compose`] recovers that kernel exactly by pushing a unit impulse
//! through the layer weights.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::autograd::Tensor;
use crate::error::{EstimarError, Result};

/// Compose an ordered sequence of convolution weights into the single
/// equivalent 2D kernel.
///
/// Starts from a 1x1 unit impulse, convolves it with the first layer's
/// weights using padding `kernel_size - 1` to open up spatial extent,
/// then with each subsequent layer's weights unpadded, always at stride
/// 1 regardless of the forward stride of any layer. Composing
/// cross-correlations in forward order yields the kernel mirrored
/// relative to the true spatial kernel, so the result is flipped along
/// both axes before being squeezed to `[kernel_size, kernel_size]`.
///
/// The whole computation is differentiable: constraint losses evaluated
/// on the result backpropagate into the layer weights.
///
/// # Panics
///
/// Panics if the padding arithmetic doesn't close at `kernel_size`,
/// i.e. `1 + sum(k_i - 1)` of the weight sequence differs from
/// `kernel_size`. Callers validate this at construction.
#[must_use]
pub fn compose(weights: &[&Tensor], kernel_size: usize) -> Tensor {
    let delta = Tensor::new(&[1.0], &[1, 1, 1, 1]);

    let mut curr = delta;
    for (i, w) in weights.iter().enumerate() {
        let pad = if i == 0 { kernel_size - 1 } else { 0 };
        curr = curr.conv2d(w, (1, 1), (pad, pad));
    }

    assert_eq!(
        curr.shape()[2..],
        [kernel_size, kernel_size],
        "composed kernel size does not match the configured kernel size"
    );

    curr.flip_hw().view(&[kernel_size, kernel_size])
}

/// Post-process an estimated kernel: suppress negligible values and
/// force its center of mass onto the kernel center.
///
/// Values are measured against the `n_filtering`-th largest entry;
/// everything is lowered by 0.75 of that reference, clipped at zero and
/// renormalized to sum 1. The centering shift matches the alignment
/// convention of the downscaling: for scale factor 1/`stride` the
/// wanted center is `size / 2 + 0.5 * (stride - size % 2)`.
#[must_use]
pub fn post_process(kernel: &Tensor, n_filtering: usize, stride: usize) -> Tensor {
    let size = kernel.shape()[0];
    let significant = zeroize_negligible(kernel.data(), n_filtering);
    let mut shifted = shift_to_center(&significant, size, stride);

    // The interpolated shift can move mass across the border; restore
    // unit mass afterwards.
    let total: f32 = shifted.iter().sum();
    if total > 0.0 {
        for v in &mut shifted {
            *v /= total;
        }
    }
    Tensor::new(&shifted, &[size, size])
}

/// Lower all values by 0.75 of the n-th largest, clip at zero,
/// renormalize to sum 1.
fn zeroize_negligible(data: &[f32], n: usize) -> Vec<f32> {
    let mut sorted: Vec<f32> = data.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let reference = sorted[n.min(sorted.len() - 1)];
    let threshold = 0.75 * reference;

    let mut filtered: Vec<f32> = data.iter().map(|&v| (v - threshold).max(0.0)).collect();
    let total: f32 = filtered.iter().sum();
    if total > 0.0 {
        for v in &mut filtered {
            *v /= total;
        }
    }
    filtered
}

/// Shift the kernel (bilinear, zero fill) so its center of mass lands
/// on the wanted center.
fn shift_to_center(data: &[f32], size: usize, stride: usize) -> Vec<f32> {
    let (com_r, com_c) = center_of_mass(data, size);
    let wanted = (size / 2) as f32 + 0.5 * (stride as f32 - (size % 2) as f32);
    let (dy, dx) = (wanted - com_r, wanted - com_c);

    let sample = |r: f32, c: f32| -> f32 {
        let r0 = r.floor();
        let c0 = c.floor();
        let fr = r - r0;
        let fc = c - c0;
        let mut acc = 0.0;
        for (ri, wr) in [(r0, 1.0 - fr), (r0 + 1.0, fr)] {
            for (ci, wc) in [(c0, 1.0 - fc), (c0 + 1.0, fc)] {
                if ri >= 0.0 && ci >= 0.0 && (ri as usize) < size && (ci as usize) < size {
                    acc += wr * wc * data[ri as usize * size + ci as usize];
                }
            }
        }
        acc
    };

    let mut out = vec![0.0; size * size];
    for i in 0..size {
        for j in 0..size {
            out[i * size + j] = sample(i as f32 - dy, j as f32 - dx);
        }
    }
    out
}

/// Center of mass (row, col) of a square nonnegative matrix.
fn center_of_mass(data: &[f32], size: usize) -> (f32, f32) {
    let total: f32 = data.iter().sum();
    if total == 0.0 {
        let mid = (size as f32 - 1.0) / 2.0;
        return (mid, mid);
    }
    let mut r = 0.0;
    let mut c = 0.0;
    for i in 0..size {
        for j in 0..size {
            let v = data[i * size + j];
            r += i as f32 * v;
            c += j as f32 * v;
        }
    }
    (r / total, c / total)
}

/// Write a kernel as whitespace-separated rows of decimal floats.
///
/// The format round-trips through [`load_text`] and is stable: saving
/// the same kernel twice produces byte-identical files.
pub fn save_text(kernel: &Tensor, path: &Path) -> Result<()> {
    let size = kernel.shape()[0];
    let data = kernel.data();

    let mut out = String::new();
    for i in 0..size {
        for j in 0..size {
            if j > 0 {
                out.push(' ');
            }
            let _ = write!(out, "{:.18e}", data[i * size + j]);
        }
        out.push('\n');
    }

    fs::write(path, out)?;
    Ok(())
}

/// Read a square kernel from whitespace-separated numeric text.
pub fn load_text(path: &Path) -> Result<Tensor> {
    let text = fs::read_to_string(path)?;

    let mut rows: Vec<Vec<f32>> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let row: Vec<f32> = line
            .split_whitespace()
            .map(|tok| {
                tok.parse::<f32>().map_err(|_| EstimarError::Kernel {
                    path: path.to_path_buf(),
                    reason: format!("not a number: {tok:?}"),
                })
            })
            .collect::<Result<_>>()?;
        rows.push(row);
    }

    let size = rows.len();
    if size == 0 {
        return Err(EstimarError::Kernel {
            path: path.to_path_buf(),
            reason: "empty file".into(),
        });
    }
    if rows.iter().any(|r| r.len() != size) {
        return Err(EstimarError::Kernel {
            path: path.to_path_buf(),
            reason: "not a square matrix".into(),
        });
    }

    let data: Vec<f32> = rows.into_iter().flatten().collect();
    Ok(Tensor::new(&data, &[size, size]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::clear_graph;
    use approx::assert_relative_eq;

    /// Direct full convolution of two 2D kernels (the textbook
    /// definition the extractor must agree with).
    fn convolve_full(a: &[f32], an: usize, b: &[f32], bn: usize) -> Vec<f32> {
        let on = an + bn - 1;
        let mut out = vec![0.0; on * on];
        for i in 0..an {
            for j in 0..an {
                for p in 0..bn {
                    for q in 0..bn {
                        out[(i + p) * on + (j + q)] += a[i * an + j] * b[p * bn + q];
                    }
                }
            }
        }
        out
    }

    #[test]
    fn test_compose_two_3x3_layers() {
        clear_graph();
        let w0_data: Vec<f32> = (1..=9).map(|v| v as f32 / 10.0).collect();
        let w1_data: Vec<f32> = [0.5, 0.0, -0.5, 1.0, 0.25, -1.0, 0.0, 0.75, 0.1].to_vec();
        let w0 = Tensor::new(&w0_data, &[1, 1, 3, 3]);
        let w1 = Tensor::new(&w1_data, &[1, 1, 3, 3]);

        let composed = compose(&[&w0, &w1], 5);
        assert_eq!(composed.shape(), &[5, 5]);

        // Impulse -> cross-correlate -> final flip reduces algebraically
        // to the plain full convolution of the raw weight matrices:
        // flip(flip(w0) * flip(w1)) = w0 * w1.
        let expected = convolve_full(&w0_data, 3, &w1_data, 3);

        for (a, b) in composed.data().iter().zip(expected.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-5);
        }
        clear_graph();
    }

    #[test]
    fn test_compose_identity_layers_yield_centered_delta() {
        clear_graph();
        // Two 3x3 kernels, each with 1 at the center: composing them
        // must give a 5x5 delta at the center.
        let mut id3 = vec![0.0; 9];
        id3[4] = 1.0;
        let w0 = Tensor::new(&id3, &[1, 1, 3, 3]);
        let w1 = Tensor::new(&id3, &[1, 1, 3, 3]);

        let composed = compose(&[&w0, &w1], 5);
        let mut expected = vec![0.0; 25];
        expected[12] = 1.0;
        assert_eq!(composed.data(), &expected[..]);
        clear_graph();
    }

    #[test]
    fn test_compose_multichannel_reduces_to_sum() {
        clear_graph();
        // First layer 1 -> 2 channels, second 2 -> 1: the composed map
        // is the sum over the intermediate channel of the per-channel
        // compositions.
        let w0 = Tensor::new(&[1.0, 2.0], &[2, 1, 1, 1]);
        let w1 = Tensor::new(&[3.0, 5.0], &[1, 2, 1, 1]);

        let composed = compose(&[&w0, &w1], 1);
        assert_eq!(composed.shape(), &[1, 1]);
        assert_relative_eq!(composed.data()[0], 1.0 * 3.0 + 2.0 * 5.0);
        clear_graph();
    }

    #[test]
    fn test_post_process_normalizes_and_centers() {
        // Mass concentrated off-center
        let mut data = vec![0.0; 25];
        data[6] = 1.0; // (1, 1)
        let k = Tensor::new(&data, &[5, 5]);

        let processed = post_process(&k, 3, 2);
        let total: f32 = processed.data().iter().sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-5);

        let (r, c) = center_of_mass(processed.data(), 5);
        // size 5, stride 2: wanted center is 2 + 0.5*(2-1) = 2.5
        assert_relative_eq!(r, 2.5, epsilon = 1e-4);
        assert_relative_eq!(c, 2.5, epsilon = 1e-4);
    }

    #[test]
    fn test_zeroize_negligible_drops_small_values() {
        let data = [10.0, 9.0, 8.0, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1];
        let filtered = zeroize_negligible(&data, 3);
        // Threshold = 0.75 * 0.1; big values survive, tiny ones shrink
        // toward zero but everything stays nonnegative and normalized.
        assert!(filtered[0] > filtered[3]);
        assert!(filtered.iter().all(|&v| v >= 0.0));
        assert_relative_eq!(filtered.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("kernel.txt");

        let k = Tensor::new(&[0.1, 0.2, 0.3, 0.4], &[2, 2]);
        save_text(&k, &path).expect("save");
        let loaded = load_text(&path).expect("load");

        assert_eq!(loaded.shape(), &[2, 2]);
        for (a, b) in loaded.data().iter().zip(k.data().iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_save_is_deterministic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let p1 = dir.path().join("k1.txt");
        let p2 = dir.path().join("k2.txt");

        let k = Tensor::new(&[0.25, 0.25, 0.25, 0.25], &[2, 2]);
        save_text(&k, &p1).expect("save");
        save_text(&k, &p2).expect("save");

        let b1 = std::fs::read(&p1).expect("read");
        let b2 = std::fs::read(&p2).expect("read");
        assert_eq!(b1, b2);
    }

    #[test]
    fn test_load_rejects_ragged_matrix() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.txt");
        std::fs::write(&path, "1.0 2.0\n3.0\n").expect("write");

        assert!(matches!(
            load_text(&path),
            Err(crate::error::EstimarError::Kernel { .. })
        ));
    }
}
