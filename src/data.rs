//! Image loading and crop sampling.
//!
//! Training consumes random crops of one image. Crops are drawn with
//! probability proportional to local gradient magnitude, so flat sky
//! and texture-free regions (which carry no kernel information) are
//! rarely selected.

use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::autograd::Tensor;
use crate::error::{EstimarError, Result};

/// A decoded RGB image as planar f32 data in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct Image {
    /// `[3, height, width]`, channel-major.
    data: Vec<f32>,
    height: usize,
    width: usize,
}

impl Image {
    /// Decode an image file into planar float RGB.
    pub fn load(path: &Path) -> Result<Self> {
        let decoded = image::open(path)?.to_rgb8();
        let (w, h) = (decoded.width() as usize, decoded.height() as usize);

        let mut data = vec![0.0f32; 3 * h * w];
        for (x, y, pixel) in decoded.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                data[c * h * w + y * w + x] = f32::from(pixel.0[c]) / 255.0;
            }
        }

        Ok(Self {
            data,
            height: h,
            width: w,
        })
    }

    /// Build an image from planar `[3, height, width]` data.
    #[must_use]
    pub fn from_planar(data: Vec<f32>, height: usize, width: usize) -> Self {
        assert_eq!(data.len(), 3 * height * width, "planar data size mismatch");
        Self {
            data,
            height,
            width,
        }
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// The whole image as a `[1, 3, H, W]` tensor.
    #[must_use]
    pub fn to_tensor(&self) -> Tensor {
        Tensor::new(&self.data, &[1, 3, self.height, self.width])
    }

    /// A square crop as a `[1, 3, size, size]` tensor.
    #[must_use]
    pub fn crop_tensor(&self, top: usize, left: usize, size: usize) -> Tensor {
        assert!(
            top + size <= self.height && left + size <= self.width,
            "crop out of bounds"
        );
        let hw = self.height * self.width;
        let mut out = vec![0.0f32; 3 * size * size];
        for c in 0..3 {
            for i in 0..size {
                for j in 0..size {
                    out[c * size * size + i * size + j] =
                        self.data[c * hw + (top + i) * self.width + left + j];
                }
            }
        }
        Tensor::new(&out, &[1, 3, size, size])
    }

    /// Per-pixel gradient magnitude summed over channels, `[H, W]`
    /// row-major. Forward differences, zero at the last row/column.
    fn gradient_magnitude(&self) -> Vec<f32> {
        let (h, w) = (self.height, self.width);
        let hw = h * w;
        let mut g = vec![0.0f32; hw];
        for c in 0..3 {
            let plane = &self.data[c * hw..(c + 1) * hw];
            for i in 0..h {
                for j in 0..w {
                    let v = plane[i * w + j];
                    let dx = if j + 1 < w { plane[i * w + j + 1] - v } else { 0.0 };
                    let dy = if i + 1 < h { plane[(i + 1) * w + j] - v } else { 0.0 };
                    g[i * w + j] += dx.abs() + dy.abs();
                }
            }
        }
        g
    }
}

/// Draws crops centered on gradient-rich pixels.
pub struct CropSampler {
    /// Cumulative distribution over pixel indices, row-major.
    cdf: Vec<f32>,
    height: usize,
    width: usize,
    rng: StdRng,
}

impl CropSampler {
    /// Build the sampler for an image. `max_crop` is the largest crop
    /// the sampler will ever be asked for.
    pub fn new(image: &Image, max_crop: usize, seed: Option<u64>) -> Result<Self> {
        if image.height() < max_crop || image.width() < max_crop {
            return Err(EstimarError::Config(format!(
                "input image {}x{} is smaller than the {max_crop} pixel crop",
                image.height(),
                image.width()
            )));
        }

        // Floor weight keeps fully flat images samplable.
        let mut cdf = image.gradient_magnitude();
        let mut acc = 0.0f32;
        for v in &mut cdf {
            acc += *v + 1e-6;
            *v = acc;
        }

        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            cdf,
            height: image.height(),
            width: image.width(),
            rng,
        })
    }

    /// Sample a crop's top-left corner: draw a center pixel from the
    /// gradient distribution, then clamp so the crop stays in bounds.
    pub fn sample_top_left(&mut self, size: usize) -> (usize, usize) {
        let total = *self.cdf.last().unwrap_or(&1.0);
        let u: f32 = self.rng.gen::<f32>() * total;
        let idx = self.cdf.partition_point(|&c| c < u).min(self.cdf.len() - 1);

        let (cr, cc) = (idx / self.width, idx % self.width);
        let top = cr.saturating_sub(size / 2).min(self.height - size);
        let left = cc.saturating_sub(size / 2).min(self.width - size);
        (top, left)
    }

    /// Sample a `[1, 3, size, size]` crop tensor from `image`.
    pub fn sample(&mut self, image: &Image, size: usize) -> Tensor {
        let (top, left) = self.sample_top_left(size);
        image.crop_tensor(top, left, size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn gradient_image() -> Image {
        // Left half flat, right half noisy checkerboard.
        let (h, w) = (32, 32);
        let mut data = vec![0.5f32; 3 * h * w];
        for c in 0..3 {
            for i in 0..h {
                for j in w / 2..w {
                    data[c * h * w + i * w + j] = if (i + j) % 2 == 0 { 0.0 } else { 1.0 };
                }
            }
        }
        Image::from_planar(data, h, w)
    }

    #[test]
    fn test_crop_tensor_shape_and_values() {
        let image = Image::from_planar(vec![0.25; 3 * 8 * 8], 8, 8);
        let crop = image.crop_tensor(2, 3, 4);
        assert_eq!(crop.shape(), &[1, 3, 4, 4]);
        assert_relative_eq!(crop.data()[0], 0.25);
    }

    #[test]
    fn test_sampler_rejects_small_image() {
        let image = Image::from_planar(vec![0.0; 3 * 16], 4, 4);
        assert!(CropSampler::new(&image, 64, Some(0)).is_err());
    }

    #[test]
    fn test_sampler_stays_in_bounds() {
        let image = gradient_image();
        let mut sampler = CropSampler::new(&image, 16, Some(3)).unwrap();
        for _ in 0..100 {
            let (top, left) = sampler.sample_top_left(16);
            assert!(top + 16 <= 32 && left + 16 <= 32);
        }
    }

    #[test]
    fn test_sampler_prefers_textured_regions() {
        let image = gradient_image();
        let mut sampler = CropSampler::new(&image, 8, Some(7)).unwrap();

        let mut right_half = 0;
        for _ in 0..200 {
            let (_, left) = sampler.sample_top_left(8);
            // Crops centered in the textured half start at column >= 8.
            if left >= 8 {
                right_half += 1;
            }
        }
        assert!(
            right_half > 150,
            "only {right_half}/200 crops hit the textured half"
        );
    }

    #[test]
    fn test_sampler_deterministic_with_seed() {
        let image = gradient_image();
        let mut a = CropSampler::new(&image, 16, Some(11)).unwrap();
        let mut b = CropSampler::new(&image, 16, Some(11)).unwrap();
        for _ in 0..20 {
            assert_eq!(a.sample_top_left(16), b.sample_top_left(16));
        }
    }

    #[test]
    fn test_flat_image_still_samples() {
        let image = Image::from_planar(vec![0.5; 3 * 32 * 32], 32, 32);
        let mut sampler = CropSampler::new(&image, 16, Some(1)).unwrap();
        let (top, left) = sampler.sample_top_left(16);
        assert!(top + 16 <= 32 && left + 16 <= 32);
    }
}
