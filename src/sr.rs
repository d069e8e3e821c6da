//! Downstream super-resolution step.
//!
//! Once the kernel is finalized the estimator hands it, together with
//! the full input image, to a [`SuperResolver`]. The built-in resolver
//! is a plain bicubic upscaler; degradation-aware backends plug in
//! through the same trait.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{ImageBuffer, Rgb};

use crate::data::Image;
use crate::error::Result;

/// Restores a high-resolution image given the estimated kernel.
pub trait SuperResolver {
    /// Upscale `image` by `sr_factor` and write the result under
    /// `output_dir`, returning the file written. `kernel` is the
    /// finalized row-major estimate, available to backends that model
    /// the degradation.
    fn run(
        &self,
        image: &Image,
        kernel: &[f32],
        k_size: usize,
        sr_factor: usize,
        output_dir: &Path,
        stem: &str,
    ) -> Result<PathBuf>;
}

/// Bicubic upscaler. Ignores the kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct BicubicUpscaler;

impl SuperResolver for BicubicUpscaler {
    fn run(
        &self,
        image: &Image,
        _kernel: &[f32],
        _k_size: usize,
        sr_factor: usize,
        output_dir: &Path,
        stem: &str,
    ) -> Result<PathBuf> {
        let (h, w) = (image.height(), image.width());
        let buffer = to_rgb8(image);
        let upscaled = image::imageops::resize(
            &buffer,
            (w * sr_factor) as u32,
            (h * sr_factor) as u32,
            FilterType::CatmullRom,
        );

        std::fs::create_dir_all(output_dir)?;
        let path = output_dir.join(format!("{stem}_x{sr_factor}.png"));
        upscaled.save(&path)?;
        Ok(path)
    }
}

/// No-op resolver for runs that only want the kernel file.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSuperResolution;

impl SuperResolver for NoSuperResolution {
    fn run(
        &self,
        _image: &Image,
        _kernel: &[f32],
        _k_size: usize,
        _sr_factor: usize,
        output_dir: &Path,
        stem: &str,
    ) -> Result<PathBuf> {
        Ok(output_dir.join(stem.to_string()))
    }
}

fn to_rgb8(image: &Image) -> ImageBuffer<Rgb<u8>, Vec<u8>> {
    let (h, w) = (image.height(), image.width());
    let hw = h * w;
    let data = image.data();

    ImageBuffer::from_fn(w as u32, h as u32, |x, y| {
        let idx = y as usize * w + x as usize;
        let to_byte = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        Rgb([
            to_byte(data[idx]),
            to_byte(data[hw + idx]),
            to_byte(data[2 * hw + idx]),
        ])
    })
}
