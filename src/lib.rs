//! Estimar: blind estimation of an image's downscaling kernel.
//!
//! Estimar recovers the blur kernel that relates a single image to its
//! lower-resolution self, by training a linear convolutional generator
//! against a patch discriminator on crops of that one image. The
//! generator's layers compose, algebraically, into one explicit kernel
//! matrix; constraint losses keep that kernel physically plausible
//! while the adversarial loss keeps the downscaled patches looking
//! like the image's own patch distribution.
//!
//! # Quick Start
//!
//! ```no_run
//! use estimar::{Config, CropSampler, Image, KernelEstimator, NullMonitor};
//!
//! # fn main() -> estimar::Result<()> {
//! let config = Config::for_image("pics/building.png");
//! let image = Image::load(&config.input_image)?;
//! let mut sampler = CropSampler::new(&image, config.input_crop_size, config.seed)?;
//!
//! let mut monitor = NullMonitor;
//! let mut estimator = KernelEstimator::new(config.clone(), &mut monitor)?;
//! for _ in 0..config.max_iters {
//!     let g_crop = sampler.sample(&image, config.input_crop_size);
//!     let d_crop = sampler.sample(&image, config.g_output_size());
//!     estimator.train(&g_crop, &d_crop)?;
//! }
//! let kernel = estimator.finish(&image)?;
//! assert_eq!(kernel.shape(), &[13, 13]);
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`autograd`]: Tape-based reverse-mode automatic differentiation
//! - [`nn`]: Layers, weight init, and the Adam optimizer
//! - [`model`]: The generator/discriminator pair
//! - [`losses`]: Adversarial and constraint loss evaluators
//! - [`kernel`]: Kernel extraction, post-processing, and persistence
//! - [`estimator`]: The training orchestrator
//! - [`config`]: Run configuration (YAML)
//! - [`data`]: Image loading and gradient-weighted crop sampling
//! - [`monitor`]: Training diagnostics sinks
//! - [`sr`]: Downstream super-resolution step

pub mod autograd;
pub mod config;
pub mod data;
pub mod error;
pub mod estimator;
pub mod kernel;
pub mod losses;
pub mod model;
pub mod monitor;
pub mod nn;
pub mod sr;

pub use autograd::Tensor;
pub use config::Config;
pub use data::{CropSampler, Image};
pub use error::{EstimarError, Result};
pub use estimator::KernelEstimator;
pub use model::{Discriminator, Generator};
pub use monitor::{ConsoleMonitor, Monitor, NullMonitor};
pub use sr::{BicubicUpscaler, NoSuperResolution, SuperResolver};
