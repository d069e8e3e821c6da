//! Run configuration: paths, architecture sizes, learning rates, and
//! constraint weights, loadable from YAML with per-field defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EstimarError, Result};
use crate::model::Generator;

/// Full configuration for one kernel-estimation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Image whose kernel is being estimated.
    pub input_image: PathBuf,

    /// Directory for the kernel file and any restored output.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Optional ground-truth kernel for PSNR monitoring.
    #[serde(default)]
    pub ground_truth_kernel: Option<PathBuf>,

    /// Side of the crop fed to the generator.
    #[serde(default = "default_input_crop_size")]
    pub input_crop_size: usize,

    /// Side of the estimated kernel.
    #[serde(default = "default_g_kernel_size")]
    pub g_kernel_size: usize,

    /// Downscaling factor the generator learns (0.5 for x2).
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f32,

    /// Generator conv kernel sizes, first to last.
    #[serde(default = "default_g_structure")]
    pub g_structure: Vec<usize>,

    /// Hidden channels in the generator.
    #[serde(default = "default_channels")]
    pub g_channels: usize,

    /// Hidden channels in the discriminator.
    #[serde(default = "default_channels")]
    pub d_channels: usize,

    /// Receptive field of the discriminator's first layer.
    #[serde(default = "default_d_kernel_size")]
    pub d_kernel_size: usize,

    /// Total conv layers in the discriminator.
    #[serde(default = "default_d_n_layers")]
    pub d_n_layers: usize,

    #[serde(default = "default_lr")]
    pub g_lr: f32,

    #[serde(default = "default_lr")]
    pub d_lr: f32,

    /// Adam first-moment decay.
    #[serde(default = "default_beta1")]
    pub beta1: f32,

    /// Training iterations (one G phase and one D phase each).
    #[serde(default = "default_max_iters")]
    pub max_iters: u64,

    /// Values below 0.75 times the n-th largest are zeroized when the
    /// kernel is finalized.
    #[serde(default = "default_n_filtering")]
    pub n_filtering: usize,

    /// RNG seed for weight init and crop sampling.
    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default = "default_lambda_sum2one")]
    pub lambda_sum2one: f32,

    #[serde(default = "default_lambda_bicubic")]
    pub lambda_bicubic: f32,

    #[serde(default = "default_lambda_boundaries")]
    pub lambda_boundaries: f32,

    #[serde(default = "default_lambda_centralized")]
    pub lambda_centralized: f32,

    #[serde(default = "default_lambda_sparse")]
    pub lambda_sparse: f32,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}
fn default_input_crop_size() -> usize {
    64
}
fn default_g_kernel_size() -> usize {
    13
}
fn default_scale_factor() -> f32 {
    0.5
}
fn default_g_structure() -> Vec<usize> {
    vec![7, 5, 3, 1, 1, 1]
}
fn default_channels() -> usize {
    64
}
fn default_d_kernel_size() -> usize {
    7
}
fn default_d_n_layers() -> usize {
    7
}
fn default_lr() -> f32 {
    2e-4
}
fn default_beta1() -> f32 {
    0.5
}
fn default_max_iters() -> u64 {
    3000
}
fn default_n_filtering() -> usize {
    40
}
fn default_lambda_sum2one() -> f32 {
    0.5
}
fn default_lambda_bicubic() -> f32 {
    5.0
}
fn default_lambda_boundaries() -> f32 {
    0.5
}
fn default_lambda_centralized() -> f32 {
    0.0
}
fn default_lambda_sparse() -> f32 {
    0.0
}

impl Config {
    /// Build a configuration for one image with every other field at
    /// its default.
    #[must_use]
    pub fn for_image(input_image: impl Into<PathBuf>) -> Self {
        Self {
            input_image: input_image.into(),
            output_dir: default_output_dir(),
            ground_truth_kernel: None,
            input_crop_size: default_input_crop_size(),
            g_kernel_size: default_g_kernel_size(),
            scale_factor: default_scale_factor(),
            g_structure: default_g_structure(),
            g_channels: default_channels(),
            d_channels: default_channels(),
            d_kernel_size: default_d_kernel_size(),
            d_n_layers: default_d_n_layers(),
            g_lr: default_lr(),
            d_lr: default_lr(),
            beta1: default_beta1(),
            max_iters: default_max_iters(),
            n_filtering: default_n_filtering(),
            seed: None,
            lambda_sum2one: default_lambda_sum2one(),
            lambda_bicubic: default_lambda_bicubic(),
            lambda_boundaries: default_lambda_boundaries(),
            lambda_centralized: default_lambda_centralized(),
            lambda_sparse: default_lambda_sparse(),
        }
    }

    /// Parse a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&text)
            .map_err(|e| EstimarError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency. Called before any model is built so
    /// an impossible run fails up front.
    pub fn validate(&self) -> Result<()> {
        if self.g_structure.is_empty() {
            return Err(EstimarError::Config(
                "g_structure must name at least one layer".into(),
            ));
        }
        if self.g_structure.iter().any(|&k| k == 0) {
            return Err(EstimarError::Config(
                "g_structure kernel sizes must be positive".into(),
            ));
        }

        let composed = Generator::composed_kernel_size(&self.g_structure);
        if composed != self.g_kernel_size {
            return Err(EstimarError::Config(format!(
                "g_structure composes to a {composed}x{composed} kernel but g_kernel_size is {}",
                self.g_kernel_size
            )));
        }

        let stride = (1.0 / self.scale_factor).round() as usize;
        if self.scale_factor <= 0.0 || self.scale_factor >= 1.0 || stride < 2 {
            return Err(EstimarError::Config(format!(
                "scale_factor {} is not a proper downscaling factor",
                self.scale_factor
            )));
        }

        let g_out = self.g_output_size();
        if g_out == 0 {
            return Err(EstimarError::Config(format!(
                "input_crop_size {} is too small for the generator's receptive field",
                self.input_crop_size
            )));
        }

        if self.d_n_layers < 3 {
            return Err(EstimarError::Config(
                "d_n_layers must be at least 3".into(),
            ));
        }
        if self.d_kernel_size == 0 || self.d_kernel_size % 2 == 0 {
            return Err(EstimarError::Config(format!(
                "d_kernel_size {} must be odd and positive",
                self.d_kernel_size
            )));
        }
        if g_out < self.d_kernel_size {
            return Err(EstimarError::Config(format!(
                "generator output {g_out} is smaller than d_kernel_size {}",
                self.d_kernel_size
            )));
        }

        if self.g_lr <= 0.0 || self.d_lr <= 0.0 {
            return Err(EstimarError::Config(
                "learning rates must be positive".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.beta1) {
            return Err(EstimarError::Config(format!(
                "beta1 {} must be in [0, 1)",
                self.beta1
            )));
        }
        if self.n_filtering == 0 || self.n_filtering > self.g_kernel_size * self.g_kernel_size {
            return Err(EstimarError::Config(format!(
                "n_filtering {} must be in 1..={}",
                self.n_filtering,
                self.g_kernel_size * self.g_kernel_size
            )));
        }

        Ok(())
    }

    /// Integer stride the generator's last layer applies.
    #[must_use]
    pub fn stride(&self) -> usize {
        (1.0 / self.scale_factor).round() as usize
    }

    /// Spatial side of the generator's output for `input_crop_size`.
    #[must_use]
    pub fn g_output_size(&self) -> usize {
        let mut size = self.input_crop_size;
        for (i, &k) in self.g_structure.iter().enumerate() {
            if size < k {
                return 0;
            }
            let stride = if i == self.g_structure.len() - 1 {
                self.stride()
            } else {
                1
            };
            size = (size - k) / stride + 1;
        }
        size
    }

    /// Spatial side of the discriminator's score map for the
    /// generator's output.
    #[must_use]
    pub fn d_output_size(&self) -> usize {
        self.g_output_size() - (self.d_kernel_size - 1)
    }

    /// Path of the kernel file `finish` writes.
    #[must_use]
    pub fn kernel_path(&self) -> PathBuf {
        let stem = self
            .input_image
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let x = self.stride();
        self.output_dir.join(format!("{stem}_kernel_x{x}.txt"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::for_image("im.png");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_shapes() {
        let config = Config::for_image("im.png");
        assert_eq!(config.stride(), 2);
        assert_eq!(config.g_output_size(), 26);
        assert_eq!(config.d_output_size(), 20);
    }

    #[test]
    fn test_structure_kernel_size_mismatch_rejected() {
        let mut config = Config::for_image("im.png");
        config.g_kernel_size = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_crop_too_small_rejected() {
        let mut config = Config::for_image("im.png");
        config.input_crop_size = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_upscaling_factor_rejected() {
        let mut config = Config::for_image("im.png");
        config.scale_factor = 2.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_overrides_merge_with_defaults() {
        let yaml = "input_image: pics/building.png\nmax_iters: 100\nseed: 7\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.input_image, PathBuf::from("pics/building.png"));
        assert_eq!(config.max_iters, 100);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.g_kernel_size, 13);
        assert_eq!(config.lambda_bicubic, 5.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = "input_image: a.png\nlerning_rate: 0.1\n";
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn test_kernel_path_uses_stem_and_stride() {
        let config = Config::for_image("pics/building.png");
        assert_eq!(
            config.kernel_path(),
            PathBuf::from("results/building_kernel_x2.txt")
        );
    }
}
