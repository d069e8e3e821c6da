//! The kernel estimation loop.
//!
//! [`KernelEstimator`] owns the generator/discriminator pair, one Adam
//! optimizer per model, and the loss evaluators. Each [`train`] call
//! runs one generator phase and one discriminator phase on a crop pair;
//! [`finish`] extracts and post-processes the kernel, writes it to
//! disk, and hands it to the downstream super-resolution step.
//!
//! [`train`]: KernelEstimator::train
//! [`finish`]: KernelEstimator::finish

use crate::autograd::{clear_graph, no_grad, Tensor};
use crate::config::Config;
use crate::data::Image;
use crate::error::{EstimarError, Result};
use crate::kernel;
use crate::losses::{
    BoundariesLoss, CentralizedLoss, DownScaleLoss, GanLoss, SparsityLoss, SumOfWeightsLoss,
};
use crate::model::{Discriminator, Generator};
use crate::monitor::Monitor;
use crate::nn::{Adam, Module, Optimizer};
use crate::sr::{BicubicUpscaler, SuperResolver};

/// Monitoring cadence: every n-th iteration reports.
const MONITOR_EVERY: u64 = 10;

/// Orchestrates adversarial training and kernel extraction for one
/// image.
pub struct KernelEstimator<'m> {
    config: Config,
    generator: Generator,
    discriminator: Discriminator,
    g_optimizer: Adam,
    d_optimizer: Adam,

    gan_loss: GanLoss,
    bicubic_loss: DownScaleLoss,
    sum2one_loss: SumOfWeightsLoss,
    boundaries_loss: BoundariesLoss,
    centralized_loss: CentralizedLoss,
    sparse_loss: SparsityLoss,

    /// Ground-truth kernel for PSNR reporting, when configured.
    ground_truth: Option<Tensor>,

    /// Latest raw kernel estimate, `[k, k]`, detached.
    curr_kernel: Tensor,
    last_bicubic: f32,
    iteration: u64,

    monitor: &'m mut dyn Monitor,
    resolver: Box<dyn SuperResolver>,
}

impl<'m> KernelEstimator<'m> {
    /// Build the estimator. Fails fast on an inconsistent configuration
    /// or an unreadable ground-truth kernel.
    pub fn new(config: Config, monitor: &'m mut dyn Monitor) -> Result<Self> {
        config.validate()?;

        let stride = config.stride();
        let mut generator = Generator::new(
            &config.g_structure,
            config.g_channels,
            stride,
            config.input_crop_size,
            config.seed,
        );
        let mut discriminator = Discriminator::new(
            config.d_channels,
            config.d_kernel_size,
            config.d_n_layers,
            config.seed.map(|s| s.wrapping_add(0x_d15c)),
        );

        let g_optimizer =
            Adam::new(generator.parameters_mut(), config.g_lr).betas(config.beta1, 0.999);
        let d_optimizer =
            Adam::new(discriminator.parameters_mut(), config.d_lr).betas(config.beta1, 0.999);

        let ground_truth = match &config.ground_truth_kernel {
            Some(path) => {
                let k = kernel::load_text(path)?;
                let expect = [config.g_kernel_size, config.g_kernel_size];
                if k.shape() != expect {
                    return Err(EstimarError::Kernel {
                        path: path.clone(),
                        reason: format!(
                            "expected a {}x{} kernel, found {:?}",
                            expect[0],
                            expect[1],
                            k.shape()
                        ),
                    });
                }
                Some(k)
            }
            None => None,
        };

        let gan_loss = GanLoss::new(config.d_output_size());
        let bicubic_loss = DownScaleLoss::new(config.scale_factor);
        let boundaries_loss = BoundariesLoss::new(config.g_kernel_size);
        let centralized_loss = CentralizedLoss::new(config.g_kernel_size, config.scale_factor);

        let curr_kernel = Tensor::zeros(&[config.g_kernel_size, config.g_kernel_size]);

        Ok(Self {
            config,
            generator,
            discriminator,
            g_optimizer,
            d_optimizer,
            gan_loss,
            bicubic_loss,
            sum2one_loss: SumOfWeightsLoss::new(),
            boundaries_loss,
            centralized_loss,
            sparse_loss: SparsityLoss::new(),
            ground_truth,
            curr_kernel,
            last_bicubic: 0.0,
            iteration: 0,
            monitor,
            resolver: Box::new(BicubicUpscaler),
        })
    }

    /// Replace the downstream super-resolution backend.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Box<dyn SuperResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// One full step: a generator phase on `g_input`, then a
    /// discriminator phase on the pair. Reports to the monitor every
    /// tenth iteration.
    pub fn train(&mut self, g_input: &Tensor, d_input: &Tensor) -> Result<()> {
        let loss_g = self.train_g(g_input)?;
        let loss_d = self.train_d(g_input, d_input)?;

        if self.iteration % MONITOR_EVERY == 0 {
            let it = self.iteration;
            self.monitor.scalar("loss_g", loss_g, it);
            self.monitor.scalar("loss_d", loss_d, it);
            self.monitor.scalar("loss_bicubic", self.last_bicubic, it);
            let k = self.config.g_kernel_size;
            self.monitor
                .image("kernel", self.curr_kernel.data(), k, k, it);
            // First channel of the crop is enough for visual inspection.
            let s = self.config.input_crop_size;
            self.monitor
                .image("g_input", &g_input.data()[..s * s], s, s, it);
            if let Some(psnr) = self.ground_truth_psnr() {
                self.monitor.scalar("kernel_psnr", psnr, it);
            }
        }

        self.iteration += 1;
        Ok(())
    }

    /// Generator phase: adversarial loss on the discriminator's score
    /// of the generated patch, plus the weighted constraint terms. Only
    /// generator parameters step.
    pub fn train_g(&mut self, g_input: &Tensor) -> Result<f32> {
        self.g_optimizer.zero_grad();

        let g_output = self.generator.forward(g_input);
        let d_pred_fake = self.discriminator.forward(&g_output);
        let loss_gan = self.gan_loss.forward(&d_pred_fake, true);
        let constraints = self.calc_constraints(g_input, &g_output);
        let total = loss_gan.add(&constraints);

        let value = total.item();
        if !value.is_finite() {
            clear_graph();
            return Err(EstimarError::Numeric {
                iteration: self.iteration,
            });
        }

        total.backward();
        let mut params = self.generator.parameters_mut();
        self.g_optimizer.step_with_params(&mut params);
        clear_graph();
        Ok(value)
    }

    /// Discriminator phase: real patch scored against the real label,
    /// generated patch (detached, so no gradient reaches the generator)
    /// against the fake label. Only discriminator parameters step.
    pub fn train_d(&mut self, g_input: &Tensor, d_input: &Tensor) -> Result<f32> {
        self.d_optimizer.zero_grad();

        let fake = self.generator.forward(g_input).detach();
        let d_pred_real = self.discriminator.forward(d_input);
        let d_pred_fake = self.discriminator.forward(&fake);

        let loss_real = self.gan_loss.forward(&d_pred_real, true);
        let loss_fake = self.gan_loss.forward(&d_pred_fake, false);
        let total = loss_real.add(&loss_fake).mul_scalar(0.5);

        let value = total.item();
        if !value.is_finite() {
            clear_graph();
            return Err(EstimarError::Numeric {
                iteration: self.iteration,
            });
        }

        total.backward();
        let mut params = self.discriminator.parameters_mut();
        self.d_optimizer.step_with_params(&mut params);
        clear_graph();
        Ok(value)
    }

    /// Weighted sum of the five constraint terms. Recomputes the
    /// current kernel estimate first so every term sees this step's
    /// weights, and keeps a detached copy for monitoring and `finish`.
    fn calc_constraints(&mut self, g_input: &Tensor, g_output: &Tensor) -> Tensor {
        let weights = self.generator.weights();
        let k = kernel::compose(&weights, self.config.g_kernel_size);
        self.curr_kernel = k.detach();

        let bicubic = self.bicubic_loss.forward(g_input, g_output);
        self.last_bicubic = bicubic.item();
        let sum2one = self.sum2one_loss.forward(&k);
        let boundaries = self.boundaries_loss.forward(&k);
        let centralized = self.centralized_loss.forward(&k);
        let sparse = self.sparse_loss.forward(&k);

        bicubic
            .mul_scalar(self.config.lambda_bicubic)
            .add(&sum2one.mul_scalar(self.config.lambda_sum2one))
            .add(&boundaries.mul_scalar(self.config.lambda_boundaries))
            .add(&centralized.mul_scalar(self.config.lambda_centralized))
            .add(&sparse.mul_scalar(self.config.lambda_sparse))
    }

    /// Finalize: post-process the current kernel estimate, write it as
    /// text, run the super-resolution step on the full image, and
    /// return the final kernel.
    pub fn finish(&mut self, image: &Image) -> Result<Tensor> {
        let k_size = self.config.g_kernel_size;
        let weights = self.generator.weights();
        let raw = no_grad(|| kernel::compose(&weights, k_size));
        self.curr_kernel = raw.detach();

        let final_kernel =
            kernel::post_process(&self.curr_kernel, self.config.n_filtering, self.config.stride());

        std::fs::create_dir_all(&self.config.output_dir)?;
        kernel::save_text(&final_kernel, &self.config.kernel_path())?;

        let stem = self
            .config
            .input_image
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        // The kernel file is already on disk; a failing SR backend
        // should not lose it.
        if let Err(e) = self.resolver.run(
            image,
            final_kernel.data(),
            k_size,
            self.config.stride(),
            &self.config.output_dir,
            &stem,
        ) {
            eprintln!("super-resolution step failed: {e}");
        }

        Ok(final_kernel)
    }

    /// Bicubic-consistency loss from the most recent generator phase.
    #[must_use]
    pub fn last_bicubic_loss(&self) -> f32 {
        self.last_bicubic
    }

    /// Latest raw (pre-post-processing) kernel estimate.
    #[must_use]
    pub fn current_kernel(&self) -> &Tensor {
        &self.curr_kernel
    }

    #[must_use]
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    /// Mutable access to the generator, for seeding hand-built weights.
    pub fn generator_mut(&mut self) -> &mut Generator {
        &mut self.generator
    }

    #[must_use]
    pub fn discriminator(&self) -> &Discriminator {
        &self.discriminator
    }

    /// PSNR between the current estimate and the ground-truth kernel.
    fn ground_truth_psnr(&self) -> Option<f32> {
        let gt = self.ground_truth.as_ref()?;
        let curr = self.curr_kernel.data();
        let mse: f32 = gt
            .data()
            .iter()
            .zip(curr.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            / gt.numel() as f32;
        if mse > 0.0 {
            Some(10.0 * (1.0 / mse).log10())
        } else {
            None
        }
    }
}
