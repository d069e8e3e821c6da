//! Estimar CLI
//!
//! # Usage
//!
//! ```bash
//! # Estimate a kernel from config
//! estimar estimate config.yaml
//!
//! # Estimate with overrides
//! estimar estimate config.yaml --max-iters 1000 --seed 7
//!
//! # Estimate an image with default settings, no config file
//! estimar estimate --image pics/building.png
//!
//! # Validate config
//! estimar validate config.yaml
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use estimar::{
    Config, ConsoleMonitor, CropSampler, EstimarError, Image, KernelEstimator, Monitor,
    NoSuperResolution, NullMonitor, Result,
};

/// Estimar: blind kernel estimation for single-image super-resolution
#[derive(Parser, Debug)]
#[command(name = "estimar")]
#[command(version)]
#[command(about = "Estimates the downscaling kernel of a single image")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Suppress training diagnostics
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Estimate a kernel from a YAML configuration or a bare image
    Estimate(EstimateArgs),

    /// Validate a configuration file without training
    Validate(ValidateArgs),
}

#[derive(Parser, Debug)]
struct EstimateArgs {
    /// Path to YAML configuration file
    #[arg(value_name = "CONFIG", required_unless_present = "image")]
    config: Option<PathBuf>,

    /// Input image (with defaults for everything else)
    #[arg(short, long, conflicts_with = "config")]
    image: Option<PathBuf>,

    /// Override output directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Override training iterations
    #[arg(long)]
    max_iters: Option<u64>,

    /// Override RNG seed
    #[arg(long)]
    seed: Option<u64>,

    /// Write only the kernel file, skip the super-resolution step
    #[arg(long)]
    skip_sr: bool,
}

#[derive(Parser, Debug)]
struct ValidateArgs {
    /// Path to YAML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_command(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Estimate(args) => estimate(args, cli.quiet),
        Command::Validate(args) => validate(&args),
    }
}

fn estimate(args: EstimateArgs, quiet: bool) -> Result<()> {
    let mut config = match (&args.config, &args.image) {
        (Some(path), _) => Config::load(path)?,
        (None, Some(image)) => Config::for_image(image),
        (None, None) => {
            return Err(EstimarError::Config(
                "either a config file or --image is required".into(),
            ))
        }
    };

    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if let Some(iters) = args.max_iters {
        config.max_iters = iters;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    config.validate()?;

    let image = Image::load(&config.input_image)?;
    let mut sampler = CropSampler::new(&image, config.input_crop_size, config.seed)?;

    let mut console = ConsoleMonitor;
    let mut null = NullMonitor;
    let monitor: &mut dyn Monitor = if quiet { &mut null } else { &mut console };

    let mut estimator = KernelEstimator::new(config.clone(), monitor)?;
    if args.skip_sr {
        estimator = estimator.with_resolver(Box::new(NoSuperResolution));
    }

    for _ in 0..config.max_iters {
        let g_crop = sampler.sample(&image, config.input_crop_size);
        let d_crop = sampler.sample(&image, config.g_output_size());
        estimator.train(&g_crop, &d_crop)?;
    }

    estimator.finish(&image)?;
    if !quiet {
        println!("kernel written to {}", config.kernel_path().display());
    }
    Ok(())
}

fn validate(args: &ValidateArgs) -> Result<()> {
    let config = Config::load(&args.config)?;
    println!(
        "ok: {} -> {}x{} kernel, {} iterations",
        config.input_image.display(),
        config.g_kernel_size,
        config.g_kernel_size,
        config.max_iters
    );
    Ok(())
}
