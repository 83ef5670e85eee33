//! heliograph CLI entry point.
//!
//! Forward synthesis and inversion of polarized spectral lines from a TOML
//! model file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use helio_core::{Observation, ObservationPixel, Spectrum, N_STOKES};
use helio_pipeline::{configure, write_results, write_spectra, BatchIterator, ExecutionMode, Model, ModelConfig};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// heliograph version from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Noise level written to observation files when none is injected
const DEFAULT_SIGMA: f64 = 1e-3;

#[derive(Parser, Debug)]
#[command(name = "helio")]
#[command(version = VERSION)]
#[command(about = "Polarized spectral-line synthesis and inversion", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Synthesize the emergent Stokes spectra of a model
    Synth(SynthArgs),
    /// Invert observations against a model
    Invert(InvertArgs),
    /// Validate a model file and print its resolved form
    Check {
        /// Model file (TOML)
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(Args, Debug)]
struct SynthArgs {
    /// Model file (TOML)
    #[arg(short, long)]
    config: PathBuf,

    /// Gaussian noise standard deviation added to every Stokes sample
    #[arg(long, default_value = "0.0")]
    noise: f64,

    /// Seed of the noise generator
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Spectra archive
    #[arg(short, long, default_value = "synth.npz")]
    output: PathBuf,

    /// Also write observation files (`<region>.1d`, `.wavelength`,
    /// `.weights`) into this directory
    #[arg(long)]
    observation_dir: Option<PathBuf>,

    /// Noisy realizations to write as `<region>_stokes.npz` cubes
    #[arg(long, default_value = "1")]
    pixels: usize,

    /// Estimate the written sigma from the spread of the first N Stokes I
    /// samples of each region instead of the injected noise level
    #[arg(long, value_name = "N")]
    sigma_from_continuum: Option<usize>,
}

#[derive(Args, Debug)]
struct InvertArgs {
    /// Model file (TOML)
    #[arg(short, long)]
    config: PathBuf,

    /// Observation file for a single-region model, overriding the model file
    #[arg(long)]
    observation: Option<PathBuf>,

    /// Partition pixels over worker threads
    #[arg(long)]
    parallel: bool,

    /// Worker threads in parallel mode (0 = one per core)
    #[arg(long)]
    workers: Option<usize>,

    /// Result archive
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSONL telemetry file
    #[arg(long)]
    telemetry: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    log::info!("heliograph {} - Starting", VERSION);

    match cli.command {
        Command::Synth(args) => run_synth(&args),
        Command::Invert(args) => run_invert(args),
        Command::Check { config } => run_check(&config),
    }
}

fn load(path: &Path) -> Result<(ModelConfig, Model)> {
    let config = ModelConfig::from_file(path)
        .map_err(|e| anyhow::anyhow!(e.user_message()))
        .with_context(|| format!("Failed to load model file {}", path.display()))?;
    let model = configure(&config)
        .map_err(|e| anyhow::anyhow!(e.user_message()))
        .with_context(|| format!("Invalid model in {}", path.display()))?;
    Ok((config, model))
}

fn run_check(path: &Path) -> Result<()> {
    let (config, model) = load(path)?;
    for (region, plan) in model.regions().iter().zip(model.topology().plans()) {
        log::info!(
            "Region '{}': {} points, topology {}",
            region.name(),
            region.n_wvl(),
            plan.expression()
        );
    }
    let schema = model.schema();
    for cycle in 0..schema.n_cycles() {
        let free: Vec<String> = schema.free_slots(cycle).into_iter().map(|s| schema.label(s)).collect();
        log::info!("Cycle {}: free = [{}]", cycle, free.join(", "));
    }
    println!("{}", config.to_toml()?);
    Ok(())
}

fn run_synth(args: &SynthArgs) -> Result<()> {
    if args.pixels == 0 {
        bail!("--pixels must be at least 1");
    }
    let (_, model) = load(&args.config)?;
    let clean = model.synthesize().context("Forward synthesis failed")?;

    let mut rng = StdRng::seed_from_u64(args.seed);
    let realizations = (0..args.pixels)
        .map(|_| {
            clean
                .iter()
                .map(|s| s.with_noise(args.noise, &mut rng))
                .collect::<helio_core::Result<Vec<Spectrum>>>()
        })
        .collect::<helio_core::Result<Vec<_>>>()?;

    let path = write_spectra(&args.output, &realizations[0])?;
    log::info!("Spectra written to: {}", path.display());

    if let Some(dir) = &args.observation_dir {
        write_observations(dir, &model, &realizations, args)?;
    }
    Ok(())
}

/// Writes the files `invert` reads back for each region.
fn write_observations(dir: &Path, model: &Model, realizations: &[Vec<Spectrum>], args: &SynthArgs) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    for (k, region) in model.regions().iter().enumerate() {
        let name = region.name();
        let sigma = observation_sigma(&realizations[0][k], args);
        log::info!("Region '{}': sigma = {:.3e}", name, sigma);
        helio_io::write_wavelength(dir.join(format!("{}.wavelength", name)), region.wavelength())?;
        helio_io::write_weights(
            dir.join(format!("{}.weights", name)),
            Array2::ones((region.n_wvl(), N_STOKES)).view(),
        )?;

        let pixels: Vec<ObservationPixel> = realizations
            .iter()
            .map(|spectra| {
                let stokes = spectra[k].stokes.clone();
                let sigma = Array2::from_elem(stokes.raw_dim(), sigma);
                ObservationPixel::new(stokes, sigma, *region.los(), region.boundary().clone())
            })
            .collect();
        if pixels.len() == 1 {
            helio_io::write_single_pixel(dir.join(format!("{}.1d", name)), &pixels[0])?;
        } else {
            helio_io::write_pixels(dir.join(format!("{}_stokes.npz", name)), &pixels)?;
        }
    }
    log::info!("Observation files written to: {}", dir.display());
    Ok(())
}

/// Noise level written next to a synthesized spectrum. A flat or too short
/// continuum falls back to the injected level.
fn observation_sigma(spectrum: &Spectrum, args: &SynthArgs) -> f64 {
    let estimate = args.sigma_from_continuum.map_or(0.0, |n| spectrum.continuum_noise(n));
    if estimate > 0.0 {
        estimate
    } else if args.noise > 0.0 {
        args.noise
    } else {
        DEFAULT_SIGMA
    }
}

/// Reads one region's observation file: an `.npz` cube or a single pixel.
fn read_region_pixels(path: &Path) -> Result<Vec<ObservationPixel>> {
    let pixels = match path.extension().and_then(|e| e.to_str()) {
        Some("npz") => helio_io::read_pixels(path)?,
        _ => vec![helio_io::read_single_pixel(path)?],
    };
    log::info!("Read {} pixel(s) from {}", pixels.len(), path.display());
    Ok(pixels)
}

fn run_invert(args: InvertArgs) -> Result<()> {
    let (mut config, model) = load(&args.config)?;

    let mut per_region: BTreeMap<String, Vec<ObservationPixel>> = BTreeMap::new();
    if let Some(path) = &args.observation {
        if config.regions.len() != 1 {
            bail!("--observation needs a single-region model, this one has {}", config.regions.len());
        }
        per_region.insert(config.regions[0].name.clone(), read_region_pixels(path)?);
    } else {
        for region in &config.regions {
            let Some(path) = &region.observation_file else {
                bail!("region '{}' has no observation_file", region.name);
            };
            per_region.insert(region.name.clone(), read_region_pixels(path)?);
        }
    }

    let n_pixels = per_region.values().map(Vec::len).max().unwrap_or(0);
    if let Some((name, pixels)) = per_region.iter().find(|(_, p)| p.len() != n_pixels) {
        bail!(
            "region '{}' has {} pixel(s), other regions have {}",
            name,
            pixels.len(),
            n_pixels
        );
    }
    let observations: Vec<Observation> = (0..n_pixels)
        .map(|i| {
            let mut observation = Observation::new();
            for (name, pixels) in &per_region {
                observation.insert(name.clone(), pixels[i].clone());
            }
            observation
        })
        .collect();

    if args.parallel {
        config.batch.mode = ExecutionMode::Parallel;
    }
    if let Some(workers) = args.workers {
        config.batch.workers = workers;
    }
    if let Some(path) = args.telemetry {
        config.batch.telemetry_path = Some(path);
    }
    let output = args
        .output
        .or_else(|| config.batch.output.clone())
        .unwrap_or_else(|| PathBuf::from("inversion.npz"));

    let outcome = BatchIterator::from_config(&model, &config.batch)
        .run(&observations)
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    for batch in &outcome.batches {
        match batch.best() {
            Some(best) => log::info!(
                "Pixel {}: best chi2 = {:.4e} (reduced {:.3}) from restart {}",
                batch.pixel_index,
                best.chi_square,
                best.reduced_chi_square,
                best.restart_index
            ),
            None => log::warn!("Pixel {}: every restart failed", batch.pixel_index),
        }
    }

    let path = write_results(&output, &model, &outcome.batches)?;
    log::info!("Results written to: {}", path.display());
    Ok(())
}
