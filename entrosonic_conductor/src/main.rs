// CLI entry point for an entropy-driven performance.
//
// Loads an entropy sequence, plans the performance and plays it against the
// command-log engine on the wall clock. With `--record` the command log is
// rendered to a MIDI file at shutdown; with `--plan-out` the plan is written
// as JSON before playback starts. Ctrl-C stops the performance between fade
// steps and shuts the engine down cleanly.
//
// Usage:
//   perform <ENTROPY_JSON> [OPTIONS]
//     --config <PATH>        JSON config (defaults for anything missing)
//     --seed <N>             Generator seed (random if absent)
//     --granular <N>         Granular instruments (default: 3)
//     --clouds <N>           Clouds (default: 1)
//     --middle <MIDI>        Cloud window center (default: 60)
//     --std <N>              Cloud window half-width (default: 8)
//     --raw                  Input is raw statistics; normalize it first
//     --no-shuffle           Keep the input order
//     --no-normalize         Evenly spaced thresholds
//     --record <PATH>        Write a MIDI rendering of the performance
//     --plan-out <PATH>      Write the plan as JSON
//     --time-scale <X>       Multiply every delay (default: 1.0)
//     -v, --verbose          Debug logging

use anyhow::{Context, Result};
use clap::Parser;
use entrosonic_conductor::config::ConductorConfig;
use entrosonic_conductor::driver::Driver;
use entrosonic_conductor::engine::CommandLogEngine;
use entrosonic_conductor::entropy::EntropySequence;
use entrosonic_conductor::error::ConductorError;
use entrosonic_conductor::fade::SystemClock;
use entrosonic_conductor::instrument::InstrumentRegistry;
use entrosonic_conductor::plan::PerformancePlan;
use entrosonic_prng::ConductorRng;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON array of entropy values
    entropy: PathBuf,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    seed: Option<u64>,

    /// Number of granular instruments
    #[arg(long)]
    granular: Option<usize>,

    /// Number of clouds
    #[arg(long)]
    clouds: Option<usize>,

    /// Center of the cloud pitch window (MIDI note)
    #[arg(long)]
    middle: Option<i32>,

    /// Half-width of the cloud pitch window
    #[arg(long)]
    std: Option<i32>,

    /// Treat the input as raw statistics and rescale it into [0, 1]
    #[arg(long)]
    raw: bool,

    #[arg(long)]
    no_shuffle: bool,

    #[arg(long)]
    no_normalize: bool,

    /// MIDI file to render the performance into
    #[arg(long)]
    record: Option<PathBuf>,

    /// Write the performance plan as JSON
    #[arg(long)]
    plan_out: Option<PathBuf>,

    /// Multiplier applied to every delay
    #[arg(long)]
    time_scale: Option<f64>,

    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Layer the command-line flags over a loaded config.
    fn apply(&self, config: &mut ConductorConfig) {
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if let Some(n) = self.granular {
            config.instruments.granular = n;
        }
        if let Some(n) = self.clouds {
            config.instruments.clouds = n;
        }
        if let Some(middle) = self.middle {
            config.pitch.middle = middle;
        }
        if let Some(std) = self.std {
            config.pitch.std = std;
        }
        if self.no_shuffle {
            config.shuffle = false;
        }
        if self.no_normalize {
            config.thresholds.normalize = false;
        }
        if let Some(path) = &self.record {
            config.record = Some(path.clone());
        }
        if let Some(scale) = self.time_scale {
            config.timing.time_scale = scale;
        }
    }
}

fn load_entropy(args: &Args) -> Result<EntropySequence> {
    let entropy = if args.raw {
        EntropySequence::load_raw_json(&args.entropy)?
    } else {
        EntropySequence::load_json(&args.entropy)?
    };
    Ok(entropy)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &args.config {
        Some(path) => ConductorConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ConductorConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    let seed = config.seed.unwrap_or_else(rand::random);
    info!(seed, "seeding generator");
    let mut rng = ConductorRng::new(seed);

    let mut entropy = load_entropy(&args)
        .with_context(|| format!("loading entropy from {}", args.entropy.display()))?;
    if config.shuffle {
        entropy = entropy.shuffled(&mut rng);
    }

    let registry =
        InstrumentRegistry::build(config.instruments.granular, config.instruments.clouds, &mut rng);
    let plan = PerformancePlan::build(
        entropy,
        &registry.kinds(),
        config.thresholds.normalize,
        &mut rng,
    );
    if let Some(path) = &args.plan_out {
        plan.save(path)
            .with_context(|| format!("writing plan to {}", path.display()))?;
        info!(path = %path.display(), "plan written");
    }

    let stop = Arc::new(AtomicBool::new(false));
    let stop_for_ctrlc = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        stop_for_ctrlc.store(true, Ordering::SeqCst);
    })
    .context("installing Ctrl-C handler")?;

    let clock = SystemClock::new();
    let catalog = config.samples.catalog();
    let mut driver = Driver::new(
        CommandLogEngine::new(clock),
        clock,
        catalog,
        registry,
        plan,
        config,
    )?
    .with_stop_flag(stop);

    match driver.perform(&mut rng) {
        Ok(()) => {}
        Err(ConductorError::Cancelled) => info!("performance cancelled"),
        Err(err) => return Err(err).context("performance failed"),
    }
    info!(commands = driver.engine().log().len(), "done");
    Ok(())
}
