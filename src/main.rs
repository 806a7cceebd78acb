use clap::{Args, Parser, Subcommand};
use imetad_rs::*;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "imetad",
    version,
    about = "Rate constants from infrequent metadynamics runs"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract transition times from every run and store them as .npy arrays.
    Extract(Options),
    /// Fit the stored transition times and report the escape rate.
    Estimate(Options),
    /// Extract, then estimate.
    Analyze(Options),
}

#[derive(Args, Debug)]
struct Options {
    /// TOML configuration file; flags below override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Number of runs in the batch.
    #[arg(long)]
    runs: Option<usize>,
    /// Simulation temperature in Kelvin.
    #[arg(long)]
    temperature: Option<f64>,
    /// Directory containing the run directories.
    #[arg(long)]
    input_dir: Option<PathBuf>,
    /// Directory for the .npy arrays.
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Seed for the synthetic sample of the KS test.
    #[arg(long)]
    seed: Option<u64>,
    /// Size of the synthetic sample of the KS test.
    #[arg(long)]
    synthetic_samples: Option<usize>,
    /// Leave failed runs out of the ensemble instead of aborting.
    #[arg(long)]
    exclude_failed: bool,
    /// Also write the rate estimate as JSON to this file.
    #[arg(long)]
    json: Option<PathBuf>,
}

impl Options {
    fn config(&self) -> Result<AnalysisConfig> {
        let mut builder = match &self.config {
            Some(path) => AnalysisConfigBuilder::from_toml_file(path)?,
            None => AnalysisConfig::builder(),
        };
        if let Some(runs) = self.runs {
            builder.runs(runs);
        }
        if let Some(temperature) = self.temperature {
            builder.temperature(temperature);
        }
        if let Some(dir) = &self.input_dir {
            builder.input_dir(dir.clone());
        }
        if let Some(dir) = &self.output_dir {
            builder.output_dir(dir.clone());
        }
        if let Some(seed) = self.seed {
            builder.seed(seed);
        }
        if let Some(n) = self.synthetic_samples {
            builder.synthetic_samples(n);
        }
        if self.exclude_failed {
            builder.failure_policy(FailurePolicy::Exclude);
        }
        builder.build()
    }

    fn report(&self, estimate: &RateEstimate) -> Result<()> {
        println!("{}", estimate);
        if let Some(path) = &self.json {
            std::fs::write(path, estimate.to_json()?)?;
        }
        Ok(())
    }
}

fn print_batch(batch: &Batch) {
    for result in &batch.results {
        println!(
            "run {:>4}  escape {:>12.3} ps  rescaled {:.3e} s  alpha {:.3e}  {:?}",
            result.run,
            result.unscaled_time,
            result.rescaled_time,
            result.alpha,
            result.direction
        );
    }
    for failure in &batch.failures {
        println!("excluded: {}", failure);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Extract(opts) => {
            let batch = extract_and_save(&opts.config()?)?;
            print_batch(&batch);
        }
        Command::Estimate(opts) => {
            let estimate = estimate_from_saved(&opts.config()?)?;
            opts.report(&estimate)?;
        }
        Command::Analyze(opts) => {
            let (batch, estimate) = analyze(&opts.config()?)?;
            print_batch(&batch);
            opts.report(&estimate)?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
