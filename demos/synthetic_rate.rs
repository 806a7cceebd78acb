use anyhow::Result;
use imetad_rs::testsystems::PoissonEscape;
use imetad_rs::*;
use itertools::Itertools;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs::{create_dir_all, File};
use std::io::BufWriter;

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    // Lay out a batch of runs the way a production campaign would
    let workdir = tempfile::tempdir()?;
    let config = AnalysisConfig::builder()
        .runs(50)
        .input_dir(workdir.path())
        .output_dir(workdir.path().join("analysis"))
        .synthetic_samples(100_000)
        .seed(11)
        .build()?;

    // Unbiased lifetime of 20 ns, biased so runs cross within a few thousand steps
    let tau_ps = 20_000.0;
    let process = PoissonEscape::builder()
        .tau(tau_ps)
        .dt(0.2)
        .bias(15.0)
        .beta(config.beta())
        .build()?;
    println!("acceleration factor: {:.1}", process.acceleration());

    let mut rng = StdRng::seed_from_u64(11);
    for run in config.run_numbers() {
        let path = config.colvar_path(run);
        if let Some(dir) = path.parent() {
            create_dir_all(dir)?;
        }
        process.sample(&mut rng).write_colvar(BufWriter::new(File::create(path)?))?;
    }

    let (batch, estimate) = analyze(&config)?;
    println!(
        "observed escape times (ps): {}",
        batch
            .unscaled_times()
            .iter()
            .take(8)
            .map(|t| format!("{:.1}", t))
            .join(", ")
    );
    println!("{}", estimate);
    println!("true tau: {:.3e} s", tau_ps * config.time_unit_in_seconds());

    Ok(())
}
