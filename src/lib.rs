#![warn(rust_2018_idioms, missing_docs, missing_debug_implementations)]

//! Rate constants of rare events from infrequent metadynamics simulations.
//!
//! Infrequent metadynamics deposits bias slowly enough that the transition state stays
//! unbiased, so the time of each observed escape can be rescaled to the unbiased time scale
//! by the acceleration factor $e^{\beta V(s,t)}$. Repeating the simulation gives an ensemble of
//! rescaled escape times whose distribution, for a rare event, is exponential with mean
//! lifetime $\tau$; the rate constant is $k = 1/\tau$.
//!
//! The crate has two halves that communicate only through `.npy` files:
//!
//! - [`extract`] finds the barrier crossing in each run's COLVAR trajectory and computes the
//!   observed and rescaled escape times;
//! - [`rate`] fits the exponential CDF to the rescaled times and checks the fit with a
//!   Kolmogorov–Smirnov test.
//!
//! Please reference the following if you use this code in your research:
//!
//! [1] Tiwary P and Parrinello M. From metadynamics to dynamics. Phys. Rev. Lett. 111:230602,
//! 2013. <https://doi.org/10.1103/PhysRevLett.111.230602>
//!
//! [2] Salvalaglio M, Tiwary P and Parrinello M. Assessing the Reliability of the Dynamics
//! Reconstructed from Metadynamics. J. Chem. Theory Comput. 10:1420, 2014.
//! <https://doi.org/10.1021/ct500040r>
//!
//! # Examples
//!
//! ```
//! use imetad_rs::*;
//! use imetad_rs::testsystems::PoissonEscape;
//! use rand::SeedableRng;
//!
//! let config = AnalysisConfig::builder()
//!     .runs(40)
//!     .synthetic_samples(20_000)
//!     .seed(3)
//!     .build()
//!     .unwrap();
//! let process = PoissonEscape::builder()
//!     .tau(5000.0)
//!     .bias(4.0)
//!     .beta(config.beta())
//!     .build()
//!     .unwrap();
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(3);
//! let runs: Vec<_> = config.run_numbers().map(|_| process.sample(&mut rng)).collect();
//! let batch = extract::extract_with(&config, |run| Ok((runs[run - 1].clone(), None))).unwrap();
//! let estimate = rate::estimate_rate(batch.transition_times().view(), &config).unwrap();
//! println!("{}", estimate);
//! ```

#[macro_use]
extern crate derive_builder;

pub mod config;
pub mod errors;
pub mod extract;
pub mod persist;
pub mod rate;
pub mod stats;
pub mod testsystems;
pub mod trajectory;

pub use config::{AnalysisConfig, AnalysisConfigBuilder, FailurePolicy};
pub use errors::{ImetadError, Result};
pub use extract::{Batch, CrossingDirection, RunResult};
pub use rate::RateEstimate;
pub use trajectory::Trajectory;

use tracing::warn;

/// Boltzmann constant in J/K (exact, SI 2019)
pub const BOLTZMANN_CONSTANT: f64 = 1.380649e-23;

/// Avogadro constant in 1/mol (exact, SI 2019)
pub const AVOGADRO_CONSTANT: f64 = 6.02214076e23;

/// Extract every run from disk and store the ensemble arrays in the output directory
pub fn extract_and_save(config: &AnalysisConfig) -> Result<Batch> {
    let batch = extract::extract_batch(config)?;
    persist::save_batch(&batch, config)?;
    Ok(batch)
}

/// Load the stored transition times and estimate the rate constant
pub fn estimate_from_saved(config: &AnalysisConfig) -> Result<RateEstimate> {
    let times = persist::load_transition_times(config)?;
    if times.len() < config.runs() {
        warn!(
            stored = times.len(),
            configured = config.runs(),
            "ensemble holds fewer runs than configured"
        );
    }
    rate::estimate_rate(times.view(), config)
}

/// Run the whole analysis: extract, store, and estimate
pub fn analyze(config: &AnalysisConfig) -> Result<(Batch, RateEstimate)> {
    let batch = extract_and_save(config)?;
    let estimate = estimate_from_saved(config)?;
    Ok((batch, estimate))
}
